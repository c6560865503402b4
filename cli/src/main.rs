use anyhow::Context;
use clap::Parser;
use plotters::prelude::*;
use racedyn::core::car::CarStatus;
use racedyn::core::handle_race::{handle_race, RaceIo, SessionCommand};
use racedyn::core::race_state::SessionPhase;
use racedyn::core::telemetry::{CsvSink, TelemetrySink};
use racedyn::core::track::TrackPath;
use racedyn::interfaces::race_snapshot::RaceSnapshot;
use racedyn::post::race_result::{RaceEventKind, RaceResult};
use racedyn::pre::read_sim_pars::{
    apply_grid_selection, get_centerline_path, load_track, read_sim_pars, SimPars, MAX_OPPONENTS,
};
use racedyn::pre::sim_opts::SimOpts;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufWriter};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// (s) Race time between two lines of the live feed.
const LIVE_FEED_INTERVAL: f64 = 1.0;

fn export_results_plot(result: &RaceResult, track_length_m: f64, show_speed: bool) -> anyhow::Result<String> {
    let out_dir = Path::new("output");
    std::fs::create_dir_all(out_dir)?;
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let out_path = out_dir.join(format!("race_plot_{}.png", ts));

    let lap_value = |lt: f64| if show_speed { (track_length_m / lt) * 3.6 } else { lt };
    let tot_laps = result.tot_no_laps as usize;
    let laptimes_car = |i: usize| {
        (1..=tot_laps).filter_map(move |lap| {
            result
                .laptimes
                .get(i)
                .and_then(|x| x.get(lap))
                .copied()
                .filter(|lt| lt.is_finite() && *lt > 0.0)
                .map(|lt| (lap as u32, lap_value(lt)))
        })
    };

    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    for i in 0..result.car_driver_pairs.len() {
        for (_, y) in laptimes_car(i) {
            y_min = y_min.min(y);
            y_max = y_max.max(y);
        }
    }
    if !y_min.is_finite() || !y_max.is_finite() {
        y_min = 0.0;
        y_max = 1.0;
    }
    let margin = ((y_max - y_min) * 0.05).max(0.1);
    y_min -= margin;
    y_max += margin;

    let root = BitMapBackend::new(&out_path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            if show_speed { "Average lap speed" } else { "Lap times" },
            ("sans-serif", 24).into_font(),
        )
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(1u32..result.tot_no_laps.max(2), y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Lap")
        .y_desc(if show_speed { "km/h" } else { "s" })
        .label_style(("sans-serif", 16))
        .axis_desc_style(("sans-serif", 16))
        .draw()?;

    let palette = Palette99::pick;
    for (i, pair) in result.car_driver_pairs.iter().enumerate() {
        chart
            .draw_series(LineSeries::new(laptimes_car(i), palette(i)))?
            .label(format!("{} ({})", pair.car_no, pair.driver_initials))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], palette(i)));
    }

    // vertical markers for retirements and pit stops
    for ev in result.events.iter() {
        let (color, width) = match ev.kind {
            RaceEventKind::Dnf => (RED, 2),
            RaceEventKind::PitStop => (RGBColor(255, 165, 0), 1),
            RaceEventKind::BlueFlag => (BLUE, 1),
            RaceEventKind::WeatherChange => (CYAN, 1),
            RaceEventKind::LightsOut | RaceEventKind::Damage | RaceEventKind::Finish => continue,
        };
        let x = ev.lap.clamp(1, result.tot_no_laps.max(1));
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(x, y_min), (x, y_max)],
            color.stroke_width(width),
        )))?;
    }

    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .background_style(&WHITE.mix(0.8))
        .label_font(("sans-serif", 16))
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;

    root.present()?;
    Ok(out_path.to_string_lossy().into_owned())
}

/// format_live_line returns a single line describing the current state of the race.
fn format_live_line(snapshot: &RaceSnapshot) -> String {
    match snapshot.phase {
        SessionPhase::Countdown => format!("Lights: {}", "*".repeat(snapshot.lights_on as usize)),
        SessionPhase::Racing | SessionPhase::Finished => {
            let mut cars: Vec<_> = snapshot.car_snapshots.iter().collect();
            cars.sort_by_key(|car| (car.status == CarStatus::Dnf, car.position, car.car_no));

            let order: Vec<String> = cars
                .iter()
                .map(|car| match car.status {
                    CarStatus::Dnf => format!("#{} {} DNF", car.car_no, car.driver_initials),
                    _ => format!(
                        "{}. #{} {} {:.0}km/h {:?} {:.0}%{}{}{}",
                        car.position,
                        car.car_no,
                        car.driver_initials,
                        car.speed * 3.6,
                        car.compound,
                        car.tire_wear * 100.0,
                        car.ai_state
                            .map(|state| format!(" {:?}", state))
                            .unwrap_or_default(),
                        if car.damaged { " [DMG]" } else { "" },
                        if car.blue_flag { " [BLUE]" } else { "" }
                    ),
                })
                .collect();

            format!(
                "{:7.1}s Lap {}/{} {:?} ({:.0}% wet) | {}",
                snapshot.race_time,
                snapshot.leader_lap,
                snapshot.tot_no_laps,
                snapshot.weather,
                snapshot.wetness * 100.0,
                order.join(" | ")
            )
        }
    }
}

fn open_telemetry_sink(path: &Path) -> anyhow::Result<CsvSink<BufWriter<File>>> {
    let fh = File::create(path).context(format!("Failed to create telemetry file {}!", path.display()))?;
    Ok(CsvSink::new(BufWriter::new(fh)))
}

/// run_live simulates the race in real-time on a separate thread and prints a live feed. Lines
/// entered on stdin control the session: p (pause), r (resume), q (abort), pit <car_no>.
fn run_live(sim_pars: &SimPars, track: Arc<TrackPath>, sim_opts: &SimOpts) -> anyhow::Result<RaceResult> {
    let (tx, rx) = flume::unbounded::<RaceSnapshot>();
    let (tx_cmd, rx_cmd) = flume::unbounded::<SessionCommand>();

    let sim_pars_thread = sim_pars.clone();
    let realtime_factor = sim_opts.realtime_factor;
    let mut telemetry = match &sim_opts.telemetry_path {
        Some(path) => Some(open_telemetry_sink(path)?),
        None => None,
    };

    let sim_thread = thread::spawn(move || {
        let io = RaceIo {
            tx: Some(&tx),
            rx_cmd: Some(&rx_cmd),
            telemetry: telemetry.as_mut().map(|sink| sink as &mut dyn TelemetrySink),
            realtime_factor,
        };
        handle_race(&sim_pars_thread, track, io)
    });

    // the input thread ends with the process, the session ignores a closed command channel
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            let mut parts = line.split_whitespace();
            let cmd = match (parts.next(), parts.next().map(str::parse::<u32>)) {
                (Some("p"), _) => SessionCommand::Pause,
                (Some("r"), _) => SessionCommand::Resume,
                (Some("q"), _) => SessionCommand::Abort,
                (Some("pit"), Some(Ok(car_no))) => SessionCommand::Pit(car_no),
                _ => {
                    warn!("Unknown command '{}' (use p, r, q or pit <car_no>)", line.trim());
                    continue;
                }
            };
            if tx_cmd.send(cmd).is_err() {
                break;
            }
        }
    });

    let mut t_last_print = f64::NEG_INFINITY;
    let mut last_lights = u8::MAX;
    for snapshot in rx.iter() {
        if snapshot.final_result.is_some() {
            println!("{}", format_live_line(&snapshot));
            break;
        }
        let print_now = match snapshot.phase {
            SessionPhase::Countdown => snapshot.lights_on != last_lights,
            _ => snapshot.race_time >= t_last_print + LIVE_FEED_INTERVAL,
        };
        if print_now {
            println!("{}", format_live_line(&snapshot));
            last_lights = snapshot.lights_on;
            t_last_print = snapshot.race_time;
        }
    }

    match sim_thread.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("Simulation thread panicked!"),
    }
}

/// run_batch simulates no_sim_runs races in parallel, run i uses the seed base_seed + i.
fn run_batch(sim_pars: &SimPars, track: Arc<TrackPath>, sim_opts: &SimOpts) -> anyhow::Result<Vec<RaceResult>> {
    let base_seed = sim_pars.race_pars.seed;

    let mut telemetry = match &sim_opts.telemetry_path {
        Some(path) => Some(open_telemetry_sink(path)?),
        None => None,
    };

    // the first run is executed on the main thread such that it can write the telemetry
    let first_result = handle_race(
        sim_pars,
        Arc::clone(&track),
        RaceIo {
            telemetry: telemetry.as_mut().map(|sink| sink as &mut dyn TelemetrySink),
            ..RaceIo::default()
        },
    )?;
    if let Some(path) = &sim_opts.telemetry_path {
        info!("Telemetry written to {}", path.display());
    }

    let further_results = (1..sim_opts.no_sim_runs.max(1))
        .into_par_iter()
        .map(|i| {
            let mut sim_pars_run = sim_pars.clone();
            sim_pars_run.race_pars.seed = base_seed.wrapping_add(i as u64);
            handle_race(&sim_pars_run, Arc::clone(&track), RaceIo::default())
                .context(format!("Simulation run {} failed!", i + 1))
        })
        .collect::<anyhow::Result<Vec<RaceResult>>>()?;

    let mut race_results = vec![first_result];
    race_results.extend(further_results);
    Ok(race_results)
}

fn main() -> anyhow::Result<()> {
    // PRE-PROCESSING ------------------------------------------------------------------------------
    // get simulation options from the command line arguments
    let sim_opts: SimOpts = SimOpts::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if sim_opts.debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // get simulation parameters
    let mut sim_pars = if let Some(parfile_path) = &sim_opts.parfile_path {
        info!("Reading simulation parameters from {}", parfile_path.display());
        read_sim_pars(parfile_path)?
    } else {
        anyhow::bail!("No parameter file provided! Use -p <path_to_json> to run the simulation.");
    };

    if let Some(seed) = sim_opts.seed {
        sim_pars.race_pars.seed = seed;
    }
    if sim_opts.opponents.is_some() || sim_opts.difficulty.is_some() {
        let no_ai_available = sim_pars
            .race_pars
            .participants
            .iter()
            .filter(|car_no| Some(**car_no) != sim_pars.race_pars.human_car)
            .count();
        let no_opponents = sim_opts
            .opponents
            .unwrap_or_else(|| no_ai_available.min(MAX_OPPONENTS));
        apply_grid_selection(&mut sim_pars, no_opponents, sim_opts.difficulty)?;
    }

    let trackfile_path = sim_opts
        .trackfile_path
        .clone()
        .unwrap_or_else(|| get_centerline_path(&sim_pars.track_pars));
    let track = Arc::new(load_track(&sim_pars.track_pars, &trackfile_path)?);

    // print race details
    info!(
        "Simulating {} laps on {} ({:.0}m) with {} cars, weather {:?}, seed {}",
        sim_pars.race_pars.tot_no_laps,
        track.name,
        track.length,
        sim_pars.race_pars.participants.len(),
        sim_pars.race_pars.weather,
        sim_pars.race_pars.seed
    );

    // EXECUTION -----------------------------------------------------------------------------------
    let t_start = Instant::now();
    let race_results = if sim_opts.live {
        info!("Running live simulation (commands: p, r, q, pit <car_no>)...");
        if sim_opts.no_sim_runs > 1 {
            warn!("Live mode simulates a single run, ignoring the number of simulation runs");
        }
        vec![run_live(&sim_pars, Arc::clone(&track), &sim_opts)?]
    } else {
        info!("Running {} simulation run(s)...", sim_opts.no_sim_runs.max(1));
        run_batch(&sim_pars, Arc::clone(&track), &sim_opts)?
    };
    info!("Execution time: {}ms", t_start.elapsed().as_millis());

    // POST-PROCESSING -----------------------------------------------------------------------------
    let race_result = &race_results[0];
    race_result.print_lap_and_race_times();
    let result_path = race_result.write_lap_and_race_times_to_file(None)?;
    info!("Result written to {}", result_path);

    if race_results.len() > 1 {
        let mut wins: HashMap<u32, u32> = HashMap::new();
        for result in race_results.iter() {
            if let Some(car_no) = result.winner() {
                *wins.entry(car_no).or_insert(0) += 1;
            }
        }
        let mut wins: Vec<(u32, u32)> = wins.into_iter().collect();
        wins.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        for (car_no, no_wins) in wins.iter() {
            info!("Car {} won {} of {} runs", car_no, no_wins, race_results.len());
        }
    }

    if sim_opts.plot {
        match export_results_plot(race_result, track.length, false) {
            Ok(path) => info!("Plot written to {}", path),
            Err(e) => warn!("Failed to write plot: {}", e),
        }
    }

    Ok(())
}
