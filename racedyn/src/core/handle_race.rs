use crate::core::race::RaceSession;
use crate::core::telemetry::TelemetrySink;
use crate::core::track::TrackPath;
use crate::interfaces::race_snapshot::{RaceSnapshot, MAX_SNAPSHOT_FREQUENCY};
use crate::post::race_result::RaceResult;
use crate::pre::read_sim_pars::SimPars;
use anyhow::Context;
use flume::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// (s) Simulated time between two telemetry flushes.
const TELEMETRY_FLUSH_INTERVAL: f64 = 1.0;

/// Commands a live consumer can send to a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Pause,
    Resume,
    Abort,
    Pit(u32),
}

/// Optional connections of a session to the outside world.
/// * `tx` - Receives snapshots in real-time; if set the session is simulated in real-time
/// * `rx_cmd` - Commands from the consumer (pause, resume, abort, pit)
/// * `telemetry` - Sink the buffered telemetry is flushed into between the ticks
/// * `realtime_factor` - Simulation speed relative to real-time (only with tx)
pub struct RaceIo<'a> {
    pub tx: Option<&'a Sender<RaceSnapshot>>,
    pub rx_cmd: Option<&'a Receiver<SessionCommand>>,
    pub telemetry: Option<&'a mut dyn TelemetrySink>,
    pub realtime_factor: f64,
}

impl Default for RaceIo<'_> {
    fn default() -> Self {
        RaceIo {
            tx: None,
            rx_cmd: None,
            telemetry: None,
            realtime_factor: 1.0,
        }
    }
}

/// handle_race creates and simulates a race on the basis of the inserted parameters, and returns
/// the results for post-processing.
pub fn handle_race(sim_pars: &SimPars, track: Arc<TrackPath>, io: RaceIo) -> anyhow::Result<RaceResult> {
    let mut session = RaceSession::new(
        &sim_pars.race_pars,
        track,
        &sim_pars.driver_pars_all,
        &sim_pars.car_pars_all,
    )
    .context("Failed to set up the race session!")?;

    let RaceIo {
        tx,
        rx_cmd,
        mut telemetry,
        realtime_factor,
    } = io;
    if !(realtime_factor > 0.0) {
        anyhow::bail!("Real-time factor must be positive, got {}!", realtime_factor);
    }

    let snapshot_ticks = (1.0 / (MAX_SNAPSHOT_FREQUENCY * session.timestep_size)).round().max(1.0) as u64;
    let flush_ticks = (TELEMETRY_FLUSH_INTERVAL / session.timestep_size).round().max(1.0) as u64;
    let mut t_race_update_print = 0.0;
    let mut last_printed_lap = 0;

    // check if sender was inserted -> in that case use real-time simulation
    let sim_realtime = tx.is_some();

    while !session.is_finished() {
        let t_start = Instant::now();

        if let Some(rx) = rx_cmd {
            handle_commands(&mut session, rx);
            if session.is_finished() {
                break;
            }
            if session.race_state().paused {
                // block until the consumer continues
                match rx.recv() {
                    Ok(cmd) => apply_command(&mut session, cmd),
                    Err(_) => session.abort(),
                }
                continue;
            }
        }

        session.simulate_timestep();
        let race_state = session.race_state();

        if race_state.race_time > t_race_update_print + 0.9999 {
            debug!(
                "Simulating... Current race time is {:.3}s, leader completed {} laps",
                race_state.race_time, race_state.leader_laps
            );
            t_race_update_print = race_state.race_time;
        }
        if race_state.leader_laps + 1 > last_printed_lap && race_state.leader_laps < session.tot_no_laps {
            last_printed_lap = race_state.leader_laps + 1;
            if race_state.race_time > 0.0 {
                info!("Leader started lap {}", last_printed_lap);
            }
        }

        let tick = race_state.tick;
        if tick % flush_ticks == 0 {
            if let Some(sink) = telemetry.as_mut() {
                session
                    .flush_telemetry(&mut **sink)
                    .context("Failed to flush telemetry!")?;
            }
        }

        if sim_realtime {
            if let Some(tx) = tx {
                if tick % snapshot_ticks == 0 {
                    tx.send(RaceSnapshot::new(&session))
                        .context("Failed to send race snapshot!")?;
                }
            }

            // sleep until time step is finished in real-time as well
            let t_step = Duration::from_secs_f64(session.timestep_size / realtime_factor);
            match t_step.checked_sub(t_start.elapsed()) {
                Some(t_sleep) => sleep(t_sleep),
                None => debug!("Could not keep up with real-time!"),
            }
        }
    }

    if let Some(sink) = telemetry.as_mut() {
        let no_samples = session
            .flush_telemetry(&mut **sink)
            .context("Failed to flush telemetry!")?;
        debug!("Flushed {} remaining telemetry samples", no_samples);
    }

    let result = session.get_race_result();
    if result.aborted {
        warn!("Race was aborted, the classification is provisional");
    }

    // after the loop finishes, send the final result once
    if let Some(tx) = tx {
        tx.send(RaceSnapshot::final_snapshot(&session))
            .context("Failed to send final race result!")?;
    }

    Ok(result)
}

/// handle_commands applies all pending commands. A disconnected command channel is ignored, the
/// session then runs to its end.
fn handle_commands(session: &mut RaceSession, rx: &Receiver<SessionCommand>) {
    loop {
        match rx.try_recv() {
            Ok(cmd) => apply_command(session, cmd),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
}

fn apply_command(session: &mut RaceSession, cmd: SessionCommand) {
    match cmd {
        SessionCommand::Pause => session.pause(),
        SessionCommand::Resume => session.resume(),
        SessionCommand::Abort => session.abort(),
        SessionCommand::Pit(car_no) => {
            if !session.request_pit(car_no) {
                warn!("Pit request for car {} was rejected", car_no);
            }
        }
    }
}
