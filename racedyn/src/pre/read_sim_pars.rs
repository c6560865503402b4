use crate::core::car::CarPars;
use crate::core::driver::{DifficultyPreset, DriverPars};
use crate::core::race::RacePars;
use crate::core::track::{CsvTrackEl, TrackPars, TrackPath};
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Maximum number of AI opponents selectable on the command line.
pub const MAX_OPPONENTS: usize = 5;

/// SimPars is used to store all other parameter structs.
#[derive(Debug, Deserialize, Clone)]
pub struct SimPars {
    pub race_pars: RacePars,
    pub track_pars: TrackPars,
    pub driver_pars_all: HashMap<String, DriverPars>,
    pub car_pars_all: HashMap<u32, CarPars>,
}

/// read_sim_pars reads the JSON file and decodes the JSON string into the simulation parameters
/// struct.
pub fn read_sim_pars(filepath: &Path) -> anyhow::Result<SimPars> {
    let fh = OpenOptions::new()
        .read(true)
        .open(filepath)
        .context(format!("Failed to open parameter file {}!", filepath.display()))?;
    let pars = serde_json::from_reader(&fh)
        .context(format!("Failed to parse parameter file {}!", filepath.display()))?;
    Ok(pars)
}

/// read_centerline_csv reads the track centerline. Every row holds x_m, y_m, w_tr_left_m and
/// w_tr_right_m in this order, comment lines start with '#' and a header row is skipped.
pub fn read_centerline_csv(filepath: &Path) -> anyhow::Result<Vec<CsvTrackEl>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(filepath)
        .context(format!("Failed to open track file {}!", filepath.display()))?;

    let mut centerline = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result.context(format!(
            "Failed to read row {} of track file {}!",
            i + 1,
            filepath.display()
        ))?;
        // header row
        if record.get(0).map_or(true, |field| field.parse::<f64>().is_err()) {
            continue;
        }
        let el: CsvTrackEl = record.deserialize(None).context(format!(
            "Failed to parse row {} of track file {}!",
            i + 1,
            filepath.display()
        ))?;
        centerline.push(el);
    }
    Ok(centerline)
}

/// get_centerline_path returns the default location of the centerline of a track:
/// input/tracks/<name>.csv.
pub fn get_centerline_path(track_pars: &TrackPars) -> PathBuf {
    let mut trackfile_path = PathBuf::new();
    trackfile_path.push("input");
    trackfile_path.push("tracks");
    trackfile_path.push(&track_pars.name);
    trackfile_path.set_extension("csv");
    trackfile_path
}

/// load_track reads the centerline and builds the track path.
pub fn load_track(track_pars: &TrackPars, centerline_path: &Path) -> anyhow::Result<TrackPath> {
    info!("Loading track from {}", centerline_path.display());
    let centerline = read_centerline_csv(centerline_path)?;
    let track = TrackPath::new(track_pars, &centerline)
        .context(format!("Failed to build track {}!", track_pars.name))?;
    Ok(track)
}

/// apply_grid_selection reduces the field to the human car (if any) plus no_opponents AI cars,
/// taken in the order of the participants list. If a difficulty preset is given, it replaces
/// the driver parameters of the AI cars.
pub fn apply_grid_selection(
    sim_pars: &mut SimPars,
    no_opponents: usize,
    difficulty: Option<DifficultyPreset>,
) -> anyhow::Result<()> {
    if no_opponents > MAX_OPPONENTS {
        anyhow::bail!(
            "At most {} opponents can be selected, got {}!",
            MAX_OPPONENTS,
            no_opponents
        );
    }

    let human_car = sim_pars.race_pars.human_car;
    let ai_cars: Vec<u32> = sim_pars
        .race_pars
        .participants
        .iter()
        .copied()
        .filter(|car_no| Some(*car_no) != human_car)
        .collect();

    // without a human car at least one AI car is required
    let no_ai = if human_car.is_some() {
        no_opponents
    } else {
        no_opponents.max(1)
    };
    if no_ai > ai_cars.len() {
        warn!(
            "Only {} AI cars are available in the parameter file, {} requested",
            ai_cars.len(),
            no_ai
        );
    }

    let mut participants: Vec<u32> = human_car.into_iter().collect();
    participants.extend(ai_cars.iter().take(no_ai));
    sim_pars.race_pars.participants = participants;

    if let Some(preset) = difficulty {
        for car_no in ai_cars.iter().take(no_ai) {
            let initials = sim_pars
                .car_pars_all
                .get(car_no)
                .map(|car_pars| car_pars.driver_initials.to_owned())
                .ok_or_else(|| anyhow::anyhow!("Missing car number {} in car parameters!", car_no))?;
            let name = sim_pars
                .driver_pars_all
                .get(&initials)
                .map(|driver_pars| driver_pars.name.to_owned())
                .unwrap_or_default();
            let profile = preset.profile(&initials, &name);

            sim_pars.driver_pars_all.insert(
                initials.to_owned(),
                DriverPars {
                    initials,
                    name,
                    skill: profile.skill,
                    aggression: profile.aggression,
                    consistency: profile.consistency,
                    wet_skill: profile.wet_skill,
                    reaction_time: profile.reaction_time,
                },
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SIM_PARS_JSON: &str = r#"{
        "race_pars": { "tot_no_laps": 3, "participants": [1, 2, 3], "seed": 7 },
        "track_pars": {
            "name": "oval", "s12": 400.0, "s23": 900.0,
            "d_first_gridpos": -10.0, "d_per_gridpos": -8.0,
            "v_max": 75.0, "a_lat_max": 11.0, "a_brake_max": 9.0, "a_accel_max": 8.0
        },
        "driver_pars_all": {
            "AAA": { "initials": "AAA", "name": "Driver A" },
            "BBB": { "initials": "BBB", "skill": 0.6 },
            "CCC": { "initials": "CCC" }
        },
        "car_pars_all": {}
    }"#;

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("racedyn_{}_{}", std::process::id(), name));
        let mut fh = std::fs::File::create(&path).expect("temp file");
        fh.write_all(content.as_bytes()).expect("written");
        path
    }

    #[test]
    fn sim_pars_use_defaults() {
        let path = temp_file("sim_pars.json", SIM_PARS_JSON);
        let sim_pars = read_sim_pars(&path).expect("parsed");
        std::fs::remove_file(&path).ok();

        assert_eq!(sim_pars.race_pars.countdown_lights, 5);
        assert_eq!(sim_pars.race_pars.blue_flag_lap_gap, 3);
        assert_eq!(sim_pars.race_pars.seed, 7);
        assert_eq!(sim_pars.driver_pars_all["BBB"].skill, 0.6);
        assert_eq!(sim_pars.driver_pars_all["CCC"].consistency, 1.0);
        assert_eq!(sim_pars.track_pars.kerb_width, 1.0);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = read_sim_pars(Path::new("does/not/exist.json")).expect_err("missing file");
        assert!(format!("{}", err).contains("does/not/exist.json"));
    }

    #[test]
    fn centerline_skips_comments_and_header() {
        let path = temp_file(
            "centerline.csv",
            "# x_m,y_m,w_tr_left_m,w_tr_right_m\nx_m,y_m,w_tr_left_m,w_tr_right_m\n0.0, 0.0, 5.0, 6.0\n10.0,0.0,5.0,6.0\n",
        );
        let centerline = read_centerline_csv(&path).expect("parsed");
        std::fs::remove_file(&path).ok();

        assert_eq!(centerline.len(), 2);
        assert_eq!(centerline[1].x_m, 10.0);
        assert_eq!(centerline[0].w_tr_left_m, 5.0);
        assert_eq!(centerline[0].w_tr_right_m, 6.0);
    }

    #[test]
    fn grid_selection_keeps_human_and_opponents() {
        let path = temp_file("sim_pars_grid.json", SIM_PARS_JSON);
        let mut sim_pars = read_sim_pars(&path).expect("parsed");
        std::fs::remove_file(&path).ok();

        sim_pars.race_pars.human_car = Some(2);
        apply_grid_selection(&mut sim_pars, 1, None).expect("selected");
        assert_eq!(sim_pars.race_pars.participants, vec![2, 1]);

        sim_pars.race_pars.human_car = None;
        sim_pars.race_pars.participants = vec![1, 2, 3];
        apply_grid_selection(&mut sim_pars, 0, None).expect("selected");
        assert_eq!(sim_pars.race_pars.participants, vec![1]);

        assert!(apply_grid_selection(&mut sim_pars, 6, None).is_err());
    }
}
