use crate::core::race_state::{ClassStatus, ClassificationEntry};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::io::Write as IoWrite;
use std::path::Path;

/// CarDriverPair is used to store car number and driver initials for post-processing the results.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CarDriverPair {
    pub car_no: u32,
    pub driver_initials: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RaceEventKind {
    LightsOut,
    Dnf,
    BlueFlag,
    PitStop,
    Damage,
    WeatherChange,
    Finish,
}

/// * `lap` - Lap of the leader when the event happened (1-based)
/// * `time_s` - (s) Race time
/// * `cars` - Cars concerned
/// * `detail` - Free text, e.g. the DNF reason
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RaceEvent {
    pub kind: RaceEventKind,
    pub lap: u32,
    pub time_s: f64,
    pub tick: u64,
    pub cars: Vec<u32>,
    pub detail: String,
}

/// RaceResult contains all race information that is required for post-processing the results.
/// Lap and race times are stored per car in car number order, index 0 is unused such that the
/// index equals the lap number. Laps that were not driven contain 0.0.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RaceResult {
    pub tot_no_laps: u32,
    pub car_driver_pairs: Vec<CarDriverPair>,
    pub laptimes: Vec<Vec<f64>>,
    pub racetimes: Vec<Vec<f64>>,
    pub classification: Vec<ClassificationEntry>,
    pub events: Vec<RaceEvent>,
    pub aborted: bool,
}

impl RaceResult {
    /// write_lap_and_race_times_to_file writes lap and race times and the classification to a
    /// text file (default: output/last_run.txt). Returns the path to the written file.
    pub fn write_lap_and_race_times_to_file(&self, path: Option<&Path>) -> anyhow::Result<String> {
        let content = self.format_result()?;

        let out_path = match path {
            Some(p) => p.to_path_buf(),
            None => Path::new("output").join("last_run.txt"),
        };
        if let Some(out_dir) = out_path.parent() {
            std::fs::create_dir_all(out_dir)
                .context(format!("Failed to create output directory {}!", out_dir.display()))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&out_path)
            .context(format!("Failed to open result file {}!", out_path.display()))?;
        file.write_all(content.as_bytes())?;
        file.flush()?;

        Ok(out_path.to_string_lossy().into_owned())
    }

    /// print_lap_and_race_times prints the resulting lap and race times and the classification to
    /// the console output.
    pub fn print_lap_and_race_times(&self) {
        match self.format_result() {
            Ok(content) => print!("{}", content),
            Err(e) => eprintln!("Failed to format race result: {}", e),
        }
    }

    /// format_result returns the lap time table, the race time table and the classification.
    pub fn format_result(&self) -> Result<String, std::fmt::Error> {
        let mut tmp_string_laptime = String::new();
        let mut tmp_string_racetime = String::new();
        let no_cars = self.car_driver_pairs.len();

        for lap in 1..self.tot_no_laps as usize + 1 {
            write!(&mut tmp_string_laptime, "{:3}, ", lap)?;
            write!(&mut tmp_string_racetime, "{:3}, ", lap)?;

            for i in 0..no_cars {
                let laptime = self.laptimes.get(i).and_then(|x| x.get(lap)).copied().unwrap_or(0.0);
                let racetime = self.racetimes.get(i).and_then(|x| x.get(lap)).copied().unwrap_or(0.0);
                let sep = if i < no_cars - 1 { ", " } else { "\n" };
                write!(&mut tmp_string_laptime, "{:8.3}s{}", laptime, sep)?;
                write!(&mut tmp_string_racetime, "{:8.3}s{}", racetime, sep)?;
            }
        }

        let mut tmp_string_car_driver_info = String::from("lap, ");
        for (i, car_driver_pair) in self.car_driver_pairs.iter().enumerate() {
            let sep = if i < no_cars - 1 { ", " } else { "" };
            write!(
                &mut tmp_string_car_driver_info,
                "{:3} ({}){}",
                car_driver_pair.car_no, car_driver_pair.driver_initials, sep
            )?;
        }

        let mut content = String::new();
        writeln!(&mut content, "RESULT: Lap times")?;
        writeln!(&mut content, "{}", tmp_string_car_driver_info)?;
        writeln!(&mut content, "{}", tmp_string_laptime)?;
        writeln!(&mut content, "RESULT: Race times")?;
        writeln!(&mut content, "{}", tmp_string_car_driver_info)?;
        writeln!(&mut content, "{}", tmp_string_racetime)?;
        writeln!(
            &mut content,
            "RESULT: Classification{}",
            if self.aborted { " (session aborted)" } else { "" }
        )?;
        for entry in self.classification.iter() {
            writeln!(&mut content, "{}", format_classification_entry(entry))?;
        }
        Ok(content)
    }

    /// winner returns the car number of the classified winner.
    pub fn winner(&self) -> Option<u32> {
        self.classification
            .first()
            .filter(|entry| entry.status == ClassStatus::Finished)
            .map(|entry| entry.car_no)
    }
}

fn format_classification_entry(entry: &ClassificationEntry) -> String {
    let time = entry
        .race_time
        .map_or_else(|| "-".to_owned(), |t| format!("{:.3}s", t));
    let best = entry
        .best_lap
        .map_or_else(|| "-".to_owned(), |t| format!("{:.3}s", t));

    match entry.status {
        ClassStatus::Finished => format!(
            "{:2}. #{:<3} {:<4} {:3} laps  {:>10}  best {:>9}",
            entry.position, entry.car_no, entry.driver_initials, entry.laps, time, best
        ),
        ClassStatus::Running => format!(
            "{:2}. #{:<3} {:<4} {:3} laps  {:>10}  best {:>9}  (running)",
            entry.position, entry.car_no, entry.driver_initials, entry.laps, time, best
        ),
        ClassStatus::Dnf => format!(
            "{:2}. #{:<3} {:<4} {:3} laps  DNF ({}, tick {})",
            entry.position,
            entry.car_no,
            entry.driver_initials,
            entry.laps,
            entry.dnf_reason.as_deref().unwrap_or("unknown"),
            entry.retirement_tick.unwrap_or(0)
        ),
    }
}
