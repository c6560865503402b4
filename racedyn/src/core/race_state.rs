use crate::core::error::DnfReason;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Countdown,
    Racing,
    Finished,
}

/// Retirement of a car. The car stays in the results with the laps it completed.
#[derive(Debug, Clone, PartialEq)]
pub struct Retirement {
    pub tick: u64,
    pub race_time: f64,
    pub reason: DnfReason,
}

/// Timing data of a single car.
/// * `laps` - Completed laps
/// * `lap_times` - (s) Lap times, index 0 holds lap 1
/// * `race_times` - (s) Race time at the end of each lap
/// * `sector_times` - (s) Sector times of the completed laps
/// * `progress` - (m) Race progress, i.e. crossings times track length plus s coordinate
/// * `position` - Current position in the field (1-based), 0 for retired cars
#[derive(Debug, Clone)]
pub struct CarTiming {
    pub car_no: u32,
    pub driver_initials: String,
    pub laps: u32,
    pub lap_times: Vec<f64>,
    pub race_times: Vec<f64>,
    pub sector_times: Vec<[f64; 3]>,
    pub cur_sector_times: [Option<f64>; 3],
    pub best_lap: Option<f64>,
    pub progress: f64,
    pub position: u32,
    pub blue_flag: bool,
    pub pit_stops: u32,
    pub finish_time: Option<f64>,
    pub retirement: Option<Retirement>,
    t_lap_start: f64,
    t_sector_start: f64,
}

impl CarTiming {
    pub fn new(car_no: u32, driver_initials: &str) -> CarTiming {
        CarTiming {
            car_no,
            driver_initials: driver_initials.to_owned(),
            laps: 0,
            lap_times: Vec::new(),
            race_times: Vec::new(),
            sector_times: Vec::new(),
            cur_sector_times: [None; 3],
            best_lap: None,
            progress: 0.0,
            position: 0,
            blue_flag: false,
            pit_stops: 0,
            finish_time: None,
            retirement: None,
            t_lap_start: 0.0,
            t_sector_start: 0.0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finish_time.is_some()
    }

    pub fn is_retired(&self) -> bool {
        self.retirement.is_some()
    }

    /// record_sector stores the time of the sector (1 or 2) that ended at t_cross.
    pub fn record_sector(&mut self, sector: u8, t_cross: f64) {
        let idx = match sector {
            1 => 0,
            2 => 1,
            _ => return,
        };
        self.cur_sector_times[idx] = Some(t_cross - self.t_sector_start);
        self.t_sector_start = t_cross;
    }

    /// record_lap closes the current lap at t_cross and returns its lap time.
    pub fn record_lap(&mut self, t_cross: f64) -> f64 {
        let laptime = t_cross - self.t_lap_start;
        self.cur_sector_times[2] = Some(t_cross - self.t_sector_start);

        self.laps += 1;
        self.lap_times.push(laptime);
        self.race_times.push(t_cross);
        self.sector_times
            .push(self.cur_sector_times.map(|t| t.unwrap_or(f64::NAN)));
        self.cur_sector_times = [None; 3];
        self.t_lap_start = t_cross;
        self.t_sector_start = t_cross;

        if self.best_lap.map_or(true, |best| laptime < best) {
            self.best_lap = Some(laptime);
        }
        laptime
    }

    /// cur_laptime returns the time (s) spent in the current lap.
    pub fn cur_laptime(&self, race_time: f64) -> f64 {
        race_time - self.t_lap_start
    }
}

/// Read-only view on the state of a session.
/// * `tick` - Number of simulated timesteps including the countdown
/// * `race_time` - (s) Time since lights out
/// * `lights_on` - Number of red lights currently on
/// * `order` - Car numbers of all cars that were not retired, in field order
/// * `timings` - Timing per car, sorted by car number
/// * `dnf_list` - Car numbers of retired cars in the order of their retirement
#[derive(Debug, Clone)]
pub struct RaceState {
    pub phase: SessionPhase,
    pub tick: u64,
    pub race_time: f64,
    pub lights_on: u8,
    pub leader_laps: u32,
    pub order: Vec<u32>,
    pub timings: Vec<CarTiming>,
    pub dnf_list: Vec<u32>,
    pub paused: bool,
    pub aborted: bool,
}

impl RaceState {
    pub fn new(timings: Vec<CarTiming>) -> RaceState {
        let order = timings.iter().map(|t| t.car_no).collect();
        RaceState {
            phase: SessionPhase::Countdown,
            tick: 0,
            race_time: 0.0,
            lights_on: 0,
            leader_laps: 0,
            order,
            timings,
            dnf_list: Vec::new(),
            paused: false,
            aborted: false,
        }
    }

    pub fn timing(&self, car_no: u32) -> Option<&CarTiming> {
        self.timings.iter().find(|t| t.car_no == car_no)
    }

    /// update_order recomputes the field order and positions of all cars that were not retired
    /// and assigns the blue flags relative to the leader.
    pub fn update_order(&mut self, blue_flag_lap_gap: u32) {
        let mut idxs: Vec<usize> = (0..self.timings.len())
            .filter(|&i| !self.timings[i].is_retired())
            .collect();
        idxs.sort_by(|&a, &b| cmp_field_order(&self.timings[a], &self.timings[b]));

        self.leader_laps = idxs.first().map_or(0, |&i| self.timings[i].laps);
        self.order = idxs.iter().map(|&i| self.timings[i].car_no).collect();

        for timing in self.timings.iter_mut() {
            timing.position = 0;
            timing.blue_flag = false;
        }
        for (pos, &i) in idxs.iter().enumerate() {
            let timing = &mut self.timings[i];
            timing.position = pos as u32 + 1;
            timing.blue_flag = !timing.is_finished()
                && blue_flag_due(self.leader_laps, timing.laps, blue_flag_lap_gap);
        }
    }
}

/// blue_flag_due returns true if the car is at least lap_gap laps behind the leader.
pub fn blue_flag_due(leader_laps: u32, car_laps: u32, lap_gap: u32) -> bool {
    leader_laps.saturating_sub(car_laps) >= lap_gap.max(1)
}

/// cmp_field_order orders finished cars ahead of running cars (by laps, then finish time) and
/// running cars by race progress. Ties are broken by the car number, i.e. the order is strict.
pub fn cmp_field_order(a: &CarTiming, b: &CarTiming) -> Ordering {
    match (a.finish_time, b.finish_time) {
        (Some(t_a), Some(t_b)) => b.laps.cmp(&a.laps).then(t_a.total_cmp(&t_b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.progress.total_cmp(&a.progress),
    }
    .then(a.car_no.cmp(&b.car_no))
}

// -------------------------------------------------------------------------------------------------
// CLASSIFICATION ----------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassStatus {
    Finished,
    Running,
    Dnf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationEntry {
    pub position: u32,
    pub car_no: u32,
    pub driver_initials: String,
    pub status: ClassStatus,
    pub laps: u32,
    pub race_time: Option<f64>,
    pub best_lap: Option<f64>,
    pub retirement_tick: Option<u64>,
    pub dnf_reason: Option<String>,
}

/// classify builds the final classification: finishers by laps and finish time, then cars still
/// running by progress, then retired cars by completed laps and retirement tick (later
/// retirements first).
pub fn classify(timings: &[CarTiming]) -> Vec<ClassificationEntry> {
    let mut sorted: Vec<&CarTiming> = timings.iter().collect();
    sorted.sort_by(|a, b| match (&a.retirement, &b.retirement) {
        (None, None) => cmp_field_order(a, b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(ret_a), Some(ret_b)) => b
            .laps
            .cmp(&a.laps)
            .then(ret_b.tick.cmp(&ret_a.tick))
            .then(a.car_no.cmp(&b.car_no)),
    });

    sorted
        .iter()
        .enumerate()
        .map(|(i, timing)| {
            let status = if timing.is_retired() {
                ClassStatus::Dnf
            } else if timing.is_finished() {
                ClassStatus::Finished
            } else {
                ClassStatus::Running
            };
            let race_time = match status {
                ClassStatus::Finished => timing.finish_time,
                _ => timing.race_times.last().copied(),
            };

            ClassificationEntry {
                position: i as u32 + 1,
                car_no: timing.car_no,
                driver_initials: timing.driver_initials.to_owned(),
                status,
                laps: timing.laps,
                race_time,
                best_lap: timing.best_lap,
                retirement_tick: timing.retirement.as_ref().map(|r| r.tick),
                dnf_reason: timing.retirement.as_ref().map(|r| r.reason.to_string()),
            }
        })
        .collect()
}
