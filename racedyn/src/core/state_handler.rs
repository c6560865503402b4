use helpers::general::wrap_distance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    OnTrack,
    Pitlane,
    PitStandstill,
}

/// StateHandler tracks the progress of a car along the track (line crossings, laps and sectors)
/// and its pit state machine.
#[derive(Debug, Clone)]
pub struct StateHandler {
    // parameters
    track_length: f64,
    s12: f64,
    s23: f64,
    pit_zone: Option<[f64; 2]>, // [entry, exit]

    // variables related to the track progress
    s_track_prev: f64,
    s_track_cur: f64,
    crossings_prev: i64,
    crossings_cur: i64,
    crossings_max: i64,
    compl_lap_prev: u32,
    compl_lap_cur: u32,

    // variables related to the state machine
    state: State,
    t_standstill: f64,
    t_standstill_target: f64,
    pub pit_act: bool,
    pub pit_standstill_act: bool,
}

impl StateHandler {
    /// new creates a state handler for a car starting at s_track_start. Starting positions in the
    /// second half of the track are considered to lie behind the finish line, i.e. crossing it the
    /// first time starts lap 1 instead of completing it.
    pub fn new(track_length: f64, s12: f64, s23: f64, s_track_start: f64) -> StateHandler {
        let crossings = if s_track_start > 0.5 * track_length { -1 } else { 0 };

        StateHandler {
            track_length,
            s12,
            s23,
            pit_zone: None,
            s_track_prev: s_track_start,
            s_track_cur: s_track_start,
            crossings_prev: crossings,
            crossings_cur: crossings,
            crossings_max: crossings,
            compl_lap_prev: 0,
            compl_lap_cur: 0,
            state: State::OnTrack,
            t_standstill: 0.0,
            t_standstill_target: 0.0,
            pit_act: false,
            pit_standstill_act: false,
        }
    }

    /// set_pit_zone sets the s coordinates where the pit lane begins and ends.
    pub fn set_pit_zone(&mut self, entry_s: f64, exit_s: f64) {
        self.pit_zone = Some([entry_s, exit_s]);
    }

    // ---------------------------------------------------------------------------------------------
    // PROGRESS ------------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// update_s_track stores the new s coordinate of the car and counts the finish line crossings.
    /// Driving backwards over the line decrements the counter, laps are only completed once the
    /// car exceeds its highest crossing count so far.
    pub fn update_s_track(&mut self, s_track_new: f64) {
        self.compl_lap_prev = self.compl_lap_cur;
        self.crossings_prev = self.crossings_cur;
        self.s_track_prev = self.s_track_cur;

        let s_track_new = s_track_new.rem_euclid(self.track_length);
        let delta = s_track_new - self.s_track_cur;
        if delta < -0.5 * self.track_length {
            self.crossings_cur += 1;
        } else if delta > 0.5 * self.track_length {
            self.crossings_cur -= 1;
        }
        self.s_track_cur = s_track_new;

        if self.crossings_cur > self.crossings_max {
            self.crossings_max = self.crossings_cur;
            self.compl_lap_cur = self.crossings_max.max(0) as u32;
        }
    }

    /// get_s_track_passed_this_step checks if the car passed the given s coordinate in forward
    /// direction within the last update.
    pub fn get_s_track_passed_this_step(&self, s_track: f64) -> bool {
        let wrapped = self.crossings_cur > self.crossings_prev;
        let moved_back = self.crossings_cur < self.crossings_prev
            || (!wrapped && self.s_track_cur < self.s_track_prev);

        if moved_back {
            false
        } else if wrapped {
            self.s_track_prev < s_track || s_track <= self.s_track_cur
        } else {
            self.s_track_prev < s_track && s_track <= self.s_track_cur
        }
    }

    /// get_crossing_frac returns the fraction of the last update at which the given s coordinate
    /// was passed. It is used to interpolate lap and sector times within a timestep.
    pub fn get_crossing_frac(&self, s_track: f64) -> f64 {
        let dist_step = self.step_distance();
        if dist_step <= f64::EPSILON {
            return 1.0;
        }
        let dist_to = (s_track - self.s_track_prev).rem_euclid(self.track_length);
        (dist_to / dist_step).clamp(0.0, 1.0)
    }

    /// step_distance returns the distance (m) driven along the track within the last update.
    fn step_distance(&self) -> f64 {
        let laps = (self.crossings_cur - self.crossings_prev) as f64;
        laps * self.track_length + self.s_track_cur - self.s_track_prev
    }

    /// get_sector_passed returns the number of the sector boundary (1: s12, 2: s23) that was
    /// passed in the last update. The finish line is handled by the lap counter.
    pub fn get_sector_passed(&self) -> Option<u8> {
        if self.get_s_track_passed_this_step(self.s12) {
            Some(1)
        } else if self.get_s_track_passed_this_step(self.s23) {
            Some(2)
        } else {
            None
        }
    }

    /// get_cur_sector returns the sector (1, 2 or 3) the car is currently in.
    pub fn get_cur_sector(&self) -> u8 {
        if self.s_track_cur < self.s12 {
            1
        } else if self.s_track_cur < self.s23 {
            2
        } else {
            3
        }
    }

    pub fn get_s_tracks(&self) -> (f64, f64) {
        (self.s_track_prev, self.s_track_cur)
    }

    pub fn get_s_track(&self) -> f64 {
        self.s_track_cur
    }

    /// get_compl_lap returns the number of completed laps.
    pub fn get_compl_lap(&self) -> u32 {
        self.compl_lap_cur
    }

    /// get_new_lap returns if a lap was completed in the last update.
    pub fn get_new_lap(&self) -> bool {
        self.compl_lap_cur > self.compl_lap_prev
    }

    /// get_race_prog returns the race progress (m): completed line crossings times track length
    /// plus the current s coordinate. Cars starting behind the line have a negative progress.
    pub fn get_race_prog(&self) -> f64 {
        self.crossings_cur as f64 * self.track_length + self.s_track_cur
    }

    /// get_gap_to returns the signed distance (m) along the track from this car to another s
    /// coordinate, positive if it lies ahead within half a lap.
    pub fn get_gap_to(&self, s_track_other: f64) -> f64 {
        wrap_distance(s_track_other - self.s_track_cur, self.track_length)
    }

    // ---------------------------------------------------------------------------------------------
    // PIT STATE MACHINE ---------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    pub fn get_state(&self) -> State {
        self.state
    }

    /// check_state_transition checks if the car enters or leaves the pit lane in the last update.
    /// The return value signals a state change.
    pub fn check_state_transition(&mut self, pit_this_lap: bool) -> bool {
        let [entry_s, exit_s] = match self.pit_zone {
            Some(zone) => zone,
            None => return false,
        };

        match self.state {
            State::OnTrack => {
                if pit_this_lap && self.get_s_track_passed_this_step(entry_s) {
                    self.state = State::Pitlane;
                    self.pit_act = true;
                    return true;
                }
            }
            State::Pitlane => {
                if self.get_s_track_passed_this_step(exit_s) {
                    self.state = State::OnTrack;
                    self.pit_act = false;
                    return true;
                }
            }
            // standstill is handled by the methods below
            State::PitStandstill => {}
        }
        false
    }

    /// act_pit_standstill activates the standstill state. Returns false if the car is not in the
    /// pit lane.
    pub fn act_pit_standstill(&mut self, t_standstill_target: f64) -> bool {
        if self.state != State::Pitlane {
            return false;
        }
        self.state = State::PitStandstill;
        self.pit_standstill_act = true;
        self.t_standstill = 0.0;
        self.t_standstill_target = t_standstill_target;
        true
    }

    /// deact_pit_standstill returns to the pit lane state after the standstill.
    pub fn deact_pit_standstill(&mut self) -> bool {
        if self.state != State::PitStandstill {
            return false;
        }
        self.state = State::Pitlane;
        self.pit_standstill_act = false;
        self.t_standstill = 0.0;
        self.t_standstill_target = 0.0;
        true
    }

    /// increment_t_standstill increments the standstill time and returns true once the target
    /// standstill time is reached.
    pub fn increment_t_standstill(&mut self, timestep_size: f64) -> bool {
        if self.state != State::PitStandstill {
            return false;
        }
        self.t_standstill += timestep_size;
        self.t_standstill >= self.t_standstill_target - 1e-9
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn start_behind_line_begins_first_lap_on_crossing() {
        let mut sh = StateHandler::new(1000.0, 300.0, 600.0, 990.0);
        assert_relative_eq!(sh.get_race_prog(), -10.0);
        sh.update_s_track(995.0);
        sh.update_s_track(5.0);
        assert!(!sh.get_new_lap());
        assert_eq!(sh.get_compl_lap(), 0);
        assert_relative_eq!(sh.get_race_prog(), 5.0);
        for s in [300.0, 600.0, 900.0, 2.0] {
            sh.update_s_track(s);
        }
        assert!(sh.get_new_lap());
        assert_eq!(sh.get_compl_lap(), 1);
    }

    #[test]
    fn backward_crossing_does_not_count_twice() {
        let mut sh = StateHandler::new(1000.0, 300.0, 600.0, 0.0);
        for s in [400.0, 800.0, 999.0, 1.0] {
            sh.update_s_track(s);
        }
        assert_eq!(sh.get_compl_lap(), 1);
        sh.update_s_track(998.0);
        assert_eq!(sh.get_compl_lap(), 1);
        assert!(!sh.get_s_track_passed_this_step(999.5));
        sh.update_s_track(3.0);
        assert!(!sh.get_new_lap());
        assert_eq!(sh.get_compl_lap(), 1);
    }

    #[test]
    fn sector_and_crossing_fraction() {
        let mut sh = StateHandler::new(1000.0, 300.0, 600.0, 0.0);
        sh.update_s_track(290.0);
        assert_eq!(sh.get_sector_passed(), None);
        sh.update_s_track(310.0);
        assert_eq!(sh.get_sector_passed(), Some(1));
        assert_relative_eq!(sh.get_crossing_frac(300.0), 0.5);
        assert_eq!(sh.get_cur_sector(), 2);

        for s in [600.0, 900.0, 990.0, 10.0] {
            sh.update_s_track(s);
        }
        assert!(sh.get_s_track_passed_this_step(0.0));
        assert_relative_eq!(sh.get_crossing_frac(0.0), 0.5);
    }

    #[test]
    fn pit_state_machine() {
        let mut sh = StateHandler::new(1000.0, 300.0, 600.0, 0.0);
        sh.set_pit_zone(900.0, 100.0);
        sh.update_s_track(450.0);
        sh.update_s_track(890.0);
        sh.update_s_track(910.0);
        assert!(!sh.check_state_transition(false));
        assert!(!sh.act_pit_standstill(2.0));

        let mut sh = StateHandler::new(1000.0, 300.0, 600.0, 0.0);
        sh.set_pit_zone(900.0, 100.0);
        sh.update_s_track(450.0);
        sh.update_s_track(890.0);
        sh.update_s_track(910.0);
        assert!(sh.check_state_transition(true));
        assert_eq!(sh.get_state(), State::Pitlane);
        assert!(sh.act_pit_standstill(0.05));
        assert!(!sh.increment_t_standstill(1.0 / 60.0));
        assert!(!sh.increment_t_standstill(1.0 / 60.0));
        assert!(sh.increment_t_standstill(1.0 / 60.0));
        assert!(sh.deact_pit_standstill());
        sh.update_s_track(990.0);
        sh.update_s_track(50.0);
        sh.update_s_track(110.0);
        assert!(sh.check_state_transition(false));
        assert_eq!(sh.get_state(), State::OnTrack);
    }

    #[test]
    fn gap_wraps_around_the_line() {
        let sh = StateHandler::new(1000.0, 300.0, 600.0, 990.0);
        assert_relative_eq!(sh.get_gap_to(10.0), 20.0);
        assert_relative_eq!(sh.get_gap_to(980.0), -10.0);
    }
}
