use crate::core::car::CarSpec;
use crate::core::driver::DriverProfile;
use crate::core::error::SimulationWarning;
use crate::core::pid::{PidController, PidGains};
use crate::core::track::{TrackLocation, TrackPath};
use crate::core::vehicle::{Controls, ShiftIntent, VehicleState};
use glam::DVec2;
use helpers::general::wrap_angle;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use std::collections::VecDeque;
use std::f64::consts::{FRAC_PI_2, PI};
use tracing::{debug, warn};

// pure pursuit
const LOOKAHEAD_BASE: f64 = 6.0; // m
const LOOKAHEAD_PER_SPEED: f64 = 0.55; // s
const STEER_FILTER_MIN: f64 = 0.04; // s, time constant at skill 1
const STEER_FILTER_PER_SKILL: f64 = 0.08; // s, added at skill 0

// speed control
const PREVIEW_TIME: f64 = 1.5; // s
const MIN_PREVIEW: f64 = 20.0; // m
const RECOVERY_SPEED: f64 = 8.0; // m/s
const PIT_APPROACH_DIST: f64 = 250.0; // m
const PIT_DECEL: f64 = 4.0; // m/s^2
const PIT_CRAWL_SPEED: f64 = 2.0; // m/s
const TRAIL_BRAKE_SHARE: f64 = 0.5; // brake given up at full steering lock
const RECOVERY_BRAKE: f64 = 0.35;

// tactical state machine
const DETECTION_RANGE: f64 = 100.0; // m
const RECOVERY_HEADING_ERROR: f64 = PI / 3.0;
const REALIGN_HEADING_ERROR: f64 = PI / 12.0;
const REALIGN_TICKS: u32 = 30;
const OVERTAKE_TIMEOUT_TICKS: u32 = 120;
const DEFEND_TIMEOUT_TICKS: u32 = 90;
const OFF_TRACK_MARGIN: f64 = 1.5; // m beyond the kerbs

// lateral placement
const PASS_OFFSET: f64 = 3.0; // m, lateral distance kept to the car being passed
const EDGE_MARGIN: f64 = 1.0; // m, distance kept to the track limits
const LATERAL_RATE: f64 = 2.5; // m/s
const DEFEND_RATE: f64 = 1.0; // m/s
const DEFEND_OFFSET_BASE: f64 = 1.5; // m
const DEFEND_OFFSET_PER_AGGRESSION: f64 = 0.5; // m
const ALONGSIDE_GAP: f64 = 5.0; // m
const AVOID_GAP: f64 = 10.0; // m
const AVOID_LATERAL: f64 = 3.0; // m
const FOLLOW_GAP: f64 = 15.0; // m
const FOLLOW_LATERAL: f64 = 2.0; // m

// imperfection
const STEER_NOISE_SD: f64 = 0.04;
const THROTTLE_NOISE_SD: f64 = 0.05;
const NOISE_SD_LIMIT: f64 = 3.0;

/// Throttle of the conservative fallback used when the path cannot be evaluated.
pub const FALLBACK_THROTTLE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AiState {
    Racing,
    Overtaking,
    Defending,
    Recovering,
    Pitting,
}

impl AiState {
    /// can_transition_to returns true if next is reachable from this state in one step.
    pub fn can_transition_to(&self, next: AiState) -> bool {
        use AiState::*;
        match (*self, next) {
            (a, b) if a == b => true,
            (_, Recovering) => true,
            (Racing, Overtaking) => true,
            (Racing, Defending) | (Overtaking, Defending) => true,
            (Overtaking, Racing) | (Defending, Racing) | (Recovering, Racing) | (Pitting, Racing) => true,
            (Racing, Pitting) | (Overtaking, Pitting) | (Defending, Pitting) => true,
            _ => false,
        }
    }
}

/// Another car as seen by a driver.
/// * `gap` - (m) Distance along the track, positive if the other car is ahead
/// * `lateral_offset` - (m) Lateral offset of the other car from the track center (+ left)
/// * `speed` - (m/s) Speed of the other car
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyCar {
    pub car_no: u32,
    pub gap: f64,
    pub lateral_offset: f64,
    pub speed: f64,
}

/// Per-tick environment of a driver decision.
#[derive(Debug, Clone, Copy)]
pub struct DriveEnv {
    pub dt: f64,
    pub wet: bool,
    pub car_no: u32,
}

/// Controller of an AI car: Pure Pursuit steering, PID speed control and a tactical state
/// machine. Everything that changes between ticks lives here, the driver profile is read-only.
#[derive(Debug, Clone)]
pub struct AiDriver {
    state: AiState,
    pid: PidController,
    steering_filtered: f64,
    lateral_target: Option<f64>,
    reaction_buffer: VecDeque<Vec<NearbyCar>>,
    reaction_ticks: usize,
    realign_ticks: u32,
    no_target_ticks: u32,
    no_attacker_ticks: u32,
    pit_stop_done: bool,
    track_hint: Option<usize>,
    last_warning: Option<SimulationWarning>,
    warning_count: u64,
}

impl AiDriver {
    pub fn new(profile: &DriverProfile, dt: f64) -> AiDriver {
        let reaction_ticks = if dt > 0.0 {
            (profile.reaction_time / dt).round().max(0.0) as usize
        } else {
            0
        };

        AiDriver {
            state: AiState::Racing,
            pid: PidController::new(),
            steering_filtered: 0.0,
            lateral_target: None,
            reaction_buffer: VecDeque::with_capacity(reaction_ticks + 1),
            reaction_ticks,
            realign_ticks: 0,
            no_target_ticks: 0,
            no_attacker_ticks: 0,
            pit_stop_done: false,
            track_hint: None,
            last_warning: None,
            warning_count: 0,
        }
    }

    pub fn state(&self) -> AiState {
        self.state
    }

    pub fn reaction_ticks(&self) -> usize {
        self.reaction_ticks
    }

    pub fn warning_count(&self) -> u64 {
        self.warning_count
    }

    pub fn lateral_target(&self) -> Option<f64> {
        self.lateral_target
    }

    // ---------------------------------------------------------------------------------------------
    // PIT STOPS -----------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// request_pit switches the driver into the pitting state. Only accepted while racing,
    /// overtaking or defending.
    pub fn request_pit(&mut self) -> bool {
        if self.state == AiState::Pitting || !self.state.can_transition_to(AiState::Pitting) {
            return false;
        }
        self.pit_stop_done = false;
        self.set_state(AiState::Pitting);
        true
    }

    /// complete_pit_stop is called once the standstill in the box is over.
    pub fn complete_pit_stop(&mut self) {
        self.pit_stop_done = true;
        self.pid.reset();
    }

    pub fn pit_stop_done(&self) -> bool {
        self.pit_stop_done
    }

    /// finish_pit returns the driver to racing after the pit exit.
    pub fn finish_pit(&mut self) {
        if self.state == AiState::Pitting {
            self.set_state(AiState::Racing);
        }
        self.pit_stop_done = false;
    }

    fn set_state(&mut self, next: AiState) {
        if next == self.state || !self.state.can_transition_to(next) {
            return;
        }
        debug!("AI state change {:?} -> {:?}", self.state, next);
        self.state = next;
        self.realign_ticks = 0;
        self.no_target_ticks = 0;
        self.no_attacker_ticks = 0;
    }

    // ---------------------------------------------------------------------------------------------
    // MAIN METHOD ---------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// decide returns the controls of the current tick. Problems with the path data never abort
    /// the session: they are logged and answered with conservative fallback controls.
    #[allow(clippy::too_many_arguments)]
    pub fn decide<R: Rng>(
        &mut self,
        state: &VehicleState,
        profile: &DriverProfile,
        spec: &CarSpec,
        track: Option<&TrackPath>,
        nearby: &[NearbyCar],
        env: &DriveEnv,
        rng: &mut R,
    ) -> Controls {
        let perceived = self.perceive(nearby);

        match self.try_decide(state, profile, spec, track, &perceived, env, rng) {
            Ok(controls) => {
                self.last_warning = None;
                controls
            }
            Err(warning) => {
                if self.last_warning.as_ref() != Some(&warning) {
                    warn!("Car {}: {}, using fallback controls", env.car_no, warning);
                }
                self.last_warning = Some(warning);
                self.warning_count += 1;
                self.track_hint = None;
                Self::fallback_controls()
            }
        }
    }

    /// fallback_controls returns straight-ahead part throttle.
    pub fn fallback_controls() -> Controls {
        Controls {
            throttle: FALLBACK_THROTTLE,
            brake: 0.0,
            steering: 0.0,
            shift: ShiftIntent::None,
        }
    }

    /// perceive feeds the reaction buffer and returns what the driver reacts to in this tick:
    /// the surrounding cars as they were reaction_ticks ago.
    fn perceive(&mut self, nearby: &[NearbyCar]) -> Vec<NearbyCar> {
        self.reaction_buffer.push_back(nearby.to_vec());
        while self.reaction_buffer.len() > self.reaction_ticks + 1 {
            self.reaction_buffer.pop_front();
        }
        self.reaction_buffer.front().cloned().unwrap_or_default()
    }

    #[allow(clippy::too_many_arguments)]
    fn try_decide<R: Rng>(
        &mut self,
        state: &VehicleState,
        profile: &DriverProfile,
        spec: &CarSpec,
        track: Option<&TrackPath>,
        perceived: &[NearbyCar],
        env: &DriveEnv,
        rng: &mut R,
    ) -> Result<Controls, SimulationWarning> {
        let track = track.ok_or(SimulationWarning::MissingPath)?;
        if !state.is_finite() {
            return Err(SimulationWarning::NonFinite("vehicle state"));
        }
        let loc = track.locate(state.position, self.track_hint)?;
        self.track_hint = Some(loc.segment);

        let speed = state.speed();
        let v_long = state.longitudinal_speed();
        let heading_error = wrap_angle(state.heading() - loc.heading);
        let off_track = loc.excess() > track.kerb_width + OFF_TRACK_MARGIN
            && track.surface_at(&loc).is_off_track();

        self.update_tactical_state(&loc, heading_error, off_track, v_long, perceived);

        // lateral placement and speed target
        let lateral_target =
            self.update_lateral_target(&loc, v_long, perceived, profile, spec.pars.collision_radius, env);
        let mut v_target = self.target_speed(&loc, speed, profile, track, env.wet);
        for other in perceived.iter() {
            let lateral_diff = (other.lateral_offset - loc.lateral_offset).abs();
            if other.gap > 0.0 && other.gap < FOLLOW_GAP && lateral_diff < FOLLOW_LATERAL {
                v_target = v_target.min(other.speed);
            }
        }

        // steering
        let lookahead = (LOOKAHEAD_BASE + LOOKAHEAD_PER_SPEED * speed) * (1.0 + 0.5 * (1.0 - profile.skill));
        let s_look = loc.s + lookahead;
        let lateral_look = self.pit_offset_at(s_look, track).unwrap_or(lateral_target);
        let target_point = track.point_at(s_look, lateral_look);
        let steer_angle = pure_pursuit(
            state.position,
            state.heading(),
            target_point,
            spec.pars.wheelbase,
            spec.pars.max_steer_angle,
        );
        let steer_cmd = (steer_angle / spec.pars.max_steer_angle).clamp(-1.0, 1.0);
        let tau = STEER_FILTER_MIN + STEER_FILTER_PER_SKILL * (1.0 - profile.skill);
        self.steering_filtered += env.dt / (tau + env.dt) * (steer_cmd - self.steering_filtered);

        // speed control with per-tick gain jitter
        let gains = PidGains::BASELINE.jittered(profile.consistency, rng);
        let u = self.pid.update(v_target - v_long, &gains, env.dt);
        let (throttle, brake) = if u >= 0.0 { (u.min(1.0), 0.0) } else { (0.0, (-u).min(1.0)) };
        let brake = blend_brake(brake, self.steering_filtered, self.state == AiState::Recovering);

        let noise_scale = 1.0 - profile.consistency;
        let steering = self.steering_filtered + gaussian_noise(STEER_NOISE_SD * noise_scale, rng);
        let throttle = if throttle > 0.0 {
            throttle + gaussian_noise(THROTTLE_NOISE_SD * noise_scale, rng)
        } else {
            throttle
        };

        let controls = Controls {
            throttle,
            brake,
            steering,
            shift: ShiftIntent::None,
        }
        .clamped();

        if !(controls.throttle.is_finite() && controls.steering.is_finite()) {
            return Err(SimulationWarning::NonFinite("controls"));
        }
        Ok(controls)
    }

    // ---------------------------------------------------------------------------------------------
    // METHODS (TACTICS) ---------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    fn update_tactical_state(
        &mut self,
        loc: &TrackLocation,
        heading_error: f64,
        off_track: bool,
        v_long: f64,
        perceived: &[NearbyCar],
    ) {
        if self.state != AiState::Recovering && (heading_error.abs() > RECOVERY_HEADING_ERROR || off_track) {
            self.set_state(AiState::Recovering);
            self.pid.reset();
            return;
        }

        let overtake_target = self.find_overtake_target(loc, v_long, perceived);
        let attacker = find_attacker(v_long, perceived);

        match self.state {
            AiState::Recovering => {
                if heading_error.abs() < REALIGN_HEADING_ERROR && !off_track {
                    self.realign_ticks += 1;
                } else {
                    self.realign_ticks = 0;
                }
                if self.realign_ticks >= REALIGN_TICKS {
                    self.set_state(AiState::Racing);
                }
            }
            AiState::Racing => {
                if overtake_target.is_some() {
                    self.set_state(AiState::Overtaking);
                } else if attacker.is_some() {
                    self.set_state(AiState::Defending);
                }
            }
            AiState::Overtaking => {
                if overtake_target.is_some() {
                    self.no_target_ticks = 0;
                } else if attacker.is_some() {
                    self.set_state(AiState::Defending);
                } else {
                    self.no_target_ticks += 1;
                    if self.no_target_ticks > OVERTAKE_TIMEOUT_TICKS {
                        self.set_state(AiState::Racing);
                    }
                }
            }
            AiState::Defending => {
                if attacker.is_some() {
                    self.no_attacker_ticks = 0;
                } else {
                    self.no_attacker_ticks += 1;
                    if self.no_attacker_ticks > DEFEND_TIMEOUT_TICKS {
                        self.set_state(AiState::Racing);
                    }
                }
            }
            // left through finish_pit
            AiState::Pitting => {}
        }
    }

    /// find_overtake_target returns the closest slower car ahead within the detection range
    /// that can be passed, together with the passing side (+1 left, -1 right).
    fn find_overtake_target(
        &self,
        loc: &TrackLocation,
        v_long: f64,
        perceived: &[NearbyCar],
    ) -> Option<(NearbyCar, f64)> {
        perceived
            .iter()
            .filter(|o| o.gap > 0.0 && o.gap <= DETECTION_RANGE && o.speed < v_long)
            .min_by(|a, b| a.gap.total_cmp(&b.gap).then(a.car_no.cmp(&b.car_no)))
            .and_then(|o| pass_side(o, loc).map(|side| (*o, side)))
    }

    /// update_lateral_target moves the lateral target towards the placement of the current state.
    /// A defending move stays within its bound even when cars alongside push the target, and the
    /// car body always stays inside the track limits.
    fn update_lateral_target(
        &mut self,
        loc: &TrackLocation,
        v_long: f64,
        perceived: &[NearbyCar],
        profile: &DriverProfile,
        car_radius: f64,
        env: &DriveEnv,
    ) -> f64 {
        let current = *self.lateral_target.get_or_insert(loc.lateral_offset);
        let mut rate = LATERAL_RATE;
        let mut defend_limit = None;

        let mut desired = match self.state {
            AiState::Overtaking => match self.find_overtake_target(loc, v_long, perceived) {
                Some((target, side)) => target.lateral_offset + side * PASS_OFFSET,
                None => current,
            },
            AiState::Defending => match find_attacker(v_long, perceived) {
                Some(attacker) if attacker.gap.abs() < ALONGSIDE_GAP => current,
                Some(attacker) => {
                    let limit = DEFEND_OFFSET_BASE + DEFEND_OFFSET_PER_AGGRESSION * profile.aggression;
                    rate = DEFEND_RATE;
                    defend_limit = Some(limit);
                    attacker.lateral_offset.max(-limit).min(limit)
                }
                None => current,
            },
            _ => 0.0,
        };

        // keep clear of cars next to us
        for other in perceived.iter() {
            let diff = loc.lateral_offset - other.lateral_offset;
            if other.gap.abs() < AVOID_GAP && diff.abs() < AVOID_LATERAL {
                let away = if diff.abs() > f64::EPSILON {
                    diff.signum()
                } else if env.car_no < other.car_no {
                    1.0
                } else {
                    -1.0
                };
                desired += away * (AVOID_LATERAL - diff.abs());
            }
        }

        if let Some(limit) = defend_limit {
            desired = desired.max(-limit).min(limit);
        }

        let edge = EDGE_MARGIN.max(car_radius);
        let left_limit = (loc.w_left - edge).max(0.0);
        let right_limit = (loc.w_right - edge).max(0.0);
        let desired = desired.max(-right_limit).min(left_limit);
        let max_step = rate * env.dt;
        let next = current + (desired - current).max(-max_step).min(max_step);
        self.lateral_target = Some(next);
        next
    }

    /// pit_offset_at returns the lateral offset of the pit lane at s if the driver is pitting and
    /// s lies inside the pit lane.
    fn pit_offset_at(&self, s: f64, track: &TrackPath) -> Option<f64> {
        if self.state != AiState::Pitting {
            return None;
        }
        let pit = track.pit_lane()?;
        if track.in_pit_zone(s) {
            Some(pit.lateral_offset)
        } else {
            None
        }
    }

    fn target_speed(
        &self,
        loc: &TrackLocation,
        speed: f64,
        profile: &DriverProfile,
        track: &TrackPath,
        wet: bool,
    ) -> f64 {
        let preview = (speed * PREVIEW_TIME).max(MIN_PREVIEW);
        let mut v_target = track.min_target_speed(loc.s, preview) * (0.88 + 0.12 * profile.skill);
        if wet {
            v_target *= 0.7 + 0.25 * profile.wet_skill;
        }

        match self.state {
            AiState::Recovering => v_target.min(RECOVERY_SPEED),
            AiState::Pitting => match track.pit_lane() {
                Some(pit) => {
                    if track.in_pit_zone(loc.s) {
                        let mut v_pit = pit.speed_limit;
                        if !self.pit_stop_done {
                            let dist_box = track.forward_distance(loc.s, pit.box_s);
                            if track.in_pit_zone(pit.box_s) && dist_box < PIT_APPROACH_DIST {
                                v_pit = v_pit.min((2.0 * PIT_DECEL * dist_box).sqrt() + PIT_CRAWL_SPEED);
                            }
                        }
                        v_target.min(v_pit)
                    } else {
                        let dist_entry = track.forward_distance(loc.s, pit.entry_s);
                        if dist_entry < PIT_APPROACH_DIST {
                            let v_entry = (pit.speed_limit.powi(2) + 2.0 * PIT_DECEL * dist_entry).sqrt();
                            v_target.min(v_entry)
                        } else {
                            v_target
                        }
                    }
                }
                None => v_target,
            },
            _ => v_target,
        }
    }
}

/// find_attacker returns the closest faster car behind within the detection range.
fn find_attacker(v_long: f64, perceived: &[NearbyCar]) -> Option<NearbyCar> {
    perceived
        .iter()
        .filter(|o| o.gap < 0.0 && o.gap >= -DETECTION_RANGE && o.speed > v_long)
        .max_by(|a, b| a.gap.total_cmp(&b.gap).then(b.car_no.cmp(&a.car_no)))
        .copied()
}

/// pass_side returns the side (+1 left, -1 right) with enough room to pass the other car, the
/// side away from the other car's offset is preferred.
fn pass_side(other: &NearbyCar, loc: &TrackLocation) -> Option<f64> {
    let preferred = if other.lateral_offset >= 0.0 { -1.0 } else { 1.0 };
    let fits = |side: f64| {
        let offset = other.lateral_offset + side * PASS_OFFSET;
        offset <= loc.w_left - EDGE_MARGIN && offset >= -(loc.w_right - EDGE_MARGIN)
    };
    [preferred, -preferred].into_iter().find(|side| fits(*side))
}

/// blend_brake keeps braking and cornering inside the friction circle: the brake demand shrinks
/// with the steering input. Recovering drivers brake gently to avoid locking up on the grass.
fn blend_brake(brake: f64, steering: f64, recovering: bool) -> f64 {
    let mut brake = brake.min(1.0 - TRAIL_BRAKE_SHARE * steering.abs().min(1.0));
    if recovering {
        brake = brake.min(RECOVERY_BRAKE);
    }
    brake.max(0.0)
}

/// pure_pursuit returns the front wheel angle (rad) that drives the car on a circular arc through
/// the target point. Targets behind the car get full lock towards their side.
pub fn pure_pursuit(position: DVec2, heading: f64, target: DVec2, wheelbase: f64, max_steer: f64) -> f64 {
    let to_target = target - position;
    let d = to_target.length();
    if d <= f64::EPSILON {
        return 0.0;
    }
    let alpha = wrap_angle(to_target.y.atan2(to_target.x) - heading);
    if alpha.abs() > FRAC_PI_2 {
        return max_steer.copysign(alpha);
    }
    (2.0 * wheelbase * alpha.sin() / d).atan().clamp(-max_steer, max_steer)
}

/// gaussian_noise draws from N(0, sd), limited to +-3 sd. Nothing is drawn for sd = 0.
fn gaussian_noise<R: Rng>(sd: f64, rng: &mut R) -> f64 {
    if sd <= 0.0 {
        return 0.0;
    }
    match Normal::new(0.0, sd) {
        Ok(normal) => normal
            .sample(rng)
            .clamp(-NOISE_SD_LIMIT * sd, NOISE_SD_LIMIT * sd),
        Err(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::car::test_car_pars;
    use crate::core::track::test_oval;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn setup(speed: f64) -> (CarSpec, VehicleState, DriverProfile, TrackPath) {
        let spec = CarSpec::new(&test_car_pars(1, 1)).expect("valid car");
        let mut state = VehicleState::new(DVec2::new(250.0, 0.0), 0.0, &spec);
        state.velocity = DVec2::new(speed, 0.0);
        let mut profile = DriverProfile::human("AI");
        profile.reaction_time = 0.0;
        (spec, state, profile, test_oval())
    }

    fn env() -> DriveEnv {
        DriveEnv {
            dt: 1.0 / 60.0,
            wet: false,
            car_no: 1,
        }
    }

    #[test]
    fn transitions_follow_defined_edges() {
        assert!(AiState::Racing.can_transition_to(AiState::Overtaking));
        assert!(AiState::Pitting.can_transition_to(AiState::Recovering));
        assert!(!AiState::Recovering.can_transition_to(AiState::Pitting));
        assert!(!AiState::Defending.can_transition_to(AiState::Overtaking));
        assert!(!AiState::Pitting.can_transition_to(AiState::Defending));
    }

    #[test]
    fn pure_pursuit_steers_towards_target() {
        let left = pure_pursuit(DVec2::ZERO, 0.0, DVec2::new(20.0, 2.0), 3.2, 0.35);
        let right = pure_pursuit(DVec2::ZERO, 0.0, DVec2::new(20.0, -2.0), 3.2, 0.35);
        assert!(left > 0.0);
        assert_relative_eq!(left, -right, epsilon = 1e-12);
        let behind = pure_pursuit(DVec2::ZERO, 0.0, DVec2::new(-10.0, 1.0), 3.2, 0.35);
        assert_relative_eq!(behind, 0.35);
    }

    #[test]
    fn overtaking_times_out_without_slower_car() {
        let (spec, state, profile, track) = setup(30.0);
        let mut ai = AiDriver::new(&profile, env().dt);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let slower = NearbyCar {
            car_no: 2,
            gap: 40.0,
            lateral_offset: 0.0,
            speed: 20.0,
        };

        ai.decide(&state, &profile, &spec, Some(&track), &[slower], &env(), &mut rng);
        assert_eq!(ai.state(), AiState::Overtaking);

        for _ in 0..OVERTAKE_TIMEOUT_TICKS {
            ai.decide(&state, &profile, &spec, Some(&track), &[], &env(), &mut rng);
        }
        assert_eq!(ai.state(), AiState::Overtaking);
        ai.decide(&state, &profile, &spec, Some(&track), &[], &env(), &mut rng);
        assert_eq!(ai.state(), AiState::Racing);
    }

    #[test]
    fn defending_move_is_bounded_and_frozen_alongside() {
        let (spec, state, mut profile, track) = setup(30.0);
        profile.aggression = 1.0;
        let mut ai = AiDriver::new(&profile, env().dt);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let attacker = NearbyCar {
            car_no: 2,
            gap: -30.0,
            lateral_offset: 6.0,
            speed: 40.0,
        };

        for _ in 0..600 {
            ai.decide(&state, &profile, &spec, Some(&track), &[attacker], &env(), &mut rng);
        }
        assert_eq!(ai.state(), AiState::Defending);
        let offset = ai.lateral_target().expect("target set");
        assert_relative_eq!(offset, 2.0, epsilon = 1e-9);

        // attacker alongside on the other side: no late move
        let alongside = NearbyCar {
            gap: -2.0,
            lateral_offset: -4.0,
            ..attacker
        };
        ai.decide(&state, &profile, &spec, Some(&track), &[alongside], &env(), &mut rng);
        assert_relative_eq!(ai.lateral_target().expect("target set"), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn defending_bound_holds_against_avoidance() {
        let (spec, state, mut profile, track) = setup(30.0);
        profile.aggression = 1.0;
        let mut ai = AiDriver::new(&profile, env().dt);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let attacker = NearbyCar {
            car_no: 2,
            gap: -30.0,
            lateral_offset: 6.0,
            speed: 40.0,
        };
        // a car slightly ahead on the right pushes the target further left
        let neighbour = NearbyCar {
            car_no: 3,
            gap: 3.0,
            lateral_offset: -2.0,
            speed: 30.0,
        };

        for _ in 0..600 {
            ai.decide(&state, &profile, &spec, Some(&track), &[attacker, neighbour], &env(), &mut rng);
        }
        assert_eq!(ai.state(), AiState::Defending);
        assert_relative_eq!(ai.lateral_target().expect("target set"), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn lateral_target_keeps_the_car_body_on_track() {
        let (spec, mut state, profile, track) = setup(30.0);
        state.position = DVec2::new(250.0, 6.5);
        let mut ai = AiDriver::new(&profile, env().dt);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        // attacker alongside on the inside: the target is frozen and pushed to the edge
        let attacker = NearbyCar {
            car_no: 2,
            gap: -2.0,
            lateral_offset: 4.0,
            speed: 40.0,
        };
        for _ in 0..120 {
            ai.decide(&state, &profile, &spec, Some(&track), &[attacker], &env(), &mut rng);
        }
        let limit = 7.0 - spec.pars.collision_radius;
        assert_relative_eq!(ai.lateral_target().expect("target set"), limit, epsilon = 1e-9);
    }

    #[test]
    fn kerb_excursion_does_not_start_recovery() {
        let (spec, mut state, profile, track) = setup(30.0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        state.position = DVec2::new(250.0, -8.0025);
        let mut ai = AiDriver::new(&profile, env().dt);
        ai.decide(&state, &profile, &spec, Some(&track), &[], &env(), &mut rng);
        assert_eq!(ai.state(), AiState::Racing);

        state.position = DVec2::new(250.0, -10.0);
        ai.decide(&state, &profile, &spec, Some(&track), &[], &env(), &mut rng);
        assert_eq!(ai.state(), AiState::Recovering);
    }

    #[test]
    fn braking_gives_way_to_steering() {
        assert_relative_eq!(blend_brake(1.0, 0.0, false), 1.0);
        assert_relative_eq!(blend_brake(1.0, -1.0, false), 0.5);
        assert_relative_eq!(blend_brake(0.2, 0.8, false), 0.2);
        assert_relative_eq!(blend_brake(1.0, 0.0, true), RECOVERY_BRAKE);
        assert_relative_eq!(blend_brake(0.0, 0.3, true), 0.0);
    }

    #[test]
    fn defending_returns_to_racing() {
        let (spec, state, profile, track) = setup(30.0);
        let mut ai = AiDriver::new(&profile, env().dt);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let attacker = NearbyCar {
            car_no: 2,
            gap: -30.0,
            lateral_offset: 0.0,
            speed: 40.0,
        };
        ai.decide(&state, &profile, &spec, Some(&track), &[attacker], &env(), &mut rng);
        assert_eq!(ai.state(), AiState::Defending);
        for _ in 0..=DEFEND_TIMEOUT_TICKS {
            ai.decide(&state, &profile, &spec, Some(&track), &[], &env(), &mut rng);
        }
        assert_eq!(ai.state(), AiState::Racing);
    }

    #[test]
    fn spun_car_recovers_after_realignment() {
        let (spec, mut state, profile, track) = setup(5.0);
        let mut ai = AiDriver::new(&profile, env().dt);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        state.orientation = glam::DQuat::from_rotation_z(2.0);
        ai.decide(&state, &profile, &spec, Some(&track), &[], &env(), &mut rng);
        assert_eq!(ai.state(), AiState::Recovering);

        state.orientation = glam::DQuat::from_rotation_z(0.0);
        for _ in 0..(REALIGN_TICKS - 1) {
            ai.decide(&state, &profile, &spec, Some(&track), &[], &env(), &mut rng);
        }
        assert_eq!(ai.state(), AiState::Recovering);
        ai.decide(&state, &profile, &spec, Some(&track), &[], &env(), &mut rng);
        assert_eq!(ai.state(), AiState::Racing);
    }

    #[test]
    fn reaction_delay_postpones_threat_response() {
        let (spec, state, mut profile, track) = setup(30.0);
        profile.reaction_time = 0.1;
        let mut ai = AiDriver::new(&profile, env().dt);
        assert_eq!(ai.reaction_ticks(), 6);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let slower = NearbyCar {
            car_no: 2,
            gap: 40.0,
            lateral_offset: 0.0,
            speed: 20.0,
        };

        ai.decide(&state, &profile, &spec, Some(&track), &[], &env(), &mut rng);
        for _ in 0..6 {
            ai.decide(&state, &profile, &spec, Some(&track), &[slower], &env(), &mut rng);
            assert_eq!(ai.state(), AiState::Racing);
        }
        ai.decide(&state, &profile, &spec, Some(&track), &[slower], &env(), &mut rng);
        assert_eq!(ai.state(), AiState::Overtaking);
    }

    #[test]
    fn missing_path_gives_fallback_controls() {
        let (spec, state, profile, _) = setup(10.0);
        let mut ai = AiDriver::new(&profile, env().dt);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let controls = ai.decide(&state, &profile, &spec, None, &[], &env(), &mut rng);
        assert_eq!(controls, AiDriver::fallback_controls());
        assert_eq!(ai.warning_count(), 1);
    }

    #[test]
    fn pit_requests_only_from_racing_states() {
        let (_, _, profile, _) = setup(10.0);
        let mut ai = AiDriver::new(&profile, 1.0 / 60.0);
        assert!(ai.request_pit());
        assert_eq!(ai.state(), AiState::Pitting);
        assert!(!ai.request_pit());
        ai.finish_pit();
        assert_eq!(ai.state(), AiState::Racing);
    }

    #[test]
    fn slow_car_ahead_on_the_same_line_limits_speed() {
        let (spec, state, profile, track) = setup(30.0);
        let mut ai = AiDriver::new(&profile, env().dt);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        // the car ahead is followed until the passing line is reached
        let blocker = NearbyCar {
            car_no: 2,
            gap: 8.0,
            lateral_offset: 0.0,
            speed: 10.0,
        };
        let controls = ai.decide(&state, &profile, &spec, Some(&track), &[blocker], &env(), &mut rng);
        assert!(controls.brake > 0.5);
        assert_relative_eq!(controls.throttle, 0.0);
    }
}
