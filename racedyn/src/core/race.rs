use crate::core::ai_driver::{AiDriver, AiState, DriveEnv, NearbyCar};
use crate::core::car::{Car, CarPars, CarSpec, CarStatus, Controller};
use crate::core::collision::{
    contact_circle_circle, resolve_contact, resolve_wall_contact, CollisionBody,
};
use crate::core::damage::ImpactZone;
use crate::core::driver::{DriverPars, DriverProfile};
use crate::core::error::{ConfigurationError, DnfReason, MechanicalFailure};
use crate::core::race_state::{classify, CarTiming, RaceState, Retirement, SessionPhase};
use crate::core::state_handler::{State, StateHandler};
use crate::core::telemetry::{StateSnapshot, TelemetryBuffer, TelemetrySink};
use crate::core::tire::TireWear;
use crate::core::track::{SurfaceType, TrackPath, Weather};
use crate::core::vehicle::{Controls, ShiftIntent, TrackContext, VehicleState, FIXED_TIMESTEP};
use crate::core::weather::WeatherSystem;
use crate::post::race_result::{CarDriverPair, RaceEvent, RaceEventKind, RaceResult};
use glam::{DQuat, DVec2};
use helpers::general::wrap_distance;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// (m) Other cars within this distance along the track are passed to the drivers.
const NEARBY_RANGE: f64 = 100.0;
/// (rad/s) Yaw rate regarded as a spin.
const INSTABILITY_YAW_RATE: f64 = 5.0;
/// (s) Spinning longer than this retires the car.
const INSTABILITY_TIME: f64 = 2.0;
/// (m/s) Speed below which a car counts as stationary.
const STUCK_SPEED: f64 = 0.3;
/// (s) Being stationary longer than this retires the car.
const STUCK_TIME: f64 = 30.0;
/// (m/s) and (m) Conditions for a pitting car to be stopped in its box.
const BOX_STOP_SPEED: f64 = 1.0;
const BOX_STOP_DIST: f64 = 5.0;
/// (m/s) Below this speed a car facing into the wall is turned towards the track direction.
const WALL_PIVOT_SPEED: f64 = 4.0;
/// Share of the heading error to the track direction removed per tick of wall contact.
const WALL_PIVOT_SHARE: f64 = 0.1;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishMode {
    /// The session ends as soon as the leader completed the race distance.
    LeaderFinish,
    /// After the leader finished every car finishes the next time it crosses the line.
    AllCarsTakeFlag,
}

impl Default for FinishMode {
    fn default() -> Self {
        FinishMode::LeaderFinish
    }
}

/// * `tot_no_laps` - Total number of laps
/// * `participants` - Car numbers of the participating cars
/// * `human_car` - Car number controlled through set_human_controls (optional)
/// * `seed` - Seed of the session random number generator
/// * `weather` - Weather at the start of the session
/// * `weather_change_interval` - (s) Time until the first weather change, enables dynamic weather
/// * `countdown_lights` - Number of red lights of the start sequence
/// * `light_interval` - (s) Time between two lights
/// * `blue_flag_lap_gap` - Lap deficit to the leader from which a car is shown blue flags
/// * `finish_mode` - leader_finish or all_cars_take_flag
/// * `telemetry_interval` - Number of ticks between two telemetry samples (0 disables telemetry)
/// * `restitution` - () Coefficient of restitution of contacts
/// * `collision_friction` - () Friction coefficient of contacts
/// * `heavy_impact_dv` - (m/s) Velocity change in a contact that retires the car
/// * `max_race_time` - (s) Race time after which the session is aborted
#[derive(Debug, Deserialize, Clone)]
pub struct RacePars {
    pub tot_no_laps: u32,
    pub participants: Vec<u32>,
    #[serde(default)]
    pub human_car: Option<u32>,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub weather: Weather,
    #[serde(default)]
    pub weather_change_interval: Option<f64>,
    #[serde(default = "default_countdown_lights")]
    pub countdown_lights: u8,
    #[serde(default = "default_light_interval")]
    pub light_interval: f64,
    #[serde(default = "default_blue_flag_lap_gap")]
    pub blue_flag_lap_gap: u32,
    #[serde(default)]
    pub finish_mode: FinishMode,
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval: u64,
    #[serde(default = "default_restitution")]
    pub restitution: f64,
    #[serde(default = "default_collision_friction")]
    pub collision_friction: f64,
    #[serde(default = "default_heavy_impact_dv")]
    pub heavy_impact_dv: f64,
    #[serde(default = "default_max_race_time")]
    pub max_race_time: f64,
}

fn default_countdown_lights() -> u8 {
    5
}

fn default_light_interval() -> f64 {
    1.0
}

fn default_blue_flag_lap_gap() -> u32 {
    3
}

fn default_telemetry_interval() -> u64 {
    6
}

fn default_restitution() -> f64 {
    0.3
}

fn default_collision_friction() -> f64 {
    0.3
}

fn default_heavy_impact_dv() -> f64 {
    25.0
}

fn default_max_race_time() -> f64 {
    7200.0
}

impl RacePars {
    /// new returns race parameters with default values for everything but laps and participants.
    pub fn new(tot_no_laps: u32, participants: Vec<u32>) -> RacePars {
        RacePars {
            tot_no_laps,
            participants,
            human_car: None,
            seed: 0,
            weather: Weather::default(),
            weather_change_interval: None,
            countdown_lights: default_countdown_lights(),
            light_interval: default_light_interval(),
            blue_flag_lap_gap: default_blue_flag_lap_gap(),
            finish_mode: FinishMode::default(),
            telemetry_interval: default_telemetry_interval(),
            restitution: default_restitution(),
            collision_friction: default_collision_friction(),
            heavy_impact_dv: default_heavy_impact_dv(),
            max_race_time: default_max_race_time(),
        }
    }

    fn check(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: &str| Err(ConfigurationError::InvalidSessionPars(reason.to_owned()));

        if self.tot_no_laps == 0 {
            return invalid("the race must have at least one lap");
        }
        if self.participants.is_empty() {
            return invalid("at least one participant is required");
        }
        if self.countdown_lights == 0 || !(self.light_interval > 0.0) {
            return invalid("the start sequence requires at least one light and a positive interval");
        }
        if !(0.0..=1.0).contains(&self.restitution) || !(self.collision_friction >= 0.0) {
            return invalid("restitution must be in [0, 1] and friction must not be negative");
        }
        if !(self.heavy_impact_dv > 0.0 && self.max_race_time > 0.0) {
            return invalid("heavy impact threshold and maximum race time must be positive");
        }
        if let Some(interval) = self.weather_change_interval {
            if !(interval > 0.0 && interval.is_finite()) {
                return invalid("the weather change interval must be positive");
            }
        }
        if let Some(car_no) = self.human_car {
            if !self.participants.contains(&car_no) {
                return invalid(&format!("human car {} is not a participant", car_no));
            }
        }
        Ok(())
    }
}

/// RaceSession owns all mutable state of a race: the cars, the timing and the random number
/// generator. It is advanced with fixed timesteps by simulate_timestep.
#[derive(Debug)]
pub struct RaceSession {
    pub timestep_size: f64,
    pub tot_no_laps: u32,
    finish_mode: FinishMode,
    weather: WeatherSystem,
    blue_flag_lap_gap: u32,
    restitution: f64,
    collision_friction: f64,
    heavy_impact_dv: f64,
    max_race_time: f64,
    countdown_lights: u8,
    light_ticks: u64,
    countdown_tick: u64,
    telemetry_interval: u64,
    leader_finished: bool,
    track: Arc<TrackPath>,
    cars_list: Vec<Car>,
    race_state: RaceState,
    rng: ChaCha8Rng,
    telemetry: TelemetryBuffer,
    events: Vec<RaceEvent>,
}

impl RaceSession {
    pub fn new(
        race_pars: &RacePars,
        track: Arc<TrackPath>,
        driver_pars_all: &HashMap<String, DriverPars>,
        car_pars_all: &HashMap<u32, CarPars>,
    ) -> Result<RaceSession, ConfigurationError> {
        race_pars.check()?;
        let timestep_size = FIXED_TIMESTEP;

        // create cars
        let mut seen_cars = HashSet::with_capacity(race_pars.participants.len());
        let mut seen_grid = HashSet::with_capacity(race_pars.participants.len());
        let mut cars_list: Vec<Car> = Vec::with_capacity(race_pars.participants.len());

        for &car_no in race_pars.participants.iter() {
            if !seen_cars.insert(car_no) {
                return Err(ConfigurationError::DuplicateCar(car_no));
            }
            let car_pars = car_pars_all
                .get(&car_no)
                .ok_or(ConfigurationError::MissingCar(car_no))?;
            if car_pars.car_no != car_no {
                return Err(ConfigurationError::InvalidCarSpec {
                    car_no,
                    reason: format!("parameter entry carries car number {}", car_pars.car_no),
                });
            }
            if !seen_grid.insert(car_pars.p_grid) {
                return Err(ConfigurationError::InvalidSessionPars(format!(
                    "grid position {} is used more than once",
                    car_pars.p_grid
                )));
            }
            let spec = CarSpec::new(car_pars)?;

            let is_human = race_pars.human_car == Some(car_no);
            let driver = match driver_pars_all.get(&car_pars.driver_initials) {
                Some(driver_pars) if is_human => DriverProfile {
                    name: driver_pars.name.to_owned(),
                    ..DriverProfile::human(&driver_pars.initials)
                },
                Some(driver_pars) => DriverProfile::new(driver_pars)?,
                None if is_human => DriverProfile::human(&car_pars.driver_initials),
                None => {
                    return Err(ConfigurationError::MissingDriver {
                        car_no,
                        initials: car_pars.driver_initials.to_owned(),
                    })
                }
            };
            let controller = if is_human {
                Controller::Human { pending: None }
            } else {
                Controller::Ai(Box::new(AiDriver::new(&driver, timestep_size)))
            };

            // place the car on its grid slot
            let (s_grid, lateral_grid) = track.grid_slot(car_pars.p_grid);
            let state = VehicleState::new(
                track.point_at(s_grid, lateral_grid),
                track.heading_at(s_grid),
                &spec,
            );
            let mut sh = StateHandler::new(track.length, track.s12, track.s23, s_grid);
            if let Some(pit) = track.pit_lane() {
                sh.set_pit_zone(pit.entry_s, pit.exit_s);
            }

            let mut car = Car::new(Arc::new(spec), Arc::new(driver), state, controller, sh);
            car.location = track.locate(car.state.position, None).ok();
            cars_list.push(car);
        }

        // sort cars list by car number, all cross-car references use this order
        cars_list.sort_unstable_by_key(|car| car.car_no);

        let timings: Vec<CarTiming> = cars_list
            .iter()
            .map(|car| {
                let mut timing = CarTiming::new(car.car_no, &car.driver.initials);
                timing.progress = car.sh.get_race_prog();
                timing
            })
            .collect();
        let mut race_state = RaceState::new(timings);
        race_state.update_order(race_pars.blue_flag_lap_gap);

        let light_ticks = (race_pars.light_interval / timestep_size).round().max(1.0) as u64;

        info!(
            "Session created: {} cars, {} laps on {} ({:.1}m), seed {}",
            cars_list.len(),
            race_pars.tot_no_laps,
            track.name,
            track.length,
            race_pars.seed
        );

        Ok(RaceSession {
            timestep_size,
            tot_no_laps: race_pars.tot_no_laps,
            finish_mode: race_pars.finish_mode,
            weather: WeatherSystem::new(race_pars.weather, race_pars.weather_change_interval),
            blue_flag_lap_gap: race_pars.blue_flag_lap_gap,
            restitution: race_pars.restitution,
            collision_friction: race_pars.collision_friction,
            heavy_impact_dv: race_pars.heavy_impact_dv,
            max_race_time: race_pars.max_race_time,
            countdown_lights: race_pars.countdown_lights,
            light_ticks,
            countdown_tick: 0,
            telemetry_interval: race_pars.telemetry_interval,
            leader_finished: false,
            track,
            cars_list,
            race_state,
            rng: ChaCha8Rng::seed_from_u64(race_pars.seed),
            telemetry: TelemetryBuffer::new(),
            events: Vec::new(),
        })
    }

    // ---------------------------------------------------------------------------------------------
    // MAIN METHOD ---------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// simulate_timestep advances the session by one fixed timestep. Paused and finished
    /// sessions are not advanced.
    pub fn simulate_timestep(&mut self) {
        if self.race_state.paused {
            return;
        }
        match self.race_state.phase {
            SessionPhase::Countdown => {
                self.race_state.tick += 1;
                self.handle_countdown();
            }
            SessionPhase::Racing => {
                self.race_state.tick += 1;
                self.race_state.race_time += self.timestep_size;

                self.update_weather();
                let controls = self.gather_controls();
                self.step_vehicles(&controls);
                self.handle_wall_collisions();
                self.handle_car_collisions();
                self.update_track_progress();
                self.handle_lap_transitions();
                self.handle_pit_stops();
                self.check_dnf_conditions();
                self.update_order();
                self.record_telemetry();
                self.check_race_end();
            }
            SessionPhase::Finished => {}
        }
    }

    // ---------------------------------------------------------------------------------------------
    // SESSION CONTROL -----------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    pub fn pause(&mut self) {
        if self.race_state.phase != SessionPhase::Finished && !self.race_state.paused {
            info!("Session paused at tick {}", self.race_state.tick);
            self.race_state.paused = true;
        }
    }

    pub fn resume(&mut self) {
        if self.race_state.paused {
            info!("Session resumed at tick {}", self.race_state.tick);
            self.race_state.paused = false;
        }
    }

    /// abort retires every running car with the reason "session aborted" and finishes the
    /// session. Cars that already finished keep their result.
    pub fn abort(&mut self) {
        if self.race_state.phase == SessionPhase::Finished {
            return;
        }
        warn!("Session aborted at tick {}", self.race_state.tick);
        for idx in 0..self.cars_list.len() {
            if self.cars_list[idx].is_running() {
                self.retire_car(idx, DnfReason::SessionAbort);
            }
        }
        self.race_state.aborted = true;
        self.race_state.paused = false;
        self.finish_session();
    }

    /// request_pit sends an AI car into the pits. Returns false if the track has no pit lane,
    /// the car is unknown, not running, human controlled, or already pitting.
    pub fn request_pit(&mut self, car_no: u32) -> bool {
        if self.track.pit_lane().is_none() || self.race_state.phase != SessionPhase::Racing {
            return false;
        }
        let idx = match self.car_idx(car_no) {
            Some(idx) => idx,
            None => return false,
        };
        let car = &mut self.cars_list[idx];
        if !car.is_running() {
            return false;
        }
        let accepted = car.ai_mut().map_or(false, |ai| ai.request_pit());
        if accepted {
            info!("Car {} called into the pits", car_no);
        }
        accepted
    }

    /// set_human_controls stores the controls for the next tick of a human controlled car.
    pub fn set_human_controls(&mut self, car_no: u32, controls: Controls) -> bool {
        let idx = match self.car_idx(car_no) {
            Some(idx) => idx,
            None => return false,
        };
        match &mut self.cars_list[idx].controller {
            Controller::Human { pending } => {
                *pending = Some(controls.clamped());
                true
            }
            Controller::Ai(_) => false,
        }
    }

    // ---------------------------------------------------------------------------------------------
    // RACE SIMULATOR PARTS ------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// handle_countdown switches the lights on one per interval and starts the race one interval
    /// after the last light. The cars are held on the grid in the meantime.
    fn handle_countdown(&mut self) {
        self.countdown_tick += 1;
        let lights = (self.countdown_tick / self.light_ticks).min(self.countdown_lights as u64) as u8;
        if lights > self.race_state.lights_on {
            debug!("Start light {} on", lights);
        }
        self.race_state.lights_on = lights;

        if self.countdown_tick >= (self.countdown_lights as u64 + 1) * self.light_ticks {
            self.race_state.lights_on = 0;
            self.race_state.phase = SessionPhase::Racing;
            info!("Lights out after {} ticks", self.race_state.tick);
            self.push_event(RaceEventKind::LightsOut, Vec::new(), String::new());
        }
    }

    /// gather_controls returns the controls of all cars in car number order. Drivers see the
    /// other cars as they were at the end of the previous tick.
    fn gather_controls(&mut self) -> Vec<Controls> {
        let track = Arc::clone(&self.track);
        let views: Vec<Option<NearbyCar>> = self
            .cars_list
            .iter()
            .map(|car| match (&car.location, car.status) {
                (_, CarStatus::Dnf) | (None, _) => None,
                (Some(loc), _) => Some(NearbyCar {
                    car_no: car.car_no,
                    gap: loc.s,
                    lateral_offset: loc.lateral_offset,
                    speed: car.state.longitudinal_speed(),
                }),
            })
            .collect();
        let wet = self.weather.is_wet();

        let mut controls_all = Vec::with_capacity(self.cars_list.len());
        for (idx, car) in self.cars_list.iter_mut().enumerate() {
            if car.status == CarStatus::Dnf {
                controls_all.push(Controls::neutral());
                continue;
            }
            if car.sh.pit_standstill_act {
                controls_all.push(Controls {
                    throttle: 0.0,
                    brake: 1.0,
                    steering: 0.0,
                    shift: ShiftIntent::None,
                });
                continue;
            }

            // the gap field of the views still holds the s coordinate
            let nearby: Vec<NearbyCar> = match views[idx] {
                Some(own) => views
                    .iter()
                    .enumerate()
                    .filter(|(other_idx, _)| *other_idx != idx)
                    .filter_map(|(_, view)| *view)
                    .map(|other| NearbyCar {
                        gap: wrap_distance(other.gap - own.gap, track.length),
                        ..other
                    })
                    .filter(|other| other.gap.abs() <= NEARBY_RANGE)
                    .collect(),
                None => Vec::new(),
            };

            let env = DriveEnv {
                dt: self.timestep_size,
                wet,
                car_no: car.car_no,
            };
            let controls = match &mut car.controller {
                Controller::Ai(ai) => ai.decide(
                    &car.state,
                    &car.driver,
                    &car.spec,
                    Some(track.as_ref()),
                    &nearby,
                    &env,
                    &mut self.rng,
                ),
                Controller::Human { pending } => pending.take().unwrap_or(car.last_controls),
            };
            controls_all.push(controls);
        }

        controls_all
    }

    fn step_vehicles(&mut self, controls: &[Controls]) {
        let weather_grip = self.weather.grip_multiplier();
        let mut failures = Vec::new();

        for (idx, car) in self.cars_list.iter_mut().enumerate() {
            if car.status == CarStatus::Dnf {
                continue;
            }
            let surface = match &car.location {
                Some(loc) => self.track.surface_at(loc),
                None => self.track.runoff_surface,
            };
            let ctx = TrackContext::new(surface, weather_grip);
            car.last_controls = controls[idx];

            if let Err(failure) = car.dynamics.step(&mut car.state, &controls[idx], &ctx, self.timestep_size) {
                failures.push((idx, failure));
            }
        }

        for (idx, failure) in failures {
            self.retire_car(idx, failure.into());
        }
    }

    /// handle_wall_collisions pushes cars that went through the barrier back and removes the
    /// velocity component pointing into the wall.
    fn handle_wall_collisions(&mut self) {
        let mut impacts = Vec::new();

        for (idx, car) in self.cars_list.iter_mut().enumerate() {
            if car.status == CarStatus::Dnf {
                continue;
            }
            let hint = car.location.map(|loc| loc.segment);
            let loc = match self.track.locate(car.state.position, hint) {
                Ok(loc) => loc,
                Err(_) => continue,
            };
            if let Some((normal, depth)) = self.track.wall_contact(&loc) {
                let response = resolve_wall_contact(
                    car.state.velocity,
                    normal,
                    depth,
                    self.restitution,
                    self.collision_friction,
                );
                let d_yaw_rate = -0.5 * car.state.yaw_rate;
                car.state.position += response.dp_a;
                car.dynamics.apply_impulse(&mut car.state, response.dv_a, d_yaw_rate);
                debug!(
                    "Car {} hit the wall at {:.1}m/s (s = {:.1}m)",
                    car.car_no, response.impact_speed, loc.s
                );
                impacts.push((idx, response.dv_a));

                // a slow car nosed into the barrier cannot steer away from it, turn it along the
                // track so it can drive off
                let fwd = car.state.forward();
                if car.state.speed() < WALL_PIVOT_SPEED && fwd.dot(normal) > 0.0 {
                    let track_dir = DVec2::from_angle(loc.heading);
                    let angle = fwd.perp_dot(track_dir).atan2(fwd.dot(track_dir));
                    let pivot = DQuat::from_rotation_z(WALL_PIVOT_SHARE * angle);
                    car.state.orientation = (pivot * car.state.orientation).normalize();
                }
            }
        }

        self.handle_impacts(impacts);
    }

    /// handle_car_collisions resolves all car-car contacts pairwise in ascending car number
    /// order.
    fn handle_car_collisions(&mut self) {
        let (restitution, friction) = (self.restitution, self.collision_friction);
        let no_cars = self.cars_list.len();
        let mut impacts = Vec::new();

        for i in 0..no_cars {
            for j in (i + 1)..no_cars {
                let (left, right) = self.cars_list.split_at_mut(j);
                let (car_a, car_b) = (&mut left[i], &mut right[0]);
                if car_a.status == CarStatus::Dnf || car_b.status == CarStatus::Dnf {
                    continue;
                }

                let body_a = collision_body(car_a);
                let body_b = collision_body(car_b);
                let contact = match contact_circle_circle(&body_a, &body_b) {
                    Some(contact) => contact,
                    None => continue,
                };
                let response = resolve_contact(&body_a, &body_b, &contact, restitution, friction);

                car_a.state.position += response.dp_a;
                car_b.state.position += response.dp_b;
                car_a.dynamics.apply_impulse(&mut car_a.state, response.dv_a, 0.0);
                car_b.dynamics.apply_impulse(&mut car_b.state, response.dv_b, 0.0);

                if response.impact_speed > 0.0 {
                    debug!(
                        "Contact between cars {} and {} at {:.1}m/s",
                        car_a.car_no, car_b.car_no, response.impact_speed
                    );
                }
                impacts.push((i, response.dv_a));
                impacts.push((j, response.dv_b));
            }
        }

        self.handle_impacts(impacts);
    }

    /// handle_impacts evaluates the largest velocity change of every car in this tick: contacts
    /// beyond the heavy impact threshold retire the car, lighter ones damage the parts in the hit
    /// zone.
    fn handle_impacts(&mut self, impacts: Vec<(usize, DVec2)>) {
        let mut dv_max: Vec<DVec2> = vec![DVec2::ZERO; self.cars_list.len()];
        for (idx, dv) in impacts {
            if dv.length_squared() > dv_max[idx].length_squared() {
                dv_max[idx] = dv;
            }
        }
        for (idx, dv) in dv_max.into_iter().enumerate() {
            if self.cars_list[idx].status == CarStatus::Dnf {
                continue;
            }
            let delta_v = dv.length();
            if delta_v >= self.heavy_impact_dv {
                self.retire_car(idx, MechanicalFailure::HeavyImpact { delta_v }.into());
                continue;
            }
            let car = &mut self.cars_list[idx];
            let zone = ImpactZone::from_impulse(car.state.forward(), dv);
            if car.state.damage.apply_impact(zone, delta_v / self.heavy_impact_dv) {
                info!(
                    "Car {} damaged ({:?} impact at {:.1}m/s): {:?}",
                    car.car_no, zone, delta_v, car.state.damage
                );
                let car_no = car.car_no;
                let detail = format!("{:?}", zone).to_lowercase();
                self.push_event(RaceEventKind::Damage, vec![car_no], detail);
            }
        }
    }

    /// update_track_progress locates the cars on the path and feeds the state handlers of the
    /// running cars.
    fn update_track_progress(&mut self) {
        for (idx, car) in self.cars_list.iter_mut().enumerate() {
            if car.status == CarStatus::Dnf {
                continue;
            }
            let hint = car.location.map(|loc| loc.segment);
            match self.track.locate(car.state.position, hint) {
                Ok(loc) => {
                    car.location = Some(loc);
                    if car.is_running() {
                        car.sh.update_s_track(loc.s);
                        self.race_state.timings[idx].progress = car.sh.get_race_prog();
                    }
                }
                Err(warning) => {
                    debug!("Car {}: {}", car.car_no, warning);
                    car.location = None;
                }
            }
        }
    }

    /// handle_lap_transitions records sector and lap times with the crossing time interpolated
    /// within the timestep, rolls the per-lap reliability and handles the chequered flag.
    fn handle_lap_transitions(&mut self) {
        let t_step_start = self.race_state.race_time - self.timestep_size;

        for idx in 0..self.cars_list.len() {
            if !self.cars_list[idx].is_running() {
                continue;
            }

            let car = &self.cars_list[idx];
            if let Some(sector) = car.sh.get_sector_passed() {
                let s_boundary = if sector == 1 { self.track.s12 } else { self.track.s23 };
                let t_cross = t_step_start + car.sh.get_crossing_frac(s_boundary) * self.timestep_size;
                self.race_state.timings[idx].record_sector(sector, t_cross);
            }
            if !car.sh.get_new_lap() {
                continue;
            }

            let t_cross = t_step_start + car.sh.get_crossing_frac(0.0) * self.timestep_size;
            let timing = &mut self.race_state.timings[idx];
            let laptime = timing.record_lap(t_cross);
            let laps = timing.laps;
            debug!("Car {} completed lap {} in {:.3}s", timing.car_no, laps, laptime);

            // chequered flag
            if laps >= self.tot_no_laps
                || (self.leader_finished && self.finish_mode == FinishMode::AllCarsTakeFlag)
            {
                timing.finish_time = Some(t_cross);
                let car_no = timing.car_no;
                if !self.leader_finished {
                    info!("Car {} wins after {:.3}s", car_no, t_cross);
                }
                self.leader_finished = true;
                self.cars_list[idx].status = CarStatus::Finished;
                self.push_event(RaceEventKind::Finish, vec![car_no], format!("{:.3}s", t_cross));
                continue;
            }

            if let Some(failure) = self.cars_list[idx].drive_lap(&mut self.rng) {
                self.retire_car(idx, failure.into());
                continue;
            }

            // pit strategy of the AI cars
            let car = &self.cars_list[idx];
            let pit_stops = self.race_state.timings[idx].pit_stops;
            let wants_pit = car.ai().map_or(false, |ai| ai.state() != AiState::Pitting)
                && car.spec.pars.strategy.should_pit(
                    laps,
                    pit_stops,
                    self.tot_no_laps.saturating_sub(laps),
                    &car.state.tires,
                );
            if wants_pit {
                let car_no = car.car_no;
                debug!("Car {} follows its pit strategy after lap {}", car_no, laps);
                self.request_pit(car_no);
            }
        }
    }

    /// handle_pit_stops runs the pit state machine of the running cars: entering the pit lane,
    /// stopping in the box, the standstill and leaving the pit lane.
    fn handle_pit_stops(&mut self) {
        let pit = match self.track.pit_lane() {
            Some(pit) => pit.to_owned(),
            None => return,
        };

        for idx in 0..self.cars_list.len() {
            let car = &mut self.cars_list[idx];
            if !car.is_running() {
                continue;
            }
            let (pitting, stop_done) = match car.ai() {
                Some(ai) => (ai.state() == AiState::Pitting, ai.pit_stop_done()),
                None => (false, false),
            };

            if car.sh.check_state_transition(pitting && !stop_done) {
                if car.sh.get_state() == State::Pitlane {
                    info!("Car {} entered the pit lane", car.car_no);
                } else {
                    info!("Car {} left the pit lane", car.car_no);
                    if let Some(ai) = car.ai_mut() {
                        ai.finish_pit();
                    }
                }
            }

            match car.sh.get_state() {
                State::Pitlane if pitting && !stop_done => {
                    let s_cur = car.sh.get_s_track();
                    let at_box = car.state.speed() < BOX_STOP_SPEED
                        && self.track.forward_distance(s_cur, pit.box_s) < BOX_STOP_DIST;
                    if (at_box || car.sh.get_s_track_passed_this_step(pit.box_s))
                        && car.sh.act_pit_standstill(car.spec.pars.t_pit_standstill)
                    {
                        car.state.velocity = DVec2::ZERO;
                        car.state.yaw_rate = 0.0;
                        let car_no = car.car_no;
                        info!("Car {} stopped in its pit box", car_no);
                        self.race_state.timings[idx].pit_stops += 1;
                        self.push_event(RaceEventKind::PitStop, vec![car_no], String::new());
                    }
                }
                State::PitStandstill => {
                    car.state.velocity = DVec2::ZERO;
                    car.state.yaw_rate = 0.0;
                    if car.sh.increment_t_standstill(self.timestep_size) {
                        let stint = self.race_state.timings[idx].pit_stops;
                        let compound = car.spec.pars.strategy.compound_for_stint(stint);
                        car.state.tire_temps = [car.spec.pars.tire.t_blanket; 4];
                        car.state.tires = TireWear::fresh(compound);
                        car.state.damage.repair_wings();
                        debug!("Car {} fitted {:?} tires", car.car_no, compound);
                        car.sh.deact_pit_standstill();
                        if let Some(ai) = car.ai_mut() {
                            ai.complete_pit_stop();
                        }
                        info!("Car {} released from its pit box", car.car_no);
                    }
                }
                _ => {}
            }
        }
    }

    /// update_weather advances the track wetness and the dynamic weather.
    fn update_weather(&mut self) {
        if let Some(condition) = self.weather.update(self.timestep_size, &mut self.rng) {
            self.push_event(RaceEventKind::WeatherChange, Vec::new(), format!("{:?}", condition));
        }
    }

    /// check_dnf_conditions retires cars that spin for too long or do not move anymore.
    fn check_dnf_conditions(&mut self) {
        let instability_ticks = (INSTABILITY_TIME / self.timestep_size).round() as u32;
        let stuck_ticks = (STUCK_TIME / self.timestep_size).round() as u32;
        let mut failures = Vec::new();

        for (idx, car) in self.cars_list.iter_mut().enumerate() {
            if !car.is_running() {
                continue;
            }

            if car.state.yaw_rate.abs() > INSTABILITY_YAW_RATE {
                car.instability_ticks += 1;
            } else {
                car.instability_ticks = 0;
            }
            if car.state.speed() < STUCK_SPEED && !car.sh.pit_standstill_act {
                car.stuck_ticks += 1;
            } else {
                car.stuck_ticks = 0;
            }

            if car.instability_ticks >= instability_ticks {
                failures.push((idx, MechanicalFailure::PersistentInstability));
            } else if car.stuck_ticks >= stuck_ticks {
                failures.push((idx, MechanicalFailure::Stuck));
            }
        }

        for (idx, failure) in failures {
            self.retire_car(idx, failure.into());
        }
    }

    /// update_order recomputes the field order and logs blue flags that were newly shown.
    fn update_order(&mut self) {
        let flags_prev: Vec<bool> = self.race_state.timings.iter().map(|t| t.blue_flag).collect();
        self.race_state.update_order(self.blue_flag_lap_gap);

        let new_flags: Vec<u32> = self
            .race_state
            .timings
            .iter()
            .zip(flags_prev.iter())
            .filter(|(timing, &prev)| timing.blue_flag && !prev)
            .map(|(timing, _)| timing.car_no)
            .collect();
        for car_no in new_flags {
            debug!("Blue flag for car {}", car_no);
            self.push_event(RaceEventKind::BlueFlag, vec![car_no], String::new());
        }
    }

    fn record_telemetry(&mut self) {
        if self.telemetry_interval == 0 || self.race_state.tick % self.telemetry_interval != 0 {
            return;
        }
        let tick = self.race_state.tick;

        for (idx, car) in self.cars_list.iter().enumerate() {
            if car.status == CarStatus::Dnf {
                continue;
            }
            let (s_track, surface) = match &car.location {
                Some(loc) => (loc.s, self.track.surface_at(loc)),
                None => (car.sh.get_s_track(), SurfaceType::default()),
            };
            let snapshot = StateSnapshot::new(
                &car.state,
                &car.last_controls,
                s_track,
                self.race_state.timings[idx].laps,
                surface,
            );
            self.telemetry.record_sample(car.car_no, tick, &snapshot);
        }
    }

    fn check_race_end(&mut self) {
        let any_running = self.cars_list.iter().any(|car| car.is_running());

        let finished = match self.finish_mode {
            FinishMode::LeaderFinish => self.leader_finished || !any_running,
            FinishMode::AllCarsTakeFlag => !any_running,
        };
        if finished {
            self.finish_session();
        } else if self.race_state.race_time >= self.max_race_time {
            warn!("Maximum race time of {:.0}s reached", self.max_race_time);
            self.abort();
        }
    }

    // ---------------------------------------------------------------------------------------------
    // METHODS (HELPERS) ---------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    fn finish_session(&mut self) {
        if self.race_state.phase == SessionPhase::Finished {
            return;
        }
        self.race_state.update_order(self.blue_flag_lap_gap);
        self.race_state.phase = SessionPhase::Finished;
        info!(
            "Session finished after {:.3}s race time ({} ticks)",
            self.race_state.race_time, self.race_state.tick
        );
    }

    /// retire_car converts a failure into a DNF. The car keeps its laps and is frozen where it
    /// is, the session continues with the remaining cars.
    fn retire_car(&mut self, idx: usize, reason: DnfReason) {
        let car = &mut self.cars_list[idx];
        if car.status == CarStatus::Dnf {
            return;
        }
        warn!("Car {} retired: {}", car.car_no, reason);
        car.retire(reason.to_owned());
        let car_no = car.car_no;

        let retirement = Retirement {
            tick: self.race_state.tick,
            race_time: self.race_state.race_time,
            reason: reason.to_owned(),
        };
        self.race_state.timings[idx].retirement = Some(retirement);
        self.race_state.dnf_list.push(car_no);
        self.push_event(RaceEventKind::Dnf, vec![car_no], reason.to_string());
    }

    fn push_event(&mut self, kind: RaceEventKind, cars: Vec<u32>, detail: String) {
        self.events.push(RaceEvent {
            kind,
            lap: self.race_state.leader_laps + 1,
            time_s: self.race_state.race_time,
            tick: self.race_state.tick,
            cars,
            detail,
        });
    }

    fn car_idx(&self, car_no: u32) -> Option<usize> {
        self.cars_list
            .binary_search_by_key(&car_no, |car| car.car_no)
            .ok()
    }

    pub fn cars(&self) -> &[Car] {
        &self.cars_list
    }

    pub fn car(&self, car_no: u32) -> Option<&Car> {
        self.car_idx(car_no).map(|idx| &self.cars_list[idx])
    }

    pub fn race_state(&self) -> &RaceState {
        &self.race_state
    }

    pub fn track(&self) -> &TrackPath {
        &self.track
    }

    pub fn weather(&self) -> Weather {
        self.weather.condition()
    }

    /// wetness returns the track wetness between 0 (dry) and 1 (flooded).
    pub fn wetness(&self) -> f64 {
        self.weather.wetness()
    }

    pub fn events(&self) -> &[RaceEvent] {
        &self.events
    }

    pub fn is_finished(&self) -> bool {
        self.race_state.phase == SessionPhase::Finished
    }

    /// flush_telemetry hands the buffered telemetry samples to the sink.
    pub fn flush_telemetry(&mut self, sink: &mut dyn TelemetrySink) -> anyhow::Result<usize> {
        self.telemetry.flush_into(sink)
    }

    pub fn get_race_result(&self) -> RaceResult {
        let no_cars = self.cars_list.len();
        let mut laptimes = vec![vec![0.0; self.tot_no_laps as usize + 1]; no_cars];
        let mut racetimes = vec![vec![0.0; self.tot_no_laps as usize + 1]; no_cars];

        for (i, timing) in self.race_state.timings.iter().enumerate() {
            for (lap, (laptime, racetime)) in timing
                .lap_times
                .iter()
                .zip(timing.race_times.iter())
                .enumerate()
                .take(self.tot_no_laps as usize)
            {
                laptimes[i][lap + 1] = *laptime;
                racetimes[i][lap + 1] = *racetime;
            }
        }

        RaceResult {
            tot_no_laps: self.tot_no_laps,
            car_driver_pairs: self
                .cars_list
                .iter()
                .map(|car| CarDriverPair {
                    car_no: car.car_no,
                    driver_initials: car.driver.initials.to_owned(),
                })
                .collect(),
            laptimes,
            racetimes,
            classification: classify(&self.race_state.timings),
            events: self.events.to_owned(),
            aborted: self.race_state.aborted,
        }
    }
}

fn collision_body(car: &Car) -> CollisionBody {
    CollisionBody {
        position: car.state.position,
        velocity: car.state.velocity,
        mass: car.spec.mass(),
        radius: car.spec.pars.collision_radius,
    }
}
