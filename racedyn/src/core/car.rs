use crate::core::aero::{AeroSpec, AerodynamicsModel};
use crate::core::ai_driver::AiDriver;
use crate::core::driver::DriverProfile;
use crate::core::engine::{EngineSpec, EngineTransmission};
use crate::core::error::{ConfigurationError, DnfReason, MechanicalFailure};
use crate::core::state_handler::StateHandler;
use crate::core::strategy::StrategyPars;
use crate::core::tire::TireSpec;
use crate::core::track::TrackLocation;
use crate::core::vehicle::{Controls, VehicleDynamics, VehicleState};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;

const FAILING_COMPONENTS: [&str; 4] = ["engine", "gearbox", "hydraulics", "suspension"];

/// * `car_no` - Car number, also used as car ID
/// * `name` - Team/car name
/// * `color` - Hex color for consumers that draw the car
/// * `driver_initials` - Driver of the car
/// * `p_grid` - Grid position
/// * `mass` - (kg) Mass including driver
/// * `inertia` - (kg*m^2) Yaw moment of inertia
/// * `wheelbase` - (m) Distance between the axles
/// * `cg_to_front` - (m) Distance between center of gravity and front axle
/// * `track_width` - (m) Distance between left and right wheels
/// * `wheel_radius` - (m) Dynamic tire radius
/// * `collision_radius` - (m) Radius of the collision circle
/// * `brake_force_max` - (N) Total brake force at full pedal
/// * `brake_bias` - () Share of the brake force on the front axle
/// * `max_steer_angle` - (rad) Front wheel angle at full steering input
/// * `reliability` - () Probability to complete a lap without mechanical failure
/// * `t_pit_standstill` - (s) Standstill time of a pit stop
/// * `strategy` - Pit strategy and tire compounds (AI cars)
#[derive(Debug, Deserialize, Clone)]
pub struct CarPars {
    pub car_no: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
    pub driver_initials: String,
    pub p_grid: u32,
    pub mass: f64,
    pub inertia: f64,
    pub wheelbase: f64,
    pub cg_to_front: f64,
    pub track_width: f64,
    pub wheel_radius: f64,
    #[serde(default = "default_collision_radius")]
    pub collision_radius: f64,
    pub brake_force_max: f64,
    #[serde(default = "default_brake_bias")]
    pub brake_bias: f64,
    pub max_steer_angle: f64,
    #[serde(default = "default_reliability")]
    pub reliability: f64,
    #[serde(default = "default_t_pit_standstill")]
    pub t_pit_standstill: f64,
    #[serde(default)]
    pub strategy: StrategyPars,
    pub engine: EngineSpec,
    pub aero: AeroSpec,
    pub tire: TireSpec,
}

fn default_color() -> String {
    "#808080".to_owned()
}

fn default_collision_radius() -> f64 {
    1.2
}

fn default_brake_bias() -> f64 {
    0.6
}

fn default_reliability() -> f64 {
    1.0
}

fn default_t_pit_standstill() -> f64 {
    2.5
}

/// Validated, immutable car model.
#[derive(Debug, Clone)]
pub struct CarSpec {
    pub pars: CarPars,
    /// (m) Distance between center of gravity and rear axle
    pub cg_to_rear: f64,
    /// (m/s) Speed at which the maximum wheel power equals the aerodynamic drag
    pub v_drag_limit: f64,
}

impl CarSpec {
    pub fn new(pars: &CarPars) -> Result<CarSpec, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidCarSpec {
            car_no: pars.car_no,
            reason: reason.to_owned(),
        };

        for (value, label) in [
            (pars.mass, "mass"),
            (pars.inertia, "inertia"),
            (pars.wheelbase, "wheelbase"),
            (pars.track_width, "track width"),
            (pars.wheel_radius, "wheel radius"),
            (pars.collision_radius, "collision radius"),
            (pars.brake_force_max, "brake force"),
            (pars.max_steer_angle, "max steer angle"),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(invalid(&format!("{} must be positive", label)));
            }
        }
        if !(pars.cg_to_front > 0.0 && pars.cg_to_front < pars.wheelbase) {
            return Err(invalid("center of gravity must lie between the axles"));
        }
        if !(0.0..=1.0).contains(&pars.brake_bias) {
            return Err(invalid("brake bias must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&pars.reliability) {
            return Err(invalid("reliability must be in [0, 1]"));
        }
        if !(pars.t_pit_standstill >= 0.0) {
            return Err(invalid("pit standstill time must not be negative"));
        }
        if pars.p_grid == 0 {
            return Err(invalid("grid positions start at 1"));
        }
        pars.strategy.check().map_err(|reason| invalid(&reason))?;
        pars.engine.check().map_err(|reason| invalid(&reason))?;
        if !(pars.aero.c_drag > 0.0 && pars.aero.frontal_area > 0.0 && pars.aero.air_density > 0.0)
        {
            return Err(invalid("drag coefficient, frontal area and air density must be positive"));
        }
        if !(pars.aero.c_lift >= 0.0) {
            return Err(invalid("downforce coefficient must not be negative"));
        }
        let tire = &pars.tire;
        if !(tire.mu_peak > 0.0
            && tire.peak_slip_angle > 0.0
            && tire.peak_slip_ratio > 0.0
            && tire.t_window > 0.0
            && tire.rear_grip_bias > 0.0
            && (0.0..=1.0).contains(&tire.slide_ratio)
            && (0.0..=1.0).contains(&tire.min_temp_grip)
            && tire.heat_rate >= 0.0
            && tire.cool_rate >= 0.0)
        {
            return Err(invalid("tire parameters out of range"));
        }

        let engine = EngineTransmission::new(&pars.engine);
        let aero = AerodynamicsModel::new(&pars.aero);
        let p_wheel_max = engine.max_power() * pars.engine.drivetrain_efficiency;

        Ok(CarSpec {
            pars: pars.to_owned(),
            cg_to_rear: pars.wheelbase - pars.cg_to_front,
            v_drag_limit: (p_wheel_max / aero.k_drag()).cbrt(),
        })
    }

    pub fn car_no(&self) -> u32 {
        self.pars.car_no
    }

    pub fn mass(&self) -> f64 {
        self.pars.mass
    }

    /// max_speed_bound returns the speed (m/s) the car cannot exceed under its own power: the
    /// equilibrium of maximum wheel power and quadratic drag.
    pub fn max_speed_bound(&self) -> f64 {
        self.v_drag_limit
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum CarStatus {
    Running,
    Finished,
    Dnf,
}

/// Who produces the controls of a car.
#[derive(Debug, Clone)]
pub enum Controller {
    Ai(Box<AiDriver>),
    Human { pending: Option<Controls> },
}

/// Car slot of the session arena. Owns the vehicle state of exactly one car.
#[derive(Debug)]
pub struct Car {
    pub car_no: u32,
    pub color: String,
    pub p_grid: u32,
    pub spec: Arc<CarSpec>,
    pub driver: Arc<DriverProfile>,
    pub dynamics: VehicleDynamics,
    pub state: VehicleState,
    pub controller: Controller,
    pub sh: StateHandler,
    pub status: CarStatus,
    pub last_controls: Controls,
    pub location: Option<TrackLocation>,
    pub instability_ticks: u32,
    pub stuck_ticks: u32,
}

impl Car {
    pub fn new(
        spec: Arc<CarSpec>,
        driver: Arc<DriverProfile>,
        state: VehicleState,
        controller: Controller,
        sh: StateHandler,
    ) -> Car {
        Car {
            car_no: spec.pars.car_no,
            color: spec.pars.color.to_owned(),
            p_grid: spec.pars.p_grid,
            dynamics: VehicleDynamics::new(&spec),
            spec,
            driver,
            state,
            controller,
            sh,
            status: CarStatus::Running,
            last_controls: Controls::neutral(),
            location: None,
            instability_ticks: 0,
            stuck_ticks: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == CarStatus::Running
    }

    pub fn is_ai(&self) -> bool {
        matches!(self.controller, Controller::Ai(_))
    }

    pub fn ai(&self) -> Option<&AiDriver> {
        match &self.controller {
            Controller::Ai(ai) => Some(ai),
            Controller::Human { .. } => None,
        }
    }

    pub fn ai_mut(&mut self) -> Option<&mut AiDriver> {
        match &mut self.controller {
            Controller::Ai(ai) => Some(ai),
            Controller::Human { .. } => None,
        }
    }

    /// retire freezes the car and stores the reason in its vehicle state.
    pub fn retire(&mut self, reason: DnfReason) {
        self.status = CarStatus::Dnf;
        self.state.dnf = Some(reason);
    }

    /// drive_lap rolls the per-lap reliability of the car. Cars with a reliability of 1.0 do not
    /// consume random numbers.
    pub fn drive_lap<R: Rng>(&self, rng: &mut R) -> Option<MechanicalFailure> {
        let reliability = self.spec.pars.reliability;
        if reliability >= 1.0 {
            return None;
        }
        if rng.gen::<f64>() > reliability {
            let component = FAILING_COMPONENTS[rng.gen_range(0..FAILING_COMPONENTS.len())];
            Some(MechanicalFailure::Component(component.to_owned()))
        } else {
            None
        }
    }
}

#[cfg(test)]
pub(crate) fn test_car_pars(car_no: u32, p_grid: u32) -> CarPars {
    use crate::core::engine::test_engine_spec;
    use crate::core::tire::test_tire_spec;

    CarPars {
        car_no,
        name: format!("Test {}", car_no),
        color: default_color(),
        driver_initials: format!("D{}", car_no),
        p_grid,
        mass: 720.0,
        inertia: 1000.0,
        wheelbase: 3.2,
        cg_to_front: 1.75,
        track_width: 1.6,
        wheel_radius: 0.33,
        collision_radius: 1.2,
        brake_force_max: 20000.0,
        brake_bias: 0.6,
        max_steer_angle: 0.35,
        reliability: 1.0,
        t_pit_standstill: 2.5,
        strategy: StrategyPars::default(),
        engine: test_engine_spec(),
        aero: AeroSpec {
            air_density: 1.225,
            c_drag: 0.9,
            c_lift: 2.2,
            frontal_area: 1.4,
        },
        tire: test_tire_spec(),
    }
}
