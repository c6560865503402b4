use crate::core::aero::AerodynamicsModel;
use crate::core::car::CarSpec;
use crate::core::damage::CarDamage;
use crate::core::engine::{EngineTransmission, GearChange};
use crate::core::error::{DnfReason, MechanicalFailure};
use crate::core::tire::{TireModel, TireWear};
use crate::core::track::SurfaceType;
use glam::{DQuat, DVec2, DVec3};
use helpers::general::smoothstep;
use serde::Serialize;
use tracing::debug;

/// (s) Fixed simulation timestep.
pub const FIXED_TIMESTEP: f64 = 1.0 / 60.0;
/// (m/s^2) Gravitational acceleration.
pub const GRAVITY: f64 = 9.81;

/// Below this speed the car moves like a kinematic bicycle; above KINEMATIC_SPEED_HIGH the tire
/// model takes over completely.
const KINEMATIC_SPEED_LOW: f64 = 4.0;
const KINEMATIC_SPEED_HIGH: f64 = 8.0;

/// (m/s) Velocities below this are treated as standstill for resistive forces.
const STANDSTILL_SPEED: f64 = 0.05;

/// Wheel order used for all per-wheel arrays.
pub const WHEEL_NAMES: [&str; 4] = ["FL", "FR", "RL", "RR"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShiftIntent {
    None,
    Up,
    Down,
}

impl Default for ShiftIntent {
    fn default() -> Self {
        ShiftIntent::None
    }
}

/// Driver inputs of one tick.
/// * `throttle` - () in [0, 1]
/// * `brake` - () in [0, 1]
/// * `steering` - () in [-1, 1], positive steers left
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Controls {
    pub throttle: f64,
    pub brake: f64,
    pub steering: f64,
    pub shift: ShiftIntent,
}

impl Controls {
    pub fn neutral() -> Controls {
        Controls::default()
    }

    /// clamped returns the controls limited to their valid ranges, non-finite values are zeroed.
    pub fn clamped(&self) -> Controls {
        let fix = |v: f64, lo: f64, hi: f64| if v.is_finite() { v.clamp(lo, hi) } else { 0.0 };
        Controls {
            throttle: fix(self.throttle, 0.0, 1.0),
            brake: fix(self.brake, 0.0, 1.0),
            steering: fix(self.steering, -1.0, 1.0),
            shift: self.shift,
        }
    }
}

/// Environment of the car for one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackContext {
    pub surface: SurfaceType,
    pub weather_grip: f64,
}

impl TrackContext {
    pub fn new(surface: SurfaceType, weather_grip: f64) -> TrackContext {
        TrackContext {
            surface,
            weather_grip,
        }
    }
}

/// Physical state of one car. Owned exclusively by its car slot.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    pub position: DVec2,
    pub velocity: DVec2,
    pub orientation: DQuat,
    pub yaw_rate: f64,
    pub rpm: f64,
    pub gear: u8,
    pub shift_timer: f64,
    pub tire_temps: [f64; 4],
    pub wheel_slip: [f64; 4],
    pub tires: TireWear,
    pub damage: CarDamage,
    pub dnf: Option<DnfReason>,
}

impl VehicleState {
    pub fn new(position: DVec2, heading: f64, spec: &CarSpec) -> VehicleState {
        let t_tire = spec.pars.tire.t_blanket;
        VehicleState {
            position,
            velocity: DVec2::ZERO,
            orientation: DQuat::from_rotation_z(heading),
            yaw_rate: 0.0,
            rpm: spec.pars.engine.idle_rpm,
            gear: 1,
            shift_timer: 0.0,
            tire_temps: [t_tire; 4],
            wheel_slip: [0.0; 4],
            tires: TireWear::fresh(spec.pars.strategy.compound_for_stint(0)),
            damage: CarDamage::default(),
            dnf: None,
        }
    }

    /// forward returns the unit vector the car is pointing to.
    pub fn forward(&self) -> DVec2 {
        let f = self.orientation * DVec3::X;
        DVec2::new(f.x, f.y).normalize_or_zero()
    }

    /// heading returns the yaw angle (rad) in ]-pi, pi].
    pub fn heading(&self) -> f64 {
        let f = self.forward();
        f.y.atan2(f.x)
    }

    pub fn speed(&self) -> f64 {
        self.velocity.length()
    }

    /// longitudinal_speed returns the velocity component along the car axis.
    pub fn longitudinal_speed(&self) -> f64 {
        self.velocity.dot(self.forward())
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.orientation.is_finite()
            && self.yaw_rate.is_finite()
            && self.rpm.is_finite()
            && self.shift_timer.is_finite()
            && self.tire_temps.iter().all(|t| t.is_finite())
            && self.wheel_slip.iter().all(|s| s.is_finite())
            && self.tires.wear.is_finite()
    }

    pub fn is_retired(&self) -> bool {
        self.dnf.is_some()
    }
}

/// Integrates the state of one car with the tire, engine and aero models of its spec.
#[derive(Debug, Clone)]
pub struct VehicleDynamics {
    tire: TireModel,
    engine: EngineTransmission,
    aero: AerodynamicsModel,
    mass: f64,
    inertia: f64,
    wheelbase: f64,
    wheel_radius: f64,
    brake_force_max: f64,
    brake_bias: f64,
    max_steer_angle: f64,
    wheel_offsets: [DVec2; 4],
    load_share: [f64; 4],
}

impl VehicleDynamics {
    pub fn new(spec: &CarSpec) -> VehicleDynamics {
        let pars = &spec.pars;
        let half_track = 0.5 * pars.track_width;
        let front_share = 0.5 * spec.cg_to_rear / pars.wheelbase;
        let rear_share = 0.5 * pars.cg_to_front / pars.wheelbase;

        VehicleDynamics {
            tire: TireModel::new(&pars.tire),
            engine: EngineTransmission::new(&pars.engine),
            aero: AerodynamicsModel::new(&pars.aero),
            mass: pars.mass,
            inertia: pars.inertia,
            wheelbase: pars.wheelbase,
            wheel_radius: pars.wheel_radius,
            brake_force_max: pars.brake_force_max,
            brake_bias: pars.brake_bias,
            max_steer_angle: pars.max_steer_angle,
            wheel_offsets: [
                DVec2::new(pars.cg_to_front, half_track),
                DVec2::new(pars.cg_to_front, -half_track),
                DVec2::new(-spec.cg_to_rear, half_track),
                DVec2::new(-spec.cg_to_rear, -half_track),
            ],
            load_share: [front_share, front_share, rear_share, rear_share],
        }
    }

    pub fn tire(&self) -> &TireModel {
        &self.tire
    }

    pub fn engine(&self) -> &EngineTransmission {
        &self.engine
    }

    pub fn wheelbase(&self) -> f64 {
        self.wheelbase
    }

    pub fn max_steer_angle(&self) -> f64 {
        self.max_steer_angle
    }

    // ---------------------------------------------------------------------------------------------
    // MAIN METHOD ---------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// step advances the state by dt using semi-implicit Euler integration. If the incoming state or
    /// the result contains non-finite values the state is left untouched and an instability is
    /// reported. Retired cars are not moved.
    pub fn step(
        &self,
        state: &mut VehicleState,
        controls: &Controls,
        ctx: &TrackContext,
        dt: f64,
    ) -> Result<(), MechanicalFailure> {
        if state.is_retired() {
            return Ok(());
        }
        if !state.is_finite() {
            return Err(MechanicalFailure::SimulationInstability);
        }
        let controls = controls.clamped();
        let mut next = state.clone();

        let fwd = state.forward();
        let left = fwd.perp();
        let v_long = state.velocity.dot(fwd);
        let v_lat = state.velocity.dot(left);
        let speed = state.velocity.length();
        let m_wheel = 0.25 * self.mass;

        // powertrain
        let engine_torque = if state.shift_timer > 0.0 {
            0.0
        } else {
            self.engine.torque_at(state.rpm) * controls.throttle * state.damage.power_multiplier()
        };
        let drive_force = self.engine.wheel_force(engine_torque, state.gear, self.wheel_radius);
        let brake_force = controls.brake * self.brake_force_max;

        // wheel loads and grip level
        let f_z_tot =
            self.mass * GRAVITY + self.aero.downforce(speed) * state.damage.downforce_multiplier();
        let grip_scale = ctx.surface.grip_multiplier()
            * ctx.weather_grip.max(0.0)
            * state.tires.grip_factor()
            * state.damage.grip_multiplier();
        let steer_angle = controls.steering * self.max_steer_angle;

        let mut force_body = DVec2::ZERO;
        let mut yaw_moment = 0.0;

        for i in 0..4 {
            let front = i < 2;
            let r = self.wheel_offsets[i];
            let delta = if front { steer_angle } else { 0.0 };
            let (sin_d, cos_d) = delta.sin_cos();

            // contact patch velocity in body and wheel frame
            let v_w = DVec2::new(v_long - state.yaw_rate * r.y, v_lat + state.yaw_rate * r.x);
            let v_wx = v_w.x * cos_d + v_w.y * sin_d;
            let v_wy = -v_w.x * sin_d + v_w.y * cos_d;

            let f_z = f_z_tot * self.load_share[i];
            let mu = self.tire.peak_mu(front)
                * grip_scale
                * self.tire.temperature_factor(state.tire_temps[i]);
            let budget = mu * f_z;

            // longitudinal demand, brakes cannot reverse the wheel within one step
            let mut f_x = if front { 0.0 } else { 0.5 * drive_force };
            let brake_share = if front {
                0.5 * self.brake_bias
            } else {
                0.5 * (1.0 - self.brake_bias)
            };
            let f_brake = (brake_force * brake_share).min(m_wheel * v_wx.abs() / dt);
            if v_wx.abs() > STANDSTILL_SPEED {
                f_x -= f_brake * v_wx.signum();
            }
            let f_x_demand = f_x;

            // lateral force, clamped so it cannot flip the lateral velocity in one step
            let slip_angle = self.tire.slip_angle(v_wx, v_wy);
            let f_y_cap = m_wheel * v_wy.abs() / dt;
            let f_y = self.tire.lateral_force(slip_angle, budget).max(-f_y_cap).min(f_y_cap);

            let (f_x, f_y) = self.tire.friction_circle(f_x, f_y, budget);

            let slip_ratio = self.tire.slip_ratio(f_x_demand, budget);
            next.wheel_slip[i] = self.tire.combined_slip(slip_angle, slip_ratio);

            // back into the body frame
            let f_body = DVec2::new(f_x * cos_d - f_y * sin_d, f_x * sin_d + f_y * cos_d);
            force_body += f_body;
            yaw_moment += r.perp_dot(f_body);
        }

        // rolling resistance against the direction of travel
        if v_long.abs() > STANDSTILL_SPEED {
            let f_rr = (ctx.surface.rolling_resistance() * f_z_tot).min(self.mass * v_long.abs() / dt);
            force_body.x -= f_rr * v_long.signum();
        }

        let force_world = fwd * force_body.x + left * force_body.y + self.aero.drag_force(state.velocity);

        // semi-implicit Euler: velocities first, then positions with the new velocities
        let mut velocity = state.velocity + force_world / self.mass * dt;
        let mut yaw_rate = state.yaw_rate + yaw_moment / self.inertia * dt;

        // resistive forces stop the car but never reverse it (there is no reverse gear)
        let v_long_int = velocity.dot(fwd);
        if (v_long > 0.0 && v_long_int < 0.0) || (v_long < 0.0 && v_long_int > 0.0 && drive_force <= 0.0)
        {
            velocity -= fwd * v_long_int;
        }

        let blend = smoothstep(KINEMATIC_SPEED_LOW, KINEMATIC_SPEED_HIGH, speed);
        if blend < 1.0 {
            let v_kin = velocity.dot(fwd);
            let yaw_rate_kin = v_kin * steer_angle.tan() / self.wheelbase;
            velocity = (fwd * v_kin).lerp(velocity, blend);
            yaw_rate = yaw_rate_kin + (yaw_rate - yaw_rate_kin) * blend;
        }

        next.velocity = velocity;
        next.yaw_rate = yaw_rate;
        next.position = state.position + velocity * dt;
        next.orientation = (DQuat::from_rotation_z(yaw_rate * dt) * state.orientation).normalize();

        // engine speed and gearbox
        let v_long_new = next.velocity.dot(next.forward());
        next.rpm = self.engine.rpm_from_speed(v_long_new, next.gear, self.wheel_radius);
        if next.shift_timer > 0.0 {
            next.shift_timer = (next.shift_timer - dt).max(0.0);
        } else {
            let requested = match controls.shift {
                ShiftIntent::None => None,
                ShiftIntent::Up => Some(GearChange::Up),
                ShiftIntent::Down => Some(GearChange::Down),
            };
            if let Some(change) = self.engine.shift_decision(next.rpm, next.gear, requested) {
                next.gear = match change {
                    GearChange::Up => next.gear + 1,
                    GearChange::Down => next.gear - 1,
                };
                next.shift_timer = self.engine.spec().shift_time;
                next.rpm = self.engine.rpm_from_speed(v_long_new, next.gear, self.wheel_radius);
                debug!("Shifted {:?} to gear {} at {:.1}m/s", change, next.gear, v_long_new);
            }
        }

        // tire temperatures and wear
        let speed_new = next.velocity.length();
        for i in 0..4 {
            next.tire_temps[i] =
                self.tire
                    .update_temperature(state.tire_temps[i], next.wheel_slip[i], speed_new, dt);
        }
        let slip_mean = 0.25 * next.wheel_slip.iter().sum::<f64>();
        next.tires.update(speed_new, slip_mean, dt);

        if !next.is_finite() {
            return Err(MechanicalFailure::SimulationInstability);
        }

        *state = next;
        Ok(())
    }

    /// apply_impulse changes the velocities of the car instantaneously. It is the only way
    /// collision responses reach the vehicle state.
    pub fn apply_impulse(&self, state: &mut VehicleState, dv: DVec2, d_yaw_rate: f64) {
        if state.is_retired() || !dv.is_finite() || !d_yaw_rate.is_finite() {
            return;
        }
        state.velocity += dv;
        state.yaw_rate += d_yaw_rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::car::test_car_pars;
    use approx::assert_relative_eq;

    fn test_setup() -> (CarSpec, VehicleDynamics, VehicleState) {
        let spec = CarSpec::new(&test_car_pars(1, 1)).expect("valid car");
        let dynamics = VehicleDynamics::new(&spec);
        let state = VehicleState::new(DVec2::ZERO, 0.0, &spec);
        (spec, dynamics, state)
    }

    fn dry_track() -> TrackContext {
        TrackContext::new(SurfaceType::Track, 1.0)
    }

    #[test]
    fn standstill_without_input_stays_put() {
        let (_, dynamics, mut state) = test_setup();
        for _ in 0..120 {
            dynamics
                .step(&mut state, &Controls::neutral(), &dry_track(), FIXED_TIMESTEP)
                .expect("stable");
        }
        assert_relative_eq!(state.position.length(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(state.speed(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn full_throttle_stays_below_power_drag_bound() {
        let (spec, dynamics, mut state) = test_setup();
        let controls = Controls {
            throttle: 1.0,
            ..Controls::neutral()
        };
        let bound = spec.max_speed_bound();
        let mut v_top: f64 = 0.0;
        for _ in 0..(60 * 120) {
            dynamics
                .step(&mut state, &controls, &dry_track(), FIXED_TIMESTEP)
                .expect("stable");
            assert!(state.speed() < bound, "speed {} exceeds bound {}", state.speed(), bound);
            v_top = v_top.max(state.speed());
        }
        // the car gets reasonably close to the drag limit and uses the gearbox
        assert!(v_top > 0.8 * bound);
        assert!(state.gear >= 4);
        assert!(state.position.x > 1000.0);
        assert_relative_eq!(state.position.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn braking_stops_without_reversing() {
        let (_, dynamics, mut state) = test_setup();
        state.velocity = DVec2::new(40.0, 0.0);
        let controls = Controls {
            brake: 1.0,
            ..Controls::neutral()
        };
        for _ in 0..(60 * 10) {
            dynamics
                .step(&mut state, &controls, &dry_track(), FIXED_TIMESTEP)
                .expect("stable");
            assert!(state.velocity.x >= -1e-9);
        }
        assert!(state.speed() < 0.1);
        // the car stops within a plausible distance for ~1.5g
        assert!(state.position.x > 30.0 && state.position.x < 100.0);
    }

    #[test]
    fn steering_left_turns_left() {
        let (_, dynamics, mut state) = test_setup();
        state.velocity = DVec2::new(25.0, 0.0);
        let controls = Controls {
            throttle: 0.3,
            steering: 0.3,
            ..Controls::neutral()
        };
        for _ in 0..60 {
            dynamics
                .step(&mut state, &controls, &dry_track(), FIXED_TIMESTEP)
                .expect("stable");
        }
        assert!(state.heading() > 0.1);
        assert!(state.position.y > 0.0);
        assert_relative_eq!(state.orientation.length(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn grass_slows_the_car_down_more_than_tarmac() {
        let (_, dynamics, state) = test_setup();
        let mut on_track = state.clone();
        let mut on_grass = state;
        on_track.velocity = DVec2::new(30.0, 0.0);
        on_grass.velocity = DVec2::new(30.0, 0.0);
        let grass = TrackContext::new(SurfaceType::Grass, 1.0);
        for _ in 0..120 {
            dynamics
                .step(&mut on_track, &Controls::neutral(), &dry_track(), FIXED_TIMESTEP)
                .expect("stable");
            dynamics
                .step(&mut on_grass, &Controls::neutral(), &grass, FIXED_TIMESTEP)
                .expect("stable");
        }
        assert!(on_grass.speed() < on_track.speed());
    }

    #[test]
    fn non_finite_result_keeps_previous_state() {
        let (_, dynamics, mut state) = test_setup();
        state.velocity = DVec2::new(20.0, 0.0);
        state.tire_temps[2] = f64::NAN;
        let before = state.clone();
        let result = dynamics.step(&mut state, &Controls::neutral(), &dry_track(), FIXED_TIMESTEP);
        assert_eq!(result, Err(MechanicalFailure::SimulationInstability));
        assert_eq!(state.position, before.position);
        assert_eq!(state.velocity, before.velocity);
    }

    #[test]
    fn non_finite_input_is_rejected_before_integration() {
        let (_, dynamics, mut state) = test_setup();
        state.velocity = DVec2::new(f64::NAN, 0.0);
        state.yaw_rate = 0.3;
        let controls = Controls {
            steering: 0.5,
            brake: 1.0,
            ..Controls::neutral()
        };
        let result = dynamics.step(&mut state, &controls, &dry_track(), FIXED_TIMESTEP);
        assert_eq!(result, Err(MechanicalFailure::SimulationInstability));
        assert!(state.velocity.x.is_nan());
        assert_relative_eq!(state.yaw_rate, 0.3);
    }

    #[test]
    fn worn_tires_and_damage_reduce_cornering_grip() {
        let (_, dynamics, base) = test_setup();
        let corner = |state: &mut VehicleState| {
            state.velocity = DVec2::new(40.0, 0.0);
            let controls = Controls {
                throttle: 0.3,
                steering: 0.6,
                ..Controls::neutral()
            };
            for _ in 0..30 {
                dynamics
                    .step(state, &controls, &dry_track(), FIXED_TIMESTEP)
                    .expect("stable");
            }
            state.velocity.y.atan2(state.velocity.x)
        };
        let mut fresh = base.clone();
        let mut worn = base.clone();
        worn.tires.wear = 0.0;
        let mut damaged = base;
        damaged
            .damage
            .apply_impact(crate::core::damage::ImpactZone::Side, 1.0);

        let turned_fresh = corner(&mut fresh);
        assert!(corner(&mut worn) < turned_fresh);
        assert!(corner(&mut damaged) < turned_fresh);
        assert!(fresh.tires.wear < 1.0);
        assert!(fresh.tires.age > 0.45);
    }

    #[test]
    fn impulse_changes_velocity_only() {
        let (_, dynamics, mut state) = test_setup();
        dynamics.apply_impulse(&mut state, DVec2::new(1.0, -2.0), 0.5);
        assert_relative_eq!(state.velocity.x, 1.0);
        assert_relative_eq!(state.velocity.y, -2.0);
        assert_relative_eq!(state.yaw_rate, 0.5);
        assert_eq!(state.position, DVec2::ZERO);
    }

    #[test]
    fn retired_car_is_frozen() {
        let (_, dynamics, mut state) = test_setup();
        state.velocity = DVec2::new(10.0, 0.0);
        state.dnf = Some(DnfReason::SessionAbort);
        let before = state.clone();
        let controls = Controls {
            throttle: 1.0,
            ..Controls::neutral()
        };
        dynamics
            .step(&mut state, &controls, &dry_track(), FIXED_TIMESTEP)
            .expect("frozen");
        dynamics.apply_impulse(&mut state, DVec2::new(5.0, 0.0), 1.0);
        assert_eq!(state, before);
    }
}
