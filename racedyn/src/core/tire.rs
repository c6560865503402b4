use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

/// Lowest longitudinal wheel speed used as slip-angle denominator.
pub const MIN_SLIP_SPEED: f64 = 0.5;

/// * `mu_peak` - () Friction coefficient at peak slip
/// * `slide_ratio` - () Fraction of peak friction left when fully sliding
/// * `slide_falloff` - () Normalized slip beyond the peak until fully sliding
/// * `peak_slip_angle` - (rad) Slip angle of maximum lateral grip
/// * `peak_slip_ratio` - () Slip ratio of maximum longitudinal grip
/// * `rear_grip_bias` - () Grip multiplier of the rear axle (> 1.0 gives understeer)
/// * `t_optimal` - (°C) Temperature of maximum grip
/// * `t_window` - (°C) Width of the temperature bell curve
/// * `min_temp_grip` - () Grip multiplier far away from the optimal temperature
/// * `t_ambient` - (°C) Ambient temperature
/// * `t_blanket` - (°C) Temperature of fresh tires fitted at the start or in the pits
/// * `slip_heat` - (°C) Equilibrium temperature rise per unit normalized slip
/// * `rolling_heat` - (°C*s/m) Equilibrium temperature rise per m/s of speed
/// * `heat_rate` - (1/s) Rate of approach when heating up
/// * `cool_rate` - (1/s) Rate of approach when cooling down
#[derive(Debug, Deserialize, Clone)]
pub struct TireSpec {
    pub mu_peak: f64,
    #[serde(default = "default_slide_ratio")]
    pub slide_ratio: f64,
    #[serde(default = "default_slide_falloff")]
    pub slide_falloff: f64,
    pub peak_slip_angle: f64,
    pub peak_slip_ratio: f64,
    #[serde(default = "default_rear_grip_bias")]
    pub rear_grip_bias: f64,
    pub t_optimal: f64,
    pub t_window: f64,
    #[serde(default = "default_min_temp_grip")]
    pub min_temp_grip: f64,
    pub t_ambient: f64,
    pub t_blanket: f64,
    pub slip_heat: f64,
    pub rolling_heat: f64,
    pub heat_rate: f64,
    pub cool_rate: f64,
}

fn default_slide_ratio() -> f64 {
    0.8
}

fn default_slide_falloff() -> f64 {
    2.0
}

fn default_rear_grip_bias() -> f64 {
    1.08
}

fn default_min_temp_grip() -> f64 {
    0.7
}

/// Slip-based tire model. Pure numerics, no state: temperatures are kept in the vehicle state.
#[derive(Debug, Clone)]
pub struct TireModel {
    spec: TireSpec,
}

impl TireModel {
    pub fn new(spec: &TireSpec) -> TireModel {
        TireModel {
            spec: spec.to_owned(),
        }
    }

    pub fn spec(&self) -> &TireSpec {
        &self.spec
    }

    /// grip_curve returns the signed normalized force for a normalized slip x = slip / peak_slip.
    /// It rises to 1.0 at |x| = 1 and drops linearly to the slide ratio afterwards.
    pub fn grip_curve(&self, x: f64) -> f64 {
        let a = x.abs();
        let y = if a <= 1.0 {
            (FRAC_PI_2 * a).sin()
        } else {
            let falloff = self.spec.slide_falloff.max(f64::EPSILON);
            1.0 - (1.0 - self.spec.slide_ratio) * ((a - 1.0) / falloff).min(1.0)
        };
        y.copysign(x)
    }

    /// slip_angle returns the slip angle (rad) of a wheel moving with (v_x, v_y) in its own frame.
    pub fn slip_angle(&self, v_x: f64, v_y: f64) -> f64 {
        v_y.atan2(v_x.abs().max(MIN_SLIP_SPEED))
    }

    /// peak_mu returns the peak friction coefficient of a front or rear tire.
    pub fn peak_mu(&self, front: bool) -> f64 {
        if front {
            self.spec.mu_peak
        } else {
            self.spec.mu_peak * self.spec.rear_grip_bias
        }
    }

    /// temperature_factor returns the grip multiplier at tire temperature t (bell curve around the
    /// optimal temperature).
    pub fn temperature_factor(&self, t: f64) -> f64 {
        let window = self.spec.t_window.max(f64::EPSILON);
        let z = (t - self.spec.t_optimal) / window;
        self.spec.min_temp_grip + (1.0 - self.spec.min_temp_grip) * (-z * z).exp()
    }

    /// lateral_force returns the lateral force (N) for the given slip angle and grip budget (N).
    pub fn lateral_force(&self, slip_angle: f64, budget: f64) -> f64 {
        let peak = self.spec.peak_slip_angle.max(f64::EPSILON);
        -budget * self.grip_curve(slip_angle / peak)
    }

    /// slip_ratio estimates the longitudinal slip ratio from the demanded force and the available
    /// grip budget. Wheel spin is not integrated separately.
    pub fn slip_ratio(&self, f_x_demand: f64, budget: f64) -> f64 {
        if budget <= f64::EPSILON {
            return 0.0;
        }
        f_x_demand / budget * self.spec.peak_slip_ratio
    }

    /// combined_slip returns the magnitude of the normalized slip vector.
    pub fn combined_slip(&self, slip_angle: f64, slip_ratio: f64) -> f64 {
        let a = slip_angle / self.spec.peak_slip_angle.max(f64::EPSILON);
        let k = slip_ratio / self.spec.peak_slip_ratio.max(f64::EPSILON);
        a.hypot(k)
    }

    /// friction_circle scales the combined force down to the grip budget.
    pub fn friction_circle(&self, f_x: f64, f_y: f64, budget: f64) -> (f64, f64) {
        let mag = f_x.hypot(f_y);
        if mag > budget && mag > f64::EPSILON {
            let scale = budget.max(0.0) / mag;
            (f_x * scale, f_y * scale)
        } else {
            (f_x, f_y)
        }
    }

    /// update_temperature moves the temperature towards its equilibrium for the current slip and
    /// speed. Without slip and speed the tire cools down towards ambient.
    pub fn update_temperature(&self, t: f64, slip: f64, speed: f64, dt: f64) -> f64 {
        let t_eq = self.spec.t_ambient
            + self.spec.slip_heat * slip.min(2.0)
            + self.spec.rolling_heat * speed.abs();
        let rate = if t_eq > t {
            self.spec.heat_rate
        } else {
            self.spec.cool_rate
        };
        t + (t_eq - t) * (1.0 - (-rate * dt).exp())
    }
}

// -------------------------------------------------------------------------------------------------
// COMPOUNDS AND WEAR ------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

/// (m/s) Speed around which the wear rate is normalized.
const WEAR_REF_SPEED: f64 = 80.0;
/// Wear level above which the tread gives full grip.
const WEAR_GRIP_KNEE: f64 = 0.5;
/// Grip multiplier of a completely worn tire.
const WORN_GRIP: f64 = 0.7;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TireCompound {
    Hard,
    Medium,
    Soft,
}

impl Default for TireCompound {
    fn default() -> Self {
        TireCompound::Medium
    }
}

impl TireCompound {
    pub fn grip_multiplier(&self) -> f64 {
        match self {
            TireCompound::Hard => 0.96,
            TireCompound::Medium => 1.0,
            TireCompound::Soft => 1.04,
        }
    }

    /// degradation_rate returns the wear (1/s) at the reference speed without sliding.
    pub fn degradation_rate(&self) -> f64 {
        match self {
            TireCompound::Hard => 0.0008,
            TireCompound::Medium => 0.0012,
            TireCompound::Soft => 0.0022,
        }
    }
}

/// Tread state of the fitted set.
/// * `wear` - () 1.0 for a fresh set, 0.0 for a completely worn one
/// * `age` - (s) Driven time on this set
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TireWear {
    pub compound: TireCompound,
    pub wear: f64,
    pub age: f64,
}

impl TireWear {
    pub fn fresh(compound: TireCompound) -> TireWear {
        TireWear {
            compound,
            wear: 1.0,
            age: 0.0,
        }
    }

    /// grip_factor combines compound and tread: full grip down to half wear, then a linear drop
    /// to WORN_GRIP.
    pub fn grip_factor(&self) -> f64 {
        let tread = if self.wear > WEAR_GRIP_KNEE {
            1.0
        } else {
            WORN_GRIP + (1.0 - WORN_GRIP) * self.wear.max(0.0) / WEAR_GRIP_KNEE
        };
        self.compound.grip_multiplier() * tread
    }

    /// update wears the tread down. Sliding (normalized slip above 1) and speed accelerate the
    /// wear, a standing car does not wear its tires.
    pub fn update(&mut self, speed: f64, slip: f64, dt: f64) {
        if speed <= 0.1 {
            return;
        }
        let speed_factor = (speed / WEAR_REF_SPEED).max(0.5);
        let slip_factor = 1.0 + 0.5 * slip.clamp(0.0, 3.0);
        let rate = self.compound.degradation_rate() * speed_factor * slip_factor;
        self.wear = (self.wear - rate * dt).max(0.0);
        self.age += dt;
    }

    pub fn is_worn(&self) -> bool {
        self.wear <= WEAR_GRIP_KNEE
    }
}

#[cfg(test)]
pub(crate) fn test_tire_spec() -> TireSpec {
    TireSpec {
        mu_peak: 1.5,
        slide_ratio: 0.8,
        slide_falloff: 2.0,
        peak_slip_angle: 0.15,
        peak_slip_ratio: 0.1,
        rear_grip_bias: 1.08,
        t_optimal: 90.0,
        t_window: 35.0,
        min_temp_grip: 0.7,
        t_ambient: 25.0,
        t_blanket: 80.0,
        slip_heat: 40.0,
        rolling_heat: 0.8,
        heat_rate: 0.3,
        cool_rate: 0.05,
    }
}
