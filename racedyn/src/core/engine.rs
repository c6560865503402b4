use helpers::general::lin_interp;
use serde::Deserialize;
use std::f64::consts::PI;

const RPM_TO_RADPS: f64 = 2.0 * PI / 60.0;

/// * `torque_curve` - (rpm, Nm) Full-load torque curve, rpm increasing
/// * `idle_rpm` - (rpm) Lowest engine speed (clutch slip below)
/// * `redline_rpm` - (rpm) Rev limiter
/// * `shift_up_rpm` - (rpm) Automatic upshift threshold
/// * `shift_down_rpm` - (rpm) Automatic downshift threshold (stall floor)
/// * `gear_ratios` - () Gearbox ratios from first to top gear
/// * `final_drive` - () Differential ratio
/// * `drivetrain_efficiency` - () Share of engine power reaching the wheels
/// * `shift_time` - (s) Torque interruption during a gear change
#[derive(Debug, Deserialize, Clone)]
pub struct EngineSpec {
    pub torque_curve: Vec<[f64; 2]>,
    pub idle_rpm: f64,
    pub redline_rpm: f64,
    pub shift_up_rpm: f64,
    pub shift_down_rpm: f64,
    pub gear_ratios: Vec<f64>,
    pub final_drive: f64,
    #[serde(default = "default_drivetrain_efficiency")]
    pub drivetrain_efficiency: f64,
    #[serde(default = "default_shift_time")]
    pub shift_time: f64,
}

fn default_drivetrain_efficiency() -> f64 {
    0.92
}

fn default_shift_time() -> f64 {
    0.05
}

impl EngineSpec {
    /// check returns a description of the first problem found in the parameters.
    pub fn check(&self) -> Result<(), String> {
        if self.torque_curve.len() < 2 {
            return Err("torque curve requires at least two points".to_owned());
        }
        for pair in self.torque_curve.windows(2) {
            if pair[1][0] <= pair[0][0] {
                return Err("torque curve rpm values must be increasing".to_owned());
            }
        }
        if self
            .torque_curve
            .iter()
            .any(|p| !p[0].is_finite() || !p[1].is_finite() || p[1] < 0.0)
        {
            return Err("torque curve contains invalid values".to_owned());
        }
        if !(self.idle_rpm > 0.0 && self.idle_rpm < self.shift_down_rpm) {
            return Err("idle rpm must be positive and below the downshift rpm".to_owned());
        }
        if !(self.shift_down_rpm < self.shift_up_rpm && self.shift_up_rpm <= self.redline_rpm) {
            return Err("shift thresholds must satisfy down < up <= redline".to_owned());
        }
        if self.gear_ratios.is_empty() || self.gear_ratios.len() > u8::MAX as usize {
            return Err("gearbox requires between 1 and 255 gears".to_owned());
        }
        if self.gear_ratios.iter().any(|r| !(*r > 0.0)) || !(self.final_drive > 0.0) {
            return Err("gear ratios and final drive must be positive".to_owned());
        }
        for pair in self.gear_ratios.windows(2) {
            if pair[1] >= pair[0] {
                return Err("gear ratios must be decreasing".to_owned());
            }
            // after an upshift at shift_up_rpm the engine must not fall below shift_down_rpm
            if self.shift_up_rpm * pair[1] / pair[0] <= self.shift_down_rpm {
                return Err(format!(
                    "gear step {:.2} -> {:.2} would make the automatic gearbox hunt",
                    pair[0], pair[1]
                ));
            }
        }
        if !(self.drivetrain_efficiency > 0.0 && self.drivetrain_efficiency <= 1.0) {
            return Err("drivetrain efficiency must be in ]0, 1]".to_owned());
        }
        if !(self.shift_time >= 0.0) {
            return Err("shift time must not be negative".to_owned());
        }
        Ok(())
    }
}

/// Result of a gear change decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GearChange {
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub struct EngineTransmission {
    spec: EngineSpec,
    rpm_pts: Vec<f64>,
    torque_pts: Vec<f64>,
}

impl EngineTransmission {
    pub fn new(spec: &EngineSpec) -> EngineTransmission {
        EngineTransmission {
            spec: spec.to_owned(),
            rpm_pts: spec.torque_curve.iter().map(|p| p[0]).collect(),
            torque_pts: spec.torque_curve.iter().map(|p| p[1]).collect(),
        }
    }

    pub fn spec(&self) -> &EngineSpec {
        &self.spec
    }

    pub fn no_gears(&self) -> u8 {
        self.spec.gear_ratios.len() as u8
    }

    /// torque_at returns the full-load engine torque (Nm). The rev limiter cuts torque at the
    /// redline.
    pub fn torque_at(&self, rpm: f64) -> f64 {
        if rpm >= self.spec.redline_rpm {
            return 0.0;
        }
        lin_interp(rpm, &self.rpm_pts, &self.torque_pts)
    }

    /// total_ratio returns gear ratio times final drive for a 1-based gear.
    pub fn total_ratio(&self, gear: u8) -> f64 {
        let idx = (gear.max(1) as usize - 1).min(self.spec.gear_ratios.len() - 1);
        self.spec.gear_ratios[idx] * self.spec.final_drive
    }

    /// wheel_force returns the driving force (N) at the contact patches for the given engine torque.
    pub fn wheel_force(&self, engine_torque: f64, gear: u8, wheel_radius: f64) -> f64 {
        engine_torque * self.total_ratio(gear) * self.spec.drivetrain_efficiency
            / wheel_radius.max(f64::EPSILON)
    }

    /// rpm_from_speed returns the engine speed for a longitudinal wheel speed (m/s), clamped to
    /// [idle, redline].
    pub fn rpm_from_speed(&self, v_long: f64, gear: u8, wheel_radius: f64) -> f64 {
        let wheel_radps = v_long.abs() / wheel_radius.max(f64::EPSILON);
        let rpm = wheel_radps * self.total_ratio(gear) / RPM_TO_RADPS;
        rpm.clamp(self.spec.idle_rpm, self.spec.redline_rpm)
    }

    /// shift_decision returns the gear change to perform. An explicit request wins over the
    /// automatic thresholds.
    pub fn shift_decision(&self, rpm: f64, gear: u8, requested: Option<GearChange>) -> Option<GearChange> {
        let change = match requested {
            Some(change) => Some(change),
            None if rpm >= self.spec.shift_up_rpm => Some(GearChange::Up),
            None if rpm <= self.spec.shift_down_rpm => Some(GearChange::Down),
            None => None,
        };

        match change {
            Some(GearChange::Up) if gear < self.no_gears() => Some(GearChange::Up),
            Some(GearChange::Down) if gear > 1 => Some(GearChange::Down),
            _ => None,
        }
    }

    /// max_power returns the maximum engine power (W) of the piecewise linear torque curve below
    /// the redline.
    pub fn max_power(&self) -> f64 {
        let mut p_max: f64 = 0.0;
        let redline = self.spec.redline_rpm;

        for i in 0..self.rpm_pts.len() {
            let rpm = self.rpm_pts[i].min(redline);
            p_max = p_max.max(self.torque_at_unlimited(rpm) * rpm * RPM_TO_RADPS);
        }
        p_max = p_max.max(self.torque_at_unlimited(redline) * redline * RPM_TO_RADPS);

        // interior maxima of (t0 + k (w - w0)) * w
        for pair in self.spec.torque_curve.windows(2) {
            let (w0, w1) = (pair[0][0] * RPM_TO_RADPS, pair[1][0] * RPM_TO_RADPS);
            let k = (pair[1][1] - pair[0][1]) / (w1 - w0);
            if k < 0.0 {
                let w_star = (k * w0 - pair[0][1]) / (2.0 * k);
                if w_star > w0 && w_star < w1 && w_star < redline * RPM_TO_RADPS {
                    p_max = p_max.max((pair[0][1] + k * (w_star - w0)) * w_star);
                }
            }
        }

        p_max
    }

    fn torque_at_unlimited(&self, rpm: f64) -> f64 {
        lin_interp(rpm, &self.rpm_pts, &self.torque_pts)
    }
}

#[cfg(test)]
pub(crate) fn test_engine_spec() -> EngineSpec {
    EngineSpec {
        torque_curve: vec![[4000.0, 250.0], [8000.0, 330.0], [12000.0, 350.0], [15000.0, 290.0]],
        idle_rpm: 4000.0,
        redline_rpm: 15000.0,
        shift_up_rpm: 14500.0,
        shift_down_rpm: 7000.0,
        gear_ratios: vec![3.0, 2.3, 1.85, 1.55, 1.33, 1.16, 1.05],
        final_drive: 4.0,
        drivetrain_efficiency: 0.92,
        shift_time: 0.05,
    }
}
