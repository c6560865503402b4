use rand::Rng;
use rand_distr::{Distribution, Normal};

/// (m/s) The integral term only accumulates for speed errors within this band.
pub const INTEGRAL_BAND: f64 = 5.0;
/// Anti-windup limit of the accumulated integral.
const INTEGRAL_LIMIT: f64 = 30.0;
/// (s) Lower bound of the timestep used for the derivative term.
const MIN_DERIVATIVE_DT: f64 = 0.001;
/// Bounds of the per-driver gain jitter factor.
const JITTER_FACTOR_MIN: f64 = 0.5;
const JITTER_FACTOR_MAX: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl PidGains {
    pub const BASELINE: PidGains = PidGains {
        kp: 0.05,
        ki: 0.01,
        kd: 0.02,
    };

    /// jittered returns the gains scaled by a random factor 1 + N(0, 0.2 * (1 - consistency)),
    /// clamped to [0.5, 1.5]. A perfectly consistent driver gets the unchanged gains and no random
    /// number is drawn.
    pub fn jittered<R: Rng>(&self, consistency: f64, rng: &mut R) -> PidGains {
        let sd = 0.2 * (1.0 - consistency.clamp(0.0, 1.0));
        if sd <= 0.0 {
            return *self;
        }
        let mut factor = || match Normal::new(1.0, sd) {
            Ok(normal) => normal.sample(&mut *rng).clamp(JITTER_FACTOR_MIN, JITTER_FACTOR_MAX),
            Err(_) => 1.0,
        };
        PidGains {
            kp: self.kp * factor(),
            ki: self.ki * factor(),
            kd: self.kd * factor(),
        }
    }
}

impl Default for PidGains {
    fn default() -> Self {
        PidGains::BASELINE
    }
}

/// Speed controller. The output is a combined pedal command: positive values are throttle,
/// negative values are brake.
#[derive(Debug, Clone, Default)]
pub struct PidController {
    integral: f64,
    prev_error: Option<f64>,
}

impl PidController {
    pub fn new() -> PidController {
        PidController::default()
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// update returns the controller output for the current error (target - actual).
    pub fn update(&mut self, error: f64, gains: &PidGains, dt: f64) -> f64 {
        if !error.is_finite() {
            return 0.0;
        }

        if error.abs() < INTEGRAL_BAND {
            self.integral = (self.integral + error * dt).clamp(-INTEGRAL_LIMIT, INTEGRAL_LIMIT);
        }

        let derivative = match self.prev_error {
            Some(prev) => (error - prev) / dt.max(MIN_DERIVATIVE_DT),
            None => 0.0,
        };
        self.prev_error = Some(error);

        gains.kp * error + gains.ki * self.integral + gains.kd * derivative
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// first order plant: v' = 10 * u, the gains are queried every tick
    fn run_plant_with(mut gains: impl FnMut() -> PidGains, ticks: usize) -> f64 {
        let dt = 1.0 / 60.0;
        let target = 30.0;
        let mut v = 0.0;
        let mut pid = PidController::new();
        for _ in 0..ticks {
            let u = pid.update(target - v, &gains(), dt).clamp(-1.0, 1.0);
            v += 10.0 * u * dt;
        }
        target - v
    }

    fn run_plant(gains: &PidGains, ticks: usize) -> f64 {
        run_plant_with(|| *gains, ticks)
    }

    #[test]
    fn baseline_converges_without_steady_state_error() {
        let error = run_plant(&PidGains::BASELINE, 3000);
        assert!(error.abs() < 0.05, "remaining error {}", error);
    }

    #[test]
    fn jittered_gains_converge_for_all_consistencies() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for consistency in [0.5, 0.75, 1.0] {
            for _ in 0..10 {
                let gains = PidGains::BASELINE.jittered(consistency, &mut rng);
                assert!(gains.kp >= 0.5 * PidGains::BASELINE.kp - 1e-12);
                assert!(gains.kp <= 1.5 * PidGains::BASELINE.kp + 1e-12);
                let error = run_plant(&gains, 3000);
                assert!(error.abs() < 0.05, "consistency {}: error {}", consistency, error);
            }
        }
    }

    #[test]
    fn converges_with_gains_jittered_every_tick() {
        for (seed, consistency) in [(3, 0.5), (4, 0.75), (5, 0.0)] {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let error = run_plant_with(|| PidGains::BASELINE.jittered(consistency, &mut rng), 3000);
            assert!(error.abs() < 0.05, "consistency {}: error {}", consistency, error);
        }
    }

    #[test]
    fn full_consistency_does_not_draw_random_numbers() {
        let mut rng_a = ChaCha8Rng::seed_from_u64(1);
        let mut rng_b = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(PidGains::BASELINE.jittered(1.0, &mut rng_a), PidGains::BASELINE);
        assert_eq!(rng_a.gen::<u64>(), rng_b.gen::<u64>());
    }

    #[test]
    fn integral_only_accumulates_inside_band() {
        let mut pid = PidController::new();
        pid.update(10.0, &PidGains::BASELINE, 0.1);
        assert_eq!(pid.integral(), 0.0);
        pid.update(2.0, &PidGains::BASELINE, 0.1);
        assert!((pid.integral() - 0.2).abs() < 1e-12);
        pid.reset();
        assert_eq!(pid.integral(), 0.0);
    }
}
