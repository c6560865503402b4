use crate::core::track::Weather;
use rand::Rng;
use tracing::info;

/// (1/s) Rates at which the track gets wet in rain and dries afterwards.
const WETTING_RATE: f64 = 0.1;
const DRYING_RATE: f64 = 0.02;
/// Wetness above which the drivers treat the track as wet.
const WET_THRESHOLD: f64 = 0.1;
/// Grip lost on a completely wet track.
const FULL_WET_GRIP_LOSS: f64 = 0.4;
/// (s) Time between two weather changes: minimum plus a uniform share of the spread.
const CHANGE_INTERVAL_MIN: f64 = 120.0;
const CHANGE_INTERVAL_SPREAD: f64 = 180.0;

/// Weather of a session. The rain condition sets a target wetness that the track approaches
/// gradually, the grip follows the wetness. With dynamic weather the condition changes at random
/// intervals drawn from the session random number generator.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSystem {
    condition: Weather,
    wetness: f64,
    time_to_change: Option<f64>,
}

impl WeatherSystem {
    /// new returns a track in equilibrium with the condition. first_change (s) enables dynamic
    /// weather.
    pub fn new(condition: Weather, first_change: Option<f64>) -> WeatherSystem {
        WeatherSystem {
            condition,
            wetness: target_wetness(condition),
            time_to_change: first_change.filter(|t| t.is_finite() && *t > 0.0),
        }
    }

    pub fn condition(&self) -> Weather {
        self.condition
    }

    pub fn wetness(&self) -> f64 {
        self.wetness
    }

    pub fn is_dynamic(&self) -> bool {
        self.time_to_change.is_some()
    }

    pub fn is_wet(&self) -> bool {
        self.wetness > WET_THRESHOLD
    }

    /// grip_multiplier drops linearly with the wetness. In equilibrium it matches the grip
    /// multiplier of the condition.
    pub fn grip_multiplier(&self) -> f64 {
        1.0 - FULL_WET_GRIP_LOSS * self.wetness
    }

    /// update advances the weather by dt and returns the new condition if it changed.
    pub fn update<R: Rng>(&mut self, dt: f64, rng: &mut R) -> Option<Weather> {
        let target = target_wetness(self.condition);
        if self.wetness < target {
            self.wetness = (self.wetness + WETTING_RATE * dt).min(target);
        } else if self.wetness > target {
            self.wetness = (self.wetness - DRYING_RATE * dt).max(target);
        }

        let time_left = self.time_to_change.as_mut()?;
        *time_left -= dt;
        if *time_left > 0.0 {
            return None;
        }

        let others: Vec<Weather> = [Weather::Dry, Weather::LightRain, Weather::HeavyRain]
            .into_iter()
            .filter(|w| *w != self.condition)
            .collect();
        let next = others[rng.gen_range(0..others.len())];
        info!("Weather changing from {:?} to {:?}", self.condition, next);
        self.condition = next;
        self.time_to_change = Some(CHANGE_INTERVAL_MIN + rng.gen::<f64>() * CHANGE_INTERVAL_SPREAD);
        Some(next)
    }
}

fn target_wetness(condition: Weather) -> f64 {
    match condition {
        Weather::Dry => 0.0,
        Weather::LightRain => 0.5,
        Weather::HeavyRain => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn static_weather_keeps_the_condition_grip() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for condition in [Weather::Dry, Weather::LightRain, Weather::HeavyRain] {
            let mut weather = WeatherSystem::new(condition, None);
            for _ in 0..600 {
                assert_eq!(weather.update(1.0 / 60.0, &mut rng), None);
            }
            assert_relative_eq!(weather.grip_multiplier(), condition.grip_multiplier(), epsilon = 1e-12);
            assert_eq!(weather.is_wet(), condition.is_wet());
        }
    }

    #[test]
    fn track_dries_slower_than_it_gets_wet() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut weather = WeatherSystem::new(Weather::Dry, None);
        weather.condition = Weather::HeavyRain;
        for _ in 0..(60 * 5) {
            weather.update(1.0 / 60.0, &mut rng);
        }
        assert_relative_eq!(weather.wetness(), 0.5, epsilon = 1e-6);
        assert!(weather.is_wet());

        weather.condition = Weather::Dry;
        for _ in 0..(60 * 5) {
            weather.update(1.0 / 60.0, &mut rng);
        }
        assert_relative_eq!(weather.wetness(), 0.4, epsilon = 1e-6);
    }

    #[test]
    fn dynamic_weather_changes_reproducibly() {
        let run = |seed: u64| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut weather = WeatherSystem::new(Weather::Dry, Some(10.0));
            let mut changes = Vec::new();
            for tick in 0..(60 * 600) {
                if let Some(next) = weather.update(1.0 / 60.0, &mut rng) {
                    changes.push((tick, next));
                }
            }
            changes
        };
        let changes = run(5);
        assert!(changes.len() >= 2);
        // the first change happens after the configured time
        assert!((599..=600).contains(&changes[0].0));
        assert!(changes.windows(2).all(|w| w[0].1 != w[1].1));
        assert_eq!(changes, run(5));
    }
}
