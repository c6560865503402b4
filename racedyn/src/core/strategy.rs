use crate::core::tire::{TireCompound, TireWear};
use serde::Deserialize;

/// Pit strategy of an AI car.
/// * `planned_stops` - Completed laps after which the car pits, ascending
/// * `stint_compounds` - Compound per stint, the first one is fitted on the grid (default medium)
/// * `wear_threshold` - () The car pits when the tread falls below this level (0.0 disables)
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StrategyPars {
    #[serde(default)]
    pub planned_stops: Vec<u32>,
    #[serde(default)]
    pub stint_compounds: Vec<TireCompound>,
    #[serde(default = "default_wear_threshold")]
    pub wear_threshold: f64,
}

fn default_wear_threshold() -> f64 {
    0.3
}

impl Default for StrategyPars {
    fn default() -> Self {
        StrategyPars {
            planned_stops: Vec::new(),
            stint_compounds: Vec::new(),
            wear_threshold: default_wear_threshold(),
        }
    }
}

impl StrategyPars {
    pub fn check(&self) -> Result<(), String> {
        if self.planned_stops.windows(2).any(|w| w[0] >= w[1]) || self.planned_stops.contains(&0) {
            return Err("planned stops must be ascending lap numbers starting at 1".to_owned());
        }
        if !(0.0..1.0).contains(&self.wear_threshold) {
            return Err("wear threshold must be in [0, 1)".to_owned());
        }
        Ok(())
    }

    /// compound_for_stint returns the compound of the stint after `stint` stops. Missing entries
    /// repeat the last compound of the list.
    pub fn compound_for_stint(&self, stint: u32) -> TireCompound {
        self.stint_compounds
            .get(stint as usize)
            .or_else(|| self.stint_compounds.last())
            .copied()
            .unwrap_or_default()
    }

    /// should_pit is evaluated when a lap is completed. A planned stop is due once its lap is
    /// reached, worn tires call the car in as long as more than one lap is left.
    pub fn should_pit(&self, laps: u32, stops_made: u32, laps_to_go: u32, tires: &TireWear) -> bool {
        if laps_to_go == 0 {
            return false;
        }
        let planned = self
            .planned_stops
            .get(stops_made as usize)
            .map_or(false, |&lap| laps >= lap);
        let worn = self.wear_threshold > 0.0 && tires.wear < self.wear_threshold && laps_to_go > 1;
        planned || worn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planned_stops_are_taken_in_order() {
        let strategy = StrategyPars {
            planned_stops: vec![3, 6],
            stint_compounds: vec![TireCompound::Soft, TireCompound::Medium],
            wear_threshold: 0.0,
        };
        let tires = TireWear::fresh(TireCompound::Soft);
        assert!(!strategy.should_pit(2, 0, 8, &tires));
        assert!(strategy.should_pit(3, 0, 7, &tires));
        assert!(!strategy.should_pit(4, 1, 6, &tires));
        assert!(strategy.should_pit(6, 1, 4, &tires));
        assert!(!strategy.should_pit(9, 2, 1, &tires));

        assert_eq!(strategy.compound_for_stint(0), TireCompound::Soft);
        assert_eq!(strategy.compound_for_stint(1), TireCompound::Medium);
        assert_eq!(strategy.compound_for_stint(2), TireCompound::Medium);
        assert_eq!(StrategyPars::default().compound_for_stint(0), TireCompound::Medium);
    }

    #[test]
    fn worn_tires_call_the_car_in_unless_the_race_is_almost_over() {
        let strategy = StrategyPars::default();
        let mut tires = TireWear::fresh(TireCompound::Medium);
        tires.wear = 0.25;
        assert!(strategy.should_pit(10, 0, 5, &tires));
        assert!(!strategy.should_pit(14, 0, 1, &tires));
        assert!(!strategy.should_pit(15, 0, 0, &tires));
    }

    #[test]
    fn unordered_stops_are_rejected() {
        let strategy = StrategyPars {
            planned_stops: vec![5, 2],
            ..StrategyPars::default()
        };
        assert!(strategy.check().is_err());
        assert!(StrategyPars::default().check().is_ok());
    }
}
