use crate::core::error::ConfigurationError;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// * `initials` - Driver initials, e.g. SEN
/// * `name` - Driver name, e.g. Ayrton Senna
/// * `skill` - () Overall driving precision in [0, 1]
/// * `aggression` - () Willingness to attack and defend in [0, 1]
/// * `consistency` - () Lap-to-lap repeatability in [0, 1], lower values add noise
/// * `wet_skill` - () Ability on a wet surface in [0, 1]
/// * `reaction_time` - (s) Delay before reacting to newly detected threats
#[derive(Debug, Deserialize, Clone)]
pub struct DriverPars {
    pub initials: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_skill")]
    pub skill: f64,
    #[serde(default = "default_aggression")]
    pub aggression: f64,
    #[serde(default = "default_consistency")]
    pub consistency: f64,
    #[serde(default = "default_skill")]
    pub wet_skill: f64,
    #[serde(default = "default_reaction_time")]
    pub reaction_time: f64,
}

fn default_skill() -> f64 {
    0.8
}

fn default_consistency() -> f64 {
    1.0
}

fn default_aggression() -> f64 {
    0.5
}

fn default_reaction_time() -> f64 {
    0.1
}

/// Plain data describing a driver. The AI behavior is a function of this profile.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverProfile {
    pub initials: String,
    pub name: String,
    pub skill: f64,
    pub aggression: f64,
    pub consistency: f64,
    pub wet_skill: f64,
    pub reaction_time: f64,
}

impl DriverProfile {
    pub fn new(driver_pars: &DriverPars) -> Result<DriverProfile, ConfigurationError> {
        for (value, label) in [
            (driver_pars.skill, "skill"),
            (driver_pars.aggression, "aggression"),
            (driver_pars.consistency, "consistency"),
            (driver_pars.wet_skill, "wet skill"),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::InvalidDriverProfile {
                    initials: driver_pars.initials.to_owned(),
                    reason: format!("{} must be in [0, 1]", label),
                });
            }
        }
        if !(0.0..=1.0).contains(&driver_pars.reaction_time) {
            return Err(ConfigurationError::InvalidDriverProfile {
                initials: driver_pars.initials.to_owned(),
                reason: "reaction time must be in [0s, 1s]".to_owned(),
            });
        }

        Ok(DriverProfile {
            initials: driver_pars.initials.to_owned(),
            name: driver_pars.name.to_owned(),
            skill: driver_pars.skill,
            aggression: driver_pars.aggression,
            consistency: driver_pars.consistency,
            wet_skill: driver_pars.wet_skill,
            reaction_time: driver_pars.reaction_time,
        })
    }

    /// human returns the constant profile used for player controlled cars.
    pub fn human(initials: &str) -> DriverProfile {
        DriverProfile {
            initials: initials.to_owned(),
            name: "Player".to_owned(),
            skill: 1.0,
            aggression: 0.0,
            consistency: 1.0,
            wet_skill: 1.0,
            reaction_time: 0.0,
        }
    }
}

/// Difficulty presets for CLI-selected opponents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyPreset {
    Rookie,
    Amateur,
    Pro,
    Legend,
}

impl DifficultyPreset {
    /// profile returns a driver profile of this difficulty with the given initials.
    pub fn profile(&self, initials: &str, name: &str) -> DriverProfile {
        // (skill, aggression, consistency, wet_skill, reaction_time)
        let (skill, aggression, consistency, wet_skill, reaction_time) = match self {
            DifficultyPreset::Rookie => (0.5, 0.4, 0.5, 0.4, 0.15),
            DifficultyPreset::Amateur => (0.7, 0.5, 0.7, 0.6, 0.12),
            DifficultyPreset::Pro => (0.95, 0.6, 0.98, 0.9, 0.07),
            DifficultyPreset::Legend => (1.0, 0.9, 0.95, 1.0, 0.05),
        };
        DriverProfile {
            initials: initials.to_owned(),
            name: name.to_owned(),
            skill,
            aggression,
            consistency,
            wet_skill,
            reaction_time,
        }
    }
}

impl FromStr for DifficultyPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rookie" => Ok(DifficultyPreset::Rookie),
            "amateur" => Ok(DifficultyPreset::Amateur),
            "pro" => Ok(DifficultyPreset::Pro),
            "legend" => Ok(DifficultyPreset::Legend),
            _ => Err(format!(
                "unknown difficulty '{}' (expected rookie, amateur, pro or legend)",
                s
            )),
        }
    }
}

impl fmt::Display for DifficultyPreset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DifficultyPreset::Rookie => "rookie",
            DifficultyPreset::Amateur => "amateur",
            DifficultyPreset::Pro => "pro",
            DifficultyPreset::Legend => "legend",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pars(consistency: f64) -> DriverPars {
        DriverPars {
            initials: "TST".to_owned(),
            name: "Test Driver".to_owned(),
            skill: 0.8,
            aggression: 0.5,
            consistency,
            wet_skill: 0.7,
            reaction_time: 0.1,
        }
    }

    #[test]
    fn profile_ranges_are_checked() {
        assert!(DriverProfile::new(&pars(0.9)).is_ok());
        assert!(matches!(
            DriverProfile::new(&pars(1.5)),
            Err(ConfigurationError::InvalidDriverProfile { .. })
        ));
    }

    #[test]
    fn presets_parse_case_insensitive() {
        assert_eq!("Legend".parse::<DifficultyPreset>(), Ok(DifficultyPreset::Legend));
        assert!("godlike".parse::<DifficultyPreset>().is_err());
        let rookie = DifficultyPreset::Rookie.profile("ROO", "Rookie");
        let legend = DifficultyPreset::Legend.profile("LEG", "Legend");
        assert!(rookie.skill < legend.skill);
        assert!(rookie.reaction_time > legend.reaction_time);
    }
}
