use serde::Serialize;
use thiserror::Error;

/// Invalid parameters detected while setting up a session. Always fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("car {car_no}: {reason}")]
    InvalidCarSpec { car_no: u32, reason: String },
    #[error("driver {initials}: {reason}")]
    InvalidDriverProfile { initials: String, reason: String },
    #[error("track {name}: {reason}")]
    InvalidTrack { name: String, reason: String },
    #[error("race parameters: {0}")]
    InvalidSessionPars(String),
    #[error("car number {0} is missing in the car parameters")]
    MissingCar(u32),
    #[error("driver {initials} of car {car_no} is missing in the driver parameters")]
    MissingDriver { car_no: u32, initials: String },
    #[error("car number {0} appears more than once in the participants")]
    DuplicateCar(u32),
}

/// Recoverable problem inside a tick. The caller falls back to a conservative default.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationWarning {
    #[error("no track path available")]
    MissingPath,
    #[error("position is {distance:.1}m away from the track path")]
    PathLookupMiss { distance: f64 },
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
}

/// Per-car failure. Converted into a DNF by the session, never propagated further.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
pub enum MechanicalFailure {
    #[error("simulation instability")]
    SimulationInstability,
    #[error("persistent instability")]
    PersistentInstability,
    #[error("{0} failure")]
    Component(String),
    #[error("heavy impact ({delta_v:.1}m/s)")]
    HeavyImpact { delta_v: f64 },
    #[error("stuck")]
    Stuck,
}

/// Reason for a car to be retired from the classification.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
pub enum DnfReason {
    #[error("{0}")]
    Mechanical(MechanicalFailure),
    #[error("session aborted")]
    SessionAbort,
}

impl From<MechanicalFailure> for DnfReason {
    fn from(failure: MechanicalFailure) -> Self {
        DnfReason::Mechanical(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dnf_reasons_render_for_classification() {
        assert_eq!(
            DnfReason::from(MechanicalFailure::SimulationInstability).to_string(),
            "simulation instability"
        );
        assert_eq!(DnfReason::SessionAbort.to_string(), "session aborted");
        assert_eq!(
            DnfReason::from(MechanicalFailure::Component("gearbox".to_owned())).to_string(),
            "gearbox failure"
        );
    }
}
