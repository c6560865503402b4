use crate::core::ai_driver::AiState;
use crate::core::car::CarStatus;
use crate::core::race::RaceSession;
use crate::core::race_state::SessionPhase;
use crate::core::tire::TireCompound;
use crate::core::track::Weather;
use crate::post::race_result::RaceResult;

/// Maximum frequency (Hz) at which snapshots are sent to live consumers.
pub const MAX_SNAPSHOT_FREQUENCY: f64 = 20.0;

#[derive(Debug, Clone)]
pub struct CarSnapshot {
    pub car_no: u32,
    pub driver_initials: String,
    pub color: String,
    pub position: u32,
    pub laps: u32,
    pub race_prog: f64,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub speed: f64,
    pub gear: u8,
    pub compound: TireCompound,
    pub tire_wear: f64,
    pub damaged: bool,
    pub ai_state: Option<AiState>,
    pub blue_flag: bool,
    pub status: CarStatus,
}

/// Read-only copy of the session state for renderers and other consumers on another thread.
#[derive(Debug, Clone)]
pub struct RaceSnapshot {
    pub tick: u64,
    pub race_time: f64,
    pub phase: SessionPhase,
    pub lights_on: u8,
    pub leader_lap: u32,
    pub tot_no_laps: u32,
    pub weather: Weather,
    pub wetness: f64,
    pub car_snapshots: Vec<CarSnapshot>,

    // final results payload (sent once when the session finished)
    pub final_result: Option<RaceResult>,
}

impl RaceSnapshot {
    pub fn new(session: &RaceSession) -> RaceSnapshot {
        let race_state = session.race_state();

        let car_snapshots = session
            .cars()
            .iter()
            .zip(race_state.timings.iter())
            .map(|(car, timing)| CarSnapshot {
                car_no: car.car_no,
                driver_initials: car.driver.initials.to_owned(),
                color: car.color.to_owned(),
                position: timing.position,
                laps: timing.laps,
                race_prog: timing.progress,
                x: car.state.position.x,
                y: car.state.position.y,
                heading: car.state.heading(),
                speed: car.state.speed(),
                gear: car.state.gear,
                compound: car.state.tires.compound,
                tire_wear: car.state.tires.wear,
                damaged: car.state.damage.is_damaged(),
                ai_state: car.ai().map(|ai| ai.state()),
                blue_flag: timing.blue_flag,
                status: car.status,
            })
            .collect();

        RaceSnapshot {
            tick: race_state.tick,
            race_time: race_state.race_time,
            phase: race_state.phase,
            lights_on: race_state.lights_on,
            leader_lap: (race_state.leader_laps + 1).min(session.tot_no_laps),
            tot_no_laps: session.tot_no_laps,
            weather: session.weather(),
            wetness: session.wetness(),
            car_snapshots,
            final_result: None,
        }
    }

    /// final_snapshot returns the snapshot carrying the race result.
    pub fn final_snapshot(session: &RaceSession) -> RaceSnapshot {
        RaceSnapshot {
            final_result: Some(session.get_race_result()),
            ..RaceSnapshot::new(session)
        }
    }
}
