pub mod aero;
pub mod ai_driver;
pub mod car;
pub mod collision;
pub mod damage;
pub mod driver;
pub mod engine;
pub mod error;
pub mod handle_race;
pub mod pid;
pub mod race;
pub mod race_state;
pub mod state_handler;
pub mod strategy;
pub mod telemetry;
pub mod tire;
pub mod track;
pub mod vehicle;
pub mod weather;
