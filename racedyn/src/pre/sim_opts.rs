use crate::core::driver::DifficultyPreset;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(
    version = "0.1.0",
    name = "racedyn",
    about = "A fixed-step race simulator with vehicle dynamics and AI drivers"
)]
pub struct SimOpts {
    // FLAGS ---------------------------------------------------------------------------------------
    /// Activate debug printing
    #[clap(short, long)]
    pub debug: bool,

    /// Activate live mode - race will be simulated in real-time with a textual live feed
    #[clap(short, long)]
    pub live: bool,

    /// Export a plot of the lap times to the output folder
    #[clap(long)]
    pub plot: bool,

    // OPTIONS -------------------------------------------------------------------------------------
    /// Set number of simulation runs (only for non-live mode, every run uses its own seed)
    #[clap(short, long, default_value = "1")]
    pub no_sim_runs: u32,

    /// Set path to the simulation parameter file
    #[clap(short, long)]
    pub parfile_path: Option<PathBuf>,

    /// Set path to the track centerline (default: input/tracks/<track name>.csv)
    #[clap(short, long)]
    pub trackfile_path: Option<PathBuf>,

    /// Set real-time factor (only relevant in live mode)
    #[clap(short, long, default_value = "1.0")]
    pub realtime_factor: f64,

    /// Override the seed of the parameter file
    #[clap(short, long)]
    pub seed: Option<u64>,

    /// Number of AI opponents in [0, 5] (default: all cars of the parameter file)
    #[clap(short, long)]
    pub opponents: Option<usize>,

    /// Difficulty of the AI opponents: rookie, amateur, pro or legend
    #[clap(long)]
    pub difficulty: Option<DifficultyPreset>,

    /// Write the telemetry of the (first) run to the given CSV file
    #[clap(long)]
    pub telemetry_path: Option<PathBuf>,
}
