//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();
/// Effective limits used for the current run (for JSON error details).
pub static LAST_LIMITS: OnceLock<CliLimits> = OnceLock::new();

#[derive(Copy, Clone, Debug)]
pub struct CliLimits {
    pub max_run_ms: u64,
    pub max_force_kg: f32,
    pub raw_capacity: usize,
}

#[derive(Parser, Debug)]
#[command(name = "tensile", version, about = "Tensile tester CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/tensile_config.toml")]
    pub config: PathBuf,

    /// Optional calibration CSV (strict header)
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Home the crosshead: seek the limit switch, re-reference, return to
    /// the work origin
    Home,
    /// Manual positioning in logical millimeters (origin 0, positive toward
    /// the switch)
    Move {
        /// Absolute target position
        #[arg(long, value_name = "MM", conflicts_with = "by")]
        to: Option<f32>,
        /// Relative move
        #[arg(long, value_name = "MM")]
        by: Option<f32>,
    },
    /// Run pull-to-rupture trials and print the accumulated curve
    Run {
        /// Number of trials to fold into the statistics
        #[arg(long, default_value_t = 1)]
        trials: u32,
        /// Override safety: max run time per trial in ms (takes precedence
        /// over the built-in cap)
        #[arg(long, value_name = "MS")]
        max_run_ms: Option<u64>,
        /// Use the direct control loop (read the load cell inside the trial
        /// loop instead of a sampler thread)
        #[arg(long, action = ArgAction::SetTrue)]
        direct: bool,
    },
    /// Quick health check (hardware presence / sim ok)
    SelfCheck,
}
