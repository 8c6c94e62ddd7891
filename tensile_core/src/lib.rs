#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core tensile-tester logic (hardware-agnostic).
//!
//! All hardware interactions go through the `tensile_traits` capability
//! traits (`StepperDriver`, `LimitSwitch`, `LoadCell`).
//!
//! ## Architecture
//!
//! - **Motion**: debounced limit switch, soft travel envelope, move
//!   validation (`motion` module)
//! - **Analysis**: rupture alignment and cross-trial accumulation
//!   (`analyzer` module)
//! - **Capture**: trial state machine from contact to rupture (`session`)
//! - **Sampling**: background load-cell reader (`sampler`)
//! - **Orchestration**: the polling loop with watchdogs (`runner`)
//! - **Calibration**: linear counts→kg model (`calibration`)

pub mod analyzer;
pub mod calibration;
pub mod config;
pub mod conversions;
pub mod error;
pub mod mocks;
pub mod motion;
pub mod runner;
pub mod sampler;
pub mod session;
pub mod status;
pub mod util;

pub use analyzer::{AccumulatedPoint, Sample, TestAnalyzer};
pub use calibration::Calibration;
pub use config::{GridCfg, HomeCfg, LimitCfg, MotorCfg, TrialCfg};
pub use error::{AbortReason, AnalyzerError, TesterError};
pub use motion::{LimitState, MotionController};
pub use session::TrialSession;
pub use status::{TrialOutcome, TrialStatus};
