//! Error taxonomy for the tensile tester, plus the mapping from the
//! `Box<dyn Error>` values crossing the `tensile_traits` boundary into the
//! typed enums used here.

use thiserror::Error;

/// Why a trial run stopped before producing a usable capture.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("emergency stop")]
    Estop,
    #[error("raw capture buffer exhausted")]
    BufferFull,
    #[error("force approached load-cell rating")]
    MaxForce,
    #[error("pull finished without specimen contact")]
    NoContact,
    #[error("travel limit reached mid-trial")]
    LimitHit,
    #[error("max run time exceeded")]
    MaxRuntime,
}

#[derive(Debug, Error, Clone)]
pub enum TesterError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("timeout waiting for sensor")]
    Timeout,
    #[error("invalid state: {0}")]
    State(String),
    #[error("trial aborted: {0}")]
    Abort(AbortReason),
}

/// Accumulation-stage failures; the capture buffer itself is append-only
/// and reports exhaustion via `TestAnalyzer::add_point`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerError {
    #[error("trial timestamps must be strictly increasing")]
    NonMonotonicTime,
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

/// Map a trait-boundary error to a typed `TesterError`.
///
/// With the `hardware-errors` feature the known backend error type is
/// downcast for a precise mapping; otherwise a string heuristic decides
/// between a timeout and a generic hardware error.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> TesterError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<tensile_hardware::error::HwError>() {
            return match hw {
                tensile_hardware::error::HwError::Timeout => TesterError::Timeout,
                tensile_hardware::error::HwError::DataReadyTimeout => TesterError::Timeout,
                other => TesterError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        TesterError::Timeout
    } else {
        TesterError::Hardware(s)
    }
}
