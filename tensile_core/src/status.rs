//! Trial status returned from each capture loop iteration.

use crate::error::TesterError;

/// How a completed pull ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    /// Force rose past the arm threshold and then collapsed: specimen broke.
    Rupture,
    /// The commanded pull distance ran out with the specimen intact.
    FullTravel,
}

/// Public status of a single step of the trial loop.
#[derive(Debug)]
pub enum TrialStatus {
    /// Keep going; still seeking contact or measuring.
    Running,
    /// Capture finished; motor already stopped.
    Complete(TrialOutcome),
    /// Aborted with a typed error; motor has been asked to stop.
    Aborted(TesterError),
}
