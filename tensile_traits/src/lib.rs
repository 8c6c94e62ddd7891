pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Direction of axis motion in driver-native step space.
/// `1` = step count increasing, `-1` = decreasing, `0` = idle.
pub type StepDirection = i8;

/// Single-axis stepper driver with a trapezoidal motion profile.
///
/// Position queries are infallible snapshots of driver state; motion
/// commands may fail at the hardware boundary.
pub trait StepperDriver {
    /// Queue a relative move of `steps` (driver-native sign).
    fn move_relative(
        &mut self,
        steps: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Queue an absolute move to `steps`.
    fn move_absolute(
        &mut self,
        steps: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Run continuously in `dir` until stopped.
    fn run_continuous(
        &mut self,
        dir: StepDirection,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Ramp down along the acceleration profile and stop.
    fn stop_decelerating(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Halt without ramping. Target is discarded.
    fn stop_immediate(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    fn set_speed(
        &mut self,
        steps_per_sec: f32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    fn set_acceleration(
        &mut self,
        steps_per_sec2: f32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Redefine the current physical position as `steps` without moving.
    fn set_current_position(
        &mut self,
        steps: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Current position in steps.
    fn current_position(&self) -> i64;

    /// True while a queued or continuous move is still executing.
    fn is_running(&self) -> bool;

    /// Instantaneous direction of motion; `0` when idle.
    fn direction(&self) -> StepDirection;
}

/// Digital limit switch input, already conditioned to "active = pressed".
pub trait LimitSwitch {
    fn is_active(&mut self) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
}

/// Load cell producing raw ADC counts.
pub trait LoadCell {
    fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<i32, Box<dyn std::error::Error + Send + Sync>>;
}
