//! Motion safety state machine for the single-axis crosshead.
//!
//! Owns the stepper driver and the limit switch, and is the only code that
//! commands motion. All positions at this interface are logical millimeters:
//! the work origin is 0, the limit switch sits at `home_mm`, and positive
//! motion runs toward the switch regardless of wiring (`invert_axis` folds
//! the wiring sense into the step conversion).
//!
//! `check_limit()` is the polling entry point; it debounces the switch,
//! enforces the soft travel envelope, and reports at most one event per
//! call. Limit events always dispatch before motion-complete.

use std::sync::Arc;
use std::time::Instant;

use tensile_traits::clock::{Clock, MonotonicClock};
use tensile_traits::{LimitSwitch, StepperDriver};

use crate::config::{HomeCfg, LimitCfg, MotorCfg};
use crate::error::{Result, map_hw_error};

/// Which boundary condition is latched, if any.
///
/// `AtMax` is the switch end (positive travel); `AtMin` is the soft
/// far-travel bound. `MotionComplete` is only ever returned from
/// `check_limit`, never latched: the stored state goes back to `None`
/// once a finished move has been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitState {
    None,
    AtMax,
    AtMin,
    MotionComplete,
}

pub struct MotionController<D: StepperDriver, S: LimitSwitch> {
    driver: D,
    switch: S,
    clock: Arc<dyn Clock + Send + Sync>,
    motor: MotorCfg,
    home: HomeCfg,
    debounce_ms: u64,

    // Derived from the motor profile; recomputed on config change.
    braking_mm: f32,
    half_step_mm: f32,

    // Debounce state: raw level, committed stable level, last raw flip.
    raw: bool,
    committed: bool,
    last_change: Instant,

    state: LimitState,
    limit_pending: bool,
    motion_pending: bool,
    soft_limit_enabled: bool,
}

impl<D: StepperDriver, S: LimitSwitch> std::fmt::Debug for MotionController<D, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionController")
            .field("debounce_ms", &self.debounce_ms)
            .field("braking_mm", &self.braking_mm)
            .field("half_step_mm", &self.half_step_mm)
            .field("raw", &self.raw)
            .field("committed", &self.committed)
            .field("last_change", &self.last_change)
            .field("state", &self.state)
            .field("limit_pending", &self.limit_pending)
            .field("motion_pending", &self.motion_pending)
            .field("soft_limit_enabled", &self.soft_limit_enabled)
            .finish_non_exhaustive()
    }
}

impl<D: StepperDriver, S: LimitSwitch> MotionController<D, S> {
    pub fn new(driver: D, switch: S, motor: MotorCfg, home: HomeCfg, limit: LimitCfg) -> Result<Self> {
        Self::with_clock(driver, switch, motor, home, limit, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        driver: D,
        switch: S,
        motor: MotorCfg,
        home: HomeCfg,
        limit: LimitCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<Self> {
        let now = clock.now();
        let mut mc = Self {
            driver,
            switch,
            clock,
            motor,
            home,
            debounce_ms: limit.debounce_ms,
            braking_mm: 0.0,
            half_step_mm: 0.0,
            raw: false,
            committed: false,
            last_change: now,
            state: LimitState::None,
            limit_pending: false,
            motion_pending: false,
            soft_limit_enabled: true,
        };
        mc.apply_motor_cfg()?;
        Ok(mc)
    }

    /// Replace the motion profile and push it to the driver.
    pub fn set_config_motor(&mut self, motor: MotorCfg) -> Result<()> {
        self.motor = motor;
        self.apply_motor_cfg()
    }

    pub fn set_config_home(&mut self, home: HomeCfg) {
        self.home = home;
    }

    pub fn motor_cfg(&self) -> MotorCfg {
        self.motor
    }

    fn apply_motor_cfg(&mut self) -> Result<()> {
        let spm = self.motor.steps_per_mm;
        self.driver
            .set_speed(self.motor.speed_mm_s * spm)
            .map_err(|e| map_hw_error(e.as_ref()))?;
        self.driver
            .set_acceleration(self.motor.accel_mm_s2 * spm)
            .map_err(|e| map_hw_error(e.as_ref()))?;
        // Worst-case stopping distance from cruise speed, plus margin.
        self.braking_mm = self.motor.speed_mm_s * self.motor.speed_mm_s
            / (2.0 * self.motor.accel_mm_s2)
            + self.home.braking_margin_mm;
        self.half_step_mm = 0.5 / spm;
        Ok(())
    }

    /// Prime the debouncer from the live switch reading. If the switch is
    /// already pressed at startup the switch-end limit latches immediately,
    /// so the only valid first move is away from it.
    pub fn begin(&mut self) -> Result<()> {
        let raw = self.read_switch()?;
        self.raw = raw;
        self.committed = raw;
        self.last_change = self.clock.now();
        self.limit_pending = false;
        self.motion_pending = false;
        self.soft_limit_enabled = true;
        self.state = if raw { LimitState::AtMax } else { LimitState::None };
        tracing::debug!(switch_active = raw, "motion controller armed");
        Ok(())
    }

    fn read_switch(&mut self) -> Result<bool> {
        self.switch
            .is_active()
            .map_err(|e| map_hw_error(e.as_ref()).into())
    }

    #[inline]
    fn sign(&self) -> f32 {
        if self.motor.invert_axis { -1.0 } else { 1.0 }
    }

    #[inline]
    fn mm_to_steps(&self, mm: f32) -> i64 {
        (mm * self.motor.steps_per_mm * self.sign()).round() as i64
    }

    /// Current crosshead position in logical millimeters.
    pub fn position_mm(&self) -> f32 {
        self.driver.current_position() as f32 * self.sign() / self.motor.steps_per_mm
    }

    /// Instantaneous logical direction: +1 toward the switch, -1 away, 0 idle.
    fn logical_dir(&self) -> i8 {
        let d = self.driver.direction();
        if self.motor.invert_axis { -d } else { d }
    }

    #[inline]
    fn soft_min_mm(&self) -> f32 {
        self.home.home_mm - self.home.max_travel_mm + self.braking_mm
    }

    #[inline]
    fn soft_max_mm(&self) -> f32 {
        self.home.home_mm - self.braking_mm - self.half_step_mm
    }

    pub fn state(&self) -> LimitState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.driver.is_running()
    }

    /// Whether a move starting in `dir` (+1 toward the switch) is allowed
    /// under the latched limit.
    fn is_valid_direction(&self, dir: i8) -> bool {
        match self.state {
            LimitState::AtMax => dir <= 0,
            LimitState::AtMin => dir >= 0,
            _ => true,
        }
    }

    /// Queue a relative move. `Ok(false)` means the move was rejected by the
    /// latched limit and nothing changed.
    pub fn move_by(&mut self, delta_mm: f32) -> Result<bool> {
        let dir: i8 = if delta_mm > 0.0 {
            1
        } else if delta_mm < 0.0 {
            -1
        } else {
            0
        };
        if !self.is_valid_direction(dir) {
            tracing::warn!(delta_mm, state = ?self.state, "move rejected by limit");
            return Ok(false);
        }
        self.driver
            .move_relative(self.mm_to_steps(delta_mm))
            .map_err(|e| map_hw_error(e.as_ref()))?;
        self.after_accepted_move();
        tracing::debug!(delta_mm, "relative move queued");
        Ok(true)
    }

    /// Queue an absolute move to `target_mm` (logical millimeters).
    pub fn move_to(&mut self, target_mm: f32) -> Result<bool> {
        let delta = target_mm - self.position_mm();
        let dir: i8 = if delta > 0.0 {
            1
        } else if delta < 0.0 {
            -1
        } else {
            0
        };
        if !self.is_valid_direction(dir) {
            tracing::warn!(target_mm, state = ?self.state, "move rejected by limit");
            return Ok(false);
        }
        self.driver
            .move_absolute(self.mm_to_steps(target_mm))
            .map_err(|e| map_hw_error(e.as_ref()))?;
        self.after_accepted_move();
        tracing::debug!(target_mm, "absolute move queued");
        Ok(true)
    }

    fn after_accepted_move(&mut self) {
        self.motion_pending = true;
        self.limit_pending = false;
        self.soft_limit_enabled = true;
        self.state = LimitState::None;
    }

    /// Move to the work origin.
    pub fn go_home(&mut self) -> Result<bool> {
        self.move_to(0.0)
    }

    /// Run continuously toward the switch. With `use_soft_limit` false the
    /// soft switch-end bound is ignored so the physical switch itself ends
    /// the motion; that is how homing seeks the switch.
    pub fn jogging(&mut self, use_soft_limit: bool) -> Result<bool> {
        if !self.is_valid_direction(1) {
            tracing::warn!(state = ?self.state, "jog rejected by limit");
            return Ok(false);
        }
        let dir: i8 = if self.motor.invert_axis { -1 } else { 1 };
        self.driver
            .run_continuous(dir)
            .map_err(|e| map_hw_error(e.as_ref()))?;
        self.soft_limit_enabled = use_soft_limit;
        // Continuous motion has no target, so no completion event is owed.
        self.motion_pending = false;
        self.limit_pending = false;
        self.state = LimitState::None;
        Ok(true)
    }

    /// Redefine the current physical position as `mm` without moving.
    pub fn set_current_position(&mut self, mm: f32) -> Result<()> {
        self.driver
            .set_current_position(self.mm_to_steps(mm))
            .map_err(|e| map_hw_error(e.as_ref()).into())
    }

    /// Shift the home reference and make the current position the new origin.
    pub fn set_home(&mut self, home_mm: f32) -> Result<()> {
        self.home.home_mm = home_mm;
        self.set_current_position(0.0)
    }

    /// Decelerated stop; discards any owed completion event.
    pub fn stop(&mut self) -> Result<()> {
        self.driver
            .stop_decelerating()
            .map_err(|e| map_hw_error(e.as_ref()))?;
        self.motion_pending = false;
        Ok(())
    }

    /// Immediate hard stop. Valid in every state, never rejected.
    pub fn emergency_stop(&mut self) -> Result<()> {
        self.driver
            .stop_immediate()
            .map_err(|e| map_hw_error(e.as_ref()))?;
        self.motion_pending = false;
        tracing::warn!(pos_mm = self.position_mm(), "emergency stop");
        Ok(())
    }

    /// Poll the safety state machine. Call at least twice per debounce
    /// window. Returns at most one event: a latched limit once the axis has
    /// stopped, or `MotionComplete` once a queued move finishes cleanly.
    pub fn check_limit(&mut self) -> Result<Option<LimitState>> {
        let raw = self.read_switch()?;
        if raw != self.raw {
            self.raw = raw;
            self.last_change = self.clock.now();
        }

        // Commit the raw level only after it held for the full window.
        if self.committed != raw && self.clock.ms_since(self.last_change) >= self.debounce_ms {
            self.committed = raw;
            if raw {
                tracing::warn!(pos_mm = self.position_mm(), "limit switch engaged");
                if self.logical_dir() > 0 {
                    // Heading into the switch: hard stop, the move is void.
                    self.driver
                        .stop_immediate()
                        .map_err(|e| map_hw_error(e.as_ref()))?;
                    self.motion_pending = false;
                }
                self.state = LimitState::AtMax;
                self.limit_pending = true;
            } else if self.state == LimitState::AtMax && !self.limit_pending {
                // Switch released after the event was delivered.
                self.state = LimitState::None;
            }
        }

        if self.driver.is_running() {
            let pos = self.position_mm();
            let dir = self.logical_dir();
            if dir < 0 && pos <= self.soft_min_mm() {
                tracing::warn!(pos_mm = pos, "far travel bound reached");
                self.driver
                    .stop_decelerating()
                    .map_err(|e| map_hw_error(e.as_ref()))?;
                self.state = LimitState::AtMin;
                self.limit_pending = true;
                self.motion_pending = false;
            } else if dir > 0 && self.soft_limit_enabled && pos >= self.soft_max_mm() {
                tracing::warn!(pos_mm = pos, "switch-side soft bound reached");
                self.driver
                    .stop_decelerating()
                    .map_err(|e| map_hw_error(e.as_ref()))?;
                self.state = LimitState::AtMax;
                self.limit_pending = true;
                self.motion_pending = false;
            }
        } else {
            // Dispatch once the axis is at rest; limits win over completion.
            if self.limit_pending {
                self.limit_pending = false;
                return Ok(Some(self.state));
            }
            if self.motion_pending {
                self.motion_pending = false;
                return Ok(Some(LimitState::MotionComplete));
            }
        }

        Ok(None)
    }

    /// Tear down into the owned driver and switch.
    pub fn into_parts(self) -> (D, S) {
        (self.driver, self.switch)
    }
}
