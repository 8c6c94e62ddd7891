//! Simulated rig for host-side runs and tests.
//!
//! The axis integrates position from the commanded speed against a `Clock`,
//! so tests driving a deterministic clock get deterministic motion. The
//! switch and load cell can be coupled to the axis position through a
//! shared handle, which is enough to simulate homing and a full pull with
//! a spring-like specimen.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use tensile_traits::clock::{Clock, MonotonicClock};
use tensile_traits::{LimitSwitch, LoadCell, StepDirection, StepperDriver};

/// Shared view of the simulated axis position, in steps.
#[derive(Clone)]
pub struct SimAxisHandle(Rc<Cell<f64>>);

impl SimAxisHandle {
    pub fn position_steps(&self) -> f64 {
        self.0.get()
    }
}

/// Constant-speed kinematic axis model. Acceleration ramps are not
/// simulated; the configured braking margin absorbs the difference.
pub struct SimulatedAxis<C: Clock = MonotonicClock> {
    clock: C,
    pos: Rc<Cell<f64>>,
    target: Cell<Option<f64>>,
    cont_dir: Cell<i8>,
    speed_sps: Cell<f64>,
    last_tick: Cell<Instant>,
}

impl SimulatedAxis<MonotonicClock> {
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl Default for SimulatedAxis<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> SimulatedAxis<C> {
    pub fn with_clock(clock: C) -> Self {
        let now = clock.now();
        Self {
            clock,
            pos: Rc::new(Cell::new(0.0)),
            target: Cell::new(None),
            cont_dir: Cell::new(0),
            speed_sps: Cell::new(1000.0),
            last_tick: Cell::new(now),
        }
    }

    /// Handle for coupling the switch and load cell to this axis.
    pub fn handle(&self) -> SimAxisHandle {
        SimAxisHandle(self.pos.clone())
    }

    /// Integrate motion since the last observation.
    fn advance(&self) {
        let now = self.clock.now();
        let dt = now
            .saturating_duration_since(self.last_tick.get())
            .as_secs_f64();
        self.last_tick.set(now);
        if dt <= 0.0 {
            return;
        }
        let travel = self.speed_sps.get() * dt;
        if let Some(t) = self.target.get() {
            let d = t - self.pos.get();
            if d.abs() <= travel {
                self.pos.set(t);
                self.target.set(None);
            } else {
                self.pos.set(self.pos.get() + travel * d.signum());
            }
        } else {
            let dir = self.cont_dir.get();
            if dir != 0 {
                self.pos.set(self.pos.get() + travel * f64::from(dir));
            }
        }
    }
}

impl<C: Clock> StepperDriver for SimulatedAxis<C> {
    fn move_relative(
        &mut self,
        steps: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.advance();
        self.cont_dir.set(0);
        self.target.set(Some(self.pos.get() + steps as f64));
        Ok(())
    }

    fn move_absolute(
        &mut self,
        steps: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.advance();
        self.cont_dir.set(0);
        self.target.set(Some(steps as f64));
        Ok(())
    }

    fn run_continuous(
        &mut self,
        dir: StepDirection,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.advance();
        self.target.set(None);
        self.cont_dir.set(dir);
        Ok(())
    }

    fn stop_decelerating(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.advance();
        self.target.set(None);
        self.cont_dir.set(0);
        Ok(())
    }

    fn stop_immediate(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.advance();
        self.target.set(None);
        self.cont_dir.set(0);
        Ok(())
    }

    fn set_speed(
        &mut self,
        steps_per_sec: f32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.advance();
        self.speed_sps.set(f64::from(steps_per_sec.max(0.0)));
        Ok(())
    }

    fn set_acceleration(
        &mut self,
        _steps_per_sec2: f32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    fn set_current_position(
        &mut self,
        steps: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.advance();
        self.target.set(None);
        self.pos.set(steps as f64);
        Ok(())
    }

    fn current_position(&self) -> i64 {
        self.advance();
        self.pos.get().round() as i64
    }

    fn is_running(&self) -> bool {
        self.advance();
        self.target.get().is_some() || self.cont_dir.get() != 0
    }

    fn direction(&self) -> StepDirection {
        self.advance();
        if let Some(t) = self.target.get() {
            let d = t - self.pos.get();
            if d > 0.0 {
                1
            } else if d < 0.0 {
                -1
            } else {
                0
            }
        } else {
            self.cont_dir.get()
        }
    }
}

/// Handle to flip a manually-controlled switch from a test.
#[derive(Clone)]
pub struct SwitchHandle(Rc<Cell<bool>>);

impl SwitchHandle {
    pub fn set(&self, active: bool) {
        self.0.set(active);
    }
}

/// Simulated limit switch: manually driven, optionally coupled to the
/// axis so it engages past a position threshold (the physical stop).
pub struct SimulatedSwitch {
    manual: Rc<Cell<bool>>,
    coupling: Option<(SimAxisHandle, f64)>,
}

impl SimulatedSwitch {
    pub fn manual() -> (Self, SwitchHandle) {
        let flag = Rc::new(Cell::new(false));
        (
            Self {
                manual: flag.clone(),
                coupling: None,
            },
            SwitchHandle(flag),
        )
    }

    /// Active whenever the axis position is at or beyond `threshold_steps`.
    pub fn at_position(axis: SimAxisHandle, threshold_steps: f64) -> Self {
        Self {
            manual: Rc::new(Cell::new(false)),
            coupling: Some((axis, threshold_steps)),
        }
    }
}

impl LimitSwitch for SimulatedSwitch {
    fn is_active(&mut self) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        if self.manual.get() {
            return Ok(true);
        }
        if let Some((axis, thr)) = &self.coupling {
            return Ok(axis.position_steps() >= *thr);
        }
        Ok(false)
    }
}

/// Spring-like specimen on a simulated load cell.
///
/// Force is proportional to stretch below the contact position and
/// collapses to zero once it crosses the rupture threshold. Raw counts
/// come out at 1000 counts per kilogram, matching `Calibration::sim()`
/// in the core crate.
pub struct SimulatedLoadCell {
    axis: SimAxisHandle,
    contact_steps: f64,
    kg_per_step: f64,
    rupture_kg: f64,
    ruptured: Cell<bool>,
}

const SIM_COUNTS_PER_KG: f64 = 1000.0;

impl SimulatedLoadCell {
    pub fn new(axis: SimAxisHandle, contact_steps: f64, kg_per_step: f64, rupture_kg: f64) -> Self {
        Self {
            axis,
            contact_steps,
            kg_per_step,
            rupture_kg,
            ruptured: Cell::new(false),
        }
    }

    fn force_kg(&self) -> f64 {
        if self.ruptured.get() {
            return 0.0;
        }
        let stretch = (self.contact_steps - self.axis.position_steps()).max(0.0);
        let force = stretch * self.kg_per_step;
        if force >= self.rupture_kg {
            self.ruptured.set(true);
            tracing::info!(force_kg = force, "simulated specimen ruptured");
            return 0.0;
        }
        force
    }
}

impl LoadCell for SimulatedLoadCell {
    fn read(
        &mut self,
        _timeout: std::time::Duration,
    ) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
        // Pace roughly like a 10 SPS bridge ADC without blocking tests for long.
        std::thread::sleep(std::time::Duration::from_millis(1));
        Ok((self.force_kg() * SIM_COUNTS_PER_KG).round() as i32)
    }
}
