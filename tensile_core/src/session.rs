//! Trial capture state machine.
//!
//! A session owns the `MotionController` for the duration of one pull:
//! it queues the pull at the trial speed, waits for specimen contact
//! (the trigger force), zeroes position and time at contact, records
//! samples into the analyzer's raw buffer at the capture period, and
//! stops on rupture, full travel, a limit, the load-cell rating, or
//! buffer exhaustion. The cruise profile is restored on every exit path.

use std::sync::Arc;
use std::time::Instant;

use tensile_traits::clock::{Clock, MonotonicClock};
use tensile_traits::{LimitSwitch, StepperDriver};

use crate::analyzer::TestAnalyzer;
use crate::config::{MotorCfg, TrialCfg};
use crate::error::{AbortReason, Result, TesterError};
use crate::motion::{LimitState, MotionController};
use crate::status::{TrialOutcome, TrialStatus};
use crate::util::ms_to_i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Seeking,
    Measuring,
    Done,
}

pub struct TrialSession<D: StepperDriver, S: LimitSwitch> {
    motion: MotionController<D, S>,
    cfg: TrialCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    cruise: MotorCfg,
    phase: Phase,
    zero_pos_mm: f32,
    zero_epoch: Instant,
    armed: bool,
    last_sample: Option<Instant>,
}

impl<D: StepperDriver, S: LimitSwitch> TrialSession<D, S> {
    pub fn new(motion: MotionController<D, S>, cfg: TrialCfg) -> Self {
        Self::with_clock(motion, cfg, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        motion: MotionController<D, S>,
        cfg: TrialCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let zero_epoch = clock.now();
        let cruise = motion.motor_cfg();
        Self {
            motion,
            cfg,
            clock,
            cruise,
            phase: Phase::Idle,
            zero_pos_mm: 0.0,
            zero_epoch,
            armed: false,
            last_sample: None,
        }
    }

    /// Arm the controller and queue the pull (away from the switch) at the
    /// trial speed. Fails if a latched limit rejects the move.
    pub fn begin(&mut self, analyzer: &mut TestAnalyzer) -> Result<()> {
        self.cruise = self.motion.motor_cfg();
        let mut pull = self.cruise;
        pull.speed_mm_s = self.cfg.speed_mm_s;
        self.motion.set_config_motor(pull)?;
        self.motion.begin()?;
        analyzer.clear_data();

        if !self.motion.move_by(-self.cfg.pull_mm)? {
            self.restore_profile()?;
            return Err(TesterError::State("pull rejected by latched limit".into()).into());
        }
        self.phase = Phase::Seeking;
        self.armed = false;
        self.last_sample = None;
        tracing::info!(
            pull_mm = self.cfg.pull_mm,
            speed_mm_s = self.cfg.speed_mm_s,
            "trial started"
        );
        Ok(())
    }

    /// Advance the capture loop with the latest calibrated force reading.
    pub fn step_from_force(
        &mut self,
        analyzer: &mut TestAnalyzer,
        force_kg: f32,
    ) -> Result<TrialStatus> {
        let event = self.motion.check_limit()?;

        match self.phase {
            Phase::Idle | Phase::Done => Ok(TrialStatus::Aborted(TesterError::State(
                "step outside an active trial".into(),
            ))),
            Phase::Seeking => self.step_seeking(analyzer, force_kg, event),
            Phase::Measuring => self.step_measuring(analyzer, force_kg, event),
        }
    }

    fn step_seeking(
        &mut self,
        analyzer: &mut TestAnalyzer,
        force_kg: f32,
        event: Option<LimitState>,
    ) -> Result<TrialStatus> {
        if force_kg >= self.cfg.trigger_kg {
            self.zero_pos_mm = self.motion.position_mm();
            self.zero_epoch = self.clock.now();
            analyzer.clear_data();
            self.phase = Phase::Measuring;
            self.last_sample = None;
            tracing::info!(
                pos_mm = self.zero_pos_mm,
                force_kg,
                "specimen contact, capture armed"
            );
            return Ok(TrialStatus::Running);
        }

        match event {
            Some(LimitState::MotionComplete) => {
                self.finish()?;
                tracing::warn!("pull finished before specimen contact");
                Ok(TrialStatus::Aborted(TesterError::Abort(
                    AbortReason::NoContact,
                )))
            }
            Some(LimitState::AtMin) | Some(LimitState::AtMax) => {
                self.finish()?;
                Ok(TrialStatus::Aborted(TesterError::Abort(
                    AbortReason::LimitHit,
                )))
            }
            _ => Ok(TrialStatus::Running),
        }
    }

    fn step_measuring(
        &mut self,
        analyzer: &mut TestAnalyzer,
        force_kg: f32,
        event: Option<LimitState>,
    ) -> Result<TrialStatus> {
        if force_kg > self.cfg.arm_kg {
            self.armed = true;
        }

        let due = match self.last_sample {
            None => true,
            Some(t) => self.clock.ms_since(t) >= self.cfg.sample_period_ms,
        };
        if due {
            let time_ms = ms_to_i32(self.clock.ms_since(self.zero_epoch));
            let distance_mm = self.zero_pos_mm - self.motion.position_mm();
            if !analyzer.add_point(distance_mm, force_kg, time_ms) {
                self.motion.stop()?;
                self.finish()?;
                tracing::error!(capacity = analyzer.raw_len(), "capture buffer exhausted");
                return Ok(TrialStatus::Aborted(TesterError::Abort(
                    AbortReason::BufferFull,
                )));
            }
            self.last_sample = Some(self.clock.now());
        }

        if force_kg >= self.cfg.max_force_kg - self.cfg.max_force_margin_kg {
            self.motion.emergency_stop()?;
            self.finish()?;
            tracing::error!(force_kg, rating_kg = self.cfg.max_force_kg, "force near rating");
            return Ok(TrialStatus::Aborted(TesterError::Abort(
                AbortReason::MaxForce,
            )));
        }

        if self.armed && force_kg < self.cfg.drop_kg {
            self.motion.stop()?;
            self.finish()?;
            tracing::info!(force_kg, "rupture detected");
            return Ok(TrialStatus::Complete(TrialOutcome::Rupture));
        }

        match event {
            Some(LimitState::MotionComplete) => {
                self.finish()?;
                tracing::info!("pull distance exhausted, specimen intact");
                Ok(TrialStatus::Complete(TrialOutcome::FullTravel))
            }
            Some(LimitState::AtMin) | Some(LimitState::AtMax) => {
                self.finish()?;
                Ok(TrialStatus::Aborted(TesterError::Abort(
                    AbortReason::LimitHit,
                )))
            }
            _ => Ok(TrialStatus::Running),
        }
    }

    /// Hard-stop the axis and close the session; used for external aborts
    /// such as an operator emergency stop.
    pub fn abort(&mut self) -> Result<()> {
        self.motion.emergency_stop()?;
        self.finish()
    }

    fn restore_profile(&mut self) -> Result<()> {
        self.motion.set_config_motor(self.cruise)
    }

    fn finish(&mut self) -> Result<()> {
        self.phase = Phase::Done;
        self.restore_profile()
    }

    pub fn motion_mut(&mut self) -> &mut MotionController<D, S> {
        &mut self.motion
    }

    /// Hand the motion controller back once the trial is over.
    pub fn into_motion(self) -> MotionController<D, S> {
        self.motion
    }
}
