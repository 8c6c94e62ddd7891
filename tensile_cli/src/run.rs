//! Device assembly and the top-level homing / trial sequences.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tensile_core::analyzer::TestAnalyzer;
use tensile_core::error::{AbortReason, Result as CoreResult, TesterError};
use tensile_core::motion::{LimitState, MotionController};
use tensile_core::runner::{RunParams, SamplingMode};
use tensile_core::status::TrialOutcome;
use tensile_core::{AccumulatedPoint, Calibration};
use tensile_traits::clock::{Clock, MonotonicClock};
use tensile_traits::{LimitSwitch, LoadCell, StepperDriver};

use crate::cli::{CliLimits, LAST_LIMITS};

/// Generous cap for homing and manual positioning.
const MOTION_TIMEOUT_MS: u64 = 120_000;
/// Poll interval for the motion wait loops; well under the debounce window.
const POLL: Duration = Duration::from_millis(5);

pub struct TrialReport {
    pub outcomes: Vec<TrialOutcome>,
    pub points: Vec<AccumulatedPoint>,
}

/// Prefer an explicit CSV, then the persisted calibration in the config,
/// then the simulator's nominal model.
pub fn resolve_calibration(
    cfg: &tensile_config::Config,
    csv: Option<&std::path::Path>,
) -> eyre::Result<Calibration> {
    if let Some(path) = csv {
        let fit = tensile_config::load_calibration_csv(path)?;
        tracing::info!(?path, zero = fit.zero_counts, "calibration loaded from CSV");
        return Ok(fit.into());
    }
    if let Some(p) = cfg.calibration {
        return Ok(tensile_config::Calibration::from(p).into());
    }
    tracing::warn!("no calibration provided; using the simulator's nominal model");
    Ok(Calibration::sim())
}

/// Poll the motion state machine until `want` arrives. Limit events that
/// were not asked for abort the wait; so does the E-stop flag.
fn wait_for<D: StepperDriver, S: LimitSwitch>(
    motion: &mut MotionController<D, S>,
    want: LimitState,
    estop: &AtomicBool,
) -> CoreResult<()> {
    let clock = MonotonicClock::new();
    let start = clock.now();
    loop {
        if estop.load(Ordering::Relaxed) {
            motion.emergency_stop()?;
            return Err(TesterError::Abort(AbortReason::Estop).into());
        }
        if let Some(event) = motion.check_limit()? {
            if event == want {
                return Ok(());
            }
            if matches!(event, LimitState::AtMin | LimitState::AtMax) {
                return Err(TesterError::Abort(AbortReason::LimitHit).into());
            }
            return Err(TesterError::State(format!("unexpected motion event: {event:?}")).into());
        }
        if clock.ms_since(start) >= MOTION_TIMEOUT_MS {
            motion.emergency_stop()?;
            return Err(TesterError::Timeout.into());
        }
        clock.sleep(POLL);
    }
}

/// Seek the limit switch, re-reference the axis so the switch sits at
/// `home_mm`, and return to the work origin.
pub fn home_axis<D: StepperDriver, S: LimitSwitch>(
    motion: &mut MotionController<D, S>,
    home_mm: f32,
    estop: &AtomicBool,
) -> CoreResult<()> {
    motion.begin()?;
    if motion.state() == LimitState::AtMax {
        tracing::info!("already resting on the limit switch");
    } else {
        if !motion.jogging(false)? {
            return Err(TesterError::State("homing jog rejected by latched limit".into()).into());
        }
        wait_for_latched(motion, estop)?;
    }
    motion.set_current_position(home_mm)?;
    if !motion.go_home()? {
        return Err(TesterError::State("return from switch rejected".into()).into());
    }
    wait_for(motion, LimitState::MotionComplete, estop)?;
    tracing::info!("homed; crosshead at work origin");
    Ok(())
}

/// Like `wait_for(AtMax)` but a switch hit is the expected outcome.
fn wait_for_latched<D: StepperDriver, S: LimitSwitch>(
    motion: &mut MotionController<D, S>,
    estop: &AtomicBool,
) -> CoreResult<()> {
    let clock = MonotonicClock::new();
    let start = clock.now();
    loop {
        if estop.load(Ordering::Relaxed) {
            motion.emergency_stop()?;
            return Err(TesterError::Abort(AbortReason::Estop).into());
        }
        if let Some(event) = motion.check_limit()? {
            if event == LimitState::AtMax {
                return Ok(());
            }
            return Err(TesterError::State(format!("unexpected motion event: {event:?}")).into());
        }
        if clock.ms_since(start) >= MOTION_TIMEOUT_MS {
            motion.emergency_stop()?;
            return Err(TesterError::Timeout.into());
        }
        clock.sleep(POLL);
    }
}

/// Execute one manual move and wait for it to finish. Returns the final
/// position in logical millimeters.
pub fn manual_move<D: StepperDriver, S: LimitSwitch>(
    motion: &mut MotionController<D, S>,
    to: Option<f32>,
    by: Option<f32>,
    estop: &AtomicBool,
) -> CoreResult<f32> {
    motion.begin()?;
    let accepted = match (to, by) {
        (Some(target), _) => motion.move_to(target)?,
        (None, Some(delta)) => motion.move_by(delta)?,
        (None, None) => {
            return Err(TesterError::State("specify --to or --by".into()).into());
        }
    };
    if !accepted {
        return Err(TesterError::State("move rejected by latched limit".into()).into());
    }
    wait_for(motion, LimitState::MotionComplete, estop)?;
    Ok(motion.position_mm())
}

fn return_to_origin<D: StepperDriver, S: LimitSwitch>(
    motion: &mut MotionController<D, S>,
    estop: &AtomicBool,
) -> CoreResult<()> {
    if !motion.go_home()? {
        return Err(TesterError::State("return to origin rejected by latched limit".into()).into());
    }
    wait_for(motion, LimitState::MotionComplete, estop)
}

fn run_params(
    cfg: &tensile_config::Config,
    calibration: Calibration,
    max_run_ms: Option<u64>,
    mode: SamplingMode,
) -> RunParams {
    let defaults = RunParams::default();
    let params = RunParams {
        calibration,
        sensor_timeout_ms: cfg.hardware.sensor_read_timeout_ms,
        sample_rate_hz: cfg.hardware.sample_rate_hz,
        max_run_ms: max_run_ms.unwrap_or(defaults.max_run_ms),
        mode,
    };
    let _ = LAST_LIMITS.set(CliLimits {
        max_run_ms: params.max_run_ms,
        max_force_kg: cfg.trial.max_force_kg,
        raw_capacity: cfg.trial.raw_capacity,
    });
    params
}

fn estop_check(estop: &Arc<AtomicBool>) -> Option<Box<dyn Fn() -> bool + Send + Sync>> {
    let flag = estop.clone();
    Some(Box::new(move || flag.load(Ordering::Relaxed)))
}

// ── Simulated rig ────────────────────────────────────────────────────────────

#[cfg(not(feature = "hardware"))]
pub mod sim {
    use super::*;
    use tensile_hardware::sim::{
        SimAxisHandle, SimulatedAxis, SimulatedLoadCell, SimulatedSwitch,
    };

    /// Slack before the simulated specimen engages, in millimeters.
    const SLACK_MM: f64 = 5.0;
    /// Spring constant of the simulated specimen, kg per mm of stretch.
    const KG_PER_MM: f64 = 0.5;
    /// Simulated rupture force.
    const RUPTURE_KG: f64 = 5.0;

    type SimMotion = MotionController<SimulatedAxis, SimulatedSwitch>;

    fn build(cfg: &tensile_config::Config) -> CoreResult<(SimMotion, SimAxisHandle)> {
        let motor: tensile_core::MotorCfg = (&cfg.motor).into();
        let home: tensile_core::HomeCfg = (&cfg.home).into();
        let axis = SimulatedAxis::new();
        let handle = axis.handle();
        let switch = SimulatedSwitch::at_position(
            handle.clone(),
            f64::from(home.home_mm) * f64::from(motor.steps_per_mm),
        );
        let motion = MotionController::new(axis, switch, motor, home, (&cfg.limit).into())?;
        Ok((motion, handle))
    }

    pub fn home(cfg: &tensile_config::Config, estop: &AtomicBool) -> CoreResult<()> {
        let (mut motion, _) = build(cfg)?;
        home_axis(&mut motion, cfg.home.home_mm, estop)
    }

    pub fn manual(
        cfg: &tensile_config::Config,
        to: Option<f32>,
        by: Option<f32>,
        estop: &AtomicBool,
    ) -> CoreResult<f32> {
        let (mut motion, _) = build(cfg)?;
        manual_move(&mut motion, to, by, estop)
    }

    pub fn self_check(cfg: &tensile_config::Config) -> CoreResult<()> {
        let (mut motion, handle) = build(cfg)?;
        motion.begin()?;
        motion.check_limit()?;
        let mut cell = SimulatedLoadCell::new(handle, 0.0, 0.0, f64::from(cfg.trial.max_force_kg));
        let raw = cell
            .read(Duration::from_millis(cfg.hardware.sensor_read_timeout_ms))
            .map_err(|e| TesterError::Hardware(e.to_string()))?;
        tracing::info!(raw, "simulated rig responding");
        Ok(())
    }

    pub fn run_trials(
        cfg: &tensile_config::Config,
        calibration: Calibration,
        trials: u32,
        max_run_ms: Option<u64>,
        estop: &Arc<AtomicBool>,
    ) -> CoreResult<TrialReport> {
        let trial: tensile_core::TrialCfg = (&cfg.trial).into();
        let grid: tensile_core::GridCfg = (&cfg.grid).into();
        // The simulator is not Send, so it always runs the direct loop.
        let params = run_params(cfg, calibration, max_run_ms, SamplingMode::Direct);

        let (mut motion, handle) = build(cfg)?;
        let spm = f64::from(motion.motor_cfg().steps_per_mm);
        let mut analyzer = TestAnalyzer::new(grid, trial.raw_capacity);

        home_axis(&mut motion, cfg.home.home_mm, estop)?;

        let mut outcomes = Vec::with_capacity(trials as usize);
        for i in 0..trials {
            // Fresh specimen: slack, then a linear spring up to rupture.
            let cell = SimulatedLoadCell::new(
                handle.clone(),
                -SLACK_MM * spm,
                KG_PER_MM / spm,
                RUPTURE_KG,
            );
            let (outcome, mut back) = tensile_core::runner::run_trial_direct(
                motion,
                cell,
                &mut analyzer,
                trial.clone(),
                params.clone(),
                estop_check(estop),
            )?;
            tracing::info!(trial = i, ?outcome, samples = analyzer.raw_len(), "trial finished");
            analyzer
                .add_trial(i)
                .map_err(|e| TesterError::State(e.to_string()))?;
            return_to_origin(&mut back, estop)?;
            motion = back;
            outcomes.push(outcome);
        }
        Ok(TrialReport {
            outcomes,
            points: analyzer.points().to_vec(),
        })
    }
}

// ── Raspberry Pi rig ─────────────────────────────────────────────────────────

#[cfg(feature = "hardware")]
pub mod hw {
    use super::*;
    use tensile_hardware::gpio::{GpioLimitSwitch, GpioStepperDriver, Hx711LoadCell};

    /// HX711 gain pulses: 25 selects channel A, gain 128.
    const HX711_GAIN_PULSES: u8 = 25;

    type HwMotion = MotionController<GpioStepperDriver, GpioLimitSwitch>;

    fn build(cfg: &tensile_config::Config) -> CoreResult<HwMotion> {
        let driver = GpioStepperDriver::new(
            cfg.pins.motor_step,
            cfg.pins.motor_dir,
            cfg.pins.motor_en,
        )
        .map_err(|e| TesterError::Hardware(e.to_string()))?;
        // Normally-closed switch to ground with pull-up: active low.
        let switch = GpioLimitSwitch::new(cfg.pins.limit_in, true)
            .map_err(|e| TesterError::Hardware(e.to_string()))?;
        Ok(MotionController::new(
            driver,
            switch,
            (&cfg.motor).into(),
            (&cfg.home).into(),
            (&cfg.limit).into(),
        )?)
    }

    fn open_cell(cfg: &tensile_config::Config) -> CoreResult<Hx711LoadCell> {
        Hx711LoadCell::new(cfg.pins.hx711_dt, cfg.pins.hx711_sck, HX711_GAIN_PULSES)
            .map_err(|e| TesterError::Hardware(e.to_string()).into())
    }

    pub fn home(cfg: &tensile_config::Config, estop: &AtomicBool) -> CoreResult<()> {
        let mut motion = build(cfg)?;
        home_axis(&mut motion, cfg.home.home_mm, estop)
    }

    pub fn manual(
        cfg: &tensile_config::Config,
        to: Option<f32>,
        by: Option<f32>,
        estop: &AtomicBool,
    ) -> CoreResult<f32> {
        let mut motion = build(cfg)?;
        manual_move(&mut motion, to, by, estop)
    }

    pub fn self_check(cfg: &tensile_config::Config) -> CoreResult<()> {
        let mut motion = build(cfg)?;
        motion.begin()?;
        motion.check_limit()?;
        let mut cell = open_cell(cfg)?;
        let raw = cell
            .read(Duration::from_millis(cfg.hardware.sensor_read_timeout_ms))
            .map_err(|e| TesterError::Hardware(e.to_string()))?;
        tracing::info!(raw, "hardware responding");
        Ok(())
    }

    pub fn run_trials(
        cfg: &tensile_config::Config,
        calibration: Calibration,
        trials: u32,
        max_run_ms: Option<u64>,
        direct: bool,
        estop: &Arc<AtomicBool>,
    ) -> CoreResult<TrialReport> {
        let trial: tensile_core::TrialCfg = (&cfg.trial).into();
        let grid: tensile_core::GridCfg = (&cfg.grid).into();
        let mode = if direct {
            SamplingMode::Direct
        } else {
            SamplingMode::Event
        };
        let params = run_params(cfg, calibration, max_run_ms, mode);

        let mut motion = build(cfg)?;
        let mut analyzer = TestAnalyzer::new(grid, trial.raw_capacity);

        home_axis(&mut motion, cfg.home.home_mm, estop)?;

        let mut outcomes = Vec::with_capacity(trials as usize);
        for i in 0..trials {
            // The cell moves into the sampler thread; reopen it per trial.
            let cell = open_cell(cfg)?;
            let (outcome, mut back) = tensile_core::runner::run_trial(
                motion,
                cell,
                &mut analyzer,
                trial.clone(),
                params.clone(),
                estop_check(estop),
            )?;
            tracing::info!(trial = i, ?outcome, samples = analyzer.raw_len(), "trial finished");
            analyzer
                .add_trial(i)
                .map_err(|e| TesterError::State(e.to_string()))?;
            return_to_origin(&mut back, estop)?;
            motion = back;
            outcomes.push(outcome);
        }
        Ok(TrialReport {
            outcomes,
            points: analyzer.points().to_vec(),
        })
    }
}
