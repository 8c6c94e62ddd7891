use std::time::Duration;

use tensile_traits::clock::MonotonicClock;
use tensile_traits::{LimitSwitch, LoadCell, StepperDriver};

use crate::analyzer::TestAnalyzer;
use crate::calibration::Calibration;
use crate::config::TrialCfg;
use crate::error::{AbortReason, Result as CoreResult, TesterError, map_hw_error};
use crate::motion::MotionController;
use crate::sampler::Sampler;
use crate::session::TrialSession;
use crate::status::{TrialOutcome, TrialStatus};

/// How sampling should be orchestrated
#[derive(Debug, Clone, Copy)]
pub enum SamplingMode {
    /// Read inside the trial loop using LoadCell::read(timeout)
    Direct,
    /// Event-driven: block on sensor DRDY via LoadCell::read(timeout)
    Event,
    /// Rate-paced sampling at given Hz
    Paced(u32),
}

/// Orchestration knobs shared by all sampling modes.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub calibration: Calibration,
    /// Per-read sensor timeout (ms).
    pub sensor_timeout_ms: u64,
    /// Load-cell sample rate (Hz); paces the loop when no sample is ready.
    pub sample_rate_hz: u32,
    /// Hard cap on one trial's runtime (ms).
    pub max_run_ms: u64,
    pub mode: SamplingMode,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            calibration: Calibration::sim(),
            sensor_timeout_ms: 150,
            sample_rate_hz: 10,
            max_run_ms: 600_000,
            mode: SamplingMode::Paced(10),
        }
    }
}

/// Compute the stall watchdog threshold in milliseconds.
///
/// Starts from a fast threshold derived from the per-read sensor timeout
/// (4x, for prompt detection), widens it to at least two sampling periods
/// so one missed sample cannot trip it, and always keeps it strictly below
/// `max_run_ms` so the watchdog can fire before the hard cap.
#[inline]
fn compute_stall_threshold_ms(sensor_timeout_ms: u64, period_ms: u64, max_run_ms: u64) -> u64 {
    debug_assert!((1..=crate::util::MILLIS_PER_SEC).contains(&period_ms));

    let fast = fast_threshold_ms(sensor_timeout_ms);
    let two_p = two_periods_ms(period_ms);

    if max_run_ms < two_p {
        return cap_below_max_run(fast, max_run_ms);
    }

    let safe = std::cmp::max(fast, two_p);
    cap_below_max_run(safe, max_run_ms)
}

/// Derive a quick stall threshold from per-read sensor timeout.
#[inline]
fn fast_threshold_ms(sensor_timeout_ms: u64) -> u64 {
    sensor_timeout_ms.saturating_mul(4)
}

/// Ensure the stall threshold spans at least two periods to tolerate one miss.
#[inline]
fn two_periods_ms(period_ms: u64) -> u64 {
    period_ms.saturating_mul(2)
}

/// Cap a threshold to be strictly below `max_run_ms` and at least 1ms.
#[inline]
fn cap_below_max_run(threshold: u64, max_run_ms: u64) -> u64 {
    threshold.min(max_run_ms.saturating_sub(1)).max(1)
}

#[inline]
fn stalled_now(elapsed_ms: u64, stalled_ms: u64, threshold_ms: u64) -> bool {
    elapsed_ms >= threshold_ms && stalled_ms > threshold_ms
}

/// Run one trial to completion, returning the outcome and handing the
/// motion controller back for the next command. The accumulated statistics
/// live in `analyzer` and survive across calls; fold the capture with
/// `analyzer.add_trial(..)` afterwards.
pub fn run_trial<D, S, L>(
    motion: MotionController<D, S>,
    cell: L,
    analyzer: &mut TestAnalyzer,
    trial: TrialCfg,
    params: RunParams,
    estop_check: Option<Box<dyn Fn() -> bool + Send + Sync>>,
) -> CoreResult<(TrialOutcome, MotionController<D, S>)>
where
    D: StepperDriver,
    S: LimitSwitch,
    L: LoadCell + Send + 'static,
{
    match params.mode {
        SamplingMode::Direct => run_trial_direct(motion, cell, analyzer, trial, params, estop_check),
        SamplingMode::Event | SamplingMode::Paced(_) => {
            run_with_sampler(motion, cell, analyzer, trial, params, estop_check)
        }
    }
}

/// Direct-mode trial loop: reads the load cell inline, so `L` does not
/// have to be `Send`. The simulated rig (which is not `Send`) runs here.
pub fn run_trial_direct<D, S, L>(
    motion: MotionController<D, S>,
    mut cell: L,
    analyzer: &mut TestAnalyzer,
    trial: TrialCfg,
    params: RunParams,
    estop_check: Option<Box<dyn Fn() -> bool + Send + Sync>>,
) -> CoreResult<(TrialOutcome, MotionController<D, S>)>
where
    D: StepperDriver,
    S: LimitSwitch,
    L: LoadCell,
{
    let mut session = TrialSession::new(motion, trial);
    session.begin(analyzer)?;
    tracing::info!(mode = "direct", "trial loop start");

    let timeout = Duration::from_millis(params.sensor_timeout_ms);
    let start = std::time::Instant::now();
    loop {
        if estop_triggered(&estop_check) {
            session.abort()?;
            return Err(TesterError::Abort(AbortReason::Estop).into());
        }
        if elapsed_ms(start) >= params.max_run_ms {
            session.abort()?;
            return Err(TesterError::Abort(AbortReason::MaxRuntime).into());
        }

        let raw = match cell.read(timeout) {
            Ok(v) => v,
            Err(e) => {
                let mapped = map_hw_error(e.as_ref());
                session.abort()?;
                return Err(mapped.into());
            }
        };
        let force_kg = params.calibration.to_kg(raw);
        match session.step_from_force(analyzer, force_kg)? {
            TrialStatus::Running => continue,
            TrialStatus::Complete(outcome) => {
                tracing::info!(?outcome, samples = analyzer.raw_len(), "trial complete");
                return Ok((outcome, session.into_motion()));
            }
            TrialStatus::Aborted(e) => {
                tracing::error!(error = %e, "trial aborted");
                return Err(e.into());
            }
        }
    }
}

fn run_with_sampler<D, S, L>(
    motion: MotionController<D, S>,
    cell: L,
    analyzer: &mut TestAnalyzer,
    trial: TrialCfg,
    params: RunParams,
    estop_check: Option<Box<dyn Fn() -> bool + Send + Sync>>,
) -> CoreResult<(TrialOutcome, MotionController<D, S>)>
where
    D: StepperDriver,
    S: LimitSwitch,
    L: LoadCell + Send + 'static,
{
    let period_us = crate::util::period_us(params.sample_rate_hz);
    let period_ms = crate::util::period_ms(params.sample_rate_hz);
    let stall_threshold_ms =
        compute_stall_threshold_ms(params.sensor_timeout_ms, period_ms, params.max_run_ms);

    let sampler_timeout = Duration::from_millis(params.sensor_timeout_ms);
    let sampler = match params.mode {
        SamplingMode::Event => Sampler::spawn_event(cell, sampler_timeout, MonotonicClock::new()),
        SamplingMode::Paced(hz) => Sampler::spawn(cell, hz, sampler_timeout, MonotonicClock::new()),
        SamplingMode::Direct => unreachable!(),
    };

    let mut session = TrialSession::new(motion, trial);
    session.begin(analyzer)?;
    tracing::info!(mode = "sampler", stall_threshold_ms, "trial loop start");

    let start = std::time::Instant::now();
    loop {
        if estop_triggered(&estop_check) {
            session.abort()?;
            return Err(TesterError::Abort(AbortReason::Estop).into());
        }

        let elapsed = elapsed_ms(start);
        if elapsed >= params.max_run_ms {
            session.abort()?;
            return Err(TesterError::Abort(AbortReason::MaxRuntime).into());
        }
        if stalled_now(elapsed, sampler.stalled_for_now(), stall_threshold_ms) {
            session.abort()?;
            return Err(TesterError::Timeout.into());
        }

        if let Some(raw) = sampler.latest() {
            let force_kg = params.calibration.to_kg(raw);
            match session.step_from_force(analyzer, force_kg)? {
                TrialStatus::Running => continue,
                TrialStatus::Complete(outcome) => {
                    tracing::info!(?outcome, samples = analyzer.raw_len(), "trial complete");
                    return Ok((outcome, session.into_motion()));
                }
                TrialStatus::Aborted(e) => {
                    tracing::error!(error = %e, "trial aborted");
                    return Err(e.into());
                }
            }
        } else {
            // avoid busy spin if no sample yet
            std::thread::sleep(Duration::from_micros(period_us));
        }
    }
}

#[inline]
fn estop_triggered(check: &Option<Box<dyn Fn() -> bool + Send + Sync>>) -> bool {
    check.as_ref().map(|f| f()).unwrap_or(false)
}

#[inline]
fn elapsed_ms(start: std::time::Instant) -> u64 {
    let ms = start.elapsed().as_millis();
    (ms.min(u128::from(u64::MAX))) as u64
}
