//! Full trial flows against the simulated rig: contact, capture,
//! rupture, and every abort path.

use std::sync::Arc;
use std::time::Duration;

use tensile_core::analyzer::TestAnalyzer;
use tensile_core::config::{GridCfg, HomeCfg, LimitCfg, MotorCfg, TrialCfg};
use tensile_core::error::{AbortReason, TesterError};
use tensile_core::motion::MotionController;
use tensile_core::session::TrialSession;
use tensile_core::status::{TrialOutcome, TrialStatus};
use tensile_hardware::sim::{SimulatedAxis, SimulatedSwitch};
use tensile_traits::clock::test_clock::TestClock;

type SimSession = TrialSession<SimulatedAxis<TestClock>, SimulatedSwitch>;

fn motor_cfg() -> MotorCfg {
    MotorCfg {
        steps_per_mm: 10.0,
        speed_mm_s: 10.0,
        accel_mm_s2: 20.0,
        invert_axis: false,
    }
}

fn trial_cfg() -> TrialCfg {
    TrialCfg {
        trigger_kg: 0.1,
        pull_mm: 50.0,
        speed_mm_s: 1.0,
        sample_period_ms: 100,
        arm_kg: 1.0,
        drop_kg: 0.5,
        max_force_kg: 30.0,
        max_force_margin_kg: 2.0,
        raw_capacity: 1000,
    }
}

fn rig(cfg: TrialCfg) -> (SimSession, TestClock) {
    let clock = TestClock::new();
    let axis = SimulatedAxis::with_clock(clock.clone());
    let (switch, _handle) = SimulatedSwitch::manual();
    let motion = MotionController::with_clock(
        axis,
        switch,
        motor_cfg(),
        HomeCfg::default(), // switch at 130 mm, 250 mm of travel
        LimitCfg { debounce_ms: 50 },
        Arc::new(clock.clone()),
    )
    .unwrap();
    (TrialSession::with_clock(motion, cfg, Arc::new(clock.clone())), clock)
}

fn tick(
    session: &mut SimSession,
    analyzer: &mut TestAnalyzer,
    clock: &TestClock,
    force_kg: f32,
) -> TrialStatus {
    clock.advance(Duration::from_millis(100));
    session.step_from_force(analyzer, force_kg).unwrap()
}

#[test]
fn rupture_ends_the_trial_cleanly() {
    let (mut session, clock) = rig(trial_cfg());
    let mut analyzer = TestAnalyzer::new(GridCfg::default(), 1000);
    session.begin(&mut analyzer).unwrap();
    // The trial speed is in force while the pull runs.
    assert!((session.motion_mut().motor_cfg().speed_mm_s - 1.0).abs() < 1e-3);

    // Slack take-up, then contact at 0.2 kg.
    assert!(matches!(
        tick(&mut session, &mut analyzer, &clock, 0.0),
        TrialStatus::Running
    ));
    assert!(matches!(
        tick(&mut session, &mut analyzer, &clock, 0.2),
        TrialStatus::Running
    ));

    // Force ramps past the arming level, then lets go.
    for f in [0.5, 1.5, 2.5] {
        assert!(matches!(
            tick(&mut session, &mut analyzer, &clock, f),
            TrialStatus::Running
        ));
    }
    let status = tick(&mut session, &mut analyzer, &clock, 0.1);
    assert!(matches!(
        status,
        TrialStatus::Complete(TrialOutcome::Rupture)
    ));
    assert!(!session.motion_mut().is_running());

    // One capture sample per measuring tick, strictly increasing time.
    assert_eq!(analyzer.raw_len(), 4);
    analyzer.add_trial(0).unwrap();
    assert!(!analyzer.is_empty());

    // The cruise profile is back.
    assert!((session.motion_mut().motor_cfg().speed_mm_s - 10.0).abs() < 1e-3);
}

#[test]
fn sub_arm_drop_is_not_a_rupture() {
    let (mut session, clock) = rig(trial_cfg());
    let mut analyzer = TestAnalyzer::new(GridCfg::default(), 1000);
    session.begin(&mut analyzer).unwrap();
    tick(&mut session, &mut analyzer, &clock, 0.2); // contact

    // Force wobbles below the arming level; a dip under drop_kg must not
    // end the trial because nothing was ever gripping hard.
    for f in [0.6, 0.3, 0.7, 0.2] {
        assert!(matches!(
            tick(&mut session, &mut analyzer, &clock, f),
            TrialStatus::Running
        ));
    }
}

#[test]
fn pull_without_contact_aborts() {
    let (mut session, clock) = rig(trial_cfg());
    let mut analyzer = TestAnalyzer::new(GridCfg::default(), 1000);
    session.begin(&mut analyzer).unwrap();

    // 50 mm at 1 mm/s; let the whole pull play out with no load.
    clock.advance(Duration::from_secs(51));
    let status = session.step_from_force(&mut analyzer, 0.0).unwrap();
    assert!(matches!(
        status,
        TrialStatus::Aborted(TesterError::Abort(AbortReason::NoContact))
    ));
    assert!((session.motion_mut().motor_cfg().speed_mm_s - 10.0).abs() < 1e-3);
}

#[test]
fn full_travel_with_specimen_intact_completes() {
    let (mut session, clock) = rig(trial_cfg());
    let mut analyzer = TestAnalyzer::new(GridCfg::default(), 1000);
    session.begin(&mut analyzer).unwrap();
    tick(&mut session, &mut analyzer, &clock, 0.2); // contact

    // A stretchy specimen that never ruptures: hold 2 kg to the end of
    // the commanded travel.
    clock.advance(Duration::from_secs(51));
    let first = session.step_from_force(&mut analyzer, 2.0).unwrap();
    assert!(matches!(
        first,
        TrialStatus::Complete(TrialOutcome::FullTravel)
    ));
}

#[test]
fn load_rating_margin_hard_stops() {
    let (mut session, clock) = rig(trial_cfg());
    let mut analyzer = TestAnalyzer::new(GridCfg::default(), 1000);
    session.begin(&mut analyzer).unwrap();
    tick(&mut session, &mut analyzer, &clock, 0.2); // contact

    // 28.5 kg is within 2 kg of the 30 kg rating.
    let status = tick(&mut session, &mut analyzer, &clock, 28.5);
    assert!(matches!(
        status,
        TrialStatus::Aborted(TesterError::Abort(AbortReason::MaxForce))
    ));
    assert!(!session.motion_mut().is_running());
    // The offending reading is still captured for post-mortem.
    assert_eq!(analyzer.raw_len(), 1);
}

#[test]
fn exhausted_capture_buffer_aborts() {
    let (mut session, clock) = rig(trial_cfg());
    let mut analyzer = TestAnalyzer::new(GridCfg::default(), 2);
    session.begin(&mut analyzer).unwrap();
    tick(&mut session, &mut analyzer, &clock, 0.2); // contact

    assert!(matches!(
        tick(&mut session, &mut analyzer, &clock, 0.6),
        TrialStatus::Running
    ));
    assert!(matches!(
        tick(&mut session, &mut analyzer, &clock, 0.7),
        TrialStatus::Running
    ));
    let status = tick(&mut session, &mut analyzer, &clock, 0.8);
    assert!(matches!(
        status,
        TrialStatus::Aborted(TesterError::Abort(AbortReason::BufferFull))
    ));
    assert_eq!(analyzer.raw_len(), 2);
}

#[test]
fn far_travel_bound_aborts_the_seek() {
    let mut cfg = trial_cfg();
    cfg.pull_mm = 200.0; // past the soft envelope (117 mm of usable travel)
    let (mut session, clock) = rig(cfg);
    let mut analyzer = TestAnalyzer::new(GridCfg::default(), 1000);
    session.begin(&mut analyzer).unwrap();

    // Run the axis onto the far bound without ever touching the specimen.
    clock.advance(Duration::from_secs(118));
    assert!(matches!(
        session.step_from_force(&mut analyzer, 0.0).unwrap(),
        TrialStatus::Running
    )); // the stop is issued on this poll
    let status = session.step_from_force(&mut analyzer, 0.0).unwrap();
    assert!(matches!(
        status,
        TrialStatus::Aborted(TesterError::Abort(AbortReason::LimitHit))
    ));
    assert!(!session.motion_mut().is_running());
}

#[test]
fn step_outside_a_trial_is_rejected() {
    let (mut session, _clock) = rig(trial_cfg());
    let mut analyzer = TestAnalyzer::new(GridCfg::default(), 1000);
    let status = session.step_from_force(&mut analyzer, 0.0).unwrap();
    assert!(matches!(
        status,
        TrialStatus::Aborted(TesterError::State(_))
    ));
}

#[test]
fn abort_hard_stops_and_closes() {
    let (mut session, clock) = rig(trial_cfg());
    let mut analyzer = TestAnalyzer::new(GridCfg::default(), 1000);
    session.begin(&mut analyzer).unwrap();
    tick(&mut session, &mut analyzer, &clock, 0.2);

    session.abort().unwrap();
    assert!(!session.motion_mut().is_running());
    assert!((session.motion_mut().motor_cfg().speed_mm_s - 10.0).abs() < 1e-3);
    // The session is closed; further steps are rejected.
    let status = session.step_from_force(&mut analyzer, 1.0).unwrap();
    assert!(matches!(
        status,
        TrialStatus::Aborted(TesterError::State(_))
    ));
}
