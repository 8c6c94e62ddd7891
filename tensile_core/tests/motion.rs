//! Motion safety state machine tests: debounce, soft limits, move
//! validation, event ordering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tensile_core::config::{HomeCfg, LimitCfg, MotorCfg};
use tensile_core::motion::{LimitState, MotionController};
use tensile_traits::clock::test_clock::TestClock;
use tensile_traits::{LimitSwitch, StepDirection, StepperDriver};

#[derive(Debug, Default)]
struct DriverState {
    pos: i64,
    target: Option<i64>,
    cont_dir: i8,
    speed: f32,
    accel: f32,
    immediate_stops: usize,
    decel_stops: usize,
}

/// Driver spy with externally steerable position; moves "complete" only
/// when the test says so.
#[derive(Clone, Default)]
struct SpyDriver(Arc<Mutex<DriverState>>);

impl SpyDriver {
    fn state(&self) -> std::sync::MutexGuard<'_, DriverState> {
        self.0.lock().unwrap()
    }

    /// Teleport to the queued target and go idle.
    fn arrive(&self) {
        let mut s = self.state();
        if let Some(t) = s.target.take() {
            s.pos = t;
        }
        s.cont_dir = 0;
    }

    fn set_pos(&self, pos: i64) {
        self.state().pos = pos;
    }
}

impl StepperDriver for SpyDriver {
    fn move_relative(
        &mut self,
        steps: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut s = self.state();
        let t = s.pos + steps;
        s.target = Some(t);
        s.cont_dir = 0;
        Ok(())
    }

    fn move_absolute(
        &mut self,
        steps: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut s = self.state();
        s.target = Some(steps);
        s.cont_dir = 0;
        Ok(())
    }

    fn run_continuous(
        &mut self,
        dir: StepDirection,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut s = self.state();
        s.target = None;
        s.cont_dir = dir;
        Ok(())
    }

    fn stop_decelerating(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut s = self.state();
        s.target = None;
        s.cont_dir = 0;
        s.decel_stops += 1;
        Ok(())
    }

    fn stop_immediate(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut s = self.state();
        s.target = None;
        s.cont_dir = 0;
        s.immediate_stops += 1;
        Ok(())
    }

    fn set_speed(&mut self, sps: f32) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.state().speed = sps;
        Ok(())
    }

    fn set_acceleration(&mut self, a: f32) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.state().accel = a;
        Ok(())
    }

    fn set_current_position(
        &mut self,
        steps: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut s = self.state();
        s.pos = steps;
        s.target = None;
        Ok(())
    }

    fn current_position(&self) -> i64 {
        self.state().pos
    }

    fn is_running(&self) -> bool {
        let s = self.state();
        s.target.is_some() || s.cont_dir != 0
    }

    fn direction(&self) -> StepDirection {
        let s = self.state();
        match s.target {
            Some(t) if t > s.pos => 1,
            Some(t) if t < s.pos => -1,
            Some(_) => 0,
            None => s.cont_dir,
        }
    }
}

#[derive(Clone, Default)]
struct SpySwitch(Arc<AtomicBool>);

impl SpySwitch {
    fn press(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    fn release(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl LimitSwitch for SpySwitch {
    fn is_active(&mut self) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

// steps_per_mm 10, speed 10 mm/s, accel 20 mm/s², margin 0.5 mm:
// braking = 10²/(2·20) + 0.5 = 3 mm. home 130 mm, travel 250 mm.
// soft min = -117 mm, soft max = 126.95 mm.
fn motor_cfg() -> MotorCfg {
    MotorCfg {
        steps_per_mm: 10.0,
        speed_mm_s: 10.0,
        accel_mm_s2: 20.0,
        invert_axis: false,
    }
}

fn home_cfg() -> HomeCfg {
    HomeCfg {
        home_mm: 130.0,
        max_travel_mm: 250.0,
        braking_margin_mm: 0.5,
    }
}

fn rig() -> (
    MotionController<SpyDriver, SpySwitch>,
    SpyDriver,
    SpySwitch,
    TestClock,
) {
    let driver = SpyDriver::default();
    let switch = SpySwitch::default();
    let clock = TestClock::new();
    let mut mc = MotionController::with_clock(
        driver.clone(),
        switch.clone(),
        motor_cfg(),
        home_cfg(),
        LimitCfg { debounce_ms: 50 },
        Arc::new(clock.clone()),
    )
    .unwrap();
    mc.begin().unwrap();
    (mc, driver, switch, clock)
}

#[test]
fn profile_is_pushed_to_driver() {
    let (_mc, driver, _sw, _clock) = rig();
    let s = driver.state();
    assert!((s.speed - 100.0).abs() < 1e-3); // 10 mm/s · 10 steps/mm
    assert!((s.accel - 200.0).abs() < 1e-3);
}

#[test]
fn sub_window_glitch_is_ignored() {
    let (mut mc, _driver, sw, clock) = rig();
    sw.press();
    assert!(mc.check_limit().unwrap().is_none());
    clock.advance(Duration::from_millis(20));
    assert!(mc.check_limit().unwrap().is_none());
    sw.release();
    assert!(mc.check_limit().unwrap().is_none());
    clock.advance(Duration::from_millis(100));
    // Level is back where it started; nothing was committed.
    assert!(mc.check_limit().unwrap().is_none());
    assert_eq!(mc.state(), LimitState::None);
}

#[test]
fn committed_press_latches_at_max() {
    let (mut mc, driver, sw, clock) = rig();
    sw.press();
    assert!(mc.check_limit().unwrap().is_none());
    clock.advance(Duration::from_millis(60));
    assert_eq!(mc.check_limit().unwrap(), Some(LimitState::AtMax));
    assert_eq!(mc.state(), LimitState::AtMax);
    // Axis was idle, so no hard stop was issued.
    assert_eq!(driver.state().immediate_stops, 0);
    // Event is delivered exactly once.
    assert!(mc.check_limit().unwrap().is_none());
}

#[test]
fn press_while_heading_into_switch_hard_stops() {
    let (mut mc, driver, sw, clock) = rig();
    assert!(mc.move_by(10.0).unwrap());
    assert!(mc.is_running());

    sw.press();
    assert!(mc.check_limit().unwrap().is_none());
    clock.advance(Duration::from_millis(60));
    assert_eq!(mc.check_limit().unwrap(), Some(LimitState::AtMax));
    assert_eq!(driver.state().immediate_stops, 1);
    // The voided move owes no completion event.
    assert!(mc.check_limit().unwrap().is_none());
}

#[test]
fn release_after_dispatch_clears_latch() {
    let (mut mc, _driver, sw, clock) = rig();
    sw.press();
    let _ = mc.check_limit().unwrap();
    clock.advance(Duration::from_millis(60));
    assert_eq!(mc.check_limit().unwrap(), Some(LimitState::AtMax));

    sw.release();
    let _ = mc.check_limit().unwrap();
    clock.advance(Duration::from_millis(60));
    assert!(mc.check_limit().unwrap().is_none());
    assert_eq!(mc.state(), LimitState::None);
}

#[test]
fn rejected_move_has_no_side_effect() {
    let (mut mc, driver, sw, clock) = rig();
    sw.press();
    let _ = mc.check_limit().unwrap();
    clock.advance(Duration::from_millis(60));
    assert_eq!(mc.check_limit().unwrap(), Some(LimitState::AtMax));

    // Toward the switch: rejected, nothing queued, latch intact.
    assert!(!mc.move_by(5.0).unwrap());
    assert!(driver.state().target.is_none());
    assert_eq!(mc.state(), LimitState::AtMax);

    // Away from the switch: accepted, latch cleared.
    assert!(mc.move_by(-5.0).unwrap());
    assert_eq!(mc.state(), LimitState::None);
}

#[test]
fn motion_complete_fires_exactly_once() {
    let (mut mc, driver, _sw, _clock) = rig();
    assert!(mc.move_by(-5.0).unwrap());
    assert!(mc.check_limit().unwrap().is_none()); // still running
    driver.arrive();
    assert_eq!(mc.check_limit().unwrap(), Some(LimitState::MotionComplete));
    assert!(mc.check_limit().unwrap().is_none());
    assert_eq!(mc.state(), LimitState::None);
}

#[test]
fn soft_min_bound_stops_and_latches() {
    let (mut mc, driver, _sw, _clock) = rig();
    assert!(mc.move_to(-150.0).unwrap());
    // Crosshead sails past the far bound (-117 mm).
    driver.set_pos(-1180);
    assert!(mc.check_limit().unwrap().is_none()); // stop issued this tick
    assert_eq!(driver.state().decel_stops, 1);
    assert_eq!(mc.check_limit().unwrap(), Some(LimitState::AtMin));

    // Further away is rejected; back toward home is fine.
    assert!(!mc.move_to(-200.0).unwrap());
    assert!(mc.move_to(0.0).unwrap());
}

#[test]
fn soft_max_bound_stops_before_switch() {
    let (mut mc, driver, _sw, _clock) = rig();
    assert!(mc.move_to(140.0).unwrap());
    driver.set_pos(1270); // 127 mm > 126.95 mm soft max
    assert!(mc.check_limit().unwrap().is_none());
    assert_eq!(driver.state().decel_stops, 1);
    assert_eq!(mc.check_limit().unwrap(), Some(LimitState::AtMax));
}

#[test]
fn jog_without_soft_limit_runs_to_the_switch() {
    let (mut mc, driver, sw, clock) = rig();
    assert!(mc.jogging(false).unwrap());
    driver.set_pos(1280); // past the soft bound; must keep going
    assert!(mc.check_limit().unwrap().is_none());
    assert_eq!(driver.state().decel_stops, 0);

    sw.press();
    let _ = mc.check_limit().unwrap();
    clock.advance(Duration::from_millis(60));
    assert_eq!(mc.check_limit().unwrap(), Some(LimitState::AtMax));
    assert_eq!(driver.state().immediate_stops, 1);
}

#[test]
fn homing_sequence_lands_at_origin() {
    let (mut mc, driver, sw, clock) = rig();
    assert!(mc.jogging(false).unwrap());
    driver.set_pos(1299);
    sw.press();
    let _ = mc.check_limit().unwrap();
    clock.advance(Duration::from_millis(60));
    assert_eq!(mc.check_limit().unwrap(), Some(LimitState::AtMax));

    // The switch defines 130 mm; re-reference and go home.
    mc.set_current_position(130.0).unwrap();
    assert!((mc.position_mm() - 130.0).abs() < 0.1);
    assert!(mc.go_home().unwrap());
    driver.arrive();
    assert_eq!(mc.check_limit().unwrap(), Some(LimitState::MotionComplete));
    assert!(mc.position_mm().abs() < 1e-3);
}

#[test]
fn soft_limited_jog_stops_at_the_bound() {
    let (mut mc, driver, _sw, _clock) = rig();
    assert!(mc.jogging(true).unwrap());
    driver.set_pos(1270); // 127 mm > 126.95 mm soft max
    assert!(mc.check_limit().unwrap().is_none()); // stop issued this tick
    assert_eq!(driver.state().decel_stops, 1);
    assert_eq!(driver.state().immediate_stops, 0);
    // The switch itself was never touched; the soft bound latched.
    assert_eq!(mc.check_limit().unwrap(), Some(LimitState::AtMax));
}

#[test]
fn set_home_redefines_the_origin() {
    let (mut mc, driver, _sw, _clock) = rig();
    driver.set_pos(500); // crosshead parked at 50 mm
    mc.set_home(50.0).unwrap();
    assert!(mc.position_mm().abs() < 1e-3);

    // The switch-side bound follows the new reference:
    // soft max = 50 - 3 - 0.05 = 46.95 mm.
    assert!(mc.move_to(100.0).unwrap());
    driver.set_pos(470);
    assert!(mc.check_limit().unwrap().is_none());
    assert_eq!(mc.check_limit().unwrap(), Some(LimitState::AtMax));

    let (driver, _switch) = mc.into_parts();
    assert_eq!(driver.state().decel_stops, 1);
}

#[test]
fn set_config_home_moves_the_soft_bounds() {
    let (mut mc, driver, _sw, _clock) = rig();
    mc.set_config_home(HomeCfg {
        home_mm: 130.0,
        max_travel_mm: 150.0,
        braking_margin_mm: 0.5,
    });

    // Far bound is now 130 - 150 + 3 = -17 mm; under the original travel
    // envelope -18 mm would still be well inside.
    assert!(mc.move_to(-50.0).unwrap());
    driver.set_pos(-180);
    assert!(mc.check_limit().unwrap().is_none());
    assert_eq!(driver.state().decel_stops, 1);
    assert_eq!(mc.check_limit().unwrap(), Some(LimitState::AtMin));
}

#[test]
fn emergency_stop_always_accepted() {
    let (mut mc, driver, _sw, _clock) = rig();
    assert!(mc.move_to(-100.0).unwrap());
    mc.emergency_stop().unwrap();
    assert!(!mc.is_running());
    assert_eq!(driver.state().immediate_stops, 1);
    // No stale completion event.
    assert!(mc.check_limit().unwrap().is_none());
}

#[test]
fn begin_with_pressed_switch_latches_immediately() {
    let driver = SpyDriver::default();
    let switch = SpySwitch::default();
    switch.press();
    let clock = TestClock::new();
    let mut mc = MotionController::with_clock(
        driver,
        switch,
        motor_cfg(),
        home_cfg(),
        LimitCfg { debounce_ms: 50 },
        Arc::new(clock),
    )
    .unwrap();
    mc.begin().unwrap();
    assert_eq!(mc.state(), LimitState::AtMax);
    assert!(!mc.move_by(1.0).unwrap());
    assert!(mc.move_by(-1.0).unwrap());
}

#[test]
fn inverted_axis_flips_step_sign_only() {
    let driver = SpyDriver::default();
    let switch = SpySwitch::default();
    let clock = TestClock::new();
    let mut mc = MotionController::with_clock(
        driver.clone(),
        switch,
        MotorCfg {
            invert_axis: true,
            ..motor_cfg()
        },
        home_cfg(),
        LimitCfg { debounce_ms: 50 },
        Arc::new(clock),
    )
    .unwrap();
    mc.begin().unwrap();

    assert!(mc.move_by(-5.0).unwrap());
    // -5 mm logical = +50 driver steps on an inverted axis.
    assert_eq!(driver.state().target, Some(50));
    driver.arrive();
    assert!((mc.position_mm() + 5.0).abs() < 1e-3);
}
