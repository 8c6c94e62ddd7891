use tensile_config::load_toml;

fn base_toml(extra: &str) -> String {
    format!(
        r#"
[pins]
hx711_dt = 5
hx711_sck = 6
motor_step = 23
motor_dir = 24
limit_in = 17

{extra}
"#
    )
}

#[test]
fn accepts_defaults_with_pins_only() {
    let cfg = load_toml(&base_toml("")).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert!((cfg.motor.steps_per_mm() - 200.0).abs() < 1e-3);
}

#[test]
fn rejects_zero_screw_pitch() {
    let toml = base_toml(
        r#"
[motor]
screw_pitch_mm = 0.0
"#,
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject screw_pitch_mm=0");
    assert!(format!("{err}").contains("screw_pitch_mm must be > 0"));
}

#[test]
fn rejects_zero_debounce() {
    let toml = base_toml(
        r#"
[limit]
debounce_ms = 0
"#,
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject debounce_ms=0");
    assert!(format!("{err}").contains("debounce_ms must be >= 1"));
}

#[test]
fn rejects_drop_threshold_above_arm_threshold() {
    let toml = base_toml(
        r#"
[trial]
arm_kg = 0.4
drop_kg = 0.5
"#,
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject drop >= arm");
    assert!(format!("{err}").contains("drop_kg must be below"));
}

#[test]
fn rejects_inverted_grid() {
    let toml = base_toml(
        r#"
[grid]
start_ms = 100
end_ms = -200
step_ms = 20
"#,
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject start > end");
    assert!(format!("{err}").contains("start_ms must not exceed"));
}

#[test]
fn rejects_tiny_raw_capacity() {
    let toml = base_toml(
        r#"
[trial]
raw_capacity = 1
"#,
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject raw_capacity < 2");
    assert!(format!("{err}").contains("raw_capacity must be >= 2"));
}

#[test]
fn persisted_calibration_converts() {
    let toml = base_toml(
        r#"
[calibration]
gain_kg_per_count = 0.0005
zero_counts = 8400
"#,
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let calib: tensile_config::Calibration = cfg.calibration.expect("calibration present").into();
    assert_eq!(calib.zero_counts, 8400);
    assert!((calib.gain_kg_per_count - 0.0005).abs() < 1e-9);
}
