#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and calibration parsing for the tensile tester.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Calibration CSV loader enforces headers and fits the linear
//!   counts→kilograms model with ordinary least squares.
use serde::Deserialize;

/// Calibration CSV schema.
///
/// Expected headers:
/// raw,kg
///
/// Example:
/// raw,kg
/// 84213,0.0
/// 912475,10.0
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CalibrationRow {
    pub raw: i64,
    pub kg: f32,
}

#[derive(Debug, Deserialize)]
pub struct Pins {
    pub hx711_dt: u8,
    pub hx711_sck: u8,
    pub motor_step: u8,
    pub motor_dir: u8,
    pub motor_en: Option<u8>,
    pub limit_in: u8,
}

/// Axis geometry and motion profile.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MotorCfg {
    /// Full motor steps per revolution.
    pub steps_per_rev: u32,
    /// Microstepping multiplier set on the driver.
    pub micro_step: u32,
    /// Leadscrew pitch in millimeters per revolution.
    pub screw_pitch_mm: f32,
    /// Cruise speed in mm/s.
    pub speed_mm_s: f32,
    /// Acceleration (and deceleration) in mm/s².
    pub accel_mm_s2: f32,
    /// Flip the wiring sense so positive logical motion runs toward the switch.
    pub invert_axis: bool,
}

impl Default for MotorCfg {
    fn default() -> Self {
        Self {
            steps_per_rev: 200,
            micro_step: 8,
            screw_pitch_mm: 8.0,
            speed_mm_s: 10.0,
            accel_mm_s2: 20.0,
            invert_axis: false,
        }
    }
}

impl MotorCfg {
    /// Microsteps per millimeter of crosshead travel.
    pub fn steps_per_mm(&self) -> f32 {
        (self.steps_per_rev * self.micro_step) as f32 / self.screw_pitch_mm
    }
}

/// Home reference and travel envelope.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HomeCfg {
    /// Logical position of the limit switch in millimeters (work origin = 0).
    pub home_mm: f32,
    /// Allowed travel below the switch, in millimeters.
    pub max_travel_mm: f32,
    /// Extra braking margin added to the computed stopping distance, in mm.
    pub braking_margin_mm: f32,
}

impl Default for HomeCfg {
    fn default() -> Self {
        Self {
            home_mm: 130.0,
            max_travel_mm: 250.0,
            braking_margin_mm: 0.5,
        }
    }
}

/// Limit switch debouncing.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LimitCfg {
    /// Raw level must hold this long before it is committed (ms).
    pub debounce_ms: u64,
}

impl Default for LimitCfg {
    fn default() -> Self {
        Self { debounce_ms: 50 }
    }
}

/// Trial capture parameters.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TrialCfg {
    /// Contact trigger: capture arms once force reaches this many kg.
    pub trigger_kg: f32,
    /// Crosshead travel commanded for the pull, in millimeters.
    pub pull_mm: f32,
    /// Pull speed in mm/s (the cruise profile is restored afterwards).
    pub speed_mm_s: f32,
    /// Sampling period for the capture buffer (ms).
    pub sample_period_ms: u64,
    /// Force must exceed this before a drop counts as rupture (kg).
    pub arm_kg: f32,
    /// Force below this after arming means the specimen let go (kg).
    pub drop_kg: f32,
    /// Load-cell rating; runs abort this close to it (kg).
    pub max_force_kg: f32,
    /// Abort margin below `max_force_kg` (kg).
    pub max_force_margin_kg: f32,
    /// Capacity of the raw capture buffer (samples).
    pub raw_capacity: usize,
}

impl Default for TrialCfg {
    fn default() -> Self {
        Self {
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
}

/// Canonical relative-time grid for accumulated curves.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct GridCfg {
    pub start_ms: i32,
    pub end_ms: i32,
    pub step_ms: i32,
}

impl Default for GridCfg {
    fn default() -> Self {
        Self {
            start_ms: -200,
            end_ms: 100,
            step_ms: 20,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Hardware {
    /// Max time to wait for HX711 data-ready (DT low) before failing
    pub sensor_read_timeout_ms: u64,
    /// Load-cell sample rate used to pace the host-side reader (Hz).
    pub sample_rate_hz: u32,
}

impl Default for Hardware {
    fn default() -> Self {
        Self {
            sensor_read_timeout_ms: 150,
            sample_rate_hz: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub pins: Pins,
    #[serde(default)]
    pub motor: MotorCfg,
    #[serde(default)]
    pub home: HomeCfg,
    #[serde(default)]
    pub limit: LimitCfg,
    #[serde(default)]
    pub trial: TrialCfg,
    #[serde(default)]
    pub grid: GridCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub hardware: Hardware,
    /// Optional persisted calibration; preferred at runtime over CSV when present.
    #[serde(default)]
    pub calibration: Option<PersistedCalibration>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PersistedCalibration {
    /// kilograms per count
    pub gain_kg_per_count: f32,
    /// tare zero in raw counts
    pub zero_counts: i32,
}

impl From<PersistedCalibration> for Calibration {
    fn from(p: PersistedCalibration) -> Self {
        Calibration {
            zero_counts: p.zero_counts,
            gain_kg_per_count: p.gain_kg_per_count,
        }
    }
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Linear load-cell model: kg = gain · (raw − zero).
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    pub zero_counts: i32,
    pub gain_kg_per_count: f32,
}

impl Calibration {
    /// Fit kg = a·raw + b by ordinary least squares, then convert to the
    /// tare form kg = a·(raw − zero) with zero = round(−b/a).
    pub fn from_rows(rows: Vec<CalibrationRow>) -> eyre::Result<Self> {
        if rows.len() < 2 {
            eyre::bail!("calibration requires at least two rows, got {}", rows.len());
        }

        // Duplicate raw values make the fit degenerate; reject them early.
        for i in 1..rows.len() {
            for j in 0..i {
                if rows[i].raw == rows[j].raw {
                    eyre::bail!(
                        "calibration rows have duplicate raw values at index {} and {}",
                        j,
                        i
                    );
                }
            }
        }

        // OLS in f64 for numerical stability.
        let n = rows.len() as f64;
        let sum_x: f64 = rows.iter().map(|r| r.raw as f64).sum();
        let sum_y: f64 = rows.iter().map(|r| f64::from(r.kg)).sum();
        let mean_x = sum_x / n;
        let mean_y = sum_y / n;
        let mut sxx = 0.0f64;
        let mut sxy = 0.0f64;
        for r in &rows {
            let x = r.raw as f64 - mean_x;
            let y = f64::from(r.kg) - mean_y;
            sxx += x * x;
            sxy += x * y;
        }
        if !sxx.is_finite() || sxx == 0.0 {
            eyre::bail!("calibration cannot determine slope (degenerate X variance)");
        }
        let a = sxy / sxx;
        if !a.is_finite() || a == 0.0 {
            eyre::bail!("calibration produced an unusable slope");
        }
        let b = mean_y - a * mean_x;

        let zero = -b / a; // raw counts where kg == 0
        if !zero.is_finite() {
            eyre::bail!("calibration produced invalid tare baseline");
        }

        Ok(Calibration {
            zero_counts: zero.round() as i32,
            gain_kg_per_count: a as f32,
        })
    }
}

impl TryFrom<Vec<CalibrationRow>> for Calibration {
    type Error = eyre::Report;
    fn try_from(rows: Vec<CalibrationRow>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

pub fn load_calibration_csv(path: &std::path::Path) -> eyre::Result<Calibration> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["raw", "kg"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'raw,kg', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    Calibration::try_from(rows)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Motor
        if self.motor.steps_per_rev == 0 {
            eyre::bail!("motor.steps_per_rev must be > 0");
        }
        if self.motor.micro_step == 0 {
            eyre::bail!("motor.micro_step must be > 0");
        }
        if !(self.motor.screw_pitch_mm > 0.0) {
            eyre::bail!("motor.screw_pitch_mm must be > 0");
        }
        if !(self.motor.speed_mm_s > 0.0) {
            eyre::bail!("motor.speed_mm_s must be > 0");
        }
        if !(self.motor.accel_mm_s2 > 0.0) {
            eyre::bail!("motor.accel_mm_s2 must be > 0");
        }

        // Home / travel envelope
        if !(self.home.max_travel_mm > 0.0) {
            eyre::bail!("home.max_travel_mm must be > 0");
        }
        if self.home.braking_margin_mm < 0.0 {
            eyre::bail!("home.braking_margin_mm must be >= 0");
        }

        // Limit debounce
        if self.limit.debounce_ms == 0 {
            eyre::bail!("limit.debounce_ms must be >= 1");
        }
        if self.limit.debounce_ms > 5_000 {
            eyre::bail!("limit.debounce_ms is unreasonably large (>5s)");
        }

        // Trial
        if !(self.trial.trigger_kg > 0.0) {
            eyre::bail!("trial.trigger_kg must be > 0");
        }
        if !(self.trial.pull_mm > 0.0) {
            eyre::bail!("trial.pull_mm must be > 0");
        }
        if !(self.trial.speed_mm_s > 0.0) {
            eyre::bail!("trial.speed_mm_s must be > 0");
        }
        if self.trial.sample_period_ms == 0 {
            eyre::bail!("trial.sample_period_ms must be >= 1");
        }
        if self.trial.drop_kg >= self.trial.arm_kg {
            eyre::bail!("trial.drop_kg must be below trial.arm_kg");
        }
        if !(self.trial.max_force_kg > self.trial.max_force_margin_kg) {
            eyre::bail!("trial.max_force_kg must exceed trial.max_force_margin_kg");
        }
        if self.trial.raw_capacity < 2 {
            eyre::bail!("trial.raw_capacity must be >= 2");
        }

        // Grid
        if self.grid.step_ms <= 0 {
            eyre::bail!("grid.step_ms must be > 0");
        }
        if self.grid.start_ms > self.grid.end_ms {
            eyre::bail!("grid.start_ms must not exceed grid.end_ms");
        }

        // Hardware
        if self.hardware.sensor_read_timeout_ms == 0 {
            eyre::bail!("hardware.sensor_read_timeout_ms must be >= 1");
        }
        if self.hardware.sample_rate_hz == 0 {
            eyre::bail!("hardware.sample_rate_hz must be > 0");
        }

        Ok(())
    }
}
