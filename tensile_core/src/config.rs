//! Runtime configuration types for the motion and capture engines.
//!
//! These are the structs consumed by `MotionController` and `TrialSession`.
//! They are separate from the TOML-deserialized config in `tensile_config`;
//! see `conversions` for the mapping.

/// Axis conversion and motion profile.
#[derive(Debug, Clone, Copy)]
pub struct MotorCfg {
    /// Microsteps per millimeter of crosshead travel.
    pub steps_per_mm: f32,
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
            steps_per_mm: 200.0,
            speed_mm_s: 10.0,
            accel_mm_s2: 20.0,
            invert_axis: false,
        }
    }
}

/// Home reference and travel envelope.
#[derive(Debug, Clone, Copy)]
pub struct HomeCfg {
    /// Logical position of the limit switch in millimeters (work origin = 0).
    pub home_mm: f32,
    /// Allowed travel below the switch, in millimeters.
    pub max_travel_mm: f32,
    /// Extra margin added to the computed braking distance, in mm.
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
#[derive(Debug, Clone, Copy)]
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
#[derive(Debug, Clone)]
pub struct TrialCfg {
    /// Capture arms once force reaches this many kg (specimen contact).
    pub trigger_kg: f32,
    /// Crosshead travel commanded for the pull, in millimeters.
    pub pull_mm: f32,
    /// Pull speed in mm/s; the cruise profile is restored afterwards.
    pub speed_mm_s: f32,
    /// Sampling period for the capture buffer (ms).
    pub sample_period_ms: u64,
    /// Force must exceed this before a drop counts as rupture (kg).
    pub arm_kg: f32,
    /// Force below this after arming means the specimen let go (kg).
    pub drop_kg: f32,
    /// Load-cell rating (kg).
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

/// Canonical relative-time grid for accumulated curves, inclusive on both
/// ends. The rupture sample sits at relative time 0.
#[derive(Debug, Clone, Copy)]
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

impl GridCfg {
    /// Number of canonical times on the grid.
    pub fn len(&self) -> usize {
        if self.step_ms <= 0 || self.start_ms > self.end_ms {
            return 0;
        }
        ((self.end_ms - self.start_ms) / self.step_ms + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
