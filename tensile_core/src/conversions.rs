//! `From` implementations bridging `tensile_config` types to `tensile_core` types.
//!
//! These keep the field-by-field mapping out of the CLI.

use crate::calibration::Calibration;
use crate::config::{GridCfg, HomeCfg, LimitCfg, MotorCfg, TrialCfg};

// ── MotorCfg ─────────────────────────────────────────────────────────────────

impl From<&tensile_config::MotorCfg> for MotorCfg {
    fn from(c: &tensile_config::MotorCfg) -> Self {
        Self {
            steps_per_mm: c.steps_per_mm(),
            speed_mm_s: c.speed_mm_s,
            accel_mm_s2: c.accel_mm_s2,
            invert_axis: c.invert_axis,
        }
    }
}

// ── HomeCfg ──────────────────────────────────────────────────────────────────

impl From<&tensile_config::HomeCfg> for HomeCfg {
    fn from(c: &tensile_config::HomeCfg) -> Self {
        Self {
            home_mm: c.home_mm,
            max_travel_mm: c.max_travel_mm,
            braking_margin_mm: c.braking_margin_mm,
        }
    }
}

// ── LimitCfg ─────────────────────────────────────────────────────────────────

impl From<&tensile_config::LimitCfg> for LimitCfg {
    fn from(c: &tensile_config::LimitCfg) -> Self {
        Self {
            debounce_ms: c.debounce_ms,
        }
    }
}

// ── TrialCfg ─────────────────────────────────────────────────────────────────

impl From<&tensile_config::TrialCfg> for TrialCfg {
    fn from(c: &tensile_config::TrialCfg) -> Self {
        Self {
            trigger_kg: c.trigger_kg,
            pull_mm: c.pull_mm,
            speed_mm_s: c.speed_mm_s,
            sample_period_ms: c.sample_period_ms,
            arm_kg: c.arm_kg,
            drop_kg: c.drop_kg,
            max_force_kg: c.max_force_kg,
            max_force_margin_kg: c.max_force_margin_kg,
            raw_capacity: c.raw_capacity,
        }
    }
}

// ── GridCfg ──────────────────────────────────────────────────────────────────

impl From<&tensile_config::GridCfg> for GridCfg {
    fn from(c: &tensile_config::GridCfg) -> Self {
        Self {
            start_ms: c.start_ms,
            end_ms: c.end_ms,
            step_ms: c.step_ms,
        }
    }
}

// ── Calibration ──────────────────────────────────────────────────────────────

impl From<&tensile_config::Calibration> for Calibration {
    fn from(c: &tensile_config::Calibration) -> Self {
        Self {
            zero_counts: c.zero_counts,
            gain_kg_per_count: c.gain_kg_per_count,
        }
    }
}

impl From<tensile_config::Calibration> for Calibration {
    fn from(c: tensile_config::Calibration) -> Self {
        Self::from(&c)
    }
}
