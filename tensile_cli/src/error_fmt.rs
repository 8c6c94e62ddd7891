//! Human-readable error descriptions and structured JSON error formatting.

use crate::cli::LAST_LIMITS;

pub fn abort_reason_name(r: &tensile_core::error::AbortReason) -> &'static str {
    use tensile_core::error::AbortReason::*;
    match r {
        Estop => "Estop",
        BufferFull => "BufferFull",
        MaxForce => "MaxForce",
        NoContact => "NoContact",
        LimitHit => "LimitHit",
        MaxRuntime => "MaxRuntime",
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use tensile_core::error::TesterError;

    // Typed matches first
    if let Some(te) = err.downcast_ref::<TesterError>() {
        // Specific domain cases first
        if matches!(te, TesterError::Timeout) {
            return "What happened: Load-cell read timed out.\nLikely causes: HX711 not wired correctly, no power/ground, or timeout too low.\nHow to fix: Verify DT/SCK pins and power, and consider increasing hardware.sensor_read_timeout_ms in the config.".to_string();
        }
        if let TesterError::Abort(reason) = te {
            use tensile_core::error::AbortReason::*;
            return match reason {
                Estop => "What happened: Emergency stop was triggered.\nLikely causes: Ctrl-C pressed or the E-stop input went active.\nHow to fix: Release the E-stop, check the rig, then start a new run.".to_string(),
                BufferFull => "What happened: The raw capture buffer filled up mid-trial.\nLikely causes: Sampling period too short or pull too long for trial.raw_capacity.\nHow to fix: Raise trial.raw_capacity or trial.sample_period_ms in the config.".to_string(),
                MaxForce => "What happened: Force came within the abort margin of the load-cell rating.\nLikely causes: Specimen stronger than expected, or rating configured too low.\nHow to fix: Use a stronger load cell or verify trial.max_force_kg / trial.max_force_margin_kg.".to_string(),
                NoContact => "What happened: The pull finished without ever touching the specimen.\nLikely causes: Specimen not clamped, trigger threshold too high, or pull distance too short.\nHow to fix: Check the clamps, or adjust trial.trigger_kg / trial.pull_mm.".to_string(),
                LimitHit => "What happened: A travel limit engaged mid-trial.\nLikely causes: Pull distance exceeds the travel envelope, or homing was skipped.\nHow to fix: Home the axis first, or reduce trial.pull_mm / check home.max_travel_mm.".to_string(),
                MaxRuntime => "What happened: max run time was exceeded.\nLikely causes: Slow pull speed, high pull distance, or a stall.\nHow to fix: Increase --max-run-ms or adjust trial speed/distance.".to_string(),
            };
        }
        // Fallback to generic for other domain errors
        return format!(
            "What happened: {te}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if (lower.contains("hx711") && lower.contains("timeout")) || lower.contains("datareadytimeout")
    {
        return "What happened: HX711 did not produce data within the configured timeout.\nLikely causes: Wrong DT/SCK pins, wiring/power issues, or timeout configured too low.\nHow to fix: Check [pins] in the config, verify 5V/GND, and raise hardware.sensor_read_timeout_ms.".to_string();
    }

    if lower.contains("gpio") {
        return "What happened: Failed to initialize hardware pins.\nLikely causes: Incorrect pin numbers or insufficient GPIO permissions.\nHow to fix: Fix the [pins] values in the config; ensure the process has permission to access GPIO.".to_string();
    }

    // Calibration CSV header special-case
    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'raw,kg'.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Map AbortReason (if present) to stable exit codes; non-abort errors return 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use tensile_core::error::{AbortReason, TesterError};
    if let Some(TesterError::Abort(reason)) = err.downcast_ref::<TesterError>() {
        return match reason {
            AbortReason::Estop => 2,
            AbortReason::LimitHit => 3,
            AbortReason::MaxRuntime => 4,
            AbortReason::MaxForce => 5,
            AbortReason::BufferFull => 6,
            AbortReason::NoContact => 7,
        };
    }
    1
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;
    use tensile_core::error::{AbortReason, TesterError};

    if let Some(TesterError::Abort(reason)) = err.downcast_ref::<TesterError>() {
        let msg = humanize(err);
        let details = LAST_LIMITS.get();
        let reason_name = abort_reason_name(reason);

        let detail_obj = match reason {
            AbortReason::MaxForce => {
                details.map(|l| json!({ "max_force_kg": l.max_force_kg }))
            }
            AbortReason::MaxRuntime => details.map(|l| json!({ "max_run_ms": l.max_run_ms })),
            AbortReason::BufferFull => {
                details.map(|l| json!({ "raw_capacity": l.raw_capacity }))
            }
            _ => None,
        };

        let obj = if let Some(d) = detail_obj {
            json!({ "reason": reason_name, "details": d, "message": msg })
        } else {
            json!({ "reason": reason_name, "message": msg })
        };
        return obj.to_string();
    }

    // Generic error JSON
    json!({ "reason": "Error", "message": humanize(err) }).to_string()
}
