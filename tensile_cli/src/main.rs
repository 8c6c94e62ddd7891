//! Tensile tester CLI: homing, manual positioning, trial runs, health
//! checks. Defaults to the simulated rig; build with `--features hardware`
//! for the Raspberry Pi backends.

mod cli;
mod error_fmt;
mod run;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::run::TrialReport;

fn main() {
    if let Err(err) = try_main() {
        let json = JSON_MODE.get().copied().unwrap_or(false);
        if json {
            eprintln!("{}", error_fmt::format_error_json(&err));
        } else {
            eprintln!("Error: {err}");
            eprintln!("{}", error_fmt::humanize(&err));
        }
        std::process::exit(error_fmt::exit_code_for_error(&err));
    }
}

fn try_main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let text = std::fs::read_to_string(&cli.config)
        .map_err(|e| eyre::eyre!("read config {:?}: {}", cli.config, e))?;
    let cfg = tensile_config::load_toml(&text)
        .map_err(|e| eyre::eyre!("parse config {:?}: {}", cli.config, e))?;
    cfg.validate()?;

    init_logging(&cli, &cfg.logging);

    let calibration = run::resolve_calibration(&cfg, cli.calibration.as_deref())?;

    // Ctrl-C acts as the software E-stop: every loop polls this flag.
    let estop = Arc::new(AtomicBool::new(false));
    {
        let estop = estop.clone();
        ctrlc::set_handler(move || {
            estop.store(true, Ordering::Relaxed);
        })?;
    }

    match cli.cmd {
        Commands::Home => {
            dispatch_home(&cfg, &estop)?;
            println!("homed; crosshead at work origin");
        }
        Commands::Move { to, by } => {
            let pos = dispatch_move(&cfg, to, by, &estop)?;
            println!("position: {pos:.2} mm");
        }
        Commands::Run {
            trials,
            max_run_ms,
            direct,
        } => {
            let report = dispatch_run(&cfg, calibration, trials, max_run_ms, direct, &estop)?;
            print_report(&report, cli.json);
        }
        Commands::SelfCheck => {
            dispatch_self_check(&cfg)?;
            println!("self-check ok");
        }
    }
    Ok(())
}

fn dispatch_home(cfg: &tensile_config::Config, estop: &AtomicBool) -> eyre::Result<()> {
    #[cfg(feature = "hardware")]
    return run::hw::home(cfg, estop);
    #[cfg(not(feature = "hardware"))]
    run::sim::home(cfg, estop)
}

fn dispatch_move(
    cfg: &tensile_config::Config,
    to: Option<f32>,
    by: Option<f32>,
    estop: &AtomicBool,
) -> eyre::Result<f32> {
    #[cfg(feature = "hardware")]
    return run::hw::manual(cfg, to, by, estop);
    #[cfg(not(feature = "hardware"))]
    run::sim::manual(cfg, to, by, estop)
}

fn dispatch_run(
    cfg: &tensile_config::Config,
    calibration: tensile_core::Calibration,
    trials: u32,
    max_run_ms: Option<u64>,
    direct: bool,
    estop: &Arc<AtomicBool>,
) -> eyre::Result<TrialReport> {
    #[cfg(feature = "hardware")]
    return run::hw::run_trials(cfg, calibration, trials, max_run_ms, direct, estop);
    #[cfg(not(feature = "hardware"))]
    {
        // The simulator always runs the direct loop.
        let _ = direct;
        run::sim::run_trials(cfg, calibration, trials, max_run_ms, estop)
    }
}

fn dispatch_self_check(cfg: &tensile_config::Config) -> eyre::Result<()> {
    #[cfg(feature = "hardware")]
    return run::hw::self_check(cfg);
    #[cfg(not(feature = "hardware"))]
    run::sim::self_check(cfg)
}

/// Accumulated curve to stdout: JSON lines with --json, a table otherwise.
fn print_report(report: &TrialReport, json: bool) {
    for (i, outcome) in report.outcomes.iter().enumerate() {
        tracing::info!(trial = i, ?outcome, "outcome");
    }
    if json {
        for p in &report.points {
            let line = serde_json::json!({
                "time_ms": p.time_ms,
                "distance_mm": p.distance_mm,
                "force_kg": p.force_kg,
                "min_kg": p.min_kg,
                "max_kg": p.max_kg,
            });
            println!("{line}");
        }
        return;
    }
    println!("trials complete: {}", report.outcomes.len());
    println!("{:>8} {:>12} {:>10} {:>10} {:>10}", "t(ms)", "dist(mm)", "kg", "min", "max");
    for p in &report.points {
        println!(
            "{:>8} {:>12.3} {:>10.3} {:>10.3} {:>10.3}",
            p.time_ms, p.distance_mm, p.force_kg, p.min_kg, p.max_kg
        );
    }
}

/// Console logging per --log-level / --json, plus an optional JSON-lines
/// file sink from the `[logging]` config section.
fn init_logging(cli: &Cli, logging: &tensile_config::Logging) {
    let level = logging
        .level
        .clone()
        .unwrap_or_else(|| cli.log_level.clone());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_layer = logging.file.as_ref().map(|path| {
        use tracing_appender::rolling::{RollingFileAppender, Rotation};
        let p = std::path::Path::new(path);
        let dir = p.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
        let name = p
            .file_name()
            .map_or_else(|| "tensile.log".into(), |n| n.to_string_lossy().into_owned());
        let rotation = match logging.rotation.as_deref() {
            Some("daily") => Rotation::DAILY,
            Some("hourly") => Rotation::HOURLY,
            _ => Rotation::NEVER,
        };
        let (writer, guard) = tracing_appender::non_blocking(RollingFileAppender::new(
            rotation, dir, name,
        ));
        let _ = FILE_GUARD.set(guard);
        tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .boxed()
    });

    let console_layer = if cli.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();
}
