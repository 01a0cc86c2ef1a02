//! Thin CLI wrapper around the library.
//!
//! Exit codes: 0 success, 2 config error, 3 dependency-resolution failure,
//! 4 runtime fatal.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use satlink::config::ScenarioConfig;
use satlink::manager::Manager;
use satlink::orchestrator::{OrchestrationError, Orchestrator};
use satlink::registry::Registry;
use satlink::ExecMode;

#[derive(Parser)]
#[command(name = "satlink", about = "Epoch-stepped space/ground network simulator")]
struct Cli {
    /// Scenario description (JSON).
    scenario: PathBuf,

    /// Advance topologies on per-topology workers with an epoch-end
    /// delivery barrier.
    #[arg(long)]
    parallel: bool,

    /// Stop after this many epochs even if the window allows more.
    #[arg(long)]
    epochs: Option<u64>,
}

fn main() -> ExitCode {
    satlink::runtime::setup_tracing();
    let cli = Cli::parse();

    let mut cfg = match ScenarioConfig::from_file(&cli.scenario) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("satlink: {err}");
            return ExitCode::from(2);
        }
    };
    if let Some(epochs) = cli.epochs {
        if let Err(err) = truncate_window(&mut cfg, epochs) {
            eprintln!("satlink: {err}");
            return ExitCode::from(2);
        }
    }

    let registry = Registry::with_builtins();
    let mut orchestrator = Orchestrator::new(&registry);
    if cli.parallel {
        orchestrator = orchestrator.with_mode(ExecMode::Parallel);
    }
    let scenario = match orchestrator.build(&cfg) {
        Ok(scenario) => scenario,
        Err(err @ OrchestrationError::Config(_)) => {
            eprintln!("satlink: {err}");
            return ExitCode::from(2);
        }
        Err(err) => {
            eprintln!("satlink: {err}");
            return ExitCode::from(err.exit_code() as u8);
        }
    };

    let (manager, _client) = Manager::new(scenario);
    match manager.run() {
        Ok(summary) => {
            println!(
                "completed {} epochs ({} log records dropped)",
                summary.epochs_run, summary.dropped_log_records
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("satlink: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

/// Rewrites the scenario end time so exactly `epochs` epochs run.
fn truncate_window(cfg: &mut ScenarioConfig, epochs: u64) -> Result<(), String> {
    if epochs == 0 {
        return Err("--epochs must be at least 1".to_string());
    }
    let start = satlink::SimTime::parse(&cfg.simtime.starttime)
        .ok_or_else(|| format!("bad simtime.starttime `{}`", cfg.simtime.starttime))?;
    let end = start.offset((epochs - 1) as f64 * cfg.simtime.delta);
    cfg.simtime.endtime = end
        .to_datetime()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    Ok(())
}
