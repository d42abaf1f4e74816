use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use edca_lab_abstract::TestbedConfig;
use edca_lab_abstract::time::as_secs_f64;
use edca_lab_simulator::{Simulation, scenario_runner};

mod sweep;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless grader and sweep runner for the EDCA testbed")]
struct Args {
    /// Scenario TOML file to execute and grade.
    #[arg(long, conflicts_with = "sweep")]
    scenario: Option<PathBuf>,

    /// Sweep plan TOML: scenarios run repeatedly with incrementing seeds.
    #[arg(long)]
    sweep: Option<PathBuf>,

    /// Base configuration the scenario overrides are applied to.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a JSON trace of the graded scenario.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("edca-lab-eval-host starting...");

    match (&args.scenario, &args.sweep) {
        (Some(path), None) => {
            let base = match &args.config {
                Some(config) => load_config(config)?,
                None => TestbedConfig::default(),
            };
            let scenario = scenario_runner::load_scenario(path)?;
            let sim = scenario_runner::run_scenario(&scenario, &base, args.trace_out.is_some())?;
            log_summary(&sim);
            if let Some(trace_path) = &args.trace_out {
                let data = serde_json::to_vec_pretty(&sim.export_report())
                    .context("Failed to serialize simulation trace")?;
                fs::write(trace_path, data)
                    .with_context(|| format!("Failed to write trace file {}", trace_path.display()))?;
            }
        }
        (None, Some(path)) => {
            let plan = sweep::load_plan(path)?;
            let summary = plan.run()?;
            info!("Sweep finished with {} flow records", summary.len());
        }
        _ => bail!("exactly one of --scenario or --sweep is required"),
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<TestbedConfig> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content).context("Failed to parse config file")
}

fn log_summary(sim: &Simulation) {
    let counters = sim.counters();
    info!(
        "Simulation duration: {:.3} s | exchanges: {} | collisions: {} | drops: {}",
        as_secs_f64(sim.now()),
        counters.successes,
        counters.collisions,
        counters.drops
    );
    for summary in sim.statistics().category_summaries() {
        if let Some(delay) = summary.mean_access_delay {
            info!("{} mean access delay: {:.1} us", summary.category, delay * 1e6);
        }
    }
}
