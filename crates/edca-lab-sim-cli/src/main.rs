use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use edca_lab_abstract::{TestbedConfig, TestbedOverride};
use edca_lab_simulator::{FlowRecord, SimulationReport, build_testbed, write_records};

#[derive(Parser, Debug)]
#[command(author, version, about = "Wireless EDCA testbed simulator")]
struct Args {
    /// Base configuration (TOML, camelCase keys). Options below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,

    #[command(flatten)]
    overrides: TestbedOverride,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("edca-lab-sim-cli starting…");

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => TestbedConfig::default(),
    };
    args.overrides.apply_to(&mut config);

    let mut sim = build_testbed(&config, args.trace_out.is_some()).context("Failed to set up the testbed")?;
    sim.run()?;

    let records = sim.records();
    log_summary(&records);
    write_records(&config.output, &records)?;

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &sim.export_report())?;
    }

    info!("Simulation finished. Output: {}", config.output.display());
    Ok(())
}

fn load_config(path: &Path) -> Result<TestbedConfig> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: TestbedConfig = toml::from_str(&content).context("Failed to parse config file")?;
    Ok(config)
}

fn log_summary(records: &[FlowRecord]) {
    for record in records {
        info!(
            "{} | tx: {} | rx: {} | throughput: {:.0} bit/s",
            record.flow_label, record.tx_packets, record.rx_packets, record.throughput
        );
    }
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data).with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}
