use anyhow::{Context, anyhow, bail};
use edca_lab_abstract::{TestAssertion, TestScenario, TestbedConfig};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::engine::Simulation;
use crate::report::FlowRecord;
use crate::testbed::build_testbed;

pub fn load_scenario(path: &Path) -> anyhow::Result<TestScenario> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    let scenario: TestScenario = toml::from_str(&content).context("Failed to parse scenario")?;
    Ok(scenario)
}

/// Run a scenario on top of `base` and check its assertions. Returns the
/// finished simulation so callers can export records or a trace.
pub fn run_scenario(scenario: &TestScenario, base: &TestbedConfig, record_trace: bool) -> anyhow::Result<Simulation> {
    info!("Running Scenario: {}", scenario.name);
    if !scenario.description.is_empty() {
        info!("Description: {}", scenario.description);
    }

    let mut config = base.clone();
    scenario.config.apply_to(&mut config);
    let mut sim = build_testbed(&config, record_trace)?;
    sim.run()?;

    check_assertions(&scenario.assertions, &sim)?;
    info!("Scenario {} passed {} assertions", scenario.name, scenario.assertions.len());
    Ok(sim)
}

fn find_flow<'a>(records: &'a [FlowRecord], label: &str) -> anyhow::Result<&'a FlowRecord> {
    records
        .iter()
        .find(|r| r.flow_label.to_string() == label)
        .ok_or_else(|| anyhow!("Assertion Failed: no flow labelled {label:?}"))
}

fn check_range(what: &str, flow: &str, value: u64, min: u64, max: Option<u64>) -> anyhow::Result<()> {
    if value < min {
        bail!("Assertion Failed: {flow} {what} = {value}, expected min {min}");
    }
    if let Some(max) = max
        && value > max
    {
        bail!("Assertion Failed: {flow} {what} = {value}, expected max {max}");
    }
    Ok(())
}

pub fn check_assertions(assertions: &[TestAssertion], sim: &Simulation) -> anyhow::Result<()> {
    let records = sim.records();
    for assertion in assertions {
        match assertion {
            TestAssertion::RxMatchesTx { flow } => {
                let record = find_flow(&records, flow)?;
                if record.rx_packets != record.tx_packets {
                    bail!(
                        "Assertion Failed: {flow} received {} of {} transmitted packets",
                        record.rx_packets,
                        record.tx_packets
                    );
                }
            }
            TestAssertion::TxPackets { flow, min, max } => {
                let record = find_flow(&records, flow)?;
                check_range("txPackets", flow, record.tx_packets, *min, *max)?;
            }
            TestAssertion::RxPackets { flow, min, max } => {
                let record = find_flow(&records, flow)?;
                check_range("rxPackets", flow, record.rx_packets, *min, *max)?;
            }
            TestAssertion::AccessDelayOrder { faster, slower } => {
                let stats = sim.statistics();
                let fast = stats.category_summary(*faster).mean_access_delay;
                let slow = stats.category_summary(*slower).mean_access_delay;
                match (fast, slow) {
                    (Some(fast), Some(slow)) if fast < slow => {}
                    (Some(fast), Some(slow)) => bail!(
                        "Assertion Failed: mean access delay of {faster} ({fast:.6}s) is not below {slower} ({slow:.6}s)"
                    ),
                    _ => bail!("Assertion Failed: {faster} or {slower} transmitted no packets"),
                }
            }
            TestAssertion::Lossless => {
                if let Some(record) = records.iter().find(|r| r.rx_packets != r.tx_packets) {
                    bail!(
                        "Assertion Failed: {} lost {} packets",
                        record.flow_label,
                        record.tx_packets - record.rx_packets
                    );
                }
            }
        }
    }
    Ok(())
}
