//! Scenario × repetition parameter sweeps with an aggregated summary.

use anyhow::Context;
use edca_lab_abstract::{TestbedConfig, TestbedOverride};
use edca_lab_simulator::{FlowRecord, build_testbed, write_records};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SUMMARY_FILE: &str = "summary-results.json";

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct SweepPlan {
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    /// Run k of the sweep (counting from 1) uses seed `base_seed + k`.
    #[serde(default = "default_base_seed")]
    pub base_seed: u64,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Also write one JSON file per run.
    #[serde(default = "default_store_individual")]
    pub store_individual: bool,
    /// Shared by every scenario; scenario keys win.
    #[serde(default)]
    pub fixed: TestbedOverride,
    pub scenarios: Vec<SweepScenario>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SweepScenario {
    pub name: String,
    #[serde(default)]
    pub config: TestbedOverride,
}

fn default_repetitions() -> u32 {
    2
}

fn default_base_seed() -> u64 {
    413_743
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_store_individual() -> bool {
    true
}

/// A flow record tagged with the run it came from.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SummaryEntry {
    #[serde(flatten)]
    pub record: FlowRecord,
    pub scenario: String,
    pub run_id: u64,
}

pub fn load_plan(path: &Path) -> anyhow::Result<SweepPlan> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read sweep plan {}", path.display()))?;
    let plan: SweepPlan = toml::from_str(&content).context("Failed to parse sweep plan")?;
    Ok(plan)
}

impl SweepPlan {
    /// Run every scenario `repetitions` times and write the summary. A run
    /// that fails is logged and left out of the summary.
    pub fn run(&self) -> anyhow::Result<Vec<SummaryEntry>> {
        fs::create_dir_all(&self.results_dir)
            .with_context(|| format!("Failed to create results directory {}", self.results_dir.display()))?;

        let mut summary = Vec::new();
        let mut run_id = self.base_seed;
        for scenario in &self.scenarios {
            info!("=== Running scenario: {} ===", scenario.name);
            let overrides = self.fixed.merged_with(&scenario.config);
            for trial in 1..=self.repetitions {
                run_id += 1;
                let tag = format!("{}_run{trial}", scenario.name);
                match self.run_once(&overrides, run_id, &tag) {
                    Ok(records) => summary.extend(records.into_iter().map(|record| SummaryEntry {
                        record,
                        scenario: scenario.name.clone(),
                        run_id,
                    })),
                    Err(err) => warn!("Run {tag} failed: {err:#}"),
                }
            }
        }

        let path = self.results_dir.join(SUMMARY_FILE);
        let data = serde_json::to_vec_pretty(&summary).context("Failed to serialize sweep summary")?;
        fs::write(&path, data).with_context(|| format!("Failed to write sweep summary {}", path.display()))?;
        info!("Combined results saved to: {}", path.display());
        Ok(summary)
    }

    fn run_once(&self, overrides: &TestbedOverride, run_id: u64, tag: &str) -> anyhow::Result<Vec<FlowRecord>> {
        let mut config = TestbedConfig::default();
        overrides.apply_to(&mut config);
        config.seed = run_id;
        config.output = self.results_dir.join(format!("{tag}.json"));

        info!("Running: {tag} (seed {run_id})");
        let mut sim = build_testbed(&config, false)?;
        sim.run()?;
        let records = sim.records();
        if self.store_individual {
            write_records(&config.output, &records)?;
        }
        Ok(records)
    }
}
