use edca_lab_abstract::{AccessCategory, FlowId, SimTime, StationId, TestbedConfig};
use serde::Serialize;

use crate::access::MediumCounters;
use crate::report::FlowRecord;
use crate::stats::CategorySummary;

/// A notable medium event, for offline inspection of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediumEvent {
    pub time: SimTime,
    #[serde(flatten)]
    pub kind: MediumEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediumEventKind {
    TxStart {
        station: StationId,
        category: AccessCategory,
        flow: FlowId,
        seq: u32,
        retries: u32,
    },
    TxopContinuation {
        station: StationId,
        category: AccessCategory,
        flow: FlowId,
        seq: u32,
    },
    Delivered {
        flow: FlowId,
        seq: u32,
        delay: SimTime,
    },
    Collision {
        parties: Vec<(StationId, AccessCategory)>,
        until: SimTime,
    },
    VirtualCollision {
        station: StationId,
        winner: AccessCategory,
        losers: Vec<AccessCategory>,
    },
    Dropped {
        station: StationId,
        category: AccessCategory,
        flow: FlowId,
        seq: u32,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<TestbedConfig>,
    /// Seconds of simulated time.
    pub duration: f64,
    pub flows: Vec<FlowRecord>,
    pub categories: Vec<CategorySummary>,
    pub medium: MediumCounters,
    /// Fraction of the run the medium was busy.
    pub utilization: f64,
    pub events: Vec<MediumEvent>,
}
