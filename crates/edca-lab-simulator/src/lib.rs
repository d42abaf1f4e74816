pub mod access;
pub mod channel;
pub mod engine;
pub mod queue;
pub mod report;
pub mod scenario_runner;
pub mod scheduler;
pub mod stats;
pub mod testbed;
pub mod trace;
pub mod traffic;

pub use access::{ChannelAccess, MediumCounters};
pub use channel::{MacTiming, NominalRatePhy, PhyModel};
pub use engine::{EventType, SimError, SimParams, Simulation};
pub use report::{FlowRecord, build_records, write_records};
pub use scheduler::{EventHandle, Scheduler, SchedulingViolation};
pub use stats::{CategorySummary, FlowStatistics, FlowStatsCollector};
pub use testbed::build_testbed;
pub use trace::{MediumEvent, MediumEventKind, SimulationReport};
pub use traffic::{TrafficGenerator, TrafficSpec};
