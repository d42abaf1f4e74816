pub mod access_category;
pub mod config;
pub mod packet;
pub mod scenario;
pub mod time;

pub use access_category::{AccessCategory, AccessCategoryProfile, EdcaProfiles};
pub use config::{ConfigError, TestbedConfig};
pub use packet::{Flow, FlowId, FlowLabel, Packet, StationId};
pub use scenario::{TestAssertion, TestScenario, TestbedOverride};
pub use time::SimTime;
