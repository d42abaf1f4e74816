use serde::{Serialize, Serializer};
use std::fmt;

use crate::access_category::AccessCategory;
use crate::time::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StationId(pub u32);

impl StationId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sta{}", self.0)
    }
}

/// Flow identifiers start at 1 and follow flow creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FlowId(pub u32);

impl FlowId {
    /// Position in creation order; `None` for the unused id 0.
    pub fn index(self) -> Option<usize> {
        self.0.checked_sub(1).map(|i| i as usize)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human readable traffic class of a flow, as it appears in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowLabel {
    Voip,
    Video,
    BestEffort,
    /// Background flows are numbered from 1.
    Background(u32),
}

impl fmt::Display for FlowLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowLabel::Voip => f.write_str("VoIP"),
            FlowLabel::Video => f.write_str("Video"),
            FlowLabel::BestEffort => f.write_str("BestEffort"),
            FlowLabel::Background(n) => write!(f, "Background{n}"),
        }
    }
}

impl Serialize for FlowLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One traffic stream. Immutable once the run is configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flow {
    pub id: FlowId,
    pub source: StationId,
    pub destination: StationId,
    pub port: u16,
    pub label: FlowLabel,
    pub category: AccessCategory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub flow: FlowId,
    /// Per-flow sequence number, starting at 0.
    pub seq: u32,
    pub size_bytes: u32,
    pub enqueue_time: SimTime,
    /// Start of the first transmission attempt.
    pub transmit_time: Option<SimTime>,
    /// End of the data frame at the destination.
    pub receive_time: Option<SimTime>,
    /// Failed attempts so far (real collisions only).
    pub retries: u32,
}

impl Packet {
    pub fn new(flow: FlowId, seq: u32, size_bytes: u32, enqueue_time: SimTime) -> Self {
        Self {
            flow,
            seq,
            size_bytes,
            enqueue_time,
            transmit_time: None,
            receive_time: None,
            retries: 0,
        }
    }

    pub fn is_first_attempt(&self) -> bool {
        self.transmit_time.is_none()
    }

    /// Queueing plus contention time, once the packet has been attempted.
    pub fn access_delay(&self) -> Option<SimTime> {
        self.transmit_time.map(|t| t - self.enqueue_time)
    }
}
