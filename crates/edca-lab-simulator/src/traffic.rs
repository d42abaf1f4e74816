//! Constant bit-rate packet sources, one per flow.

use edca_lab_abstract::{AccessCategory, Flow, FlowId, Packet, SimTime, StationId};

use crate::scheduler::EventHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSpec {
    pub packet_size: u32,
    pub interval: SimTime,
    pub max_packets: u32,
    pub start_time: SimTime,
}

/// Emits one packet of `packet_size` at `start_time` and every `interval`
/// after it, until `max_packets` have been emitted or the flow is stopped.
#[derive(Debug, Clone)]
pub struct TrafficGenerator {
    flow: FlowId,
    station: StationId,
    category: AccessCategory,
    spec: TrafficSpec,
    emitted: u32,
    stopped: bool,
    /// The scheduled emission, kept so it can be cancelled.
    pending: Option<EventHandle>,
}

impl TrafficGenerator {
    pub fn new(flow: &Flow, spec: TrafficSpec) -> Self {
        Self {
            flow: flow.id,
            station: flow.source,
            category: flow.category,
            spec,
            emitted: 0,
            stopped: false,
            pending: None,
        }
    }

    pub fn station(&self) -> StationId {
        self.station
    }

    pub fn category(&self) -> AccessCategory {
        self.category
    }

    fn exhausted(&self) -> bool {
        self.stopped || self.emitted >= self.spec.max_packets
    }

    /// Time of the first emission, or `None` if the generator never emits.
    pub fn first_emission(&self) -> Option<SimTime> {
        (!self.exhausted()).then_some(self.spec.start_time)
    }

    /// Produce the next packet, stamped with `now` as its enqueue time.
    pub fn emit(&mut self, now: SimTime) -> Option<Packet> {
        self.pending = None;
        if self.exhausted() {
            return None;
        }
        let packet = Packet::new(self.flow, self.emitted, self.spec.packet_size, now);
        self.emitted += 1;
        Some(packet)
    }

    pub fn next_emission(&self, now: SimTime) -> Option<SimTime> {
        (!self.exhausted()).then(|| now.saturating_add(self.spec.interval))
    }

    pub fn set_pending(&mut self, handle: EventHandle) {
        self.pending = Some(handle);
    }

    /// Stop emitting. Returns the handle of the emission that must be
    /// cancelled, if one is scheduled.
    pub fn stop(&mut self) -> Option<EventHandle> {
        self.stopped = true;
        self.pending.take()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}
