//! The shared medium and the physical-layer collaborator.
//!
//! Only airtime matters here: a frame of a given size occupies the medium
//! for a duration supplied by a [`PhyModel`]. Modulation, bit errors and
//! capture are not modelled.

use edca_lab_abstract::time::{NANOS_PER_SEC, micros};
use edca_lab_abstract::{AccessCategory, SimTime, StationId};

/// Supplies on-air durations for frames.
pub trait PhyModel {
    /// Airtime of a data frame carrying `size_bytes` of payload.
    fn data_duration(&self, size_bytes: u32) -> SimTime;

    fn ack_duration(&self) -> SimTime;
}

/// Fixed-rate PHY: preamble plus bits at a nominal rate.
#[derive(Debug, Clone)]
pub struct NominalRatePhy {
    pub rate_bps: f64,
    pub preamble: SimTime,
    /// Bytes added to every payload (UDP, IP, LLC, MAC header, FCS).
    pub overhead_bytes: u32,
    pub ack_bytes: u32,
}

impl NominalRatePhy {
    pub fn new(rate_mbps: f64) -> Self {
        Self {
            rate_bps: rate_mbps * 1e6,
            preamble: micros(20),
            overhead_bytes: 66,
            ack_bytes: 14,
        }
    }

    fn airtime(&self, bytes: u32) -> SimTime {
        let bits = f64::from(bytes) * 8.0;
        self.preamble + (bits * NANOS_PER_SEC as f64 / self.rate_bps).ceil() as SimTime
    }
}

impl Default for NominalRatePhy {
    fn default() -> Self {
        Self::new(54.0)
    }
}

impl PhyModel for NominalRatePhy {
    fn data_duration(&self, size_bytes: u32) -> SimTime {
        self.airtime(size_bytes + self.overhead_bytes)
    }

    fn ack_duration(&self) -> SimTime {
        self.airtime(self.ack_bytes)
    }
}

/// Inter-frame timing of the MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacTiming {
    pub slot: SimTime,
    pub sifs: SimTime,
}

impl Default for MacTiming {
    fn default() -> Self {
        Self {
            slot: micros(9),
            sifs: micros(16),
        }
    }
}

impl MacTiming {
    /// AIFS = SIFS + AIFSN slots.
    pub fn aifs(&self, aifsn: u32) -> SimTime {
        self.sifs + SimTime::from(aifsn) * self.slot
    }

    /// How long a sender waits for an ACK that never comes.
    pub fn ack_timeout(&self, phy: &dyn PhyModel) -> SimTime {
        self.sifs + phy.ack_duration() + self.slot
    }

    /// Data frame, SIFS, ACK.
    pub fn exchange_duration(&self, phy: &dyn PhyModel, size_bytes: u32) -> SimTime {
        phy.data_duration(size_bytes) + self.sifs + phy.ack_duration()
    }
}

/// Busy/idle state of the single shared channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelState {
    busy_until: SimTime,
    /// Start of the current idle period (valid while idle).
    idle_since: SimTime,
    active: Option<(StationId, AccessCategory)>,
    busy: bool,
}

impl ChannelState {
    pub fn is_idle(&self) -> bool {
        !self.busy
    }

    pub fn idle_since(&self) -> SimTime {
        self.idle_since
    }

    pub fn busy_until(&self) -> SimTime {
        self.busy_until
    }

    pub fn active_transmitter(&self) -> Option<(StationId, AccessCategory)> {
        self.active
    }

    /// Mark the medium busy until `until`. `owner` is `None` for a collision.
    pub fn occupy(&mut self, until: SimTime, owner: Option<(StationId, AccessCategory)>) {
        self.busy = true;
        self.busy_until = until;
        self.active = owner;
    }

    pub fn release(&mut self, now: SimTime) {
        self.busy = false;
        self.active = None;
        self.idle_since = now;
    }
}
