//! Per-station, per-category transmit queues and their backoff state.
//!
//! Backoff is counted lazily: instead of an event per slot, each queue keeps
//! the slot-aligned time its counter was last brought up to date and derives
//! its access time from the start of the current idle period.

use edca_lab_abstract::{AccessCategory, AccessCategoryProfile, EdcaProfiles, Packet, SimTime, StationId};
use rand::Rng;
use serde::Serialize;
use std::collections::VecDeque;

use crate::channel::{MacTiming, PhyModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AcState {
    /// Nothing to send.
    Idle,
    /// Waiting for the medium to stay idle for AIFS.
    Deferring,
    /// Counting down idle slots.
    Backoff,
    /// On air (including collided attempts).
    Transmitting,
    /// Between two frames of one TXOP.
    WaitingTxopContinuation,
}

/// Outcome of a collided attempt for the frame at the head of the queue.
#[derive(Debug, Clone)]
pub struct CollidedFrame {
    /// Snapshot of the frame as attempted.
    pub packet: Packet,
    pub first_attempt: bool,
    /// Set when the retry limit was exceeded and the frame left the queue.
    pub dropped: bool,
}

#[derive(Debug, Clone)]
pub struct EdcaQueue {
    category: AccessCategory,
    profile: AccessCategoryProfile,
    cw: u32,
    backoff_slots: u32,
    /// Slot-aligned time up to which `backoff_slots` is current.
    last_update: SimTime,
    /// AIFS is measured from the later of this and the start of the idle period.
    aifs_ref: SimTime,
    state: AcState,
    queue: VecDeque<Packet>,
    txop_start: SimTime,
}

impl EdcaQueue {
    pub fn new(category: AccessCategory, profile: AccessCategoryProfile) -> Self {
        Self {
            category,
            profile,
            cw: profile.min_cw,
            backoff_slots: 0,
            last_update: 0,
            aifs_ref: 0,
            state: AcState::Idle,
            queue: VecDeque::new(),
            txop_start: 0,
        }
    }

    pub fn category(&self) -> AccessCategory {
        self.category
    }

    pub fn profile(&self) -> &AccessCategoryProfile {
        &self.profile
    }

    pub fn state(&self) -> AcState {
        self.state
    }

    pub fn contention_window(&self) -> u32 {
        self.cw
    }

    pub fn backoff_slots(&self) -> u32 {
        self.backoff_slots
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn head(&self) -> Option<&Packet> {
        self.queue.front()
    }

    /// Append a packet. Returns true when this starts a new contention
    /// (the category was idle).
    pub fn enqueue<R: Rng>(&mut self, packet: Packet, now: SimTime, rng: &mut R) -> bool {
        self.queue.push_back(packet);
        if self.state != AcState::Idle {
            return false;
        }
        self.restart_contention(now, rng);
        true
    }

    /// Waiting for or counting down towards a channel access.
    pub fn is_contending(&self) -> bool {
        matches!(self.state, AcState::Deferring | AcState::Backoff) && !self.queue.is_empty()
    }

    fn backoff_start(&self, idle_since: SimTime, timing: &MacTiming) -> SimTime {
        let aifs_end = idle_since.max(self.aifs_ref) + timing.aifs(self.profile.aifsn);
        self.last_update.max(aifs_end)
    }

    /// When this queue's counter reaches zero, assuming the medium stays idle.
    pub fn access_time(&self, idle_since: SimTime, timing: &MacTiming) -> SimTime {
        self.backoff_start(idle_since, timing) + SimTime::from(self.backoff_slots) * timing.slot
    }

    /// Consume the idle slots observed up to `now`. Called when the medium
    /// turns busy; the partial slot in progress is lost.
    pub fn freeze(&mut self, now: SimTime, idle_since: SimTime, timing: &MacTiming) {
        if !self.is_contending() {
            return;
        }
        let start = self.backoff_start(idle_since, timing);
        if now < start {
            return;
        }
        let elapsed = ((now - start) / timing.slot).min(SimTime::from(self.backoff_slots));
        self.backoff_slots -= elapsed as u32;
        self.last_update = start + elapsed * timing.slot;
        self.state = AcState::Backoff;
    }

    /// Won the medium: take the head frame on air.
    pub fn begin_transmission(&mut self, now: SimTime) -> Option<Packet> {
        let mut packet = self.queue.pop_front()?;
        packet.transmit_time.get_or_insert(now);
        self.state = AcState::Transmitting;
        self.txop_start = now;
        Some(packet)
    }

    /// Hold the medium for the next frame of the current TXOP if it fits in
    /// the remaining budget. `start` is when that frame would go on air.
    pub fn reserve_txop_continuation(&mut self, start: SimTime, timing: &MacTiming, phy: &dyn PhyModel) -> bool {
        if self.profile.txop_limit == 0 {
            return false;
        }
        let Some(next) = self.queue.front() else {
            return false;
        };
        let end = start + timing.exchange_duration(phy, next.size_bytes);
        if end - self.txop_start > self.profile.txop_limit {
            return false;
        }
        self.state = AcState::WaitingTxopContinuation;
        true
    }

    /// Put the reserved TXOP frame on air.
    pub fn resume_txop(&mut self, now: SimTime) -> Option<Packet> {
        if self.state != AcState::WaitingTxopContinuation {
            return None;
        }
        let mut packet = self.queue.pop_front()?;
        packet.transmit_time.get_or_insert(now);
        self.state = AcState::Transmitting;
        Some(packet)
    }

    /// Exchange acknowledged and the TXOP is over.
    pub fn complete_success<R: Rng>(&mut self, now: SimTime, rng: &mut R) {
        self.cw = self.profile.min_cw;
        self.end_access(now, rng);
    }

    /// The head frame collided with another station's frame.
    pub fn collide(&mut self, now: SimTime, retry_limit: u32) -> Option<CollidedFrame> {
        let head = self.queue.front_mut()?;
        let first_attempt = head.transmit_time.is_none();
        head.transmit_time.get_or_insert(now);
        head.retries += 1;
        let packet = head.clone();
        let dropped = packet.retries > retry_limit;
        if dropped {
            self.queue.pop_front();
            self.cw = self.profile.min_cw;
        } else {
            self.double_cw();
        }
        self.state = AcState::Transmitting;
        Some(CollidedFrame {
            packet,
            first_attempt,
            dropped,
        })
    }

    /// Collision over: contend again with the (possibly doubled) window.
    pub fn complete_collision<R: Rng>(&mut self, now: SimTime, rng: &mut R) {
        self.end_access(now, rng);
    }

    /// Lost an internal contention to a higher priority category of the
    /// same station. The frame stays queued.
    pub fn virtual_collision<R: Rng>(&mut self, now: SimTime, rng: &mut R) {
        self.double_cw();
        self.draw_backoff(rng);
        self.last_update = now;
        self.aifs_ref = now;
        self.state = AcState::Backoff;
    }

    fn end_access<R: Rng>(&mut self, now: SimTime, rng: &mut R) {
        if self.queue.is_empty() {
            self.state = AcState::Idle;
            self.backoff_slots = 0;
            return;
        }
        self.restart_contention(now, rng);
    }

    fn restart_contention<R: Rng>(&mut self, now: SimTime, rng: &mut R) {
        self.draw_backoff(rng);
        self.last_update = now;
        self.aifs_ref = now;
        self.state = AcState::Deferring;
    }

    fn draw_backoff<R: Rng>(&mut self, rng: &mut R) {
        self.backoff_slots = rng.random_range(0..=self.cw);
    }

    fn double_cw(&mut self) {
        let doubled = self.cw.saturating_add(1).saturating_mul(2) - 1;
        self.cw = doubled.min(self.profile.max_cw);
    }
}

/// A client or access point: one independent queue per access category.
#[derive(Debug, Clone)]
pub struct Station {
    id: StationId,
    name: String,
    queues: [EdcaQueue; 4],
}

impl Station {
    pub fn new(id: StationId, name: impl Into<String>, profiles: &EdcaProfiles) -> Self {
        Self {
            id,
            name: name.into(),
            queues: AccessCategory::ALL.map(|ac| EdcaQueue::new(ac, *profiles.get(ac))),
        }
    }

    pub fn id(&self) -> StationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self, category: AccessCategory) -> &EdcaQueue {
        &self.queues[category.index()]
    }

    pub fn queue_mut(&mut self, category: AccessCategory) -> &mut EdcaQueue {
        &mut self.queues[category.index()]
    }

    /// Queues in priority order, highest first.
    pub fn queues(&self) -> impl Iterator<Item = &EdcaQueue> {
        self.queues.iter()
    }

    pub fn queues_mut(&mut self) -> impl Iterator<Item = &mut EdcaQueue> {
        self.queues.iter_mut()
    }
}
