//! Discrete-event scheduler.
//!
//! Events pop in strictly increasing time order; events at the same time pop
//! in the order they were scheduled. Handlers run synchronously and may
//! schedule or cancel further events, but never in the past.

use edca_lab_abstract::SimTime;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event scheduled at {requested} ns, before current time {now} ns")]
pub struct SchedulingViolation {
    pub requested: SimTime,
    pub now: SimTime,
}

/// Identifies one scheduled event so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(u64);

#[derive(Debug)]
struct Scheduled<E> {
    time: SimTime,
    id: u64, // insertion order, breaks ties
    payload: E,
}

// Custom Ord for Min-Heap (smallest time pops first)
impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

pub struct Scheduler<E> {
    now: SimTime,
    queue: BinaryHeap<Scheduled<E>>,
    next_id: u64,
    /// Ids still waiting to fire. Cancelled or fired ids are absent.
    live: HashSet<u64>,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            now: 0,
            queue: BinaryHeap::new(),
            next_id: 0,
            live: HashSet::new(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of events that will still fire.
    pub fn pending(&self) -> usize {
        self.live.len()
    }

    pub fn schedule_at(&mut self, time: SimTime, payload: E) -> Result<EventHandle, SchedulingViolation> {
        if time < self.now {
            return Err(SchedulingViolation {
                requested: time,
                now: self.now,
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push(Scheduled { time, id, payload });
        self.live.insert(id);
        Ok(EventHandle(id))
    }

    /// Remove a pending event. Returns false if it already fired or was
    /// cancelled before.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.live.remove(&handle.0)
    }

    /// Pop the next live event strictly before `end`, advancing the clock to
    /// its time.
    pub fn pop_before(&mut self, end: SimTime) -> Option<(SimTime, E)> {
        self.discard_cancelled();
        if self.queue.peek()?.time >= end {
            return None;
        }
        let event = self.queue.pop()?;
        self.live.remove(&event.id);
        self.now = event.time;
        Some((event.time, event.payload))
    }

    /// Drain every event before `end`, handing each to `handler` together with
    /// the scheduler so the handler can schedule follow-up events. The clock
    /// is left at `end`; events at or after it never run.
    pub fn run_until<F, Err>(&mut self, end: SimTime, mut handler: F) -> Result<(), Err>
    where
        F: FnMut(&mut Self, E) -> Result<(), Err>,
    {
        while let Some((_, payload)) = self.pop_before(end) {
            handler(self, payload)?;
        }
        self.now = self.now.max(end);
        Ok(())
    }

    fn discard_cancelled(&mut self) {
        while let Some(head) = self.queue.peek() {
            if self.live.contains(&head.id) {
                break;
            }
            self.queue.pop();
        }
    }
}
