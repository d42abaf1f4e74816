//! EDCA arbitration of the shared medium.
//!
//! [`ChannelAccess`] owns the channel state and decides, at each access
//! attempt, which queue wins the medium. Stations are owned by the caller and
//! passed in by reference. Results come back as plain outcome values; the
//! engine turns them into scheduled events and statistics.

use edca_lab_abstract::{AccessCategory, Packet, SimTime, StationId};
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::channel::{ChannelState, MacTiming, PhyModel};
use crate::queue::{CollidedFrame, Station};

/// Aggregate medium usage over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediumCounters {
    /// Acknowledged exchanges, TXOP continuations included.
    pub successes: u64,
    /// Medium-level collisions (one per colliding attempt, not per party).
    pub collisions: u64,
    pub virtual_collisions: u64,
    /// Frames discarded after the retry limit.
    pub drops: u64,
    /// Nanoseconds the medium was busy.
    pub busy_time: SimTime,
}

/// A frame that just went on air.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub station: StationId,
    pub category: AccessCategory,
    pub packet: Packet,
    /// Counts towards the flow's transmitted packets.
    pub first_attempt: bool,
    pub start: SimTime,
    /// End of the data frame at the receiver.
    pub data_end: SimTime,
    /// End of the ACK; the medium is released here.
    pub exchange_end: SimTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualCollision {
    pub station: StationId,
    pub winner: AccessCategory,
    pub losers: Vec<AccessCategory>,
}

#[derive(Debug, Clone)]
pub struct CollisionParty {
    pub station: StationId,
    pub category: AccessCategory,
    pub frame: CollidedFrame,
}

#[derive(Debug, Clone)]
pub enum AccessResult {
    /// No queue was ready.
    Idle,
    Transmit(Transmission),
    Collision { parties: Vec<CollisionParty>, end: SimTime },
}

#[derive(Debug, Clone)]
pub struct Contention {
    pub virtual_collisions: Vec<VirtualCollision>,
    pub result: AccessResult,
}

pub struct ChannelAccess {
    timing: MacTiming,
    phy: Box<dyn PhyModel>,
    retry_limit: u32,
    channel: ChannelState,
    busy_since: SimTime,
    counters: MediumCounters,
}

impl ChannelAccess {
    pub fn new(timing: MacTiming, phy: Box<dyn PhyModel>, retry_limit: u32) -> Self {
        Self {
            timing,
            phy,
            retry_limit,
            channel: ChannelState::default(),
            busy_since: 0,
            counters: MediumCounters::default(),
        }
    }

    pub fn timing(&self) -> &MacTiming {
        &self.timing
    }

    pub fn phy(&self) -> &dyn PhyModel {
        self.phy.as_ref()
    }

    pub fn channel(&self) -> &ChannelState {
        &self.channel
    }

    pub fn counters(&self) -> &MediumCounters {
        &self.counters
    }

    /// Earliest time any queue may access the medium, if it is idle and
    /// somebody is contending.
    pub fn next_access(&self, stations: &[Station]) -> Option<SimTime> {
        if !self.channel.is_idle() {
            return None;
        }
        let idle_since = self.channel.idle_since();
        stations
            .iter()
            .flat_map(Station::queues)
            .filter(|q| q.is_contending())
            .map(|q| q.access_time(idle_since, &self.timing))
            .min()
    }

    /// Resolve an access attempt at `now`.
    ///
    /// Within a station the highest priority ready category wins and the
    /// others take a virtual collision. If more than one station is left with
    /// a winner, all of them collide on the medium.
    pub fn contend<R: Rng>(&mut self, now: SimTime, stations: &mut [Station], rng: &mut R) -> Contention {
        let mut virtual_collisions = Vec::new();
        if !self.channel.is_idle() {
            return Contention {
                virtual_collisions,
                result: AccessResult::Idle,
            };
        }
        let idle_since = self.channel.idle_since();

        let mut winners: Vec<(StationId, AccessCategory)> = Vec::new();
        for station in stations.iter_mut() {
            let mut losers: Vec<AccessCategory> = station
                .queues()
                .filter(|q| q.is_contending() && q.access_time(idle_since, &self.timing) <= now)
                .map(|q| q.category())
                .collect();
            let Some(winner) = losers
                .iter()
                .copied()
                .reduce(|best, ac| if ac.outranks(best) { ac } else { best })
            else {
                continue;
            };
            losers.retain(|&ac| ac != winner);
            if !losers.is_empty() {
                for &loser in &losers {
                    station.queue_mut(loser).virtual_collision(now, rng);
                }
                debug!(
                    "{} ({}): virtual collision, {} wins over {:?}",
                    station.id(),
                    station.name(),
                    winner,
                    losers
                );
                self.counters.virtual_collisions += 1;
                virtual_collisions.push(VirtualCollision {
                    station: station.id(),
                    winner,
                    losers,
                });
            }
            winners.push((station.id(), winner));
        }

        if winners.is_empty() {
            return Contention {
                virtual_collisions,
                result: AccessResult::Idle,
            };
        }

        // The medium turns busy: everybody else stops counting.
        for station in stations.iter_mut() {
            let id = station.id();
            for queue in station.queues_mut() {
                if !winners.contains(&(id, queue.category())) {
                    queue.freeze(now, idle_since, &self.timing);
                }
            }
        }

        let result = if let &[(station, category)] = winners.as_slice() {
            self.start_transmission(now, station, category, stations)
        } else {
            self.collide(now, &winners, stations)
        };
        Contention {
            virtual_collisions,
            result,
        }
    }

    fn start_transmission(
        &mut self,
        now: SimTime,
        station: StationId,
        category: AccessCategory,
        stations: &mut [Station],
    ) -> AccessResult {
        let queue = stations[station.index()].queue_mut(category);
        let first_attempt = queue.head().is_some_and(Packet::is_first_attempt);
        let Some(packet) = queue.begin_transmission(now) else {
            return AccessResult::Idle;
        };
        self.busy_since = now;
        let tx = self.launch(now, station, category, packet, first_attempt);
        debug!(
            "{station}/{category} transmits flow {} seq {} until {}",
            tx.packet.flow, tx.packet.seq, tx.exchange_end
        );
        AccessResult::Transmit(tx)
    }

    fn launch(
        &mut self,
        now: SimTime,
        station: StationId,
        category: AccessCategory,
        packet: Packet,
        first_attempt: bool,
    ) -> Transmission {
        let data_end = now + self.phy.data_duration(packet.size_bytes);
        let exchange_end = data_end + self.timing.sifs + self.phy.ack_duration();
        self.channel.occupy(exchange_end, Some((station, category)));
        Transmission {
            station,
            category,
            packet,
            first_attempt,
            start: now,
            data_end,
            exchange_end,
        }
    }

    fn collide(&mut self, now: SimTime, winners: &[(StationId, AccessCategory)], stations: &mut [Station]) -> AccessResult {
        let mut parties = Vec::with_capacity(winners.len());
        let mut longest = 0;
        for &(station, category) in winners {
            let queue = stations[station.index()].queue_mut(category);
            let Some(frame) = queue.collide(now, self.retry_limit) else {
                continue;
            };
            longest = longest.max(self.phy.data_duration(frame.packet.size_bytes));
            if frame.dropped {
                self.counters.drops += 1;
            }
            parties.push(CollisionParty {
                station,
                category,
                frame,
            });
        }
        let end = now + longest + self.timing.ack_timeout(self.phy.as_ref());
        self.occupy(now, end, None);
        self.counters.collisions += 1;
        debug!("collision between {} transmitters until {end}", parties.len());
        AccessResult::Collision { parties, end }
    }

    /// The ACK for `station`/`category` has been received. If the next frame
    /// of the TXOP fits, the medium stays held and the time that frame goes on
    /// air (SIFS later) is returned. Otherwise the medium is released.
    pub fn complete_exchange<R: Rng>(
        &mut self,
        now: SimTime,
        station: StationId,
        category: AccessCategory,
        stations: &mut [Station],
        rng: &mut R,
    ) -> Option<SimTime> {
        self.counters.successes += 1;
        let start = now + self.timing.sifs;
        let queue = stations[station.index()].queue_mut(category);
        if queue.reserve_txop_continuation(start, &self.timing, self.phy.as_ref()) {
            self.channel.occupy(start, Some((station, category)));
            return Some(start);
        }
        queue.complete_success(now, rng);
        self.release(now);
        None
    }

    /// Send the frame reserved by [`complete_exchange`](Self::complete_exchange).
    pub fn resume_txop<R: Rng>(
        &mut self,
        now: SimTime,
        station: StationId,
        category: AccessCategory,
        stations: &mut [Station],
        rng: &mut R,
    ) -> Option<Transmission> {
        let queue = stations[station.index()].queue_mut(category);
        let first_attempt = queue.head().is_some_and(Packet::is_first_attempt);
        let Some(packet) = queue.resume_txop(now) else {
            queue.complete_success(now, rng);
            self.release(now);
            return None;
        };
        debug!(
            "{station}/{category} continues TXOP with flow {} seq {}",
            packet.flow, packet.seq
        );
        Some(self.launch(now, station, category, packet, first_attempt))
    }

    pub fn complete_collision<R: Rng>(
        &mut self,
        now: SimTime,
        parties: &[(StationId, AccessCategory)],
        stations: &mut [Station],
        rng: &mut R,
    ) {
        for &(station, category) in parties {
            stations[station.index()].queue_mut(category).complete_collision(now, rng);
        }
        self.release(now);
    }

    fn occupy(&mut self, now: SimTime, until: SimTime, owner: Option<(StationId, AccessCategory)>) {
        self.busy_since = now;
        self.channel.occupy(until, owner);
    }

    fn release(&mut self, now: SimTime) {
        self.counters.busy_time += now - self.busy_since;
        self.channel.release(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::NominalRatePhy;
    use crate::queue::AcState;
    use edca_lab_abstract::{AccessCategoryProfile, EdcaProfiles, FlowId};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn access() -> ChannelAccess {
        ChannelAccess::new(MacTiming::default(), Box::new(NominalRatePhy::default()), 7)
    }

    fn no_backoff() -> EdcaProfiles {
        EdcaProfiles::uniform(AccessCategoryProfile::new(0, 0, 2, 0))
    }

    fn enqueue(stations: &mut [Station], station: u32, category: AccessCategory, flow: u32, rng: &mut StdRng) {
        let packet = Packet::new(FlowId(flow), 0, 1000, 0);
        stations[station as usize].queue_mut(category).enqueue(packet, 0, rng);
    }

    #[test]
    fn lone_queue_transmits_after_aifs() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut access = access();
        let mut stations = vec![Station::new(StationId(0), "sta0", &no_backoff())];
        enqueue(&mut stations, 0, AccessCategory::Voice, 1, &mut rng);

        let at = access.next_access(&stations).unwrap();
        assert_eq!(at, access.timing().aifs(2));
        let contention = access.contend(at, &mut stations, &mut rng);
        let AccessResult::Transmit(tx) = contention.result else {
            panic!("expected a transmission");
        };
        assert!(tx.first_attempt);
        assert_eq!(tx.packet.transmit_time, Some(at));
        assert!(!access.channel().is_idle());
        assert_eq!(access.next_access(&stations), None);

        assert!(access.complete_exchange(tx.exchange_end, tx.station, tx.category, &mut stations, &mut rng).is_none());
        assert!(access.channel().is_idle());
        assert_eq!(access.counters().successes, 1);
        assert_eq!(access.counters().busy_time, tx.exchange_end - at);
        assert_eq!(stations[0].queue(AccessCategory::Voice).state(), AcState::Idle);
    }

    #[test]
    fn same_slot_across_stations_collides() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut access = access();
        let mut stations: Vec<_> = (0..2).map(|i| Station::new(StationId(i), format!("sta{i}"), &no_backoff())).collect();
        enqueue(&mut stations, 0, AccessCategory::BestEffort, 1, &mut rng);
        enqueue(&mut stations, 1, AccessCategory::BestEffort, 2, &mut rng);

        let at = access.next_access(&stations).unwrap();
        let contention = access.contend(at, &mut stations, &mut rng);
        let AccessResult::Collision { parties, end } = contention.result else {
            panic!("expected a collision");
        };
        assert_eq!(parties.len(), 2);
        assert!(parties.iter().all(|p| p.frame.first_attempt && !p.frame.dropped));
        assert_eq!(access.counters().collisions, 1);

        let ids: Vec<_> = parties.iter().map(|p| (p.station, p.category)).collect();
        access.complete_collision(end, &ids, &mut stations, &mut rng);
        // Frames stay queued for a retry.
        assert_eq!(stations[0].queue(AccessCategory::BestEffort).head().unwrap().retries, 1);
        assert_eq!(access.next_access(&stations), Some(end + access.timing().aifs(2)));
    }

    #[test]
    fn higher_priority_wins_inside_a_station() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut access = access();
        let profiles = EdcaProfiles::uniform(AccessCategoryProfile::new(0, 7, 2, 0));
        let mut stations = vec![Station::new(StationId(0), "sta0", &profiles)];
        enqueue(&mut stations, 0, AccessCategory::Video, 2, &mut rng);
        enqueue(&mut stations, 0, AccessCategory::Voice, 1, &mut rng);

        let at = access.next_access(&stations).unwrap();
        let contention = access.contend(at, &mut stations, &mut rng);
        assert_eq!(
            contention.virtual_collisions,
            vec![VirtualCollision {
                station: StationId(0),
                winner: AccessCategory::Voice,
                losers: vec![AccessCategory::Video],
            }]
        );
        let AccessResult::Transmit(tx) = contention.result else {
            panic!("expected a transmission");
        };
        assert_eq!(tx.category, AccessCategory::Voice);
        let video = stations[0].queue(AccessCategory::Video);
        assert_eq!(video.len(), 1);
        assert_eq!(video.contention_window(), 1);
        assert_eq!(access.counters().virtual_collisions, 1);
        assert_eq!(access.counters().collisions, 0);
    }

    #[test]
    fn txop_keeps_the_medium_for_the_burst() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut access = access();
        let profiles = EdcaProfiles::default().with(AccessCategory::Video, AccessCategoryProfile::new(0, 0, 2, 6016));
        let mut stations = vec![Station::new(StationId(0), "sta0", &profiles)];
        for seq in 0..3 {
            let packet = Packet::new(FlowId(1), seq, 1000, 0);
            stations[0].queue_mut(AccessCategory::Video).enqueue(packet, 0, &mut rng);
        }

        let at = access.next_access(&stations).unwrap();
        let AccessResult::Transmit(first) = access.contend(at, &mut stations, &mut rng).result else {
            panic!("expected a transmission");
        };
        let resume = access
            .complete_exchange(first.exchange_end, first.station, first.category, &mut stations, &mut rng)
            .unwrap();
        assert_eq!(resume, first.exchange_end + access.timing().sifs);
        assert!(!access.channel().is_idle());
        assert_eq!(
            stations[0].queue(AccessCategory::Video).state(),
            AcState::WaitingTxopContinuation
        );
        let second = access
            .resume_txop(resume, first.station, first.category, &mut stations, &mut rng)
            .unwrap();
        assert_eq!(second.packet.seq, 1);
        assert_eq!(second.start, resume);

        let resume = access
            .complete_exchange(second.exchange_end, second.station, second.category, &mut stations, &mut rng)
            .unwrap();
        let third = access
            .resume_txop(resume, second.station, second.category, &mut stations, &mut rng)
            .unwrap();
        assert_eq!(third.packet.seq, 2);
        assert!(
            access
                .complete_exchange(third.exchange_end, third.station, third.category, &mut stations, &mut rng)
                .is_none()
        );
        assert!(access.channel().is_idle());
        assert_eq!(access.counters().successes, 3);
    }

    #[test]
    fn exhausted_retries_drop_the_frame() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut access = ChannelAccess::new(MacTiming::default(), Box::new(NominalRatePhy::default()), 0);
        let mut stations: Vec<_> = (0..2).map(|i| Station::new(StationId(i), format!("sta{i}"), &no_backoff())).collect();
        enqueue(&mut stations, 0, AccessCategory::BestEffort, 1, &mut rng);
        enqueue(&mut stations, 1, AccessCategory::BestEffort, 2, &mut rng);

        let at = access.next_access(&stations).unwrap();
        let AccessResult::Collision { parties, .. } = access.contend(at, &mut stations, &mut rng).result else {
            panic!("expected a collision");
        };
        assert!(parties.iter().all(|p| p.frame.dropped));
        assert_eq!(access.counters().drops, 2);
        assert!(stations.iter().all(|s| s.queue(AccessCategory::BestEffort).is_empty()));
    }

    #[test]
    fn deferring_queues_keep_their_counter_across_a_busy_period() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut access = access();
        let fast = EdcaProfiles::uniform(AccessCategoryProfile::new(0, 0, 2, 0));
        let slow = EdcaProfiles::uniform(AccessCategoryProfile::new(4, 4, 3, 0));
        let mut stations = vec![
            Station::new(StationId(0), "fast", &fast),
            Station::new(StationId(1), "slow", &slow),
        ];
        enqueue(&mut stations, 0, AccessCategory::BestEffort, 1, &mut rng);
        enqueue(&mut stations, 1, AccessCategory::BestEffort, 2, &mut rng);
        let slots = stations[1].queue(AccessCategory::BestEffort).backoff_slots();

        let at = access.next_access(&stations).unwrap();
        let AccessResult::Transmit(tx) = access.contend(at, &mut stations, &mut rng).result else {
            panic!("expected a transmission");
        };
        assert_eq!(tx.station, StationId(0));
        let slow_queue = stations[1].queue(AccessCategory::BestEffort);
        assert_eq!(slow_queue.state(), AcState::Deferring);
        assert_eq!(slow_queue.backoff_slots(), slots);

        access.complete_exchange(tx.exchange_end, tx.station, tx.category, &mut stations, &mut rng);
        let timing = *access.timing();
        assert_eq!(
            access.next_access(&stations),
            Some(tx.exchange_end + timing.aifs(3) + SimTime::from(slots) * timing.slot)
        );
    }
}
