use edca_lab_abstract::time::as_secs_f64;
use edca_lab_abstract::{
    AccessCategory, ConfigError, EdcaProfiles, Flow, FlowId, FlowLabel, Packet, SimTime, StationId, TestbedConfig,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use tracing::{debug, info};

use crate::access::{AccessResult, ChannelAccess, MediumCounters, Transmission};
use crate::channel::{MacTiming, PhyModel};
use crate::queue::Station;
use crate::report::{FlowRecord, build_records};
use crate::scheduler::{EventHandle, Scheduler, SchedulingViolation};
use crate::stats::FlowStatsCollector;
use crate::trace::{MediumEvent, MediumEventKind, SimulationReport};
use crate::traffic::{TrafficGenerator, TrafficSpec};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("scheduling order violated: {0}")]
    Scheduling(#[from] SchedulingViolation),
    #[error("unknown station {0}")]
    UnknownStation(StationId),
}

#[derive(Debug)]
pub enum EventType {
    /// A generator produces its next packet.
    Emit { flow: FlowId },
    /// The earliest backoff among all contending queues expires.
    AccessAttempt,
    /// The data frame has fully arrived at its destination.
    Delivery { packet: Packet },
    /// ACK received; the exchange is over.
    ExchangeEnd {
        station: StationId,
        category: AccessCategory,
    },
    /// SIFS after an exchange, the TXOP holder sends its next frame.
    TxopResume {
        station: StationId,
        category: AccessCategory,
    },
    CollisionEnd {
        parties: Vec<(StationId, AccessCategory)>,
    },
}

#[derive(Debug, Clone)]
pub struct SimParams {
    /// Events at or after this time never run.
    pub end_time: SimTime,
    pub timing: MacTiming,
    pub retry_limit: u32,
    pub seed: u64,
    pub record_trace: bool,
}

/// Everything the event handlers mutate, apart from the scheduler itself.
struct Network {
    stations: Vec<Station>,
    flows: Vec<Flow>,
    generators: Vec<TrafficGenerator>,
    access: ChannelAccess,
    stats: FlowStatsCollector,
    rng: StdRng,
    /// The single pending access attempt.
    access_event: Option<EventHandle>,
    record_trace: bool,
    events: Vec<MediumEvent>,
}

/// One simulation run: owns the scheduler, the channel and every station.
pub struct Simulation {
    scheduler: Scheduler<EventType>,
    network: Network,
    params: SimParams,
    config: Option<TestbedConfig>,
}

impl Simulation {
    pub fn new(params: SimParams, phy: Box<dyn PhyModel>) -> Self {
        let network = Network {
            stations: Vec::new(),
            flows: Vec::new(),
            generators: Vec::new(),
            access: ChannelAccess::new(params.timing, phy, params.retry_limit),
            stats: FlowStatsCollector::new(),
            rng: StdRng::seed_from_u64(params.seed),
            access_event: None,
            record_trace: params.record_trace,
            events: Vec::new(),
        };
        Self {
            scheduler: Scheduler::new(),
            network,
            params,
            config: None,
        }
    }

    /// Attach the configuration the run was built from, for reporting.
    pub fn with_config(mut self, config: TestbedConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn add_station(&mut self, name: impl Into<String>, profiles: &EdcaProfiles) -> StationId {
        let id = StationId(self.network.stations.len() as u32);
        self.network.stations.push(Station::new(id, name, profiles));
        id
    }

    /// Register a flow and schedule its first emission.
    pub fn add_flow(
        &mut self,
        source: StationId,
        destination: StationId,
        port: u16,
        label: FlowLabel,
        category: AccessCategory,
        spec: TrafficSpec,
    ) -> Result<FlowId, SimError> {
        for station in [source, destination] {
            if station.index() >= self.network.stations.len() {
                return Err(SimError::UnknownStation(station));
            }
        }
        let flow = Flow {
            id: FlowId(self.network.flows.len() as u32 + 1),
            source,
            destination,
            port,
            label,
            category,
        };
        let mut generator = TrafficGenerator::new(&flow, spec);
        if let Some(start) = generator.first_emission() {
            let handle = self.scheduler.schedule_at(start, EventType::Emit { flow: flow.id })?;
            generator.set_pending(handle);
        }
        debug!("Flow {} ({label}) {source} -> {destination} as {category}", flow.id);
        self.network.stats.register(&flow);
        self.network.generators.push(generator);
        let id = flow.id;
        self.network.flows.push(flow);
        Ok(id)
    }

    /// Cancel every future emission of `flow`. Packets already queued are
    /// still sent. Returns false for an unknown flow.
    pub fn stop_flow(&mut self, flow: FlowId) -> bool {
        let Some(generator) = flow.index().and_then(|i| self.network.generators.get_mut(i)) else {
            return false;
        };
        if let Some(handle) = generator.stop() {
            self.scheduler.cancel(handle);
        }
        debug!("Flow {flow} stopped at {}", self.scheduler.now());
        true
    }

    /// Process every event before `until` (capped at the configured end).
    pub fn run_until(&mut self, until: SimTime) -> Result<(), SimError> {
        let end = until.min(self.params.end_time);
        let network = &mut self.network;
        self.scheduler.run_until(end, |scheduler, event| network.handle(scheduler, event))
    }

    pub fn run(&mut self) -> Result<(), SimError> {
        info!(
            "Starting simulation: {} stations, {} flows, end at {:.3}s",
            self.network.stations.len(),
            self.network.flows.len(),
            as_secs_f64(self.params.end_time)
        );
        self.run_until(self.params.end_time)?;
        let counters = self.network.access.counters();
        info!(
            "Simulation finished at {:.3}s: {} exchanges, {} collisions, {} virtual collisions, {} drops",
            as_secs_f64(self.scheduler.now()),
            counters.successes,
            counters.collisions,
            counters.virtual_collisions,
            counters.drops
        );
        Ok(())
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn flows(&self) -> &[Flow] {
        &self.network.flows
    }

    pub fn stations(&self) -> &[Station] {
        &self.network.stations
    }

    pub fn statistics(&self) -> &FlowStatsCollector {
        &self.network.stats
    }

    pub fn counters(&self) -> &MediumCounters {
        self.network.access.counters()
    }

    pub fn events(&self) -> &[MediumEvent] {
        &self.network.events
    }

    pub fn records(&self) -> Vec<FlowRecord> {
        build_records(&self.network.flows, &self.network.stats)
    }

    pub fn export_report(&self) -> SimulationReport {
        let now = self.scheduler.now();
        let medium = self.network.access.counters().clone();
        let utilization = if now > 0 {
            medium.busy_time as f64 / now as f64
        } else {
            0.0
        };
        SimulationReport {
            config: self.config.clone(),
            duration: as_secs_f64(now),
            flows: self.records(),
            categories: self.network.stats.category_summaries(),
            medium,
            utilization,
            events: self.network.events.clone(),
        }
    }
}

impl Network {
    fn handle(&mut self, scheduler: &mut Scheduler<EventType>, event: EventType) -> Result<(), SimError> {
        let now = scheduler.now();
        debug!("Processing event at {now}: {event:?}");
        match event {
            EventType::Emit { flow } => self.emit(scheduler, flow)?,
            EventType::AccessAttempt => {
                self.access_event = None;
                self.access_attempt(scheduler)?;
            }
            EventType::Delivery { mut packet } => {
                packet.receive_time = Some(now);
                self.stats.on_receive(&packet, now);
                self.record(
                    now,
                    MediumEventKind::Delivered {
                        flow: packet.flow,
                        seq: packet.seq,
                        delay: now - packet.enqueue_time,
                    },
                );
            }
            EventType::ExchangeEnd { station, category } => {
                let resume = self
                    .access
                    .complete_exchange(now, station, category, &mut self.stations, &mut self.rng);
                if let Some(at) = resume {
                    scheduler.schedule_at(at, EventType::TxopResume { station, category })?;
                }
            }
            EventType::TxopResume { station, category } => {
                let next = self
                    .access
                    .resume_txop(now, station, category, &mut self.stations, &mut self.rng);
                if let Some(tx) = next {
                    self.record(
                        now,
                        MediumEventKind::TxopContinuation {
                            station,
                            category,
                            flow: tx.packet.flow,
                            seq: tx.packet.seq,
                        },
                    );
                    self.on_air(scheduler, tx)?;
                }
            }
            EventType::CollisionEnd { parties } => {
                self.access
                    .complete_collision(now, &parties, &mut self.stations, &mut self.rng);
            }
        }
        self.reschedule_access(scheduler)
    }

    fn emit(&mut self, scheduler: &mut Scheduler<EventType>, flow: FlowId) -> Result<(), SimError> {
        let now = scheduler.now();
        let Some(generator) = flow.index().and_then(|i| self.generators.get_mut(i)) else {
            return Ok(());
        };
        if let Some(packet) = generator.emit(now) {
            let station = generator.station();
            let category = generator.category();
            self.stations[station.index()]
                .queue_mut(category)
                .enqueue(packet, now, &mut self.rng);
        }
        if let Some(next) = generator.next_emission(now) {
            let handle = scheduler.schedule_at(next, EventType::Emit { flow })?;
            generator.set_pending(handle);
        }
        Ok(())
    }

    fn access_attempt(&mut self, scheduler: &mut Scheduler<EventType>) -> Result<(), SimError> {
        let now = scheduler.now();
        let contention = self.access.contend(now, &mut self.stations, &mut self.rng);
        for vc in contention.virtual_collisions {
            self.record(
                now,
                MediumEventKind::VirtualCollision {
                    station: vc.station,
                    winner: vc.winner,
                    losers: vc.losers,
                },
            );
        }
        match contention.result {
            AccessResult::Idle => {}
            AccessResult::Transmit(tx) => {
                self.record(
                    now,
                    MediumEventKind::TxStart {
                        station: tx.station,
                        category: tx.category,
                        flow: tx.packet.flow,
                        seq: tx.packet.seq,
                        retries: tx.packet.retries,
                    },
                );
                self.on_air(scheduler, tx)?;
            }
            AccessResult::Collision { parties, end } => {
                let mut ids = Vec::with_capacity(parties.len());
                for party in parties {
                    let packet = &party.frame.packet;
                    if party.frame.first_attempt {
                        self.stats.on_transmit(packet);
                    }
                    if party.frame.dropped {
                        debug!(
                            "Flow {} seq {} dropped after {} retries",
                            packet.flow, packet.seq, packet.retries
                        );
                        self.stats.on_drop(packet);
                        self.record(
                            now,
                            MediumEventKind::Dropped {
                                station: party.station,
                                category: party.category,
                                flow: packet.flow,
                                seq: packet.seq,
                            },
                        );
                    }
                    ids.push((party.station, party.category));
                }
                self.record(
                    now,
                    MediumEventKind::Collision {
                        parties: ids.clone(),
                        until: end,
                    },
                );
                scheduler.schedule_at(end, EventType::CollisionEnd { parties: ids })?;
            }
        }
        Ok(())
    }

    /// Account for a frame that went on air and schedule its completion.
    fn on_air(&mut self, scheduler: &mut Scheduler<EventType>, tx: Transmission) -> Result<(), SimError> {
        if tx.first_attempt {
            self.stats.on_transmit(&tx.packet);
        }
        scheduler.schedule_at(tx.data_end, EventType::Delivery { packet: tx.packet })?;
        scheduler.schedule_at(
            tx.exchange_end,
            EventType::ExchangeEnd {
                station: tx.station,
                category: tx.category,
            },
        )?;
        Ok(())
    }

    /// Replace the pending access attempt with one at the current earliest
    /// access time. Nothing is scheduled while the medium is busy.
    fn reschedule_access(&mut self, scheduler: &mut Scheduler<EventType>) -> Result<(), SimError> {
        if let Some(handle) = self.access_event.take() {
            scheduler.cancel(handle);
        }
        if let Some(at) = self.access.next_access(&self.stations) {
            self.access_event = Some(scheduler.schedule_at(at, EventType::AccessAttempt)?);
        }
        Ok(())
    }

    fn record(&mut self, time: SimTime, kind: MediumEventKind) {
        if self.record_trace {
            self.events.push(MediumEvent { time, kind });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::NominalRatePhy;
    use edca_lab_abstract::AccessCategoryProfile;
    use edca_lab_abstract::time::{micros, millis};

    fn params(end_ms: u64) -> SimParams {
        SimParams {
            end_time: millis(end_ms),
            timing: MacTiming::default(),
            retry_limit: 7,
            seed: 5,
            record_trace: true,
        }
    }

    fn cbr(size: u32, interval_ms: u64, max_packets: u32) -> TrafficSpec {
        TrafficSpec {
            packet_size: size,
            interval: millis(interval_ms),
            max_packets,
            start_time: millis(10),
        }
    }

    #[test]
    fn lone_flow_delivers_every_packet() {
        let mut sim = Simulation::new(params(1_000), Box::new(NominalRatePhy::default()));
        let profiles = EdcaProfiles::default();
        let sta = sim.add_station("sta0", &profiles);
        let ap = sim.add_station("ap", &profiles);
        let flow = sim
            .add_flow(sta, ap, 8000, FlowLabel::Voip, AccessCategory::Voice, cbr(320, 20, 1_000))
            .unwrap();
        sim.run().unwrap();

        let stats = sim.statistics().get(flow).unwrap();
        // Emissions at 10, 30, ..., 990 ms.
        assert_eq!(stats.tx_packets, 50);
        assert_eq!(stats.rx_packets, 50);
        assert_eq!(stats.lost_packets, 0);
        assert_eq!(sim.counters().collisions, 0);
        assert_eq!(sim.now(), millis(1_000));
        assert!(stats.throughput_bps() > 0.0);
    }

    #[test]
    fn unknown_station_is_rejected() {
        let mut sim = Simulation::new(params(100), Box::new(NominalRatePhy::default()));
        let sta = sim.add_station("sta0", &EdcaProfiles::default());
        let result = sim.add_flow(sta, StationId(4), 8000, FlowLabel::Voip, AccessCategory::Voice, cbr(320, 20, 1));
        assert!(matches!(result, Err(SimError::UnknownStation(StationId(4)))));
    }

    #[test]
    fn stopped_flow_emits_nothing_more() {
        let mut sim = Simulation::new(params(1_000), Box::new(NominalRatePhy::default()));
        let profiles = EdcaProfiles::default();
        let sta = sim.add_station("sta0", &profiles);
        let ap = sim.add_station("ap", &profiles);
        let flow = sim
            .add_flow(sta, ap, 8002, FlowLabel::BestEffort, AccessCategory::BestEffort, cbr(1500, 10, 1_000))
            .unwrap();

        // Emissions at 10, 20, 30, 40 ms happen before 45 ms.
        sim.run_until(millis(45)).unwrap();
        assert!(sim.stop_flow(flow));
        sim.run().unwrap();

        let stats = sim.statistics().get(flow).unwrap();
        assert_eq!(stats.tx_packets, 4);
        assert_eq!(stats.rx_packets, 4);
    }

    #[test]
    fn stopping_an_unknown_flow_reports_false() {
        let mut sim = Simulation::new(params(100), Box::new(NominalRatePhy::default()));
        let profiles = EdcaProfiles::default();
        let sta = sim.add_station("sta0", &profiles);
        let ap = sim.add_station("ap", &profiles);
        sim.add_flow(sta, ap, 8000, FlowLabel::Voip, AccessCategory::Voice, cbr(320, 20, 5))
            .unwrap();
        assert!(!sim.stop_flow(FlowId(0)));
        assert!(!sim.stop_flow(FlowId(9)));
        assert!(sim.stop_flow(FlowId(1)));
    }

    #[test]
    fn zero_window_stations_collide_until_dropped() {
        let mut sim = Simulation::new(
            SimParams {
                retry_limit: 2,
                ..params(50)
            },
            Box::new(NominalRatePhy::default()),
        );
        let profiles = EdcaProfiles::uniform(AccessCategoryProfile::new(0, 0, 3, 0));
        let a = sim.add_station("a", &profiles);
        let b = sim.add_station("b", &profiles);
        let ap = sim.add_station("ap", &profiles);
        for (i, sta) in [a, b].into_iter().enumerate() {
            let label = FlowLabel::Background(i as u32 + 1);
            sim.add_flow(sta, ap, 9000 + i as u16, label, AccessCategory::BestEffort, cbr(1000, 100, 1))
                .unwrap();
        }
        sim.run().unwrap();

        for (_, stats) in sim.statistics().iter() {
            assert_eq!(stats.tx_packets, 1);
            assert_eq!(stats.rx_packets, 0);
            assert_eq!(stats.lost_packets, 1);
        }
        // First attempt plus two retries.
        assert_eq!(sim.counters().collisions, 3);
        assert_eq!(sim.counters().drops, 2);
        let kinds: Vec<_> = sim
            .events()
            .iter()
            .filter(|e| matches!(e.kind, MediumEventKind::Collision { .. }))
            .collect();
        assert_eq!(kinds.len(), 3);
        assert!(sim.export_report().utilization > 0.0);
    }

    #[test]
    fn report_covers_flows_and_categories() {
        let mut sim = Simulation::new(params(200), Box::new(NominalRatePhy::default()));
        let profiles = EdcaProfiles::default();
        let sta = sim.add_station("sta0", &profiles);
        let ap = sim.add_station("ap", &profiles);
        sim.add_flow(sta, ap, 8000, FlowLabel::Voip, AccessCategory::Voice, cbr(320, 20, 5))
            .unwrap();
        sim.add_flow(sta, ap, 8001, FlowLabel::Video, AccessCategory::Video, cbr(1880, 15, 0))
            .unwrap();
        sim.run().unwrap();

        let report = sim.export_report();
        assert_eq!(report.flows.len(), 2);
        assert_eq!(report.flows[0].rx_packets, 5);
        assert_eq!(report.flows[1].tx_packets, 0);
        assert!(report.flows[1].throughput.is_nan());
        assert_eq!(report.categories.len(), 2);
        assert!(report.duration > 0.19);
        let first = report.events.first().unwrap();
        assert!(matches!(first.kind, MediumEventKind::TxStart { .. }));
        assert!(first.time >= millis(10) + micros(34));
    }

    #[test]
    fn txop_burst_drains_a_backlog_without_contention() {
        let mut sim = Simulation::new(params(100), Box::new(NominalRatePhy::default()));
        let profiles = EdcaProfiles::default();
        let sta = sim.add_station("sta0", &profiles);
        let ap = sim.add_station("ap", &profiles);
        // Four frames arrive together; video holds a 6016 us TXOP.
        let burst = TrafficSpec {
            packet_size: 1000,
            interval: 1,
            max_packets: 4,
            start_time: millis(10),
        };
        sim.add_flow(sta, ap, 8001, FlowLabel::Video, AccessCategory::Video, burst)
            .unwrap();
        sim.run().unwrap();

        let starts = sim
            .events()
            .iter()
            .filter(|e| matches!(e.kind, MediumEventKind::TxStart { .. }))
            .count();
        let continuations = sim
            .events()
            .iter()
            .filter(|e| matches!(e.kind, MediumEventKind::TxopContinuation { .. }))
            .count();
        assert_eq!(starts + continuations, 4);
        assert!(continuations >= 1);
        assert_eq!(sim.counters().successes, 4);
        assert_eq!(sim.records()[0].rx_packets, 4);
    }
}
