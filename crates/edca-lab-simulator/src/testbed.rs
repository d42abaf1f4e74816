//! The wireless EDCA testbed: VoIP, Video and BestEffort clients plus
//! optional background stations, all sending to one access point.

use edca_lab_abstract::config::{BEST_EFFORT_PORT, VIDEO_PORT, VOIP_PORT};
use edca_lab_abstract::time::{from_millis_f64, from_secs_f64};
use edca_lab_abstract::{AccessCategory, FlowLabel, TestbedConfig};
use tracing::{info, warn};

use crate::channel::{MacTiming, NominalRatePhy};
use crate::engine::{SimError, SimParams, Simulation};
use crate::traffic::TrafficSpec;

/// Validate `config` and lay out stations and flows. Nothing is built if the
/// configuration is rejected.
pub fn build_testbed(config: &TestbedConfig, record_trace: bool) -> Result<Simulation, SimError> {
    config.validate()?;
    if config.warm_up_time >= config.sim_time {
        warn!(
            "warmUpTime {}s is not before simTime {}s: no traffic will be generated",
            config.warm_up_time, config.sim_time
        );
    }

    let params = SimParams {
        end_time: from_secs_f64(config.sim_time),
        timing: MacTiming::default(),
        retry_limit: config.retry_limit,
        seed: config.seed,
        record_trace,
    };
    build(config, params)
}

fn build(config: &TestbedConfig, params: SimParams) -> Result<Simulation, SimError> {
    let profiles = config.edca_profiles();
    let phy = NominalRatePhy::new(config.nominal_rate_mbps);
    let mut sim = Simulation::new(params, Box::new(phy)).with_config(config.clone());
    let start_time = from_secs_f64(config.warm_up_time);
    let spec = |packet_size: u32, interval_ms: f64| TrafficSpec {
        packet_size,
        interval: from_millis_f64(interval_ms),
        max_packets: config.max_packets,
        start_time,
    };

    let clients = if config.colocate_flows {
        let sta = sim.add_station("client", &profiles);
        [sta; 3]
    } else {
        [
            sim.add_station("voip", &profiles),
            sim.add_station("video", &profiles),
            sim.add_station("best-effort", &profiles),
        ]
    };
    let background: Vec<_> = (0..config.background_flows())
        .map(|i| sim.add_station(format!("background{}", i + 1), &profiles))
        .collect();
    let ap = sim.add_station("ap", &profiles);

    let primary = [
        (
            VOIP_PORT,
            FlowLabel::Voip,
            AccessCategory::Voice,
            spec(config.packet_size_voip, config.interval_voip_ms),
        ),
        (
            VIDEO_PORT,
            FlowLabel::Video,
            AccessCategory::Video,
            spec(config.packet_size_video, config.interval_video_ms),
        ),
        (
            BEST_EFFORT_PORT,
            FlowLabel::BestEffort,
            AccessCategory::BestEffort,
            spec(config.packet_size_be, config.interval_be_ms),
        ),
    ];
    for (source, (port, label, category, traffic)) in clients.into_iter().zip(primary) {
        sim.add_flow(source, ap, port, label, category, traffic)?;
    }
    for (i, source) in (0u32..).zip(background) {
        sim.add_flow(
            source,
            ap,
            TestbedConfig::background_port(i),
            FlowLabel::Background(i + 1),
            AccessCategory::Background,
            spec(config.packet_size_be, config.interval_be_ms),
        )?;
    }

    info!(
        "Testbed ready: EDCA {}, {} background stations, {} flows",
        if config.enable_edca { "enabled" } else { "disabled" },
        config.background_flows(),
        sim.flows().len()
    );
    Ok(sim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edca_lab_abstract::{ConfigError, StationId};

    #[test]
    fn flows_follow_the_testbed_layout() {
        let config = TestbedConfig {
            enable_background: true,
            n_bg_stations: 2,
            ..Default::default()
        };
        let sim = build_testbed(&config, false).unwrap();
        let labels: Vec<_> = sim.flows().iter().map(|f| f.label.to_string()).collect();
        assert_eq!(labels, ["VoIP", "Video", "BestEffort", "Background1", "Background2"]);
        let ports: Vec<_> = sim.flows().iter().map(|f| f.port).collect();
        assert_eq!(ports, [8000, 8001, 8002, 9000, 9001]);
        // Three clients, two background stations, the access point.
        assert_eq!(sim.stations().len(), 6);
        assert!(sim.flows().iter().all(|f| f.destination == StationId(5)));
        assert_eq!(sim.flows()[3].category, AccessCategory::Background);
    }

    #[test]
    fn colocated_flows_share_a_station() {
        let config = TestbedConfig {
            colocate_flows: true,
            ..Default::default()
        };
        let sim = build_testbed(&config, false).unwrap();
        assert_eq!(sim.stations().len(), 2);
        assert!(sim.flows().iter().all(|f| f.source == StationId(0)));
    }

    #[test]
    fn invalid_configuration_builds_nothing() {
        let config = TestbedConfig {
            be_min_cw: 2048,
            ..Default::default()
        };
        assert!(matches!(
            build_testbed(&config, false),
            Err(SimError::Config(ConfigError::ContentionWindow { .. }))
        ));
    }
}
