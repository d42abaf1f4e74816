use crate::access_category::AccessCategory;
use crate::config::TestbedConfig;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: TestbedOverride,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

/// Partial testbed configuration. Every key that is present replaces the
/// corresponding value of a base [`TestbedConfig`].
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[cfg_attr(feature = "cli", derive(clap::Args))]
pub struct TestbedOverride {
    #[cfg_attr(feature = "cli", arg(long = "enableEdca"))]
    pub enable_edca: Option<bool>,
    #[cfg_attr(feature = "cli", arg(long = "enableBackground"))]
    pub enable_background: Option<bool>,
    #[cfg_attr(feature = "cli", arg(long = "nBgStations"))]
    pub n_bg_stations: Option<u32>,
    /// Simulation time [s]
    #[cfg_attr(feature = "cli", arg(long = "simTime", allow_negative_numbers = true))]
    pub sim_time: Option<f64>,
    /// Warm-up time [s]
    #[cfg_attr(feature = "cli", arg(long = "warmUpTime", allow_negative_numbers = true))]
    pub warm_up_time: Option<f64>,
    /// Output JSON file
    #[cfg_attr(feature = "cli", arg(long = "output"))]
    pub output: Option<PathBuf>,
    #[cfg_attr(feature = "cli", arg(long = "maxPackets"))]
    pub max_packets: Option<u32>,

    #[cfg_attr(feature = "cli", arg(long = "packetSizeVoip"))]
    pub packet_size_voip: Option<u32>,
    #[cfg_attr(feature = "cli", arg(long = "intervalVoipMs", allow_negative_numbers = true))]
    pub interval_voip_ms: Option<f64>,
    #[cfg_attr(feature = "cli", arg(long = "packetSizeVideo"))]
    pub packet_size_video: Option<u32>,
    #[cfg_attr(feature = "cli", arg(long = "intervalVideoMs", allow_negative_numbers = true))]
    pub interval_video_ms: Option<f64>,
    #[cfg_attr(feature = "cli", arg(long = "packetSizeBe"))]
    pub packet_size_be: Option<u32>,
    #[cfg_attr(feature = "cli", arg(long = "intervalBeMs", allow_negative_numbers = true))]
    pub interval_be_ms: Option<f64>,

    #[cfg_attr(feature = "cli", arg(long = "voMinCw"))]
    pub vo_min_cw: Option<u32>,
    #[cfg_attr(feature = "cli", arg(long = "voMaxCw"))]
    pub vo_max_cw: Option<u32>,
    #[cfg_attr(feature = "cli", arg(long = "voAifsn"))]
    pub vo_aifsn: Option<u32>,
    /// VO TXOP [us]
    #[cfg_attr(feature = "cli", arg(long = "voTxop"))]
    pub vo_txop: Option<u64>,
    #[cfg_attr(feature = "cli", arg(long = "viMinCw"))]
    pub vi_min_cw: Option<u32>,
    #[cfg_attr(feature = "cli", arg(long = "viMaxCw"))]
    pub vi_max_cw: Option<u32>,
    #[cfg_attr(feature = "cli", arg(long = "viAifsn"))]
    pub vi_aifsn: Option<u32>,
    /// VI TXOP [us]
    #[cfg_attr(feature = "cli", arg(long = "viTxop"))]
    pub vi_txop: Option<u64>,
    #[cfg_attr(feature = "cli", arg(long = "beMinCw"))]
    pub be_min_cw: Option<u32>,
    #[cfg_attr(feature = "cli", arg(long = "beMaxCw"))]
    pub be_max_cw: Option<u32>,
    #[cfg_attr(feature = "cli", arg(long = "beAifsn"))]
    pub be_aifsn: Option<u32>,
    /// BE TXOP [us]
    #[cfg_attr(feature = "cli", arg(long = "beTxop"))]
    pub be_txop: Option<u64>,

    /// Seed for backoff draws (RngRun)
    #[cfg_attr(feature = "cli", arg(long = "seed", alias = "RngRun"))]
    pub seed: Option<u64>,
    #[cfg_attr(feature = "cli", arg(long = "retryLimit"))]
    pub retry_limit: Option<u32>,
    #[cfg_attr(feature = "cli", arg(long = "nominalRateMbps"))]
    pub nominal_rate_mbps: Option<f64>,
    #[cfg_attr(feature = "cli", arg(long = "colocateFlows"))]
    pub colocate_flows: Option<bool>,
}

macro_rules! overlay {
    (set $source:expr, $target:expr; $($field:ident),+ $(,)?) => {
        $(
            if let Some(v) = &$source.$field {
                $target.$field = v.clone();
            }
        )+
    };
    (merge $source:expr, $target:expr; $($field:ident),+ $(,)?) => {
        $(
            if $source.$field.is_some() {
                $target.$field = $source.$field.clone();
            }
        )+
    };
}

macro_rules! overlay_all {
    ($mode:ident $source:expr, $target:expr) => {
        overlay!($mode $source, $target;
            enable_edca, enable_background, n_bg_stations, sim_time, warm_up_time,
            output, max_packets,
            packet_size_voip, interval_voip_ms, packet_size_video, interval_video_ms,
            packet_size_be, interval_be_ms,
            vo_min_cw, vo_max_cw, vo_aifsn, vo_txop,
            vi_min_cw, vi_max_cw, vi_aifsn, vi_txop,
            be_min_cw, be_max_cw, be_aifsn, be_txop,
            seed, retry_limit, nominal_rate_mbps, colocate_flows,
        )
    };
}

impl TestbedOverride {
    pub fn apply_to(&self, config: &mut TestbedConfig) {
        overlay_all!(set self, config);
    }

    /// Layer `other` on top of `self`; keys set in `other` win.
    pub fn merged_with(&self, other: &TestbedOverride) -> TestbedOverride {
        let mut merged = self.clone();
        overlay_all!(merge other, merged);
        merged
    }

    pub fn to_config(&self) -> TestbedConfig {
        let mut config = TestbedConfig::default();
        self.apply_to(&mut config);
        config
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// Every packet the flow transmitted was received.
    RxMatchesTx { flow: String },
    /// Number of packets the flow transmitted is within range.
    TxPackets { flow: String, min: u64, max: Option<u64> },
    /// Number of packets the flow received is within range.
    RxPackets { flow: String, min: u64, max: Option<u64> },
    /// Mean enqueue-to-transmit delay of `faster` is strictly below `slower`.
    AccessDelayOrder {
        faster: AccessCategory,
        slower: AccessCategory,
    },
    /// No flow lost a packet.
    Lossless,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_only_touches_present_keys() {
        let overrides = TestbedOverride {
            enable_edca: Some(false),
            vo_aifsn: Some(5),
            ..Default::default()
        };
        let config = overrides.to_config();
        assert!(!config.enable_edca);
        assert_eq!(config.vo_aifsn, 5);
        assert_eq!(config.vo_min_cw, TestbedConfig::default().vo_min_cw);
    }

    #[test]
    fn later_layer_wins_when_merging() {
        let fixed = TestbedOverride {
            sim_time: Some(60.0),
            n_bg_stations: Some(3),
            ..Default::default()
        };
        let scenario = TestbedOverride {
            sim_time: Some(5.0),
            ..Default::default()
        };
        let merged = fixed.merged_with(&scenario);
        assert_eq!(merged.sim_time, Some(5.0));
        assert_eq!(merged.n_bg_stations, Some(3));
    }

    #[test]
    fn scenario_file_parses() {
        let scenario: TestScenario = toml::from_str(
            r#"
            name = "optimal_edca"
            description = "VoIP ahead of background"

            [config]
            enableBackground = true
            nBgStations = 3
            voTxop = 3008

            [[assertions]]
            type = "access_delay_order"
            faster = "voice"
            slower = "background"

            [[assertions]]
            type = "tx_packets"
            flow = "VoIP"
            min = 10
            "#,
        )
        .unwrap();
        assert_eq!(scenario.config.n_bg_stations, Some(3));
        assert_eq!(scenario.assertions.len(), 2);
        assert!(matches!(
            scenario.assertions[0],
            TestAssertion::AccessDelayOrder {
                faster: AccessCategory::Voice,
                slower: AccessCategory::Background
            }
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: Result<TestbedOverride, _> = toml::from_str("enableEdcaa = true");
        assert!(parsed.is_err());
    }
}
