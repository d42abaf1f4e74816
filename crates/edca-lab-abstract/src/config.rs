use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::access_category::{AccessCategory, AccessCategoryProfile, EdcaProfiles};
use crate::time::NANOS_PER_MICRO;

pub const VOIP_PORT: u16 = 8000;
pub const VIDEO_PORT: u16 = 8001;
pub const BEST_EFFORT_PORT: u16 = 8002;
pub const BACKGROUND_BASE_PORT: u16 = 9000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{category} contention window is inverted: minCw {min} > maxCw {max}")]
    ContentionWindow {
        category: AccessCategory,
        min: u32,
        max: u32,
    },
    #[error("{name} must be a finite, non-negative duration (got {value})")]
    NegativeDuration { name: &'static str, value: f64 },
    #[error("{name} must be a positive interval (got {value})")]
    NonPositiveInterval { name: &'static str, value: f64 },
    #[error("{name} must be at least one byte")]
    ZeroPacketSize { name: &'static str },
    #[error("nBgStations = {requested} exceeds the {available} background ports available from 9000")]
    BackgroundPorts { requested: u32, available: u32 },
    #[error("nominal transmission rate must be positive (got {value} Mbps)")]
    InvalidRate { value: f64 },
    #[error("{category} TXOP of {value} us does not fit in simulated time")]
    TxopOverflow { category: AccessCategory, value: u64 },
}

/// Tunable parameters of the wireless EDCA testbed.
///
/// Keys serialize in camelCase so TOML files and command-line options use the
/// same names (`enableEdca`, `voMinCw`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestbedConfig {
    pub enable_edca: bool,
    pub enable_background: bool,
    pub n_bg_stations: u32,
    /// Seconds.
    pub sim_time: f64,
    /// Seconds before any generator starts.
    pub warm_up_time: f64,
    pub output: PathBuf,
    pub max_packets: u32,

    pub packet_size_voip: u32,
    pub interval_voip_ms: f64,
    pub packet_size_video: u32,
    pub interval_video_ms: f64,
    pub packet_size_be: u32,
    pub interval_be_ms: f64,

    pub vo_min_cw: u32,
    pub vo_max_cw: u32,
    pub vo_aifsn: u32,
    /// Microseconds.
    pub vo_txop: u64,
    pub vi_min_cw: u32,
    pub vi_max_cw: u32,
    pub vi_aifsn: u32,
    pub vi_txop: u64,
    pub be_min_cw: u32,
    pub be_max_cw: u32,
    pub be_aifsn: u32,
    pub be_txop: u64,

    /// Seed for every backoff draw in the run.
    pub seed: u64,
    /// Retransmissions allowed after a collision before the frame is dropped.
    pub retry_limit: u32,
    pub nominal_rate_mbps: f64,
    /// Put the VoIP, Video and BestEffort clients on a single station.
    pub colocate_flows: bool,
}

impl Default for TestbedConfig {
    fn default() -> Self {
        Self {
            enable_edca: true,
            enable_background: false,
            n_bg_stations: 5,
            sim_time: 120.0,
            warm_up_time: 1.0,
            output: PathBuf::from("edca-results.json"),
            max_packets: 1_000_000,
            packet_size_voip: 320,
            interval_voip_ms: 20.0,
            packet_size_video: 1880,
            interval_video_ms: 15.0,
            packet_size_be: 1500,
            interval_be_ms: 2.0,
            vo_min_cw: 3,
            vo_max_cw: 7,
            vo_aifsn: 2,
            vo_txop: 3008,
            vi_min_cw: 7,
            vi_max_cw: 15,
            vi_aifsn: 2,
            vi_txop: 6016,
            be_min_cw: 15,
            be_max_cw: 1023,
            be_aifsn: 3,
            be_txop: 0,
            seed: 1,
            retry_limit: 7,
            nominal_rate_mbps: 54.0,
            colocate_flows: false,
        }
    }
}

impl TestbedConfig {
    /// Reject configurations the simulator cannot run. Called before any
    /// simulation state is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("simTime", self.sim_time), ("warmUpTime", self.warm_up_time)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NegativeDuration { name, value });
            }
        }

        for (name, value) in [
            ("intervalVoipMs", self.interval_voip_ms),
            ("intervalVideoMs", self.interval_video_ms),
            ("intervalBeMs", self.interval_be_ms),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NonPositiveInterval { name, value });
            }
        }

        for (name, size) in [
            ("packetSizeVoip", self.packet_size_voip),
            ("packetSizeVideo", self.packet_size_video),
            ("packetSizeBe", self.packet_size_be),
        ] {
            if size == 0 {
                return Err(ConfigError::ZeroPacketSize { name });
            }
        }

        // Checked before the profiles are built: they convert to nanoseconds.
        for (category, value) in [
            (AccessCategory::Voice, self.vo_txop),
            (AccessCategory::Video, self.vi_txop),
            (AccessCategory::BestEffort, self.be_txop),
        ] {
            if value.checked_mul(NANOS_PER_MICRO).is_none() {
                return Err(ConfigError::TxopOverflow { category, value });
            }
        }

        for (category, profile) in self.configured_profiles() {
            if !profile.is_valid() {
                return Err(ConfigError::ContentionWindow {
                    category,
                    min: profile.min_cw,
                    max: profile.max_cw,
                });
            }
        }

        if self.enable_background {
            let available = u32::from(u16::MAX - BACKGROUND_BASE_PORT) + 1;
            if self.n_bg_stations > available {
                return Err(ConfigError::BackgroundPorts {
                    requested: self.n_bg_stations,
                    available,
                });
            }
        }

        if !self.nominal_rate_mbps.is_finite() || self.nominal_rate_mbps <= 0.0 {
            return Err(ConfigError::InvalidRate {
                value: self.nominal_rate_mbps,
            });
        }

        Ok(())
    }

    fn configured_profiles(&self) -> [(AccessCategory, AccessCategoryProfile); 3] {
        [
            (
                AccessCategory::Voice,
                AccessCategoryProfile::new(self.vo_min_cw, self.vo_max_cw, self.vo_aifsn, self.vo_txop),
            ),
            (
                AccessCategory::Video,
                AccessCategoryProfile::new(self.vi_min_cw, self.vi_max_cw, self.vi_aifsn, self.vi_txop),
            ),
            (
                AccessCategory::BestEffort,
                AccessCategoryProfile::new(self.be_min_cw, self.be_max_cw, self.be_aifsn, self.be_txop),
            ),
        ]
    }

    /// Per-category contention parameters for every station.
    ///
    /// With EDCA disabled all categories fall back to the best-effort window
    /// and AIFSN without TXOP, so no category has an advantage.
    pub fn edca_profiles(&self) -> EdcaProfiles {
        let [vo, vi, be] = self.configured_profiles();
        if !self.enable_edca {
            return EdcaProfiles::uniform(be.1);
        }
        EdcaProfiles::default()
            .with(vo.0, vo.1)
            .with(vi.0, vi.1)
            .with(be.0, be.1)
    }

    pub fn background_port(index: u32) -> u16 {
        BACKGROUND_BASE_PORT.saturating_add(index as u16)
    }

    pub fn background_flows(&self) -> u32 {
        if self.enable_background {
            self.n_bg_stations
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(TestbedConfig::default().validate(), Ok(()));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let config = TestbedConfig {
            vi_min_cw: 31,
            vi_max_cw: 15,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ContentionWindow {
                category: AccessCategory::Video,
                min: 31,
                max: 15
            })
        );
    }

    #[test]
    fn negative_durations_are_rejected() {
        let config = TestbedConfig {
            warm_up_time: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NegativeDuration { name: "warmUpTime", .. })
        ));

        let config = TestbedConfig {
            interval_be_ms: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveInterval { name: "intervalBeMs", .. })
        ));
    }

    #[test]
    fn too_many_background_stations_is_rejected() {
        let config = TestbedConfig {
            enable_background: true,
            n_bg_stations: 60_000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BackgroundPorts { requested: 60_000, .. })
        ));

        let config = TestbedConfig {
            enable_background: false,
            ..config
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn oversized_txop_is_rejected() {
        let config = TestbedConfig {
            vi_txop: u64::MAX / 10,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TxopOverflow {
                category: AccessCategory::Video,
                value: u64::MAX / 10
            })
        );

        let config = TestbedConfig {
            vi_txop: u64::MAX / NANOS_PER_MICRO,
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn disabled_edca_flattens_profiles() {
        let config = TestbedConfig {
            enable_edca: false,
            ..Default::default()
        };
        let profiles = config.edca_profiles();
        let be = *profiles.get(AccessCategory::BestEffort);
        for (_, profile) in profiles.iter() {
            assert_eq!(*profile, be);
        }
        assert_eq!(be.txop_limit, 0);
    }

    #[test]
    fn camel_case_keys_deserialize() {
        let config: TestbedConfig = toml::from_str(
            r#"
            enableEdca = false
            voMinCw = 1
            nBgStations = 2
            intervalBeMs = 1.5
            "#,
        )
        .unwrap();
        assert!(!config.enable_edca);
        assert_eq!(config.vo_min_cw, 1);
        assert_eq!(config.n_bg_stations, 2);
        assert_eq!(config.interval_be_ms, 1.5);
        assert_eq!(config.sim_time, 120.0);
    }
}
