use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time::{SimTime, micros};

/// The four EDCA access categories, declared in priority order (highest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessCategory {
    #[serde(alias = "vo", alias = "VO")]
    Voice,
    #[serde(alias = "vi", alias = "VI")]
    Video,
    #[serde(alias = "be", alias = "BE")]
    BestEffort,
    #[serde(alias = "bk", alias = "BK")]
    Background,
}

impl AccessCategory {
    /// All categories, highest priority first. Virtual collisions are won by
    /// the earliest entry.
    pub const ALL: [AccessCategory; 4] = [
        AccessCategory::Voice,
        AccessCategory::Video,
        AccessCategory::BestEffort,
        AccessCategory::Background,
    ];

    pub fn index(self) -> usize {
        match self {
            AccessCategory::Voice => 0,
            AccessCategory::Video => 1,
            AccessCategory::BestEffort => 2,
            AccessCategory::Background => 3,
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            AccessCategory::Voice => "VO",
            AccessCategory::Video => "VI",
            AccessCategory::BestEffort => "BE",
            AccessCategory::Background => "BK",
        }
    }

    /// True if `self` wins a virtual collision against `other`.
    pub fn outranks(self, other: AccessCategory) -> bool {
        self.index() < other.index()
    }
}

impl fmt::Display for AccessCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Contention parameters of one access category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCategoryProfile {
    pub min_cw: u32,
    pub max_cw: u32,
    pub aifsn: u32,
    /// Zero means one frame per channel access.
    pub txop_limit: SimTime,
}

impl AccessCategoryProfile {
    pub const fn new(min_cw: u32, max_cw: u32, aifsn: u32, txop_us: u64) -> Self {
        Self {
            min_cw,
            max_cw,
            aifsn,
            txop_limit: micros(txop_us),
        }
    }

    /// 802.11 defaults for a non-AP QoS station.
    pub const fn default_for(category: AccessCategory) -> Self {
        match category {
            AccessCategory::Voice => Self::new(3, 7, 2, 3008),
            AccessCategory::Video => Self::new(7, 15, 2, 6016),
            AccessCategory::BestEffort => Self::new(15, 1023, 3, 0),
            AccessCategory::Background => Self::new(15, 1023, 7, 0),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min_cw <= self.max_cw
    }
}

/// One profile per access category, handed to every station at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdcaProfiles {
    profiles: [AccessCategoryProfile; 4],
}

impl Default for EdcaProfiles {
    fn default() -> Self {
        Self {
            profiles: AccessCategory::ALL.map(AccessCategoryProfile::default_for),
        }
    }
}

impl EdcaProfiles {
    /// Every category contends with the same parameters and no TXOP bursting.
    pub fn uniform(profile: AccessCategoryProfile) -> Self {
        let profile = AccessCategoryProfile {
            txop_limit: 0,
            ..profile
        };
        Self {
            profiles: [profile; 4],
        }
    }

    pub fn with(mut self, category: AccessCategory, profile: AccessCategoryProfile) -> Self {
        self.profiles[category.index()] = profile;
        self
    }

    pub fn get(&self, category: AccessCategory) -> &AccessCategoryProfile {
        &self.profiles[category.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (AccessCategory, &AccessCategoryProfile)> {
        AccessCategory::ALL.iter().map(|ac| (*ac, &self.profiles[ac.index()]))
    }
}
