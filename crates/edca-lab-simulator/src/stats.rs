//! Per-flow delivery statistics, accumulated from transmit/receive events.

use edca_lab_abstract::time::as_secs_f64;
use edca_lab_abstract::{AccessCategory, Flow, FlowId, Packet, SimTime};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatistics {
    pub tx_packets: u64,
    pub rx_packets: u64,
    /// Dropped after exhausting the retry limit.
    pub lost_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    /// Sum of enqueue-to-receive delays.
    pub delay_sum: SimTime,
    /// Sum of |delay_i - delay_{i-1}| over consecutive received packets.
    pub jitter_sum: SimTime,
    /// Sum of enqueue-to-first-attempt delays.
    pub access_delay_sum: SimTime,
    pub first_tx: Option<SimTime>,
    pub last_rx: Option<SimTime>,
    last_delay: Option<SimTime>,
}

impl FlowStatistics {
    /// Received bits per second between the first transmission and the last
    /// reception. NaN when fewer than two packets arrived or the interval is
    /// empty.
    pub fn throughput_bps(&self) -> f64 {
        if self.rx_packets < 2 {
            return f64::NAN;
        }
        match (self.first_tx, self.last_rx) {
            (Some(first), Some(last)) if last > first => self.rx_bytes as f64 * 8.0 / as_secs_f64(last - first),
            _ => f64::NAN,
        }
    }
}

/// Aggregate over every flow of one access category.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub category: AccessCategory,
    pub flows: usize,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    /// Seconds; `None` if nothing was transmitted.
    pub mean_access_delay: Option<f64>,
    pub mean_delay: Option<f64>,
}

/// Owns one [`FlowStatistics`] per flow, indexed by flow id.
#[derive(Debug, Clone, Default)]
pub struct FlowStatsCollector {
    categories: Vec<AccessCategory>,
    flows: Vec<FlowStatistics>,
}

impl FlowStatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, flow: &Flow) {
        debug_assert_eq!(flow.id.index(), Some(self.flows.len()));
        self.categories.push(flow.category);
        self.flows.push(FlowStatistics::default());
    }

    pub fn get(&self, flow: FlowId) -> Option<&FlowStatistics> {
        self.flows.get(flow.index()?)
    }

    fn flow_mut(&mut self, flow: FlowId) -> Option<&mut FlowStatistics> {
        self.flows.get_mut(flow.index()?)
    }

    /// Statistics in flow creation order.
    pub fn iter(&self) -> impl Iterator<Item = (FlowId, &FlowStatistics)> {
        self.flows
            .iter()
            .enumerate()
            .map(|(i, stats)| (FlowId(i as u32 + 1), stats))
    }

    /// First transmission attempt of `packet`, whose `transmit_time` is set.
    pub fn on_transmit(&mut self, packet: &Packet) {
        let Some(stats) = self.flow_mut(packet.flow) else {
            return;
        };
        let sent_at = packet.transmit_time.unwrap_or(packet.enqueue_time);
        stats.tx_packets += 1;
        stats.tx_bytes += u64::from(packet.size_bytes);
        stats.access_delay_sum += packet.access_delay().unwrap_or(0);
        stats.first_tx.get_or_insert(sent_at);
    }

    pub fn on_receive(&mut self, packet: &Packet, now: SimTime) {
        let Some(stats) = self.flow_mut(packet.flow) else {
            return;
        };
        let delay = now - packet.enqueue_time;
        stats.rx_packets += 1;
        stats.rx_bytes += u64::from(packet.size_bytes);
        stats.delay_sum += delay;
        if let Some(previous) = stats.last_delay {
            stats.jitter_sum += delay.abs_diff(previous);
        }
        stats.last_delay = Some(delay);
        stats.last_rx = Some(now);
    }

    pub fn on_drop(&mut self, packet: &Packet) {
        if let Some(stats) = self.flow_mut(packet.flow) {
            stats.lost_packets += 1;
        }
    }

    pub fn category_summary(&self, category: AccessCategory) -> CategorySummary {
        let mut summary = CategorySummary {
            category,
            flows: 0,
            tx_packets: 0,
            rx_packets: 0,
            lost_packets: 0,
            mean_access_delay: None,
            mean_delay: None,
        };
        let mut access_delay_sum = 0;
        let mut delay_sum = 0;
        for (stats, _) in self.flows.iter().zip(&self.categories).filter(|(_, ac)| **ac == category) {
            summary.flows += 1;
            summary.tx_packets += stats.tx_packets;
            summary.rx_packets += stats.rx_packets;
            summary.lost_packets += stats.lost_packets;
            access_delay_sum += stats.access_delay_sum;
            delay_sum += stats.delay_sum;
        }
        if summary.tx_packets > 0 {
            summary.mean_access_delay = Some(as_secs_f64(access_delay_sum) / summary.tx_packets as f64);
        }
        if summary.rx_packets > 0 {
            summary.mean_delay = Some(as_secs_f64(delay_sum) / summary.rx_packets as f64);
        }
        summary
    }

    /// Summaries for the categories that carry at least one flow.
    pub fn category_summaries(&self) -> Vec<CategorySummary> {
        AccessCategory::ALL
            .into_iter()
            .filter(|ac| self.categories.contains(ac))
            .map(|ac| self.category_summary(ac))
            .collect()
    }
}
