use anyhow::Context;
use edca_lab_abstract::time::as_secs_f64;
use edca_lab_abstract::{Flow, FlowLabel};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::stats::FlowStatsCollector;

/// One element of the exported JSON array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRecord {
    pub flow_id: u32,
    pub flow_label: FlowLabel,
    pub tx_packets: u64,
    pub rx_packets: u64,
    /// Seconds.
    pub delay_sum: f64,
    /// Seconds.
    pub jitter_sum: f64,
    /// Bits per second. Non-finite values serialize as `null`.
    pub throughput: f64,
}

/// Build one record per flow, in flow creation order.
pub fn build_records(flows: &[Flow], stats: &FlowStatsCollector) -> Vec<FlowRecord> {
    flows
        .iter()
        .filter_map(|flow| {
            let s = stats.get(flow.id)?;
            let throughput = s.throughput_bps();
            if throughput.is_nan() {
                warn!(
                    "Flow {} ({}) has undefined throughput: {} packets received",
                    flow.id, flow.label, s.rx_packets
                );
            }
            Some(FlowRecord {
                flow_id: flow.id.0,
                flow_label: flow.label,
                tx_packets: s.tx_packets,
                rx_packets: s.rx_packets,
                delay_sum: as_secs_f64(s.delay_sum),
                jitter_sum: as_secs_f64(s.jitter_sum),
                throughput,
            })
        })
        .collect()
}

pub fn write_records(path: &Path, records: &[FlowRecord]) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(records).context("failed to serialize flow records")?;
    fs::write(path, bytes).with_context(|| format!("failed to write flow records to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use edca_lab_abstract::time::millis;
    use edca_lab_abstract::{AccessCategory, FlowId, Packet, StationId};

    fn flows() -> Vec<Flow> {
        [(FlowLabel::Voip, AccessCategory::Voice), (FlowLabel::Background(1), AccessCategory::Background)]
            .into_iter()
            .enumerate()
            .map(|(i, (label, category))| Flow {
                id: FlowId(i as u32 + 1),
                source: StationId(i as u32),
                destination: StationId(9),
                port: 8000,
                label,
                category,
            })
            .collect()
    }

    #[test]
    fn records_serialize_with_camel_case_and_null_throughput() {
        let flows = flows();
        let mut stats = FlowStatsCollector::new();
        for flow in &flows {
            stats.register(flow);
        }
        for seq in 0..2 {
            let mut packet = Packet::new(FlowId(1), seq, 500, millis(u64::from(seq) * 10));
            packet.transmit_time = Some(packet.enqueue_time);
            stats.on_transmit(&packet);
            stats.on_receive(&packet, packet.enqueue_time + millis(1));
        }

        let records = build_records(&flows, &stats);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tx_packets, 2);
        assert_eq!(records[0].delay_sum, 0.002);

        let json = serde_json::to_value(&records).unwrap();
        assert_eq!(json[0]["flowId"], 1);
        assert_eq!(json[0]["flowLabel"], "VoIP");
        assert_eq!(json[0]["rxPackets"], 2);
        assert_eq!(json[1]["flowLabel"], "Background1");
        assert!(json[1]["throughput"].is_null());
    }

    #[test]
    fn no_flows_export_an_empty_array() {
        let records = build_records(&[], &FlowStatsCollector::new());
        assert_eq!(serde_json::to_string(&records).unwrap(), "[]");
    }
}
