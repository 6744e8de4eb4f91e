use std::collections::{HashMap, HashSet};

use crate::models::packet::NetworkPacket;
use crate::models::stats::AnalysisSummary;

/// Incrementally folds packets into an [`AnalysisSummary`]
#[derive(Debug, Default)]
pub struct SummaryBuilder {
    total_packets: usize,
    total_size: usize,
    protocols: HashMap<String, usize>,
    sources: HashSet<String>,
    destinations: HashSet<String>,
}

impl SummaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, packet: &NetworkPacket) {
        self.total_packets += 1;
        self.total_size += packet.size;
        *self.protocols.entry(packet.protocol.clone()).or_insert(0) += 1;

        // Addresses are compared textually
        if !self.sources.contains(&packet.source_ip) {
            self.sources.insert(packet.source_ip.clone());
        }
        if !self.destinations.contains(&packet.destination_ip) {
            self.destinations.insert(packet.destination_ip.clone());
        }
    }

    pub fn finish(self) -> AnalysisSummary {
        AnalysisSummary {
            total_packets: self.total_packets,
            total_size: self.total_size,
            protocol_distribution: self.protocols,
            unique_sources: self.sources.len(),
            unique_destinations: self.destinations.len(),
        }
    }
}

/// Summarize a complete packet listing
pub fn summarize(packets: &[NetworkPacket]) -> AnalysisSummary {
    let mut builder = SummaryBuilder::new();
    for packet in packets {
        builder.observe(packet);
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::packet::AdditionalInfo;
    use chrono::Utc;

    fn packet(src: &str, dst: &str, protocol: &str, size: usize) -> NetworkPacket {
        NetworkPacket {
            source_ip: src.to_string(),
            destination_ip: dst.to_string(),
            protocol: protocol.to_string(),
            size,
            timestamp: Utc::now(),
            additional_info: AdditionalInfo::default(),
        }
    }

    #[test]
    fn test_empty_listing() {
        let summary = summarize(&[]);
        assert_eq!(summary, AnalysisSummary::default());
        assert!(summary.protocol_distribution.is_empty());
    }

    #[test]
    fn test_counts_and_distribution() {
        let packets = vec![
            packet("10.0.0.1", "10.0.0.9", "TCP", 60),
            packet("10.0.0.1", "10.0.0.9", "UDP", 100),
            packet("10.0.0.2", "10.0.0.8", "TCP", 40),
        ];
        let summary = summarize(&packets);

        assert_eq!(summary.total_packets, 3);
        assert_eq!(summary.total_size, 200);
        assert_eq!(summary.protocol_distribution.get("TCP"), Some(&2));
        assert_eq!(summary.protocol_distribution.get("UDP"), Some(&1));
        assert_eq!(summary.unique_sources, 2);
        assert_eq!(summary.unique_destinations, 2);
    }

    #[test]
    fn test_textually_distinct_addresses_count_separately() {
        let packets = vec![
            packet("::1", "::2", "IPv6", 40),
            packet("0:0:0:0:0:0:0:1", "::2", "IPv6", 40),
        ];
        let summary = summarize(&packets);
        assert_eq!(summary.unique_sources, 2);
        assert_eq!(summary.unique_destinations, 1);
    }
}
