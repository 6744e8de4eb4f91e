use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::packet::NetworkPacket;

/// Aggregate counters over one analyzed capture
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// Number of packets with a recognized network layer
    pub total_packets: usize,

    /// Sum of captured frame sizes
    pub total_size: usize,

    /// Packets per protocol label
    pub protocol_distribution: HashMap<String, usize>,

    /// Distinct source addresses, by exact string
    pub unique_sources: usize,

    /// Distinct destination addresses, by exact string
    pub unique_destinations: usize,
}

/// Reply to a successful Finish event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub packets: Vec<NetworkPacket>,
    pub summary: AnalysisSummary,
}
