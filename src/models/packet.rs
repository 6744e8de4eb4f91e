use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One dissected frame as reported back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPacket {
    /// Source address, from the network layer
    pub source_ip: String,

    /// Destination address, from the network layer
    pub destination_ip: String,

    /// Transport protocol name, or the network protocol name when no transport was recognized
    pub protocol: String,

    /// Captured frame length in bytes
    pub size: usize,

    /// Capture timestamp of the frame
    pub timestamp: DateTime<Utc>,

    /// Extra per-layer attributes
    #[serde(default, skip_serializing_if = "AdditionalInfo::is_empty")]
    pub additional_info: AdditionalInfo,
}

/// Optional attributes attached to a packet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportPorts>,
}

impl AdditionalInfo {
    pub fn is_empty(&self) -> bool {
        self.transport.is_none()
    }
}

/// Port pair of a port-bearing transport (TCP, UDP, SCTP)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportPorts {
    pub src_port: u16,
    pub dst_port: u16,
}
