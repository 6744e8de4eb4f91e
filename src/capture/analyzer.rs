use log::{debug, info};

use crate::capture::aggregator::SummaryBuilder;
use crate::capture::dissector::{Dissection, LinkType, PacketDissector};
use crate::capture::reader::CaptureReader;
use crate::models::stats::AnalysisResult;
use crate::utils::error::AppResult;

/// How often progress is logged while walking a capture
const PROGRESS_INTERVAL: u64 = 1000;

/// Turns a reassembled capture buffer into an analysis result
pub trait PcapAnalyzer: Send + Sync {
    fn analyze(&self, data: &[u8]) -> AppResult<AnalysisResult>;
}

/// Parses, dissects and summarizes a pcap or pcapng buffer
#[derive(Debug, Default)]
pub struct CaptureAnalyzer {
    dissector: PacketDissector,
}

impl CaptureAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PcapAnalyzer for CaptureAnalyzer {
    fn analyze(&self, data: &[u8]) -> AppResult<AnalysisResult> {
        let mut reader = CaptureReader::new(data)?;
        debug!("Analyzing {:?} capture of {} bytes", reader.format(), data.len());

        let mut packets = Vec::new();
        let mut summary = SummaryBuilder::new();
        let mut skipped = 0usize;

        for frame in reader.by_ref() {
            let frame = frame?;
            if frame.number % PROGRESS_INTERVAL == 0 {
                info!("Processed {} frames...", frame.number);
            }

            match self.dissector.dissect(&frame, LinkType::from(frame.link_type)) {
                Dissection::Packet(packet) => {
                    summary.observe(&packet);
                    packets.push(packet);
                }
                Dissection::Skipped(_) => skipped += 1,
            }
        }

        debug!(
            "Walked {} frames: {} packets, {} without a network layer",
            reader.frame_count(),
            packets.len(),
            skipped
        );

        Ok(AnalysisResult {
            packets,
            summary: summary.finish(),
        })
    }
}
