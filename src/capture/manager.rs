use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::capture::analyzer::{CaptureAnalyzer, PcapAnalyzer};
use crate::capture::decoder;
use crate::capture::session::{SessionInfo, SessionStore};
use crate::models::message::{
    ChunkMessage, ErrorReply, FinishMessage, StartMessage, StatusReply, Subject,
};
use crate::models::stats::AnalysisResult;
use crate::utils::error::AppResult;

/// Drives the Start -> Chunk* -> Finish lifecycle of every analysis
pub struct AnalysisManager {
    /// In-flight sessions
    sessions: SessionStore,

    /// Runs once a capture is fully reassembled
    analyzer: Arc<dyn PcapAnalyzer>,
}

impl Default for AnalysisManager {
    fn default() -> Self {
        Self::new(Arc::new(CaptureAnalyzer::new()))
    }
}

impl AnalysisManager {
    /// Create a manager using the given analyzer
    pub fn new(analyzer: Arc<dyn PcapAnalyzer>) -> Self {
        Self {
            sessions: SessionStore::new(),
            analyzer,
        }
    }

    /// Open (or restart) an analysis session
    pub fn start(&self, message: &StartMessage) {
        self.sessions.begin(&message.analysis_id, message.total_chunks);
        info!(
            "Starting analysis ID: {}, expecting {} chunks",
            message.analysis_id, message.total_chunks
        );
    }

    /// Decode a chunk and add it to its session.
    ///
    /// A failing chunk leaves the session buffer untouched.
    pub fn chunk(&self, message: &ChunkMessage) -> AppResult<()> {
        let bytes = decoder::decode(&message.data, &message.encoding)?;
        let received = self
            .sessions
            .append(&message.analysis_id, message.chunk_number, bytes)?;

        info!(
            "Processed chunk {}/{} for analysis ID: {}",
            message.chunk_number.saturating_add(1),
            message.total_chunks,
            message.analysis_id
        );
        if received == message.total_chunks {
            info!(
                "All {} chunks received for analysis ID: {}",
                received, message.analysis_id
            );
        }
        Ok(())
    }

    /// Remove the session and analyze its buffer.
    ///
    /// The session is gone afterwards whether or not the analysis succeeds.
    pub fn finish(&self, message: &FinishMessage) -> AppResult<AnalysisResult> {
        let session = self.sessions.drain(&message.analysis_id)?;
        if !session.is_complete() {
            warn!(
                "Finishing analysis ID: {} with {} of {} chunks",
                message.analysis_id, session.chunks_received, session.total_chunks
            );
        }

        info!(
            "Starting final analysis for ID: {} ({} bytes)",
            message.analysis_id,
            session.buffer.len()
        );
        let result = self.analyzer.analyze(&session.buffer)?;

        info!(
            "Analysis completed for ID: {}, processed {} packets",
            message.analysis_id,
            result.packets.len()
        );
        Ok(result)
    }

    /// Handle a raw event body and produce the reply body, if the event expects one.
    ///
    /// Failures never escape: they become `{"error": ...}` replies.
    pub fn handle_event(&self, subject: Subject, payload: &[u8]) -> Option<Vec<u8>> {
        match self.dispatch(subject, payload) {
            Ok(reply) => reply,
            Err(e) => {
                error!("Failed to handle {} event: {}", subject, e);
                Some(encode_error(&ErrorReply::new(&e)))
            }
        }
    }

    fn dispatch(&self, subject: Subject, payload: &[u8]) -> AppResult<Option<Vec<u8>>> {
        match subject {
            Subject::Start => {
                let message: StartMessage = serde_json::from_slice(payload)?;
                self.start(&message);
                Ok(None)
            }
            Subject::Chunk => {
                let message: ChunkMessage = serde_json::from_slice(payload)?;
                self.chunk(&message)?;
                encode_reply(&StatusReply::ok()).map(Some)
            }
            Subject::Finish => {
                let message: FinishMessage = serde_json::from_slice(payload)?;
                let result = self.finish(&message)?;
                encode_reply(&result).map(Some)
            }
        }
    }

    /// Diagnostic listing of in-flight sessions
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.snapshot()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop sessions that have been idle for longer than `ttl`
    pub fn expire_idle_sessions(&self, ttl: Duration) -> usize {
        let expired = self.sessions.sweep_idle(ttl);
        for id in &expired {
            warn!("Expired idle analysis ID: {}", id);
        }
        expired.len()
    }
}

fn encode_reply<T: Serialize>(reply: &T) -> AppResult<Vec<u8>> {
    Ok(serde_json::to_vec(reply)?)
}

fn encode_error(reply: &ErrorReply) -> Vec<u8> {
    // A struct of one string field always serializes
    serde_json::to_vec(reply).unwrap_or_else(|_| br#"{"error":"internal error"}"#.to_vec())
}
