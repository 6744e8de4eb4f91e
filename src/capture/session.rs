use dashmap::DashMap;
use log::{debug, warn};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::utils::error::{AppError, AppResult};

/// Accumulation state for one in-flight analysis
#[derive(Debug)]
pub struct AnalysisSession {
    /// Reassembled capture bytes so far
    pub buffer: Vec<u8>,

    /// Chunk count announced by Start
    pub total_chunks: u32,

    /// Chunks appended since Start
    pub chunks_received: u32,

    created_at: Instant,
    last_activity: Instant,
}

impl AnalysisSession {
    fn new(total_chunks: u32) -> Self {
        let now = Instant::now();
        Self {
            buffer: Vec::new(),
            total_chunks,
            chunks_received: 0,
            created_at: now,
            last_activity: now,
        }
    }

    /// Whether every announced chunk has been appended
    pub fn is_complete(&self) -> bool {
        self.chunks_received >= self.total_chunks
    }
}

/// Diagnostic view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub analysis_id: String,
    pub total_chunks: u32,
    pub chunks_received: u32,
    pub buffered_bytes: usize,
    pub age_secs: u64,
}

/// Owns every in-flight analysis session.
///
/// Each operation holds the lock of the key's shard while it runs, so
/// appends and drains for the same identifier never interleave.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, AnalysisSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty session, replacing any existing one with the same id.
    ///
    /// Returns `true` when a live session was replaced.
    pub fn begin(&self, id: &str, total_chunks: u32) -> bool {
        let replaced = self
            .sessions
            .insert(id.to_string(), AnalysisSession::new(total_chunks));

        match replaced {
            Some(old) => {
                warn!(
                    "Restarting analysis {}: discarding {} buffered bytes from {} chunks",
                    id,
                    old.buffer.len(),
                    old.chunks_received
                );
                true
            }
            None => false,
        }
    }

    /// Add decoded chunk bytes to a session.
    ///
    /// Chunk 0 replaces the buffer; any other chunk number is appended as-is,
    /// whatever its position. Returns the number of chunks received so far.
    pub fn append(&self, id: &str, chunk_number: u32, bytes: Vec<u8>) -> AppResult<u32> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| AppError::UnknownSession(id.to_string()))?;

        if chunk_number == 0 {
            session.buffer = bytes;
            session.chunks_received = 1;
        } else {
            if chunk_number != session.chunks_received {
                warn!(
                    "Analysis {}: chunk {} arrived out of sequence (expected {})",
                    id, chunk_number, session.chunks_received
                );
            }
            session.buffer.extend_from_slice(&bytes);
            session.chunks_received = session.chunks_received.saturating_add(1);
        }
        session.last_activity = Instant::now();

        debug!(
            "Analysis {}: {} bytes buffered after chunk {}",
            id,
            session.buffer.len(),
            chunk_number
        );

        Ok(session.chunks_received)
    }

    /// Remove a session and hand back its state
    pub fn drain(&self, id: &str) -> AppResult<AnalysisSession> {
        self.sessions
            .remove(id)
            .map(|(_, session)| session)
            .ok_or_else(|| AppError::UnknownSession(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Describe every live session, sorted by id
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| SessionInfo {
                analysis_id: entry.key().clone(),
                total_chunks: entry.total_chunks,
                chunks_received: entry.chunks_received,
                buffered_bytes: entry.buffer.len(),
                age_secs: entry.created_at.elapsed().as_secs(),
            })
            .collect();
        sessions.sort_by(|a, b| a.analysis_id.cmp(&b.analysis_id));
        sessions
    }

    /// Drop sessions with no activity for longer than `max_idle`.
    ///
    /// Returns the ids that were removed.
    pub fn sweep_idle(&self, max_idle: Duration) -> Vec<String> {
        let mut expired = Vec::new();
        self.sessions.retain(|id, session| {
            let keep = session.last_activity.elapsed() <= max_idle;
            if !keep {
                expired.push(id.clone());
            }
            keep
        });
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_append() {
        let store = SessionStore::new();
        assert!(!store.begin("a", 2));

        assert_eq!(store.append("a", 0, vec![1, 2]).unwrap(), 1);
        assert_eq!(store.append("a", 1, vec![3]).unwrap(), 2);

        let session = store.drain("a").unwrap();
        assert_eq!(session.buffer, vec![1, 2, 3]);
        assert_eq!(session.total_chunks, 2);
        assert!(session.is_complete());
    }

    #[test]
    fn test_chunk_zero_replaces_buffer() {
        let store = SessionStore::new();
        store.begin("a", 3);
        store.append("a", 1, vec![9, 9]).unwrap();
        store.append("a", 2, vec![8]).unwrap();
        store.append("a", 0, vec![1]).unwrap();

        assert_eq!(store.drain("a").unwrap().buffer, vec![1]);
    }

    #[test]
    fn test_nonzero_chunks_always_append() {
        let store = SessionStore::new();
        store.begin("a", 3);
        store.append("a", 0, vec![0]).unwrap();
        store.append("a", 5, vec![5]).unwrap();
        store.append("a", 5, vec![5]).unwrap();
        store.append("a", 1, vec![1]).unwrap();

        assert_eq!(store.drain("a").unwrap().buffer, vec![0, 5, 5, 1]);
    }

    #[test]
    fn test_begin_overwrites_existing_session() {
        let store = SessionStore::new();
        store.begin("a", 1);
        store.append("a", 0, vec![1, 2, 3]).unwrap();

        assert!(store.begin("a", 4));
        let session = store.drain("a").unwrap();
        assert!(session.buffer.is_empty());
        assert_eq!(session.total_chunks, 4);
        assert_eq!(session.chunks_received, 0);
    }

    #[test]
    fn test_unknown_session() {
        let store = SessionStore::new();
        assert!(matches!(
            store.append("missing", 0, vec![1]),
            Err(AppError::UnknownSession(id)) if id == "missing"
        ));
        assert!(matches!(store.drain("missing"), Err(AppError::UnknownSession(_))));
    }

    #[test]
    fn test_drain_returns_identifier_to_absent() {
        let store = SessionStore::new();
        store.begin("a", 1);
        assert!(store.contains("a"));

        store.drain("a").unwrap();
        assert!(!store.contains("a"));
        assert!(store.is_empty());
        assert!(matches!(store.drain("a"), Err(AppError::UnknownSession(_))));
    }

    #[test]
    fn test_snapshot_and_sweep() {
        let store = SessionStore::new();
        store.begin("b", 2);
        store.begin("a", 1);
        store.append("b", 0, vec![0; 10]).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].analysis_id, "a");
        assert_eq!(snapshot[1].buffered_bytes, 10);
        assert_eq!(snapshot[1].chunks_received, 1);

        assert!(store.sweep_idle(Duration::from_secs(3600)).is_empty());
        std::thread::sleep(Duration::from_millis(5));
        let mut expired = store.sweep_idle(Duration::ZERO);
        expired.sort();
        assert_eq!(expired, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_concurrent_appends_to_one_session() {
        let store = std::sync::Arc::new(SessionStore::new());
        store.begin("a", 0);

        let handles: Vec<_> = (1..=8u32)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.append("a", n, vec![n as u8; 4]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let session = store.drain("a").unwrap();
        assert_eq!(session.chunks_received, 800);
        assert_eq!(session.buffer.len(), 3200);
        // Each 4-byte append lands whole
        assert!(session
            .buffer
            .chunks(4)
            .all(|c| c.iter().all(|b| *b == c[0])));
    }
}
