use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three analysis events, named by their message subjects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Start,
    Chunk,
    Finish,
}

impl Subject {
    pub const ALL: [Subject; 3] = [Subject::Start, Subject::Chunk, Subject::Finish];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Start => "network.analysis.start",
            Subject::Chunk => "network.analysis.chunk",
            Subject::Finish => "network.analysis.finish",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Subject::ALL
            .into_iter()
            .find(|subject| subject.as_str() == s)
            .ok_or_else(|| format!("unknown subject: {}", s))
    }
}

/// Opens an analysis session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartMessage {
    pub analysis_id: String,
    pub total_chunks: u32,
}

/// One encoded slice of the capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMessage {
    pub analysis_id: String,
    /// Zero-based sequence number
    pub chunk_number: u32,
    pub total_chunks: u32,
    pub data: String,
    pub encoding: String,
}

/// Closes the session and requests the analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishMessage {
    pub analysis_id: String,
}

/// Acknowledgement of an accepted chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: String,
}

impl StatusReply {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Structured failure reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
}

impl ErrorReply {
    pub fn new(error: impl fmt::Display) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}
