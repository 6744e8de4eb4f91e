//! Upload side of the chunk protocol: splits a capture and drives a server
//! through Start, Chunk and Finish.

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::capture::decoder::{self, Encoding};
use crate::models::message::{ChunkMessage, FinishMessage, StartMessage, Subject};
use crate::models::stats::AnalysisResult;
use crate::utils::error::AppResult;

/// Default raw bytes per chunk (before encoding)
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// Every message needed to submit one capture
#[derive(Debug, Clone)]
pub struct UploadPlan {
    pub start: StartMessage,
    pub chunks: Vec<ChunkMessage>,
    pub finish: FinishMessage,
}

impl UploadPlan {
    /// Split `data` into encoded chunks of at most `chunk_size` raw bytes
    pub fn new(analysis_id: &str, data: &[u8], chunk_size: usize, encoding: Encoding) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        let total_chunks = data.chunks(chunk_size).count() as u32;

        let chunks = data
            .chunks(chunk_size)
            .enumerate()
            .map(|(number, slice)| ChunkMessage {
                analysis_id: analysis_id.to_string(),
                chunk_number: number as u32,
                total_chunks,
                data: decoder::encode(slice, encoding),
                encoding: encoding.as_str().to_string(),
            })
            .collect();

        Self {
            start: StartMessage {
                analysis_id: analysis_id.to_string(),
                total_chunks,
            },
            chunks,
            finish: FinishMessage {
                analysis_id: analysis_id.to_string(),
            },
        }
    }

    /// Read a capture file and plan its upload
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        analysis_id: &str,
        chunk_size: usize,
        encoding: Encoding,
    ) -> AppResult<Self> {
        let data = fs::read(path)?;
        Ok(Self::new(analysis_id, &data, chunk_size, encoding))
    }
}

/// HTTP client for the event API
pub struct AnalysisClient {
    http: reqwest::Client,
    base_url: String,
}

impl AnalysisClient {
    /// Create a client for a server such as `http://127.0.0.1:3000`
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn send<T: Serialize>(&self, subject: Subject, message: &T) -> Result<Option<Vec<u8>>> {
        let url = format!("{}/api/events/{}", self.base_url, subject);
        let response = self
            .http
            .post(&url)
            .json(message)
            .send()
            .await
            .with_context(|| format!("Failed to deliver {} event", subject))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{} event rejected with HTTP {}", subject, status);
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = response.bytes().await?;
        debug!("{} reply: {} bytes", subject, body.len());
        Ok(Some(body.to_vec()))
    }

    /// Submit every message of the plan and return the analysis result
    pub async fn upload(&self, plan: &UploadPlan) -> Result<AnalysisResult> {
        self.send(Subject::Start, &plan.start).await?;

        for chunk in &plan.chunks {
            let reply = self
                .send(Subject::Chunk, chunk)
                .await?
                .ok_or_else(|| anyhow!("chunk {} got no reply", chunk.chunk_number))?;
            check_error(&reply)?;
            info!(
                "Sent chunk {}/{}",
                chunk.chunk_number.saturating_add(1),
                chunk.total_chunks
            );
        }

        let reply = self
            .send(Subject::Finish, &plan.finish)
            .await?
            .ok_or_else(|| anyhow!("finish got no reply"))?;
        check_error(&reply)?;

        serde_json::from_slice(&reply).context("Malformed analysis result")
    }
}

/// Turn an `{"error": ...}` reply into an error
fn check_error(reply: &[u8]) -> Result<()> {
    let value: serde_json::Value = serde_json::from_slice(reply).context("Malformed reply")?;
    match value.get("error").and_then(|e| e.as_str()) {
        Some(message) => Err(anyhow!("server error: {}", message)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_plan_splits_and_numbers_chunks() {
        let data: Vec<u8> = (0..25u8).collect();
        let plan = UploadPlan::new("p", &data, 10, Encoding::Hex);

        assert_eq!(plan.start.total_chunks, 3);
        assert_eq!(plan.chunks.len(), 3);
        assert_eq!(plan.chunks[2].chunk_number, 2);
        assert_eq!(plan.chunks[2].data, "1415161718");

        let rebuilt: Vec<u8> = plan
            .chunks
            .iter()
            .flat_map(|c| decoder::decode(&c.data, &c.encoding).unwrap())
            .collect();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_plan_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 100]).unwrap();

        let plan = UploadPlan::from_file(file.path(), "f", 64, Encoding::Base64).unwrap();
        assert_eq!(plan.start.total_chunks, 2);
        assert_eq!(plan.chunks[0].encoding, "base64");
        assert_eq!(plan.finish.analysis_id, "f");
    }

    #[test]
    fn test_check_error() {
        assert!(check_error(br#"{"status":"ok"}"#).is_ok());
        let err = check_error(br#"{"error":"unsupported encoding"}"#).unwrap_err();
        assert!(err.to_string().contains("unsupported encoding"));
    }
}
