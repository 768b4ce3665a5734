//! Remote batch embedding: line codec and client contract.
//!
//! A batch submission is a JSONL payload, one chunk per line:
//!
//! ```text
//! {"custom_id": "chunk_<id>", "request": {"model": "<model>", "content": {"parts": [{"text": "<vector_source>"}]}}}
//! ```
//!
//! and each result line is `{"custom_id": "chunk_<id>", "embedding": [..]}`.

use crate::error::{Result, VitenError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// One request line of a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequestLine {
    pub custom_id: String,
    pub request: BatchRequestBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequestBody {
    pub model: String,
    pub content: BatchContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchContent {
    pub parts: Vec<BatchPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPart {
    pub text: String,
}

impl BatchRequestLine {
    /// Build the line for one chunk's vector source.
    pub fn for_chunk(chunk_id: i64, model: &str, vector_source: &str) -> Self {
        Self {
            custom_id: format!("chunk_{}", chunk_id),
            request: BatchRequestBody {
                model: model.to_string(),
                content: BatchContent {
                    parts: vec![BatchPart {
                        text: vector_source.to_string(),
                    }],
                },
            },
        }
    }
}

/// One result line of a completed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResultLine {
    pub custom_id: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Remote state of a submitted batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteBatchStatus {
    Pending,
    Running,
    Completed,
    Failed(String),
}

/// Serialize request lines as JSONL.
pub fn encode_request_lines(lines: &[BatchRequestLine]) -> Result<String> {
    let mut out = String::new();
    for line in lines {
        out.push_str(&serde_json::to_string(line)?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse a JSONL result payload, skipping malformed lines.
pub fn parse_result_lines(payload: &str) -> Vec<BatchResultLine> {
    payload
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

/// Extract the chunk id from a `chunk_<id>` custom id.
pub fn parse_custom_id(custom_id: &str) -> Option<i64> {
    custom_id.strip_prefix("chunk_")?.parse().ok()
}

/// Contract of the remote batch embedding API.
#[async_trait]
pub trait BatchEmbeddingClient: Send + Sync {
    /// Submit a batch; returns the remote job id.
    async fn submit(&self, lines: &[BatchRequestLine]) -> Result<String>;

    /// Poll the remote status of a job.
    async fn status(&self, remote_job_id: &str) -> Result<RemoteBatchStatus>;

    /// Download the result lines of a completed job.
    async fn results(&self, remote_job_id: &str) -> Result<Vec<BatchResultLine>>;
}

/// HTTP implementation of the batch contract.
pub struct HttpBatchClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct RemoteJob {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpBatchClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: crate::openai::http_client()?,
            api_base: crate::openai::api_base(),
            api_key: crate::openai::api_key()?,
        })
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(VitenError::OpenAI(format!(
                "batch API request failed with status {}: {}",
                status.as_u16(),
                detail
            )))
        }
    }
}

#[async_trait]
impl BatchEmbeddingClient for HttpBatchClient {
    #[instrument(skip_all, fields(lines = lines.len()))]
    async fn submit(&self, lines: &[BatchRequestLine]) -> Result<String> {
        let payload = encode_request_lines(lines)?;
        let response = self
            .http
            .post(format!("{}/batches/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/jsonl")
            .body(payload)
            .send()
            .await?;
        let response = self.check(response).await?;

        let job: RemoteJob = response.json().await?;
        debug!("Submitted batch of {} lines as {}", lines.len(), job.id);
        Ok(job.id)
    }

    async fn status(&self, remote_job_id: &str) -> Result<RemoteBatchStatus> {
        let response = self
            .http
            .get(format!("{}/batches/embeddings/{}", self.api_base, remote_job_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let response = self.check(response).await?;

        let job: RemoteJob = response.json().await?;
        Ok(match job.status.as_deref() {
            Some("completed") => RemoteBatchStatus::Completed,
            Some("failed") | Some("cancelled") | Some("expired") => {
                RemoteBatchStatus::Failed(job.error.unwrap_or_else(|| "batch failed".to_string()))
            }
            Some("running") | Some("in_progress") | Some("finalizing") => {
                RemoteBatchStatus::Running
            }
            _ => RemoteBatchStatus::Pending,
        })
    }

    async fn results(&self, remote_job_id: &str) -> Result<Vec<BatchResultLine>> {
        let response = self
            .http
            .get(format!(
                "{}/batches/embeddings/{}/results",
                self.api_base, remote_job_id
            ))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let response = self.check(response).await?;

        let payload = response.text().await?;
        Ok(parse_result_lines(&payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line_format() {
        let line = BatchRequestLine::for_chunk(42, "embed-model", "Document: x\nType: Text\nhello");
        let json = serde_json::to_string(&line).unwrap();
        assert!(json.starts_with("{\"custom_id\":\"chunk_42\""));
        assert!(json.contains("\"model\":\"embed-model\""));
        assert!(json.contains("\"parts\":[{\"text\":"));
    }

    #[test]
    fn test_encode_jsonl_one_line_per_chunk() {
        let lines = vec![
            BatchRequestLine::for_chunk(1, "m", "a"),
            BatchRequestLine::for_chunk(2, "m", "b"),
        ];
        let payload = encode_request_lines(&lines).unwrap();
        assert_eq!(payload.lines().count(), 2);
    }

    #[test]
    fn test_parse_result_lines_skips_garbage() {
        let payload = r#"{"custom_id": "chunk_1", "embedding": [0.1, 0.2]}
not json
{"custom_id": "chunk_2", "embedding": [0.3, 0.4]}"#;
        let results = parse_result_lines(payload);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].custom_id, "chunk_1");
        assert_eq!(results[1].embedding.as_deref(), Some(&[0.3, 0.4][..]));
    }

    #[test]
    fn test_parse_custom_id() {
        assert_eq!(parse_custom_id("chunk_17"), Some(17));
        assert_eq!(parse_custom_id("chunk_x"), None);
        assert_eq!(parse_custom_id("doc_17"), None);
    }
}
