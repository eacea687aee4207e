//! Client for the downstream ingestion/search service
//!
//! Wraps presigned-upload issuance, retrying content upload, document
//! status polling and snippet search. Every remote call goes through the
//! client's circuit breaker; the high-level `ingest_profile` path
//! normalizes all failures into a structured result so callers never need
//! exception handling for expected failure modes.

use anyhow::Result;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::IngestionConfig;
use crate::metrics;
use crate::profiles::ProfileMetadata;

/// Errors from the ingestion protocol.
#[derive(Debug)]
pub enum IngestError {
    /// Transport-level failure; retryable.
    Network(String),
    /// Credentials rejected (401/403); never retried.
    Auth(String),
    /// Malformed or unexpected response; never retried.
    Protocol(String),
    /// Server-side upload failure (5xx); retried up to the bound, then
    /// surfaced.
    Upload(String),
}

impl IngestError {
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Upload(_))
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Auth(msg) => write!(f, "auth error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Upload(msg) => write!(f, "upload error: {msg}"),
        }
    }
}

impl std::error::Error for IngestError {}

/// Presigned upload slot issued by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadTicket {
    pub upload_url: String,
    pub document_id: String,
    /// Form fields for multipart uploads; empty means a plain PUT.
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

/// Terminal and intermediate ingestion outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Uploaded,
    Indexed,
    Pending,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Indexed => "indexed",
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of an `ingest_profile` call. Never an `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionResult {
    pub profile_id: String,
    pub document_id: Option<String>,
    pub status: IngestionStatus,
    pub error: Option<String>,
}

impl IngestionResult {
    fn settled(
        profile_id: &str,
        document_id: Option<String>,
        status: IngestionStatus,
        error: Option<String>,
    ) -> Self {
        metrics::INGESTION_TOTAL
            .with_label_values(&[status.as_str()])
            .inc();
        Self {
            profile_id: profile_id.to_string(),
            document_id,
            status,
            error,
        }
    }

    fn failed(profile_id: &str, document_id: Option<String>, error: impl fmt::Display) -> Self {
        Self::settled(
            profile_id,
            document_id,
            IngestionStatus::Failed,
            Some(error.to_string()),
        )
    }
}

/// Document status as reported by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentStatus {
    pub status: String,
    pub document_id: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// One search hit from the sibling search path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub source: String,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// HTTP client for the ingestion service, breaker-guarded.
pub struct IngestionClient {
    config: IngestionConfig,
    http: reqwest::Client,
    breaker: CircuitBreaker,
}

impl IngestionClient {
    pub fn new(config: IngestionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.attempt_timeout)
            .build()?;
        let breaker = CircuitBreaker::new(
            "ingestion",
            config.breaker.failure_threshold,
            config.breaker.recovery_timeout,
        );
        Ok(Self {
            config,
            http,
            breaker,
        })
    }

    /// Breaker state for health endpoints.
    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    /// Configured indexing-wait deadline, for callers that poll.
    pub fn index_wait(&self) -> Duration {
        self.config.index_wait
    }

    /// Force the breaker closed (operational escape hatch).
    pub fn reset_breaker(&self) {
        self.breaker.reset();
    }

    /// Issue a presigned upload slot for `filename`.
    pub async fn create_upload_url(&self, filename: &str) -> Result<UploadTicket> {
        self.breaker
            .call(|| async {
                let response = self
                    .http
                    .post(format!("{}/v1/uploads", self.config.base_url))
                    .header("x-api-key", &self.config.api_key)
                    .json(&serde_json::json!({ "filename": filename }))
                    .send()
                    .await
                    .map_err(|e| IngestError::Network(format!("upload-url request failed: {e}")))?;

                let ticket = check_response(response)
                    .await?
                    .json::<UploadTicket>()
                    .await
                    .map_err(|e| {
                        IngestError::Protocol(format!("malformed upload-url response: {e}"))
                    })?;
                Ok(ticket)
            })
            .await
    }

    /// Fetch the indexing status of a document.
    pub async fn get_document_status(&self, document_id: &str) -> Result<DocumentStatus> {
        self.breaker
            .call(|| async {
                let response = self
                    .http
                    .get(format!(
                        "{}/v1/documents/{document_id}/status",
                        self.config.base_url
                    ))
                    .header("x-api-key", &self.config.api_key)
                    .send()
                    .await
                    .map_err(|e| IngestError::Network(format!("status request failed: {e}")))?;

                let doc = check_response(response)
                    .await?
                    .json::<DocumentStatus>()
                    .await
                    .map_err(|e| IngestError::Protocol(format!("malformed status response: {e}")))?;
                Ok(doc)
            })
            .await
    }

    /// Search indexed documents. Shares the client and breaker with the
    /// ingestion path.
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        self.breaker
            .call(|| async {
                let response = self
                    .http
                    .post(format!("{}/v1/search", self.config.base_url))
                    .header("x-api-key", &self.config.api_key)
                    .json(&serde_json::json!({
                        "query": query,
                        "max_results": max_results,
                    }))
                    .send()
                    .await
                    .map_err(|e| IngestError::Network(format!("search request failed: {e}")))?;

                let parsed = check_response(response)
                    .await?
                    .json::<SearchResponse>()
                    .await
                    .map_err(|e| IngestError::Protocol(format!("malformed search response: {e}")))?;
                Ok(parsed.results)
            })
            .await
    }

    /// Ingest one profile document end to end.
    ///
    /// The filename is derived from the profile id, so re-ingesting the same
    /// profile overwrites the same remote document. All failures come back
    /// as a `failed` result; this method never returns `Err`.
    pub async fn ingest_profile(
        &self,
        profile_id: &str,
        content: &str,
        metadata: Option<&ProfileMetadata>,
        wait_for_indexing: bool,
        timeout: Duration,
    ) -> IngestionResult {
        let filename = document_filename(profile_id);
        let body = match metadata {
            Some(profile) => format!("{}{content}", metadata_header(profile)),
            None => content.to_string(),
        };

        let ticket = match self.create_upload_url(&filename).await {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::warn!(profile_id, "could not issue upload url: {}", e);
                return IngestionResult::failed(profile_id, None, e);
            }
        };

        if let Err(e) = self
            .upload_with_retries(&ticket, &filename, body.as_bytes())
            .await
        {
            tracing::warn!(profile_id, document_id = %ticket.document_id, "upload failed: {}", e);
            return IngestionResult::failed(profile_id, Some(ticket.document_id), e);
        }

        if !wait_for_indexing {
            return IngestionResult::settled(
                profile_id,
                Some(ticket.document_id),
                IngestionStatus::Uploaded,
                None,
            );
        }

        self.poll_until_indexed(profile_id, &ticket.document_id, timeout)
            .await
    }

    /// Upload with exponential backoff. Non-retryable errors surface on the
    /// first occurrence; retryable ones are retried up to the bound and then
    /// reported as an upload failure.
    async fn upload_with_retries(
        &self,
        ticket: &UploadTicket,
        filename: &str,
        content: &[u8],
    ) -> Result<()> {
        let mut delay = self.config.retry_base_delay;
        let mut last_error = String::new();

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                metrics::INGESTION_RETRIES_TOTAL.inc();
                sleep(delay).await;
                delay *= 2;
            }

            match self.try_upload(ticket, filename, content).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let retryable = e
                        .downcast_ref::<IngestError>()
                        .map(IngestError::retryable)
                        .unwrap_or(false);
                    if !retryable {
                        return Err(e);
                    }
                    tracing::warn!(attempt = attempt + 1, "upload attempt failed: {}", e);
                    last_error = e.to_string();
                }
            }
        }

        Err(IngestError::Upload(format!(
            "upload failed after {} attempts: {last_error}",
            self.config.max_retries
        ))
        .into())
    }

    async fn try_upload(&self, ticket: &UploadTicket, filename: &str, content: &[u8]) -> Result<()> {
        self.breaker
            .call(|| async {
                let request = if ticket.fields.is_empty() {
                    self.http.put(&ticket.upload_url).body(content.to_vec())
                } else {
                    let mut form = reqwest::multipart::Form::new();
                    for (name, value) in &ticket.fields {
                        form = form.text(name.clone(), value.clone());
                    }
                    form = form.part(
                        "file",
                        reqwest::multipart::Part::bytes(content.to_vec())
                            .file_name(filename.to_string()),
                    );
                    self.http.post(&ticket.upload_url).multipart(form)
                };

                let response = request
                    .send()
                    .await
                    .map_err(|e| IngestError::Network(format!("upload transport failure: {e}")))?;
                check_response(response).await?;
                Ok(())
            })
            .await
    }

    /// Poll document status until indexed, failed, or the deadline.
    /// A deadline hit yields `pending`, which is not a failure.
    async fn poll_until_indexed(
        &self,
        profile_id: &str,
        document_id: &str,
        timeout: Duration,
    ) -> IngestionResult {
        let deadline = Instant::now() + timeout;

        loop {
            match self.get_document_status(document_id).await {
                Ok(doc) => match doc.status.as_str() {
                    "indexed" => {
                        return IngestionResult::settled(
                            profile_id,
                            Some(document_id.to_string()),
                            IngestionStatus::Indexed,
                            None,
                        );
                    }
                    "failed" => {
                        return IngestionResult::failed(
                            profile_id,
                            Some(document_id.to_string()),
                            doc.error
                                .unwrap_or_else(|| "indexing failed".to_string()),
                        );
                    }
                    other => {
                        tracing::debug!(document_id, status = other, "still waiting for indexing");
                    }
                },
                Err(e) => {
                    // Transient poll errors keep polling until the deadline;
                    // a credential or protocol rejection will not heal
                    let terminal = e
                        .downcast_ref::<IngestError>()
                        .map(|ie| !ie.retryable())
                        .unwrap_or(false);
                    if terminal {
                        return IngestionResult::failed(
                            profile_id,
                            Some(document_id.to_string()),
                            e,
                        );
                    }
                    tracing::warn!(document_id, "status poll failed: {}", e);
                }
            }

            if Instant::now() >= deadline {
                return IngestionResult::settled(
                    profile_id,
                    Some(document_id.to_string()),
                    IngestionStatus::Pending,
                    None,
                );
            }
            sleep(self.config.poll_interval).await;
        }
    }
}

/// Deterministic remote filename for a profile; the idempotent target.
fn document_filename(profile_id: &str) -> String {
    format!("profile-{profile_id}.txt")
}

/// Structured metadata header prepended to uploaded documents.
fn metadata_header(profile: &ProfileMetadata) -> String {
    let mut lines = vec!["---".to_string()];
    if !profile.name.is_empty() {
        lines.push(format!("name: {}", profile.name));
    }
    if let Some(headline) = profile.headline.as_deref() {
        lines.push(format!("headline: {headline}"));
    }
    if let Some(company) = profile.company.as_deref() {
        lines.push(format!("company: {company}"));
    }
    if !profile.skills.is_empty() {
        lines.push(format!("skills: {}", profile.skills.join(", ")));
    }
    lines.push("---".to_string());
    lines.push(String::new());
    lines.join("\n") + "\n"
}

async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, IngestError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(IngestError::Auth(format!(
            "ingestion service rejected credentials ({status})"
        )));
    }
    if status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(IngestError::Upload(format!(
            "ingestion service returned {status}: {body}"
        )));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(IngestError::Protocol(format!(
            "ingestion service returned {status}: {body}"
        )));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_filename_is_deterministic() {
        assert_eq!(document_filename("bob"), "profile-bob.txt");
        assert_eq!(document_filename("bob"), document_filename("bob"));
    }

    #[test]
    fn test_metadata_header() {
        let profile = ProfileMetadata {
            name: "Bob Martinez".to_string(),
            headline: Some("Staff Engineer".to_string()),
            summary: Some("unused in header".to_string()),
            company: Some("Initech".to_string()),
            skills: vec!["rust".to_string(), "grpc".to_string()],
        };

        let header = metadata_header(&profile);
        assert!(header.starts_with("---\n"));
        assert!(header.contains("name: Bob Martinez"));
        assert!(header.contains("headline: Staff Engineer"));
        assert!(header.contains("company: Initech"));
        assert!(header.contains("skills: rust, grpc"));
        assert!(header.ends_with("---\n\n"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(IngestError::Network("timeout".to_string()).retryable());
        assert!(IngestError::Upload("503".to_string()).retryable());
        assert!(!IngestError::Auth("401".to_string()).retryable());
        assert!(!IngestError::Protocol("bad json".to_string()).retryable());
    }
}
