//! Edge graph service - bidirectional relationship state between members
//!
//! Every relationship is stored as two denormalized items so both sides can
//! be looked up by partition: a forward edge (owner -> target) carrying
//! status, timestamps and message history, and a reverse edge (target ->
//! owner) carrying attempt telemetry. The pair is written in one atomic
//! transaction, and the forward edge is mirrored into a status-keyed
//! secondary index inside that same transaction.
//!
//! Upserts that land in a configured trigger-status set kick off a
//! downstream ingestion after the commit. That side effect runs on its own
//! result channel: it can degrade the response, never the write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

use crate::classifier::{classify, ConversionLikelihood, EdgeActivity};
use crate::constants::MAX_SEED_MESSAGES;
use crate::errors::EdgeError;
use crate::ingestion::{IngestionClient, IngestionStatus};
use crate::metrics;
use crate::profiles::{ProfileCatalog, ProfileMetadata};
use crate::store::{
    Item, ItemKey, QueryTarget, RelationStore, UpdateSpec, INDEX_PARTITION_ATTR, INDEX_SORT_ATTR,
};
use crate::validation;

/// Status that stamps `processed_at` on the forward edge.
const STATUS_PROCESSED: &str = "processed";
/// Status whose connections get a conversion-likelihood score.
const STATUS_POSSIBLE: &str = "possible";

/// Message direction relative to the edge owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "self")]
    FromSelf,
    #[serde(rename = "other")]
    FromOther,
}

impl Direction {
    /// Normalize legacy direction vocabularies into the current one.
    fn from_legacy(raw: &str) -> Self {
        match raw {
            "self" | "sent" | "outgoing" => Self::FromSelf,
            _ => Self::FromOther,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FromSelf => "self",
            Self::FromOther => "other",
        }
    }
}

/// One entry in an edge's message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
}

/// Stored message shapes across format generations, resolved at the read
/// boundary. Anything else is stringified into a placeholder.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredMessage {
    Structured {
        content: String,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
        #[serde(default)]
        direction: Option<String>,
    },
    Raw(String),
}

fn resolve_message(value: &Value) -> Message {
    match serde_json::from_value::<StoredMessage>(value.clone()) {
        Ok(StoredMessage::Structured {
            content,
            timestamp,
            direction,
        }) => Message {
            content,
            timestamp: timestamp.unwrap_or(DateTime::UNIX_EPOCH),
            direction: direction
                .as_deref()
                .map(Direction::from_legacy)
                .unwrap_or(Direction::FromOther),
        },
        // Early format: a bare string was the owner's outgoing note
        Ok(StoredMessage::Raw(content)) => Message {
            content,
            timestamp: DateTime::UNIX_EPOCH,
            direction: Direction::FromSelf,
        },
        Err(e) => {
            tracing::warn!("unreadable message record, stringifying: {}", e);
            Message {
                content: value.to_string(),
                timestamp: DateTime::UNIX_EPOCH,
                direction: Direction::FromOther,
            }
        }
    }
}

/// Result of an upsert. Ingestion state rides along without ever being able
/// to fail the write.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertOutcome {
    pub target_key: String,
    pub status: String,
    pub ingested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingestion_error: Option<String>,
}

/// Existence probe result.
#[derive(Debug, Clone, Serialize)]
pub struct EdgePresence {
    pub exists: bool,
    pub status: Option<String>,
    pub added_at: Option<String>,
    pub updated_at: Option<String>,
    pub processed_at: Option<String>,
}

/// One row of a connection listing.
///
/// `conversion_likelihood` is always serialized; it is null for every
/// status except "possible".
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionView {
    pub target_id: String,
    pub status: String,
    pub added_at: Option<String>,
    pub updated_at: Option<String>,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub headline: Option<String>,
    pub company: Option<String>,
    pub conversion_likelihood: Option<ConversionLikelihood>,
}

/// Store reachability report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub details: String,
}

/// Orchestrates all relationship operations.
pub struct EdgeGraphService {
    store: Arc<RelationStore>,
    profiles: ProfileCatalog,
    ingestion: Arc<IngestionClient>,
    /// Statuses that trigger downstream ingestion after a committed upsert.
    ingest_statuses: HashSet<String>,
}

impl EdgeGraphService {
    pub fn new(
        store: Arc<RelationStore>,
        ingestion: Arc<IngestionClient>,
        ingest_statuses: HashSet<String>,
    ) -> Self {
        let profiles = ProfileCatalog::new(store.clone());
        Self {
            store,
            profiles,
            ingestion,
            ingest_statuses,
        }
    }

    fn forward_key(owner_id: &str, target_id: &str) -> ItemKey {
        ItemKey::new(format!("OWNER#{owner_id}"), format!("TARGET#{target_id}"))
    }

    fn reverse_key(owner_id: &str, target_id: &str) -> ItemKey {
        ItemKey::new(format!("TARGET#{target_id}"), format!("OWNER#{owner_id}"))
    }

    fn index_sort(status: &str, target_id: &str) -> String {
        format!("STATUS#{status}#TARGET#{target_id}")
    }

    /// Create or refresh the edge pair in one all-or-nothing transaction,
    /// then run the post-commit ingestion trigger when the status calls for
    /// it.
    ///
    /// The reverse edge keeps its original `added_at` across repeat calls
    /// and counts every call in `attempts`, whether or not the status
    /// changed.
    pub async fn upsert_status(
        &self,
        owner_id: &str,
        target_id: &str,
        status: &str,
        added_at: Option<DateTime<Utc>>,
        seed_messages: Option<Vec<Message>>,
    ) -> Result<UpsertOutcome, EdgeError> {
        validation::validate_member_id(owner_id)
            .map_err(|e| EdgeError::validation("owner_id", e))?;
        validation::validate_member_id(target_id)
            .map_err(|e| EdgeError::validation("target_id", e))?;
        validation::validate_status(status).map_err(|e| EdgeError::validation("status", e))?;

        let seeds = seed_messages.unwrap_or_default();
        if seeds.len() > MAX_SEED_MESSAGES {
            return Err(EdgeError::validation(
                "messages",
                format!("too many seed messages: {} (max: {MAX_SEED_MESSAGES})", seeds.len()),
            ));
        }

        let now = Utc::now();
        let added_at = added_at.unwrap_or(now);
        let messages = seeds
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EdgeError::Internal(e.into()))?;

        let mut forward = UpdateSpec::new()
            .set("owner_id", json!(owner_id))
            .set("target_id", json!(target_id))
            .set("status", json!(status))
            .set("added_at", json!(added_at))
            .set("updated_at", json!(now))
            .set("messages", Value::Array(messages))
            .set(INDEX_PARTITION_ATTR, json!(owner_id))
            .set(INDEX_SORT_ATTR, json!(Self::index_sort(status, target_id)));
        if status == STATUS_PROCESSED {
            forward = forward.set("processed_at", json!(now));
        }

        let reverse = UpdateSpec::new()
            .set("owner_id", json!(owner_id))
            .set("target_id", json!(target_id))
            .set("status", json!(status))
            .set("last_attempt", json!(now))
            .set("updated_at", json!(now))
            .set_if_absent("added_at", json!(added_at))
            .add("attempts", 1);

        self.store
            .transactional_write(vec![
                (Self::forward_key(owner_id, target_id), forward),
                (Self::reverse_key(owner_id, target_id), reverse),
            ])
            .map_err(|e| {
                metrics::EDGE_UPSERTS_TOTAL.with_label_values(&["error"]).inc();
                EdgeError::ExternalService(format!("edge transaction failed: {e}"))
            })?;
        metrics::EDGE_UPSERTS_TOTAL.with_label_values(&["ok"]).inc();

        let mut outcome = UpsertOutcome {
            target_key: format!("TARGET#{target_id}"),
            status: status.to_string(),
            ingested: false,
            ingestion_error: None,
        };

        if self.ingest_statuses.contains(status) {
            match self.trigger_ingestion(owner_id, target_id).await {
                Ok(()) => outcome.ingested = true,
                Err(reason) => outcome.ingestion_error = Some(reason),
            }
        }

        Ok(outcome)
    }

    /// Post-commit ingestion side effect. Returns the failure reason for
    /// the response channel instead of failing the upsert.
    async fn trigger_ingestion(&self, owner_id: &str, target_id: &str) -> Result<(), String> {
        let profile = self.profiles.get(target_id);
        let content = profile_document(target_id, profile.as_ref());

        let result = self
            .ingestion
            .ingest_profile(
                target_id,
                &content,
                profile.as_ref(),
                false,
                self.ingestion.index_wait(),
            )
            .await;

        match result.status {
            IngestionStatus::Failed => {
                tracing::warn!(
                    owner_id,
                    target_id,
                    "post-upsert ingestion failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
                Err(result
                    .error
                    .unwrap_or_else(|| "ingestion failed".to_string()))
            }
            _ => {
                self.mark_ingested(owner_id, target_id, result.document_id.as_deref());
                Ok(())
            }
        }
    }

    /// Best-effort flag update after a successful ingestion; failure here is
    /// logged and swallowed.
    fn mark_ingested(&self, owner_id: &str, target_id: &str, document_id: Option<&str>) {
        let mut spec = UpdateSpec::new().set("ingested_at", json!(Utc::now()));
        if let Some(id) = document_id {
            spec = spec.set("ingestion_document_id", json!(id));
        }
        if let Err(e) = self
            .store
            .conditional_update(&Self::forward_key(owner_id, target_id), spec)
        {
            tracing::warn!(owner_id, target_id, "could not flag ingested edge: {}", e);
        }
    }

    /// Append one message to the edge's history. The append is atomic and
    /// starts the list when the edge has none.
    pub fn add_message(
        &self,
        owner_id: &str,
        target_id: &str,
        content: &str,
        direction: Direction,
    ) -> Result<(), EdgeError> {
        validation::validate_member_id(owner_id)
            .map_err(|e| EdgeError::validation("owner_id", e))?;
        validation::validate_member_id(target_id)
            .map_err(|e| EdgeError::validation("target_id", e))?;
        if content.trim().is_empty() {
            return Err(EdgeError::validation("content", "message content cannot be empty"));
        }
        validation::validate_message_length(content)
            .map_err(|e| EdgeError::validation("content", e))?;

        let message = Message {
            content: content.to_string(),
            timestamp: Utc::now(),
            direction,
        };
        let value = serde_json::to_value(&message).map_err(|e| EdgeError::Internal(e.into()))?;

        self.store
            .conditional_update(
                &Self::forward_key(owner_id, target_id),
                UpdateSpec::new().append("messages", value),
            )
            .map_err(|e| EdgeError::ExternalService(format!("message append failed: {e}")))?;
        metrics::EDGE_MESSAGES_TOTAL.inc();
        Ok(())
    }

    /// Message history in append order. A missing edge yields an empty list,
    /// and a malformed record becomes a placeholder entry rather than
    /// aborting the response.
    pub fn get_messages(&self, owner_id: &str, target_id: &str) -> Result<Vec<Message>, EdgeError> {
        validation::validate_member_id(owner_id)
            .map_err(|e| EdgeError::validation("owner_id", e))?;
        validation::validate_member_id(target_id)
            .map_err(|e| EdgeError::validation("target_id", e))?;

        let item = self
            .store
            .get(&Self::forward_key(owner_id, target_id))
            .map_err(|e| EdgeError::ExternalService(format!("edge lookup failed: {e}")))?;

        let Some(item) = item else {
            return Ok(Vec::new());
        };

        let raw = item
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(raw.iter().map(resolve_message).collect())
    }

    /// List connections for an owner, over the whole partition or narrowed
    /// to one status through the secondary index.
    pub fn get_connections(
        &self,
        owner_id: &str,
        status: Option<&str>,
    ) -> Result<Vec<ConnectionView>, EdgeError> {
        validation::validate_member_id(owner_id)
            .map_err(|e| EdgeError::validation("owner_id", e))?;
        if let Some(s) = status {
            validation::validate_status(s).map_err(|e| EdgeError::validation("status", e))?;
        }

        let target = match status {
            None => QueryTarget::Primary {
                partition: format!("OWNER#{owner_id}"),
                sort_prefix: Some("TARGET#".to_string()),
            },
            Some(s) => QueryTarget::Index {
                partition: owner_id.to_string(),
                sort_prefix: Some(format!("STATUS#{s}#TARGET#")),
            },
        };
        metrics::CONNECTION_QUERIES_TOTAL
            .with_label_values(&[if status.is_some() { "index" } else { "partition" }])
            .inc();

        let items = self
            .store
            .query(target)
            .map_err(|e| EdgeError::ExternalService(format!("connection query failed: {e}")))?;

        Ok(items
            .iter()
            .map(|item| self.connection_view(owner_id, item))
            .collect())
    }

    fn connection_view(&self, owner_id: &str, item: &Item) -> ConnectionView {
        let target_id = str_attr(item, "target_id").unwrap_or_default();
        let status = str_attr(item, "status").unwrap_or_default();

        let profile = self.profiles.get(&target_id);
        if profile.is_none() {
            tracing::debug!(%target_id, "no profile metadata for connection");
        }
        let meta = profile.clone().unwrap_or_default();
        let (first_name, last_name) = split_display_name(&meta.name);

        let conversion_likelihood = if status == STATUS_POSSIBLE {
            let activity = EdgeActivity {
                added_at: str_attr(item, "added_at"),
                attempts: self.reverse_attempts(owner_id, &target_id),
            };
            Some(classify(profile.as_ref(), Some(&activity)))
        } else {
            None
        };

        ConnectionView {
            target_id,
            status,
            added_at: str_attr(item, "added_at"),
            updated_at: str_attr(item, "updated_at"),
            name: meta.name,
            first_name,
            last_name,
            headline: meta.headline,
            company: meta.company,
            conversion_likelihood,
        }
    }

    /// Attempt count from the reverse edge; absent or unreadable counts as
    /// zero.
    fn reverse_attempts(&self, owner_id: &str, target_id: &str) -> i64 {
        match self.store.get(&Self::reverse_key(owner_id, target_id)) {
            Ok(Some(item)) => item.get("attempts").and_then(Value::as_i64).unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(owner_id, target_id, "reverse edge lookup failed: {}", e);
                0
            }
        }
    }

    /// Existence probe for one edge.
    pub fn check_exists(&self, owner_id: &str, target_id: &str) -> Result<EdgePresence, EdgeError> {
        validation::validate_member_id(owner_id)
            .map_err(|e| EdgeError::validation("owner_id", e))?;
        validation::validate_member_id(target_id)
            .map_err(|e| EdgeError::validation("target_id", e))?;

        let item = self
            .store
            .get(&Self::forward_key(owner_id, target_id))
            .map_err(|e| EdgeError::ExternalService(format!("edge lookup failed: {e}")))?;

        Ok(match item {
            Some(item) => EdgePresence {
                exists: true,
                status: str_attr(&item, "status"),
                added_at: str_attr(&item, "added_at"),
                updated_at: str_attr(&item, "updated_at"),
                processed_at: str_attr(&item, "processed_at"),
            },
            None => EdgePresence {
                exists: false,
                status: None,
                added_at: None,
                updated_at: None,
                processed_at: None,
            },
        })
    }

    /// Store reachability without mutation.
    pub fn health_check(&self) -> HealthStatus {
        match self.store.ping() {
            Ok(()) => HealthStatus {
                healthy: true,
                details: "store reachable".to_string(),
            },
            Err(e) => HealthStatus {
                healthy: false,
                details: format!("store unreachable: {e}"),
            },
        }
    }

    /// Breaker state of the ingestion dependency, for health reporting.
    pub fn ingestion_breaker(&self) -> crate::circuit_breaker::BreakerSnapshot {
        self.ingestion.breaker_snapshot()
    }
}

/// Document body uploaded for a profile; the structured header is the
/// client's concern.
fn profile_document(profile_id: &str, profile: Option<&ProfileMetadata>) -> String {
    match profile {
        Some(meta) => {
            let mut parts = vec![meta.name.clone()];
            if let Some(headline) = meta.headline.as_deref() {
                parts.push(headline.to_string());
            }
            if let Some(summary) = meta.summary.as_deref() {
                parts.push(String::new());
                parts.push(summary.to_string());
            }
            parts.join("\n")
        }
        None => format!("Profile {profile_id}"),
    }
}

/// Split a display name into (first, last) on the first whitespace run.
/// An empty name yields ("", "").
pub fn split_display_name(name: &str) -> (String, String) {
    let name = name.trim();
    match name.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim_start().to_string()),
        None => (name.to_string(), String::new()),
    }
}

fn str_attr(item: &Item, attr: &str) -> Option<String> {
    item.get(attr).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_display_name() {
        assert_eq!(
            split_display_name("Grace Hopper"),
            ("Grace".to_string(), "Hopper".to_string())
        );
        assert_eq!(
            split_display_name("Ada Augusta Lovelace"),
            ("Ada".to_string(), "Augusta Lovelace".to_string())
        );
        assert_eq!(split_display_name("Cher"), ("Cher".to_string(), String::new()));
        assert_eq!(split_display_name(""), (String::new(), String::new()));
        assert_eq!(
            split_display_name("  Alan   Turing  "),
            ("Alan".to_string(), "Turing".to_string())
        );
    }

    #[test]
    fn test_direction_normalization() {
        assert_eq!(Direction::from_legacy("self"), Direction::FromSelf);
        assert_eq!(Direction::from_legacy("sent"), Direction::FromSelf);
        assert_eq!(Direction::from_legacy("outgoing"), Direction::FromSelf);
        assert_eq!(Direction::from_legacy("other"), Direction::FromOther);
        assert_eq!(Direction::from_legacy("received"), Direction::FromOther);
        assert_eq!(Direction::from_legacy("mystery"), Direction::FromOther);
    }

    #[test]
    fn test_resolve_structured_message() {
        let value = json!({
            "content": "hello",
            "timestamp": "2025-05-01T10:00:00Z",
            "direction": "other"
        });
        let message = resolve_message(&value);
        assert_eq!(message.content, "hello");
        assert_eq!(message.direction, Direction::FromOther);
    }

    #[test]
    fn test_resolve_legacy_direction() {
        let value = json!({ "content": "ping", "direction": "sent" });
        let message = resolve_message(&value);
        assert_eq!(message.direction, Direction::FromSelf);
        assert_eq!(message.timestamp, DateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_resolve_raw_string_message() {
        let value = json!("plain old note");
        let message = resolve_message(&value);
        assert_eq!(message.content, "plain old note");
        assert_eq!(message.direction, Direction::FromSelf);
    }

    #[test]
    fn test_resolve_unknown_shape_stringifies() {
        let value = json!(42);
        let message = resolve_message(&value);
        assert_eq!(message.content, "42");
        assert_eq!(message.direction, Direction::FromOther);
    }

    #[test]
    fn test_profile_document_without_profile() {
        assert_eq!(profile_document("bob", None), "Profile bob");
    }
}
