//! Edge Graph Tests
//!
//! End-to-end tests for the relationship core:
//! - Dual-edge transactional upserts
//! - Idempotent attempt accounting
//! - Message history append and normalization
//! - Status-filtered connection listing via the secondary index
//! - Conversion-likelihood wiring
//! - Ingestion side-effect isolation

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tempfile::TempDir;

use setu::config::{BreakerSettings, IngestionConfig};
use setu::edge_graph::{Direction, EdgeGraphService};
use setu::errors::EdgeError;
use setu::ingestion::IngestionClient;
use setu::profiles::{ProfileCatalog, ProfileMetadata};
use setu::store::{ItemKey, RelationStore, UpdateSpec};

/// Ingestion config pointed at nothing routable, tuned for fast failure
fn unreachable_ingestion() -> IngestionConfig {
    IngestionConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        api_key: "test-key".to_string(),
        max_retries: 1,
        retry_base_delay: Duration::from_millis(1),
        attempt_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        index_wait: Duration::from_millis(50),
        breaker: BreakerSettings {
            failure_threshold: 100,
            recovery_timeout: Duration::from_millis(50),
        },
    }
}

fn setup_service(trigger_statuses: &[&str]) -> (EdgeGraphService, Arc<RelationStore>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(RelationStore::open(temp_dir.path()).expect("Failed to open store"));
    let ingestion =
        Arc::new(IngestionClient::new(unreachable_ingestion()).expect("Failed to build client"));
    let statuses: HashSet<String> = trigger_statuses.iter().map(|s| s.to_string()).collect();
    let service = EdgeGraphService::new(store.clone(), ingestion, statuses);
    (service, store, temp_dir)
}

fn forward_key(owner: &str, target: &str) -> ItemKey {
    ItemKey::new(format!("OWNER#{owner}"), format!("TARGET#{target}"))
}

fn reverse_key(owner: &str, target: &str) -> ItemKey {
    ItemKey::new(format!("TARGET#{target}"), format!("OWNER#{owner}"))
}

fn put_profile(store: &Arc<RelationStore>, id: &str, profile: &ProfileMetadata) {
    ProfileCatalog::new(store.clone())
        .put(id, profile)
        .expect("Failed to store profile");
}

fn complete_profile(name: &str) -> ProfileMetadata {
    ProfileMetadata {
        name: name.to_string(),
        headline: Some("Staff Engineer".to_string()),
        summary: Some("Builds reliable systems".to_string()),
        company: Some("Initech".to_string()),
        skills: vec!["rust".to_string()],
    }
}

// =============================================================================
// UPSERT TESTS
// =============================================================================

#[tokio::test]
async fn test_upsert_creates_both_edges_with_matching_status() {
    let (service, store, _dir) = setup_service(&[]);

    let outcome = service
        .upsert_status("alice", "bob", "possible", None, None)
        .await
        .unwrap();
    assert_eq!(outcome.target_key, "TARGET#bob");
    assert_eq!(outcome.status, "possible");
    assert!(!outcome.ingested);
    assert!(outcome.ingestion_error.is_none());

    let presence = service.check_exists("alice", "bob").unwrap();
    assert!(presence.exists);
    assert_eq!(presence.status.as_deref(), Some("possible"));

    let reverse = store.get(&reverse_key("alice", "bob")).unwrap().unwrap();
    assert_eq!(reverse.get("status"), Some(&json!("possible")));
    assert_eq!(reverse.get("attempts"), Some(&json!(1)));
    assert!(reverse.get("last_attempt").is_some());
}

#[tokio::test]
async fn test_repeat_upsert_preserves_added_at_and_counts_attempts() {
    let (service, store, _dir) = setup_service(&[]);
    let pinned: DateTime<Utc> = "2025-06-01T12:00:00Z".parse().unwrap();

    for _ in 0..3 {
        service
            .upsert_status("alice", "bob", "pending", Some(pinned), None)
            .await
            .unwrap();
    }

    let reverse = store.get(&reverse_key("alice", "bob")).unwrap().unwrap();
    assert_eq!(reverse.get("attempts"), Some(&json!(3)));
    assert_eq!(
        reverse.get("added_at"),
        Some(&json!("2025-06-01T12:00:00Z"))
    );
}

#[tokio::test]
async fn test_attempts_count_calls_not_status_changes() {
    let (service, store, _dir) = setup_service(&[]);

    service
        .upsert_status("alice", "bob", "possible", None, None)
        .await
        .unwrap();
    service
        .upsert_status("alice", "bob", "possible", None, None)
        .await
        .unwrap();
    service
        .upsert_status("alice", "bob", "pending", None, None)
        .await
        .unwrap();

    let reverse = store.get(&reverse_key("alice", "bob")).unwrap().unwrap();
    assert_eq!(reverse.get("attempts"), Some(&json!(3)));
    assert_eq!(reverse.get("status"), Some(&json!("pending")));
}

#[tokio::test]
async fn test_processed_status_stamps_processed_at() {
    let (service, _store, _dir) = setup_service(&[]);

    service
        .upsert_status("alice", "bob", "processed", None, None)
        .await
        .unwrap();

    let presence = service.check_exists("alice", "bob").unwrap();
    assert!(presence.processed_at.is_some());

    let (service2, _store2, _dir2) = setup_service(&[]);
    service2
        .upsert_status("alice", "carol", "possible", None, None)
        .await
        .unwrap();
    let other = service2.check_exists("alice", "carol").unwrap();
    assert!(other.processed_at.is_none());
}

#[tokio::test]
async fn test_upsert_rejects_bad_input() {
    let (service, _store, _dir) = setup_service(&[]);

    let bad_owner = service
        .upsert_status("owner/1", "bob", "possible", None, None)
        .await;
    assert!(matches!(bad_owner, Err(EdgeError::Validation { .. })));

    let bad_status = service
        .upsert_status("alice", "bob", "Not A Status", None, None)
        .await;
    assert!(matches!(bad_status, Err(EdgeError::Validation { .. })));

    // Nothing was written
    let presence = service.check_exists("alice", "bob").unwrap();
    assert!(!presence.exists);
}

#[tokio::test]
async fn test_upsert_with_seed_messages() {
    let (service, _store, _dir) = setup_service(&[]);
    let seeds = vec![setu::edge_graph::Message {
        content: "Great meeting you at the conference".to_string(),
        timestamp: Utc::now(),
        direction: Direction::FromSelf,
    }];

    service
        .upsert_status("alice", "bob", "outgoing", None, Some(seeds))
        .await
        .unwrap();

    let messages = service.get_messages("alice", "bob").unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "Great meeting you at the conference");
    assert_eq!(messages[0].direction, Direction::FromSelf);
}

// =============================================================================
// MESSAGE TESTS
// =============================================================================

#[tokio::test]
async fn test_message_roundtrip() {
    let (service, _store, _dir) = setup_service(&[]);
    service
        .upsert_status("alice", "bob", "ally", None, None)
        .await
        .unwrap();

    service
        .add_message("alice", "bob", "lunch next week?", Direction::FromSelf)
        .unwrap();
    service
        .add_message("alice", "bob", "sounds good", Direction::FromOther)
        .unwrap();

    let messages = service.get_messages("alice", "bob").unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "lunch next week?");
    assert_eq!(messages[0].direction, Direction::FromSelf);
    assert_eq!(messages[1].content, "sounds good");
    assert_eq!(messages[1].direction, Direction::FromOther);
}

#[tokio::test]
async fn test_empty_message_rejected() {
    let (service, _store, _dir) = setup_service(&[]);

    let empty = service.add_message("alice", "bob", "", Direction::FromSelf);
    assert!(matches!(empty, Err(EdgeError::Validation { .. })));

    let whitespace = service.add_message("alice", "bob", "   \t\n", Direction::FromSelf);
    assert!(matches!(whitespace, Err(EdgeError::Validation { .. })));
}

#[tokio::test]
async fn test_messages_empty_when_edge_missing() {
    let (service, _store, _dir) = setup_service(&[]);
    let messages = service.get_messages("alice", "nobody").unwrap();
    assert!(messages.is_empty());
}

#[tokio::test]
async fn test_legacy_message_shapes_normalized() {
    let (service, store, _dir) = setup_service(&[]);
    service
        .upsert_status("alice", "bob", "ally", None, None)
        .await
        .unwrap();

    // Simulate records written by older format generations
    store
        .conditional_update(
            &forward_key("alice", "bob"),
            UpdateSpec::new()
                .append("messages", json!("plain legacy note"))
                .append(
                    "messages",
                    json!({ "content": "old structured", "direction": "sent" }),
                )
                .append("messages", json!(12345)),
        )
        .unwrap();

    let messages = service.get_messages("alice", "bob").unwrap();
    assert_eq!(messages.len(), 3);

    assert_eq!(messages[0].content, "plain legacy note");
    assert_eq!(messages[0].direction, Direction::FromSelf);

    assert_eq!(messages[1].content, "old structured");
    assert_eq!(messages[1].direction, Direction::FromSelf);

    // Unknown shape becomes a stringified placeholder, not an error
    assert_eq!(messages[2].content, "12345");
    assert_eq!(messages[2].direction, Direction::FromOther);
}

// =============================================================================
// CONNECTION LISTING TESTS
// =============================================================================

#[tokio::test]
async fn test_connections_all_statuses_from_partition() {
    let (service, _store, _dir) = setup_service(&[]);
    service
        .upsert_status("alice", "bob", "possible", None, None)
        .await
        .unwrap();
    service
        .upsert_status("alice", "carol", "ally", None, None)
        .await
        .unwrap();
    service
        .upsert_status("zed", "bob", "possible", None, None)
        .await
        .unwrap();

    let connections = service.get_connections("alice", None).unwrap();
    assert_eq!(connections.len(), 2);
    let targets: Vec<&str> = connections.iter().map(|c| c.target_id.as_str()).collect();
    assert!(targets.contains(&"bob"));
    assert!(targets.contains(&"carol"));
}

#[tokio::test]
async fn test_connections_status_filter_uses_index() {
    let (service, _store, _dir) = setup_service(&[]);
    service
        .upsert_status("alice", "bob", "possible", None, None)
        .await
        .unwrap();
    service
        .upsert_status("alice", "carol", "ally", None, None)
        .await
        .unwrap();

    let possible = service.get_connections("alice", Some("possible")).unwrap();
    assert_eq!(possible.len(), 1);
    assert_eq!(possible[0].target_id, "bob");
    assert!(possible.iter().all(|c| c.status == "possible"));

    let allies = service.get_connections("alice", Some("ally")).unwrap();
    assert_eq!(allies.len(), 1);
    assert_eq!(allies[0].target_id, "carol");
}

#[tokio::test]
async fn test_status_change_moves_index_entry() {
    let (service, _store, _dir) = setup_service(&[]);
    service
        .upsert_status("alice", "bob", "possible", None, None)
        .await
        .unwrap();
    service
        .upsert_status("alice", "bob", "ally", None, None)
        .await
        .unwrap();

    assert!(service
        .get_connections("alice", Some("possible"))
        .unwrap()
        .is_empty());
    assert_eq!(service.get_connections("alice", Some("ally")).unwrap().len(), 1);
    // The full partition still sees exactly one edge
    assert_eq!(service.get_connections("alice", None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_connection_includes_profile_and_split_name() {
    let (service, store, _dir) = setup_service(&[]);
    put_profile(&store, "bob", &complete_profile("Bob van der Berg"));
    service
        .upsert_status("alice", "bob", "ally", None, None)
        .await
        .unwrap();

    let connections = service.get_connections("alice", None).unwrap();
    assert_eq!(connections.len(), 1);
    let view = &connections[0];
    assert_eq!(view.name, "Bob van der Berg");
    assert_eq!(view.first_name, "Bob");
    assert_eq!(view.last_name, "van der Berg");
    assert_eq!(view.headline.as_deref(), Some("Staff Engineer"));
    assert_eq!(view.company.as_deref(), Some("Initech"));
}

#[tokio::test]
async fn test_missing_profile_tolerated() {
    let (service, _store, _dir) = setup_service(&[]);
    service
        .upsert_status("alice", "stranger", "possible", None, None)
        .await
        .unwrap();

    let connections = service.get_connections("alice", None).unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].name, "");
    assert_eq!(connections[0].first_name, "");
    assert_eq!(connections[0].last_name, "");
    // Likelihood is still computed for "possible" - and a missing profile is LOW
    assert_eq!(
        serde_json::to_value(connections[0].conversion_likelihood).unwrap(),
        json!("LOW")
    );
}

#[tokio::test]
async fn test_likelihood_only_for_possible_status() {
    let (service, store, _dir) = setup_service(&[]);
    put_profile(&store, "bob", &complete_profile("Bob Martinez"));
    put_profile(&store, "carol", &complete_profile("Carol Danvers"));

    service
        .upsert_status("alice", "bob", "possible", None, None)
        .await
        .unwrap();
    service
        .upsert_status("alice", "carol", "ally", None, None)
        .await
        .unwrap();

    let connections = service.get_connections("alice", None).unwrap();
    let bob = connections.iter().find(|c| c.target_id == "bob").unwrap();
    let carol = connections.iter().find(|c| c.target_id == "carol").unwrap();

    // One upsert already counts as one attempt, so a fresh complete profile
    // scores MEDIUM rather than HIGH
    assert_eq!(
        serde_json::to_value(bob.conversion_likelihood).unwrap(),
        json!("MEDIUM")
    );
    assert!(carol.conversion_likelihood.is_none());

    // The field is present-but-null in the serialized view
    let serialized = serde_json::to_value(carol).unwrap();
    assert_eq!(serialized.get("conversion_likelihood"), Some(&json!(null)));
}

// =============================================================================
// INGESTION SIDE-EFFECT TESTS
// =============================================================================

#[tokio::test]
async fn test_ingestion_failure_never_fails_upsert() {
    let (service, _store, _dir) = setup_service(&["ally"]);

    let outcome = service
        .upsert_status("alice", "bob", "ally", None, None)
        .await
        .unwrap();

    // The edge committed even though the ingestion endpoint is unreachable
    assert!(!outcome.ingested);
    assert!(outcome.ingestion_error.is_some());
    assert!(service.check_exists("alice", "bob").unwrap().exists);
}

#[tokio::test]
async fn test_non_trigger_status_skips_ingestion() {
    let (service, _store, _dir) = setup_service(&["ally"]);

    let outcome = service
        .upsert_status("alice", "bob", "possible", None, None)
        .await
        .unwrap();
    assert!(!outcome.ingested);
    assert!(outcome.ingestion_error.is_none());
}

// =============================================================================
// EXISTENCE AND HEALTH TESTS
// =============================================================================

#[tokio::test]
async fn test_check_exists_missing_edge() {
    let (service, _store, _dir) = setup_service(&[]);
    let presence = service.check_exists("alice", "nobody").unwrap();
    assert!(!presence.exists);
    assert!(presence.status.is_none());
    assert!(presence.added_at.is_none());
}

#[tokio::test]
async fn test_health_check() {
    let (service, _store, _dir) = setup_service(&[]);
    let health = service.health_check();
    assert!(health.healthy);
    assert!(health.details.contains("reachable"));
}
