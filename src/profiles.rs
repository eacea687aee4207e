//! Profile metadata lookup
//!
//! Profiles are produced by an upstream parsing pipeline and consumed
//! read-only by the connection listing and classifier paths. A missing or
//! malformed profile is never fatal.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::store::{ItemKey, RelationStore, UpdateSpec};

/// Structured profile attributes for one member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

/// Store-backed profile catalog.
#[derive(Clone)]
pub struct ProfileCatalog {
    store: Arc<RelationStore>,
}

impl ProfileCatalog {
    pub fn new(store: Arc<RelationStore>) -> Self {
        Self { store }
    }

    fn key(profile_id: &str) -> ItemKey {
        ItemKey::new(format!("PROFILE#{profile_id}"), "META")
    }

    /// Fetch a profile. Missing, unreadable or unreachable all resolve to
    /// `None`; read paths degrade to empty fields instead of failing.
    pub fn get(&self, profile_id: &str) -> Option<ProfileMetadata> {
        match self.store.get(&Self::key(profile_id)) {
            Ok(Some(item)) => match serde_json::from_value(Value::Object(item)) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    tracing::warn!(profile_id, "unreadable profile record: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(profile_id, "profile lookup failed: {}", e);
                None
            }
        }
    }

    /// Write a profile. This is the ingest side used by the parsing
    /// pipeline and by tests.
    pub fn put(&self, profile_id: &str, profile: &ProfileMetadata) -> Result<()> {
        let value = serde_json::to_value(profile).context("failed to encode profile")?;
        let Value::Object(attrs) = value else {
            unreachable!("ProfileMetadata always encodes as an object");
        };

        let mut spec = UpdateSpec::new();
        for (attr, value) in attrs {
            spec = spec.set(&attr, value);
        }
        self.store
            .conditional_update(&Self::key(profile_id), spec)
            .with_context(|| format!("failed to store profile {profile_id}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn catalog() -> (ProfileCatalog, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(RelationStore::open(temp_dir.path()).expect("Failed to open store"));
        (ProfileCatalog::new(store), temp_dir)
    }

    #[test]
    fn test_roundtrip() {
        let (catalog, _dir) = catalog();
        let profile = ProfileMetadata {
            name: "Bob Martinez".to_string(),
            headline: Some("Staff Engineer".to_string()),
            summary: Some("Distributed systems".to_string()),
            company: Some("Initech".to_string()),
            skills: vec!["rust".to_string(), "rocksdb".to_string()],
        };

        catalog.put("bob", &profile).unwrap();
        assert_eq!(catalog.get("bob"), Some(profile));
    }

    #[test]
    fn test_missing_profile_is_none() {
        let (catalog, _dir) = catalog();
        assert_eq!(catalog.get("nobody"), None);
    }
}
