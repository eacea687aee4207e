//! Configuration management for Setu
//!
//! All configurable parameters in one place with environment variable
//! overrides. Follows the principle: sensible defaults, configurable in
//! production.

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::constants;

/// Circuit breaker tuning for a downstream dependency
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long an open circuit waits before allowing a probe
    pub recovery_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: constants::BREAKER_FAILURE_THRESHOLD,
            recovery_timeout: Duration::from_secs(constants::BREAKER_RECOVERY_TIMEOUT_SECS),
        }
    }
}

/// Downstream ingestion service configuration
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Base URL of the ingestion/search service
    pub base_url: String,
    /// Static API key sent on every request
    pub api_key: String,
    /// Maximum upload attempts per document
    pub max_retries: u32,
    /// Base delay between upload attempts; doubles per retry
    pub retry_base_delay: Duration,
    /// Per-attempt HTTP timeout
    pub attempt_timeout: Duration,
    /// Interval between document-status polls
    pub poll_interval: Duration,
    /// Overall deadline for waiting on indexing
    pub index_wait: Duration,
    /// Breaker guarding the remote calls
    pub breaker: BreakerSettings,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8900".to_string(),
            api_key: String::new(),
            max_retries: constants::INGESTION_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(constants::INGESTION_RETRY_BASE_MS),
            attempt_timeout: Duration::from_secs(constants::INGESTION_ATTEMPT_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(constants::INGESTION_POLL_INTERVAL_MS),
            index_wait: Duration::from_secs(constants::INGESTION_INDEX_WAIT_SECS),
            breaker: BreakerSettings::default(),
        }
    }
}

impl IngestionConfig {
    /// Load from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("SETU_INGESTION_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(key) = env::var("SETU_INGESTION_API_KEY") {
            config.api_key = key;
        }
        if let Some(n) = env_parse("SETU_INGESTION_MAX_RETRIES") {
            config.max_retries = n;
        }
        if let Some(ms) = env_parse("SETU_INGESTION_RETRY_BASE_MS") {
            config.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse("SETU_INGESTION_TIMEOUT_SECS") {
            config.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse("SETU_INGESTION_POLL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse("SETU_INGESTION_INDEX_WAIT_SECS") {
            config.index_wait = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse("SETU_BREAKER_FAILURES") {
            config.breaker.failure_threshold = n;
        }
        if let Some(secs) = env_parse("SETU_BREAKER_RECOVERY_SECS") {
            config.breaker.recovery_timeout = Duration::from_secs(secs);
        }

        config
    }
}

/// Server configuration loaded from environment with defaults
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// RocksDB data directory
    pub data_dir: PathBuf,
    /// Statuses that trigger downstream ingestion after a committed upsert
    pub ingest_statuses: HashSet<String>,
    /// Cap on in-flight HTTP requests
    pub max_concurrent_requests: usize,
    /// Downstream ingestion service
    pub ingestion: IngestionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: constants::DEFAULT_HOST.to_string(),
            port: constants::DEFAULT_PORT,
            data_dir: PathBuf::from("./setu_data"),
            ingest_statuses: ["ally", "processed"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            max_concurrent_requests: constants::DEFAULT_MAX_CONCURRENT_REQUESTS,
            ingestion: IngestionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = env::var("SETU_HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse("SETU_PORT") {
            config.port = port;
        }
        if let Ok(dir) = env::var("SETU_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(statuses) = env::var("SETU_INGEST_STATUSES") {
            config.ingest_statuses = statuses
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(n) = env_parse("SETU_MAX_CONCURRENT") {
            config.max_concurrent_requests = n;
        }
        config.ingestion = IngestionConfig::from_env();

        config
    }

    /// Log the effective configuration at startup
    pub fn log_config(&self) {
        info!("Setu configuration:");
        info!("  bind: {}:{}", self.host, self.port);
        info!("  data dir: {}", self.data_dir.display());
        info!("  ingest statuses: {:?}", self.ingest_statuses);
        info!("  max concurrent requests: {}", self.max_concurrent_requests);
        info!("  ingestion url: {}", self.ingestion.base_url);
        info!(
            "  ingestion retries: {} (base delay {:?})",
            self.ingestion.max_retries, self.ingestion.retry_base_delay
        );
        info!(
            "  breaker: {} failures, {:?} recovery",
            self.ingestion.breaker.failure_threshold, self.ingestion.breaker.recovery_timeout
        );
        if self.ingestion.api_key.is_empty() {
            tracing::warn!("SETU_INGESTION_API_KEY not set; downstream calls will be unauthenticated");
        }
    }
}

/// Parse an env var, ignoring it when missing or malformed
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
