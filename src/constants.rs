//! Documented constants for the edge graph service
//!
//! All tunable parameters in one place. Runtime overrides live in
//! `config.rs`; the values here are the defaults.

// =============================================================================
// CLASSIFIER CONSTANTS
// =============================================================================

/// Recency window for conversion-likelihood scoring, in days.
///
/// An edge counts as "recent" only while strictly less than this many days
/// old. Exactly 7 elapsed days is already outside the window.
pub const RECENCY_WINDOW_DAYS: i64 = 7;

/// Attempt count above which a prospect is scored LOW regardless of profile
/// completeness. Three or more recorded attempts without a conversion means
/// the edge is stale.
pub const MAX_PROMISING_ATTEMPTS: i64 = 2;

// =============================================================================
// CIRCUIT BREAKER DEFAULTS
// =============================================================================

/// Consecutive failures before the circuit opens.
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Seconds an open circuit waits before allowing a probe request.
pub const BREAKER_RECOVERY_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// INGESTION CLIENT DEFAULTS
// =============================================================================

/// Maximum upload attempts per document (first try included).
pub const INGESTION_MAX_RETRIES: u32 = 3;

/// Base delay between upload attempts in milliseconds; doubles per retry.
pub const INGESTION_RETRY_BASE_MS: u64 = 500;

/// Per-attempt HTTP timeout for ingestion calls, in seconds.
pub const INGESTION_ATTEMPT_TIMEOUT_SECS: u64 = 30;

/// Interval between document-status polls, in milliseconds.
pub const INGESTION_POLL_INTERVAL_MS: u64 = 2_000;

/// Overall deadline for waiting on indexing, in seconds. Hitting the
/// deadline yields a `pending` result, not a failure.
pub const INGESTION_INDEX_WAIT_SECS: u64 = 60;

// =============================================================================
// INPUT LIMITS
// =============================================================================

/// Maximum length for member identifiers.
pub const MAX_MEMBER_ID_LENGTH: usize = 128;

/// Maximum length for a status label.
pub const MAX_STATUS_LENGTH: usize = 32;

/// Maximum length for a single edge message, in bytes.
pub const MAX_MESSAGE_LENGTH: usize = 10_000;

/// Maximum seed messages accepted on a single upsert.
pub const MAX_SEED_MESSAGES: usize = 20;

// =============================================================================
// SERVER DEFAULTS
// =============================================================================

/// Default bind host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8600;

/// Default cap on in-flight HTTP requests.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 256;
