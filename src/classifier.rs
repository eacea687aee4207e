//! Conversion-likelihood classification
//!
//! A pure rule chain scoring how likely a prospective connection is to
//! convert, from profile completeness, edge recency and attempt count.
//! The rules are ordered; the first match wins.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::constants::{MAX_PROMISING_ATTEMPTS, RECENCY_WINDOW_DAYS};
use crate::profiles::ProfileMetadata;

/// Three-tier conversion likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConversionLikelihood {
    High,
    Medium,
    Low,
}

/// Signals taken from the relationship edge pair.
#[derive(Debug, Clone, Default)]
pub struct EdgeActivity {
    /// RFC 3339 timestamp of when the edge was first created.
    pub added_at: Option<String>,
    /// Upsert attempts recorded on the reverse edge.
    pub attempts: i64,
}

/// Classify a prospect. A missing edge is treated as zero attempts with
/// unknown recency.
pub fn classify(
    profile: Option<&ProfileMetadata>,
    activity: Option<&EdgeActivity>,
) -> ConversionLikelihood {
    classify_at(profile, activity, Utc::now())
}

/// Classification against an explicit clock; `classify` is the `Utc::now()`
/// shorthand.
pub fn classify_at(
    profile: Option<&ProfileMetadata>,
    activity: Option<&EdgeActivity>,
    now: DateTime<Utc>,
) -> ConversionLikelihood {
    let Some(profile) = profile else {
        return ConversionLikelihood::Low;
    };

    let fallback = EdgeActivity::default();
    let activity = activity.unwrap_or(&fallback);

    if !filled(profile.headline.as_deref()) || !filled(profile.summary.as_deref()) {
        return ConversionLikelihood::Low;
    }

    if activity.attempts > MAX_PROMISING_ATTEMPTS {
        return ConversionLikelihood::Low;
    }

    if activity.attempts == 0 && is_recent(activity.added_at.as_deref(), now) {
        return ConversionLikelihood::High;
    }

    ConversionLikelihood::Medium
}

fn filled(field: Option<&str>) -> bool {
    field.map(|s| !s.trim().is_empty()).unwrap_or(false)
}

/// Strict recency: exactly `RECENCY_WINDOW_DAYS` elapsed is NOT recent.
/// Unparsable or missing dates are not recent either; this never raises.
fn is_recent(added_at: Option<&str>, now: DateTime<Utc>) -> bool {
    let Some(raw) = added_at else {
        return false;
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => {
            let elapsed = now.signed_duration_since(parsed.with_timezone(&Utc));
            elapsed < Duration::days(RECENCY_WINDOW_DAYS)
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_profile() -> ProfileMetadata {
        ProfileMetadata {
            name: "Ada Lovelace".to_string(),
            headline: Some("Analytical Engine Programmer".to_string()),
            summary: Some("First programmer".to_string()),
            company: None,
            skills: Vec::new(),
        }
    }

    fn activity(added_days_ago: i64, attempts: i64, now: DateTime<Utc>) -> EdgeActivity {
        EdgeActivity {
            added_at: Some((now - Duration::days(added_days_ago)).to_rfc3339()),
            attempts,
        }
    }

    #[test]
    fn test_missing_profile_is_low() {
        assert_eq!(classify(None, None), ConversionLikelihood::Low);
    }

    #[test]
    fn test_incomplete_profile_is_low() {
        let now = Utc::now();
        let mut profile = complete_profile();
        profile.summary = None;
        assert_eq!(
            classify_at(Some(&profile), Some(&activity(0, 0, now)), now),
            ConversionLikelihood::Low
        );

        let mut blank = complete_profile();
        blank.headline = Some("   ".to_string());
        assert_eq!(
            classify_at(Some(&blank), Some(&activity(0, 0, now)), now),
            ConversionLikelihood::Low
        );
    }

    #[test]
    fn test_fresh_untouched_edge_is_high() {
        let now = Utc::now();
        let profile = complete_profile();
        assert_eq!(
            classify_at(Some(&profile), Some(&activity(0, 0, now)), now),
            ConversionLikelihood::High
        );
    }

    #[test]
    fn test_missing_edge_is_medium() {
        // No edge means zero attempts but unknown recency
        assert_eq!(
            classify(Some(&complete_profile()), None),
            ConversionLikelihood::Medium
        );
    }

    #[test]
    fn test_stale_edge_is_medium() {
        let now = Utc::now();
        assert_eq!(
            classify_at(Some(&complete_profile()), Some(&activity(10, 0, now)), now),
            ConversionLikelihood::Medium
        );
    }

    #[test]
    fn test_too_many_attempts_is_low() {
        let now = Utc::now();
        assert_eq!(
            classify_at(Some(&complete_profile()), Some(&activity(0, 3, now)), now),
            ConversionLikelihood::Low
        );
    }

    #[test]
    fn test_some_attempts_is_medium() {
        let now = Utc::now();
        assert_eq!(
            classify_at(Some(&complete_profile()), Some(&activity(0, 1, now)), now),
            ConversionLikelihood::Medium
        );
    }

    #[test]
    fn test_exactly_seven_days_is_not_recent() {
        // The boundary is strict: 7 days elapsed to the second is MEDIUM
        let now = Utc::now();
        assert_eq!(
            classify_at(Some(&complete_profile()), Some(&activity(7, 0, now)), now),
            ConversionLikelihood::Medium
        );
        // One second inside the window is still HIGH
        let just_inside = EdgeActivity {
            added_at: Some(
                (now - Duration::days(7) + Duration::seconds(1)).to_rfc3339(),
            ),
            attempts: 0,
        };
        assert_eq!(
            classify_at(Some(&complete_profile()), Some(&just_inside), now),
            ConversionLikelihood::High
        );
    }

    #[test]
    fn test_zulu_suffix_parses() {
        let now = Utc::now();
        let zulu = EdgeActivity {
            added_at: Some(now.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            attempts: 0,
        };
        assert_eq!(
            classify_at(Some(&complete_profile()), Some(&zulu), now),
            ConversionLikelihood::High
        );
    }

    #[test]
    fn test_unparsable_date_is_not_recent() {
        let now = Utc::now();
        let garbage = EdgeActivity {
            added_at: Some("last tuesday".to_string()),
            attempts: 0,
        };
        assert_eq!(
            classify_at(Some(&complete_profile()), Some(&garbage), now),
            ConversionLikelihood::Medium
        );
    }
}
