//! Input validation for the relationship API
//! Keeps hostile or malformed identifiers out of the keyspace.

use anyhow::{anyhow, Result};

use crate::constants::{MAX_MEMBER_ID_LENGTH, MAX_MESSAGE_LENGTH, MAX_STATUS_LENGTH};

/// Validate a member identifier (owner or target)
pub fn validate_member_id(member_id: &str) -> Result<()> {
    if member_id.is_empty() {
        return Err(anyhow!("member id cannot be empty"));
    }

    if member_id.len() > MAX_MEMBER_ID_LENGTH {
        return Err(anyhow!(
            "member id too long: {} chars (max: {})",
            member_id.len(),
            MAX_MEMBER_ID_LENGTH
        ));
    }

    // Only allow alphanumeric, dash, underscore, at, dot. Identifiers become
    // key segments, so '#' and '/' must never appear.
    if !member_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '@' || c == '.')
    {
        return Err(anyhow!(
            "member id contains invalid characters (allowed: alphanumeric, -, _, @, .)"
        ));
    }

    Ok(())
}

/// Validate a relationship status label
///
/// Statuses are an open vocabulary, so only the shape is checked.
pub fn validate_status(status: &str) -> Result<()> {
    if status.is_empty() {
        return Err(anyhow!("status cannot be empty"));
    }

    if status.len() > MAX_STATUS_LENGTH {
        return Err(anyhow!(
            "status too long: {} chars (max: {})",
            status.len(),
            MAX_STATUS_LENGTH
        ));
    }

    if !status
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(anyhow!(
            "status must be lowercase alphanumeric with underscores"
        ));
    }

    Ok(())
}

/// Validate message content size (emptiness is the service's concern because
/// it maps to a distinct error field)
pub fn validate_message_length(content: &str) -> Result<()> {
    if content.len() > MAX_MESSAGE_LENGTH {
        return Err(anyhow!(
            "message too long: {} bytes (max: {})",
            content.len(),
            MAX_MESSAGE_LENGTH
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_member_ids() {
        assert!(validate_member_id("alice").is_ok());
        assert!(validate_member_id("member-123").is_ok());
        assert!(validate_member_id("prospect_42").is_ok());
        assert!(validate_member_id("someone@example.com").is_ok());
    }

    #[test]
    fn test_invalid_member_ids() {
        assert!(validate_member_id("").is_err()); // empty
        assert!(validate_member_id("owner/1").is_err()); // key separator
        assert!(validate_member_id("OWNER#x").is_err()); // key prefix char
        assert!(validate_member_id(&"a".repeat(200)).is_err()); // too long
    }

    #[test]
    fn test_valid_statuses() {
        assert!(validate_status("possible").is_ok());
        assert!(validate_status("pending").is_ok());
        assert!(validate_status("ally").is_ok());
        assert!(validate_status("follow_up_2").is_ok());
    }

    #[test]
    fn test_invalid_statuses() {
        assert!(validate_status("").is_err());
        assert!(validate_status("Possible").is_err()); // uppercase
        assert!(validate_status("in progress").is_err()); // whitespace
        assert!(validate_status(&"s".repeat(100)).is_err()); // too long
    }

    #[test]
    fn test_message_length() {
        assert!(validate_message_length("hi there").is_ok());
        assert!(validate_message_length(&"x".repeat(20_000)).is_err());
    }
}
