//! HTTP request tracking middleware for observability

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use std::time::Instant;

/// Middleware to track HTTP request latency and counts
pub async fn track_metrics(req: Request, next: Next) -> Result<Response, StatusCode> {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    // Normalize path to avoid high cardinality (group dynamic IDs)
    let normalized_path = normalize_path(&path);

    crate::metrics::HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &normalized_path, &status])
        .observe(duration);

    crate::metrics::HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &normalized_path, &status])
        .inc();

    Ok(response)
}

/// Normalize path to prevent metric cardinality explosion
/// /v1/members/alice/edges/bob -> /v1/members/{id}/edges/{id}
fn normalize_path(path: &str) -> String {
    let mut normalized = Vec::new();
    let mut previous = "";

    for part in path.split('/') {
        if part.is_empty() {
            continue;
        }

        // Segments after a collection name are identifiers
        if matches!(previous, "members" | "edges" | "profiles" | "documents") {
            normalized.push("{id}");
        } else {
            normalized.push(part);
        }
        previous = part;
    }

    format!("/{}", normalized.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path("/v1/members/alice/edges/bob"),
            "/v1/members/{id}/edges/{id}"
        );
        assert_eq!(
            normalize_path("/v1/members/alice/edges/bob/messages"),
            "/v1/members/{id}/edges/{id}/messages"
        );
        assert_eq!(
            normalize_path("/v1/members/alice/connections"),
            "/v1/members/{id}/connections"
        );
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/v1/profiles/bob"), "/v1/profiles/{id}");
    }
}
