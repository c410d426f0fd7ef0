//! Failure classification for API responses
//!
//! Maps an HTTP status plus response body onto a `FetchError`. Rate limiting
//! is recognised both by status (429, and the legacy 420) and by error code
//! 88 in the body, which some endpoints return with other statuses. A
//! "Not authorized." message on 401/403 means the *target* is private, not
//! that the credential is bad.

use crate::{FetchError, RateLimit};

/// Body error codes that mean the credential's window is spent.
const RATE_LIMIT_CODES: &[i64] = &[88, 420, 429];

/// Messages that mean the requested target cannot be read by anyone.
const TARGET_UNAVAILABLE_PATTERNS: &[&str] = &["not authorized.", "user has been suspended"];

/// Classify a non-success response.
///
/// `rate_limit` carries whatever the response headers reported, so a
/// `RateLimited` result can tell the quota tracker when the window resets.
pub fn classify_status(status: u16, body: &str, rate_limit: Option<&RateLimit>) -> FetchError {
    let reset_after = rate_limit.and_then(|rl| rl.reset_after);

    if matches!(status, 420 | 429) || body_has_rate_limit_code(body) {
        return FetchError::RateLimited { reset_after };
    }

    let summary = summarize(status, body);
    match status {
        401 | 403 => {
            let lower = body.to_lowercase();
            if TARGET_UNAVAILABLE_PATTERNS.iter().any(|p| lower.contains(p)) {
                FetchError::TargetUnavailable(summary)
            } else {
                FetchError::Unauthorized(summary)
            }
        }
        400 | 404 | 410 | 422 => FetchError::Malformed(summary),
        _ => FetchError::Transient(summary),
    }
}

/// Look for `{"errors":[{"code":88,...}]}` style payloads.
fn body_has_rate_limit_code(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };
    value["errors"]
        .as_array()
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e["code"].as_i64())
                .any(|code| RATE_LIMIT_CODES.contains(&code))
        })
        .unwrap_or(false)
}

fn summarize(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("status {status}")
    } else {
        let snippet: String = body.chars().take(200).collect();
        format!("status {status}: {snippet}")
    }
}
