//! Maps upstream failures to the categories that drive retry decisions.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::HttpError;

const MAX_DETAIL_CHARS: usize = 200;
const STREAM_401_MARKERS: &[&str] = &["addon", "subscription", "stream", "plan"];
const ENTITLEMENT_403_MARKERS: &[&str] = &["addon", "subscription", "plan"];

/// Semantic failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Credential missing, wrong or expired.
    Auth,
    /// Credential valid but the plan lacks the streaming entitlement.
    Addon,
    Network,
    Unknown,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Addon => "addon",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }

    /// Whether an automatic retry may help. `Unknown` is treated as `Network`.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Unknown)
    }
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified upstream failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    status_code: Option<u16>,
    message: String,
    is_addon_error: bool,
    category: ErrorCategory,
}

impl ClassifiedError {
    fn new(status_code: Option<u16>, category: ErrorCategory, message: String) -> Self {
        Self {
            status_code,
            message,
            is_addon_error: category == ErrorCategory::Addon,
            category,
        }
    }

    pub const fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn is_addon_error(&self) -> bool {
        self.is_addon_error
    }

    pub const fn category(&self) -> ErrorCategory {
        self.category
    }

    pub const fn code(&self) -> &'static str {
        match self.category {
            ErrorCategory::Auth => "upstream.auth",
            ErrorCategory::Addon => "upstream.addon",
            ErrorCategory::Network => "upstream.network",
            ErrorCategory::Unknown => "upstream.unknown",
        }
    }
}

impl Display for ClassifiedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ClassifiedError {}

/// Classify a non-success response. The first matching rule wins.
pub fn classify(status: u16, body: &str, url: &str) -> ClassifiedError {
    let streaming = is_streaming_endpoint(url);
    let lowered = body.to_ascii_lowercase();
    let mentions = |markers: &[&str]| markers.iter().any(|marker| lowered.contains(marker));
    let detail = detail_suffix(body);

    let (category, message) = match status {
        401 if streaming && mentions(STREAM_401_MARKERS) => (
            ErrorCategory::Addon,
            format!("streaming is not included in the current plan (HTTP 401){detail}"),
        ),
        401 => (
            ErrorCategory::Auth,
            format!("authentication failed, check the API token (HTTP 401){detail}"),
        ),
        403 if streaming || mentions(ENTITLEMENT_403_MARKERS) => (
            ErrorCategory::Addon,
            format!("access requires an addon subscription (HTTP 403){detail}"),
        ),
        403 => (
            ErrorCategory::Auth,
            format!("access denied for the current credentials (HTTP 403){detail}"),
        ),
        429 => (
            ErrorCategory::Network,
            format!("rate limited by upstream (HTTP 429){detail}"),
        ),
        500.. => (
            ErrorCategory::Network,
            format!("upstream server error (HTTP {status}){detail}"),
        ),
        400..=499 => (
            ErrorCategory::Network,
            format!("request rejected by upstream (HTTP {status}){detail}"),
        ),
        _ => (
            ErrorCategory::Unknown,
            format!("unexpected upstream response (HTTP {status}){detail}"),
        ),
    };

    ClassifiedError::new(Some(status), category, message)
}

/// Classify a failure that produced no response at all.
pub fn classify_transport(error: &HttpError) -> ClassifiedError {
    ClassifiedError::new(
        None,
        ErrorCategory::Network,
        format!("network error: {}", error.message()),
    )
}

/// A URL targets the streaming endpoint when its path contains `/stream`.
pub fn is_streaming_endpoint(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    path.contains("/stream")
}

fn detail_suffix(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let detail: String = trimmed.chars().take(MAX_DETAIL_CHARS).collect();
    format!(": {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM_URL: &str = "https://api.example.test/api/v1/tokens/stream?id=abc";

    #[test]
    fn stream_401_with_plan_wording_is_addon() {
        let error = classify(401, "No addon access for stream plan", STREAM_URL);
        assert_eq!(error.category(), ErrorCategory::Addon);
        assert!(error.is_addon_error());
        assert_eq!(error.status_code(), Some(401));
    }

    #[test]
    fn plain_401_is_auth() {
        let error = classify(401, "bad token", "/api/v1/symbol_info");
        assert_eq!(error.category(), ErrorCategory::Auth);
        assert!(!error.is_addon_error());
        assert!(!error.category().is_retryable());
    }

    #[test]
    fn stream_401_without_plan_wording_is_auth() {
        let error = classify(401, "token expired", STREAM_URL);
        assert_eq!(error.category(), ErrorCategory::Auth);
    }

    #[test]
    fn forbidden_on_stream_is_addon_regardless_of_body() {
        assert_eq!(classify(403, "", STREAM_URL).category(), ErrorCategory::Addon);
    }

    #[test]
    fn forbidden_with_subscription_wording_is_addon_off_stream() {
        let error = classify(403, "Upgrade your SUBSCRIPTION", "/api/v1/tokens/abc");
        assert_eq!(error.category(), ErrorCategory::Addon);
        assert_eq!(
            classify(403, "ip blocked", "/api/v1/tokens/abc").category(),
            ErrorCategory::Auth
        );
    }

    #[test]
    fn throttling_server_and_client_errors_are_network() {
        for status in [429, 500, 503, 400, 404] {
            let error = classify(status, "", "/api/v1/symbols");
            assert_eq!(error.category(), ErrorCategory::Network, "status {status}");
            assert!(error.category().is_retryable());
        }
    }

    #[test]
    fn non_error_statuses_are_unknown_but_retryable() {
        let error = classify(302, "", "/api/v1/symbols");
        assert_eq!(error.category(), ErrorCategory::Unknown);
        assert!(error.category().is_retryable());
    }

    #[test]
    fn query_string_does_not_make_a_streaming_endpoint() {
        assert!(!is_streaming_endpoint("/api/v1/tokens?next=/stream"));
        assert!(is_streaming_endpoint(STREAM_URL));
    }

    #[test]
    fn transport_failures_are_network_without_status() {
        let error = classify_transport(&HttpError::new("connection reset"));
        assert_eq!(error.category(), ErrorCategory::Network);
        assert_eq!(error.status_code(), None);
        assert!(error.message().contains("connection reset"));
    }

    #[test]
    fn long_bodies_are_truncated_in_messages() {
        let body = "x".repeat(1_000);
        let error = classify(500, &body, "/api/v1/symbols");
        assert!(error.message().len() < 300);
    }
}
