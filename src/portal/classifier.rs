//! Response classification for Portal replies.
//!
//! The Portal answers an expired session with HTTP 200 and its HTML login
//! page, so the status code alone cannot distinguish success from expiry.
//! Every body-shape heuristic lives here; the login-page markers are
//! configuration data and are the only thing to update when the remote login
//! page changes.

use serde_json::Value;
use std::fmt;

const SNIPPET_LIMIT: usize = 200;

/// Why a response counts as transient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientCause {
    ServerError(u16),
    UnexpectedStatus(u16),
    MalformedBody(String),
    Network(String),
    Timeout,
}

impl fmt::Display for TransientCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientCause::ServerError(status) => write!(f, "server error (HTTP {status})"),
            TransientCause::UnexpectedStatus(status) => write!(f, "unexpected HTTP {status}"),
            TransientCause::MalformedBody(detail) => write!(f, "malformed response: {detail}"),
            TransientCause::Network(detail) => write!(f, "network error: {detail}"),
            TransientCause::Timeout => write!(f, "request timed out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationVerdict {
    Success(Value),
    SessionExpired,
    PermissionDenied { status: u16 },
    NotFound,
    TransientError(TransientCause),
}

impl ClassificationVerdict {
    /// Short label used in log events.
    pub fn label(&self) -> &'static str {
        match self {
            ClassificationVerdict::Success(_) => "success",
            ClassificationVerdict::SessionExpired => "session_expired",
            ClassificationVerdict::PermissionDenied { .. } => "permission_denied",
            ClassificationVerdict::NotFound => "not_found",
            ClassificationVerdict::TransientError(_) => "transient_error",
        }
    }
}

/// Substrings characteristic of the Portal login page.
#[derive(Debug, Clone)]
pub struct LoginPageMarkers {
    markers: Vec<String>,
}

impl LoginPageMarkers {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|marker| marker.as_ref().trim().to_ascii_lowercase())
                .filter(|marker| !marker.is_empty())
                .collect(),
        }
    }

    /// True when `body` is HTML-shaped and contains at least one marker.
    pub fn matches(&self, body: &[u8], content_type: Option<&str>) -> bool {
        if self.markers.is_empty() || !looks_like_html(body, content_type) {
            return false;
        }
        let text = String::from_utf8_lossy(body).to_ascii_lowercase();
        self.markers.iter().any(|marker| text.contains(marker.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    login_markers: LoginPageMarkers,
}

impl ResponseClassifier {
    pub fn new(login_markers: LoginPageMarkers) -> Self {
        Self { login_markers }
    }

    pub fn classify(
        &self,
        status: u16,
        body: &[u8],
        content_type: Option<&str>,
    ) -> ClassificationVerdict {
        match status {
            200..=299 => {
                if self.login_markers.matches(body, content_type) {
                    return ClassificationVerdict::SessionExpired;
                }
                match serde_json::from_slice::<Value>(body) {
                    Ok(value @ Value::Object(_)) => ClassificationVerdict::Success(value),
                    Ok(_) => ClassificationVerdict::TransientError(TransientCause::MalformedBody(
                        "expected a JSON object".to_string(),
                    )),
                    Err(err) => ClassificationVerdict::TransientError(
                        TransientCause::MalformedBody(err.to_string()),
                    ),
                }
            }
            401 | 403 => {
                if self.login_markers.matches(body, content_type) {
                    ClassificationVerdict::SessionExpired
                } else {
                    ClassificationVerdict::PermissionDenied { status }
                }
            }
            404 => ClassificationVerdict::NotFound,
            500..=599 => ClassificationVerdict::TransientError(TransientCause::ServerError(status)),
            _ => ClassificationVerdict::TransientError(TransientCause::UnexpectedStatus(status)),
        }
    }
}

fn looks_like_html(body: &[u8], content_type: Option<&str>) -> bool {
    if let Some(content_type) = content_type {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if media_type == "text/html" || media_type == "application/xhtml+xml" {
            return true;
        }
    }
    body.iter()
        .find(|byte| !byte.is_ascii_whitespace())
        .is_some_and(|byte| *byte == b'<')
}

/// Bounded, lossy rendering of a response body for diagnostics.
pub fn body_snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SNIPPET_LIMIT {
        collapsed
    } else {
        let truncated: String = collapsed.chars().take(SNIPPET_LIMIT).collect();
        format!("{truncated}…")
    }
}
