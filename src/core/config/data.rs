use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the login request carries the username and password.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoginScheme {
    /// `{"username": .., "password": ..}` JSON body
    #[default]
    Json,
    /// `application/x-www-form-urlencoded` body
    Form,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    /// Root of the Portal service, e.g. `https://portal.example.com/api`
    pub base_url: Option<String>,
    pub username: Option<String>,
    /// Login endpoint, relative to `base_url`
    pub login_path: Option<String>,
    /// Chat endpoint template, relative to `base_url`; `{portal_id}` is replaced
    /// by the selected candidate
    pub chat_path: Option<String>,
    /// Candidate Portal IDs in priority order
    #[serde(default)]
    pub portal_ids: Vec<String>,
    #[serde(default)]
    pub login_scheme: LoginScheme,
    /// JSON pointer to the session token inside the login response
    pub token_pointer: Option<String>,
    /// Send the token as this cookie instead of an `Authorization` header
    pub session_cookie: Option<String>,
    /// Substrings that identify the Portal login page (case-insensitive)
    pub login_markers: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_transient_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub attempt_timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

/// Parse a user-supplied candidate list such as `"P1, P2 P3"`.
///
/// Blank entries and duplicates are dropped; the first occurrence keeps its
/// position so priority order is preserved.
pub fn parse_portal_ids(raw: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    ids
}
