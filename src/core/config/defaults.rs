use crate::core::config::data::Config;
use std::time::Duration;

pub const DEFAULT_LOGIN_PATH: &str = "auth/login";
pub const DEFAULT_CHAT_PATH: &str = "portals/{portal_id}/chat";
pub const DEFAULT_TOKEN_POINTER: &str = "/token";
pub const DEFAULT_MAX_TRANSIENT_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_DELAY_MS: u64 = 8_000;
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 15_000;

/// Markers seen on the Portal login page of the reference deployment.
/// Other deployments override them through `portal.login_markers`.
pub const DEFAULT_LOGIN_MARKERS: &[&str] = &[
    "type=\"password\"",
    "name=\"j_password\"",
    "j_security_check",
    "id=\"loginform\"",
    "id=\"login-form\"",
];

impl Config {
    pub fn login_path(&self) -> &str {
        self.portal
            .login_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .unwrap_or(DEFAULT_LOGIN_PATH)
    }

    pub fn chat_path(&self) -> &str {
        self.portal
            .chat_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .unwrap_or(DEFAULT_CHAT_PATH)
    }

    pub fn token_pointer(&self) -> &str {
        self.portal
            .token_pointer
            .as_deref()
            .filter(|pointer| pointer.starts_with('/'))
            .unwrap_or(DEFAULT_TOKEN_POINTER)
    }

    pub fn login_markers(&self) -> Vec<String> {
        match self.portal.login_markers.as_ref() {
            Some(markers) if markers.iter().any(|m| !m.trim().is_empty()) => markers
                .iter()
                .filter(|m| !m.trim().is_empty())
                .cloned()
                .collect(),
            _ => DEFAULT_LOGIN_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
        }
    }

    pub fn max_transient_attempts(&self) -> u32 {
        self.retry
            .max_transient_attempts
            .filter(|attempts| *attempts > 0)
            .unwrap_or(DEFAULT_MAX_TRANSIENT_ATTEMPTS)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.retry.base_delay_ms.unwrap_or(DEFAULT_BASE_DELAY_MS))
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.retry.max_delay_ms.unwrap_or(DEFAULT_MAX_DELAY_MS))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(
            self.retry
                .attempt_timeout_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_ATTEMPT_TIMEOUT_MS),
        )
    }
}
