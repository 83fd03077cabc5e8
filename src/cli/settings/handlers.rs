//! Handlers for the individual configuration keys.

use crate::cli::settings::error::SettingError;
use crate::cli::settings::SettingHandler;
use crate::core::config::data::{parse_portal_ids, Config};
use crate::core::config::defaults::{DEFAULT_CHAT_PATH, DEFAULT_LOGIN_PATH};
use crate::utils::url::normalize_base_url;

/// Data-driven handler for settings holding a single text value.
pub struct TextHandler {
    key: &'static str,
    hint: &'static str,
    example: &'static str,
    default_display: Option<&'static str>,
    get: fn(&Config) -> Option<&str>,
    set_field: fn(&mut Config, Option<String>),
    validate: fn(&str) -> Result<String, String>,
}

impl SettingHandler for TextHandler {
    fn key(&self) -> &'static str {
        self.key
    }

    fn set(&self, args: &[String], config: &mut Config) -> Result<String, SettingError> {
        let input = args.join(" ");
        if input.trim().is_empty() {
            return Err(SettingError::MissingArgs {
                hint: self.hint,
                example: self.example,
            });
        }

        let value = (self.validate)(input.trim()).map_err(|reason| SettingError::InvalidValue {
            key: self.key,
            reason,
        })?;
        let message = format!("✅ Set {} to: {value}", self.key);
        (self.set_field)(config, Some(value));
        Ok(message)
    }

    fn unset(&self, config: &mut Config) -> Result<String, SettingError> {
        (self.set_field)(config, None);
        Ok(match self.default_display {
            Some(default) => format!("✅ Unset {} (will use default: {default})", self.key),
            None => format!("✅ Unset {}", self.key),
        })
    }

    fn format(&self, config: &Config) -> String {
        match ((self.get)(config), self.default_display) {
            (Some(value), _) => format!("  {}: {value}", self.key),
            (None, Some(default)) => format!("  {}: (unset, default: {default})", self.key),
            (None, None) => format!("  {}: (unset)", self.key),
        }
    }
}

fn validate_base_url(input: &str) -> Result<String, String> {
    let parsed = url::Url::parse(input).map_err(|err| err.to_string())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", parsed.scheme()));
    }
    Ok(normalize_base_url(input))
}

fn validate_username(input: &str) -> Result<String, String> {
    Ok(input.to_string())
}

fn validate_path(input: &str) -> Result<String, String> {
    if input.contains("://") {
        return Err("expected a path relative to base-url, not a full URL".to_string());
    }
    Ok(input.trim_start_matches('/').to_string())
}

/// Create a handler for the `base-url` setting.
pub fn base_url_handler() -> TextHandler {
    TextHandler {
        key: "base-url",
        hint: "To set the Portal service URL, provide it:",
        example: "portal-relay set base-url https://portal.example.com/api",
        default_display: None,
        get: |c| c.portal.base_url.as_deref(),
        set_field: |c, v| c.portal.base_url = v,
        validate: validate_base_url,
    }
}

/// Create a handler for the `username` setting.
pub fn username_handler() -> TextHandler {
    TextHandler {
        key: "username",
        hint: "To set the Portal username, provide it:",
        example: "portal-relay set username alice",
        default_display: None,
        get: |c| c.portal.username.as_deref(),
        set_field: |c, v| c.portal.username = v,
        validate: validate_username,
    }
}

/// Create a handler for the `login-path` setting.
pub fn login_path_handler() -> TextHandler {
    TextHandler {
        key: "login-path",
        hint: "To set the login endpoint, provide a path relative to base-url:",
        example: "portal-relay set login-path auth/login",
        default_display: Some(DEFAULT_LOGIN_PATH),
        get: |c| c.portal.login_path.as_deref(),
        set_field: |c, v| c.portal.login_path = v,
        validate: validate_path,
    }
}

/// Create a handler for the `chat-path` setting.
pub fn chat_path_handler() -> TextHandler {
    TextHandler {
        key: "chat-path",
        hint: "To set the chat endpoint, provide a path relative to base-url ({portal_id} is replaced):",
        example: "portal-relay set chat-path portals/{portal_id}/chat",
        default_display: Some(DEFAULT_CHAT_PATH),
        get: |c| c.portal.chat_path.as_deref(),
        set_field: |c, v| c.portal.chat_path = v,
        validate: validate_path,
    }
}

/// Handler for the `portal-ids` setting: an ordered candidate list.
pub struct PortalIdsHandler;

impl SettingHandler for PortalIdsHandler {
    fn key(&self) -> &'static str {
        "portal-ids"
    }

    fn set(&self, args: &[String], config: &mut Config) -> Result<String, SettingError> {
        let ids = parse_portal_ids(&args.join(" "));
        if ids.is_empty() {
            return Err(SettingError::MissingArgs {
                hint: "To set the Portal IDs, list them in priority order:",
                example: "portal-relay set portal-ids P1 P2 P3",
            });
        }

        let message = format!("✅ Set portal-ids to: {}", ids.join(", "));
        config.portal.portal_ids = ids;
        Ok(message)
    }

    fn unset(&self, config: &mut Config) -> Result<String, SettingError> {
        config.portal.portal_ids.clear();
        Ok("✅ Unset portal-ids".to_string())
    }

    fn format(&self, config: &Config) -> String {
        if config.portal.portal_ids.is_empty() {
            "  portal-ids: (unset)".to_string()
        } else {
            format!("  portal-ids: {}", config.portal.portal_ids.join(", "))
        }
    }
}
