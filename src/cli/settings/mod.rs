//! Settings management for CLI set/unset commands.
//!
//! Each configuration key has a handler; text keys (`base-url`, `username`,
//! `login-path`, `chat-path`) share one data-driven implementation, while
//! `portal-ids` parses an ordered list.

pub mod error;
pub mod handlers;
pub mod registry;

pub use error::SettingError;
pub use registry::SettingRegistry;

use crate::core::config::data::Config;

/// Trait for handling a configuration setting.
///
/// Handlers only edit the in-memory config; loading and saving is done by
/// the caller.
pub trait SettingHandler: Send + Sync {
    /// Returns the configuration key this handler manages.
    fn key(&self) -> &'static str;

    /// Set the configuration value from the arguments following the key.
    ///
    /// Returns a success message to display.
    fn set(&self, args: &[String], config: &mut Config) -> Result<String, SettingError>;

    /// Unset (clear) the configuration value.
    fn unset(&self, config: &mut Config) -> Result<String, SettingError>;

    /// Format the current value for display in `portal-relay set` output.
    fn format(&self, config: &Config) -> String;
}

/// Apply `set <key> <args..>` to `config`.
pub fn apply_set(
    registry: &SettingRegistry,
    config: &mut Config,
    key: &str,
    args: &[String],
) -> Result<String, SettingError> {
    let handler = registry
        .get(key)
        .ok_or_else(|| SettingError::UnknownKey(key.to_string()))?;
    handler.set(args, config)
}

/// Apply `unset <key>` to `config`.
pub fn apply_unset(
    registry: &SettingRegistry,
    config: &mut Config,
    key: &str,
) -> Result<String, SettingError> {
    let handler = registry
        .get(key)
        .ok_or_else(|| SettingError::UnknownKey(key.to_string()))?;
    handler.unset(config)
}

/// Render every setting in display order.
pub fn format_all(registry: &SettingRegistry, config: &Config) -> Vec<String> {
    registry
        .keys_display_order()
        .iter()
        .filter_map(|key| registry.get(key))
        .map(|handler| handler.format(config))
        .collect()
}

fn load_config() -> Result<Config, SettingError> {
    Config::load().map_err(|err| SettingError::ConfigError(err.to_string()))
}

fn save_config(config: &Config) -> Result<(), SettingError> {
    config
        .save()
        .map_err(|err| SettingError::ConfigError(err.to_string()))
}

/// `portal-relay set`: without arguments, list the current values.
pub fn run_set(key: Option<&str>, args: &[String]) -> Result<(), SettingError> {
    let registry = SettingRegistry::new();
    let mut config = load_config()?;

    let Some(key) = key else {
        println!("Available settings:");
        for line in format_all(&registry, &config) {
            println!("{line}");
        }
        return Ok(());
    };

    let message = apply_set(&registry, &mut config, key, args)?;
    save_config(&config)?;
    println!("{message}");
    Ok(())
}

pub fn run_unset(key: &str) -> Result<(), SettingError> {
    let registry = SettingRegistry::new();
    let mut config = load_config()?;
    let message = apply_unset(&registry, &mut config, key)?;
    save_config(&config)?;
    println!("{message}");
    Ok(())
}
