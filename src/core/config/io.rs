use crate::core::config::data::{path_display, Config};
use directories::ProjectDirs;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Errors that can occur when loading configuration from disk.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as valid TOML.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// No platform configuration directory could be determined.
    NoConfigDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(
                    f,
                    "Failed to read config at {}: {}",
                    path_display(path),
                    source
                )
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "Failed to parse config at {}: {}",
                    path_display(path),
                    source
                )
            }
            ConfigError::NoConfigDir => write!(f, "Failed to determine config directory"),
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::NoConfigDir => None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Config, Box<dyn StdError>> {
        let path = Self::get_config_path()?;
        Self::load_from_path(&path)
    }

    pub fn save(&self) -> Result<(), Box<dyn StdError>> {
        let path = Self::get_config_path()?;
        self.save_to_path(&path)
    }

    pub fn load_from_path(config_path: &Path) -> Result<Config, Box<dyn StdError>> {
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<(), Box<dyn StdError>> {
        let parent = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());

        if let Some(dir) = parent {
            fs::create_dir_all(dir)?;
        }

        let contents = toml::to_string_pretty(self)?;
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };

        temp_file.write_all(contents.as_bytes())?;
        temp_file.as_file_mut().sync_all()?;
        temp_file
            .persist(config_path)
            .map_err(|err| -> Box<dyn StdError> { Box::new(err) })?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        let proj_dirs =
            ProjectDirs::from("org", "portal-relay", "portal-relay").ok_or(ConfigError::NoConfigDir)?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Apply `PORTAL_BASE_URL` / `PORTAL_USERNAME` on top of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(
            std::env::var("PORTAL_BASE_URL").ok(),
            std::env::var("PORTAL_USERNAME").ok(),
        );
        self
    }

    pub(crate) fn apply_overrides(&mut self, base_url: Option<String>, username: Option<String>) {
        if let Some(base_url) = base_url.filter(|value| !value.trim().is_empty()) {
            self.portal.base_url = Some(base_url);
        }
        if let Some(username) = username.filter(|value| !value.trim().is_empty()) {
            self.portal.username = Some(username);
        }
    }

    pub fn print_all(&self) {
        let or_unset = |value: Option<&str>| value.unwrap_or("(unset)").to_string();
        println!("portal-relay configuration");
        match Self::get_config_path() {
            Ok(path) => println!("  file:             {}", path_display(path)),
            Err(err) => println!("  file:             ({err})"),
        }
        println!("  base-url:         {}", or_unset(self.portal.base_url.as_deref()));
        println!("  username:         {}", or_unset(self.portal.username.as_deref()));
        println!("  login-path:       {}", self.login_path());
        println!("  chat-path:        {}", self.chat_path());
        if self.portal.portal_ids.is_empty() {
            println!("  portal-ids:       (unset)");
        } else {
            println!("  portal-ids:       {}", self.portal.portal_ids.join(", "));
        }
        println!(
            "  transient retry:  {} attempts, {}ms base delay, {}ms timeout",
            self.max_transient_attempts(),
            self.base_delay().as_millis(),
            self.attempt_timeout().as_millis()
        );
    }
}
