//! Credential lookup for the Portal account.
//!
//! The base URL and username live in the config file; the password lives in
//! the system keyring, with `PORTAL_PASSWORD` as a fallback for headless use.
//! Credentials are resolved once at startup and never change afterwards.

use crate::core::config::Config;
use crate::utils::url::normalize_base_url;
use keyring::Entry;
use std::error::Error;
use std::fmt;

const KEYRING_SERVICE: &str = "portal-relay";
const QUICK_FIXES: &[&str] = &[
    "portal-relay auth                          # Interactive setup",
    "portal-relay set base-url https://...      # Configure the Portal service",
    "export PORTAL_PASSWORD=...                 # Use environment variable",
];

/// Username, password and base URL for the single Portal account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub base_url: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        base_url: impl AsRef<str>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            base_url: normalize_base_url(base_url.as_ref()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Describes failures when attempting to access the system keyring.
///
/// Recoverable errors mean the backend was temporarily unavailable (a locked
/// keychain, no secret service running); the caller may fall back to the
/// environment. Permanent errors are reported as they are.
#[derive(Debug)]
pub enum KeyringAccessError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
}

impl KeyringAccessError {
    fn inner(&self) -> &keyring::Error {
        match self {
            KeyringAccessError::Recoverable(err) | KeyringAccessError::Permanent(err) => err,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, KeyringAccessError::Recoverable(_))
    }
}

impl From<keyring::Error> for KeyringAccessError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                KeyringAccessError::Recoverable(err)
            }
            other => KeyringAccessError::Permanent(other),
        }
    }
}

impl fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "keyring unavailable: {}", self.inner())
    }
}

impl Error for KeyringAccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

/// Read access to stored passwords, keyed by username.
pub trait CredentialStore {
    fn password(&self, username: &str) -> Result<Option<String>, KeyringAccessError>;
}

/// Password store backed by the platform keyring.
#[derive(Debug, Clone, Copy)]
pub struct KeyringCredentialStore {
    use_keyring: bool,
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self { use_keyring: true }
    }

    /// Construct a store, optionally disabling keyring access (useful for tests)
    pub fn new_with_keyring(use_keyring: bool) -> Self {
        Self { use_keyring }
    }

    pub fn store_password(&self, username: &str, password: &str) -> Result<(), KeyringAccessError> {
        if !self.use_keyring {
            return Ok(());
        }
        let entry = Entry::new(KEYRING_SERVICE, username)?;
        entry.set_password(password)?;
        Ok(())
    }

    pub fn remove_password(&self, username: &str) -> Result<bool, KeyringAccessError> {
        if !self.use_keyring {
            return Ok(false);
        }
        let entry = Entry::new(KEYRING_SERVICE, username)?;
        match entry.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn password(&self, username: &str) -> Result<Option<String>, KeyringAccessError> {
        if !self.use_keyring {
            return Ok(None);
        }
        let entry = Entry::new(KEYRING_SERVICE, username)?;
        match entry.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug)]
pub struct CredentialResolutionError {
    message: String,
    source: Option<KeyringAccessError>,
    exit_code: i32,
}

impl CredentialResolutionError {
    pub fn missing_base_url() -> Self {
        Self::new("❌ No Portal base URL configured.", None)
    }

    pub fn missing_username() -> Self {
        Self::new("❌ No Portal username configured.", None)
    }

    pub fn missing_password(username: &str) -> Self {
        Self::new(
            format!(
                "❌ No password stored for '{username}' and PORTAL_PASSWORD environment variable not set."
            ),
            None,
        )
    }

    pub fn keyring(err: KeyringAccessError) -> Self {
        Self::new(format!("❌ Could not read the stored password: {err}"), Some(err))
    }

    fn new(message: impl Into<String>, source: Option<KeyringAccessError>) -> Self {
        Self {
            message: message.into(),
            source,
            exit_code: 2,
        }
    }

    pub fn quick_fixes(&self) -> &'static [&'static str] {
        QUICK_FIXES
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

impl fmt::Display for CredentialResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for CredentialResolutionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|err| err as &(dyn Error + 'static))
    }
}

/// Resolve the account credentials from config, the credential store and an
/// optional environment password.
///
/// The store wins over the environment; a recoverable store failure falls
/// through to the environment value, a permanent one is reported.
pub fn resolve_credentials(
    config: &Config,
    store: &dyn CredentialStore,
    env_password: Option<String>,
) -> Result<Credentials, CredentialResolutionError> {
    let base_url = config
        .portal
        .base_url
        .as_deref()
        .map(normalize_base_url)
        .filter(|url| !url.is_empty())
        .ok_or_else(CredentialResolutionError::missing_base_url)?;
    let username = config
        .portal
        .username
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(CredentialResolutionError::missing_username)?;

    let env_password = env_password.filter(|value| !value.is_empty());
    let password = match store.password(username) {
        Ok(Some(password)) => password,
        Ok(None) => env_password
            .ok_or_else(|| CredentialResolutionError::missing_password(username))?,
        Err(err) if err.is_recoverable() => match env_password {
            Some(password) => password,
            None => return Err(CredentialResolutionError::keyring(err)),
        },
        Err(err) => return Err(CredentialResolutionError::keyring(err)),
    };

    Ok(Credentials::new(username, password, base_url))
}
