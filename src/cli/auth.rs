//! Interactive credential setup, removal and status.

use std::env;
use std::error::Error;
use std::io::{self, Write};

use crate::cli::send::PASSWORD_ENV;
use crate::cli::settings::{apply_set, SettingRegistry};
use crate::core::config::Config;
use crate::core::credentials::{CredentialStore, KeyringCredentialStore};

fn prompt(label: &str, current: Option<&str>) -> io::Result<String> {
    match current {
        Some(current) if !current.is_empty() => print!("{label} [{current}]: "),
        _ => print!("{label}: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();
    if input.is_empty() {
        Ok(current.unwrap_or_default().to_string())
    } else {
        Ok(input.to_string())
    }
}

pub fn interactive_auth() -> Result<(), Box<dyn Error>> {
    let registry = SettingRegistry::new();
    let mut config = Config::load()?;

    println!("🔐 Portal Relay Authentication Setup");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    let base_url = prompt("Portal base URL", config.portal.base_url.as_deref())?;
    apply_set(&registry, &mut config, "base-url", &[base_url])?;

    let username = prompt("Username", config.portal.username.as_deref())?;
    apply_set(&registry, &mut config, "username", &[username.clone()])?;

    let current_ids = config.portal.portal_ids.join(", ");
    let ids = prompt(
        "Portal IDs in priority order (comma separated)",
        Some(current_ids.as_str()),
    )?;
    apply_set(&registry, &mut config, "portal-ids", &[ids])?;

    let password = prompt("Password", None)?;
    if password.is_empty() {
        return Err("Password cannot be empty".into());
    }

    config.save()?;
    KeyringCredentialStore::new().store_password(username.trim(), &password)?;

    println!();
    println!("✅ Authentication configured successfully!");
    println!("Check it with: portal-relay login");
    Ok(())
}

pub fn deauth() -> Result<(), Box<dyn Error>> {
    let config = Config::load()?.with_env_overrides();
    let Some(username) = config.portal.username.as_deref().map(str::trim) else {
        println!("No username configured; nothing to remove.");
        return Ok(());
    };

    if KeyringCredentialStore::new().remove_password(username)? {
        println!("✅ Removed stored password for {username}");
    } else {
        println!("No stored password for {username}");
    }
    Ok(())
}

/// Describe where the password would come from, without revealing it.
pub fn password_source(store: &dyn CredentialStore, username: &str, env_set: bool) -> String {
    match store.password(username) {
        Ok(Some(_)) => "stored in system keyring".to_string(),
        Ok(None) if env_set => format!("from {PASSWORD_ENV}"),
        Ok(None) => "missing".to_string(),
        Err(err) if env_set => format!("from {PASSWORD_ENV} ({err})"),
        Err(err) => err.to_string(),
    }
}

pub fn print_status(config: &Config) {
    config.print_all();
    let env_set = env::var(PASSWORD_ENV).is_ok_and(|value| !value.is_empty());
    let source = match config.portal.username.as_deref() {
        Some(username) => password_source(&KeyringCredentialStore::new(), username, env_set),
        None => "(no username configured)".to_string(),
    };
    println!("  password:         {source}");
}
