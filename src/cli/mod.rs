//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod auth;
pub mod send;
pub mod settings;

use std::error::Error;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::core::config::data::parse_portal_ids;
use crate::core::config::Config;

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "PORTAL_RELAY_LOG";

#[derive(Parser)]
#[command(name = "portal-relay")]
#[command(about = "Send chat messages to a Portal service with automatic session recovery")]
#[command(
    long_about = "portal-relay forwards chat messages to a Portal HTTP service. Expired sessions \
are renewed transparently and the message is replayed once; when a Portal ID is rejected, \
the next configured candidate is tried and the first one that works is remembered.\n\n\
Authentication:\n\
  Use 'portal-relay auth' to store the base URL, username and Portal IDs in the config file\n\
  and the password in your system keyring.\n\n\
Environment Variables:\n\
  PORTAL_BASE_URL   Overrides the configured base URL\n\
  PORTAL_USERNAME   Overrides the configured username\n\
  PORTAL_PASSWORD   Password fallback when nothing is stored in the keyring\n\
  PORTAL_RELAY_LOG  Log filter written to stderr (default: warn)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Portal IDs to try for this invocation, in priority order (comma separated)
    #[arg(long, global = true, value_name = "IDS")]
    pub portal_ids: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one message and print the reply
    Send {
        /// Message text (multiple words are joined with spaces)
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        message: Vec<String>,
    },
    /// Log in to check the configured credentials
    Login,
    /// Set up the Portal account interactively
    Auth,
    /// Remove the stored password
    Deauth,
    /// Show configuration and credential status
    Status,
    /// Set configuration values, or list them when no key is given
    Set {
        /// Configuration key to set
        key: Option<String>,
        /// Value to set for the key (can be multiple words)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset configuration values
    Unset {
        /// Configuration key to unset
        key: String,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Config for commands that talk to the Portal: file values, environment
/// overrides, then the `--portal-ids` flag.
fn effective_config(portal_ids: Option<&str>) -> Result<Config, Box<dyn Error>> {
    let mut config = Config::load()?.with_env_overrides();
    if let Some(raw) = portal_ids {
        config.portal.portal_ids = parse_portal_ids(raw);
    }
    Ok(config)
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Send { message } => {
            let config = effective_config(args.portal_ids.as_deref())?;
            send::run_send(&config, &message.join(" ")).await
        }
        Commands::Login => {
            let config = effective_config(args.portal_ids.as_deref())?;
            send::run_login(&config).await
        }
        Commands::Auth => {
            if let Err(e) = auth::interactive_auth() {
                eprintln!("❌ Authentication failed: {e}");
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Deauth => {
            if let Err(e) = auth::deauth() {
                eprintln!("❌ Deauthentication failed: {e}");
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Status => {
            let config = effective_config(args.portal_ids.as_deref())?;
            auth::print_status(&config);
            Ok(())
        }
        Commands::Set { key, value } => {
            if let Err(err) = settings::run_set(key.as_deref(), &value) {
                err.print();
                std::process::exit(err.exit_code());
            }
            Ok(())
        }
        Commands::Unset { key } => {
            if let Err(err) = settings::run_unset(&key) {
                err.print();
                std::process::exit(err.exit_code());
            }
            Ok(())
        }
    }
}
