//! One-shot `send` and `login` commands.

use std::env;
use std::error::Error;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::config::Config;
use crate::core::credentials::{resolve_credentials, Credentials, KeyringCredentialStore};
use crate::portal::{
    AuthError, ExecutorError, ExecutorErrorKind, ReqwestTransport, ResilientRequestExecutor,
};

pub const PASSWORD_ENV: &str = "PORTAL_PASSWORD";

/// Process exit code for a failed send; distinct per failure kind.
pub fn exit_code(kind: ExecutorErrorKind) -> i32 {
    match kind {
        ExecutorErrorKind::AuthFailed => 3,
        ExecutorErrorKind::PersistentAuthFailure => 4,
        ExecutorErrorKind::NoUsablePortalId => 5,
        ExecutorErrorKind::EndpointMisconfigured => 6,
        ExecutorErrorKind::Unavailable => 7,
        ExecutorErrorKind::Cancelled => 130,
    }
}

fn resolve_or_exit(config: &Config) -> Credentials {
    let store = KeyringCredentialStore::new();
    match resolve_credentials(config, &store, env::var(PASSWORD_ENV).ok()) {
        Ok(credentials) => credentials,
        Err(err) => {
            eprintln!("{err}");
            let fixes = err.quick_fixes();
            if !fixes.is_empty() {
                eprintln!();
                eprintln!("💡 Quick fixes:");
                for fix in fixes {
                    eprintln!("  • {fix}");
                }
            }
            std::process::exit(err.exit_code());
        }
    }
}

fn build_executor(config: &Config) -> Result<ResilientRequestExecutor, Box<dyn Error>> {
    let credentials = resolve_or_exit(config);
    let transport = Arc::new(ReqwestTransport::default());
    ResilientRequestExecutor::from_config(config, credentials, transport).map_err(|err| -> Box<dyn Error> {
        format!("{err}. Configure candidates with: portal-relay set portal-ids P1 P2").into()
    })
}

fn report_failure(err: &ExecutorError) {
    eprintln!("❌ {err}");
    if let Some(snippet) = &err.body_snippet {
        eprintln!("   Last response: {snippet}");
    }
    eprintln!();
    eprintln!("💡 {}", err.guidance());
}

pub async fn run_send(config: &Config, message: &str) -> Result<(), Box<dyn Error>> {
    if message.trim().is_empty() {
        eprintln!("Usage: portal-relay send <message>");
        std::process::exit(1);
    }

    let executor = build_executor(config)?;
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match executor.send_with_cancel(message, &cancel).await {
        Ok(reply) => {
            debug!(
                portal_id = %reply.portal_id,
                attempts = reply.attempts,
                conversation_id = ?reply.conversation_id,
                "Reply received"
            );
            println!("{}", reply.text);
            Ok(())
        }
        Err(err) => {
            report_failure(&err);
            std::process::exit(exit_code(err.kind));
        }
    }
}

/// Log in without sending anything, to check the stored credentials.
pub async fn run_login(config: &Config) -> Result<(), Box<dyn Error>> {
    let executor = build_executor(config)?;
    match executor.session().ensure_valid().await {
        Ok(session) => {
            println!(
                "✅ Logged in to {} (session established {})",
                config.portal.base_url.as_deref().unwrap_or_default(),
                session.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("❌ {err}");
            let code = match err {
                AuthError::InvalidCredentials => {
                    eprintln!("💡 Re-enter your credentials with: portal-relay auth");
                    exit_code(ExecutorErrorKind::AuthFailed)
                }
                AuthError::LoginEndpointMisconfigured => {
                    eprintln!("💡 Check base-url and login-path: portal-relay set");
                    exit_code(ExecutorErrorKind::EndpointMisconfigured)
                }
                AuthError::NetworkFailure(_) => exit_code(ExecutorErrorKind::Unavailable),
            };
            std::process::exit(code);
        }
    }
}
