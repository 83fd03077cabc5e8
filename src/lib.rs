//! portal-relay keeps a chat client talking to a remote Portal HTTP service
//! across silent session expiry and Portal ID permission errors.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`portal`] is the resilience layer: response classification, the
//!   authentication state machine, Portal ID selection and the request
//!   executor that ties them together over a pluggable transport.
//! - [`core`] owns configuration and credential resolution.
//! - [`api`] defines the wire payloads exchanged with the Portal.
//! - [`utils`] holds URL construction helpers.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`], which loads configuration, resolves
//! credentials and dispatches into [`portal::ResilientRequestExecutor`].

pub mod api;
pub mod cli;
pub mod core;
pub mod portal;
pub mod utils;
