pub mod data;
pub mod defaults;
pub mod io;

pub use data::{Config, LoginScheme, PortalConfig, RetryConfig};

#[cfg(test)]
pub mod tests;
