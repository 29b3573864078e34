//! Tracing setup for applications embedding slipstream.
//!
//! The library itself only emits `tracing` events; binaries call
//! [`init_tracing`] once at startup to get formatted console output.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initializes a console subscriber at `default_level`.
///
/// `RUST_LOG` overrides the default when set, so operators can turn
/// individual targets up or down without a rebuild. Calling this twice
/// returns an error from the underlying subscriber.
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(default_level: Level) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()?;

    tracing::debug!("tracing initialized at {default_level}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_installs_once() {
        assert!(init_tracing(Level::WARN).is_ok());
        // Second install is rejected by the global registry.
        assert!(init_tracing(Level::WARN).is_err());
    }
}
