//! Centralized configuration for slipstream.
//!
//! All tunable parameters are defined here to avoid hard-coded values
//! scattered throughout the codebase.

use std::net::SocketAddr;

/// Central configuration for all slipstream components.
#[derive(Debug, Clone, Default)]
pub struct SlipstreamConfig {
    /// Priority window over the streamed file.
    pub window: WindowConfig,
    /// HTTP stream adapter settings.
    pub http: HttpConfig,
}

/// Priority window sizing.
///
/// The window starts at the piece under the reader: `high_priority_pieces`
/// urgent pieces, then `look_ahead_pieces` prefetch pieces, clamped to
/// the streamed file's last piece.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Urgent pieces starting at the reader's position.
    pub high_priority_pieces: u32,
    /// Prefetch pieces after the urgent window.
    pub look_ahead_pieces: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            high_priority_pieces: 5,
            look_ahead_pieces: 15,
        }
    }
}

/// HTTP stream adapter settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Address the adapter binds; port 0 picks an ephemeral port.
    pub bind_address: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:0".parse().expect("valid literal address"),
        }
    }
}
