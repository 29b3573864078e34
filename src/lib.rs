//! Slipstream - streaming reads over a downloading torrent
//!
//! This crate is the streaming read core of a BitTorrent client: it lets
//! an application open a readable, seekable byte stream over a file in a
//! torrent while the torrent is still downloading, by biasing piece
//! selection toward the bytes the reader needs next.
//!
//! Three parts cooperate:
//! - [`picker::StreamingPicker`] decorates any base piece picker with a
//!   high-priority window that follows the reader,
//! - [`stream::LocalStream`] blocks reads until the piece under the
//!   position is hash-verified and re-aims the picker on seek,
//! - [`provider::StreamProvider`] owns the lifecycle: picker install,
//!   engine registration, one live stream at a time, terminal stop.
//!
//! The peer wire protocol, tracker communication, hashing, and disk I/O
//! belong to the surrounding engine, reached through the traits in
//! [`engine`].

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]

pub mod config;
pub mod engine;
pub mod picker;
pub mod provider;
pub mod stream;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::SlipstreamConfig;
pub use engine::{SessionState, SimEngine, SimTorrentSession, StorageError, TorrentHost, TorrentSession};
pub use picker::{PiecePicker, SequentialPicker, StreamingPicker};
pub use provider::{ProviderError, StreamProvider};
pub use stream::{HttpStream, LocalStream, StreamError};
pub use torrent::{InfoHash, MagnetLink, PieceIndex, TorrentError, TorrentLayout};
pub use tracing_setup::init_tracing;

/// Core errors that can bubble up from any slipstream subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SlipstreamError {
    /// Torrent model errors (geometry, magnet parsing, registration)
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    /// Stream errors (cancelled reads, bad seeks, storage failures)
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Provider lifecycle errors (illegal transitions, conflicts)
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Standard I/O errors from the HTTP adapter or disk layer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using SlipstreamError as the error type
pub type Result<T> = std::result::Result<T, SlipstreamError>;
