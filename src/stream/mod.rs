//! Readable, seekable byte streams over a file in a live torrent.

pub mod http;
pub mod local;

pub use http::HttpStream;
pub use local::LocalStream;

use crate::engine::StorageError;

/// Errors surfaced to stream readers.
///
/// `Storage` leaves the stream usable: the engine may refetch the piece
/// and a later read can succeed. `Cancelled` is terminal for the handle.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The stream was disposed or the blocking read was cancelled.
    #[error("Stream cancelled")]
    Cancelled,

    /// Seek target past the end of the streamed file.
    #[error("Seek to {position} exceeds stream length {length}")]
    SeekOutOfRange { position: u64, length: u64 },

    /// The engine's disk layer failed.
    #[error("Storage error")]
    Storage(#[from] StorageError),

    /// The HTTP adapter could not bind or serve.
    #[error("HTTP stream error")]
    Http(#[from] std::io::Error),
}
