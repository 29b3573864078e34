//! Collaborator contracts with the surrounding download engine.
//!
//! The streaming core does not download anything itself. It talks to an
//! engine that hosts torrent sessions through the traits here: the
//! provider registers and starts sessions, the picker is installed into
//! one, and the stream reads verified bytes back out. The [`sim`] module
//! provides an in-memory realisation used by the test suite.

pub mod sim;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use sim::{SimEngine, SimTorrentSession};

use crate::picker::{BlockRequest, OutstandingRequest, PieceSet, SharedStreamingPicker};
use crate::torrent::{InfoHash, PieceIndex, TorrentError, TorrentLayout};

/// Lifecycle state of a torrent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but not started; the picker may still be changed.
    Idle,
    /// Downloading, hashing, and seeding.
    Active,
    /// Halted but resumable.
    Paused,
    /// Terminally stopped.
    Stopped,
}

impl SessionState {
    /// Static name used in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures in the engine's disk layer, surfaced to stream readers.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Read at offset {offset} exceeds torrent length {total}")]
    OutOfBounds { offset: u64, total: u64 },

    #[error("Piece {piece} has not been verified")]
    PieceNotVerified { piece: PieceIndex },
}

/// The engine that hosts torrent sessions.
///
/// `register` and `unregister` are idempotent per session: re-registering
/// the same session handle succeeds, registering a different session
/// under the same info hash is a conflict.
#[async_trait]
pub trait TorrentHost: Send + Sync {
    /// Whether a torrent with this info hash is currently registered.
    async fn contains(&self, info_hash: InfoHash) -> bool;

    /// Registers a session with the engine.
    ///
    /// # Errors
    /// - `TorrentError::AlreadyRegistered` - a different session with the
    ///   same info hash is already hosted
    async fn register(&self, session: Arc<dyn TorrentSession>) -> Result<(), TorrentError>;

    /// Removes a session from the engine. Unregistering an absent info
    /// hash is a no-op.
    async fn unregister(&self, info_hash: InfoHash);
}

/// One torrent hosted by the engine.
///
/// All methods that touch picker or bitmap state serialize internally;
/// callers see the ordering guarantees of a single cooperative loop.
#[async_trait]
pub trait TorrentSession: Send + Sync {
    /// Info hash identifying this torrent.
    fn info_hash(&self) -> InfoHash;

    /// Immutable torrent geometry.
    fn layout(&self) -> Arc<TorrentLayout>;

    /// Current lifecycle state.
    async fn state(&self) -> SessionState;

    /// Installs the piece picker driving request generation.
    ///
    /// # Errors
    /// - `TorrentError::SessionState` - the session has already started
    async fn install_picker(&self, picker: SharedStreamingPicker) -> Result<(), TorrentError>;

    /// Starts downloading.
    ///
    /// # Errors
    /// - `TorrentError::SessionState` - not idle
    async fn start(&self) -> Result<(), TorrentError>;

    /// Pauses downloading, hashing, and seeding.
    ///
    /// # Errors
    /// - `TorrentError::SessionState` - not active
    async fn pause(&self) -> Result<(), TorrentError>;

    /// Resumes a paused session.
    ///
    /// # Errors
    /// - `TorrentError::SessionState` - not paused
    async fn resume(&self) -> Result<(), TorrentError>;

    /// Stops the session terminally.
    ///
    /// # Errors
    /// - `TorrentError::SessionState` - already stopped
    async fn stop(&self) -> Result<(), TorrentError>;

    /// Whether a piece has been received and hash-verified.
    async fn has_piece(&self, piece: PieceIndex) -> bool;

    /// Subscribes to piece-verified notifications. Each verified piece
    /// is announced exactly once per session.
    fn subscribe_verified(&self) -> broadcast::Receiver<PieceIndex>;

    /// Reads already-verified bytes from the disk layer.
    ///
    /// # Errors
    /// - `StorageError::OutOfBounds` - offset past the torrent length
    /// - `StorageError::PieceNotVerified` - range touches an unverified piece
    /// - `StorageError::Io` - underlying disk failure
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Forwards picker-cancelled requests to peer connections so wire
    /// `Cancel` messages go out.
    async fn cancel_requests(&self, requests: Vec<OutstandingRequest>);

    /// Generates block requests for a peer offering `available`, through
    /// the installed picker.
    async fn pick_for_peer(
        &self,
        peer: std::net::SocketAddr,
        available: &PieceSet,
        count: usize,
    ) -> Vec<BlockRequest>;
}
