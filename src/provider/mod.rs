//! Stream provider lifecycle over an engine-hosted torrent.
//!
//! The provider owns a torrent session's streaming lifetime: it installs
//! the streaming picker before start, registers the session with the
//! engine, serializes one live stream at a time, and tears everything
//! down on stop. Stop is terminal; a fresh provider is required to
//! stream the torrent again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::SlipstreamConfig;
use crate::engine::{SessionState, TorrentHost, TorrentSession};
use crate::picker::{PiecePicker, SequentialPicker, SharedStreamingPicker, StreamingPicker};
use crate::stream::{HttpStream, LocalStream, StreamError};
use crate::torrent::{InfoHash, TorrentError};

/// Errors from provider lifecycle operations.
///
/// `InvalidState`, `InvalidArgument`, and `Conflict` are caller bugs and
/// are never recovered internally; the provider's state is left exactly
/// as it was.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The operation's precondition does not hold in the current state.
    #[error("Cannot {operation} while provider is {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State that rejected it.
        state: &'static str,
    },

    /// A malformed argument, such as a file outside this torrent.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: String,
    },

    /// The engine already hosts this torrent under another owner.
    #[error("Engine already hosts torrent {info_hash}")]
    Conflict {
        /// Info hash that collided.
        info_hash: InfoHash,
    },

    /// A session or engine operation failed.
    #[error("Torrent error")]
    Torrent(#[from] TorrentError),

    /// Creating or serving a stream failed.
    #[error("Stream error")]
    Stream(#[from] StreamError),
}

/// Provider lifecycle phase. Paused is a flag within Active, not a
/// phase: resume returns to Active, never Inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Inactive,
    Active,
    Stopped,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Inactive => "inactive",
            Phase::Active => "active",
            Phase::Stopped => "stopped",
        }
    }
}

/// Non-owning view of the live stream, for slot enforcement and for
/// disposing the stream on stop without holding the handle itself.
struct StreamSlot {
    disposed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl StreamSlot {
    fn is_live(&self) -> bool {
        !self.disposed.load(Ordering::Acquire)
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
        }
    }
}

struct ProviderInner {
    phase: Phase,
    paused: bool,
    stream_slot: Option<StreamSlot>,
}

/// Lifecycle owner for streaming one torrent.
///
/// At most one provider per info hash may be registered with the engine,
/// and at most one undisposed stream exists per provider. All state
/// transitions serialize on an internal lock, so the ordering a caller
/// observes (picker installed before start, window aimed before
/// `create_stream` returns) holds under concurrency.
pub struct StreamProvider {
    engine: Arc<dyn TorrentHost>,
    session: Arc<dyn TorrentSession>,
    config: SlipstreamConfig,
    picker: SharedStreamingPicker,
    inner: Mutex<ProviderInner>,
    active: AtomicBool,
    paused: AtomicBool,
}

impl StreamProvider {
    /// Creates a provider over `session`, wrapping the default in-order
    /// base picker.
    pub fn new(
        engine: Arc<dyn TorrentHost>,
        session: Arc<dyn TorrentSession>,
        config: SlipstreamConfig,
    ) -> Self {
        let base = SequentialPicker::new(session.layout());
        Self::with_base_picker(engine, session, config, Box::new(base))
    }

    /// Creates a provider whose streaming picker decorates a caller
    /// supplied base picker.
    pub fn with_base_picker(
        engine: Arc<dyn TorrentHost>,
        session: Arc<dyn TorrentSession>,
        config: SlipstreamConfig,
        base: Box<dyn PiecePicker>,
    ) -> Self {
        let piece_count = session.layout().piece_count();
        let picker = StreamingPicker::new(base, piece_count).into_shared();
        Self {
            engine,
            session,
            config,
            picker,
            inner: Mutex::new(ProviderInner {
                phase: Phase::Inactive,
                paused: false,
                stream_slot: None,
            }),
            active: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    /// Whether the provider has started and not stopped.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether the provider is paused. Implies active.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Read-only handle to the underlying session, for event
    /// subscription and progress queries. Lifecycle methods must go
    /// through the provider, never through this handle.
    pub fn session(&self) -> Arc<dyn TorrentSession> {
        self.session.clone()
    }

    /// Installs the streaming picker, registers with the engine, and
    /// starts the torrent.
    ///
    /// # Errors
    /// - `ProviderError::InvalidState` - already active or stopped
    /// - `ProviderError::Conflict` - engine already hosts this info hash
    /// - `ProviderError::Torrent` - session refused to start
    pub async fn start(&self) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock().await;
        if inner.phase != Phase::Inactive {
            return Err(ProviderError::InvalidState {
                operation: "start",
                state: inner.phase.as_str(),
            });
        }

        let info_hash = self.session.info_hash();
        if self.engine.contains(info_hash).await {
            return Err(ProviderError::Conflict { info_hash });
        }

        // Picker goes in before the torrent starts requesting.
        self.session.install_picker(self.picker.clone()).await?;
        self.engine
            .register(self.session.clone())
            .await
            .map_err(|e| match e {
                TorrentError::AlreadyRegistered { info_hash } => {
                    ProviderError::Conflict { info_hash }
                }
                other => ProviderError::Torrent(other),
            })?;
        self.session.start().await?;

        inner.phase = Phase::Active;
        self.active.store(true, Ordering::Release);
        tracing::info!("provider started for torrent {info_hash}");
        Ok(())
    }

    /// Pauses the torrent: downloading, hashing, and seeding halt.
    ///
    /// # Errors
    /// - `ProviderError::InvalidState` - not active, or already paused
    pub async fn pause(&self) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock().await;
        if inner.phase != Phase::Active {
            return Err(ProviderError::InvalidState {
                operation: "pause",
                state: inner.phase.as_str(),
            });
        }
        if inner.paused {
            return Err(ProviderError::InvalidState {
                operation: "pause",
                state: "paused",
            });
        }

        self.session.pause().await?;
        inner.paused = true;
        self.paused.store(true, Ordering::Release);
        tracing::debug!("provider paused");
        Ok(())
    }

    /// Resumes a paused torrent, returning to Active.
    ///
    /// # Errors
    /// - `ProviderError::InvalidState` - not paused
    pub async fn resume(&self) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock().await;
        if inner.phase != Phase::Active || !inner.paused {
            return Err(ProviderError::InvalidState {
                operation: "resume",
                state: if inner.phase == Phase::Active {
                    "active"
                } else {
                    inner.phase.as_str()
                },
            });
        }

        self.session.resume().await?;
        inner.paused = false;
        self.paused.store(false, Ordering::Release);
        tracing::debug!("provider resumed");
        Ok(())
    }

    /// Stops the torrent, disposes the live stream, and unregisters from
    /// the engine. Terminal: the provider never becomes active again.
    ///
    /// # Errors
    /// - `ProviderError::InvalidState` - not active, or the torrent was
    ///   already stopped behind the provider's back
    pub async fn stop(&self) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock().await;
        if inner.phase != Phase::Active {
            return Err(ProviderError::InvalidState {
                operation: "stop",
                state: inner.phase.as_str(),
            });
        }
        if self.session.state().await == SessionState::Stopped {
            return Err(ProviderError::InvalidState {
                operation: "stop",
                state: "stopped externally",
            });
        }

        self.session.stop().await?;
        self.engine.unregister(self.session.info_hash()).await;
        if let Some(slot) = inner.stream_slot.take() {
            slot.dispose();
        }

        inner.phase = Phase::Stopped;
        inner.paused = false;
        self.active.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        tracing::info!("provider stopped for torrent {}", self.session.info_hash());
        Ok(())
    }

    /// Opens a stream over file `file_index` positioned at byte 0.
    ///
    /// The picker window is aimed at the file's first piece before this
    /// returns, so requests generated afterwards already favour the
    /// stream head.
    ///
    /// # Errors
    /// - `ProviderError::InvalidState` - not active, or a previous
    ///   stream has not been disposed
    /// - `ProviderError::InvalidArgument` - file is not part of this
    ///   torrent
    pub async fn create_stream(&self, file_index: usize) -> Result<LocalStream, ProviderError> {
        let mut inner = self.inner.lock().await;
        if inner.phase != Phase::Active {
            return Err(ProviderError::InvalidState {
                operation: "create_stream",
                state: inner.phase.as_str(),
            });
        }
        if let Some(slot) = &inner.stream_slot
            && slot.is_live()
        {
            return Err(ProviderError::InvalidState {
                operation: "create_stream",
                state: "streaming",
            });
        }

        let layout = self.session.layout();
        let file = layout
            .file(file_index)
            .map_err(|e| ProviderError::InvalidArgument {
                reason: e.to_string(),
            })?
            .clone();

        let cancelled = self.picker.lock().await.begin_stream(
            &layout,
            &file,
            self.config.window.high_priority_pieces,
            self.config.window.look_ahead_pieces,
        );
        if !cancelled.is_empty() {
            self.session.cancel_requests(cancelled).await;
        }

        let disposed = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        inner.stream_slot = Some(StreamSlot {
            disposed: disposed.clone(),
            cancel: cancel.clone(),
        });
        tracing::debug!("stream opened over file {}", file.path);

        Ok(LocalStream::new(
            self.session.clone(),
            self.picker.clone(),
            file,
            disposed,
            cancel,
        ))
    }

    /// Opens a stream over file `file_index` and re-exposes it over HTTP
    /// for media players. The returned handle carries the URL.
    ///
    /// # Errors
    /// Same as [`create_stream`], plus `ProviderError::Stream` if the
    /// HTTP listener cannot bind.
    ///
    /// [`create_stream`]: StreamProvider::create_stream
    pub async fn create_http_stream(&self, file_index: usize) -> Result<HttpStream, ProviderError> {
        let stream = self.create_stream(file_index).await?;
        let http = HttpStream::serve(stream, self.config.http.bind_address).await?;
        Ok(http)
    }
}
