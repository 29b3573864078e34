//! In-memory engine and torrent session for tests and development.
//!
//! Simulates just enough of a download engine to exercise the streaming
//! core deterministically: pieces are "delivered" by the test driver,
//! verified bytes live in a memory buffer, and wire cancels are recorded
//! instead of sent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use super::{SessionState, StorageError, TorrentHost, TorrentSession};
use crate::picker::{BlockRequest, OutstandingRequest, PiecePicker, PieceSet, SharedStreamingPicker};
use crate::torrent::{InfoHash, PieceIndex, TorrentError, TorrentLayout};

const VERIFIED_CHANNEL_CAPACITY: usize = 256;

/// In-memory torrent host keyed by info hash.
pub struct SimEngine {
    sessions: RwLock<HashMap<InfoHash, Arc<dyn TorrentSession>>>,
}

impl SimEngine {
    /// Creates an empty engine.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl TorrentHost for SimEngine {
    async fn contains(&self, info_hash: InfoHash) -> bool {
        self.sessions.read().await.contains_key(&info_hash)
    }

    async fn register(&self, session: Arc<dyn TorrentSession>) -> Result<(), TorrentError> {
        let info_hash = session.info_hash();
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&info_hash) {
            if Arc::ptr_eq(existing, &session) {
                return Ok(());
            }
            return Err(TorrentError::AlreadyRegistered { info_hash });
        }
        tracing::debug!("registered torrent {info_hash}");
        sessions.insert(info_hash, session);
        Ok(())
    }

    async fn unregister(&self, info_hash: InfoHash) {
        if self.sessions.write().await.remove(&info_hash).is_some() {
            tracing::debug!("unregistered torrent {info_hash}");
        }
    }
}

/// Simulated torrent session backed by an in-memory byte buffer.
///
/// The test driver plays the role of the swarm: [`deliver_piece`] writes
/// verified bytes, flips the Have bit, updates the installed picker, and
/// fires the piece-verified notification, in that order.
///
/// [`deliver_piece`]: SimTorrentSession::deliver_piece
pub struct SimTorrentSession {
    info_hash: InfoHash,
    layout: Arc<TorrentLayout>,
    state: RwLock<SessionState>,
    picker: RwLock<Option<SharedStreamingPicker>>,
    have: RwLock<PieceSet>,
    content: RwLock<Vec<u8>>,
    verified_tx: broadcast::Sender<PieceIndex>,
    wire_cancels: RwLock<Vec<OutstandingRequest>>,
}

impl SimTorrentSession {
    /// Creates an idle session with no verified pieces.
    pub fn new(info_hash: InfoHash, layout: Arc<TorrentLayout>) -> Arc<Self> {
        let (verified_tx, _) = broadcast::channel(VERIFIED_CHANNEL_CAPACITY);
        let piece_count = layout.piece_count();
        let total = layout.total_length() as usize;
        Arc::new(Self {
            info_hash,
            layout,
            state: RwLock::new(SessionState::Idle),
            picker: RwLock::new(None),
            have: RwLock::new(PieceSet::new(piece_count)),
            content: RwLock::new(vec![0u8; total]),
            verified_tx,
            wire_cancels: RwLock::new(Vec::new()),
        })
    }

    /// Simulates a piece arriving from the swarm and passing its hash
    /// check. `data` must match the piece's exact size.
    ///
    /// # Errors
    /// - `TorrentError::InvalidGeometry` - piece index out of range or
    ///   data length mismatch
    pub async fn deliver_piece(&self, piece: PieceIndex, data: &[u8]) -> Result<(), TorrentError> {
        let size = self.layout.piece_size(piece);
        if size == 0 {
            return Err(TorrentError::InvalidGeometry {
                reason: format!("piece {piece} out of range"),
            });
        }
        if data.len() as u64 != size {
            return Err(TorrentError::InvalidGeometry {
                reason: format!("piece {piece} expects {size} bytes, got {}", data.len()),
            });
        }

        // The verified notification fires exactly once per piece.
        if self.have.read().await.contains(piece) {
            return Ok(());
        }

        let offset = piece.as_u32() as u64 * self.layout.piece_length();
        {
            let mut content = self.content.write().await;
            content[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        }
        self.have.write().await.insert(piece);
        if let Some(picker) = self.picker.read().await.as_ref() {
            picker.lock().await.piece_verified(piece);
        }
        // No receivers is fine: nobody is blocked on this piece.
        let _ = self.verified_tx.send(piece);
        tracing::trace!("piece {piece} verified");
        Ok(())
    }

    /// Delivers a piece filled with a repeating byte, sized correctly.
    ///
    /// # Errors
    /// - `TorrentError::InvalidGeometry` - piece index out of range
    pub async fn deliver_piece_filled(
        &self,
        piece: PieceIndex,
        fill: u8,
    ) -> Result<(), TorrentError> {
        let size = self.layout.piece_size(piece);
        self.deliver_piece(piece, &vec![fill; size as usize]).await
    }

    /// Wire cancels recorded so far, oldest first.
    pub async fn recorded_cancels(&self) -> Vec<OutstandingRequest> {
        self.wire_cancels.read().await.clone()
    }
}

#[async_trait]
impl TorrentSession for SimTorrentSession {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn layout(&self) -> Arc<TorrentLayout> {
        self.layout.clone()
    }

    async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn install_picker(&self, picker: SharedStreamingPicker) -> Result<(), TorrentError> {
        let state = *self.state.read().await;
        if state != SessionState::Idle {
            return Err(TorrentError::SessionState {
                state: state.as_str(),
            });
        }
        *self.picker.write().await = Some(picker);
        Ok(())
    }

    async fn start(&self) -> Result<(), TorrentError> {
        let mut state = self.state.write().await;
        if *state != SessionState::Idle {
            return Err(TorrentError::SessionState {
                state: state.as_str(),
            });
        }
        *state = SessionState::Active;
        tracing::debug!("session {} started", self.info_hash);
        Ok(())
    }

    async fn pause(&self) -> Result<(), TorrentError> {
        let mut state = self.state.write().await;
        if *state != SessionState::Active {
            return Err(TorrentError::SessionState {
                state: state.as_str(),
            });
        }
        *state = SessionState::Paused;
        Ok(())
    }

    async fn resume(&self) -> Result<(), TorrentError> {
        let mut state = self.state.write().await;
        if *state != SessionState::Paused {
            return Err(TorrentError::SessionState {
                state: state.as_str(),
            });
        }
        *state = SessionState::Active;
        Ok(())
    }

    async fn stop(&self) -> Result<(), TorrentError> {
        let mut state = self.state.write().await;
        if *state == SessionState::Stopped {
            return Err(TorrentError::SessionState {
                state: state.as_str(),
            });
        }
        *state = SessionState::Stopped;
        tracing::debug!("session {} stopped", self.info_hash);
        Ok(())
    }

    async fn has_piece(&self, piece: PieceIndex) -> bool {
        self.have.read().await.contains(piece)
    }

    fn subscribe_verified(&self) -> broadcast::Receiver<PieceIndex> {
        self.verified_tx.subscribe()
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        let total = self.layout.total_length();
        if offset >= total {
            return Err(StorageError::OutOfBounds { offset, total });
        }
        let len = (buf.len() as u64).min(total - offset) as usize;

        // Refuse to hand out bytes of any unverified piece in the range.
        let have = self.have.read().await;
        let first = self.layout.piece_for_offset(offset);
        let last = self.layout.piece_for_offset(offset + len as u64 - 1);
        for index in first.as_u32()..=last.as_u32() {
            let piece = PieceIndex::new(index);
            if !have.contains(piece) {
                return Err(StorageError::PieceNotVerified { piece });
            }
        }
        drop(have);

        let content = self.content.read().await;
        buf[..len].copy_from_slice(&content[offset as usize..offset as usize + len]);
        Ok(len)
    }

    async fn cancel_requests(&self, requests: Vec<OutstandingRequest>) {
        if requests.is_empty() {
            return;
        }
        tracing::trace!("sending {} wire cancels", requests.len());
        self.wire_cancels.write().await.extend(requests);
    }

    async fn pick_for_peer(
        &self,
        peer: SocketAddr,
        available: &PieceSet,
        count: usize,
    ) -> Vec<BlockRequest> {
        match self.picker.read().await.as_ref() {
            Some(picker) => picker.lock().await.pick_blocks(peer, available, count),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picker::{SequentialPicker, StreamingPicker};

    fn info_hash(seed: u8) -> InfoHash {
        InfoHash::new([seed; 20])
    }

    fn layout() -> Arc<TorrentLayout> {
        TorrentLayout::single_file(32_768, 16_384, "a.bin", 131_072).unwrap()
    }

    fn session(seed: u8) -> Arc<SimTorrentSession> {
        SimTorrentSession::new(info_hash(seed), layout())
    }

    #[tokio::test]
    async fn test_register_conflict_on_same_info_hash() {
        let engine = SimEngine::new();
        let first = session(1);
        let second = session(1);

        engine.register(first.clone()).await.unwrap();
        assert!(engine.contains(info_hash(1)).await);

        let result = engine.register(second).await;
        assert!(matches!(
            result,
            Err(TorrentError::AlreadyRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_is_idempotent_for_same_session() {
        let engine = SimEngine::new();
        let sess = session(2);
        engine.register(sess.clone()).await.unwrap();
        engine.register(sess).await.unwrap();
    }

    #[tokio::test]
    async fn test_unregister_absent_is_noop() {
        let engine = SimEngine::new();
        engine.unregister(info_hash(3)).await;
        assert!(!engine.contains(info_hash(3)).await);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let sess = session(4);
        assert_eq!(sess.state().await, SessionState::Idle);
        assert!(sess.pause().await.is_err());

        sess.start().await.unwrap();
        assert!(sess.start().await.is_err());

        sess.pause().await.unwrap();
        assert!(sess.pause().await.is_err());
        sess.resume().await.unwrap();

        sess.stop().await.unwrap();
        assert!(sess.stop().await.is_err());
        assert!(sess.resume().await.is_err());
    }

    #[tokio::test]
    async fn test_install_picker_only_before_start() {
        let sess = session(5);
        let picker = StreamingPicker::new(
            Box::new(SequentialPicker::new(sess.layout())),
            sess.layout().piece_count(),
        )
        .into_shared();

        sess.install_picker(picker.clone()).await.unwrap();
        sess.start().await.unwrap();
        assert!(sess.install_picker(picker).await.is_err());
    }

    #[tokio::test]
    async fn test_deliver_piece_notifies_and_updates_have() {
        let sess = session(6);
        let mut verified = sess.subscribe_verified();

        assert!(!sess.has_piece(PieceIndex::new(1)).await);
        sess.deliver_piece_filled(PieceIndex::new(1), 0xAB)
            .await
            .unwrap();

        assert!(sess.has_piece(PieceIndex::new(1)).await);
        assert_eq!(verified.recv().await.unwrap(), PieceIndex::new(1));
    }

    #[tokio::test]
    async fn test_deliver_piece_rejects_bad_sizes() {
        let sess = session(7);
        assert!(sess.deliver_piece(PieceIndex::new(0), &[0u8; 3]).await.is_err());
        assert!(
            sess.deliver_piece(PieceIndex::new(99), &[0u8; 32_768])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_read_at_only_serves_verified_bytes() {
        let sess = session(8);
        let mut buf = [0u8; 16];

        let result = sess.read_at(0, &mut buf).await;
        assert!(matches!(
            result,
            Err(StorageError::PieceNotVerified { .. })
        ));

        sess.deliver_piece_filled(PieceIndex::new(0), 0x5A)
            .await
            .unwrap();
        let read = sess.read_at(0, &mut buf).await.unwrap();
        assert_eq!(read, 16);
        assert_eq!(buf, [0x5A; 16]);
    }

    #[tokio::test]
    async fn test_read_at_out_of_bounds() {
        let sess = session(9);
        let mut buf = [0u8; 4];
        assert!(matches!(
            sess.read_at(131_072, &mut buf).await,
            Err(StorageError::OutOfBounds { .. })
        ));
    }

    #[tokio::test]
    async fn test_pick_for_peer_uses_installed_picker() {
        let sess = session(10);
        let layout = sess.layout();
        let picker = StreamingPicker::new(
            Box::new(SequentialPicker::new(layout.clone())),
            layout.piece_count(),
        )
        .into_shared();
        sess.install_picker(picker).await.unwrap();

        let peer = "127.0.0.1:6881".parse().unwrap();
        let requests = sess
            .pick_for_peer(peer, &PieceSet::full(layout.piece_count()), 2)
            .await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].piece, PieceIndex::new(0));
    }
}
