//! Streaming decorator over a base piece picker.
//!
//! Intercepts request generation and steers it into the priority window
//! of the file being streamed. All per-block request state stays in the
//! base picker; the decorator holds only the window and a mirror of the
//! verified-piece set for masking.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::window::PieceWindow;
use super::{BlockRequest, OutstandingRequest, PiecePicker, PieceSet};
use crate::torrent::{FileEntry, PieceIndex, TorrentLayout};

/// Shared handle to a streaming picker.
///
/// The torrent session owns one clone and drives request generation with
/// it; the local stream holds another for re-aiming on seek. The picker
/// has no pointer back to either, so no ownership cycle forms.
pub type SharedStreamingPicker = Arc<Mutex<StreamingPicker>>;

/// Decorates a base picker with a high-priority window.
///
/// Until a stream opens, every call forwards to the base picker
/// unchanged. While a stream is open, request generation tries the
/// urgent band first (lowest index first), then the prefetch band, and
/// only then falls through unrestricted so a satisfied or unavailable
/// window never stalls normal download progress.
pub struct StreamingPicker {
    base: Box<dyn PiecePicker>,
    window: Option<PieceWindow>,
    have: PieceSet,
    piece_count: u32,
}

impl StreamingPicker {
    /// Wraps a base picker for a torrent with `piece_count` pieces.
    pub fn new(base: Box<dyn PiecePicker>, piece_count: u32) -> Self {
        Self {
            base,
            window: None,
            have: PieceSet::new(piece_count),
            piece_count,
        }
    }

    /// Wraps the picker in the shared handle used by sessions and streams.
    pub fn into_shared(self) -> SharedStreamingPicker {
        Arc::new(Mutex::new(self))
    }

    /// Opens the window over `file` with the head at its first piece.
    ///
    /// Outstanding requests outside the new urgent band are cancelled and
    /// returned so the session can notify peers.
    pub fn begin_stream(
        &mut self,
        layout: &TorrentLayout,
        file: &FileEntry,
        high_priority: u32,
        look_ahead: u32,
    ) -> Vec<OutstandingRequest> {
        let window = PieceWindow::new(layout, file, high_priority, look_ahead);
        let (first, last) = window.file_range();
        tracing::debug!("stream window opened: pieces {first}..={last}");
        self.window = Some(window);
        self.cancel_outside_urgent()
    }

    /// Re-aims the window at `byte_offset` within the streamed file.
    ///
    /// Requests for pieces that now lie outside the urgent band are
    /// cancelled and returned for wire-level cancellation. Seeking to an
    /// offset in the current head piece is a no-op.
    pub fn seek_to(&mut self, byte_offset: u64) -> Vec<OutstandingRequest> {
        let Some(window) = self.window.as_mut() else {
            return Vec::new();
        };
        let old_head = window.head_piece();
        window.seek_to(byte_offset);
        if window.head_piece() == old_head {
            return Vec::new();
        }
        tracing::debug!(
            "picker re-aimed: head {} -> {}",
            old_head,
            window.head_piece()
        );
        self.cancel_outside_urgent()
    }

    /// Advances the window head as sequential reads make progress.
    ///
    /// Forward-only and never cancels: pieces already requested ahead of
    /// the reader stay in flight.
    pub fn advance_to(&mut self, byte_offset: u64) {
        if let Some(window) = self.window.as_mut() {
            let head = window.head_piece();
            window.seek_to(byte_offset);
            if window.head_piece() < head {
                window.seek_to_head(head);
            }
        }
    }

    /// Piece under the reader, if a stream is open.
    pub fn head_piece(&self) -> Option<PieceIndex> {
        self.window.as_ref().map(PieceWindow::head_piece)
    }

    fn cancel_outside_urgent(&mut self) -> Vec<OutstandingRequest> {
        let Some(window) = self.window.as_ref() else {
            return Vec::new();
        };
        let mut cancelled = Vec::new();
        for entry in self.base.outstanding_requests() {
            if !window.is_urgent(entry.block.piece)
                && self.base.cancel_request(entry.peer, &entry.block)
            {
                cancelled.push(entry);
            }
        }
        if !cancelled.is_empty() {
            tracing::debug!("cancelled {} out-of-window requests", cancelled.len());
        }
        cancelled
    }

    /// Asks the base picker for blocks of a single piece.
    fn pick_single(
        &mut self,
        peer: SocketAddr,
        piece: PieceIndex,
        count: usize,
        out: &mut Vec<BlockRequest>,
    ) {
        let mut mask = PieceSet::new(self.piece_count);
        mask.insert(piece);
        out.extend(self.base.pick_blocks(peer, &mask, count - out.len()));
    }
}

impl PiecePicker for StreamingPicker {
    fn pick_blocks(
        &mut self,
        peer: SocketAddr,
        available: &PieceSet,
        count: usize,
    ) -> Vec<BlockRequest> {
        if self.window.is_none() {
            return self.base.pick_blocks(peer, available, count);
        }

        // Urgent band, head first.
        let urgent: Vec<PieceIndex> = self
            .window
            .as_ref()
            .unwrap()
            .urgent_pieces()
            .filter(|p| available.contains(*p) && !self.have.contains(*p))
            .collect();
        let mut out = Vec::new();
        for piece in urgent {
            if out.len() >= count {
                break;
            }
            self.pick_single(peer, piece, count, &mut out);
        }
        if !out.is_empty() {
            return out;
        }

        // Prefetch band.
        let prefetch: Vec<PieceIndex> = self
            .window
            .as_ref()
            .unwrap()
            .prefetch_pieces()
            .filter(|p| available.contains(*p) && !self.have.contains(*p))
            .collect();
        for piece in prefetch {
            if out.len() >= count {
                break;
            }
            self.pick_single(peer, piece, count, &mut out);
        }
        if !out.is_empty() {
            return out;
        }

        // The window is satisfied or unavailable from this peer; never
        // stall normal progress.
        self.base.pick_blocks(peer, available, count)
    }

    fn continue_existing(
        &mut self,
        peer: SocketAddr,
        available: &PieceSet,
        count: usize,
    ) -> Vec<BlockRequest> {
        self.base.continue_existing(peer, available, count)
    }

    fn is_interesting(&self, available: &PieceSet) -> bool {
        self.base.is_interesting(available)
    }

    fn is_block_requested(&self, block: &BlockRequest) -> bool {
        self.base.is_block_requested(block)
    }

    fn cancel_request(&mut self, peer: SocketAddr, block: &BlockRequest) -> bool {
        self.base.cancel_request(peer, block)
    }

    fn received_block(&mut self, peer: SocketAddr, block: &BlockRequest) {
        self.base.received_block(peer, block);
    }

    fn piece_verified(&mut self, piece: PieceIndex) {
        self.have.insert(piece);
        self.base.piece_verified(piece);
    }

    fn outstanding_requests(&self) -> Vec<OutstandingRequest> {
        self.base.outstanding_requests()
    }

    fn reset(&mut self) {
        self.base.reset();
    }
}
