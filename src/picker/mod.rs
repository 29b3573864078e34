//! Piece selection for torrent downloads.
//!
//! The base [`PiecePicker`] trait covers request generation over available
//! pieces; [`StreamingPicker`] decorates any base picker with a
//! high-priority window that follows a reader's byte position.

pub mod sequential;
pub mod streaming;
pub mod window;

use std::net::SocketAddr;

pub use sequential::SequentialPicker;
pub use streaming::{SharedStreamingPicker, StreamingPicker};
pub use window::{PieceWindow, WindowBand};

use crate::torrent::PieceIndex;

/// One wire-protocol block request: a sub-range of a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    /// Piece the block belongs to.
    pub piece: PieceIndex,
    /// Byte offset of the block within the piece.
    pub offset: u32,
    /// Byte length of the block.
    pub length: u32,
}

/// A block request currently outstanding at a peer.
///
/// Returned by [`PiecePicker::outstanding_requests`] and by seek
/// cancellation so the session can send wire `Cancel` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutstandingRequest {
    /// Peer the block was requested from.
    pub peer: SocketAddr,
    /// The requested block.
    pub block: BlockRequest,
}

/// Set of piece indices, used for peer have-sets and availability masks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PieceSet {
    bits: Vec<bool>,
}

impl PieceSet {
    /// Creates an empty set sized for `piece_count` pieces.
    pub fn new(piece_count: u32) -> Self {
        Self {
            bits: vec![false; piece_count as usize],
        }
    }

    /// Creates a set with every piece present.
    pub fn full(piece_count: u32) -> Self {
        Self {
            bits: vec![true; piece_count as usize],
        }
    }

    /// Number of pieces the set is sized for.
    pub fn piece_count(&self) -> u32 {
        self.bits.len() as u32
    }

    /// Marks a piece as present. Out-of-range indices are ignored.
    pub fn insert(&mut self, piece: PieceIndex) {
        if let Some(bit) = self.bits.get_mut(piece.as_u32() as usize) {
            *bit = true;
        }
    }

    /// Removes a piece from the set.
    pub fn remove(&mut self, piece: PieceIndex) {
        if let Some(bit) = self.bits.get_mut(piece.as_u32() as usize) {
            *bit = false;
        }
    }

    /// Whether the set contains a piece.
    pub fn contains(&self, piece: PieceIndex) -> bool {
        self.bits
            .get(piece.as_u32() as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Number of pieces present.
    pub fn count(&self) -> u32 {
        self.bits.iter().filter(|b| **b).count() as u32
    }

    /// Whether no pieces are present.
    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|b| *b)
    }

    /// Iterates present pieces in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = PieceIndex> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, b)| **b)
            .map(|(i, _)| PieceIndex::new(i as u32))
    }
}

/// Piece selection policy over available pieces.
///
/// Implementations own all per-block request state: which blocks of which
/// pieces are outstanding at which peers, and which have been received.
/// The streaming decorator holds none of this; it only reorders what the
/// base picker is allowed to see.
pub trait PiecePicker: Send {
    /// Generates up to `count` new block requests for `peer`, drawn from
    /// pieces in `available` that are not yet complete.
    fn pick_blocks(
        &mut self,
        peer: SocketAddr,
        available: &PieceSet,
        count: usize,
    ) -> Vec<BlockRequest>;

    /// Generates up to `count` requests restricted to pieces that already
    /// have outstanding or received blocks, finishing partial pieces first.
    fn continue_existing(
        &mut self,
        peer: SocketAddr,
        available: &PieceSet,
        count: usize,
    ) -> Vec<BlockRequest>;

    /// Whether `available` offers any piece this picker still wants.
    fn is_interesting(&self, available: &PieceSet) -> bool;

    /// Whether the exact block is currently outstanding at any peer.
    fn is_block_requested(&self, block: &BlockRequest) -> bool;

    /// Cancels one outstanding request. Returns true if it was present
    /// and assigned to `peer`.
    fn cancel_request(&mut self, peer: SocketAddr, block: &BlockRequest) -> bool;

    /// Records a block arriving from `peer`, clearing its outstanding slot.
    fn received_block(&mut self, peer: SocketAddr, block: &BlockRequest);

    /// Records that a piece was received in full and hash-verified.
    /// Verified pieces are never picked again.
    fn piece_verified(&mut self, piece: PieceIndex);

    /// Snapshot of every outstanding request across all peers.
    fn outstanding_requests(&self) -> Vec<OutstandingRequest>;

    /// Drops all outstanding request state, keeping verified pieces.
    fn reset(&mut self);
}
