//! In-order base picker with block-level request tracking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use super::{BlockRequest, OutstandingRequest, PiecePicker, PieceSet};
use crate::torrent::{PieceIndex, TorrentLayout};

/// Per-block bookkeeping for a piece with download activity.
#[derive(Debug)]
struct PieceState {
    requested_by: Vec<Option<SocketAddr>>,
    received: Vec<bool>,
}

impl PieceState {
    fn new(block_count: u32) -> Self {
        Self {
            requested_by: vec![None; block_count as usize],
            received: vec![false; block_count as usize],
        }
    }

    fn is_idle(&self) -> bool {
        self.requested_by.iter().all(Option::is_none) && !self.received.iter().any(|r| *r)
    }
}

/// Base picker that requests pieces in ascending index order.
///
/// Tracks which blocks are outstanding at which peers and which have
/// arrived, never double-requesting a block. Lowest incomplete piece
/// first makes the policy deterministic, which the streaming decorator
/// relies on only for tie-breaking inside a single piece.
pub struct SequentialPicker {
    layout: Arc<TorrentLayout>,
    verified: PieceSet,
    partials: HashMap<u32, PieceState>,
}

impl SequentialPicker {
    /// Creates a picker for the given torrent geometry.
    pub fn new(layout: Arc<TorrentLayout>) -> Self {
        let piece_count = layout.piece_count();
        Self {
            layout,
            verified: PieceSet::new(piece_count),
            partials: HashMap::new(),
        }
    }

    /// Block index within a piece for a block byte offset.
    fn block_index(&self, offset: u32) -> usize {
        (offset / self.layout.block_length()) as usize
    }

    /// Assigns free blocks of `piece` to `peer`, up to `count`.
    fn assign_blocks(
        &mut self,
        peer: SocketAddr,
        piece: PieceIndex,
        count: usize,
        out: &mut Vec<BlockRequest>,
    ) {
        let block_count = self.layout.block_count(piece);
        let state = self
            .partials
            .entry(piece.as_u32())
            .or_insert_with(|| PieceState::new(block_count));

        for block in 0..block_count as usize {
            if out.len() >= count {
                return;
            }
            if state.received[block] || state.requested_by[block].is_some() {
                continue;
            }
            state.requested_by[block] = Some(peer);
            let offset = block as u32 * self.layout.block_length();
            out.push(BlockRequest {
                piece,
                offset,
                length: self.layout.block_size(piece, offset),
            });
        }
    }

    fn wants(&self, piece: PieceIndex, available: &PieceSet) -> bool {
        available.contains(piece) && !self.verified.contains(piece)
    }
}

impl PiecePicker for SequentialPicker {
    fn pick_blocks(
        &mut self,
        peer: SocketAddr,
        available: &PieceSet,
        count: usize,
    ) -> Vec<BlockRequest> {
        let mut out = Vec::new();
        for index in 0..self.layout.piece_count() {
            if out.len() >= count {
                break;
            }
            let piece = PieceIndex::new(index);
            if self.wants(piece, available) {
                self.assign_blocks(peer, piece, count, &mut out);
            }
        }
        out
    }

    fn continue_existing(
        &mut self,
        peer: SocketAddr,
        available: &PieceSet,
        count: usize,
    ) -> Vec<BlockRequest> {
        let mut active: Vec<u32> = self.partials.keys().copied().collect();
        active.sort_unstable();

        let mut out = Vec::new();
        for index in active {
            if out.len() >= count {
                break;
            }
            let piece = PieceIndex::new(index);
            if self.wants(piece, available) {
                self.assign_blocks(peer, piece, count, &mut out);
            }
        }
        out
    }

    fn is_interesting(&self, available: &PieceSet) -> bool {
        available.iter().any(|piece| !self.verified.contains(piece))
    }

    fn is_block_requested(&self, block: &BlockRequest) -> bool {
        self.partials
            .get(&block.piece.as_u32())
            .and_then(|state| state.requested_by.get(self.block_index(block.offset)))
            .is_some_and(Option::is_some)
    }

    fn cancel_request(&mut self, peer: SocketAddr, block: &BlockRequest) -> bool {
        let index = self.block_index(block.offset);
        let Some(state) = self.partials.get_mut(&block.piece.as_u32()) else {
            return false;
        };
        let Some(slot) = state.requested_by.get_mut(index) else {
            return false;
        };
        if *slot != Some(peer) {
            return false;
        }
        *slot = None;
        if state.is_idle() {
            self.partials.remove(&block.piece.as_u32());
        }
        true
    }

    fn received_block(&mut self, peer: SocketAddr, block: &BlockRequest) {
        let index = self.block_index(block.offset);
        if let Some(state) = self.partials.get_mut(&block.piece.as_u32())
            && let Some(slot) = state.requested_by.get_mut(index)
        {
            // Accept the block even if it raced a cancel from another peer.
            if *slot == Some(peer) || slot.is_none() {
                *slot = None;
                state.received[index] = true;
            }
        }
    }

    fn piece_verified(&mut self, piece: PieceIndex) {
        self.verified.insert(piece);
        self.partials.remove(&piece.as_u32());
    }

    fn outstanding_requests(&self) -> Vec<OutstandingRequest> {
        let mut out = Vec::new();
        for (&index, state) in &self.partials {
            let piece = PieceIndex::new(index);
            for (block, slot) in state.requested_by.iter().enumerate() {
                if let Some(peer) = slot {
                    let offset = block as u32 * self.layout.block_length();
                    out.push(OutstandingRequest {
                        peer: *peer,
                        block: BlockRequest {
                            piece,
                            offset,
                            length: self.layout.block_size(piece, offset),
                        },
                    });
                }
            }
        }
        out
    }

    fn reset(&mut self) {
        self.partials.retain(|_, state| {
            for slot in &mut state.requested_by {
                *slot = None;
            }
            state.received.iter().any(|r| *r)
        });
    }
}
