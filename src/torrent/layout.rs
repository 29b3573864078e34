//! Byte-level geometry of a torrent.
//!
//! Maps between byte offsets, pieces, blocks, and the files packed into
//! the torrent's contiguous byte space. All piece math used by the
//! picker window and the stream layer lives here.

use std::sync::Arc;

use super::{PieceIndex, TorrentError};

/// Standard block size requested over the peer wire protocol.
pub const DEFAULT_BLOCK_LENGTH: u32 = 16_384; // 16 KiB

/// A single file within the torrent's byte space.
///
/// Files are packed back to back: file `i` occupies torrent bytes
/// `[offset, offset + length)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path of the file relative to the download directory.
    pub path: String,
    /// Absolute byte offset of the file within the torrent.
    pub offset: u64,
    /// Length of the file in bytes.
    pub length: u64,
}

/// Immutable geometry of a torrent: piece size, block size, and file table.
///
/// Constructed once from torrent metadata and shared read-only across the
/// picker, stream, and provider layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentLayout {
    total_length: u64,
    piece_length: u64,
    block_length: u32,
    files: Vec<FileEntry>,
}

impl TorrentLayout {
    /// Builds a layout from piece length and an ordered file table.
    ///
    /// File offsets are derived from the running sum of lengths, so the
    /// caller supplies `(path, length)` pairs in torrent order.
    ///
    /// # Errors
    /// - `TorrentError::InvalidGeometry` - zero piece length, block length
    ///   of zero or exceeding piece length, or an empty file table
    pub fn new(
        piece_length: u64,
        block_length: u32,
        files: Vec<(String, u64)>,
    ) -> Result<Arc<Self>, TorrentError> {
        if piece_length == 0 {
            return Err(TorrentError::InvalidGeometry {
                reason: "piece length must be non-zero".to_string(),
            });
        }
        if block_length == 0 || block_length as u64 > piece_length {
            return Err(TorrentError::InvalidGeometry {
                reason: format!(
                    "block length {block_length} must be in 1..={piece_length}"
                ),
            });
        }
        if files.is_empty() {
            return Err(TorrentError::InvalidGeometry {
                reason: "torrent has no files".to_string(),
            });
        }

        let mut entries = Vec::with_capacity(files.len());
        let mut offset = 0u64;
        for (path, length) in files {
            entries.push(FileEntry {
                path,
                offset,
                length,
            });
            offset = offset.checked_add(length).ok_or_else(|| {
                TorrentError::InvalidGeometry {
                    reason: "file lengths overflow u64".to_string(),
                }
            })?;
        }
        if offset == 0 {
            return Err(TorrentError::InvalidGeometry {
                reason: "torrent is empty".to_string(),
            });
        }

        Ok(Arc::new(Self {
            total_length: offset,
            piece_length,
            block_length,
            files: entries,
        }))
    }

    /// Convenience constructor for a single-file torrent.
    ///
    /// # Errors
    /// - `TorrentError::InvalidGeometry` - same conditions as [`TorrentLayout::new`]
    pub fn single_file(
        piece_length: u64,
        block_length: u32,
        path: &str,
        length: u64,
    ) -> Result<Arc<Self>, TorrentError> {
        Self::new(piece_length, block_length, vec![(path.to_string(), length)])
    }

    /// Total byte length of the torrent.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Fixed piece length; the last piece may be shorter.
    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    /// Wire-protocol block length; the last block of a piece may be shorter.
    pub fn block_length(&self) -> u32 {
        self.block_length
    }

    /// Ordered file table.
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// Looks up a file by table index.
    ///
    /// # Errors
    /// - `TorrentError::FileNotInTorrent` - index past the end of the table
    pub fn file(&self, index: usize) -> Result<&FileEntry, TorrentError> {
        self.files.get(index).ok_or(TorrentError::FileNotInTorrent {
            index,
            file_count: self.files.len(),
        })
    }

    /// Number of pieces in the torrent.
    pub fn piece_count(&self) -> u32 {
        self.total_length.div_ceil(self.piece_length) as u32
    }

    /// Byte length of a specific piece; the last piece may be shorter.
    pub fn piece_size(&self, piece: PieceIndex) -> u64 {
        let index = piece.as_u32();
        if index >= self.piece_count() {
            return 0;
        }
        if index == self.piece_count() - 1 {
            let remainder = self.total_length % self.piece_length;
            if remainder > 0 { remainder } else { self.piece_length }
        } else {
            self.piece_length
        }
    }

    /// Number of wire blocks in a specific piece.
    pub fn block_count(&self, piece: PieceIndex) -> u32 {
        self.piece_size(piece).div_ceil(self.block_length as u64) as u32
    }

    /// Byte length of a block at the given offset within a piece.
    pub fn block_size(&self, piece: PieceIndex, block_offset: u32) -> u32 {
        let piece_size = self.piece_size(piece);
        let remaining = piece_size.saturating_sub(block_offset as u64);
        remaining.min(self.block_length as u64) as u32
    }

    /// The piece containing an absolute torrent byte offset.
    pub fn piece_for_offset(&self, offset: u64) -> PieceIndex {
        PieceIndex::new((offset / self.piece_length) as u32)
    }

    /// Inclusive piece range `[first, last]` that contains a file's bytes.
    ///
    /// A zero-length file maps to the single piece containing its offset.
    pub fn file_piece_range(&self, file: &FileEntry) -> (PieceIndex, PieceIndex) {
        let first = self.piece_for_offset(file.offset.min(self.total_length - 1));
        let last_byte = file.offset + file.length.saturating_sub(1);
        let last = self.piece_for_offset(last_byte.min(self.total_length - 1));
        (first, last)
    }
}
