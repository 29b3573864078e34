//! High-priority piece window that follows a reader's byte position.

use crate::torrent::{FileEntry, PieceIndex, TorrentLayout};

/// Priority band a piece falls into relative to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowBand {
    /// Inside the high-priority window starting at the reader's position.
    Urgent,
    /// In the look-ahead region after the high-priority window.
    Prefetch,
    /// Outside the window (including pieces before the reader or past
    /// the end of the streamed file).
    Normal,
}

/// The contiguous piece range to prioritise for a byte position in a file.
///
/// The window covers `high_priority` pieces starting at the piece under
/// the reader (`Urgent`) followed by `look_ahead` pieces (`Prefetch`),
/// both clamped to the streamed file's last piece. Seeking is the only
/// input that moves the head.
#[derive(Debug, Clone)]
pub struct PieceWindow {
    file_offset: u64,
    piece_length: u64,
    first_piece: u32,
    last_piece: u32,
    head_piece: u32,
    high_priority: u32,
    look_ahead: u32,
}

impl PieceWindow {
    /// Creates a window over `file`, head at the file's first piece.
    pub fn new(
        layout: &TorrentLayout,
        file: &FileEntry,
        high_priority: u32,
        look_ahead: u32,
    ) -> Self {
        let (first, last) = layout.file_piece_range(file);
        Self {
            file_offset: file.offset,
            piece_length: layout.piece_length(),
            first_piece: first.as_u32(),
            last_piece: last.as_u32(),
            head_piece: first.as_u32(),
            high_priority,
            look_ahead,
        }
    }

    /// Re-aims the head at the piece containing `byte_offset` within the
    /// streamed file, clamped to the file's piece range.
    pub fn seek_to(&mut self, byte_offset: u64) {
        let absolute = self.file_offset + byte_offset;
        let piece = (absolute / self.piece_length) as u32;
        self.head_piece = piece.clamp(self.first_piece, self.last_piece);
    }

    /// Moves the head directly to a piece, clamped to the file range.
    pub(crate) fn seek_to_head(&mut self, head: PieceIndex) {
        self.head_piece = head.as_u32().clamp(self.first_piece, self.last_piece);
    }

    /// Piece containing the reader's current position.
    pub fn head_piece(&self) -> PieceIndex {
        PieceIndex::new(self.head_piece)
    }

    /// Piece range `[first, last]` of the streamed file.
    pub fn file_range(&self) -> (PieceIndex, PieceIndex) {
        (
            PieceIndex::new(self.first_piece),
            PieceIndex::new(self.last_piece),
        )
    }

    /// Priority band of a piece under the current head.
    pub fn band(&self, piece: PieceIndex) -> WindowBand {
        let index = piece.as_u32() as u64;
        if index > self.last_piece as u64 || index < self.head_piece as u64 {
            return WindowBand::Normal;
        }

        let head = self.head_piece as u64;
        let urgent_end = head + self.high_priority as u64;
        let prefetch_end = urgent_end + self.look_ahead as u64;
        if index < urgent_end {
            WindowBand::Urgent
        } else if index < prefetch_end {
            WindowBand::Prefetch
        } else {
            WindowBand::Normal
        }
    }

    /// Whether a piece is in the urgent band.
    pub fn is_urgent(&self, piece: PieceIndex) -> bool {
        self.band(piece) == WindowBand::Urgent
    }

    /// Urgent pieces in priority order (ascending index from the head).
    pub fn urgent_pieces(&self) -> impl Iterator<Item = PieceIndex> + '_ {
        let start = self.head_piece as u64;
        let end = (start + self.high_priority as u64).min(self.last_piece as u64 + 1);
        (start..end).map(|i| PieceIndex::new(i as u32))
    }

    /// Prefetch pieces in priority order (ascending index).
    pub fn prefetch_pieces(&self) -> impl Iterator<Item = PieceIndex> + '_ {
        let start = (self.head_piece as u64 + self.high_priority as u64)
            .min(self.last_piece as u64 + 1);
        let end = (self.head_piece as u64 + self.high_priority as u64 + self.look_ahead as u64)
            .min(self.last_piece as u64 + 1);
        (start..end).map(|i| PieceIndex::new(i as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::TorrentLayout;

    fn window() -> PieceWindow {
        // 1 MiB file, 32 KiB pieces: pieces 0..=31.
        let layout = TorrentLayout::single_file(32_768, 16_384, "movie.mkv", 1_048_576).unwrap();
        let file = layout.file(0).unwrap().clone();
        PieceWindow::new(&layout, &file, 5, 15)
    }

    fn pieces(iter: impl Iterator<Item = PieceIndex>) -> Vec<u32> {
        iter.map(PieceIndex::as_u32).collect()
    }

    #[test]
    fn test_initial_bands() {
        let window = window();
        assert_eq!(pieces(window.urgent_pieces()), vec![0, 1, 2, 3, 4]);
        assert_eq!(pieces(window.prefetch_pieces()), (5..20).collect::<Vec<_>>());
        assert_eq!(window.band(PieceIndex::new(0)), WindowBand::Urgent);
        assert_eq!(window.band(PieceIndex::new(4)), WindowBand::Urgent);
        assert_eq!(window.band(PieceIndex::new(5)), WindowBand::Prefetch);
        assert_eq!(window.band(PieceIndex::new(19)), WindowBand::Prefetch);
        assert_eq!(window.band(PieceIndex::new(20)), WindowBand::Normal);
    }

    #[test]
    fn test_seek_moves_head() {
        let mut window = window();
        window.seek_to(524_288); // piece 16
        assert_eq!(window.head_piece(), PieceIndex::new(16));
        assert_eq!(pieces(window.urgent_pieces()), vec![16, 17, 18, 19, 20]);
    }

    #[test]
    fn test_pieces_behind_head_are_normal() {
        let mut window = window();
        window.seek_to(524_288);
        assert_eq!(window.band(PieceIndex::new(15)), WindowBand::Normal);
        assert_eq!(window.band(PieceIndex::new(0)), WindowBand::Normal);
    }

    #[test]
    fn test_window_clamps_at_file_end() {
        let mut window = window();
        window.seek_to(1_048_575); // last byte, piece 31
        assert_eq!(window.head_piece(), PieceIndex::new(31));
        assert_eq!(pieces(window.urgent_pieces()), vec![31]);
        assert_eq!(pieces(window.prefetch_pieces()), Vec::<u32>::new());
        assert_eq!(window.band(PieceIndex::new(32)), WindowBand::Normal);
    }

    #[test]
    fn test_window_shorter_than_counts() {
        // 3-piece file: urgent band covers the whole file, no prefetch.
        let layout = TorrentLayout::single_file(32_768, 16_384, "short.bin", 90_000).unwrap();
        let file = layout.file(0).unwrap().clone();
        let window = PieceWindow::new(&layout, &file, 5, 15);
        assert_eq!(pieces(window.urgent_pieces()), vec![0, 1, 2]);
        assert_eq!(pieces(window.prefetch_pieces()), Vec::<u32>::new());
    }

    #[test]
    fn test_seek_head_clamped_to_file_range() {
        // Second file starts mid-torrent; seeking to 0 lands on its first piece.
        let layout = TorrentLayout::new(
            32_768,
            16_384,
            vec![("a".to_string(), 100_000), ("b".to_string(), 200_000)],
        )
        .unwrap();
        let file_b = layout.file(1).unwrap().clone();
        let mut window = PieceWindow::new(&layout, &file_b, 5, 15);
        window.seek_to(0);
        assert_eq!(window.head_piece(), PieceIndex::new(3)); // 100_000 / 32_768
    }

    #[test]
    fn test_file_offset_shifts_head() {
        let layout = TorrentLayout::new(
            32_768,
            16_384,
            vec![("a".to_string(), 65_536), ("b".to_string(), 131_072)],
        )
        .unwrap();
        let file_b = layout.file(1).unwrap().clone();
        let mut window = PieceWindow::new(&layout, &file_b, 2, 2);
        // byte 40_000 of file b is torrent offset 105_536, piece 3.
        window.seek_to(40_000);
        assert_eq!(window.head_piece(), PieceIndex::new(3));
    }
}
