//! Blocking byte stream over a single file of a downloading torrent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::StreamError;
use crate::engine::TorrentSession;
use crate::picker::SharedStreamingPicker;
use crate::torrent::{FileEntry, PieceIndex, TorrentLayout};

/// Readable, seekable byte source over one file in a torrent.
///
/// Reads return only hash-verified bytes: a read whose piece has not
/// arrived suspends until the piece-verified notification fires, then
/// rechecks. Seeking re-aims the streaming picker before it returns, so
/// the next read blocks on the right piece.
///
/// One live stream exists per provider; the provider hands out the
/// handle and reclaims the slot when [`dispose`] runs.
///
/// [`dispose`]: LocalStream::dispose
pub struct LocalStream {
    session: Arc<dyn TorrentSession>,
    picker: SharedStreamingPicker,
    layout: Arc<TorrentLayout>,
    file: FileEntry,
    position: u64,
    disposed: Arc<AtomicBool>,
    cancel: CancellationToken,
    verified: broadcast::Receiver<PieceIndex>,
}

impl LocalStream {
    /// Creates a stream positioned at byte 0 of `file`.
    ///
    /// The verified-piece subscription is taken here, before any read,
    /// so a piece arriving between creation and the first blocking read
    /// is never missed.
    pub(crate) fn new(
        session: Arc<dyn TorrentSession>,
        picker: SharedStreamingPicker,
        file: FileEntry,
        disposed: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        let layout = session.layout();
        let verified = session.subscribe_verified();
        Self {
            session,
            picker,
            layout,
            file,
            position: 0,
            disposed,
            cancel,
            verified,
        }
    }

    /// Length of the streamed file in bytes.
    pub fn len(&self) -> u64 {
        self.file.length
    }

    /// Whether the streamed file is empty.
    pub fn is_empty(&self) -> bool {
        self.file.length == 0
    }

    /// Current read position within the file.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The file this stream covers.
    pub fn file(&self) -> &FileEntry {
        &self.file
    }

    /// Whether the stream has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Reads up to `buf.len()` bytes at the current position.
    ///
    /// Returns 0 at end of file. Suspends while the piece under the
    /// position is unverified. A single call never crosses a piece
    /// boundary, so callers wanting a full buffer must loop.
    ///
    /// # Errors
    /// - `StreamError::Cancelled` - stream disposed, before or during
    ///   the call; the position is left unchanged
    /// - `StreamError::Storage` - disk layer failure; the stream stays
    ///   usable for later reads
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if self.is_disposed() {
            return Err(StreamError::Cancelled);
        }
        if buf.is_empty() || self.position >= self.file.length {
            return Ok(0);
        }

        let absolute = self.file.offset + self.position;
        let piece = self.layout.piece_for_offset(absolute);
        self.wait_for_piece(piece).await?;

        // Clamp to the current piece and the end of the file.
        let piece_end = (piece.as_u32() as u64 + 1) * self.layout.piece_length();
        let file_end = self.file.offset + self.file.length;
        let limit = piece_end.min(file_end) - absolute;
        let len = (buf.len() as u64).min(limit) as usize;

        let read = self.session.read_at(absolute, &mut buf[..len]).await?;
        self.position += read as u64;
        self.picker.lock().await.advance_to(self.position);
        Ok(read)
    }

    /// Moves the read position to `position`, in `[0, len]`.
    ///
    /// Re-aims the picker window before returning; requests for pieces
    /// that left the urgent window are cancelled on the wire.
    ///
    /// # Errors
    /// - `StreamError::SeekOutOfRange` - target past the end of the file
    /// - `StreamError::Cancelled` - stream disposed
    pub async fn seek(&mut self, position: u64) -> Result<(), StreamError> {
        if self.is_disposed() {
            return Err(StreamError::Cancelled);
        }
        if position > self.file.length {
            return Err(StreamError::SeekOutOfRange {
                position,
                length: self.file.length,
            });
        }

        self.position = position;
        let cancelled = self.picker.lock().await.seek_to(position);
        if !cancelled.is_empty() {
            self.session.cancel_requests(cancelled).await;
        }
        tracing::trace!("stream seeked to {position}");
        Ok(())
    }

    /// Releases the stream. Idempotent; wakes any suspended read with a
    /// cancelled status and frees the provider's active-stream slot.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            tracing::debug!("stream over {} disposed", self.file.path);
            self.cancel.cancel();
        }
    }

    /// Suspends until `piece` is verified, rechecking after every
    /// notification.
    async fn wait_for_piece(&mut self, piece: PieceIndex) -> Result<(), StreamError> {
        while !self.session.has_piece(piece).await {
            tracing::trace!("read suspended on piece {piece}");
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(StreamError::Cancelled),
                event = self.verified.recv() => match event {
                    // Any wake is only a hint; the loop rechecks Have.
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(StreamError::Cancelled);
                    }
                },
            }
        }
        Ok(())
    }
}

impl Drop for LocalStream {
    fn drop(&mut self) {
        self.dispose();
    }
}
