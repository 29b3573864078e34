//! End-to-end streaming scenarios through the public provider API.
//!
//! Geometry used throughout: 32 KiB pieces, 16 KiB blocks, one file at
//! torrent offset 0, 1 MiB long (pieces 0..=31), high-priority window of
//! 5 pieces, look-ahead of 15.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use slipstream::engine::{TorrentHost, TorrentSession};
use slipstream::picker::PieceSet;
use slipstream::{
    InfoHash, PieceIndex, ProviderError, SimEngine, SimTorrentSession, SlipstreamConfig,
    StreamError, StreamProvider, TorrentLayout,
};
use tokio::time::timeout;

const PIECE: u64 = 32_768;
const FILE_LENGTH: u64 = 1_048_576;
const TOTAL_PIECES: u32 = 32;

struct Harness {
    engine: Arc<SimEngine>,
    session: Arc<SimTorrentSession>,
    provider: StreamProvider,
}

impl Harness {
    fn new(seed: u8) -> Self {
        let engine = SimEngine::new();
        let layout = TorrentLayout::single_file(PIECE, 16_384, "movie.mkv", FILE_LENGTH).unwrap();
        let session = SimTorrentSession::new(InfoHash::new([seed; 20]), layout);
        let provider = StreamProvider::new(
            engine.clone(),
            session.clone(),
            SlipstreamConfig::default(),
        );
        Self {
            engine,
            session,
            provider,
        }
    }

    async fn started(seed: u8) -> Self {
        let harness = Self::new(seed);
        harness.provider.start().await.unwrap();
        harness
    }

    /// First pieces requested for a fresh peer offering every piece.
    async fn first_requests(&self, port: u16, count: usize) -> Vec<u32> {
        let peer: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        self.session
            .pick_for_peer(peer, &PieceSet::full(TOTAL_PIECES), count)
            .await
            .iter()
            .map(|r| r.piece.as_u32())
            .collect()
    }
}

#[tokio::test]
async fn scenario_initial_priority_starts_at_piece_zero() {
    let harness = Harness::started(1).await;
    let _stream = harness.provider.create_stream(0).await.unwrap();

    // Urgent window {0..4}: a peer offering everything is asked for
    // piece 0 first, two blocks per piece.
    let requests = harness.first_requests(6881, 4).await;
    assert_eq!(requests, vec![0, 0, 1, 1]);
}

#[tokio::test]
async fn scenario_sequential_advance_moves_window() {
    let harness = Harness::started(2).await;
    let mut stream = harness.provider.create_stream(0).await.unwrap();

    harness
        .session
        .deliver_piece_filled(PieceIndex::new(0), 0xAA)
        .await
        .unwrap();

    // Read the whole first piece.
    let mut buf = vec![0u8; PIECE as usize];
    let mut total = 0usize;
    while total < buf.len() {
        let read = stream.read(&mut buf[total..]).await.unwrap();
        assert!(read > 0);
        total += read;
    }
    assert_eq!(total as u64, PIECE);
    assert!(buf.iter().all(|b| *b == 0xAA));

    // Urgent window is now {1..5}; a new peer is asked for piece 1 first.
    let requests = harness.first_requests(6882, 2).await;
    assert_eq!(requests, vec![1, 1]);
}

#[tokio::test]
async fn scenario_forward_seek_cancels_and_retargets() {
    let harness = Harness::started(3).await;
    let mut stream = harness.provider.create_stream(0).await.unwrap();

    // Requests outstanding for the urgent band and some prefetch.
    let before = harness.first_requests(6883, 12).await;
    assert!(before.iter().all(|p| *p < 16));

    // Seek to byte 524288 = piece 16.
    stream.seek(524_288).await.unwrap();

    // Everything outstanding was for pieces 0..15, outside the new
    // urgent window {16..20}: all cancelled before seek returned.
    let cancels = harness.session.recorded_cancels().await;
    assert_eq!(cancels.len(), before.len());
    assert!(cancels.iter().all(|c| c.block.piece.as_u32() < 16));

    let requests = harness.first_requests(6884, 2).await;
    assert_eq!(requests, vec![16, 16]);
}

#[tokio::test]
async fn scenario_backward_seek_to_present_piece() {
    let harness = Harness::started(4).await;
    let mut stream = harness.provider.create_stream(0).await.unwrap();

    stream.seek(16 * PIECE).await.unwrap();
    harness
        .session
        .deliver_piece_filled(PieceIndex::new(0), 0)
        .await
        .unwrap();

    stream.seek(0).await.unwrap();

    // Urgent is {0..4} regardless of piece 0 being present; the first
    // request from a fresh peer is the lowest unmet piece in the window.
    let requests = harness.first_requests(6885, 2).await;
    assert_eq!(requests, vec![1, 1]);
}

#[tokio::test]
async fn scenario_double_stream_is_invalid_state() {
    let harness = Harness::started(5).await;
    let _first = harness.provider.create_stream(0).await.unwrap();

    let second = harness.provider.create_stream(0).await;
    assert!(matches!(
        second,
        Err(ProviderError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn scenario_engine_conflict_on_start() {
    let harness = Harness::new(6);
    harness
        .engine
        .register(harness.session.clone())
        .await
        .unwrap();

    assert!(matches!(
        harness.provider.start().await,
        Err(ProviderError::Conflict { .. })
    ));
}

#[tokio::test]
async fn seek_to_current_position_is_noop() {
    let harness = Harness::started(7).await;
    let mut stream = harness.provider.create_stream(0).await.unwrap();
    harness.first_requests(6886, 8).await;

    stream.seek(0).await.unwrap();
    assert!(harness.session.recorded_cancels().await.is_empty());
}

#[tokio::test]
async fn read_blocks_until_delivery_and_never_returns_unverified_bytes() {
    let harness = Harness::started(8).await;
    let mut stream = harness.provider.create_stream(0).await.unwrap();
    let session = harness.session.clone();

    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let read = stream.read(&mut buf).await.unwrap();
        (read, buf)
    });

    tokio::task::yield_now().await;
    session
        .deliver_piece_filled(PieceIndex::new(0), 0x77)
        .await
        .unwrap();

    let (read, buf) = timeout(Duration::from_secs(5), reader)
        .await
        .expect("read did not wake when its piece verified")
        .unwrap();
    assert_eq!(read, 64);
    assert_eq!(buf, [0x77; 64]);
}

#[tokio::test]
async fn stop_disposes_stream_and_is_terminal() {
    let harness = Harness::started(9).await;
    let mut stream = harness.provider.create_stream(0).await.unwrap();

    harness.provider.stop().await.unwrap();
    assert!(!harness.provider.is_active());
    assert!(!harness.engine.contains(harness.session.info_hash()).await);

    let mut buf = [0u8; 8];
    assert!(matches!(
        stream.read(&mut buf).await,
        Err(StreamError::Cancelled)
    ));

    // Terminal: no restart on the same provider instance.
    assert!(matches!(
        harness.provider.start().await,
        Err(ProviderError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn dispose_frees_the_single_stream_slot() {
    let harness = Harness::started(10).await;
    let stream = harness.provider.create_stream(0).await.unwrap();

    stream.dispose();
    stream.dispose(); // idempotent

    let replacement = harness.provider.create_stream(0).await.unwrap();
    assert_eq!(replacement.position(), 0);
}

#[tokio::test]
async fn whole_file_reads_back_as_delivered() {
    let harness = Harness::started(11).await;
    let mut stream = harness.provider.create_stream(0).await.unwrap();

    for index in 0..TOTAL_PIECES {
        harness
            .session
            .deliver_piece_filled(PieceIndex::new(index), index as u8)
            .await
            .unwrap();
    }

    let mut total = 0u64;
    let mut buf = vec![0u8; 50_000]; // deliberately not piece aligned
    loop {
        let read = stream.read(&mut buf).await.unwrap();
        if read == 0 {
            break;
        }
        let start = stream.position() - read as u64;
        assert_eq!(buf[0], (start / PIECE) as u8);
        total += read as u64;
    }
    assert_eq!(total, FILE_LENGTH);
    assert_eq!(stream.position(), FILE_LENGTH);
}

#[tokio::test]
async fn urgent_window_requests_precede_prefetch_for_partial_peers() {
    let harness = Harness::started(12).await;
    let _stream = harness.provider.create_stream(0).await.unwrap();

    // Peer has one urgent piece (3) and one prefetch piece (10): the
    // urgent piece wins even though 10 is lower in the base order. A
    // peer with nothing in the window still gets put to work.
    let peer: SocketAddr = "127.0.0.1:7001".parse().unwrap();
    let mut available = PieceSet::new(TOTAL_PIECES);
    available.insert(PieceIndex::new(10));
    available.insert(PieceIndex::new(3));
    let requests = harness.session.pick_for_peer(peer, &available, 2).await;
    assert!(requests.iter().all(|r| r.piece.as_u32() == 3));

    let outside_peer: SocketAddr = "127.0.0.1:7002".parse().unwrap();
    let mut outside = PieceSet::new(TOTAL_PIECES);
    outside.insert(PieceIndex::new(25));
    let requests = harness
        .session
        .pick_for_peer(outside_peer, &outside, 2)
        .await;
    assert!(requests.iter().all(|r| r.piece.as_u32() == 25));
}
