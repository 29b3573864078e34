//! HTTP adapter exposing a local stream as a URI-addressable byte source.
//!
//! Thin framing for media players: one route, single-range `Range`
//! support, `206 Partial Content` responses. Everything else about the
//! stream (blocking on pieces, picker re-aim on seek) happens in the
//! wrapped [`LocalStream`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::local::LocalStream;
use super::StreamError;

/// Bytes read from the stream per body chunk.
const CHUNK_SIZE: usize = 64 * 1024;
const BODY_CHANNEL_CAPACITY: usize = 8;

/// Running HTTP server wrapping one local stream.
///
/// Dropping the handle or calling [`stop`] shuts the server down; the
/// wrapped stream is disposed with it.
///
/// [`stop`]: HttpStream::stop
pub struct HttpStream {
    url: String,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

struct ServerState {
    stream: Arc<Mutex<LocalStream>>,
    length: u64,
    content_type: String,
    /// Token of the request currently producing a body; a new request
    /// cancels it so the stream mutex frees promptly.
    current_body: Mutex<Option<CancellationToken>>,
}

impl HttpStream {
    /// Binds `addr` and serves `stream` until stopped.
    ///
    /// # Errors
    /// - `StreamError::Http` - the listener could not bind
    pub(crate) async fn serve(stream: LocalStream, addr: SocketAddr) -> Result<Self, StreamError> {
        let length = stream.len();
        let content_type = mime_guess::from_path(&stream.file().path)
            .first_or_octet_stream()
            .to_string();

        let state = Arc::new(ServerState {
            stream: Arc::new(Mutex::new(stream)),
            length,
            content_type,
            current_body: Mutex::new(None),
        });

        let app = Router::new()
            .route("/stream", get(serve_stream))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await;
            if let Err(e) = result {
                tracing::warn!("HTTP stream server error: {e}");
            }
        });

        tracing::info!("HTTP stream serving on {local_addr}");
        Ok(Self {
            url: format!("http://{local_addr}/stream"),
            local_addr,
            shutdown,
        })
    }

    /// URI media players can open.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shuts the server down.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for HttpStream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Parses a single-range `Range: bytes=start-end` header.
///
/// Multipart ranges are not supported; a malformed header is treated as
/// no range, per the lenient handling media players expect.
fn parse_range_header(headers: &HeaderMap) -> Option<(u64, Option<u64>)> {
    let range = headers.get(header::RANGE)?.to_str().ok()?;
    let bounds = range.strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;

    let start = start.parse::<u64>().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse::<u64>().ok()?)
    };
    Some((start, end))
}

async fn serve_stream(
    State(state): State<Arc<ServerState>>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let range = parse_range_header(&headers);

    let (start, end) = match range {
        Some((start, end)) => {
            if start >= state.length {
                return (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{}", state.length))],
                )
                    .into_response();
            }
            (start, end.unwrap_or(state.length - 1).min(state.length - 1))
        }
        None => (0, state.length.saturating_sub(1)),
    };
    let body_length = if state.length == 0 { 0 } else { end - start + 1 };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
    response_headers.insert(
        header::CONTENT_TYPE,
        state.content_type.parse().unwrap_or_else(|_| {
            "application/octet-stream".parse().unwrap()
        }),
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        body_length.to_string().parse().unwrap(),
    );

    let status = if range.is_some() {
        response_headers.insert(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{}", state.length)
                .parse()
                .unwrap(),
        );
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    if method == Method::HEAD || body_length == 0 {
        return (status, response_headers).into_response();
    }

    // Oust the previous body producer so the stream mutex frees.
    let body_token = CancellationToken::new();
    if let Some(previous) = state
        .current_body
        .lock()
        .await
        .replace(body_token.clone())
    {
        previous.cancel();
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(BODY_CHANNEL_CAPACITY);
    let stream = state.stream.clone();
    tokio::spawn(async move {
        produce_body(stream, start, body_length, body_token, tx).await;
    });

    (status, response_headers, Body::from_stream(ReceiverStream::new(rx))).into_response()
}

/// Reads `length` bytes starting at `start` and feeds them to the body
/// channel, stopping on cancellation, disposal, or a gone client.
async fn produce_body(
    stream: Arc<Mutex<LocalStream>>,
    start: u64,
    length: u64,
    token: CancellationToken,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
) {
    let mut guard = tokio::select! {
        _ = token.cancelled() => return,
        guard = stream.lock() => guard,
    };

    if let Err(e) = guard.seek(start).await {
        let _ = tx.send(Err(std::io::Error::other(e.to_string()))).await;
        return;
    }

    let mut remaining = length;
    let mut buf = vec![0u8; CHUNK_SIZE];
    while remaining > 0 {
        let want = (remaining as usize).min(buf.len());
        let read = tokio::select! {
            _ = token.cancelled() => return,
            read = guard.read(&mut buf[..want]) => read,
        };
        match read {
            Ok(0) => return,
            Ok(n) => {
                remaining -= n as u64;
                if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                    return; // client went away
                }
            }
            Err(e) => {
                tracing::debug!("HTTP body read failed: {e}");
                let _ = tx.send(Err(std::io::Error::other(e.to_string()))).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::engine::SimTorrentSession;
    use crate::picker::{SequentialPicker, StreamingPicker};
    use crate::torrent::{InfoHash, PieceIndex, TorrentLayout};

    const PIECE: u64 = 32_768;

    async fn seeded_router(delivered_pieces: u32) -> Router {
        let layout = TorrentLayout::single_file(PIECE, 16_384, "movie.mp4", 4 * PIECE).unwrap();
        let session = SimTorrentSession::new(InfoHash::new([3u8; 20]), layout.clone());
        for index in 0..delivered_pieces {
            session
                .deliver_piece_filled(PieceIndex::new(index), index as u8)
                .await
                .unwrap();
        }

        let picker = StreamingPicker::new(
            Box::new(SequentialPicker::new(layout.clone())),
            layout.piece_count(),
        )
        .into_shared();
        let file = layout.file(0).unwrap().clone();
        let stream = LocalStream::new(
            session.clone(),
            picker,
            file,
            Arc::new(AtomicBool::new(false)),
            CancellationToken::new(),
        );

        let content_type = "video/mp4".to_string();
        let state = Arc::new(ServerState {
            length: stream.len(),
            stream: Arc::new(Mutex::new(stream)),
            content_type,
            current_body: Mutex::new(None),
        });
        Router::new()
            .route("/stream", get(serve_stream))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_full_get_serves_whole_file() {
        let app = seeded_router(4).await;
        let response = app
            .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCEPT_RANGES].to_str().unwrap(),
            "bytes"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len() as u64, 4 * PIECE);
    }

    #[tokio::test]
    async fn test_range_request_returns_partial_content() {
        let app = seeded_router(4).await;
        let request = Request::get("/stream")
            .header(header::RANGE, "bytes=100-199")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[header::CONTENT_RANGE].to_str().unwrap(),
            format!("bytes 100-199/{}", 4 * PIECE)
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 100);
        assert!(body.iter().all(|b| *b == 0)); // piece 0 fill
    }

    #[tokio::test]
    async fn test_open_ended_range_spans_pieces() {
        let app = seeded_router(4).await;
        let start = 3 * PIECE - 10;
        let request = Request::get("/stream")
            .header(header::RANGE, format!("bytes={start}-"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len() as u64, PIECE + 10);
        assert!(body[..10].iter().all(|b| *b == 2));
        assert!(body[10..].iter().all(|b| *b == 3));
    }

    #[tokio::test]
    async fn test_range_past_end_is_unsatisfiable() {
        let app = seeded_router(1).await;
        let request = Request::get("/stream")
            .header(header::RANGE, format!("bytes={}-", 4 * PIECE))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[tokio::test]
    async fn test_head_reports_length_without_body() {
        let app = seeded_router(0).await;
        let request = Request::head("/stream").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH].to_str().unwrap(),
            (4 * PIECE).to_string()
        );
        assert_eq!(
            response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "video/mp4"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }
}
