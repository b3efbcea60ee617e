//! WebSocket client for the ComfyUI event stream.
//!
//! [`EventSource`] is the seam the transport reads from: each call to
//! [`EventSource::open`] yields one session as a stream of [`Frame`]s.
//! [`ComfyUIClient`] is the production implementation; it connects to
//! `ws://{host}/ws?clientId={client_id}` and keeps the session alive
//! with periodic pings.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One inbound message from the event stream, delivered verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON document with a `type` discriminator and a `data` payload.
    Text(String),
    /// Preview image, still carrying its fixed-size header.
    Binary(Bytes),
}

/// A single connected session. Ends when the connection closes; an
/// `Err` item means the session is dead.
pub type FrameStream = BoxStream<'static, Result<Frame, ComfyUIClientError>>;

/// Something the transport can (re)connect to.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// Identifier the backend uses to address events to this process.
    /// Also sent with every prompt submission.
    fn client_id(&self) -> &str;

    /// Establish a new session.
    async fn open(&self) -> Result<FrameStream, ComfyUIClientError>;
}

/// Protocol-level liveness parameters.
#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    /// How often a ping is sent.
    pub ping_interval: Duration,
    /// Extra silence tolerated after a ping before the session is
    /// considered dead.
    pub ping_timeout: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration handle for a ComfyUI event stream.
pub struct ComfyUIClient {
    ws_url: String,
    client_id: String,
    keep_alive: KeepAliveConfig,
}

impl ComfyUIClient {
    /// Create a new client.
    ///
    /// * `ws_url`    - WebSocket base URL, e.g. `ws://host:8188`.
    /// * `client_id` - identifier shared with prompt submissions.
    pub fn new(ws_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            client_id: client_id.into(),
            keep_alive: KeepAliveConfig::default(),
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: KeepAliveConfig) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Full endpoint URL including the `clientId` query parameter.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/ws?clientId={}",
            self.ws_url.trim_end_matches('/'),
            self.client_id
        )
    }
}

#[async_trait::async_trait]
impl EventSource for ComfyUIClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn open(&self) -> Result<FrameStream, ComfyUIClientError> {
        let (ws_stream, _response) = connect_async(self.endpoint()).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            client_id = %self.client_id,
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(session_stream(ws_stream, self.keep_alive.clone()))
    }
}

/// Read half plus the ping machinery for one connection.
struct Session {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    ticker: Interval,
    last_seen: Instant,
    keep_alive: KeepAliveConfig,
    dead: bool,
}

fn session_stream(ws_stream: WsStream, keep_alive: KeepAliveConfig) -> FrameStream {
    let (sink, stream) = ws_stream.split();
    let ticker = tokio::time::interval_at(
        Instant::now() + keep_alive.ping_interval,
        keep_alive.ping_interval,
    );
    let session = Session {
        sink,
        stream,
        ticker,
        last_seen: Instant::now(),
        keep_alive,
        dead: false,
    };

    futures::stream::unfold(session, |mut session| async move {
        if session.dead {
            return None;
        }
        let item = session.next_frame().await?;
        if item.is_err() {
            session.dead = true;
        }
        Some((item, session))
    })
    .boxed()
}

impl Session {
    /// Wait for the next data frame, answering the ping timer meanwhile.
    async fn next_frame(&mut self) -> Option<Result<Frame, ComfyUIClientError>> {
        loop {
            tokio::select! {
                _ = self.ticker.tick() => {
                    let silence = self.last_seen.elapsed();
                    if silence > self.keep_alive.ping_interval + self.keep_alive.ping_timeout {
                        return Some(Err(ComfyUIClientError::KeepAliveTimeout(silence)));
                    }
                    if let Err(e) = self.sink.send(Message::Ping(Vec::new())).await {
                        return Some(Err(ComfyUIClientError::Protocol(e.to_string())));
                    }
                }
                msg = self.stream.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            return Some(Err(ComfyUIClientError::Protocol(e.to_string())));
                        }
                        None => return None,
                    };
                    self.last_seen = Instant::now();
                    match msg {
                        Message::Text(text) => return Some(Ok(Frame::Text(text))),
                        Message::Binary(data) => return Some(Ok(Frame::Binary(Bytes::from(data)))),
                        Message::Close(frame) => {
                            tracing::info!(?frame, "ComfyUI WebSocket closed");
                            return None;
                        }
                        // Pongs only refresh `last_seen`; pings are answered by tungstenite.
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                    }
                }
            }
        }
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Nothing was received for longer than the keep-alive window.
    #[error("Keep-alive timed out after {0:?} of silence")]
    KeepAliveTimeout(Duration),
}
