//! Persistent WebSocket delivery.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves, plus [`WebSocketSink`], which pushes each wire
//! message as a text frame over one long-lived connection.
//!
//! # Architecture
//!
//! ```text
//! WebSocketSink::connect
//!     ├── handshake (http→ws scheme conversion)
//!     ├── reader task:    answers pings, counts acks, notices close
//!     └── keepalive task: Ping every `keepalive`, failure marks the link dead
//! ```
//!
//! A dead link makes the next `send` fail, which the owning transport
//! records as a send failure.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use super::{FrameSink, TransportKind};
use crate::constants::{DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_REQUEST_TIMEOUT, WS_CONNECT_TIMEOUT};
use crate::error::TransportError;

/// Concrete WebSocket stream type.
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("WebSocket send failed: {e}")))
    }

    /// Send a keep-alive ping.
    pub async fn send_ping(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
        self.sink
            .send(tungstenite::Message::Ping(data))
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("WebSocket ping failed: {e}")))
    }

    /// Send a pong frame in response to a ping.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("WebSocket pong failed: {e}")))
    }

    /// Send a close frame and flush.
    pub async fn send_close(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("WebSocket close failed: {e}")))
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv(&mut self) -> Option<Result<WsMessage, TransportError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(WsMessage::Binary(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsMessage::Ping(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Pong(data))) => {
                    return Some(Ok(WsMessage::Pong(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    return Some(Err(TransportError::ConnectFailed(format!(
                        "WebSocket read error: {e}"
                    ))));
                }
                None => return None,
            }
        }
    }
}

/// Connect to a WebSocket URL.
///
/// Returns split (writer, reader) halves for independent use in
/// `tokio::select!` loops.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader), TransportError> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .map_err(|e| TransportError::InvalidAddress(format!("{url}: {e}")))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| TransportError::ConnectFailed(format!("WebSocket handshake failed: {e}")))?;

    let (sink, stream) = ws_stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1)
    }
}

#[derive(Debug)]
struct Link {
    writer: Arc<Mutex<WsWriter>>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Long-lived WebSocket sink with keep-alive pings.
#[derive(Debug)]
pub struct WebSocketSink {
    url: String,
    keepalive: Duration,
    send_timeout: Duration,
    link: Mutex<Option<Link>>,
    acks: Arc<AtomicU64>,
}

impl WebSocketSink {
    /// Sink for `server_url`; `http(s)://` is rewritten to `ws(s)://`.
    pub fn new(server_url: &str) -> Result<Self, TransportError> {
        let url = http_to_ws_scheme(server_url.trim());
        let valid = ["ws://", "wss://"].iter().any(|scheme| {
            url.strip_prefix(scheme)
                .is_some_and(|rest| !rest.is_empty() && !rest.starts_with('/'))
        });
        if !valid {
            return Err(TransportError::InvalidAddress(server_url.to_string()));
        }
        Ok(Self {
            url,
            keepalive: DEFAULT_KEEPALIVE_INTERVAL,
            send_timeout: DEFAULT_REQUEST_TIMEOUT,
            link: Mutex::new(None),
            acks: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Set the keep-alive ping interval.
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval;
        self
    }

    /// Set the per-message write deadline.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// WebSocket URL in use.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Acknowledgements received from the server.
    pub fn acks_received(&self) -> u64 {
        self.acks.load(Ordering::Relaxed)
    }

    async fn teardown(link: Link) {
        link.cancel.cancel();
        for task in link.tasks {
            task.abort();
        }
        let mut writer = link.writer.lock().await;
        let _ = tokio::time::timeout(Duration::from_millis(250), writer.send_close()).await;
    }
}

async fn read_loop(
    mut reader: WsReader,
    writer: Arc<Mutex<WsWriter>>,
    alive: Arc<AtomicBool>,
    acks: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            msg = reader.recv() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    let is_ack = serde_json::from_str::<serde_json::Value>(&text)
                        .is_ok_and(|v| v.get("type").and_then(|t| t.as_str()) == Some("ack"));
                    if is_ack {
                        acks.fetch_add(1, Ordering::Relaxed);
                    } else {
                        log::debug!("Ignoring WebSocket message: {}", text);
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Err(e) = writer.lock().await.send_pong(data).await {
                        log::warn!("{}", e);
                        alive.store(false, Ordering::Release);
                        break;
                    }
                }
                Some(Ok(WsMessage::Close { code, reason })) => {
                    log::info!("WebSocket closed by server: {} {}", code, reason);
                    alive.store(false, Ordering::Release);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("{}", e);
                    alive.store(false, Ordering::Release);
                    break;
                }
                None => {
                    log::info!("WebSocket stream ended");
                    alive.store(false, Ordering::Release);
                    break;
                }
            }
        }
    }
}

async fn keepalive_loop(
    writer: Arc<Mutex<WsWriter>>,
    alive: Arc<AtomicBool>,
    every: Duration,
    deadline: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let sent = tokio::time::timeout(deadline, async {
                    writer.lock().await.send_ping(Vec::new()).await
                })
                .await;
                match sent {
                    Ok(Ok(())) => log::debug!("Keep-alive ping sent"),
                    Ok(Err(e)) => {
                        log::warn!("Keep-alive failed: {}", e);
                        alive.store(false, Ordering::Release);
                        break;
                    }
                    Err(_) => {
                        log::warn!("Keep-alive ping timed out");
                        alive.store(false, Ordering::Release);
                        break;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut slot = self.link.lock().await;
        if let Some(old) = slot.take() {
            Self::teardown(old).await;
        }

        let (writer, reader) = tokio::time::timeout(WS_CONNECT_TIMEOUT, connect(&self.url))
            .await
            .map_err(|_elapsed| TransportError::Timeout)??;
        log::info!("WebSocket connected to {}", self.url);

        let writer = Arc::new(Mutex::new(writer));
        let alive = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(read_loop(
                reader,
                Arc::clone(&writer),
                Arc::clone(&alive),
                Arc::clone(&self.acks),
                cancel.clone(),
            )),
            tokio::spawn(keepalive_loop(
                Arc::clone(&writer),
                Arc::clone(&alive),
                self.keepalive,
                self.send_timeout,
                cancel.clone(),
            )),
        ];
        *slot = Some(Link {
            writer,
            alive,
            cancel,
            tasks,
        });
        Ok(())
    }

    async fn send(&self, payload: &str) -> Result<(), TransportError> {
        let (writer, alive) = {
            let slot = self.link.lock().await;
            let link = slot
                .as_ref()
                .ok_or_else(|| TransportError::ConnectFailed("not connected".to_string()))?;
            (Arc::clone(&link.writer), Arc::clone(&link.alive))
        };
        if !alive.load(Ordering::Acquire) {
            return Err(TransportError::SendFailed(None));
        }
        let result = tokio::time::timeout(self.send_timeout, async {
            writer.lock().await.send_text(payload).await
        })
        .await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                alive.store(false, Ordering::Release);
                Err(e)
            }
            Err(_) => {
                alive.store(false, Ordering::Release);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn disconnect(&self) {
        if let Some(link) = self.link.lock().await.take() {
            Self::teardown(link).await;
            log::info!("WebSocket disconnected from {}", self.url);
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Local echo-ack server; reports every text frame it receives.
    async fn ack_server() -> (String, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut count = 0u64;
            while let Some(Ok(msg)) = ws.next().await {
                if let tungstenite::Message::Text(text) = msg {
                    count += 1;
                    let _ = tx.send(text.to_string());
                    let ack = serde_json::json!({ "type": "ack", "messageId": count });
                    if ws
                        .send(tungstenite::Message::Text(ack.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });
        (format!("http://{addr}"), rx)
    }

    #[test]
    fn test_http_to_ws_scheme_https() {
        assert_eq!(http_to_ws_scheme("https://example.com"), "wss://example.com");
    }

    #[test]
    fn test_http_to_ws_scheme_http() {
        assert_eq!(
            http_to_ws_scheme("http://localhost:8765"),
            "ws://localhost:8765"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_ws_passthrough() {
        assert_eq!(
            http_to_ws_scheme("ws://robot.local:8765/hands"),
            "ws://robot.local:8765/hands"
        );
    }

    #[test]
    fn test_new_rejects_bad_address() {
        assert!(matches!(
            WebSocketSink::new("robot.local:8765"),
            Err(TransportError::InvalidAddress(_))
        ));
        assert!(matches!(
            WebSocketSink::new("ws://"),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let sink = WebSocketSink::new("ws://127.0.0.1:1").unwrap();
        assert!(matches!(
            sink.send("{}").await,
            Err(TransportError::ConnectFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        let sink = WebSocketSink::new("ws://127.0.0.1:1").unwrap();
        assert!(sink.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_messages_delivered_and_acked() {
        let (url, mut received) = ack_server().await;
        let sink = WebSocketSink::new(&url).unwrap();
        sink.connect().await.unwrap();

        sink.send(r#"{"timestamp":1.0,"leftHand":null,"rightHand":null}"#)
            .await
            .unwrap();
        sink.send(r#"{"timestamp":2.0,"leftHand":null,"rightHand":null}"#)
            .await
            .unwrap();

        assert!(received.recv().await.unwrap().contains("1.0"));
        assert!(received.recv().await.unwrap().contains("2.0"));

        for _ in 0..50 {
            if sink.acks_received() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.acks_received(), 2);
        sink.disconnect().await;
    }

    #[tokio::test]
    async fn test_send_fails_after_server_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.close(None).await;
        });

        let sink = WebSocketSink::new(&format!("ws://{addr}")).unwrap();
        sink.connect().await.unwrap();

        let mut failed = false;
        for _ in 0..50 {
            if sink.send("{}").await.is_err() {
                failed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(failed, "send should fail once the server has closed");
    }

    #[tokio::test]
    async fn test_disconnect_then_send_fails() {
        let (url, _received) = ack_server().await;
        let sink = WebSocketSink::new(&url).unwrap();
        sink.connect().await.unwrap();
        sink.disconnect().await;
        assert!(matches!(
            sink.send("{}").await,
            Err(TransportError::ConnectFailed(_))
        ));
    }
}
