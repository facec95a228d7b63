//! WebSocket socket: one task per connection, driven by a command channel

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream};
use tracing::{debug, trace, warn};
use url::Url;
use wcbridge_transport::{Socket, SocketEvent, SocketHandler, TransportError, TransportResult};

use crate::config::WebSocketConfig;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Requests from the socket handle to its task
#[derive(Debug)]
pub(crate) enum Command {
    Send(String),
    Close,
}

/// Handle to a WebSocket driven by a background task
///
/// Dropping the last handle closes the socket.
pub struct WebSocketSocket {
    /// Socket ID for logging
    socket_id: String,
    /// Endpoint this socket connects to
    url: Url,
    /// Channel to the socket task
    commands: mpsc::UnboundedSender<Command>,
    /// Set between `Connected` and `Disconnected`
    open: Arc<AtomicBool>,
}

impl std::fmt::Debug for WebSocketSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSocket")
            .field("socket_id", &self.socket_id)
            .field("url", &self.url.as_str())
            .field("open", &self.open.load(Ordering::SeqCst))
            .finish()
    }
}

impl WebSocketSocket {
    pub(crate) fn new(
        socket_id: String,
        url: Url,
        commands: mpsc::UnboundedSender<Command>,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self {
            socket_id,
            url,
            commands,
            open,
        }
    }
}

impl Socket for WebSocketSocket {
    fn send_text(&self, text: String) -> TransportResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        self.commands
            .send(Command::Send(text))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn close(&self) {
        debug!(socket_id = %self.socket_id, "Close requested");
        // Task already gone means Disconnected was already reported
        let _ = self.commands.send(Command::Close);
    }

    fn socket_id(&self) -> String {
        self.socket_id.clone()
    }
}

/// Socket task: connect, pump frames, report exactly one `Disconnected`
pub(crate) async fn run(
    socket_id: String,
    url: Url,
    config: Arc<WebSocketConfig>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    open: Arc<AtomicBool>,
    handler: Arc<dyn SocketHandler>,
) {
    let outcome = drive(&socket_id, &url, &config, &mut commands, &open, &*handler).await;
    open.store(false, Ordering::SeqCst);

    match &outcome {
        Ok(()) => debug!(socket_id = %socket_id, url = %url, "WebSocket closed"),
        Err(e) => warn!(socket_id = %socket_id, url = %url, error = %e, "WebSocket failed"),
    }

    handler.on_event(SocketEvent::Disconnected(outcome.err()));
}

async fn drive(
    socket_id: &str,
    url: &Url,
    config: &WebSocketConfig,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    open: &AtomicBool,
    handler: &dyn SocketHandler,
) -> TransportResult<()> {
    let attempt = connect(url, config);
    tokio::pin!(attempt);

    let ws_stream = loop {
        tokio::select! {
            result = &mut attempt => break result?,
            command = commands.recv() => match command {
                Some(Command::Send(_)) => {
                    warn!(socket_id = %socket_id, "Dropping text queued before connect");
                }
                Some(Command::Close) | None => {
                    debug!(socket_id = %socket_id, "Connect aborted by close request");
                    return Ok(());
                }
            },
        }
    };

    debug!(socket_id = %socket_id, url = %url, "WebSocket connected");
    open.store(true, Ordering::SeqCst);
    handler.on_event(SocketEvent::Connected);

    let (mut sink, mut source) = ws_stream.split();
    let mut keep_alive = config.keep_alive().map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut closing = false;

    loop {
        tokio::select! {
            command = commands.recv(), if !closing => match command {
                Some(Command::Send(text)) => {
                    trace!(socket_id = %socket_id, len = text.len(), "Sending text frame");
                    sink.send(Message::Text(text)).await.map_err(map_ws_error)?;
                }
                Some(Command::Close) | None => {
                    debug!(socket_id = %socket_id, "Starting close handshake");
                    closing = true;
                    match sink.send(Message::Close(None)).await {
                        Ok(()) => {}
                        Err(tungstenite::Error::ConnectionClosed)
                        | Err(tungstenite::Error::AlreadyClosed) => return Ok(()),
                        Err(e) => return Err(map_ws_error(e)),
                    }
                }
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    trace!(socket_id = %socket_id, len = text.len(), "Received text frame");
                    handler.on_event(SocketEvent::Text(text));
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => handler.on_event(SocketEvent::Text(text)),
                    Err(_) => warn!(socket_id = %socket_id, "Dropping non UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(_))) => {
                    // Pong is automatically handled by tungstenite
                    trace!(socket_id = %socket_id, "Received ping");
                }
                Some(Ok(Message::Pong(_))) => {
                    trace!(socket_id = %socket_id, "Received pong");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(socket_id = %socket_id, frame = ?frame, "WebSocket close received");
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(tungstenite::Error::ConnectionClosed))
                | Some(Err(tungstenite::Error::AlreadyClosed))
                | None => return Ok(()),
                Some(Err(e)) => return Err(map_ws_error(e)),
            },
            _ = tick(&mut keep_alive), if !closing => {
                trace!(socket_id = %socket_id, "Sending keep-alive ping");
                sink.send(Message::Ping(Vec::new())).await.map_err(map_ws_error)?;
            }
        }
    }
}

async fn connect(url: &Url, config: &WebSocketConfig) -> TransportResult<WsStream> {
    let connector = match url.scheme() {
        "wss" => Some(Connector::Rustls(config.build_tls_config())),
        _ => None,
    };

    let attempt = tokio_tungstenite::connect_async_tls_with_config(
        url.as_str(),
        Some(config.protocol_config()),
        false,
        connector,
    );

    let (ws_stream, response) = tokio::time::timeout(config.connect_timeout, attempt)
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(map_ws_error)?;

    trace!(url = %url, status = %response.status(), "WebSocket handshake complete");
    Ok(ws_stream)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn map_ws_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::ConnectionClosed
        }
        tungstenite::Error::Io(e) => TransportError::ConnectionError(e.to_string()),
        tungstenite::Error::Tls(e) => TransportError::TlsError(e.to_string()),
        tungstenite::Error::Protocol(e) => TransportError::ProtocolError(e.to_string()),
        other => TransportError::ConnectionError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            map_ws_error(tungstenite::Error::ConnectionClosed),
            TransportError::ConnectionClosed
        );
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            map_ws_error(tungstenite::Error::Io(io)),
            TransportError::ConnectionError(_)
        ));
    }

    #[tokio::test]
    async fn test_send_rejected_until_open() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let socket = WebSocketSocket::new(
            "ws-test".to_string(),
            Url::parse("ws://127.0.0.1:1").unwrap(),
            tx,
            open.clone(),
        );

        assert_eq!(socket.send_text("a".to_string()), Err(TransportError::NotOpen));

        open.store(true, Ordering::SeqCst);
        socket.send_text("b".to_string()).unwrap();
        socket.close();

        assert!(matches!(rx.recv().await, Some(Command::Send(text)) if text == "b"));
        assert!(matches!(rx.recv().await, Some(Command::Close)));

        drop(rx);
        assert_eq!(
            socket.send_text("c".to_string()),
            Err(TransportError::ConnectionClosed)
        );
    }
}
