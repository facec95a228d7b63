//! End-to-end tests for the WebSocket socket against an in-process server

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;
use wcbridge_transport::{Socket, SocketConnector, SocketEvent, SocketHandler, TransportError};
use wcbridge_transport_websocket::{WebSocketConfig, WebSocketConnector};

/// Echo server: replies `echo:<text>`, closes the connection on `bye`
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Text(text) = message {
                        if text == "bye" {
                            let _ = ws.close(None).await;
                        } else {
                            let _ = ws.send(Message::Text(format!("echo:{}", text))).await;
                        }
                    }
                }
            });
        }
    });

    addr
}

fn recorder() -> (Arc<dyn SocketHandler>, mpsc::UnboundedReceiver<SocketEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: Arc<dyn SocketHandler> = Arc::new(move |event: SocketEvent| {
        let _ = tx.send(event);
    });
    (handler, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SocketEvent>) -> SocketEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for socket event")
        .expect("Event channel closed")
}

fn connector() -> WebSocketConnector {
    let config = WebSocketConfig::default().with_keep_alive(Duration::from_millis(50));
    WebSocketConnector::new(Arc::new(config)).unwrap()
}

#[tokio::test]
async fn test_text_round_trip_and_clean_close() {
    let addr = spawn_echo_server().await;
    let url = Url::parse(&format!("ws://{}/", addr)).unwrap();
    let (handler, mut events) = recorder();

    let socket = connector().connect(&url, handler).unwrap();
    assert_eq!(next_event(&mut events).await, SocketEvent::Connected);

    socket.send_text("hello".to_string()).unwrap();
    assert_eq!(
        next_event(&mut events).await,
        SocketEvent::Text("echo:hello".to_string())
    );

    // Keep-alive pings must not surface as events
    tokio::time::sleep(Duration::from_millis(150)).await;
    socket.send_text("again".to_string()).unwrap();
    assert_eq!(
        next_event(&mut events).await,
        SocketEvent::Text("echo:again".to_string())
    );

    socket.close();
    assert_eq!(next_event(&mut events).await, SocketEvent::Disconnected(None));
    assert_eq!(
        socket.send_text("late".to_string()),
        Err(TransportError::NotOpen)
    );
}

#[tokio::test]
async fn test_server_initiated_close() {
    let addr = spawn_echo_server().await;
    let url = Url::parse(&format!("ws://{}/", addr)).unwrap();
    let (handler, mut events) = recorder();

    let socket = connector().connect(&url, handler).unwrap();
    assert_eq!(next_event(&mut events).await, SocketEvent::Connected);

    socket.send_text("bye".to_string()).unwrap();
    assert_eq!(next_event(&mut events).await, SocketEvent::Disconnected(None));
}

#[tokio::test]
async fn test_connection_refused_reports_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("ws://{}/", addr)).unwrap();
    let (handler, mut events) = recorder();

    let _socket = connector().connect(&url, handler).unwrap();
    match next_event(&mut events).await {
        SocketEvent::Disconnected(Some(_)) => {}
        other => panic!("Expected failed disconnect, got {:?}", other),
    }
}

#[tokio::test]
async fn test_close_while_connecting() {
    // Accepts TCP but never answers the WebSocket handshake
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let url = Url::parse(&format!("ws://{}/", addr)).unwrap();
    let (handler, mut events) = recorder();

    let socket = connector().connect(&url, handler).unwrap();
    socket.close();

    assert_eq!(next_event(&mut events).await, SocketEvent::Disconnected(None));
}

#[tokio::test]
async fn test_connect_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let config = WebSocketConfig::default().with_connect_timeout(Duration::from_secs(1));
    let connector = WebSocketConnector::new(Arc::new(config)).unwrap();
    let url = Url::parse(&format!("ws://{}/", addr)).unwrap();
    let (handler, mut events) = recorder();

    let _socket = connector.connect(&url, handler).unwrap();
    assert_eq!(
        next_event(&mut events).await,
        SocketEvent::Disconnected(Some(TransportError::Timeout))
    );
}
