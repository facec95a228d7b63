//! In-memory socket connector for tests
//!
//! Every call to [`MockConnector::connect`] is recorded and yields a
//! [`MockSocket`] whose events are fired by the test itself, so lifecycle
//! interleavings can be reproduced deterministically.

use crate::{Socket, SocketConnector, SocketEvent, SocketHandler, TransportError, TransportResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use url::Url;

#[derive(Debug, Clone, Default)]
enum ConnectBehavior {
    /// Wait for the test to fire events
    #[default]
    Manual,
    /// Report `Connected` before `connect` returns
    Immediate,
    /// Report `Disconnected(Some(err))` before `connect` returns
    Fail(TransportError),
    /// Return the error from `connect` without starting an attempt
    Refuse(TransportError),
}

/// Scriptable connector that records every connection attempt
#[derive(Debug, Default)]
pub struct MockConnector {
    behavior: ConnectBehavior,
    close_immediately: bool,
    next_id: AtomicU64,
    sockets: Mutex<Vec<Arc<MockSocket>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sockets report `Connected` synchronously from inside `connect`
    pub fn with_immediate_connect(mut self) -> Self {
        self.behavior = ConnectBehavior::Immediate;
        self
    }

    /// Sockets fail with `error` synchronously from inside `connect`
    pub fn with_connect_failure(mut self, error: TransportError) -> Self {
        self.behavior = ConnectBehavior::Fail(error);
        self
    }

    /// `connect` itself returns `error`
    pub fn with_connect_refused(mut self, error: TransportError) -> Self {
        self.behavior = ConnectBehavior::Refuse(error);
        self
    }

    /// `close` reports `Disconnected(None)` synchronously
    pub fn with_immediate_close(mut self) -> Self {
        self.close_immediately = true;
        self
    }

    /// Number of connection attempts started so far
    pub fn attempts(&self) -> usize {
        lock(&self.sockets).len()
    }

    /// All sockets created so far, oldest first
    pub fn sockets(&self) -> Vec<Arc<MockSocket>> {
        lock(&self.sockets).clone()
    }

    /// Most recently created socket
    pub fn last_socket(&self) -> Option<Arc<MockSocket>> {
        lock(&self.sockets).last().cloned()
    }

    /// Sockets created for `url`, oldest first
    pub fn sockets_for(&self, url: &Url) -> Vec<Arc<MockSocket>> {
        lock(&self.sockets)
            .iter()
            .filter(|s| s.url() == url)
            .cloned()
            .collect()
    }
}

impl SocketConnector for MockConnector {
    fn connect(
        &self,
        url: &Url,
        handler: Arc<dyn SocketHandler>,
    ) -> TransportResult<Arc<dyn Socket>> {
        if let ConnectBehavior::Refuse(error) = &self.behavior {
            return Err(error.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let socket = Arc::new(MockSocket {
            id,
            url: url.clone(),
            handler,
            close_immediately: self.close_immediately,
            state: Mutex::new(MockState::default()),
        });
        lock(&self.sockets).push(socket.clone());

        match &self.behavior {
            ConnectBehavior::Immediate => socket.fire_connected(),
            ConnectBehavior::Fail(error) => socket.fire_disconnected(Some(error.clone())),
            ConnectBehavior::Manual | ConnectBehavior::Refuse(_) => {}
        }

        Ok(socket)
    }

    fn name(&self) -> &str {
        "Mock"
    }
}

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    disconnected: bool,
    close_requests: usize,
    sent: Vec<String>,
    send_error: Option<TransportError>,
}

/// Socket whose events are driven by the test
pub struct MockSocket {
    id: u64,
    url: Url,
    handler: Arc<dyn SocketHandler>,
    close_immediately: bool,
    state: Mutex<MockState>,
}

impl std::fmt::Debug for MockSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSocket")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("state", &self.state)
            .finish()
    }
}

impl MockSocket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Payloads accepted by `send_text`, in order
    pub fn sent(&self) -> Vec<String> {
        lock(&self.state).sent.clone()
    }

    /// How many times `close` was called
    pub fn close_requests(&self) -> usize {
        lock(&self.state).close_requests
    }

    pub fn is_disconnected(&self) -> bool {
        lock(&self.state).disconnected
    }

    /// Make every later `send_text` on an open socket fail with `error`
    pub fn fail_sends(&self, error: TransportError) {
        lock(&self.state).send_error = Some(error);
    }

    /// Report a successful connection
    pub fn fire_connected(&self) {
        {
            let mut state = lock(&self.state);
            if state.disconnected || state.open {
                return;
            }
            state.open = true;
        }
        self.handler.on_event(SocketEvent::Connected);
    }

    /// Deliver an inbound text payload
    pub fn fire_text(&self, text: &str) {
        if !lock(&self.state).open {
            return;
        }
        self.handler.on_event(SocketEvent::Text(text.to_string()));
    }

    /// Report the end of the socket; only the first call has any effect
    pub fn fire_disconnected(&self, error: Option<TransportError>) {
        {
            let mut state = lock(&self.state);
            if state.disconnected {
                return;
            }
            state.disconnected = true;
            state.open = false;
        }
        self.handler.on_event(SocketEvent::Disconnected(error));
    }
}

impl Socket for MockSocket {
    fn send_text(&self, text: String) -> TransportResult<()> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        if let Some(error) = &state.send_error {
            return Err(error.clone());
        }
        state.sent.push(text);
        Ok(())
    }

    fn close(&self) {
        lock(&self.state).close_requests += 1;
        if self.close_immediately {
            self.fire_disconnected(None);
        }
    }

    fn socket_id(&self) -> String {
        format!("mock-{}", self.id)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
