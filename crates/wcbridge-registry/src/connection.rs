//! Managed connection: one socket's lifecycle behind a three-event model
//!
//! A [`ManagedConnection`] owns at most one live socket at a time. Socket
//! events are the only source of truth for [`ManagedConnection::is_open`]:
//! the state is updated first, then the event is forwarded to the handlers
//! bound at construction.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, trace, warn};
use uuid::Uuid;
use wcbridge_transport::{
    Socket, SocketConnector, SocketEvent, SocketHandler, TransportError, TransportResult,
};

use crate::endpoint::Endpoint;

/// Identity of one managed connection, distinct across records even for
/// the same endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

type ConnectFn = Box<dyn Fn() + Send + Sync>;
type DisconnectFn = Box<dyn Fn(Option<TransportError>) + Send + Sync>;
type TextFn = Box<dyn Fn(String) + Send + Sync>;

/// Event handlers bound to a connection for its whole lifetime
pub struct ConnectionHandlers {
    on_connect: ConnectFn,
    on_disconnect: DisconnectFn,
    on_text: TextFn,
}

impl ConnectionHandlers {
    pub fn new<C, D, T>(on_connect: C, on_disconnect: D, on_text: T) -> Self
    where
        C: Fn() + Send + Sync + 'static,
        D: Fn(Option<TransportError>) + Send + Sync + 'static,
        T: Fn(String) + Send + Sync + 'static,
    {
        Self {
            on_connect: Box::new(on_connect),
            on_disconnect: Box::new(on_disconnect),
            on_text: Box::new(on_text),
        }
    }
}

/// Result of trying to move a record to connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenClaim {
    /// Already connecting or open
    InUse,
    /// Reported disconnection; never reopened through a claim
    Released,
    /// Now connecting under this generation
    Start(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Never opened
    Idle,
    /// Attempt started, no outcome yet
    Connecting,
    Open,
    /// Socket reported disconnection and was released
    Closed,
}

struct ConnectionState {
    phase: Phase,
    /// Bumped on every `open`; events from older sockets are ignored
    generation: u64,
    socket: Option<Arc<dyn Socket>>,
    /// `close` arrived before the socket handle was stored
    close_requested: bool,
}

struct ConnectionInner {
    id: ConnectionId,
    endpoint: Endpoint,
    connector: Arc<dyn SocketConnector>,
    handlers: ConnectionHandlers,
    state: Mutex<ConnectionState>,
}

/// Wrapper around one endpoint's socket
///
/// Cloning yields another handle to the same connection; use
/// [`ManagedConnection::id`] or [`ManagedConnection::ptr_eq`] for identity.
#[derive(Clone)]
pub struct ManagedConnection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("phase", &self.inner.lock_state().phase)
            .finish()
    }
}

impl ManagedConnection {
    pub fn new(
        id: ConnectionId,
        endpoint: Endpoint,
        connector: Arc<dyn SocketConnector>,
        handlers: ConnectionHandlers,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                endpoint,
                connector,
                handlers,
                state: Mutex::new(ConnectionState {
                    phase: Phase::Idle,
                    generation: 0,
                    socket: None,
                    close_requested: false,
                }),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// True between the socket's `Connected` and `Disconnected` events
    pub fn is_open(&self) -> bool {
        self.inner.lock_state().phase == Phase::Open
    }

    /// True once the socket has reported disconnection and been released
    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().phase == Phase::Closed
    }

    /// Same underlying record
    pub fn ptr_eq(&self, other: &ManagedConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start connecting unless an attempt is already in flight or open
    ///
    /// Returns immediately. If the connector cannot start an attempt at all,
    /// the failure is reported through the disconnect handler.
    pub fn open(&self) {
        if let OpenClaim::Start(generation) = self.begin(true) {
            self.start(generation);
        }
    }

    /// Move an idle record to connecting without calling the connector
    ///
    /// A record that already reported disconnection is refused. Callers pair
    /// a [`OpenClaim::Start`] with [`ManagedConnection::start`].
    pub(crate) fn claim(&self) -> OpenClaim {
        self.begin(false)
    }

    fn begin(&self, reopen: bool) -> OpenClaim {
        let mut state = self.inner.lock_state();
        match state.phase {
            Phase::Connecting | Phase::Open => {
                trace!(
                    connection_id = %self.inner.id,
                    "Open ignored, already {:?}",
                    state.phase
                );
                return OpenClaim::InUse;
            }
            Phase::Closed if !reopen => return OpenClaim::Released,
            Phase::Idle | Phase::Closed => {}
        }
        state.phase = Phase::Connecting;
        state.generation += 1;
        state.close_requested = false;
        OpenClaim::Start(state.generation)
    }

    /// Run the connection attempt claimed for `generation`
    pub(crate) fn start(&self, generation: u64) {
        debug!(
            connection_id = %self.inner.id,
            endpoint = %self.inner.endpoint,
            connector = self.inner.connector.name(),
            "Opening connection"
        );

        let relay = Arc::new(EventRelay {
            connection: Arc::downgrade(&self.inner),
            generation,
        });

        // The connector may report events before returning
        match self.inner.connector.connect(self.inner.endpoint.url(), relay) {
            Ok(socket) => {
                let close_now = {
                    let mut state = self.inner.lock_state();
                    let live = state.generation == generation
                        && matches!(state.phase, Phase::Connecting | Phase::Open);
                    if !live {
                        trace!(
                            connection_id = %self.inner.id,
                            "Attempt ended before connect returned"
                        );
                        return;
                    }
                    trace!(
                        connection_id = %self.inner.id,
                        socket_id = %socket.socket_id(),
                        "Socket attached"
                    );
                    state.socket = Some(socket.clone());
                    state.close_requested
                };
                if close_now {
                    socket.close();
                }
            }
            Err(error) => {
                warn!(
                    connection_id = %self.inner.id,
                    endpoint = %self.inner.endpoint,
                    error = %error,
                    "Failed to start connection attempt"
                );
                self.inner
                    .handle_event(generation, SocketEvent::Disconnected(Some(error)));
            }
        }
    }

    /// Transmit `text` if the connection is open
    pub fn send(&self, text: String) -> TransportResult<()> {
        let socket = {
            let state = self.inner.lock_state();
            match (&state.phase, &state.socket) {
                (Phase::Open, Some(socket)) => socket.clone(),
                _ => return Err(TransportError::NotOpen),
            }
        };
        trace!(connection_id = %self.inner.id, len = text.len(), "Sending text");
        socket.send_text(text)
    }

    /// Request graceful closure; the disconnect handler runs once the socket
    /// reports it
    pub fn close(&self) {
        let socket = {
            let mut state = self.inner.lock_state();
            match state.phase {
                Phase::Idle | Phase::Closed => {
                    trace!(connection_id = %self.inner.id, "Close ignored, not connected");
                    return;
                }
                Phase::Connecting | Phase::Open => {
                    state.close_requested = true;
                    state.socket.clone()
                }
            }
        };

        debug!(
            connection_id = %self.inner.id,
            endpoint = %self.inner.endpoint,
            "Closing connection"
        );
        if let Some(socket) = socket {
            socket.close();
        }
    }
}

impl ConnectionInner {
    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_event(&self, generation: u64, event: SocketEvent) {
        match event {
            SocketEvent::Connected => {
                {
                    let mut state = self.lock_state();
                    if state.generation != generation || state.phase != Phase::Connecting {
                        trace!(connection_id = %self.id, "Ignoring stale connect event");
                        return;
                    }
                    state.phase = Phase::Open;
                }
                debug!(connection_id = %self.id, endpoint = %self.endpoint, "Connection open");
                (self.handlers.on_connect)();
            }
            SocketEvent::Text(text) => {
                {
                    let state = self.lock_state();
                    if state.generation != generation || state.phase != Phase::Open {
                        trace!(connection_id = %self.id, "Ignoring stale text event");
                        return;
                    }
                }
                (self.handlers.on_text)(text);
            }
            SocketEvent::Disconnected(error) => {
                let socket = {
                    let mut state = self.lock_state();
                    if state.generation != generation || state.phase == Phase::Closed {
                        trace!(connection_id = %self.id, "Ignoring stale disconnect event");
                        return;
                    }
                    state.phase = Phase::Closed;
                    state.close_requested = false;
                    state.socket.take()
                };
                drop(socket);

                match &error {
                    None => debug!(
                        connection_id = %self.id,
                        endpoint = %self.endpoint,
                        "Connection closed"
                    ),
                    Some(e) => debug!(
                        connection_id = %self.id,
                        endpoint = %self.endpoint,
                        error = %e,
                        "Connection lost"
                    ),
                }
                (self.handlers.on_disconnect)(error);
            }
        }
    }
}

/// Socket handler installed per attempt
///
/// Holds the connection weakly so a socket never keeps its owner alive.
struct EventRelay {
    connection: Weak<ConnectionInner>,
    generation: u64,
}

impl SocketHandler for EventRelay {
    fn on_event(&self, event: SocketEvent) {
        match self.connection.upgrade() {
            Some(connection) => connection.handle_event(self.generation, event),
            None => trace!("Dropping {} for released connection", event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wcbridge_transport::mock::MockConnector;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Seen {
        Connect,
        Disconnect(Option<TransportError>),
        Text(String),
    }

    fn connection(connector: Arc<MockConnector>) -> (ManagedConnection, Arc<Mutex<Vec<Seen>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (seen.clone(), seen.clone(), seen.clone());
        let handlers = ConnectionHandlers::new(
            move || a.lock().unwrap().push(Seen::Connect),
            move |error| b.lock().unwrap().push(Seen::Disconnect(error)),
            move |text| c.lock().unwrap().push(Seen::Text(text)),
        );
        let endpoint: Endpoint = "wss://bridge.example.com".parse().unwrap();
        (
            ManagedConnection::new(ConnectionId::new(), endpoint, connector, handlers),
            seen,
        )
    }

    #[test]
    fn test_open_is_idempotent() {
        let connector = Arc::new(MockConnector::new());
        let (conn, _) = connection(connector.clone());

        conn.open();
        conn.open();
        assert_eq!(connector.attempts(), 1);
        assert!(!conn.is_open());

        connector.last_socket().unwrap().fire_connected();
        conn.open();
        assert_eq!(connector.attempts(), 1);
        assert!(conn.is_open());
    }

    #[test]
    fn test_state_updated_before_handlers_run() {
        let connector = Arc::new(MockConnector::new());
        let slot: Arc<Mutex<Option<ManagedConnection>>> = Arc::new(Mutex::new(None));
        let observed = Arc::new(Mutex::new(Vec::new()));

        let (s1, o1) = (slot.clone(), observed.clone());
        let (s2, o2) = (slot.clone(), observed.clone());
        let handlers = ConnectionHandlers::new(
            move || {
                let open = s1.lock().unwrap().as_ref().unwrap().is_open();
                o1.lock().unwrap().push(open);
            },
            move |_| {
                let open = s2.lock().unwrap().as_ref().unwrap().is_open();
                o2.lock().unwrap().push(open);
            },
            |_| {},
        );
        let endpoint: Endpoint = "wss://bridge.example.com".parse().unwrap();
        let conn =
            ManagedConnection::new(ConnectionId::new(), endpoint, connector.clone(), handlers);
        *slot.lock().unwrap() = Some(conn.clone());

        conn.open();
        let socket = connector.last_socket().unwrap();
        socket.fire_connected();
        socket.fire_disconnected(None);

        assert_eq!(*observed.lock().unwrap(), vec![true, false]);
        slot.lock().unwrap().take();
    }

    #[test]
    fn test_send_only_while_open() {
        let connector = Arc::new(MockConnector::new());
        let (conn, _) = connection(connector.clone());

        assert_eq!(conn.send("idle".to_string()), Err(TransportError::NotOpen));

        conn.open();
        assert_eq!(conn.send("connecting".to_string()), Err(TransportError::NotOpen));

        let socket = connector.last_socket().unwrap();
        socket.fire_connected();
        conn.send("open".to_string()).unwrap();

        socket.fire_disconnected(None);
        assert_eq!(conn.send("closed".to_string()), Err(TransportError::NotOpen));
        assert_eq!(socket.sent(), vec!["open".to_string()]);
    }

    #[test]
    fn test_events_forwarded_in_order() {
        let connector = Arc::new(MockConnector::new());
        let (conn, seen) = connection(connector.clone());

        conn.open();
        let socket = connector.last_socket().unwrap();
        socket.fire_connected();
        socket.fire_text("one");
        socket.fire_text("two");
        conn.close();
        assert_eq!(socket.close_requests(), 1);
        assert!(conn.is_open());
        socket.fire_disconnected(None);

        assert!(conn.is_closed());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Seen::Connect,
                Seen::Text("one".to_string()),
                Seen::Text("two".to_string()),
                Seen::Disconnect(None),
            ]
        );
    }

    #[test]
    fn test_close_while_connecting() {
        let connector = Arc::new(MockConnector::new().with_immediate_close());
        let (conn, seen) = connection(connector.clone());

        conn.close();
        assert_eq!(connector.attempts(), 0);

        conn.open();
        conn.close();
        assert_eq!(*seen.lock().unwrap(), vec![Seen::Disconnect(None)]);
        assert!(conn.is_closed());
    }

    #[test]
    fn test_immediate_connect_and_failure() {
        let connector = Arc::new(MockConnector::new().with_immediate_connect());
        let (conn, seen) = connection(connector.clone());
        conn.open();
        assert!(conn.is_open());
        assert_eq!(*seen.lock().unwrap(), vec![Seen::Connect]);

        let error = TransportError::ConnectionError("refused".to_string());
        let connector = Arc::new(MockConnector::new().with_connect_failure(error.clone()));
        let (conn, seen) = connection(connector.clone());
        conn.open();
        assert!(conn.is_closed());
        assert_eq!(*seen.lock().unwrap(), vec![Seen::Disconnect(Some(error))]);
    }

    #[test]
    fn test_refused_attempt_reports_disconnect() {
        let connector =
            Arc::new(MockConnector::new().with_connect_refused(TransportError::Timeout));
        let (conn, seen) = connection(connector.clone());

        conn.open();
        assert!(conn.is_closed());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Seen::Disconnect(Some(TransportError::Timeout))]
        );
    }

    #[test]
    fn test_claim_refuses_released_record() {
        let connector = Arc::new(MockConnector::new());
        let (conn, seen) = connection(connector.clone());
        assert_eq!(conn.endpoint().as_str(), "wss://bridge.example.com/");

        let OpenClaim::Start(generation) = conn.claim() else {
            panic!("idle record must be claimable");
        };
        assert_eq!(conn.claim(), OpenClaim::InUse);
        assert_eq!(connector.attempts(), 0);

        conn.start(generation);
        let socket = connector.last_socket().unwrap();
        socket.fire_connected();
        assert_eq!(conn.claim(), OpenClaim::InUse);
        socket.fire_disconnected(Some(TransportError::Timeout));

        assert_eq!(conn.claim(), OpenClaim::Released);
        assert!(conn.is_closed());
        assert_eq!(connector.attempts(), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Seen::Connect, Seen::Disconnect(Some(TransportError::Timeout))]
        );
    }

    #[test]
    fn test_reopen_after_disconnect() {
        let connector = Arc::new(MockConnector::new());
        let (conn, seen) = connection(connector.clone());

        conn.open();
        let first = connector.last_socket().unwrap();
        first.fire_connected();
        first.fire_disconnected(None);

        conn.open();
        assert_eq!(connector.attempts(), 2);
        let second = connector.last_socket().unwrap();

        assert_ne!(first.id(), second.id());
        second.fire_connected();
        assert!(conn.is_open());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Seen::Connect, Seen::Disconnect(None), Seen::Connect]
        );
    }

    #[test]
    fn test_events_after_drop_are_ignored() {
        let connector = Arc::new(MockConnector::new());
        let (conn, seen) = connection(connector.clone());
        conn.open();
        drop(conn);

        let socket = connector.last_socket().unwrap();
        socket.fire_connected();
        socket.fire_disconnected(None);
        assert!(seen.lock().unwrap().is_empty());
    }
}
