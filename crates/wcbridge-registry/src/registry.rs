//! Connection registry: at most one managed connection per endpoint
//!
//! Every lookup, insertion, and removal goes through one mutex around the
//! endpoint map. Socket operations and caller callbacks always run with the
//! lock released, so callbacks may call straight back into the registry
//! (for example `listen` again from inside `on_disconnect`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, trace, warn};
use wcbridge_transport::{SocketConnector, TransportError};

use crate::connection::{ConnectionHandlers, ConnectionId, ManagedConnection, OpenClaim};
use crate::endpoint::Endpoint;
use crate::error::{BridgeError, BridgeResult};
use crate::Transport;

type ConnectionMap = HashMap<Endpoint, ManagedConnection>;

type OnConnect = Arc<dyn Fn(&Endpoint) + Send + Sync>;
type OnDisconnect = Arc<dyn Fn(&Endpoint, Option<TransportError>) + Send + Sync>;
type OnText = Arc<dyn Fn(String, &Endpoint) + Send + Sync>;

/// Caller callbacks passed to [`Transport::listen`]
///
/// Bound to the connection created by that call. A `listen` that reuses an
/// existing connection drops them.
#[derive(Clone)]
pub struct ListenCallbacks {
    on_connect: OnConnect,
    on_disconnect: OnDisconnect,
    on_text: OnText,
}

impl ListenCallbacks {
    pub fn new<C, D, T>(on_connect: C, on_disconnect: D, on_text: T) -> Self
    where
        C: Fn(&Endpoint) + Send + Sync + 'static,
        D: Fn(&Endpoint, Option<TransportError>) + Send + Sync + 'static,
        T: Fn(String, &Endpoint) + Send + Sync + 'static,
    {
        Self {
            on_connect: Arc::new(on_connect),
            on_disconnect: Arc::new(on_disconnect),
            on_text: Arc::new(on_text),
        }
    }
}

impl std::fmt::Debug for ListenCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenCallbacks").finish_non_exhaustive()
    }
}

/// Registry of managed connections keyed by endpoint
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Bridge {
    connector: Arc<dyn SocketConnector>,
    connections: Arc<Mutex<ConnectionMap>>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("connector", &self.connector.name())
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl Bridge {
    /// Create an empty registry that opens sockets through `connector`
    pub fn new(connector: Arc<dyn SocketConnector>) -> Self {
        info!(connector = connector.name(), "Creating new bridge");
        Self {
            connector,
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of records currently held
    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Endpoints with a record, sorted
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = lock(&self.connections).keys().cloned().collect();
        endpoints.sort();
        endpoints
    }

    /// Handle to the record for `endpoint`, if any
    pub fn connection(&self, endpoint: &Endpoint) -> Option<ManagedConnection> {
        lock(&self.connections).get(endpoint).cloned()
    }

    /// Build a record whose disconnect handler removes it from this registry
    /// before telling the caller
    fn create_connection(
        &self,
        endpoint: &Endpoint,
        callbacks: ListenCallbacks,
    ) -> ManagedConnection {
        let id = ConnectionId::new();
        let registry = Arc::downgrade(&self.connections);
        let ListenCallbacks {
            on_connect,
            on_disconnect,
            on_text,
        } = callbacks;

        let connect_endpoint = endpoint.clone();
        let disconnect_endpoint = endpoint.clone();
        let text_endpoint = endpoint.clone();

        let handlers = ConnectionHandlers::new(
            move || on_connect(&connect_endpoint),
            move |error| {
                release(&registry, &disconnect_endpoint, id);
                on_disconnect(&disconnect_endpoint, error)
            },
            move |text| on_text(text, &text_endpoint),
        );

        ManagedConnection::new(id, endpoint.clone(), self.connector.clone(), handlers)
    }
}

impl Transport for Bridge {
    fn send(&self, endpoint: &Endpoint, text: String) -> BridgeResult<()> {
        let Some(connection) = self.connection(endpoint) else {
            warn!(endpoint = %endpoint, "Dropping send, no connection");
            return Err(BridgeError::NotConnected(endpoint.clone()));
        };

        connection.send(text).map_err(|e| match e {
            TransportError::NotOpen => {
                warn!(
                    endpoint = %endpoint,
                    connection_id = %connection.id(),
                    "Dropping send, connection not open"
                );
                BridgeError::NotConnected(endpoint.clone())
            }
            other => {
                warn!(
                    endpoint = %endpoint,
                    connection_id = %connection.id(),
                    error = %other,
                    "Send failed"
                );
                BridgeError::Transport(other)
            }
        })
    }

    fn listen(&self, endpoint: &Endpoint, callbacks: ListenCallbacks) {
        // Claimed under the registry lock: a record released after the lookup
        // is never reopened
        let (connection, claim) = {
            let mut connections = lock(&self.connections);
            let existing = connections
                .get(endpoint)
                .cloned()
                .map(|connection| {
                    let claim = connection.claim();
                    (connection, claim)
                });

            match existing {
                Some((connection, claim @ (OpenClaim::InUse | OpenClaim::Start(_)))) => {
                    trace!(
                        endpoint = %endpoint,
                        connection_id = %connection.id(),
                        "Reusing connection"
                    );
                    (connection, claim)
                }
                stale => {
                    if let Some((stale, _)) = stale {
                        // Disconnected but its removal has not run yet
                        debug!(
                            endpoint = %endpoint,
                            connection_id = %stale.id(),
                            "Replacing released connection"
                        );
                    }
                    let connection = self.create_connection(endpoint, callbacks);
                    let claim = connection.claim();
                    connections.insert(endpoint.clone(), connection.clone());
                    info!(
                        endpoint = %endpoint,
                        connection_id = %connection.id(),
                        "Registered connection"
                    );
                    (connection, claim)
                }
            }
        };

        if let OpenClaim::Start(generation) = claim {
            connection.start(generation);
        }
    }

    fn is_connected(&self, endpoint: &Endpoint) -> bool {
        self.connection(endpoint)
            .map(|connection| connection.is_open())
            .unwrap_or(false)
    }

    fn disconnect(&self, endpoint: &Endpoint) -> BridgeResult<()> {
        let Some(connection) = self.connection(endpoint) else {
            debug!(endpoint = %endpoint, "Disconnect ignored, no connection");
            return Err(BridgeError::NotConnected(endpoint.clone()));
        };

        connection.close();
        Ok(())
    }
}

/// Remove the record for `endpoint` only if it is still the one with `id`
fn release(registry: &Weak<Mutex<ConnectionMap>>, endpoint: &Endpoint, id: ConnectionId) {
    let Some(connections) = registry.upgrade() else {
        return;
    };
    let mut connections = lock(&connections);

    if connections.get(endpoint).map(ManagedConnection::id) == Some(id) {
        connections.remove(endpoint);
        info!(endpoint = %endpoint, connection_id = %id, "Released connection");
    } else {
        trace!(endpoint = %endpoint, connection_id = %id, "Connection already replaced");
    }
}

fn lock(connections: &Mutex<ConnectionMap>) -> MutexGuard<'_, ConnectionMap> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}
