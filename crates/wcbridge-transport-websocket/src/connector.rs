//! WebSocket connector: starts one socket task per connection attempt

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;
use wcbridge_transport::{Socket, SocketConnector, SocketHandler, TransportError, TransportResult};

use crate::config::WebSocketConfig;
use crate::socket::{self, WebSocketSocket};

/// WebSocket connector for establishing outgoing connections
pub struct WebSocketConnector {
    config: Arc<WebSocketConfig>,
    runtime: Handle,
}

impl std::fmt::Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector")
            .field("config", &self.config)
            .finish()
    }
}

impl WebSocketConnector {
    /// Create a connector bound to the current tokio runtime
    pub fn new(config: Arc<WebSocketConfig>) -> TransportResult<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            TransportError::ConfigurationError(
                "WebSocket connector must be created inside a tokio runtime".to_string(),
            )
        })?;
        Self::with_runtime(config, runtime)
    }

    /// Create a connector that spawns socket tasks on `runtime`
    pub fn with_runtime(config: Arc<WebSocketConfig>, runtime: Handle) -> TransportResult<Self> {
        config.validate()?;

        debug!("WebSocket connector created");

        Ok(Self { config, runtime })
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

impl SocketConnector for WebSocketConnector {
    fn connect(
        &self,
        url: &Url,
        handler: Arc<dyn SocketHandler>,
    ) -> TransportResult<Arc<dyn Socket>> {
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::ConfigurationError(format!(
                    "Unsupported WebSocket scheme: {}",
                    other
                )))
            }
        }

        let socket_id = format!("ws-{}", uuid::Uuid::new_v4());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));

        debug!(socket_id = %socket_id, url = %url, "Connecting to WebSocket server");

        self.runtime.spawn(socket::run(
            socket_id.clone(),
            url.clone(),
            self.config.clone(),
            commands_rx,
            open.clone(),
            handler,
        ));

        Ok(Arc::new(WebSocketSocket::new(
            socket_id,
            url.clone(),
            commands_tx,
            open,
        )))
    }

    fn name(&self) -> &str {
        "WebSocket"
    }
}
