//! wcbridge CLI - talk to a bridge server from the terminal
//!
//! Opens one connection through the registry, prints every text frame it
//! receives, and sends each line typed on stdin.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wcbridge_registry::{Bridge, Endpoint, ListenCallbacks, Transport};
use wcbridge_transport::TransportError;
use wcbridge_transport_websocket::{WebSocketConfig, WebSocketConnector};

const VERSION: &str = concat!(
    env!("GIT_TAG"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// wcbridge - Bridge transport for peer pairing sessions
#[derive(Parser, Debug)]
#[command(name = "wcbridge")]
#[command(about = "wcbridge - Bridge transport for peer pairing sessions")]
#[command(version = VERSION)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to an endpoint, print received text, send stdin lines
    #[command(long_about = r#"
Connect to a bridge endpoint and keep the connection open until the server
closes it, stdin ends, or Ctrl+C is pressed. Every text frame received is
printed on its own line; every line read from stdin is sent as a text frame.

EXAMPLES:
  # Listen on a public bridge
  wcbridge listen wss://bridge.example.com

  # Send a message as soon as the connection opens
  wcbridge listen ws://127.0.0.1:8080 --send '{"topic":"abc"}'

ENVIRONMENT VARIABLES:
  WCBRIDGE_URL     Endpoint to connect to
  WCBRIDGE_CONFIG  WebSocket config file (JSON)
    "#)]
    Listen {
        /// Endpoint URL (ws:// or wss://)
        #[arg(env = "WCBRIDGE_URL")]
        url: String,

        /// WebSocket config file (JSON); flags below override it
        #[arg(long, env = "WCBRIDGE_CONFIG")]
        config: Option<PathBuf>,

        /// Keep-alive ping interval in seconds (0 disables pings)
        #[arg(long)]
        keep_alive: Option<u64>,

        /// Connect timeout in seconds
        #[arg(long)]
        connect_timeout: Option<u64>,

        /// Skip certificate verification (insecure, for development only)
        #[arg(long)]
        insecure: bool,

        /// Text to send once connected (repeatable)
        #[arg(long = "send")]
        messages: Vec<String>,
    },
}

/// Events surfaced by the bridge callbacks
#[derive(Debug)]
enum BridgeEvent {
    Connected,
    Disconnected(Option<TransportError>),
    Text(String),
}

/// `--send` messages held until the connection opens
#[derive(Debug, Default)]
struct Outbox {
    messages: Vec<String>,
    connected: bool,
    disconnect_on_connect: bool,
}

impl Outbox {
    fn new(messages: Vec<String>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Messages to send now, and whether to disconnect right after them
    fn connected(&mut self) -> (Vec<String>, bool) {
        self.connected = true;
        (std::mem::take(&mut self.messages), self.disconnect_on_connect)
    }

    /// True if the connection can be closed now; otherwise the close waits
    /// for the queued messages
    fn input_closed(&mut self) -> bool {
        if self.connected {
            return true;
        }
        self.disconnect_on_connect = true;
        false
    }
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn load_config(
    path: Option<PathBuf>,
    keep_alive: Option<u64>,
    connect_timeout: Option<u64>,
    insecure: bool,
) -> Result<WebSocketConfig> {
    let mut config = match path {
        Some(path) => WebSocketConfig::from_json_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => WebSocketConfig::default(),
    };

    if let Some(secs) = keep_alive {
        config = config.with_keep_alive(Duration::from_secs(secs));
    }
    if let Some(secs) = connect_timeout {
        config = config.with_connect_timeout(Duration::from_secs(secs));
    }
    if insecure {
        warn!("Certificate verification disabled");
        config = config.with_insecure_skip_verify();
    }

    config.validate().context("Invalid WebSocket configuration")?;
    Ok(config)
}

async fn run_listen(
    endpoint: Endpoint,
    config: WebSocketConfig,
    messages: Vec<String>,
) -> Result<()> {
    let connector =
        WebSocketConnector::new(Arc::new(config)).context("Failed to create WebSocket connector")?;
    let bridge = Bridge::new(Arc::new(connector));

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (connect_tx, disconnect_tx, text_tx) = (event_tx.clone(), event_tx.clone(), event_tx);
    bridge.listen(
        &endpoint,
        ListenCallbacks::new(
            move |_: &Endpoint| {
                let _ = connect_tx.send(BridgeEvent::Connected);
            },
            move |_: &Endpoint, error| {
                let _ = disconnect_tx.send(BridgeEvent::Disconnected(error));
            },
            move |text, _: &Endpoint| {
                let _ = text_tx.send(BridgeEvent::Text(text));
            },
        ),
    );

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut outbox = Outbox::new(messages);

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(BridgeEvent::Connected) => {
                    info!(endpoint = %endpoint, "Connected");
                    let (messages, disconnect) = outbox.connected();
                    for message in messages {
                        bridge.send(&endpoint, message).context("Failed to send message")?;
                    }
                    if disconnect {
                        let _ = bridge.disconnect(&endpoint);
                    }
                }
                Some(BridgeEvent::Text(text)) => println!("{}", text),
                Some(BridgeEvent::Disconnected(None)) => {
                    info!(endpoint = %endpoint, "Disconnected");
                    return Ok(());
                }
                Some(BridgeEvent::Disconnected(Some(e))) => {
                    anyhow::bail!("Connection to {} lost: {}", endpoint, e);
                }
                None => return Ok(()),
            },
            line = stdin.next_line(), if stdin_open => match line.context("Failed to read stdin")? {
                Some(line) if line.is_empty() => {}
                Some(line) => {
                    if let Err(e) = bridge.send(&endpoint, line) {
                        warn!("Not sent: {}", e);
                    }
                }
                None => {
                    stdin_open = false;
                    if outbox.input_closed() {
                        info!("stdin closed, disconnecting");
                        let _ = bridge.disconnect(&endpoint);
                    } else {
                        info!("stdin closed, disconnecting once queued messages are sent");
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                if bridge.disconnect(&endpoint).is_err() {
                    return Ok(());
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Listen {
            url,
            config,
            keep_alive,
            connect_timeout,
            insecure,
            messages,
        } => {
            let endpoint: Endpoint = url
                .parse()
                .with_context(|| format!("Invalid endpoint: {}", url))?;
            let config = load_config(config, keep_alive, connect_timeout, insecure)?;

            if let Err(e) = run_listen(endpoint, config, messages).await {
                error!("{:#}", e);
                return Err(e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_listen() {
        let cli = Cli::parse_from([
            "wcbridge",
            "-v",
            "listen",
            "wss://bridge.example.com",
            "--keep-alive",
            "0",
            "--send",
            "a",
            "--send",
            "b",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Listen {
                url,
                keep_alive,
                messages,
                ..
            } => {
                assert_eq!(url, "wss://bridge.example.com");
                assert_eq!(keep_alive, Some(0));
                assert_eq!(messages, vec!["a".to_string(), "b".to_string()]);
            }
        }
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = load_config(None, Some(0), Some(3), true).unwrap();
        assert_eq!(config.keep_alive_interval, Duration::ZERO);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert!(!config.verify_server_cert);

        assert!(load_config(None, None, Some(0), false).is_err());
    }

    #[test]
    fn test_input_closed_before_connect_keeps_queued_messages() {
        let mut outbox = Outbox::new(vec!["a".to_string(), "b".to_string()]);

        assert!(!outbox.input_closed());
        let (messages, disconnect) = outbox.connected();
        assert_eq!(messages, vec!["a".to_string(), "b".to_string()]);
        assert!(disconnect);
    }

    #[test]
    fn test_input_closed_after_connect_disconnects_now() {
        let mut outbox = Outbox::new(vec!["a".to_string()]);

        let (messages, disconnect) = outbox.connected();
        assert_eq!(messages.len(), 1);
        assert!(!disconnect);
        assert!(outbox.input_closed());
        assert!(outbox.connected().0.is_empty());
    }
}
