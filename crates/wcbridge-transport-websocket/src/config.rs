//! WebSocket socket configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as ProtocolConfig;
use wcbridge_transport::{TransportError, TransportResult};

/// WebSocket-specific configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Interval between keep-alive pings. Zero disables pings.
    #[serde(with = "duration_secs")]
    pub keep_alive_interval: Duration,

    /// Upper bound on TCP connect plus TLS and WebSocket handshakes
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Maximum inbound message size
    pub max_message_size: usize,

    /// Verify the server certificate on wss:// endpoints
    pub verify_server_cert: bool,
}

/// Helper module for serializing Duration as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_message_size: 16 * 1024 * 1024, // 16MB
            verify_server_cert: true,
        }
    }
}

impl WebSocketConfig {
    /// Configuration for local development (skip cert verification)
    pub fn insecure() -> Self {
        Self::default().with_insecure_skip_verify()
    }

    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> TransportResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TransportError::ConfigurationError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            TransportError::ConfigurationError(format!(
                "Failed to parse {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Set custom keep-alive interval
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set custom connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set maximum inbound message size
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Disable server certificate verification (INSECURE)
    pub fn with_insecure_skip_verify(mut self) -> Self {
        self.verify_server_cert = false;
        self
    }

    pub fn validate(&self) -> TransportResult<()> {
        if self.connect_timeout.is_zero() {
            return Err(TransportError::ConfigurationError(
                "Connect timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(TransportError::ConfigurationError(
                "Maximum message size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Keep-alive interval, or `None` when pings are disabled
    pub(crate) fn keep_alive(&self) -> Option<Duration> {
        if self.keep_alive_interval.is_zero() {
            None
        } else {
            Some(self.keep_alive_interval)
        }
    }

    /// Protocol limits handed to tungstenite
    pub(crate) fn protocol_config(&self) -> ProtocolConfig {
        let mut config = ProtocolConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config
    }

    /// Build rustls client config for wss:// endpoints
    pub(crate) fn build_tls_config(&self) -> Arc<rustls::ClientConfig> {
        ensure_crypto_provider();

        let client_crypto = if self.verify_server_cert {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        } else {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipVerification::new())
                .with_no_client_auth()
        };

        Arc::new(client_crypto)
    }
}

// Initialize rustls crypto provider
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("Rustls crypto provider already installed");
        }
    });
}

// Certificate verifier that skips verification (INSECURE)
#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
