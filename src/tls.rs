//! TLS configuration records.
//!
//! The core performs no TLS of its own for TCP transports; these records
//! travel from the application through the factory layer to whatever does
//! the handshake. The HTTP/3 engine is the exception: QUIC integrates
//! TLS 1.3, so [`ServerTlsConfig`]/[`ClientTlsConfig`] feed its embedded
//! TLS stack directly.

use std::path::PathBuf;

/// TLS material a server presents, plus the ALPN list it advertises.
#[derive(Debug, Clone)]
pub struct ServerTlsConfig {
    /// Path to the PEM-encoded certificate chain.
    pub cert_chain: PathBuf,
    /// Path to the PEM-encoded private key.
    pub private_key: PathBuf,
    /// Whether to demand a client certificate.
    pub require_client_auth: bool,
    /// ALPN protocol tokens advertised, in preference order.
    pub alpn: Vec<String>,
}

impl ServerTlsConfig {
    /// Creates a config from certificate and key paths; no client auth,
    /// empty ALPN list.
    pub fn new(cert_chain: impl Into<PathBuf>, private_key: impl Into<PathBuf>) -> Self {
        ServerTlsConfig {
            cert_chain: cert_chain.into(),
            private_key: private_key.into(),
            require_client_auth: false,
            alpn: Vec::new(),
        }
    }
}

/// How a client validates the peer certificate.
#[derive(Debug, Clone, Default)]
pub enum TrustAnchor {
    /// Use the system trust store.
    #[default]
    System,
    /// Use the given PEM CA bundle.
    CaFile(PathBuf),
    /// Skip verification. Test use only.
    Insecure,
}

/// TLS material and policy a client uses when connecting.
#[derive(Debug, Clone, Default)]
pub struct ClientTlsConfig {
    /// Certificate validation policy.
    pub trust: TrustAnchor,
    /// SNI override; defaults to the dialed host.
    pub server_name: Option<String>,
    /// ALPN protocol tokens offered, in preference order.
    pub alpn: Vec<String>,
    /// Optional client certificate (chain path, key path).
    pub client_cert: Option<(PathBuf, PathBuf)>,
}

/// What an established TCP transport reports about its TLS state.
///
/// The core consumes this passively: the HTTP/1.1 engine synthesizes
/// `:scheme` from `is_tls`, and the ALPN-multiplexing factory dispatches
/// on `alpn`.
#[derive(Debug, Clone, Default)]
pub struct TlsView {
    /// Whether the transport is TLS at all.
    pub is_tls: bool,
    /// The negotiated ALPN token, if any was negotiated.
    pub alpn: Option<String>,
    /// The SNI name the peer presented (servers) or dialed (clients).
    pub server_name: Option<String>,
}

impl TlsView {
    /// A plaintext transport: no TLS, no ALPN.
    pub fn plaintext() -> TlsView {
        TlsView::default()
    }

    /// A TLS transport that negotiated the given ALPN token.
    pub fn negotiated(alpn: impl Into<String>) -> TlsView {
        TlsView {
            is_tls: true,
            alpn: Some(alpn.into()),
            server_name: None,
        }
    }
}
