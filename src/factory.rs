//! Per-connection protocol construction.
//!
//! A factory produces a fresh protocol instance for exactly one transport
//! connection, with the role fixed when the factory is created. Factories
//! declare the ALPN tokens they can speak so listeners and dialers can
//! advertise them; [`AlpnMux`] composes several TCP factories behind one
//! listener and dispatches on the token the TLS handshake negotiated.

use std::fmt;
#[cfg(feature = "http3")]
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use crate::error::Error;
use crate::model::Role;
#[cfg(feature = "http3")]
use crate::proto::QuicProtocol;
use crate::proto::TcpProtocol;
#[cfg(feature = "http3")]
use crate::tls::{ClientTlsConfig, ServerTlsConfig};
use crate::tls::TlsView;

/// Builds protocol instances for byte-oriented transports.
pub trait TcpFactory: Send + Sync + fmt::Debug {
    /// ALPN tokens this factory can produce, in preference order.
    fn alpn_protocols(&self) -> Vec<&'static str>;

    /// Creates a fresh protocol instance for an established transport.
    ///
    /// `tls` is what the transport reports after any handshake: whether
    /// TLS is in use and which ALPN token was negotiated.
    fn build(&self, tls: &TlsView) -> crate::Result<Box<dyn TcpProtocol>>;
}

/// Builds HTTP/3 client instances, one per destination.
#[cfg(feature = "http3")]
#[cfg_attr(docsrs, doc(cfg(feature = "http3")))]
pub trait QuicClientFactory: Send + Sync + fmt::Debug {
    /// ALPN tokens this factory offers.
    fn alpn_protocols(&self) -> Vec<&'static str>;

    /// Creates an engine dialing `remote` from `local`.
    fn build(
        &self,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> crate::Result<Box<dyn QuicProtocol>>;
}

/// Builds HTTP/3 server instances, one per incoming Initial packet.
#[cfg(feature = "http3")]
#[cfg_attr(docsrs, doc(cfg(feature = "http3")))]
pub trait QuicServerFactory: Send + Sync + fmt::Debug {
    /// ALPN tokens this factory accepts.
    fn alpn_protocols(&self) -> Vec<&'static str>;

    /// Creates an engine for a connection attempt arriving from `peer`.
    fn build(
        &self,
        local: SocketAddr,
        peer: SocketAddr,
    ) -> crate::Result<Box<dyn QuicProtocol>>;
}

/// Factory for HTTP/1.1 connections.
#[cfg(feature = "http1")]
#[cfg_attr(docsrs, doc(cfg(feature = "http1")))]
#[derive(Debug, Clone, Copy)]
pub struct Http1Factory {
    role: Role,
}

#[cfg(feature = "http1")]
impl Http1Factory {
    /// Creates a factory producing engines with the given role.
    pub fn new(role: Role) -> Http1Factory {
        Http1Factory { role }
    }
}

#[cfg(feature = "http1")]
impl TcpFactory for Http1Factory {
    fn alpn_protocols(&self) -> Vec<&'static str> {
        vec!["http/1.1"]
    }

    fn build(&self, tls: &TlsView) -> crate::Result<Box<dyn TcpProtocol>> {
        Ok(Box::new(crate::proto::h1::Connection::new(
            self.role, tls.is_tls,
        )))
    }
}

/// Factory for HTTP/2 connections.
#[cfg(feature = "http2")]
#[cfg_attr(docsrs, doc(cfg(feature = "http2")))]
#[derive(Debug, Clone, Copy)]
pub struct Http2Factory {
    role: Role,
}

#[cfg(feature = "http2")]
impl Http2Factory {
    /// Creates a factory producing engines with the given role.
    pub fn new(role: Role) -> Http2Factory {
        Http2Factory { role }
    }
}

#[cfg(feature = "http2")]
impl TcpFactory for Http2Factory {
    fn alpn_protocols(&self) -> Vec<&'static str> {
        vec!["h2"]
    }

    fn build(&self, _tls: &TlsView) -> crate::Result<Box<dyn TcpProtocol>> {
        Ok(Box::new(crate::proto::h2::Connection::new(self.role)))
    }
}

/// Chooses among child TCP factories based on the negotiated ALPN token.
///
/// Advertises the ordered union of the children's tokens. After the TLS
/// handshake, the first child whose token equals the negotiated one wins;
/// if ALPN was not negotiated at all, the first child is the pragmatic
/// default.
#[derive(Debug, Clone)]
pub struct AlpnMux {
    children: Vec<Arc<dyn TcpFactory>>,
}

impl AlpnMux {
    /// Creates a mux over the given children, in preference order.
    pub fn new(children: Vec<Arc<dyn TcpFactory>>) -> AlpnMux {
        AlpnMux { children }
    }
}

impl TcpFactory for AlpnMux {
    fn alpn_protocols(&self) -> Vec<&'static str> {
        let mut tokens = Vec::new();
        for child in &self.children {
            for token in child.alpn_protocols() {
                if !tokens.contains(&token) {
                    tokens.push(token);
                }
            }
        }
        tokens
    }

    fn build(&self, tls: &TlsView) -> crate::Result<Box<dyn TcpProtocol>> {
        let first = self
            .children
            .first()
            .ok_or_else(|| Error::new_internal("alpn mux has no children"))?;
        match tls.alpn {
            Some(ref token) => {
                let child = self
                    .children
                    .iter()
                    .find(|c| c.alpn_protocols().contains(&token.as_str()))
                    .ok_or_else(|| {
                        Error::new_protocol(format!(
                            "no protocol available for negotiated alpn {:?}",
                            token
                        ))
                    })?;
                debug!("alpn {:?} selects {:?}", token, child);
                child.build(tls)
            }
            None => {
                debug!("no alpn negotiated, falling back to {:?}", first);
                first.build(tls)
            }
        }
    }
}

/// Factory for outgoing HTTP/3 connections.
#[cfg(feature = "http3")]
#[cfg_attr(docsrs, doc(cfg(feature = "http3")))]
#[derive(Debug, Clone)]
pub struct Http3ClientFactory {
    tls: ClientTlsConfig,
}

#[cfg(feature = "http3")]
impl Http3ClientFactory {
    /// Creates a factory dialing with the given TLS config.
    pub fn new(tls: ClientTlsConfig) -> Http3ClientFactory {
        Http3ClientFactory { tls }
    }
}

#[cfg(feature = "http3")]
impl QuicClientFactory for Http3ClientFactory {
    fn alpn_protocols(&self) -> Vec<&'static str> {
        vec!["h3"]
    }

    fn build(
        &self,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> crate::Result<Box<dyn QuicProtocol>> {
        Ok(Box::new(crate::proto::h3::Connection::connect(
            local, remote, &self.tls,
        )?))
    }
}

/// Factory for incoming HTTP/3 connections.
#[cfg(feature = "http3")]
#[cfg_attr(docsrs, doc(cfg(feature = "http3")))]
#[derive(Debug, Clone)]
pub struct Http3ServerFactory {
    tls: ServerTlsConfig,
}

#[cfg(feature = "http3")]
impl Http3ServerFactory {
    /// Creates a factory answering with the given TLS config.
    pub fn new(tls: ServerTlsConfig) -> Http3ServerFactory {
        Http3ServerFactory { tls }
    }
}

#[cfg(feature = "http3")]
impl QuicServerFactory for Http3ServerFactory {
    fn alpn_protocols(&self) -> Vec<&'static str> {
        vec!["h3"]
    }

    fn build(
        &self,
        local: SocketAddr,
        peer: SocketAddr,
    ) -> crate::Result<Box<dyn QuicProtocol>> {
        Ok(Box::new(crate::proto::h3::Connection::accept(
            local, peer, &self.tls,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(all(feature = "http1", feature = "http2"))]
    #[test]
    fn mux_advertises_union_in_order() {
        let mux = AlpnMux::new(vec![
            Arc::new(Http2Factory::new(Role::Server)),
            Arc::new(Http1Factory::new(Role::Server)),
        ]);
        assert_eq!(mux.alpn_protocols(), vec!["h2", "http/1.1"]);
    }

    #[cfg(all(feature = "http1", feature = "http2"))]
    #[test]
    fn mux_without_alpn_falls_back_to_first_child() {
        let mux = AlpnMux::new(vec![
            Arc::new(Http1Factory::new(Role::Server)),
            Arc::new(Http2Factory::new(Role::Server)),
        ]);
        let conn = mux.build(&TlsView::plaintext()).unwrap();
        assert_eq!(conn.version(), crate::Version::Http1);
    }

    #[cfg(feature = "http1")]
    #[test]
    fn mux_rejects_unknown_token() {
        let mux = AlpnMux::new(vec![Arc::new(Http1Factory::new(Role::Server))]);
        let err = match mux.build(&TlsView::negotiated("h2")) {
            Ok(_) => panic!("expected build to fail for an unknown negotiated token"),
            Err(err) => err,
        };
        assert!(err.is_protocol());
    }
}
