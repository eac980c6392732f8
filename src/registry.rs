//! Process-wide protocol registry.
//!
//! Maps a `(version tag, role)` pair to a factory constructor so outer
//! layers (CLIs, connection façades) can resolve a user-requested version.
//! Populated by explicit [`register`] calls during process init —
//! typically just [`register_defaults`] — and treated as immutable
//! afterwards.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use crate::factory::TcpFactory;
#[cfg(feature = "http3")]
use crate::factory::{QuicClientFactory, QuicServerFactory};
use crate::model::Role;
#[cfg(feature = "http3")]
use crate::tls::{ClientTlsConfig, ServerTlsConfig};

/// A factory constructor registered for one `(version tag, role)` pair.
#[derive(Debug, Clone, Copy)]
pub enum Constructor {
    /// Byte-oriented versions; invoked with the role the entry was
    /// registered under.
    Tcp(fn(Role) -> Arc<dyn TcpFactory>),
    /// HTTP/3 dialing side; invoked with the client TLS config.
    #[cfg(feature = "http3")]
    #[cfg_attr(docsrs, doc(cfg(feature = "http3")))]
    QuicClient(fn(&ClientTlsConfig) -> Arc<dyn QuicClientFactory>),
    /// HTTP/3 listening side; invoked with the server TLS config.
    #[cfg(feature = "http3")]
    #[cfg_attr(docsrs, doc(cfg(feature = "http3")))]
    QuicServer(fn(&ServerTlsConfig) -> Arc<dyn QuicServerFactory>),
}

fn registry() -> &'static RwLock<HashMap<(String, Role), Constructor>> {
    static REGISTRY: OnceLock<RwLock<HashMap<(String, Role), Constructor>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers a constructor for a version tag and role. A later
/// registration for the same pair replaces the earlier one.
pub fn register(version: &str, role: Role, constructor: Constructor) {
    let mut map = registry().write().expect("protocol registry poisoned");
    if map
        .insert((version.to_owned(), role), constructor)
        .is_some()
    {
        debug!("replaced registration for {} ({:?})", version, role);
    }
}

/// Looks up the constructor registered for a version tag and role.
pub fn lookup(version: &str, role: Role) -> Option<Constructor> {
    registry()
        .read()
        .expect("protocol registry poisoned")
        .get(&(version.to_owned(), role))
        .copied()
}

/// The version tags currently registered for a role.
pub fn registered_versions(role: Role) -> Vec<String> {
    let map = registry().read().expect("protocol registry poisoned");
    let mut versions: Vec<String> = map
        .keys()
        .filter(|(_, r)| *r == role)
        .map(|(v, _)| v.clone())
        .collect();
    versions.sort();
    versions
}

/// Installs the built-in factories for every compiled-in version, both
/// roles. Idempotent.
pub fn register_defaults() {
    #[cfg(feature = "http1")]
    {
        use crate::factory::Http1Factory;
        let ctor: fn(Role) -> Arc<dyn TcpFactory> = |role| Arc::new(Http1Factory::new(role));
        register("http/1.1", Role::Client, Constructor::Tcp(ctor));
        register("http/1.1", Role::Server, Constructor::Tcp(ctor));
    }
    #[cfg(feature = "http2")]
    {
        use crate::factory::Http2Factory;
        let ctor: fn(Role) -> Arc<dyn TcpFactory> = |role| Arc::new(Http2Factory::new(role));
        register("h2", Role::Client, Constructor::Tcp(ctor));
        register("h2", Role::Server, Constructor::Tcp(ctor));
    }
    #[cfg(feature = "http3")]
    {
        use crate::factory::{Http3ClientFactory, Http3ServerFactory};
        register(
            "h3",
            Role::Client,
            Constructor::QuicClient(|tls| Arc::new(Http3ClientFactory::new(tls.clone()))),
        );
        register(
            "h3",
            Role::Server,
            Constructor::QuicServer(|tls| Arc::new(Http3ServerFactory::new(tls.clone()))),
        );
    }
}
