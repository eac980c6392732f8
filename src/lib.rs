#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # polyhttp
//!
//! polyhttp is the sans-I/O protocol core of a multi-version HTTP toolkit.
//! It presents HTTP/1.1, HTTP/2 and HTTP/3 behind one event-driven,
//! stream-multiplexing surface: callers feed raw transport bytes (or QUIC
//! datagrams) in, submit HTTP-level actions, and drain HTTP-level events
//! and outbound bytes/datagrams back out. The core never touches a socket,
//! never blocks, and never spawns a task.
//!
//! ## Shape
//!
//! - [`proto::HttpProtocol`] is the version-agnostic contract: reserve a
//!   stream id, submit headers/data/reset/close, poll events.
//! - [`proto::TcpProtocol`] specializes it for byte-oriented transports
//!   (HTTP/1.1 and HTTP/2); [`proto::QuicProtocol`] for datagram transports
//!   with integrated TLS and timers (HTTP/3).
//! - [`factory`] builds fresh protocol instances per connection, including
//!   an ALPN-multiplexing factory that lets one listener accept either
//!   HTTP/1.1 or HTTP/2.
//! - [`registry`] maps `(version tag, role)` to a factory constructor so
//!   outer layers can resolve a user-requested version.
//!
//! Every engine degrades to the same vocabulary: HTTP/1.1 is "stream 1",
//! request/status lines become `:method`/`:scheme`/`:authority`/`:path`/
//! `:status` pseudo-headers, and version-specific wire error codes are
//! translated to one abstract [`ErrorCode`] set.
//!
//! ## Driving a connection
//!
//! The surface is pull-based on both sides. A typical pump:
//!
//! ```no_run
//! # #[cfg(feature = "http1")]
//! # fn demo() -> polyhttp::Result<()> {
//! use polyhttp::proto::{HttpProtocol, TcpProtocol};
//! use polyhttp::{Header, Role};
//!
//! let mut conn = polyhttp::proto::h1::Connection::new(Role::Client, false);
//! let stream_id = conn.reserve_stream_id()?;
//! conn.submit_headers(
//!     stream_id,
//!     &[
//!         Header::new(":method", "GET"),
//!         Header::new(":scheme", "http"),
//!         Header::new(":authority", "example.test"),
//!         Header::new(":path", "/"),
//!     ],
//!     true,
//! )?;
//! while let Some(bytes) = conn.poll_transmit() {
//!     // write `bytes` to the transport
//! }
//! // read from the transport, then:
//! // conn.recv_bytes(&incoming);
//! while let Some(event) = conn.poll_event() {
//!     // react to HeadersReceived / DataReceived / ...
//! }
//! # Ok(())
//! # }
//! ```

pub use crate::error::{Error, Result};
pub use crate::event::Event;
pub use crate::model::{Datagram, ErrorCode, ErrorCodes, Header, Role, StreamId, Version};

mod error;
mod event;
mod model;

pub mod factory;
pub mod proto;
pub mod registry;
pub mod tls;
