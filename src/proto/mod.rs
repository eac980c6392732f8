//! The version-agnostic protocol contracts and their transport
//! specializations.
//!
//! Two orthogonal capabilities compose here: [`HttpProtocol`] is the
//! submit-actions / poll-events surface every version shares, while
//! [`TcpProtocol`] and [`QuicProtocol`] add the transport shape (a byte
//! stream or a datagram flow with timers). A concrete engine implements
//! `HttpProtocol` plus exactly one of the transport traits.
//!
//! Everything here is synchronous and non-suspending: `poll_event`
//! returning `None` is the core's only way of saying "feed me more input";
//! it never waits.

use std::io;
use std::net::SocketAddr;
#[cfg(feature = "http3")]
use std::time::Instant;

use bytes::Bytes;

use crate::event::Event;
use crate::model::{ErrorCode, ErrorCodes, StreamId, Version};
#[cfg(feature = "http3")]
use crate::model::Datagram;
use crate::Header;

#[cfg(feature = "http1")]
pub mod h1;
#[cfg(feature = "http2")]
pub mod h2;
#[cfg(feature = "http3")]
pub mod h3;

/// The version-agnostic contract every protocol engine fulfills.
///
/// A protocol instance is created by a factory for a specific role and
/// lives for exactly one transport connection. It becomes terminal once
/// [`Event::ConnectionTerminated`] has been emitted; after that
/// `poll_event` returns `None` forever and submits fail.
pub trait HttpProtocol: Send {
    /// The wire version this engine speaks.
    fn version(&self) -> Version;

    /// Whether multiple streams can be in flight at once.
    fn is_multiplexed(&self) -> bool {
        !matches!(self.version(), Version::Http1)
    }

    /// This version's wire error-code table.
    fn error_codes(&self) -> ErrorCodes {
        self.version().error_codes()
    }

    /// Whether the caller may open a new stream right now.
    fn is_available(&self) -> bool;

    /// Reserves and returns the next usable stream id.
    ///
    /// The id is reserved at allocation: two successive calls return
    /// distinct ids even with no submit in between. Fails with a
    /// not-available error when no stream can be opened (HTTP/1.1 busy,
    /// GOAWAY seen, id space exhausted, concurrency limit reached).
    fn reserve_stream_id(&mut self) -> crate::Result<StreamId>;

    /// Submits a header block (request, response, or trailers) on a stream.
    ///
    /// Pseudo-headers must precede regular headers. Invalid calls fail
    /// with a misuse error and leave connection state untouched.
    fn submit_headers(
        &mut self,
        stream_id: StreamId,
        headers: &[Header],
        end_stream: bool,
    ) -> crate::Result<()>;

    /// Submits body data on a stream.
    fn submit_data(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    ) -> crate::Result<()>;

    /// Aborts one stream with the given code.
    ///
    /// HTTP/1.1 has no per-stream reset; there this tears the connection
    /// down after mirroring [`Event::StreamResetSent`].
    fn submit_stream_reset(
        &mut self,
        stream_id: StreamId,
        error_code: ErrorCode,
    ) -> crate::Result<()>;

    /// Initiates graceful connection shutdown (GOAWAY / close frames).
    fn submit_close(&mut self, error_code: Option<ErrorCode>) -> crate::Result<()>;

    /// Returns the next pending event, or `None` when the engine needs
    /// more input. [`Event::ConnectionTerminated`] is returned exactly
    /// once, then `None` forever.
    fn poll_event(&mut self) -> Option<Event>;

    /// Signals abrupt transport loss. Synthesizes a terminal event unless
    /// the connection is already terminal.
    fn connection_lost(&mut self, cause: Option<io::Error>);

    /// Connection metadata the surrounding layer fills in.
    fn info(&self) -> &ConnectionInfo;

    /// Mutable access to the connection metadata.
    fn info_mut(&mut self) -> &mut ConnectionInfo;

    /// The transport's local address, once known.
    fn local_address(&self) -> Option<SocketAddr> {
        self.info().local_addr
    }

    /// The transport's remote address, once known.
    fn remote_address(&self) -> Option<SocketAddr> {
        self.info().remote_addr
    }
}

/// Byte-oriented specialization for protocols carried over a TCP-like
/// stream (HTTP/1.1 and HTTP/2).
pub trait TcpProtocol: HttpProtocol {
    /// Appends received transport bytes; the parser advances
    /// opportunistically and queues any resulting events.
    fn recv_bytes(&mut self, data: &[u8]);

    /// Drains the pending outbound bytes, or `None` if there are none.
    ///
    /// Bytes drained after action *A* and before action *B* contain the
    /// wire encoding of *A* (and possibly earlier actions), in submission
    /// order.
    fn poll_transmit(&mut self) -> Option<Bytes>;

    /// Signals half-close from the peer. For HTTP/1.1 this may
    /// legitimately complete a close-delimited response body.
    fn recv_eof(&mut self);
}

/// Datagram-oriented specialization for protocols with integrated TLS and
/// an event clock (HTTP/3 over QUIC).
#[cfg(feature = "http3")]
#[cfg_attr(docsrs, doc(cfg(feature = "http3")))]
pub trait QuicProtocol: HttpProtocol {
    /// Feeds one received UDP datagram into the engine.
    fn recv_datagram(&mut self, datagram: Datagram);

    /// Drains the batch of outbound datagrams generated since the last
    /// call.
    fn poll_transmit(&mut self) -> Vec<Datagram>;

    /// The next absolute deadline at which [`QuicProtocol::handle_timeout`]
    /// must run even without new input, or `None` if no timer is armed.
    fn timeout(&self) -> Option<Instant>;

    /// Runs the engine's timers (loss recovery, idle timeout). Call at or
    /// after the deadline reported by [`QuicProtocol::timeout`].
    fn handle_timeout(&mut self, now: Instant);

    /// The engine's monotonic clock, so the surrounding I/O driver can
    /// slave its scheduling to it.
    fn now(&self) -> Instant;

    /// The currently valid source connection IDs, for load balancers and
    /// path migration.
    fn connection_ids(&self) -> Vec<Bytes>;
}

/// Passive per-connection metadata: transport addresses and an opaque
/// diagnostic bag.
///
/// The surrounding connection layer fills the addresses in after the
/// transport is established; the core only holds them.
#[derive(Debug, Default)]
pub struct ConnectionInfo {
    /// Local transport address.
    pub local_addr: Option<SocketAddr>,
    /// Remote transport address.
    pub remote_addr: Option<SocketAddr>,
    extra: http::Extensions,
}

impl ConnectionInfo {
    /// Opaque diagnostic attributes attached to this connection.
    pub fn extra(&self) -> &http::Extensions {
        &self.extra
    }

    /// Mutable access to the diagnostic attributes.
    pub fn extra_mut(&mut self) -> &mut http::Extensions {
        &mut self.extra
    }
}
