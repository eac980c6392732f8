//! The HTTP-level events every protocol engine emits.

use bytes::Bytes;

use crate::model::{ErrorCode, Header, StreamId};

/// An HTTP-level event produced by a protocol engine.
///
/// Events are immutable values drained via
/// [`HttpProtocol::poll_event`](crate::proto::HttpProtocol::poll_event).
/// Every variant except [`Event::ConnectionTerminated`] names the stream it
/// belongs to; `ConnectionTerminated` is terminal and is emitted at most
/// once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The connection is done; the engine will produce no further events.
    ConnectionTerminated {
        /// Version-neutral code describing why the connection ended.
        error_code: ErrorCode,
        /// Optional human-readable detail.
        message: Option<String>,
    },
    /// The peer will process no new streams beyond `last_stream_id`.
    GoawayReceived {
        /// Highest stream id the peer will still process.
        last_stream_id: StreamId,
        /// Version-neutral code carried by the GOAWAY.
        error_code: ErrorCode,
    },
    /// A complete header block arrived on a stream.
    ///
    /// The list always contains the pseudo-headers required for its
    /// direction, even on HTTP/1.1 where the engine synthesizes them from
    /// the request or status line.
    HeadersReceived {
        /// Stream the headers belong to.
        stream_id: StreamId,
        /// Ordered header list, pseudo-headers first.
        headers: Vec<Header>,
        /// True when the peer will send nothing further on this stream.
        end_stream: bool,
    },
    /// A chunk of body data arrived on a stream.
    DataReceived {
        /// Stream the data belongs to.
        stream_id: StreamId,
        /// The payload; may be empty on the final chunk.
        data: Bytes,
        /// True when the peer will send nothing further on this stream.
        end_stream: bool,
    },
    /// The peer reset a stream.
    StreamResetReceived {
        /// The stream that was reset.
        stream_id: StreamId,
        /// Version-neutral code carried by the reset.
        error_code: ErrorCode,
    },
    /// This endpoint reset a stream; mirrored so observers see both
    /// directions.
    StreamResetSent {
        /// The stream that was reset.
        stream_id: StreamId,
        /// Version-neutral code carried by the reset.
        error_code: ErrorCode,
    },
}

impl Event {
    /// The stream this event belongs to, if any.
    pub fn stream_id(&self) -> Option<StreamId> {
        match *self {
            Event::ConnectionTerminated { .. } => None,
            Event::GoawayReceived { .. } => None,
            Event::HeadersReceived { stream_id, .. }
            | Event::DataReceived { stream_id, .. }
            | Event::StreamResetReceived { stream_id, .. }
            | Event::StreamResetSent { stream_id, .. } => Some(stream_id),
        }
    }

    /// Returns true for [`Event::ConnectionTerminated`].
    pub fn is_terminal(&self) -> bool {
        matches!(*self, Event::ConnectionTerminated { .. })
    }
}
