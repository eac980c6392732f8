//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;

/// Result type often returned from methods that can have polyhttp `Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur while driving a protocol instance.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// The caller violated the API contract. The connection state is
    /// unchanged.
    Misuse(Misuse),
    /// The peer sent something illegal on the wire.
    Protocol,
    /// No stream can be allocated right now.
    NotAvailable(Unavailable),
    /// The transport reported a failure.
    Transport,
    /// Unexpected engine state.
    Internal,
}

#[derive(Debug)]
pub(crate) enum Misuse {
    /// A submit referenced a stream id that was never reserved or received.
    UnknownStream,
    /// Data or trailers were submitted before headers.
    HeadersNotSent,
    /// Headers were already submitted on this stream.
    HeadersSent,
    /// A submit arrived after `end_stream` was already sent.
    EndStream,
    /// A submit referenced a stream that was reset.
    StreamReset,
    /// An exchange is already in flight on a non-multiplexed connection.
    Busy,
    /// A submit arrived after the connection terminated.
    Terminated,
    /// The pseudo-header block is malformed for this role and direction.
    PseudoHeader,
    /// A header name or value contains bytes that cannot go on the wire.
    HeaderSyntax,
    /// Body bytes disagree with the declared `content-length`.
    ContentLength,
    /// Reserved stream ids must be opened in allocation order.
    StreamOrder,
    /// The response status cannot be sent on this version.
    Status,
}

#[derive(Debug)]
pub(crate) enum Unavailable {
    /// An exchange is in flight and the version does not multiplex.
    Busy,
    /// A GOAWAY was sent or received; no new streams may be opened.
    Goaway,
    /// The stream-id space is exhausted.
    Exhausted,
    /// One more stream would exceed the peer's concurrency limit.
    MaxConcurrency,
    /// This role cannot initiate streams on this version.
    Role,
    /// The connection is shutting down.
    Closing,
    /// The connection already terminated.
    Terminated,
}

impl Error {
    /// Returns true if the caller violated the API contract.
    pub fn is_misuse(&self) -> bool {
        matches!(self.inner.kind, Kind::Misuse(_))
    }

    /// Returns true if the peer violated the wire protocol.
    pub fn is_protocol(&self) -> bool {
        matches!(self.inner.kind, Kind::Protocol)
    }

    /// Returns true if no stream id could be allocated.
    pub fn is_not_available(&self) -> bool {
        matches!(self.inner.kind, Kind::NotAvailable(_))
    }

    /// Returns true if the transport reported a failure.
    pub fn is_transport(&self) -> bool {
        matches!(self.inner.kind, Kind::Transport)
    }

    /// Returns true if the engine reached an unexpected state.
    pub fn is_internal(&self) -> bool {
        matches!(self.inner.kind, Kind::Internal)
    }

    /// Consumes the error, returning its cause.
    pub fn into_cause(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.inner.cause
    }

    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn new_misuse(misuse: Misuse) -> Error {
        Error::new(Kind::Misuse(misuse))
    }

    pub(crate) fn new_not_available(reason: Unavailable) -> Error {
        Error::new(Kind::NotAvailable(reason))
    }

    pub(crate) fn new_protocol<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::Protocol).with(cause)
    }

    pub(crate) fn new_transport<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::Transport).with(cause)
    }

    pub(crate) fn new_internal<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::Internal).with(cause)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Misuse(Misuse::UnknownStream) => "unknown stream id",
            Kind::Misuse(Misuse::HeadersNotSent) => "stream has no headers yet",
            Kind::Misuse(Misuse::HeadersSent) => "headers already submitted",
            Kind::Misuse(Misuse::EndStream) => "stream already ended",
            Kind::Misuse(Misuse::StreamReset) => "stream was reset",
            Kind::Misuse(Misuse::Busy) => "an exchange is already in flight",
            Kind::Misuse(Misuse::Terminated) => "connection already terminated",
            Kind::Misuse(Misuse::PseudoHeader) => "malformed pseudo-header block",
            Kind::Misuse(Misuse::HeaderSyntax) => "invalid bytes in header field",
            Kind::Misuse(Misuse::ContentLength) => {
                "body does not match declared content-length"
            }
            Kind::Misuse(Misuse::StreamOrder) => {
                "reserved streams must be opened in allocation order"
            }
            Kind::Misuse(Misuse::Status) => "status not sendable on this version",
            Kind::Protocol => "peer violated the protocol",
            Kind::NotAvailable(Unavailable::Busy) => {
                "no stream available: exchange in flight"
            }
            Kind::NotAvailable(Unavailable::Goaway) => "no stream available: goaway",
            Kind::NotAvailable(Unavailable::Exhausted) => {
                "no stream available: id space exhausted"
            }
            Kind::NotAvailable(Unavailable::MaxConcurrency) => {
                "no stream available: peer concurrency limit"
            }
            Kind::NotAvailable(Unavailable::Role) => {
                "no stream available: role cannot initiate streams"
            }
            Kind::NotAvailable(Unavailable::Closing) => {
                "no stream available: connection is closing"
            }
            Kind::NotAvailable(Unavailable::Terminated) => {
                "no stream available: connection terminated"
            }
            Kind::Transport => "transport error",
            Kind::Internal => "internal protocol engine error",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("polyhttp::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref cause) = self.inner.cause {
            write!(f, "{}: {}", self.description(), cause)
        } else {
            f.write_str(self.description())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

#[doc(hidden)]
trait AssertSendSync: Send + Sync + 'static {}
#[doc(hidden)]
impl AssertSendSync for Error {}
