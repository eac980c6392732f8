//! Common value types shared by every protocol engine.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

/// Identifies one logical request/response exchange on a connection.
///
/// HTTP/1.1 only ever uses stream 1. HTTP/2 client-initiated streams are
/// odd, server-initiated even. HTTP/3 inherits the QUIC bidirectional
/// space (client 0, 4, 8, …; server 1, 5, 9, …). Callers treat the value
/// as opaque and obtain it from
/// [`HttpProtocol::reserve_stream_id`](crate::proto::HttpProtocol::reserve_stream_id).
pub type StreamId = u64;

/// A single header field: an ordered `(name, value)` byte-string pair.
///
/// Header lists are plain `Vec<Header>`: order is preserved, duplicates are
/// allowed, and pseudo-headers (names starting with `:`) come first.
#[derive(Clone, PartialEq, Eq)]
pub struct Header(Bytes, Bytes);

impl Header {
    /// Creates a header field from a name and a value.
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Header {
        Header(name.into(), value.into())
    }

    /// The field name.
    pub fn name(&self) -> &[u8] {
        &self.0
    }

    /// The field value.
    pub fn value(&self) -> &[u8] {
        &self.1
    }

    /// Whether this is a pseudo-header (`:method`, `:status`, …).
    pub fn is_pseudo(&self) -> bool {
        self.0.first() == Some(&b':')
    }

    pub(crate) fn name_bytes(&self) -> Bytes {
        self.0.clone()
    }

    pub(crate) fn value_bytes(&self) -> Bytes {
        self.1.clone()
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            String::from_utf8_lossy(&self.0),
            String::from_utf8_lossy(&self.1)
        )
    }
}

/// Finds the first header with the given (already lowercase) name,
/// comparing names case-insensitively.
pub(crate) fn find_header<'a>(headers: &'a [Header], name: &[u8]) -> Option<&'a Header> {
    headers
        .iter()
        .find(|h| h.name().eq_ignore_ascii_case(name))
}

/// Rejects header lists no version may send: empty or malformed names,
/// control bytes in values, pseudo-headers after regular ones.
pub(crate) fn validate_fields(headers: &[Header]) -> Result<(), crate::Error> {
    use crate::error::{Error, Misuse};

    let mut seen_regular = false;
    for header in headers {
        if header.is_pseudo() {
            if seen_regular {
                return Err(Error::new_misuse(Misuse::PseudoHeader));
            }
        } else {
            seen_regular = true;
        }
        let name = header.name();
        let body = if header.is_pseudo() { &name[1..] } else { name };
        if body.is_empty()
            || body
                .iter()
                .any(|&b| matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b':' | 0))
        {
            return Err(Error::new_misuse(Misuse::HeaderSyntax));
        }
        if header
            .value()
            .iter()
            .any(|&b| matches!(b, b'\r' | b'\n' | 0))
        {
            return Err(Error::new_misuse(Misuse::HeaderSyntax));
        }
    }
    Ok(())
}

/// Which end of a connection a protocol instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates requests.
    Client,
    /// Answers requests.
    Server,
}

/// The wire version a protocol instance speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.1 (RFC 9112).
    Http1,
    /// HTTP/2 (RFC 9113).
    Http2,
    /// HTTP/3 (RFC 9114).
    Http3,
}

impl Version {
    /// The ALPN token identifying this version (`http/1.1`, `h2`, `h3`).
    pub fn alpn(&self) -> &'static str {
        match *self {
            Version::Http1 => "http/1.1",
            Version::Http2 => "h2",
            Version::Http3 => "h3",
        }
    }

    /// The wire error-code table for this version.
    pub fn error_codes(&self) -> ErrorCodes {
        match *self {
            Version::Http1 => ErrorCodes::HTTP1,
            Version::Http2 => ErrorCodes::HTTP2,
            Version::Http3 => ErrorCodes::HTTP3,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alpn())
    }
}

/// A version-neutral error code.
///
/// Submits and events always speak this type; each engine translates to
/// and from its wire numbering via [`ErrorCodes`]. `Other` round-trips a
/// received wire code that has no abstract equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Graceful, nothing went wrong.
    NoError,
    /// The peer violated the protocol.
    ProtocolError,
    /// The endpoint hit an unexpected internal condition.
    InternalError,
    /// The exchange is no longer wanted.
    Cancel,
    /// A wire code outside the abstract set, carried verbatim.
    Other(u64),
}

/// One version's mapping between [`ErrorCode`] and wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCodes {
    /// Wire value for [`ErrorCode::NoError`].
    pub no_error: u64,
    /// Wire value for [`ErrorCode::ProtocolError`].
    pub protocol_error: u64,
    /// Wire value for [`ErrorCode::InternalError`].
    pub internal_error: u64,
    /// Wire value for [`ErrorCode::Cancel`].
    pub cancel: u64,
}

impl ErrorCodes {
    /// HTTP/1.1 has no wire error codes; this is a crate-local numbering
    /// used only inside events.
    pub const HTTP1: ErrorCodes = ErrorCodes {
        no_error: 0,
        protocol_error: 1,
        internal_error: 2,
        cancel: 3,
    };

    /// RFC 9113 §7.
    pub const HTTP2: ErrorCodes = ErrorCodes {
        no_error: 0x0,
        protocol_error: 0x1,
        internal_error: 0x2,
        cancel: 0x8,
    };

    /// RFC 9114 §8.1.
    pub const HTTP3: ErrorCodes = ErrorCodes {
        no_error: 0x100,
        protocol_error: 0x101,
        internal_error: 0x102,
        cancel: 0x10c,
    };

    /// Translates an abstract code into this version's wire value.
    pub fn encode(&self, code: ErrorCode) -> u64 {
        match code {
            ErrorCode::NoError => self.no_error,
            ErrorCode::ProtocolError => self.protocol_error,
            ErrorCode::InternalError => self.internal_error,
            ErrorCode::Cancel => self.cancel,
            ErrorCode::Other(raw) => raw,
        }
    }

    /// Translates a wire value into an abstract code.
    pub fn decode(&self, wire: u64) -> ErrorCode {
        if wire == self.no_error {
            ErrorCode::NoError
        } else if wire == self.protocol_error {
            ErrorCode::ProtocolError
        } else if wire == self.internal_error {
            ErrorCode::InternalError
        } else if wire == self.cancel {
            ErrorCode::Cancel
        } else {
            ErrorCode::Other(wire)
        }
    }
}

/// A UDP payload paired with the peer address it travels to or from.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// The raw datagram payload.
    pub data: Bytes,
    /// Peer address: the destination on send, the source on receive.
    pub addr: SocketAddr,
}

impl Datagram {
    /// Creates a datagram value.
    pub fn new(data: impl Into<Bytes>, addr: SocketAddr) -> Datagram {
        Datagram {
            data: data.into(),
            addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trip() {
        for table in [ErrorCodes::HTTP1, ErrorCodes::HTTP2, ErrorCodes::HTTP3] {
            for code in [
                ErrorCode::NoError,
                ErrorCode::ProtocolError,
                ErrorCode::InternalError,
                ErrorCode::Cancel,
            ] {
                assert_eq!(table.decode(table.encode(code)), code);
            }
        }
    }

    #[test]
    fn unknown_wire_code_is_preserved() {
        let code = ErrorCodes::HTTP2.decode(0xd);
        assert_eq!(code, ErrorCode::Other(0xd));
        assert_eq!(ErrorCodes::HTTP2.encode(code), 0xd);
    }

    #[test]
    fn h3_cancel_is_request_cancelled() {
        assert_eq!(ErrorCodes::HTTP3.encode(ErrorCode::Cancel), 0x10c);
    }

    #[test]
    fn header_pseudo() {
        assert!(Header::new(":method", "GET").is_pseudo());
        assert!(!Header::new("host", "example.test").is_pseudo());
    }

    #[test]
    fn find_header_is_case_insensitive() {
        let headers = vec![
            Header::new("Host", "example.test"),
            Header::new("Content-Length", "3"),
        ];
        assert!(find_header(&headers, b"host").is_some());
        assert!(find_header(&headers, b"content-length").is_some());
        assert!(find_header(&headers, b"accept").is_none());
    }
}
