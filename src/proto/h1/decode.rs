//! Incremental decoders for HTTP/1.1 message bodies.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::Error;

/// Decodes the body of one incoming message.
///
/// The framing is decided once from the message head (RFC 9112 §6) and the
/// decoder is then fed the connection's receive buffer until the body is
/// complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Decoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// `content-length` delimited; counts down to zero.
    Length(u64),
    /// `transfer-encoding: chunked`.
    Chunked(ChunkedState, u64),
    /// Delimited by connection close (client-read responses only).
    Eof,
}

/// One step of body decoding.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Decoded {
    /// Body bytes; the flag is true when the decoder knows this chunk is
    /// the last one.
    Chunk(Bytes, bool),
    /// The body is complete and this step carried no data.
    Complete,
    /// More input is needed.
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    Start,
    Size,
    Ext,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLine,
    EndLf,
    Done,
}

impl Decoder {
    pub(super) fn length(len: u64) -> Decoder {
        Decoder {
            kind: Kind::Length(len),
        }
    }

    pub(super) fn chunked() -> Decoder {
        Decoder {
            kind: Kind::Chunked(ChunkedState::Start, 0),
        }
    }

    pub(super) fn eof() -> Decoder {
        Decoder { kind: Kind::Eof }
    }

    /// Whether this body only ends when the transport closes.
    pub(super) fn is_eof(&self) -> bool {
        matches!(self.kind, Kind::Eof)
    }

    /// Advances the decoder over `buf`, consuming what belongs to the body.
    pub(super) fn decode(&mut self, buf: &mut BytesMut) -> crate::Result<Decoded> {
        match self.kind {
            Kind::Length(ref mut remaining) => {
                if *remaining == 0 {
                    return Ok(Decoded::Complete);
                }
                let take = (*remaining).min(buf.len() as u64) as usize;
                if take == 0 {
                    return Ok(Decoded::Partial);
                }
                let data = buf.split_to(take).freeze();
                *remaining -= take as u64;
                Ok(Decoded::Chunk(data, *remaining == 0))
            }
            Kind::Chunked(ref mut state, ref mut size) => decode_chunked(state, size, buf),
            Kind::Eof => {
                if buf.is_empty() {
                    Ok(Decoded::Partial)
                } else {
                    Ok(Decoded::Chunk(buf.split().freeze(), false))
                }
            }
        }
    }
}

fn decode_chunked(
    state: &mut ChunkedState,
    size: &mut u64,
    buf: &mut BytesMut,
) -> crate::Result<Decoded> {
    loop {
        if *state == ChunkedState::Body {
            let take = (*size).min(buf.len() as u64) as usize;
            if take == 0 {
                return Ok(Decoded::Partial);
            }
            let data = buf.split_to(take).freeze();
            *size -= take as u64;
            if *size == 0 {
                *state = ChunkedState::BodyCr;
            }
            return Ok(Decoded::Chunk(data, false));
        }
        if *state == ChunkedState::Done {
            return Ok(Decoded::Complete);
        }
        if buf.is_empty() {
            return Ok(Decoded::Partial);
        }
        let byte = buf[0];
        *state = match *state {
            ChunkedState::Start => match hex_digit(byte) {
                Some(d) => {
                    *size = d as u64;
                    buf.advance(1);
                    ChunkedState::Size
                }
                None => return Err(Error::new_protocol("invalid chunk size line")),
            },
            ChunkedState::Size => match hex_digit(byte) {
                Some(d) => {
                    *size = size
                        .checked_mul(16)
                        .and_then(|s| s.checked_add(d as u64))
                        .ok_or_else(|| Error::new_protocol("chunk size is too big"))?;
                    buf.advance(1);
                    ChunkedState::Size
                }
                None => match byte {
                    b';' => {
                        buf.advance(1);
                        ChunkedState::Ext
                    }
                    b'\r' => {
                        buf.advance(1);
                        ChunkedState::SizeLf
                    }
                    _ => return Err(Error::new_protocol("invalid chunk size line")),
                },
            },
            ChunkedState::Ext => {
                buf.advance(1);
                if byte == b'\r' {
                    ChunkedState::SizeLf
                } else {
                    ChunkedState::Ext
                }
            }
            ChunkedState::SizeLf => {
                if byte != b'\n' {
                    return Err(Error::new_protocol("invalid chunk size line"));
                }
                buf.advance(1);
                if *size == 0 {
                    ChunkedState::Trailer
                } else {
                    ChunkedState::Body
                }
            }
            ChunkedState::BodyCr => {
                if byte != b'\r' {
                    return Err(Error::new_protocol("missing CRLF after chunk"));
                }
                buf.advance(1);
                ChunkedState::BodyLf
            }
            ChunkedState::BodyLf => {
                if byte != b'\n' {
                    return Err(Error::new_protocol("missing CRLF after chunk"));
                }
                buf.advance(1);
                ChunkedState::Start
            }
            ChunkedState::Trailer => {
                if byte == b'\r' {
                    buf.advance(1);
                    ChunkedState::EndLf
                } else {
                    ChunkedState::TrailerLine
                }
            }
            ChunkedState::TrailerLine => {
                buf.advance(1);
                if byte == b'\n' {
                    ChunkedState::Trailer
                } else {
                    ChunkedState::TrailerLine
                }
            }
            ChunkedState::EndLf => {
                if byte != b'\n' {
                    return Err(Error::new_protocol("invalid trailer section"));
                }
                buf.advance(1);
                ChunkedState::Done
            }
            ChunkedState::Body | ChunkedState::Done => unreachable!(),
        };
    }
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
