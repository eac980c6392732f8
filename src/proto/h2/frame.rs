//! HTTP/2 frame layer: the 9-octet frame header, flag constants, SETTINGS
//! payloads and padding handling (RFC 9113 §4, §6).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;

pub(super) const HEADER_LEN: usize = 9;
pub(super) const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// The client connection preface (RFC 9113 §3.4).
pub(super) const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub(super) const END_STREAM: u8 = 0x1;
pub(super) const ACK: u8 = 0x1;
pub(super) const END_HEADERS: u8 = 0x4;
pub(super) const PADDED: u8 = 0x8;
pub(super) const PRIORITY: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Kind {
    Data,
    Headers,
    Priority,
    Reset,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl Kind {
    pub(super) fn new(byte: u8) -> Kind {
        match byte {
            0 => Kind::Data,
            1 => Kind::Headers,
            2 => Kind::Priority,
            3 => Kind::Reset,
            4 => Kind::Settings,
            5 => Kind::PushPromise,
            6 => Kind::Ping,
            7 => Kind::GoAway,
            8 => Kind::WindowUpdate,
            9 => Kind::Continuation,
            other => Kind::Unknown(other),
        }
    }

    fn byte(self) -> u8 {
        match self {
            Kind::Data => 0,
            Kind::Headers => 1,
            Kind::Priority => 2,
            Kind::Reset => 3,
            Kind::Settings => 4,
            Kind::PushPromise => 5,
            Kind::Ping => 6,
            Kind::GoAway => 7,
            Kind::WindowUpdate => 8,
            Kind::Continuation => 9,
            Kind::Unknown(byte) => byte,
        }
    }
}

/// A parsed frame header.
#[derive(Debug, Clone, Copy)]
pub(super) struct Head {
    pub(super) kind: Kind,
    pub(super) flags: u8,
    pub(super) stream_id: u32,
    pub(super) len: u32,
}

impl Head {
    pub(super) fn parse(header: &[u8]) -> Head {
        debug_assert!(header.len() >= HEADER_LEN);
        let len =
            ((header[0] as u32) << 16) | ((header[1] as u32) << 8) | header[2] as u32;
        let stream_id = ((header[5] as u32) << 24
            | (header[6] as u32) << 16
            | (header[7] as u32) << 8
            | header[8] as u32)
            & 0x7fff_ffff;
        Head {
            kind: Kind::new(header[3]),
            flags: header[4],
            stream_id,
            len,
        }
    }

    pub(super) fn is_end_stream(&self) -> bool {
        self.flags & END_STREAM != 0
    }

    pub(super) fn is_end_headers(&self) -> bool {
        self.flags & END_HEADERS != 0
    }

    pub(super) fn is_ack(&self) -> bool {
        self.flags & ACK != 0
    }
}

/// Appends one frame (header + payload) to `dst`.
pub(super) fn write(dst: &mut BytesMut, kind: Kind, flags: u8, stream_id: u32, payload: &[u8]) {
    debug_assert!(payload.len() < 1 << 24);
    dst.reserve(HEADER_LEN + payload.len());
    let len = payload.len() as u32;
    dst.put_u8((len >> 16) as u8);
    dst.put_u8((len >> 8) as u8);
    dst.put_u8(len as u8);
    dst.put_u8(kind.byte());
    dst.put_u8(flags);
    dst.put_u32(stream_id & 0x7fff_ffff);
    dst.extend_from_slice(payload);
}

/// Removes the pad-length octet and trailing padding (RFC 9113 §6.1).
pub(super) fn strip_padding(flags: u8, payload: Bytes) -> crate::Result<Bytes> {
    if flags & PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::new_protocol("padded frame has no pad length"));
    }
    let pad_len = payload[0] as usize;
    if pad_len + 1 > payload.len() {
        return Err(Error::new_protocol("padding exceeds frame payload"));
    }
    Ok(payload.slice(1..payload.len() - pad_len))
}

/// Removes the priority fields from a HEADERS payload (RFC 9113 §6.2).
pub(super) fn strip_priority(flags: u8, payload: Bytes) -> crate::Result<Bytes> {
    if flags & PRIORITY == 0 {
        return Ok(payload);
    }
    if payload.len() < 5 {
        return Err(Error::new_protocol("priority fields exceed frame payload"));
    }
    Ok(payload.slice(5..))
}

const SETTINGS_HEADER_TABLE_SIZE: u16 = 1;
const SETTINGS_ENABLE_PUSH: u16 = 2;
const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 3;
const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 4;
const SETTINGS_MAX_FRAME_SIZE: u16 = 5;
const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 6;

/// A SETTINGS payload; unknown identifiers are ignored per RFC 9113 §6.5.2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct Settings {
    pub(super) header_table_size: Option<u32>,
    pub(super) enable_push: Option<u32>,
    pub(super) max_concurrent_streams: Option<u32>,
    pub(super) initial_window_size: Option<u32>,
    pub(super) max_frame_size: Option<u32>,
    pub(super) max_header_list_size: Option<u32>,
}

impl Settings {
    pub(super) fn parse(mut payload: Bytes) -> crate::Result<Settings> {
        if payload.len() % 6 != 0 {
            return Err(Error::new_protocol("settings payload is not 6-byte aligned"));
        }
        let mut settings = Settings::default();
        while payload.has_remaining() {
            let id = payload.get_u16();
            let value = payload.get_u32();
            match id {
                SETTINGS_HEADER_TABLE_SIZE => settings.header_table_size = Some(value),
                SETTINGS_ENABLE_PUSH => {
                    if value > 1 {
                        return Err(Error::new_protocol("invalid enable_push value"));
                    }
                    settings.enable_push = Some(value);
                }
                SETTINGS_MAX_CONCURRENT_STREAMS => {
                    settings.max_concurrent_streams = Some(value)
                }
                SETTINGS_INITIAL_WINDOW_SIZE => {
                    if value > 0x7fff_ffff {
                        return Err(Error::new_protocol("initial window size too large"));
                    }
                    settings.initial_window_size = Some(value);
                }
                SETTINGS_MAX_FRAME_SIZE => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=0x00ff_ffff).contains(&value) {
                        return Err(Error::new_protocol("max_frame_size out of bounds"));
                    }
                    settings.max_frame_size = Some(value);
                }
                SETTINGS_MAX_HEADER_LIST_SIZE => {
                    settings.max_header_list_size = Some(value)
                }
                _ => {}
            }
        }
        Ok(settings)
    }

    pub(super) fn encode_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(6 * 6);
        let mut push = |id: u16, value: u32| {
            payload.extend_from_slice(&id.to_be_bytes());
            payload.extend_from_slice(&value.to_be_bytes());
        };
        if let Some(v) = self.header_table_size {
            push(SETTINGS_HEADER_TABLE_SIZE, v);
        }
        if let Some(v) = self.enable_push {
            push(SETTINGS_ENABLE_PUSH, v);
        }
        if let Some(v) = self.max_concurrent_streams {
            push(SETTINGS_MAX_CONCURRENT_STREAMS, v);
        }
        if let Some(v) = self.initial_window_size {
            push(SETTINGS_INITIAL_WINDOW_SIZE, v);
        }
        if let Some(v) = self.max_frame_size {
            push(SETTINGS_MAX_FRAME_SIZE, v);
        }
        if let Some(v) = self.max_header_list_size {
            push(SETTINGS_MAX_HEADER_LIST_SIZE, v);
        }
        payload
    }

    /// Folds the peer's new values into the effective remote settings.
    pub(super) fn merge(&mut self, other: Settings) {
        if other.header_table_size.is_some() {
            self.header_table_size = other.header_table_size;
        }
        if other.enable_push.is_some() {
            self.enable_push = other.enable_push;
        }
        if other.max_concurrent_streams.is_some() {
            self.max_concurrent_streams = other.max_concurrent_streams;
        }
        if other.initial_window_size.is_some() {
            self.initial_window_size = other.initial_window_size;
        }
        if other.max_frame_size.is_some() {
            self.max_frame_size = other.max_frame_size;
        }
        if other.max_header_list_size.is_some() {
            self.max_header_list_size = other.max_header_list_size;
        }
    }
}
