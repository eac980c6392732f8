//! Shared helpers for the end-to-end tests: paired instances drive each
//! other's receive path with the other's transmit output.
#![allow(dead_code)]

use polyhttp::proto::TcpProtocol;
use polyhttp::{Event, Header};

/// Shuttles bytes between two paired engines until neither side has
/// anything left to send.
pub fn pump<A, B>(a: &mut A, b: &mut B)
where
    A: TcpProtocol,
    B: TcpProtocol,
{
    loop {
        let mut moved = false;
        if let Some(bytes) = a.poll_transmit() {
            b.recv_bytes(&bytes);
            moved = true;
        }
        if let Some(bytes) = b.poll_transmit() {
            a.recv_bytes(&bytes);
            moved = true;
        }
        if !moved {
            return;
        }
    }
}

/// The value of the first header with the given name.
pub fn header<'a>(headers: &'a [Header], name: &str) -> &'a [u8] {
    headers
        .iter()
        .find(|h| h.name().eq_ignore_ascii_case(name.as_bytes()))
        .unwrap_or_else(|| panic!("header {:?} missing from {:?}", name, headers))
        .value()
}

/// Unwraps a `HeadersReceived` event.
pub fn expect_headers(event: Option<Event>) -> (u64, Vec<Header>, bool) {
    match event {
        Some(Event::HeadersReceived {
            stream_id,
            headers,
            end_stream,
        }) => (stream_id, headers, end_stream),
        other => panic!("expected HeadersReceived, got {:?}", other),
    }
}

/// Unwraps a `DataReceived` event.
pub fn expect_data(event: Option<Event>) -> (u64, Vec<u8>, bool) {
    match event {
        Some(Event::DataReceived {
            stream_id,
            data,
            end_stream,
        }) => (stream_id, data.to_vec(), end_stream),
        other => panic!("expected DataReceived, got {:?}", other),
    }
}
