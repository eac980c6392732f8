//! The HTTP/2 engine.
//!
//! A sans-I/O connection state machine over the frame codec in [`frame`]:
//! preface and SETTINGS exchange, HEADERS/CONTINUATION assembly with HPACK
//! (RFC 7541, via the `hpack` crate), DATA with receive-window
//! replenishment, RST_STREAM, PING and GOAWAY. Stream ids are reserved at
//! allocation and obey the odd/even parity rule. Server push is disabled
//! in our SETTINGS, so a PUSH_PROMISE from the peer is a connection error;
//! PRIORITY frames are parsed and ignored.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::error::{Error, Misuse, Unavailable};
use crate::event::Event;
use crate::model::{validate_fields, ErrorCode, ErrorCodes, Header, Role, StreamId, Version};
use crate::proto::{ConnectionInfo, HttpProtocol, TcpProtocol};

mod frame;

use self::frame::{Head, Kind, Settings};

/// Streams we are willing to process concurrently.
const LOCAL_MAX_CONCURRENT_STREAMS: u32 = 256;
/// Per-stream receive window we advertise.
const LOCAL_INITIAL_WINDOW_SIZE: u32 = 1 << 20;
/// Connection-level receive window we grow to right after the preface.
const LOCAL_CONNECTION_WINDOW: u32 = 1 << 24;
/// RFC 9113 §6.9.1: the window every connection starts with.
const DEFAULT_WINDOW_SIZE: u32 = 65_535;

/// A sans-I/O HTTP/2 connection.
pub struct Connection {
    role: Role,
    info: ConnectionInfo,
    read_buf: BytesMut,
    write_buf: BytesMut,
    events: VecDeque<Event>,
    hpack_tx: hpack::Encoder<'static>,
    hpack_rx: hpack::Decoder<'static>,
    streams: HashMap<u32, Stream>,
    /// Next id this side may allocate (client odd, server even).
    next_stream_id: u32,
    /// Highest peer-initiated stream id seen; goes into our GOAWAY.
    last_peer_stream: u32,
    awaiting_preface: bool,
    remote_settings: Settings,
    continuation: Option<Partial>,
    goaway_sent: bool,
    goaway_received: bool,
    terminal_queued: bool,
    terminated: bool,
}

#[derive(Debug, Default)]
struct Stream {
    headers_sent: bool,
    headers_recv: bool,
    end_sent: bool,
    end_recv: bool,
    reset: bool,
}

impl Stream {
    fn is_closed(&self) -> bool {
        self.reset || (self.end_sent && self.end_recv)
    }
}

#[derive(Debug)]
struct Partial {
    stream_id: u32,
    end_stream: bool,
    fragment: BytesMut,
}

impl Connection {
    /// Creates an engine for one transport connection and queues its side
    /// of the connection preface.
    pub fn new(role: Role) -> Connection {
        let mut conn = Connection {
            role,
            info: ConnectionInfo::default(),
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            events: VecDeque::new(),
            hpack_tx: hpack::Encoder::new(),
            hpack_rx: hpack::Decoder::new(),
            streams: HashMap::new(),
            next_stream_id: match role {
                Role::Client => 1,
                Role::Server => 2,
            },
            last_peer_stream: 0,
            awaiting_preface: role == Role::Server,
            remote_settings: Settings::default(),
            continuation: None,
            goaway_sent: false,
            goaway_received: false,
            terminal_queued: false,
            terminated: false,
        };
        if role == Role::Client {
            conn.write_buf.extend_from_slice(frame::PREFACE);
        }
        let settings = Settings {
            enable_push: Some(0),
            max_concurrent_streams: Some(LOCAL_MAX_CONCURRENT_STREAMS),
            initial_window_size: Some(LOCAL_INITIAL_WINDOW_SIZE),
            ..Settings::default()
        };
        let payload = settings.encode_payload();
        frame::write(&mut conn.write_buf, Kind::Settings, 0, 0, &payload);
        conn.write_window_update(0, LOCAL_CONNECTION_WINDOW - DEFAULT_WINDOW_SIZE);
        conn
    }

    fn max_send_frame_size(&self) -> usize {
        self.remote_settings
            .max_frame_size
            .unwrap_or(frame::DEFAULT_MAX_FRAME_SIZE) as usize
    }

    fn open_streams(&self) -> usize {
        self.streams.values().filter(|s| !s.is_closed()).count()
    }

    fn drive(&mut self) {
        if self.terminal_queued {
            self.read_buf.clear();
            return;
        }
        if self.awaiting_preface {
            if self.read_buf.len() < frame::PREFACE.len() {
                return;
            }
            if &self.read_buf[..frame::PREFACE.len()] != frame::PREFACE {
                self.connection_error("bad connection preface");
                return;
            }
            self.read_buf.advance(frame::PREFACE.len());
            self.awaiting_preface = false;
            trace!("connection preface received");
        }
        loop {
            if self.read_buf.len() < frame::HEADER_LEN {
                return;
            }
            let head = Head::parse(&self.read_buf[..frame::HEADER_LEN]);
            // We never advertise a larger SETTINGS_MAX_FRAME_SIZE.
            if head.len > frame::DEFAULT_MAX_FRAME_SIZE {
                self.connection_error("frame exceeds maximum frame size");
                return;
            }
            if self.read_buf.len() < frame::HEADER_LEN + head.len as usize {
                return;
            }
            self.read_buf.advance(frame::HEADER_LEN);
            let payload = self.read_buf.split_to(head.len as usize).freeze();
            if let Err(err) = self.handle_frame(head, payload) {
                let message = err.to_string();
                self.connection_error(&message);
                return;
            }
            if self.terminal_queued {
                self.read_buf.clear();
                return;
            }
        }
    }

    fn handle_frame(&mut self, head: Head, payload: Bytes) -> crate::Result<()> {
        if let Some(partial) = self.continuation.take() {
            if head.kind != Kind::Continuation || head.stream_id != partial.stream_id {
                return Err(Error::new_protocol("expected a CONTINUATION frame"));
            }
            return self.handle_continuation(partial, head, payload);
        }
        match head.kind {
            Kind::Data => self.handle_data(head, payload),
            Kind::Headers => self.handle_headers(head, payload),
            Kind::Priority => {
                trace!("ignoring PRIORITY frame on stream {}", head.stream_id);
                Ok(())
            }
            Kind::Reset => self.handle_reset(head, payload),
            Kind::Settings => self.handle_settings(head, payload),
            Kind::PushPromise => {
                Err(Error::new_protocol("PUSH_PROMISE received with push disabled"))
            }
            Kind::Ping => self.handle_ping(head, payload),
            Kind::GoAway => self.handle_goaway(head, payload),
            Kind::WindowUpdate => {
                if payload.len() != 4 {
                    return Err(Error::new_protocol("WINDOW_UPDATE with bad length"));
                }
                trace!("absorbing WINDOW_UPDATE on stream {}", head.stream_id);
                Ok(())
            }
            Kind::Continuation => {
                Err(Error::new_protocol("CONTINUATION without preceding HEADERS"))
            }
            Kind::Unknown(byte) => {
                trace!("ignoring unknown frame type 0x{:x}", byte);
                Ok(())
            }
        }
    }

    fn handle_data(&mut self, head: Head, payload: Bytes) -> crate::Result<()> {
        if head.stream_id == 0 {
            return Err(Error::new_protocol("DATA on stream 0"));
        }
        let end_stream = head.is_end_stream();
        let data = frame::strip_padding(head.flags, payload)?;
        let len = data.len() as u32;
        let stream = match self.streams.get_mut(&head.stream_id) {
            Some(stream) => stream,
            None => return Err(Error::new_protocol("DATA on idle stream")),
        };
        if stream.reset || stream.end_recv {
            // late frames after reset are legal; drop them
            trace!("dropping DATA on closed stream {}", head.stream_id);
            self.write_window_update(0, len);
            return Ok(());
        }
        if !stream.headers_recv {
            return Err(Error::new_protocol("DATA before HEADERS"));
        }
        stream.end_recv = end_stream;
        let open = !stream.is_closed();
        self.events.push_back(Event::DataReceived {
            stream_id: head.stream_id as StreamId,
            data,
            end_stream,
        });
        // hand the peer its budget back
        self.write_window_update(0, len);
        if open && !end_stream {
            self.write_window_update(head.stream_id, len);
        }
        Ok(())
    }

    fn handle_headers(&mut self, head: Head, payload: Bytes) -> crate::Result<()> {
        if head.stream_id == 0 {
            return Err(Error::new_protocol("HEADERS on stream 0"));
        }
        let payload = frame::strip_padding(head.flags, payload)?;
        let fragment = frame::strip_priority(head.flags, payload)?;
        if !head.is_end_headers() {
            self.continuation = Some(Partial {
                stream_id: head.stream_id,
                end_stream: head.is_end_stream(),
                fragment: BytesMut::from(&fragment[..]),
            });
            return Ok(());
        }
        self.finish_header_block(head.stream_id, &fragment, head.is_end_stream())
    }

    fn handle_continuation(
        &mut self,
        mut partial: Partial,
        head: Head,
        payload: Bytes,
    ) -> crate::Result<()> {
        partial.fragment.extend_from_slice(&payload);
        if !head.is_end_headers() {
            self.continuation = Some(partial);
            return Ok(());
        }
        let fragment = partial.fragment.freeze();
        self.finish_header_block(partial.stream_id, &fragment, partial.end_stream)
    }

    fn finish_header_block(
        &mut self,
        stream_id: u32,
        fragment: &[u8],
        end_stream: bool,
    ) -> crate::Result<()> {
        let decoded = self
            .hpack_rx
            .decode(fragment)
            .map_err(|err| Error::new_protocol(format!("hpack: {:?}", err)))?;
        let headers: Vec<Header> = decoded
            .into_iter()
            .map(|(name, value)| Header::new(name, value))
            .collect();
        let mut seen_regular = false;
        for header in &headers {
            if header.is_pseudo() {
                if seen_regular {
                    return Err(Error::new_protocol("pseudo-header after regular header"));
                }
            } else {
                seen_regular = true;
            }
        }

        let peer_initiated = match self.role {
            Role::Server => stream_id % 2 == 1,
            Role::Client => stream_id % 2 == 0,
        };
        if peer_initiated {
            if self.role == Role::Client {
                return Err(Error::new_protocol("HEADERS on a push stream"));
            }
            if !self.streams.contains_key(&stream_id) {
                if stream_id <= self.last_peer_stream {
                    return Err(Error::new_protocol("HEADERS on a closed stream"));
                }
                self.last_peer_stream = stream_id;
                self.streams.insert(stream_id, Stream::default());
            }
        } else if !self.streams.contains_key(&stream_id) {
            return Err(Error::new_protocol("HEADERS on an unopened stream"));
        }

        let stream = self.streams.get_mut(&stream_id).expect("stream exists");
        if stream.reset {
            trace!("dropping HEADERS on reset stream {}", stream_id);
            return Ok(());
        }
        if stream.end_recv {
            return Err(Error::new_protocol("HEADERS after end of stream"));
        }
        if stream.headers_recv && !end_stream {
            return Err(Error::new_protocol("trailers must end the stream"));
        }
        stream.headers_recv = true;
        stream.end_recv = end_stream;
        self.events.push_back(Event::HeadersReceived {
            stream_id: stream_id as StreamId,
            headers,
            end_stream,
        });
        Ok(())
    }

    fn handle_reset(&mut self, head: Head, mut payload: Bytes) -> crate::Result<()> {
        if head.stream_id == 0 {
            return Err(Error::new_protocol("RST_STREAM on stream 0"));
        }
        if payload.len() != 4 {
            return Err(Error::new_protocol("RST_STREAM with bad length"));
        }
        let code = payload.get_u32() as u64;
        match self.streams.get_mut(&head.stream_id) {
            Some(stream) if !stream.reset => {
                stream.reset = true;
                self.events.push_back(Event::StreamResetReceived {
                    stream_id: head.stream_id as StreamId,
                    error_code: ErrorCodes::HTTP2.decode(code),
                });
            }
            _ => trace!("ignoring RST_STREAM on unknown stream {}", head.stream_id),
        }
        Ok(())
    }

    fn handle_settings(&mut self, head: Head, payload: Bytes) -> crate::Result<()> {
        if head.stream_id != 0 {
            return Err(Error::new_protocol("SETTINGS on a stream"));
        }
        if head.is_ack() {
            if !payload.is_empty() {
                return Err(Error::new_protocol("SETTINGS ack with payload"));
            }
            return Ok(());
        }
        let settings = Settings::parse(payload)?;
        trace!("received settings: {:?}", settings);
        self.remote_settings.merge(settings);
        frame::write(&mut self.write_buf, Kind::Settings, frame::ACK, 0, &[]);
        Ok(())
    }

    fn handle_ping(&mut self, head: Head, payload: Bytes) -> crate::Result<()> {
        if head.stream_id != 0 {
            return Err(Error::new_protocol("PING on a stream"));
        }
        if payload.len() != 8 {
            return Err(Error::new_protocol("PING with bad length"));
        }
        if !head.is_ack() {
            trace!("answering PING");
            frame::write(&mut self.write_buf, Kind::Ping, frame::ACK, 0, &payload);
        }
        Ok(())
    }

    fn handle_goaway(&mut self, head: Head, mut payload: Bytes) -> crate::Result<()> {
        if head.stream_id != 0 {
            return Err(Error::new_protocol("GOAWAY on a stream"));
        }
        if payload.len() < 8 {
            return Err(Error::new_protocol("GOAWAY with bad length"));
        }
        let last_stream_id = (payload.get_u32() & 0x7fff_ffff) as StreamId;
        let code = payload.get_u32() as u64;
        debug!("GOAWAY received: last_stream_id={}", last_stream_id);
        self.goaway_received = true;
        self.events.push_back(Event::GoawayReceived {
            last_stream_id,
            error_code: ErrorCodes::HTTP2.decode(code),
        });
        Ok(())
    }

    fn write_window_update(&mut self, stream_id: u32, increment: u32) {
        if increment == 0 {
            return;
        }
        frame::write(
            &mut self.write_buf,
            Kind::WindowUpdate,
            0,
            stream_id,
            &increment.to_be_bytes(),
        );
    }

    fn write_goaway(&mut self, code: ErrorCode) {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&self.last_peer_stream.to_be_bytes());
        payload.extend_from_slice(&(ErrorCodes::HTTP2.encode(code) as u32).to_be_bytes());
        frame::write(&mut self.write_buf, Kind::GoAway, 0, 0, &payload);
        self.goaway_sent = true;
    }

    fn write_header_block(&mut self, stream_id: u32, fragment: &[u8], end_stream: bool) {
        let max = self.max_send_frame_size();
        let end_flag = if end_stream { frame::END_STREAM } else { 0 };
        if fragment.len() <= max {
            frame::write(
                &mut self.write_buf,
                Kind::Headers,
                frame::END_HEADERS | end_flag,
                stream_id,
                fragment,
            );
            return;
        }
        let mut chunks = fragment.chunks(max).peekable();
        let first = chunks.next().expect("fragment is not empty");
        frame::write(&mut self.write_buf, Kind::Headers, end_flag, stream_id, first);
        while let Some(chunk) = chunks.next() {
            let flags = if chunks.peek().is_none() {
                frame::END_HEADERS
            } else {
                0
            };
            frame::write(&mut self.write_buf, Kind::Continuation, flags, stream_id, chunk);
        }
    }

    fn connection_error(&mut self, message: &str) {
        debug!("connection error: {}", message);
        if !self.goaway_sent {
            self.write_goaway(ErrorCode::ProtocolError);
        }
        self.terminate(ErrorCode::ProtocolError, Some(message.to_owned()));
    }

    fn terminate(&mut self, error_code: ErrorCode, message: Option<String>) {
        if self.terminal_queued {
            return;
        }
        self.terminal_queued = true;
        self.continuation = None;
        self.events.push_back(Event::ConnectionTerminated {
            error_code,
            message,
        });
    }

    fn stream_for_submit(&mut self, stream_id: StreamId) -> crate::Result<&mut Stream> {
        if self.terminal_queued {
            return Err(Error::new_misuse(Misuse::Terminated));
        }
        let id = u32::try_from(stream_id)
            .map_err(|_| Error::new_misuse(Misuse::UnknownStream))?;
        match self.streams.get_mut(&id) {
            Some(stream) => Ok(stream),
            None => Err(Error::new_misuse(Misuse::UnknownStream)),
        }
    }
}

impl HttpProtocol for Connection {
    fn version(&self) -> Version {
        Version::Http2
    }

    fn is_available(&self) -> bool {
        if self.terminal_queued || self.goaway_sent || self.goaway_received {
            return false;
        }
        match self.remote_settings.max_concurrent_streams {
            Some(max) => (self.open_streams() as u32) < max,
            None => true,
        }
    }

    fn reserve_stream_id(&mut self) -> crate::Result<StreamId> {
        if self.terminal_queued {
            return Err(Error::new_not_available(Unavailable::Terminated));
        }
        if self.goaway_sent || self.goaway_received {
            return Err(Error::new_not_available(Unavailable::Goaway));
        }
        if let Some(max) = self.remote_settings.max_concurrent_streams {
            if self.open_streams() as u32 >= max {
                return Err(Error::new_not_available(Unavailable::MaxConcurrency));
            }
        }
        let id = self.next_stream_id;
        self.next_stream_id = match id.checked_add(2) {
            Some(next) if next <= 0x7fff_ffff => next,
            _ => return Err(Error::new_not_available(Unavailable::Exhausted)),
        };
        self.streams.insert(id, Stream::default());
        trace!("reserved stream {}", id);
        Ok(id as StreamId)
    }

    fn submit_headers(
        &mut self,
        stream_id: StreamId,
        headers: &[Header],
        end_stream: bool,
    ) -> crate::Result<()> {
        validate_fields(headers)?;
        let stream = self.stream_for_submit(stream_id)?;
        if stream.reset {
            return Err(Error::new_misuse(Misuse::StreamReset));
        }
        if stream.end_sent {
            return Err(Error::new_misuse(Misuse::EndStream));
        }
        let trailers = stream.headers_sent;
        if trailers {
            if !end_stream {
                return Err(Error::new_misuse(Misuse::HeadersSent));
            }
            if headers.iter().any(Header::is_pseudo) {
                return Err(Error::new_misuse(Misuse::PseudoHeader));
            }
        }
        stream.headers_sent = true;
        stream.end_sent = end_stream;

        let fields: Vec<(Vec<u8>, Vec<u8>)> = headers
            .iter()
            .map(|h| (h.name().to_ascii_lowercase(), h.value().to_vec()))
            .collect();
        let fragment = self
            .hpack_tx
            .encode(fields.iter().map(|(n, v)| (&n[..], &v[..])));
        self.write_header_block(stream_id as u32, &fragment, end_stream);
        Ok(())
    }

    fn submit_data(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    ) -> crate::Result<()> {
        let stream = self.stream_for_submit(stream_id)?;
        if stream.reset {
            return Err(Error::new_misuse(Misuse::StreamReset));
        }
        if !stream.headers_sent {
            return Err(Error::new_misuse(Misuse::HeadersNotSent));
        }
        if stream.end_sent {
            return Err(Error::new_misuse(Misuse::EndStream));
        }
        stream.end_sent = end_stream;

        let id = stream_id as u32;
        let max = self.max_send_frame_size();
        if data.is_empty() {
            let flags = if end_stream { frame::END_STREAM } else { 0 };
            frame::write(&mut self.write_buf, Kind::Data, flags, id, &data);
            return Ok(());
        }
        let mut offset = 0;
        while offset < data.len() {
            let take = max.min(data.len() - offset);
            let last = offset + take == data.len();
            let flags = if last && end_stream { frame::END_STREAM } else { 0 };
            frame::write(
                &mut self.write_buf,
                Kind::Data,
                flags,
                id,
                &data[offset..offset + take],
            );
            offset += take;
        }
        Ok(())
    }

    fn submit_stream_reset(
        &mut self,
        stream_id: StreamId,
        error_code: ErrorCode,
    ) -> crate::Result<()> {
        let stream = self.stream_for_submit(stream_id)?;
        if stream.reset {
            return Err(Error::new_misuse(Misuse::StreamReset));
        }
        stream.reset = true;
        let wire = ErrorCodes::HTTP2.encode(error_code) as u32;
        frame::write(
            &mut self.write_buf,
            Kind::Reset,
            0,
            stream_id as u32,
            &wire.to_be_bytes(),
        );
        self.events.push_back(Event::StreamResetSent {
            stream_id,
            error_code,
        });
        Ok(())
    }

    fn submit_close(&mut self, error_code: Option<ErrorCode>) -> crate::Result<()> {
        if self.terminal_queued {
            return Err(Error::new_misuse(Misuse::Terminated));
        }
        if self.goaway_sent {
            return Ok(());
        }
        debug!("sending GOAWAY: last peer stream {}", self.last_peer_stream);
        self.write_goaway(error_code.unwrap_or(ErrorCode::NoError));
        Ok(())
    }

    fn poll_event(&mut self) -> Option<Event> {
        if self.terminated {
            return None;
        }
        let event = self.events.pop_front()?;
        if event.is_terminal() {
            self.terminated = true;
            self.events.clear();
        }
        Some(event)
    }

    fn connection_lost(&mut self, cause: Option<io::Error>) {
        if self.terminal_queued {
            return;
        }
        self.terminate(
            ErrorCode::InternalError,
            cause.map(|err| err.to_string()),
        );
    }

    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ConnectionInfo {
        &mut self.info
    }
}

impl TcpProtocol for Connection {
    fn recv_bytes(&mut self, data: &[u8]) {
        if self.terminal_queued {
            trace!("dropping {} bytes received after termination", data.len());
            return;
        }
        self.read_buf.extend_from_slice(data);
        self.drive();
    }

    fn poll_transmit(&mut self) -> Option<Bytes> {
        if self.write_buf.is_empty() {
            None
        } else {
            Some(self.write_buf.split().freeze())
        }
    }

    fn recv_eof(&mut self) {
        if self.terminal_queued {
            return;
        }
        if self.open_streams() == 0 {
            self.terminate(ErrorCode::NoError, None);
        } else {
            warn!("transport closed with streams in flight");
            self.terminate(
                ErrorCode::InternalError,
                Some("connection closed with streams in flight".to_owned()),
            );
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("h2::Connection")
            .field("role", &self.role)
            .field("streams", &self.streams.len())
            .field("goaway_sent", &self.goaway_sent)
            .field("goaway_received", &self.goaway_received)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pump(a: &mut Connection, b: &mut Connection) {
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

    fn pair() -> (Connection, Connection) {
        let mut client = Connection::new(Role::Client);
        let mut server = Connection::new(Role::Server);
        pump(&mut client, &mut server);
        (client, server)
    }

    fn request_headers() -> Vec<Header> {
        vec![
            Header::new(":method", "GET"),
            Header::new(":scheme", "http"),
            Header::new(":authority", "example.test"),
            Header::new(":path", "/"),
        ]
    }

    #[test]
    fn preface_mismatch_terminates() {
        let mut server = Connection::new(Role::Server);
        server.recv_bytes(b"GET / HTTP/1.1\r\nHost: oops\r\n\r\n");
        match server.poll_event() {
            Some(Event::ConnectionTerminated { error_code, .. }) => {
                assert_eq!(error_code, ErrorCode::ProtocolError);
            }
            other => panic!("expected termination, got {:?}", other),
        }
        assert_eq!(server.poll_event(), None);
    }

    #[test]
    fn stream_ids_are_unique_and_odd_for_clients() {
        let (mut client, mut server) = pair();
        let a = client.reserve_stream_id().unwrap();
        let b = client.reserve_stream_id().unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 3);
        assert_eq!(server.reserve_stream_id().unwrap(), 2);
    }

    #[test]
    fn headers_round_trip() {
        let (mut client, mut server) = pair();
        let id = client.reserve_stream_id().unwrap();
        let mut headers = request_headers();
        headers.push(Header::new("X-Custom", "yes"));
        client.submit_headers(id, &headers, true).unwrap();
        pump(&mut client, &mut server);
        match server.poll_event() {
            Some(Event::HeadersReceived {
                stream_id,
                headers,
                end_stream,
            }) => {
                assert_eq!(stream_id, 1);
                assert!(end_stream);
                // HPACK lowercases names on the wire
                assert!(headers
                    .iter()
                    .any(|h| h.name() == b"x-custom" && h.value() == b"yes"));
                assert_eq!(headers[0].name(), b":method");
            }
            other => panic!("expected HeadersReceived, got {:?}", other),
        }
    }

    #[test]
    fn ping_is_answered() {
        let (mut client, mut server) = pair();
        let mut ping = BytesMut::new();
        frame::write(&mut ping, Kind::Ping, 0, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        server.recv_bytes(&ping);
        let out = server.poll_transmit().unwrap();
        // expect a PING ack among the outbound frames
        let mut rest = &out[..];
        let mut saw_pong = false;
        while rest.len() >= frame::HEADER_LEN {
            let head = Head::parse(&rest[..frame::HEADER_LEN]);
            let total = frame::HEADER_LEN + head.len as usize;
            if head.kind == Kind::Ping && head.is_ack() {
                assert_eq!(&rest[frame::HEADER_LEN..total], &[1, 2, 3, 4, 5, 6, 7, 8]);
                saw_pong = true;
            }
            rest = &rest[total..];
        }
        assert!(saw_pong);
        assert_eq!(client.poll_event(), None);
    }

    #[test]
    fn push_promise_is_rejected() {
        let (mut client, mut _server) = pair();
        let mut buf = BytesMut::new();
        frame::write(&mut buf, Kind::PushPromise, frame::END_HEADERS, 1, &[0, 0, 0, 2]);
        client.recv_bytes(&buf);
        match client.poll_event() {
            Some(Event::ConnectionTerminated { error_code, .. }) => {
                assert_eq!(error_code, ErrorCode::ProtocolError);
            }
            other => panic!("expected termination, got {:?}", other),
        }
    }

    #[test]
    fn goaway_blocks_new_streams() {
        let (mut client, mut server) = pair();
        server.submit_close(None).unwrap();
        pump(&mut client, &mut server);
        match client.poll_event() {
            Some(Event::GoawayReceived {
                last_stream_id,
                error_code,
            }) => {
                assert_eq!(last_stream_id, 0);
                assert_eq!(error_code, ErrorCode::NoError);
            }
            other => panic!("expected GoawayReceived, got {:?}", other),
        }
        assert!(client.reserve_stream_id().unwrap_err().is_not_available());
        assert!(!client.is_available());
        assert!(!server.is_available());
    }

    #[test]
    fn submit_on_unreserved_stream_is_misuse() {
        let (mut client, _server) = pair();
        let err = client
            .submit_headers(7, &request_headers(), true)
            .unwrap_err();
        assert!(err.is_misuse());
    }

    #[test]
    fn trailers_must_end_stream() {
        let (mut client, _server) = pair();
        let id = client.reserve_stream_id().unwrap();
        client.submit_headers(id, &request_headers(), false).unwrap();
        let trailer = [Header::new("x-checksum", "abc")];
        assert!(client.submit_headers(id, &trailer, false).unwrap_err().is_misuse());
        client.submit_headers(id, &trailer, true).unwrap();
    }
}
