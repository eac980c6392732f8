//! The HTTP/1.1 engine.
//!
//! Wraps `httparse` for message heads and maps between the version-neutral
//! pseudo-header vocabulary and HTTP/1.1 request/status lines: on receive
//! the engine synthesizes `:method`/`:scheme`/`:authority`/`:path` (server
//! role) or `:status` (client role); on send it consumes them and
//! reconstructs the wire line. Exactly one exchange is in flight at a time
//! on stream 1, with keep-alive returning the connection to available.

use std::collections::VecDeque;
use std::fmt;
use std::io;

use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode, Uri};
use tracing::{debug, trace};

use crate::error::{Error, Misuse, Unavailable};
use crate::event::Event;
use crate::model::{find_header, validate_fields, ErrorCode, Header, Role, StreamId, Version};
use crate::proto::{ConnectionInfo, HttpProtocol, TcpProtocol};

mod decode;

use self::decode::{Decoded, Decoder};

/// The one stream id HTTP/1.1 ever uses.
pub const STREAM_ID: StreamId = 1;

const MAX_HEADERS: usize = 100;

/// A sans-I/O HTTP/1.1 connection.
pub struct Connection {
    role: Role,
    tls: bool,
    info: ConnectionInfo,
    read_buf: BytesMut,
    write_buf: BytesMut,
    events: VecDeque<Event>,
    reading: Reading,
    writing: Writing,
    /// Method of the exchange in flight; drives response framing.
    method: Option<Method>,
    keep_alive: bool,
    closing: bool,
    busy: bool,
    recv_done: bool,
    send_done: bool,
    terminal_queued: bool,
    terminated: bool,
}

#[derive(Debug)]
enum Reading {
    Head,
    Body(Decoder),
    Done,
    Closed,
}

#[derive(Debug)]
enum Writing {
    Init,
    Body(Encoder),
    Done,
    Closed,
}

#[derive(Debug)]
enum Encoder {
    Length(u64),
    Chunked,
}

impl Connection {
    /// Creates an engine for one transport connection.
    ///
    /// `tls` tells the engine whether the transport announced TLS, which
    /// decides the synthesized `:scheme`.
    pub fn new(role: Role, tls: bool) -> Connection {
        Connection {
            role,
            tls,
            info: ConnectionInfo::default(),
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            events: VecDeque::new(),
            reading: Reading::Head,
            writing: Writing::Init,
            method: None,
            keep_alive: true,
            closing: false,
            busy: false,
            recv_done: false,
            send_done: false,
            terminal_queued: false,
            terminated: false,
        }
    }

    fn drive(&mut self) {
        loop {
            if self.terminal_queued {
                self.read_buf.clear();
                return;
            }
            let progress = match self.reading {
                Reading::Head => {
                    // A client must not interpret bytes before it has sent
                    // a request.
                    if self.role == Role::Client && !self.busy {
                        return;
                    }
                    match self.parse_head() {
                        Ok(progress) => progress,
                        Err(err) => {
                            self.peer_error(err);
                            return;
                        }
                    }
                }
                Reading::Body(_) => match self.decode_body() {
                    Ok(progress) => progress,
                    Err(err) => {
                        self.peer_error(err);
                        return;
                    }
                },
                Reading::Done | Reading::Closed => return,
            };
            if !progress {
                return;
            }
        }
    }

    fn parse_head(&mut self) -> crate::Result<bool> {
        if self.read_buf.is_empty() {
            return Ok(false);
        }
        match self.role {
            Role::Server => self.parse_request_head(),
            Role::Client => self.parse_response_head(),
        }
    }

    fn parse_request_head(&mut self) -> crate::Result<bool> {
        let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut header_buf);
        let len = match req.parse(&self.read_buf).map_err(Error::new_protocol)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Ok(false),
        };
        trace!("request head complete ({} bytes)", len);

        let method = Method::from_bytes(req.method.unwrap().as_bytes())
            .map_err(Error::new_protocol)?;
        let version_11 = req.version.unwrap() == 1;
        let target = req.path.unwrap().to_owned();
        let regular = copy_headers(req.headers);
        let _ = self.read_buf.split_to(len);

        let mut headers = Vec::with_capacity(regular.len() + 4);
        let scheme: &'static str = if self.tls { "https" } else { "http" };
        headers.push(Header::new(":method", Bytes::copy_from_slice(method.as_str().as_bytes())));
        if method == Method::CONNECT {
            headers.push(Header::new(":authority", target.into_bytes()));
        } else if target.starts_with('/') || target == "*" {
            let host = find_header(&regular, b"host")
                .ok_or_else(|| Error::new_protocol("request is missing a host header"))?;
            headers.push(Header::new(":scheme", scheme));
            headers.push(Header::new(":authority", host.value_bytes()));
            headers.push(Header::new(":path", target.into_bytes()));
        } else {
            // absolute-form target: split into authority + path
            let uri: Uri = target.parse().map_err(Error::new_protocol)?;
            let authority = uri
                .authority()
                .ok_or_else(|| Error::new_protocol("absolute-form target has no authority"))?
                .to_string();
            let path = uri
                .path_and_query()
                .map(|pq| pq.as_str().to_owned())
                .unwrap_or_else(|| "/".to_owned());
            headers.push(Header::new(":scheme", scheme));
            headers.push(Header::new(":authority", authority.into_bytes()));
            headers.push(Header::new(":path", path.into_bytes()));
        }
        headers.extend(regular.iter().cloned());

        let decoder = request_decoder(&regular, version_11)?;
        let keep_alive = version_11 && !connection_close(&regular);

        self.busy = true;
        self.method = Some(method);
        self.keep_alive = self.keep_alive && keep_alive;

        let end_stream = decoder == Decoder::length(0);
        self.events.push_back(Event::HeadersReceived {
            stream_id: STREAM_ID,
            headers,
            end_stream,
        });
        if end_stream {
            self.finish_recv();
        } else {
            self.reading = Reading::Body(decoder);
        }
        Ok(true)
    }

    fn parse_response_head(&mut self) -> crate::Result<bool> {
        let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut res = httparse::Response::new(&mut header_buf);
        let len = match res.parse(&self.read_buf).map_err(Error::new_protocol)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Ok(false),
        };
        let code = res.code.unwrap();
        let status = StatusCode::from_u16(code).map_err(Error::new_protocol)?;
        let version_11 = res.version.unwrap() == 1;
        let regular = copy_headers(res.headers);
        let _ = self.read_buf.split_to(len);
        trace!("response head complete: {}", code);

        if status == StatusCode::SWITCHING_PROTOCOLS {
            return Err(Error::new_protocol("101 upgrade is not supported"));
        }
        if status.is_informational() {
            // interim response; the real status is still to come
            trace!("ignoring informational response: {}", code);
            return Ok(true);
        }

        let mut headers = Vec::with_capacity(regular.len() + 1);
        let mut code_buf = itoa::Buffer::new();
        headers.push(Header::new(
            ":status",
            Bytes::copy_from_slice(code_buf.format(code).as_bytes()),
        ));
        headers.extend(regular.iter().cloned());

        let decoder = response_decoder(&regular, version_11, status, self.method.as_ref())?;
        let keep_alive = version_11 && !connection_close(&regular) && !decoder.is_eof();
        self.keep_alive = self.keep_alive && keep_alive;

        let end_stream = decoder == Decoder::length(0);
        self.events.push_back(Event::HeadersReceived {
            stream_id: STREAM_ID,
            headers,
            end_stream,
        });
        if end_stream {
            self.finish_recv();
        } else {
            self.reading = Reading::Body(decoder);
        }
        Ok(true)
    }

    fn decode_body(&mut self) -> crate::Result<bool> {
        let decoder = match self.reading {
            Reading::Body(ref mut decoder) => decoder,
            _ => unreachable!("decode_body outside body state"),
        };
        // Hold one chunk back so `end_stream` can ride on the final data
        // event whenever the body terminator is already buffered.
        let mut held: Option<Bytes> = None;
        loop {
            match decoder.decode(&mut self.read_buf)? {
                Decoded::Chunk(data, true) => {
                    if let Some(prev) = held.take() {
                        self.events.push_back(Event::DataReceived {
                            stream_id: STREAM_ID,
                            data: prev,
                            end_stream: false,
                        });
                    }
                    self.events.push_back(Event::DataReceived {
                        stream_id: STREAM_ID,
                        data,
                        end_stream: true,
                    });
                    self.finish_recv();
                    return Ok(true);
                }
                Decoded::Chunk(data, false) => {
                    if let Some(prev) = held.take() {
                        self.events.push_back(Event::DataReceived {
                            stream_id: STREAM_ID,
                            data: prev,
                            end_stream: false,
                        });
                    }
                    held = Some(data);
                }
                Decoded::Complete => {
                    self.events.push_back(Event::DataReceived {
                        stream_id: STREAM_ID,
                        data: held.take().unwrap_or_default(),
                        end_stream: true,
                    });
                    self.finish_recv();
                    return Ok(true);
                }
                Decoded::Partial => {
                    if let Some(prev) = held.take() {
                        self.events.push_back(Event::DataReceived {
                            stream_id: STREAM_ID,
                            data: prev,
                            end_stream: false,
                        });
                    }
                    return Ok(false);
                }
            }
        }
    }

    fn finish_recv(&mut self) {
        self.recv_done = true;
        self.reading = Reading::Done;
        self.maybe_finish_exchange();
    }

    fn finish_send(&mut self) {
        self.send_done = true;
        self.writing = Writing::Done;
        self.maybe_finish_exchange();
    }

    fn maybe_finish_exchange(&mut self) {
        if !(self.recv_done && self.send_done) {
            return;
        }
        if self.keep_alive && !self.closing {
            trace!("exchange complete; connection available again");
            self.reading = Reading::Head;
            self.writing = Writing::Init;
            self.method = None;
            self.keep_alive = true;
            self.busy = false;
            self.recv_done = false;
            self.send_done = false;
        } else {
            debug!("exchange complete; closing connection");
            self.terminate(ErrorCode::NoError, None);
        }
    }

    fn peer_error(&mut self, err: Error) {
        debug!("peer violated HTTP/1.1: {}", err);
        self.terminate(ErrorCode::ProtocolError, Some(err.to_string()));
    }

    fn terminate(&mut self, error_code: ErrorCode, message: Option<String>) {
        if self.terminal_queued {
            return;
        }
        self.terminal_queued = true;
        self.reading = Reading::Closed;
        self.writing = Writing::Closed;
        self.events.push_back(Event::ConnectionTerminated {
            error_code,
            message,
        });
    }

    fn check_stream(&self, stream_id: StreamId) -> crate::Result<()> {
        if self.terminal_queued {
            return Err(Error::new_misuse(Misuse::Terminated));
        }
        if stream_id != STREAM_ID {
            return Err(Error::new_misuse(Misuse::UnknownStream));
        }
        Ok(())
    }

    fn encode_request_head(
        &mut self,
        headers: &[Header],
        end_stream: bool,
    ) -> crate::Result<()> {
        if self.busy || !matches!(self.writing, Writing::Init) {
            return Err(Error::new_misuse(Misuse::Busy));
        }
        let method_raw =
            pseudo(headers, b":method").ok_or(Error::new_misuse(Misuse::PseudoHeader))?;
        let method = Method::from_bytes(method_raw)
            .map_err(|_| Error::new_misuse(Misuse::PseudoHeader))?;
        let authority = pseudo(headers, b":authority");
        let target: &[u8] = if method == Method::CONNECT {
            authority.ok_or(Error::new_misuse(Misuse::PseudoHeader))?
        } else {
            pseudo(headers, b":path").ok_or(Error::new_misuse(Misuse::PseudoHeader))?
        };

        let mut head = BytesMut::with_capacity(64 + header_size(headers));
        head.extend_from_slice(method.as_str().as_bytes());
        head.extend_from_slice(b" ");
        head.extend_from_slice(target);
        head.extend_from_slice(b" HTTP/1.1\r\n");
        if find_header(headers, b"host").is_none() {
            if let Some(authority) = authority {
                head.extend_from_slice(b"host: ");
                head.extend_from_slice(authority);
                head.extend_from_slice(b"\r\n");
            }
        }
        write_fields(&mut head, headers);

        let encoder = match declared_length(headers)? {
            Some(len) => Encoder::Length(len),
            None if end_stream => {
                head.extend_from_slice(b"content-length: 0\r\n");
                Encoder::Length(0)
            }
            None => {
                head.extend_from_slice(b"transfer-encoding: chunked\r\n");
                Encoder::Chunked
            }
        };
        head.extend_from_slice(b"\r\n");

        self.write_buf.extend_from_slice(&head);
        self.busy = true;
        self.method = Some(method);
        self.keep_alive = self.keep_alive && !connection_close(headers);
        if end_stream {
            self.finish_send();
        } else {
            self.writing = Writing::Body(encoder);
        }
        Ok(())
    }

    fn encode_response_head(
        &mut self,
        headers: &[Header],
        end_stream: bool,
    ) -> crate::Result<()> {
        if !self.busy {
            // no request to answer yet
            return Err(Error::new_misuse(Misuse::HeadersNotSent));
        }
        match self.writing {
            Writing::Init => {}
            Writing::Body(_) => return Err(Error::new_misuse(Misuse::HeadersSent)),
            Writing::Done | Writing::Closed => {
                return Err(Error::new_misuse(Misuse::EndStream))
            }
        }
        let status_raw =
            pseudo(headers, b":status").ok_or(Error::new_misuse(Misuse::PseudoHeader))?;
        let status = std::str::from_utf8(status_raw)
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or(Error::new_misuse(Misuse::PseudoHeader))?;
        if status.is_informational() {
            return Err(Error::new_misuse(Misuse::Status));
        }

        let mut head = BytesMut::with_capacity(64 + header_size(headers));
        head.extend_from_slice(b"HTTP/1.1 ");
        let mut code_buf = itoa::Buffer::new();
        head.extend_from_slice(code_buf.format(status.as_u16()).as_bytes());
        head.extend_from_slice(b" ");
        head.extend_from_slice(status.canonical_reason().unwrap_or("").as_bytes());
        head.extend_from_slice(b"\r\n");
        write_fields(&mut head, headers);

        let can_have_body = match self.method {
            Some(ref method) if *method == Method::HEAD => false,
            Some(ref method) if *method == Method::CONNECT && status.is_success() => false,
            _ => !matches!(
                status,
                StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED
            ),
        };
        let encoder = match declared_length(headers)? {
            Some(len) => Encoder::Length(len),
            None if !can_have_body => Encoder::Length(0),
            None if end_stream => {
                head.extend_from_slice(b"content-length: 0\r\n");
                Encoder::Length(0)
            }
            None => {
                head.extend_from_slice(b"transfer-encoding: chunked\r\n");
                Encoder::Chunked
            }
        };
        head.extend_from_slice(b"\r\n");

        self.write_buf.extend_from_slice(&head);
        self.keep_alive = self.keep_alive && !connection_close(headers);
        if end_stream {
            self.finish_send();
        } else {
            self.writing = Writing::Body(encoder);
        }
        Ok(())
    }
}

impl HttpProtocol for Connection {
    fn version(&self) -> Version {
        Version::Http1
    }

    fn is_available(&self) -> bool {
        !self.terminal_queued && !self.closing && !self.busy
    }

    fn reserve_stream_id(&mut self) -> crate::Result<StreamId> {
        if self.terminal_queued {
            return Err(Error::new_not_available(Unavailable::Terminated));
        }
        if self.closing {
            return Err(Error::new_not_available(Unavailable::Closing));
        }
        if self.busy {
            return Err(Error::new_not_available(Unavailable::Busy));
        }
        Ok(STREAM_ID)
    }

    fn submit_headers(
        &mut self,
        stream_id: StreamId,
        headers: &[Header],
        end_stream: bool,
    ) -> crate::Result<()> {
        self.check_stream(stream_id)?;
        validate_fields(headers)?;
        match self.role {
            Role::Client => self.encode_request_head(headers, end_stream)?,
            Role::Server => self.encode_response_head(headers, end_stream)?,
        }
        // a completed exchange may unblock buffered bytes
        if !self.busy && !self.read_buf.is_empty() {
            self.drive();
        }
        Ok(())
    }

    fn submit_data(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    ) -> crate::Result<()> {
        self.check_stream(stream_id)?;
        match self.writing {
            Writing::Init => Err(Error::new_misuse(Misuse::HeadersNotSent)),
            Writing::Done | Writing::Closed => Err(Error::new_misuse(Misuse::EndStream)),
            Writing::Body(Encoder::Length(remaining)) => {
                let len = data.len() as u64;
                if len > remaining {
                    return Err(Error::new_misuse(Misuse::ContentLength));
                }
                if end_stream && remaining != len {
                    return Err(Error::new_misuse(Misuse::ContentLength));
                }
                self.write_buf.extend_from_slice(&data);
                if end_stream {
                    self.finish_send();
                    if !self.busy && !self.read_buf.is_empty() {
                        self.drive();
                    }
                } else {
                    self.writing = Writing::Body(Encoder::Length(remaining - len));
                }
                Ok(())
            }
            Writing::Body(Encoder::Chunked) => {
                if !data.is_empty() {
                    self.write_buf
                        .extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
                    self.write_buf.extend_from_slice(&data);
                    self.write_buf.extend_from_slice(b"\r\n");
                }
                if end_stream {
                    self.write_buf.extend_from_slice(b"0\r\n\r\n");
                    self.finish_send();
                    if !self.busy && !self.read_buf.is_empty() {
                        self.drive();
                    }
                }
                Ok(())
            }
        }
    }

    fn submit_stream_reset(
        &mut self,
        stream_id: StreamId,
        error_code: ErrorCode,
    ) -> crate::Result<()> {
        self.check_stream(stream_id)?;
        // HTTP/1.1 has no reset primitive; tearing down the connection is
        // the only way to abort an exchange.
        debug!("stream reset closes the HTTP/1.1 connection");
        self.events.push_back(Event::StreamResetSent {
            stream_id: STREAM_ID,
            error_code,
        });
        self.terminate(error_code, None);
        Ok(())
    }

    fn submit_close(&mut self, error_code: Option<ErrorCode>) -> crate::Result<()> {
        if self.terminal_queued {
            return Err(Error::new_misuse(Misuse::Terminated));
        }
        self.closing = true;
        self.keep_alive = false;
        if !self.busy {
            self.terminate(error_code.unwrap_or(ErrorCode::NoError), None);
        }
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
        match self.reading {
            Reading::Body(ref decoder) if decoder.is_eof() => {
                // close-delimited body: eof is the terminator
                self.events.push_back(Event::DataReceived {
                    stream_id: STREAM_ID,
                    data: Bytes::new(),
                    end_stream: true,
                });
                self.finish_recv();
            }
            Reading::Head if !self.busy && self.read_buf.is_empty() => {
                self.terminate(ErrorCode::NoError, None);
            }
            Reading::Done => {
                // peer half-closed after its message; we may still write
                self.reading = Reading::Closed;
            }
            _ => {
                self.peer_error(Error::new_protocol(
                    "connection closed before message completed",
                ));
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("h1::Connection")
            .field("role", &self.role)
            .field("reading", &self.reading)
            .field("writing", &self.writing)
            .field("busy", &self.busy)
            .finish()
    }
}

fn copy_headers(parsed: &[httparse::Header<'_>]) -> Vec<Header> {
    parsed
        .iter()
        .map(|h| {
            Header::new(
                Bytes::copy_from_slice(h.name.as_bytes()),
                Bytes::copy_from_slice(h.value),
            )
        })
        .collect()
}

fn pseudo<'a>(headers: &'a [Header], name: &[u8]) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|h| h.name() == name)
        .map(|h| h.value())
}

fn header_size(headers: &[Header]) -> usize {
    headers
        .iter()
        .map(|h| h.name().len() + h.value().len() + 4)
        .sum()
}

fn write_fields(dst: &mut BytesMut, headers: &[Header]) {
    for header in headers.iter().filter(|h| !h.is_pseudo()) {
        dst.extend_from_slice(header.name());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(header.value());
        dst.extend_from_slice(b"\r\n");
    }
}

/// The `content-length` the caller declared, if any.
fn declared_length(headers: &[Header]) -> crate::Result<Option<u64>> {
    match find_header(headers, b"content-length") {
        Some(header) => std::str::from_utf8(header.value())
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Some)
            .ok_or(Error::new_misuse(Misuse::ContentLength)),
        None => Ok(None),
    }
}

/// Whether `connection: close` is among the field lines.
fn connection_close(headers: &[Header]) -> bool {
    headers
        .iter()
        .filter(|h| h.name().eq_ignore_ascii_case(b"connection"))
        .any(|h| {
            h.value()
                .split(|&b| b == b',')
                .any(|token| trim(token).eq_ignore_ascii_case(b"close"))
        })
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace());
    match (start, end) {
        (Some(start), Some(end)) => &bytes[start..=end],
        _ => b"",
    }
}

/// Decides incoming request body framing per RFC 9112 §6.
fn request_decoder(headers: &[Header], version_11: bool) -> crate::Result<Decoder> {
    if let Some(te) = find_header(headers, b"transfer-encoding") {
        if !version_11 {
            return Err(Error::new_protocol("HTTP/1.0 cannot use transfer-encoding"));
        }
        if final_coding_is_chunked(te.value()) {
            return Ok(Decoder::chunked());
        }
        return Err(Error::new_protocol(
            "request transfer-encoding does not end in chunked",
        ));
    }
    match parse_content_length(headers)? {
        Some(len) => Ok(Decoder::length(len)),
        None => Ok(Decoder::length(0)),
    }
}

/// Decides incoming response body framing per RFC 9112 §6.
fn response_decoder(
    headers: &[Header],
    version_11: bool,
    status: StatusCode,
    method: Option<&Method>,
) -> crate::Result<Decoder> {
    if matches!(
        status,
        StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED
    ) {
        return Ok(Decoder::length(0));
    }
    if method == Some(&Method::HEAD) {
        return Ok(Decoder::length(0));
    }
    if method == Some(&Method::CONNECT) && status.is_success() {
        return Ok(Decoder::length(0));
    }
    if let Some(te) = find_header(headers, b"transfer-encoding") {
        if !version_11 {
            return Err(Error::new_protocol("HTTP/1.0 cannot use transfer-encoding"));
        }
        if final_coding_is_chunked(te.value()) {
            return Ok(Decoder::chunked());
        }
        // not chunked: the body runs until the connection closes
        return Ok(Decoder::eof());
    }
    match parse_content_length(headers)? {
        Some(len) => Ok(Decoder::length(len)),
        None => Ok(Decoder::eof()),
    }
}

fn final_coding_is_chunked(value: &[u8]) -> bool {
    value
        .split(|&b| b == b',')
        .last()
        .map(|token| trim(token).eq_ignore_ascii_case(b"chunked"))
        .unwrap_or(false)
}

fn parse_content_length(headers: &[Header]) -> crate::Result<Option<u64>> {
    let mut length: Option<u64> = None;
    for header in headers
        .iter()
        .filter(|h| h.name().eq_ignore_ascii_case(b"content-length"))
    {
        let value = std::str::from_utf8(header.value())
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| Error::new_protocol("invalid content-length"))?;
        match length {
            Some(prev) if prev != value => {
                return Err(Error::new_protocol("conflicting content-length headers"));
            }
            _ => length = Some(value),
        }
    }
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_value<'a>(headers: &'a [Header], name: &[u8]) -> &'a [u8] {
        find_header(headers, name).expect("header missing").value()
    }

    fn recv_headers(conn: &mut Connection) -> (Vec<Header>, bool) {
        match conn.poll_event() {
            Some(Event::HeadersReceived {
                headers,
                end_stream,
                ..
            }) => (headers, end_stream),
            other => panic!("expected HeadersReceived, got {:?}", other),
        }
    }

    #[test]
    fn request_pseudo_synthesis() {
        let _ = pretty_env_logger::try_init();
        let mut server = Connection::new(Role::Server, false);
        server.recv_bytes(b"GET /echo HTTP/1.1\r\nHost: example.test\r\nAccept: */*\r\n\r\n");
        let (headers, end_stream) = recv_headers(&mut server);
        assert!(end_stream);
        assert_eq!(header_value(&headers, b":method"), b"GET");
        assert_eq!(header_value(&headers, b":scheme"), b"http");
        assert_eq!(header_value(&headers, b":authority"), b"example.test");
        assert_eq!(header_value(&headers, b":path"), b"/echo");
        // pseudo-headers precede regular ones
        assert!(headers[..4].iter().all(Header::is_pseudo));
        assert_eq!(header_value(&headers, b"accept"), b"*/*");
        assert!(server.busy);
    }

    #[test]
    fn tls_transport_means_https_scheme() {
        let mut server = Connection::new(Role::Server, true);
        server.recv_bytes(b"GET / HTTP/1.1\r\nHost: example.test\r\n\r\n");
        let (headers, _) = recv_headers(&mut server);
        assert_eq!(header_value(&headers, b":scheme"), b"https");
    }

    #[test]
    fn absolute_form_target_is_split() {
        let mut server = Connection::new(Role::Server, false);
        server.recv_bytes(b"GET http://example.test/over/there?q=1 HTTP/1.1\r\nHost: other\r\n\r\n");
        let (headers, _) = recv_headers(&mut server);
        assert_eq!(header_value(&headers, b":authority"), b"example.test");
        assert_eq!(header_value(&headers, b":path"), b"/over/there?q=1");
    }

    #[test]
    fn missing_host_is_a_protocol_error() {
        let mut server = Connection::new(Role::Server, false);
        server.recv_bytes(b"GET / HTTP/1.1\r\n\r\n");
        match server.poll_event() {
            Some(Event::ConnectionTerminated { error_code, .. }) => {
                assert_eq!(error_code, ErrorCode::ProtocolError);
            }
            other => panic!("expected termination, got {:?}", other),
        }
        assert_eq!(server.poll_event(), None);
        assert_eq!(server.poll_event(), None);
    }

    #[test]
    fn request_with_body() {
        let mut server = Connection::new(Role::Server, false);
        server.recv_bytes(b"POST /u HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhel");
        let (_, end_stream) = recv_headers(&mut server);
        assert!(!end_stream);
        assert_eq!(
            server.poll_event(),
            Some(Event::DataReceived {
                stream_id: STREAM_ID,
                data: Bytes::from_static(b"hel"),
                end_stream: false,
            })
        );
        server.recv_bytes(b"lo");
        assert_eq!(
            server.poll_event(),
            Some(Event::DataReceived {
                stream_id: STREAM_ID,
                data: Bytes::from_static(b"lo"),
                end_stream: true,
            })
        );
    }

    #[test]
    fn client_encodes_request_line_from_pseudo_headers() {
        let mut client = Connection::new(Role::Client, false);
        assert_eq!(client.reserve_stream_id().unwrap(), 1);
        client
            .submit_headers(
                1,
                &[
                    Header::new(":method", "GET"),
                    Header::new(":scheme", "http"),
                    Header::new(":authority", "example.test"),
                    Header::new(":path", "/"),
                ],
                true,
            )
            .unwrap();
        let bytes = client.poll_transmit().unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("GET / HTTP/1.1\r\n"), "{:?}", text);
        assert!(text.contains("host: example.test\r\n"));
        assert!(text.contains("content-length: 0\r\n"));
        // pseudo-headers never hit the wire
        assert!(!text.contains(":method"));
        assert!(!text.contains(":path"));
        assert!(client.poll_transmit().is_none());
    }

    #[test]
    fn full_exchange_returns_to_available() {
        let mut client = Connection::new(Role::Client, false);
        client
            .submit_headers(
                1,
                &[
                    Header::new(":method", "GET"),
                    Header::new(":scheme", "http"),
                    Header::new(":authority", "h"),
                    Header::new(":path", "/"),
                ],
                true,
            )
            .unwrap();
        assert!(!client.is_available());
        let _ = client.poll_transmit();
        client.recv_bytes(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi");
        let (headers, end_stream) = recv_headers(&mut client);
        assert_eq!(header_value(&headers, b":status"), b"200");
        assert!(!end_stream);
        assert_eq!(
            client.poll_event(),
            Some(Event::DataReceived {
                stream_id: STREAM_ID,
                data: Bytes::from_static(b"hi"),
                end_stream: true,
            })
        );
        assert!(client.is_available());
        assert_eq!(client.reserve_stream_id().unwrap(), 1);
    }

    #[test]
    fn chunked_response_ends_on_terminator() {
        let mut client = Connection::new(Role::Client, false);
        client
            .submit_headers(1, &get_headers(), true)
            .unwrap();
        client.recv_bytes(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nhi\r\n0\r\n\r\n",
        );
        let (_, end_stream) = recv_headers(&mut client);
        assert!(!end_stream);
        assert_eq!(
            client.poll_event(),
            Some(Event::DataReceived {
                stream_id: STREAM_ID,
                data: Bytes::from_static(b"hi"),
                end_stream: true,
            })
        );
    }

    #[test]
    fn informational_responses_are_skipped() {
        let mut client = Connection::new(Role::Client, false);
        client.submit_headers(1, &get_headers(), true).unwrap();
        client.recv_bytes(b"HTTP/1.1 103 Early Hints\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        let (headers, end_stream) = recv_headers(&mut client);
        assert_eq!(header_value(&headers, b":status"), b"200");
        assert!(end_stream);
    }

    #[test]
    fn close_delimited_response_needs_eof() {
        let mut client = Connection::new(Role::Client, false);
        client.submit_headers(1, &get_headers(), true).unwrap();
        client.recv_bytes(b"HTTP/1.1 200 OK\r\n\r\npartial");
        let (_, end_stream) = recv_headers(&mut client);
        assert!(!end_stream);
        assert_eq!(
            client.poll_event(),
            Some(Event::DataReceived {
                stream_id: STREAM_ID,
                data: Bytes::from_static(b"partial"),
                end_stream: false,
            })
        );
        client.recv_eof();
        assert_eq!(
            client.poll_event(),
            Some(Event::DataReceived {
                stream_id: STREAM_ID,
                data: Bytes::new(),
                end_stream: true,
            })
        );
        // close-delimited bodies can never keep the connection alive
        match client.poll_event() {
            Some(Event::ConnectionTerminated { error_code, .. }) => {
                assert_eq!(error_code, ErrorCode::NoError);
            }
            other => panic!("expected termination, got {:?}", other),
        }
    }

    #[test]
    fn second_request_while_busy_is_misuse() {
        let mut client = Connection::new(Role::Client, false);
        client.submit_headers(1, &get_headers(), true).unwrap();
        let err = client
            .submit_headers(1, &get_headers(), true)
            .unwrap_err();
        assert!(err.is_misuse());
        assert!(client.reserve_stream_id().unwrap_err().is_not_available());
    }

    #[test]
    fn data_before_headers_is_misuse() {
        let mut client = Connection::new(Role::Client, false);
        let err = client
            .submit_data(1, Bytes::from_static(b"x"), false)
            .unwrap_err();
        assert!(err.is_misuse());
    }

    #[test]
    fn data_beyond_content_length_is_misuse() {
        let mut client = Connection::new(Role::Client, false);
        let mut headers = get_headers();
        headers[0] = Header::new(":method", "POST");
        headers.push(Header::new("content-length", "3"));
        client.submit_headers(1, &headers, false).unwrap();
        let err = client
            .submit_data(1, Bytes::from_static(b"toolong"), false)
            .unwrap_err();
        assert!(err.is_misuse());
        // the connection survives misuse untouched
        client.submit_data(1, Bytes::from_static(b"abc"), true).unwrap();
    }

    #[test]
    fn connection_close_terminates_after_exchange() {
        let mut server = Connection::new(Role::Server, false);
        server.recv_bytes(b"GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n");
        let _ = recv_headers(&mut server);
        server
            .submit_headers(1, &[Header::new(":status", "200")], true)
            .unwrap();
        match server.poll_event() {
            Some(Event::ConnectionTerminated { error_code, .. }) => {
                assert_eq!(error_code, ErrorCode::NoError);
            }
            other => panic!("expected termination, got {:?}", other),
        }
        assert!(server
            .submit_headers(1, &[Header::new(":status", "200")], true)
            .unwrap_err()
            .is_misuse());
    }

    #[test]
    fn reset_tears_the_connection_down() {
        let mut client = Connection::new(Role::Client, false);
        client.submit_headers(1, &get_headers(), false).unwrap();
        client
            .submit_stream_reset(1, ErrorCode::Cancel)
            .unwrap();
        assert_eq!(
            client.poll_event(),
            Some(Event::StreamResetSent {
                stream_id: STREAM_ID,
                error_code: ErrorCode::Cancel,
            })
        );
        assert!(matches!(
            client.poll_event(),
            Some(Event::ConnectionTerminated { .. })
        ));
        assert_eq!(client.poll_event(), None);
    }

    #[test]
    fn eof_mid_message_is_a_protocol_error() {
        let mut server = Connection::new(Role::Server, false);
        server.recv_bytes(b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 10\r\n\r\nabc");
        let _ = recv_headers(&mut server);
        let _ = server.poll_event(); // partial data
        server.recv_eof();
        match server.poll_event() {
            Some(Event::ConnectionTerminated { error_code, .. }) => {
                assert_eq!(error_code, ErrorCode::ProtocolError);
            }
            other => panic!("expected termination, got {:?}", other),
        }
    }

    fn get_headers() -> Vec<Header> {
        vec![
            Header::new(":method", "GET"),
            Header::new(":scheme", "http"),
            Header::new(":authority", "h"),
            Header::new(":path", "/"),
        ]
    }
}
