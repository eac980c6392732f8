//! The HTTP/3 engine.
//!
//! Wraps quiche's sans-I/O QUIC transport and its HTTP/3 layer. TLS 1.3 is
//! integrated into QUIC, QPACK and the control/encoder/decoder streams are
//! quiche-internal; what surfaces here is the crate's uniform vocabulary:
//! datagrams in, datagrams out, a timer deadline, and HTTP events.
//!
//! The HTTP/3 layer can only be attached once the QUIC handshake
//! completes, so actions submitted before that are queued in submission
//! order and flushed on establishment. Request streams are reserved
//! locally (0, 4, 8, …) and must be opened in allocation order, which is
//! the order quiche assigns them on the wire.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use quiche::h3::NameValue;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, trace, warn};

use crate::error::{Error, Misuse, Unavailable};
use crate::event::Event;
use crate::model::{
    validate_fields, Datagram, ErrorCode, ErrorCodes, Header, Role, StreamId, Version,
};
use crate::proto::{ConnectionInfo, HttpProtocol, QuicProtocol};
use crate::tls::{ClientTlsConfig, ServerTlsConfig, TrustAnchor};

const MAX_DATAGRAM_SIZE: usize = 1350;
const IDLE_TIMEOUT_MILLIS: u64 = 30_000;
const BODY_READ_CHUNK: usize = 16_384;
/// Largest stream id usable in QUIC's 62-bit space.
const MAX_STREAM_ID: u64 = (1 << 62) - 1;

/// A sans-I/O HTTP/3 connection over an embedded QUIC engine.
pub struct Connection {
    role: Role,
    info: ConnectionInfo,
    local_addr: SocketAddr,
    quic: quiche::Connection,
    h3: Option<quiche::h3::Connection>,
    h3_config: quiche::h3::Config,
    events: VecDeque<Event>,
    /// Actions waiting for the handshake (or stream credit).
    pending: VecDeque<Action>,
    streams: HashMap<u64, Stream>,
    /// Client-reserved request streams, in allocation order.
    reserved: VecDeque<u64>,
    next_stream_id: u64,
    /// Highest peer-initiated request stream seen; goes into our GOAWAY.
    last_peer_stream: u64,
    goaway_sent: bool,
    goaway_received: bool,
    terminal_queued: bool,
    terminated: bool,
}

#[derive(Debug, Default)]
struct Stream {
    headers_sent: bool,
    end_sent: bool,
    /// We already told the caller the peer is done with this stream.
    fin_emitted: bool,
    reset: bool,
}

enum Action {
    Headers {
        stream_id: u64,
        headers: Vec<quiche::h3::Header>,
        end_stream: bool,
    },
    Data {
        stream_id: u64,
        data: Bytes,
        end_stream: bool,
    },
}

impl Action {
    fn stream_id(&self) -> u64 {
        match *self {
            Action::Headers { stream_id, .. } | Action::Data { stream_id, .. } => stream_id,
        }
    }
}

enum Applied {
    Done,
    Blocked(Action),
    Fatal(quiche::h3::Error),
}

impl Connection {
    /// Creates a client engine dialing `remote`.
    pub fn connect(
        local: SocketAddr,
        remote: SocketAddr,
        tls: &ClientTlsConfig,
    ) -> crate::Result<Connection> {
        let mut config = client_config(tls)?;
        let scid = random_cid()?;
        let scid = quiche::ConnectionId::from_ref(&scid);
        let quic = quiche::connect(tls.server_name.as_deref(), &scid, local, remote, &mut config)
            .map_err(Error::new_internal)?;
        debug!("new HTTP/3 client connection to {}", remote);
        Connection::with_transport(Role::Client, local, remote, quic)
    }

    /// Creates a server engine for an incoming Initial from `peer`.
    pub fn accept(
        local: SocketAddr,
        peer: SocketAddr,
        tls: &ServerTlsConfig,
    ) -> crate::Result<Connection> {
        let mut config = server_config(tls)?;
        let scid = random_cid()?;
        let scid = quiche::ConnectionId::from_ref(&scid);
        let quic =
            quiche::accept(&scid, None, local, peer, &mut config).map_err(Error::new_internal)?;
        debug!("new HTTP/3 server connection from {}", peer);
        Connection::with_transport(Role::Server, local, peer, quic)
    }

    fn with_transport(
        role: Role,
        local: SocketAddr,
        remote: SocketAddr,
        quic: quiche::Connection,
    ) -> crate::Result<Connection> {
        let h3_config = quiche::h3::Config::new().map_err(Error::new_internal)?;
        let mut info = ConnectionInfo::default();
        info.local_addr = Some(local);
        info.remote_addr = Some(remote);
        Ok(Connection {
            role,
            info,
            local_addr: local,
            quic,
            h3: None,
            h3_config,
            events: VecDeque::new(),
            pending: VecDeque::new(),
            streams: HashMap::new(),
            reserved: VecDeque::new(),
            next_stream_id: 0,
            last_peer_stream: 0,
            goaway_sent: false,
            goaway_received: false,
            terminal_queued: false,
            terminated: false,
        })
    }

    fn after_io(&mut self) {
        if self.h3.is_none() && self.quic.is_established() {
            match quiche::h3::Connection::with_transport(&mut self.quic, &self.h3_config) {
                Ok(h3) => {
                    trace!("HTTP/3 layer attached");
                    self.h3 = Some(h3);
                }
                Err(err) => {
                    let _ = self.quic.close(
                        true,
                        ErrorCodes::HTTP3.encode(ErrorCode::InternalError),
                        b"",
                    );
                    self.terminate(ErrorCode::InternalError, Some(err.to_string()));
                    return;
                }
            }
        }
        self.flush_pending();
        self.poll_h3();
        self.check_closed();
    }

    fn flush_pending(&mut self) {
        if self.h3.is_none() || self.terminal_queued {
            return;
        }
        while let Some(action) = self.pending.pop_front() {
            match self.apply(action) {
                Applied::Done => {}
                Applied::Blocked(action) => {
                    self.pending.push_front(action);
                    return;
                }
                Applied::Fatal(err) => {
                    self.fatal_h3(err);
                    return;
                }
            }
        }
    }

    fn apply(&mut self, action: Action) -> Applied {
        let h3 = self.h3.as_mut().expect("h3 layer attached");
        match action {
            Action::Headers {
                stream_id,
                headers,
                end_stream,
            } => match self.role {
                Role::Client => {
                    match h3.send_request(&mut self.quic, &headers, end_stream) {
                        Ok(opened) => {
                            if opened != stream_id {
                                // quiche assigns request streams sequentially,
                                // and submits are forced into allocation order
                                warn!(
                                    "reserved stream {} opened as {}",
                                    stream_id, opened
                                );
                            }
                            Applied::Done
                        }
                        Err(quiche::h3::Error::StreamBlocked)
                        | Err(quiche::h3::Error::Done) => Applied::Blocked(Action::Headers {
                            stream_id,
                            headers,
                            end_stream,
                        }),
                        Err(err) => Applied::Fatal(err),
                    }
                }
                Role::Server => {
                    match h3.send_response(&mut self.quic, stream_id, &headers, end_stream) {
                        Ok(()) => Applied::Done,
                        Err(quiche::h3::Error::StreamBlocked)
                        | Err(quiche::h3::Error::Done) => Applied::Blocked(Action::Headers {
                            stream_id,
                            headers,
                            end_stream,
                        }),
                        Err(err) => Applied::Fatal(err),
                    }
                }
            },
            Action::Data {
                stream_id,
                data,
                end_stream,
            } => match h3.send_body(&mut self.quic, stream_id, &data, end_stream) {
                Ok(written) if written < data.len() => Applied::Blocked(Action::Data {
                    stream_id,
                    data: data.slice(written..),
                    end_stream,
                }),
                Ok(_) => Applied::Done,
                Err(quiche::h3::Error::Done) => Applied::Blocked(Action::Data {
                    stream_id,
                    data,
                    end_stream,
                }),
                Err(err) => Applied::Fatal(err),
            },
        }
    }

    fn poll_h3(&mut self) {
        loop {
            if self.terminal_queued {
                return;
            }
            let h3 = match self.h3.as_mut() {
                Some(h3) => h3,
                None => return,
            };
            match h3.poll(&mut self.quic) {
                Ok((stream_id, quiche::h3::Event::Headers { list, .. })) => {
                    let headers: Vec<Header> = list
                        .iter()
                        .map(|h| {
                            Header::new(
                                Bytes::copy_from_slice(h.name()),
                                Bytes::copy_from_slice(h.value()),
                            )
                        })
                        .collect();
                    let fin = self.quic.stream_finished(stream_id);
                    if self.role == Role::Server && stream_id > self.last_peer_stream {
                        self.last_peer_stream = stream_id;
                    }
                    let stream = self.streams.entry(stream_id).or_default();
                    stream.fin_emitted = fin;
                    self.events.push_back(Event::HeadersReceived {
                        stream_id: stream_id as StreamId,
                        headers,
                        end_stream: fin,
                    });
                }
                Ok((stream_id, quiche::h3::Event::Data)) => {
                    if !self.drain_body(stream_id) {
                        return;
                    }
                }
                Ok((stream_id, quiche::h3::Event::Finished)) => {
                    let stream = self.streams.entry(stream_id).or_default();
                    if !stream.fin_emitted {
                        stream.fin_emitted = true;
                        self.events.push_back(Event::DataReceived {
                            stream_id: stream_id as StreamId,
                            data: Bytes::new(),
                            end_stream: true,
                        });
                    }
                }
                Ok((stream_id, quiche::h3::Event::Reset(code))) => {
                    let stream = self.streams.entry(stream_id).or_default();
                    stream.reset = true;
                    self.events.push_back(Event::StreamResetReceived {
                        stream_id: stream_id as StreamId,
                        error_code: ErrorCodes::HTTP3.decode(code),
                    });
                }
                Ok((id, quiche::h3::Event::GoAway)) => {
                    debug!("GOAWAY received: last stream {}", id);
                    self.goaway_received = true;
                    self.events.push_back(Event::GoawayReceived {
                        last_stream_id: id as StreamId,
                        error_code: ErrorCode::NoError,
                    });
                }
                Ok((stream_id, quiche::h3::Event::PriorityUpdate)) => {
                    trace!("ignoring priority update for stream {}", stream_id);
                }
                Err(quiche::h3::Error::Done) => return,
                Err(err) => {
                    self.fatal_h3(err);
                    return;
                }
            }
        }
    }

    /// Reads buffered body for `stream_id`; false when the connection died.
    fn drain_body(&mut self, stream_id: u64) -> bool {
        let mut collected = BytesMut::new();
        let mut buf = [0u8; BODY_READ_CHUNK];
        loop {
            let h3 = match self.h3.as_mut() {
                Some(h3) => h3,
                None => return false,
            };
            match h3.recv_body(&mut self.quic, stream_id, &mut buf) {
                Ok(read) => collected.extend_from_slice(&buf[..read]),
                Err(quiche::h3::Error::Done) => break,
                Err(err) => {
                    self.fatal_h3(err);
                    return false;
                }
            }
        }
        let fin = self.quic.stream_finished(stream_id);
        let stream = self.streams.entry(stream_id).or_default();
        if stream.fin_emitted || (collected.is_empty() && !fin) {
            return true;
        }
        stream.fin_emitted = fin;
        self.events.push_back(Event::DataReceived {
            stream_id: stream_id as StreamId,
            data: collected.freeze(),
            end_stream: fin,
        });
        true
    }

    fn fatal_h3(&mut self, err: quiche::h3::Error) {
        debug!("fatal HTTP/3 error: {}", err);
        let _ = self.quic.close(
            true,
            ErrorCodes::HTTP3.encode(ErrorCode::ProtocolError),
            b"h3 protocol error",
        );
        self.terminate(ErrorCode::ProtocolError, Some(err.to_string()));
    }

    fn check_closed(&mut self) {
        if self.terminal_queued || !self.quic.is_closed() {
            return;
        }
        let (error_code, message) = if let Some(err) = self.quic.peer_error() {
            let code = if err.is_app {
                ErrorCodes::HTTP3.decode(err.error_code)
            } else {
                ErrorCode::InternalError
            };
            (code, Some(String::from_utf8_lossy(&err.reason).into_owned()))
        } else if let Some(err) = self.quic.local_error() {
            let code = if err.is_app {
                ErrorCodes::HTTP3.decode(err.error_code)
            } else {
                ErrorCode::InternalError
            };
            (code, Some(String::from_utf8_lossy(&err.reason).into_owned()))
        } else if self.quic.is_timed_out() {
            (ErrorCode::InternalError, Some("idle timeout".to_owned()))
        } else {
            (ErrorCode::NoError, None)
        };
        self.terminate(error_code, message);
    }

    fn terminate(&mut self, error_code: ErrorCode, message: Option<String>) {
        if self.terminal_queued {
            return;
        }
        self.terminal_queued = true;
        self.pending.clear();
        self.events.push_back(Event::ConnectionTerminated {
            error_code,
            message,
        });
    }

    fn enqueue(&mut self, action: Action) {
        self.pending.push_back(action);
        if self.h3.is_some() {
            self.flush_pending();
        }
    }
}

impl HttpProtocol for Connection {
    fn version(&self) -> Version {
        Version::Http3
    }

    fn is_available(&self) -> bool {
        if self.terminal_queued || self.goaway_sent || self.goaway_received {
            return false;
        }
        if self.role == Role::Server {
            return false;
        }
        if self.quic.is_established() && self.quic.peer_streams_left_bidi() == 0 {
            return false;
        }
        true
    }

    fn reserve_stream_id(&mut self) -> crate::Result<StreamId> {
        if self.terminal_queued {
            return Err(Error::new_not_available(Unavailable::Terminated));
        }
        if self.goaway_sent || self.goaway_received {
            return Err(Error::new_not_available(Unavailable::Goaway));
        }
        if self.role == Role::Server {
            // servers answer request streams; push is out of scope
            return Err(Error::new_not_available(Unavailable::Role));
        }
        if self.quic.is_established() && self.quic.peer_streams_left_bidi() == 0 {
            return Err(Error::new_not_available(Unavailable::MaxConcurrency));
        }
        let id = self.next_stream_id;
        if id > MAX_STREAM_ID {
            return Err(Error::new_not_available(Unavailable::Exhausted));
        }
        self.next_stream_id += 4;
        self.streams.insert(id, Stream::default());
        self.reserved.push_back(id);
        trace!("reserved stream {}", id);
        Ok(id)
    }

    fn submit_headers(
        &mut self,
        stream_id: StreamId,
        headers: &[Header],
        end_stream: bool,
    ) -> crate::Result<()> {
        if self.terminal_queued {
            return Err(Error::new_misuse(Misuse::Terminated));
        }
        validate_fields(headers)?;
        let stream = self
            .streams
            .get(&stream_id)
            .ok_or(Error::new_misuse(Misuse::UnknownStream))?;
        if stream.reset {
            return Err(Error::new_misuse(Misuse::StreamReset));
        }
        if stream.headers_sent {
            return Err(Error::new_misuse(Misuse::HeadersSent));
        }
        if self.role == Role::Client {
            match self.reserved.front() {
                Some(&front) if front == stream_id => {
                    self.reserved.pop_front();
                }
                _ => return Err(Error::new_misuse(Misuse::StreamOrder)),
            }
        }
        let stream = self.streams.get_mut(&stream_id).expect("stream exists");
        stream.headers_sent = true;
        stream.end_sent = end_stream;
        let list: Vec<quiche::h3::Header> = headers
            .iter()
            .map(|h| quiche::h3::Header::new(h.name(), h.value()))
            .collect();
        self.enqueue(Action::Headers {
            stream_id,
            headers: list,
            end_stream,
        });
        Ok(())
    }

    fn submit_data(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    ) -> crate::Result<()> {
        if self.terminal_queued {
            return Err(Error::new_misuse(Misuse::Terminated));
        }
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(Error::new_misuse(Misuse::UnknownStream))?;
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
        self.enqueue(Action::Data {
            stream_id,
            data,
            end_stream,
        });
        Ok(())
    }

    fn submit_stream_reset(
        &mut self,
        stream_id: StreamId,
        error_code: ErrorCode,
    ) -> crate::Result<()> {
        if self.terminal_queued {
            return Err(Error::new_misuse(Misuse::Terminated));
        }
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(Error::new_misuse(Misuse::UnknownStream))?;
        if stream.reset {
            return Err(Error::new_misuse(Misuse::StreamReset));
        }
        stream.reset = true;
        let wire = ErrorCodes::HTTP3.encode(error_code);
        let _ = self
            .quic
            .stream_shutdown(stream_id, quiche::Shutdown::Write, wire);
        let _ = self
            .quic
            .stream_shutdown(stream_id, quiche::Shutdown::Read, wire);
        self.pending.retain(|action| action.stream_id() != stream_id);
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
        let wire = ErrorCodes::HTTP3.encode(error_code.unwrap_or(ErrorCode::NoError));
        if let Some(h3) = self.h3.as_mut() {
            let goaway_id = match self.role {
                Role::Server => self.last_peer_stream,
                Role::Client => 0,
            };
            let _ = h3.send_goaway(&mut self.quic, goaway_id);
        }
        let _ = self.quic.close(true, wire, b"");
        self.goaway_sent = true;
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

impl QuicProtocol for Connection {
    fn recv_datagram(&mut self, datagram: Datagram) {
        if self.terminated {
            return;
        }
        let mut buf = datagram.data.to_vec();
        let info = quiche::RecvInfo {
            from: datagram.addr,
            to: self.local_addr,
        };
        match self.quic.recv(&mut buf, info) {
            Ok(_) | Err(quiche::Error::Done) => {}
            Err(err) => {
                // quiche closes the connection itself on fatal errors
                debug!("quic recv error: {}", err);
            }
        }
        self.after_io();
    }

    fn poll_transmit(&mut self) -> Vec<Datagram> {
        let mut out = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            match self.quic.send(&mut buf) {
                Ok((len, send_info)) => {
                    out.push(Datagram::new(
                        Bytes::copy_from_slice(&buf[..len]),
                        send_info.to,
                    ));
                }
                Err(quiche::Error::Done) => break,
                Err(err) => {
                    debug!("quic send error: {}", err);
                    break;
                }
            }
        }
        self.check_closed();
        out
    }

    fn timeout(&self) -> Option<Instant> {
        self.quic.timeout().map(|delay| Instant::now() + delay)
    }

    fn handle_timeout(&mut self, _now: Instant) {
        self.quic.on_timeout();
        self.after_io();
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn connection_ids(&self) -> Vec<Bytes> {
        self.quic
            .source_ids()
            .map(|cid| Bytes::copy_from_slice(cid.as_ref()))
            .collect()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("h3::Connection")
            .field("role", &self.role)
            .field("established", &self.quic.is_established())
            .field("streams", &self.streams.len())
            .finish()
    }
}

fn random_cid() -> crate::Result<[u8; quiche::MAX_CONN_ID_LEN]> {
    let mut cid = [0u8; quiche::MAX_CONN_ID_LEN];
    SystemRandom::new()
        .fill(&mut cid)
        .map_err(|_| Error::new_internal("system rng failure"))?;
    Ok(cid)
}

fn path_str(path: &Path) -> crate::Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::new_internal("non-utf8 path in TLS config"))
}

fn client_config(tls: &ClientTlsConfig) -> crate::Result<quiche::Config> {
    let mut config =
        quiche::Config::new(quiche::PROTOCOL_VERSION).map_err(Error::new_internal)?;
    set_alpn(&mut config, &tls.alpn)?;
    match tls.trust {
        TrustAnchor::System => {}
        TrustAnchor::CaFile(ref path) => {
            config
                .load_verify_locations_from_file(path_str(path)?)
                .map_err(Error::new_internal)?;
        }
        TrustAnchor::Insecure => config.verify_peer(false),
    }
    if let Some((ref cert, ref key)) = tls.client_cert {
        config
            .load_cert_chain_from_pem_file(path_str(cert)?)
            .map_err(Error::new_internal)?;
        config
            .load_priv_key_from_pem_file(path_str(key)?)
            .map_err(Error::new_internal)?;
    }
    tune(&mut config);
    Ok(config)
}

fn server_config(tls: &ServerTlsConfig) -> crate::Result<quiche::Config> {
    let mut config =
        quiche::Config::new(quiche::PROTOCOL_VERSION).map_err(Error::new_internal)?;
    config
        .load_cert_chain_from_pem_file(path_str(&tls.cert_chain)?)
        .map_err(Error::new_internal)?;
    config
        .load_priv_key_from_pem_file(path_str(&tls.private_key)?)
        .map_err(Error::new_internal)?;
    set_alpn(&mut config, &tls.alpn)?;
    if tls.require_client_auth {
        config.verify_peer(true);
    }
    tune(&mut config);
    Ok(config)
}

fn set_alpn(config: &mut quiche::Config, alpn: &[String]) -> crate::Result<()> {
    let protos: Vec<&[u8]> = if alpn.is_empty() {
        vec![Version::Http3.alpn().as_bytes()]
    } else {
        alpn.iter().map(|p| p.as_bytes()).collect()
    };
    config
        .set_application_protos(&protos)
        .map_err(Error::new_internal)
}

fn tune(config: &mut quiche::Config) {
    config.set_max_idle_timeout(IDLE_TIMEOUT_MILLIS);
    config.set_max_recv_udp_payload_size(MAX_DATAGRAM_SIZE);
    config.set_max_send_udp_payload_size(MAX_DATAGRAM_SIZE);
    config.set_initial_max_data(10_000_000);
    config.set_initial_max_stream_data_bidi_local(1_000_000);
    config.set_initial_max_stream_data_bidi_remote(1_000_000);
    config.set_initial_max_stream_data_uni(1_000_000);
    config.set_initial_max_streams_bidi(100);
    config.set_initial_max_streams_uni(100);
    config.set_disable_active_migration(true);
}
