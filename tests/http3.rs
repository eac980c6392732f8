//! End-to-end HTTP/3 over a real in-memory QUIC handshake: both engines'
//! datagram batches are fed straight into each other.

use std::io::Write;
use std::net::SocketAddr;

use bytes::Bytes;
use polyhttp::factory::{Http3ClientFactory, Http3ServerFactory, QuicClientFactory, QuicServerFactory};
use polyhttp::proto::{HttpProtocol, QuicProtocol};
use polyhttp::tls::{ClientTlsConfig, ServerTlsConfig, TrustAnchor};
use polyhttp::{Datagram, Event, Header};

const CLIENT_ADDR: &str = "127.0.0.1:45301";
const SERVER_ADDR: &str = "127.0.0.1:4433";

struct Pair {
    client: Box<dyn QuicProtocol>,
    server: Box<dyn QuicProtocol>,
    client_addr: SocketAddr,
    server_addr: SocketAddr,
    // keeps the PEM files alive for the duration of the test
    _cert: tempfile::NamedTempFile,
    _key: tempfile::NamedTempFile,
}

impl Pair {
    fn new() -> Pair {
        let _ = pretty_env_logger::try_init();

        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let mut cert_file = tempfile::NamedTempFile::new().unwrap();
        cert_file.write_all(cert.pem().as_bytes()).unwrap();
        let mut key_file = tempfile::NamedTempFile::new().unwrap();
        key_file
            .write_all(key_pair.serialize_pem().as_bytes())
            .unwrap();

        let client_addr: SocketAddr = CLIENT_ADDR.parse().unwrap();
        let server_addr: SocketAddr = SERVER_ADDR.parse().unwrap();

        let mut server_tls =
            ServerTlsConfig::new(cert_file.path(), key_file.path());
        server_tls.alpn = vec!["h3".to_string()];
        let server_factory = Http3ServerFactory::new(server_tls);

        let client_tls = ClientTlsConfig {
            trust: TrustAnchor::Insecure,
            server_name: Some("localhost".to_string()),
            alpn: vec!["h3".to_string()],
            client_cert: None,
        };
        let client_factory = Http3ClientFactory::new(client_tls);

        let client = client_factory.build(client_addr, server_addr).unwrap();
        let server = server_factory.build(server_addr, client_addr).unwrap();
        Pair {
            client,
            server,
            client_addr,
            server_addr,
            _cert: cert_file,
            _key: key_file,
        }
    }

    /// One exchange of in-flight datagrams in both directions.
    fn pump_once(&mut self) -> bool {
        let mut moved = false;
        for datagram in self.client.poll_transmit() {
            self.server
                .recv_datagram(Datagram::new(datagram.data, self.client_addr));
            moved = true;
        }
        for datagram in self.server.poll_transmit() {
            self.client
                .recv_datagram(Datagram::new(datagram.data, self.server_addr));
            moved = true;
        }
        moved
    }

    fn pump(&mut self) {
        for _ in 0..64 {
            if !self.pump_once() {
                return;
            }
        }
        panic!("datagram exchange did not settle");
    }
}

fn get_request() -> Vec<Header> {
    vec![
        Header::new(":method", "GET"),
        Header::new(":scheme", "https"),
        Header::new(":authority", "localhost"),
        Header::new(":path", "/"),
    ]
}

fn drain_events(conn: &mut Box<dyn QuicProtocol>, into: &mut Vec<Event>) {
    while let Some(event) = conn.poll_event() {
        into.push(event);
    }
}

#[test]
fn request_response_over_quic() {
    let mut pair = Pair::new();

    // actions may be submitted before the handshake finishes
    let stream_id = pair.client.reserve_stream_id().unwrap();
    assert_eq!(stream_id, 0);
    pair.client
        .submit_headers(stream_id, &get_request(), true)
        .unwrap();

    let mut server_events = Vec::new();
    for _ in 0..64 {
        pair.pump();
        drain_events(&mut pair.server, &mut server_events);
        if !server_events.is_empty() {
            break;
        }
    }

    // the request surfaces as exactly one headers event, ended
    let request_end = match server_events.remove(0) {
        Event::HeadersReceived {
            stream_id: 0,
            headers,
            end_stream,
        } => {
            assert_eq!(find(&headers, ":method"), b"GET");
            assert_eq!(find(&headers, ":path"), b"/");
            end_stream
        }
        other => panic!("expected HeadersReceived, got {:?}", other),
    };
    if !request_end {
        // the end may arrive as a separate empty data event
        pair.pump();
        drain_events(&mut pair.server, &mut server_events);
        match server_events.remove(0) {
            Event::DataReceived {
                stream_id: 0,
                data,
                end_stream: true,
            } => assert!(data.is_empty()),
            other => panic!("expected final DataReceived, got {:?}", other),
        }
    }

    // respond with headers + three 10-byte data frames, fin on the last
    pair.server
        .submit_headers(0, &[Header::new(":status", "200")], false)
        .unwrap();
    pair.pump();
    let mut client_events = Vec::new();
    drain_events(&mut pair.client, &mut client_events);

    for i in 0..3u8 {
        let chunk = Bytes::from(vec![b'0' + i; 10]);
        pair.server.submit_data(0, chunk, i == 2).unwrap();
        pair.pump();
        drain_events(&mut pair.client, &mut client_events);
    }

    // exactly one HeadersReceived, then three DataReceived with end_stream
    // only on the third
    assert_eq!(client_events.len(), 4, "events: {:?}", client_events);
    match &client_events[0] {
        Event::HeadersReceived {
            stream_id: 0,
            headers,
            end_stream: false,
        } => {
            assert_eq!(find(headers, ":status"), b"200");
        }
        other => panic!("expected HeadersReceived, got {:?}", other),
    }
    for (i, event) in client_events[1..].iter().enumerate() {
        match event {
            Event::DataReceived {
                stream_id: 0,
                data,
                end_stream,
            } => {
                assert_eq!(data.len(), 10);
                assert_eq!(data[0], b'0' + i as u8);
                assert_eq!(*end_stream, i == 2);
            }
            other => panic!("expected DataReceived, got {:?}", other),
        }
    }
}

#[test]
fn stream_ids_follow_quic_parity() {
    let mut pair = Pair::new();
    assert_eq!(pair.client.reserve_stream_id().unwrap(), 0);
    assert_eq!(pair.client.reserve_stream_id().unwrap(), 4);
    assert_eq!(pair.client.reserve_stream_id().unwrap(), 8);
    // servers answer streams; they cannot initiate requests
    assert!(pair.server.reserve_stream_id().unwrap_err().is_not_available());
}

#[test]
fn reserved_streams_must_open_in_order() {
    let mut pair = Pair::new();
    let first = pair.client.reserve_stream_id().unwrap();
    let second = pair.client.reserve_stream_id().unwrap();
    assert_eq!((first, second), (0, 4));
    let err = pair
        .client
        .submit_headers(second, &get_request(), true)
        .unwrap_err();
    assert!(err.is_misuse());
    pair.client.submit_headers(first, &get_request(), true).unwrap();
    pair.client.submit_headers(second, &get_request(), true).unwrap();
}

#[test]
fn connection_ids_are_reported() {
    let pair = Pair::new();
    assert!(!pair.client.connection_ids().is_empty());
    assert!(!pair.server.connection_ids().is_empty());
}

fn find<'a>(headers: &'a [Header], name: &str) -> &'a [u8] {
    headers
        .iter()
        .find(|h| h.name() == name.as_bytes())
        .unwrap_or_else(|| panic!("missing header {:?}", name))
        .value()
}
