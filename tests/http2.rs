//! End-to-end HTTP/2 scenarios over paired client/server engines.

mod support;

use bytes::Bytes;
use polyhttp::proto::{h2, HttpProtocol};
use polyhttp::{ErrorCode, Event, Header, Role};
use support::{expect_data, expect_headers, header, pump};

fn handshaken_pair() -> (h2::Connection, h2::Connection) {
    let mut client = h2::Connection::new(Role::Client);
    let mut server = h2::Connection::new(Role::Server);
    pump(&mut client, &mut server);
    (client, server)
}

fn request(path: &'static str) -> Vec<Header> {
    vec![
        Header::new(":method", "GET"),
        Header::new(":scheme", "http"),
        Header::new(":authority", "example.test"),
        Header::new(":path", path),
    ]
}

#[test]
fn concurrent_streams_keep_their_order() {
    let _ = pretty_env_logger::try_init();
    let (mut client, mut server) = handshaken_pair();

    let first = client.reserve_stream_id().unwrap();
    let second = client.reserve_stream_id().unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 3);

    client.submit_headers(first, &request("/one"), true).unwrap();
    client.submit_headers(second, &request("/two"), true).unwrap();
    pump(&mut client, &mut server);

    // arrival order on the server follows the wire order
    let (id, headers, end_stream) = expect_headers(server.poll_event());
    assert_eq!(id, 1);
    assert!(end_stream);
    assert_eq!(header(&headers, ":path"), b"/one");
    let (id, headers, _) = expect_headers(server.poll_event());
    assert_eq!(id, 3);
    assert_eq!(header(&headers, ":path"), b"/two");

    // the server answers stream 3 first; the client sees that order
    server
        .submit_headers(3, &[Header::new(":status", "200")], false)
        .unwrap();
    server
        .submit_data(3, Bytes::from_static(b"3333333333"), true)
        .unwrap();
    server
        .submit_headers(1, &[Header::new(":status", "200")], false)
        .unwrap();
    server
        .submit_data(1, Bytes::from_static(b"1111111111"), true)
        .unwrap();
    pump(&mut client, &mut server);

    let (id, headers, _) = expect_headers(client.poll_event());
    assert_eq!(id, 3);
    assert_eq!(header(&headers, ":status"), b"200");
    let (id, data, end_stream) = expect_data(client.poll_event());
    assert_eq!(id, 3);
    assert_eq!(data, b"3333333333");
    assert!(end_stream);
    let (id, _, _) = expect_headers(client.poll_event());
    assert_eq!(id, 1);
    let (id, data, end_stream) = expect_data(client.poll_event());
    assert_eq!(id, 1);
    assert_eq!(data, b"1111111111");
    assert!(end_stream);
}

#[test]
fn rst_stream_is_surfaced_and_later_writes_are_misuse() {
    let (mut client, mut server) = handshaken_pair();

    let id = client.reserve_stream_id().unwrap();
    client.submit_headers(id, &request("/slow"), false).unwrap();
    pump(&mut client, &mut server);
    let _ = expect_headers(server.poll_event());

    server.submit_stream_reset(id, ErrorCode::Cancel).unwrap();
    assert_eq!(
        server.poll_event(),
        Some(Event::StreamResetSent {
            stream_id: id,
            error_code: ErrorCode::Cancel,
        })
    );
    pump(&mut client, &mut server);

    assert_eq!(
        client.poll_event(),
        Some(Event::StreamResetReceived {
            stream_id: id,
            error_code: ErrorCode::Cancel,
        })
    );
    let err = client
        .submit_data(id, Bytes::from_static(b"more"), false)
        .unwrap_err();
    assert!(err.is_misuse());
    // the connection itself is unharmed
    assert!(client.is_available());
    assert_eq!(client.reserve_stream_id().unwrap(), 3);
}

#[test]
fn goaway_after_an_exchange_blocks_new_streams() {
    let (mut client, mut server) = handshaken_pair();

    let id = client.reserve_stream_id().unwrap();
    client.submit_headers(id, &request("/only"), true).unwrap();
    pump(&mut client, &mut server);
    let _ = expect_headers(server.poll_event());
    server
        .submit_headers(id, &[Header::new(":status", "204")], true)
        .unwrap();
    pump(&mut client, &mut server);
    let (_, _, end_stream) = expect_headers(client.poll_event());
    assert!(end_stream);

    server.submit_close(None).unwrap();
    pump(&mut client, &mut server);

    match client.poll_event() {
        Some(Event::GoawayReceived {
            last_stream_id,
            error_code,
        }) => {
            assert_eq!(last_stream_id, 1);
            assert_eq!(error_code, ErrorCode::NoError);
        }
        other => panic!("expected GoawayReceived, got {:?}", other),
    }
    assert!(client.reserve_stream_id().unwrap_err().is_not_available());
    assert!(!client.is_available());
}

#[test]
fn large_bodies_are_split_into_frames() {
    let (mut client, mut server) = handshaken_pair();

    let id = client.reserve_stream_id().unwrap();
    let mut headers = request("/upload");
    headers[0] = Header::new(":method", "POST");
    client.submit_headers(id, &headers, false).unwrap();

    // larger than one DATA frame
    let body = vec![0x5a; 40_000];
    client
        .submit_data(id, Bytes::from(body.clone()), true)
        .unwrap();
    pump(&mut client, &mut server);

    let _ = expect_headers(server.poll_event());
    let mut received = Vec::new();
    let mut ended = false;
    while !ended {
        let (data_id, data, end_stream) = expect_data(server.poll_event());
        assert_eq!(data_id, id);
        received.extend_from_slice(&data);
        ended = end_stream;
    }
    assert_eq!(received, body);
}

#[test]
fn header_case_is_normalized_on_the_wire() {
    let (mut client, mut server) = handshaken_pair();
    let id = client.reserve_stream_id().unwrap();
    let mut headers = request("/");
    headers.push(Header::new("X-Trace-Id", "e1ee7"));
    client.submit_headers(id, &headers, true).unwrap();
    pump(&mut client, &mut server);
    let (_, headers, _) = expect_headers(server.poll_event());
    assert_eq!(header(&headers, "x-trace-id"), b"e1ee7");
    assert!(headers.iter().all(|h| h
        .name()
        .iter()
        .all(|b| !b.is_ascii_uppercase())));
}
