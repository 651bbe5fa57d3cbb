//! Connection establishment against a scripted in-memory listener.

use oracle_wire_rs::protocol::capabilities::Capabilities;
use oracle_wire_rs::protocol::constants::*;
use oracle_wire_rs::protocol::cookie::{self, ConnectionCookie};
use oracle_wire_rs::protocol::handshake::{establish, Established, HandshakeConfig};
use oracle_wire_rs::protocol::message::write_packet_header;
use oracle_wire_rs::protocol::packet::{PacketStream, Transport};
use oracle_wire_rs::protocol::WriteBuffer;
use oracle_wire_rs::Error;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

fn client_stream(side: DuplexStream) -> PacketStream {
    PacketStream::from_transport(Transport::Secure(Box::new(side)))
}

fn config(descriptor: &str) -> HandshakeConfig<'_> {
    HandshakeConfig {
        connect_descriptor: descriptor,
        service: "SVC",
        server_name: "localhost",
        use_tls: false,
        tls_upgrader: None,
        sdu: TNS_SDU_DEFAULT,
    }
}

/// Frame a raw payload as one packet of the given type.
fn packet(packet_type: u8, payload: &[u8], large: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    write_packet_header(
        &mut buf,
        packet_type,
        0,
        PACKET_HEADER_SIZE + payload.len(),
        large,
    );
    buf.extend_from_slice(payload);
    buf
}

/// Frame a DATA packet carrying `body` and end-of-request.
fn data_packet(body: &[u8], large: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    write_packet_header(
        &mut buf,
        TNS_PACKET_TYPE_DATA,
        0,
        PACKET_HEADER_SIZE + 2 + body.len(),
        large,
    );
    buf.extend_from_slice(&TNS_DATA_FLAGS_END_OF_REQUEST.to_be_bytes());
    buf.extend_from_slice(body);
    buf
}

fn accept_payload(version: u16, flags2: u32, uuid: Option<[u8; 16]>) -> Vec<u8> {
    let mut wbuf = WriteBuffer::new();
    wbuf.write_u16_be(version);
    wbuf.write_u16_be(0);
    wbuf.write_zeros(10);
    wbuf.write_u8(0); // nsi flags
    wbuf.write_zeros(9);
    wbuf.write_u32_be(TNS_SDU_DEFAULT);
    if version >= TNS_VERSION_MIN_OOB_CHECK {
        wbuf.write_zeros(5);
        wbuf.write_u32_be(flags2);
    }
    if let Some(uuid) = uuid {
        wbuf.write_bytes(&uuid);
    }
    wbuf.freeze().to_vec()
}

/// Read one client packet on the server side (8-byte header either layout).
async fn read_client_packet(server: &mut DuplexStream, large: bool) -> Vec<u8> {
    let mut header = [0u8; PACKET_HEADER_SIZE];
    server.read_exact(&mut header).await.unwrap();
    let total = if large {
        u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize
    } else {
        u16::from_be_bytes([header[0], header[1]]) as usize
    };
    let mut rest = vec![0u8; total - PACKET_HEADER_SIZE];
    server.read_exact(&mut rest).await.unwrap();
    let mut whole = header.to_vec();
    whole.extend_from_slice(&rest);
    whole
}

async fn assert_no_more_bytes(server: &mut DuplexStream) {
    let mut probe = [0u8; 1];
    let outcome = tokio::time::timeout(Duration::from_millis(50), server.read(&mut probe)).await;
    assert!(outcome.is_err(), "client sent unexpected bytes");
}

#[tokio::test]
async fn version_mismatch_fails_before_protocol_exchange() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut stream = client_stream(client);
    let mut caps = Capabilities::new();
    let descriptor = "(DESCRIPTION=(CONNECT_DATA=(SERVICE_NAME=SVC)))".to_string();

    let server_task = tokio::spawn(async move {
        let connect = read_client_packet(&mut server, false).await;
        assert_eq!(connect[4], TNS_PACKET_TYPE_CONNECT);

        let accept = accept_payload(300, 0, None);
        server
            .write_all(&packet(TNS_PACKET_TYPE_ACCEPT, &accept, false))
            .await
            .unwrap();

        // no PROTOCOL message may follow the rejected ACCEPT
        assert_no_more_bytes(&mut server).await;
    });

    let outcome = establish(&mut stream, &config(&descriptor), &mut caps).await;
    match outcome {
        Err(Error::ServerVersionNotSupported { version, minimum }) => {
            assert_eq!(version, 300);
            assert_eq!(minimum, TNS_VERSION_MIN_ACCEPTED);
        }
        other => panic!("expected ServerVersionNotSupported, got {:?}", other.err()),
    }
    server_task.await.unwrap();
}

#[tokio::test]
async fn refuse_maps_listener_error_codes() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut stream = client_stream(client);
    let mut caps = Capabilities::new();
    let descriptor = "(DESCRIPTION=(CONNECT_DATA=(SERVICE_NAME=SVC)))".to_string();

    let server_task = tokio::spawn(async move {
        let _connect = read_client_packet(&mut server, false).await;
        let refuse = b"(DESCRIPTION=(TMP=)(VSNNUM=0)(ERR=12514))";
        server
            .write_all(&packet(TNS_PACKET_TYPE_REFUSE, refuse, false))
            .await
            .unwrap();
    });

    let outcome = establish(&mut stream, &config(&descriptor), &mut caps).await;
    assert!(matches!(
        outcome.err(),
        Some(Error::InvalidServiceName { .. })
    ));
    server_task.await.unwrap();
}

#[tokio::test]
async fn resend_retransmits_the_connect() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut stream = client_stream(client);
    let mut caps = Capabilities::new();
    let descriptor = "(DESCRIPTION=(CONNECT_DATA=(SERVICE_NAME=SVC)))".to_string();

    let server_task = tokio::spawn(async move {
        let first = read_client_packet(&mut server, false).await;
        server
            .write_all(&packet(TNS_PACKET_TYPE_RESEND, &[], false))
            .await
            .unwrap();
        let second = read_client_packet(&mut server, false).await;
        // the retransmitted CONNECT is byte-identical
        assert_eq!(first, second);

        server
            .write_all(&packet(TNS_PACKET_TYPE_REFUSE, b"(ERR=12505)", false))
            .await
            .unwrap();
    });

    let outcome = establish(&mut stream, &config(&descriptor), &mut caps).await;
    assert!(matches!(outcome.err(), Some(Error::InvalidSid { .. })));
    server_task.await.unwrap();
}

#[tokio::test]
async fn cookie_hit_skips_protocol_and_data_types() {
    let uuid = [0xA5u8; 16];
    let mut compile_caps = vec![0u8; TNS_CCAP_MAX];
    compile_caps[TNS_CCAP_FIELD_VERSION] = TNS_CCAP_FIELD_VERSION_19_1;
    let mut runtime_caps = vec![0u8; TNS_RCAP_MAX];
    runtime_caps[TNS_RCAP_TTC] = TNS_RCAP_TTC_32K;
    cookie::store(
        uuid,
        "SVC",
        ConnectionCookie {
            protocol_version: TNS_VERSION_DESIRED,
            server_banner: bytes::Bytes::from_static(b"Oracle 23ai"),
            charset_id: TNS_CHARSET_UTF8,
            ncharset_id: TNS_CHARSET_UTF16,
            flags: 0,
            compile_caps,
            runtime_caps,
        },
    );

    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut stream = client_stream(client);
    let mut caps = Capabilities::new();
    let descriptor = "(DESCRIPTION=(CONNECT_DATA=(SERVICE_NAME=SVC)))".to_string();

    let server_task = tokio::spawn(async move {
        let _connect = read_client_packet(&mut server, false).await;
        let accept = accept_payload(TNS_VERSION_DESIRED, TNS_ACCEPT_FLAG_FAST_AUTH, Some(uuid));
        server
            .write_all(&packet(TNS_PACKET_TYPE_ACCEPT, &accept, false))
            .await
            .unwrap();

        // the fast path jumps straight to authentication: nothing else
        // crosses the wire during establishment
        assert_no_more_bytes(&mut server).await;
    });

    match establish(&mut stream, &config(&descriptor), &mut caps)
        .await
        .unwrap()
    {
        Established::Ready { used_cookie } => assert!(used_cookie),
        Established::Redirect(_) => panic!("unexpected redirect"),
    }
    assert_eq!(caps.ttc_field_version, TNS_CCAP_FIELD_VERSION_19_1);
    assert_eq!(caps.max_string_size, TNS_MAX_STRING_SIZE_EXTENDED);
    server_task.await.unwrap();
}

#[tokio::test]
async fn full_capability_negotiation() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut stream = client_stream(client);
    let mut caps = Capabilities::new();
    let descriptor = "(DESCRIPTION=(CONNECT_DATA=(SERVICE_NAME=SVC)))".to_string();

    let server_task = tokio::spawn(async move {
        let _connect = read_client_packet(&mut server, false).await;
        let accept = accept_payload(TNS_VERSION_DESIRED, 0, None);
        server
            .write_all(&packet(TNS_PACKET_TYPE_ACCEPT, &accept, false))
            .await
            .unwrap();

        // version 319 switches both sides to large-SDU headers
        let protocol_request = read_client_packet(&mut server, true).await;
        assert_eq!(protocol_request[4], TNS_PACKET_TYPE_DATA);
        assert_eq!(protocol_request[10], TNS_MSG_TYPE_PROTOCOL);

        let mut reply = WriteBuffer::new();
        reply.write_u8(TNS_MSG_TYPE_PROTOCOL);
        reply.write_u8(6);
        reply.write_u8(0);
        reply.write_bytes(b"Oracle Database 19c Enterprise Edition");
        reply.write_u8(0);
        reply.write_u16_le(TNS_CHARSET_UTF8);
        reply.write_u8(1);
        reply.write_u16_le(0); // element count
        reply.write_u16_be(0); // fdo length
        let mut compile_caps = vec![0u8; TNS_CCAP_MAX];
        compile_caps[TNS_CCAP_FIELD_VERSION] = TNS_CCAP_FIELD_VERSION_19_1;
        reply.write_bytes_with_length(&compile_caps);
        let mut runtime_caps = vec![0u8; TNS_RCAP_MAX];
        runtime_caps[TNS_RCAP_TTC] = TNS_RCAP_TTC_32K;
        reply.write_bytes_with_length(&runtime_caps);
        reply.write_u16_le(TNS_CHARSET_UTF16);
        server
            .write_all(&data_packet(reply.as_bytes(), true))
            .await
            .unwrap();

        let data_types_request = read_client_packet(&mut server, true).await;
        assert_eq!(data_types_request[10], TNS_MSG_TYPE_DATA_TYPES);

        let mut reply = WriteBuffer::new();
        reply.write_u8(TNS_MSG_TYPE_DATA_TYPES);
        reply.write_u16_be(0); // empty data types array
        server
            .write_all(&data_packet(reply.as_bytes(), true))
            .await
            .unwrap();
    });

    match establish(&mut stream, &config(&descriptor), &mut caps)
        .await
        .unwrap()
    {
        Established::Ready { used_cookie } => assert!(!used_cookie),
        Established::Redirect(_) => panic!("unexpected redirect"),
    }
    assert_eq!(caps.protocol_version, TNS_VERSION_DESIRED);
    assert_eq!(caps.ttc_field_version, TNS_CCAP_FIELD_VERSION_19_1);
    assert_eq!(caps.max_string_size, TNS_MAX_STRING_SIZE_EXTENDED);
    assert_eq!(caps.ncharset_id, TNS_CHARSET_UTF16);
    server_task.await.unwrap();
}

#[tokio::test]
async fn redirect_surfaces_target_address() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut stream = client_stream(client);
    let mut caps = Capabilities::new();
    let descriptor = "(DESCRIPTION=(CONNECT_DATA=(SERVICE_NAME=SVC)))".to_string();

    let server_task = tokio::spawn(async move {
        let _connect = read_client_packet(&mut server, false).await;
        let target = b"(ADDRESS=(PROTOCOL=tcp)(HOST=node2)(PORT=1522))";
        let mut payload = Vec::new();
        payload.extend_from_slice(&(target.len() as u16).to_be_bytes());
        payload.extend_from_slice(target);
        server
            .write_all(&packet(TNS_PACKET_TYPE_REDIRECT, &payload, false))
            .await
            .unwrap();
    });

    match establish(&mut stream, &config(&descriptor), &mut caps)
        .await
        .unwrap()
    {
        Established::Redirect(data) => assert!(data.contains("HOST=node2")),
        Established::Ready { .. } => panic!("expected redirect"),
    }
    server_task.await.unwrap();
}
