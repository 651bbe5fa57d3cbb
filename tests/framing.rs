//! Frame codec properties: header layouts, incremental feeding, and
//! logical-reply assembly.

use bytes::Bytes;
use oracle_wire_rs::protocol::codec::{FrameCodec, ReplyAssembler, ReplyEvent};
use oracle_wire_rs::protocol::constants::*;
use oracle_wire_rs::protocol::message::write_packet_header;
use oracle_wire_rs::protocol::WriteBuffer;

fn data_packet(payload: &[u8], flags: u16, large: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    write_packet_header(
        &mut buf,
        TNS_PACKET_TYPE_DATA,
        0,
        PACKET_HEADER_SIZE + 2 + payload.len(),
        large,
    );
    buf.extend_from_slice(&flags.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

#[test]
fn short_header_length_field_is_packet_size() {
    let bytes = data_packet(b"payload", 0, false);
    let total = bytes.len() as u16;
    assert_eq!(&bytes[0..2], &total.to_be_bytes());
    // the next two bytes are zero in the pre-large-SDU layout
    assert_eq!(&bytes[2..4], &[0, 0]);
}

#[test]
fn large_header_length_field_is_packet_size() {
    let bytes = data_packet(b"payload", 0, true);
    let total = bytes.len() as u32;
    assert_eq!(&bytes[0..4], &total.to_be_bytes());
}

#[test]
fn byte_by_byte_equals_whole_feed() {
    let mut stream = Vec::new();
    stream.extend_from_slice(&data_packet(b"alpha", 0, false));
    stream.extend_from_slice(&data_packet(b"beta", 0, false));
    stream.extend_from_slice(&data_packet(
        b"gamma",
        TNS_DATA_FLAGS_END_OF_REQUEST,
        false,
    ));

    let mut whole = FrameCodec::new();
    whole.feed(&stream);
    let expected = whole.drain().unwrap();

    let mut dribble = FrameCodec::new();
    let mut actual = Vec::new();
    for byte in &stream {
        dribble.feed(std::slice::from_ref(byte));
        actual.extend(dribble.drain().unwrap());
    }

    assert_eq!(expected.len(), 3);
    assert_eq!(actual.len(), expected.len());
    for (a, b) in expected.iter().zip(actual.iter()) {
        assert_eq!(a.packet_type, b.packet_type);
        assert_eq!(a.packet_flags, b.packet_flags);
        assert_eq!(a.payload, b.payload);
    }
}

#[test]
fn reply_assembly_concatenates_until_end_of_request() {
    let mut codec = FrameCodec::new();
    codec.feed(&data_packet(b"one ", 0, false));
    codec.feed(&data_packet(b"two ", 0, false));
    codec.feed(&data_packet(b"three", TNS_DATA_FLAGS_END_OF_REQUEST, false));

    let mut assembler = ReplyAssembler::new();
    let mut complete = None;
    for packet in codec.drain().unwrap() {
        if let ReplyEvent::Complete(reply) = assembler.push(&packet).unwrap() {
            complete = Some(reply);
        }
    }
    assert_eq!(complete.unwrap(), Bytes::from_static(b"one two three"));
}

#[test]
fn value_split_across_packets_reassembles_exactly() {
    // a chunked 100,000-byte value, split across DATA packets at an
    // arbitrary boundary, must decode to the exact original bytes
    let value: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let mut encoded = WriteBuffer::new();
    encoded.write_bytes_with_length(&value);
    let encoded = encoded.freeze();

    let (first, second) = encoded.split_at(encoded.len() / 3);
    let mut codec = FrameCodec::new();
    codec.feed(&data_packet(first, 0, false));
    codec.feed(&data_packet(second, TNS_DATA_FLAGS_END_OF_REQUEST, false));

    let mut assembler = ReplyAssembler::new();
    let mut reply = None;
    for packet in codec.drain().unwrap() {
        if let ReplyEvent::Complete(bytes) = assembler.push(&packet).unwrap() {
            reply = Some(bytes);
        }
    }

    let mut rbuf = oracle_wire_rs::protocol::ReadBuffer::new(reply.unwrap());
    let decoded = rbuf.read_bytes_with_length().unwrap().unwrap();
    assert_eq!(decoded.len(), 100_000);
    assert_eq!(&decoded[..], &value[..]);
}

#[test]
fn unknown_packet_type_is_a_decoding_failure() {
    let mut bytes = data_packet(b"x", 0, false);
    bytes[4] = 77;
    let mut codec = FrameCodec::new();
    codec.feed(&bytes);
    assert!(matches!(
        codec.next_packet(),
        Err(oracle_wire_rs::Error::MessageDecodingFailure { .. })
    ));
}

#[test]
fn eof_flag_reports_server_close() {
    let mut codec = FrameCodec::new();
    codec.feed(&data_packet(b"", TNS_DATA_FLAGS_EOF, false));
    let packet = codec.next_packet().unwrap().unwrap();
    let mut assembler = ReplyAssembler::new();
    assert!(matches!(
        assembler.push(&packet).unwrap(),
        ReplyEvent::ServerEof
    ));
}
