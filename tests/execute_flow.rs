//! Statement state machine scenarios over synthetic server replies.

use bytes::Bytes;
use oracle_wire_rs::protocol::constants::*;
use oracle_wire_rs::protocol::exec::{process_reply, ReplyContext};
use oracle_wire_rs::protocol::WriteBuffer;
use oracle_wire_rs::{Error, OracleDataType};

const TTC: u8 = TNS_CCAP_FIELD_VERSION_19_1;

fn ctx<'a>(
    columns: Option<&'a [oracle_wire_rs::OracleColumn]>,
    num_return_binds: usize,
) -> ReplyContext<'a> {
    ReplyContext {
        columns,
        num_return_binds,
        num_out_binds: 0,
        ttc_field_version: TTC,
        server_ttc_field_version: TTC,
    }
}

/// One column of DESCRIBE_INFO in the 19c layout.
fn write_column(wbuf: &mut WriteBuffer, name: &str, type_num: u8, csfrm: u8, buffer_size: u32) {
    wbuf.write_u8(type_num);
    wbuf.write_u8(0); // flags
    wbuf.write_u8(0); // precision
    wbuf.write_u8(0); // scale
    wbuf.write_ub4(buffer_size);
    wbuf.write_ub4(0); // max array elements
    wbuf.write_ub8(0); // cont flags
    wbuf.write_u8(0); // OID (absent)
    wbuf.write_ub2(0); // version
    wbuf.write_ub2(TNS_CHARSET_UTF8); // charset id
    wbuf.write_u8(csfrm);
    wbuf.write_ub4(0); // max size
    wbuf.write_ub4(0); // oaccolid (12.2+)
    wbuf.write_u8(1); // nullable
    wbuf.write_u8(0); // v7 length
    wbuf.write_ub4(1); // name indicator
    wbuf.write_str_with_length(name);
    wbuf.write_ub4(0); // schema (absent)
    wbuf.write_ub4(0); // type name (absent)
    wbuf.write_ub2(0); // column position
    wbuf.write_ub4(0); // uds flags
}

fn write_describe_info(wbuf: &mut WriteBuffer, columns: &[(&str, u8, u8, u32)]) {
    wbuf.write_u8(TNS_MSG_TYPE_DESCRIBE_INFO);
    wbuf.write_u8(0); // leading raw bytes (none)
    wbuf.write_ub4(0); // max row size
    wbuf.write_ub4(columns.len() as u32);
    if !columns.is_empty() {
        wbuf.write_u8(0); // flags
    }
    for (name, type_num, csfrm, buffer_size) in columns {
        write_column(wbuf, name, *type_num, *csfrm, *buffer_size);
    }
    wbuf.write_ub4(0); // trailing raw bytes
    wbuf.write_ub4(0); // dcbflag
    wbuf.write_ub4(0); // dcbmdbz
    wbuf.write_ub4(0); // dcbmnpr
    wbuf.write_ub4(0); // dcbmxpr
    wbuf.write_ub4(0); // trailing raw bytes
}

fn write_error_block(wbuf: &mut WriteBuffer, number: u32, cursor_id: u16, row_count: u64) {
    wbuf.write_u8(TNS_MSG_TYPE_ERROR);
    wbuf.write_ub4(0); // call status
    wbuf.write_ub2(0); // end-to-end seq
    wbuf.write_ub4(0); // current row number
    wbuf.write_ub2(0); // error number hint
    wbuf.write_ub2(0);
    wbuf.write_ub2(0);
    wbuf.write_ub2(cursor_id);
    wbuf.write_ub2(0); // error position
    for _ in 0..6 {
        wbuf.write_u8(0); // sql type .. warning flags
    }
    wbuf.write_ub4(0); // rowid rba
    wbuf.write_ub2(0); // rowid partition
    wbuf.write_u8(0);
    wbuf.write_ub4(0); // rowid block
    wbuf.write_ub2(0); // rowid slot
    wbuf.write_ub4(0); // os error
    wbuf.write_u8(0); // statement number
    wbuf.write_u8(0); // call number
    wbuf.write_ub2(0); // padding
    wbuf.write_ub4(0); // success iters
    wbuf.write_ub4(0); // oerrdd
    wbuf.write_ub2(0); // batch error codes
    wbuf.write_ub4(0); // batch error offsets
    wbuf.write_ub2(0); // batch error messages
    wbuf.write_ub4(number);
    wbuf.write_ub8(row_count);
    if number != 0 {
        wbuf.write_str_with_length(&format!("ORA-{:05}: synthetic", number));
    }
}

#[test]
fn happy_path_select_one_row() {
    // SELECT 1 AS X FROM DUAL against a 12.2-style server: describe info
    // with one NUMBER column named X, one row with value 1, then end-of-call
    let mut wbuf = WriteBuffer::new();
    write_describe_info(&mut wbuf, &[("X", ORA_TYPE_NUM_NUMBER as u8, 0, 22)]);
    wbuf.write_u8(TNS_MSG_TYPE_ROW_DATA);
    wbuf.write_bytes_with_length(&[0xc1, 0x02]); // NUMBER 1
    write_error_block(&mut wbuf, TNS_ERR_NO_DATA_FOUND, 17, 1);

    let digest = process_reply(wbuf.freeze(), &ctx(None, 0)).unwrap();

    let columns = digest.columns.as_ref().unwrap();
    assert_eq!(columns.len(), 1);
    assert_eq!(columns[0].name, "X");
    assert_eq!(columns[0].data_type, OracleDataType::Number);

    assert_eq!(digest.rows.len(), 1);
    assert_eq!(digest.rows[0].get(0).unwrap().as_ref(), &[0xc1, 0x02]);

    assert!(!digest.more_rows());
    assert!(digest.failure().is_none());
    assert_eq!(digest.error.as_ref().unwrap().cursor_id, 17);
}

#[test]
fn chunked_long_value_reassembles() {
    // a 100,000-byte LONG column arrives as multiple 64K chunks
    let value = vec![b'a'; 100_000];
    let mut wbuf = WriteBuffer::new();
    write_describe_info(
        &mut wbuf,
        &[("BIG", ORA_TYPE_NUM_LONG as u8, TNS_CS_IMPLICIT, 0)],
    );
    wbuf.write_u8(TNS_MSG_TYPE_ROW_DATA);
    wbuf.write_bytes_with_length(&value);
    write_error_block(&mut wbuf, TNS_ERR_NO_DATA_FOUND, 3, 1);

    let digest = process_reply(wbuf.freeze(), &ctx(None, 0)).unwrap();
    assert_eq!(digest.columns.as_ref().unwrap()[0].data_type, OracleDataType::Long);
    assert_eq!(digest.rows[0].get(0).unwrap().len(), 100_000);
}

#[test]
fn returning_into_delivers_out_bind_and_row_count() {
    // INSERT ... RETURNING id INTO :3 — the generated id rides a ROW_DATA
    // and the end-of-call block carries affected rows = 1
    let mut wbuf = WriteBuffer::new();
    wbuf.write_u8(TNS_MSG_TYPE_ROW_DATA);
    wbuf.write_ub4(1); // one returned row for the bind
    wbuf.write_bytes_with_length(&[0xc1, 0x30]); // NUMBER 47
    write_error_block(&mut wbuf, 0, 8, 1);

    let digest = process_reply(wbuf.freeze(), &ctx(None, 1)).unwrap();
    let out = digest.out_binds.as_ref().unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].as_ref().unwrap().as_ref(), &[0xc1, 0x30]);
    assert_eq!(digest.error.as_ref().unwrap().row_count, 1);
}

#[test]
fn null_compression_via_bit_vector() {
    let columns = vec![
        oracle_wire_rs::OracleColumn {
            name: "A".into(),
            data_type: OracleDataType::Varchar,
            size: 10,
            buffer_size: 40,
            precision: 0,
            scale: 0,
            nullable: true,
        },
        oracle_wire_rs::OracleColumn {
            name: "B".into(),
            data_type: OracleDataType::Varchar,
            size: 10,
            buffer_size: 40,
            precision: 0,
            scale: 0,
            nullable: true,
        },
        oracle_wire_rs::OracleColumn {
            name: "C".into(),
            data_type: OracleDataType::Varchar,
            size: 10,
            buffer_size: 40,
            precision: 0,
            scale: 0,
            nullable: true,
        },
    ];

    let mut wbuf = WriteBuffer::new();
    wbuf.write_u8(TNS_MSG_TYPE_BIT_VECTOR);
    wbuf.write_ub2(3);
    wbuf.write_u8(0b0000_0101); // A and C present, B null
    wbuf.write_u8(TNS_MSG_TYPE_ROW_DATA);
    wbuf.write_bytes_with_length(b"aa");
    wbuf.write_bytes_with_length(b"cc");
    write_error_block(&mut wbuf, TNS_ERR_NO_DATA_FOUND, 2, 1);

    let digest = process_reply(wbuf.freeze(), &ctx(Some(&columns), 0)).unwrap();
    let row = &digest.rows[0];
    assert_eq!(row.get(0).unwrap().as_ref(), b"aa");
    assert!(row.is_null(1));
    assert_eq!(row.get(2).unwrap().as_ref(), b"cc");
}

#[test]
fn server_fatal_error_classified_for_teardown() {
    // ORA-28: the current task fails and the connection must come down
    let mut wbuf = WriteBuffer::new();
    write_error_block(&mut wbuf, 28, 0, 0);

    let digest = process_reply(wbuf.freeze(), &ctx(None, 0)).unwrap();
    let failure = digest.failure().unwrap();
    assert!(failure.is_fatal());
    match failure {
        Error::Server(e) => assert_eq!(e.number, 28),
        other => panic!("expected server error, got {:?}", other),
    }
}

#[test]
fn constraint_violation_keeps_connection_usable() {
    let mut wbuf = WriteBuffer::new();
    write_error_block(&mut wbuf, 1, 4, 0);

    let digest = process_reply(wbuf.freeze(), &ctx(None, 0)).unwrap();
    let failure = digest.failure().unwrap();
    assert!(!failure.is_fatal());
}

#[test]
fn multi_row_batches_preserve_order() {
    let mut wbuf = WriteBuffer::new();
    write_describe_info(&mut wbuf, &[("N", ORA_TYPE_NUM_NUMBER as u8, 0, 22)]);
    for value in 1u8..=5 {
        wbuf.write_u8(TNS_MSG_TYPE_ROW_DATA);
        wbuf.write_bytes_with_length(&[0xc1, value + 1]);
    }
    write_error_block(&mut wbuf, 0, 6, 5);

    let digest = process_reply(wbuf.freeze(), &ctx(None, 0)).unwrap();
    assert_eq!(digest.rows.len(), 5);
    for (index, row) in digest.rows.iter().enumerate() {
        assert_eq!(row.get(0).unwrap().as_ref(), &[0xc1, index as u8 + 2]);
    }
    // success status means the cursor still has rows
    assert!(digest.more_rows());
}

#[test]
fn warning_is_surfaced_alongside_rows() {
    let mut wbuf = WriteBuffer::new();
    wbuf.write_u8(TNS_MSG_TYPE_WARNING);
    wbuf.write_ub2(24344);
    let text = b"success with compilation error";
    wbuf.write_ub2(text.len() as u16);
    wbuf.write_ub2(0);
    wbuf.write_bytes(text);
    write_error_block(&mut wbuf, 0, 1, 0);

    let digest = process_reply(wbuf.freeze(), &ctx(None, 0)).unwrap();
    let (number, message) = digest.warning.unwrap();
    assert_eq!(number, 24344);
    assert!(message.contains("compilation"));
}

#[test]
fn end_of_response_terminates_processing() {
    let mut wbuf = WriteBuffer::new();
    write_error_block(&mut wbuf, 0, 1, 0);
    wbuf.write_u8(TNS_MSG_TYPE_END_OF_RESPONSE);
    // trailing garbage after the terminator is never touched
    wbuf.write_bytes(&[0xde, 0xad]);

    let digest = process_reply(wbuf.freeze(), &ctx(None, 0)).unwrap();
    assert!(digest.error.is_some());
}

#[test]
fn reply_bytes_survive_packet_splitting() {
    // the same reply fed through the frame codec in two DATA packets
    // digests identically to the contiguous form
    use oracle_wire_rs::protocol::codec::{FrameCodec, ReplyAssembler, ReplyEvent};
    use oracle_wire_rs::protocol::message::write_packet_header;

    let mut wbuf = WriteBuffer::new();
    write_describe_info(&mut wbuf, &[("X", ORA_TYPE_NUM_NUMBER as u8, 0, 22)]);
    wbuf.write_u8(TNS_MSG_TYPE_ROW_DATA);
    wbuf.write_bytes_with_length(&[0xc1, 0x02]);
    write_error_block(&mut wbuf, TNS_ERR_NO_DATA_FOUND, 17, 1);
    let contiguous = wbuf.freeze();

    let expected = process_reply(contiguous.clone(), &ctx(None, 0)).unwrap();

    let (first, second) = contiguous.split_at(contiguous.len() / 2);
    let mut stream = Vec::new();
    for (chunk, flags) in [(first, 0u16), (second, TNS_DATA_FLAGS_END_OF_REQUEST)] {
        let mut packet = Vec::new();
        write_packet_header(
            &mut packet,
            TNS_PACKET_TYPE_DATA,
            0,
            PACKET_HEADER_SIZE + 2 + chunk.len(),
            false,
        );
        packet.extend_from_slice(&flags.to_be_bytes());
        packet.extend_from_slice(chunk);
        stream.extend_from_slice(&packet);
    }

    let mut codec = FrameCodec::new();
    codec.feed(&stream);
    let mut assembler = ReplyAssembler::new();
    let mut reassembled = None;
    for packet in codec.drain().unwrap() {
        if let ReplyEvent::Complete(reply) = assembler.push(&packet).unwrap() {
            reassembled = Some(reply);
        }
    }
    let reassembled: Bytes = reassembled.unwrap();
    assert_eq!(reassembled, contiguous);

    let digest = process_reply(reassembled, &ctx(None, 0)).unwrap();
    assert_eq!(digest.rows.len(), expected.rows.len());
    assert_eq!(
        digest.columns.as_ref().unwrap()[0].name,
        expected.columns.as_ref().unwrap()[0].name
    );
}
