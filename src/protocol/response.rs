//! Inbound TTC message parsing.
//!
//! These functions walk a [`ReadBuffer`] positioned just after a message-type
//! byte. They operate on a fully assembled logical reply (see the codec), so
//! any length running past the buffer is a framing violation rather than a
//! suspension point.

use crate::error::{BatchError, Error, Result, ServerError};
use crate::protocol::buffer::ReadBuffer;
use crate::protocol::constants::*;
use crate::protocol::types::{DataRow, OracleColumn, OracleDataType};
use bytes::Bytes;

/// State carried by the trailing ERROR (end-of-call) message.
#[derive(Debug, Default, Clone)]
pub struct ErrorInfo {
    /// ORA number; 0 means success, 1403 means rows are exhausted.
    pub number: u32,
    pub message: Option<String>,
    /// Cursor ID assigned by the server.
    pub cursor_id: u16,
    /// Error position within the SQL text.
    pub position: u16,
    /// Row count so far for queries and DML.
    pub row_count: u64,
    pub rowid: Option<String>,
    pub batch_errors: Vec<BatchError>,
}

impl ErrorInfo {
    /// ORA-01403: the cursor has no further rows; not a task failure.
    pub fn is_no_data(&self) -> bool {
        self.number == TNS_ERR_NO_DATA_FOUND
    }

    pub fn is_success(&self) -> bool {
        self.number == 0
    }

    pub fn into_server_error(self) -> ServerError {
        ServerError {
            number: self.number,
            message: self.message.unwrap_or_default(),
            position: self.position,
            cursor_id: self.cursor_id,
            row_count: self.row_count,
            rowid: self.rowid,
            batch_errors: self.batch_errors,
        }
    }
}

/// Which columns of the next row batch carry values.
///
/// Bit `i` set means column `i` is non-null and present in ROW_DATA; a clear
/// bit yields NULL without consuming any bytes.
#[derive(Debug, Clone)]
pub struct NullBitVector {
    bytes: Vec<u8>,
    num_columns: usize,
}

impl NullBitVector {
    pub fn new(bytes: Vec<u8>, num_columns: usize) -> Self {
        Self { bytes, num_columns }
    }

    pub fn is_present(&self, column: usize) -> bool {
        if column >= self.num_columns {
            return false;
        }
        match self.bytes.get(column / 8) {
            Some(byte) => byte & (1 << (column % 8)) != 0,
            None => false,
        }
    }
}

/// Read a string preceded by a UB4 presence indicator.
fn read_column_string(buf: &mut ReadBuffer) -> Result<String> {
    let indicator = buf.read_ub4()?;
    if indicator == 0 {
        return Ok(String::new());
    }
    Ok(buf.read_str_with_length()?.unwrap_or_default())
}

/// Parse DESCRIBE_INFO into column metadata.
pub fn parse_describe_info(buf: &mut ReadBuffer, ttc_field_version: u8) -> Result<Vec<OracleColumn>> {
    // leading raw bytes the server prepends to the describe block
    buf.skip_raw_bytes_chunked()?;

    let _max_row_size = buf.read_ub4()?;
    let num_columns = buf.read_ub4()?;
    let mut columns = Vec::with_capacity(num_columns as usize);

    if num_columns > 0 {
        let _ = buf.read_u8()?;
    }
    for _ in 0..num_columns {
        columns.push(parse_column_metadata(buf, ttc_field_version)?);
    }

    let num_bytes = buf.read_ub4()?;
    if num_bytes > 0 {
        buf.skip_raw_bytes_chunked()?;
    }
    let _ = buf.read_ub4()?; // dcbflag
    let _ = buf.read_ub4()?; // dcbmdbz
    let _ = buf.read_ub4()?; // dcbmnpr
    let _ = buf.read_ub4()?; // dcbmxpr
    let num_bytes = buf.read_ub4()?;
    if num_bytes > 0 {
        buf.skip_raw_bytes_chunked()?;
    }

    Ok(columns)
}

fn parse_column_metadata(buf: &mut ReadBuffer, ttc_field_version: u8) -> Result<OracleColumn> {
    let type_num = buf.read_u8()? as u16;
    let _flags = buf.read_u8()?;
    let precision = buf.read_u8()? as i8;
    let scale = buf.read_u8()? as i8;
    let buffer_size = buf.read_ub4()?;
    let _max_array_elements = buf.read_ub4()?;
    let _cont_flags = buf.read_ub8()?;

    // OID for object types
    let _oid = buf.read_bytes_with_length()?;

    let _version = buf.read_ub2()?;
    let _charset_id = buf.read_ub2()?;
    let csfrm = buf.read_u8()?;
    let max_size = buf.read_ub4()?;

    if ttc_field_version >= TNS_CCAP_FIELD_VERSION_12_2 {
        let _oaccolid = buf.read_ub4()?;
    }

    let nullable = buf.read_u8()? != 0;
    let _v7_length = buf.read_u8()?;

    let name = read_column_string(buf)?;
    let _schema = read_column_string(buf)?;
    let _type_name = read_column_string(buf)?;
    let _column_position = buf.read_ub2()?;
    let _uds_flags = buf.read_ub4()?;

    if ttc_field_version >= TNS_CCAP_FIELD_VERSION_23_1 {
        let _domain_schema = read_column_string(buf)?;
        let _domain_name = read_column_string(buf)?;
    }

    if ttc_field_version >= TNS_CCAP_FIELD_VERSION_23_1_EXT_3 {
        let num_annotations = buf.read_ub4()?;
        if num_annotations > 0 {
            let _ = buf.read_u8()?;
            let actual_count = buf.read_ub4()?;
            let _ = buf.read_u8()?;
            for _ in 0..actual_count {
                let _key = read_column_string(buf)?;
                let _value = read_column_string(buf)?;
                let _flags = buf.read_ub4()?;
            }
            let _flags = buf.read_ub4()?;
        }
    }

    if ttc_field_version >= TNS_CCAP_FIELD_VERSION_23_4 {
        let _vector_dimensions = buf.read_ub4()?;
        let _vector_format = buf.read_u8()?;
        let _vector_flags = buf.read_u8()?;
    }

    let data_type = OracleDataType::from_type_info(type_num, csfrm)?;
    Ok(OracleColumn {
        name,
        data_type,
        size: max_size,
        buffer_size,
        precision,
        scale,
        nullable,
    })
}

/// Parse ROW_HEADER; returns the embedded bit vector when one is present.
pub fn parse_row_header(
    buf: &mut ReadBuffer,
    num_columns: usize,
) -> Result<Option<NullBitVector>> {
    let _flags = buf.read_u8()?;
    let _num_requests = buf.read_ub2()?;
    let _iteration_number = buf.read_ub4()?;
    let _num_iters = buf.read_ub4()?;
    let _buffer_length = buf.read_ub2()?;

    let mut bit_vector = None;
    let num_bytes = buf.read_ub4()?;
    if num_bytes > 0 {
        let _repeated_length = buf.read_u8()?;
        let vector_bytes = buf.read_bytes((num_bytes - 1) as usize)?;
        bit_vector = Some(NullBitVector::new(vector_bytes.to_vec(), num_columns));
    }

    let num_bytes = buf.read_ub4()?;
    if num_bytes > 0 {
        buf.skip_raw_bytes_chunked()?;
    }

    Ok(bit_vector)
}

/// Parse a standalone BIT_VECTOR message.
pub fn parse_bit_vector(buf: &mut ReadBuffer, num_columns: usize) -> Result<NullBitVector> {
    let _num_columns_sent = buf.read_ub2()?;
    let num_bytes = num_columns.div_ceil(8);
    let vector_bytes = buf.read_bytes(num_bytes)?;
    Ok(NullBitVector::new(vector_bytes.to_vec(), num_columns))
}

/// Parse one ROW_DATA message into a raw row.
///
/// Columns absent from the bit vector decode to NULL without consuming
/// bytes; chunked values (LONG, JSON, vector, inline LOBs) reassemble via
/// the long length-encoding.
pub fn parse_row_data(
    buf: &mut ReadBuffer,
    columns: &[OracleColumn],
    bit_vector: Option<&NullBitVector>,
) -> Result<DataRow> {
    let mut values = Vec::with_capacity(columns.len());
    for (index, _column) in columns.iter().enumerate() {
        if let Some(bv) = bit_vector {
            if !bv.is_present(index) {
                values.push(None);
                continue;
            }
        }
        values.push(buf.read_bytes_with_length()?);
    }
    Ok(DataRow::new(values))
}

/// Parse the RETURNING ... INTO out-bind values trailing a DML row.
///
/// Each return bind carries a row count followed by that many values; with
/// a single affected row this is the out value itself.
pub fn parse_returning_values(
    buf: &mut ReadBuffer,
    num_return_binds: usize,
) -> Result<Vec<Option<Bytes>>> {
    let mut out_values = Vec::with_capacity(num_return_binds);
    for _ in 0..num_return_binds {
        let num_rows = buf.read_ub4()?;
        let mut last = None;
        for _ in 0..num_rows {
            last = buf.read_bytes_with_length()?;
        }
        out_values.push(last);
    }
    Ok(out_values)
}

/// Parse FLUSH_OUT_BINDS: one value per out bind.
pub fn parse_out_binds(buf: &mut ReadBuffer, num_out_binds: usize) -> Result<Vec<Option<Bytes>>> {
    let mut out_values = Vec::with_capacity(num_out_binds);
    for _ in 0..num_out_binds {
        out_values.push(buf.read_bytes_with_length()?);
    }
    Ok(out_values)
}

/// Parse IO_VECTOR: per-bind direction bytes.
pub fn parse_io_vector(buf: &mut ReadBuffer) -> Result<Vec<u8>> {
    let _num_iters = buf.read_ub4()?;
    let num_binds = buf.read_ub2()?;
    let mut directions = Vec::with_capacity(num_binds as usize);
    for _ in 0..num_binds {
        directions.push(buf.read_u8()?);
    }
    Ok(directions)
}

fn parse_rowid(buf: &mut ReadBuffer) -> Result<Option<String>> {
    let rba = buf.read_ub4()?;
    let partition_id = buf.read_ub2()?;
    let _ = buf.read_u8()?;
    let block_num = buf.read_ub4()?;
    let slot_num = buf.read_ub2()?;

    if rba == 0 && partition_id == 0 && block_num == 0 && slot_num == 0 {
        Ok(None)
    } else {
        Ok(Some(format!(
            "{:08X}{:04X}{:08X}{:04X}",
            rba, partition_id, block_num, slot_num
        )))
    }
}

/// Parse the full ERROR (end-of-call status) block.
///
/// The server's own field version decides which trailing fields exist, which
/// is why the caller passes `server_ttc_field_version` and not the
/// negotiated minimum.
pub fn parse_error_info(buf: &mut ReadBuffer, server_ttc_field_version: u8) -> Result<ErrorInfo> {
    let mut info = ErrorInfo::default();

    let _call_status = buf.read_ub4()?;
    let _end_to_end_seq = buf.read_ub2()?;
    let _current_row_number = buf.read_ub4()?;
    let _error_number_hint = buf.read_ub2()?;
    let _ = buf.read_ub2()?; // array element error
    let _ = buf.read_ub2()?; // array element error
    info.cursor_id = buf.read_ub2()?;
    info.position = buf.read_ub2()?;
    let _sql_type = buf.read_u8()?;
    let _fatal = buf.read_u8()?;
    let _flags = buf.read_u8()?;
    let _user_cursor_options = buf.read_u8()?;
    let _upi_parameter = buf.read_u8()?;
    let _warning_flag = buf.read_u8()?;

    info.rowid = parse_rowid(buf)?;

    let _os_error = buf.read_ub4()?;
    let _statement_number = buf.read_u8()?;
    let _call_number = buf.read_u8()?;
    let _padding = buf.read_ub2()?;
    let _success_iters = buf.read_ub4()?;

    // oerrdd (logical rowid)
    let num_bytes = buf.read_ub4()?;
    if num_bytes > 0 {
        buf.skip_raw_bytes_chunked()?;
    }

    // batch error codes
    let num_errors = buf.read_ub2()?;
    let mut batch_codes = Vec::with_capacity(num_errors as usize);
    if num_errors > 0 {
        let first_byte = buf.read_u8()?;
        for _ in 0..num_errors {
            if first_byte == TNS_LONG_LENGTH_INDICATOR {
                let _chunk_length = buf.read_ub4()?;
            }
            batch_codes.push(buf.read_ub2()?);
        }
        if first_byte == TNS_LONG_LENGTH_INDICATOR {
            buf.skip(1)?;
        }
    }

    // batch error offsets
    let num_offsets = buf.read_ub4()?;
    let mut batch_offsets = Vec::with_capacity(num_offsets as usize);
    if num_offsets > 0 {
        let first_byte = buf.read_u8()?;
        for _ in 0..num_offsets {
            if first_byte == TNS_LONG_LENGTH_INDICATOR {
                let _chunk_length = buf.read_ub4()?;
            }
            batch_offsets.push(buf.read_ub4()?);
        }
        if first_byte == TNS_LONG_LENGTH_INDICATOR {
            buf.skip(1)?;
        }
    }

    // batch error messages
    let num_messages = buf.read_ub2()?;
    if num_messages > 0 {
        buf.skip(1)?; // packed size
        for _ in 0..num_messages {
            let _chunk_length = buf.read_ub2()?;
            let _message = buf.read_str_with_length()?;
            buf.skip(2)?; // end marker
        }
    }

    info.batch_errors = batch_offsets
        .into_iter()
        .zip(batch_codes)
        .map(|(row_offset, number)| BatchError { row_offset, number })
        .collect();

    info.number = buf.read_ub4()?;
    info.row_count = buf.read_ub8()?;

    if server_ttc_field_version >= TNS_CCAP_FIELD_VERSION_20_1 {
        let _sql_type = buf.read_ub4()?;
        let _server_checksum = buf.read_ub4()?;
    }

    if info.number != 0 {
        info.message = buf.read_str_with_length()?.map(|m| m.trim_end().to_string());
    }

    Ok(info)
}

/// Parse STATUS: the end-of-call status and sequence number.
pub fn parse_status_info(buf: &mut ReadBuffer) -> Result<u32> {
    let call_status = buf.read_ub4()?;
    // the sequence number is absent in some flows
    if buf.remaining() >= 2 {
        let _end_to_end_seq = buf.read_ub2()?;
    }
    Ok(call_status)
}

/// Parse WARNING: ORA number and message, both possibly absent.
pub fn parse_warning(buf: &mut ReadBuffer) -> Result<Option<(u16, String)>> {
    let number = buf.read_ub2()?;
    let length = buf.read_ub2()?;
    let _flags = buf.read_ub2()?;
    if number != 0 && length > 0 {
        let message = buf.read_bytes(length as usize)?;
        Ok(Some((
            number,
            String::from_utf8_lossy(&message).into_owned(),
        )))
    } else {
        Ok(None)
    }
}

/// Parse PARAMETER as returned from commit/rollback and DML flows.
pub fn parse_return_parameters(buf: &mut ReadBuffer) -> Result<()> {
    let num_params = buf.read_ub2()?;
    for _ in 0..num_params {
        let _ = buf.read_ub4()?;
    }

    let num_bytes = buf.read_ub2()?;
    if num_bytes > 0 {
        buf.skip(num_bytes as usize)?;
    }

    let num_pairs = buf.read_ub2()?;
    for _ in 0..num_pairs {
        let text_length = buf.read_ub2()?;
        if text_length > 0 {
            buf.skip(text_length as usize)?;
        }
        let binary_length = buf.read_ub2()?;
        if binary_length > 0 {
            buf.skip(binary_length as usize)?;
        }
        let _keyword_num = buf.read_ub2()?;
    }

    let num_bytes = buf.read_ub2()?;
    if num_bytes > 0 {
        buf.skip(num_bytes as usize)?;
    }
    Ok(())
}

/// Parse PARAMETER as an authentication key-value reply.
pub fn parse_auth_parameters(
    buf: &mut ReadBuffer,
) -> Result<(std::collections::HashMap<String, String>, u32)> {
    let mut params = std::collections::HashMap::new();
    let mut verifier_type = 0u32;

    let num_params = buf.read_ub2()?;
    for _ in 0..num_params {
        let _key_length = buf.read_ub4()?;
        let key = buf.read_str_with_length()?.unwrap_or_default();
        let _value_length = buf.read_ub4()?;
        let value = buf.read_str_with_length()?.unwrap_or_default();

        if key == "AUTH_VFR_DATA" {
            verifier_type = buf.read_ub4()?;
        } else {
            buf.skip_ub4()?;
        }

        let clean_key = key.trim_end_matches('\0');
        if !clean_key.is_empty() {
            params.insert(clean_key.to_string(), value);
        }
    }

    Ok((params, verifier_type))
}

/// Parse SERVER_SIDE_PIGGYBACK state updates; consumed but not surfaced.
pub fn parse_server_side_piggyback(buf: &mut ReadBuffer) -> Result<()> {
    let opcode = buf.read_u8()?;
    match opcode {
        TNS_SERVER_PIGGYBACK_SESS_RET => {
            let _session_state = buf.read_ub4()?;
            let _session_state_serial = buf.read_ub2()?;
        }
        TNS_SERVER_PIGGYBACK_LTXID => {
            let num_bytes = buf.read_ub4()?;
            if num_bytes > 0 {
                buf.skip_raw_bytes_chunked()?;
            }
        }
        TNS_SERVER_PIGGYBACK_AC_REPLAY_CONTEXT => {
            let _flags = buf.read_ub4()?;
            let _error_code = buf.read_ub4()?;
            let num_bytes = buf.read_ub4()?;
            if num_bytes > 0 {
                buf.skip_raw_bytes_chunked()?;
            }
        }
        TNS_SERVER_PIGGYBACK_EXT_SYNC => {
            let num_pairs = buf.read_ub2()?;
            for _ in 0..num_pairs {
                let key_length = buf.read_ub2()?;
                if key_length > 0 {
                    buf.skip(key_length as usize)?;
                }
                let value_length = buf.read_ub4()?;
                if value_length > 0 {
                    buf.skip_raw_bytes_chunked()?;
                }
            }
        }
        TNS_SERVER_PIGGYBACK_SESS_SIGNATURE => {
            let num_bytes = buf.read_ub4()?;
            if num_bytes > 0 {
                buf.skip_raw_bytes_chunked()?;
            }
        }
        other => {
            log::warn!("unknown server piggyback opcode {}", other);
        }
    }
    Ok(())
}

/// Parse IMPLICIT_RESULTSET: the child cursor ids carrying nested results.
pub fn parse_implicit_resultset(buf: &mut ReadBuffer) -> Result<Vec<u16>> {
    let num_results = buf.read_ub4()?;
    let mut cursor_ids = Vec::with_capacity(num_results as usize);
    for _ in 0..num_results {
        let skip_length = buf.read_u8()?;
        buf.skip(skip_length as usize)?;
        cursor_ids.push(buf.read_ub2()?);
    }
    Ok(cursor_ids)
}

/// Parse an ERROR message into a failure, searching the block for the
/// ORA text when the structured parse cannot complete.
pub fn parse_error_as_failure(buf: &mut ReadBuffer, server_ttc_field_version: u8) -> Error {
    match parse_error_info(buf, server_ttc_field_version) {
        Ok(info) => Error::Server(info.into_server_error()),
        Err(_) => {
            // salvage the ORA-NNNNN text if the structure did not parse
            let remaining = buf.as_slice();
            if let Some(pos) = remaining.windows(4).position(|w| w == b"ORA-") {
                let end = remaining[pos..]
                    .iter()
                    .position(|&b| b == 0)
                    .map(|p| pos + p)
                    .unwrap_or(remaining.len());
                let message = String::from_utf8_lossy(&remaining[pos..end]).into_owned();
                let code = message
                    .get(4..)
                    .and_then(|s| {
                        let digits: String =
                            s.chars().take_while(|c| c.is_ascii_digit()).collect();
                        digits.parse::<u32>().ok()
                    })
                    .unwrap_or(0);
                Error::server(code, message)
            } else {
                Error::decoding("unparseable error message from server")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::buffer::WriteBuffer;

    #[test]
    fn test_bit_vector_semantics() {
        // columns 0 and 2 present, 1 and 3 null
        let bv = NullBitVector::new(vec![0b0000_0101], 4);
        assert!(bv.is_present(0));
        assert!(!bv.is_present(1));
        assert!(bv.is_present(2));
        assert!(!bv.is_present(3));
        assert!(!bv.is_present(10));
    }

    #[test]
    fn test_parse_bit_vector_message() {
        let mut wbuf = WriteBuffer::new();
        wbuf.write_ub2(3); // columns sent
        wbuf.write_u8(0b0000_0110);
        let mut rbuf = ReadBuffer::new(wbuf.freeze());
        let bv = parse_bit_vector(&mut rbuf, 3).unwrap();
        assert!(!bv.is_present(0));
        assert!(bv.is_present(1));
        assert!(bv.is_present(2));
    }

    #[test]
    fn test_row_data_with_nulls_skips_no_bytes() {
        let columns = vec![
            OracleColumn {
                name: "A".into(),
                data_type: OracleDataType::Varchar,
                size: 10,
                buffer_size: 40,
                precision: 0,
                scale: 0,
                nullable: true,
            },
            OracleColumn {
                name: "B".into(),
                data_type: OracleDataType::Number,
                size: 0,
                buffer_size: 22,
                precision: 0,
                scale: 0,
                nullable: true,
            },
        ];
        let mut wbuf = WriteBuffer::new();
        wbuf.write_bytes_with_length(b"xy");
        // only column 0 present
        let bv = NullBitVector::new(vec![0b01], 2);
        let mut rbuf = ReadBuffer::new(wbuf.freeze());
        let row = parse_row_data(&mut rbuf, &columns, Some(&bv)).unwrap();
        assert_eq!(row.get(0).unwrap().as_ref(), b"xy");
        assert!(row.is_null(1));
        assert_eq!(rbuf.remaining(), 0);
    }

    #[test]
    fn test_io_vector_roundtrip() {
        let mut wbuf = WriteBuffer::new();
        wbuf.write_ub4(1);
        wbuf.write_ub2(3);
        wbuf.write_u8(TNS_BIND_DIR_INPUT);
        wbuf.write_u8(TNS_BIND_DIR_INPUT);
        wbuf.write_u8(TNS_BIND_DIR_OUTPUT);
        let mut rbuf = ReadBuffer::new(wbuf.freeze());
        let dirs = parse_io_vector(&mut rbuf).unwrap();
        assert_eq!(
            dirs,
            vec![TNS_BIND_DIR_INPUT, TNS_BIND_DIR_INPUT, TNS_BIND_DIR_OUTPUT]
        );
    }

    #[test]
    fn test_auth_parameters_capture_verifier_type() {
        let mut wbuf = WriteBuffer::new();
        wbuf.write_ub2(2);
        // AUTH_VFR_DATA with verifier type in the trailing flags
        wbuf.write_ub4("AUTH_VFR_DATA".len() as u32);
        wbuf.write_str_with_length("AUTH_VFR_DATA");
        wbuf.write_ub4(4);
        wbuf.write_str_with_length("AABB");
        wbuf.write_ub4(TNS_VERIFIER_TYPE_12C);
        // ordinary parameter
        wbuf.write_ub4("AUTH_SESSKEY".len() as u32);
        wbuf.write_str_with_length("AUTH_SESSKEY");
        wbuf.write_ub4(4);
        wbuf.write_str_with_length("CCDD");
        wbuf.write_ub4(0);

        let mut rbuf = ReadBuffer::new(wbuf.freeze());
        let (params, verifier_type) = parse_auth_parameters(&mut rbuf).unwrap();
        assert_eq!(verifier_type, TNS_VERIFIER_TYPE_12C);
        assert_eq!(params.get("AUTH_VFR_DATA").unwrap(), "AABB");
        assert_eq!(params.get("AUTH_SESSKEY").unwrap(), "CCDD");
    }

    fn write_error_block(
        wbuf: &mut WriteBuffer,
        number: u32,
        cursor_id: u16,
        row_count: u64,
        message: Option<&str>,
    ) {
        wbuf.write_ub4(0); // call status
        wbuf.write_ub2(0); // end-to-end seq
        wbuf.write_ub4(0); // current row number
        wbuf.write_ub2(0); // error number hint
        wbuf.write_ub2(0);
        wbuf.write_ub2(0);
        wbuf.write_ub2(cursor_id);
        wbuf.write_ub2(0); // error position
        wbuf.write_u8(0); // sql type
        wbuf.write_u8(0); // fatal
        wbuf.write_u8(0);
        wbuf.write_u8(0);
        wbuf.write_u8(0);
        wbuf.write_u8(0);
        // rowid: all zero components
        wbuf.write_ub4(0);
        wbuf.write_ub2(0);
        wbuf.write_u8(0);
        wbuf.write_ub4(0);
        wbuf.write_ub2(0);
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
        if let Some(message) = message {
            wbuf.write_str_with_length(message);
        }
    }

    #[test]
    fn test_error_info_success() {
        let mut wbuf = WriteBuffer::new();
        write_error_block(&mut wbuf, 0, 11, 42, None);
        let mut rbuf = ReadBuffer::new(wbuf.freeze());
        let info = parse_error_info(&mut rbuf, TNS_CCAP_FIELD_VERSION_19_1).unwrap();
        assert!(info.is_success());
        assert_eq!(info.cursor_id, 11);
        assert_eq!(info.row_count, 42);
        assert!(info.message.is_none());
    }

    #[test]
    fn test_error_info_no_data_found() {
        let mut wbuf = WriteBuffer::new();
        write_error_block(&mut wbuf, 1403, 5, 1, Some("ORA-01403: no data found"));
        let mut rbuf = ReadBuffer::new(wbuf.freeze());
        let info = parse_error_info(&mut rbuf, TNS_CCAP_FIELD_VERSION_19_1).unwrap();
        assert!(info.is_no_data());
        assert_eq!(info.cursor_id, 5);
    }

    #[test]
    fn test_error_info_with_message() {
        let mut wbuf = WriteBuffer::new();
        write_error_block(
            &mut wbuf,
            942,
            3,
            0,
            Some("ORA-00942: table or view does not exist\n"),
        );
        let mut rbuf = ReadBuffer::new(wbuf.freeze());
        let info = parse_error_info(&mut rbuf, TNS_CCAP_FIELD_VERSION_19_1).unwrap();
        assert_eq!(info.number, 942);
        assert_eq!(
            info.message.as_deref(),
            Some("ORA-00942: table or view does not exist")
        );
        let server_error = info.into_server_error();
        assert!(!server_error.is_fatal());
    }

    #[test]
    fn test_status_info() {
        let mut wbuf = WriteBuffer::new();
        wbuf.write_ub4(0);
        wbuf.write_ub2(7);
        let mut rbuf = ReadBuffer::new(wbuf.freeze());
        assert_eq!(parse_status_info(&mut rbuf).unwrap(), 0);
    }

    #[test]
    fn test_warning_parse() {
        let mut wbuf = WriteBuffer::new();
        wbuf.write_ub2(24344);
        let text = b"PL/SQL compilation warning";
        wbuf.write_ub2(text.len() as u16);
        wbuf.write_ub2(0);
        wbuf.write_bytes(text);
        let mut rbuf = ReadBuffer::new(wbuf.freeze());
        let (number, message) = parse_warning(&mut rbuf).unwrap().unwrap();
        assert_eq!(number, 24344);
        assert!(message.contains("compilation warning"));
    }

    #[test]
    fn test_returning_values() {
        let mut wbuf = WriteBuffer::new();
        wbuf.write_ub4(1); // one row for the single return bind
        wbuf.write_bytes_with_length(&[0xc1, 0x08]);
        let mut rbuf = ReadBuffer::new(wbuf.freeze());
        let values = parse_returning_values(&mut rbuf, 1).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].as_ref().unwrap().as_ref(), &[0xc1, 0x08]);
    }
}
