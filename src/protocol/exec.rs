//! Statement execution: option composition and reply digestion.
//!
//! The dispatcher owns the I/O; this module holds the pure halves of the
//! statement state machine: composing the execute option bits from the
//! statement kind plus user options, and digesting one assembled reply into
//! rows, metadata, out-binds, and status.

use crate::error::{Error, Result};
use crate::protocol::buffer::ReadBuffer;
use crate::protocol::constants::*;
use crate::protocol::response::{
    parse_bit_vector, parse_describe_info, parse_error_info, parse_implicit_resultset,
    parse_io_vector, parse_out_binds, parse_return_parameters, parse_returning_values,
    parse_row_data, parse_row_header, parse_server_side_piggyback, parse_status_info,
    parse_warning, ErrorInfo, NullBitVector,
};
use crate::protocol::types::{DataRow, OracleColumn};
use crate::statement::{Statement, StatementKind};
use bytes::Bytes;

/// User-facing execution options.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Rows per FETCH round-trip; resized by the adaptive row buffer.
    pub array_size: u32,
    /// Rows prefetched with the EXECUTE itself.
    pub prefetch_rows: u32,
    /// Parse and describe only; no execution.
    pub describe_only: bool,
    /// Continue batch DML past per-row errors (ORA-24381 reporting).
    pub batch_errors: bool,
    /// Collect per-row counts for batch DML.
    pub dml_row_counts: bool,
    /// Commit on successful execution.
    pub auto_commit: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            array_size: 256,
            prefetch_rows: 256,
            describe_only: false,
            batch_errors: false,
            dml_row_counts: false,
            auto_commit: false,
        }
    }
}

/// Progress of one statement through its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPhase {
    /// EXECUTE (or REEXECUTE) not yet sent.
    PendingExecute,
    /// Rows are being emitted to the sink.
    Streaming,
    /// The sink drained the batch and the server holds more rows.
    FetchRequired,
    /// BREAK sent; discarding inbound until the marker exchange completes.
    Cancelling,
    /// Terminal.
    Complete,
}

/// Compose the execute option bits and al8i4[9] flags.
pub fn compose_execute_options(stmt: &Statement, options: &QueryOptions) -> (u32, u32) {
    let mut bits: u32 = 0;
    let mut exec_flags: u32 = 0;

    if stmt.cursor_id == 0 || stmt.is_ddl() {
        bits |= TNS_EXEC_OPTION_PARSE;
    }
    if options.describe_only {
        bits |= TNS_EXEC_OPTION_DESCRIBE;
    } else {
        bits |= TNS_EXEC_OPTION_EXECUTE;
    }
    if !stmt.binds().is_empty() {
        bits |= TNS_EXEC_OPTION_BIND;
        if stmt.is_plsql() {
            bits |= TNS_EXEC_OPTION_PLSQL_BIND;
        }
    }
    if stmt.requires_define {
        bits |= TNS_EXEC_OPTION_DEFINE;
    }
    if stmt.is_query() && !options.describe_only && options.prefetch_rows > 0 {
        bits |= TNS_EXEC_OPTION_FETCH;
    }
    if !stmt.is_plsql() {
        bits |= TNS_EXEC_OPTION_NOT_PLSQL;
    }
    if options.auto_commit {
        bits |= TNS_EXEC_OPTION_COMMIT;
    }
    if options.batch_errors && stmt.is_dml() {
        bits |= TNS_EXEC_OPTION_BATCH_ERRORS;
    }

    if stmt.is_query() && !options.describe_only {
        exec_flags |= TNS_EXEC_FLAGS_IMPLICIT_RESULTSET;
    }
    if options.dml_row_counts && stmt.is_dml() {
        exec_flags |= TNS_EXEC_FLAGS_DML_ROWCOUNTS;
    }

    (bits, exec_flags)
}

/// Context needed to digest one reply.
pub struct ReplyContext<'a> {
    /// Cached column metadata; absent before the first DESCRIBE_INFO.
    pub columns: Option<&'a [OracleColumn]>,
    /// Number of RETURNING ... INTO binds.
    pub num_return_binds: usize,
    /// Number of out binds delivered via FLUSH_OUT_BINDS (PL/SQL).
    pub num_out_binds: usize,
    pub ttc_field_version: u8,
    pub server_ttc_field_version: u8,
}

/// Everything one assembled reply contained.
#[derive(Debug, Default)]
pub struct ReplyDigest {
    /// Fresh column metadata from DESCRIBE_INFO.
    pub columns: Option<Vec<OracleColumn>>,
    pub rows: Vec<DataRow>,
    /// The trailing end-of-call status block.
    pub error: Option<ErrorInfo>,
    /// Simple STATUS call-status, for flows without an error block.
    pub call_status: Option<u32>,
    /// Out-bind values (RETURNING or FLUSH_OUT_BINDS).
    pub out_binds: Option<Vec<Option<Bytes>>>,
    /// Child cursors of IMPLICIT_RESULTSET.
    pub implicit_cursors: Vec<u16>,
    pub warning: Option<(u16, String)>,
    /// Per-bind directions from IO_VECTOR.
    pub bind_directions: Option<Vec<u8>>,
}

impl ReplyDigest {
    /// Whether the cursor has more rows to fetch.
    pub fn more_rows(&self) -> bool {
        match &self.error {
            Some(info) => info.is_success(),
            None => false,
        }
    }

    /// The failure carried by this reply, if any.
    pub fn failure(&self) -> Option<Error> {
        let info = self.error.as_ref()?;
        if info.is_success() || info.is_no_data() {
            return None;
        }
        Some(Error::Server(info.clone().into_server_error()))
    }
}

/// Digest one assembled logical reply.
pub fn process_reply(payload: Bytes, ctx: &ReplyContext<'_>) -> Result<ReplyDigest> {
    let mut buf = ReadBuffer::new(payload);
    let mut digest = ReplyDigest::default();
    let mut bit_vector: Option<NullBitVector> = None;

    while buf.remaining() > 0 {
        let message_type = buf.read_u8()?;
        match message_type {
            TNS_MSG_TYPE_DESCRIBE_INFO => {
                let columns = parse_describe_info(&mut buf, ctx.ttc_field_version)?;
                digest.columns = Some(columns);
            }
            TNS_MSG_TYPE_ROW_HEADER => {
                let num_columns = digest
                    .columns
                    .as_ref()
                    .map(|c| c.len())
                    .or(ctx.columns.map(|c| c.len()))
                    .unwrap_or(0);
                if let Some(bv) = parse_row_header(&mut buf, num_columns)? {
                    bit_vector = Some(bv);
                }
            }
            TNS_MSG_TYPE_BIT_VECTOR => {
                let num_columns = digest
                    .columns
                    .as_ref()
                    .map(|c| c.len())
                    .or(ctx.columns.map(|c| c.len()))
                    .unwrap_or(0);
                bit_vector = Some(parse_bit_vector(&mut buf, num_columns)?);
            }
            TNS_MSG_TYPE_ROW_DATA => {
                if ctx.num_return_binds > 0 {
                    let values = parse_returning_values(&mut buf, ctx.num_return_binds)?;
                    digest.out_binds = Some(values);
                } else {
                    let columns = digest
                        .columns
                        .as_deref()
                        .or(ctx.columns)
                        .ok_or_else(|| Error::decoding("row data before column metadata"))?;
                    let row = parse_row_data(&mut buf, columns, bit_vector.as_ref())?;
                    digest.rows.push(row);
                    // a compressed-null vector covers exactly one row
                    bit_vector = None;
                }
            }
            TNS_MSG_TYPE_ERROR => {
                digest.error = Some(parse_error_info(&mut buf, ctx.server_ttc_field_version)?);
            }
            TNS_MSG_TYPE_STATUS => {
                digest.call_status = Some(parse_status_info(&mut buf)?);
            }
            TNS_MSG_TYPE_PARAMETER => {
                parse_return_parameters(&mut buf)?;
            }
            TNS_MSG_TYPE_IO_VECTOR => {
                digest.bind_directions = Some(parse_io_vector(&mut buf)?);
            }
            TNS_MSG_TYPE_FLUSH_OUT_BINDS => {
                let values = parse_out_binds(&mut buf, ctx.num_out_binds)?;
                digest.out_binds = Some(values);
            }
            TNS_MSG_TYPE_WARNING => {
                digest.warning = parse_warning(&mut buf)?;
            }
            TNS_MSG_TYPE_SERVER_SIDE_PIGGYBACK => {
                parse_server_side_piggyback(&mut buf)?;
            }
            TNS_MSG_TYPE_IMPLICIT_RESULTSET => {
                digest.implicit_cursors = parse_implicit_resultset(&mut buf)?;
            }
            TNS_MSG_TYPE_ONEWAY_FN => {
                // server-initiated one-way call; consumed, never answered
                let function = buf.read_u8()?;
                let _sequence = buf.read_u8()?;
                log::debug!("one-way function {} from server", function);
            }
            TNS_MSG_TYPE_END_OF_RESPONSE => break,
            other => {
                return Err(Error::UnexpectedBackendMessage {
                    message_type: other,
                    context: "processing execute reply",
                });
            }
        }
    }

    Ok(digest)
}

/// Whether a statement should reuse its cursor via REEXECUTE.
pub fn can_reexecute(stmt: &Statement) -> bool {
    stmt.cursor_id != 0
        && !stmt.requires_full_execute
        && !stmt.requires_define
        && stmt.kind() != StatementKind::Ddl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::buffer::WriteBuffer;
    use crate::protocol::types::OracleDataType;
    use crate::statement::Statement;

    fn number_column(name: &str) -> OracleColumn {
        OracleColumn {
            name: name.to_string(),
            data_type: OracleDataType::Number,
            size: 0,
            buffer_size: 22,
            precision: 0,
            scale: 0,
            nullable: true,
        }
    }

    #[test]
    fn test_query_options_composition() {
        let stmt = Statement::parse("SELECT 1 FROM DUAL").unwrap();
        let (bits, exec_flags) = compose_execute_options(&stmt, &QueryOptions::default());
        assert!(bits & TNS_EXEC_OPTION_PARSE != 0);
        assert!(bits & TNS_EXEC_OPTION_EXECUTE != 0);
        assert!(bits & TNS_EXEC_OPTION_FETCH != 0);
        assert!(bits & TNS_EXEC_OPTION_NOT_PLSQL != 0);
        assert!(bits & TNS_EXEC_OPTION_BIND == 0);
        assert!(exec_flags & TNS_EXEC_FLAGS_IMPLICIT_RESULTSET != 0);
    }

    #[test]
    fn test_describe_only_composition() {
        let stmt = Statement::parse("SELECT 1 FROM DUAL").unwrap();
        let options = QueryOptions {
            describe_only: true,
            ..QueryOptions::default()
        };
        let (bits, _) = compose_execute_options(&stmt, &options);
        assert!(bits & TNS_EXEC_OPTION_DESCRIBE != 0);
        assert!(bits & TNS_EXEC_OPTION_EXECUTE == 0);
        assert!(bits & TNS_EXEC_OPTION_FETCH == 0);
    }

    #[test]
    fn test_plsql_composition() {
        let stmt = Statement::parse("BEGIN proc(:1); END;").unwrap();
        let (bits, _) = compose_execute_options(&stmt, &QueryOptions::default());
        assert!(bits & TNS_EXEC_OPTION_PLSQL_BIND != 0);
        assert!(bits & TNS_EXEC_OPTION_NOT_PLSQL == 0);
        assert!(bits & TNS_EXEC_OPTION_FETCH == 0);
    }

    #[test]
    fn test_batch_dml_composition() {
        let stmt = Statement::parse("INSERT INTO t VALUES (:1)").unwrap();
        let options = QueryOptions {
            batch_errors: true,
            dml_row_counts: true,
            auto_commit: true,
            ..QueryOptions::default()
        };
        let (bits, exec_flags) = compose_execute_options(&stmt, &options);
        assert!(bits & TNS_EXEC_OPTION_BATCH_ERRORS != 0);
        assert!(bits & TNS_EXEC_OPTION_COMMIT != 0);
        assert!(exec_flags & TNS_EXEC_FLAGS_DML_ROWCOUNTS != 0);
        assert!(exec_flags & TNS_EXEC_FLAGS_IMPLICIT_RESULTSET == 0);
    }

    fn write_minimal_error(wbuf: &mut WriteBuffer, number: u32, cursor_id: u16, row_count: u64) {
        wbuf.write_u8(TNS_MSG_TYPE_ERROR);
        wbuf.write_ub4(0);
        wbuf.write_ub2(0);
        wbuf.write_ub4(0);
        wbuf.write_ub2(0);
        wbuf.write_ub2(0);
        wbuf.write_ub2(0);
        wbuf.write_ub2(cursor_id);
        wbuf.write_ub2(0);
        for _ in 0..6 {
            wbuf.write_u8(0);
        }
        wbuf.write_ub4(0);
        wbuf.write_ub2(0);
        wbuf.write_u8(0);
        wbuf.write_ub4(0);
        wbuf.write_ub2(0);
        wbuf.write_ub4(0);
        wbuf.write_u8(0);
        wbuf.write_u8(0);
        wbuf.write_ub2(0);
        wbuf.write_ub4(0);
        wbuf.write_ub4(0);
        wbuf.write_ub2(0);
        wbuf.write_ub4(0);
        wbuf.write_ub2(0);
        wbuf.write_ub4(number);
        wbuf.write_ub8(row_count);
        if number != 0 {
            wbuf.write_str_with_length("ORA-error");
        }
    }

    #[test]
    fn test_process_reply_row_batch() {
        let columns = vec![number_column("X")];
        let mut wbuf = WriteBuffer::new();
        wbuf.write_u8(TNS_MSG_TYPE_ROW_DATA);
        wbuf.write_bytes_with_length(&[0xc1, 0x02]);
        write_minimal_error(&mut wbuf, TNS_ERR_NO_DATA_FOUND, 9, 1);

        let ctx = ReplyContext {
            columns: Some(&columns),
            num_return_binds: 0,
            num_out_binds: 0,
            ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
            server_ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
        };
        let digest = process_reply(wbuf.freeze(), &ctx).unwrap();
        assert_eq!(digest.rows.len(), 1);
        assert_eq!(digest.rows[0].get(0).unwrap().as_ref(), &[0xc1, 0x02]);
        assert!(!digest.more_rows());
        assert!(digest.failure().is_none());
        assert_eq!(digest.error.as_ref().unwrap().cursor_id, 9);
    }

    #[test]
    fn test_process_reply_more_rows() {
        let columns = vec![number_column("X")];
        let mut wbuf = WriteBuffer::new();
        wbuf.write_u8(TNS_MSG_TYPE_ROW_DATA);
        wbuf.write_bytes_with_length(&[0xc1, 0x02]);
        write_minimal_error(&mut wbuf, 0, 9, 1);

        let ctx = ReplyContext {
            columns: Some(&columns),
            num_return_binds: 0,
            num_out_binds: 0,
            ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
            server_ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
        };
        let digest = process_reply(wbuf.freeze(), &ctx).unwrap();
        assert!(digest.more_rows());
    }

    #[test]
    fn test_process_reply_server_failure() {
        let mut wbuf = WriteBuffer::new();
        write_minimal_error(&mut wbuf, 942, 0, 0);
        let ctx = ReplyContext {
            columns: None,
            num_return_binds: 0,
            num_out_binds: 0,
            ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
            server_ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
        };
        let digest = process_reply(wbuf.freeze(), &ctx).unwrap();
        match digest.failure() {
            Some(Error::Server(e)) => assert_eq!(e.number, 942),
            other => panic!("expected server failure, got {:?}", other),
        }
    }

    #[test]
    fn test_process_reply_fatal_ora_28() {
        let mut wbuf = WriteBuffer::new();
        write_minimal_error(&mut wbuf, 28, 0, 0);
        let ctx = ReplyContext {
            columns: None,
            num_return_binds: 0,
            num_out_binds: 0,
            ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
            server_ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
        };
        let digest = process_reply(wbuf.freeze(), &ctx).unwrap();
        let failure = digest.failure().unwrap();
        assert!(failure.is_fatal());
    }

    #[test]
    fn test_process_reply_row_before_metadata_fails() {
        let mut wbuf = WriteBuffer::new();
        wbuf.write_u8(TNS_MSG_TYPE_ROW_DATA);
        wbuf.write_bytes_with_length(b"x");
        let ctx = ReplyContext {
            columns: None,
            num_return_binds: 0,
            num_out_binds: 0,
            ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
            server_ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
        };
        assert!(process_reply(wbuf.freeze(), &ctx).is_err());
    }

    #[test]
    fn test_process_reply_unknown_message_type() {
        let mut wbuf = WriteBuffer::new();
        wbuf.write_u8(250);
        let ctx = ReplyContext {
            columns: None,
            num_return_binds: 0,
            num_out_binds: 0,
            ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
            server_ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
        };
        match process_reply(wbuf.freeze(), &ctx) {
            Err(Error::UnexpectedBackendMessage { message_type, .. }) => {
                assert_eq!(message_type, 250)
            }
            other => panic!("expected UnexpectedBackendMessage, got {:?}", other),
        }
    }

    #[test]
    fn test_process_reply_returning_values() {
        let mut wbuf = WriteBuffer::new();
        wbuf.write_u8(TNS_MSG_TYPE_ROW_DATA);
        wbuf.write_ub4(1);
        wbuf.write_bytes_with_length(&[0xc1, 0x08]);
        write_minimal_error(&mut wbuf, 0, 3, 1);

        let ctx = ReplyContext {
            columns: None,
            num_return_binds: 1,
            num_out_binds: 0,
            ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
            server_ttc_field_version: TNS_CCAP_FIELD_VERSION_19_1,
        };
        let digest = process_reply(wbuf.freeze(), &ctx).unwrap();
        let out = digest.out_binds.unwrap();
        assert_eq!(out[0].as_ref().unwrap().as_ref(), &[0xc1, 0x08]);
        assert_eq!(digest.error.unwrap().row_count, 1);
    }

    #[test]
    fn test_can_reexecute() {
        let mut stmt = Statement::parse("SELECT 1 FROM DUAL").unwrap();
        assert!(!can_reexecute(&stmt));
        stmt.cursor_id = 4;
        stmt.requires_full_execute = false;
        assert!(can_reexecute(&stmt));
        stmt.requires_full_execute = true;
        assert!(!can_reexecute(&stmt));
    }
}
