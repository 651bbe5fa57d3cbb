//! EXECUTE and REEXECUTE messages.

use crate::error::Result;
use crate::protocol::constants::*;
use crate::protocol::message::{
    bytes_with_length_wire_size, ub2_wire_size, ub4_wire_size, ub8_wire_size, DataMessage, Message,
    WriteExt,
};
use crate::protocol::types::OracleColumn;
use crate::statement::{BindDirection, BindInfo};

/// One column-metadata entry, shared by bind metadata and defines.
struct MetadataEntry {
    ora_type_num: u8,
    flags: u8,
    buffer_size: u32,
    max_num_elements: u32,
    charset_id: u16,
    charset_form: u8,
}

impl MetadataEntry {
    fn for_bind(bind: &BindInfo, charset_id: u16) -> Self {
        let mut flags = TNS_BIND_USE_INDICATORS as u8;
        if bind.is_array {
            flags |= TNS_BIND_ARRAY as u8;
        }
        Self {
            ora_type_num: bind.db_type.type_num() as u8,
            flags,
            buffer_size: bind.buffer_size.max(1),
            max_num_elements: if bind.is_array { bind.max_array_size } else { 0 },
            charset_id: if bind.csfrm != 0 { charset_id } else { 0 },
            charset_form: bind.csfrm,
            }
    }

    fn for_define(column: &OracleColumn, charset_id: u16) -> Self {
        Self {
            ora_type_num: column.data_type.type_num() as u8,
            flags: TNS_BIND_USE_INDICATORS as u8,
            buffer_size: column.buffer_size.max(1),
            max_num_elements: 0,
            charset_id: if column.csfrm() != 0 { charset_id } else { 0 },
            charset_form: column.csfrm(),
        }
    }

    fn wire_size(&self, ttc_field_version: u8) -> usize {
        let mut size = 0;
        size += 1; // ora_type_num
        size += 1; // flags
        size += 1; // precision
        size += 1; // scale
        size += ub4_wire_size(self.buffer_size);
        size += ub4_wire_size(self.max_num_elements);
        size += ub8_wire_size(0); // cont flag
        size += ub4_wire_size(0); // OID length
        size += ub2_wire_size(0); // OID version
        size += ub2_wire_size(self.charset_id);
        size += 1; // charset form
        size += ub4_wire_size(0); // LOB prefetch length
        if ttc_field_version >= TNS_CCAP_FIELD_VERSION_12_2 {
            size += ub4_wire_size(0); // oaccolid
        }
        size
    }

    fn write(&self, buf: &mut Vec<u8>, ttc_field_version: u8) {
        buf.write_u8(self.ora_type_num);
        buf.write_u8(self.flags);
        buf.write_u8(0); // precision
        buf.write_u8(0); // scale
        buf.write_ub4(self.buffer_size);
        buf.write_ub4(self.max_num_elements);
        buf.write_ub8(0); // cont flag
        buf.write_ub4(0); // OID length
        buf.write_ub2(0); // OID version
        buf.write_ub2(self.charset_id);
        buf.write_u8(self.charset_form);
        buf.write_ub4(0); // LOB prefetch length
        if ttc_field_version >= TNS_CCAP_FIELD_VERSION_12_2 {
            buf.write_ub4(0); // oaccolid
        }
    }
}

/// Full EXECUTE message (`TNS_FUNC_EXECUTE`).
///
/// Sent for the first execution of a cursor and whenever the bind metadata
/// changed; otherwise the dispatcher prefers [`ReexecuteMessage`].
pub struct ExecuteMessage<'a> {
    /// SQL text; `None` reuses the already-parsed cursor.
    pub sql: Option<&'a [u8]>,
    pub cursor_id: u16,
    /// Composed execute option bits.
    pub options: u32,
    /// al8i4[9] flag bits.
    pub exec_flags: u32,
    /// Execution count: prefetch rows for queries, iterations for DML.
    pub num_execs: u32,
    pub prefetch_rows: u32,
    pub ttc_field_version: u8,
    pub charset_id: u16,
    pub binds: &'a [BindInfo],
    /// Column defines; non-empty only with `TNS_EXEC_OPTION_DEFINE`.
    pub defines: &'a [OracleColumn],
}

impl ExecuteMessage<'_> {
    fn is_new_cursor(&self) -> bool {
        self.sql.is_some()
    }

    fn num_iters(&self) -> u32 {
        self.binds
            .iter()
            .filter(|b| b.is_array)
            .map(|b| b.array_count)
            .max()
            .unwrap_or(1)
            .max(1)
    }

    fn bind_values_wire_size(&self) -> usize {
        if self.binds.is_empty() {
            return 0;
        }
        let mut size = 1; // TNS_MSG_TYPE_ROW_DATA
        for iteration in 0..self.num_iters() {
            for bind in self.binds {
                size += self.bind_value_wire_size(bind, iteration as usize);
            }
        }
        size
    }

    fn bind_value_wire_size(&self, bind: &BindInfo, iteration: usize) -> usize {
        if bind.direction == BindDirection::Output {
            return 1;
        }
        let value = bind
            .variable
            .as_ref()
            .and_then(|v| v.values.get(iteration))
            .and_then(|v| v.as_ref());
        match value {
            Some(bytes) => bytes_with_length_wire_size(bytes.len()),
            None => 1,
        }
    }

    fn write_bind_values(&self, buf: &mut Vec<u8>) {
        if self.binds.is_empty() {
            return;
        }
        buf.write_u8(TNS_MSG_TYPE_ROW_DATA);
        for iteration in 0..self.num_iters() {
            for bind in self.binds {
                if bind.direction == BindDirection::Output {
                    buf.write_u8(0);
                    continue;
                }
                let value = bind
                    .variable
                    .as_ref()
                    .and_then(|v| v.values.get(iteration as usize))
                    .and_then(|v| v.as_ref());
                match value {
                    Some(bytes) => buf.write_bytes_with_length(bytes),
                    None => buf.write_u8(0),
                }
            }
        }
    }
}

impl Message for ExecuteMessage<'_> {
    fn wire_size(&self) -> usize {
        let sql_len = self.sql.map(|s| s.len()).unwrap_or(0);
        let is_new_cursor = self.is_new_cursor();

        let mut size = 0;
        size += 1; // message type
        size += 1; // function code
        size += 1; // sequence number
        if self.ttc_field_version >= TNS_CCAP_FIELD_VERSION_23_1_EXT_1 {
            size += 1; // extended sequence number
        }

        size += ub4_wire_size(self.options);
        size += ub4_wire_size(self.cursor_id as u32);

        size += 1; // SQL pointer
        size += ub4_wire_size(if is_new_cursor { sql_len as u32 } else { 0 });

        size += 1; // al8i4 pointer
        size += ub4_wire_size(13); // al8i4 array length

        size += 1; // al8o4 pointer
        size += 1; // al8o4l pointer

        size += ub4_wire_size(0); // prefetch buffer size
        size += ub4_wire_size(self.prefetch_rows);
        size += ub4_wire_size(TNS_MAX_LONG_LENGTH); // max LONG size

        size += 1; // binds pointer
        size += ub4_wire_size(self.binds.len() as u32);

        size += 1; // al8app
        size += 1; // al8txn
        size += 1; // al8txl
        size += 1; // al8kv
        size += 1; // al8kvl

        size += 1; // defines pointer
        size += ub4_wire_size(self.defines.len() as u32);

        size += ub4_wire_size(0); // registration id
        size += 1; // al8objlist pointer
        size += 1; // al8objlen pointer
        size += 1; // al8blv pointer
        size += ub4_wire_size(0); // al8blvl
        size += 1; // al8dnam pointer
        size += ub4_wire_size(0); // al8dnaml
        size += ub4_wire_size(0); // al8regid_msb

        size += 1; // al8pidmlrc pointer
        size += ub4_wire_size(0); // al8pidmlrcbl
        size += 1; // al8pidmlrcl pointer

        if self.ttc_field_version >= TNS_CCAP_FIELD_VERSION_12_2 {
            size += 1; // al8sqlsig pointer
            size += ub4_wire_size(0); // SQL signature length
            size += 1; // SQL ID pointer
            size += ub4_wire_size(0); // SQL ID size
            size += 1; // SQL ID length pointer
            if self.ttc_field_version >= TNS_CCAP_FIELD_VERSION_12_2_EXT_1 {
                size += 1; // chunk ids pointer
                size += ub4_wire_size(0); // num chunk ids
            }
        }

        if let Some(sql) = self.sql {
            size += bytes_with_length_wire_size(sql.len());
        }

        // al8i4 array, 13 entries
        size += ub4_wire_size(u32::from(is_new_cursor)); // [0] parse
        size += ub4_wire_size(self.num_execs); // [1] execution count
        size += ub4_wire_size(0) * 3; // [2..4]
        size += ub4_wire_size(0) * 2; // [5..6] SCN
        size += ub4_wire_size(u32::from(self.exec_flags & TNS_EXEC_FLAGS_IMPLICIT_RESULTSET != 0)); // [7]
        size += ub4_wire_size(0); // [8]
        size += ub4_wire_size(self.exec_flags); // [9]
        size += ub4_wire_size(0) * 3; // [10..12]

        for define in self.defines {
            size += MetadataEntry::for_define(define, self.charset_id)
                .wire_size(self.ttc_field_version);
        }
        if self.defines.is_empty() {
            for bind in self.binds {
                size +=
                    MetadataEntry::for_bind(bind, self.charset_id).wire_size(self.ttc_field_version);
            }
            size += self.bind_values_wire_size();
        }

        size
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        let sql_len = self.sql.map(|s| s.len()).unwrap_or(0);
        let is_new_cursor = self.is_new_cursor();

        buf.write_u8(TNS_MSG_TYPE_FUNCTION);
        buf.write_u8(TNS_FUNC_EXECUTE);
        buf.write_u8(1); // sequence number
        if self.ttc_field_version >= TNS_CCAP_FIELD_VERSION_23_1_EXT_1 {
            buf.write_u8(0); // extended sequence number
        }

        buf.write_ub4(self.options);
        buf.write_ub4(self.cursor_id as u32);

        if is_new_cursor {
            buf.write_u8(1);
            buf.write_ub4(sql_len as u32);
        } else {
            buf.write_u8(0);
            buf.write_ub4(0);
        }

        buf.write_u8(1); // al8i4 pointer
        buf.write_ub4(13);

        buf.write_u8(0); // al8o4 pointer
        buf.write_u8(0); // al8o4l pointer

        buf.write_ub4(0); // prefetch buffer size
        buf.write_ub4(self.prefetch_rows);
        buf.write_ub4(TNS_MAX_LONG_LENGTH);

        if self.binds.is_empty() {
            buf.write_u8(0);
            buf.write_ub4(0);
        } else {
            buf.write_u8(1);
            buf.write_ub4(self.binds.len() as u32);
        }

        buf.write_u8(0); // al8app
        buf.write_u8(0); // al8txn
        buf.write_u8(0); // al8txl
        buf.write_u8(0); // al8kv
        buf.write_u8(0); // al8kvl

        if self.defines.is_empty() {
            buf.write_u8(0);
            buf.write_ub4(0);
        } else {
            buf.write_u8(1);
            buf.write_ub4(self.defines.len() as u32);
        }

        buf.write_ub4(0); // registration id
        buf.write_u8(0); // al8objlist pointer
        buf.write_u8(1); // al8objlen pointer
        buf.write_u8(0); // al8blv pointer
        buf.write_ub4(0); // al8blvl
        buf.write_u8(0); // al8dnam pointer
        buf.write_ub4(0); // al8dnaml
        buf.write_ub4(0); // al8regid_msb

        buf.write_u8(0); // al8pidmlrc pointer
        buf.write_ub4(0); // al8pidmlrcbl
        buf.write_u8(0); // al8pidmlrcl pointer

        if self.ttc_field_version >= TNS_CCAP_FIELD_VERSION_12_2 {
            buf.write_u8(0); // al8sqlsig pointer
            buf.write_ub4(0); // SQL signature length
            buf.write_u8(0); // SQL ID pointer
            buf.write_ub4(0); // SQL ID size
            buf.write_u8(0); // SQL ID length pointer
            if self.ttc_field_version >= TNS_CCAP_FIELD_VERSION_12_2_EXT_1 {
                buf.write_u8(0); // chunk ids pointer
                buf.write_ub4(0); // num chunk ids
            }
        }

        if let Some(sql) = self.sql {
            buf.write_bytes_with_length(sql);
        }

        buf.write_ub4(u32::from(is_new_cursor)); // [0] parse
        buf.write_ub4(self.num_execs); // [1] execution count
        buf.write_ub4(0); // [2]
        buf.write_ub4(0); // [3]
        buf.write_ub4(0); // [4]
        buf.write_ub4(0); // [5] SCN
        buf.write_ub4(0); // [6] SCN
        buf.write_ub4(u32::from(
            self.exec_flags & TNS_EXEC_FLAGS_IMPLICIT_RESULTSET != 0,
        )); // [7]
        buf.write_ub4(0); // [8]
        buf.write_ub4(self.exec_flags); // [9]
        buf.write_ub4(0); // [10] fetch orientation
        buf.write_ub4(0); // [11] fetch position
        buf.write_ub4(0); // [12]

        for define in self.defines {
            MetadataEntry::for_define(define, self.charset_id)
                .write(buf, self.ttc_field_version);
        }
        if self.defines.is_empty() {
            for bind in self.binds {
                MetadataEntry::for_bind(bind, self.charset_id).write(buf, self.ttc_field_version);
            }
            self.write_bind_values(buf);
        }

        Ok(())
    }
}

impl DataMessage for ExecuteMessage<'_> {}

/// REEXECUTE of an already-parsed cursor with unchanged bind metadata.
pub struct ReexecuteMessage<'a> {
    pub cursor_id: u16,
    pub num_iters: u32,
    pub ttc_field_version: u8,
    /// Select REEXECUTE_AND_FETCH for immediately reused query cursors.
    pub and_fetch: bool,
    pub binds: &'a [BindInfo],
}

impl ReexecuteMessage<'_> {
    fn function_code(&self) -> u8 {
        if self.and_fetch {
            TNS_FUNC_REEXECUTE_AND_FETCH
        } else {
            TNS_FUNC_REEXECUTE
        }
    }
}

impl Message for ReexecuteMessage<'_> {
    fn wire_size(&self) -> usize {
        let mut size = 0;
        size += 1; // message type
        size += 1; // function code
        size += 1; // sequence number
        if self.ttc_field_version >= TNS_CCAP_FIELD_VERSION_23_1_EXT_1 {
            size += 1;
        }
        size += ub4_wire_size(self.cursor_id as u32);
        size += ub4_wire_size(self.num_iters);

        if !self.binds.is_empty() {
            size += 1; // TNS_MSG_TYPE_ROW_DATA
            for iteration in 0..self.num_iters as usize {
                for bind in self.binds {
                    if bind.direction == BindDirection::Output {
                        size += 1;
                        continue;
                    }
                    let value = bind
                        .variable
                        .as_ref()
                        .and_then(|v| v.values.get(iteration))
                        .and_then(|v| v.as_ref());
                    size += match value {
                        Some(bytes) => bytes_with_length_wire_size(bytes.len()),
                        None => 1,
                    };
                }
            }
        }
        size
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u8(TNS_MSG_TYPE_FUNCTION);
        buf.write_u8(self.function_code());
        buf.write_u8(1); // sequence number
        if self.ttc_field_version >= TNS_CCAP_FIELD_VERSION_23_1_EXT_1 {
            buf.write_u8(0);
        }
        buf.write_ub4(self.cursor_id as u32);
        buf.write_ub4(self.num_iters);

        if !self.binds.is_empty() {
            buf.write_u8(TNS_MSG_TYPE_ROW_DATA);
            for iteration in 0..self.num_iters as usize {
                for bind in self.binds {
                    if bind.direction == BindDirection::Output {
                        buf.write_u8(0);
                        continue;
                    }
                    let value = bind
                        .variable
                        .as_ref()
                        .and_then(|v| v.values.get(iteration))
                        .and_then(|v| v.as_ref());
                    match value {
                        Some(bytes) => buf.write_bytes_with_length(bytes),
                        None => buf.write_u8(0),
                    }
                }
            }
        }
        Ok(())
    }
}

impl DataMessage for ReexecuteMessage<'_> {}
