//! Data-type capability exchange (`TNS_MSG_TYPE_DATA_TYPES`).

use crate::error::Result;
use crate::protocol::constants::*;
use crate::protocol::message::{bytes_with_length_wire_size, DataMessage, Message, WriteExt};

/// Representation flag meaning the type is transferred in its native form.
const TNS_TYPE_REP_NATIVE: u16 = 1;

/// The data types the client declares it can exchange, as
/// `(data_type, conversion_target)` pairs.
const DATA_TYPES: &[(u16, u16)] = &[
    (ORA_TYPE_NUM_VARCHAR, ORA_TYPE_NUM_VARCHAR),
    (ORA_TYPE_NUM_NUMBER, ORA_TYPE_NUM_NUMBER),
    (ORA_TYPE_NUM_BINARY_INTEGER, ORA_TYPE_NUM_BINARY_INTEGER),
    (ORA_TYPE_NUM_LONG, ORA_TYPE_NUM_LONG),
    (ORA_TYPE_NUM_ROWID, ORA_TYPE_NUM_ROWID),
    (ORA_TYPE_NUM_DATE, ORA_TYPE_NUM_DATE),
    (ORA_TYPE_NUM_RAW, ORA_TYPE_NUM_RAW),
    (ORA_TYPE_NUM_LONG_RAW, ORA_TYPE_NUM_LONG_RAW),
    (ORA_TYPE_NUM_CHAR, ORA_TYPE_NUM_CHAR),
    (ORA_TYPE_NUM_BINARY_FLOAT, ORA_TYPE_NUM_BINARY_FLOAT),
    (ORA_TYPE_NUM_BINARY_DOUBLE, ORA_TYPE_NUM_BINARY_DOUBLE),
    (ORA_TYPE_NUM_CURSOR, ORA_TYPE_NUM_CURSOR),
    (ORA_TYPE_NUM_OBJECT, ORA_TYPE_NUM_OBJECT),
    (ORA_TYPE_NUM_CLOB, ORA_TYPE_NUM_CLOB),
    (ORA_TYPE_NUM_BLOB, ORA_TYPE_NUM_BLOB),
    (ORA_TYPE_NUM_BFILE, ORA_TYPE_NUM_BFILE),
    (ORA_TYPE_NUM_TIMESTAMP, ORA_TYPE_NUM_TIMESTAMP),
    (ORA_TYPE_NUM_TIMESTAMP_TZ, ORA_TYPE_NUM_TIMESTAMP_TZ),
    (ORA_TYPE_NUM_INTERVAL_YM, ORA_TYPE_NUM_INTERVAL_YM),
    (ORA_TYPE_NUM_INTERVAL_DS, ORA_TYPE_NUM_INTERVAL_DS),
    (ORA_TYPE_NUM_TIMESTAMP_LTZ, ORA_TYPE_NUM_TIMESTAMP_LTZ),
    (ORA_TYPE_NUM_UROWID, ORA_TYPE_NUM_UROWID),
    (ORA_TYPE_NUM_BOOLEAN, ORA_TYPE_NUM_BOOLEAN),
    (ORA_TYPE_NUM_JSON, ORA_TYPE_NUM_JSON),
    (ORA_TYPE_NUM_VECTOR, ORA_TYPE_NUM_VECTOR),
];

/// Wire size of the data-types array including its terminator.
pub fn data_types_array_wire_size() -> usize {
    DATA_TYPES.len() * 8 + 2
}

/// Write the data-types array: per entry data type, conversion target,
/// representation, and a reserved zero; a zero data type terminates.
pub fn write_data_types_array(buf: &mut Vec<u8>) {
    for &(data_type, conv_data_type) in DATA_TYPES {
        buf.write_u16_be(data_type);
        buf.write_u16_be(conv_data_type);
        buf.write_u16_be(TNS_TYPE_REP_NATIVE);
        buf.write_u16_be(0);
    }
    buf.write_u16_be(0);
}

/// Data-types exchange message.
pub struct DataTypesMessage<'a> {
    pub compile_caps: &'a [u8],
    pub runtime_caps: &'a [u8],
}

impl Message for DataTypesMessage<'_> {
    fn wire_size(&self) -> usize {
        let mut size = 0;
        size += 1; // message type
        size += 2; // charset
        size += 2; // ncharset
        size += 1; // encoding flags
        size += bytes_with_length_wire_size(self.compile_caps.len());
        size += bytes_with_length_wire_size(self.runtime_caps.len());
        size += data_types_array_wire_size();
        size
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u8(TNS_MSG_TYPE_DATA_TYPES);
        buf.write_u16_le(TNS_CHARSET_UTF8);
        buf.write_u16_le(TNS_CHARSET_UTF8);
        buf.write_u8(TNS_ENCODING_MULTI_BYTE | TNS_ENCODING_CONV_LENGTH);
        buf.write_bytes_with_length(self.compile_caps);
        buf.write_bytes_with_length(self.runtime_caps);
        write_data_types_array(buf);
        Ok(())
    }
}

impl DataMessage for DataTypesMessage<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_types_message_wire_size() {
        let compile_caps = vec![0u8; TNS_CCAP_MAX];
        let runtime_caps = vec![0u8; TNS_RCAP_MAX];
        let msg = DataTypesMessage {
            compile_caps: &compile_caps,
            runtime_caps: &runtime_caps,
        };
        let mut buf = Vec::with_capacity(msg.wire_size());
        msg.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), msg.wire_size());
        assert_eq!(buf[0], TNS_MSG_TYPE_DATA_TYPES);
        // array terminated by a zero data type
        assert_eq!(&buf[buf.len() - 2..], &[0, 0]);
    }
}
