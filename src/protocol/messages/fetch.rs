//! FETCH message for additional row batches.

use crate::error::Result;
use crate::protocol::constants::*;
use crate::protocol::message::{ub4_wire_size, DataMessage, Message, WriteExt};

/// Fetch the next batch of rows from an open cursor.
pub struct FetchMessage {
    pub cursor_id: u16,
    /// Number of rows requested; sized by the adaptive row buffer.
    pub array_size: u32,
    pub ttc_field_version: u8,
}

impl FetchMessage {
    pub fn new(cursor_id: u16, array_size: u32, ttc_field_version: u8) -> Self {
        Self {
            cursor_id,
            array_size,
            ttc_field_version,
        }
    }
}

impl Message for FetchMessage {
    fn wire_size(&self) -> usize {
        let mut size = 0;
        size += 1; // message type
        size += 1; // function code
        size += 1; // sequence number
        if self.ttc_field_version >= TNS_CCAP_FIELD_VERSION_23_1_EXT_1 {
            size += 1;
        }
        size += ub4_wire_size(self.cursor_id as u32);
        size += ub4_wire_size(self.array_size);
        size
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u8(TNS_MSG_TYPE_FUNCTION);
        buf.write_u8(TNS_FUNC_FETCH);
        buf.write_u8(1); // sequence number
        if self.ttc_field_version >= TNS_CCAP_FIELD_VERSION_23_1_EXT_1 {
            buf.write_u8(0);
        }
        buf.write_ub4(self.cursor_id as u32);
        buf.write_ub4(self.array_size);
        Ok(())
    }
}

impl DataMessage for FetchMessage {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_message_wire_size() {
        let msg = FetchMessage::new(42, 256, TNS_CCAP_FIELD_VERSION_19_1);
        let mut buf = Vec::with_capacity(msg.wire_size());
        msg.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), msg.wire_size());
        assert_eq!(buf[0], TNS_MSG_TYPE_FUNCTION);
        assert_eq!(buf[1], TNS_FUNC_FETCH);
    }
}
