//! Piggyback messages and the simple single-function calls.
//!
//! Piggybacks are auxiliary requests prepended to a primary function call so
//! cursor closes and temp-LOB frees ride an already-paid round-trip. The
//! simple calls (ping, commit, rollback, logoff) are plain function messages
//! with no body.

use crate::error::Result;
use crate::protocol::constants::*;
use crate::protocol::message::{ub4_wire_size, DataMessage, Message, WriteExt};
use crate::protocol::types::LobLocator;

fn function_header_wire_size(ttc_field_version: u8) -> usize {
    if ttc_field_version >= TNS_CCAP_FIELD_VERSION_23_1_EXT_1 {
        4
    } else {
        3
    }
}

fn write_function_header(buf: &mut Vec<u8>, msg_type: u8, function: u8, ttc_field_version: u8) {
    buf.write_u8(msg_type);
    buf.write_u8(function);
    buf.write_u8(1); // sequence number
    if ttc_field_version >= TNS_CCAP_FIELD_VERSION_23_1_EXT_1 {
        buf.write_u8(0); // extended sequence number
    }
}

/// A function call with no body: PING, COMMIT, ROLLBACK, LOGOFF.
pub struct SimpleFunctionMessage {
    pub function: u8,
    pub ttc_field_version: u8,
}

impl SimpleFunctionMessage {
    pub fn ping(ttc_field_version: u8) -> Self {
        Self {
            function: TNS_FUNC_PING,
            ttc_field_version,
        }
    }

    pub fn commit(ttc_field_version: u8) -> Self {
        Self {
            function: TNS_FUNC_COMMIT,
            ttc_field_version,
        }
    }

    pub fn rollback(ttc_field_version: u8) -> Self {
        Self {
            function: TNS_FUNC_ROLLBACK,
            ttc_field_version,
        }
    }

    pub fn logoff(ttc_field_version: u8) -> Self {
        Self {
            function: TNS_FUNC_LOGOFF,
            ttc_field_version,
        }
    }
}

impl Message for SimpleFunctionMessage {
    fn wire_size(&self) -> usize {
        function_header_wire_size(self.ttc_field_version)
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        write_function_header(buf, TNS_MSG_TYPE_FUNCTION, self.function, self.ttc_field_version);
        Ok(())
    }
}

impl DataMessage for SimpleFunctionMessage {}

/// Close a batch of cursors as a piggyback.
pub struct CloseCursorsPiggyback<'a> {
    pub cursor_ids: &'a [u16],
    pub ttc_field_version: u8,
}

impl Message for CloseCursorsPiggyback<'_> {
    fn wire_size(&self) -> usize {
        let mut size = function_header_wire_size(self.ttc_field_version);
        size += 1; // array pointer
        size += ub4_wire_size(self.cursor_ids.len() as u32);
        for id in self.cursor_ids {
            size += ub4_wire_size(*id as u32);
        }
        size
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        write_function_header(
            buf,
            TNS_MSG_TYPE_PIGGYBACK,
            TNS_FUNC_CLOSE_CURSORS,
            self.ttc_field_version,
        );
        buf.write_u8(1); // array pointer
        buf.write_ub4(self.cursor_ids.len() as u32);
        for id in self.cursor_ids {
            buf.write_ub4(*id as u32);
        }
        Ok(())
    }
}

impl DataMessage for CloseCursorsPiggyback<'_> {}

/// Free a batch of temporary LOBs as a piggyback.
pub struct FreeTempLobsPiggyback<'a> {
    pub locators: &'a [LobLocator],
    pub ttc_field_version: u8,
}

impl FreeTempLobsPiggyback<'_> {
    fn total_locator_bytes(&self) -> usize {
        self.locators.iter().map(|l| l.bytes.len()).sum()
    }
}

impl Message for FreeTempLobsPiggyback<'_> {
    fn wire_size(&self) -> usize {
        let mut size = function_header_wire_size(self.ttc_field_version);
        size += 1; // locator array pointer
        size += ub4_wire_size(self.total_locator_bytes() as u32);
        size += 1; // null source locator pointer
        size += ub4_wire_size(0); // source offset
        size += ub4_wire_size(0); // destination offset
        size += ub4_wire_size(TNS_LOB_OP_FREE_TEMP | TNS_LOB_OP_ARRAY);
        size += 1; // amount pointer
        size += ub4_wire_size(0); // amount
        size += self.total_locator_bytes();
        size
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        write_function_header(
            buf,
            TNS_MSG_TYPE_PIGGYBACK,
            TNS_FUNC_LOB_OP,
            self.ttc_field_version,
        );
        buf.write_u8(1); // locator array pointer
        buf.write_ub4(self.total_locator_bytes() as u32);
        buf.write_u8(0); // null source locator pointer
        buf.write_ub4(0); // source offset
        buf.write_ub4(0); // destination offset
        buf.write_ub4(TNS_LOB_OP_FREE_TEMP | TNS_LOB_OP_ARRAY);
        buf.write_u8(0); // amount pointer
        buf.write_ub4(0); // amount
        for locator in self.locators {
            buf.write_bytes(&locator.bytes);
        }
        Ok(())
    }
}

impl DataMessage for FreeTempLobsPiggyback<'_> {}

/// DRCP session release piggyback, attached before logoff on pooled servers.
pub struct SessionReleasePiggyback {
    pub ttc_field_version: u8,
}

impl Message for SessionReleasePiggyback {
    fn wire_size(&self) -> usize {
        let mut size = function_header_wire_size(self.ttc_field_version);
        size += 1; // null tag pointer
        size += ub4_wire_size(0); // tag length
        size += ub4_wire_size(0); // release mode
        size
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        write_function_header(
            buf,
            TNS_MSG_TYPE_PIGGYBACK,
            TNS_FUNC_SESSION_RELEASE,
            self.ttc_field_version,
        );
        buf.write_u8(0); // null tag pointer
        buf.write_ub4(0); // tag length
        buf.write_ub4(0); // release mode
        Ok(())
    }
}

impl DataMessage for SessionReleasePiggyback {}

/// Create a temporary LOB of session duration (`TNS_LOB_OP_CREATE_TEMP`).
///
/// Sent as a full function call ahead of an EXECUTE whose PL/SQL binds were
/// upgraded to LOBs; the reply carries the new locator.
pub struct CreateTempLobMessage {
    pub csfrm: u8,
    pub ttc_field_version: u8,
}

impl Message for CreateTempLobMessage {
    fn wire_size(&self) -> usize {
        let mut size = function_header_wire_size(self.ttc_field_version);
        size += 1; // locator pointer (server fills it in)
        size += ub4_wire_size(40); // locator length
        size += 1; // null source locator pointer
        size += ub4_wire_size(0); // source offset
        size += ub4_wire_size(0); // destination offset
        size += ub4_wire_size(TNS_LOB_OP_CREATE_TEMP);
        size += 1; // charset form
        size += ub4_wire_size(TNS_DURATION_SESSION);
        size
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        write_function_header(
            buf,
            TNS_MSG_TYPE_FUNCTION,
            TNS_FUNC_LOB_OP,
            self.ttc_field_version,
        );
        buf.write_u8(1); // locator pointer
        buf.write_ub4(40); // locator length
        buf.write_u8(0); // null source locator pointer
        buf.write_ub4(0); // source offset
        buf.write_ub4(0); // destination offset
        buf.write_ub4(TNS_LOB_OP_CREATE_TEMP);
        buf.write_u8(self.csfrm);
        buf.write_ub4(TNS_DURATION_SESSION);
        Ok(())
    }
}

impl DataMessage for CreateTempLobMessage {}
