//! Connection-establishment messages: CONNECT, PROTOCOL, MARKER.

use crate::error::Result;
use crate::protocol::constants::*;
use crate::protocol::message::{DataMessage, Message, WriteExt};

/// TNS CONNECT packet payload.
///
/// First packet on the wire. Not a DATA packet, so it carries no data flags.
/// When the connect descriptor exceeds `TNS_MAX_CONNECT_DATA` it travels in a
/// separate DATA packet immediately after.
pub struct ConnectMessage<'a> {
    /// Connect descriptor string, e.g. `(DESCRIPTION=...)`.
    pub connect_string: &'a [u8],
    /// SDU size to request.
    pub sdu: u32,
}

impl ConnectMessage<'_> {
    /// Whether the connect data fits inside the CONNECT packet itself.
    pub fn connect_data_in_packet(&self) -> bool {
        self.connect_string.len() <= TNS_MAX_CONNECT_DATA as usize
    }
}

impl Message for ConnectMessage<'_> {
    fn wire_size(&self) -> usize {
        let mut size = 0;
        size += 2; // version_desired
        size += 2; // version_minimum
        size += 2; // service_options
        size += 2; // sdu (16-bit)
        size += 2; // tdu (16-bit)
        size += 2; // protocol_characteristics
        size += 2; // line_turnaround
        size += 2; // value_of_1
        size += 2; // connect_data_length
        size += 2; // connect_data_offset
        size += 4; // max_receivable_data
        size += 1; // nsi_flags_1
        size += 1; // nsi_flags_2
        size += 24; // obsolete fields
        size += 4; // large_sdu
        size += 4; // large_tdu
        size += 4; // connect_flags_1
        size += 4; // connect_flags_2

        if self.connect_data_in_packet() {
            size += self.connect_string.len();
        }
        size
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        let connect_data_len = self.connect_string.len() as u16;

        buf.write_u16_be(TNS_VERSION_DESIRED);
        buf.write_u16_be(TNS_VERSION_MINIMUM);
        buf.write_u16_be(TNS_GSO_DONT_CARE);
        buf.write_u16_be(self.sdu as u16); // SDU
        buf.write_u16_be(self.sdu as u16); // TDU
        buf.write_u16_be(TNS_PROTOCOL_CHARACTERISTICS);
        buf.write_u16_be(0); // line turnaround
        buf.write_u16_be(1); // value of 1
        buf.write_u16_be(connect_data_len);
        buf.write_u16_be(74); // offset to connect data
        buf.write_u32_be(0); // max receivable data

        let nsi_flags = TNS_NSI_SUPPORT_SECURITY_RENEG | TNS_NSI_DISABLE_NA;
        buf.write_u8(nsi_flags);
        buf.write_u8(nsi_flags);

        buf.write_zeros(24);

        buf.write_u32_be(self.sdu);
        buf.write_u32_be(self.sdu);

        // In-band breaks only; no OOB at connect time.
        buf.write_u32_be(0);
        buf.write_u32_be(0);

        if self.connect_data_in_packet() {
            buf.write_bytes(self.connect_string);
        }
        Ok(())
    }
}

/// Protocol negotiation message (`TNS_MSG_TYPE_PROTOCOL`).
pub struct ProtocolMessage<'a> {
    pub driver_name: &'a [u8],
}

impl Default for ProtocolMessage<'_> {
    fn default() -> Self {
        Self {
            driver_name: b"oracle-wire-rs",
        }
    }
}

impl Message for ProtocolMessage<'_> {
    fn wire_size(&self) -> usize {
        1 + 1 + 1 + self.driver_name.len() + 1
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u8(TNS_MSG_TYPE_PROTOCOL);
        buf.write_u8(6); // protocol version
        buf.write_u8(0); // array terminator
        buf.write_bytes(self.driver_name);
        buf.write_u8(0); // null terminator
        Ok(())
    }
}

impl DataMessage for ProtocolMessage<'_> {}

/// Marker message: BREAK, RESET, or INTERRUPT.
pub struct MarkerMessage {
    pub marker_type: u8,
}

impl MarkerMessage {
    pub fn break_() -> Self {
        Self {
            marker_type: TNS_MARKER_TYPE_BREAK,
        }
    }

    pub fn reset() -> Self {
        Self {
            marker_type: TNS_MARKER_TYPE_RESET,
        }
    }

    pub fn interrupt() -> Self {
        Self {
            marker_type: TNS_MARKER_TYPE_INTERRUPT,
        }
    }
}

impl Message for MarkerMessage {
    fn wire_size(&self) -> usize {
        3
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u8(1);
        buf.write_u8(0);
        buf.write_u8(self.marker_type);
        Ok(())
    }
}
