//! TNS frame codec: incremental packet framing and logical-reply assembly.
//!
//! [`FrameCodec`] turns an arbitrary byte stream into [`Packet`]s, buffering
//! partial frames so the stream may be fed in any granularity (a whole packet,
//! a TCP segment, or one byte at a time all yield the same packet sequence).
//!
//! [`ReplyAssembler`] concatenates DATA packet payloads until the server
//! marks the end of the logical reply, hiding packet boundaries from the
//! message parsers: a value split across packets arrives reassembled.

use crate::error::{Error, Result};
use crate::protocol::constants::*;
use crate::protocol::packet::Packet;
use bytes::{Bytes, BytesMut};

fn is_known_packet_type(packet_type: u8) -> bool {
    matches!(
        packet_type,
        TNS_PACKET_TYPE_CONNECT
            | TNS_PACKET_TYPE_ACCEPT
            | TNS_PACKET_TYPE_REFUSE
            | TNS_PACKET_TYPE_REDIRECT
            | TNS_PACKET_TYPE_DATA
            | TNS_PACKET_TYPE_RESEND
            | TNS_PACKET_TYPE_MARKER
            | TNS_PACKET_TYPE_CONTROL
    )
}

/// Incremental TNS packet framer.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buf: BytesMut,
    use_large_sdu: bool,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to 4-byte length headers (protocol version 315+).
    pub fn set_large_sdu(&mut self, on: bool) {
        self.use_large_sdu = on;
    }

    /// Number of buffered bytes not yet forming a complete packet.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feed raw bytes into the framer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete packet, or `None` if more bytes are needed.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        if self.buf.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let packet_len = if self.use_large_sdu {
            u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize
        } else {
            u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize
        };
        if packet_len < PACKET_HEADER_SIZE {
            return Err(Error::decoding(format!(
                "packet length {} below header size",
                packet_len
            )));
        }
        if self.buf.len() < packet_len {
            return Ok(None);
        }

        let frame = self.buf.split_to(packet_len);
        let packet_type = frame[4];
        let packet_flags = frame[5];
        if !is_known_packet_type(packet_type) {
            return Err(Error::decoding(format!(
                "unknown packet type {}",
                packet_type
            )));
        }

        Ok(Some(Packet {
            packet_type,
            packet_flags,
            payload: Bytes::copy_from_slice(&frame[PACKET_HEADER_SIZE..]),
        }))
    }

    /// Drain all packets currently decodable from the buffered bytes.
    pub fn drain(&mut self) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();
        while let Some(packet) = self.next_packet()? {
            packets.push(packet);
        }
        Ok(packets)
    }
}

/// Outcome of pushing a DATA packet into the [`ReplyAssembler`].
#[derive(Debug)]
pub enum ReplyEvent {
    /// The logical reply is not complete yet.
    Incomplete,
    /// A complete logical reply, data flags stripped.
    Complete(Bytes),
    /// The server flagged end-of-file: it is closing the connection.
    ServerEof,
}

/// Accumulates DATA packet payloads into one logical reply.
#[derive(Debug, Default)]
pub struct ReplyAssembler {
    accum: BytesMut,
}

impl ReplyAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a partial reply has been accumulated.
    pub fn in_progress(&self) -> bool {
        !self.accum.is_empty()
    }

    /// Push one DATA packet; non-DATA packets are a caller error.
    pub fn push(&mut self, packet: &Packet) -> Result<ReplyEvent> {
        if packet.packet_type != TNS_PACKET_TYPE_DATA {
            return Err(Error::UnexpectedPacketType {
                expected: TNS_PACKET_TYPE_DATA,
                actual: packet.packet_type,
            });
        }
        if packet.payload.len() < 2 {
            return Err(Error::decoding("DATA packet too short for data flags"));
        }
        let flags = u16::from_be_bytes([packet.payload[0], packet.payload[1]]);
        if flags & TNS_DATA_FLAGS_EOF != 0 {
            return Ok(ReplyEvent::ServerEof);
        }

        self.accum.extend_from_slice(&packet.payload[2..]);

        if flags & (TNS_DATA_FLAGS_END_OF_REQUEST | TNS_DATA_FLAGS_END_OF_RESPONSE) != 0 {
            let reply = std::mem::take(&mut self.accum);
            Ok(ReplyEvent::Complete(reply.freeze()))
        } else {
            Ok(ReplyEvent::Incomplete)
        }
    }
}
