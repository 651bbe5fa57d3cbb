//! TNS packet structure and transport I/O.

use crate::error::{Error, Result};
use crate::protocol::codec::FrameCodec;
use crate::protocol::constants::*;
use crate::protocol::message::{write_packet_header, DataMessage, Message};
use bytes::Bytes;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

/// A TNS packet: type, flags, and the payload after the 8-byte header.
#[derive(Debug, Clone)]
pub struct Packet {
    pub packet_type: u8,
    pub packet_flags: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(packet_type: u8, payload: Bytes) -> Self {
        Self {
            packet_type,
            packet_flags: 0,
            payload,
        }
    }

    /// Total packet size (header + payload).
    pub fn total_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Marker subtype for MARKER packets, when present.
    ///
    /// Markers arrive as `[1, 0, subtype]`; some servers send a bare subtype.
    pub fn marker_type(&self) -> Option<u8> {
        if self.packet_type != TNS_PACKET_TYPE_MARKER {
            return None;
        }
        match self.payload.len() {
            0 => None,
            1 | 2 => Some(self.payload[0]),
            _ => Some(self.payload[2]),
        }
    }

    /// Control subtype for CONTROL packets, when present.
    pub fn control_type(&self) -> Option<u16> {
        if self.packet_type != TNS_PACKET_TYPE_CONTROL || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }
}

/// A byte stream usable as the TNS transport.
pub trait TnsStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> TnsStream for T {}

/// Installs a TLS handler over an existing transport.
///
/// The TLS implementation itself is an external collaborator; the handshake
/// driver only needs this seam to set up TCPS and to renegotiate when the
/// server requests it during ACCEPT.
pub trait TlsUpgrader: Send + Sync {
    fn upgrade<'a>(
        &'a self,
        stream: Transport,
        server_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = io::Result<Box<dyn TnsStream>>> + Send + 'a>>;
}

/// The connection transport: plain TCP or an installed TLS stream.
pub enum Transport {
    Tcp(TcpStream),
    Secure(Box<dyn TnsStream>),
}

impl Transport {
    fn is_secure(&self) -> bool {
        matches!(self, Transport::Secure(_))
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Secure(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Secure(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_flush(cx),
            Transport::Secure(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Secure(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// TNS packet reader/writer over a transport.
pub struct PacketStream {
    transport: Transport,
    codec: FrameCodec,
    use_large_sdu: bool,
    sdu: u32,
}

impl PacketStream {
    pub fn new(stream: TcpStream) -> Self {
        Self::from_transport(Transport::Tcp(stream))
    }

    pub fn from_transport(transport: Transport) -> Self {
        Self {
            transport,
            codec: FrameCodec::new(),
            use_large_sdu: false,
            sdu: TNS_SDU_DEFAULT,
        }
    }

    /// Switch to 4-byte length headers (protocol version 315+).
    pub fn set_large_sdu(&mut self, on: bool) {
        self.use_large_sdu = on;
        self.codec.set_large_sdu(on);
    }

    pub fn set_sdu(&mut self, sdu: u32) {
        self.sdu = sdu;
    }

    pub fn sdu(&self) -> u32 {
        self.sdu
    }

    pub fn is_secure(&self) -> bool {
        self.transport.is_secure()
    }

    /// Replace the transport with a freshly upgraded TLS stream.
    ///
    /// Used both for the initial TCPS setup and for the renegotiation the
    /// server may request in its ACCEPT: the current handler is removed and a
    /// new one installed with the same server name.
    pub async fn install_tls(
        &mut self,
        upgrader: &dyn TlsUpgrader,
        server_name: &str,
    ) -> Result<()> {
        // a dead in-memory pipe stands in while the real transport is
        // handed to the TLS provider
        let (placeholder, _closed) = tokio::io::duplex(1);
        let transport = std::mem::replace(&mut self.transport, Transport::Secure(Box::new(placeholder)));
        match upgrader.upgrade(transport, server_name).await {
            Ok(stream) => {
                self.transport = Transport::Secure(stream);
                Ok(())
            }
            Err(e) => Err(Error::FailedToAddTlsHandler {
                message: e.to_string(),
            }),
        }
    }

    /// Read the next packet, pulling transport bytes as needed.
    pub async fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = self.codec.next_packet()? {
                return Ok(packet);
            }
            let mut buf = [0u8; 4096];
            let n = self.transport.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::UncleanShutdown);
            }
            self.codec.feed(&buf[..n]);
        }
    }

    /// Send a message as a specific packet type.
    pub async fn send_message<M: Message>(&mut self, packet_type: u8, msg: &M) -> Result<()> {
        let total_size = PACKET_HEADER_SIZE + msg.wire_size();
        let mut buf = Vec::with_capacity(total_size);
        write_packet_header(&mut buf, packet_type, 0, total_size, self.use_large_sdu);
        msg.write_to(&mut buf)?;
        self.transport.write_all(&buf).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Send a single DATA message.
    pub async fn send_data_message<M: DataMessage>(&mut self, msg: &M) -> Result<()> {
        let total_size = PACKET_HEADER_SIZE + msg.data_wire_size();
        let mut buf = Vec::with_capacity(total_size);
        write_packet_header(
            &mut buf,
            TNS_PACKET_TYPE_DATA,
            0,
            total_size,
            self.use_large_sdu,
        );
        buf.extend_from_slice(&msg.data_flags().to_be_bytes());
        msg.write_to(&mut buf)?;
        self.transport.write_all(&buf).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Send several messages in one DATA packet.
    ///
    /// Piggybacked cleanup calls ride in front of the primary function call
    /// this way, sharing a single round-trip.
    pub async fn send_composite(&mut self, parts: &[&dyn Message]) -> Result<()> {
        let payload: usize = parts.iter().map(|p| p.wire_size()).sum();
        let total_size = PACKET_HEADER_SIZE + 2 + payload;
        let mut buf = Vec::with_capacity(total_size);
        write_packet_header(
            &mut buf,
            TNS_PACKET_TYPE_DATA,
            0,
            total_size,
            self.use_large_sdu,
        );
        buf.extend_from_slice(&0u16.to_be_bytes());
        for part in parts {
            part.write_to(&mut buf)?;
        }
        self.transport.write_all(&buf).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Send raw bytes as a DATA packet (oversized connect data).
    pub async fn send_data(&mut self, data: &[u8], data_flags: u16) -> Result<()> {
        let total_size = PACKET_HEADER_SIZE + 2 + data.len();
        let mut buf = Vec::with_capacity(total_size);
        write_packet_header(
            &mut buf,
            TNS_PACKET_TYPE_DATA,
            0,
            total_size,
            self.use_large_sdu,
        );
        buf.extend_from_slice(&data_flags.to_be_bytes());
        buf.extend_from_slice(data);
        self.transport.write_all(&buf).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the transport.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.transport.shutdown().await?;
        Ok(())
    }
}
