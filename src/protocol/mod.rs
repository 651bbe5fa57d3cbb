//! The TNS/TTC wire protocol implementation.

pub mod auth;
pub mod buffer;
pub mod capabilities;
pub mod cleanup;
pub mod codec;
pub mod constants;
pub mod cookie;
pub mod crypto;
pub mod exec;
pub mod handshake;
pub mod message;
pub mod messages;
pub mod packet;
pub mod response;
pub mod types;

pub use buffer::{ReadBuffer, WriteBuffer};
pub use capabilities::Capabilities;
pub use codec::{FrameCodec, ReplyAssembler, ReplyEvent};
pub use message::{DataMessage, Message, WriteExt};
pub use packet::{Packet, PacketStream, TlsUpgrader, TnsStream, Transport};
