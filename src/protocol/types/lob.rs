//! Opaque LOB locators.
//!
//! LOB I/O itself is a separate sub-protocol outside this crate; locators
//! appear here only so temporary LOBs created for oversize PL/SQL binds can
//! be tracked and freed through the cleanup context.

use bytes::Bytes;

/// An opaque server-side LOB handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobLocator {
    /// Raw locator bytes as sent by the server.
    pub bytes: Bytes,
    /// Size of the LOB body in bytes, when known.
    pub size: u64,
}

impl LobLocator {
    pub fn new(bytes: Bytes, size: u64) -> Self {
        Self { bytes, size }
    }
}
