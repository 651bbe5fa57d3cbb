//! Deferred cleanup of server-side resources.
//!
//! Closing a cursor or freeing a temporary LOB does not warrant its own
//! round-trip. The per-connection [`CleanupContext`] collects the pending
//! work and the dispatcher drains it into piggyback messages prepended to
//! the next outbound function call (or the final logoff).

use crate::protocol::constants::TNS_MAX_CURSORS_TO_CLOSE;
use crate::protocol::types::LobLocator;
use std::collections::BTreeSet;

/// Pending server-resource cleanup for one connection.
#[derive(Debug, Default)]
pub struct CleanupContext {
    cursors_to_close: BTreeSet<u16>,
    temp_lobs_to_close: Vec<LobLocator>,
    temp_lobs_total_size: usize,
}

impl CleanupContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cursor for deferred close. Cursor 0 is "no cursor".
    pub fn add_cursor(&mut self, cursor_id: u16) {
        if cursor_id != 0 {
            self.cursors_to_close.insert(cursor_id);
        }
    }

    /// Record a temporary LOB locator for deferred free.
    pub fn add_temp_lob(&mut self, locator: LobLocator) {
        self.temp_lobs_total_size += locator.bytes.len();
        self.temp_lobs_to_close.push(locator);
    }

    /// Whether any cleanup is pending.
    pub fn is_empty(&self) -> bool {
        self.cursors_to_close.is_empty() && self.temp_lobs_to_close.is_empty()
    }

    pub fn pending_cursors(&self) -> usize {
        self.cursors_to_close.len()
    }

    pub fn temp_lobs_total_size(&self) -> usize {
        self.temp_lobs_total_size
    }

    /// Take up to `TNS_MAX_CURSORS_TO_CLOSE` cursors for one piggyback.
    ///
    /// Surplus cursors stay queued for the following call.
    pub fn take_cursors(&mut self) -> Vec<u16> {
        let batch: Vec<u16> = self
            .cursors_to_close
            .iter()
            .take(TNS_MAX_CURSORS_TO_CLOSE)
            .copied()
            .collect();
        for id in &batch {
            self.cursors_to_close.remove(id);
        }
        batch
    }

    /// Take all pending temporary LOB locators.
    pub fn take_temp_lobs(&mut self) -> Vec<LobLocator> {
        self.temp_lobs_total_size = 0;
        std::mem::take(&mut self.temp_lobs_to_close)
    }
}
