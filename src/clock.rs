//! Shared-clock estimation across peers.
//!
//! Much dumber than real NTP: each probe asks a time server for its
//! current time and derives an offset, assuming the response took half the
//! round trip to arrive. The average over enough probes is good enough to
//! get every client's clock in sync with every other client, which is the
//! actual aim.

use log::warn;

/// Probes to average before the offset is trusted.
pub const REQUIRED_RESPONSES: usize = 10;

/// Estimates the offset between the local wall clock and the shared one.
///
/// The transport is external: the embedder sends time requests however it
/// likes and feeds responses in through [`ClockSync::add_probe`].
#[derive(Debug, Default)]
pub struct ClockSync {
    offsets: Vec<i64>,
    offset: Option<i64>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards all probes and starts a fresh sync.
    pub fn reset(&mut self) {
        self.offsets.clear();
        self.offset = None;
    }

    /// Records one probe round trip: the server reported `server_time`,
    /// the request left at `sent_at` and the response landed at
    /// `received_at` (both local wall-clock ms). Returns true once enough
    /// probes have accumulated for the offset to be trusted.
    pub fn add_probe(&mut self, server_time: i64, sent_at: i64, received_at: i64) -> bool {
        let delay = (received_at - sent_at) / 2;
        self.offsets.push(server_time - sent_at - delay);
        if self.offsets.len() >= REQUIRED_RESPONSES {
            let sum: i64 = self.offsets.iter().sum();
            self.offset = Some(sum / self.offsets.len() as i64);
        }
        self.synced()
    }

    pub fn synced(&self) -> bool {
        self.offset.is_some()
    }

    /// Converts a local wall-clock time to the shared clock. Until synced,
    /// the uncorrected time is returned.
    pub fn now(&self, wall_ms: i64) -> i64 {
        match self.offset {
            Some(offset) => wall_ms + offset,
            None => {
                warn!("using uncorrected timestamp; clock sync incomplete");
                wall_ms
            }
        }
    }
}
