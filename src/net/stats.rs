//! Per-session relay counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::PacketDirection;

/// Frames and bytes relayed in each direction, reported when the session
/// closes.
#[derive(Debug, Default)]
pub struct PairStats {
    clientbound_frames: AtomicU64,
    clientbound_bytes: AtomicU64,
    serverbound_frames: AtomicU64,
    serverbound_bytes: AtomicU64,
}

impl PairStats {
    /// Record one forwarded frame.
    pub fn record(&self, direction: PacketDirection, bytes: usize) {
        let (frames, total) = match direction {
            PacketDirection::Clientbound => (&self.clientbound_frames, &self.clientbound_bytes),
            PacketDirection::Serverbound => (&self.serverbound_frames, &self.serverbound_bytes),
        };
        frames.fetch_add(1, Ordering::Relaxed);
        total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Snapshot as (frames, bytes) for one direction.
    pub fn snapshot(&self, direction: PacketDirection) -> (u64, u64) {
        match direction {
            PacketDirection::Clientbound => (
                self.clientbound_frames.load(Ordering::Relaxed),
                self.clientbound_bytes.load(Ordering::Relaxed),
            ),
            PacketDirection::Serverbound => (
                self.serverbound_frames.load(Ordering::Relaxed),
                self.serverbound_bytes.load(Ordering::Relaxed),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_split_by_direction() {
        let stats = PairStats::default();
        stats.record(PacketDirection::Clientbound, 100);
        stats.record(PacketDirection::Clientbound, 50);
        stats.record(PacketDirection::Serverbound, 7);

        assert_eq!(stats.snapshot(PacketDirection::Clientbound), (2, 150));
        assert_eq!(stats.snapshot(PacketDirection::Serverbound), (1, 7));
    }
}
