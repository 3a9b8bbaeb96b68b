//! Per-call counters, logged at teardown (§3, §4.10). No network exporter is
//! wired up here; that integration is an external collaborator (§1).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SessionStats {
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub packets_sent: AtomicU64,
    pub packets_received: AtomicU64,
    pub underruns: AtomicU64,
    pub dropped_old: AtomicU64,
    pub reconnect_attempts: AtomicU64,
}

/// Point-in-time snapshot suitable for logging or in-process assertions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStatsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub underruns: u64,
    pub dropped_old: u64,
    pub reconnect_attempts: u64,
}

impl SessionStats {
    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_old(&self, count: u64) {
        self.dropped_old.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            dropped_old: self.dropped_old.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_activity() {
        let stats = SessionStats::default();
        stats.record_sent(160);
        stats.record_received(320);
        stats.record_underrun();
        stats.record_dropped_old(3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_sent, 160);
        assert_eq!(snapshot.bytes_received, 320);
        assert_eq!(snapshot.packets_sent, 1);
        assert_eq!(snapshot.underruns, 1);
        assert_eq!(snapshot.dropped_old, 3);
    }
}
