use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bitcoin::OutPoint;

/// Ban severity, recorded for observability only. Does not change expiry
/// math — both levels use the coordinator's configured `ban_duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanSeverity {
    /// Participated through ConnectionConfirmation but had an input spent
    /// out from under the round before Signing.
    DroppedAfterConfirmation = 1,
    /// Confirmed a connection slot but never posted signatures in Signing.
    DroppedDuringSigning = 2,
}

struct BanEntry {
    until: SystemTime,
    severity: BanSeverity,
}

/// Tracks banned outpoints with expiry. No persistence backend here; this
/// is the in-memory reference implementation the core ships with.
#[async_trait]
pub trait BanStore: Send + Sync {
    async fn ban(&self, outpoints: &[OutPoint], until: SystemTime, severity: BanSeverity);

    /// `Some(minutes_remaining)` if still banned. Expired entries are
    /// lazily evicted on the read that discovers them.
    async fn is_banned(&self, outpoint: OutPoint, now: SystemTime) -> Option<u64>;
}

#[derive(Default)]
pub struct MemoryBanStore {
    entries: Mutex<HashMap<OutPoint, BanEntry>>,
}

impl MemoryBanStore {
    pub fn new() -> Self {
        MemoryBanStore {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl BanStore for MemoryBanStore {
    async fn ban(&self, outpoints: &[OutPoint], until: SystemTime, severity: BanSeverity) {
        let mut entries = self.entries.lock().expect("ban store lock poisoned");
        for outpoint in outpoints {
            entries.insert(*outpoint, BanEntry { until, severity });
        }
        log::info!(
            "banned {} outpoint(s) at severity {} until {:?}",
            outpoints.len(),
            severity as u8,
            until
        );
    }

    async fn is_banned(&self, outpoint: OutPoint, now: SystemTime) -> Option<u64> {
        let mut entries = self.entries.lock().expect("ban store lock poisoned");

        let Some(entry) = entries.get(&outpoint) else {
            return None;
        };

        if entry.until <= now {
            entries.remove(&outpoint);
            return None;
        }

        let remaining = entry
            .until
            .duration_since(now)
            .unwrap_or(Duration::ZERO)
            .as_secs()
            / 60;
        Some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn outpoint(vout: u32) -> OutPoint {
        OutPoint {
            txid: bitcoin::Txid::all_zeros(),
            vout,
        }
    }

    #[tokio::test]
    async fn ban_expires_after_duration() {
        let store = MemoryBanStore::new();
        let now = SystemTime::now();
        let op = outpoint(0);

        store
            .ban(&[op], now + Duration::from_secs(30 * 24 * 60 * 60), BanSeverity::DroppedAfterConfirmation)
            .await;

        // one second before expiry: still banned
        assert!(
            store
                .is_banned(op, now + Duration::from_secs(30 * 24 * 60 * 60) - Duration::from_secs(1))
                .await
                .is_some()
        );

        // at/after expiry: unbanned
        assert!(
            store
                .is_banned(op, now + Duration::from_secs(30 * 24 * 60 * 60))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn unbanned_outpoint_reports_none() {
        let store = MemoryBanStore::new();
        assert!(store.is_banned(outpoint(1), SystemTime::now()).await.is_none());
    }
}
