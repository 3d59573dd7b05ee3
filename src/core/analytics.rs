//! Per-domain traffic counters for the dashboard.
//!
//! The pipeline increments an in-memory buffer; a background flusher
//! snapshots and clears it every few seconds and issues one storage
//! increment per domain. Counters are lost on crash, which is acceptable
//! for dashboard metrics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::storage::{with_deadline, IntentStore};

const FLUSH_INTERVAL_SECS: u64 = 5;
const FLUSH_DEADLINE_SECS: u64 = 2;

#[derive(Debug, Clone, Copy, Default)]
struct StatsDelta {
    total: i64,
    flagged: i64,
    blocked: i64,
}

#[derive(Default)]
pub struct StatsBuffer {
    buffer: Mutex<HashMap<String, StatsDelta>>,
}

impl StatsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// O(1) under the mutex; called on every request.
    pub fn track(&self, domain_id: &str, flagged: bool, blocked: bool) {
        let mut buffer = self.buffer.lock().unwrap();
        let delta = buffer.entry(domain_id.to_string()).or_default();
        delta.total += 1;
        if flagged {
            delta.flagged += 1;
        }
        if blocked {
            delta.blocked += 1;
        }
    }

    /// Snapshots and clears the buffer, then pushes one increment per
    /// domain. Failed increments are logged and dropped.
    pub async fn flush(&self, store: &dyn IntentStore) {
        let snapshot = {
            let mut buffer = self.buffer.lock().unwrap();
            std::mem::take(&mut *buffer)
        };

        for (domain_id, delta) in snapshot {
            if delta.total == 0 {
                continue;
            }
            let increment =
                store.increment_domain_stats(&domain_id, delta.total, delta.flagged, delta.blocked);
            if let Err(e) = with_deadline(FLUSH_DEADLINE_SECS, increment).await {
                log::warn!("Stats flush failed for domain {}: {}", domain_id, e);
            }
        }
    }

    pub fn start_flusher(self: &Arc<Self>, store: Arc<dyn IntentStore>) {
        let buffer = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(FLUSH_INTERVAL_SECS));
            loop {
                interval.tick().await;
                buffer.flush(store.as_ref()).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryIntentStore;

    #[tokio::test]
    async fn flush_pushes_one_increment_per_domain_and_clears() {
        let store = MemoryIntentStore::new();
        let stats = StatsBuffer::new();

        stats.track("d1", false, false);
        stats.track("d1", true, false);
        stats.track("d1", true, true);
        stats.track("d2", false, false);

        stats.flush(&store).await;

        let mut increments = store.stat_increments.lock().unwrap().clone();
        increments.sort();
        assert_eq!(
            increments,
            vec![
                ("d1".to_string(), 3, 2, 1),
                ("d2".to_string(), 1, 0, 0),
            ]
        );

        // Second flush has nothing to push.
        drop(increments);
        stats.flush(&store).await;
        assert_eq!(store.stat_increments.lock().unwrap().len(), 2);
    }
}
