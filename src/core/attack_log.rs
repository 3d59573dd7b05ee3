//! Attack log emission: best-effort persistence plus live fan-out.
//!
//! Every subscriber owns a bounded channel; producers use non-blocking
//! sends and drop events when a subscriber lags. Persistence runs on a
//! background task so the request path never waits on storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::models::AttackLog;
use crate::storage::{with_deadline, IntentStore};

const SUBSCRIBER_BUFFER: usize = 100;
const PERSIST_DEADLINE_SECS: u64 = 5;

/// Fan-out hub for live log listeners (SSE connections subscribe here).
#[derive(Default)]
pub struct LogBroker {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<AttackLog>>>,
    next_id: AtomicU64,
}

impl LogBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> (u64, mpsc::Receiver<AttackLog>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Never blocks: a full subscriber loses this event, a closed one is
    /// pruned.
    pub fn publish(&self, entry: &AttackLog) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|id, tx| match tx.try_send(entry.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("Log subscriber {} lagging; event dropped", id);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

pub struct AttackLogger {
    intent: Arc<dyn IntentStore>,
    broker: Arc<LogBroker>,
}

impl AttackLogger {
    pub fn new(intent: Arc<dyn IntentStore>, broker: Arc<LogBroker>) -> Self {
        Self { intent, broker }
    }

    pub fn broker(&self) -> &Arc<LogBroker> {
        &self.broker
    }

    /// Enqueues the event for persistence and broadcasts it. Returns as
    /// soon as the event is handed off.
    pub fn emit(&self, entry: AttackLog) {
        self.broker.publish(&entry);

        let intent = Arc::clone(&self.intent);
        tokio::spawn(async move {
            let persist = intent.append_attack_log(&entry);
            if let Err(e) = with_deadline(PERSIST_DEADLINE_SECS, persist).await {
                log::error!("Failed to persist attack log: {}", e);
            }
        });
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<AttackLog>, crate::storage::StorageError> {
        self.intent.recent_attack_logs(limit).await
    }
}
