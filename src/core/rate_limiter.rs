//! Per-client admission control for the request pipeline.
//!
//! Implements the sliding-window-counter algorithm: the previous window's
//! count is weighted by how much of it still overlaps the sliding window
//! and added to the current count. The whole structure lives in memory so
//! the hot path never touches storage.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::RateLimitConfig;

struct ClientWindow {
    curr_count: u32,
    prev_count: u32,
    window_start_ms: u64,
}

/// Sliding-window request counter keyed by client IP.
pub struct RateLimiter {
    clients: Mutex<HashMap<String, ClientWindow>>,
    limit: f64,
    window_ms: u64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            limit: f64::from(config.limit),
            window_ms: config.window_seconds * 1000,
        }
    }

    /// Returns true when the client is over budget. Admitted calls count
    /// against the current window; limited calls do not.
    pub fn is_limited(&self, ip: &str) -> bool {
        !self.allow_at(ip, now_millis())
    }

    fn allow_at(&self, ip: &str, now_ms: u64) -> bool {
        let mut clients = self.clients.lock().unwrap();
        let window_start = now_ms - now_ms % self.window_ms;

        let status = clients.entry(ip.to_string()).or_insert(ClientWindow {
            curr_count: 0,
            prev_count: 0,
            window_start_ms: window_start,
        });

        if window_start > status.window_start_ms {
            let elapsed_windows = (window_start - status.window_start_ms) / self.window_ms;
            if elapsed_windows == 1 {
                status.prev_count = status.curr_count;
            } else {
                // Client was away for more than a window; nothing carries over.
                status.prev_count = 0;
            }
            status.curr_count = 0;
            status.window_start_ms = window_start;
        }

        let elapsed_fraction = (now_ms - window_start) as f64 / self.window_ms as f64;
        let estimated =
            f64::from(status.prev_count) * (1.0 - elapsed_fraction) + f64::from(status.curr_count);

        if estimated >= self.limit {
            return false;
        }

        status.curr_count += 1;
        true
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
