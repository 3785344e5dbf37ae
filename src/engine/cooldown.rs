//! Per-team bid cooldown.
//!
//! Process-local and intentionally non-durable: the worst case after a
//! restart is one extra bid accepted slightly early. The clock is
//! injectable so the rejection boundary can be tested deterministically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::types::AuctionError;

/// Source of wall-clock time in unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// The real clock.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Fixed, manually advanced clock for tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<i64>>,
}

impl ManualClock {
    pub fn at(now: i64) -> Self {
        Self { now: Arc::new(Mutex::new(now)) }
    }

    pub fn advance(&self, ms: i64) {
        *self.now.lock().unwrap() += ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        *self.now.lock().unwrap()
    }
}

/// Rate limiter keyed by team id.
///
/// Only *accepted* bids stamp the gate; rejections leave it untouched so
/// a failed attempt never extends the wait.
pub struct CooldownGate {
    cooldown_ms: i64,
    last_accepted: Mutex<HashMap<String, i64>>,
    clock: Arc<dyn Clock>,
}

impl CooldownGate {
    pub fn new(cooldown_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            cooldown_ms,
            last_accepted: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Check whether a team may bid right now.
    pub fn check(&self, team_id: &str) -> Result<(), AuctionError> {
        let now = self.clock.now_ms();
        let last = self
            .last_accepted
            .lock()
            .unwrap()
            .get(team_id)
            .copied()
            .unwrap_or(i64::MIN / 2);
        let elapsed = now - last;
        if elapsed < self.cooldown_ms {
            return Err(AuctionError::Cooldown {
                remaining_ms: self.cooldown_ms - elapsed,
            });
        }
        Ok(())
    }

    /// Record an accepted bid at `timestamp`.
    pub fn stamp(&self, team_id: &str, timestamp: i64) {
        self.last_accepted
            .lock()
            .unwrap()
            .insert(team_id.to_string(), timestamp);
    }

    /// Forget a team entirely (team removal).
    pub fn forget(&self, team_id: &str) {
        self.last_accepted.lock().unwrap().remove(team_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
