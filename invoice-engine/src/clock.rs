//! Time sources for window and hold-period guards
//!
//! Operations never wait on timers; every time constraint is a guard
//! re-evaluated against the clock on each call. The trait keeps the current
//! time injectable so window boundaries can be driven exactly in tests.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::models::Timestamp;

/// Source of the current time as seen by guard checks
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_secs(Utc::now().timestamp().max(0) as u64)
    }
}

/// Manually driven clock for exercising time windows
#[derive(Debug, Default)]
pub struct ManualClock {
    now_secs: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now_secs: AtomicU64::new(start.as_secs()),
        }
    }

    /// Set the current time to an absolute value
    pub fn set(&self, to: Timestamp) {
        self.now_secs.store(to.as_secs(), Ordering::SeqCst);
    }

    /// Jump forward by `secs`
    pub fn advance(&self, secs: u64) {
        self.now_secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_secs(self.now_secs.load(Ordering::SeqCst))
    }
}
