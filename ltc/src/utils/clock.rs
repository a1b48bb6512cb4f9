//! Wall-clock sources.
//!
//! The real-time context stamps sync points and run/stop edges through a
//! [`Clock`], so that offline hosts and tests can drive time explicitly.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use crate::structs::event::WallClock;

pub trait Clock: Send + Sync {
    fn now(&self) -> WallClock;
}

/// Reads the system real-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> WallClock {
        let now = Utc::now();
        WallClock::new(now.timestamp(), now.timestamp_subsec_nanos())
    }
}

/// Clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: WallClock) -> Self {
        let clock = Self::default();
        clock.set(start);
        clock
    }

    pub fn set(&self, time: WallClock) {
        self.nanos.store(time.as_nanos() as i64, Ordering::Release);
    }

    pub fn advance(&self, by: WallClock) {
        self.nanos.fetch_add(by.as_nanos() as i64, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> WallClock {
        WallClock::from_nanos(self.nanos.load(Ordering::Acquire) as i128)
    }
}

#[test]
fn manual_clock_is_shared_between_clones() {
    let clock = ManualClock::new(WallClock::new(100, 0));
    let other = clock.clone();
    other.advance(WallClock::new(0, 250_000_000));
    assert_eq!(clock.now(), WallClock::new(100, 250_000_000));
}
