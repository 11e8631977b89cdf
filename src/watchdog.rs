//! ==============================================================================
//! watchdog.rs - watchdog feed hook
//! ==============================================================================
//!
//! purpose:
//!     slow network calls must not starve the device watchdog.
//!     sync.rs feeds it before every cloud call and once per processed document.
//!     the timer itself belongs to the board, this module only exposes the hook.
//!
//! ==============================================================================

use std::time::{Duration, Instant};

pub trait Watchdog {
    fn feed(&mut self);
}

/// software stand-in that remembers when it was last fed
pub struct HeartbeatWatchdog {
    feeds: u64,
    last_fed: Instant,
}

impl HeartbeatWatchdog {
    pub fn new() -> Self {
        Self {
            feeds: 0,
            last_fed: Instant::now(),
        }
    }

    pub fn feeds(&self) -> u64 {
        self.feeds
    }

    pub fn since_last_feed(&self) -> Duration {
        self.last_fed.elapsed()
    }
}

impl Default for HeartbeatWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog for HeartbeatWatchdog {
    fn feed(&mut self) {
        self.feeds += 1;
        self.last_fed = Instant::now();
        tracing::trace!(feeds = self.feeds, "watchdog fed");
    }
}
