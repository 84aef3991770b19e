use crate::domain::Clock;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// System clock implementation using real time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
