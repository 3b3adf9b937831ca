use copytrade_core::Timestamp;
use copytrade_ports::Clock;
use chrono::Utc;

/// Wall-clock time, used by the runner and every live deployment
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}
