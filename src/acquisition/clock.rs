//! Wall-clock source for buffer timestamps.

use chrono::Local;

use crate::buffer::Timestamp;

pub trait Clock: Send + Sync {
    /// Current local time as `YYMMDDHHmmSS`.
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let text = Local::now().format("%y%m%d%H%M%S").to_string();
        Timestamp::parse(&text).unwrap_or(Timestamp::ZERO)
    }
}

/// Always returns the same instant. Useful for replayable fills.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub Timestamp);

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_yields_twelve_digits() {
        let ts = SystemClock.now();
        assert_ne!(ts, Timestamp::ZERO);
        assert!(ts.as_bytes().iter().all(u8::is_ascii_digit));
    }
}
