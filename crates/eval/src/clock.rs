//! Wall-clock access for the date built-ins.

use time::OffsetDateTime;

/// Source of the current time. Date built-ins never read the system
/// clock directly, so tests can pin time with [`FixedClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl FixedClock {
    /// Freeze at a unix timestamp (seconds). Out-of-range values fall back
    /// to the epoch.
    pub fn at_unix(seconds: i64) -> Self {
        FixedClock(OffsetDateTime::from_unix_timestamp(seconds).unwrap_or(OffsetDateTime::UNIX_EPOCH))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}
