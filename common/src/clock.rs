use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::Instant,
};

use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use chrono_tz::Tz;

pub trait MonotonicSource: Send {
    fn now_ms(&self) -> u64;
}

/// Milliseconds since the first call in this process.
pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMonotonic;

impl MonotonicSource for SystemMonotonic {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }
}

/// Hand-driven tick source, shared between a test and the code under test.
#[derive(Debug, Clone, Default)]
pub struct ManualMonotonic(Arc<AtomicU64>);

impl ManualMonotonic {
    pub fn new(start_ms: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start_ms)))
    }

    pub fn set(&self, now_ms: u64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.0.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl MonotonicSource for ManualMonotonic {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WallAnchor {
    epoch_ms: i64,
    at_monotonic_ms: u64,
}

pub struct Clock {
    monotonic: Box<dyn MonotonicSource>,
    timezone: Tz,
    anchor: Option<WallAnchor>,
}

impl Clock {
    pub fn new(monotonic: Box<dyn MonotonicSource>, timezone: Tz) -> Self {
        Self {
            monotonic,
            timezone,
            anchor: None,
        }
    }

    pub fn monotonic_now_ms(&self) -> u64 {
        self.monotonic.now_ms()
    }

    pub fn is_synced(&self) -> bool {
        self.anchor.is_some()
    }

    /// Records a fresh synchronized epoch observed at the current monotonic tick.
    pub fn set_wall(&mut self, epoch_ms: i64) {
        self.anchor = Some(WallAnchor {
            epoch_ms,
            at_monotonic_ms: self.monotonic.now_ms(),
        });
    }

    pub fn wall_epoch_ms(&self) -> Option<i64> {
        let anchor = self.anchor?;
        let elapsed = self
            .monotonic
            .now_ms()
            .wrapping_sub(anchor.at_monotonic_ms);
        let elapsed = i64::try_from(elapsed).ok()?;
        anchor.epoch_ms.checked_add(elapsed)
    }

    /// Local wall time, or `None` until the first successful sync.
    pub fn wall_now(&self) -> Option<DateTime<FixedOffset>> {
        let utc = Utc.timestamp_millis_opt(self.wall_epoch_ms()?).single()?;
        let local = utc.with_timezone(&self.timezone);
        Some(local.with_timezone(&local.offset().fix()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike, Weekday};

    use super::*;

    fn clock_at(start_ms: u64) -> (Clock, ManualMonotonic) {
        let ticks = ManualMonotonic::new(start_ms);
        let clock = Clock::new(Box::new(ticks.clone()), chrono_tz::Asia::Shanghai);
        (clock, ticks)
    }

    #[test]
    fn wall_time_unknown_until_synced() {
        let (clock, _) = clock_at(5_000);
        assert!(!clock.is_synced());
        assert!(clock.wall_now().is_none());
    }

    #[test]
    fn wall_time_advances_with_monotonic_ticks() {
        let (mut clock, ticks) = clock_at(1_000);
        // 2026-01-05T00:00:00Z is Monday 08:00 in Shanghai.
        clock.set_wall(1_767_571_200_000);

        ticks.advance(90_000);
        let now = clock.wall_now().unwrap();

        assert_eq!(now.weekday(), Weekday::Mon);
        assert_eq!((now.hour(), now.minute(), now.second()), (8, 1, 30));
    }

    #[test]
    fn resync_replaces_anchor() {
        let (mut clock, ticks) = clock_at(0);
        clock.set_wall(1_000_000);
        ticks.advance(500);
        clock.set_wall(2_000_000);
        assert_eq!(clock.wall_epoch_ms(), Some(2_000_000));
    }

    #[test]
    fn anchor_survives_monotonic_wraparound() {
        let (mut clock, ticks) = clock_at(u64::MAX - 99);
        clock.set_wall(10_000);
        ticks.set(100);
        assert_eq!(clock.wall_epoch_ms(), Some(10_200));
    }
}
