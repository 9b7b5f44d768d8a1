use std::{thread, time::Duration};

use tracing::{info, warn};

use crate::{
    clock::Clock, config::TimeSyncConfig, error::TimeSyncError, gate::IntervalGate,
    liveness::Watchdog,
};

/// Replies older than 2020-01-01 are treated as an unset remote clock.
const MIN_PLAUSIBLE_EPOCH_MS: i64 = 1_577_836_800_000;

pub trait TimeSource: Send {
    fn fetch_epoch_ms(&mut self, timeout: Duration) -> Result<i64, TimeSyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced { epoch_ms: i64, tries: u32 },
    Failed { tries: u32 },
}

impl SyncOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Synced { .. })
    }
}

pub struct TimeSyncManager {
    gate: IntervalGate,
    retry_gate: IntervalGate,
    max_tries: u32,
    try_timeout: Duration,
    retry_delay: Duration,
    last_outcome: Option<SyncOutcome>,
}

impl TimeSyncManager {
    pub fn new(config: &TimeSyncConfig) -> Self {
        Self {
            gate: IntervalGate::new(config.interval_ms),
            retry_gate: IntervalGate::new(config.retry_after_failure_ms),
            max_tries: config.max_tries.max(1),
            try_timeout: Duration::from_millis(config.try_timeout_ms),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            last_outcome: None,
        }
    }

    pub fn last_outcome(&self) -> Option<SyncOutcome> {
        self.last_outcome
    }

    /// Periodic resync. Stays due while the link is down so it runs once the link returns.
    /// Until a sync succeeds (or after one fails) the shorter retry period applies.
    pub fn tick(
        &mut self,
        now_ms: u64,
        link_up: bool,
        source: &mut dyn TimeSource,
        clock: &mut Clock,
        watchdog: &mut dyn Watchdog,
    ) -> Option<SyncOutcome> {
        let gate = if self.retrying(clock) {
            &self.retry_gate
        } else {
            &self.gate
        };
        if !link_up || !gate.due_now(now_ms) {
            return None;
        }
        self.restart(now_ms);
        Some(self.sync(source, clock, watchdog))
    }

    /// Out-of-band resync, e.g. after the link recovers. Restarts the periodic interval.
    pub fn force_sync(
        &mut self,
        now_ms: u64,
        source: &mut dyn TimeSource,
        clock: &mut Clock,
        watchdog: &mut dyn Watchdog,
    ) -> SyncOutcome {
        self.restart(now_ms);
        self.sync(source, clock, watchdog)
    }

    fn retrying(&self, clock: &Clock) -> bool {
        !clock.is_synced() || matches!(self.last_outcome, Some(SyncOutcome::Failed { .. }))
    }

    fn restart(&mut self, now_ms: u64) {
        self.gate.fire(now_ms);
        self.retry_gate.fire(now_ms);
    }

    fn sync(
        &mut self,
        source: &mut dyn TimeSource,
        clock: &mut Clock,
        watchdog: &mut dyn Watchdog,
    ) -> SyncOutcome {
        let mut outcome = SyncOutcome::Failed {
            tries: self.max_tries,
        };

        for attempt in 1..=self.max_tries {
            watchdog.feed();
            match source
                .fetch_epoch_ms(self.try_timeout)
                .and_then(check_plausible)
            {
                Ok(epoch_ms) => {
                    clock.set_wall(epoch_ms);
                    info!(attempt, epoch_ms, "wall clock synchronized");
                    outcome = SyncOutcome::Synced {
                        epoch_ms,
                        tries: attempt,
                    };
                    break;
                }
                Err(err) => {
                    warn!(attempt, max_tries = self.max_tries, "time sync failed: {err}");
                    if attempt < self.max_tries && !self.retry_delay.is_zero() {
                        thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        if !outcome.is_success() {
            warn!(
                tries = self.max_tries,
                synced = clock.is_synced(),
                "giving up on time sync; keeping previous wall clock"
            );
        }
        self.last_outcome = Some(outcome);
        outcome
    }
}

fn check_plausible(epoch_ms: i64) -> Result<i64, TimeSyncError> {
    if epoch_ms < MIN_PLAUSIBLE_EPOCH_MS {
        return Err(TimeSyncError::InvalidReply(format!(
            "epoch {epoch_ms}ms predates 2020"
        )));
    }
    Ok(epoch_ms)
}
