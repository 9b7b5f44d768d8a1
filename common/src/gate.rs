/// Due/fire primitive for one periodic job, in monotonic milliseconds.
///
/// Firing resets the baseline to the firing instant, so a gate polled late
/// fires once and then waits a full period again instead of catching up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalGate {
    period_ms: u32,
    last_fire_ms: u64,
}

impl IntervalGate {
    pub fn new(period_ms: u32) -> Self {
        Self {
            period_ms,
            last_fire_ms: 0,
        }
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    pub fn last_fire_ms(&self) -> u64 {
        self.last_fire_ms
    }

    pub fn due_now(&self, now_ms: u64) -> bool {
        now_ms.wrapping_sub(self.last_fire_ms) >= u64::from(self.period_ms)
    }

    pub fn fire(&mut self, now_ms: u64) {
        self.last_fire_ms = now_ms;
    }

    pub fn poll(&mut self, now_ms: u64) -> bool {
        if self.due_now(now_ms) {
            self.fire(now_ms);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_exactly_at_period() {
        let gate = IntervalGate::new(1_000);
        assert!(!gate.due_now(999));
        assert!(gate.due_now(1_000));
        assert!(gate.due_now(1_001));
    }

    #[test]
    fn due_matches_elapsed_for_assorted_periods() {
        for period in [1_u32, 250, 5_000, 86_400_000] {
            let mut gate = IntervalGate::new(period);
            gate.fire(10_000);
            for delta in [0_u64, 1, u64::from(period) - 1, u64::from(period), 3 * u64::from(period)] {
                assert_eq!(
                    gate.due_now(10_000 + delta),
                    delta >= u64::from(period),
                    "period {period} delta {delta}"
                );
            }
        }
    }

    #[test]
    fn late_poll_fires_once_and_rebases() {
        let mut gate = IntervalGate::new(1_000);

        // Stalled for ten periods.
        assert!(gate.poll(10_500));
        assert_eq!(gate.last_fire_ms(), 10_500);
        assert!(!gate.poll(10_600));
        assert!(!gate.poll(11_499));
        assert!(gate.poll(11_500));
    }

    #[test]
    fn due_now_has_no_side_effects() {
        let gate = IntervalGate::new(100);
        assert!(gate.due_now(200));
        assert!(gate.due_now(200));
        assert_eq!(gate.last_fire_ms(), 0);
    }

    #[test]
    fn handles_monotonic_wraparound() {
        let mut gate = IntervalGate::new(1_000);
        gate.fire(u64::MAX - 400);
        assert!(!gate.due_now(u64::MAX));
        assert!(gate.due_now(599));
    }
}
