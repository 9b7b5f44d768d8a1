use tracing::info;

use crate::{config::RuntimeConfig, error::BudgetError};

/// Process liveness deadline. Missing a feed terminates the process.
pub trait Watchdog: Send {
    fn feed(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobBudget {
    pub name: &'static str,
    pub worst_case_ms: u64,
}

impl JobBudget {
    pub const fn new(name: &'static str, worst_case_ms: u64) -> Self {
        Self {
            name,
            worst_case_ms,
        }
    }
}

/// Worst case of every job that can run inside a single loop iteration.
pub fn iteration_budgets(config: &RuntimeConfig) -> Vec<JobBudget> {
    let liveness = &config.liveness;
    let lookup = liveness.lookup_timeout_ms;
    let sync = &config.time_sync;
    let sync_worst = u64::from(sync.max_tries) * (lookup + sync.try_timeout_ms)
        + u64::from(sync.max_tries.saturating_sub(1)) * sync.retry_delay_ms;
    let device_worst = lookup + liveness.device_command_timeout_ms;

    vec![
        JobBudget::new("inbound-command", device_worst),
        // Health probe and one reconnect attempt, each a lookup plus a bounded connect.
        JobBudget::new(
            "connectivity",
            (lookup + config.connectivity.connect_timeout_ms) * 2,
        ),
        JobBudget::new("time-sync", sync_worst),
        JobBudget::new("clock-refresh", liveness.display_budget_ms),
        JobBudget::new(
            "sensor-refresh",
            liveness.sensor_read_budget_ms + liveness.display_budget_ms,
        ),
        JobBudget::new("telemetry-upload", lookup + liveness.telemetry_timeout_ms),
        JobBudget::new("heartbeat", liveness.heartbeat_budget_ms),
        JobBudget::new("automation", device_worst),
        JobBudget::new("loop-slice", config.intervals.loop_slice_ms),
    ]
}

pub fn verify_budget(budgets: &[JobBudget], deadline_ms: u64) -> Result<u64, BudgetError> {
    if let Some(job) = budgets.iter().find(|job| job.worst_case_ms == 0) {
        return Err(BudgetError::ZeroBudget(job.name));
    }

    let total_ms = budgets.iter().map(|job| job.worst_case_ms).sum::<u64>();
    if total_ms >= deadline_ms {
        return Err(BudgetError::ExceedsDeadline {
            total_ms,
            deadline_ms,
        });
    }

    info!(total_ms, deadline_ms, "liveness budget verified");
    Ok(total_ms)
}
