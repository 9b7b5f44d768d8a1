use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::{
    automation::SharedAutomation,
    connectivity::{ConnectivityObserver, ConnectivityState, LinkFlag},
    messaging::{BusStatus, BusStatusHandle},
    time_sync::SyncOutcome,
    types::{Reading, StatusSnapshot},
};

#[derive(Debug)]
struct BoardState {
    connectivity: ConnectivityState,
    last_sync: Option<SyncOutcome>,
    time_synced: bool,
    reading: Option<Reading>,
    iterations: u64,
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            connectivity: ConnectivityState::Down,
            last_sync: None,
            time_synced: false,
            reading: None,
            iterations: 0,
        }
    }
}

/// Status observable shared between the scheduler and the HTTP surface.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    inner: Arc<Mutex<BoardState>>,
    link: LinkFlag,
    automation: SharedAutomation,
    bus: BusStatusHandle,
}

impl StatusBoard {
    pub fn new(automation: SharedAutomation, bus: BusStatusHandle) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BoardState::default())),
            link: LinkFlag::default(),
            automation,
            bus,
        }
    }

    pub fn link_flag(&self) -> LinkFlag {
        self.link.clone()
    }

    pub fn bus_status(&self) -> BusStatus {
        self.bus.get()
    }

    pub fn last_sync_ok(&self) -> Option<bool> {
        self.state().last_sync.map(SyncOutcome::is_success)
    }

    pub fn record_sync(&self, outcome: SyncOutcome, time_synced: bool) {
        let mut state = self.state();
        state.last_sync = Some(outcome);
        state.time_synced = time_synced;
    }

    pub fn record_reading(&self, reading: Option<Reading>) {
        self.state().reading = reading;
    }

    pub fn record_iteration(&self) {
        self.state().iterations += 1;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let automation = self.automation.read();
        let state = self.state();
        let last_sync_epoch_ms = match state.last_sync {
            Some(SyncOutcome::Synced { epoch_ms, .. }) => Some(epoch_ms),
            _ => None,
        };

        StatusSnapshot {
            connectivity: state.connectivity.as_str(),
            reconnect_attempt: state.connectivity.attempt(),
            bus_status: self.bus.get().as_str(),
            time_synced: state.time_synced,
            last_sync_ok: state.last_sync.map(SyncOutcome::is_success),
            last_sync_epoch_ms,
            temperature: state.reading.map(|reading| reading.temperature_c),
            humidity: state.reading.map(|reading| reading.humidity),
            sensor_valid: state.reading.is_some(),
            device_on: automation.device_on(),
            schedule_enabled: automation.schedule_enabled(),
            last_command: automation.last_command().map(|command| command.code()),
            iterations: state.iterations,
        }
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectivityObserver for StatusBoard {
    fn on_transition(&mut self, from: ConnectivityState, to: ConnectivityState) {
        self.state().connectivity = to;
        self.link.set(to.is_up());
        match to {
            ConnectivityState::Up => info!(from = from.as_str(), "connectivity restored"),
            ConnectivityState::Reconnecting { attempt } => {
                warn!(from = from.as_str(), attempt, "connectivity degraded")
            }
            ConnectivityState::Down => warn!(from = from.as_str(), "connectivity down"),
        }
    }
}
