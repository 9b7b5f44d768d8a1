use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing::{info, warn};

use crate::{config::ConnectivityConfig, error::LinkError, gate::IntervalGate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Up,
    Reconnecting { attempt: u32 },
    Down,
}

impl ConnectivityState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Reconnecting { .. } => "RECONNECTING",
            Self::Down => "DOWN",
        }
    }

    pub fn is_up(self) -> bool {
        self == Self::Up
    }

    pub fn attempt(self) -> Option<u32> {
        match self {
            Self::Reconnecting { attempt } => Some(attempt),
            _ => None,
        }
    }
}

/// Published link-up flag, written by the scheduler and read by the bus worker.
#[derive(Debug, Clone, Default)]
pub struct LinkFlag(Arc<AtomicBool>);

impl LinkFlag {
    pub fn is_up(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, up: bool) {
        self.0.store(up, Ordering::Release);
    }
}

/// Network link driver (station Wi-Fi on the device).
pub trait LinkDriver: Send {
    fn is_up(&mut self) -> bool;
    fn connect(&mut self, timeout: Duration) -> Result<(), LinkError>;
    fn disconnect(&mut self);
}

/// Receives every connectivity transition, including intermediate ones.
pub trait ConnectivityObserver: Send {
    fn on_transition(&mut self, from: ConnectivityState, to: ConnectivityState);
}

pub struct ConnectivitySupervisor {
    gate: IntervalGate,
    state: ConnectivityState,
    max_attempts: u32,
    connect_timeout: Duration,
    resync_requested: bool,
    observer: Option<Box<dyn ConnectivityObserver>>,
}

impl ConnectivitySupervisor {
    pub fn new(config: &ConnectivityConfig) -> Self {
        Self {
            gate: IntervalGate::new(config.health_check_interval_ms),
            state: ConnectivityState::Down,
            max_attempts: config.max_attempts.max(1),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            resync_requested: false,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn ConnectivityObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    /// Returns whether a link recovery asked for an immediate time resync, and clears it.
    pub fn take_resync_request(&mut self) -> bool {
        std::mem::take(&mut self.resync_requested)
    }

    pub fn tick(&mut self, now_ms: u64, link: &mut dyn LinkDriver) -> ConnectivityState {
        if self.gate.poll(now_ms) {
            self.check(link);
        }
        self.state
    }

    /// Immediate health check regardless of the gate, used at boot.
    pub fn check_now(&mut self, now_ms: u64, link: &mut dyn LinkDriver) -> ConnectivityState {
        self.gate.fire(now_ms);
        self.check(link);
        self.state
    }

    fn check(&mut self, link: &mut dyn LinkDriver) {
        if link.is_up() {
            if !self.state.is_up() {
                self.recover();
            }
            return;
        }

        let attempt = match self.state {
            ConnectivityState::Up => {
                warn!("link health check failed; reconnecting");
                link.disconnect();
                1
            }
            ConnectivityState::Reconnecting { attempt } => attempt + 1,
            ConnectivityState::Down => {
                // Cool-off retry: one attempt per health check, state stays Down on failure.
                if self.try_connect(link, None) {
                    self.recover();
                }
                return;
            }
        };

        self.transition(ConnectivityState::Reconnecting { attempt });
        if self.try_connect(link, Some(attempt)) {
            self.recover();
        } else if attempt >= self.max_attempts {
            warn!(
                attempts = self.max_attempts,
                "link reconnect attempts exhausted; cooling off until next health check"
            );
            self.transition(ConnectivityState::Down);
        }
    }

    fn try_connect(&mut self, link: &mut dyn LinkDriver, attempt: Option<u32>) -> bool {
        match link.connect(self.connect_timeout) {
            Ok(()) => true,
            Err(err) => {
                match attempt {
                    Some(attempt) => warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        "link connect failed: {err}"
                    ),
                    None => warn!("link cool-off connect failed: {err}"),
                }
                false
            }
        }
    }

    fn recover(&mut self) {
        info!("link up");
        self.transition(ConnectivityState::Up);
        self.resync_requested = true;
    }

    fn transition(&mut self, to: ConnectivityState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        if let Some(observer) = self.observer.as_mut() {
            observer.on_transition(from, to);
        }
    }
}
