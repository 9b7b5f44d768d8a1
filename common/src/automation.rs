use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AutomationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    #[serde(rename = "on")]
    TurnOn,
    #[serde(rename = "off")]
    TurnOff,
}

impl Command {
    /// Textual code understood by the actuator.
    pub fn code(self) -> &'static str {
        match self {
            Self::TurnOn => "AC_ON",
            Self::TurnOff => "AC_OFF",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnOn => "on",
            Self::TurnOff => "off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOrigin {
    Schedule,
    Bus,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub weekday: Weekday,
    pub hour: u32,
    pub minute: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutomationState {
    device_on: bool,
    command_sent_this_window: bool,
    current_window: Option<WindowKey>,
    schedule_enabled: bool,
    pending_command: Option<(Command, CommandOrigin)>,
    last_command: Option<Command>,
    revision: u64,
}

impl AutomationState {
    pub fn new(schedule_enabled: bool) -> Self {
        Self {
            device_on: false,
            command_sent_this_window: false,
            current_window: None,
            schedule_enabled,
            pending_command: None,
            last_command: None,
            revision: 0,
        }
    }

    pub fn device_on(&self) -> bool {
        self.device_on
    }

    pub fn schedule_enabled(&self) -> bool {
        self.schedule_enabled
    }

    pub fn command_sent_this_window(&self) -> bool {
        self.command_sent_this_window
    }

    pub fn current_window(&self) -> Option<WindowKey> {
        self.current_window
    }

    pub fn pending_command(&self) -> Option<(Command, CommandOrigin)> {
        self.pending_command
    }

    pub fn last_command(&self) -> Option<Command> {
        self.last_command
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Inbound command from the bus or the HTTP endpoint; the scheduler sends it.
    pub fn request(&mut self, command: Command, origin: CommandOrigin) {
        self.record(command);
        self.pending_command = Some((command, origin));
    }

    pub fn take_pending(&mut self) -> Option<(Command, CommandOrigin)> {
        self.pending_command.take()
    }

    pub fn set_schedule_enabled(&mut self, enabled: bool) -> bool {
        let changed = self.schedule_enabled != enabled;
        self.schedule_enabled = enabled;
        if changed {
            self.revision += 1;
        }
        changed
    }

    fn record(&mut self, command: Command) {
        self.device_on = command == Command::TurnOn;
        self.last_command = Some(command);
        self.revision += 1;
    }

    fn enter_window(&mut self, key: WindowKey) {
        if self.current_window != Some(key) {
            self.current_window = Some(key);
            self.command_sent_this_window = false;
        }
    }
}

/// The single guard around state shared by the scheduler and the bus worker.
#[derive(Debug, Clone)]
pub struct SharedAutomation {
    inner: Arc<Mutex<AutomationState>>,
}

impl SharedAutomation {
    pub fn new(state: AutomationState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn read(&self) -> AutomationState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs `mutation` under the guard. It must not block.
    pub fn apply<R>(&self, mutation: impl FnOnce(&mut AutomationState) -> R) -> R {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        mutation(&mut state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Decision {
    Emit(Command),
    AlreadySent,
    ScheduleDisabled,
    Weekend,
    WarmEnough(f32),
    NoReading,
    Idle,
}

pub struct AutomationStateMachine {
    shared: SharedAutomation,
    policy: AutomationConfig,
}

impl AutomationStateMachine {
    pub fn new(shared: SharedAutomation, policy: AutomationConfig) -> Self {
        Self { shared, policy }
    }

    pub fn shared(&self) -> &SharedAutomation {
        &self.shared
    }

    pub fn evaluate_at(
        &mut self,
        now: DateTime<FixedOffset>,
        measurement: Option<f32>,
    ) -> Option<Command> {
        self.evaluate(now.weekday(), now.hour(), now.minute(), measurement)
    }

    pub fn evaluate(
        &mut self,
        weekday: Weekday,
        hour: u32,
        minute: u32,
        measurement: Option<f32>,
    ) -> Option<Command> {
        let policy = &self.policy;
        let decision = self.shared.apply(|state| {
            state.enter_window(WindowKey {
                weekday,
                hour,
                minute,
            });
            let decision = decide(policy, state, weekday, hour, minute, measurement);
            if let Decision::Emit(command) = decision {
                state.record(command);
                state.command_sent_this_window = true;
            }
            decision
        });

        match decision {
            Decision::Emit(command) => {
                info!(
                    command = command.as_str(),
                    %weekday,
                    hour,
                    minute,
                    "schedule window fired"
                );
                Some(command)
            }
            Decision::WarmEnough(value) => {
                info!(
                    measurement = value,
                    threshold = policy.threshold_low_c,
                    "skipping morning switch-on; already warm enough"
                );
                None
            }
            Decision::NoReading => {
                info!("skipping morning switch-on; no valid sensor reading");
                None
            }
            Decision::AlreadySent => {
                debug!(hour, minute, "window already handled");
                None
            }
            Decision::ScheduleDisabled | Decision::Weekend | Decision::Idle => None,
        }
    }
}

fn decide(
    policy: &AutomationConfig,
    state: &AutomationState,
    weekday: Weekday,
    hour: u32,
    minute: u32,
    measurement: Option<f32>,
) -> Decision {
    if state.command_sent_this_window {
        return Decision::AlreadySent;
    }
    if !state.schedule_enabled {
        return Decision::ScheduleDisabled;
    }
    if matches!(weekday, Weekday::Sat | Weekday::Sun) {
        return Decision::Weekend;
    }

    if (hour, minute) == (policy.on_hour, policy.on_minute) {
        return match measurement {
            Some(value) if value < policy.threshold_low_c => Decision::Emit(Command::TurnOn),
            Some(value) => Decision::WarmEnough(value),
            None => Decision::NoReading,
        };
    }
    if (hour, minute) == (policy.off_hour, policy.off_minute) {
        return Decision::Emit(Command::TurnOff);
    }
    Decision::Idle
}
