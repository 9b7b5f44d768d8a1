use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    automation::{Command, CommandOrigin, SharedAutomation},
    error::DecodeError,
    topics::{TOPIC_AC_CONTROL, TOPIC_SCHEDULE_ENABLED},
    types::ScheduleStatusPayload,
};

pub const MAX_INBOUND_PAYLOAD_BYTES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl BusStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }
}

/// Read-only view of the worker's connection status for the scheduler and HTTP side.
#[derive(Debug, Clone, Default)]
pub struct BusStatusHandle(Arc<AtomicU8>);

impl BusStatusHandle {
    pub fn get(&self) -> BusStatus {
        BusStatus::from_raw(self.0.load(Ordering::Acquire))
    }

    fn publish(&self, status: BusStatus) {
        self.0.store(status.to_raw(), Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectFailure {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("bad credentials")]
    BadCredentials,
    #[error("server unavailable")]
    ServerUnavailable,
    #[error("timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Connection lifecycle owned by the bus worker.
#[derive(Debug)]
pub struct MessagingConnection {
    status: BusStatus,
    last_attempt_ms: Option<u64>,
    reconnect_interval_ms: u64,
    failures: u64,
    published: BusStatusHandle,
}

impl MessagingConnection {
    pub fn new(reconnect_interval_ms: u64, published: BusStatusHandle) -> Self {
        published.publish(BusStatus::Disconnected);
        Self {
            status: BusStatus::Disconnected,
            last_attempt_ms: None,
            reconnect_interval_ms,
            failures: 0,
            published,
        }
    }

    pub fn status(&self) -> BusStatus {
        self.status
    }

    pub fn last_attempt_ms(&self) -> Option<u64> {
        self.last_attempt_ms
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Fixed-interval reconnect with no attempt cap; never attempts while the link is down.
    pub fn should_attempt(&self, now_ms: u64, link_up: bool) -> bool {
        if self.status != BusStatus::Disconnected || !link_up {
            return false;
        }
        match self.last_attempt_ms {
            None => true,
            Some(last) => now_ms.wrapping_sub(last) >= self.reconnect_interval_ms,
        }
    }

    pub fn begin_attempt(&mut self, now_ms: u64) {
        self.last_attempt_ms = Some(now_ms);
        debug!(failures = self.failures, "connecting to message bus");
        self.set_status(BusStatus::Connecting);
    }

    pub fn connected(&mut self) {
        if self.status != BusStatus::Connected {
            info!("message bus connected");
        }
        self.set_status(BusStatus::Connected);
    }

    pub fn failed(&mut self, failure: &ConnectFailure) {
        self.failures += 1;
        match self.status {
            BusStatus::Connected => warn!("message bus connection lost: {failure}"),
            _ => warn!(
                failures = self.failures,
                retry_in_ms = self.reconnect_interval_ms,
                "message bus connect failed: {failure}"
            ),
        }
        self.set_status(BusStatus::Disconnected);
    }

    /// Drop the session without counting a failure, e.g. when the link goes away.
    pub fn reset(&mut self) {
        if self.status != BusStatus::Disconnected {
            info!("message bus session dropped");
        }
        self.set_status(BusStatus::Disconnected);
    }

    fn set_status(&mut self, status: BusStatus) {
        self.status = status;
        self.published.publish(status);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundMessage {
    Command(Command),
    ScheduleToggle(bool),
}

#[derive(Debug, Deserialize)]
pub struct ActionBody {
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleToggleBody {
    pub enabled: bool,
}

pub fn parse_action(action: &str) -> Result<Command, DecodeError> {
    match action.trim().to_ascii_lowercase().as_str() {
        "on" => Ok(Command::TurnOn),
        "off" => Ok(Command::TurnOff),
        _ => Err(DecodeError::UnknownAction(action.to_string())),
    }
}

pub fn decode_command(payload: &[u8]) -> Result<Command, DecodeError> {
    let body: ActionBody = decode_json(payload)?;
    parse_action(&body.action)
}

pub fn decode_schedule_toggle(payload: &[u8]) -> Result<bool, DecodeError> {
    let body: ScheduleToggleBody = decode_json(payload)?;
    Ok(body.enabled)
}

pub fn decode_inbound(topic: &str, payload: &[u8]) -> Result<InboundMessage, DecodeError> {
    match topic {
        TOPIC_AC_CONTROL => decode_command(payload).map(InboundMessage::Command),
        TOPIC_SCHEDULE_ENABLED => decode_schedule_toggle(payload).map(InboundMessage::ScheduleToggle),
        other => Err(DecodeError::UnknownTopic(other.to_string())),
    }
}

fn decode_json<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T, DecodeError> {
    if payload.len() > MAX_INBOUND_PAYLOAD_BYTES {
        return Err(DecodeError::Oversized(payload.len()));
    }
    serde_json::from_slice(payload).map_err(DecodeError::Json)
}

/// Applies an inbound message through the shared guard.
/// Returns the confirmation to publish for schedule toggles.
pub fn apply_inbound(
    shared: &SharedAutomation,
    message: InboundMessage,
    origin: CommandOrigin,
) -> Option<ScheduleStatusPayload> {
    match message {
        InboundMessage::Command(command) => {
            shared.apply(|state| state.request(command, origin));
            info!(command = command.as_str(), ?origin, "device command queued");
            None
        }
        InboundMessage::ScheduleToggle(enabled) => {
            let (changed, device_on) = shared.apply(|state| {
                let changed = state.set_schedule_enabled(enabled);
                (changed, state.device_on())
            });
            info!(enabled, changed, ?origin, "automation schedule toggled");
            Some(ScheduleStatusPayload { enabled, device_on })
        }
    }
}

/// Decode-and-apply for one bus message. Decode faults drop the message only.
pub fn handle_bus_message(
    shared: &SharedAutomation,
    topic: &str,
    payload: &[u8],
) -> Option<ScheduleStatusPayload> {
    match decode_inbound(topic, payload) {
        Ok(message) => apply_inbound(shared, message, CommandOrigin::Bus),
        Err(err) => {
            warn!(topic, bytes = payload.len(), "dropping inbound message: {err}");
            None
        }
    }
}
