use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SensorError {
    #[error("sensor returned no data")]
    NoData,
    #[error("sensor value out of range: {0}")]
    OutOfRange(f32),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("link connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("link unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeSyncError {
    #[error("time source did not answer within {0:?}")]
    Timeout(Duration),
    #[error("time source reply rejected: {0}")]
    InvalidReply(String),
    #[error("time source unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("device did not acknowledge `{code}` within {timeout:?}")]
    NoAck { code: String, timeout: Duration },
    #[error("device rejected `{code}`: {reply}")]
    Rejected { code: String, reply: String },
    #[error("device channel unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry sink answered with status {0}")]
    Status(u16),
    #[error("telemetry transport failed: {0}")]
    Transport(String),
    #[error("telemetry payload encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("message bus not connected")]
    NotConnected,
    #[error("publish rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload of {0} bytes exceeds the inbound limit")]
    Oversized(usize),
    #[error("payload is not valid json")]
    Json(#[source] serde_json::Error),
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("no handler for topic `{0}`")]
    UnknownTopic(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
    #[error(
        "worst-case iteration of {total_ms}ms does not fit the {deadline_ms}ms liveness deadline"
    )]
    ExceedsDeadline { total_ms: u64, deadline_ms: u64 },
    #[error("job `{0}` declares a zero worst-case duration")]
    ZeroBudget(&'static str),
}
