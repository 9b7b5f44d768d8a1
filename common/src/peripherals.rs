use crate::{
    connectivity::LinkDriver,
    display::Display,
    error::{DeviceError, PublishError, SensorError, TelemetryError},
    liveness::Watchdog,
    time_sync::TimeSource,
    types::{Reading, ScheduleStatusPayload, TelemetryPayload},
};

pub trait SensorSource: Send {
    fn read_sample(&mut self) -> Result<Reading, SensorError>;
}

/// Actuator command link. One attempt per call, bounded wait for an acknowledgement.
pub trait DeviceChannel: Send {
    fn send_command(&mut self, code: &str) -> Result<(), DeviceError>;
}

/// Fire-and-forget telemetry upload; returns the sink's status code.
pub trait TelemetrySink: Send {
    fn push(&mut self, payload: &TelemetryPayload) -> Result<u16, TelemetryError>;
}

/// Non-blocking status publication on the message bus.
pub trait StatusPublisher: Send {
    fn publish_heartbeat(&mut self, status: &ScheduleStatusPayload) -> Result<(), PublishError>;
}

/// Every external collaborator the scheduler drives.
pub struct Peripherals {
    pub link: Box<dyn LinkDriver>,
    pub time_source: Box<dyn TimeSource>,
    pub sensor: Box<dyn SensorSource>,
    pub display: Box<dyn Display>,
    pub device: Box<dyn DeviceChannel>,
    pub telemetry: Box<dyn TelemetrySink>,
    pub status: Box<dyn StatusPublisher>,
    pub watchdog: Box<dyn Watchdog>,
}
