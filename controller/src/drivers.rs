use std::{
    io::{BufRead, BufReader, ErrorKind, Write},
    net::{TcpStream, UdpSocket},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use rumqttc::{AsyncClient, QoS};
use tracing::{debug, error, info};

use officeclock_common::{
    clock::monotonic_ms,
    display::Display,
    error::{DeviceError, LinkError, PublishError, SensorError, TelemetryError, TimeSyncError},
    liveness::Watchdog,
    peripherals::{DeviceChannel, SensorSource, StatusPublisher, TelemetrySink},
    time_sync::TimeSource,
    types::{Content, Reading, Region, ScheduleStatusPayload, TelemetryPayload},
    BusStatus, BusStatusHandle, LinkDriver, TOPIC_SCHEDULE_STATUS,
};

use crate::resolver::{lookup_within, Resolver};

const NTP_PACKET_LEN: usize = 48;
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;
const WATCHDOG_CHECK_PERIOD: Duration = Duration::from_millis(500);
const WATCHDOG_EXIT_CODE: i32 = 70;

/// Treats the network as up while a TCP handshake with a known host succeeds.
pub struct TcpProbeLink {
    target: Resolver,
    probe_timeout: Duration,
}

impl TcpProbeLink {
    pub fn new(addr: impl Into<String>, probe_timeout: Duration, lookup_timeout: Duration) -> Self {
        Self {
            target: Resolver::new(addr, lookup_timeout),
            probe_timeout,
        }
    }

    fn probe(&mut self, timeout: Duration) -> Result<(), LinkError> {
        let target = self.target.resolve().map_err(LinkError::Unavailable)?;
        match TcpStream::connect_timeout(&target, timeout) {
            Ok(_) => Ok(()),
            Err(err) => {
                self.target.invalidate();
                if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) {
                    Err(LinkError::Timeout(timeout))
                } else {
                    Err(LinkError::Unavailable(err.to_string()))
                }
            }
        }
    }
}

impl LinkDriver for TcpProbeLink {
    fn is_up(&mut self) -> bool {
        self.probe(self.probe_timeout).is_ok()
    }

    fn connect(&mut self, timeout: Duration) -> Result<(), LinkError> {
        self.probe(timeout)
    }

    fn disconnect(&mut self) {
        debug!(addr = self.target.addr(), "link probe reset");
    }
}

pub struct SntpTimeSource {
    server: Resolver,
}

impl SntpTimeSource {
    pub fn new(server: impl Into<String>, lookup_timeout: Duration) -> Self {
        Self {
            server: Resolver::new(server, lookup_timeout),
        }
    }

    fn exchange(&mut self, timeout: Duration) -> Result<i64, TimeSyncError> {
        let unreachable = |err: std::io::Error| TimeSyncError::Unreachable(err.to_string());
        let timed_out = |err: std::io::Error| match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TimeSyncError::Timeout(timeout),
            _ => TimeSyncError::Unreachable(err.to_string()),
        };

        let server = self.server.resolve().map_err(TimeSyncError::Unreachable)?;
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(unreachable)?;
        socket.set_read_timeout(Some(timeout)).map_err(unreachable)?;
        socket.set_write_timeout(Some(timeout)).map_err(unreachable)?;

        let mut request = [0_u8; NTP_PACKET_LEN];
        // LI = 0, version 3, mode 3 (client).
        request[0] = 0x1B;
        socket.send_to(&request, server).map_err(timed_out)?;

        let mut reply = [0_u8; NTP_PACKET_LEN];
        let (len, _) = socket.recv_from(&mut reply).map_err(timed_out)?;
        parse_sntp_reply(&reply[..len])
    }
}

impl TimeSource for SntpTimeSource {
    fn fetch_epoch_ms(&mut self, timeout: Duration) -> Result<i64, TimeSyncError> {
        let result = self.exchange(timeout);
        if matches!(result, Err(TimeSyncError::Timeout(_))) {
            self.server.invalidate();
        }
        result
    }
}

pub fn parse_sntp_reply(reply: &[u8]) -> Result<i64, TimeSyncError> {
    if reply.len() < NTP_PACKET_LEN {
        return Err(TimeSyncError::InvalidReply(format!(
            "short reply of {} bytes",
            reply.len()
        )));
    }
    if reply[0] & 0x07 != 4 {
        return Err(TimeSyncError::InvalidReply("not a server reply".to_string()));
    }
    if reply[1] == 0 {
        return Err(TimeSyncError::InvalidReply("kiss-o'-death".to_string()));
    }

    let secs = u64::from(u32::from_be_bytes([reply[40], reply[41], reply[42], reply[43]]));
    let fraction = u64::from(u32::from_be_bytes([reply[44], reply[45], reply[46], reply[47]]));
    let unix_secs = secs
        .checked_sub(NTP_UNIX_OFFSET_SECS)
        .ok_or_else(|| TimeSyncError::InvalidReply("transmit time before 1970".to_string()))?;
    let millis = unix_secs * 1_000 + ((fraction * 1_000) >> 32);
    i64::try_from(millis).map_err(|_| TimeSyncError::InvalidReply("timestamp overflow".to_string()))
}

/// Slowly drifting office climate, for hosts without a DHT sensor attached.
pub struct SimulatedSensor {
    base_c: f32,
    swing_c: f32,
}

impl SimulatedSensor {
    pub fn new(base_c: f32, swing_c: f32) -> Self {
        Self { base_c, swing_c }
    }
}

impl SensorSource for SimulatedSensor {
    fn read_sample(&mut self) -> Result<Reading, SensorError> {
        let phase = (monotonic_ms() % 3_600_000) as f32 / 3_600_000.0 * std::f32::consts::TAU;
        let reading = Reading {
            temperature_c: self.base_c + self.swing_c * phase.sin(),
            humidity: 45.0 + 10.0 * phase.cos(),
        };
        if !(-40.0..=80.0).contains(&reading.temperature_c) {
            return Err(SensorError::OutOfRange(reading.temperature_c));
        }
        if !(0.0..=100.0).contains(&reading.humidity) {
            return Err(SensorError::OutOfRange(reading.humidity));
        }
        Ok(reading)
    }
}

pub struct ConsoleDisplay;

impl Display for ConsoleDisplay {
    fn render(&mut self, region: Region, content: &Content) {
        let color = format!("{:#06x}", content.color.rgb565());
        match region {
            Region::Time => debug!(region = region.as_str(), %color, "{}", content.text),
            _ => info!(region = region.as_str(), %color, "{}", content.text),
        }
    }
}

/// Line protocol to the actuator bridge: `AC_ON\n`, answered by `OK\n`.
pub struct TcpDeviceChannel {
    target: Resolver,
    timeout: Duration,
}

impl TcpDeviceChannel {
    /// `total` bounds the exchange after the lookup; connect, write and read each get a third.
    pub fn new(addr: impl Into<String>, total: Duration, lookup_timeout: Duration) -> Self {
        Self {
            target: Resolver::new(addr, lookup_timeout),
            timeout: total / 3,
        }
    }

    fn exchange(&mut self, code: &str) -> std::io::Result<String> {
        let target = self
            .target
            .resolve()
            .map_err(|message| std::io::Error::new(ErrorKind::NotFound, message))?;
        let mut stream = TcpStream::connect_timeout(&target, self.timeout).map_err(|err| {
            self.target.invalidate();
            err
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.write_all(format!("{code}\n").as_bytes())?;

        let mut reply = String::new();
        BufReader::new(stream).read_line(&mut reply)?;
        Ok(reply.trim().to_string())
    }
}

impl DeviceChannel for TcpDeviceChannel {
    fn send_command(&mut self, code: &str) -> Result<(), DeviceError> {
        match self.exchange(code) {
            Ok(reply) if reply.eq_ignore_ascii_case("ok") => Ok(()),
            Ok(reply) if reply.is_empty() => Err(DeviceError::NoAck {
                code: code.to_string(),
                timeout: self.timeout,
            }),
            Ok(reply) => Err(DeviceError::Rejected {
                code: code.to_string(),
                reply,
            }),
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Err(DeviceError::NoAck {
                    code: code.to_string(),
                    timeout: self.timeout,
                })
            }
            Err(err) => Err(DeviceError::Unavailable(err.to_string())),
        }
    }
}

/// Used when no actuator bridge is configured.
pub struct LogDeviceChannel;

impl DeviceChannel for LogDeviceChannel {
    fn send_command(&mut self, code: &str) -> Result<(), DeviceError> {
        info!(code, "actuator command (no bridge configured)");
        Ok(())
    }
}

pub struct HttpTelemetrySink {
    agent: ureq::Agent,
    url: String,
}

impl HttpTelemetrySink {
    pub fn new(url: impl Into<String>, timeout: Duration, lookup_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .resolver(move |netloc: &str| lookup_within(netloc, lookup_timeout))
            .timeout(timeout)
            .user_agent("officeclock-controller")
            .build();
        Self {
            agent,
            url: url.into(),
        }
    }
}

impl TelemetrySink for HttpTelemetrySink {
    fn push(&mut self, payload: &TelemetryPayload) -> Result<u16, TelemetryError> {
        let body =
            serde_json::to_string(payload).map_err(|err| TelemetryError::Encode(err.to_string()))?;

        match self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body)
        {
            Ok(response) => Ok(response.status()),
            Err(ureq::Error::Status(code, _)) => Err(TelemetryError::Status(code)),
            Err(ureq::Error::Transport(err)) => Err(TelemetryError::Transport(err.to_string())),
        }
    }
}

pub struct MqttStatusPublisher {
    client: AsyncClient,
    bus: BusStatusHandle,
}

impl MqttStatusPublisher {
    pub fn new(client: AsyncClient, bus: BusStatusHandle) -> Self {
        Self { client, bus }
    }
}

impl StatusPublisher for MqttStatusPublisher {
    fn publish_heartbeat(&mut self, status: &ScheduleStatusPayload) -> Result<(), PublishError> {
        if self.bus.get() != BusStatus::Connected {
            return Err(PublishError::NotConnected);
        }
        let body =
            serde_json::to_vec(status).map_err(|err| PublishError::Rejected(err.to_string()))?;
        self.client
            .try_publish(TOPIC_SCHEDULE_STATUS, QoS::AtMostOnce, false, body)
            .map_err(|err| PublishError::Rejected(err.to_string()))
    }
}

/// Terminates the process when the scheduler stops feeding within the deadline.
pub struct SoftWatchdog {
    last_feed_ms: Arc<AtomicU64>,
}

impl SoftWatchdog {
    pub fn spawn(deadline: Duration) -> anyhow::Result<Self> {
        let last_feed_ms = Arc::new(AtomicU64::new(monotonic_ms()));
        let monitor = Arc::clone(&last_feed_ms);
        let deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);

        thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || loop {
                thread::sleep(WATCHDOG_CHECK_PERIOD);
                let silent_ms = monotonic_ms().saturating_sub(monitor.load(Ordering::Acquire));
                if silent_ms > deadline_ms {
                    error!(silent_ms, deadline_ms, "liveness deadline missed; terminating");
                    std::process::exit(WATCHDOG_EXIT_CODE);
                }
            })
            .context("failed to spawn watchdog thread")?;

        info!(deadline_ms, "software watchdog armed");
        Ok(Self { last_feed_ms })
    }
}

impl Watchdog for SoftWatchdog {
    fn feed(&mut self) {
        self.last_feed_ms.store(monotonic_ms(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_with(secs: u32, fraction: u32) -> [u8; NTP_PACKET_LEN] {
        let mut reply = [0_u8; NTP_PACKET_LEN];
        reply[0] = 0x1C;
        reply[1] = 2;
        reply[40..44].copy_from_slice(&secs.to_be_bytes());
        reply[44..48].copy_from_slice(&fraction.to_be_bytes());
        reply
    }

    #[test]
    fn sntp_transmit_time_converts_to_unix_millis() {
        // 2026-01-05T00:00:00Z plus half a second.
        let secs = (1_767_571_200 + NTP_UNIX_OFFSET_SECS) as u32;
        let reply = reply_with(secs, 1 << 31);
        assert_eq!(parse_sntp_reply(&reply), Ok(1_767_571_200_500));
    }

    #[test]
    fn sntp_rejects_short_and_kiss_of_death_replies() {
        assert!(matches!(
            parse_sntp_reply(&[0x1C; 12]),
            Err(TimeSyncError::InvalidReply(_))
        ));

        let mut reply = reply_with(3_976_560_000, 0);
        reply[1] = 0;
        assert!(matches!(
            parse_sntp_reply(&reply),
            Err(TimeSyncError::InvalidReply(_))
        ));
    }

    #[test]
    fn sntp_rejects_client_mode_echo() {
        let mut reply = reply_with(3_976_560_000, 0);
        reply[0] = 0x1B;
        assert!(parse_sntp_reply(&reply).is_err());
    }

    #[test]
    fn simulated_sensor_stays_in_range() {
        let mut sensor = SimulatedSensor::new(22.0, 4.0);
        let reading = sensor.read_sample().unwrap();
        assert!((18.0..=26.0).contains(&reading.temperature_c));
        assert!((35.0..=55.0).contains(&reading.humidity));
    }
}
