use std::{io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc, thread, time::Duration};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use officeclock_common::{
    messaging::{apply_inbound, parse_action, ActionBody, InboundMessage, ScheduleToggleBody},
    peripherals::{DeviceChannel, Peripherals},
    AutomationState, BusStatusHandle, Clock, CommandOrigin, RuntimeConfig, ScheduleStatusPayload,
    Scheduler, SharedAutomation, StatusBoard, SystemMonotonic, TOPIC_SCHEDULE_STATUS,
};

use crate::{
    bus::{mqtt_options, BusWorker},
    drivers::{
        ConsoleDisplay, HttpTelemetrySink, LogDeviceChannel, MqttStatusPublisher, SimulatedSensor,
        SntpTimeSource, SoftWatchdog, TcpDeviceChannel, TcpProbeLink,
    },
};

const DEFAULT_DATA_DIR: &str = "./.officeclock";
const MQTT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
struct AppState {
    automation: SharedAutomation,
    board: StatusBoard,
    mqtt: AsyncClient,
}

#[derive(Clone)]
struct ConfigStore {
    runtime_path: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct CommandAccepted {
    action: &'static str,
    code: &'static str,
    #[serde(rename = "deviceOn")]
    device_on: bool,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut config = store.load().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut config);
    config.sanitize();

    let automation = SharedAutomation::new(AutomationState::new(config.automation.schedule_enabled));
    let bus_status = BusStatusHandle::default();
    let board = StatusBoard::new(automation.clone(), bus_status.clone());

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options(&config.network), MQTT_CHANNEL_CAPACITY);

    let watchdog = SoftWatchdog::spawn(Duration::from_millis(config.liveness.deadline_ms))?;
    let peripherals = build_peripherals(&config, mqtt.clone(), bus_status.clone(), watchdog);
    let clock = Clock::new(Box::new(SystemMonotonic), config.tz());
    let scheduler = Scheduler::new(&config, clock, peripherals, automation.clone(), board.clone())
        .context("liveness budget check failed")?;

    thread::Builder::new()
        .name("scheduler".into())
        .spawn(move || scheduler.run())
        .context("failed to spawn scheduler thread")?;

    BusWorker::new(
        mqtt.clone(),
        eventloop,
        &config.network,
        bus_status,
        board.link_flag(),
        automation.clone(),
    )
    .spawn();

    let app = Router::new()
        .route("/ac", post(handle_ac))
        .route("/schedule", post(handle_schedule))
        .route("/api/status", get(handle_get_status))
        .with_state(AppState {
            automation,
            board,
            mqtt,
        });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.network.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!(timezone = %config.timezone, "controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn build_peripherals(
    config: &RuntimeConfig,
    mqtt: AsyncClient,
    bus_status: BusStatusHandle,
    watchdog: SoftWatchdog,
) -> Peripherals {
    let network = &config.network;
    let liveness = &config.liveness;
    let connect_timeout = Duration::from_millis(config.connectivity.connect_timeout_ms);
    let lookup_timeout = Duration::from_millis(liveness.lookup_timeout_ms);

    let device: Box<dyn DeviceChannel> = match network.actuator_addr.as_deref() {
        Some(addr) => Box::new(TcpDeviceChannel::new(
            addr,
            Duration::from_millis(liveness.device_command_timeout_ms),
            lookup_timeout,
        )),
        None => {
            info!("no actuator bridge configured; commands are only logged");
            Box::new(LogDeviceChannel)
        }
    };

    Peripherals {
        link: Box::new(TcpProbeLink::new(
            network.link_probe_addr.clone(),
            connect_timeout,
            lookup_timeout,
        )),
        time_source: Box::new(SntpTimeSource::new(
            network.ntp_server.clone(),
            lookup_timeout,
        )),
        sensor: Box::new(SimulatedSensor::new(22.0, 6.0)),
        display: Box::new(ConsoleDisplay),
        device,
        telemetry: Box::new(HttpTelemetrySink::new(
            network.telemetry_url.clone(),
            Duration::from_millis(liveness.telemetry_timeout_ms),
            lookup_timeout,
        )),
        status: Box::new(MqttStatusPublisher::new(mqtt, bus_status)),
        watchdog: Box::new(watchdog),
    }
}

fn apply_env_overrides(config: &mut RuntimeConfig) {
    let network = &mut config.network;
    if let Ok(host) = std::env::var("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = env_parse::<u16>("MQTT_PORT") {
        network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
    if let Some(port) = env_parse::<u16>("CONTROLLER_HTTP_PORT") {
        network.http_port = port;
    }
    if let Ok(url) = std::env::var("TELEMETRY_URL") {
        network.telemetry_url = url;
    }
    if let Ok(addr) = std::env::var("ACTUATOR_ADDR") {
        network.actuator_addr = Some(addr).filter(|addr| !addr.is_empty());
    }
    if let Ok(addr) = std::env::var("LINK_PROBE_ADDR") {
        network.link_probe_addr = addr;
    }
    if let Ok(server) = std::env::var("NTP_SERVER") {
        network.ntp_server = server;
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.board.snapshot())
}

async fn handle_ac(State(state): State<AppState>, Json(body): Json<ActionBody>) -> Response {
    let command = match parse_action(&body.action) {
        Ok(command) => command,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    apply_inbound(
        &state.automation,
        InboundMessage::Command(command),
        CommandOrigin::Http,
    );
    let device_on = state.automation.read().device_on();

    (
        StatusCode::ACCEPTED,
        Json(CommandAccepted {
            action: command.as_str(),
            code: command.code(),
            device_on,
        }),
    )
        .into_response()
}

async fn handle_schedule(
    State(state): State<AppState>,
    Json(body): Json<ScheduleToggleBody>,
) -> Response {
    let confirmation = apply_inbound(
        &state.automation,
        InboundMessage::ScheduleToggle(body.enabled),
        CommandOrigin::Http,
    );
    let status = confirmation.unwrap_or_else(|| {
        let snapshot = state.automation.read();
        ScheduleStatusPayload {
            enabled: snapshot.schedule_enabled(),
            device_on: snapshot.device_on(),
        }
    });

    match serde_json::to_vec(&status) {
        Ok(payload) => {
            if let Err(err) =
                state
                    .mqtt
                    .try_publish(TOPIC_SCHEDULE_STATUS, QoS::AtLeastOnce, false, payload)
            {
                warn!("schedule confirmation publish failed: {err}");
            }
        }
        Err(err) => warn!("schedule confirmation serialization failed: {err}"),
    }

    Json(status).into_response()
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("OFFICECLOCK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
        }
    }

    async fn load(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw).with_context(|| {
                format!("invalid runtime config at {}", self.runtime_path.display())
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %self.runtime_path.display(),
                    "no runtime config found; using defaults"
                );
                Ok(RuntimeConfig::default())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_replace_network_fields() {
        let mut config = RuntimeConfig::default();
        std::env::set_var("ACTUATOR_ADDR", "");
        std::env::set_var("NTP_SERVER", "pool.ntp.org:123");

        apply_env_overrides(&mut config);

        assert_eq!(config.network.actuator_addr, None);
        assert_eq!(config.network.ntp_server, "pool.ntp.org:123");
        std::env::remove_var("ACTUATOR_ADDR");
        std::env::remove_var("NTP_SERVER");
    }
}
