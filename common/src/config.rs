use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub clock_refresh_ms: u32,
    pub sensor_refresh_ms: u32,
    pub telemetry_upload_ms: u32,
    pub heartbeat_ms: u32,
    pub loop_slice_ms: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            clock_refresh_ms: 1_000,
            sensor_refresh_ms: 5_000,
            telemetry_upload_ms: 30_000,
            heartbeat_ms: 60_000,
            loop_slice_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    pub health_check_interval_ms: u32,
    pub max_attempts: u32,
    pub connect_timeout_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 10_000,
            max_attempts: 5,
            connect_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSyncConfig {
    pub interval_ms: u32,
    /// Resync period while the wall clock is unset or the last sync failed.
    pub retry_after_failure_ms: u32,
    pub max_tries: u32,
    pub try_timeout_ms: u64,
    pub retry_delay_ms: u64,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: 86_400_000,
            retry_after_failure_ms: 60_000,
            max_tries: 3,
            try_timeout_ms: 2_000,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub threshold_low_c: f32,
    pub on_hour: u32,
    pub on_minute: u32,
    pub off_hour: u32,
    pub off_minute: u32,
    pub schedule_enabled: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            threshold_low_c: 17.0,
            on_hour: 8,
            on_minute: 0,
            off_hour: 17,
            off_minute: 30,
            schedule_enabled: true,
        }
    }
}

/// Worst-case durations the loop is allowed to spend in each job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    pub deadline_ms: u64,
    pub device_command_timeout_ms: u64,
    pub telemetry_timeout_ms: u64,
    /// Bound on one hostname lookup made from the scheduler thread.
    pub lookup_timeout_ms: u64,
    pub sensor_read_budget_ms: u64,
    pub display_budget_ms: u64,
    pub heartbeat_budget_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 30_000,
            device_command_timeout_ms: 1_500,
            telemetry_timeout_ms: 3_000,
            lookup_timeout_ms: 1_000,
            sensor_read_budget_ms: 1_000,
            display_budget_ms: 100,
            heartbeat_budget_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub link_probe_addr: String,
    pub ntp_server: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub mqtt_reconnect_interval_ms: u64,
    pub mqtt_idle_timeout_ms: u64,
    pub telemetry_url: String,
    pub actuator_addr: Option<String>,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            link_probe_addr: "175.178.158.54:1883".to_string(),
            ntp_server: "ntp.aliyun.com:123".to_string(),
            mqtt_host: "175.178.158.54".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            mqtt_reconnect_interval_ms: 5_000,
            mqtt_idle_timeout_ms: 10_000,
            telemetry_url: "http://175.178.158.54:3000/update".to_string(),
            actuator_addr: None,
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub intervals: IntervalConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub time_sync: TimeSyncConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            intervals: IntervalConfig::default(),
            liveness: LivenessConfig::default(),
            connectivity: ConnectivityConfig::default(),
            time_sync: TimeSyncConfig::default(),
            automation: AutomationConfig::default(),
            network: NetworkConfig::default(),
            timezone: default_timezone(),
        }
    }
}

fn default_timezone() -> String {
    "Asia/Shanghai".to_string()
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.intervals.clock_refresh_ms = self.intervals.clock_refresh_ms.clamp(100, 1_000);
        self.intervals.sensor_refresh_ms = self.intervals.sensor_refresh_ms.max(2_000);
        self.intervals.telemetry_upload_ms = self.intervals.telemetry_upload_ms.max(5_000);
        self.intervals.heartbeat_ms = self.intervals.heartbeat_ms.max(5_000);
        self.intervals.loop_slice_ms = self.intervals.loop_slice_ms.clamp(10, 500);

        self.connectivity.max_attempts = self.connectivity.max_attempts.clamp(1, 20);
        self.connectivity.health_check_interval_ms =
            self.connectivity.health_check_interval_ms.max(1_000);

        self.time_sync.max_tries = self.time_sync.max_tries.clamp(1, 10);
        self.time_sync.interval_ms = self.time_sync.interval_ms.max(60_000);
        self.time_sync.retry_after_failure_ms = self
            .time_sync
            .retry_after_failure_ms
            .clamp(5_000, self.time_sync.interval_ms);

        self.liveness.lookup_timeout_ms = self.liveness.lookup_timeout_ms.clamp(100, 5_000);

        self.network.mqtt_reconnect_interval_ms =
            self.network.mqtt_reconnect_interval_ms.max(1_000);
        self.network.mqtt_idle_timeout_ms = self.network.mqtt_idle_timeout_ms.max(1_000);

        self.automation.on_hour = self.automation.on_hour.min(23);
        self.automation.off_hour = self.automation.off_hour.min(23);
        self.automation.on_minute = self.automation.on_minute.min(59);
        self.automation.off_minute = self.automation.off_minute.min(59);

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            self.timezone = default_timezone();
        }
    }

    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::Asia::Shanghai)
    }
}
