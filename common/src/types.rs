use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature_c: f32,
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Date,
    Weekday,
    Time,
    Temperature,
    Humidity,
    Status,
}

impl Region {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Weekday => "weekday",
            Self::Time => "time",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    White,
    Gray,
    Red,
    Blue,
    Yellow,
    Green,
    Orange,
    Cyan,
}

impl Color {
    /// RGB565 value understood by the ST7789 panel.
    pub fn rgb565(self) -> u16 {
        match self {
            Self::White => 0xFFFF,
            Self::Gray => 0x5AEB,
            Self::Red => 0xF800,
            Self::Blue => 0x001F,
            Self::Yellow => 0xFFE0,
            Self::Green => 0x07E0,
            Self::Orange => 0xFC00,
            Self::Cyan => 0x07FF,
        }
    }

    pub fn for_temperature(temperature_c: f32) -> Self {
        if temperature_c < 20.0 {
            Self::Blue
        } else if temperature_c > 30.0 {
            Self::Red
        } else {
            Self::Yellow
        }
    }

    pub fn for_humidity(humidity: f32) -> Self {
        if humidity < 30.0 {
            Self::Orange
        } else if humidity > 80.0 {
            Self::Cyan
        } else {
            Self::Green
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub text: String,
    pub color: Color,
}

impl Content {
    pub fn new(text: impl Into<String>, color: Color) -> Self {
        Self {
            text: text.into(),
            color,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryPayload {
    pub temperature: f32,
    pub humidity: f32,
}

impl TelemetryPayload {
    pub fn from_reading(reading: Reading) -> Self {
        Self {
            temperature: round_tenths(reading.temperature_c),
            humidity: round_tenths(reading.humidity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStatusPayload {
    pub enabled: bool,
    #[serde(rename = "deviceOn", default)]
    pub device_on: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub connectivity: &'static str,
    #[serde(rename = "reconnectAttempt")]
    pub reconnect_attempt: Option<u32>,
    #[serde(rename = "busStatus")]
    pub bus_status: &'static str,
    #[serde(rename = "timeSynced")]
    pub time_synced: bool,
    #[serde(rename = "lastSyncOk")]
    pub last_sync_ok: Option<bool>,
    #[serde(rename = "lastSyncEpochMs")]
    pub last_sync_epoch_ms: Option<i64>,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    #[serde(rename = "sensorValid")]
    pub sensor_valid: bool,
    #[serde(rename = "deviceOn")]
    pub device_on: bool,
    #[serde(rename = "scheduleEnabled")]
    pub schedule_enabled: bool,
    #[serde(rename = "lastCommand")]
    pub last_command: Option<&'static str>,
    pub iterations: u64,
}

fn round_tenths(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}
