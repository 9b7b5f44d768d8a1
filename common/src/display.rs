use std::collections::HashMap;

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Weekday};

use crate::{
    connectivity::ConnectivityState,
    error::SensorError,
    messaging::BusStatus,
    types::{Color, Content, Reading, Region},
};

pub const SPLASH_TEXT: &str = "syncing time...";
pub const SENSOR_ERROR_TEXT: &str = "sensor error";

/// Presentation surface. Implementations must return quickly.
pub trait Display: Send {
    fn render(&mut self, region: Region, content: &Content);
}

/// Tracks what each region currently shows and only redraws on change.
#[derive(Debug, Default)]
pub struct DisplayModel {
    shown: HashMap<Region, Content>,
}

impl DisplayModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self, region: Region) -> Option<&Content> {
        self.shown.get(&region)
    }

    pub fn update(&mut self, display: &mut dyn Display, region: Region, content: Content) -> bool {
        if self.shown.get(&region) == Some(&content) {
            return false;
        }
        display.render(region, &content);
        self.shown.insert(region, content);
        true
    }

    pub fn show_splash(&mut self, display: &mut dyn Display) {
        self.update(display, Region::Time, Content::new(SPLASH_TEXT, Color::Gray));
    }

    pub fn show_clock(&mut self, display: &mut dyn Display, now: DateTime<FixedOffset>) {
        let date = format!("{:04}-{:02}-{:02}", now.year(), now.month(), now.day());
        self.update(display, Region::Date, Content::new(date, Color::White));
        self.update(
            display,
            Region::Weekday,
            Content::new(weekday_label(now.weekday()), Color::White),
        );
        let time = format!("{:02}:{:02}:{:02}", now.hour(), now.minute(), now.second());
        self.update(display, Region::Time, Content::new(time, Color::White));
    }

    pub fn show_reading(
        &mut self,
        display: &mut dyn Display,
        reading: Result<Reading, &SensorError>,
    ) {
        match reading {
            Ok(reading) => {
                self.update(
                    display,
                    Region::Temperature,
                    Content::new(
                        format!("{:.1}°C", reading.temperature_c),
                        Color::for_temperature(reading.temperature_c),
                    ),
                );
                self.update(
                    display,
                    Region::Humidity,
                    Content::new(
                        format!("{:.1}%", reading.humidity),
                        Color::for_humidity(reading.humidity),
                    ),
                );
            }
            Err(_) => {
                self.update(
                    display,
                    Region::Temperature,
                    Content::new(SENSOR_ERROR_TEXT, Color::Red),
                );
                self.update(display, Region::Humidity, Content::new("--", Color::Gray));
            }
        }
    }

    pub fn show_status(
        &mut self,
        display: &mut dyn Display,
        link: ConnectivityState,
        bus: BusStatus,
        last_sync_ok: Option<bool>,
    ) {
        let link_text = match link {
            ConnectivityState::Reconnecting { attempt } => format!("RECONNECTING {attempt}"),
            other => other.as_str().to_string(),
        };
        let sync_text = match last_sync_ok {
            Some(true) => "OK",
            Some(false) => "FAILED",
            None => "PENDING",
        };
        let color = match (link, bus) {
            (ConnectivityState::Up, BusStatus::Connected) => Color::Green,
            (ConnectivityState::Up, _) => Color::Yellow,
            (ConnectivityState::Reconnecting { .. }, _) => Color::Orange,
            (ConnectivityState::Down, _) => Color::Red,
        };
        let text = format!("NET {link_text} | BUS {} | NTP {sync_text}", bus.as_str());
        self.update(display, Region::Status, Content::new(text, color));
    }
}

pub fn weekday_label(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "周一",
        Weekday::Tue => "周二",
        Weekday::Wed => "周三",
        Weekday::Thu => "周四",
        Weekday::Fri => "周五",
        Weekday::Sat => "周六",
        Weekday::Sun => "周日",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug, Default)]
    pub(crate) struct RecordingDisplay {
        pub frames: Vec<(Region, Content)>,
    }

    impl Display for RecordingDisplay {
        fn render(&mut self, region: Region, content: &Content) {
            self.frames.push((region, content.clone()));
        }
    }

    fn shanghai(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 5, h, m, s)
            .unwrap()
    }

    #[test]
    fn clock_redraws_only_changed_regions() {
        let mut model = DisplayModel::new();
        let mut display = RecordingDisplay::default();

        model.show_clock(&mut display, shanghai(8, 0, 0));
        assert_eq!(display.frames.len(), 3);
        assert_eq!(
            display.frames[1],
            (Region::Weekday, Content::new("周一", Color::White))
        );

        model.show_clock(&mut display, shanghai(8, 0, 1));
        assert_eq!(display.frames.len(), 4);
        assert_eq!(
            display.frames[3],
            (Region::Time, Content::new("08:00:01", Color::White))
        );

        model.show_clock(&mut display, shanghai(8, 0, 1));
        assert_eq!(display.frames.len(), 4);
    }

    #[test]
    fn splash_is_replaced_by_time() {
        let mut model = DisplayModel::new();
        let mut display = RecordingDisplay::default();

        model.show_splash(&mut display);
        assert_eq!(model.shown(Region::Time).unwrap().text, SPLASH_TEXT);

        model.show_clock(&mut display, shanghai(9, 15, 0));
        assert_eq!(model.shown(Region::Time).unwrap().text, "09:15:00");
    }

    #[test]
    fn reading_uses_colour_bands_and_error_text() {
        let mut model = DisplayModel::new();
        let mut display = RecordingDisplay::default();

        model.show_reading(
            &mut display,
            Ok(Reading {
                temperature_c: 16.94,
                humidity: 85.0,
            }),
        );
        assert_eq!(
            model.shown(Region::Temperature),
            Some(&Content::new("16.9°C", Color::Blue))
        );
        assert_eq!(
            model.shown(Region::Humidity),
            Some(&Content::new("85.0%", Color::Cyan))
        );

        model.show_reading(&mut display, Err(&SensorError::NoData));
        assert_eq!(
            model.shown(Region::Temperature),
            Some(&Content::new(SENSOR_ERROR_TEXT, Color::Red))
        );
    }

    #[test]
    fn status_line_reflects_degradation() {
        let mut model = DisplayModel::new();
        let mut display = RecordingDisplay::default();

        model.show_status(
            &mut display,
            ConnectivityState::Reconnecting { attempt: 3 },
            BusStatus::Disconnected,
            Some(true),
        );

        assert_eq!(
            model.shown(Region::Status),
            Some(&Content::new(
                "NET RECONNECTING 3 | BUS DISCONNECTED | NTP OK",
                Color::Orange
            ))
        );
    }
}
