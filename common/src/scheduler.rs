use std::{thread, time::Duration};

use chrono::{DateTime, FixedOffset};
use tracing::{debug, info, warn};

use crate::{
    automation::{AutomationState, AutomationStateMachine, Command, CommandOrigin, SharedAutomation},
    clock::Clock,
    config::RuntimeConfig,
    connectivity::{ConnectivityState, ConnectivitySupervisor},
    display::DisplayModel,
    error::BudgetError,
    gate::IntervalGate,
    liveness::{iteration_budgets, verify_budget},
    peripherals::Peripherals,
    status::StatusBoard,
    time_sync::TimeSyncManager,
    types::{Reading, ScheduleStatusPayload, TelemetryPayload},
};

struct JobGates {
    clock: IntervalGate,
    sensor: IntervalGate,
    telemetry: IntervalGate,
    heartbeat: IntervalGate,
}

/// Cooperative loop driving every periodic job under the liveness deadline.
pub struct Scheduler {
    clock: Clock,
    peripherals: Peripherals,
    connectivity: ConnectivitySupervisor,
    time_sync: TimeSyncManager,
    automation: AutomationStateMachine,
    display: DisplayModel,
    board: StatusBoard,
    gates: JobGates,
    loop_slice: Duration,
    last_reading: Option<Reading>,
    sensor_fault_reported: bool,
    last_minute: Option<i64>,
    minute_boundary: Option<DateTime<FixedOffset>>,
}

impl Scheduler {
    /// Fails when the declared worst-case iteration does not fit the liveness deadline.
    pub fn new(
        config: &RuntimeConfig,
        clock: Clock,
        peripherals: Peripherals,
        shared: SharedAutomation,
        board: StatusBoard,
    ) -> Result<Self, BudgetError> {
        let worst_case_ms = verify_budget(&iteration_budgets(config), config.liveness.deadline_ms)?;
        debug!(worst_case_ms, "scheduler budget accepted");

        let intervals = &config.intervals;
        Ok(Self {
            clock,
            peripherals,
            connectivity: ConnectivitySupervisor::new(&config.connectivity)
                .with_observer(Box::new(board.clone())),
            time_sync: TimeSyncManager::new(&config.time_sync),
            automation: AutomationStateMachine::new(shared, config.automation.clone()),
            display: DisplayModel::new(),
            board,
            gates: JobGates {
                clock: IntervalGate::new(intervals.clock_refresh_ms),
                sensor: IntervalGate::new(intervals.sensor_refresh_ms),
                telemetry: IntervalGate::new(intervals.telemetry_upload_ms),
                heartbeat: IntervalGate::new(intervals.heartbeat_ms),
            },
            loop_slice: Duration::from_millis(intervals.loop_slice_ms),
            last_reading: None,
            sensor_fault_reported: false,
            last_minute: None,
            minute_boundary: None,
        })
    }

    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    pub fn automation(&self) -> &SharedAutomation {
        self.automation.shared()
    }

    pub fn connectivity_state(&self) -> ConnectivityState {
        self.connectivity.state()
    }

    /// Boot sequence: splash, immediate link check and the initial time sync.
    pub fn start(&mut self) {
        self.peripherals.watchdog.feed();
        self.display.show_splash(self.peripherals.display.as_mut());

        let now = self.clock.monotonic_now_ms();
        let state = self
            .connectivity
            .check_now(now, self.peripherals.link.as_mut());
        self.sync_time(now);

        info!(
            connectivity = state.as_str(),
            time_synced = self.clock.is_synced(),
            "scheduler started"
        );
    }

    pub fn run(mut self) -> ! {
        self.start();
        loop {
            self.run_iteration();
            thread::sleep(self.loop_slice);
        }
    }

    pub fn run_iteration(&mut self) {
        self.peripherals.watchdog.feed();
        self.drain_inbound();

        let now = self.clock.monotonic_now_ms();
        self.connectivity
            .tick(now, self.peripherals.link.as_mut());
        self.sync_time(now);

        if self.gates.clock.poll(now) {
            self.refresh_clock();
        }
        if self.gates.sensor.poll(now) {
            self.refresh_sensor();
        }
        if self.gates.telemetry.poll(now) {
            self.upload_telemetry();
        }
        if self.gates.heartbeat.poll(now) {
            self.publish_heartbeat();
        }
        self.check_automation_window();

        self.board.record_iteration();
    }

    fn drain_inbound(&mut self) {
        let pending = self.automation.shared().apply(AutomationState::take_pending);
        if let Some((command, origin)) = pending {
            self.send_command(command, origin);
        }
    }

    fn sync_time(&mut self, now: u64) {
        let outcome = if self.connectivity.take_resync_request() {
            Some(self.time_sync.force_sync(
                now,
                self.peripherals.time_source.as_mut(),
                &mut self.clock,
                self.peripherals.watchdog.as_mut(),
            ))
        } else {
            self.time_sync.tick(
                now,
                self.connectivity.state().is_up(),
                self.peripherals.time_source.as_mut(),
                &mut self.clock,
                self.peripherals.watchdog.as_mut(),
            )
        };

        if let Some(outcome) = outcome {
            self.board.record_sync(outcome, self.clock.is_synced());
        }
    }

    fn refresh_clock(&mut self) {
        let display = self.peripherals.display.as_mut();
        if let Some(now) = self.clock.wall_now() {
            self.display.show_clock(display, now);

            // Only forward minute changes count, so a backward resync cannot replay a window.
            let minute = now.timestamp().div_euclid(60);
            if self.last_minute.map_or(true, |last| minute > last) {
                self.last_minute = Some(minute);
                self.minute_boundary = Some(now);
            }
        }
        self.display.show_status(
            display,
            self.connectivity.state(),
            self.board.bus_status(),
            self.board.last_sync_ok(),
        );
    }

    fn refresh_sensor(&mut self) {
        let display = self.peripherals.display.as_mut();
        match self.peripherals.sensor.read_sample() {
            Ok(reading) => {
                if self.sensor_fault_reported {
                    info!("sensor readings recovered");
                    self.sensor_fault_reported = false;
                }
                debug!(
                    temperature = reading.temperature_c,
                    humidity = reading.humidity,
                    "sensor sample"
                );
                self.last_reading = Some(reading);
                self.display.show_reading(display, Ok(reading));
            }
            Err(err) => {
                if !self.sensor_fault_reported {
                    warn!("sensor unavailable: {err}");
                    self.sensor_fault_reported = true;
                }
                self.last_reading = None;
                self.display.show_reading(display, Err(&err));
            }
        }
        self.board.record_reading(self.last_reading);
    }

    fn upload_telemetry(&mut self) {
        if !self.connectivity.state().is_up() {
            debug!("link not up; skipping telemetry upload");
            return;
        }
        let Some(reading) = self.last_reading else {
            debug!("no valid reading; skipping telemetry upload");
            return;
        };

        let payload = TelemetryPayload::from_reading(reading);
        match self.peripherals.telemetry.push(&payload) {
            Ok(status) => info!(
                status,
                temperature = payload.temperature,
                humidity = payload.humidity,
                "telemetry uploaded"
            ),
            Err(err) => warn!("telemetry upload failed: {err}"),
        }
    }

    fn publish_heartbeat(&mut self) {
        let state = self.automation.shared().read();
        let payload = ScheduleStatusPayload {
            enabled: state.schedule_enabled(),
            device_on: state.device_on(),
        };
        if let Err(err) = self.peripherals.status.publish_heartbeat(&payload) {
            debug!("status heartbeat not published: {err}");
        }
    }

    fn check_automation_window(&mut self) {
        let Some(now) = self.minute_boundary.take() else {
            return;
        };
        let measurement = self.last_reading.map(|reading| reading.temperature_c);
        if let Some(command) = self.automation.evaluate_at(now, measurement) {
            self.send_command(command, CommandOrigin::Schedule);
        }
    }

    fn send_command(&mut self, command: Command, origin: CommandOrigin) {
        let code = command.code();
        match self.peripherals.device.send_command(code) {
            Ok(()) => info!(code, ?origin, "device acknowledged command"),
            Err(err) => warn!(code, ?origin, "device command failed, not retrying: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        clock::ManualMonotonic,
        connectivity::{tests::ScriptedLink, LinkDriver},
        display::Display,
        error::{DeviceError, LinkError, PublishError, SensorError, TelemetryError, TimeSyncError},
        liveness::Watchdog,
        messaging::BusStatusHandle,
        peripherals::{DeviceChannel, SensorSource, StatusPublisher, TelemetrySink},
        time_sync::{
            tests::{ScriptedTimeSource, MONDAY_0800_SHANGHAI_MS},
            TimeSource,
        },
        types::{Content, Region},
    };

    const MINUTE_MS: i64 = 60_000;
    const HOUR_MS: i64 = 60 * MINUTE_MS;

    /// Shared record of every collaborator call, in call order.
    #[derive(Clone)]
    struct Rig {
        journal: Arc<Mutex<Vec<String>>>,
        link: Arc<Mutex<ScriptedLink>>,
        time: Arc<Mutex<ScriptedTimeSource>>,
        sample: Arc<Mutex<Result<Reading, SensorError>>>,
        sent: Arc<Mutex<Vec<String>>>,
        uploads: Arc<Mutex<Vec<TelemetryPayload>>>,
        heartbeats: Arc<Mutex<Vec<ScheduleStatusPayload>>>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                journal: Arc::default(),
                link: Arc::new(Mutex::new(ScriptedLink {
                    up: true,
                    ..Default::default()
                })),
                time: Arc::default(),
                sample: Arc::new(Mutex::new(Ok(Reading {
                    temperature_c: 20.0,
                    humidity: 50.0,
                }))),
                sent: Arc::default(),
                uploads: Arc::default(),
                heartbeats: Arc::default(),
            }
        }

        fn note(&self, entry: impl Into<String>) {
            self.journal.lock().unwrap().push(entry.into());
        }

        fn set_time_replies(&self, replies: impl IntoIterator<Item = i64>) {
            self.time.lock().unwrap().replies = replies.into_iter().map(Ok).collect();
        }

        fn time_calls(&self) -> u32 {
            self.time.lock().unwrap().calls
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        /// Journal with consecutive duplicates collapsed.
        fn stages(&self) -> Vec<String> {
            let mut stages = self.journal.lock().unwrap().clone();
            stages.dedup();
            stages
        }

        fn peripherals(&self) -> Peripherals {
            Peripherals {
                link: Box::new(RigLink(self.clone())),
                time_source: Box::new(RigTime(self.clone())),
                sensor: Box::new(RigSensor(self.clone())),
                display: Box::new(RigDisplay(self.clone())),
                device: Box::new(RigDevice(self.clone())),
                telemetry: Box::new(RigTelemetry(self.clone())),
                status: Box::new(RigStatus(self.clone())),
                watchdog: Box::new(RigWatchdog(self.clone())),
            }
        }
    }

    struct RigLink(Rig);

    impl LinkDriver for RigLink {
        fn is_up(&mut self) -> bool {
            self.0.note("link");
            self.0.link.lock().unwrap().is_up()
        }

        fn connect(&mut self, timeout: Duration) -> Result<(), LinkError> {
            self.0.note("link");
            self.0.link.lock().unwrap().connect(timeout)
        }

        fn disconnect(&mut self) {
            self.0.link.lock().unwrap().disconnect();
        }
    }

    struct RigTime(Rig);

    impl TimeSource for RigTime {
        fn fetch_epoch_ms(&mut self, timeout: Duration) -> Result<i64, TimeSyncError> {
            self.0.note("time");
            self.0.time.lock().unwrap().fetch_epoch_ms(timeout)
        }
    }

    struct RigSensor(Rig);

    impl SensorSource for RigSensor {
        fn read_sample(&mut self) -> Result<Reading, SensorError> {
            self.0.note("sensor");
            self.0.sample.lock().unwrap().clone()
        }
    }

    struct RigDisplay(Rig);

    impl Display for RigDisplay {
        fn render(&mut self, _region: Region, _content: &Content) {
            self.0.note("render");
        }
    }

    struct RigDevice(Rig);

    impl DeviceChannel for RigDevice {
        fn send_command(&mut self, code: &str) -> Result<(), DeviceError> {
            self.0.note(format!("device:{code}"));
            self.0.sent.lock().unwrap().push(code.to_string());
            Ok(())
        }
    }

    struct RigTelemetry(Rig);

    impl TelemetrySink for RigTelemetry {
        fn push(&mut self, payload: &TelemetryPayload) -> Result<u16, TelemetryError> {
            self.0.note("telemetry");
            self.0.uploads.lock().unwrap().push(*payload);
            Ok(200)
        }
    }

    struct RigStatus(Rig);

    impl StatusPublisher for RigStatus {
        fn publish_heartbeat(&mut self, status: &ScheduleStatusPayload) -> Result<(), PublishError> {
            self.0.note("heartbeat");
            self.0.heartbeats.lock().unwrap().push(*status);
            Ok(())
        }
    }

    struct RigWatchdog(Rig);

    impl Watchdog for RigWatchdog {
        fn feed(&mut self) {
            self.0.note("feed");
        }
    }

    fn test_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.time_sync.retry_delay_ms = 0;
        config.time_sync.try_timeout_ms = 10;
        config
    }

    fn scheduler(rig: &Rig, config: &RuntimeConfig, ticks: &ManualMonotonic) -> Scheduler {
        let clock = Clock::new(Box::new(ticks.clone()), config.tz());
        let shared = SharedAutomation::new(AutomationState::new(true));
        let board = StatusBoard::new(shared.clone(), BusStatusHandle::default());
        Scheduler::new(config, clock, rig.peripherals(), shared, board).unwrap()
    }

    fn monday_at(hour: i64, minute: i64, second: i64) -> i64 {
        MONDAY_0800_SHANGHAI_MS + (hour - 8) * HOUR_MS + minute * MINUTE_MS + second * 1_000
    }

    #[test]
    fn link_outage_recovers_with_exactly_one_forced_resync() {
        let rig = Rig::new();
        rig.set_time_replies([monday_at(12, 0, 0), monday_at(12, 3, 30)]);
        let ticks = ManualMonotonic::new(0);
        let mut scheduler = scheduler(&rig, &test_config(), &ticks);

        scheduler.start();
        assert_eq!(scheduler.connectivity_state(), ConnectivityState::Up);
        assert_eq!(rig.time_calls(), 1);

        rig.link.lock().unwrap().up = false;
        for step in 1..=20 {
            ticks.set(step * 10_000);
            scheduler.run_iteration();
        }

        assert_eq!(scheduler.connectivity_state(), ConnectivityState::Down);
        assert_eq!(rig.link.lock().unwrap().connect_calls, 20);
        assert_eq!(rig.time_calls(), 1);
        assert!(rig.uploads.lock().unwrap().is_empty());
        assert_eq!(scheduler.board().snapshot().connectivity, "DOWN");

        rig.link.lock().unwrap().connect_results.push_back(true);
        ticks.set(210_000);
        scheduler.run_iteration();

        assert_eq!(scheduler.connectivity_state(), ConnectivityState::Up);
        assert_eq!(rig.time_calls(), 2);

        ticks.set(220_000);
        scheduler.run_iteration();
        assert_eq!(rig.time_calls(), 2);

        let snapshot = scheduler.board().snapshot();
        assert_eq!(snapshot.connectivity, "UP");
        assert_eq!(snapshot.last_sync_ok, Some(true));
        assert_eq!(snapshot.last_sync_epoch_ms, Some(monday_at(12, 3, 30)));
        assert_eq!(rig.uploads.lock().unwrap().len(), 1);
    }

    #[test]
    fn jobs_run_in_priority_order() {
        let rig = Rig::new();
        rig.set_time_replies([monday_at(17, 29, 0), monday_at(17, 30, 0)]);
        let mut config = test_config();
        config.time_sync.interval_ms = 60_000;
        let ticks = ManualMonotonic::new(0);
        let mut scheduler = scheduler(&rig, &config, &ticks);
        scheduler.start();

        scheduler
            .automation()
            .apply(|state| state.request(Command::TurnOn, CommandOrigin::Http));
        rig.journal.lock().unwrap().clear();
        ticks.set(60_000);
        scheduler.run_iteration();

        assert_eq!(
            rig.stages(),
            vec![
                "feed",
                "device:AC_ON",
                "link",
                "feed",
                "time",
                "render",
                "sensor",
                "render",
                "telemetry",
                "heartbeat",
                "device:AC_OFF",
            ]
        );
        assert_eq!(
            *rig.heartbeats.lock().unwrap(),
            vec![ScheduleStatusPayload {
                enabled: true,
                device_on: true
            }]
        );
        assert!(!scheduler.automation().read().device_on());
    }

    #[test]
    fn cold_morning_sends_one_turn_on() {
        let rig = Rig::new();
        *rig.sample.lock().unwrap() = Ok(Reading {
            temperature_c: 16.9,
            humidity: 45.0,
        });
        rig.set_time_replies([monday_at(7, 59, 50)]);
        let ticks = ManualMonotonic::new(0);
        let mut scheduler = scheduler(&rig, &test_config(), &ticks);
        scheduler.start();

        for step in 1..=40 {
            ticks.set(step * 1_000);
            scheduler.run_iteration();
        }

        assert_eq!(rig.sent(), vec!["AC_ON".to_string()]);
        assert!(scheduler.automation().read().device_on());
    }

    #[test]
    fn sensor_fault_skips_morning_window() {
        let rig = Rig::new();
        *rig.sample.lock().unwrap() = Err(SensorError::NoData);
        rig.set_time_replies([monday_at(7, 59, 50)]);
        let ticks = ManualMonotonic::new(0);
        let mut scheduler = scheduler(&rig, &test_config(), &ticks);
        scheduler.start();

        for step in 1..=20 {
            ticks.set(step * 1_000);
            scheduler.run_iteration();
        }

        assert!(rig.sent().is_empty());
        let snapshot = scheduler.board().snapshot();
        assert!(!snapshot.sensor_valid);
        assert_eq!(snapshot.temperature, None);
    }

    #[test]
    fn unsynced_clock_skips_time_dependent_work() {
        let rig = Rig::new();
        let ticks = ManualMonotonic::new(0);
        let mut scheduler = scheduler(&rig, &test_config(), &ticks);
        scheduler.start();

        for step in 1..=5 {
            ticks.set(step * 1_000);
            scheduler.run_iteration();
        }

        assert!(!scheduler.board().snapshot().time_synced);
        assert_eq!(scheduler.board().last_sync_ok(), Some(false));
        assert!(rig.sent().is_empty());
    }

    #[test]
    fn budget_violation_refuses_to_build() {
        let rig = Rig::new();
        let mut config = test_config();
        config.liveness.deadline_ms = 1_000;
        let clock = Clock::new(Box::new(ManualMonotonic::new(0)), config.tz());
        let shared = SharedAutomation::new(AutomationState::new(true));
        let board = StatusBoard::new(shared.clone(), BusStatusHandle::default());

        let result = Scheduler::new(&config, clock, rig.peripherals(), shared, board);

        assert!(matches!(result, Err(BudgetError::ExceedsDeadline { .. })));
    }

    #[test]
    fn inbound_command_is_sent_once() {
        let rig = Rig::new();
        rig.set_time_replies([monday_at(10, 0, 0)]);
        let ticks = ManualMonotonic::new(0);
        let mut scheduler = scheduler(&rig, &test_config(), &ticks);
        scheduler.start();

        let worker_side = scheduler.automation().clone();
        worker_side.apply(|state| state.request(Command::TurnOff, CommandOrigin::Bus));
        worker_side.apply(|state| state.request(Command::TurnOn, CommandOrigin::Bus));

        ticks.set(100);
        scheduler.run_iteration();
        ticks.set(200);
        scheduler.run_iteration();

        assert_eq!(rig.sent(), vec!["AC_ON".to_string()]);
        assert_eq!(worker_side.read().pending_command(), None);
    }

    #[test]
    fn failed_boot_sync_is_retried_on_short_period() {
        let rig = Rig::new();
        let config = test_config();
        let ticks = ManualMonotonic::new(0);
        let mut scheduler = scheduler(&rig, &config, &ticks);

        scheduler.start();
        assert_eq!(rig.time_calls(), 3);
        assert!(!scheduler.board().snapshot().time_synced);

        rig.set_time_replies([monday_at(9, 0, 0)]);
        let retry_steps = u64::from(config.time_sync.retry_after_failure_ms) / 1_000;
        for step in 1..=retry_steps {
            ticks.set(step * 1_000);
            scheduler.run_iteration();
        }

        let snapshot = scheduler.board().snapshot();
        assert_eq!(scheduler.connectivity_state(), ConnectivityState::Up);
        assert!(snapshot.time_synced);
        assert_eq!(snapshot.last_sync_ok, Some(true));
        assert_eq!(rig.time_calls(), 4);

        // Synced: the daily period applies again.
        for step in retry_steps + 1..=retry_steps * 3 {
            ticks.set(step * 1_000);
            scheduler.run_iteration();
        }
        assert_eq!(rig.time_calls(), 4);
    }
}
