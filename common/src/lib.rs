pub mod automation;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod display;
pub mod error;
pub mod gate;
pub mod liveness;
pub mod messaging;
pub mod peripherals;
pub mod scheduler;
pub mod status;
pub mod time_sync;
pub mod topics;
pub mod types;

pub use automation::{AutomationState, AutomationStateMachine, Command, CommandOrigin, SharedAutomation};
pub use clock::{Clock, SystemMonotonic};
pub use config::RuntimeConfig;
pub use connectivity::{ConnectivityState, ConnectivitySupervisor, LinkDriver, LinkFlag};
pub use messaging::{BusStatus, BusStatusHandle, ConnectFailure, MessagingConnection};
pub use scheduler::Scheduler;
pub use status::StatusBoard;
pub use topics::*;
pub use types::{Reading, ScheduleStatusPayload, StatusSnapshot, TelemetryPayload};
