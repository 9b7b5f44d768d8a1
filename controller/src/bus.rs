use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions, QoS,
};
use tracing::{debug, info, warn};

use officeclock_common::{
    clock::monotonic_ms, config::NetworkConfig, messaging::handle_bus_message, BusStatus,
    BusStatusHandle, ConnectFailure, LinkFlag, MessagingConnection, ScheduleStatusPayload,
    SharedAutomation, INBOUND_TOPICS, TOPIC_SCHEDULE_STATUS,
};

const CLIENT_ID: &str = "officeclock-controller";
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const DISCONNECTED_POLL: Duration = Duration::from_millis(250);

pub fn mqtt_options(network: &NetworkConfig) -> MqttOptions {
    let mut options = MqttOptions::new(CLIENT_ID, network.mqtt_host.clone(), network.mqtt_port);
    options.set_keep_alive(KEEP_ALIVE);
    if !network.mqtt_user.is_empty() {
        options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }
    options
}

pub fn classify(err: &ConnectionError) -> ConnectFailure {
    match err {
        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
                ConnectFailure::BadCredentials
            }
            ConnectReturnCode::ServiceUnavailable => ConnectFailure::ServerUnavailable,
            other => ConnectFailure::Protocol(format!("connection refused: {other:?}")),
        },
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => ConnectFailure::Timeout,
        ConnectionError::Io(io) => match io.kind() {
            std::io::ErrorKind::TimedOut => ConnectFailure::Timeout,
            std::io::ErrorKind::ConnectionRefused => ConnectFailure::ServerUnavailable,
            _ => ConnectFailure::Transport(io.to_string()),
        },
        other => ConnectFailure::Protocol(other.to_string()),
    }
}

/// What the worker does on one pass of its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Disconnected and not yet allowed to retry.
    Wait,
    /// Drive the event loop (connect handshake or inbound traffic).
    Poll,
    /// Link went away under an open or opening session.
    Drop,
}

fn next_step(connection: &mut MessagingConnection, now_ms: u64, link_up: bool) -> Step {
    match connection.status() {
        BusStatus::Disconnected => {
            if !connection.should_attempt(now_ms, link_up) {
                return Step::Wait;
            }
            connection.begin_attempt(now_ms);
            Step::Poll
        }
        _ if !link_up => {
            connection.reset();
            Step::Drop
        }
        _ => Step::Poll,
    }
}

/// Returns whether the session must be discarded after a quiet poll.
fn idle_elapsed(connection: &mut MessagingConnection) -> bool {
    if connection.status() == BusStatus::Connecting {
        connection.failed(&ConnectFailure::Timeout);
        true
    } else {
        debug!("message bus idle");
        false
    }
}

/// Owns the MQTT session. Runs on its own task and never touches the scheduler thread.
pub struct BusWorker {
    client: AsyncClient,
    eventloop: EventLoop,
    connection: MessagingConnection,
    link: LinkFlag,
    automation: SharedAutomation,
    idle_timeout: Duration,
}

impl BusWorker {
    pub fn new(
        client: AsyncClient,
        eventloop: EventLoop,
        network: &NetworkConfig,
        status: BusStatusHandle,
        link: LinkFlag,
        automation: SharedAutomation,
    ) -> Self {
        Self {
            client,
            eventloop,
            connection: MessagingConnection::new(network.mqtt_reconnect_interval_ms, status),
            link,
            automation,
            idle_timeout: Duration::from_millis(network.mqtt_idle_timeout_ms),
        }
    }

    pub fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        loop {
            match next_step(&mut self.connection, monotonic_ms(), self.link.is_up()) {
                Step::Wait => {
                    tokio::time::sleep(DISCONNECTED_POLL).await;
                    continue;
                }
                Step::Drop => {
                    self.eventloop.clean();
                    continue;
                }
                Step::Poll => {}
            }

            match tokio::time::timeout(self.idle_timeout, self.eventloop.poll()).await {
                Err(_) => {
                    if idle_elapsed(&mut self.connection) {
                        self.eventloop.clean();
                    }
                }
                Ok(Ok(event)) => self.on_event(event),
                Ok(Err(err)) => self.connection.failed(&classify(&err)),
            }
        }
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Incoming::ConnAck(_)) => {
                self.connection.connected();
                self.subscribe();
            }
            Event::Incoming(Incoming::Publish(message)) => {
                let confirmation =
                    handle_bus_message(&self.automation, &message.topic, &message.payload);
                if let Some(status) = confirmation {
                    self.publish_confirmation(&status);
                }
            }
            _ => {}
        }
    }

    fn subscribe(&self) {
        for topic in INBOUND_TOPICS {
            if let Err(err) = self.client.try_subscribe(topic, QoS::AtMostOnce) {
                warn!(topic, "mqtt subscribe failed: {err}");
            }
        }
        info!(topics = ?INBOUND_TOPICS, "mqtt subscriptions requested");
    }

    fn publish_confirmation(&self, status: &ScheduleStatusPayload) {
        match serde_json::to_vec(status) {
            Ok(body) => {
                if let Err(err) =
                    self.client
                        .try_publish(TOPIC_SCHEDULE_STATUS, QoS::AtLeastOnce, false, body)
                {
                    warn!("schedule confirmation publish failed: {err}");
                }
            }
            Err(err) => warn!("schedule confirmation serialization failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn refused_connections_map_to_taxonomy() {
        assert_eq!(
            classify(&ConnectionError::ConnectionRefused(
                ConnectReturnCode::BadUserNamePassword
            )),
            ConnectFailure::BadCredentials
        );
        assert_eq!(
            classify(&ConnectionError::ConnectionRefused(
                ConnectReturnCode::ServiceUnavailable
            )),
            ConnectFailure::ServerUnavailable
        );
        assert!(matches!(
            classify(&ConnectionError::ConnectionRefused(
                ConnectReturnCode::RefusedProtocolVersion
            )),
            ConnectFailure::Protocol(_)
        ));
    }

    #[test]
    fn io_and_timeout_errors_map_to_taxonomy() {
        assert_eq!(
            classify(&ConnectionError::NetworkTimeout),
            ConnectFailure::Timeout
        );
        assert_eq!(
            classify(&ConnectionError::Io(io::Error::from(io::ErrorKind::ConnectionRefused))),
            ConnectFailure::ServerUnavailable
        );
        assert!(matches!(
            classify(&ConnectionError::Io(io::Error::from(io::ErrorKind::BrokenPipe))),
            ConnectFailure::Transport(_)
        ));
    }

    fn connection() -> (MessagingConnection, BusStatusHandle) {
        let handle = BusStatusHandle::default();
        (MessagingConnection::new(5_000, handle.clone()), handle)
    }

    #[test]
    fn waits_for_link_before_first_attempt() {
        let (mut connection, handle) = connection();

        assert_eq!(next_step(&mut connection, 1_000, false), Step::Wait);
        assert_eq!(handle.get(), BusStatus::Disconnected);

        assert_eq!(next_step(&mut connection, 2_000, true), Step::Poll);
        assert_eq!(handle.get(), BusStatus::Connecting);
        assert_eq!(connection.last_attempt_ms(), Some(2_000));
    }

    #[test]
    fn link_loss_drops_open_session_without_counting_failure() {
        let (mut connection, handle) = connection();
        next_step(&mut connection, 0, true);
        connection.connected();
        assert_eq!(next_step(&mut connection, 100, true), Step::Poll);

        assert_eq!(next_step(&mut connection, 200, false), Step::Drop);
        assert_eq!(handle.get(), BusStatus::Disconnected);
        assert_eq!(connection.failures(), 0);

        // Reconnects on the fixed interval once the link is back.
        assert_eq!(next_step(&mut connection, 4_000, true), Step::Wait);
        assert_eq!(next_step(&mut connection, 5_000, true), Step::Poll);
    }

    #[test]
    fn quiet_handshake_counts_as_timeout() {
        let (mut connection, handle) = connection();
        next_step(&mut connection, 0, true);

        assert!(idle_elapsed(&mut connection));
        assert_eq!(handle.get(), BusStatus::Disconnected);
        assert_eq!(connection.failures(), 1);
        assert_eq!(next_step(&mut connection, 1_000, true), Step::Wait);
    }

    #[test]
    fn quiet_established_session_is_kept() {
        let (mut connection, handle) = connection();
        next_step(&mut connection, 0, true);
        connection.connected();

        assert!(!idle_elapsed(&mut connection));
        assert_eq!(handle.get(), BusStatus::Connected);
        assert_eq!(connection.failures(), 0);
    }

    #[test]
    fn credentials_only_set_when_user_present() {
        let mut network = NetworkConfig::default();
        network.mqtt_host = "broker.local".to_string();
        let options = mqtt_options(&network);
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1883));
        assert!(options.credentials().is_none());

        network.mqtt_user = "clock".to_string();
        network.mqtt_pass = "secret".to_string();
        assert!(mqtt_options(&network).credentials().is_some());
    }
}
