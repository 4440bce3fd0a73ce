use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::bridge::{Bridge, LOG_SOURCE};
use crate::config::MqttSettings;
use crate::db::models::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

/// Owns the broker session and the reconnect state machine.
///
/// The rumqttc event loop is the sole source of inbound events; publishes
/// are handed to the [`Bridge`] sequentially, so handlers never run
/// concurrently. Connect failures are retried with a fixed delay up to a
/// configured attempt budget, after which [`ConnectionManager::run`]
/// returns an error and the process exits non-zero.
pub struct ConnectionManager {
    client: AsyncClient,
    eventloop: rumqttc::EventLoop,
    broker_host: String,
    broker_port: u16,
    topics: Vec<(String, QoS)>,
    reconnect_delay: Duration,
    max_attempts: u32,
    state: ConnectionState,
    bridge: Bridge,
}

impl ConnectionManager {
    pub fn new(settings: &MqttSettings, bridge: Bridge) -> Self {
        let mut options = MqttOptions::new(
            settings.client_id.clone(),
            settings.broker_host.clone(),
            settings.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(settings.keepalive_secs));
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);

        Self {
            client,
            eventloop,
            broker_host: settings.broker_host.clone(),
            broker_port: settings.broker_port,
            topics: settings
                .topics
                .iter()
                .map(|t| (t.pattern.clone(), to_qos(t.qos)))
                .collect(),
            reconnect_delay: Duration::from_secs(settings.reconnect_delay_secs),
            max_attempts: settings.max_reconnect_attempts,
            state: ConnectionState::Disconnected,
            bridge,
        }
    }

    /// Drive the broker session until `shutdown` resolves or the reconnect
    /// budget is exhausted. Subscriptions are (re-)established on every
    /// ConnAck, so broker-initiated reconnects recover the full set.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        self.state = ConnectionState::Connecting;
        info!(
            host = %self.broker_host,
            port = self.broker_port,
            "Connecting to MQTT broker"
        );

        // Failed attempts within the current outage; reset on ConnAck.
        let mut attempts: u32 = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    self.stop().await;
                    return Ok(());
                }
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        attempts = 0;
                        self.state = ConnectionState::Connected;
                        info!(code = ?ack.code, "Connected to MQTT broker");
                        self.subscribe_all().await?;
                        self.bridge
                            .store()
                            .log_event(LogLevel::Info, "MQTT bridge connected to broker", LOG_SOURCE, None)
                            .await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.bridge.handle_message(&publish.topic, &publish.payload).await;
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        self.state = ConnectionState::Disconnected;
                        warn!("Broker closed the session");
                        self.bridge
                            .store()
                            .log_event(LogLevel::Warning, "MQTT broker closed the session", LOG_SOURCE, None)
                            .await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let was_connected = self.state == ConnectionState::Connected;
                        self.state = ConnectionState::Connecting;
                        attempts += 1;

                        if was_connected {
                            warn!(error = %e, "Unexpected disconnect from MQTT broker");
                            self.bridge
                                .store()
                                .log_event(
                                    LogLevel::Warning,
                                    &format!("MQTT bridge disconnected: {e}"),
                                    LOG_SOURCE,
                                    None,
                                )
                                .await;
                        } else {
                            error!(
                                attempt = attempts,
                                max_attempts = self.max_attempts,
                                error = %e,
                                "MQTT connect attempt failed"
                            );
                        }

                        if attempts >= self.max_attempts {
                            self.bridge
                                .store()
                                .log_event(
                                    LogLevel::Error,
                                    "Max MQTT reconnect attempts reached",
                                    LOG_SOURCE,
                                    None,
                                )
                                .await;
                            return Err(anyhow!(
                                "MQTT broker unreachable after {attempts} attempts"
                            ));
                        }

                        debug!(
                            delay_secs = self.reconnect_delay.as_secs(),
                            "Retrying broker connection"
                        );
                        // A stop request must not wait out the retry delay.
                        tokio::select! {
                            _ = &mut shutdown => {
                                self.stop().await;
                                return Ok(());
                            }
                            _ = time::sleep(self.reconnect_delay) => {}
                        }
                    }
                }
            }
        }
    }

    /// Subscribe the full configured topic list. Re-subscribing an
    /// already-subscribed topic is a broker-side no-op.
    async fn subscribe_all(&self) -> Result<()> {
        for (pattern, qos) in &self.topics {
            self.client
                .subscribe(pattern.clone(), *qos)
                .await
                .with_context(|| format!("failed to queue subscription for {pattern}"))?;
            info!(topic = %pattern, qos = ?qos, "Subscribed");
        }
        Ok(())
    }

    /// User-requested stop: terminal state, broker session closed. The
    /// database pool is released by the caller afterwards.
    async fn stop(&mut self) {
        info!("Stopping MQTT bridge");
        self.state = ConnectionState::Stopped;
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect during shutdown failed");
        }
    }
}

fn to_qos(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TopicSub, ValidationRules};
    use crate::store::Store;
    use sqlx::postgres::PgPoolOptions;

    fn unreachable_settings(max_attempts: u32) -> MqttSettings {
        MqttSettings {
            // Port 1 is closed; connects are refused immediately.
            broker_host: "127.0.0.1".into(),
            broker_port: 1,
            keepalive_secs: 5,
            client_id: "bridge_test".into(),
            username: None,
            password: None,
            topics: vec![TopicSub {
                pattern: "poultry/sensors/#".into(),
                qos: 1,
            }],
            reconnect_delay_secs: 0,
            max_reconnect_attempts: max_attempts,
        }
    }

    fn lazy_bridge() -> Bridge {
        // Lazy pool: never connects unless a query runs; the audit insert on
        // the failure path fails fast under the short acquire timeout and is
        // swallowed by the store.
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(100))
            .connect_lazy("postgres://postgres@127.0.0.1:1/unused")
            .unwrap();
        Bridge::new(Store::new(pool), ValidationRules::default())
    }

    #[tokio::test]
    async fn stop_is_prompt_during_reconnect_delay() {
        // Long retry delay against a closed port: the first connect fails
        // immediately and the manager sits in its retry sleep. A shutdown
        // arriving there must stop the manager well before the delay ends.
        let mut settings = unreachable_settings(10);
        settings.reconnect_delay_secs = 60;
        let manager = ConnectionManager::new(&settings, lazy_bridge());

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            manager.run(tokio::time::sleep(Duration::from_millis(200))),
        )
        .await
        .expect("stop must not wait out the reconnect delay");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn gives_up_after_max_reconnect_attempts() {
        let manager = ConnectionManager::new(&unreachable_settings(3), lazy_bridge());
        let err = manager
            .run(std::future::pending::<()>())
            .await
            .expect_err("connect against a closed port must exhaust the retry budget");
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn qos_levels_map_onto_rumqttc() {
        assert_eq!(to_qos(0), QoS::AtMostOnce);
        assert_eq!(to_qos(1), QoS::AtLeastOnce);
        assert_eq!(to_qos(2), QoS::ExactlyOnce);
    }
}
