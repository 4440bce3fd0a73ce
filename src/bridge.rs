use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::ValidationRules;
use crate::db::models::{DeviceStatus, LogLevel, NewControlCommand};
use crate::router::{self, TopicKind};
use crate::store::Store;
use crate::validator;

/// Source tag written into `system_logs` rows produced by this process.
pub const LOG_SOURCE: &str = "mqtt_bridge";

/// Composes router, validator and store into the per-message pipeline:
/// decode → classify → validate → persist. Every failure mode is logged and
/// the message dropped; nothing here is retried and nothing is fatal to the
/// service.
pub struct Bridge {
    store: Store,
    rules: ValidationRules,
}

impl Bridge {
    pub fn new(store: Store, rules: ValidationRules) -> Self {
        Self { store, rules }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Handle one inbound publish. Called sequentially from the connection
    /// manager's event loop; each message gets exactly one best-effort
    /// attempt.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        debug!(topic = %topic, len = payload.len(), "Message received");

        let data: Value = match serde_json::from_slice(payload) {
            Ok(data) => data,
            Err(e) => {
                error!(topic = %topic, error = %e, "Invalid JSON payload; dropping message");
                return;
            }
        };

        match router::classify(topic) {
            Some(TopicKind::Sensor) => self.handle_sensor(topic, &data).await,
            Some(TopicKind::Control) => self.handle_control(topic, &data).await,
            Some(TopicKind::Status) => self.handle_status(topic, &data).await,
            None => warn!(topic = %topic, "Unrecognized topic; dropping message"),
        }
    }

    async fn handle_sensor(&self, topic: &str, data: &Value) {
        let reading = match validator::validate_sensor_data(data, &self.rules) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(topic = %topic, reason = %e, "Sensor payload rejected");
                self.store
                    .log_event(
                        LogLevel::Warning,
                        &format!("Data validation failed: {e}"),
                        LOG_SOURCE,
                        Some(data),
                    )
                    .await;
                return;
            }
        };

        if let Err(e) = self.store.insert_sensor_reading(&reading).await {
            error!(topic = %topic, error = %e, "Failed to store sensor reading");
            self.store
                .log_event(
                    LogLevel::Error,
                    &format!("Failed to store sensor reading: {e}"),
                    LOG_SOURCE,
                    None,
                )
                .await;
        }
    }

    async fn handle_control(&self, topic: &str, data: &Value) {
        // Field presence only; command payloads carry no range rules.
        let Some(cmd) = parse_control_command(data) else {
            error!(topic = %topic, payload = %data, "Missing required fields in control command");
            return;
        };

        if let Err(e) = self.store.insert_control_command(&cmd).await {
            error!(topic = %topic, error = %e, "Failed to store control command");
            self.store
                .log_event(
                    LogLevel::Error,
                    &format!("Failed to store control command: {e}"),
                    LOG_SOURCE,
                    None,
                )
                .await;
        }
    }

    async fn handle_status(&self, topic: &str, data: &Value) {
        let Some(update) = parse_status_update(data) else {
            error!(topic = %topic, payload = %data, "Invalid status update");
            return;
        };

        let result = self
            .store
            .upsert_device(update.device_id, update.name.as_deref(), update.status)
            .await;
        if let Err(e) = result {
            error!(topic = %topic, error = %e, "Failed to update device status");
        }
    }
}

/// Wire shape of a control-topic payload. Required fields only; anything
/// extra in the object is ignored.
#[derive(Debug, Deserialize)]
struct ControlPayload {
    device_id: i32,
    command: String,
    value: i64,
    #[serde(default = "default_source")]
    source: String,
}

fn default_source() -> String {
    "mqtt".to_owned()
}

/// Wire shape of a status-topic payload. `status` must be one of the
/// statuses named in the data model (`online`/`offline`); a `name` field,
/// when present, becomes the display name on first sighting.
#[derive(Debug, PartialEq, Eq, Deserialize)]
struct StatusUpdate {
    device_id: i32,
    status: DeviceStatus,
    #[serde(default)]
    name: Option<String>,
}

/// Extract a control command if the required fields `device_id`, `command`
/// and `value` are present with usable types; `source` defaults to "mqtt".
fn parse_control_command(data: &Value) -> Option<NewControlCommand> {
    let payload: ControlPayload = serde_json::from_value(data.clone()).ok()?;
    Some(NewControlCommand {
        device_id: payload.device_id,
        command_type: payload.command,
        command_value: payload.value,
        source: payload.source,
    })
}

fn parse_status_update(data: &Value) -> Option<StatusUpdate> {
    serde_json::from_value(data.clone()).ok()
}
