/// Handler category an inbound topic maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// Telemetry samples, e.g. `poultry/sensors/node1`.
    Sensor,
    /// Actuation requests, e.g. `poultry/control/heater`.
    Control,
    /// Device online/offline updates, e.g. `poultry/status/node1`.
    Status,
}

/// Classify a topic by substring match against the three handler
/// categories. `None` means the topic is unrecognized; the caller logs a
/// warning and drops the message.
pub fn classify(topic: &str) -> Option<TopicKind> {
    if topic.contains("sensors") {
        Some(TopicKind::Sensor)
    } else if topic.contains("control") {
        Some(TopicKind::Control)
    } else if topic.contains("status") {
        Some(TopicKind::Status)
    } else {
        None
    }
}
