use std::collections::HashSet;

use anyhow::{Context, Result};

// ---------------------------------------------------------------------------
// Bounds / ValidationRules
// ---------------------------------------------------------------------------

/// Inclusive numeric range a sensor field must fall into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Per-field validation table applied to every inbound sensor payload.
///
/// Defaults mirror the deployed field-node hardware: DHT22 operating range
/// for temperature, percentage scales for humidity and light level, and a
/// three-node installation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRules {
    pub device_ids: HashSet<i32>,
    pub temperature: Bounds,
    pub humidity: Bounds,
    pub ldr: Bounds,
    pub confidence: Bounds,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            device_ids: [1, 2, 3].into_iter().collect(),
            temperature: Bounds { min: -40.0, max: 85.0 },
            humidity: Bounds { min: 0.0, max: 100.0 },
            ldr: Bounds { min: 0.0, max: 100.0 },
            confidence: Bounds { min: 0.0, max: 1.0 },
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT settings
// ---------------------------------------------------------------------------

/// One subscription entry: topic pattern (wildcards allowed) plus requested
/// QoS level (0, 1 or 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSub {
    pub pattern: String,
    pub qos: u8,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker_host: String,
    pub broker_port: u16,
    pub keepalive_secs: u64,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topics: Vec<TopicSub>,
    /// Fixed delay between broker connect attempts, in seconds.
    pub reconnect_delay_secs: u64,
    /// Connect attempts before the bridge gives up and exits non-zero.
    pub max_reconnect_attempts: u32,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub mqtt: MqttSettings,
    pub rules: ValidationRules,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let rules = rules_from_env()?;

        let mqtt = MqttSettings {
            broker_host: optional("MQTT_BROKER_HOST", "localhost"),
            broker_port: optional("MQTT_BROKER_PORT", "1883")
                .parse()
                .context("MQTT_BROKER_PORT must be a valid port number")?,
            keepalive_secs: optional("MQTT_KEEPALIVE_SECS", "60")
                .parse()
                .context("MQTT_KEEPALIVE_SECS must be a positive integer")?,
            client_id: optional("MQTT_CLIENT_ID", "poultry_mqtt_bridge"),
            username: std::env::var("MQTT_USERNAME").ok(),
            password: std::env::var("MQTT_PASSWORD").ok(),
            topics: parse_topics(&optional(
                "MQTT_TOPICS",
                "poultry/sensors/#:1,poultry/control/#:1,poultry/status/#:1",
            ))?,
            reconnect_delay_secs: optional("MQTT_RECONNECT_DELAY_SECS", "5")
                .parse()
                .context("MQTT_RECONNECT_DELAY_SECS must be an integer")?,
            max_reconnect_attempts: optional("MQTT_MAX_RECONNECT_ATTEMPTS", "10")
                .parse()
                .context("MQTT_MAX_RECONNECT_ATTEMPTS must be a positive integer")?,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_max_connections: optional("DB_MAX_CONNECTIONS", "5")
                .parse()
                .context("DB_MAX_CONNECTIONS must be a positive integer")?,
            mqtt,
            rules,
        })
    }
}

/// Assemble the validation table from the environment; every field bound is
/// overridable with a `min:max` env var.
fn rules_from_env() -> Result<ValidationRules> {
    Ok(ValidationRules {
        device_ids: parse_device_ids(&optional("VALID_DEVICE_IDS", "1,2,3"))?,
        temperature: parse_bounds(&optional("TEMPERATURE_BOUNDS", "-40:85"))
            .context("invalid TEMPERATURE_BOUNDS")?,
        humidity: parse_bounds(&optional("HUMIDITY_BOUNDS", "0:100"))
            .context("invalid HUMIDITY_BOUNDS")?,
        ldr: parse_bounds(&optional("LDR_BOUNDS", "0:100")).context("invalid LDR_BOUNDS")?,
        confidence: parse_bounds(&optional("CONFIDENCE_BOUNDS", "0:1"))
            .context("invalid CONFIDENCE_BOUNDS")?,
    })
}

/// Parse `"topic:qos,topic:qos"` into the subscription list.
fn parse_topics(raw: &str) -> Result<Vec<TopicSub>> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (pattern, qos) = entry.rsplit_once(':').with_context(|| {
                format!("MQTT_TOPICS entry must be 'topic:qos', got: {entry:?}")
            })?;
            let qos: u8 = qos
                .trim()
                .parse()
                .with_context(|| format!("non-numeric QoS in MQTT_TOPICS entry {entry:?}"))?;
            if qos > 2 {
                anyhow::bail!("QoS must be 0, 1 or 2 in MQTT_TOPICS entry {entry:?}");
            }
            Ok(TopicSub {
                pattern: pattern.trim().to_owned(),
                qos,
            })
        })
        .collect()
}

/// Parse `"1,2,3"` into the set of device ids the validator accepts.
fn parse_device_ids(raw: &str) -> Result<HashSet<i32>> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|id| {
            id.trim()
                .parse::<i32>()
                .with_context(|| format!("non-numeric device id in VALID_DEVICE_IDS: {id:?}"))
        })
        .collect()
}

/// Parse `"min:max"` into an inclusive `Bounds`.
fn parse_bounds(raw: &str) -> Result<Bounds> {
    let (min, max) = raw
        .split_once(':')
        .with_context(|| format!("bounds must be 'min:max', got: {raw:?}"))?;
    let min: f64 = min.trim().parse().context("non-numeric lower bound")?;
    let max: f64 = max.trim().parse().context("non-numeric upper bound")?;
    if min > max {
        anyhow::bail!("lower bound {min} exceeds upper bound {max}");
    }
    Ok(Bounds { min, max })
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_topics_with_wildcards_and_qos() {
        let topics = parse_topics("poultry/sensors/#:1,poultry/control/#:0").unwrap();
        assert_eq!(
            topics,
            vec![
                TopicSub {
                    pattern: "poultry/sensors/#".into(),
                    qos: 1
                },
                TopicSub {
                    pattern: "poultry/control/#".into(),
                    qos: 0
                },
            ]
        );
    }

    #[test]
    fn parse_topics_rejects_bad_qos() {
        let err = parse_topics("poultry/sensors/#:7").unwrap_err();
        assert!(err.to_string().contains("QoS must be 0, 1 or 2"));
    }

    #[test]
    fn parse_topics_rejects_missing_qos() {
        let err = parse_topics("poultry/sensors/#").unwrap_err();
        assert!(err.to_string().contains("'topic:qos'"));
    }

    #[test]
    fn parse_device_ids_defaults() {
        let ids = parse_device_ids("1,2,3").unwrap();
        assert_eq!(ids, [1, 2, 3].into_iter().collect());
    }

    #[test]
    fn parse_device_ids_rejects_garbage() {
        assert!(parse_device_ids("1,two").is_err());
    }

    #[test]
    fn parse_bounds_inclusive() {
        let b = parse_bounds("-40:85").unwrap();
        assert!(b.contains(-40.0));
        assert!(b.contains(85.0));
        assert!(!b.contains(85.1));
    }

    #[test]
    fn parse_bounds_rejects_inverted_range() {
        assert!(parse_bounds("10:-10").is_err());
    }

    #[test]
    fn rules_from_env_defaults_and_overrides() {
        // One test so the env mutation cannot race a parallel reader.
        let rules = rules_from_env().unwrap();
        assert_eq!(rules, ValidationRules::default());

        std::env::set_var("CONFIDENCE_BOUNDS", "0.5:1");
        let rules = rules_from_env().unwrap();
        std::env::remove_var("CONFIDENCE_BOUNDS");
        assert_eq!(rules.confidence, Bounds { min: 0.5, max: 1.0 });
    }
}
