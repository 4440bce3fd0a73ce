use serde_json::Value;
use thiserror::Error;

use crate::config::{Bounds, ValidationRules};
use crate::db::models::NewSensorReading;

/// Why a decoded sensor payload was rejected. The message text ends up in
/// the log stream and the audit trail, so each variant reads as a sentence.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("field {0} has wrong type")]
    WrongType(&'static str),
    #[error("invalid device_id: {0}")]
    InvalidDeviceId(i64),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("invalid heater state: {0}")]
    InvalidHeaterState(i64),
}

const REQUIRED_FIELDS: [&str; 5] = ["device_id", "temperature", "humidity", "ldr", "heater"];

/// Check a decoded sensor payload against the configured rules and convert
/// it into a persistable reading. Stateless and side-effect free; fails
/// closed on any missing field, wrong type or out-of-range value.
///
/// Check order: field presence, device id membership, numeric bounds for
/// temperature/humidity/ldr, heater state in {0, 1}, then the optional
/// confidence in [0, 1].
pub fn validate_sensor_data(
    data: &Value,
    rules: &ValidationRules,
) -> Result<NewSensorReading, ValidationError> {
    for field in REQUIRED_FIELDS {
        if data.get(field).is_none() {
            return Err(ValidationError::MissingField(field));
        }
    }

    let device_id = data["device_id"]
        .as_i64()
        .ok_or(ValidationError::WrongType("device_id"))?;
    let device_id = i32::try_from(device_id)
        .map_err(|_| ValidationError::InvalidDeviceId(device_id))?;
    if !rules.device_ids.contains(&device_id) {
        return Err(ValidationError::InvalidDeviceId(device_id.into()));
    }

    let temperature = numeric_in_bounds(data, "temperature", &rules.temperature)?;
    let humidity = numeric_in_bounds(data, "humidity", &rules.humidity)?;
    let ldr = numeric_in_bounds(data, "ldr", &rules.ldr)?;

    let heater = data["heater"]
        .as_i64()
        .ok_or(ValidationError::WrongType("heater"))?;
    if heater != 0 && heater != 1 {
        return Err(ValidationError::InvalidHeaterState(heater));
    }

    let prediction_confidence = match data.get("confidence") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let confidence = value
                .as_f64()
                .ok_or(ValidationError::WrongType("confidence"))?;
            if !rules.confidence.contains(confidence) {
                return Err(ValidationError::OutOfRange {
                    field: "confidence",
                    value: confidence,
                });
            }
            Some(confidence)
        }
    };

    Ok(NewSensorReading {
        device_id,
        temperature,
        humidity,
        ldr,
        heater_state: heater as i32,
        prediction_confidence,
    })
}

fn numeric_in_bounds(
    data: &Value,
    field: &'static str,
    bounds: &Bounds,
) -> Result<f64, ValidationError> {
    let value = data[field].as_f64().ok_or(ValidationError::WrongType(field))?;
    if !bounds.contains(value) {
        return Err(ValidationError::OutOfRange { field, value });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> ValidationRules {
        ValidationRules::default()
    }

    #[test]
    fn accepts_in_bounds_payload_with_confidence() {
        let data = json!({
            "device_id": 1,
            "temperature": 26.5,
            "humidity": 80.0,
            "ldr": 50.0,
            "heater": 1,
            "confidence": 0.92
        });

        let reading = validate_sensor_data(&data, &rules()).unwrap();
        assert_eq!(reading.device_id, 1);
        assert_eq!(reading.heater_state, 1);
        assert_eq!(reading.prediction_confidence, Some(0.92));
    }

    #[test]
    fn accepts_payload_without_confidence() {
        let data = json!({
            "device_id": 2,
            "temperature": 20,
            "humidity": 50,
            "ldr": 10,
            "heater": 0
        });

        let reading = validate_sensor_data(&data, &rules()).unwrap();
        assert_eq!(reading.prediction_confidence, None);
    }

    #[test]
    fn null_confidence_is_treated_as_absent() {
        let data = json!({
            "device_id": 1,
            "temperature": 22.0,
            "humidity": 70.0,
            "ldr": 30.0,
            "heater": 0,
            "confidence": null
        });

        assert!(validate_sensor_data(&data, &rules()).is_ok());
    }

    #[test]
    fn rejects_unknown_device_id() {
        let data = json!({
            "device_id": 99,
            "temperature": 20,
            "humidity": 50,
            "ldr": 10,
            "heater": 0
        });

        assert_eq!(
            validate_sensor_data(&data, &rules()),
            Err(ValidationError::InvalidDeviceId(99))
        );
    }

    #[test]
    fn rejects_missing_field() {
        let data = json!({
            "device_id": 1,
            "temperature": 20,
            "humidity": 50,
            "heater": 0
        });

        assert_eq!(
            validate_sensor_data(&data, &rules()),
            Err(ValidationError::MissingField("ldr"))
        );
    }

    #[test]
    fn rejects_wrong_type() {
        let data = json!({
            "device_id": 1,
            "temperature": "warm",
            "humidity": 50,
            "ldr": 10,
            "heater": 0
        });

        assert_eq!(
            validate_sensor_data(&data, &rules()),
            Err(ValidationError::WrongType("temperature"))
        );
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let data = json!({
            "device_id": 1,
            "temperature": 120.0,
            "humidity": 50,
            "ldr": 10,
            "heater": 0
        });

        assert_eq!(
            validate_sensor_data(&data, &rules()),
            Err(ValidationError::OutOfRange {
                field: "temperature",
                value: 120.0
            })
        );
    }

    #[test]
    fn bounds_are_inclusive() {
        let data = json!({
            "device_id": 1,
            "temperature": 85.0,
            "humidity": 100.0,
            "ldr": 0.0,
            "heater": 1
        });

        assert!(validate_sensor_data(&data, &rules()).is_ok());
    }

    #[test]
    fn rejects_invalid_heater_state() {
        let data = json!({
            "device_id": 1,
            "temperature": 20,
            "humidity": 50,
            "ldr": 10,
            "heater": 2
        });

        assert_eq!(
            validate_sensor_data(&data, &rules()),
            Err(ValidationError::InvalidHeaterState(2))
        );
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let data = json!({
            "device_id": 1,
            "temperature": 20,
            "humidity": 50,
            "ldr": 10,
            "heater": 0,
            "confidence": 1.5
        });

        assert_eq!(
            validate_sensor_data(&data, &rules()),
            Err(ValidationError::OutOfRange {
                field: "confidence",
                value: 1.5
            })
        );
    }
}
