use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, error, info};

use crate::db::models::{DeviceStatus, LogLevel, NewControlCommand, NewSensorReading};

/// Pooled persistence operations. Every method checks a connection out of the
/// pool for the duration of one call and commits (or rolls back) atomically;
/// there is no transaction spanning multiple inbound messages.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the device row or refresh status/last_seen if the id already
    /// exists. Last writer wins; safe to call concurrently for the same id.
    pub async fn upsert_device(
        &self,
        device_id: i32,
        device_name: Option<&str>,
        status: DeviceStatus,
    ) -> Result<()> {
        let name = match device_name {
            Some(name) => name.to_owned(),
            None => format!("Device_{device_id}"),
        };

        sqlx::query(
            r#"
            INSERT INTO devices (device_id, device_name, status, last_seen)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (device_id) DO UPDATE SET
                status = EXCLUDED.status,
                last_seen = NOW()
            "#,
        )
        .bind(device_id)
        .bind(&name)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .context("device upsert failed")?;

        debug!(device_id, status = %status, "Device upserted");
        Ok(())
    }

    /// Persist one validated sensor sample. The referenced device is upserted
    /// (marked online, last_seen refreshed) in the same transaction, so the
    /// foreign key always holds. Returns the generated reading id.
    pub async fn insert_sensor_reading(&self, reading: &NewSensorReading) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO devices (device_id, device_name, status, last_seen)
            VALUES ($1, $2, 'online', NOW())
            ON CONFLICT (device_id) DO UPDATE SET
                status = 'online',
                last_seen = NOW()
            "#,
        )
        .bind(reading.device_id)
        .bind(format!("Device_{}", reading.device_id))
        .execute(&mut *tx)
        .await
        .context("device upsert failed")?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sensor_readings
                (device_id, temperature, humidity, ldr, heater_state, prediction_confidence)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(reading.device_id)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.ldr)
        .bind(reading.heater_state)
        .bind(reading.prediction_confidence)
        .fetch_one(&mut *tx)
        .await
        .context("sensor reading insert failed")?;

        tx.commit().await?;

        info!(
            reading_id = id,
            device_id = reading.device_id,
            temperature = reading.temperature,
            humidity = reading.humidity,
            heater = reading.heater_state,
            "Sensor reading stored"
        );
        Ok(id)
    }

    /// Insert a control command with `executed = false`. Returns the
    /// generated command id. The device row is not created here; an unknown
    /// device id surfaces as a foreign-key error to the caller.
    pub async fn insert_control_command(&self, cmd: &NewControlCommand) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO control_commands (device_id, command_type, command_value, source)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(cmd.device_id)
        .bind(&cmd.command_type)
        .bind(cmd.command_value)
        .bind(&cmd.source)
        .fetch_one(&self.pool)
        .await
        .context("control command insert failed")?;

        info!(
            command_id = id,
            device_id = cmd.device_id,
            command = %cmd.command_type,
            value = cmd.command_value,
            "Control command stored"
        );
        Ok(id)
    }

    /// Best-effort audit-trail insert. Failure here is logged locally and
    /// swallowed so it can never mask or block the primary write it
    /// describes.
    pub async fn log_event(
        &self,
        level: LogLevel,
        message: &str,
        source: &str,
        details: Option<&Value>,
    ) {
        let details = details.map(|d| d.to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO system_logs (log_level, message, source, details)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(level.as_str())
        .bind(message)
        .bind(source)
        .bind(details)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!(error = %e, "Failed to write audit-log entry");
        }
    }
}
