//! services/outbox_service.rs
//! Registro de auditoría de intentos de envío y contadores de tracking.

use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

use crate::models::outbox_model::{OutboxMessage, OutboxStatus, SendCounts};
use crate::services::clock::{from_millis, to_millis};
use crate::services::send_window::start_of_day;

const OUTBOX_COLUMNS: &str = "id, run_id, step_index, account_id, recipient, subject, html, text, \
     status, provider_message_id, error, tracking_id, pixel_url, open_count, click_count, \
     first_opened_at, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct OutboxService {
    db_pool: Pool<Sqlite>,
}

impl OutboxService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        OutboxService { db_pool }
    }

    pub async fn insert_message(&self, message: &OutboxMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (
                id, run_id, step_index, account_id, recipient, subject, html, text,
                status, provider_message_id, error, tracking_id, pixel_url,
                open_count, click_count, first_opened_at, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, 0, NULL, ?14, ?14)
            "#,
        )
        .bind(&message.id)
        .bind(&message.run_id)
        .bind(message.step_index as i64)
        .bind(&message.account_id)
        .bind(&message.recipient)
        .bind(&message.subject)
        .bind(&message.html)
        .bind(&message.text)
        .bind(message.status.as_str())
        .bind(&message.provider_message_id)
        .bind(&message.error)
        .bind(&message.tracking_id)
        .bind(&message.pixel_url)
        .bind(to_millis(message.created_at))
        .execute(&self.db_pool)
        .await
        .context("Failed to insert outbox message")?;

        Ok(())
    }

    pub async fn list_for_run(&self, run_id: &str) -> Result<Vec<OutboxMessage>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_messages WHERE run_id = ?1 ORDER BY created_at, rowid"
        );
        let rows = sqlx::query(&sql)
            .bind(run_id)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to list outbox messages")?;

        rows.iter().map(outbox_from_row).collect()
    }

    pub async fn find_by_tracking_id(&self, tracking_id: &str) -> Result<Option<OutboxMessage>> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox_messages WHERE tracking_id = ?1");
        let row = sqlx::query(&sql)
            .bind(tracking_id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to load outbox message by tracking id")?;

        row.as_ref().map(outbox_from_row).transpose()
    }

    /// Envíos de la cuenta (pending/scheduled/sent) hoy y en la última hora.
    pub async fn send_counts(&self, account_id: &str, now: DateTime<Utc>) -> Result<SendCounts> {
        let today: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM outbox_messages
            WHERE account_id = ?1
              AND status IN ('pending', 'scheduled', 'sent')
              AND created_at >= ?2
            "#,
        )
        .bind(account_id)
        .bind(to_millis(start_of_day(now)))
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to count today's sends")?;

        let hour_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total, MIN(created_at) AS oldest
            FROM outbox_messages
            WHERE account_id = ?1
              AND status IN ('pending', 'scheduled', 'sent')
              AND created_at > ?2
            "#,
        )
        .bind(account_id)
        .bind(to_millis(now - Duration::hours(1)))
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to count last hour sends")?;

        let last_hour: i64 = hour_row.try_get("total")?;
        let oldest = hour_row
            .try_get::<Option<i64>, _>("oldest")?
            .map(from_millis)
            .transpose()?;

        Ok(SendCounts {
            today: today as u32,
            last_hour: last_hour as u32,
            oldest_in_last_hour: oldest,
        })
    }

    /// Marca como `failed` los mensajes de un paso que quedaron sin resolver
    /// (sin entrada de historial), p.e. por una caída durante el despacho.
    pub async fn fail_orphans(
        &self,
        run_id: &str,
        step_index: usize,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'failed',
                error = 'interrupted before the attempt was resolved',
                updated_at = ?3
            WHERE run_id = ?1
              AND step_index = ?2
              AND status IN ('pending', 'scheduled')
              AND id NOT IN (
                  SELECT outbox_id FROM run_history
                  WHERE run_id = ?1 AND outbox_id IS NOT NULL
              )
            "#,
        )
        .bind(run_id)
        .bind(step_index as i64)
        .bind(to_millis(now))
        .execute(&self.db_pool)
        .await
        .context("Failed to recover orphan outbox messages")?;

        Ok(result.rows_affected())
    }

    /// Registra una apertura. Devuelve false si el tracking id no existe.
    pub async fn record_open(&self, tracking_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET open_count = open_count + 1,
                first_opened_at = COALESCE(first_opened_at, ?2)
            WHERE tracking_id = ?1
            "#,
        )
        .bind(tracking_id)
        .bind(to_millis(now))
        .execute(&self.db_pool)
        .await
        .context("Failed to record open")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn record_click(&self, tracking_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE outbox_messages SET click_count = click_count + 1 WHERE tracking_id = ?1",
        )
        .bind(tracking_id)
        .execute(&self.db_pool)
        .await
        .context("Failed to record click")?;

        Ok(result.rows_affected() > 0)
    }
}

fn outbox_from_row(row: &SqliteRow) -> Result<OutboxMessage> {
    let status =
        OutboxStatus::from_str(&row.try_get::<String, _>("status")?).map_err(|e| anyhow!(e))?;
    let step_index: i64 = row.try_get("step_index")?;
    let first_opened_at = row
        .try_get::<Option<i64>, _>("first_opened_at")?
        .map(from_millis)
        .transpose()?;

    Ok(OutboxMessage {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        step_index: step_index.max(0) as usize,
        account_id: row.try_get("account_id")?,
        recipient: row.try_get("recipient")?,
        subject: row.try_get("subject")?,
        html: row.try_get("html")?,
        text: row.try_get("text")?,
        status,
        provider_message_id: row.try_get("provider_message_id")?,
        error: row.try_get("error")?,
        tracking_id: row.try_get("tracking_id")?,
        pixel_url: row.try_get("pixel_url")?,
        open_count: row.try_get("open_count")?,
        click_count: row.try_get("click_count")?,
        first_opened_at,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}
