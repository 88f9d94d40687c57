//! services/run_service.rs
//! Persistencia de runs e historial. Toda transición de un run se escribe
//! en una sola transacción junto con su entrada de historial y el estado
//! final del mensaje del outbox.

use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

use crate::errors::NotFound;
use crate::models::outbox_model::OutboxStatus;
use crate::models::run_model::{
    HistoryEntry, ListRunsQuery, RunStatus, SequenceRun, StopReason, Variant,
};
use crate::services::clock::{from_millis, to_millis};

/// Resolución de un intento de despacho
#[derive(Debug, Clone)]
pub struct OutboxResolution {
    pub outbox_id: String,
    pub status: OutboxStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

/// Nuevo estado del run + efectos que deben quedar escritos con él.
#[derive(Debug)]
pub struct RunTransition<'a> {
    pub run: &'a SequenceRun,
    pub history: Option<HistoryEntry>,
    pub outbox: Option<OutboxResolution>,
}

#[derive(Clone, Debug)]
pub struct RunService {
    db_pool: Pool<Sqlite>,
}

const RUN_COLUMNS: &str = "id, sequence_id, account_id, variables, steps, variant, \
     current_step_index, status, stop_reason, replied, unsubscribed, next_send_at, \
     created_at, updated_at";

impl RunService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        RunService { db_pool }
    }

    /// Corre migraciones con sqlx
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db_pool)
            .await
            .context("Failed to run outreach migrations")?;
        Ok(())
    }

    pub async fn insert_run(&self, run: &SequenceRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sequence_runs (
                id, sequence_id, account_id, variables, steps, variant,
                current_step_index, status, stop_reason, replied, unsubscribed,
                next_send_at, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&run.id)
        .bind(&run.sequence_id)
        .bind(&run.account_id)
        .bind(serde_json::to_string(&run.variables)?)
        .bind(serde_json::to_string(&run.steps)?)
        .bind(run.variant.as_str())
        .bind(run.current_step_index as i64)
        .bind(run.status.as_str())
        .bind(run.stop_reason.map(|r| r.as_str()))
        .bind(run.replied)
        .bind(run.unsubscribed)
        .bind(run.next_send_at.map(to_millis))
        .bind(to_millis(run.created_at))
        .bind(to_millis(run.updated_at))
        .execute(&self.db_pool)
        .await
        .context("Failed to insert sequence run")?;

        Ok(())
    }

    pub async fn find_run(&self, run_id: &str) -> Result<Option<SequenceRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM sequence_runs WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(run_id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to load sequence run")?;

        row.as_ref().map(run_from_row).transpose()
    }

    pub async fn get_run(&self, run_id: &str) -> Result<SequenceRun> {
        self.find_run(run_id)
            .await?
            .ok_or_else(|| NotFound::new("run", run_id).into())
    }

    pub async fn list_runs(&self, query: &ListRunsQuery) -> Result<Vec<SequenceRun>> {
        let sql = format!(
            r#"
            SELECT {RUN_COLUMNS} FROM sequence_runs
            WHERE (?1 IS NULL OR sequence_id = ?1)
              AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&query.sequence_id)
            .bind(&query.status)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to list sequence runs")?;

        rows.iter().map(run_from_row).collect()
    }

    /// Ids de runs `running` con `next_send_at` vacío o vencido, los más atrasados primero.
    pub async fn due_run_ids(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM sequence_runs
            WHERE status = 'running'
              AND (next_send_at IS NULL OR next_send_at <= ?1)
            ORDER BY COALESCE(next_send_at, 0), created_at
            LIMIT ?2
            "#,
        )
        .bind(to_millis(now))
        .bind(limit as i64)
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to select due runs")?;

        Ok(ids)
    }

    pub async fn history(&self, run_id: &str) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_id, step_index, step_kind, outbox_id, success, error, created_at
            FROM run_history
            WHERE run_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to load run history")?;

        rows.iter().map(history_from_row).collect()
    }

    /// Intentos fallidos registrados para un paso. El historial es la fuente de verdad.
    pub async fn failed_attempts(&self, run_id: &str, step_index: usize) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM run_history WHERE run_id = ?1 AND step_index = ?2 AND success = 0",
        )
        .bind(run_id)
        .bind(step_index as i64)
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to count failed attempts")?;

        Ok(count as u32)
    }

    /// Escribe el nuevo estado del run, el historial y el outbox de forma atómica.
    pub async fn commit_transition(&self, transition: RunTransition<'_>) -> Result<()> {
        let run = transition.run;
        let mut tx = self
            .db_pool
            .begin()
            .await
            .context("Failed to open transaction")?;

        let result = sqlx::query(
            r#"
            UPDATE sequence_runs
            SET current_step_index = ?2,
                status = ?3,
                stop_reason = ?4,
                replied = ?5,
                unsubscribed = ?6,
                next_send_at = ?7,
                updated_at = ?8
            WHERE id = ?1
            "#,
        )
        .bind(&run.id)
        .bind(run.current_step_index as i64)
        .bind(run.status.as_str())
        .bind(run.stop_reason.map(|r| r.as_str()))
        .bind(run.replied)
        .bind(run.unsubscribed)
        .bind(run.next_send_at.map(to_millis))
        .bind(to_millis(run.updated_at))
        .execute(&mut *tx)
        .await
        .context("Failed to update sequence run")?;

        if result.rows_affected() == 0 {
            return Err(NotFound::new("run", run.id.clone()).into());
        }

        if let Some(entry) = &transition.history {
            sqlx::query(
                r#"
                INSERT INTO run_history (
                    id, run_id, step_index, step_kind, outbox_id, success, error, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.run_id)
            .bind(entry.step_index as i64)
            .bind(&entry.step_kind)
            .bind(&entry.outbox_id)
            .bind(entry.success)
            .bind(&entry.error)
            .bind(to_millis(entry.created_at))
            .execute(&mut *tx)
            .await
            .context("Failed to append run history")?;
        }

        if let Some(outbox) = &transition.outbox {
            sqlx::query(
                r#"
                UPDATE outbox_messages
                SET status = ?2, provider_message_id = ?3, error = ?4, updated_at = ?5
                WHERE id = ?1
                "#,
            )
            .bind(&outbox.outbox_id)
            .bind(outbox.status.as_str())
            .bind(&outbox.provider_message_id)
            .bind(&outbox.error)
            .bind(to_millis(run.updated_at))
            .execute(&mut *tx)
            .await
            .context("Failed to resolve outbox message")?;
        }

        tx.commit().await.context("Failed to commit run transition")?;
        Ok(())
    }
}

fn run_from_row(row: &SqliteRow) -> Result<SequenceRun> {
    let variables = serde_json::from_str(&row.try_get::<String, _>("variables")?)
        .context("Stored run variables are not valid JSON")?;
    let steps = serde_json::from_str(&row.try_get::<String, _>("steps")?)
        .context("Stored run steps are not valid JSON")?;
    let variant = Variant::from_str(&row.try_get::<String, _>("variant")?).map_err(|e| anyhow!(e))?;
    let status = RunStatus::from_str(&row.try_get::<String, _>("status")?).map_err(|e| anyhow!(e))?;
    let stop_reason = row
        .try_get::<Option<String>, _>("stop_reason")?
        .map(|raw| StopReason::from_str(&raw).map_err(|e| anyhow!(e)))
        .transpose()?;
    let next_send_at = row
        .try_get::<Option<i64>, _>("next_send_at")?
        .map(from_millis)
        .transpose()?;
    let index: i64 = row.try_get("current_step_index")?;

    Ok(SequenceRun {
        id: row.try_get("id")?,
        sequence_id: row.try_get("sequence_id")?,
        account_id: row.try_get("account_id")?,
        variables,
        steps,
        variant,
        current_step_index: index.max(0) as usize,
        status,
        stop_reason,
        replied: row.try_get("replied")?,
        unsubscribed: row.try_get("unsubscribed")?,
        next_send_at,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<HistoryEntry> {
    let step_index: i64 = row.try_get("step_index")?;
    Ok(HistoryEntry {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        step_index: step_index.max(0) as usize,
        step_kind: row.try_get("step_kind")?,
        outbox_id: row.try_get("outbox_id")?,
        success: row.try_get("success")?,
        error: row.try_get("error")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}
