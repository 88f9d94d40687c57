//! services/sequence_service.rs
//! Persistencia de secuencias. Los pasos y reglas se guardan como JSON.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::errors::{Conflict, Invalid, NotFound};
use crate::models::sequence_model::{Sequence, SequenceRequest};
use crate::services::clock::{from_millis, to_millis};

#[derive(Clone, Debug)]
pub struct SequenceService {
    db_pool: Pool<Sqlite>,
}

impl SequenceService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        SequenceService { db_pool }
    }

    pub async fn create_sequence(&self, req: SequenceRequest) -> Result<Sequence> {
        req.validate().map_err(Invalid)?;
        let now = Utc::now();
        let sequence = Sequence {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            steps: req.steps,
            rules: req.rules,
            ab_split_percent: req.ab_split_percent,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO sequences (id, name, steps, rules, ab_split_percent, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
        )
        .bind(&sequence.id)
        .bind(&sequence.name)
        .bind(serde_json::to_string(&sequence.steps)?)
        .bind(serde_json::to_string(&sequence.rules)?)
        .bind(sequence.ab_split_percent.map(i64::from))
        .bind(to_millis(now))
        .execute(&self.db_pool)
        .await
        .context("Failed to insert sequence")?;

        log::info!(
            "(create_sequence) Secuencia '{}' creada con {} pasos (id={})",
            sequence.name,
            sequence.steps.len(),
            sequence.id
        );
        Ok(sequence)
    }

    /// Reemplaza la definición. Los runs en curso no se ven afectados:
    /// cada run conserva la copia de pasos tomada al crearse.
    pub async fn update_sequence(&self, sequence_id: &str, req: SequenceRequest) -> Result<Sequence> {
        req.validate().map_err(Invalid)?;
        let result = sqlx::query(
            r#"
            UPDATE sequences
            SET name = ?2, steps = ?3, rules = ?4, ab_split_percent = ?5, updated_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(sequence_id)
        .bind(&req.name)
        .bind(serde_json::to_string(&req.steps)?)
        .bind(serde_json::to_string(&req.rules)?)
        .bind(req.ab_split_percent.map(i64::from))
        .bind(to_millis(Utc::now()))
        .execute(&self.db_pool)
        .await
        .context("Failed to update sequence")?;

        if result.rows_affected() == 0 {
            return Err(NotFound::new("sequence", sequence_id).into());
        }
        self.get_sequence(sequence_id).await
    }

    pub async fn find_sequence(&self, sequence_id: &str) -> Result<Option<Sequence>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, steps, rules, ab_split_percent, created_at, updated_at
            FROM sequences
            WHERE id = ?1
            "#,
        )
        .bind(sequence_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Failed to load sequence")?;

        row.as_ref().map(sequence_from_row).transpose()
    }

    pub async fn get_sequence(&self, sequence_id: &str) -> Result<Sequence> {
        self.find_sequence(sequence_id)
            .await?
            .ok_or_else(|| NotFound::new("sequence", sequence_id).into())
    }

    pub async fn list_sequences(&self) -> Result<Vec<Sequence>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, steps, rules, ab_split_percent, created_at, updated_at
            FROM sequences
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to list sequences")?;

        rows.iter().map(sequence_from_row).collect()
    }

    /// Se rechaza si algún run no terminal la referencia.
    pub async fn delete_sequence(&self, sequence_id: &str) -> Result<()> {
        let active: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sequence_runs
            WHERE sequence_id = ?1 AND status IN ('running', 'awaiting_task')
            "#,
        )
        .bind(sequence_id)
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to count active runs")?;

        if active > 0 {
            return Err(Conflict(format!(
                "sequence {sequence_id} still has {active} active run(s)"
            ))
            .into());
        }

        let result = sqlx::query("DELETE FROM sequences WHERE id = ?1")
            .bind(sequence_id)
            .execute(&self.db_pool)
            .await
            .context("Failed to delete sequence")?;
        if result.rows_affected() == 0 {
            return Err(NotFound::new("sequence", sequence_id).into());
        }
        Ok(())
    }
}

fn sequence_from_row(row: &SqliteRow) -> Result<Sequence> {
    let steps = serde_json::from_str(&row.try_get::<String, _>("steps")?)
        .context("Stored steps are not valid JSON")?;
    let rules = serde_json::from_str(&row.try_get::<String, _>("rules")?)
        .context("Stored rules are not valid JSON")?;
    let ab_split: Option<i64> = row.try_get("ab_split_percent")?;

    Ok(Sequence {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        steps,
        rules,
        ab_split_percent: ab_split.map(|v| v.clamp(0, 100) as u8),
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}
