//! services/template_service.rs

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::errors::NotFound;
use crate::models::template_model::{PreviewRequest, RenderedMessage, Template, TemplateRequest};
use crate::services::clock::{from_millis, to_millis};
use crate::services::{template_renderer, tracking};

#[derive(Clone, Debug)]
pub struct TemplateService {
    db_pool: Pool<Sqlite>,
}

impl TemplateService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        TemplateService { db_pool }
    }

    pub async fn create_template(&self, req: TemplateRequest) -> Result<Template> {
        let now = Utc::now();
        let template = Template {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            subject: req.subject,
            body: req.body,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO templates (id, name, subject, body, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
        )
        .bind(&template.id)
        .bind(&template.name)
        .bind(&template.subject)
        .bind(&template.body)
        .bind(to_millis(now))
        .execute(&self.db_pool)
        .await
        .context("Failed to insert template")?;

        Ok(template)
    }

    pub async fn update_template(&self, template_id: &str, req: TemplateRequest) -> Result<Template> {
        let result = sqlx::query(
            r#"
            UPDATE templates
            SET name = ?2, subject = ?3, body = ?4, updated_at = ?5
            WHERE id = ?1
            "#,
        )
        .bind(template_id)
        .bind(&req.name)
        .bind(&req.subject)
        .bind(&req.body)
        .bind(to_millis(Utc::now()))
        .execute(&self.db_pool)
        .await
        .context("Failed to update template")?;

        if result.rows_affected() == 0 {
            return Err(NotFound::new("template", template_id).into());
        }
        self.get_template(template_id).await
    }

    pub async fn find_template(&self, template_id: &str) -> Result<Option<Template>> {
        let row = sqlx::query(
            "SELECT id, name, subject, body, created_at, updated_at FROM templates WHERE id = ?1",
        )
        .bind(template_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Failed to load template")?;

        row.as_ref().map(template_from_row).transpose()
    }

    pub async fn get_template(&self, template_id: &str) -> Result<Template> {
        self.find_template(template_id)
            .await?
            .ok_or_else(|| NotFound::new("template", template_id).into())
    }

    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        let rows = sqlx::query(
            "SELECT id, name, subject, body, created_at, updated_at FROM templates ORDER BY name",
        )
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to list templates")?;

        rows.iter().map(template_from_row).collect()
    }

    pub async fn delete_template(&self, template_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM templates WHERE id = ?1")
            .bind(template_id)
            .execute(&self.db_pool)
            .await
            .context("Failed to delete template")?;
        if result.rows_affected() == 0 {
            return Err(NotFound::new("template", template_id).into());
        }
        Ok(())
    }

    /// Render sin tracking (el pixel queda como placeholder estático).
    pub async fn preview(&self, template_id: &str, req: PreviewRequest) -> Result<RenderedMessage> {
        let template = self.get_template(template_id).await?;
        let mut rendered = template_renderer::render(&template, &req.variables);
        rendered.html = tracking::instrument(&rendered.html, None, "");
        Ok(rendered)
    }
}

fn template_from_row(row: &SqliteRow) -> Result<Template> {
    Ok(Template {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}
