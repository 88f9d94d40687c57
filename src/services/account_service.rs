//! services/account_service.rs

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::errors::NotFound;
use crate::models::account_model::{Account, CreateAccountRequest, Credential, ProviderKind};
use crate::services::clock::{from_millis, to_millis};

#[derive(Clone, Debug)]
pub struct AccountService {
    db_pool: Pool<Sqlite>,
}

impl AccountService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        AccountService { db_pool }
    }

    pub async fn create_account(&self, req: CreateAccountRequest) -> Result<Account> {
        let account = Account {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            from_address: req.from_address,
            from_name: req.from_name,
            provider: req.credential.provider(),
            credential: req.credential,
            dry_run: req.dry_run,
            created_at: chrono::Utc::now(),
        };
        let credential_json =
            serde_json::to_string(&account.credential).context("Failed to encode credential")?;

        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, name, from_address, from_name, provider, credential, dry_run, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&account.id)
        .bind(&account.name)
        .bind(&account.from_address)
        .bind(&account.from_name)
        .bind(account.provider.as_str())
        .bind(credential_json)
        .bind(account.dry_run)
        .bind(to_millis(account.created_at))
        .execute(&self.db_pool)
        .await
        .context("Failed to insert account")?;

        Ok(account)
    }

    pub async fn find_account(&self, account_id: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, from_address, from_name, credential, dry_run, created_at
            FROM accounts
            WHERE id = ?1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Failed to load account")?;

        row.as_ref().map(account_from_row).transpose()
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Account> {
        self.find_account(account_id)
            .await?
            .ok_or_else(|| NotFound::new("account", account_id).into())
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, from_address, from_name, credential, dry_run, created_at
            FROM accounts
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(account_from_row).collect()
    }

    pub async fn delete_account(&self, account_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?1")
            .bind(account_id)
            .execute(&self.db_pool)
            .await
            .context("Failed to delete account")?;
        if result.rows_affected() == 0 {
            return Err(NotFound::new("account", account_id).into());
        }
        Ok(())
    }
}

fn account_from_row(row: &SqliteRow) -> Result<Account> {
    let credential: Credential = serde_json::from_str(&row.try_get::<String, _>("credential")?)
        .context("Stored credential is not valid JSON")?;
    let provider: ProviderKind = credential.provider();

    Ok(Account {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        from_address: row.try_get("from_address")?,
        from_name: row.try_get("from_name")?,
        provider,
        credential,
        dry_run: row.try_get("dry_run")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}
