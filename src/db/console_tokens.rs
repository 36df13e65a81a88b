use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};

use crate::models::ConsoleToken;

use super::row_helpers::map_console_token_row;

/// Console token database operations
pub struct ConsoleTokenRepo;

impl ConsoleTokenRepo {
    pub async fn create(pool: &Pool<Sqlite>, token: &ConsoleToken) -> Result<()> {
        let command_json = serde_json::to_string(&token.command)?;
        sqlx::query(
            r#"
            INSERT INTO console_tokens (token, machine_id, user_id, command_response, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&token.token)
        .bind(token.machine_id)
        .bind(&token.user_id)
        .bind(&command_json)
        .bind(token.created_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get(pool: &Pool<Sqlite>, token: &str) -> Result<Option<ConsoleToken>> {
        let row = sqlx::query(
            "SELECT token, machine_id, user_id, command_response, created_at FROM console_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(pool)
        .await?;
        row.as_ref().map(map_console_token_row).transpose()
    }

    pub async fn purge(pool: &Pool<Sqlite>, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM console_tokens WHERE created_at <= ?")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
