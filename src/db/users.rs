use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::User;

use super::conflict_on_unique;
use super::row_helpers::map_user_row;

/// User database operations
pub struct UserRepo;

impl UserRepo {
    pub async fn create(pool: &Pool<Sqlite>, username: &str) -> Result<User> {
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO users (id, username, created_at) VALUES (?, ?, ?)")
            .bind(&user.id)
            .bind(&user.username)
            .bind(user.created_at)
            .execute(pool)
            .await
            .map_err(|e| conflict_on_unique(e, || format!("User {} already exists", username)))?;
        Ok(user)
    }

    pub async fn get(pool: &Pool<Sqlite>, id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, created_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_user_row))
    }

    pub async fn get_by_username(pool: &Pool<Sqlite>, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, created_at FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_user_row))
    }

    pub async fn list(pool: &Pool<Sqlite>) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT id, username, created_at FROM users ORDER BY username")
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_user_row).collect())
    }
}
