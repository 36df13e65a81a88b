use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::Assignment;

use super::conflict_on_unique;
use super::row_helpers::map_assignment_row;

/// Assignment database operations
pub struct AssignmentRepo;

impl AssignmentRepo {
    pub async fn get_for_machine(pool: &Pool<Sqlite>, machine_id: i64) -> Result<Option<Assignment>> {
        let row = sqlx::query(
            "SELECT id, machine_id, user_id, reason, start_date FROM assignments WHERE machine_id = ?",
        )
        .bind(machine_id)
        .fetch_optional(pool)
        .await?;
        Ok(row.as_ref().map(map_assignment_row))
    }

    /// Fails with Conflict when the machine already has an assignee
    pub async fn create(pool: &Pool<Sqlite>, machine_id: i64, user_id: &str, reason: &str) -> Result<Assignment> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO assignments (machine_id, user_id, reason, start_date) VALUES (?, ?, ?, ?)",
        )
        .bind(machine_id)
        .bind(user_id)
        .bind(reason)
        .bind(now)
        .execute(pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("Machine {} is already assigned", machine_id)))?;

        Ok(Assignment {
            id: result.last_insert_rowid(),
            machine_id,
            user_id: user_id.to_string(),
            reason: reason.to_string(),
            start_date: now,
        })
    }

    /// Hand the existing assignment to another user. None when unassigned.
    pub async fn reassign(pool: &Pool<Sqlite>, machine_id: i64, user_id: &str, reason: &str) -> Result<Option<Assignment>> {
        let result = sqlx::query(
            "UPDATE assignments SET user_id = ?, reason = ?, start_date = ? WHERE machine_id = ?",
        )
        .bind(user_id)
        .bind(reason)
        .bind(Utc::now())
        .bind(machine_id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Self::get_for_machine(pool, machine_id).await
    }

    /// Returns false when nothing was assigned
    pub async fn delete_for_machine(pool: &Pool<Sqlite>, machine_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM assignments WHERE machine_id = ?")
            .bind(machine_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
