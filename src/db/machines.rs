use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};

use crate::error::ProvisionError;
use crate::models::{CreateMachineRequest, Machine, MachineSummary};
use crate::query::CompiledQuery;

use super::row_helpers::{map_machine_row, map_machine_summary_row};
use super::{conflict_on_unique, is_contention};

/// Machine rows plus the derived columns the query language filters on.
/// Used as a subquery aliased `q`.
const MACHINE_LISTING: &str = r#"
    SELECT m.id, m.name, m.bmc_id, m.bmc_info, m.netboot_enabled, m.bootfile,
           m.created_at, m.updated_at,
           COALESCE((SELECT COUNT(*) FROM assignments a WHERE a.machine_id = m.id), 0) AS assignee_count,
           COALESCE((SELECT COUNT(*) FROM interfaces i WHERE i.machine_id = m.id), 0) AS interface_count,
           COALESCE(b.bmc_type, '') AS bmc_type
    FROM machines m
    LEFT JOIN bmcs b ON b.id = m.bmc_id
"#;

const SELECT_MACHINE: &str = r#"
    SELECT id, name, bmc_id, bmc_info, netboot_enabled, bootfile, created_at, updated_at
    FROM machines
"#;

/// Outcome of a single reservation transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveAttempt {
    Reserved(i64),
    NoMatch,
    Contended,
}

/// Machine database operations
pub struct MachineRepo;

impl MachineRepo {
    pub async fn create(pool: &Pool<Sqlite>, req: &CreateMachineRequest) -> Result<Machine> {
        let now = Utc::now();
        let bootfile = req.bootfile.clone().filter(|b| !b.is_empty());
        let result = sqlx::query(
            r#"
            INSERT INTO machines (name, bmc_id, bmc_info, netboot_enabled, bootfile, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&req.name)
        .bind(req.bmc_id)
        .bind(&req.bmc_info)
        .bind(req.netboot_enabled as i32)
        .bind(bootfile.clone().unwrap_or_default())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("Machine {} already exists", req.name)))?;

        Ok(Machine {
            id: result.last_insert_rowid(),
            name: req.name.clone(),
            bmc_id: req.bmc_id,
            bmc_info: req.bmc_info.clone(),
            netboot_enabled: req.netboot_enabled,
            bootfile,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Machine>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_MACHINE))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_machine_row))
    }

    pub async fn get_by_name(pool: &Pool<Sqlite>, name: &str) -> Result<Option<Machine>> {
        let row = sqlx::query(&format!("{} WHERE name = ?", SELECT_MACHINE))
            .bind(name)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_machine_row))
    }

    pub async fn delete(pool: &Pool<Sqlite>, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM machines WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ProvisionError::not_found("Machine", id).into());
        }
        Ok(())
    }

    pub async fn list(pool: &Pool<Sqlite>, query: &CompiledQuery, include_claimed: bool) -> Result<Vec<MachineSummary>> {
        let claimed = if include_claimed { "" } else { " AND q.assignee_count = 0" };
        let sql = format!(
            "SELECT q.* FROM ({}) q WHERE ({}){} ORDER BY q.id",
            MACHINE_LISTING,
            query.sql(),
            claimed
        );
        let rows = query.bind_all(sqlx::query(&sql)).fetch_all(pool).await?;
        Ok(rows.iter().map(map_machine_summary_row).collect())
    }

    /// Claim the first unclaimed machine matching `query` for `user_id`.
    ///
    /// The attempt opens with the INSERT so the write lock is taken before
    /// any read snapshot exists, then re-counts the machine's assignments.
    /// Anything but exactly one assignment rolls back.
    pub async fn try_reserve(
        pool: &Pool<Sqlite>,
        query: &CompiledQuery,
        user_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ReserveAttempt> {
        let mut tx = match pool.begin().await {
            Ok(tx) => tx,
            Err(e) if is_contention(&e) => return Ok(ReserveAttempt::Contended),
            Err(e) => return Err(e.into()),
        };

        let sql = format!(
            r#"
            INSERT INTO assignments (machine_id, user_id, reason, start_date)
            SELECT q.id, ?, ?, ? FROM ({}) q
            WHERE q.assignee_count = 0 AND ({})
            ORDER BY q.id
            LIMIT 1
            "#,
            MACHINE_LISTING,
            query.sql()
        );
        let insert = query.bind_all(sqlx::query(&sql).bind(user_id).bind(reason).bind(now));
        let result = match insert.execute(&mut *tx).await {
            Ok(r) => r,
            Err(e) if is_contention(&e) => return Ok(ReserveAttempt::Contended),
            Err(e) => return Err(e.into()),
        };
        if result.rows_affected() == 0 {
            return Ok(ReserveAttempt::NoMatch);
        }

        let (machine_id,): (i64,) = sqlx::query_as("SELECT machine_id FROM assignments WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(&mut *tx)
            .await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM assignments WHERE machine_id = ?")
            .bind(machine_id)
            .fetch_one(&mut *tx)
            .await?;
        if count != 1 {
            tx.rollback().await?;
            return Ok(ReserveAttempt::Contended);
        }

        match tx.commit().await {
            Ok(()) => Ok(ReserveAttempt::Reserved(machine_id)),
            Err(e) if is_contention(&e) => Ok(ReserveAttempt::Contended),
            Err(e) => Err(e.into()),
        }
    }
}
