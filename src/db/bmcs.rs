use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::error::ProvisionError;
use crate::models::{Bmc, CreateBmcRequest};

use super::conflict_on_unique;
use super::row_helpers::map_bmc_row;

const SELECT_BMC: &str = r#"
    SELECT id, name, ip, username, password, privilege_level, bmc_type, created_at, updated_at
    FROM bmcs
"#;

/// BMC database operations
pub struct BmcRepo;

impl BmcRepo {
    pub async fn create(pool: &Pool<Sqlite>, req: &CreateBmcRequest) -> Result<Bmc> {
        let now = Utc::now();
        let privilege_level = req
            .privilege_level
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "ADMINISTRATOR".to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO bmcs (name, ip, username, password, privilege_level, bmc_type, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&req.name)
        .bind(&req.ip)
        .bind(&req.username)
        .bind(&req.password)
        .bind(&privilege_level)
        .bind(&req.bmc_type)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("BMC name {} or IP {} already in use", req.name, req.ip)))?;

        Ok(Bmc {
            id: result.last_insert_rowid(),
            name: req.name.clone(),
            ip: req.ip.clone(),
            username: req.username.clone(),
            password: req.password.clone(),
            privilege_level,
            bmc_type: req.bmc_type.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Bmc>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_BMC))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_bmc_row))
    }

    pub async fn list(pool: &Pool<Sqlite>) -> Result<Vec<Bmc>> {
        let rows = sqlx::query(&format!("{} ORDER BY name", SELECT_BMC))
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_bmc_row).collect())
    }

    pub async fn delete(pool: &Pool<Sqlite>, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM bmcs WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ProvisionError::not_found("BMC", id).into());
        }
        Ok(())
    }
}
