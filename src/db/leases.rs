use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::Lease;

use super::row_helpers::map_lease_row;

/// Lease database operations
pub struct LeaseRepo;

impl LeaseRepo {
    /// Record the latest lease for a MAC
    pub async fn upsert(pool: &Pool<Sqlite>, mac: &str, ipv4: &str, duration: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO leases (mac, ipv4, duration, last_seen)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(mac) DO UPDATE SET
                ipv4 = excluded.ipv4,
                duration = excluded.duration,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(mac)
        .bind(ipv4)
        .bind(duration)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get(pool: &Pool<Sqlite>, mac: &str) -> Result<Option<Lease>> {
        let row = sqlx::query("SELECT id, mac, ipv4, duration, last_seen FROM leases WHERE mac = ?")
            .bind(mac.to_lowercase())
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_lease_row))
    }

    pub async fn list(pool: &Pool<Sqlite>, limit: i64) -> Result<Vec<Lease>> {
        let rows = sqlx::query(
            "SELECT id, mac, ipv4, duration, last_seen FROM leases ORDER BY last_seen DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows.iter().map(map_lease_row).collect())
    }
}
