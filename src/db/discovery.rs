use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::*;

use super::row_helpers::map_discovered_mac_row;

/// Discovered MAC database operations
pub struct DiscoveryRepo;

impl DiscoveryRepo {
    /// Insert or refresh the info recorded for an unclaimed MAC
    pub async fn upsert(pool: &Pool<Sqlite>, mac: &str, info: &DiscoveryInfo) -> Result<()> {
        let info_json = serde_json::to_string(info)?;
        sqlx::query(
            r#"
            INSERT INTO discovered_macs (mac, info, last_seen)
            VALUES (?, ?, ?)
            ON CONFLICT(mac) DO UPDATE SET
                info = excluded.info,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(mac)
        .bind(&info_json)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get(pool: &Pool<Sqlite>, mac: &str) -> Result<Option<DiscoveredMac>> {
        let row = sqlx::query("SELECT id, mac, info, last_seen FROM discovered_macs WHERE mac = ?")
            .bind(mac.to_lowercase())
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_discovered_mac_row))
    }

    pub async fn list(pool: &Pool<Sqlite>, limit: i64) -> Result<Vec<DiscoveredMac>> {
        let rows = sqlx::query(
            "SELECT id, mac, info, last_seen FROM discovered_macs ORDER BY last_seen DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows.iter().map(map_discovered_mac_row).collect())
    }
}
