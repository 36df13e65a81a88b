use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::error::ProvisionError;
use crate::models::{AddressKind, CreateInterfaceRequest, Interface, UpdateInterfaceRequest};

use super::row_helpers::map_interface_row;
use super::{is_contention, is_unique_violation};

const SELECT_INTERFACE: &str = r#"
    SELECT id, mac, identifier, dhcpv4, static_ipv4, reserved_ipv4, machine_id, network_id,
           created_at, updated_at
    FROM interfaces
"#;

/// Outcome of a single address write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressAttempt {
    Assigned,
    Contended,
}

fn interface_conflict(err: sqlx::Error, mac: &str) -> anyhow::Error {
    if !is_unique_violation(&err) {
        return err.into();
    }
    let message = err.to_string();
    let msg = if message.contains("interfaces.mac") {
        format!("MAC {} already in use", mac)
    } else if message.contains("interfaces.static_ipv4") {
        "Static IPv4 is already in use".to_string()
    } else {
        "Reserved IPv4 is already in use".to_string()
    };
    ProvisionError::Conflict(msg).into()
}

/// Interface database operations
pub struct InterfaceRepo;

impl InterfaceRepo {
    /// Insert the interface and forget it as a discovered MAC, atomically
    pub async fn create(pool: &Pool<Sqlite>, req: &CreateInterfaceRequest) -> Result<Interface> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO interfaces (mac, identifier, dhcpv4, static_ipv4, reserved_ipv4, machine_id, network_id,
                                    created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&req.mac)
        .bind(req.identifier.clone().unwrap_or_default())
        .bind(req.dhcpv4 as i32)
        .bind(&req.static_ipv4)
        .bind(&req.reserved_ipv4)
        .bind(req.machine_id)
        .bind(req.network_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| interface_conflict(e, &req.mac))?;

        sqlx::query("DELETE FROM discovered_macs WHERE mac = ?")
            .bind(&req.mac)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Interface {
            id: result.last_insert_rowid(),
            mac: req.mac.clone(),
            identifier: req.identifier.clone().filter(|i| !i.is_empty()),
            dhcpv4: req.dhcpv4,
            static_ipv4: req.static_ipv4.clone(),
            reserved_ipv4: req.reserved_ipv4.clone(),
            machine_id: req.machine_id,
            network_id: req.network_id,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn update(pool: &Pool<Sqlite>, id: i64, req: &UpdateInterfaceRequest) -> Result<Interface> {
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE interfaces SET mac = ?, identifier = ?, dhcpv4 = ?, static_ipv4 = ?, reserved_ipv4 = ?,
                                  network_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&req.mac)
        .bind(req.identifier.clone().unwrap_or_default())
        .bind(req.dhcpv4 as i32)
        .bind(&req.static_ipv4)
        .bind(&req.reserved_ipv4)
        .bind(req.network_id)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| interface_conflict(e, &req.mac))?;

        if result.rows_affected() == 0 {
            return Err(ProvisionError::not_found("Interface", id).into());
        }

        sqlx::query("DELETE FROM discovered_macs WHERE mac = ?")
            .bind(&req.mac)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_INTERFACE))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(map_interface_row(&row))
    }

    pub async fn delete(pool: &Pool<Sqlite>, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM interfaces WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ProvisionError::not_found("Interface", id).into());
        }
        Ok(())
    }

    pub async fn get(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Interface>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_INTERFACE))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_interface_row))
    }

    pub async fn get_by_mac(pool: &Pool<Sqlite>, mac: &str) -> Result<Option<Interface>> {
        Self::get_by_mac_excluding(pool, mac, None).await
    }

    pub async fn get_by_mac_excluding(pool: &Pool<Sqlite>, mac: &str, exclude: Option<i64>) -> Result<Option<Interface>> {
        let row = sqlx::query(&format!("{} WHERE mac = ? AND id != ?", SELECT_INTERFACE))
            .bind(mac.to_lowercase())
            .bind(exclude.unwrap_or(-1))
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_interface_row))
    }

    pub async fn list_for_machine(pool: &Pool<Sqlite>, machine_id: i64) -> Result<Vec<Interface>> {
        let rows = sqlx::query(&format!("{} WHERE machine_id = ? ORDER BY id", SELECT_INTERFACE))
            .bind(machine_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_interface_row).collect())
    }

    pub async fn held_addresses(pool: &Pool<Sqlite>, network_id: i64) -> Result<Vec<String>> {
        let rows: Vec<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT static_ipv4, reserved_ipv4 FROM interfaces WHERE network_id = ?")
                .bind(network_id)
                .fetch_all(pool)
                .await?;
        Ok(rows
            .into_iter()
            .flat_map(|(s, r)| s.into_iter().chain(r))
            .collect())
    }

    /// Whether any interface on the network (other than `exclude`) holds `ip` in either column
    pub async fn address_in_use(pool: &Pool<Sqlite>, network_id: i64, ip: &str, exclude: Option<i64>) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM interfaces
            WHERE network_id = ? AND (static_ipv4 = ? OR reserved_ipv4 = ?) AND id != ?
            "#,
        )
        .bind(network_id)
        .bind(ip)
        .bind(ip)
        .bind(exclude.unwrap_or(-1))
        .fetch_one(pool)
        .await?;
        Ok(count > 0)
    }

    /// Set one address column and clear the other, in its own transaction
    pub async fn try_set_address(pool: &Pool<Sqlite>, id: i64, kind: AddressKind, ip: &str) -> Result<AddressAttempt> {
        let mut tx = match pool.begin().await {
            Ok(tx) => tx,
            Err(e) if is_contention(&e) => return Ok(AddressAttempt::Contended),
            Err(e) => return Err(e.into()),
        };

        let sql = format!(
            "UPDATE interfaces SET {} = ?, {} = NULL, updated_at = ? WHERE id = ?",
            kind.column(),
            kind.other().column()
        );
        let result = match sqlx::query(&sql)
            .bind(ip)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await
        {
            Ok(r) => r,
            Err(e) if is_contention(&e) => return Ok(AddressAttempt::Contended),
            Err(e) => return Err(e.into()),
        };
        if result.rows_affected() == 0 {
            return Err(ProvisionError::not_found("Interface", id).into());
        }

        match tx.commit().await {
            Ok(()) => Ok(AddressAttempt::Assigned),
            Err(e) if is_contention(&e) => Ok(AddressAttempt::Contended),
            Err(e) => Err(e.into()),
        }
    }
}
