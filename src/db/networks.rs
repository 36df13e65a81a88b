use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite, SqliteConnection};

use crate::error::ProvisionError;
use crate::models::{Network, NetworkRequest};
use crate::net::{overlaps, parse_cidr, parse_ipv4, Cidr};

use super::conflict_on_unique;
use super::row_helpers::map_network_row;

const SELECT_NETWORK: &str = r#"
    SELECT id, name, subnet, reserved_net, static_net, created_at, updated_at
    FROM networks
"#;

/// An address survives a pool change only if it parses and the pool still contains it
fn keeps(addr: &Option<String>, pool: Option<Cidr>) -> bool {
    match (addr, pool) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(ip), Some(pool)) => parse_ipv4(ip).map(|ip| pool.contains_addr(ip)).unwrap_or(false),
    }
}

/// Reject a subnet overlapping any other network. Runs after the row write so
/// the transaction already holds the write lock.
async fn check_overlap(conn: &mut SqliteConnection, id: i64, subnet: &str) -> Result<()> {
    let Ok(subnet_cidr) = parse_cidr(subnet) else {
        return Ok(());
    };
    let others: Vec<(String,)> = sqlx::query_as("SELECT subnet FROM networks WHERE id != ?")
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
    let conflict = others
        .iter()
        .filter_map(|(s,)| parse_cidr(s).ok())
        .any(|other| overlaps(&other, &subnet_cidr));
    if conflict {
        return Err(ProvisionError::validation(format!(
            "Subnet {} conflicts with other subnets on other networks",
            subnet
        ))
        .into());
    }
    Ok(())
}

/// Network database operations
pub struct NetworkRepo;

impl NetworkRepo {
    pub async fn create(pool: &Pool<Sqlite>, req: &NetworkRequest) -> Result<Network> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO networks (name, subnet, reserved_net, static_net, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&req.name)
        .bind(&req.subnet)
        .bind(&req.reserved_net)
        .bind(&req.static_net)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("Network {} already exists", req.name)))?;

        let id = result.last_insert_rowid();
        check_overlap(&mut *tx, id, &req.subnet).await?;
        tx.commit().await?;

        Ok(Network {
            id,
            name: req.name.clone(),
            subnet: req.subnet.clone(),
            reserved_net: req.reserved_net.clone(),
            static_net: req.static_net.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Network>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_NETWORK))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_network_row))
    }

    pub async fn list(pool: &Pool<Sqlite>) -> Result<Vec<Network>> {
        let rows = sqlx::query(&format!("{} ORDER BY name", SELECT_NETWORK))
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_network_row).collect())
    }

    pub async fn subnets_excluding(pool: &Pool<Sqlite>, exclude: Option<i64>) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT subnet FROM networks WHERE id != ?")
            .bind(exclude.unwrap_or(-1))
            .fetch_all(pool)
            .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    /// Write the new definition, then null every interface address on this
    /// network that the new pools no longer contain. One transaction.
    pub async fn update(
        pool: &Pool<Sqlite>,
        id: i64,
        req: &NetworkRequest,
        static_net: Option<Cidr>,
        reserved_net: Option<Cidr>,
    ) -> Result<Network> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE networks SET name = ?, subnet = ?, reserved_net = ?, static_net = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&req.name)
        .bind(&req.subnet)
        .bind(&req.reserved_net)
        .bind(&req.static_net)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("Network {} already exists", req.name)))?;

        if result.rows_affected() == 0 {
            return Err(ProvisionError::not_found("Network", id).into());
        }
        check_overlap(&mut *tx, id, &req.subnet).await?;

        let rows = sqlx::query("SELECT id, static_ipv4, reserved_ipv4 FROM interfaces WHERE network_id = ?")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;

        let mut cleared = 0;
        for row in &rows {
            let interface_id: i64 = row.get("id");
            let static_ipv4: Option<String> = row.get("static_ipv4");
            let reserved_ipv4: Option<String> = row.get("reserved_ipv4");
            let keep_static = keeps(&static_ipv4, static_net);
            let keep_reserved = keeps(&reserved_ipv4, reserved_net);
            if keep_static && keep_reserved {
                continue;
            }

            sqlx::query(
                r#"
                UPDATE interfaces SET
                    static_ipv4 = CASE WHEN ? THEN static_ipv4 ELSE NULL END,
                    reserved_ipv4 = CASE WHEN ? THEN reserved_ipv4 ELSE NULL END,
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(keep_static)
            .bind(keep_reserved)
            .bind(now)
            .bind(interface_id)
            .execute(&mut *tx)
            .await?;
            cleared += 1;
        }

        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_NETWORK))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        if cleared > 0 {
            tracing::info!("Network {} update cleared addresses on {} interface(s)", req.name, cleared);
        }
        Ok(map_network_row(&row))
    }

    /// Detach the network's interfaces (dropping their addresses) and delete it
    pub async fn delete(pool: &Pool<Sqlite>, id: i64) -> Result<bool> {
        let mut tx = pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE interfaces SET network_id = NULL, static_ipv4 = NULL, reserved_ipv4 = NULL, updated_at = ?
            WHERE network_id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM networks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
