mod assignments;
mod bmcs;
mod console_tokens;
mod discovery;
mod interfaces;
mod leases;
mod machines;
mod networks;
pub(crate) mod row_helpers;
mod users;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ProvisionError;
use crate::models::*;
use crate::net::Cidr;
use crate::query::CompiledQuery;

pub use interfaces::AddressAttempt;
pub use machines::ReserveAttempt;

use assignments::AssignmentRepo;
use bmcs::BmcRepo;
use console_tokens::ConsoleTokenRepo;
use discovery::DiscoveryRepo;
use interfaces::InterfaceRepo;
use leases::LeaseRepo;
use machines::MachineRepo;
use networks::NetworkRepo;
use users::UserRepo;

/// True when SQLite reported lock contention or a uniqueness race, i.e. the
/// attempt is worth repeating in a fresh transaction.
pub(crate) fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation()
                || matches!(db.code().as_deref(), Some("5") | Some("6") | Some("517"))
                || db.message().contains("locked")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Turn a unique-constraint failure into a Conflict carrying `msg`
pub(crate) fn conflict_on_unique(err: sqlx::Error, msg: impl FnOnce() -> String) -> anyhow::Error {
    if is_unique_violation(&err) {
        ProvisionError::Conflict(msg()).into()
    } else {
        err.into()
    }
}

/// Store handles all database operations, delegating to per-entity repo modules.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Create a new database store with the default pool size
    pub async fn new(db_path: &str) -> Result<Self> {
        Self::with_pool_size(db_path, 5).await
    }

    /// Create a new database store with a specific pool size.
    /// WAL mode lets readers proceed while a writer holds the lock.
    pub async fn with_pool_size(db_path: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .context("Invalid database path")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Single-connection in-memory store. The connection never expires, so
    /// the database lives as long as the store.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    // ========== Users ==========

    pub async fn create_user(&self, username: &str) -> Result<User> {
        UserRepo::create(&self.pool, username).await
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        UserRepo::get(&self.pool, id).await
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        UserRepo::get_by_username(&self.pool, username).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        UserRepo::list(&self.pool).await
    }

    // ========== BMCs ==========

    pub async fn create_bmc(&self, req: &CreateBmcRequest) -> Result<Bmc> {
        BmcRepo::create(&self.pool, req).await
    }

    pub async fn get_bmc(&self, id: i64) -> Result<Option<Bmc>> {
        BmcRepo::get(&self.pool, id).await
    }

    pub async fn list_bmcs(&self) -> Result<Vec<Bmc>> {
        BmcRepo::list(&self.pool).await
    }

    pub async fn delete_bmc(&self, id: i64) -> Result<()> {
        BmcRepo::delete(&self.pool, id).await
    }

    // ========== Machines ==========

    pub async fn create_machine(&self, req: &CreateMachineRequest) -> Result<Machine> {
        MachineRepo::create(&self.pool, req).await
    }

    pub async fn get_machine(&self, id: i64) -> Result<Option<Machine>> {
        MachineRepo::get(&self.pool, id).await
    }

    pub async fn get_machine_by_name(&self, name: &str) -> Result<Option<Machine>> {
        MachineRepo::get_by_name(&self.pool, name).await
    }

    pub async fn delete_machine(&self, id: i64) -> Result<()> {
        MachineRepo::delete(&self.pool, id).await
    }

    pub async fn list_machines(&self, query: &CompiledQuery, include_claimed: bool) -> Result<Vec<MachineSummary>> {
        MachineRepo::list(&self.pool, query, include_claimed).await
    }

    /// One reservation attempt in its own transaction
    pub async fn try_reserve_machine(
        &self,
        query: &CompiledQuery,
        user_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ReserveAttempt> {
        MachineRepo::try_reserve(&self.pool, query, user_id, reason, now).await
    }

    // ========== Assignments ==========

    pub async fn get_assignment(&self, machine_id: i64) -> Result<Option<Assignment>> {
        AssignmentRepo::get_for_machine(&self.pool, machine_id).await
    }

    pub async fn create_assignment(&self, machine_id: i64, user_id: &str, reason: &str) -> Result<Assignment> {
        AssignmentRepo::create(&self.pool, machine_id, user_id, reason).await
    }

    pub async fn reassign(&self, machine_id: i64, user_id: &str, reason: &str) -> Result<Option<Assignment>> {
        AssignmentRepo::reassign(&self.pool, machine_id, user_id, reason).await
    }

    pub async fn delete_assignment(&self, machine_id: i64) -> Result<bool> {
        AssignmentRepo::delete_for_machine(&self.pool, machine_id).await
    }

    // ========== Networks ==========

    pub async fn create_network(&self, req: &NetworkRequest) -> Result<Network> {
        NetworkRepo::create(&self.pool, req).await
    }

    pub async fn get_network(&self, id: i64) -> Result<Option<Network>> {
        NetworkRepo::get(&self.pool, id).await
    }

    pub async fn list_networks(&self) -> Result<Vec<Network>> {
        NetworkRepo::list(&self.pool).await
    }

    /// Update a network and clear interface addresses that fall outside its
    /// new pools, atomically
    pub async fn update_network(
        &self,
        id: i64,
        req: &NetworkRequest,
        static_net: Option<Cidr>,
        reserved_net: Option<Cidr>,
    ) -> Result<Network> {
        NetworkRepo::update(&self.pool, id, req, static_net, reserved_net).await
    }

    pub async fn delete_network(&self, id: i64) -> Result<bool> {
        NetworkRepo::delete(&self.pool, id).await
    }

    /// Subnets of every network other than `exclude`
    pub async fn other_network_subnets(&self, exclude: Option<i64>) -> Result<Vec<String>> {
        NetworkRepo::subnets_excluding(&self.pool, exclude).await
    }

    // ========== Interfaces ==========

    pub async fn create_interface(&self, req: &CreateInterfaceRequest) -> Result<Interface> {
        InterfaceRepo::create(&self.pool, req).await
    }

    pub async fn update_interface(&self, id: i64, req: &UpdateInterfaceRequest) -> Result<Interface> {
        InterfaceRepo::update(&self.pool, id, req).await
    }

    pub async fn delete_interface(&self, id: i64) -> Result<()> {
        InterfaceRepo::delete(&self.pool, id).await
    }

    pub async fn get_interface(&self, id: i64) -> Result<Option<Interface>> {
        InterfaceRepo::get(&self.pool, id).await
    }

    pub async fn get_interface_by_mac(&self, mac: &str) -> Result<Option<Interface>> {
        InterfaceRepo::get_by_mac(&self.pool, mac).await
    }

    pub async fn get_interface_by_mac_excluding(&self, mac: &str, exclude: Option<i64>) -> Result<Option<Interface>> {
        InterfaceRepo::get_by_mac_excluding(&self.pool, mac, exclude).await
    }

    pub async fn list_interfaces_for_machine(&self, machine_id: i64) -> Result<Vec<Interface>> {
        InterfaceRepo::list_for_machine(&self.pool, machine_id).await
    }

    /// Every address held by an interface on the network, either kind
    pub async fn held_addresses(&self, network_id: i64) -> Result<Vec<String>> {
        InterfaceRepo::held_addresses(&self.pool, network_id).await
    }

    pub async fn address_in_use(&self, network_id: i64, ip: &str, exclude_interface: Option<i64>) -> Result<bool> {
        InterfaceRepo::address_in_use(&self.pool, network_id, ip, exclude_interface).await
    }

    /// One address write in its own transaction
    pub async fn try_set_interface_address(
        &self,
        interface_id: i64,
        kind: AddressKind,
        ip: &str,
    ) -> Result<AddressAttempt> {
        InterfaceRepo::try_set_address(&self.pool, interface_id, kind, ip).await
    }

    // ========== Leases and discovery ==========

    pub async fn upsert_lease(&self, mac: &str, ipv4: &str, duration: i64) -> Result<()> {
        LeaseRepo::upsert(&self.pool, mac, ipv4, duration).await
    }

    pub async fn get_lease(&self, mac: &str) -> Result<Option<Lease>> {
        LeaseRepo::get(&self.pool, mac).await
    }

    pub async fn list_leases(&self, limit: i64) -> Result<Vec<Lease>> {
        LeaseRepo::list(&self.pool, limit).await
    }

    pub async fn upsert_discovered_mac(&self, mac: &str, info: &DiscoveryInfo) -> Result<()> {
        DiscoveryRepo::upsert(&self.pool, mac, info).await
    }

    pub async fn get_discovered_mac(&self, mac: &str) -> Result<Option<DiscoveredMac>> {
        DiscoveryRepo::get(&self.pool, mac).await
    }

    pub async fn list_discovered_macs(&self, limit: i64) -> Result<Vec<DiscoveredMac>> {
        DiscoveryRepo::list(&self.pool, limit).await
    }

    // ========== Console tokens ==========

    pub async fn create_console_token(&self, token: &ConsoleToken) -> Result<()> {
        ConsoleTokenRepo::create(&self.pool, token).await
    }

    pub async fn get_console_token(&self, token: &str) -> Result<Option<ConsoleToken>> {
        ConsoleTokenRepo::get(&self.pool, token).await
    }

    /// Delete tokens created at or before `cutoff`; returns how many went
    pub async fn purge_console_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        ConsoleTokenRepo::purge(&self.pool, cutoff).await
    }
}
