pub mod bmc;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod net;
pub mod query;
pub mod router;
pub mod services;
pub mod utils;

use config::Config;
use db::Store;
use services::{MachineControl, NetworkRegistry};

/// Application state shared across handlers
pub struct AppState {
    pub store: Store,
    pub config: Config,
    pub networks: NetworkRegistry,
    pub control: MachineControl,
}

impl AppState {
    pub fn new(store: Store, config: Config) -> anyhow::Result<Self> {
        let registry = bmc::BmcRegistry::new(&config.bmc_settings())?;
        Ok(Self {
            networks: NetworkRegistry::new(store.clone()),
            control: MachineControl::new(store.clone(), registry, config.console_endpoint()),
            store,
            config,
        })
    }
}
