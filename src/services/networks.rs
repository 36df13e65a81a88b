//! Networks, their address pools, and the interfaces drawing from them.

use anyhow::Result;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::db::{AddressAttempt, Store};
use crate::error::ProvisionError;
use crate::models::*;
use crate::net::{contains, iterate_pool, overlaps, parse_cidr, parse_ipv4, Cidr};
use crate::utils::{canonical_mac, clamp_limit, is_valid_mac};

/// Default size of each candidate list returned by `available_addresses`
pub const DEFAULT_AVAILABLE_LIMIT: usize = 25;
/// Candidates considered when picking an address automatically
pub const AUTO_CANDIDATES: usize = 512;
/// Attempts before automatic allocation gives up under contention
pub const AUTO_ATTEMPTS: usize = 32;

fn trim_to_none(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn kind_label(kind: AddressKind) -> &'static str {
    match kind {
        AddressKind::Static => "Static",
        AddressKind::Reserved => "Reserved",
    }
}

fn pool_of(network: &Network, kind: AddressKind) -> Option<&str> {
    match kind {
        AddressKind::Static => network.static_net.as_deref(),
        AddressKind::Reserved => network.reserved_net.as_deref(),
    }
}

/// A network definition that passed validation, in canonical form
struct ValidatedNetwork {
    request: NetworkRequest,
    static_net: Option<Cidr>,
    reserved_net: Option<Cidr>,
}

/// Parse an optional pool and check it against the subnet
fn validate_pool(
    label: &str,
    value: &Option<String>,
    subnet: Option<Cidr>,
    errors: &mut Vec<String>,
) -> Option<Cidr> {
    let text = trim_to_none(value)?;
    match parse_cidr(text) {
        Ok(pool) => {
            if let Some(subnet) = subnet {
                if !contains(&subnet, &pool) {
                    errors.push(format!("{} subnet is not contained within subnet", label));
                }
            }
            Some(pool)
        }
        Err(e) => {
            errors.push(format!("{} subnet: {}", label, e));
            None
        }
    }
}

/// Owns network and interface invariants on top of the store
#[derive(Clone)]
pub struct NetworkRegistry {
    store: Store,
}

impl NetworkRegistry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn validate_network(&self, req: &NetworkRequest, exclude: Option<i64>) -> Result<ValidatedNetwork> {
        let mut errors = Vec::new();

        let name_len = req.name.chars().count();
        if !(2..=256).contains(&name_len) {
            errors.push("Network name must be between 2 and 256 characters long".to_string());
        }

        let subnet = match parse_cidr(&req.subnet) {
            Ok(subnet) => {
                let others = self.store.other_network_subnets(exclude).await?;
                let conflict = others
                    .iter()
                    .filter_map(|s| parse_cidr(s).ok())
                    .any(|other| overlaps(&other, &subnet));
                if conflict {
                    errors.push(format!(
                        "Subnet {} conflicts with other subnets on other networks",
                        req.subnet
                    ));
                }
                Some(subnet)
            }
            Err(e) => {
                errors.push(format!("Subnet: {}", e));
                None
            }
        };

        let reserved_net = validate_pool("Reserved", &req.reserved_net, subnet, &mut errors);
        let static_net = validate_pool("Static", &req.static_net, subnet, &mut errors);

        if let (Some(s), Some(r)) = (static_net, reserved_net) {
            if overlaps(&s, &r) {
                errors.push("Static and reserved subnets overlap".to_string());
            }
        }

        if !errors.is_empty() {
            return Err(ProvisionError::Validation(errors).into());
        }

        let subnet = subnet.ok_or_else(|| ProvisionError::validation("Subnet: missing"))?;
        Ok(ValidatedNetwork {
            request: NetworkRequest {
                name: req.name.clone(),
                subnet: subnet.to_string(),
                reserved_net: reserved_net.map(|c| c.to_string()),
                static_net: static_net.map(|c| c.to_string()),
            },
            static_net,
            reserved_net,
        })
    }

    pub async fn create_network(&self, req: &NetworkRequest) -> Result<Network> {
        let valid = self.validate_network(req, None).await?;
        let network = self.store.create_network(&valid.request).await?;
        tracing::info!("Created network {} ({})", network.name, network.subnet);
        Ok(network)
    }

    /// Apply a new definition. Interface addresses outside the new pools are
    /// cleared in the same transaction.
    pub async fn update_network(&self, id: i64, req: &NetworkRequest) -> Result<Network> {
        self.get_network(id).await?;
        let valid = self.validate_network(req, Some(id)).await?;
        let network = self
            .store
            .update_network(id, &valid.request, valid.static_net, valid.reserved_net)
            .await?;
        tracing::info!("Updated network {} ({})", network.name, network.subnet);
        Ok(network)
    }

    pub async fn get_network(&self, id: i64) -> Result<Network> {
        self.store
            .get_network(id)
            .await?
            .ok_or_else(|| ProvisionError::not_found("Network", id).into())
    }

    pub async fn list_networks(&self) -> Result<Vec<Network>> {
        self.store.list_networks().await
    }

    pub async fn delete_network(&self, id: i64) -> Result<()> {
        if !self.store.delete_network(id).await? {
            return Err(ProvisionError::not_found("Network", id).into());
        }
        tracing::info!("Deleted network {}", id);
        Ok(())
    }

    /// Free addresses in the static and reserved pools, at most `limit` each
    pub async fn available_addresses(&self, network_id: i64, limit: usize) -> Result<AvailableAddresses> {
        let network = self.get_network(network_id).await?;
        let held: HashSet<Ipv4Addr> = self
            .store
            .held_addresses(network_id)
            .await?
            .iter()
            .filter_map(|ip| parse_ipv4(ip).ok())
            .collect();

        let candidates = |pool: Option<&str>| -> Vec<Ipv4Addr> {
            match pool.and_then(|p| parse_cidr(p).ok()) {
                Some(pool) => iterate_pool(&pool, &held).take(limit).collect(),
                None => Vec::new(),
            }
        };

        Ok(AvailableAddresses {
            static_ipv4: candidates(network.static_net.as_deref()),
            reserved_ipv4: candidates(network.reserved_net.as_deref()),
        })
    }

    pub async fn address_in_use(&self, network_id: i64, ip: &str, exclude_interface: Option<i64>) -> Result<bool> {
        self.store.address_in_use(network_id, ip, exclude_interface).await
    }

    /// Check one requested address against the network's pool. Returns the
    /// validation message when it is unusable.
    async fn check_address(
        &self,
        kind: AddressKind,
        value: &str,
        network: Option<&Network>,
        exclude: Option<i64>,
    ) -> Result<Option<String>> {
        let label = kind_label(kind);
        let ip = match parse_ipv4(value) {
            Ok(ip) => ip,
            Err(_) => return Ok(Some(format!("{} IPv4 must be a valid IPv4 address or empty", label))),
        };
        let (network, pool_text) = match network.and_then(|n| pool_of(n, kind).map(|p| (n, p))) {
            Some(found) => found,
            None => return Ok(Some(format!("Network does not have a {} subnet defined", kind))),
        };
        let pool = parse_cidr(pool_text)?;
        if !pool.contains_addr(ip) {
            return Ok(Some(format!("{} IPv4 is not contained within subnet {}", label, pool_text)));
        }
        if self.store.address_in_use(network.id, &ip.to_string(), exclude).await? {
            return Ok(Some(format!("{} IPv4 is already in use", label)));
        }
        Ok(None)
    }

    /// Give the interface an address of `kind`, clearing the other kind.
    ///
    /// `Auto` draws a random free address from the pool and retries on
    /// contention; an explicit address must sit in the pool and be free.
    pub async fn set_interface_address(
        &self,
        interface_id: i64,
        kind: AddressKind,
        choice: AddressChoice,
    ) -> Result<Interface> {
        let interface = self.get_interface(interface_id).await?;
        let network_id = interface
            .network_id
            .ok_or_else(|| ProvisionError::validation("Interface is not attached to a network"))?;
        let network = self.get_network(network_id).await?;
        if pool_of(&network, kind).is_none() {
            return Err(ProvisionError::validation(format!("Network does not have a {} subnet defined", kind)).into());
        }

        match choice {
            AddressChoice::Auto => {
                for attempt in 1..=AUTO_ATTEMPTS {
                    let available = self.available_addresses(network_id, AUTO_CANDIDATES).await?;
                    let candidates = match kind {
                        AddressKind::Static => available.static_ipv4,
                        AddressKind::Reserved => available.reserved_ipv4,
                    };
                    let pick = candidates.choose(&mut rand::thread_rng()).map(|ip| ip.to_string());
                    let Some(pick) = pick else {
                        return Err(ProvisionError::AddressExhausted.into());
                    };

                    match self.store.try_set_interface_address(interface_id, kind, &pick).await? {
                        AddressAttempt::Assigned => {
                            tracing::info!("Allocated {} address {} to interface {}", kind, pick, interface.mac);
                            return self.get_interface(interface_id).await;
                        }
                        AddressAttempt::Contended => {
                            tracing::debug!("Address {} contended (attempt {}/{})", pick, attempt, AUTO_ATTEMPTS);
                        }
                    }
                }
                Err(ProvisionError::AddressExhausted.into())
            }
            AddressChoice::Explicit(value) => {
                if let Some(msg) = self
                    .check_address(kind, &value, Some(&network), Some(interface_id))
                    .await?
                {
                    return Err(ProvisionError::validation(msg).into());
                }
                let ip = parse_ipv4(&value)?.to_string();
                match self.store.try_set_interface_address(interface_id, kind, &ip).await? {
                    AddressAttempt::Assigned => {
                        tracing::info!("Set {} address {} on interface {}", kind, ip, interface.mac);
                        self.get_interface(interface_id).await
                    }
                    AddressAttempt::Contended => {
                        Err(ProvisionError::Conflict(format!("{} IPv4 is already in use", kind_label(kind))).into())
                    }
                }
            }
        }
    }

    // ========== Interfaces ==========

    /// Validation shared by create and update; returns every failure
    async fn validate_interface(
        &self,
        mac: &str,
        identifier: &Option<String>,
        static_ipv4: &Option<String>,
        reserved_ipv4: &Option<String>,
        network: Option<&Network>,
        exclude: Option<i64>,
    ) -> Result<Vec<String>> {
        let mut errors = Vec::new();

        if !is_valid_mac(mac) {
            errors.push(format!("MAC {} is not a valid mac address", mac));
        } else if self.store.get_interface_by_mac_excluding(mac, exclude).await?.is_some() {
            errors.push(format!("MAC {} already in use", mac));
        }

        if identifier.as_deref().map(|i| i.chars().count()).unwrap_or(0) > 64 {
            errors.push("Interface identifier must be between 0 and 64 characters long".to_string());
        }

        for (kind, value) in [(AddressKind::Static, static_ipv4), (AddressKind::Reserved, reserved_ipv4)] {
            if let Some(value) = trim_to_none(value) {
                if let Some(msg) = self.check_address(kind, value, network, exclude).await? {
                    errors.push(msg);
                }
            }
        }

        Ok(errors)
    }

    async fn lookup_network(&self, network_id: Option<i64>) -> Result<Option<Network>> {
        match network_id {
            Some(id) => match self.store.get_network(id).await? {
                Some(network) => Ok(Some(network)),
                None => Err(ProvisionError::validation(format!("A network with id={} does not exist", id)).into()),
            },
            None => Ok(None),
        }
    }

    fn canonical_address(value: &Option<String>) -> Option<String> {
        trim_to_none(value).and_then(|v| parse_ipv4(v).ok()).map(|ip| ip.to_string())
    }

    pub async fn create_interface(&self, req: &CreateInterfaceRequest) -> Result<Interface> {
        if self.store.get_machine(req.machine_id).await?.is_none() {
            return Err(ProvisionError::not_found("Machine", req.machine_id).into());
        }
        let mac = canonical_mac(&req.mac).unwrap_or_else(|| req.mac.trim().to_string());
        let network = self.lookup_network(req.network_id).await?;

        let errors = self
            .validate_interface(&mac, &req.identifier, &req.static_ipv4, &req.reserved_ipv4, network.as_ref(), None)
            .await?;
        if !errors.is_empty() {
            return Err(ProvisionError::Validation(errors).into());
        }

        let normalized = CreateInterfaceRequest {
            machine_id: req.machine_id,
            mac,
            identifier: req.identifier.clone(),
            dhcpv4: req.dhcpv4,
            network_id: req.network_id,
            static_ipv4: Self::canonical_address(&req.static_ipv4),
            reserved_ipv4: Self::canonical_address(&req.reserved_ipv4),
        };
        let interface = self.store.create_interface(&normalized).await?;
        tracing::info!("Added interface {} to machine {}", interface.mac, interface.machine_id);
        Ok(interface)
    }

    pub async fn update_interface(&self, id: i64, req: &UpdateInterfaceRequest) -> Result<Interface> {
        self.get_interface(id).await?;
        let mac = canonical_mac(&req.mac).unwrap_or_else(|| req.mac.trim().to_string());
        let network = self.lookup_network(req.network_id).await?;

        let errors = self
            .validate_interface(&mac, &req.identifier, &req.static_ipv4, &req.reserved_ipv4, network.as_ref(), Some(id))
            .await?;
        if !errors.is_empty() {
            return Err(ProvisionError::Validation(errors).into());
        }

        let normalized = UpdateInterfaceRequest {
            mac,
            identifier: req.identifier.clone(),
            dhcpv4: req.dhcpv4,
            network_id: req.network_id,
            static_ipv4: Self::canonical_address(&req.static_ipv4),
            reserved_ipv4: Self::canonical_address(&req.reserved_ipv4),
        };
        self.store.update_interface(id, &normalized).await
    }

    pub async fn delete_interface(&self, id: i64) -> Result<()> {
        self.store.delete_interface(id).await
    }

    pub async fn get_interface(&self, id: i64) -> Result<Interface> {
        self.store
            .get_interface(id)
            .await?
            .ok_or_else(|| ProvisionError::not_found("Interface", id).into())
    }

    pub async fn get_interface_by_mac(&self, mac: &str) -> Result<Option<Interface>> {
        self.store.get_interface_by_mac(mac).await
    }

    pub async fn list_interfaces(&self, machine_id: i64) -> Result<Vec<Interface>> {
        if self.store.get_machine(machine_id).await?.is_none() {
            return Err(ProvisionError::not_found("Machine", machine_id).into());
        }
        self.store.list_interfaces_for_machine(machine_id).await
    }

    // ========== Leases and discovery ==========

    pub async fn list_leases(&self, limit: i64) -> Result<Vec<Lease>> {
        self.store.list_leases(clamp_limit(limit)).await
    }

    pub async fn get_lease(&self, mac: &str) -> Result<Option<Lease>> {
        self.store.get_lease(mac).await
    }

    pub async fn list_discovered_macs(&self, limit: i64) -> Result<Vec<DiscoveredMac>> {
        self.store.list_discovered_macs(clamp_limit(limit)).await
    }
}
