use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::bmc::ConsoleCommand;

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// User is a requester that machines are assigned to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// BMCs
// ---------------------------------------------------------------------------

/// Bmc is an out-of-band management controller shared by one or more machines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bmc {
    pub id: i64,
    pub name: String,
    pub ip: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub privilege_level: String,
    pub bmc_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// CreateBmcRequest for registering a BMC
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBmcRequest {
    pub name: String,
    pub ip: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub privilege_level: Option<String>,
    pub bmc_type: String,
}

// ---------------------------------------------------------------------------
// Machines and assignments
// ---------------------------------------------------------------------------

/// Machine is a physical host managed by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bmc_id: Option<i64>,
    pub bmc_info: String,
    pub netboot_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootfile: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// MachineSummary is a machine row joined with the columns the query language filters on
#[derive(Debug, Clone, Serialize)]
pub struct MachineSummary {
    #[serde(flatten)]
    pub machine: Machine,
    pub assignee_count: i64,
    pub interface_count: i64,
    pub bmc_type: String,
}

/// CreateMachineRequest for registering a machine
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateMachineRequest {
    pub name: String,
    #[serde(default)]
    pub bmc_id: Option<i64>,
    #[serde(default)]
    pub bmc_info: String,
    #[serde(default)]
    pub netboot_enabled: bool,
    #[serde(default)]
    pub bootfile: Option<String>,
}

/// Assignment binds a machine to the user currently holding it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: i64,
    pub machine_id: i64,
    pub user_id: String,
    pub reason: String,
    pub start_date: DateTime<Utc>,
}

/// MachineSnapshot is what machine control operations hand back to callers
#[derive(Debug, Clone, Serialize)]
pub struct MachineSnapshot {
    pub machine: Machine,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<Assignment>,
}

// ---------------------------------------------------------------------------
// Networks and interfaces
// ---------------------------------------------------------------------------

/// Network is an IPv4 subnet with optional reserved and static pools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: i64,
    pub name: String,
    pub subnet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_net: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_net: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// NetworkRequest for creating or updating networks
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkRequest {
    pub name: String,
    pub subnet: String,
    #[serde(default)]
    pub reserved_net: Option<String>,
    #[serde(default)]
    pub static_net: Option<String>,
}

/// Free addresses per pool, as returned by `available_addresses`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AvailableAddresses {
    pub static_ipv4: Vec<Ipv4Addr>,
    pub reserved_ipv4: Vec<Ipv4Addr>,
}

/// Interface is a machine NIC, identified by MAC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interface {
    pub id: i64,
    pub mac: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub dhcpv4: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_ipv4: Option<String>,
    pub machine_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Interface {
    /// Static wins over reserved; either requires a network.
    pub fn config_type(&self) -> ConfigType {
        match (self.network_id, &self.static_ipv4, &self.reserved_ipv4) {
            (Some(_), Some(_), _) => ConfigType::Static,
            (Some(_), None, Some(_)) => ConfigType::DynamicReserved,
            _ => ConfigType::Dynamic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigType {
    Static,
    DynamicReserved,
    Dynamic,
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigType::Static => write!(f, "static"),
            ConfigType::DynamicReserved => write!(f, "dynamic-reserved"),
            ConfigType::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Which interface address column an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    Static,
    Reserved,
}

impl AddressKind {
    pub fn column(&self) -> &'static str {
        match self {
            AddressKind::Static => "static_ipv4",
            AddressKind::Reserved => "reserved_ipv4",
        }
    }

    pub fn other(&self) -> AddressKind {
        match self {
            AddressKind::Static => AddressKind::Reserved,
            AddressKind::Reserved => AddressKind::Static,
        }
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressKind::Static => write!(f, "static"),
            AddressKind::Reserved => write!(f, "reserved"),
        }
    }
}

/// Requested address: an explicit IPv4 or "auto" to draw one from the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressChoice {
    Auto,
    Explicit(String),
}

impl From<&str> for AddressChoice {
    fn from(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("auto") {
            AddressChoice::Auto
        } else {
            AddressChoice::Explicit(value.trim().to_string())
        }
    }
}

/// CreateInterfaceRequest for attaching a NIC to a machine
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateInterfaceRequest {
    pub machine_id: i64,
    pub mac: String,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default = "default_true")]
    pub dhcpv4: bool,
    #[serde(default)]
    pub network_id: Option<i64>,
    #[serde(default)]
    pub static_ipv4: Option<String>,
    #[serde(default)]
    pub reserved_ipv4: Option<String>,
}

/// UpdateInterfaceRequest replaces an interface's editable fields
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateInterfaceRequest {
    pub mac: String,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default = "default_true")]
    pub dhcpv4: bool,
    #[serde(default)]
    pub network_id: Option<i64>,
    #[serde(default)]
    pub static_ipv4: Option<String>,
    #[serde(default)]
    pub reserved_ipv4: Option<String>,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// DHCP bookkeeping
// ---------------------------------------------------------------------------

/// Lease is the last address the DHCP server handed to a MAC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub id: i64,
    pub mac: String,
    pub ipv4: String,
    pub duration: i64,
    pub last_seen: DateTime<Utc>,
}

/// DiscoveredMac is a MAC seen by the DHCP server that no interface claims yet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredMac {
    pub id: i64,
    pub mac: String,
    pub info: DiscoveryInfo,
    pub last_seen: DateTime<Utc>,
}

/// Facts gathered from a DHCP request for an unknown MAC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    pub mac_vendor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<DhcpOptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch_code: Option<DhcpOptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

/// A DHCP option value as the DHCP server reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DhcpOptionValue {
    Int(i64),
    Text(String),
}

// ---------------------------------------------------------------------------
// DHCP webhook payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct OfferQuery {
    #[serde(default)]
    pub hwaddr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferOption {
    pub option: u32,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OfferResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(rename = "next-server", skip_serializing_if = "Option::is_none")]
    pub next_server: Option<String>,
    pub options: Vec<OfferOption>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeaseRequest {
    pub mac: String,
    pub ipv4: Ipv4Addr,
    pub duration: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeenRequest {
    pub discover: bool,
    pub mac: String,
    pub options: Vec<SeenOption>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeenOption {
    pub option: u32,
    pub value: DhcpOptionValue,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubnetRequest {
    pub mac: String,
    pub subnets: Vec<SubnetCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SubnetCandidate {
    pub subnet_id: i64,
    pub prefix: Ipv4Addr,
    pub prefix_len: u8,
    pub pools: Vec<SubnetPool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubnetPool {
    #[serde(rename = "poolId")]
    pub pool_id: i64,
    pub capacity: i64,
    #[serde(rename = "firstIP")]
    pub first_ip: Ipv4Addr,
    #[serde(rename = "lastIP")]
    pub last_ip: Ipv4Addr,
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

/// ConsoleToken is a short-lived handle on a serial console launch command
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleToken {
    pub token: String,
    pub machine_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub command: ConsoleCommand,
    pub created_at: DateTime<Utc>,
}

/// Where a console client should connect, and with which token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleSession {
    pub host: String,
    pub port: u16,
    pub token: String,
}
