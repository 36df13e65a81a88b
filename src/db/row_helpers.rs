use sqlx::{sqlite::SqliteRow, Row};

use crate::bmc::ConsoleCommand;
use crate::models::*;

/// Filter empty strings to None, used when DB stores '' instead of NULL
pub fn none_if_empty(opt: Option<String>) -> Option<String> {
    opt.filter(|s| !s.is_empty())
}

pub fn map_user_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        created_at: row.get("created_at"),
    }
}

pub fn map_bmc_row(row: &SqliteRow) -> Bmc {
    Bmc {
        id: row.get("id"),
        name: row.get("name"),
        ip: row.get("ip"),
        username: row.get("username"),
        password: row.get("password"),
        privilege_level: row.get("privilege_level"),
        bmc_type: row.get("bmc_type"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Map a SQLite row to a Machine struct
pub fn map_machine_row(row: &SqliteRow) -> Machine {
    let netboot: i32 = row.get("netboot_enabled");
    Machine {
        id: row.get("id"),
        name: row.get("name"),
        bmc_id: row.try_get::<Option<i64>, _>("bmc_id").ok().flatten(),
        bmc_info: row.get("bmc_info"),
        netboot_enabled: netboot != 0,
        bootfile: none_if_empty(row.get("bootfile")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Map a machine listing row (machine columns plus the query columns)
pub fn map_machine_summary_row(row: &SqliteRow) -> MachineSummary {
    MachineSummary {
        machine: map_machine_row(row),
        assignee_count: row.get("assignee_count"),
        interface_count: row.get("interface_count"),
        bmc_type: row.get("bmc_type"),
    }
}

pub fn map_assignment_row(row: &SqliteRow) -> Assignment {
    Assignment {
        id: row.get("id"),
        machine_id: row.get("machine_id"),
        user_id: row.get("user_id"),
        reason: row.get("reason"),
        start_date: row.get("start_date"),
    }
}

/// Map a SQLite row to a Network struct
pub fn map_network_row(row: &SqliteRow) -> Network {
    Network {
        id: row.get("id"),
        name: row.get("name"),
        subnet: row.get("subnet"),
        reserved_net: none_if_empty(row.get("reserved_net")),
        static_net: none_if_empty(row.get("static_net")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Map a SQLite row to an Interface struct
pub fn map_interface_row(row: &SqliteRow) -> Interface {
    let dhcpv4: i32 = row.get("dhcpv4");
    Interface {
        id: row.get("id"),
        mac: row.get("mac"),
        identifier: none_if_empty(row.get("identifier")),
        dhcpv4: dhcpv4 != 0,
        static_ipv4: none_if_empty(row.get("static_ipv4")),
        reserved_ipv4: none_if_empty(row.get("reserved_ipv4")),
        machine_id: row.get("machine_id"),
        network_id: row.try_get::<Option<i64>, _>("network_id").ok().flatten(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub fn map_lease_row(row: &SqliteRow) -> Lease {
    Lease {
        id: row.get("id"),
        mac: row.get("mac"),
        ipv4: row.get("ipv4"),
        duration: row.get("duration"),
        last_seen: row.get("last_seen"),
    }
}

/// Map a SQLite row to a DiscoveredMac, tolerating a malformed info blob
pub fn map_discovered_mac_row(row: &SqliteRow) -> DiscoveredMac {
    let info_json: String = row.get("info");
    DiscoveredMac {
        id: row.get("id"),
        mac: row.get("mac"),
        info: serde_json::from_str(&info_json).unwrap_or_default(),
        last_seen: row.get("last_seen"),
    }
}

pub fn map_console_token_row(row: &SqliteRow) -> anyhow::Result<ConsoleToken> {
    let command_json: String = row.get("command_response");
    let command: ConsoleCommand = serde_json::from_str(&command_json)?;
    Ok(ConsoleToken {
        token: row.get("token"),
        machine_id: row.get("machine_id"),
        user_id: row.get("user_id"),
        command,
        created_at: row.get("created_at"),
    })
}
