//! Bridged IPMI for cartridge chassis (HP Moonshot).
//!
//! Each cartridge sits behind the chassis manager and is reached with two
//! IPMB hops derived from its slot id, which is stored in the machine's
//! `bmc_info`.

use async_trait::async_trait;

use super::controller::BmcController;
use super::error::{BmcError, Result};
use super::ipmi::{BridgeHop, IpmiDriver};
use super::types::{BmcTarget, BootDevice, ConsoleCommand, PowerAction, PowerState};

/// Actions the chassis rejects, and what to send instead.
/// `chassis power reset` fails with "Unknown (0x80)"; cycle reboots reliably.
pub const POWER_REMAP: &[(PowerAction, PowerAction)] = &[(PowerAction::Reset, PowerAction::Cycle)];

pub fn remap_power(action: PowerAction) -> PowerAction {
    POWER_REMAP
        .iter()
        .find(|(from, _)| *from == action)
        .map(|(_, to)| *to)
        .unwrap_or(action)
}

/// Highest slot whose transit address `0x80 + 2 * slot` is still a one-byte
/// IPMB slave address
pub const MAX_CARTRIDGE_ID: u64 = 63;

fn invalid_cartridge() -> BmcError {
    BmcError::InvalidInfo("Not a valid moonshot cartridge id.".to_string())
}

/// Parse a cartridge slot id (an integer in 1..=63)
pub fn cartridge_id(info: &str) -> Result<u64> {
    match info.trim().parse::<u64>() {
        Ok(cid) if (1..=MAX_CARTRIDGE_ID).contains(&cid) => Ok(cid),
        _ => Err(invalid_cartridge()),
    }
}

/// Bridge hops for a cartridge: chassis transit then node address
pub fn bridge_hops(cartridge: u64) -> Result<[BridgeHop; 2]> {
    let transit = cartridge
        .checked_mul(2)
        .and_then(|offset| offset.checked_add(0x80))
        .filter(|address| *address <= 0xff)
        .ok_or_else(invalid_cartridge)?;
    Ok([
        BridgeHop {
            channel: 0,
            address: transit,
        },
        BridgeHop {
            channel: 7,
            address: 0x72,
        },
    ])
}

#[derive(Debug, Clone)]
pub struct MoonshotDriver {
    ipmi: IpmiDriver,
}

impl MoonshotDriver {
    pub fn new(ipmi: IpmiDriver) -> Self {
        Self { ipmi }
    }

    fn hops(&self, target: &BmcTarget) -> Result<[BridgeHop; 2]> {
        cartridge_id(&target.bmc_info).and_then(bridge_hops)
    }
}

#[async_trait]
impl BmcController for MoonshotDriver {
    fn validate_info(&self, info: &str) -> Result<()> {
        cartridge_id(info).map(|_| ())
    }

    async fn set_bootdev(&self, target: &BmcTarget, device: BootDevice) -> Result<()> {
        let hops = self.hops(target)?;
        self.ipmi.set_bootdev_via(target, &hops, device).await
    }

    async fn set_power(&self, target: &BmcTarget, action: PowerAction) -> Result<()> {
        let hops = self.hops(target)?;
        self.ipmi.set_power_via(target, &hops, remap_power(action)).await
    }

    async fn get_power(&self, target: &BmcTarget) -> Result<PowerState> {
        let hops = self.hops(target)?;
        self.ipmi.get_power_via(target, &hops).await
    }

    async fn deactivate_console(&self, target: &BmcTarget) -> Result<()> {
        let hops = self.hops(target)?;
        self.ipmi.deactivate_console_via(target, &hops).await
    }

    fn launch_console_command(&self, target: &BmcTarget) -> Result<ConsoleCommand> {
        let hops = self.hops(target)?;
        Ok(self.ipmi.console_command_via(target, &hops))
    }
}
