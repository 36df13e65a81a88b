//! Common types for BMC operations

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::models::{Bmc, Machine};

/// Power state reported by a BMC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
    Unknown,
}

impl PowerState {
    /// Interpret a vendor state word ("on", "Off", ...). Anything else is `Unknown`.
    pub fn from_word(word: &str) -> Self {
        match word.trim().to_ascii_lowercase().as_str() {
            "on" => PowerState::On,
            "off" => PowerState::Off,
            _ => PowerState::Unknown,
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
            PowerState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Next-boot device override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootDevice {
    Pxe,
    Disk,
    Bios,
}

impl std::fmt::Display for BootDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootDevice::Pxe => write!(f, "pxe"),
            BootDevice::Disk => write!(f, "disk"),
            BootDevice::Bios => write!(f, "bios"),
        }
    }
}

impl FromStr for BootDevice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pxe" => Ok(BootDevice::Pxe),
            "disk" => Ok(BootDevice::Disk),
            "bios" => Ok(BootDevice::Bios),
            other => Err(format!("unknown boot device {}", other)),
        }
    }
}

/// Raw chassis power action understood by every driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    On,
    Off,
    Cycle,
    Reset,
    Soft,
}

impl std::fmt::Display for PowerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerAction::On => write!(f, "on"),
            PowerAction::Off => write!(f, "off"),
            PowerAction::Cycle => write!(f, "cycle"),
            PowerAction::Reset => write!(f, "reset"),
            PowerAction::Soft => write!(f, "soft"),
        }
    }
}

impl FromStr for PowerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(PowerAction::On),
            "off" => Ok(PowerAction::Off),
            "cycle" => Ok(PowerAction::Cycle),
            "reset" => Ok(PowerAction::Reset),
            "soft" => Ok(PowerAction::Soft),
            other => Err(format!("unknown power state {}", other)),
        }
    }
}

/// Executable plus arguments that attach to a machine's serial console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleCommand {
    pub command: String,
    pub args: Vec<String>,
}

/// Everything a driver needs to address one machine behind one BMC
#[derive(Debug, Clone)]
pub struct BmcTarget {
    pub ip: String,
    pub username: String,
    pub password: String,
    pub privilege_level: String,
    pub machine_name: String,
    pub bmc_info: String,
}

impl BmcTarget {
    pub fn new(bmc: &Bmc, machine: &Machine) -> Self {
        Self {
            ip: bmc.ip.clone(),
            username: bmc.username.clone(),
            password: bmc.password.clone(),
            privilege_level: bmc.privilege_level.clone(),
            machine_name: machine.name.clone(),
            bmc_info: machine.bmc_info.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_words() {
        assert_eq!(PowerState::from_word("on"), PowerState::On);
        assert_eq!(PowerState::from_word("Off\n"), PowerState::Off);
        assert_eq!(PowerState::from_word("paused"), PowerState::Unknown);
        assert_eq!(PowerState::On.to_string(), "on");
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!("cycle".parse::<PowerAction>().unwrap(), PowerAction::Cycle);
        assert!("reboot".parse::<PowerAction>().is_err());
        assert_eq!("bios".parse::<BootDevice>().unwrap(), BootDevice::Bios);
        assert!("cdrom".parse::<BootDevice>().is_err());
    }
}
