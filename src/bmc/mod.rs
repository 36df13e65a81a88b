//! Out-of-band machine control through baseboard management controllers.
//!
//! Drivers are a closed set selected by the `bmc_type` tag stored on each
//! BMC row. [`BmcRegistry`] is built once from config and handed around in
//! the application state.

mod controller;
mod error;
pub(crate) mod ipmi;
mod moonshot;
pub(crate) mod sidecar;
mod types;

use async_trait::async_trait;
use std::time::Duration;

pub use controller::{bios_reboot, disk_reboot, pxe_reboot, reboot, reboot_into, BmcController};
pub use error::{BmcError, Result};
pub use ipmi::{IpmiDriver, IpmiSettings};
pub use moonshot::MoonshotDriver;
pub use sidecar::SidecarDriver;
pub use types::{BmcTarget, BootDevice, ConsoleCommand, PowerAction, PowerState};

pub const BMC_TYPE_IPMI: &str = "ipmi";
pub const BMC_TYPE_MOONSHOT: &str = "moonshot";
pub const BMC_TYPE_LIBVIRT: &str = "libvirt";

/// Tags found in fleet data imported from older deployments
const LEGACY_TYPES: &[(&str, &str)] = &[("plain", BMC_TYPE_IPMI), ("libvirt_bmc", BMC_TYPE_LIBVIRT)];

/// The current tag for `bmc_type`, following legacy aliases
pub fn canonical_type(bmc_type: &str) -> Option<&'static str> {
    match bmc_type {
        BMC_TYPE_IPMI => Some(BMC_TYPE_IPMI),
        BMC_TYPE_MOONSHOT => Some(BMC_TYPE_MOONSHOT),
        BMC_TYPE_LIBVIRT => Some(BMC_TYPE_LIBVIRT),
        other => LEGACY_TYPES
            .iter()
            .find(|(legacy, _)| *legacy == other)
            .map(|(_, current)| *current),
    }
}

/// Every driver the service knows how to speak
#[derive(Debug, Clone)]
pub enum BmcDriver {
    Ipmi(IpmiDriver),
    Moonshot(MoonshotDriver),
    Libvirt(SidecarDriver),
}

impl BmcDriver {
    fn inner(&self) -> &dyn BmcController {
        match self {
            BmcDriver::Ipmi(d) => d,
            BmcDriver::Moonshot(d) => d,
            BmcDriver::Libvirt(d) => d,
        }
    }
}

#[async_trait]
impl BmcController for BmcDriver {
    fn validate_info(&self, info: &str) -> Result<()> {
        self.inner().validate_info(info)
    }

    async fn set_bootdev(&self, target: &BmcTarget, device: BootDevice) -> Result<()> {
        self.inner().set_bootdev(target, device).await
    }

    async fn set_power(&self, target: &BmcTarget, action: PowerAction) -> Result<()> {
        self.inner().set_power(target, action).await
    }

    async fn get_power(&self, target: &BmcTarget) -> Result<PowerState> {
        self.inner().get_power(target).await
    }

    async fn deactivate_console(&self, target: &BmcTarget) -> Result<()> {
        self.inner().deactivate_console(target).await
    }

    fn launch_console_command(&self, target: &BmcTarget) -> Result<ConsoleCommand> {
        self.inner().launch_console_command(target)
    }
}

/// Driver construction parameters
#[derive(Debug, Clone)]
pub struct BmcSettings {
    pub ipmitool_path: String,
    pub timeout: Duration,
    pub sidecar_port: u16,
}

impl Default for BmcSettings {
    fn default() -> Self {
        Self {
            ipmitool_path: "ipmitool".to_string(),
            timeout: Duration::from_secs(30),
            sidecar_port: 9001,
        }
    }
}

/// Resolves `bmc_type` tags to drivers
#[derive(Debug, Clone)]
pub struct BmcRegistry {
    ipmi: BmcDriver,
    moonshot: BmcDriver,
    libvirt: BmcDriver,
}

impl BmcRegistry {
    pub fn new(settings: &BmcSettings) -> Result<Self> {
        let ipmi = IpmiDriver::new(IpmiSettings {
            tool: settings.ipmitool_path.clone(),
            timeout: settings.timeout,
        });
        Ok(Self {
            moonshot: BmcDriver::Moonshot(MoonshotDriver::new(ipmi.clone())),
            ipmi: BmcDriver::Ipmi(ipmi),
            libvirt: BmcDriver::Libvirt(SidecarDriver::new(settings.sidecar_port, settings.timeout)?),
        })
    }

    pub fn resolve(&self, bmc_type: &str) -> Result<&BmcDriver> {
        match canonical_type(bmc_type) {
            Some(BMC_TYPE_IPMI) => Ok(&self.ipmi),
            Some(BMC_TYPE_MOONSHOT) => Ok(&self.moonshot),
            Some(BMC_TYPE_LIBVIRT) => Ok(&self.libvirt),
            _ => Err(BmcError::UnknownType(bmc_type.to_string())),
        }
    }
}
