//! HTTP sidecar driver for virtual machines (libvirt).
//!
//! A small service next to the hypervisor exposes one GET endpoint per
//! action at `http://<bmc-ip>:<port>/service/<machine>/state_controller/<action>`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

use super::controller::BmcController;
use super::error::{BmcError, Result};
use super::types::{BmcTarget, BootDevice, ConsoleCommand, PowerAction, PowerState};

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: String,
}

fn bootdev_action(device: BootDevice) -> &'static str {
    match device {
        BootDevice::Pxe => "pxeboot",
        BootDevice::Disk => "diskboot",
        BootDevice::Bios => "defaultboot",
    }
}

fn power_action(action: PowerAction) -> Option<&'static str> {
    match action {
        PowerAction::On | PowerAction::Off => Some("cyclepower"),
        PowerAction::Reset => Some("reboot"),
        PowerAction::Cycle => Some("force_reset"),
        PowerAction::Soft => None,
    }
}

#[derive(Debug, Clone)]
pub struct SidecarDriver {
    client: Client,
    port: u16,
}

impl SidecarDriver {
    pub fn new(port: u16, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BmcError::Http(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, port })
    }

    pub fn url(&self, target: &BmcTarget, action: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("http://{}:{}/", target.ip, self.port))
            .map_err(|e| BmcError::Http(format!("invalid sidecar address {}: {}", target.ip, e)))?;
        url.path_segments_mut()
            .map_err(|_| BmcError::Http(format!("invalid sidecar address {}", target.ip)))?
            .pop_if_empty()
            .extend(["service", &target.machine_name, "state_controller", action]);
        Ok(url)
    }

    async fn call(&self, target: &BmcTarget, action: &str) -> Result<reqwest::Response> {
        let url = self.url(target, action)?;
        tracing::debug!("BMC sidecar request: GET {}", url);

        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                BmcError::Timeout(format!("sidecar {}", action))
            } else {
                BmcError::Http(format!("sidecar {}: {}", action, e))
            }
        })?;

        if resp.status() != StatusCode::OK {
            return Err(BmcError::Http(format!(
                "libvirt BMC error on {}: {}",
                action,
                resp.status().as_u16()
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl BmcController for SidecarDriver {
    fn validate_info(&self, _info: &str) -> Result<()> {
        Ok(())
    }

    async fn set_bootdev(&self, target: &BmcTarget, device: BootDevice) -> Result<()> {
        self.call(target, bootdev_action(device)).await.map(|_| ())
    }

    async fn set_power(&self, target: &BmcTarget, action: PowerAction) -> Result<()> {
        let path = power_action(action)
            .ok_or_else(|| BmcError::Unsupported(format!("power {} on libvirt BMC", action)))?;
        self.call(target, path).await.map(|_| ())
    }

    async fn get_power(&self, target: &BmcTarget) -> Result<PowerState> {
        let resp = self.call(target, "status").await?;
        let status: StatusResponse = resp
            .json()
            .await
            .map_err(|e| BmcError::Parse(format!("sidecar status: {}", e)))?;
        Ok(PowerState::from_word(&status.state))
    }

    async fn deactivate_console(&self, _target: &BmcTarget) -> Result<()> {
        Ok(())
    }

    fn launch_console_command(&self, _target: &BmcTarget) -> Result<ConsoleCommand> {
        Err(BmcError::Unsupported("console not supported".to_string()))
    }
}
