//! IPMI over LAN via the external `ipmitool` binary.
//!
//! The command line is built by [`IpmiCommand`] and executed as a child
//! process with a hard timeout. The bridged (cartridge) driver reuses the same
//! builder and only contributes bridge hops.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

use super::controller::BmcController;
use super::error::{BmcError, Result};
use super::types::{BmcTarget, BootDevice, ConsoleCommand, PowerAction, PowerState};

/// One IPMB bridging hop: channel number and target address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeHop {
    pub channel: u64,
    pub address: u64,
}

/// How to run ipmitool
#[derive(Debug, Clone)]
pub struct IpmiSettings {
    pub tool: String,
    pub timeout: Duration,
}

/// A fully-built ipmitool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmiCommand {
    program: String,
    args: Vec<String>,
    password: String,
}

impl IpmiCommand {
    /// Base flags: interface, credentials, privilege, bridge hops, single retry.
    pub fn new(tool: &str, target: &BmcTarget, bridge: &[BridgeHop]) -> Self {
        let mut args: Vec<String> = vec!["-I".into(), "lanplus".into()];
        if !target.ip.is_empty() {
            args.extend(["-H".into(), target.ip.clone()]);
        }
        if !target.username.is_empty() {
            args.extend(["-U".into(), target.username.clone()]);
        }
        // -P is always present so ipmitool never prompts
        args.extend(["-P".into(), target.password.clone()]);
        if !target.privilege_level.is_empty() {
            args.extend(["-L".into(), target.privilege_level.clone()]);
        }

        let mut hops = bridge.iter();
        if bridge.len() > 1 {
            if let Some(hop) = hops.next() {
                args.extend([
                    "-B".into(),
                    hop.channel.to_string(),
                    "-T".into(),
                    hop.address.to_string(),
                ]);
            }
        }
        if let Some(hop) = hops.next() {
            args.extend([
                "-b".into(),
                hop.channel.to_string(),
                "-t".into(),
                hop.address.to_string(),
            ]);
        }

        args.extend(["-R".into(), "1".into()]);

        Self {
            program: tool.to_string(),
            args,
            password: target.password.clone(),
        }
    }

    pub fn subcommand(mut self, parts: &[&str]) -> Self {
        self.args.extend(parts.iter().map(|p| p.to_string()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Command line suitable for logs, with the password masked
    pub fn redacted(&self) -> String {
        let mut out = vec![self.program.clone()];
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next && !self.password.is_empty() {
                out.push("****".to_string());
            } else {
                out.push(arg.clone());
            }
            mask_next = arg == "-P";
        }
        out.join(" ")
    }

    pub fn into_console_command(self) -> ConsoleCommand {
        ConsoleCommand {
            command: self.program,
            args: self.args,
        }
    }
}

/// Extract the state word from `chassis power status` output
pub fn parse_power_status(output: &str) -> Result<PowerState> {
    let re = regex_lite::Regex::new(r"^Chassis Power is (\w+)")
        .map_err(|e| BmcError::Parse(e.to_string()))?;
    re.captures(output.trim_start())
        .and_then(|caps| caps.get(1))
        .map(|word| PowerState::from_word(word.as_str()))
        .ok_or_else(|| BmcError::Parse(format!("Unable to parse power state: {}", output.trim())))
}

/// Generic IPMI driver (`ipmi` BMC type)
#[derive(Debug, Clone)]
pub struct IpmiDriver {
    settings: IpmiSettings,
}

impl IpmiDriver {
    pub fn new(settings: IpmiSettings) -> Self {
        Self { settings }
    }

    pub fn command(&self, target: &BmcTarget, bridge: &[BridgeHop], sub: &[&str]) -> IpmiCommand {
        IpmiCommand::new(&self.settings.tool, target, bridge).subcommand(sub)
    }

    /// Run the command, returning combined stdout/stderr on success
    pub async fn run(&self, cmd: &IpmiCommand) -> Result<String> {
        tracing::debug!("IPMI command: {}", cmd.redacted());

        let child = Command::new(cmd.program())
            .args(cmd.args())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.settings.timeout, child)
            .await
            .map_err(|_| BmcError::Timeout(cmd.redacted()))?
            .map_err(|e| BmcError::CommandFailed(format!("{}: {}", cmd.program(), e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(BmcError::CommandFailed(format!(
                "{} ({}): {}",
                cmd.redacted(),
                output.status,
                text.trim()
            )));
        }
        Ok(text)
    }

    pub(crate) async fn set_bootdev_via(
        &self,
        target: &BmcTarget,
        bridge: &[BridgeHop],
        device: BootDevice,
    ) -> Result<()> {
        let dev = device.to_string();
        let cmd = self.command(target, bridge, &["chassis", "bootdev", &dev]);
        self.run(&cmd).await.map(|_| ())
    }

    pub(crate) async fn set_power_via(
        &self,
        target: &BmcTarget,
        bridge: &[BridgeHop],
        action: PowerAction,
    ) -> Result<()> {
        let action = action.to_string();
        let cmd = self.command(target, bridge, &["chassis", "power", &action]);
        self.run(&cmd).await.map(|_| ())
    }

    pub(crate) async fn get_power_via(&self, target: &BmcTarget, bridge: &[BridgeHop]) -> Result<PowerState> {
        let cmd = self.command(target, bridge, &["chassis", "power", "status"]);
        let output = self.run(&cmd).await?;
        parse_power_status(&output)
    }

    pub(crate) async fn deactivate_console_via(&self, target: &BmcTarget, bridge: &[BridgeHop]) -> Result<()> {
        let cmd = self.command(target, bridge, &["sol", "deactivate"]);
        self.run(&cmd).await.map(|_| ())
    }

    pub(crate) fn console_command_via(&self, target: &BmcTarget, bridge: &[BridgeHop]) -> ConsoleCommand {
        self.command(target, bridge, &["sol", "activate"]).into_console_command()
    }
}

#[async_trait]
impl BmcController for IpmiDriver {
    fn validate_info(&self, _info: &str) -> Result<()> {
        Ok(())
    }

    async fn set_bootdev(&self, target: &BmcTarget, device: BootDevice) -> Result<()> {
        self.set_bootdev_via(target, &[], device).await
    }

    async fn set_power(&self, target: &BmcTarget, action: PowerAction) -> Result<()> {
        self.set_power_via(target, &[], action).await
    }

    async fn get_power(&self, target: &BmcTarget) -> Result<PowerState> {
        self.get_power_via(target, &[]).await
    }

    async fn deactivate_console(&self, target: &BmcTarget) -> Result<()> {
        self.deactivate_console_via(target, &[]).await
    }

    fn launch_console_command(&self, target: &BmcTarget) -> Result<ConsoleCommand> {
        Ok(self.console_command_via(target, &[]))
    }
}
