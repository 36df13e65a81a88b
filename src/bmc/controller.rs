//! BMC capability contract and the composite operations built on it

use async_trait::async_trait;

use super::error::Result;
use super::types::{BmcTarget, BootDevice, ConsoleCommand, PowerAction, PowerState};

/// Operations every BMC driver provides.
///
/// Implementations translate these into their wire protocol; callers only
/// ever see [`super::BmcError`].
#[async_trait]
pub trait BmcController: Send + Sync {
    /// Check the vendor-specific `bmc_info` string stored on a machine
    fn validate_info(&self, info: &str) -> Result<()>;

    /// Set the next boot device
    async fn set_bootdev(&self, target: &BmcTarget, device: BootDevice) -> Result<()>;

    /// Apply a chassis power action
    async fn set_power(&self, target: &BmcTarget, action: PowerAction) -> Result<()>;

    /// Current chassis power state
    async fn get_power(&self, target: &BmcTarget) -> Result<PowerState>;

    /// Tear down any active serial-over-LAN session
    async fn deactivate_console(&self, target: &BmcTarget) -> Result<()>;

    /// Command that attaches to the machine's serial console
    fn launch_console_command(&self, target: &BmcTarget) -> Result<ConsoleCommand>;
}

/// Cycle power if the machine is on, otherwise power it on.
pub async fn reboot<C: BmcController + ?Sized>(ctl: &C, target: &BmcTarget) -> Result<()> {
    match ctl.get_power(target).await? {
        PowerState::On => ctl.set_power(target, PowerAction::Cycle).await,
        _ => ctl.set_power(target, PowerAction::On).await,
    }
}

/// Set the boot device, then reboot.
pub async fn reboot_into<C: BmcController + ?Sized>(
    ctl: &C,
    target: &BmcTarget,
    device: BootDevice,
) -> Result<()> {
    ctl.set_bootdev(target, device).await?;
    reboot(ctl, target).await
}

pub async fn pxe_reboot<C: BmcController + ?Sized>(ctl: &C, target: &BmcTarget) -> Result<()> {
    reboot_into(ctl, target, BootDevice::Pxe).await
}

pub async fn disk_reboot<C: BmcController + ?Sized>(ctl: &C, target: &BmcTarget) -> Result<()> {
    reboot_into(ctl, target, BootDevice::Disk).await
}

pub async fn bios_reboot<C: BmcController + ?Sized>(ctl: &C, target: &BmcTarget) -> Result<()> {
    reboot_into(ctl, target, BootDevice::Bios).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every call; reports a fixed power state
    struct MockBmcController {
        state: Mutex<PowerState>,
        calls: Mutex<Vec<String>>,
    }

    impl MockBmcController {
        fn new(state: PowerState) -> Self {
            Self {
                state: Mutex::new(state),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl BmcController for MockBmcController {
        fn validate_info(&self, _info: &str) -> Result<()> {
            Ok(())
        }

        async fn set_bootdev(&self, _target: &BmcTarget, device: BootDevice) -> Result<()> {
            self.record(format!("bootdev {}", device));
            Ok(())
        }

        async fn set_power(&self, _target: &BmcTarget, action: PowerAction) -> Result<()> {
            self.record(format!("power {}", action));
            let mut state = self.state.lock().unwrap();
            *state = match action {
                PowerAction::Off | PowerAction::Soft => PowerState::Off,
                _ => PowerState::On,
            };
            Ok(())
        }

        async fn get_power(&self, _target: &BmcTarget) -> Result<PowerState> {
            self.record("status".to_string());
            Ok(*self.state.lock().unwrap())
        }

        async fn deactivate_console(&self, _target: &BmcTarget) -> Result<()> {
            self.record("sol deactivate".to_string());
            Ok(())
        }

        fn launch_console_command(&self, target: &BmcTarget) -> Result<ConsoleCommand> {
            Ok(ConsoleCommand {
                command: "mock-console".into(),
                args: vec![target.machine_name.clone()],
            })
        }
    }

    fn target() -> BmcTarget {
        crate::bmc::ipmi::tests::test_target()
    }

    #[tokio::test]
    async fn test_reboot_cycles_when_on() {
        let ctl = MockBmcController::new(PowerState::On);
        reboot(&ctl, &target()).await.unwrap();
        assert_eq!(ctl.calls(), vec!["status", "power cycle"]);
    }

    #[tokio::test]
    async fn test_reboot_powers_on_when_off() {
        let ctl = MockBmcController::new(PowerState::Off);
        reboot(&ctl, &target()).await.unwrap();
        assert_eq!(ctl.calls(), vec!["status", "power on"]);
    }

    #[tokio::test]
    async fn test_boot_device_reboots() {
        let ctl = MockBmcController::new(PowerState::On);
        pxe_reboot(&ctl, &target()).await.unwrap();
        disk_reboot(&ctl, &target()).await.unwrap();
        bios_reboot(&ctl, &target()).await.unwrap();
        assert_eq!(
            ctl.calls(),
            vec![
                "bootdev pxe", "status", "power cycle",
                "bootdev disk", "status", "power cycle",
                "bootdev bios", "status", "power cycle",
            ]
        );
    }
}
