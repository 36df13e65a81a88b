//! Library API for operating machines: claiming them, driving their BMCs,
//! and handing out console sessions.

use anyhow::Result;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::bmc::{self, canonical_type, BmcController, BmcRegistry, BootDevice, ConsoleCommand, PowerAction, PowerState};
use crate::db::Store;
use crate::error::ProvisionError;
use crate::models::*;

use super::{bmc_context, ConsoleTokenBroker, ReservationEngine};

/// Power operations exposed to callers; reboots are composites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerRequest {
    On,
    Off,
    Reboot,
    PxeReboot,
    BiosReboot,
    DiskReboot,
    Cycle,
    Reset,
    Soft,
}

impl FromStr for PowerRequest {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(PowerRequest::On),
            "off" => Ok(PowerRequest::Off),
            "reboot" => Ok(PowerRequest::Reboot),
            "pxe_reboot" => Ok(PowerRequest::PxeReboot),
            "bios_reboot" => Ok(PowerRequest::BiosReboot),
            "disk_reboot" => Ok(PowerRequest::DiskReboot),
            "cycle" => Ok(PowerRequest::Cycle),
            "reset" => Ok(PowerRequest::Reset),
            "soft" => Ok(PowerRequest::Soft),
            other => Err(ProvisionError::validation(format!("Unknown power state: {}", other))),
        }
    }
}

/// Where console clients are told to connect
#[derive(Debug, Clone)]
pub struct ConsoleEndpoint {
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct MachineControl {
    store: Store,
    registry: BmcRegistry,
    reservations: ReservationEngine,
    console: ConsoleTokenBroker,
    endpoint: ConsoleEndpoint,
}

impl MachineControl {
    pub fn new(store: Store, registry: BmcRegistry, endpoint: ConsoleEndpoint) -> Self {
        Self {
            reservations: ReservationEngine::new(store.clone()),
            console: ConsoleTokenBroker::new(store.clone(), registry.clone()),
            store,
            registry,
            endpoint,
        }
    }

    pub async fn snapshot(&self, machine_id: i64) -> Result<MachineSnapshot> {
        let machine = self
            .store
            .get_machine(machine_id)
            .await?
            .ok_or_else(|| ProvisionError::not_found("Machine", machine_id))?;
        let assignment = self.store.get_assignment(machine_id).await?;
        Ok(MachineSnapshot { machine, assignment })
    }

    // ========== Inventory ==========

    pub async fn register_user(&self, username: &str) -> Result<User> {
        let username = username.trim();
        if !(2..=256).contains(&username.chars().count()) {
            return Err(ProvisionError::validation("Username must be between 2 and 256 characters long").into());
        }
        if self.store.get_user_by_username(username).await?.is_some() {
            return Err(ProvisionError::Conflict(format!("User {} already exists", username)).into());
        }
        let user = self.store.create_user(username).await?;
        tracing::info!("Registered user {}", user.username);
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.store.list_users().await
    }

    /// Register a BMC. Legacy type tags are stored under their current name.
    pub async fn register_bmc(&self, req: &CreateBmcRequest) -> Result<Bmc> {
        let mut errors = Vec::new();
        let bmc_type = canonical_type(&req.bmc_type);
        if bmc_type.is_none() {
            errors.push(format!("BMC type {} is not a valid type", req.bmc_type));
        }
        if !(2..=256).contains(&req.name.chars().count()) {
            errors.push("BMC name must be between 2 and 256 characters long".to_string());
        }
        if req.username.chars().count() > 256 {
            errors.push("username must be between 0 and 256 characters long".to_string());
        }
        if req.password.chars().count() > 256 {
            errors.push("password must be between 0 and 256 characters long".to_string());
        }
        if req.ip.parse::<Ipv4Addr>().is_err() {
            errors.push("IP must be a valid IP address".to_string());
        }
        if !errors.is_empty() {
            return Err(ProvisionError::Validation(errors).into());
        }

        let req = CreateBmcRequest {
            bmc_type: bmc_type.unwrap_or_default().to_string(),
            ..req.clone()
        };
        let bmc = self.store.create_bmc(&req).await?;
        tracing::info!("Registered {} BMC {} at {}", bmc.bmc_type, bmc.name, bmc.ip);
        Ok(bmc)
    }

    pub async fn list_bmcs(&self) -> Result<Vec<Bmc>> {
        self.store.list_bmcs().await
    }

    /// Delete a BMC; machines behind it stay registered without one
    pub async fn remove_bmc(&self, bmc_id: i64) -> Result<()> {
        self.store.delete_bmc(bmc_id).await?;
        tracing::info!("Removed BMC {}", bmc_id);
        Ok(())
    }

    pub async fn register_machine(&self, req: &CreateMachineRequest) -> Result<Machine> {
        let mut errors = Vec::new();
        if !(2..=256).contains(&req.name.chars().count()) {
            errors.push("Machine name must be between 2 and 256 characters long".to_string());
        }
        if let Some(bmc_id) = req.bmc_id {
            match self.store.get_bmc(bmc_id).await? {
                None => errors.push(format!("A BMC with id={} does not exist", bmc_id)),
                Some(bmc) => {
                    let driver = self.registry.resolve(&bmc.bmc_type).map_err(ProvisionError::from)?;
                    if let Err(e) = driver.validate_info(&req.bmc_info) {
                        errors.push(e.to_string());
                    }
                }
            }
        }
        if !errors.is_empty() {
            return Err(ProvisionError::Validation(errors).into());
        }

        let machine = self.store.create_machine(req).await?;
        tracing::info!("Registered machine {}", machine.name);
        Ok(machine)
    }

    /// Delete a machine with its interfaces, assignment and console tokens
    pub async fn remove_machine(&self, machine_id: i64) -> Result<()> {
        let machine = self
            .store
            .get_machine(machine_id)
            .await?
            .ok_or_else(|| ProvisionError::not_found("Machine", machine_id))?;
        self.store.delete_machine(machine_id).await?;
        tracing::info!("Removed machine {}", machine.name);
        Ok(())
    }

    pub async fn list_machines(&self, query: &str, include_claimed: bool) -> Result<Vec<MachineSummary>> {
        self.reservations.list(query, include_claimed).await
    }

    // ========== Assignment ==========

    pub async fn reserve(&self, query: &str, user_id: &str, reason: &str) -> Result<MachineSnapshot> {
        let machine = self.reservations.reserve(query, user_id, reason).await?;
        self.snapshot(machine.id).await
    }

    pub async fn assign(&self, machine_id: i64, user_id: &str, reason: &str) -> Result<MachineSnapshot> {
        self.reservations.assign(machine_id, user_id, reason).await?;
        self.snapshot(machine_id).await
    }

    pub async fn reassign(&self, machine_id: i64, user_id: &str, reason: &str) -> Result<MachineSnapshot> {
        self.reservations.reassign(machine_id, user_id, reason).await?;
        self.snapshot(machine_id).await
    }

    pub async fn unassign(&self, machine_id: i64) -> Result<MachineSnapshot> {
        self.reservations.unassign(machine_id).await?;
        self.snapshot(machine_id).await
    }

    // ========== BMC ==========

    pub async fn set_power(&self, machine_id: i64, request: PowerRequest) -> Result<MachineSnapshot> {
        let (machine, target, driver) = bmc_context(&self.store, &self.registry, machine_id).await?;
        tracing::info!("Power {:?} on machine {}", request, machine.name);

        let result = match request {
            PowerRequest::On => driver.set_power(&target, PowerAction::On).await,
            PowerRequest::Off => driver.set_power(&target, PowerAction::Off).await,
            PowerRequest::Cycle => driver.set_power(&target, PowerAction::Cycle).await,
            PowerRequest::Reset => driver.set_power(&target, PowerAction::Reset).await,
            PowerRequest::Soft => driver.set_power(&target, PowerAction::Soft).await,
            PowerRequest::Reboot => bmc::reboot(driver, &target).await,
            PowerRequest::PxeReboot => bmc::pxe_reboot(driver, &target).await,
            PowerRequest::BiosReboot => bmc::bios_reboot(driver, &target).await,
            PowerRequest::DiskReboot => bmc::disk_reboot(driver, &target).await,
        };
        result.map_err(ProvisionError::from)?;
        self.snapshot(machine_id).await
    }

    /// Current power state. BMC failures are logged and reported as unknown.
    pub async fn get_power(&self, machine_id: i64) -> Result<PowerState> {
        let (machine, target, driver) = bmc_context(&self.store, &self.registry, machine_id).await?;
        match driver.get_power(&target).await {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!("Failed to read power state of {}: {}", machine.name, e);
                Ok(PowerState::Unknown)
            }
        }
    }

    pub async fn set_bootdev(&self, machine_id: i64, device: BootDevice) -> Result<MachineSnapshot> {
        let (machine, target, driver) = bmc_context(&self.store, &self.registry, machine_id).await?;
        driver
            .set_bootdev(&target, device)
            .await
            .map_err(ProvisionError::from)?;
        tracing::info!("Set boot device {} on machine {}", device, machine.name);
        self.snapshot(machine_id).await
    }

    // ========== Console ==========

    /// Kick any stale SOL session, then issue a console token
    pub async fn open_console(&self, machine_id: i64, user_id: Option<&str>) -> Result<ConsoleSession> {
        let (machine, target, driver) = bmc_context(&self.store, &self.registry, machine_id).await?;
        if let Err(e) = driver.deactivate_console(&target).await {
            tracing::warn!("Failed to deactivate console on {}: {}", machine.name, e);
        }

        let token = self.console.issue(machine_id, user_id).await?;
        Ok(ConsoleSession {
            host: self.endpoint.host.clone(),
            port: self.endpoint.port,
            token: token.token,
        })
    }

    pub async fn reset_console(&self, machine_id: i64) -> Result<()> {
        let (machine, target, driver) = bmc_context(&self.store, &self.registry, machine_id).await?;
        driver
            .deactivate_console(&target)
            .await
            .map_err(ProvisionError::from)?;
        tracing::info!("Reset console on machine {}", machine.name);
        Ok(())
    }

    /// The launch command stored under `token`, for the console proxy
    pub async fn resolve_console(&self, token: &str) -> Result<ConsoleCommand> {
        Ok(self.console.resolve(token).await?.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmc::sidecar::tests::spawn_sidecar;
    use crate::bmc::BmcSettings;
    use crate::error::domain_error;
    use std::time::Duration;

    struct Fixture {
        control: MachineControl,
        vm: i64,
        server: i64,
        bare: i64,
        user: String,
    }

    async fn fixture(sidecar_port: u16) -> Fixture {
        let store = Store::in_memory().await.unwrap();
        let registry = BmcRegistry::new(&BmcSettings {
            ipmitool_path: "/nonexistent/ipmitool".into(),
            timeout: Duration::from_secs(5),
            sidecar_port,
        })
        .unwrap();
        let control = MachineControl::new(
            store.clone(),
            registry,
            ConsoleEndpoint {
                host: "console.lab".into(),
                port: 8866,
            },
        );

        let hypervisor = control
            .register_bmc(&CreateBmcRequest {
                name: "hv-1".into(),
                ip: "127.0.0.1".into(),
                username: String::new(),
                password: String::new(),
                privilege_level: None,
                bmc_type: "libvirt".into(),
            })
            .await
            .unwrap();
        let ipmi = control
            .register_bmc(&CreateBmcRequest {
                name: "bmc-1".into(),
                ip: "10.1.0.1".into(),
                username: "admin".into(),
                password: "secret".into(),
                privilege_level: None,
                bmc_type: "ipmi".into(),
            })
            .await
            .unwrap();

        let vm = control
            .register_machine(&CreateMachineRequest {
                name: "vm1".into(),
                bmc_id: Some(hypervisor.id),
                ..Default::default()
            })
            .await
            .unwrap();
        let server = control
            .register_machine(&CreateMachineRequest {
                name: "server-1".into(),
                bmc_id: Some(ipmi.id),
                ..Default::default()
            })
            .await
            .unwrap();
        let bare = control
            .register_machine(&CreateMachineRequest {
                name: "bare-1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let user = control.register_user("alice").await.unwrap().id;

        Fixture {
            control,
            vm: vm.id,
            server: server.id,
            bare: bare.id,
            user,
        }
    }

    #[test]
    fn test_power_request_parse() {
        assert_eq!("pxe_reboot".parse::<PowerRequest>().unwrap(), PowerRequest::PxeReboot);
        assert_eq!("soft".parse::<PowerRequest>().unwrap(), PowerRequest::Soft);
        let err = "sideways".parse::<PowerRequest>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown power state: sideways");
    }

    #[tokio::test]
    async fn test_reboots_go_through_sidecar() {
        let (port, log) = spawn_sidecar().await;
        let f = fixture(port).await;

        let snap = f.control.set_power(f.vm, PowerRequest::Reboot).await.unwrap();
        assert_eq!(snap.machine.name, "vm1");
        f.control.set_power(f.vm, PowerRequest::PxeReboot).await.unwrap();
        let snap = f.control.set_bootdev(f.vm, BootDevice::Disk).await.unwrap();
        assert_eq!(snap.machine.id, f.vm);
        assert_eq!(f.control.get_power(f.vm).await.unwrap(), PowerState::On);

        assert_eq!(
            log.lock().unwrap().clone(),
            vec![
                "vm1 status",
                "vm1 force_reset",
                "vm1 pxeboot",
                "vm1 status",
                "vm1 force_reset",
                "vm1 diskboot",
                "vm1 status",
            ]
        );

        let err = f.control.set_power(f.vm, PowerRequest::Soft).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(ProvisionError::Bmc(_))));
    }

    #[tokio::test]
    async fn test_get_power_degrades_to_unknown() {
        let (port, _log) = spawn_sidecar().await;
        let f = fixture(port).await;
        assert_eq!(f.control.get_power(f.server).await.unwrap(), PowerState::Unknown);

        let err = f.control.get_power(f.bare).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(ProvisionError::NoBmcConfigured)));
    }

    #[tokio::test]
    async fn test_open_console_ignores_deactivate_failure() {
        let (port, _log) = spawn_sidecar().await;
        let f = fixture(port).await;

        let session = f.control.open_console(f.server, Some(&f.user)).await.unwrap();
        assert_eq!(session.host, "console.lab");
        assert_eq!(session.port, 8866);
        assert_eq!(session.token.len(), 48);

        let command = f.control.resolve_console(&session.token).await.unwrap();
        assert_eq!(command.command, "/nonexistent/ipmitool");
        assert!(command.args.join(" ").ends_with("-R 1 sol activate"));

        // an explicit reset surfaces the failure
        let err = f.control.reset_console(f.server).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(ProvisionError::Bmc(_))));

        let err = f.control.open_console(f.vm, None).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(ProvisionError::Bmc(_))));

        let err = f.control.open_console(f.bare, None).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(ProvisionError::NoBmcConfigured)));
    }

    #[tokio::test]
    async fn test_assignment_snapshots() {
        let (port, _log) = spawn_sidecar().await;
        let f = fixture(port).await;

        let snap = f.control.reserve(r#"(= bmc_type "libvirt")"#, &f.user, "tests").await.unwrap();
        assert_eq!(snap.machine.id, f.vm);
        assert_eq!(snap.assignment.as_ref().map(|a| a.user_id.as_str()), Some(f.user.as_str()));

        let snap = f.control.assign(f.bare, &f.user, "").await.unwrap();
        assert!(snap.assignment.is_some());

        let bob = f.control.register_user("bob").await.unwrap().id;
        let snap = f.control.reassign(f.bare, &bob, "handover").await.unwrap();
        assert_eq!(snap.assignment.map(|a| a.user_id), Some(bob));

        let snap = f.control.unassign(f.bare).await.unwrap();
        assert!(snap.assignment.is_none());

        let free = f.control.list_machines("", false).await.unwrap();
        assert_eq!(free.len(), 2);
    }

    #[tokio::test]
    async fn test_registration_validation() {
        let (port, _log) = spawn_sidecar().await;
        let f = fixture(port).await;

        let err = f
            .control
            .register_bmc(&CreateBmcRequest {
                name: "x".into(),
                ip: "not-an-ip".into(),
                username: String::new(),
                password: String::new(),
                privilege_level: None,
                bmc_type: "redfish".into(),
            })
            .await
            .unwrap_err();
        match domain_error(&err) {
            Some(ProvisionError::Validation(msgs)) => assert_eq!(
                msgs,
                &vec![
                    "BMC type redfish is not a valid type".to_string(),
                    "BMC name must be between 2 and 256 characters long".to_string(),
                    "IP must be a valid IP address".to_string(),
                ]
            ),
            other => panic!("unexpected {:?}", other),
        }

        let chassis = f
            .control
            .register_bmc(&CreateBmcRequest {
                name: "chassis-1".into(),
                ip: "10.1.0.9".into(),
                username: "admin".into(),
                password: "secret".into(),
                privilege_level: None,
                bmc_type: "moonshot".into(),
            })
            .await
            .unwrap();
        let err = f
            .control
            .register_machine(&CreateMachineRequest {
                name: "cart-0".into(),
                bmc_id: Some(chassis.id),
                bmc_info: "0".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Not a valid moonshot cartridge id.");

        let err = f
            .control
            .register_machine(&CreateMachineRequest {
                name: "orphan".into(),
                bmc_id: Some(999),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "A BMC with id=999 does not exist");
    }

    #[tokio::test]
    async fn test_users_and_legacy_bmc_tags() {
        let (port, _log) = spawn_sidecar().await;
        let f = fixture(port).await;

        let err = f.control.register_user("alice").await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(ProvisionError::Conflict(_))));
        let err = f.control.register_user(" x ").await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(ProvisionError::Validation(_))));
        f.control.register_user("bob").await.unwrap();
        let names: Vec<String> = f.control.list_users().await.unwrap().into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        let legacy = f
            .control
            .register_bmc(&CreateBmcRequest {
                name: "old-bmc".into(),
                ip: "10.1.0.7".into(),
                username: "admin".into(),
                password: "secret".into(),
                privilege_level: None,
                bmc_type: "plain".into(),
            })
            .await
            .unwrap();
        assert_eq!(legacy.bmc_type, "ipmi");
        assert_eq!(f.control.list_bmcs().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_remove_bmc_and_machine() {
        let (port, _log) = spawn_sidecar().await;
        let f = fixture(port).await;

        let server = f.control.snapshot(f.server).await.unwrap().machine;
        f.control.remove_bmc(server.bmc_id.unwrap()).await.unwrap();
        let err = f.control.get_power(f.server).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(ProvisionError::NoBmcConfigured)));
        let err = f.control.remove_bmc(server.bmc_id.unwrap()).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(ProvisionError::NotFound { .. })));

        f.control.assign(f.bare, &f.user, "").await.unwrap();
        f.control.remove_machine(f.bare).await.unwrap();
        let err = f.control.snapshot(f.bare).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(ProvisionError::NotFound { .. })));
        let err = f.control.remove_machine(f.bare).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(ProvisionError::NotFound { .. })));
    }
}
