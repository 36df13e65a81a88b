pub mod console;
pub mod control;
pub mod networks;
pub mod reservation;

pub use console::ConsoleTokenBroker;
pub use control::{MachineControl, PowerRequest};
pub use networks::NetworkRegistry;
pub use reservation::ReservationEngine;

use anyhow::Result;

use crate::bmc::{BmcDriver, BmcRegistry, BmcTarget};
use crate::db::Store;
use crate::error::ProvisionError;
use crate::models::Machine;

/// Load a machine together with the driver and target for its BMC.
/// Fails with NoBmcConfigured when the machine has none.
pub(crate) async fn bmc_context<'r>(
    store: &Store,
    registry: &'r BmcRegistry,
    machine_id: i64,
) -> Result<(Machine, BmcTarget, &'r BmcDriver)> {
    let machine = store
        .get_machine(machine_id)
        .await?
        .ok_or_else(|| ProvisionError::not_found("Machine", machine_id))?;
    let bmc_id = machine.bmc_id.ok_or(ProvisionError::NoBmcConfigured)?;
    let bmc = store
        .get_bmc(bmc_id)
        .await?
        .ok_or(ProvisionError::NoBmcConfigured)?;
    let driver = registry.resolve(&bmc.bmc_type).map_err(ProvisionError::from)?;
    let target = BmcTarget::new(&bmc, &machine);
    Ok((machine, target, driver))
}
