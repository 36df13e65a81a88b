//! Claiming machines for users, either by query or by name.

use anyhow::Result;
use chrono::Utc;

use crate::db::{ReserveAttempt, Store};
use crate::error::ProvisionError;
use crate::models::{Assignment, Machine, MachineSummary};
use crate::query::compile_machine_query;

/// Transactions tried before a contended reservation reports no match
pub const RESERVE_ATTEMPTS: usize = 3;

const MAX_REASON_LEN: usize = 140;

fn check_reason(reason: &str) -> Result<()> {
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(ProvisionError::validation("Assignee reason must be between 0 and 140 characters long").into());
    }
    Ok(())
}

#[derive(Clone)]
pub struct ReservationEngine {
    store: Store,
}

impl ReservationEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn require_user(&self, user_id: &str) -> Result<()> {
        if self.store.get_user(user_id).await?.is_none() {
            return Err(ProvisionError::not_found("User", user_id).into());
        }
        Ok(())
    }

    async fn require_machine(&self, machine_id: i64) -> Result<Machine> {
        self.store
            .get_machine(machine_id)
            .await?
            .ok_or_else(|| ProvisionError::not_found("Machine", machine_id).into())
    }

    /// Machines matching `query`; claimed machines only when asked for
    pub async fn list(&self, query: &str, include_claimed: bool) -> Result<Vec<MachineSummary>> {
        let compiled = compile_machine_query(query)?;
        self.store.list_machines(&compiled, include_claimed).await
    }

    /// Claim the first unclaimed machine matching `query` for `requester`
    pub async fn reserve(&self, query: &str, requester: &str, reason: &str) -> Result<Machine> {
        let compiled = compile_machine_query(query)?;
        check_reason(reason)?;
        self.require_user(requester).await?;

        for attempt in 1..=RESERVE_ATTEMPTS {
            match self
                .store
                .try_reserve_machine(&compiled, requester, reason, Utc::now())
                .await?
            {
                ReserveAttempt::Reserved(machine_id) => {
                    let machine = self.require_machine(machine_id).await?;
                    tracing::info!("Reserved machine {} for user {}", machine.name, requester);
                    return Ok(machine);
                }
                ReserveAttempt::NoMatch => return Err(ProvisionError::NoMatch.into()),
                ReserveAttempt::Contended => {
                    tracing::debug!("Reservation contended (attempt {}/{})", attempt, RESERVE_ATTEMPTS);
                }
            }
        }

        tracing::warn!("Reservation for user {} gave up after {} attempts", requester, RESERVE_ATTEMPTS);
        Err(ProvisionError::NoMatch.into())
    }

    /// Assign a specific machine. Conflict when it already has an assignee.
    pub async fn assign(&self, machine_id: i64, user_id: &str, reason: &str) -> Result<Assignment> {
        check_reason(reason)?;
        let machine = self.require_machine(machine_id).await?;
        self.require_user(user_id).await?;
        let assignment = self.store.create_assignment(machine_id, user_id, reason).await?;
        tracing::info!("Assigned machine {} to user {}", machine.name, user_id);
        Ok(assignment)
    }

    /// Move an existing assignment to another user
    pub async fn reassign(&self, machine_id: i64, user_id: &str, reason: &str) -> Result<Assignment> {
        check_reason(reason)?;
        let machine = self.require_machine(machine_id).await?;
        self.require_user(user_id).await?;
        let assignment = self
            .store
            .reassign(machine_id, user_id, reason)
            .await?
            .ok_or_else(|| ProvisionError::not_found("Assignment", machine_id))?;
        tracing::info!("Reassigned machine {} to user {}", machine.name, user_id);
        Ok(assignment)
    }

    pub async fn unassign(&self, machine_id: i64) -> Result<()> {
        let machine = self.require_machine(machine_id).await?;
        if !self.store.delete_assignment(machine_id).await? {
            return Err(ProvisionError::not_found("Assignment", machine_id).into());
        }
        tracing::info!("Released machine {}", machine.name);
        Ok(())
    }
}
