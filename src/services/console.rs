//! Short-lived tokens that let a console proxy launch a machine's serial
//! console without holding BMC credentials itself.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::bmc::{BmcController, BmcRegistry};
use crate::db::Store;
use crate::error::ProvisionError;
use crate::models::ConsoleToken;

use super::bmc_context;

/// Token lifetime; anything this old is purged before a lookup
pub const TOKEN_TTL_SECS: i64 = 300;

const TOKEN_BYTES: usize = 24;

fn generate_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Clone)]
pub struct ConsoleTokenBroker {
    store: Store,
    registry: BmcRegistry,
}

impl ConsoleTokenBroker {
    pub fn new(store: Store, registry: BmcRegistry) -> Self {
        Self { store, registry }
    }

    pub async fn issue(&self, machine_id: i64, user_id: Option<&str>) -> Result<ConsoleToken> {
        self.issue_at(machine_id, user_id, Utc::now()).await
    }

    /// Store the machine's console launch command under a fresh random token
    pub async fn issue_at(&self, machine_id: i64, user_id: Option<&str>, now: DateTime<Utc>) -> Result<ConsoleToken> {
        let (machine, target, driver) = bmc_context(&self.store, &self.registry, machine_id).await?;
        let command = driver.launch_console_command(&target).map_err(ProvisionError::from)?;

        let token = ConsoleToken {
            token: generate_token(),
            machine_id,
            user_id: user_id.map(String::from),
            command,
            created_at: now,
        };
        self.store.create_console_token(&token).await?;
        tracing::info!("Issued console token for machine {}", machine.name);
        Ok(token)
    }

    pub async fn resolve(&self, token: &str) -> Result<ConsoleToken> {
        self.resolve_at(token, Utc::now()).await
    }

    /// Purge expired tokens, then look `token` up. Tokens can be replayed
    /// until they expire.
    pub async fn resolve_at(&self, token: &str, now: DateTime<Utc>) -> Result<ConsoleToken> {
        let purged = self
            .store
            .purge_console_tokens(now - Duration::seconds(TOKEN_TTL_SECS))
            .await?;
        if purged > 0 {
            tracing::debug!("Purged {} expired console token(s)", purged);
        }

        self.store
            .get_console_token(token)
            .await?
            .ok_or_else(|| ProvisionError::not_found("Console token", token).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmc::BmcSettings;
    use crate::error::domain_error;
    use crate::models::{CreateBmcRequest, CreateMachineRequest};

    async fn setup() -> (ConsoleTokenBroker, i64, i64) {
        let store = Store::in_memory().await.unwrap();
        let bmc = store
            .create_bmc(&CreateBmcRequest {
                name: "bmc-1".into(),
                ip: "10.1.0.1".into(),
                username: "admin".into(),
                password: "secret".into(),
                privilege_level: None,
                bmc_type: "ipmi".into(),
            })
            .await
            .unwrap();
        let managed = store
            .create_machine(&CreateMachineRequest {
                name: "node-1".into(),
                bmc_id: Some(bmc.id),
                ..Default::default()
            })
            .await
            .unwrap();
        let bare = store
            .create_machine(&CreateMachineRequest {
                name: "node-2".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let registry = BmcRegistry::new(&BmcSettings::default()).unwrap();
        (ConsoleTokenBroker::new(store, registry), managed.id, bare.id)
    }

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 48);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[tokio::test]
    async fn test_issue_stores_launch_command() {
        let (broker, machine_id, _) = setup().await;
        let issued = broker.issue(machine_id, None).await.unwrap();
        assert_eq!(issued.command.command, "ipmitool");
        assert!(issued.command.args.join(" ").ends_with("sol activate"));

        let resolved = broker.resolve(&issued.token).await.unwrap();
        assert_eq!(resolved.command, issued.command);
        // replayable until expiry
        assert!(broker.resolve(&issued.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_issue_without_bmc() {
        let (broker, _, bare_id) = setup().await;
        let err = broker.issue(bare_id, None).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(ProvisionError::NoBmcConfigured)));
    }

    #[tokio::test]
    async fn test_token_expires_after_five_minutes() {
        let (broker, machine_id, _) = setup().await;
        let t = Utc::now();
        let issued = broker.issue_at(machine_id, None, t).await.unwrap();

        let just_before = t + Duration::minutes(4) + Duration::seconds(59);
        assert!(broker.resolve_at(&issued.token, just_before).await.is_ok());

        let just_after = t + Duration::minutes(5) + Duration::seconds(1);
        let err = broker.resolve_at(&issued.token, just_after).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(ProvisionError::NotFound { .. })));

        // purged, so even an earlier clock no longer finds it
        assert!(broker.resolve_at(&issued.token, t).await.is_err());
    }
}
