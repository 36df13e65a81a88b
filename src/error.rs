use thiserror::Error;

use crate::bmc::BmcError;
use crate::net::AddressError;

/// Domain errors carried inside `anyhow::Error` by services and repos.
///
/// The HTTP layer downcasts to this type to pick a status code, the same way
/// the store's "not found" case is recognised without string matching.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{0}")]
    Conflict(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("no matching machine")]
    NoMatch,

    #[error("no more IPs available")]
    AddressExhausted,

    #[error("no BMC configured")]
    NoBmcConfigured,

    #[error("invalid query: {0}")]
    QuerySyntax(String),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Bmc(#[from] BmcError),
}

impl ProvisionError {
    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        Self::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(vec![msg.into()])
    }
}

/// Pull the typed domain error out of an anyhow chain, if there is one.
pub fn domain_error(err: &anyhow::Error) -> Option<&ProvisionError> {
    err.downcast_ref::<ProvisionError>()
}
