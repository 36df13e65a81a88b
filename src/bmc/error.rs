//! Error types for BMC operations

use thiserror::Error;

/// Every driver failure surfaces as one of these; vendor-specific errors
/// never escape the driver.
#[derive(Debug, Error)]
pub enum BmcError {
    /// External tool exited non-zero or could not be spawned
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// Operation exceeded the configured timeout
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Sidecar request failed or answered with a non-200 status
    #[error("http error: {0}")]
    Http(String),

    /// Tool output could not be understood
    #[error("unparsable response: {0}")]
    Parse(String),

    /// Vendor-specific `bmc_info` rejected by the driver
    #[error("{0}")]
    InvalidInfo(String),

    /// Driver cannot perform the requested operation
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// No driver is registered under this type tag
    #[error("unknown BMC type: {0}")]
    UnknownType(String),
}

/// Result type for BMC operations
pub type Result<T> = std::result::Result<T, BmcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BmcError::CommandFailed("exit status 1: Unable to establish session".to_string());
        assert_eq!(err.to_string(), "command failed: exit status 1: Unable to establish session");

        let err = BmcError::InvalidInfo("Not a valid moonshot cartridge id.".to_string());
        assert_eq!(err.to_string(), "Not a valid moonshot cartridge id.");

        let err = BmcError::UnknownType("redfish".to_string());
        assert_eq!(err.to_string(), "unknown BMC type: redfish");
    }
}
