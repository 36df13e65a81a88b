use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::bmc::BmcSettings;
use crate::services::control::ConsoleEndpoint;

/// Config holds all application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub db_max_connections: u32,
    pub listen_addr: String,
    pub ipmitool_path: String,
    pub bmc_timeout_secs: u64,
    pub bmc_sidecar_port: u16,
    pub tftp_proxy_host: String,
    pub default_bootfile: String,
    pub console_host: String,
    pub console_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "/data/provisioner.db".to_string(),
            db_max_connections: 5,
            listen_addr: "0.0.0.0:8080".to_string(),
            ipmitool_path: "ipmitool".to_string(),
            bmc_timeout_secs: 30,
            bmc_sidecar_port: 9001,
            tftp_proxy_host: "127.0.0.1".to_string(),
            default_bootfile: "pxelinux.0".to_string(),
            console_host: "localhost".to_string(),
            console_port: 8866,
        }
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env`) with defaults
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        let d = Self::default();
        Self {
            db_path: get_env("DB_PATH", &d.db_path),
            db_max_connections: get_env_parsed("DB_MAX_CONNECTIONS", d.db_max_connections),
            listen_addr: get_env("LISTEN_ADDR", &d.listen_addr),
            ipmitool_path: get_env("IPMITOOL_PATH", &d.ipmitool_path),
            bmc_timeout_secs: get_env_parsed("BMC_TIMEOUT_SECS", d.bmc_timeout_secs),
            bmc_sidecar_port: get_env_parsed("BMC_SIDECAR_PORT", d.bmc_sidecar_port),
            tftp_proxy_host: get_env("DHCP_TFTP_PROXY_HOST", &d.tftp_proxy_host),
            default_bootfile: get_env("DHCP_DEFAULT_BOOTFILE", &d.default_bootfile),
            console_host: get_env("CONSOLE_HOST", &d.console_host),
            console_port: get_env_parsed("CONSOLE_PORT", d.console_port),
        }
    }

    pub fn bmc_settings(&self) -> BmcSettings {
        BmcSettings {
            ipmitool_path: self.ipmitool_path.clone(),
            timeout: Duration::from_secs(self.bmc_timeout_secs),
            sidecar_port: self.bmc_sidecar_port,
        }
    }

    pub fn console_endpoint(&self) -> ConsoleEndpoint {
        ConsoleEndpoint {
            host: self.console_host.clone(),
            port: self.console_port,
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_parsed<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparsable {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_env_falls_back() {
        env::set_var("METAL_PROVISIONER_TEST_PORT", "not-a-port");
        assert_eq!(get_env_parsed("METAL_PROVISIONER_TEST_PORT", 8866u16), 8866);
        env::set_var("METAL_PROVISIONER_TEST_PORT", " 9000 ");
        assert_eq!(get_env_parsed("METAL_PROVISIONER_TEST_PORT", 8866u16), 9000);
        env::remove_var("METAL_PROVISIONER_TEST_PORT");
        assert_eq!(get_env_parsed("METAL_PROVISIONER_TEST_PORT", 8866u16), 8866);
    }

    #[test]
    fn test_derived_settings() {
        let cfg = Config::default();
        let bmc = cfg.bmc_settings();
        assert_eq!(bmc.timeout, Duration::from_secs(30));
        assert_eq!(bmc.sidecar_port, 9001);
        let console = cfg.console_endpoint();
        assert_eq!((console.host.as_str(), console.port), ("localhost", 8866));
    }
}
