use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

use crate::error::{Error, Result};
use crate::options::DhcpOption;

/// A named set of network parameters handed to clients.
///
/// Two profiles are configured: one for clients served from the dynamic
/// pool and one for clients with a reserved (directory-provisioned)
/// address. They typically differ in subnet scope and upstream routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionProfile {
    pub subnet_mask: Ipv4Addr,
    pub router: Ipv4Addr,
    pub dns_server: Ipv4Addr,
}

impl OptionProfile {
    /// The profile's option set in wire form.
    pub fn to_options(&self) -> Vec<DhcpOption> {
        vec![
            DhcpOption::SubnetMask(self.subnet_mask),
            DhcpOption::Router(vec![self.router]),
            DhcpOption::DnsServer(vec![self.dns_server]),
        ]
    }
}

/// How to treat a directory row whose hardware address fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryStrictness {
    /// Refuse to start; the static table cannot be trusted.
    Fatal,
    /// Log the row and continue without it.
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server_ip: Ipv4Addr,
    pub pool_start: Ipv4Addr,
    pub pool_size: u32,
    pub lease_duration_seconds: u32,
    /// First two octets of the network the directory's static addresses
    /// live in; a row's `net`/`host` octets complete the address.
    pub network_prefix: [u8; 2],
    pub directory_file: String,
    pub directory_strictness: DirectoryStrictness,
    /// Options for clients served from the dynamic pool.
    pub dynamic_options: OptionProfile,
    /// Options for clients with a directory-provisioned address.
    pub reserved_options: OptionProfile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::new(192, 168, 1, 2),
            pool_start: Ipv4Addr::new(192, 168, 1, 10),
            pool_size: 200,
            lease_duration_seconds: 7200,
            network_prefix: [172, 16],
            directory_file: "directory.json".to_string(),
            directory_strictness: DirectoryStrictness::Fatal,
            dynamic_options: OptionProfile {
                subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
                router: Ipv4Addr::new(192, 168, 1, 1),
                dns_server: Ipv4Addr::new(192, 168, 1, 1),
            },
            reserved_options: OptionProfile {
                subnet_mask: Ipv4Addr::new(255, 255, 254, 0),
                router: Ipv4Addr::new(172, 16, 0, 1),
                dns_server: Ipv4Addr::new(172, 16, 4, 1),
            },
        }
    }
}

impl Config {
    /// Loads the configuration from `path`, writing out the defaults first
    /// if the file does not exist yet.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::InvalidConfig(
                "pool_size must be greater than 0".to_string(),
            ));
        }

        let start = u32::from(self.pool_start);
        let end = start.checked_add(self.pool_size - 1).ok_or_else(|| {
            Error::InvalidConfig("pool range overflows the address space".to_string())
        })?;

        let server = u32::from(self.server_ip);
        if server >= start && server <= end {
            return Err(Error::InvalidConfig(
                "server_ip must not be within the pool range".to_string(),
            ));
        }

        if self.lease_duration_seconds == 0 {
            return Err(Error::InvalidConfig(
                "lease_duration_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
