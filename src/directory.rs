//! Static binding table sourced from the device directory.
//!
//! The directory is an export of the network's provisioning records: one
//! row per known device, carrying its hardware address and the host part
//! of its assigned address relative to a fixed network prefix. The table
//! is built once at startup and never mutated afterwards; re-provisioning
//! a device requires a restart.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DirectoryStrictness;
use crate::error::{Error, Result};
use crate::packet::MacAddr;

/// One row of the device directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryRecord {
    /// Hardware address in colon- or dash-separated notation.
    pub mac: String,
    /// Third octet of the assigned address.
    pub net: u8,
    /// Fourth octet of the assigned address. Zero means "no address
    /// provisioned" and the row contributes no binding.
    pub host: u8,
    /// Administrative flag carried through from the directory.
    #[serde(default)]
    pub active: bool,
    /// End of the record's validity window, if bounded.
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

impl DirectoryRecord {
    /// A record is in good standing while it is active and its validity
    /// window is open. Standing is informational: it is logged at load
    /// time but does not gate the binding.
    pub fn in_good_standing(&self, now: DateTime<Utc>) -> bool {
        self.active && self.valid_to.is_none_or(|until| until >= now)
    }
}

/// Immutable lookup from hardware address to reserved IP and back.
///
/// Reserved addresses always win over dynamic allocation for a matching
/// hardware address.
#[derive(Debug, Default)]
pub struct BindingTable {
    by_mac: HashMap<MacAddr, Ipv4Addr>,
    by_ip: HashMap<Ipv4Addr, MacAddr>,
}

impl BindingTable {
    /// Reads directory rows from a JSON file and builds the table.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or — with
    /// [`DirectoryStrictness::Fatal`] — if any row carries a malformed
    /// hardware address.
    pub fn load<P: AsRef<Path>>(
        path: P,
        prefix: [u8; 2],
        strictness: DirectoryStrictness,
    ) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let records: Vec<DirectoryRecord> = serde_json::from_str(&content)?;
        Self::from_records(&records, prefix, strictness)
    }

    /// Builds the table from already-parsed directory rows.
    ///
    /// A row contributes a binding only if its host octet is non-zero and
    /// its hardware address is not the all-zero placeholder.
    pub fn from_records(
        records: &[DirectoryRecord],
        prefix: [u8; 2],
        strictness: DirectoryStrictness,
    ) -> Result<Self> {
        let now = Utc::now();
        let mut table = Self::default();

        for (row, record) in records.iter().enumerate() {
            let mac = match record.mac.parse::<MacAddr>() {
                Ok(mac) => mac,
                Err(_) => match strictness {
                    DirectoryStrictness::Fatal => {
                        return Err(Error::BadDirectoryRow {
                            row,
                            mac: record.mac.clone(),
                        });
                    }
                    DirectoryStrictness::Skip => {
                        warn!(
                            "directory row {} has bad hardware address {:?}, skipping",
                            row, record.mac
                        );
                        continue;
                    }
                },
            };

            if record.host == 0 || mac.is_zero() {
                continue;
            }

            let ip = Ipv4Addr::new(prefix[0], prefix[1], record.net, record.host);
            if !record.in_good_standing(now) {
                debug!("binding {} -> {} is past its validity window", mac, ip);
            }

            table.by_mac.insert(mac, ip);
            table.by_ip.insert(ip, mac);
            debug!("static binding {} -> {}", mac, ip);
        }

        info!("loaded {} static bindings", table.len());
        Ok(table)
    }

    /// Returns the reserved IP for a hardware address, if one exists.
    pub fn ip_for(&self, mac: &MacAddr) -> Option<Ipv4Addr> {
        self.by_mac.get(mac).copied()
    }

    /// Returns the hardware address a reserved IP belongs to, if any.
    pub fn owner_of(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.by_ip.get(&ip).copied()
    }

    pub fn len(&self) -> usize {
        self.by_mac.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_mac.is_empty()
    }

    /// Iterates over all bindings in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&MacAddr, &Ipv4Addr)> {
        self.by_mac.iter()
    }
}
