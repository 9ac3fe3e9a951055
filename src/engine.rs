//! Address-assignment decision engine.
//!
//! Given a client's hardware address and message context, decides which
//! address to offer or confirm and which option profile the reply carries.
//! The engine owns the static binding table and the dynamic lease pool;
//! it never touches the wire.

use std::net::Ipv4Addr;

use tracing::{debug, info, warn};

use crate::directory::BindingTable;
use crate::packet::MacAddr;
use crate::pool::LeasePool;

/// Which of the two configured option profiles a reply carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// The client has a directory-provisioned address.
    Reserved,
    /// The client is served from the dynamic pool.
    Dynamic,
}

/// Semantic content of an OFFER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offer {
    pub ip: Ipv4Addr,
    pub profile: Profile,
}

/// Outcome of the REQUEST confirm path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The requested address is granted.
    Ack { ip: Ipv4Addr, profile: Profile },
    /// The requested address is refused.
    Nak,
    /// Another server is authoritative for this exchange; stay silent.
    Ignore,
}

#[derive(Debug)]
pub struct Engine {
    bindings: BindingTable,
    pool: LeasePool,
    server_ip: Ipv4Addr,
    lease_duration_seconds: u32,
}

impl Engine {
    pub fn new(
        bindings: BindingTable,
        pool: LeasePool,
        server_ip: Ipv4Addr,
        lease_duration_seconds: u32,
    ) -> Self {
        Self {
            bindings,
            pool,
            server_ip,
            lease_duration_seconds,
        }
    }

    pub fn lease_duration_seconds(&self) -> u32 {
        self.lease_duration_seconds
    }

    pub fn pool(&self) -> &LeasePool {
        &self.pool
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    #[cfg(test)]
    pub(crate) fn pool_mut(&mut self) -> &mut LeasePool {
        &mut self.pool
    }

    /// Picks the address to offer on DISCOVER, or `None` when the pool is
    /// exhausted (the client retries later; this is not an error).
    ///
    /// Lookup order:
    /// 1. static binding for this hardware address;
    /// 2. the pool index this client already holds, live or expired;
    /// 3. a fresh index from the random-start scan.
    pub fn offer(&mut self, mac: MacAddr) -> Option<Offer> {
        if let Some(ip) = self.bindings.ip_for(&mac) {
            info!("offering reserved address {} to {}", ip, mac);
            return Some(Offer {
                ip,
                profile: Profile::Reserved,
            });
        }

        if let Some(index) = self.pool.find_by_owner(&mac) {
            let ip = self.pool.ip_at(index);
            self.pool.reserve(index, mac, self.lease_duration_seconds);
            info!("re-offering {} to {}", ip, mac);
            return Some(Offer {
                ip,
                profile: Profile::Dynamic,
            });
        }

        let Some(index) = self.pool.allocate_free() else {
            warn!("address pool exhausted, no offer for {}", mac);
            return None;
        };
        self.pool.reserve(index, mac, self.lease_duration_seconds);
        let ip = self.pool.ip_at(index);
        info!("offering {} to {}", ip, mac);
        Some(Offer {
            ip,
            profile: Profile::Dynamic,
        })
    }

    /// Decides a REQUEST carrying `requested` and possibly a server
    /// identifier.
    ///
    /// Requests naming another server are ignored. In-range addresses are
    /// granted iff the slot is unclaimed, lapsed, or already this
    /// client's; out-of-range addresses are granted only against an exact
    /// static binding match. Everything else is refused.
    pub fn confirm(
        &mut self,
        mac: MacAddr,
        requested: Option<Ipv4Addr>,
        server_id: Option<Ipv4Addr>,
    ) -> Verdict {
        if let Some(server) = server_id
            && server != self.server_ip
        {
            debug!("request from {} is for server {}, not us", mac, server);
            return Verdict::Ignore;
        }

        let Some(requested) = requested else {
            info!("refusing request from {}: no requested address", mac);
            return Verdict::Nak;
        };

        if let Some(index) = self.pool.index_of(requested) {
            if self.pool.is_free_for(index, &mac) {
                self.pool.reserve(index, mac, self.lease_duration_seconds);
                info!("granting {} to {}", requested, mac);
                return Verdict::Ack {
                    ip: requested,
                    profile: Profile::Dynamic,
                };
            }
            info!("refusing {} for {}: held by another client", requested, mac);
            return Verdict::Nak;
        }

        if self.bindings.owner_of(requested) == Some(mac) {
            info!("granting reserved address {} to {}", requested, mac);
            return Verdict::Ack {
                ip: requested,
                profile: Profile::Reserved,
            };
        }

        info!("refusing {} for {}: no binding", requested, mac);
        Verdict::Nak
    }

    /// Drops any dynamic lease held by `mac` (RELEASE/DECLINE handling).
    ///
    /// A no-op for clients holding nothing; these messages are
    /// notifications and get no reply either way.
    pub fn forget(&mut self, mac: MacAddr) {
        if let Some(index) = self.pool.release(&mac) {
            info!("released {} held by {}", self.pool.ip_at(index), mac);
        }
    }
}
