//! # dhcpdir
//!
//! A directory-backed DHCP server implementing RFC 2131 for a single
//! network segment.
//!
//! ## Features
//!
//! - DISCOVER/OFFER/REQUEST/ACK/NAK/RELEASE/DECLINE/INFORM handling
//! - Static bindings sourced from a device directory export
//! - Dynamic pool with randomized allocation and lazy expiry reclamation
//! - Separate option profiles for reserved and pool-served clients
//! - Relay agent (Option 82) diagnostics
//!
//! ## Quick Start
//!
//! ```no_run
//! use dhcpdir::{BindingTable, Config, DhcpServer};
//!
//! #[tokio::main]
//! async fn main() -> dhcpdir::Result<()> {
//!     let config = Config::load_or_create("config.json")?;
//!     let bindings = BindingTable::load(
//!         &config.directory_file,
//!         config.network_prefix,
//!         config.directory_strictness,
//!     )?;
//!     let mut server = DhcpServer::new(config, bindings)?;
//!     server.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Config`] - Server configuration (pool range, lease duration, option profiles)
//! - [`BindingTable`] - Static bindings loaded from the directory
//! - [`LeasePool`] - Index-addressed dynamic lease table
//! - [`Engine`] - The address-assignment decision engine
//! - [`DhcpServer`] - UDP transport and per-message dispatch
//! - [`DhcpPacket`] - DHCP packet parsing and encoding

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod options;
pub mod packet;
pub mod pool;
pub mod relay;
pub mod server;

pub use config::{Config, DirectoryStrictness, OptionProfile};
pub use directory::{BindingTable, DirectoryRecord};
pub use engine::{Engine, Offer, Profile, Verdict};
pub use error::{Error, Result};
pub use options::{DhcpOption, MessageType};
pub use packet::{DhcpPacket, MacAddr};
pub use pool::{LeaseEntry, LeasePool};
pub use relay::RelayInfo;
pub use server::DhcpServer;
