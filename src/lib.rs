//! # devfence - per-device network policy for Linux gateways
//!
//! Keeps two kinds of per-device policy and turns them into enforcement
//! state: destination blocking (IPv4 network, protocol, ports) through
//! iptables, and DNS answer overrides through a dedicated dnsmasq instance
//! per device.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CLI (clap)                                                 │
//! │    └── ip / dns: add, del, sync, list, wipe; init           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  PolicyEngine (per domain, feature gated by Config)         │
//! │    ├── DeviceDirectory  device id -> MAC + interface        │
//! │    └── RuleStore        one rule file per device/domain     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Synchronizer (flush and rebuild, never patch)              │
//! │    ├── IpBlockSynchronizer     nat + filter DF_<MAC> chains │
//! │    └── DnsOverrideSynchronizer dnsmasq config + DNAT :53    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CommandExecutor / FileSystem (mockable seams)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use devfence::cmd_abstraction::RealCommandExecutor;
//! use devfence::config::Config;
//! use devfence::device::FileDeviceDirectory;
//! use devfence::enforcer::IpBlockSynchronizer;
//! use devfence::engine::PolicyEngine;
//! use devfence::fs_abstraction::real_fs;
//! use devfence::rules::IpBlockRule;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("/etc/devfence/config.yaml")?;
//!     let executor = RealCommandExecutor::new();
//!     let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
//!
//!     let engine: PolicyEngine<IpBlockRule, _> = PolicyEngine::new(
//!         config.ip_block.enabled,
//!         &devices,
//!         real_fs(),
//!         IpBlockSynchronizer::new(&config, &executor),
//!     );
//!
//!     let rule = IpBlockRule::from_args("10.0.0.5", Some("tcp"), Some("80,443"), Some("listen"))?;
//!     engine.add("device1", rule).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`allocator`] - Listener endpoints derived from device identity
//! - [`cli`] - Command-line interface definitions
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`device`] - Device records and hardware addresses
//! - [`enforcer`] - Synchronizers for iptables, ipset and dnsmasq
//! - [`engine`] - Store mutation followed by synchronization
//! - [`error`] - Error taxonomy
//! - [`lock`] - Per-device file locking
//! - [`retry`] - Retry schedules
//! - [`rules`] - Rule types and priority ordering
//! - [`store`] - Persisted rule files
//! - [`validation`] - Input validation

pub mod allocator;
pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod device;
pub mod enforcer;
pub mod engine;
pub mod error;
pub mod fs_abstraction;
pub mod lock;
pub mod retry;
pub mod rules;
pub mod store;
pub mod validation;

pub use cli::{Cli, Commands, DnsAction, IpAction};
pub use config::Config;
pub use error::{PolicyError, Result};
