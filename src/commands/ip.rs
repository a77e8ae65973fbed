//! `devfence ip` command implementation.

use anyhow::Result;
use std::path::Path;

use super::policy::{execute, Request};
use crate::cli::IpAction;
use crate::cmd_abstraction::RealCommandExecutor;
use crate::config::Config;
use crate::device::FileDeviceDirectory;
use crate::enforcer::IpBlockSynchronizer;
use crate::engine::PolicyEngine;
use crate::fs_abstraction::real_fs;
use crate::rules::{IpBlockKey, IpBlockRule};

/// Run the ip command
pub async fn run(action: IpAction, config_path: &Path) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let executor = RealCommandExecutor::new();
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<IpBlockRule, _> = PolicyEngine::new(
        config.ip_block.enabled,
        &devices,
        real_fs(),
        IpBlockSynchronizer::new(&config, &executor),
    );
    engine.ensure_enabled()?;

    let request = match action {
        IpAction::Add {
            device,
            destination,
            protocol,
            ports,
            policy,
        } => Request::Add {
            device,
            rule: IpBlockRule::from_args(
                &destination,
                protocol.as_deref(),
                ports.as_deref(),
                policy.as_deref(),
            )?,
        },
        IpAction::Del {
            device,
            destination,
            protocol,
            ports,
        } => Request::Del {
            device,
            key: IpBlockKey::from_args(&destination, protocol.as_deref(), ports.as_deref())?,
        },
        IpAction::Sync { device } => Request::Sync { device },
        IpAction::List { device, json } => Request::List { device, json },
        IpAction::Wipe { device } => Request::Wipe { device },
    };

    execute(&engine, &config, request).await
}
