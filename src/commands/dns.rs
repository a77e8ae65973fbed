//! `devfence dns` command implementation.

use anyhow::Result;
use std::path::Path;

use super::policy::{execute, Request};
use crate::cli::DnsAction;
use crate::cmd_abstraction::RealCommandExecutor;
use crate::config::Config;
use crate::device::FileDeviceDirectory;
use crate::enforcer::DnsOverrideSynchronizer;
use crate::engine::PolicyEngine;
use crate::fs_abstraction::real_fs;
use crate::rules::{DnsOverrideRule, DnsPattern};

/// Run the dns command
pub async fn run(action: DnsAction, config_path: &Path) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let executor = RealCommandExecutor::new();
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<DnsOverrideRule, _> = PolicyEngine::new(
        config.dns_override.enabled,
        &devices,
        real_fs(),
        DnsOverrideSynchronizer::new(&config, &executor, real_fs()),
    );
    engine.ensure_enabled()?;

    let request = match action {
        DnsAction::Add {
            device,
            pattern,
            redirect,
        } => Request::Add {
            device,
            rule: DnsOverrideRule::from_args(&pattern, redirect.as_deref())?,
        },
        DnsAction::Del { device, pattern } => Request::Del {
            device,
            key: pattern.parse::<DnsPattern>()?,
        },
        DnsAction::Sync { device } => Request::Sync { device },
        DnsAction::List { device, json } => Request::List { device, json },
        DnsAction::Wipe { device } => Request::Wipe { device },
    };

    execute(&engine, &config, request).await
}
