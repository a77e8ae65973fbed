//! Handlers shared by the `ip` and `dns` commands.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::enforcer::{check_root, Synchronizer};
use crate::engine::PolicyEngine;
use crate::lock::LockGuard;
use crate::rules::PolicyRule;
use crate::validation::validate_device_id;

/// A parsed and validated policy command.
pub(crate) enum Request<R: PolicyRule> {
    Add { device: String, rule: R },
    Del { device: String, key: R::Key },
    Sync { device: String },
    List { device: String, json: bool },
    Wipe { device: String },
}

fn lock_device(config: &Config, device_id: &str) -> Result<LockGuard> {
    validate_device_id(device_id)?;
    LockGuard::acquire(&config.locks_dir(), device_id)
}

pub(crate) async fn execute<R, S>(
    engine: &PolicyEngine<'_, R, S>,
    config: &Config,
    request: Request<R>,
) -> Result<()>
where
    R: PolicyRule,
    S: Synchronizer<R>,
{
    match request {
        Request::Add { device, rule } => {
            check_root()?;
            let _lock = lock_device(config, &device)?;
            let line = rule.to_string();
            let replaced = engine
                .add(&device, rule)
                .await
                .with_context(|| format!("Failed to apply {} rules for {}", R::DOMAIN, device))?;
            match replaced {
                Some(old) => println!("[OK] Replaced '{}' with '{}' for {}", old, line, device),
                None => println!("[OK] Added '{}' for {}", line, device),
            }
        }
        Request::Del { device, key } => {
            check_root()?;
            let _lock = lock_device(config, &device)?;
            let removed = engine
                .remove(&device, &key)
                .await
                .with_context(|| format!("Failed to remove {} rule for {}", R::DOMAIN, device))?;
            println!("[OK] Removed '{}' for {}", removed, device);
        }
        Request::Sync { device } => {
            check_root()?;
            let _lock = lock_device(config, &device)?;
            let rules = engine
                .sync(&device)
                .await
                .with_context(|| format!("Failed to synchronize {} for {}", R::DOMAIN, device))?;
            println!("[OK] {} synchronized for {} ({} rules)", R::DOMAIN, device, rules.len());
        }
        Request::List { device, json } => {
            let rules = engine.list(&device)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rules)?);
            } else if rules.is_empty() {
                println!("No {} rules for {}", R::DOMAIN, device);
            } else {
                for rule in &rules {
                    println!("{}", rule);
                }
            }
        }
        Request::Wipe { device } => {
            check_root()?;
            let _lock = lock_device(config, &device)?;
            let archived = engine
                .wipe(&device)
                .await
                .with_context(|| format!("Failed to wipe {} rules for {}", R::DOMAIN, device))?;
            match archived {
                Some(path) => println!("[OK] Wiped {} rules for {} (archived to {})", R::DOMAIN, device, path.display()),
                None => println!("[OK] Wiped {} rules for {} (nothing to archive)", R::DOMAIN, device),
            }
        }
    }

    Ok(())
}
