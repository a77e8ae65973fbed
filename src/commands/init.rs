//! `devfence init`: global dispatch chains and state directories.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::cmd_abstraction::RealCommandExecutor;
use crate::config::Config;
use crate::enforcer::{apply_plan, check_root, infrastructure_plan, DNS_CHAIN, ENTRY_CHAIN};

/// Run the init command
pub async fn run(config_path: &Path) -> Result<()> {
    check_root()?;

    let config = Config::load_or_default(config_path)?;

    for dir in [
        config.devices_dir(),
        config.dns_dir(),
        config.locks_dir(),
        config.dns_override.resolv_dir.clone(),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {:?}", dir))?;
    }

    let executor = RealCommandExecutor::new();
    apply_plan(&executor, &infrastructure_plan(&config))
        .context("Failed to create dispatch chains")?;
    info!("dispatch chains ready");

    println!(
        "[OK] Dispatch chains {} and {} are in place",
        ENTRY_CHAIN, DNS_CHAIN
    );
    println!("     State directory: {:?}", config.state_dir);

    Ok(())
}
