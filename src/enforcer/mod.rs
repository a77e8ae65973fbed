//! Enforcement backends: firewall chains (iptables), exception sets (ipset)
//! and per-device resolvers (dnsmasq).
//!
//! Synchronizers never patch enforcement state. They compute the full set of
//! engine invocations for a device from its rule store and replay them after
//! flushing whatever was there before.

mod dnsmasq;
mod exceptions;
mod iptables;

use anyhow::Context;
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, warn};

pub use dnsmasq::{render_resolver_config, DnsOverrideSynchronizer, ResolverConfig};
pub use exceptions::ExceptionRegistry;
pub use iptables::{plan_ip_block, IpBlockSynchronizer};

use crate::cmd_abstraction::CommandExecutor;
use crate::config::Config;
use crate::device::{Device, MacAddr};
use crate::error::{PolicyError, Result};
use crate::rules::PolicyRule;

/// Global entry chain (nat and filter) dispatching to per-device chains.
pub const ENTRY_CHAIN: &str = "DEVFENCE";

/// Global nat chain dispatching to per-device DNS redirect chains.
pub const DNS_CHAIN: &str = "DEVFENCE_DNS";

/// Rebuilds a device's enforcement state from its rules.
#[async_trait]
pub trait Synchronizer<R: PolicyRule>: Send + Sync {
    async fn sync(&self, device: &Device, rules: &[R]) -> Result<()>;
}

/// One engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program, self.args.join(" "))
    }
}

/// A step of an enforcement plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Must succeed
    Run(Invocation),
    /// Run `create` only when `check` fails
    Ensure { check: Invocation, create: Invocation },
}

/// Run an invocation; a spawn failure or non-zero exit is a [`PolicyError::Command`].
pub(crate) fn run(executor: &dyn CommandExecutor, inv: &Invocation) -> Result<String> {
    debug!("exec: {}", inv);
    let output = executor
        .execute(&inv.program, &inv.args)
        .with_context(|| format!("Failed to execute {}", inv.program))
        .map_err(|e| PolicyError::Command(format!("{:#}", e)))?;

    if output.success {
        Ok(output.stdout)
    } else {
        Err(PolicyError::Command(format!(
            "{} failed: {}",
            inv,
            output.stderr.trim()
        )))
    }
}

/// Whether an invocation succeeds. Used for existence checks.
pub(crate) fn probe(executor: &dyn CommandExecutor, inv: &Invocation) -> bool {
    debug!("probe: {}", inv);
    executor
        .execute(&inv.program, &inv.args)
        .map(|o| o.success)
        .unwrap_or(false)
}

/// Run an invocation whose failure is expected and harmless.
pub(crate) fn best_effort(executor: &dyn CommandExecutor, inv: &Invocation) {
    if let Err(e) = run(executor, inv) {
        debug!("ignored: {}", e);
    }
}

/// Apply a plan in order, stopping at the first failing step.
pub fn apply_plan(executor: &dyn CommandExecutor, steps: &[Step]) -> Result<()> {
    for step in steps {
        match step {
            Step::Run(inv) => {
                run(executor, inv)?;
            }
            Step::Ensure { check, create } => {
                if !probe(executor, check) {
                    run(executor, create)?;
                }
            }
        }
    }
    Ok(())
}

/// `iptables -t <table> <args...>`
pub(crate) fn iptables(config: &Config, table: &str, args: &[&str]) -> Invocation {
    let mut all = vec!["-t", table];
    all.extend_from_slice(args);
    Invocation::new(&config.iptables, all)
}

/// Create a chain in `table` unless it exists.
pub(crate) fn ensure_chain(config: &Config, table: &str, chain: &str) -> Step {
    Step::Ensure {
        check: iptables(config, table, &["-n", "-L", chain]),
        create: iptables(config, table, &["-N", chain]),
    }
}

/// Insert a jump from a built-in chain unless it is already there.
fn ensure_jump(config: &Config, table: &str, from: &str, to: &str) -> Step {
    Step::Ensure {
        check: iptables(config, table, &["-C", from, "-j", to]),
        create: iptables(config, table, &["-I", from, "1", "-j", to]),
    }
}

/// Jump from a global chain to a device chain on source MAC, unless present.
pub(crate) fn ensure_dispatch(
    config: &Config,
    table: &str,
    from: &str,
    mac: &MacAddr,
    to: &str,
) -> Step {
    let mac = mac.to_string();
    let dispatch = ["-m", "mac", "--mac-source", mac.as_str(), "-j", to];
    let mut check = vec!["-C", from];
    check.extend_from_slice(&dispatch);
    let mut create = vec!["-A", from];
    create.extend_from_slice(&dispatch);
    Step::Ensure {
        check: iptables(config, table, &check),
        create: iptables(config, table, &create),
    }
}

/// Global entry chains hooked from PREROUTING (nat) and FORWARD (filter).
pub fn entry_plan(config: &Config) -> Vec<Step> {
    vec![
        ensure_chain(config, "nat", ENTRY_CHAIN),
        ensure_jump(config, "nat", "PREROUTING", ENTRY_CHAIN),
        ensure_chain(config, "filter", ENTRY_CHAIN),
        ensure_jump(config, "filter", "FORWARD", ENTRY_CHAIN),
    ]
}

/// Full dispatch infrastructure: entry chains plus the DNS redirect chain,
/// which is evaluated before the entry chain.
pub fn infrastructure_plan(config: &Config) -> Vec<Step> {
    let mut steps = entry_plan(config);
    steps.push(ensure_chain(config, "nat", DNS_CHAIN));
    steps.push(ensure_jump(config, "nat", "PREROUTING", DNS_CHAIN));
    steps
}

/// Whether the DNS dispatch chain exists.
pub fn dispatch_active(executor: &dyn CommandExecutor, config: &Config) -> bool {
    probe(executor, &iptables(config, "nat", &["-n", "-L", DNS_CHAIN]))
}

/// Check if running as root (effective UID == 0)
pub fn check_root() -> anyhow::Result<()> {
    // SAFETY: geteuid() has no preconditions and never fails.
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        warn!("running as uid {}", euid);
        anyhow::bail!(
            "This operation requires root privileges. Please run with sudo.\n\
             Alternatively, ensure the process has CAP_NET_ADMIN."
        )
    }
    Ok(())
}
