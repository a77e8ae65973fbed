//! IP-block enforcement with iptables.
//!
//! Each device owns a `DF_<MAC>` chain in both the nat and filter tables,
//! reached from the global `DEVFENCE` entry chains by a MAC match. Rules are
//! appended in store order and iptables evaluates first match first, so the
//! store order is the enforcement order.

use async_trait::async_trait;
use tracing::info;

use super::{
    apply_plan, ensure_chain, ensure_dispatch, entry_plan, iptables, ExceptionRegistry, Step,
    Synchronizer, ENTRY_CHAIN,
};
use crate::allocator::{endpoint_for, ListenerEndpoint};
use crate::cmd_abstraction::CommandExecutor;
use crate::config::Config;
use crate::device::Device;
use crate::error::Result;
use crate::rules::{IpBlockRule, Policy, PortSpec, Protocol};

const NAT: &str = "nat";
const FILTER: &str = "filter";

/// Destination/protocol/port match for a rule.
fn match_args(rule: &IpBlockRule) -> Vec<String> {
    let mut args = vec!["-d".to_string(), rule.network.to_string()];

    if rule.protocol != Protocol::All {
        args.push("-p".to_string());
        args.push(rule.protocol.to_string());
    }

    match &rule.ports {
        PortSpec::All => {}
        PortSpec::Single(port) => {
            args.push("--dport".to_string());
            args.push(port.to_string());
        }
        PortSpec::Range(start, end) => {
            args.push("--dport".to_string());
            args.push(format!("{}:{}", start, end));
        }
        PortSpec::List(ports) => {
            let joined: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
            args.extend([
                "-m".to_string(),
                "multiport".to_string(),
                "--dports".to_string(),
                joined.join(","),
            ]);
        }
    }

    args
}

/// `-t <table> -A <chain> <match> -j <target...>`
fn append(config: &Config, table: &str, chain: &str, matcher: &[String], target: &[&str]) -> Step {
    let mut args: Vec<&str> = vec!["-A", chain];
    args.extend(matcher.iter().map(String::as_str));
    args.push("-j");
    args.extend_from_slice(target);
    Step::Run(iptables(config, table, &args))
}

/// The nat and filter entries implementing one rule.
fn rule_steps(
    config: &Config,
    chain: &str,
    rule: &IpBlockRule,
    listener: &ListenerEndpoint,
) -> [Step; 2] {
    let matcher = match_args(rule);
    let nat = |target: &[&str]| append(config, NAT, chain, &matcher, target);
    let filter = |target: &[&str]| append(config, FILTER, chain, &matcher, target);

    match rule.policy {
        Policy::Reject => [
            filter(&["REJECT", "--reject-with", "tcp-reset"]),
            nat(&["ACCEPT"]),
        ],
        Policy::Listen => {
            let destination = format!("{}:{}", listener.address, config.ip_block.listener_port);
            [
                nat(&["DNAT", "--to-destination", destination.as_str()]),
                filter(&["RETURN"]),
            ]
        }
        Policy::Drop => [filter(&["DROP"]), nat(&["ACCEPT"])],
        Policy::Accept => [filter(&["RETURN"]), nat(&["RETURN"])],
    }
}

/// Full rebuild plan for a device's firewall chains.
///
/// Pure function of (config, device, rules); applying it twice yields the
/// same chain contents.
pub fn plan_ip_block(config: &Config, device: &Device, rules: &[IpBlockRule]) -> Vec<Step> {
    let chain = device.chain_name();
    let listener = endpoint_for(device);

    let mut steps = entry_plan(config);

    for table in [NAT, FILTER] {
        steps.push(ensure_chain(config, table, &chain));
    }

    for table in [NAT, FILTER] {
        steps.push(Step::Run(iptables(config, table, &["-F", chain.as_str()])));
    }

    for table in [NAT, FILTER] {
        steps.push(ensure_dispatch(config, table, ENTRY_CHAIN, &device.mac, &chain));
    }

    if config.exceptions.enabled {
        let registry = ExceptionRegistry::new(config, device);
        steps.push(Step::Run(registry.ensure()));
        for table in [NAT, FILTER] {
            steps.push(Step::Run(registry.bypass(config, table, &chain)));
        }
    }

    for rule in rules {
        steps.extend(rule_steps(config, &chain, rule, &listener));
    }

    steps
}

/// Rebuilds IP-block chains through a command executor.
pub struct IpBlockSynchronizer<'a> {
    config: &'a Config,
    executor: &'a dyn CommandExecutor,
}

impl<'a> IpBlockSynchronizer<'a> {
    pub fn new(config: &'a Config, executor: &'a dyn CommandExecutor) -> Self {
        Self { config, executor }
    }
}

#[async_trait]
impl Synchronizer<IpBlockRule> for IpBlockSynchronizer<'_> {
    async fn sync(&self, device: &Device, rules: &[IpBlockRule]) -> Result<()> {
        let steps = plan_ip_block(self.config, device, rules);
        apply_plan(self.executor, &steps)?;
        info!(
            "ip_block: rebuilt {} for {} ({} rules)",
            device.chain_name(),
            device.id,
            rules.len()
        );
        Ok(())
    }
}
