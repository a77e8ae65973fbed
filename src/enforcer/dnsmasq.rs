//! DNS-override enforcement: a dedicated dnsmasq instance per device.
//!
//! The device's port 53 traffic is DNATed to its listener endpoint, where a
//! resolver generated from the rule store answers. The DNAT rules live in a
//! per-device `DFD_<MAC>` nat chain reached from `DEVFENCE_DNS`; the chain is
//! flushed on every sync, so a changed endpoint replaces the old binding.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    apply_plan, best_effort, dispatch_active, ensure_chain, ensure_dispatch, iptables, probe,
    run, ExceptionRegistry, Invocation, Step, Synchronizer, DNS_CHAIN,
};
use crate::allocator::endpoint_for;
use crate::cmd_abstraction::CommandExecutor;
use crate::config::Config;
use crate::device::Device;
use crate::error::{PolicyError, Result};
use crate::fs_abstraction::FileSystem;
use crate::retry::RetryPolicy;
use crate::rules::{DnsAction, DnsOverrideRule, DnsPattern};

/// A rendered resolver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    pub text: String,
    /// Fixed answers that must bypass IP blocking (exceptions enabled only)
    pub exception_addresses: Vec<Ipv4Addr>,
}

/// dnsmasq's spelling of a pattern inside `/.../`.
fn pattern_token(pattern: &DnsPattern) -> String {
    match pattern {
        DnsPattern::Wildcard => "#".to_string(),
        other => other.to_string(),
    }
}

/// Render the resolver configuration for a device.
pub fn render_resolver_config(
    config: &Config,
    device: &Device,
    rules: &[DnsOverrideRule],
) -> ResolverConfig {
    let endpoint = endpoint_for(device);
    let set = config.exceptions.enabled.then(|| device.exception_set());

    let mut lines = vec![
        format!("listen-address={}", endpoint.address),
        format!("port={}", endpoint.port),
        "bind-interfaces".to_string(),
        format!(
            "resolv-file={}",
            config
                .dns_override
                .upstream_file(device.interface_index)
                .display()
        ),
        "cache-size=0".to_string(),
        "no-hosts".to_string(),
    ];
    let mut exception_addresses = Vec::new();

    for rule in rules {
        let token = pattern_token(&rule.pattern);
        match rule.action {
            DnsAction::NxDomain => lines.push(format!("address=/{}/", token)),
            DnsAction::Resolve => {
                lines.push(format!("server=/{}/#", token));
                if let Some(set) = &set {
                    lines.push(format!("ipset=/{}/{}", token, set));
                }
            }
            DnsAction::Address(ip) => {
                lines.push(format!("address=/{}/{}", token, ip));
                if set.is_some() && !exception_addresses.contains(&ip) {
                    exception_addresses.push(ip);
                }
            }
        }
    }

    let mut text = lines.join("\n");
    text.push('\n');

    ResolverConfig {
        text,
        exception_addresses,
    }
}

/// Regenerates a device's resolver and its DNS redirect.
pub struct DnsOverrideSynchronizer<'a> {
    config: &'a Config,
    executor: &'a dyn CommandExecutor,
    fs: &'a dyn FileSystem,
    start_policy: RetryPolicy,
    stop_poll: Duration,
    stop_max_polls: u32,
}

impl<'a> DnsOverrideSynchronizer<'a> {
    pub fn new(
        config: &'a Config,
        executor: &'a dyn CommandExecutor,
        fs: &'a dyn FileSystem,
    ) -> Self {
        Self {
            config,
            executor,
            fs,
            start_policy: config.dns_override.start_policy(),
            stop_poll: Duration::from_millis(config.dns_override.stop_poll_ms),
            stop_max_polls: config.dns_override.stop_max_polls,
        }
    }

    /// Override restart timing.
    pub fn with_timing(mut self, start_policy: RetryPolicy, stop_poll: Duration, stop_max_polls: u32) -> Self {
        self.start_policy = start_policy;
        self.stop_poll = stop_poll;
        self.stop_max_polls = stop_max_polls;
        self
    }

    /// Generated configuration file for a device.
    pub fn config_path(&self, device: &Device) -> PathBuf {
        self.config
            .dns_dir()
            .join(format!("{}.conf", device.mac.compact()))
    }

    /// Rebuild of the device's DNS redirect chain.
    fn binding_plan(&self, device: &Device, destination: &str) -> Vec<Step> {
        let chain = device.dns_chain_name();
        let mut steps = vec![
            ensure_chain(self.config, "nat", &chain),
            Step::Run(iptables(self.config, "nat", &["-F", chain.as_str()])),
            ensure_dispatch(self.config, "nat", DNS_CHAIN, &device.mac, &chain),
        ];
        for proto in ["udp", "tcp"] {
            steps.push(Step::Run(iptables(
                self.config,
                "nat",
                &[
                    "-A",
                    chain.as_str(),
                    "-p",
                    proto,
                    "--dport",
                    "53",
                    "-j",
                    "DNAT",
                    "--to-destination",
                    destination,
                ],
            )));
        }
        steps
    }

    async fn wait_stopped(&self, conf_arg: &str) {
        let pgrep = Invocation::new("pgrep", ["-f", "--", conf_arg]);
        for _ in 0..self.stop_max_polls {
            if !probe(self.executor, &pgrep) {
                return;
            }
            tokio::time::sleep(self.stop_poll).await;
        }
        warn!("resolver for {} still running, starting anyway", conf_arg);
    }

    async fn restart(&self, conf: &Path) -> Result<()> {
        let conf_arg = format!("--conf-file={}", conf.display());
        let pid_arg = format!("--pid-file={}.pid", conf.display());

        best_effort(
            self.executor,
            &Invocation::new("pkill", ["-f", "--", conf_arg.as_str()]),
        );
        self.wait_stopped(&conf_arg).await;

        let start = Invocation::new(
            &self.config.dns_override.resolver_binary,
            [conf_arg.as_str(), pid_arg.as_str()],
        );

        let mut last_error = String::from("no start attempt configured");
        for (attempt, delay) in self.start_policy.delays().iter().enumerate() {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }
            match run(self.executor, &start) {
                Ok(_) => {
                    debug!("resolver started on attempt {}", attempt + 1);
                    return Ok(());
                }
                Err(e) => {
                    warn!("resolver start attempt {} failed: {}", attempt + 1, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(PolicyError::ResolverStart(last_error))
    }
}

#[async_trait]
impl Synchronizer<DnsOverrideRule> for DnsOverrideSynchronizer<'_> {
    async fn sync(&self, device: &Device, rules: &[DnsOverrideRule]) -> Result<()> {
        if !dispatch_active(self.executor, self.config) {
            warn!("dns_override: {} chain missing, skipping {}", DNS_CHAIN, device.id);
            return Err(PolicyError::InfrastructureNotReady(format!(
                "{} chain not found in nat table (run `devfence init`)",
                DNS_CHAIN
            )));
        }

        let endpoint = endpoint_for(device).to_string();
        apply_plan(self.executor, &self.binding_plan(device, &endpoint))?;

        let registry = self
            .config
            .exceptions
            .enabled
            .then(|| ExceptionRegistry::new(self.config, device));
        if let Some(registry) = &registry {
            run(self.executor, &registry.ensure())?;
            run(self.executor, &registry.flush())?;
        }

        let rendered = render_resolver_config(self.config, device, rules);
        let path = self.config_path(device);
        self.fs.create_dir_all(&self.config.dns_dir())?;
        self.fs.write_atomic(&path, rendered.text.as_bytes())?;
        debug!("wrote {}", path.display());

        if let Some(registry) = &registry {
            for address in &rendered.exception_addresses {
                run(self.executor, &registry.add(*address))?;
            }
        }

        self.restart(&path).await?;

        info!(
            "dns_override: resolver for {} listening on {} ({} rules)",
            device.id,
            endpoint,
            rules.len()
        );
        Ok(())
    }
}
