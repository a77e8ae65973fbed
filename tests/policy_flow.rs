//! End-to-end policy flows: rule files on disk, device records, and the
//! engine commands each synchronizer emits (recorded, never executed).

mod common;

use std::sync::Mutex;

use common::{config_in, register_device};
use devfence::cmd_abstraction::{CommandExecutor, CommandOutput};
use devfence::config::Config;
use devfence::device::FileDeviceDirectory;
use devfence::enforcer::{DnsOverrideSynchronizer, IpBlockSynchronizer};
use devfence::engine::PolicyEngine;
use devfence::fs_abstraction::real_fs;
use devfence::rules::{DnsOverrideRule, DnsPattern, IpBlockKey, IpBlockRule};
use devfence::PolicyError;
use tempfile::TempDir;

const MAC: &str = "02:00:12:34:56:78";
const CHAIN: &str = "DF_020012345678";

/// Records every invocation and answers from (substring, output) pairs.
/// Unmatched commands succeed.
#[derive(Default)]
struct RecordingExecutor {
    calls: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, CommandOutput)>>,
}

impl RecordingExecutor {
    /// A host where no stale resolver is running.
    fn host() -> Self {
        let exec = Self::default();
        exec.respond("pgrep", CommandOutput::failed(""));
        exec
    }

    fn respond(&self, contains: &str, output: CommandOutput) {
        self.responses
            .lock()
            .unwrap()
            .push((contains.to_string(), output));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Rule-appending invocations, in order.
    fn appended(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(" -A "))
            .collect()
    }
}

impl CommandExecutor for RecordingExecutor {
    fn execute(&self, cmd: &str, args: &[String]) -> anyhow::Result<CommandOutput> {
        let line = format!("{} {}", cmd, args.join(" "));
        self.calls.lock().unwrap().push(line.clone());
        let responses = self.responses.lock().unwrap();
        Ok(responses
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }
}

fn setup() -> (TempDir, Config) {
    let temp_dir = TempDir::new().unwrap();
    let config = config_in(temp_dir.path());
    register_device(&config, "device1", MAC, 1);
    (temp_dir, config)
}

fn ip_rule(dest: &str, proto: &str, ports: &str, policy: &str) -> IpBlockRule {
    IpBlockRule::from_args(dest, Some(proto), Some(ports), Some(policy)).unwrap()
}

fn dns_conf(config: &Config) -> String {
    std::fs::read_to_string(config.dns_dir().join("020012345678.conf")).unwrap()
}

#[tokio::test]
async fn test_ip_add_upserts_by_key() {
    let (_temp_dir, config) = setup();
    let exec = RecordingExecutor::host();
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<IpBlockRule, _> =
        PolicyEngine::new(true, &devices, real_fs(), IpBlockSynchronizer::new(&config, &exec));

    engine.add("device1", ip_rule("10.0.0.5", "tcp", "80", "drop")).await.unwrap();
    let replaced = engine
        .add("device1", ip_rule("10.0.0.5/32", "tcp", "80", "reject"))
        .await
        .unwrap();
    assert!(replaced.is_some());

    exec.clear();
    engine.sync("device1").await.unwrap();

    let rules = engine.list("device1").unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].to_string(), "10.0.0.5/32 proto=tcp port(s)=80 policy=reject");

    let appended = exec.appended();
    assert!(appended.iter().any(|c| c.ends_with("-j REJECT --reject-with tcp-reset")));
    assert!(!appended.iter().any(|c| c.ends_with("-j DROP")));
}

#[tokio::test]
async fn test_ip_del_absent_key_leaves_enforcement_alone() {
    let (_temp_dir, config) = setup();
    let exec = RecordingExecutor::host();
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<IpBlockRule, _> =
        PolicyEngine::new(true, &devices, real_fs(), IpBlockSynchronizer::new(&config, &exec));

    let key = IpBlockKey::from_args("10.9.9.9", Some("udp"), Some("53")).unwrap();
    let err = engine.remove("device1", &key).await.unwrap_err();

    assert!(matches!(err, PolicyError::NotFound(_)));
    assert!(exec.calls().is_empty());
}

#[tokio::test]
async fn test_ip_specific_network_enforced_first() {
    let (_temp_dir, config) = setup();
    let exec = RecordingExecutor::host();
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<IpBlockRule, _> =
        PolicyEngine::new(true, &devices, real_fs(), IpBlockSynchronizer::new(&config, &exec));

    engine.add("device1", ip_rule("10.0.0.0/24", "all", "all", "drop")).await.unwrap();
    engine.add("device1", ip_rule("10.0.0.5", "all", "all", "accept")).await.unwrap();

    let rules = engine.list("device1").unwrap();
    assert_eq!(rules[0].network.to_string(), "10.0.0.5/32");
    assert_eq!(rules[1].network.to_string(), "10.0.0.0/24");

    exec.clear();
    engine.sync("device1").await.unwrap();
    let appended: Vec<String> = exec
        .appended()
        .into_iter()
        .filter(|c| c.contains(CHAIN) && c.contains(" -d "))
        .collect();
    assert!(appended[0].contains("-d 10.0.0.5/32"));
    assert!(appended[1].contains("-d 10.0.0.5/32"));
    assert!(appended[2].contains("-d 10.0.0.0/24"));
}

#[tokio::test]
async fn test_equal_specificity_latest_add_wins() {
    let (_temp_dir, config) = setup();
    let exec = RecordingExecutor::host();
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<IpBlockRule, _> =
        PolicyEngine::new(true, &devices, real_fs(), IpBlockSynchronizer::new(&config, &exec));

    engine.add("device1", ip_rule("10.0.0.0/24", "tcp", "443", "accept")).await.unwrap();
    engine.add("device1", ip_rule("10.0.0.0/24", "all", "all", "drop")).await.unwrap();

    let rules = engine.list("device1").unwrap();
    assert_eq!(rules[0].to_string(), "10.0.0.0/24 proto=all port(s)=all policy=drop");
}

#[tokio::test]
async fn test_ip_sync_is_idempotent() {
    let (_temp_dir, config) = setup();
    let exec = RecordingExecutor::host();
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<IpBlockRule, _> =
        PolicyEngine::new(true, &devices, real_fs(), IpBlockSynchronizer::new(&config, &exec));

    engine.add("device1", ip_rule("10.0.0.5", "tcp", "80,443", "listen")).await.unwrap();
    engine.add("device1", ip_rule("0.0.0.0/0", "udp", "1000-2000", "drop")).await.unwrap();

    exec.clear();
    engine.sync("device1").await.unwrap();
    let first = exec.calls();
    exec.clear();
    engine.sync("device1").await.unwrap();
    assert_eq!(first, exec.calls());
}

#[tokio::test]
async fn test_ip_wipe_then_sync_is_empty_chain() {
    let (_temp_dir, config) = setup();
    let exec = RecordingExecutor::host();
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<IpBlockRule, _> =
        PolicyEngine::new(true, &devices, real_fs(), IpBlockSynchronizer::new(&config, &exec));

    engine.add("device1", ip_rule("10.0.0.0/8", "all", "all", "drop")).await.unwrap();
    let archive = engine.wipe("device1").await.unwrap().unwrap();
    assert_eq!(
        std::fs::read_to_string(&archive).unwrap(),
        "10.0.0.0/8 proto=all port(s)=all policy=drop\n"
    );

    exec.clear();
    engine.sync("device1").await.unwrap();
    let calls = exec.calls();
    assert!(calls.contains(&format!("iptables -t nat -F {}", CHAIN)));
    assert!(calls.contains(&format!("iptables -t filter -F {}", CHAIN)));
    assert!(exec
        .appended()
        .iter()
        .all(|c| !c.contains(&format!("-A {} ", CHAIN))));
}

#[tokio::test]
async fn test_listen_scenario() {
    let (_temp_dir, config) = setup();
    let exec = RecordingExecutor::host();
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<IpBlockRule, _> =
        PolicyEngine::new(true, &devices, real_fs(), IpBlockSynchronizer::new(&config, &exec));

    engine.add("device1", ip_rule("10.0.0.5", "tcp", "80,443", "listen")).await.unwrap();

    let rules = engine.list("device1").unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].to_string(), "10.0.0.5/32 proto=tcp port(s)=80,443 policy=listen");

    assert!(exec.calls().contains(&format!(
        "iptables -t nat -A {} -d 10.0.0.5/32 -p tcp -m multiport --dports 80,443 -j DNAT --to-destination 127.1.18.52:8080",
        CHAIN
    )));
}

#[tokio::test]
async fn test_missing_device_is_reported_before_mutation() {
    let (temp_dir, config) = setup();
    let exec = RecordingExecutor::host();
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<IpBlockRule, _> =
        PolicyEngine::new(true, &devices, real_fs(), IpBlockSynchronizer::new(&config, &exec));

    let err = engine
        .add("unknown", ip_rule("10.0.0.1", "all", "all", "drop"))
        .await
        .unwrap_err();

    assert!(matches!(err, PolicyError::MissingDevice(_)));
    assert!(exec.calls().is_empty());
    assert!(!temp_dir.path().join("devices/unknown/ipblock.rules").exists());
}

#[tokio::test]
async fn test_dns_override_replaces_never_duplicates() {
    let (_temp_dir, config) = setup();
    let exec = RecordingExecutor::host();
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<DnsOverrideRule, _> = PolicyEngine::new(
        true,
        &devices,
        real_fs(),
        DnsOverrideSynchronizer::new(&config, &exec, real_fs()),
    );

    engine
        .add("device1", DnsOverrideRule::from_args("example.com", None).unwrap())
        .await
        .unwrap();
    assert!(dns_conf(&config).contains("address=/example.com/\n"));

    engine
        .add("device1", DnsOverrideRule::from_args("example.com", Some("10.0.0.9")).unwrap())
        .await
        .unwrap();
    let conf = dns_conf(&config);
    assert!(conf.contains("address=/example.com/10.0.0.9\n"));
    assert!(!conf.contains("address=/example.com/\n"));
    assert_eq!(engine.list("device1").unwrap().len(), 1);
}

#[tokio::test]
async fn test_dns_rules_rendered_in_class_order() {
    let (temp_dir, config) = setup();
    let exec = RecordingExecutor::host();
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<DnsOverrideRule, _> = PolicyEngine::new(
        true,
        &devices,
        real_fs(),
        DnsOverrideSynchronizer::new(&config, &exec, real_fs()),
    );

    for (pattern, redirect) in [("+", "RESOLVE"), ("example.com", "NXDOMAIN"), (":^ads\\.:", "NXDOMAIN")] {
        engine
            .add("device1", DnsOverrideRule::from_args(pattern, Some(redirect)).unwrap())
            .await
            .unwrap();
    }

    let directives: Vec<String> = dns_conf(&config)
        .lines()
        .filter(|l| l.starts_with("address=") || l.starts_with("server="))
        .map(String::from)
        .collect();
    assert_eq!(
        directives,
        vec!["address=/:^ads\\.:/", "address=/example.com/", "server=/#/#"]
    );
    assert!(dns_conf(&config).contains(&format!(
        "resolv-file={}",
        temp_dir.path().join("resolv/resolv.1.conf").display()
    )));
}

#[tokio::test]
async fn test_dns_sync_without_dispatch_chain() {
    let (_temp_dir, config) = setup();
    let exec = RecordingExecutor::host();
    exec.respond("-n -L DEVFENCE_DNS", CommandOutput::failed("No chain/target/match by that name."));
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<DnsOverrideRule, _> = PolicyEngine::new(
        true,
        &devices,
        real_fs(),
        DnsOverrideSynchronizer::new(&config, &exec, real_fs()),
    );

    let err = engine
        .add("device1", DnsOverrideRule::from_args("example.com", None).unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, PolicyError::InfrastructureNotReady(_)));
    assert!(!config.dns_dir().join("020012345678.conf").exists());
    // the store keeps the change; a later sync converges
    assert_eq!(engine.list("device1").unwrap().len(), 1);
}

#[tokio::test]
async fn test_dns_sync_is_idempotent_and_wipe_archives() {
    let (_temp_dir, config) = setup();
    let exec = RecordingExecutor::host();
    let devices = FileDeviceDirectory::new(config.devices_dir(), real_fs());
    let engine: PolicyEngine<DnsOverrideRule, _> = PolicyEngine::new(
        true,
        &devices,
        real_fs(),
        DnsOverrideSynchronizer::new(&config, &exec, real_fs()),
    );

    engine
        .add("device1", DnsOverrideRule::from_args("tracker.net", None).unwrap())
        .await
        .unwrap();

    exec.clear();
    engine.sync("device1").await.unwrap();
    let (first_conf, first_calls) = (dns_conf(&config), exec.calls());
    exec.clear();
    engine.sync("device1").await.unwrap();
    assert_eq!(first_conf, dns_conf(&config));
    assert_eq!(first_calls, exec.calls());

    let archive = engine.wipe("device1").await.unwrap().unwrap();
    assert!(archive.exists());
    assert_eq!(dns_conf(&config).lines().count(), 6);

    let key: DnsPattern = "tracker.net".parse().unwrap();
    assert!(matches!(
        engine.remove("device1", &key).await.unwrap_err(),
        PolicyError::NotFound(_)
    ));
}
