//! Configuration management for devfence.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Main configuration structure.
///
/// Loaded once per invocation and handed to the engine; nothing reads
/// feature flags from anywhere else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Root of persisted state (device records, rule files, generated resolver configs)
    pub state_dir: PathBuf,

    /// IP-block subsystem
    pub ip_block: IpBlockConfig,

    /// DNS-override subsystem
    pub dns_override: DnsOverrideConfig,

    /// Exception registry (addresses resolved by DNS overrides bypass IP blocks)
    pub exceptions: ExceptionsConfig,

    /// iptables binary
    pub iptables: String,

    /// ipset binary
    pub ipset: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/devfence"),
            ip_block: IpBlockConfig::default(),
            dns_override: DnsOverrideConfig::default(),
            exceptions: ExceptionsConfig::default(),
            iptables: "iptables".to_string(),
            ipset: "ipset".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IpBlockConfig {
    pub enabled: bool,
    /// Local port that `listen` rules redirect intercepted TCP connections to
    pub listener_port: u16,
}

impl Default for IpBlockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listener_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DnsOverrideConfig {
    pub enabled: bool,
    /// Resolver binary (dnsmasq compatible)
    pub resolver_binary: String,
    /// Directory holding `resolv.<interface index>.conf` upstream files
    pub resolv_dir: PathBuf,
    /// Delay before each start attempt, in seconds
    pub start_backoff_secs: Vec<u64>,
    /// Interval between checks that a stopped resolver is gone
    pub stop_poll_ms: u64,
    /// Maximum number of such checks
    pub stop_max_polls: u32,
}

impl Default for DnsOverrideConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            resolver_binary: "dnsmasq".to_string(),
            resolv_dir: PathBuf::from("/var/lib/devfence/resolv"),
            start_backoff_secs: vec![0, 1, 2, 3],
            stop_poll_ms: 100,
            stop_max_polls: 50,
        }
    }
}

impl DnsOverrideConfig {
    /// Retry policy for starting the resolver
    pub fn start_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.start_backoff_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        )
    }

    /// Upstream resolver file for a monitored interface
    pub fn upstream_file(&self, interface_index: u8) -> PathBuf {
        self.resolv_dir
            .join(format!("resolv.{}.conf", interface_index))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExceptionsConfig {
    pub enabled: bool,
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load the config if present, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.state_dir.is_absolute() {
            anyhow::bail!("state_dir must be an absolute path: {:?}", self.state_dir);
        }

        if self.ip_block.listener_port == 0 {
            anyhow::bail!("ip_block.listener_port must be non-zero");
        }

        if self.dns_override.start_backoff_secs.is_empty() {
            anyhow::bail!("dns_override.start_backoff_secs needs at least one attempt");
        }

        if self.dns_override.resolver_binary.trim().is_empty() {
            anyhow::bail!("dns_override.resolver_binary cannot be empty");
        }

        Ok(())
    }

    /// Save configuration to YAML file atomically
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        let parent_dir = path.parent().unwrap_or(Path::new("/etc/devfence"));
        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .context("Failed to create temporary file for config")?;

        temp_file.write_all(content.as_bytes())?;
        temp_file.as_file().sync_all()?;

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {:?}", path))?;

        Ok(())
    }

    /// Directory of registered devices
    pub fn devices_dir(&self) -> PathBuf {
        self.state_dir.join("devices")
    }

    /// Directory of generated resolver configurations
    pub fn dns_dir(&self) -> PathBuf {
        self.state_dir.join("dns")
    }

    /// Directory of per-device lock files
    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir.join("locks")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.ip_block.enabled);
        assert!(config.dns_override.enabled);
        assert!(!config.exceptions.enabled);
        assert_eq!(config.ip_block.listener_port, 8080);
        assert_eq!(config.dns_override.start_backoff_secs, vec![0, 1, 2, 3]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
state_dir: /srv/devfence
ip_block:
  enabled: false
exceptions:
  enabled: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/srv/devfence"));
        assert!(!config.ip_block.enabled);
        assert_eq!(config.ip_block.listener_port, 8080);
        assert!(config.dns_override.enabled);
        assert!(config.exceptions.enabled);
    }

    #[test]
    fn test_validation_relative_state_dir() {
        let config = Config {
            state_dir: PathBuf::from("relative"),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn test_validation_zero_listener_port() {
        let mut config = Config::default();
        config.ip_block.listener_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_empty_backoff() {
        let mut config = Config::default();
        config.dns_override.start_backoff_secs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_start_policy_from_config() {
        let config = DnsOverrideConfig::default();
        let policy = config.start_policy();
        assert_eq!(policy.delays().len(), 4);
        assert_eq!(policy.delays()[3], Duration::from_secs(3));
    }

    #[test]
    fn test_upstream_file_by_interface_index() {
        let config = DnsOverrideConfig::default();
        assert_eq!(
            config.upstream_file(2),
            PathBuf::from("/var/lib/devfence/resolv/resolv.2.conf")
        );
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");

        let mut config = Config::default();
        config.exceptions.enabled = true;
        config.ip_block.listener_port = 9000;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, "ip_block: [not, a, map]").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("/nonexistent/devfence.yaml").unwrap();
        assert_eq!(config, Config::default());
    }
}
