//! Device identity: hardware address and monitored interface.
//!
//! Devices are registered by an external collaborator which drops a
//! `device.yaml` into `<state_dir>/devices/<id>/`. This module only reads it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{PolicyError, Result};
use crate::fs_abstraction::FileSystem;
use crate::validation::validate_device_id;

/// Highest monitored-interface index (it shares an address octet with a flag bit).
pub const MAX_INTERFACE_INDEX: u8 = 127;

/// 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Low 32 bits, big endian.
    pub fn low32(&self) -> u32 {
        u32::from_be_bytes([self.0[2], self.0[3], self.0[4], self.0[5]])
    }

    /// Upper-case hex without separators, e.g. `AABBCC001122`. Used in
    /// chain, set and file names.
    pub fn compact(&self) -> String {
        self.0.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| format!("{:02x}", b)).collect();
        f.write_str(&parts.join(":"))
    }
}

impl FromStr for MacAddr {
    type Err = PolicyError;

    /// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff` or `aabbccddeeff`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let hex: String = trimmed.chars().filter(|c| *c != ':' && *c != '-').collect();
        let grouped = trimmed.len() == 17
            && trimmed
                .char_indices()
                .all(|(i, c)| (i % 3 == 2) == (c == ':' || c == '-'));
        if hex.len() != 12
            || !hex.chars().all(|c| c.is_ascii_hexdigit())
            || !(trimmed.len() == 12 || grouped)
        {
            return Err(PolicyError::validation(format!(
                "Invalid hardware address: {}",
                s
            )));
        }
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| {
                PolicyError::validation(format!("Invalid hardware address: {}", s))
            })?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = PolicyError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Human-given id, also the name of the device directory
    #[serde(skip)]
    pub id: String,
    pub mac: MacAddr,
    /// Monitored interface name
    pub interface: String,
    /// Monitored interface index (0-127)
    pub interface_index: u8,
}

impl Device {
    /// Per-device firewall chain, e.g. `DF_AABBCC001122`.
    pub fn chain_name(&self) -> String {
        format!("DF_{}", self.mac.compact())
    }

    /// Per-device nat chain holding the DNS redirect, e.g. `DFD_AABBCC001122`.
    pub fn dns_chain_name(&self) -> String {
        format!("DFD_{}", self.mac.compact())
    }

    /// Per-device exception set, e.g. `df_exc_aabbcc001122`.
    pub fn exception_set(&self) -> String {
        format!("df_exc_{}", self.mac.compact().to_ascii_lowercase())
    }
}

/// Resolves a device id to its canonical identity.
pub trait DeviceDirectory: Send + Sync {
    /// Fails with [`PolicyError::MissingDevice`] for unknown ids.
    fn resolve(&self, id: &str) -> Result<Device>;

    /// Directory holding the device's rule files.
    fn device_dir(&self, id: &str) -> PathBuf;
}

/// Reads `<root>/<id>/device.yaml`.
pub struct FileDeviceDirectory<'a> {
    root: PathBuf,
    fs: &'a dyn FileSystem,
}

impl<'a> FileDeviceDirectory<'a> {
    pub fn new(root: impl Into<PathBuf>, fs: &'a dyn FileSystem) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.device_dir(id).join("device.yaml")
    }
}

impl DeviceDirectory for FileDeviceDirectory<'_> {
    fn resolve(&self, id: &str) -> Result<Device> {
        validate_device_id(id)?;

        let path = self.record_path(id);
        if !self.fs.exists(&path) {
            return Err(PolicyError::MissingDevice(format!(
                "{} (no identity file at {})",
                id,
                path.display()
            )));
        }

        let content = self.fs.read_to_string(&path)?;
        let mut device: Device = serde_yaml::from_str(&content).map_err(|e| {
            PolicyError::MissingDevice(format!("{} (unreadable identity file: {})", id, e))
        })?;

        if device.interface_index > MAX_INTERFACE_INDEX {
            return Err(PolicyError::MissingDevice(format!(
                "{} (interface index {} above {})",
                id, device.interface_index, MAX_INTERFACE_INDEX
            )));
        }

        device.id = id.to_string();
        Ok(device)
    }

    fn device_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}
