//! Per-device exception sets: addresses that bypass IP-block enforcement.
//!
//! Only the DNS-override synchronizer fills these sets; the IP-block chain
//! merely references them.

use std::net::Ipv4Addr;

use super::{iptables, Invocation};
use crate::config::Config;
use crate::device::Device;

/// ipset operations for one device's exception set.
pub struct ExceptionRegistry {
    ipset: String,
    set: String,
}

impl ExceptionRegistry {
    pub fn new(config: &Config, device: &Device) -> Self {
        Self {
            ipset: config.ipset.clone(),
            set: device.exception_set(),
        }
    }

    /// Create the set if it does not exist.
    pub fn ensure(&self) -> Invocation {
        Invocation::new(
            &self.ipset,
            ["create", self.set.as_str(), "hash:ip", "family", "inet", "-exist"],
        )
    }

    pub fn flush(&self) -> Invocation {
        Invocation::new(&self.ipset, ["flush", self.set.as_str()])
    }

    pub fn add(&self, address: Ipv4Addr) -> Invocation {
        let address = address.to_string();
        Invocation::new(
            &self.ipset,
            ["add", self.set.as_str(), address.as_str(), "-exist"],
        )
    }

    /// Rule at the head of `chain` returning early for destinations in the set.
    pub fn bypass(&self, config: &Config, table: &str, chain: &str) -> Invocation {
        iptables(
            config,
            table,
            &["-I", chain, "1", "-m", "set", "--match-set", self.set.as_str(), "dst", "-j", "RETURN"],
        )
    }
}
