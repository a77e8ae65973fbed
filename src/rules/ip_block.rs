//! IP-block rules: destination network, protocol, ports and policy.

use ipnet::Ipv4Net;
use serde::Serialize;
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use super::{field, PolicyRule};
use crate::error::{PolicyError, Result};
use crate::validation::validate_ipv4_or_cidr;

/// Most ports a single multiport match accepts.
pub const MAX_LISTED_PORTS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    All,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::All => "all",
        }
    }

    /// Whether rules of this protocol can match on ports.
    pub fn has_ports(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            "all" => Ok(Protocol::All),
            _ => Err(PolicyError::validation(format!(
                "Invalid protocol '{}'. Valid values: tcp, udp, icmp, all",
                s
            ))),
        }
    }
}

/// Destination port selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum PortSpec {
    All,
    Single(u16),
    /// Listed ports in the order given, without duplicates
    List(Vec<u16>),
    /// Inclusive range, start < end
    Range(u16, u16),
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::All => f.write_str("all"),
            PortSpec::Single(port) => write!(f, "{}", port),
            PortSpec::List(ports) => {
                let joined: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
                f.write_str(&joined.join(","))
            }
            PortSpec::Range(start, end) => write!(f, "{}-{}", start, end),
        }
    }
}

impl From<PortSpec> for String {
    fn from(spec: PortSpec) -> Self {
        spec.to_string()
    }
}

fn parse_port(s: &str) -> Result<u16> {
    match s.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(PolicyError::validation(format!(
            "Invalid port '{}'. Ports are 1-65535",
            s
        ))),
        Ok(port) => Ok(port),
    }
}

impl FromStr for PortSpec {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(PortSpec::All);
        }

        if let Some((start, end)) = s.split_once('-').or_else(|| s.split_once(':')) {
            let (start, end) = (parse_port(start)?, parse_port(end)?);
            if start >= end {
                return Err(PolicyError::validation(format!(
                    "Invalid port range '{}': start must be below end",
                    s
                )));
            }
            return Ok(PortSpec::Range(start, end));
        }

        if s.contains(',') {
            let mut ports: Vec<u16> = Vec::new();
            for part in s.split(',') {
                let port = parse_port(part)?;
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
            if ports.len() > MAX_LISTED_PORTS {
                return Err(PolicyError::validation(format!(
                    "Too many ports in '{}' (at most {})",
                    s, MAX_LISTED_PORTS
                )));
            }
            return Ok(match ports.as_slice() {
                [single] => PortSpec::Single(*single),
                _ => PortSpec::List(ports),
            });
        }

        Ok(PortSpec::Single(parse_port(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Drop,
    Reject,
    Listen,
    Accept,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Drop => "drop",
            Policy::Reject => "reject",
            Policy::Listen => "listen",
            Policy::Accept => "accept",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(Policy::Drop),
            "reject" => Ok(Policy::Reject),
            "listen" => Ok(Policy::Listen),
            "accept" => Ok(Policy::Accept),
            _ => Err(PolicyError::validation(format!(
                "Invalid policy '{}'. Valid values: drop, reject, listen, accept",
                s
            ))),
        }
    }
}

/// Identity of an IP-block rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpBlockKey {
    pub network: Ipv4Net,
    pub protocol: Protocol,
    pub ports: PortSpec,
}

impl IpBlockKey {
    /// Build a key from CLI arguments, applying the same defaults and
    /// normalization as [`IpBlockRule::from_args`].
    pub fn from_args(
        destination: &str,
        protocol: Option<&str>,
        ports: Option<&str>,
    ) -> Result<Self> {
        let network = validate_ipv4_or_cidr(destination)?;
        let protocol: Protocol = protocol.unwrap_or("all").parse()?;
        let ports: PortSpec = ports.unwrap_or("all").parse()?;
        let ports = if protocol.has_ports() { ports } else { PortSpec::All };
        Ok(Self {
            network,
            protocol,
            ports,
        })
    }
}

impl fmt::Display for IpBlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} proto={} port(s)={}",
            self.network, self.protocol, self.ports
        )
    }
}

/// A single IP-block rule.
///
/// Invariants (checked by [`IpBlockRule::new`]): `reject` and `listen` need
/// `tcp`; `icmp` and `all` never carry ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpBlockRule {
    pub network: Ipv4Net,
    pub protocol: Protocol,
    pub ports: PortSpec,
    pub policy: Policy,
}

impl IpBlockRule {
    pub fn new(network: Ipv4Net, protocol: Protocol, ports: PortSpec, policy: Policy) -> Result<Self> {
        if matches!(policy, Policy::Reject | Policy::Listen) && protocol != Protocol::Tcp {
            return Err(PolicyError::validation(format!(
                "Policy '{}' requires protocol tcp, got {}",
                policy, protocol
            )));
        }

        let ports = if protocol.has_ports() { ports } else { PortSpec::All };

        Ok(Self {
            network: network.trunc(),
            protocol,
            ports,
            policy,
        })
    }

    /// Build a rule from CLI arguments. Defaults: protocol `all`, ports `all`,
    /// policy `drop`.
    pub fn from_args(
        destination: &str,
        protocol: Option<&str>,
        ports: Option<&str>,
        policy: Option<&str>,
    ) -> Result<Self> {
        let key = IpBlockKey::from_args(destination, protocol, ports)?;
        let policy: Policy = policy.unwrap_or("drop").parse()?;
        Self::new(key.network, key.protocol, key.ports, policy)
    }
}

impl fmt::Display for IpBlockRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} policy={}", self.key(), self.policy)
    }
}

impl FromStr for IpBlockRule {
    type Err = PolicyError;

    /// Parse the stored form `10.0.0.5/32 proto=tcp port(s)=80,443 policy=listen`.
    fn from_str(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let network = validate_ipv4_or_cidr(
            tokens
                .next()
                .ok_or_else(|| PolicyError::validation("empty rule"))?,
        )?;
        let protocol: Protocol = field(tokens.next(), "proto")?.parse()?;
        let ports: PortSpec = field(tokens.next(), "port(s)")?.parse()?;
        let policy: Policy = field(tokens.next(), "policy")?.parse()?;
        if let Some(extra) = tokens.next() {
            return Err(PolicyError::validation(format!(
                "unexpected trailing '{}'",
                extra
            )));
        }
        Self::new(network, protocol, ports, policy)
    }
}

impl PolicyRule for IpBlockRule {
    type Key = IpBlockKey;
    type Rank = Reverse<u8>;

    const DOMAIN: &'static str = "ip_block";
    const FILE_NAME: &'static str = "ipblock.rules";

    fn key(&self) -> IpBlockKey {
        IpBlockKey {
            network: self.network,
            protocol: self.protocol,
            ports: self.ports.clone(),
        }
    }

    /// More specific networks first.
    fn rank(&self) -> Reverse<u8> {
        Reverse(self.network.prefix_len())
    }
}
