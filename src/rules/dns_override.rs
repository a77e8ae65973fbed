//! DNS-override rules: a name pattern and the answer to give for it.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use super::{field, PolicyRule};
use crate::error::{PolicyError, Result};
use crate::validation::{validate_domain, validate_ipv4};

/// Ordering class of a pattern. Declaration order is evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PatternClass {
    Regex,
    Suffix,
    Wildcard,
}

/// Which names a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum DnsPattern {
    /// A domain and all of its subdomains
    Suffix(String),
    /// Regular expression, written `:expr:`
    Regex(String),
    /// Every name, written `+`
    Wildcard,
}

impl DnsPattern {
    pub fn class(&self) -> PatternClass {
        match self {
            DnsPattern::Regex(_) => PatternClass::Regex,
            DnsPattern::Suffix(_) => PatternClass::Suffix,
            DnsPattern::Wildcard => PatternClass::Wildcard,
        }
    }
}

impl fmt::Display for DnsPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsPattern::Suffix(domain) => f.write_str(domain),
            DnsPattern::Regex(expr) => write!(f, ":{}:", expr),
            DnsPattern::Wildcard => f.write_str("+"),
        }
    }
}

impl From<DnsPattern> for String {
    fn from(pattern: DnsPattern) -> Self {
        pattern.to_string()
    }
}

impl FromStr for DnsPattern {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "+" {
            return Ok(DnsPattern::Wildcard);
        }

        if s.len() >= 2 && s.starts_with(':') && s.ends_with(':') {
            let expr = &s[1..s.len() - 1];
            if expr.is_empty() || expr.contains('/') || expr.chars().any(char::is_whitespace) {
                return Err(PolicyError::validation(format!(
                    "Invalid regex pattern '{}': must be non-empty without '/' or whitespace",
                    s
                )));
            }
            Regex::new(expr).map_err(|e| {
                PolicyError::validation(format!("Invalid regex pattern '{}': {}", s, e))
            })?;
            return Ok(DnsPattern::Regex(expr.to_string()));
        }

        Ok(DnsPattern::Suffix(validate_domain(s)?))
    }
}

/// Answer given for names matching a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum DnsAction {
    /// Answer with a fixed address
    Address(Ipv4Addr),
    /// Answer NXDOMAIN
    NxDomain,
    /// Resolve normally through the upstream servers
    Resolve,
}

impl fmt::Display for DnsAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsAction::Address(ip) => write!(f, "{}", ip),
            DnsAction::NxDomain => f.write_str("NXDOMAIN"),
            DnsAction::Resolve => f.write_str("RESOLVE"),
        }
    }
}

impl From<DnsAction> for String {
    fn from(action: DnsAction) -> Self {
        action.to_string()
    }
}

impl FromStr for DnsAction {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("nxdomain") {
            Ok(DnsAction::NxDomain)
        } else if s.eq_ignore_ascii_case("resolve") {
            Ok(DnsAction::Resolve)
        } else {
            validate_ipv4(s).map(DnsAction::Address).map_err(|_| {
                PolicyError::validation(format!(
                    "Invalid redirect '{}'. Use an IPv4 address, NXDOMAIN or RESOLVE",
                    s
                ))
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsOverrideRule {
    pub pattern: DnsPattern,
    pub action: DnsAction,
}

impl DnsOverrideRule {
    pub fn new(pattern: DnsPattern, action: DnsAction) -> Self {
        Self { pattern, action }
    }

    /// Build a rule from CLI arguments; the redirect defaults to NXDOMAIN.
    pub fn from_args(pattern: &str, redirect: Option<&str>) -> Result<Self> {
        Ok(Self::new(
            pattern.parse()?,
            redirect.unwrap_or("NXDOMAIN").parse()?,
        ))
    }
}

impl fmt::Display for DnsOverrideRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} redirect={}", self.pattern, self.action)
    }
}

impl FromStr for DnsOverrideRule {
    type Err = PolicyError;

    /// Parse the stored form `example.com redirect=NXDOMAIN`.
    fn from_str(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let pattern: DnsPattern = tokens
            .next()
            .ok_or_else(|| PolicyError::validation("empty rule"))?
            .parse()?;
        let action: DnsAction = field(tokens.next(), "redirect")?.parse()?;
        if let Some(extra) = tokens.next() {
            return Err(PolicyError::validation(format!(
                "unexpected trailing '{}'",
                extra
            )));
        }
        Ok(Self::new(pattern, action))
    }
}

impl PolicyRule for DnsOverrideRule {
    type Key = DnsPattern;
    type Rank = PatternClass;

    const DOMAIN: &'static str = "dns_override";
    const FILE_NAME: &'static str = "dnsoverride.rules";

    fn key(&self) -> DnsPattern {
        self.pattern.clone()
    }

    fn rank(&self) -> PatternClass {
        self.pattern.class()
    }
}
