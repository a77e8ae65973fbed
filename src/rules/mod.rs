//! Policy rule model and priority ordering.
//!
//! Both policy domains share the same store and ordering machinery through
//! [`PolicyRule`]. Store order is evaluation order, so every insertion goes
//! through [`insert_by_priority`].

mod dns_override;
mod ip_block;

pub use dns_override::{DnsAction, DnsOverrideRule, DnsPattern, PatternClass};
pub use ip_block::{IpBlockKey, IpBlockRule, Policy, PortSpec, Protocol};

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::PolicyError;

/// A rule that can live in a [`RuleStore`](crate::store::RuleStore).
pub trait PolicyRule:
    Clone + fmt::Debug + fmt::Display + FromStr<Err = PolicyError> + Serialize + Send + Sync
{
    /// Identity key; adding a rule with an existing key replaces it.
    type Key: PartialEq + fmt::Display + Send + Sync;

    /// Priority rank, lower ranks are evaluated first.
    type Rank: Ord;

    /// Name of the policy domain, used in messages and feature gates.
    const DOMAIN: &'static str;

    /// Rule file name inside the device directory.
    const FILE_NAME: &'static str;

    fn key(&self) -> Self::Key;

    fn rank(&self) -> Self::Rank;
}

/// Insert a rule ahead of every stored rule of equal or lower priority.
///
/// Equal-rank ties therefore resolve to the most recently added rule.
pub fn insert_by_priority<R: PolicyRule>(rules: &mut Vec<R>, rule: R) {
    let rank = rule.rank();
    let index = rules
        .iter()
        .position(|existing| existing.rank() >= rank)
        .unwrap_or(rules.len());
    rules.insert(index, rule);
}

/// Stable sort by rank; keeps the stored order of equal-rank rules.
pub fn sort_by_priority<R: PolicyRule>(rules: &mut [R]) {
    rules.sort_by(|a, b| a.rank().cmp(&b.rank()));
}

/// Split `key=value`, checking the key.
pub(crate) fn field<'a>(token: Option<&'a str>, name: &str) -> Result<&'a str, PolicyError> {
    let token = token.ok_or_else(|| PolicyError::validation(format!("missing '{}='", name)))?;
    match token.split_once('=') {
        Some((key, value)) if key == name => Ok(value),
        _ => Err(PolicyError::validation(format!(
            "expected '{}=...', found '{}'",
            name, token
        ))),
    }
}
