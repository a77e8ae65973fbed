//! Centralized validation functions for devfence.
//!
//! This module provides unified validation for:
//! - IPv4 addresses and CIDR ranges
//! - Device identifiers
//! - DNS domain suffixes

use ipnet::Ipv4Net;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{PolicyError, Result};

/// Validate an IPv4 address or CIDR string and return the network.
///
/// A plain address becomes a /32. Host bits are cleared so equal networks
/// always compare equal. IPv6 is rejected.
///
/// # Examples
/// ```
/// use devfence::validation::validate_ipv4_or_cidr;
/// assert_eq!(validate_ipv4_or_cidr("10.0.0.5").unwrap().to_string(), "10.0.0.5/32");
/// assert_eq!(validate_ipv4_or_cidr("10.0.0.7/24").unwrap().to_string(), "10.0.0.0/24");
/// assert!(validate_ipv4_or_cidr("::1").is_err());
/// ```
pub fn validate_ipv4_or_cidr(input: &str) -> Result<Ipv4Net> {
    let input = input.trim();
    if input.contains(':') {
        return Err(PolicyError::validation(format!(
            "IPv6 is not supported: {}",
            input
        )));
    }
    if input.contains('/') {
        let net: Ipv4Net = input
            .parse()
            .map_err(|_| PolicyError::validation(format!("Invalid CIDR: {}", input)))?;
        Ok(net.trunc())
    } else {
        let ip = validate_ipv4(input)?;
        Ok(Ipv4Net::from(ip))
    }
}

/// Validate a plain IPv4 address.
pub fn validate_ipv4(input: &str) -> Result<Ipv4Addr> {
    match input.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Ok(ip),
        Ok(IpAddr::V6(_)) => Err(PolicyError::validation(format!(
            "IPv6 is not supported: {}",
            input
        ))),
        Err(_) => Err(PolicyError::validation(format!(
            "Invalid IP address: {}",
            input
        ))),
    }
}

/// Validate a device identifier. Ids name directories, so only a safe
/// character set is allowed.
///
/// # Examples
/// ```
/// use devfence::validation::validate_device_id;
/// assert!(validate_device_id("living-room_tv.2").is_ok());
/// assert!(validate_device_id("../etc").is_err());
/// ```
pub fn validate_device_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 {
        return Err(PolicyError::validation(format!(
            "Device id must be 1-64 characters: '{}'",
            id
        )));
    }
    if id.starts_with('.') {
        return Err(PolicyError::validation(format!(
            "Device id cannot start with '.': '{}'",
            id
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(PolicyError::validation(format!(
            "Device id contains invalid characters: '{}'",
            id
        )));
    }
    Ok(())
}

/// Validate and normalize a domain suffix (lowercase, no trailing dot).
pub fn validate_domain(input: &str) -> Result<String> {
    let domain = input.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() || domain.len() > 253 {
        return Err(PolicyError::validation(format!(
            "Invalid domain: '{}'",
            input
        )));
    }
    for label in domain.split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            && !label.starts_with('-')
            && !label.ends_with('-');
        if !valid {
            return Err(PolicyError::validation(format!(
                "Invalid domain label '{}' in '{}'",
                label, input
            )));
        }
    }
    Ok(domain)
}
