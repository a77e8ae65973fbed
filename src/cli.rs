//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "devfence")]
#[command(author, version, about = "Per-device IP blocking and DNS overrides for Linux gateways")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "/etc/devfence/config.yaml", global = true)]
    pub config: PathBuf,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output, including every engine command)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage per-device IP-block rules
    Ip {
        #[command(subcommand)]
        action: IpAction,
    },

    /// Manage per-device DNS-override rules
    Dns {
        #[command(subcommand)]
        action: DnsAction,
    },

    /// Create the global dispatch chains (idempotent)
    Init,

    /// Show version
    Version,
}

#[derive(Subcommand)]
pub enum IpAction {
    /// Add or replace a rule, then synchronize
    Add {
        /// Device id
        device: String,
        /// Destination IPv4 address or CIDR
        destination: String,
        /// tcp, udp, icmp or all (default: all)
        protocol: Option<String>,
        /// Port, list (80,443), range (1000-2000) or all (default: all)
        ports: Option<String>,
        /// drop, reject, listen or accept (default: drop)
        policy: Option<String>,
    },
    /// Remove a rule, then synchronize
    Del {
        /// Device id
        device: String,
        /// Destination IPv4 address or CIDR
        destination: String,
        /// Protocol of the rule to remove (default: all)
        protocol: Option<String>,
        /// Ports of the rule to remove (default: all)
        ports: Option<String>,
    },
    /// Rebuild firewall chains from the stored rules
    Sync {
        /// Device id
        device: String,
    },
    /// Show rules in priority order
    List {
        /// Device id
        device: String,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Archive the rule file, start empty and synchronize
    Wipe {
        /// Device id
        device: String,
    },
}

#[derive(Subcommand)]
pub enum DnsAction {
    /// Add or replace a rule, then synchronize
    Add {
        /// Device id
        device: String,
        /// Domain suffix, :regex: or + for every name
        pattern: String,
        /// IPv4 address, NXDOMAIN or RESOLVE (default: NXDOMAIN)
        redirect: Option<String>,
    },
    /// Remove a rule, then synchronize
    Del {
        /// Device id
        device: String,
        /// Pattern of the rule to remove
        pattern: String,
    },
    /// Regenerate the resolver from the stored rules and restart it
    Sync {
        /// Device id
        device: String,
    },
    /// Show rules in priority order
    List {
        /// Device id
        device: String,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Archive the rule file, start empty and synchronize
    Wipe {
        /// Device id
        device: String,
    },
}
