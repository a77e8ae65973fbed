//! CLI command implementations.

pub mod dns;
pub mod init;
pub mod ip;
mod policy;
