//! Per-device listener endpoints derived from device identity.
//!
//! The endpoint is a pure function of (interface index, hardware address),
//! recomputed on every sync. Nothing is persisted.

use std::fmt;
use std::net::Ipv4Addr;

use crate::device::{Device, MacAddr};

/// Port used when the low 16 bits of the hardware address are zero.
pub const RESERVED_PORT: u16 = 53;

/// Second-octet flag marking endpoints that use [`RESERVED_PORT`].
const RESERVED_FLAG: u8 = 0x80;

/// Local address and port a device's redirected traffic is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerEndpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl fmt::Display for ListenerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Endpoint for a hardware address on a monitored interface.
///
/// `127.<iface>.<L[31:24]>.<L[23:16]>:<L[15:0]>` where `L` is the low 32 bits
/// of the hardware address. A zero port is replaced by [`RESERVED_PORT`] and
/// flagged in the second octet, so the mapping stays injective.
/// `interface_index` must be at most 127.
pub fn allocate(mac: &MacAddr, interface_index: u8) -> ListenerEndpoint {
    debug_assert!(interface_index & RESERVED_FLAG == 0);

    let [a, b, c, d] = mac.low32().to_be_bytes();
    let port = u16::from_be_bytes([c, d]);

    let (second, port) = if port == 0 {
        (interface_index | RESERVED_FLAG, RESERVED_PORT)
    } else {
        (interface_index, port)
    };

    ListenerEndpoint {
        address: Ipv4Addr::new(127, second, a, b),
        port,
    }
}

/// Endpoint for a registered device.
pub fn endpoint_for(device: &Device) -> ListenerEndpoint {
    allocate(&device.mac, device.interface_index)
}
