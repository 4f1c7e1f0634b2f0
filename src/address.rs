//! Node addressing.
//!
//! The mesh stack identifies nodes by their raw radio (station) address, while
//! everything that crosses the wire or gets compared against a command target
//! uses the logical [`NodeAddress`]: the radio address with [`ADDRESS_OFFSET`]
//! added to its last byte. The logical form is what a child sees as its
//! parent's BSSID, so reports and targets line up with the stack's own view of
//! parents.

use std::fmt;
use std::str::FromStr;

/// Added (wrapping) to the last byte of a radio address to get the logical address.
pub const ADDRESS_OFFSET: u8 = 1;

/// Raw 6-byte hardware address as reported by the radio and routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RadioAddress(pub [u8; 6]);

/// Logical node address, rendered as `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress([u8; 6]);

impl RadioAddress {
    /// Applies the fixed offset transform.
    pub fn logical(self) -> NodeAddress {
        let mut bytes = self.0;
        bytes[5] = bytes[5].wrapping_add(ADDRESS_OFFSET);
        NodeAddress(bytes)
    }
}

impl NodeAddress {
    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// Inverse of [`RadioAddress::logical`], used to address a child on the mesh.
    pub fn radio(self) -> RadioAddress {
        let mut bytes = self.0;
        bytes[5] = bytes[5].wrapping_sub(ADDRESS_OFFSET);
        RadioAddress(bytes)
    }

    /// Canonical string comparison against a command target.
    pub fn matches(&self, target: &str) -> bool {
        self.to_string() == target
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8; 6]) -> fmt::Result {
    write!(
        f,
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Display for RadioAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

fn parse_hex(s: &str) -> Result<[u8; 6], String> {
    let mut bytes = [0u8; 6];
    let mut parts = s.split(':');
    for byte in bytes.iter_mut() {
        let part = parts.next().ok_or_else(|| format!("address '{}' has fewer than 6 octets", s))?;
        if part.len() != 2 {
            return Err(format!("address '{}' has malformed octet '{}'", s, part));
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| format!("address '{}' has malformed octet '{}'", s, part))?;
    }
    if parts.next().is_some() {
        return Err(format!("address '{}' has more than 6 octets", s));
    }
    Ok(bytes)
}

impl FromStr for RadioAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s).map(RadioAddress)
    }
}

impl FromStr for NodeAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s).map(NodeAddress)
    }
}

/// Resolves this node's logical address from its hardware address.
pub fn self_address(radio: RadioAddress) -> NodeAddress {
    radio.logical()
}
