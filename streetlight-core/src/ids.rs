//! Identifier types.
//!
//! `NodeId` and `GatewayId` are opaque strings that get packed into fixed
//! 24-byte zero-terminated fields at the codec boundary. They carry a
//! larger capacity here than the wire allows so the codec can exercise
//! its truncation behavior on over-long names in tests.

/// Opaque node identifier, backend-assigned.
pub type NodeId = heapless::String<32>;

/// Opaque gateway identifier, backend-assigned. Empty means unprovisioned.
pub type GatewayId = heapless::String<32>;

/// Which role a [`DeviceId`] was minted for; determines its string prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Gateway,
    Node,
}

/// Hardware-derived immutable identifier used during bootstrap.
///
/// Built from a 12-hex-digit serial number, prefixed `device` for gateways
/// or `node` for nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId(heapless::String<18>);

impl DeviceId {
    /// Builds a `DeviceId` from a 48-bit hardware serial (e.g. an efuse MAC).
    pub fn from_serial(role: DeviceRole, serial: u64) -> Self {
        let mut s = heapless::String::<18>::new();
        let prefix = match role {
            DeviceRole::Gateway => "device",
            DeviceRole::Node => "node",
        };
        let _ = s.push_str(prefix);
        let mut hex = heapless::String::<12>::new();
        for shift in (0..12).rev() {
            let nibble = (serial >> (shift * 4)) & 0xF;
            let c = core::char::from_digit(nibble as u32, 16).unwrap_or('0');
            let _ = hex.push(c.to_ascii_uppercase());
        }
        let _ = s.push_str(&hex);
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_id_has_device_prefix_and_twelve_hex_digits() {
        let id = DeviceId::from_serial(DeviceRole::Gateway, 0x0123_4567_89AB);
        assert_eq!(id.as_str(), "device0123456789AB");
    }

    #[test]
    fn node_id_has_node_prefix() {
        let id = DeviceId::from_serial(DeviceRole::Node, 0xAB);
        assert_eq!(id.as_str(), "node0000000000AB");
    }
}
