//! Persistent configuration shapes and the storage trait both the
//! gateway and the node implement against their own backing store.

use crate::ids::{GatewayId, NodeId};
use heapless::{String, Vec};

/// Upper bound on the gateway's node roster.
pub const MAX_NODES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoraParams {
    pub frequency: u32,
    pub spreading_factor: u8,
    pub bandwidth: u32,
    pub coding_rate: u8,
}

impl Default for LoraParams {
    /// Radio PHY defaults: 433 MHz, SF7, 125 kHz, CR 4/5.
    fn default() -> Self {
        Self {
            frequency: 433_000_000,
            spreading_factor: 7,
            bandwidth: 125_000,
            coding_rate: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub on_hour: u8,
    pub on_min: u8,
    pub off_hour: u8,
    pub off_min: u8,
    pub config_version: u8,
}

/// Gateway configuration, persisted as a single file.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub gateway_id: GatewayId,
    pub lora: LoraParams,
    pub apn: String<32>,
    pub mqtt_broker: String<64>,
    pub mqtt_port: u16,
    pub config_version: u32,
    pub nodes: Vec<NodeInfo, MAX_NODES>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut apn = String::new();
        let _ = apn.push_str("airtelgprs.com");
        let mut broker = String::new();
        let _ = broker.push_str("103.20.215.109");
        Self {
            gateway_id: GatewayId::new(),
            lora: LoraParams::default(),
            apn,
            mqtt_broker: broker,
            mqtt_port: 1883,
            config_version: 0,
            nodes: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// A persisted config must carry a non-empty `gatewayId`.
    pub fn is_provisioned(&self) -> bool {
        !self.gateway_id.is_empty()
    }
}

/// `true` when an incoming `configVersion` should replace the current
/// config. `configVersion` is monotonically non-decreasing across accepted
/// updates; applying a version `<=` the current one is a no-op.
pub fn should_apply_gateway_config(current: &GatewayConfig, incoming_version: u32) -> bool {
    incoming_version > current.config_version
}

/// Node control mode. Manual modes override the schedule and survive
/// reboot; only a `ConfigPkt` (or a future explicit schedule-mode
/// command, not defined in this protocol version) restores `Auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Auto,
    ManualOn,
    ManualOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Schedule {
    pub on_hour: u8,
    pub on_min: u8,
    pub off_hour: u8,
    pub off_min: u8,
}

/// Node configuration, persisted in a key-value namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub gateway_id: GatewayId,
    pub schedule: Schedule,
    pub register_interval_ms: u32,
    pub status_interval_ms: u32,
    pub configured: bool,
    pub control_mode: ControlMode,
    pub light_state: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            gateway_id: GatewayId::new(),
            schedule: Schedule::default(),
            register_interval_ms: 30_000,
            status_interval_ms: 60_000,
            configured: false,
            control_mode: ControlMode::Auto,
            light_state: false,
        }
    }
}

/// Result of a load from the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// No config has ever been successfully saved (or the last save was
    /// interrupted, which this store treats identically).
    NotFound,
    Io,
}

/// The persistent config store. `save` is a replace: remove then write,
/// so a partial write surfaces as `NotFound` on the next `load` rather
/// than as corrupted data. Corruption recovery is automatic because
/// callers always re-read through this trait rather than trusting their
/// in-memory copy.
pub trait ConfigStore<T> {
    fn load(&mut self) -> Result<T, StoreError>;
    fn save(&mut self, value: &T) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_gate_rejects_stale_and_equal_updates() {
        let mut current = GatewayConfig::default();
        current.config_version = 5;
        assert!(!should_apply_gateway_config(&current, 5));
        assert!(!should_apply_gateway_config(&current, 4));
        assert!(should_apply_gateway_config(&current, 6));
    }

    #[test]
    fn unprovisioned_gateway_has_empty_id() {
        assert!(!GatewayConfig::default().is_provisioned());
    }
}
