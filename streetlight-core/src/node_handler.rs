//! Node control handler: applies inbound `ConfigPkt`/`ControlPkt` frames
//! to a [`NodeConfig`], producing the ACK to emit. Side effects
//! (persisting the config, driving the relay, transmitting) are left to
//! the caller, so this stays pure and can be exercised without a radio,
//! a clock, or flash.

use crate::config::{ControlMode, NodeConfig, Schedule};
use crate::error::CoreError;
use crate::ids::NodeId;
use crate::packet::Packet;

/// What happened as a result of handling an inbound packet, and the ACK
/// the caller should transmit.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEffect {
    /// A `ConfigPkt` addressed to us was applied. `cfg.configured` is now
    /// `true`, `cfg.control_mode` is forced to `Auto`, and `cfg.schedule`
    /// / intervals / `gateway_id` reflect the packet.
    ConfigApplied { ack: Packet },
    /// A `ControlPkt` addressed to us was applied. `cfg.control_mode` and
    /// `cfg.light_state` now reflect the forced value; the caller should
    /// drive the relay to `light_state` and persist.
    ControlApplied { ack: Packet, light_state: bool },
}

fn make_ack(my_node_id: &str, cmd_id: u16) -> Packet {
    let mut node_id = NodeId::new();
    let _ = node_id.push_str(my_node_id);
    Packet::Ack { cmd_id, node_id }
}

/// Apply `pkt` to `cfg` as the node identified by `my_node_id`.
///
/// Returns `Err(AddressMismatch)` for a well-formed `Config`/`Control`
/// frame addressed to a different node (dropped silently by the caller)
/// and `Err(BadFrame)` for any other packet variant, since this handler
/// only owns the two inbound-to-node types; `Register`/`Status` are
/// node-originated and `Beacon`/`Assign`/`LoraConfig` have no handler
/// defined at this layer.
pub fn handle_inbound(
    my_node_id: &str,
    pkt: &Packet,
    cfg: &mut NodeConfig,
) -> Result<NodeEffect, CoreError> {
    match pkt {
        Packet::Config {
            node_id,
            gateway_id,
            on_hour,
            on_min,
            off_hour,
            off_min,
            cfg_ver,
            reg_interval_ms,
            status_interval_ms,
        } => {
            if node_id.as_str() != my_node_id {
                return Err(CoreError::AddressMismatch);
            }
            cfg.schedule = Schedule {
                on_hour: *on_hour,
                on_min: *on_min,
                off_hour: *off_hour,
                off_min: *off_min,
            };
            cfg.gateway_id = gateway_id.clone();
            if *reg_interval_ms > 0 {
                cfg.register_interval_ms = *reg_interval_ms;
            }
            if *status_interval_ms > 0 {
                cfg.status_interval_ms = *status_interval_ms;
            }
            cfg.configured = true;
            cfg.control_mode = ControlMode::Auto;

            Ok(NodeEffect::ConfigApplied {
                ack: make_ack(my_node_id, *cfg_ver as u16),
            })
        }
        Packet::Control {
            cmd_id,
            node_id,
            light_on,
        } => {
            if node_id.as_str() != my_node_id {
                return Err(CoreError::AddressMismatch);
            }
            cfg.control_mode = if *light_on {
                ControlMode::ManualOn
            } else {
                ControlMode::ManualOff
            };
            cfg.light_state = *light_on;

            Ok(NodeEffect::ControlApplied {
                ack: make_ack(my_node_id, *cmd_id),
                light_state: *light_on,
            })
        }
        _ => Err(CoreError::BadFrame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::GatewayId;

    fn node_id(s: &str) -> NodeId {
        let mut n = NodeId::new();
        let _ = n.push_str(s);
        n
    }

    fn gateway_id(s: &str) -> GatewayId {
        let mut g = GatewayId::new();
        let _ = g.push_str(s);
        g
    }

    #[test]
    fn config_addressed_to_self_is_applied_and_forces_auto() {
        let mut cfg = NodeConfig::default();
        cfg.control_mode = ControlMode::ManualOn;
        let pkt = Packet::Config {
            node_id: node_id("nodeA1"),
            gateway_id: gateway_id("GW-1"),
            on_hour: 18,
            on_min: 0,
            off_hour: 6,
            off_min: 0,
            cfg_ver: 9,
            reg_interval_ms: 30_000,
            status_interval_ms: 60_000,
        };
        let effect = handle_inbound("nodeA1", &pkt, &mut cfg).unwrap();
        assert!(cfg.configured);
        assert_eq!(cfg.control_mode, ControlMode::Auto);
        assert_eq!(cfg.gateway_id.as_str(), "GW-1");
        match effect {
            NodeEffect::ConfigApplied { ack } => {
                assert_eq!(
                    ack,
                    Packet::Ack {
                        cmd_id: 9,
                        node_id: node_id("nodeA1")
                    }
                );
            }
            _ => panic!("wrong effect"),
        }
    }

    #[test]
    fn config_addressed_to_another_node_is_ignored() {
        let mut cfg = NodeConfig::default();
        let before = cfg.clone();
        let pkt = Packet::Config {
            node_id: node_id("nodeOTHER"),
            gateway_id: gateway_id("GW-1"),
            on_hour: 0,
            on_min: 0,
            off_hour: 0,
            off_min: 0,
            cfg_ver: 1,
            reg_interval_ms: 1000,
            status_interval_ms: 1000,
        };
        let result = handle_inbound("nodeA1", &pkt, &mut cfg);
        assert_eq!(result, Err(CoreError::AddressMismatch));
        assert_eq!(cfg, before);
    }

    #[test]
    fn control_sets_manual_mode_and_light_state() {
        let mut cfg = NodeConfig::default();
        let pkt = Packet::Control {
            cmd_id: 42,
            node_id: node_id("nodeA1"),
            light_on: false,
        };
        let effect = handle_inbound("nodeA1", &pkt, &mut cfg).unwrap();
        assert_eq!(cfg.control_mode, ControlMode::ManualOff);
        assert!(!cfg.light_state);
        match effect {
            NodeEffect::ControlApplied { ack, light_state } => {
                assert!(!light_state);
                assert_eq!(
                    ack,
                    Packet::Ack {
                        cmd_id: 42,
                        node_id: node_id("nodeA1")
                    }
                );
            }
            _ => panic!("wrong effect"),
        }
    }
}
