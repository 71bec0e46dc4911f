//! Gateway bootstrap/config router and command-queue glue. Kept
//! synchronous and free of I/O, like `streetlight_core`'s `node_handler`:
//! this module decides *what* to do and leaves *doing* it (radio
//! transmit, MQTT publish/subscribe, disk persistence) to the caller, so
//! the two-phase provisioning logic and the command-queue wiring can be
//! exercised without a broker or a serial port.

use streetlight_core::{
    decode, encode, should_apply_gateway_config, AckRing, CommandQueue, ControlRequest,
    EnqueueOutcome, Frame, GatewayConfig, LoraParams, NodeId, NodeInfo, Outcome, Packet,
    PolePacket, TickResult,
};

use crate::envelopes::{
    ControlAction, DeviceConfig, DeviceRegister, LightState, NodeConfigEnvelope,
    NodeControlAckEnvelope, NodeControlEnvelope, NodeRegisterEnvelope, NodeStatusEnvelope,
};
use crate::topics;

/// Firmware version string this gateway build reports in `device_register`.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A side effect `GatewayState` wants performed. Every variant is handed
/// back up to `main`'s task set, which owns the actual MQTT client, LoRa
/// link, and config store.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayAction {
    /// Encode and hand this packet to the LoRa link's single-flight
    /// transmit queue.
    TransmitLora(Packet),
    /// Persist this as the new on-disk `GatewayConfig`.
    Persist(GatewayConfig),
    /// Subscribe to these topics (gateway-scoped, once provisioned).
    Subscribe(Vec<String>),
    /// Re-initialize the radio with these parameters.
    ReinitRadio(LoraParams),
    /// Publish `payload` to `topic`, retained or not.
    Publish {
        topic: String,
        payload: String,
        retain: bool,
    },
}

/// Outcome of routing a backend `node_control` envelope into the command
/// queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Enqueued(u16),
    Full,
    DuplicateCmdId,
    /// `action: "AUTO"` from the backend is recognized but not forwarded
    /// over the radio in this protocol version. The original source
    /// silently drops it; this preserves that rather than inventing a
    /// new wire behavior.
    AutoDropped,
}

/// Everything the gateway half of the control plane needs across one
/// process lifetime: the persisted config, the command queue, and the
/// ACK event ring. Owned by `main`'s task set and driven by MQTT
/// messages, LoRa receptions, and periodic ticks.
pub struct GatewayState {
    device_id: String,
    pub config: GatewayConfig,
    queue: CommandQueue,
    ack_ring: AckRing,
}

impl GatewayState {
    pub fn new(device_id: String, config: GatewayConfig) -> Self {
        Self {
            device_id,
            config,
            queue: CommandQueue::new(),
            ack_ring: AckRing::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_provisioned(&self) -> bool {
        self.config.is_provisioned()
    }

    /// Builds the `device_register` envelope publish, sent on the global
    /// topic and the device-scoped one so the backend can reply on
    /// either.
    pub fn device_register_actions(&self) -> Vec<GatewayAction> {
        let envelope = DeviceRegister::new(self.device_id.clone(), FIRMWARE_VERSION.to_string());
        let payload = serde_json::to_string(&envelope).unwrap_or_default();
        vec![
            GatewayAction::Publish {
                topic: topics::GLOBAL_REGISTER.to_string(),
                payload: payload.clone(),
                retain: false,
            },
            GatewayAction::Publish {
                topic: topics::device_register(&self.device_id),
                payload,
                retain: false,
            },
        ]
    }

    /// Applies a `device_config` bootstrap payload. A missing/empty
    /// `gatewayId` is `ConfigRejected`; the caller keeps retrying
    /// `device_register`. Idempotent: a `configVersion` at or below the
    /// current one is a no-op on persisted state.
    ///
    /// `configVersion` is optional on the wire; when absent, this treats
    /// the payload as one version newer than whatever is current, since
    /// the backend omitting it signals "just apply this" rather than
    /// "re-apply something already applied" (decision recorded in
    /// DESIGN.md).
    pub fn handle_device_config(
        &mut self,
        incoming: DeviceConfig,
    ) -> Result<Vec<GatewayAction>, streetlight_core::CoreError> {
        if incoming.gateway_id.is_empty() {
            return Err(streetlight_core::CoreError::ConfigRejected);
        }

        let incoming_version = incoming
            .config_version
            .unwrap_or(self.config.config_version + 1);
        if !should_apply_gateway_config(&self.config, incoming_version) {
            return Ok(Vec::new());
        }

        let mut next = self.config.clone();
        next.gateway_id = Default::default();
        let _ = next.gateway_id.push_str(&incoming.gateway_id);
        if let Some(lora) = &incoming.lora {
            if let Some(v) = lora.frequency {
                next.lora.frequency = v;
            }
            if let Some(v) = lora.spreading_factor {
                next.lora.spreading_factor = v;
            }
            if let Some(v) = lora.bandwidth {
                next.lora.bandwidth = v;
            }
            if let Some(v) = lora.coding_rate {
                next.lora.coding_rate = v;
            }
        }
        if let Some(apn) = &incoming.apn {
            next.apn = Default::default();
            let _ = next.apn.push_str(apn);
        }
        if let Some(mqtt) = &incoming.mqtt {
            if let Some(broker) = &mqtt.broker {
                next.mqtt_broker = Default::default();
                let _ = next.mqtt_broker.push_str(broker);
            }
            if let Some(port) = mqtt.port {
                next.mqtt_port = port;
            }
        }
        next.config_version = incoming_version;
        if let Some(nodes) = incoming.nodes {
            next.nodes.clear();
            for n in nodes {
                let mut node_id = NodeId::new();
                let _ = node_id.push_str(&n.node_id);
                let _ = next.nodes.push(NodeInfo {
                    node_id,
                    on_hour: n.config.on_hour,
                    on_min: n.config.on_min,
                    off_hour: n.config.off_hour,
                    off_min: n.config.off_min,
                    config_version: n.config_version,
                });
            }
        }

        self.config = next.clone();

        let gateway_id = next.gateway_id.as_str().to_string();
        let subscribe = vec![
            topics::gateway_config_set(&gateway_id),
            topics::gateway_config_get(&gateway_id),
            topics::node_assign(&gateway_id),
            topics::node_config_set_wildcard(&gateway_id),
            topics::node_control_wildcard(&gateway_id),
        ];

        Ok(vec![
            GatewayAction::Persist(next.clone()),
            GatewayAction::Subscribe(subscribe),
            GatewayAction::ReinitRadio(next.lora),
            GatewayAction::Publish {
                topic: topics::gateway_status(&gateway_id),
                payload: "ONLINE".to_string(),
                retain: true,
            },
        ])
    }

    /// Builds the gateway-scoped subscribe set plus a retained `ONLINE`
    /// publish for a gateway that is *already* provisioned at process
    /// start (persisted config on disk from a prior run). Phase 1's
    /// `device_config` handler only runs this once, the first time a
    /// gateway is provisioned; a restart with existing config must reach
    /// the same subscribed/online state without waiting for the backend
    /// to resend a `device_config` it has no reason to repeat.
    pub fn reconnect_actions(&self) -> Vec<GatewayAction> {
        let gateway_id = self.config.gateway_id.as_str().to_string();
        let subscribe = vec![
            topics::gateway_config_set(&gateway_id),
            topics::gateway_config_get(&gateway_id),
            topics::node_assign(&gateway_id),
            topics::node_config_set_wildcard(&gateway_id),
            topics::node_control_wildcard(&gateway_id),
        ];
        vec![
            GatewayAction::Subscribe(subscribe),
            GatewayAction::Publish {
                topic: topics::gateway_status(&gateway_id),
                payload: "ONLINE".to_string(),
                retain: true,
            },
        ]
    }

    /// Builds the `ConfigPkt` forwarded to a node. Sent once, with no
    /// radio-level retry/ACK loop of its own; a known weak spot,
    /// preserved as-is.
    pub fn handle_node_config(&self, env: &NodeConfigEnvelope) -> GatewayAction {
        let mut node_id = NodeId::new();
        let _ = node_id.push_str(&env.node_id);
        let mut gateway_id = streetlight_core::GatewayId::new();
        let _ = gateway_id.push_str(&env.gateway_id);
        GatewayAction::TransmitLora(Packet::Config {
            node_id,
            gateway_id,
            on_hour: env.schedule.on_hour,
            on_min: env.schedule.on_min,
            off_hour: env.schedule.off_hour,
            off_min: env.schedule.off_min,
            cfg_ver: env.config_version,
            reg_interval_ms: env.intervals.register,
            status_interval_ms: env.intervals.status,
        })
    }

    /// Routes a `node_control` envelope into the command queue. `AUTO`
    /// is recognized but dropped.
    pub fn handle_node_control(&mut self, env: &NodeControlEnvelope) -> ControlOutcome {
        if env.action == ControlAction::Auto {
            return ControlOutcome::AutoDropped;
        }
        let mut node_id = NodeId::new();
        let _ = node_id.push_str(&env.node_id);
        let req = ControlRequest {
            cmd_id: env.cmd_id,
            node_id,
            light_on: env.action == ControlAction::On,
        };
        match self.queue.enqueue(req) {
            EnqueueOutcome::Accepted(id) => ControlOutcome::Enqueued(id),
            EnqueueOutcome::Full => ControlOutcome::Full,
            EnqueueOutcome::DuplicateCmdId => ControlOutcome::DuplicateCmdId,
        }
    }

    /// A `RegisterPkt` arrived over the radio; forward it as a
    /// `node_register` envelope.
    pub fn on_lora_register(&self, node_id: &str, rssi: i32, snr: i32, timestamp: u64) -> GatewayAction {
        let gateway_id = self.config.gateway_id.as_str().to_string();
        let envelope = NodeRegisterEnvelope {
            kind: "node_register",
            device_id: self.device_id.clone(),
            gateway_id: gateway_id.clone(),
            node_id: node_id.to_string(),
            rssi,
            snr,
            timestamp,
        };
        GatewayAction::Publish {
            topic: topics::node_register(&gateway_id, node_id),
            payload: serde_json::to_string(&envelope).unwrap_or_default(),
            retain: false,
        }
    }

    /// A `PolePacket`-carrying `StatusPkt` arrived over the radio; forward
    /// it as a `node_status` envelope.
    pub fn on_lora_status(&self, pole: &PolePacket) -> GatewayAction {
        let gateway_id = self.config.gateway_id.as_str().to_string();
        let node_id = pole.node_id.as_str().to_string();
        let envelope = NodeStatusEnvelope {
            kind: "node_status",
            device_id: self.device_id.clone(),
            gateway_id: gateway_id.clone(),
            node_id: node_id.clone(),
            state: LightState::from(pole.light_state),
            fault: pole.fault,
            time: format!("{}:{}", pole.hour, pole.minute),
            rssi: pole.rssi,
            snr: pole.snr,
        };
        GatewayAction::Publish {
            topic: topics::node_status(&gateway_id, &node_id),
            payload: serde_json::to_string(&envelope).unwrap_or_default(),
            retain: false,
        }
    }

    /// An `AckPkt` arrived over the radio; match it against the queue.
    /// A stale/duplicate match (`on_ack` returns `None`) is still
    /// surfaced as an ACK event with `success=false` so the backend can
    /// observe it.
    pub fn on_lora_ack(&mut self, cmd_id: u16, node_id: &str) {
        match self.queue.on_ack(cmd_id, node_id) {
            Some(TickResult::Terminal {
                cmd_id,
                node_id,
                outcome,
            }) => {
                let _ = self
                    .ack_ring
                    .push(streetlight_core::AckEvent { cmd_id, node_id, outcome });
            }
            _ => {
                let mut nid = NodeId::new();
                let _ = nid.push_str(node_id);
                let _ = self.ack_ring.push(streetlight_core::AckEvent {
                    cmd_id,
                    node_id: nid,
                    outcome: Outcome::Stale,
                });
            }
        }
    }

    /// Advances the command queue's retry/timeout state machine. A
    /// `Send` result is translated into a `TransmitLora` action; a
    /// `Terminal` result (exhausted) is folded into the ACK ring rather
    /// than returned directly, same as a matched ACK.
    pub fn tick(&mut self, now_ms: streetlight_core::Millis) -> Vec<GatewayAction> {
        match self.queue.tick(now_ms) {
            TickResult::Idle => Vec::new(),
            TickResult::Send(action) => vec![GatewayAction::TransmitLora(Packet::Control {
                cmd_id: action.cmd_id,
                node_id: action.node_id,
                light_on: action.light_on,
            })],
            TickResult::Terminal {
                cmd_id,
                node_id,
                outcome,
            } => {
                let _ = self
                    .ack_ring
                    .push(streetlight_core::AckEvent { cmd_id, node_id, outcome });
                Vec::new()
            }
        }
    }

    /// Drains the ACK ring into `node_control_ack` publish actions. The
    /// ring's single consumer, run once per loop tick.
    pub fn drain_ack_events(&mut self, now_ms: u64) -> Vec<GatewayAction> {
        let gateway_id = self.config.gateway_id.as_str().to_string();
        let mut actions = Vec::new();
        while let Some(event) = self.ack_ring.pop() {
            let node_id = event.node_id.as_str().to_string();
            let envelope = NodeControlAckEnvelope {
                kind: "node_control_ack",
                gateway_id: gateway_id.clone(),
                device_id: self.device_id.clone(),
                node_id: node_id.clone(),
                cmd_id: event.cmd_id,
                success: event.outcome.is_success(),
                ts: now_ms,
            };
            actions.push(GatewayAction::Publish {
                topic: topics::node_control_ack(&gateway_id, &node_id),
                payload: serde_json::to_string(&envelope).unwrap_or_default(),
                retain: false,
            });
        }
        actions
    }
}

/// Decode an inbound LoRa frame's raw bytes, re-exported here so `main`
/// doesn't need a separate `use streetlight_core::decode` alongside this
/// module's action types.
pub fn decode_frame(bytes: &[u8]) -> Result<Packet, streetlight_core::CoreError> {
    decode(bytes).map_err(|_| streetlight_core::CoreError::BadFrame)
}

/// Encode an outbound packet to its wire frame.
pub fn encode_frame(pkt: &Packet) -> Frame {
    encode(pkt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelopes::{
        ControlModeField, NodeConfigIntervals, NodeConfigSchedule,
    };

    fn state() -> GatewayState {
        GatewayState::new("device0123456789AB".to_string(), GatewayConfig::default())
    }

    #[test]
    fn unprovisioned_gateway_publishes_device_register_on_both_topics() {
        let gw = state();
        let actions = gw.device_register_actions();
        assert_eq!(actions.len(), 2);
        assert!(matches!(&actions[0], GatewayAction::Publish { topic, .. } if topic == topics::GLOBAL_REGISTER));
        assert!(matches!(&actions[1], GatewayAction::Publish { topic, .. }
            if topic == &topics::device_register("device0123456789AB")));
    }

    #[test]
    fn device_config_missing_gateway_id_is_rejected() {
        let mut gw = state();
        let incoming = DeviceConfig {
            gateway_id: String::new(),
            lora: None,
            apn: None,
            mqtt: None,
            config_version: Some(1),
            nodes: None,
        };
        let result = gw.handle_device_config(incoming);
        assert_eq!(result, Err(streetlight_core::CoreError::ConfigRejected));
        assert!(!gw.is_provisioned());
    }

    #[test]
    fn device_config_with_gateway_id_provisions_and_goes_online() {
        let mut gw = state();
        let incoming = DeviceConfig {
            gateway_id: "GW-1".to_string(),
            lora: None,
            apn: None,
            mqtt: None,
            config_version: Some(1),
            nodes: None,
        };
        let actions = gw.handle_device_config(incoming).unwrap();
        assert!(gw.is_provisioned());
        assert_eq!(gw.config.gateway_id.as_str(), "GW-1");
        assert!(actions
            .iter()
            .any(|a| matches!(a, GatewayAction::Persist(_))));
        assert!(actions
            .iter()
            .any(|a| matches!(a, GatewayAction::ReinitRadio(_))));
        assert!(actions.iter().any(|a| matches!(a,
            GatewayAction::Publish { topic, payload, retain }
            if topic == "iot/gateway/GW-1/status" && payload == "ONLINE" && *retain)));
    }

    #[test]
    fn reapplying_same_or_older_config_version_is_a_no_op() {
        let mut gw = state();
        let first = DeviceConfig {
            gateway_id: "GW-1".to_string(),
            lora: None,
            apn: None,
            mqtt: None,
            config_version: Some(5),
            nodes: None,
        };
        gw.handle_device_config(first).unwrap();
        let stale = DeviceConfig {
            gateway_id: "GW-1".to_string(),
            lora: None,
            apn: None,
            mqtt: None,
            config_version: Some(5),
            nodes: None,
        };
        let actions = gw.handle_device_config(stale).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn reconnect_actions_resubscribe_and_announce_online_without_a_fresh_device_config() {
        let mut gw = state();
        let incoming = DeviceConfig {
            gateway_id: "GW-1".to_string(),
            lora: None,
            apn: None,
            mqtt: None,
            config_version: Some(1),
            nodes: None,
        };
        gw.handle_device_config(incoming).unwrap();

        // Simulate a process restart: a fresh GatewayState loaded from the
        // persisted config, never having seen a device_config this run.
        let restarted = GatewayState::new(gw.device_id().to_string(), gw.config.clone());
        let actions = restarted.reconnect_actions();
        assert!(actions.iter().any(|a| matches!(a,
            GatewayAction::Subscribe(subs) if subs.iter().any(|t| t == &topics::node_control_wildcard("GW-1")))));
        assert!(actions.iter().any(|a| matches!(a,
            GatewayAction::Publish { topic, payload, retain }
            if topic == "iot/gateway/GW-1/status" && payload == "ONLINE" && *retain)));
    }

    #[test]
    fn node_control_auto_is_dropped_not_enqueued() {
        let mut gw = state();
        let env = NodeControlEnvelope {
            kind: "node_control".to_string(),
            node_id: "nodeA1".to_string(),
            gateway_id: "GW-1".to_string(),
            action: ControlAction::Auto,
            mode: ControlModeField::Auto,
            cmd_id: 3,
        };
        assert_eq!(gw.handle_node_control(&env), ControlOutcome::AutoDropped);
    }

    #[test]
    fn node_control_on_enqueues_and_ack_drains_to_event() {
        let mut gw = state();
        let env = NodeControlEnvelope {
            kind: "node_control".to_string(),
            node_id: "nodeA1".to_string(),
            gateway_id: "GW-1".to_string(),
            action: ControlAction::On,
            mode: ControlModeField::Manual,
            cmd_id: 7,
        };
        assert_eq!(gw.handle_node_control(&env), ControlOutcome::Enqueued(7));

        let actions = gw.tick(0);
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            GatewayAction::TransmitLora(Packet::Control { cmd_id: 7, .. })
        ));

        gw.on_lora_ack(7, "nodeA1");
        let ack_actions = gw.drain_ack_events(1000);
        assert_eq!(ack_actions.len(), 1);
        assert!(matches!(&ack_actions[0], GatewayAction::Publish { payload, .. }
            if payload.contains("\"success\":true")));
    }

    #[test]
    fn stale_ack_is_surfaced_as_failed_event() {
        let mut gw = state();
        gw.on_lora_ack(999, "nodeA1");
        let actions = gw.drain_ack_events(0);
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], GatewayAction::Publish { payload, .. }
            if payload.contains("\"success\":false")));
    }

    #[test]
    fn node_config_envelope_builds_matching_config_packet() {
        let gw = state();
        let env = NodeConfigEnvelope {
            kind: "node_config".to_string(),
            node_id: "nodeA1".to_string(),
            gateway_id: "GW-1".to_string(),
            schedule: NodeConfigSchedule {
                on_hour: 18,
                on_min: 0,
                off_hour: 6,
                off_min: 0,
            },
            config_version: 4,
            intervals: NodeConfigIntervals {
                register: 30_000,
                status: 60_000,
            },
        };
        match gw.handle_node_config(&env) {
            GatewayAction::TransmitLora(Packet::Config { node_id, cfg_ver, .. }) => {
                assert_eq!(node_id.as_str(), "nodeA1");
                assert_eq!(cfg_ver, 4);
            }
            other => panic!("expected TransmitLora(Config), got {other:?}"),
        }
    }
}
