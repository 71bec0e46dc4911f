//! MQTT topic surface. Centralized here, as plain functions returning
//! owned `String`s, rather than inlined at every publish/subscribe call
//! site.

/// Published before a `GatewayId` is known; every gateway on the fleet
/// listens on the same global registration topic.
pub const GLOBAL_REGISTER: &str = "iot/gateway/register";

pub fn device_register(device_id: &str) -> String {
    format!("iot/gateway/{device_id}/register")
}

pub fn device_config_set(device_id: &str) -> String {
    format!("iot/gateway/{device_id}/config/set")
}

pub fn gateway_status(gateway_id: &str) -> String {
    format!("iot/gateway/{gateway_id}/status")
}

pub fn gateway_config_set(gateway_id: &str) -> String {
    format!("iot/gateway/{gateway_id}/config/set")
}

pub fn gateway_config_get(gateway_id: &str) -> String {
    format!("iot/gateway/{gateway_id}/config/get")
}

pub fn node_assign(gateway_id: &str) -> String {
    format!("iot/gateway/{gateway_id}/node/assign")
}

/// Wildcard subscription for `node_config` envelopes addressed to any
/// node under this gateway.
pub fn node_config_set_wildcard(gateway_id: &str) -> String {
    format!("iot/gateway/{gateway_id}/node/+/config/set")
}

/// Wildcard subscription for `node_control` envelopes.
pub fn node_control_wildcard(gateway_id: &str) -> String {
    format!("iot/gateway/{gateway_id}/node/+/control")
}

pub fn node_register(gateway_id: &str, node_id: &str) -> String {
    format!("iot/gateway/{gateway_id}/node/{node_id}/register")
}

pub fn node_status(gateway_id: &str, node_id: &str) -> String {
    format!("iot/gateway/{gateway_id}/node/{node_id}/status")
}

pub fn node_control_ack(gateway_id: &str, node_id: &str) -> String {
    format!("iot/gateway/{gateway_id}/node/{node_id}/control/ack")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_expected_topic_strings() {
        assert_eq!(gateway_status("GW-1"), "iot/gateway/GW-1/status");
        assert_eq!(
            node_control_ack("GW-1", "nodeA1"),
            "iot/gateway/GW-1/node/nodeA1/control/ack"
        );
        assert_eq!(
            node_config_set_wildcard("GW-1"),
            "iot/gateway/GW-1/node/+/config/set"
        );
    }
}
