//! On-disk `GatewayConfig` store.
//!
//! `streetlight_core::GatewayConfig` is built on `heapless` collections so
//! it stays usable from `no_std` firmware; this store serializes a plain
//! std-backed mirror of it to JSON and converts both ways at the
//! boundary. `save` replaces: remove then write. The old file is removed
//! before the new one is written, so a crash between the two leaves
//! `load` reporting `NotFound` rather than handing back stale or torn
//! data.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use streetlight_core::{GatewayConfig, LoraParams, NodeInfo, StoreError};

#[derive(Debug, Serialize, Deserialize)]
struct OnDiskLora {
    frequency: u32,
    spreading_factor: u8,
    bandwidth: u32,
    coding_rate: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct OnDiskNode {
    node_id: String,
    on_hour: u8,
    on_min: u8,
    off_hour: u8,
    off_min: u8,
    config_version: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct OnDiskGatewayConfig {
    gateway_id: String,
    lora: OnDiskLora,
    apn: String,
    mqtt_broker: String,
    mqtt_port: u16,
    config_version: u32,
    nodes: Vec<OnDiskNode>,
}

fn to_on_disk(cfg: &GatewayConfig) -> OnDiskGatewayConfig {
    OnDiskGatewayConfig {
        gateway_id: cfg.gateway_id.as_str().to_string(),
        lora: OnDiskLora {
            frequency: cfg.lora.frequency,
            spreading_factor: cfg.lora.spreading_factor,
            bandwidth: cfg.lora.bandwidth,
            coding_rate: cfg.lora.coding_rate,
        },
        apn: cfg.apn.as_str().to_string(),
        mqtt_broker: cfg.mqtt_broker.as_str().to_string(),
        mqtt_port: cfg.mqtt_port,
        config_version: cfg.config_version,
        nodes: cfg
            .nodes
            .iter()
            .map(|n| OnDiskNode {
                node_id: n.node_id.as_str().to_string(),
                on_hour: n.on_hour,
                on_min: n.on_min,
                off_hour: n.off_hour,
                off_min: n.off_min,
                config_version: n.config_version,
            })
            .collect(),
    }
}

fn from_on_disk(on_disk: OnDiskGatewayConfig) -> Result<GatewayConfig, StoreError> {
    let mut cfg = GatewayConfig::default();

    cfg.gateway_id
        .push_str(&on_disk.gateway_id)
        .map_err(|_| StoreError::Io)?;
    cfg.lora = LoraParams {
        frequency: on_disk.lora.frequency,
        spreading_factor: on_disk.lora.spreading_factor,
        bandwidth: on_disk.lora.bandwidth,
        coding_rate: on_disk.lora.coding_rate,
    };
    cfg.apn = Default::default();
    cfg.apn.push_str(&on_disk.apn).map_err(|_| StoreError::Io)?;
    cfg.mqtt_broker = Default::default();
    cfg.mqtt_broker
        .push_str(&on_disk.mqtt_broker)
        .map_err(|_| StoreError::Io)?;
    cfg.mqtt_port = on_disk.mqtt_port;
    cfg.config_version = on_disk.config_version;

    for node in on_disk.nodes {
        let mut node_id = streetlight_core::NodeId::new();
        node_id.push_str(&node.node_id).map_err(|_| StoreError::Io)?;
        cfg.nodes
            .push(NodeInfo {
                node_id,
                on_hour: node.on_hour,
                on_min: node.on_min,
                off_hour: node.off_hour,
                off_min: node.off_min,
                config_version: node.config_version,
            })
            .map_err(|_| StoreError::Io)?;
    }

    Ok(cfg)
}

/// JSON file backing the gateway's persisted config
/// (`/gateway_config.json`).
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl streetlight_core::ConfigStore<GatewayConfig> for JsonFileStore {
    fn load(&mut self) -> Result<GatewayConfig, StoreError> {
        let bytes = fs::read(&self.path).map_err(|_| StoreError::NotFound)?;
        let on_disk: OnDiskGatewayConfig =
            serde_json::from_slice(&bytes).map_err(|_| StoreError::NotFound)?;
        from_on_disk(on_disk)
    }

    fn save(&mut self, value: &GatewayConfig) -> Result<(), StoreError> {
        let on_disk = to_on_disk(value);
        let json = serde_json::to_vec_pretty(&on_disk).map_err(|_| StoreError::Io)?;

        // Remove-then-write: a crash between the two calls must surface
        // as NotFound on the next load, never as a torn file.
        let _ = fs::remove_file(&self.path);
        fs::write(&self.path, json).map_err(|_| StoreError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streetlight_core::ConfigStore;

    #[test]
    fn round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!(
            "streetlight-gw-config-test-{:?}",
            std::thread::current().id()
        ));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gateway_config.json");
        let _ = fs::remove_file(&path);

        let mut store = JsonFileStore::new(&path);
        let mut cfg = GatewayConfig::default();
        cfg.gateway_id.push_str("GW-1").unwrap();
        cfg.config_version = 3;

        store.save(&cfg).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.gateway_id.as_str(), "GW-1");
        assert_eq!(loaded.config_version, 3);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_not_found() {
        let mut store = JsonFileStore::new("/tmp/streetlight-gw-config-does-not-exist.json");
        assert!(matches!(store.load(), Err(StoreError::NotFound)));
    }
}
