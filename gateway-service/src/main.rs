//! Gateway service: bridges the backend's MQTT control plane to the
//! fleet's single LoRa node, over a GPRS uplink.
//!
//! Startup mirrors the original firmware's `setup()`: bring up the GPRS
//! modem, load whatever `GatewayConfig` is on disk (or start
//! unprovisioned), connect to the MQTT broker, and either announce
//! `device_register` until the backend answers with a `device_config`
//! (first boot) or go straight to the gateway-scoped subscriptions and
//! an `ONLINE` announcement (restart with a persisted config).
//! From there the main loop is a single `tokio::select!` over the MQTT
//! event loop, the LoRa link, and a periodic command-queue tick,
//! collapsed into one loop and one `&mut GatewayState` since none of them
//! needs to run ahead of the others.

mod bootstrap;
mod config_store;
mod envelopes;
mod error;
mod gprs;
mod lora_link;
mod topics;

use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet as MqttPacket, QoS};
use serde::Deserialize;
use tracing::{error, info, warn};

use bootstrap::{ControlOutcome, GatewayAction, GatewayState};
use config_store::JsonFileStore;
use envelopes::{DeviceConfig, NodeConfigEnvelope, NodeControlEnvelope};
use error::GatewayError;
use streetlight_core::{ConfigStore, DeviceId, DeviceRole, GatewayConfig, Packet};

/// Reads a 48-bit hardware serial from the environment and mints this
/// gateway's immutable `DeviceId` from it. Real fleets burn this into
/// an efuse/MAC at flash time; a host-run service has no single
/// canonical hardware serial, so it's supplied at deploy time instead.
fn device_id_from_env() -> Result<DeviceId> {
    let hex = std::env::var("GATEWAY_SERIAL_HEX")
        .context("GATEWAY_SERIAL_HEX must be set to this unit's 12-hex-digit hardware serial")?;
    let serial = u64::from_str_radix(hex.trim(), 16)
        .with_context(|| format!("GATEWAY_SERIAL_HEX {hex:?} is not valid hex"))?;
    Ok(DeviceId::from_serial(DeviceRole::Gateway, serial))
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Just enough of an inbound envelope to read its `type` discriminator
/// before deserializing the rest, mirroring `onMqttMessage`'s
/// dispatch-by-`type` in the original gateway firmware.
#[derive(Debug, Deserialize)]
struct EnvelopeKind {
    #[serde(rename = "type")]
    kind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("gateway-service starting");

    let device_id = device_id_from_env()?;
    info!(device_id = %device_id, "identity established");

    let config_path = env_or("GATEWAY_CONFIG_PATH", "/gateway_config.json");
    let mut store = JsonFileStore::new(&config_path);
    let config = match store.load() {
        Ok(cfg) => {
            info!(path = %config_path, "loaded persisted gateway config");
            cfg
        }
        Err(_) => {
            info!(path = %config_path, "no persisted config found, starting unprovisioned");
            GatewayConfig::default()
        }
    };

    let mut gateway = GatewayState::new(device_id.to_string(), config);

    let gprs_path = env_or("GPRS_SERIAL_PATH", "/dev/ttyUSB1");
    let mut modem = gprs::GprsModem::open(&gprs_path, 9600, gateway.config.apn.as_str())
        .await
        .with_context(|| format!("opening GPRS modem on {gprs_path}"))?;
    if gprs::ensure_connected(&mut modem).await.is_err() {
        anyhow::bail!("gprs modem did not reconnect within the 5-minute window");
    }

    let lora_path = env_or("LORA_SERIAL_PATH", "/dev/ttyUSB0");
    let mut lora = lora_link::LoraLink::open(&lora_path, 115_200)
        .await
        .with_context(|| format!("opening lora link on {lora_path}"))?;
    lora.configure(&gateway.config.lora).await.ok();

    let broker = gateway.config.mqtt_broker.as_str().to_string();
    let mut mqtt_options =
        MqttOptions::new(gateway.device_id().to_string(), broker, gateway.config.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if gateway.is_provisioned() {
        let gateway_id = gateway.config.gateway_id.as_str();
        mqtt_options.set_last_will(rumqttc::LastWill::new(
            topics::gateway_status(gateway_id),
            "OFFLINE",
            QoS::AtMostOnce,
            true,
        ));
    }

    let (client, mut event_loop) = AsyncClient::new(mqtt_options, 16);

    if gateway.is_provisioned() {
        // Reconnecting with a persisted config: go straight to the
        // gateway-scoped subscriptions and announce ONLINE rather than
        // waiting for a fresh device_config.
        for action in gateway.reconnect_actions() {
            apply_action(action, &client, &mut store, &mut lora).await;
        }
    } else {
        client
            .subscribe(topics::device_config_set(gateway.device_id()), QoS::AtMostOnce)
            .await
            .context("subscribing to device_config topic")?;
        for action in gateway.device_register_actions() {
            apply_action(action, &client, &mut store, &mut lora).await;
        }
    }

    let mut tick_interval = tokio::time::interval(Duration::from_millis(100));
    let started = tokio::time::Instant::now();

    info!("entering main loop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                break;
            }

            event = event_loop.poll() => {
                match event {
                    Ok(Event::Incoming(MqttPacket::Publish(publish))) => {
                        let actions = handle_mqtt_publish(&mut gateway, &publish.topic, &publish.payload);
                        for action in actions {
                            apply_action(action, &client, &mut store, &mut lora).await;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %GatewayError::from(e), "mqtt event loop error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }

            received = lora.recv() => {
                match received {
                    Ok(reception) => {
                        let actions = handle_lora_reception(&mut gateway, &reception);
                        for action in actions {
                            apply_action(action, &client, &mut store, &mut lora).await;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "lora link read error");
                    }
                }
            }

            _ = tick_interval.tick() => {
                let now_ms = started.elapsed().as_millis() as u64;
                for action in gateway.tick(now_ms) {
                    apply_action(action, &client, &mut store, &mut lora).await;
                }
                for action in gateway.drain_ack_events(now_ms) {
                    apply_action(action, &client, &mut store, &mut lora).await;
                }
            }
        }
    }

    if gateway.is_provisioned() {
        let gateway_id = gateway.config.gateway_id.as_str().to_string();
        let _ = client
            .publish(topics::gateway_status(&gateway_id), QoS::AtMostOnce, true, "OFFLINE")
            .await;
    }

    info!("gateway-service stopped");
    Ok(())
}

/// Dispatches one inbound MQTT publish to the bootstrap router by
/// sniffing its `type` field, mirroring `onMqttMessage`'s switch in the
/// original gateway firmware. Malformed payloads are logged and dropped
/// rather than treated as fatal; this service outlives a single bad
/// message.
fn handle_mqtt_publish(gateway: &mut GatewayState, topic: &str, payload: &[u8]) -> Vec<GatewayAction> {
    let Ok(kind) = serde_json::from_slice::<EnvelopeKind>(payload) else {
        warn!(%topic, "mqtt payload missing/invalid type field, dropping");
        return Vec::new();
    };

    match kind.kind.as_str() {
        "device_config" => match serde_json::from_slice::<DeviceConfig>(payload) {
            Ok(env) => match gateway.handle_device_config(env) {
                Ok(actions) => actions,
                Err(e) => {
                    warn!(error = %GatewayError::from(e), %topic, "device_config rejected");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, %topic, "failed to parse device_config");
                Vec::new()
            }
        },
        "node_config" => match serde_json::from_slice::<NodeConfigEnvelope>(payload) {
            Ok(env) => vec![gateway.handle_node_config(&env)],
            Err(e) => {
                warn!(error = %e, %topic, "failed to parse node_config");
                Vec::new()
            }
        },
        "node_control" => match serde_json::from_slice::<NodeControlEnvelope>(payload) {
            Ok(env) => {
                match gateway.handle_node_control(&env) {
                    ControlOutcome::Enqueued(cmd_id) => {
                        info!(cmd_id, node_id = %env.node_id, "command enqueued");
                    }
                    ControlOutcome::AutoDropped => {
                        info!(node_id = %env.node_id, "AUTO control request dropped");
                    }
                    ControlOutcome::Full => {
                        warn!(node_id = %env.node_id, "command queue full, request dropped");
                    }
                    ControlOutcome::DuplicateCmdId => {
                        warn!(cmd_id = env.cmd_id, "duplicate cmdId, request dropped");
                    }
                }
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, %topic, "failed to parse node_control");
                Vec::new()
            }
        },
        other => {
            warn!(kind = other, %topic, "unrecognized envelope type");
            Vec::new()
        }
    }
}

/// Dispatches one LoRa reception to the bootstrap router by `pktType`,
/// mirroring `handleLoRaReceive`'s switch in the original gateway
/// firmware.
fn handle_lora_reception(
    gateway: &mut GatewayState,
    reception: &lora_link::Reception,
) -> Vec<GatewayAction> {
    let pkt = match bootstrap::decode_frame(&reception.payload) {
        Ok(pkt) => pkt,
        Err(e) => {
            warn!(error = %GatewayError::from(e), "bad frame received over lora link, dropping");
            return Vec::new();
        }
    };

    match pkt {
        Packet::Register { node_id, uptime_s, .. } => {
            info!(node_id = %node_id, uptime_s, rssi = reception.rssi, snr = reception.snr, "node register");
            vec![gateway.on_lora_register(&node_id, reception.rssi, reception.snr, uptime_s as u64)]
        }
        Packet::Status(pole) => {
            vec![gateway.on_lora_status(&pole)]
        }
        Packet::Ack { cmd_id, node_id } => {
            gateway.on_lora_ack(cmd_id, &node_id);
            Vec::new()
        }
        Packet::Beacon { uptime_s } => {
            info!(uptime_s, "node beacon");
            Vec::new()
        }
        other => {
            warn!(?other, "unexpected packet type on lora link");
            Vec::new()
        }
    }
}

/// Executes one [`GatewayAction`]. Failures are logged, not propagated:
/// a single publish/persist/transmit failure shouldn't bring the whole
/// service down, matching the original firmware's tolerance of
/// individual radio/MQTT hiccups.
async fn apply_action(
    action: GatewayAction,
    client: &AsyncClient,
    store: &mut JsonFileStore,
    lora: &mut lora_link::LoraLink,
) {
    if let Err(e) = try_apply_action(action, client, store, lora).await {
        error!(error = %e, "action failed");
    }
}

async fn try_apply_action(
    action: GatewayAction,
    client: &AsyncClient,
    store: &mut JsonFileStore,
    lora: &mut lora_link::LoraLink,
) -> Result<(), GatewayError> {
    match action {
        GatewayAction::TransmitLora(pkt) => lora.transmit(&pkt).await.map_err(GatewayError::from),
        GatewayAction::Persist(config) => store.save(&config).map_err(GatewayError::from),
        GatewayAction::Subscribe(topics) => {
            for topic in topics {
                client.subscribe(&topic, QoS::AtMostOnce).await?;
            }
            Ok(())
        }
        GatewayAction::ReinitRadio(params) => lora.configure(&params).await.map_err(GatewayError::from),
        GatewayAction::Publish { topic, payload, retain } => {
            client.publish(&topic, QoS::AtMostOnce, retain, payload).await?;
            Ok(())
        }
    }
}
