//! Shared control-plane core for the LoRa streetlight fleet.
//!
//! This crate holds everything that has to agree between the gateway and
//! the node: the wire codec, the persisted config shapes, the node's
//! schedule/mode arbitration, the node's inbound packet handler, and the
//! gateway's command queue and ACK ring. It is `no_std` so the same types
//! and state machines run unmodified on the node firmware and inside the
//! gateway's async service.
#![cfg_attr(not(test), no_std)]

pub mod ack_ring;
pub mod command_queue;
pub mod config;
pub mod error;
pub mod ids;
pub mod node_handler;
pub mod packet;
pub mod schedule;
pub mod time;

pub use ack_ring::{AckEvent, AckRing, RING_CAPACITY};
pub use command_queue::{
    Action, CommandQueue, ControlRequest, EnqueueOutcome, Outcome, TickResult, QUEUE_CAPACITY,
};
pub use config::{
    should_apply_gateway_config, ConfigStore, ControlMode, GatewayConfig, LoraParams, NodeConfig,
    NodeInfo, Schedule, StoreError, MAX_NODES,
};
pub use error::CoreError;
pub use ids::{DeviceId, DeviceRole, GatewayId, NodeId};
pub use node_handler::{handle_inbound, NodeEffect};
pub use packet::{decode, encode, Frame, Packet, PolePacket, MAX_FRAME_LEN};
pub use schedule::{should_be_on, ScheduleEngine};
pub use time::{Millis, ACK_TIMEOUT_MS, MAX_ATTEMPTS};
