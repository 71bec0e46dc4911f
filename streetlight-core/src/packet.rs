//! Wire codec. The only place that knows the byte layout.
//!
//! Every frame starts with a `pktType` byte. Multi-byte integers are
//! little-endian; string fields are fixed 24-byte, zero-terminated, and
//! truncated to 23 content bytes on encode. Acceptance is "first byte
//! names a known variant and the total length matches exactly". There
//! is no application-level CRC; the radio is configured with hardware
//! CRC on.

use crate::ids::{GatewayId, NodeId};
use heapless::Vec;

/// Width of a wire string field, including the zero terminator.
const FIELD_LEN: usize = 24;

/// Largest frame any variant encodes to (`Config`, at 62 bytes).
pub const MAX_FRAME_LEN: usize = 62;

/// An encoded frame, built in place with no heap allocation.
pub type Frame = Vec<u8, MAX_FRAME_LEN>;

const PKT_BEACON: u8 = 0x01;
const PKT_REGISTER: u8 = 0x02;
const PKT_ASSIGN: u8 = 0x03;
const PKT_CONFIG: u8 = 0x04;
const PKT_STATUS: u8 = 0x05;
const PKT_ACK: u8 = 0x06;
const PKT_CONTROL: u8 = 0x07;
const PKT_LORA_CONFIG: u8 = 0x08;

/// The `PolePacket` body carried by a `Status` (0x05) frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PolePacket {
    pub node_id: NodeId,
    pub gateway_id: GatewayId,
    pub light_state: bool,
    pub fault: bool,
    pub hour: u8,
    pub minute: u8,
    pub rssi: i32,
    pub snr: i32,
}

/// The fixed set of packets exchanged over the LoRa link.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Beacon {
        uptime_s: u32,
    },
    Register {
        node_id: NodeId,
        fw_version: u8,
        uptime_s: u32,
    },
    /// Reserved. The codec accepts and emits it but no component in
    /// this core currently sends or handles one.
    Assign {
        node_id: NodeId,
    },
    Config {
        node_id: NodeId,
        gateway_id: GatewayId,
        on_hour: u8,
        on_min: u8,
        off_hour: u8,
        off_min: u8,
        cfg_ver: u8,
        reg_interval_ms: u32,
        status_interval_ms: u32,
    },
    Status(PolePacket),
    Ack {
        cmd_id: u16,
        node_id: NodeId,
    },
    Control {
        cmd_id: u16,
        node_id: NodeId,
        light_on: bool,
    },
    LoraConfig {
        freq: u32,
        sf: u8,
        bw: u32,
        cr: u8,
    },
}

/// Frame was rejected: unknown `pktType`, or length mismatch for the
/// variant the `pktType` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadFrame;

fn push_fixed_str(frame: &mut Frame, s: &str) {
    let mut buf = [0u8; FIELD_LEN];
    let bytes = s.as_bytes();
    let n = bytes.len().min(FIELD_LEN - 1);
    buf[..n].copy_from_slice(&bytes[..n]);
    let _ = frame.extend_from_slice(&buf);
}

fn push_bool(frame: &mut Frame, b: bool) {
    let _ = frame.push(if b { 1 } else { 0 });
}

fn read_fixed_str<const N: usize>(bytes: &[u8]) -> heapless::String<N> {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let text = core::str::from_utf8(&bytes[..len]).unwrap_or("");
    let mut out = heapless::String::<N>::new();
    let truncated = &text[..text.len().min(out.capacity())];
    let _ = out.push_str(truncated);
    out
}

/// Encode `pkt` into its exact wire byte sequence, truncating any
/// over-long identifier to 23 bytes plus its zero terminator.
pub fn encode(pkt: &Packet) -> Frame {
    let mut f = Frame::new();
    match pkt {
        Packet::Beacon { uptime_s } => {
            let _ = f.push(PKT_BEACON);
            let _ = f.extend_from_slice(&uptime_s.to_le_bytes());
        }
        Packet::Register {
            node_id,
            fw_version,
            uptime_s,
        } => {
            let _ = f.push(PKT_REGISTER);
            push_fixed_str(&mut f, node_id);
            let _ = f.push(*fw_version);
            let _ = f.extend_from_slice(&uptime_s.to_le_bytes());
        }
        Packet::Assign { node_id } => {
            let _ = f.push(PKT_ASSIGN);
            push_fixed_str(&mut f, node_id);
        }
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
            let _ = f.push(PKT_CONFIG);
            push_fixed_str(&mut f, node_id);
            push_fixed_str(&mut f, gateway_id);
            let _ = f.push(*on_hour);
            let _ = f.push(*on_min);
            let _ = f.push(*off_hour);
            let _ = f.push(*off_min);
            let _ = f.push(*cfg_ver);
            let _ = f.extend_from_slice(&reg_interval_ms.to_le_bytes());
            let _ = f.extend_from_slice(&status_interval_ms.to_le_bytes());
        }
        Packet::Status(pole) => {
            let _ = f.push(PKT_STATUS);
            push_fixed_str(&mut f, &pole.node_id);
            push_fixed_str(&mut f, &pole.gateway_id);
            push_bool(&mut f, pole.light_state);
            push_bool(&mut f, pole.fault);
            let _ = f.push(pole.hour);
            let _ = f.push(pole.minute);
            let _ = f.extend_from_slice(&pole.rssi.to_le_bytes());
            let _ = f.extend_from_slice(&pole.snr.to_le_bytes());
        }
        Packet::Ack { cmd_id, node_id } => {
            let _ = f.push(PKT_ACK);
            let _ = f.extend_from_slice(&cmd_id.to_le_bytes());
            push_fixed_str(&mut f, node_id);
        }
        Packet::Control {
            cmd_id,
            node_id,
            light_on,
        } => {
            let _ = f.push(PKT_CONTROL);
            let _ = f.extend_from_slice(&cmd_id.to_le_bytes());
            push_fixed_str(&mut f, node_id);
            push_bool(&mut f, *light_on);
        }
        Packet::LoraConfig { freq, sf, bw, cr } => {
            let _ = f.push(PKT_LORA_CONFIG);
            let _ = f.extend_from_slice(&freq.to_le_bytes());
            let _ = f.push(*sf);
            let _ = f.extend_from_slice(&bw.to_le_bytes());
            let _ = f.push(*cr);
        }
    }
    f
}

/// Size in bytes (including the leading `pktType`) that a given variant
/// must have on the wire.
fn expected_len(pkt_type: u8) -> Option<usize> {
    Some(match pkt_type {
        PKT_BEACON => 1 + 4,
        PKT_REGISTER => 1 + FIELD_LEN + 1 + 4,
        PKT_ASSIGN => 1 + FIELD_LEN,
        PKT_CONFIG => 1 + FIELD_LEN + FIELD_LEN + 4 + 1 + 4 + 4,
        PKT_STATUS => 1 + FIELD_LEN + FIELD_LEN + 1 + 1 + 1 + 1 + 4 + 4,
        PKT_ACK => 1 + 2 + FIELD_LEN,
        PKT_CONTROL => 1 + 2 + FIELD_LEN + 1,
        PKT_LORA_CONFIG => 1 + 4 + 1 + 4 + 1,
        _ => return None,
    })
}

/// Decode a frame. Any length/type mismatch is a [`BadFrame`]; the caller
/// is expected to drop the frame and drain the remaining radio buffer.
/// This function does not touch any I/O itself.
pub fn decode(bytes: &[u8]) -> Result<Packet, BadFrame> {
    let pkt_type = *bytes.first().ok_or(BadFrame)?;
    let want = expected_len(pkt_type).ok_or(BadFrame)?;
    if bytes.len() != want {
        return Err(BadFrame);
    }
    let body = &bytes[1..];

    Ok(match pkt_type {
        PKT_BEACON => Packet::Beacon {
            uptime_s: u32::from_le_bytes(body[0..4].try_into().unwrap()),
        },
        PKT_REGISTER => {
            let node_id = read_fixed_str(&body[0..FIELD_LEN]);
            let fw_version = body[FIELD_LEN];
            let uptime_s =
                u32::from_le_bytes(body[FIELD_LEN + 1..FIELD_LEN + 5].try_into().unwrap());
            Packet::Register {
                node_id,
                fw_version,
                uptime_s,
            }
        }
        PKT_ASSIGN => Packet::Assign {
            node_id: read_fixed_str(&body[0..FIELD_LEN]),
        },
        PKT_CONFIG => {
            let node_id = read_fixed_str(&body[0..FIELD_LEN]);
            let gateway_id = read_fixed_str(&body[FIELD_LEN..2 * FIELD_LEN]);
            let mut off = 2 * FIELD_LEN;
            let on_hour = body[off];
            let on_min = body[off + 1];
            let off_hour = body[off + 2];
            let off_min = body[off + 3];
            let cfg_ver = body[off + 4];
            off += 5;
            let reg_interval_ms = u32::from_le_bytes(body[off..off + 4].try_into().unwrap());
            let status_interval_ms =
                u32::from_le_bytes(body[off + 4..off + 8].try_into().unwrap());
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
            }
        }
        PKT_STATUS => {
            let node_id = read_fixed_str(&body[0..FIELD_LEN]);
            let gateway_id = read_fixed_str(&body[FIELD_LEN..2 * FIELD_LEN]);
            let mut off = 2 * FIELD_LEN;
            let light_state = body[off] != 0;
            let fault = body[off + 1] != 0;
            let hour = body[off + 2];
            let minute = body[off + 3];
            off += 4;
            let rssi = i32::from_le_bytes(body[off..off + 4].try_into().unwrap());
            let snr = i32::from_le_bytes(body[off + 4..off + 8].try_into().unwrap());
            Packet::Status(PolePacket {
                node_id,
                gateway_id,
                light_state,
                fault,
                hour,
                minute,
                rssi,
                snr,
            })
        }
        PKT_ACK => {
            let cmd_id = u16::from_le_bytes(body[0..2].try_into().unwrap());
            let node_id = read_fixed_str(&body[2..2 + FIELD_LEN]);
            Packet::Ack { cmd_id, node_id }
        }
        PKT_CONTROL => {
            let cmd_id = u16::from_le_bytes(body[0..2].try_into().unwrap());
            let node_id = read_fixed_str(&body[2..2 + FIELD_LEN]);
            let light_on = body[2 + FIELD_LEN] != 0;
            Packet::Control {
                cmd_id,
                node_id,
                light_on,
            }
        }
        PKT_LORA_CONFIG => {
            let freq = u32::from_le_bytes(body[0..4].try_into().unwrap());
            let sf = body[4];
            let bw = u32::from_le_bytes(body[5..9].try_into().unwrap());
            let cr = body[9];
            Packet::LoraConfig { freq, sf, bw, cr }
        }
        _ => unreachable!("expected_len already rejected unknown pktType"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn round_trip(pkt: Packet) {
        let frame = encode(&pkt);
        let decoded = decode(&frame).expect("decode should succeed");
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn round_trips_every_variant() {
        round_trip(Packet::Beacon { uptime_s: 1234 });
        round_trip(Packet::Register {
            node_id: node_id("nodeA1"),
            fw_version: 3,
            uptime_s: 99,
        });
        round_trip(Packet::Assign {
            node_id: node_id("nodeA1"),
        });
        round_trip(Packet::Config {
            node_id: node_id("nodeA1"),
            gateway_id: gateway_id("GW-1"),
            on_hour: 18,
            on_min: 0,
            off_hour: 6,
            off_min: 0,
            cfg_ver: 5,
            reg_interval_ms: 30_000,
            status_interval_ms: 60_000,
        });
        round_trip(Packet::Status(PolePacket {
            node_id: node_id("nodeA1"),
            gateway_id: gateway_id("GW-1"),
            light_state: true,
            fault: false,
            hour: 23,
            minute: 59,
            rssi: -87,
            snr: 9,
        }));
        round_trip(Packet::Ack {
            cmd_id: 7,
            node_id: node_id("nodeA1"),
        });
        round_trip(Packet::Control {
            cmd_id: 7,
            node_id: node_id("nodeA1"),
            light_on: true,
        });
        round_trip(Packet::LoraConfig {
            freq: 433_000_000,
            sf: 7,
            bw: 125_000,
            cr: 5,
        });
    }

    #[test]
    fn truncates_over_long_identifiers_on_encode() {
        let mut long_id = NodeId::new();
        let _ = long_id.push_str("this-node-id-is-definitely-too-long-for-the-wire");
        let pkt = Packet::Register {
            node_id: long_id,
            fw_version: 1,
            uptime_s: 0,
        };
        let frame = encode(&pkt);
        let decoded = decode(&frame).unwrap();
        match decoded {
            Packet::Register { node_id, .. } => {
                assert_eq!(node_id.len(), 23);
                assert!("this-node-id-is-definitely-too-long-for-the-wire".starts_with(node_id.as_str()));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_unknown_pkt_type() {
        assert_eq!(decode(&[0xFF, 1, 2, 3]), Err(BadFrame));
    }

    #[test]
    fn rejects_wrong_length_for_known_type() {
        // Beacon wants 5 bytes total.
        assert_eq!(decode(&[PKT_BEACON, 1, 2, 3]), Err(BadFrame));
        assert_eq!(decode(&[PKT_BEACON, 1, 2, 3, 4, 5]), Err(BadFrame));
    }

    #[test]
    fn rejects_empty_buffer() {
        assert_eq!(decode(&[]), Err(BadFrame));
    }
}
