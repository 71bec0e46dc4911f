//! LoRa radio link over a REYAX-module UART.
//!
//! The gateway's radio is wired exactly like the node's (see
//! `node-firmware`'s UART4 driver): the same `AT+SEND=<addr>,<len>,<data>`
//! / `+RCV=<addr>,<len>,<data>,<rssi>,<snr>` framing, just driven from
//! `tokio-serial` instead of a blocked `nb`/RTIC UART. Keeping both ends
//! of the link speaking the identical AT dialect means a single frame
//! parser (mirrored here, not shared as a dependency since one side is
//! `no_std`) covers both.

use std::io;
use std::time::Duration;

use streetlight_core::{encode, Frame, LoraParams};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};

/// This gateway's own module address and the single node it talks to.
/// Mirrors `node-firmware`'s `GATEWAY_AT_ADDRESS`/`NODE_AT_ADDRESS`
/// constants from the other end of the same link.
const GATEWAY_AT_ADDRESS: u8 = 2;
const NODE_AT_ADDRESS: u8 = 1;
const NETWORK_ID: u8 = 18;

/// Largest `+RCV=` line the reader accumulates before giving up on it as
/// garbage (address + length + 62-byte frame + rssi/snr + separators,
/// rounded up).
const RX_BUFFER_CAP: usize = 256;

/// A frame received over the link, with the signal quality the node
/// reports for feeding back into the next `Status` publish
/// (`node_register`/`node_status` carry `rssi`/`snr`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reception {
    pub payload: Vec<u8>,
    pub rssi: i32,
    pub snr: i32,
}

/// Owns the serial port. `send` and `recv` take `&mut self`; the caller
/// (the gateway's main loop) is the sole single-flight serializer, and
/// this type does no queueing of its own.
pub struct LoraLink {
    port: SerialStream,
    rx_buffer: Vec<u8>,
}

impl LoraLink {
    /// Opens `path` at the REYAX module's fixed baud rate and leaves the
    /// module in its power-on default (transparent) mode.
    pub async fn open(path: &str, baud_rate: u32) -> io::Result<Self> {
        let port = tokio_serial::new(path, baud_rate)
            .timeout(Duration::from_millis(500))
            .open_native_async()?;
        Ok(Self {
            port,
            rx_buffer: Vec::with_capacity(RX_BUFFER_CAP),
        })
    }

    /// Applies radio PHY parameters and addressing, fired whenever
    /// `device_config` changes `lora`. Mirrors the AT sequence
    /// `node-firmware::main::init` runs once at boot.
    pub async fn configure(&mut self, params: &LoraParams) -> io::Result<()> {
        self.send_at_line(&format!("AT+ADDRESS={GATEWAY_AT_ADDRESS}"))
            .await?;
        self.send_at_line(&format!("AT+NETWORKID={NETWORK_ID}")).await?;
        self.send_at_line(&format!("AT+BAND={}", params.frequency))
            .await?;
        self.send_at_line(&format!(
            "AT+PARAMETER={},{},{},{}",
            sf_code(params.spreading_factor),
            bw_code(params.bandwidth),
            params.coding_rate,
            8
        ))
        .await
    }

    async fn send_at_line(&mut self, cmd: &str) -> io::Result<()> {
        debug!(%cmd, "lora AT command");
        self.port.write_all(cmd.as_bytes()).await?;
        self.port.write_all(b"\r\n").await?;
        self.port.flush().await
    }

    /// Encodes `frame` as a single `AT+SEND=<addr>,<len>,<data>` command
    /// addressed to the fleet's one node. The data segment is the raw
    /// wire bytes, not escaped or base64'd: the REYAX module passes
    /// binary payloads through transparently up to its 240-byte limit,
    /// well above this protocol's 62-byte `MAX_FRAME_LEN`.
    pub async fn send(&mut self, frame: &Frame) -> io::Result<()> {
        let cmd = format!("AT+SEND={NODE_AT_ADDRESS},{},", frame.len());
        self.port.write_all(cmd.as_bytes()).await?;
        self.port.write_all(frame.as_slice()).await?;
        self.port.write_all(b"\r\n").await?;
        self.port.flush().await
    }

    /// Convenience wrapper: encode then send.
    pub async fn transmit(&mut self, pkt: &streetlight_core::Packet) -> io::Result<()> {
        let frame = encode(pkt);
        self.send(&frame).await
    }

    /// Reads bytes until a full `+RCV=...` line is assembled (terminated
    /// by `\r\n`), parses it, and returns the payload plus signal
    /// quality. Lines that aren't `+RCV=` (module `OK`/`ERROR` echoes)
    /// are logged and discarded; the buffer is cleared after every
    /// attempted parse, matching the node's uart4_handler, which never
    /// tries to resync mid-buffer.
    pub async fn recv(&mut self) -> io::Result<Reception> {
        loop {
            let mut byte = [0u8; 1];
            self.port.read_exact(&mut byte).await?;
            if self.rx_buffer.len() >= RX_BUFFER_CAP {
                warn!("lora rx buffer overrun, discarding");
                self.rx_buffer.clear();
                continue;
            }
            self.rx_buffer.push(byte[0]);

            if self.rx_buffer.ends_with(b"\r\n") {
                let line = std::mem::take(&mut self.rx_buffer);
                if let Some(reception) = parse_rcv_frame(&line) {
                    return Ok(reception);
                }
                debug!(?line, "non-RCV line on lora link");
            }
        }
    }
}

/// `AT+PARAMETER` spreading-factor code: the REYAX module takes the raw
/// SF integer directly (6-12), so this is currently an identity mapping,
/// kept as a named function in case a module revision needs translation.
fn sf_code(sf: u8) -> u8 {
    sf
}

/// `AT+BAND`'s bandwidth argument is the frequency in Hz already; REYAX
/// modules encode bandwidth implicitly via `AT+PARAMETER`'s second field
/// as a 0-9 index rather than a raw Hz value. 125 kHz is index 7 on the
/// RYLR/RYLR9xx family this fleet uses; other values fall back to that
/// same index since no other bandwidth is provisioned in this protocol
/// version.
fn bw_code(bandwidth_hz: u32) -> u8 {
    match bandwidth_hz {
        125_000 => 7,
        250_000 => 8,
        500_000 => 9,
        _ => 7,
    }
}

/// Parses a REYAX `+RCV=<addr>,<len>,<data>,<rssi>,<snr>\r\n` line. Ported
/// from `node-firmware::parse_rcv_frame`, operating on an owned `Vec`
/// instead of a `heapless` buffer since the gateway side has an
/// allocator.
fn parse_rcv_frame(buffer: &[u8]) -> Option<Reception> {
    if buffer.len() < 10 || &buffer[0..5] != b"+RCV=" {
        return None;
    }
    let comma1 = buffer[5..].iter().position(|&b| b == b',')? + 5;
    let comma2 = buffer[comma1 + 1..].iter().position(|&b| b == b',')? + comma1 + 1;

    let len_str = std::str::from_utf8(&buffer[comma1 + 1..comma2]).ok()?;
    let payload_len: usize = len_str.parse().ok()?;

    let payload_start = comma2 + 1;
    let payload_end = payload_start + payload_len;
    if payload_end >= buffer.len() || buffer[payload_end] != b',' {
        return None;
    }
    let payload = buffer[payload_start..payload_end].to_vec();

    let rssi_start = payload_end + 1;
    let comma3 = buffer[rssi_start..].iter().position(|&b| b == b',')? + rssi_start;
    let rssi: i32 = std::str::from_utf8(&buffer[rssi_start..comma3])
        .ok()?
        .parse()
        .ok()?;

    let snr_start = comma3 + 1;
    let end = buffer.len().saturating_sub(2); // strip trailing \r\n
    if snr_start >= end {
        return None;
    }
    let snr: i32 = std::str::from_utf8(&buffer[snr_start..end])
        .ok()?
        .parse()
        .ok()?;

    Some(Reception { payload, rssi, snr })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_rcv_line() {
        let mut line = Vec::new();
        line.extend_from_slice(b"+RCV=1,3,abc,-42,7\r\n");
        let reception = parse_rcv_frame(&line).expect("should parse");
        assert_eq!(reception.payload, b"abc");
        assert_eq!(reception.rssi, -42);
        assert_eq!(reception.snr, 7);
    }

    #[test]
    fn rejects_lines_without_the_rcv_prefix() {
        assert_eq!(parse_rcv_frame(b"+OK\r\n"), None);
        assert_eq!(parse_rcv_frame(b"garbage\r\n"), None);
    }

    #[test]
    fn rejects_a_length_field_that_overruns_the_buffer() {
        let mut line = Vec::new();
        line.extend_from_slice(b"+RCV=1,100,abc,-42,7\r\n");
        assert_eq!(parse_rcv_frame(&line), None);
    }

    #[test]
    fn bandwidth_code_maps_known_values_and_falls_back() {
        assert_eq!(bw_code(125_000), 7);
        assert_eq!(bw_code(250_000), 8);
        assert_eq!(bw_code(999), 7);
    }
}
