//! GPRS modem supervisor. Not part of the control-plane core; the node
//! firmware has no equivalent since it never leaves the LoRa link. Needed
//! for `gateway-service` to stay on the network long enough for
//! `rumqttc`'s event loop to have anything to talk to.
//!
//! Grounded in `connectGPRS`/`ensureGprsConnection` from the original
//! gateway firmware: retry at a fixed cadence, escalate to a full modem
//! restart after repeated failures, and give up outright if the modem
//! never comes back within a bounded window.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{info, warn};

/// Delay between reconnect attempts.
const RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Consecutive failures before a full `AT+CFUN=1,1` modem restart.
const RESTART_AFTER_FAILURES: u32 = 10;
/// Total time without a successful reconnect before the supervisor gives
/// up and hands control back to `main`.
const GIVE_UP_AFTER: Duration = Duration::from_secs(5 * 60);

/// The modem never came back within [`GIVE_UP_AFTER`]. `main` treats this
/// as fatal and exits non-zero, relying on the process supervisor to
/// restart the binary: the process-level analogue of the original
/// firmware's `ESP.restart()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("gprs modem did not reconnect within the 5-minute window")]
pub struct GiveUp;

/// A serial AT-command link to the GPRS/GSM modem.
pub struct GprsModem {
    port: SerialStream,
    apn: String,
}

impl GprsModem {
    pub async fn open(path: &str, baud_rate: u32, apn: &str) -> std::io::Result<Self> {
        let port = tokio_serial::new(path, baud_rate)
            .timeout(Duration::from_secs(2))
            .open_native_async()?;
        Ok(Self {
            port,
            apn: apn.to_string(),
        })
    }

    async fn send_at(&mut self, cmd: &str) -> std::io::Result<String> {
        self.port.write_all(cmd.as_bytes()).await?;
        self.port.write_all(b"\r\n").await?;
        self.port.flush().await?;
        let mut buf = [0u8; 256];
        let n = self.port.read(&mut buf).await.unwrap_or(0);
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    /// `AT+CREG?` / `AT+CGATT?`: both network registration and GPRS
    /// attach must report ready.
    pub async fn is_connected(&mut self) -> bool {
        let creg = self.send_at("AT+CREG?").await.unwrap_or_default();
        let cgatt = self.send_at("AT+CGATT?").await.unwrap_or_default();
        (creg.contains(",1") || creg.contains(",5")) && cgatt.contains("+CGATT: 1")
    }

    /// Bearer setup sequence, mirroring `gprs.cpp::setupGPRS` /
    /// `gateway.cpp::connectGPRS`'s `SAPBR`/`gprsConnect` calls.
    pub async fn connect(&mut self) -> std::io::Result<bool> {
        self.send_at("AT+CGATT=1").await?;
        self.send_at("AT+SAPBR=3,1,\"Contype\",\"GPRS\"").await?;
        let apn_cmd = format!("AT+SAPBR=3,1,\"APN\",\"{}\"", self.apn);
        self.send_at(&apn_cmd).await?;
        self.send_at("AT+SAPBR=1,1").await?;
        let resp = self.send_at("AT+SAPBR=2,1").await?;
        Ok(resp.contains("+SAPBR: 1,1"))
    }

    /// Full modem restart, issued after [`RESTART_AFTER_FAILURES`]
    /// consecutive connect failures. Mirrors `modem.restart()`.
    pub async fn restart(&mut self) -> std::io::Result<()> {
        info!("restarting gprs modem");
        self.send_at("AT+CFUN=1,1").await?;
        sleep(Duration::from_secs(3)).await;
        Ok(())
    }
}

/// Drives `modem` until it reports connected, retrying at
/// [`RETRY_INTERVAL`] and escalating to [`GprsModem::restart`] after
/// [`RESTART_AFTER_FAILURES`] consecutive failures. Returns `Ok(())` once
/// connected, or [`GiveUp`] if [`GIVE_UP_AFTER`] elapses first.
pub async fn ensure_connected(modem: &mut GprsModem) -> Result<(), GiveUp> {
    if modem.is_connected().await {
        return Ok(());
    }
    warn!("gprs not connected, attempting recovery");

    let deadline = Instant::now() + GIVE_UP_AFTER;
    let mut consecutive_failures = 0u32;

    loop {
        if Instant::now() >= deadline {
            return Err(GiveUp);
        }

        if consecutive_failures >= RESTART_AFTER_FAILURES {
            let _ = modem.restart().await;
            consecutive_failures = 0;
        }

        match modem.connect().await {
            Ok(true) => {
                info!("gprs connected");
                return Ok(());
            }
            Ok(false) => consecutive_failures += 1,
            Err(e) => {
                warn!(error = %e, "gprs connect attempt failed");
                consecutive_failures += 1;
            }
        }

        sleep(RETRY_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn give_up_error_has_a_stable_message() {
        assert_eq!(
            GiveUp.to_string(),
            "gprs modem did not reconnect within the 5-minute window"
        );
    }
}
