//! Timestamps are passed in by the caller as milliseconds since an
//! arbitrary epoch (RTIC's monotonic on the node, `Instant` on the
//! gateway). Nothing in this crate reads a clock itself.

pub type Millis = u64;

/// How long the gateway waits for an ACK before resending.
pub const ACK_TIMEOUT_MS: Millis = 800;

/// Maximum number of transmissions (first send + retries) per command.
pub const MAX_ATTEMPTS: u8 = 3;
