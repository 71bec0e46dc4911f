/// Error kinds surfaced by the control plane core.
///
/// `AckUnmatched` and `Exhausted` don't usually travel as `Err` values;
/// they're folded into an [`crate::AckEvent`] with `success: false` so
/// the backend can observe them. They're named here so callers can match
/// on a single type when logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// Frame length or `pktType` didn't match any known variant.
    BadFrame,
    /// A well-formed frame addressed to a different node/gateway.
    AddressMismatch,
    /// The command queue has no free slot.
    QueueFull,
    /// An ACK arrived with no matching outstanding command.
    AckUnmatched,
    /// A command was retried `MAX_ATTEMPTS` times with no ACK.
    Exhausted,
    /// A bootstrap config payload was missing `gatewayId`.
    ConfigRejected,
    /// The persistent store failed to read or write.
    StoreIoError,
}
