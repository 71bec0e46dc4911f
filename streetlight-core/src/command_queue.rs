//! Gateway command queue: a single-in-flight, FIFO,
//! at-most-one-terminal-event-per-`cmdId` delivery pipeline for outbound
//! `ControlPkt`/`ConfigPkt` commands.

use crate::ids::NodeId;
use crate::time::{Millis, ACK_TIMEOUT_MS, MAX_ATTEMPTS};
use heapless::Vec;

/// Upper bound on queued-plus-in-flight commands.
pub const QUEUE_CAPACITY: usize = 10;

/// A caller's request to control a node. `cmd_id` is externally assigned
/// by the backend. The queue never mints its own, since the same id has
/// to round-trip through the `ControlPkt`/`AckPkt` on the radio and back
/// out as the `node_control_ack` envelope's `cmdId` so the backend can
/// correlate the outcome with its own outstanding request.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRequest {
    pub cmd_id: u16,
    pub node_id: NodeId,
    pub light_on: bool,
}

/// What to transmit, and what `cmdId` the resulting `AckPkt` must carry to
/// be considered an answer to this attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub cmd_id: u16,
    pub node_id: NodeId,
    pub light_on: bool,
    pub attempt: u8,
}

/// Why a command left the queue, or why an ACK produced an event without
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Exhausted,
    /// An `AckPkt` matched no in-flight or pending slot: stale or
    /// duplicate. Not produced by `CommandQueue` itself; the caller emits
    /// this into the ACK ring when `on_ack` returns `None`.
    Stale,
}

impl Outcome {
    /// The `success` flag carried by a `node_control_ack` envelope.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Acked)
    }
}

/// Result of accepting a request into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted(u16),
    Full,
    /// `cmd_id` collides with one already queued or in flight. Command
    /// ids are unique across simultaneously-active commands; the backend
    /// is expected not to reuse an id it hasn't seen a terminal ACK event
    /// for. This variant exists so a violation is reported rather than
    /// silently corrupting `on_ack` matching.
    DuplicateCmdId,
}

/// Result of a periodic `tick`.
#[derive(Debug, Clone, PartialEq)]
pub enum TickResult {
    /// Nothing to send and nothing changed.
    Idle,
    /// Transmit this on the radio now (first send of a command, or a
    /// timeout-triggered retry).
    Send(Action),
    /// The in-flight command reached a terminal outcome; the caller should
    /// publish an `AckEvent` for `cmd_id`.
    Terminal {
        cmd_id: u16,
        node_id: NodeId,
        outcome: Outcome,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct PendingEntry {
    cmd_id: u16,
    req: ControlRequest,
}

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    cmd_id: u16,
    node_id: NodeId,
    light_on: bool,
    attempt: u8,
    sent_at_ms: Option<Millis>,
}

/// Single-in-flight command queue. `enqueue` accepts into FIFO order;
/// `tick` drives the in-flight slot's retry/timeout state machine and
/// reports what to transmit or finalize; `on_ack` matches an inbound
/// `AckPkt` against the in-flight slot.
pub struct CommandQueue {
    pending: Vec<PendingEntry, QUEUE_CAPACITY>,
    in_flight: Option<Slot>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            in_flight: None,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len() + if self.in_flight.is_some() { 1 } else { 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cmd_id_in_use(&self, cmd_id: u16) -> bool {
        self.in_flight.as_ref().is_some_and(|s| s.cmd_id == cmd_id)
            || self.pending.iter().any(|e| e.cmd_id == cmd_id)
    }

    /// Accept `req` at the back of the queue, in enqueue order. Rejects
    /// once `len() == QUEUE_CAPACITY`, counting the in-flight slot, or if
    /// `req.cmd_id` is already in use.
    pub fn enqueue(&mut self, req: ControlRequest) -> EnqueueOutcome {
        if self.cmd_id_in_use(req.cmd_id) {
            return EnqueueOutcome::DuplicateCmdId;
        }
        if self.len() >= QUEUE_CAPACITY {
            return EnqueueOutcome::Full;
        }
        let cmd_id = req.cmd_id;
        // push() cannot fail: the capacity check above already covers
        // pending.len() against QUEUE_CAPACITY, counting an occupied
        // in_flight slot as one unit.
        let _ = self.pending.push(PendingEntry { cmd_id, req });
        EnqueueOutcome::Accepted(cmd_id)
    }

    /// Advance time by driving the in-flight slot, promoting the next
    /// pending request if the slot is free. `now_ms` is the current
    /// monotonic clock reading.
    pub fn tick(&mut self, now_ms: Millis) -> TickResult {
        if let Some(slot) = &mut self.in_flight {
            match slot.sent_at_ms {
                None => {
                    slot.sent_at_ms = Some(now_ms);
                    return TickResult::Send(Action {
                        cmd_id: slot.cmd_id,
                        node_id: slot.node_id.clone(),
                        light_on: slot.light_on,
                        attempt: slot.attempt,
                    });
                }
                Some(sent_at) => {
                    if now_ms.saturating_sub(sent_at) < ACK_TIMEOUT_MS {
                        return TickResult::Idle;
                    }
                    if slot.attempt + 1 >= MAX_ATTEMPTS {
                        let cmd_id = slot.cmd_id;
                        let node_id = slot.node_id.clone();
                        self.in_flight = None;
                        return TickResult::Terminal {
                            cmd_id,
                            node_id,
                            outcome: Outcome::Exhausted,
                        };
                    }
                    slot.attempt += 1;
                    slot.sent_at_ms = Some(now_ms);
                    return TickResult::Send(Action {
                        cmd_id: slot.cmd_id,
                        node_id: slot.node_id.clone(),
                        light_on: slot.light_on,
                        attempt: slot.attempt,
                    });
                }
            }
        }

        if self.pending.is_empty() {
            return TickResult::Idle;
        }
        let entry = self.pending.remove(0);
        self.in_flight = Some(Slot {
            cmd_id: entry.cmd_id,
            node_id: entry.req.node_id.clone(),
            light_on: entry.req.light_on,
            attempt: 0,
            sent_at_ms: Some(now_ms),
        });
        TickResult::Send(Action {
            cmd_id: entry.cmd_id,
            node_id: entry.req.node_id,
            light_on: entry.req.light_on,
            attempt: 0,
        })
    }

    /// Match an inbound `AckPkt` against `(cmdId, nodeId)`. Checks the
    /// in-flight slot first, then falls back to scanning still-pending
    /// (not yet transmitted) slots: an ACK can in principle arrive for a
    /// slot this queue hasn't sent yet if a stale duplicate crosses with
    /// a fresh enqueue reusing the same id space. A mismatched or
    /// already-retired `(cmdId, nodeId)` is reported as unmatched (`None`)
    /// rather than silently dropped, so the caller can surface it as a
    /// stale ACK event.
    pub fn on_ack(&mut self, cmd_id: u16, node_id: &str) -> Option<TickResult> {
        if let Some(slot) = &self.in_flight {
            if slot.cmd_id == cmd_id && slot.node_id.as_str() == node_id {
                let matched_node_id = slot.node_id.clone();
                self.in_flight = None;
                return Some(TickResult::Terminal {
                    cmd_id,
                    node_id: matched_node_id,
                    outcome: Outcome::Acked,
                });
            }
        }

        if let Some(pos) = self
            .pending
            .iter()
            .position(|e| e.cmd_id == cmd_id && e.req.node_id.as_str() == node_id)
        {
            let entry = self.pending.remove(pos);
            return Some(TickResult::Terminal {
                cmd_id,
                node_id: entry.req.node_id,
                outcome: Outcome::Acked,
            });
        }

        None
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(s: &str) -> NodeId {
        let mut n = NodeId::new();
        let _ = n.push_str(s);
        n
    }

    fn req(cmd_id: u16, n: &str, light_on: bool) -> ControlRequest {
        ControlRequest {
            cmd_id,
            node_id: node(n),
            light_on,
        }
    }

    #[test]
    fn enqueue_accepts_backend_assigned_cmd_ids_and_sends_fifo() {
        let mut q = CommandQueue::new();
        let a = q.enqueue(req(7, "A", true));
        let b = q.enqueue(req(8, "B", false));
        assert_eq!(a, EnqueueOutcome::Accepted(7));
        assert_eq!(b, EnqueueOutcome::Accepted(8));

        match q.tick(0) {
            TickResult::Send(action) => assert_eq!(action.cmd_id, 7),
            other => panic!("expected Send, got {other:?}"),
        }
        // Second command stays pending until the first resolves.
        assert_eq!(q.tick(10), TickResult::Idle);
    }

    #[test]
    fn queue_rejects_once_full() {
        let mut q = CommandQueue::new();
        for i in 0..QUEUE_CAPACITY as u16 {
            let outcome = q.enqueue(req(i, "A", i % 2 == 0));
            assert!(matches!(outcome, EnqueueOutcome::Accepted(_)));
        }
        assert_eq!(
            q.enqueue(req(QUEUE_CAPACITY as u16, "A", true)),
            EnqueueOutcome::Full
        );
    }

    #[test]
    fn enqueue_rejects_a_cmd_id_already_in_use() {
        let mut q = CommandQueue::new();
        assert_eq!(q.enqueue(req(7, "A", true)), EnqueueOutcome::Accepted(7));
        assert_eq!(
            q.enqueue(req(7, "B", false)),
            EnqueueOutcome::DuplicateCmdId
        );
    }

    #[test]
    fn retries_up_to_max_attempts_then_reports_exhausted() {
        let mut q = CommandQueue::new();
        q.enqueue(req(7, "A", true));
        // First send.
        assert!(matches!(q.tick(0), TickResult::Send(_)));
        // Before timeout: idle.
        assert_eq!(q.tick(100), TickResult::Idle);
        // Timeout -> retry attempt 1.
        match q.tick(ACK_TIMEOUT_MS) {
            TickResult::Send(a) => assert_eq!(a.attempt, 1),
            other => panic!("expected retry send, got {other:?}"),
        }
        // Timeout -> retry attempt 2 (3rd transmission, MAX_ATTEMPTS = 3).
        match q.tick(2 * ACK_TIMEOUT_MS) {
            TickResult::Send(a) => assert_eq!(a.attempt, 2),
            other => panic!("expected retry send, got {other:?}"),
        }
        // Final timeout with no further attempts left -> Exhausted.
        match q.tick(3 * ACK_TIMEOUT_MS) {
            TickResult::Terminal { outcome, .. } => assert_eq!(outcome, Outcome::Exhausted),
            other => panic!("expected terminal exhausted, got {other:?}"),
        }
        assert!(q.is_empty());
    }

    #[test]
    fn matching_ack_retires_in_flight_slot_exactly_once() {
        let mut q = CommandQueue::new();
        q.enqueue(req(7, "A", true));
        q.tick(0);
        let terminal = q.on_ack(7, "A");
        assert!(matches!(
            terminal,
            Some(TickResult::Terminal {
                outcome: Outcome::Acked,
                ..
            })
        ));
        // A second ACK for the same (now retired) cmdId is unmatched.
        assert_eq!(q.on_ack(7, "A"), None);
    }

    #[test]
    fn ack_for_unknown_cmd_id_is_unmatched() {
        let mut q = CommandQueue::new();
        q.enqueue(req(7, "A", true));
        q.tick(0);
        assert_eq!(q.on_ack(999, "A"), None);
    }

    #[test]
    fn ack_with_mismatched_node_id_is_unmatched() {
        let mut q = CommandQueue::new();
        q.enqueue(req(7, "A", true));
        q.tick(0);
        assert_eq!(q.on_ack(7, "somebody-else"), None);
    }

    #[test]
    fn ack_matches_a_still_pending_slot() {
        let mut q = CommandQueue::new();
        q.enqueue(req(7, "A", true));
        q.enqueue(req(8, "B", false));
        q.tick(0); // sends cmd_id 7 to A; cmd_id 8 for B stays pending
        let terminal = q.on_ack(8, "B");
        assert!(matches!(
            terminal,
            Some(TickResult::Terminal {
                outcome: Outcome::Acked,
                ..
            })
        ));
        // B's pending entry is gone; the next tick has nothing left to promote once A resolves.
        q.on_ack(7, "A");
        assert_eq!(q.tick(1), TickResult::Idle);
    }

    #[test]
    fn second_command_promoted_after_first_acked() {
        let mut q = CommandQueue::new();
        q.enqueue(req(7, "A", true));
        q.enqueue(req(8, "B", false));
        q.tick(0);
        q.on_ack(7, "A");
        match q.tick(1) {
            TickResult::Send(action) => {
                assert_eq!(action.cmd_id, 8);
                assert_eq!(action.node_id.as_str(), "B");
            }
            other => panic!("expected Send for second command, got {other:?}"),
        }
    }
}
