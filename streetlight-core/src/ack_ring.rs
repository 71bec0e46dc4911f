//! Gateway ACK event ring: a bounded, single-producer single-consumer
//! queue of terminal command outcomes, decoupling the command queue's
//! tick-driven producer from whatever publishes `gw/{id}/ack` over MQTT.

use crate::command_queue::Outcome;
use crate::ids::NodeId;
use heapless::Vec;

/// Ring capacity. Overflow policy is drop-newest: once the ring is full,
/// further `push` calls are dropped rather than evicting an older,
/// still-unpublished event.
pub const RING_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct AckEvent {
    pub cmd_id: u16,
    pub node_id: NodeId,
    pub outcome: Outcome,
}

/// FIFO ring buffer over `Vec`, implemented as a plain shift-on-pop queue
/// rather than a head/tail index pair. At a capacity of 8 the O(n) shift
/// is free.
pub struct AckRing {
    events: Vec<AckEvent, RING_CAPACITY>,
}

impl AckRing {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.events.len() == RING_CAPACITY
    }

    /// Enqueue `event`. Returns `false` (and drops `event`) if the ring is
    /// already at `RING_CAPACITY`.
    pub fn push(&mut self, event: AckEvent) -> bool {
        self.events.push(event).is_ok()
    }

    /// Dequeue the oldest event, if any.
    pub fn pop(&mut self) -> Option<AckEvent> {
        if self.events.is_empty() {
            None
        } else {
            Some(self.events.remove(0))
        }
    }
}

impl Default for AckRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(cmd_id: u16) -> AckEvent {
        let mut node_id = NodeId::new();
        let _ = node_id.push_str("nodeA1");
        AckEvent {
            cmd_id,
            node_id,
            outcome: Outcome::Acked,
        }
    }

    #[test]
    fn pops_in_fifo_order() {
        let mut ring = AckRing::new();
        assert!(ring.push(event(1)));
        assert!(ring.push(event(2)));
        assert_eq!(ring.pop().map(|e| e.cmd_id), Some(1));
        assert_eq!(ring.pop().map(|e| e.cmd_id), Some(2));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn drops_newest_once_full() {
        let mut ring = AckRing::new();
        for i in 0..RING_CAPACITY as u16 {
            assert!(ring.push(event(i)));
        }
        assert!(ring.is_full());
        assert!(!ring.push(event(999)));
        assert_eq!(ring.len(), RING_CAPACITY);
        // The oldest event already in the ring survives the dropped push.
        assert_eq!(ring.pop().map(|e| e.cmd_id), Some(0));
    }
}
