//! Event types and priority queue for discrete event simulation.

use std::cmp::Ordering;

use rimecollect::{Addr, Timestamp, TxStatus};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Partition the network into isolated groups.
    Partition { groups: Vec<Vec<Addr>> },
    /// Heal all partitions (restore full connectivity).
    HealPartition,
    /// Disable a specific link.
    DisableLink { from: Addr, to: Addr },
    /// Enable a specific link.
    EnableLink { from: Addr, to: Addr },
    /// Set loss rate on a link.
    SetLossRate { from: Addr, to: Addr, rate: f64 },
    /// Make a node the sink, or revert it to an ordinary router.
    SetSink { node: Addr, is_sink: bool },
    /// Take a route snapshot for metrics.
    TakeSnapshot,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// A frame arrives at a node.
    FrameDelivery { to: Addr, from: Addr, data: Vec<u8> },
    /// The link layer reports completion of a unicast DATA frame.
    SentUpcall {
        node: Addr,
        to: Addr,
        transmissions: u8,
        status: TxStatus,
    },
    /// Fire expired timers on a node.
    TimerFire { node: Addr },
    /// Application on `from` originates data toward the sink.
    AppSend {
        from: Addr,
        payload: Vec<u8>,
        max_rexmits: u8,
    },
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// When the event should occur.
    pub time: Timestamp,
    /// Sequence number for deterministic ordering of same-time events.
    pub seq: SequenceNumber,
    /// The event to process.
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// Ordering for a min-heap (BinaryHeap is a max-heap, so compare reversed).
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.time.as_millis().cmp(&self.time.as_millis()) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(node: u8) -> Event {
        Event::TimerFire {
            node: Addr::new(0, node),
        }
    }

    #[test]
    fn test_event_ordering() {
        let e1 = ScheduledEvent::new(Timestamp::from_secs(10), SequenceNumber::new(1), timer(1));
        let e2 = ScheduledEvent::new(Timestamp::from_secs(5), SequenceNumber::new(2), timer(1));

        // e2 has the earlier time, so it is "greater" in min-heap terms.
        assert!(e2 > e1);
    }

    #[test]
    fn test_same_time_sequence_ordering() {
        let e1 = ScheduledEvent::new(Timestamp::from_secs(10), SequenceNumber::new(1), timer(1));
        let e2 = ScheduledEvent::new(Timestamp::from_secs(10), SequenceNumber::new(2), timer(2));

        // Same time: the lower sequence number goes first.
        assert!(e1 > e2);
    }

    #[test]
    fn test_heap_pops_in_time_order() {
        let mut heap = std::collections::BinaryHeap::new();
        for (i, t) in [30u64, 10, 20, 10].into_iter().enumerate() {
            heap.push(ScheduledEvent::new(
                Timestamp::from_millis(t),
                SequenceNumber::new(i as u64),
                timer(1),
            ));
        }
        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|e| (e.time.as_millis(), e.seq.value()))
            .collect();
        assert_eq!(order, [(10, 1), (10, 3), (20, 2), (30, 0)]);
    }
}
