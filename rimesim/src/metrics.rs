//! Metrics collection for simulation analysis.

use hashbrown::{HashMap, HashSet};
use rimecollect::{Addr, Rtmetric, Timestamp, RTMETRIC_MAX};

/// Routing state of every node at a point in time.
#[derive(Debug, Clone)]
pub struct RouteSnapshot {
    /// When this snapshot was taken.
    pub time: Timestamp,
    pub depths: HashMap<Addr, Rtmetric>,
    pub parents: HashMap<Addr, Option<Addr>>,
    pub sinks: HashSet<Addr>,
}

impl RouteSnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            depths: HashMap::new(),
            parents: HashMap::new(),
            sinks: HashSet::new(),
        }
    }

    /// Record a node's state.
    pub fn record_node(
        &mut self,
        addr: Addr,
        depth: Rtmetric,
        parent: Option<Addr>,
        is_sink: bool,
    ) {
        self.depths.insert(addr, depth);
        self.parents.insert(addr, parent);
        if is_sink {
            self.sinks.insert(addr);
        }
    }

    pub fn depth(&self, addr: Addr) -> Option<Rtmetric> {
        self.depths.get(&addr).copied()
    }

    pub fn parent(&self, addr: Addr) -> Option<Addr> {
        self.parents.get(&addr).copied().flatten()
    }

    /// Every node has a metric below `RTMETRIC_MAX`.
    pub fn all_routed(&self) -> bool {
        self.depths.values().all(|&d| d < RTMETRIC_MAX)
    }

    /// Parent chain from `addr` to a sink, excluding `addr` itself.
    ///
    /// `None` if the chain dead-ends, loops, or leaves the snapshot.
    pub fn path_to_sink(&self, addr: Addr) -> Option<Vec<Addr>> {
        let mut path = Vec::new();
        let mut current = addr;
        while !self.sinks.contains(&current) {
            let next = self.parents.get(&current).copied().flatten()?;
            if next == addr || path.contains(&next) {
                return None;
            }
            path.push(next);
            current = next;
        }
        Some(path)
    }

    /// Number of parent hops from `addr` to a sink.
    pub fn hops_to_sink(&self, addr: Addr) -> Option<usize> {
        self.path_to_sink(addr).map(|p| p.len())
    }

    /// At least one sink exists and every node's parent chain reaches one.
    pub fn converged(&self) -> bool {
        !self.sinks.is_empty()
            && self.all_routed()
            && self
                .depths
                .keys()
                .all(|&addr| self.path_to_sink(addr).is_some())
    }
}

/// A packet delivered to a sink application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub time: Timestamp,
    pub sink: Addr,
    pub originator: Addr,
    pub seqno: u8,
    pub hops: u8,
    pub payload: Vec<u8>,
}

/// A packet whose originator gave up on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendTimeout {
    pub time: Timestamp,
    pub node: Addr,
    pub seqno: u8,
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Frames handed to the simulated radio (one per broadcast or unicast).
    pub frames_sent: u64,
    /// Per-receiver or per-attempt losses.
    pub frames_dropped: u64,
    /// Frames that reached a receiver.
    pub frames_delivered: u64,
    pub deliveries: Vec<Delivery>,
    pub timeouts: Vec<SendTimeout>,
    /// `ParentChanged` events across all nodes.
    pub parent_changes: u64,
    /// Application sends rejected by the connection.
    pub send_errors: u64,
    pub snapshots: Vec<RouteSnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: RouteSnapshot) {
        self.snapshots.push(snapshot);
    }

    /// Deliveries of packets originated by `originator`.
    pub fn deliveries_from(&self, originator: Addr) -> impl Iterator<Item = &Delivery> {
        self.deliveries
            .iter()
            .filter(move |d| d.originator == originator)
    }

    /// How many times `(originator, seqno)` reached a sink application.
    pub fn delivery_count(&self, originator: Addr, seqno: u8) -> usize {
        self.deliveries_from(originator)
            .filter(|d| d.seqno == seqno)
            .count()
    }

    /// Check if routes had converged in the first snapshot at or after `time`.
    pub fn converged_by(&self, time: Timestamp) -> bool {
        self.snapshots
            .iter()
            .find(|s| s.time >= time)
            .is_some_and(|s| s.converged())
    }

    /// Time of the first converged snapshot.
    pub fn convergence_time(&self) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| s.converged())
            .map(|s| s.time)
    }

    pub fn latest_snapshot(&self) -> Option<&RouteSnapshot> {
        self.snapshots.last()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub end_time: Timestamp,
    pub metrics: SimMetrics,
    /// Whether the simulation ended because the event queue ran dry.
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Whether every node had a loop-free route to a sink at the end.
    pub fn converged(&self) -> bool {
        self.metrics
            .latest_snapshot()
            .is_some_and(|s| s.converged())
    }

    pub fn delivered(&self) -> usize {
        self.metrics.deliveries.len()
    }

    pub fn timed_out(&self) -> usize {
        self.metrics.timeouts.len()
    }
}
