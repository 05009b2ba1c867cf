//! Discrete event simulator for collect networks.

use std::collections::BinaryHeap;

use hashbrown::HashMap;
use rimecollect::debug::DebugEvent;
use rimecollect::types::MAX_MAC_REXMITS;
use rimecollect::{Addr, Duration, Event as ConnEvent, OutgoingFrame, Timestamp, TxStatus};

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{Delivery, RouteSnapshot, SendTimeout, SimMetrics, SimulationResult};
use crate::node::SimNode;
use crate::topology::Topology;

/// Discrete event simulator for collect networks.
///
/// The radio model is a CSMA link layer with link-level ACKs: a unicast
/// frame is attempted up to `MAX_MAC_REXMITS + 1` times, each attempt lost
/// independently with the link's loss rate, and the sender gets one
/// `Sent` upcall with the attempt count. Broadcasts and collect ACKs get
/// a single attempt per receiver.
pub struct Simulator {
    nodes: HashMap<Addr, SimNode>,
    topology: Topology,
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    metrics: SimMetrics,
    /// Next sequence number for event ordering.
    next_seq: u64,
    /// RNG state for packet loss.
    rng_state: u64,
    /// The one live `TimerFire` per node; other fires for it are stale.
    wakeups: HashMap<Addr, Timestamp>,
    snapshot_interval: Option<Duration>,
    next_snapshot: Option<Timestamp>,
    /// Recorded debug events, when tracing is on.
    trace: Option<Vec<(Timestamp, Addr, DebugEvent)>>,
    #[cfg(test)]
    pub timer_fire_count: u64,
}

impl Simulator {
    /// Create a new simulator with given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            rng_state: seed,
            wakeups: HashMap::new(),
            snapshot_interval: None,
            next_snapshot: None,
            trace: None,
            #[cfg(test)]
            timer_fire_count: 0,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Record a route snapshot every `interval`.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Keep every node's debug events, stamped with simulated time.
    pub fn with_trace(mut self) -> Self {
        self.trace = Some(Vec::new());
        self
    }

    /// Add a router node.
    pub fn add_node(&mut self, addr: Addr, seed: u64) -> Addr {
        self.insert_node(SimNode::new(addr, seed, self.current_time))
    }

    /// Add a node that originates traffic but never forwards.
    pub fn add_leaf_node(&mut self, addr: Addr, seed: u64) -> Addr {
        self.insert_node(SimNode::with_role(addr, seed, self.current_time, false))
    }

    fn insert_node(&mut self, node: SimNode) -> Addr {
        let addr = node.addr();
        self.nodes.insert(addr, node);
        self.after_activity(addr);
        addr
    }

    pub fn node(&self, addr: &Addr) -> Option<&SimNode> {
        self.nodes.get(addr)
    }

    pub fn node_mut(&mut self, addr: &Addr) -> Option<&mut SimNode> {
        self.nodes.get_mut(addr)
    }

    /// All node addresses, sorted.
    pub fn node_ids(&self) -> Vec<Addr> {
        let mut ids: Vec<Addr> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Recorded debug events; empty unless built `with_trace`.
    pub fn trace(&self) -> &[(Timestamp, Addr, DebugEvent)] {
        self.trace.as_deref().unwrap_or(&[])
    }

    /// Make `addr` the sink (or revert it) right now.
    pub fn set_sink(&mut self, addr: Addr, is_sink: bool) {
        let now = self.current_time;
        if let Some(node) = self.nodes.get_mut(&addr) {
            node.set_sink(is_sink, now);
        }
        self.after_activity(addr);
    }

    pub fn set_keepalive(&mut self, addr: Addr, period: Duration) {
        let now = self.current_time;
        if let Some(node) = self.nodes.get_mut(&addr) {
            node.set_keepalive(period, now);
        }
        self.after_activity(addr);
    }

    /// Schedule an event.
    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::ScenarioAction(action));
    }

    /// Have `from` originate `payload` at `time`.
    pub fn send_at(&mut self, time: Timestamp, from: Addr, payload: Vec<u8>, max_rexmits: u8) {
        self.schedule(
            time,
            Event::AppSend {
                from,
                payload,
                max_rexmits,
            },
        );
    }

    /// Run simulation until specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while self
            .event_queue
            .peek()
            .is_some_and(|event| event.time <= end_time)
        {
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
            self.maybe_take_snapshot();
        }

        self.advance_time(end_time);
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    /// Run until the event queue is empty or `max_events` were processed.
    pub fn run_events(&mut self, max_events: usize) -> SimulationResult {
        let mut processed = 0;

        while let Some(event) = self.event_queue.pop() {
            self.advance_time(event.time);
            self.process_event(event.event);

            processed += 1;
            if processed >= max_events {
                break;
            }

            self.maybe_take_snapshot();
        }

        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, event: Event) {
        let now = self.current_time;
        match event {
            Event::FrameDelivery { to, from, data } => {
                let Some(node) = self.nodes.get_mut(&to) else {
                    return;
                };
                node.handle_frame(from, data, now);
                self.metrics.frames_delivered += 1;
                self.after_activity(to);
            }
            Event::SentUpcall {
                node: addr,
                to,
                transmissions,
                status,
            } => {
                let Some(node) = self.nodes.get_mut(&addr) else {
                    return;
                };
                node.handle_sent(to, transmissions, status, now);
                self.after_activity(addr);
            }
            Event::TimerFire { node: addr } => self.fire_timer(addr),
            Event::AppSend {
                from,
                payload,
                max_rexmits,
            } => {
                let Some(node) = self.nodes.get_mut(&from) else {
                    return;
                };
                if let Err(e) = node.app_send(payload, max_rexmits, now) {
                    self.metrics.send_errors += 1;
                    log::debug!("sim: send from {} rejected: {}", from, e);
                }
                self.after_activity(from);
            }
            Event::ScenarioAction(action) => self.execute_action(action),
        }
    }

    fn fire_timer(&mut self, addr: Addr) {
        let now = self.current_time;
        if self.wakeups.get(&addr) != Some(&now) {
            return;
        }
        self.wakeups.remove(&addr);

        #[cfg(test)]
        {
            self.timer_fire_count += 1;
        }

        if let Some(node) = self.nodes.get_mut(&addr) {
            node.handle_timer(now);
        }
        self.after_activity(addr);
    }

    /// Route what a node emitted, record its events and re-arm its wakeup.
    fn after_activity(&mut self, addr: Addr) {
        let Some(node) = self.nodes.get(&addr) else {
            return;
        };
        let (control, data) = node.take_outgoing();
        let events = node.take_events();
        let debug = node.take_debug_events();
        let wakeup = node.next_wakeup();

        for frame in control {
            self.route_control(addr, frame);
        }
        for frame in data {
            self.route_data(addr, frame);
        }
        self.record_events(addr, events);
        if let Some(trace) = self.trace.as_mut() {
            let now = self.current_time;
            trace.extend(debug.into_iter().map(|e| (now, addr, e)));
        }
        self.reschedule(addr, wakeup);
    }

    fn reschedule(&mut self, addr: Addr, wakeup: Option<Timestamp>) {
        let Some(wakeup) = wakeup else {
            self.wakeups.remove(&addr);
            return;
        };
        let wakeup = wakeup.max(self.current_time);
        if self.wakeups.get(&addr) == Some(&wakeup) {
            return;
        }
        self.wakeups.insert(addr, wakeup);
        self.schedule(wakeup, Event::TimerFire { node: addr });
    }

    fn record_events(&mut self, addr: Addr, events: Vec<ConnEvent>) {
        let now = self.current_time;
        for event in events {
            match event {
                ConnEvent::Received {
                    originator,
                    seqno,
                    hops,
                    payload,
                } => self.metrics.deliveries.push(Delivery {
                    time: now,
                    sink: addr,
                    originator,
                    seqno,
                    hops,
                    payload,
                }),
                ConnEvent::SendTimedOut { seqno } => self.metrics.timeouts.push(SendTimeout {
                    time: now,
                    node: addr,
                    seqno,
                }),
                ConnEvent::ParentChanged { .. } => self.metrics.parent_changes += 1,
            }
        }
    }

    /// Advertisements go to every neighbor, ACKs to their destination.
    fn route_control(&mut self, sender: Addr, frame: OutgoingFrame) {
        self.metrics.frames_sent += 1;
        let receivers = match frame.dest {
            None => self.topology.neighbors(sender),
            Some(dest) if self.topology.is_connected(sender, dest) => vec![dest],
            Some(_) => {
                self.metrics.frames_dropped += 1;
                return;
            }
        };

        for to in receivers {
            let Some((loss_rate, delay)) = self.link_params(sender, to) else {
                continue;
            };
            if self.lost(loss_rate) {
                self.metrics.frames_dropped += 1;
                continue;
            }
            self.schedule(
                self.current_time + delay,
                Event::FrameDelivery {
                    to,
                    from: sender,
                    data: frame.data.clone(),
                },
            );
        }
    }

    /// Unicast DATA with link-layer retries and a completion upcall.
    fn route_data(&mut self, sender: Addr, frame: OutgoingFrame) {
        self.metrics.frames_sent += 1;
        let Some(to) = frame.dest else {
            log::warn!("sim: {} handed a DATA frame with no destination", sender);
            return;
        };

        let max_attempts = MAX_MAC_REXMITS + 1;
        let link = self.link_params(sender, to);
        let delay = link.map_or(self.topology.default_link().delay, |(_, d)| d);

        let mut delivered_on = None;
        for attempt in 1..=max_attempts {
            if let Some((loss_rate, _)) = link {
                if !self.lost(loss_rate) {
                    delivered_on = Some(attempt);
                    break;
                }
            }
            self.metrics.frames_dropped += 1;
        }

        let (transmissions, status) = match delivered_on {
            Some(attempt) => (attempt, TxStatus::Ok),
            None => (max_attempts, TxStatus::NoAck),
        };
        let done = self.current_time + delay * u64::from(transmissions);
        if delivered_on.is_some() {
            self.schedule(
                done,
                Event::FrameDelivery {
                    to,
                    from: sender,
                    data: frame.data,
                },
            );
        }
        self.schedule(
            done,
            Event::SentUpcall {
                node: sender,
                to,
                transmissions,
                status,
            },
        );
    }

    /// Loss rate and delay of an active link.
    fn link_params(&self, a: Addr, b: Addr) -> Option<(f64, Duration)> {
        self.topology
            .get_link(a, b)
            .filter(|link| link.active)
            .map(|link| (link.loss_rate, link.delay))
    }

    fn lost(&mut self, loss_rate: f64) -> bool {
        loss_rate > 0.0 && self.random_f64() < loss_rate
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        log::debug!("sim: {:?} at {:?}", action, self.current_time);
        match action {
            ScenarioAction::Partition { groups } => {
                self.topology.partition(&groups);
            }
            ScenarioAction::HealPartition => {
                self.topology.heal();
            }
            ScenarioAction::DisableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { from, to, rate } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
            ScenarioAction::SetSink { node, is_sink } => {
                self.set_sink(node, is_sink);
            }
            ScenarioAction::TakeSnapshot => {
                self.take_snapshot();
            }
        }
    }

    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }

    /// Record every node's metric and parent.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = RouteSnapshot::new(self.current_time);
        for (&addr, node) in &self.nodes {
            snapshot.record_node(addr, node.depth(), node.parent(), node.is_sink());
        }
        self.metrics.add_snapshot(snapshot);
    }

    /// Random f64 in [0, 1).
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        ((self.rng_state >> 11) as f64) / ((1u64 << 53) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Link;
    use rimecollect::{LINK_ESTIMATE_UNIT, RTMETRIC_MAX};

    fn a(n: u8) -> Addr {
        Addr::new(0, n)
    }

    fn pair(link: Link) -> Simulator {
        let mut topo = Topology::new();
        topo.add_link(a(1), a(2), link);
        let mut sim = Simulator::new(42).with_topology(topo);
        sim.add_node(a(1), 1);
        sim.add_node(a(2), 2);
        sim.set_sink(a(1), true);
        sim
    }

    #[test]
    fn test_simulator_creation() {
        let sim = Simulator::new(42);
        assert_eq!(sim.current_time(), Timestamp::ZERO);
        assert!(sim.node_ids().is_empty());
    }

    #[test]
    fn test_add_nodes() {
        let mut sim = Simulator::new(42);
        sim.add_node(a(2), 2);
        sim.add_node(a(1), 1);
        assert_eq!(sim.node_ids(), [a(1), a(2)]);
        assert!(sim.node(&a(1)).is_some());
        assert!(sim.node(&a(3)).is_none());
    }

    #[test]
    fn test_lone_node_keeps_no_route() {
        let mut sim = Simulator::new(42);
        sim.add_node(a(1), 1);
        let result = sim.run_for(Duration::from_secs(10));

        assert_eq!(sim.node(&a(1)).map(|n| n.depth()), Some(RTMETRIC_MAX));
        assert!(!result.converged());
        assert!(sim.timer_fire_count > 0);
    }

    #[test]
    fn test_neighbor_of_sink_finds_route() {
        let mut sim = pair(Link::new());
        let result = sim.run_for(Duration::from_secs(5));

        assert!(result.converged());
        let node = sim.node(&a(2)).unwrap();
        assert_eq!(node.parent(), Some(a(1)));
        assert!(node.depth() < RTMETRIC_MAX);
        assert_eq!(result.metrics.parent_changes, 1);
    }

    #[test]
    fn test_send_reaches_sink() {
        let mut sim = pair(Link::new());
        sim.run_for(Duration::from_secs(5));

        let now = sim.current_time();
        sim.send_at(now, a(2), b"hello".to_vec(), 4);
        let result = sim.run_for(Duration::from_secs(2));

        assert_eq!(result.delivered(), 1);
        let d = &result.metrics.deliveries[0];
        assert_eq!((d.sink, d.originator, d.hops), (a(1), a(2), 1));
        assert_eq!(d.payload, b"hello");
        // One clean link-layer attempt plus the collect ACK.
        assert_eq!(sim.node(&a(2)).unwrap().depth(), LINK_ESTIMATE_UNIT);
    }

    #[test]
    fn test_dead_link_reports_no_ack() {
        let mut sim = pair(Link::new());
        sim.run_for(Duration::from_secs(5));

        sim.schedule_action(
            sim.current_time(),
            ScenarioAction::SetLossRate {
                from: a(1),
                to: a(2),
                rate: 1.0,
            },
        );
        let now = sim.current_time();
        sim.send_at(now, a(2), b"x".to_vec(), 2);
        let result = sim.run_for(Duration::from_secs(30));

        assert_eq!(result.delivered(), 0);
        assert_eq!(result.timed_out(), 1);
        assert_eq!(sim.node(&a(2)).unwrap().queue_len(), 0);
    }

    #[test]
    fn test_schedule_action() {
        let mut sim = Simulator::new(42).with_topology(Topology::fully_connected(&[a(1), a(2)]));
        sim.add_node(a(1), 1);
        sim.add_node(a(2), 2);

        sim.schedule_action(
            Timestamp::from_millis(500),
            ScenarioAction::Partition {
                groups: vec![vec![a(1)], vec![a(2)]],
            },
        );
        sim.run_for(Duration::from_secs(1));

        assert!(!sim.topology().is_connected(a(1), a(2)));
    }

    #[test]
    fn test_trace_records_debug_events() {
        let mut topo = Topology::new();
        topo.add_link(a(1), a(2), Link::new());
        let mut sim = Simulator::new(7).with_topology(topo).with_trace();
        sim.add_node(a(1), 1);
        sim.add_node(a(2), 2);
        sim.set_sink(a(1), true);
        sim.run_for(Duration::from_secs(3));

        assert!(sim
            .trace()
            .iter()
            .any(|(_, addr, e)| *addr == a(1) && matches!(e, DebugEvent::AdvSent { .. })));
    }
}
