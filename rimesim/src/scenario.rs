//! Scenario builder for setting up and running simulations.

use rimecollect::{Addr, Duration, Timestamp};

use crate::event::{Event, ScenarioAction};
use crate::metrics::SimulationResult;
use crate::sim::Simulator;
use crate::topology::Topology;

/// Address of the node at `index` in a built scenario.
///
/// Addresses start at `00.01`; `00.00` is the null address.
pub fn node_addr(index: usize) -> Addr {
    Addr::from_u16(u16::try_from(index + 1).unwrap_or(u16::MAX))
}

/// Type of topology to generate.
#[derive(Debug, Clone)]
enum TopologyType {
    FullyConnected,
    Chain,
    Star,
    Grid { width: usize },
    Custom(Topology),
}

/// Builder for simulation scenarios.
///
/// Nodes are addressed by index (see [`node_addr`]). Node 0 is the sink
/// unless `sink` says otherwise.
pub struct ScenarioBuilder {
    num_nodes: usize,
    /// RNG seed for determinism.
    seed: u64,
    /// Topology type to generate (must be explicitly specified).
    topology_type: Option<TopologyType>,
    loss_rate: f64,
    delay: Option<Duration>,
    sink: Option<usize>,
    leaves: Vec<usize>,
    keepalive: Option<Duration>,
    /// Scheduled actions and sends, by node index.
    actions: Vec<(Timestamp, IndexedAction)>,
    snapshot_interval: Option<Duration>,
    trace: bool,
}

/// An action whose node references are still indices.
#[derive(Debug, Clone)]
enum IndexedAction {
    Partition(Vec<Vec<usize>>),
    Heal,
    DisableLink(usize, usize),
    EnableLink(usize, usize),
    SetLossRate(usize, usize, f64),
    SetSink(usize, bool),
    Snapshot,
    Send {
        from: usize,
        payload: Vec<u8>,
        max_rexmits: u8,
    },
}

impl IndexedAction {
    fn resolve(self) -> Event {
        let action = match self {
            Self::Partition(groups) => ScenarioAction::Partition {
                groups: groups
                    .into_iter()
                    .map(|g| g.into_iter().map(node_addr).collect())
                    .collect(),
            },
            Self::Heal => ScenarioAction::HealPartition,
            Self::DisableLink(a, b) => ScenarioAction::DisableLink {
                from: node_addr(a),
                to: node_addr(b),
            },
            Self::EnableLink(a, b) => ScenarioAction::EnableLink {
                from: node_addr(a),
                to: node_addr(b),
            },
            Self::SetLossRate(a, b, rate) => ScenarioAction::SetLossRate {
                from: node_addr(a),
                to: node_addr(b),
                rate,
            },
            Self::SetSink(node, is_sink) => ScenarioAction::SetSink {
                node: node_addr(node),
                is_sink,
            },
            Self::Snapshot => ScenarioAction::TakeSnapshot,
            Self::Send {
                from,
                payload,
                max_rexmits,
            } => {
                return Event::AppSend {
                    from: node_addr(from),
                    payload,
                    max_rexmits,
                };
            }
        };
        Event::ScenarioAction(action)
    }
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ScenarioBuilder {
    /// Create a new scenario with the specified number of nodes.
    ///
    /// A topology must be chosen before `build()`.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seed: 42,
            topology_type: None,
            loss_rate: 0.0,
            delay: None,
            sink: Some(0),
            leaves: Vec::new(),
            keepalive: None,
            actions: Vec::new(),
            snapshot_interval: None,
            trace: false,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Use a custom topology over [`node_addr`] addresses.
    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology_type = Some(TopologyType::Custom(topo));
        self
    }

    pub fn fully_connected(mut self) -> Self {
        self.topology_type = Some(TopologyType::FullyConnected);
        self
    }

    /// Node `i` hears only `i - 1` and `i + 1`.
    pub fn chain_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Chain);
        self
    }

    /// Node 0 is the hub.
    pub fn star_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Star);
        self
    }

    pub fn grid_topology(mut self, width: usize) -> Self {
        self.topology_type = Some(TopologyType::Grid { width });
        self
    }

    /// Per-attempt loss rate on every link.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Per-attempt airtime on every link.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make node `index` the sink from the start.
    pub fn sink(mut self, index: usize) -> Self {
        self.sink = Some(index);
        self
    }

    /// Start without any sink.
    pub fn no_sink(mut self) -> Self {
        self.sink = None;
        self
    }

    /// Open node `index` as a non-router.
    pub fn leaf(mut self, index: usize) -> Self {
        self.leaves.push(index);
        self
    }

    /// Enable keepalives on every node.
    pub fn keepalive(mut self, period: Duration) -> Self {
        self.keepalive = Some(period);
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    /// Record debug events (see [`Simulator::trace`]).
    pub fn with_trace(mut self) -> Self {
        self.trace = true;
        self
    }

    /// Node `from` originates `payload` at `time`.
    pub fn send_at(
        mut self,
        time: Timestamp,
        from: usize,
        payload: &[u8],
        max_rexmits: u8,
    ) -> Self {
        self.actions.push((
            time,
            IndexedAction::Send {
                from,
                payload: payload.to_vec(),
                max_rexmits,
            },
        ));
        self
    }

    /// Schedule a network partition by node index.
    pub fn partition_at(mut self, time: Timestamp, groups: Vec<Vec<usize>>) -> Self {
        self.actions.push((time, IndexedAction::Partition(groups)));
        self
    }

    pub fn heal_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, IndexedAction::Heal));
        self
    }

    pub fn disable_link_at(mut self, time: Timestamp, a: usize, b: usize) -> Self {
        self.actions.push((time, IndexedAction::DisableLink(a, b)));
        self
    }

    pub fn enable_link_at(mut self, time: Timestamp, a: usize, b: usize) -> Self {
        self.actions.push((time, IndexedAction::EnableLink(a, b)));
        self
    }

    pub fn loss_rate_at(mut self, time: Timestamp, a: usize, b: usize, rate: f64) -> Self {
        self.actions.push((time, IndexedAction::SetLossRate(a, b, rate)));
        self
    }

    /// Make node `index` the sink (or revert it) at `time`.
    pub fn set_sink_at(mut self, time: Timestamp, index: usize, is_sink: bool) -> Self {
        self.actions.push((time, IndexedAction::SetSink(index, is_sink)));
        self
    }

    pub fn snapshot_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, IndexedAction::Snapshot));
        self
    }

    /// Build the simulator with all nodes and topology.
    ///
    /// # Panics
    ///
    /// Panics if no topology was chosen.
    pub fn build(self) -> (Simulator, Vec<Addr>) {
        let addrs: Vec<Addr> = (0..self.num_nodes).map(node_addr).collect();

        let mut topo = match self.topology_type {
            Some(TopologyType::FullyConnected) => Topology::fully_connected(&addrs),
            Some(TopologyType::Chain) => Topology::chain(&addrs),
            Some(TopologyType::Star) => Topology::star(&addrs),
            Some(TopologyType::Grid { width }) => Topology::grid(&addrs, width),
            Some(TopologyType::Custom(t)) => t,
            None => panic!(
                "Topology must be explicitly specified. \
                Use .fully_connected(), .chain_topology(), .star_topology(), \
                .grid_topology(), or .topology()"
            ),
        };
        if self.loss_rate > 0.0 {
            topo.set_global_loss_rate(self.loss_rate);
        }
        if let Some(delay) = self.delay {
            topo.set_global_delay(delay);
        }

        let mut sim = Simulator::new(self.seed).with_topology(topo);
        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }
        if self.trace {
            sim = sim.with_trace();
        }

        for (i, &addr) in addrs.iter().enumerate() {
            let node_seed = self.seed.wrapping_add(i as u64 * 1000);
            if self.leaves.contains(&i) {
                sim.add_leaf_node(addr, node_seed);
            } else {
                sim.add_node(addr, node_seed);
            }
        }
        if let Some(sink) = self.sink.filter(|&s| s < self.num_nodes) {
            sim.set_sink(node_addr(sink), true);
        }
        if let Some(period) = self.keepalive {
            for &addr in &addrs {
                sim.set_keepalive(addr, period);
            }
        }

        for (time, action) in self.actions {
            sim.schedule(time, action.resolve());
        }

        (sim, addrs)
    }

    /// Build and run the simulation for the specified duration.
    pub fn run_for(self, duration: Duration) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_for(duration)
    }

    /// Build and run until the specified time.
    pub fn run_until(self, time: Timestamp) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_until(time)
    }
}

/// An N-node chain with the sink at one end.
pub fn chain_scenario(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes).chain_topology()
}

/// An N-node fully connected network.
pub fn simple_scenario(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes).fully_connected()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rimecollect::RTMETRIC_MAX;

    #[test]
    fn test_node_addr_skips_null() {
        assert_eq!(node_addr(0), Addr::new(0, 1));
        assert_eq!(node_addr(255), Addr::new(1, 0));
        assert!(!node_addr(0).is_null());
    }

    #[test]
    fn test_scenario_builder_basic() {
        let (sim, nodes) = ScenarioBuilder::new(3)
            .with_seed(123)
            .fully_connected()
            .build();

        assert_eq!(nodes.len(), 3);
        assert_eq!(sim.node_ids(), nodes);
        assert!(sim.node(&nodes[0]).is_some_and(|n| n.is_sink()));
        assert!(sim.node(&nodes[1]).is_some_and(|n| !n.is_sink()));
    }

    #[test]
    fn test_scenario_sink_choice() {
        let (sim, nodes) = chain_scenario(3).sink(2).build();
        assert!(sim.node(&nodes[2]).is_some_and(|n| n.is_sink()));

        let (sim, nodes) = chain_scenario(3).no_sink().build();
        assert!(nodes
            .iter()
            .all(|a| sim.node(a).is_some_and(|n| !n.is_sink())));
    }

    #[test]
    fn test_scenario_run_for() {
        let result = simple_scenario(2).run_for(Duration::from_secs(1));

        assert!(result.end_time >= Timestamp::from_secs(1));
        assert!(!result.metrics.snapshots.is_empty());
    }

    #[test]
    fn test_scenario_with_loss() {
        let (sim, nodes) = ScenarioBuilder::new(2)
            .fully_connected()
            .with_loss_rate(0.5)
            .build();

        let link = sim.topology().get_link(nodes[0], nodes[1]);
        assert_eq!(link.map(|l| l.loss_rate), Some(0.5));
    }

    #[test]
    fn test_scenario_with_delay() {
        let (sim, nodes) = chain_scenario(3)
            .with_delay(Duration::from_millis(20))
            .build();

        let link = sim.topology().get_link(nodes[1], nodes[2]);
        assert_eq!(link.map(|l| l.delay), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_scenario_partition_by_index() {
        let (mut sim, nodes) = simple_scenario(4)
            .partition_at(Timestamp::from_millis(100), vec![vec![0, 1], vec![2, 3]])
            .build();
        sim.run_for(Duration::from_millis(200));

        assert!(sim.topology().is_connected(nodes[0], nodes[1]));
        assert!(!sim.topology().is_connected(nodes[1], nodes[2]));
    }

    #[test]
    fn test_scenario_leaf_node() {
        let result = chain_scenario(3).leaf(1).run_for(Duration::from_secs(20));

        // Node 2 only hears the leaf, which never offers a route.
        let snapshot = result.metrics.latest_snapshot().unwrap();
        assert!(snapshot
            .depth(node_addr(1))
            .is_some_and(|d| d < RTMETRIC_MAX));
        assert_eq!(snapshot.depth(node_addr(2)), Some(RTMETRIC_MAX));
    }

    #[test]
    #[should_panic(expected = "Topology must be explicitly specified")]
    fn test_missing_topology_panics() {
        let _ = ScenarioBuilder::new(2).build();
    }
}
