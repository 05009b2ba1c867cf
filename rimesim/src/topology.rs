//! Network topology and link properties.

use hashbrown::HashMap;
use rimecollect::{Addr, Duration};

/// Properties of a radio link between two nodes.
#[derive(Debug, Clone)]
pub struct Link {
    /// Per-attempt frame loss probability (0.0 to 1.0).
    pub loss_rate: f64,
    /// Airtime of one attempt, including the link-layer ACK.
    pub delay: Duration,
    /// Whether the link is currently active.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            delay: Duration::from_millis(5),
            active: true,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Network topology defining connectivity between nodes.
///
/// Links are symmetric: one `Link` describes both directions.
#[derive(Debug, Clone)]
pub struct Topology {
    links: HashMap<(Addr, Addr), Link>,
    /// Properties given to links added with `connect`.
    default_link: Link,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    pub fn new() -> Self {
        Self {
            links: HashMap::new(),
            default_link: Link::default(),
        }
    }

    /// Set default link properties for links added with `connect`.
    pub fn with_default_link(mut self, link: Link) -> Self {
        self.default_link = link;
        self
    }

    /// Every node hears every other node.
    pub fn fully_connected(nodes: &[Addr]) -> Self {
        let mut topo = Self::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.connect(a, b);
            }
        }
        topo
    }

    /// Each node hears only its predecessor and successor.
    pub fn chain(nodes: &[Addr]) -> Self {
        let mut topo = Self::new();
        for pair in nodes.windows(2) {
            topo.connect(pair[0], pair[1]);
        }
        topo
    }

    /// The first node is the hub; spokes only hear the hub.
    pub fn star(nodes: &[Addr]) -> Self {
        let mut topo = Self::new();
        let Some((&hub, spokes)) = nodes.split_first() else {
            return topo;
        };
        for &spoke in spokes {
            topo.connect(hub, spoke);
        }
        topo
    }

    /// Row-major grid `width` nodes wide; each node hears its four
    /// orthogonal neighbors.
    pub fn grid(nodes: &[Addr], width: usize) -> Self {
        let mut topo = Self::new();
        if width == 0 {
            return topo;
        }
        for (i, &a) in nodes.iter().enumerate() {
            if (i + 1) % width != 0 {
                if let Some(&right) = nodes.get(i + 1) {
                    topo.connect(a, right);
                }
            }
            if let Some(&below) = nodes.get(i + width) {
                topo.connect(a, below);
            }
        }
        topo
    }

    /// Add a link with the default properties.
    pub fn connect(&mut self, a: Addr, b: Addr) {
        let link = self.default_link.clone();
        self.add_link(a, b, link);
    }

    /// Add a bidirectional link between two nodes.
    pub fn add_link(&mut self, a: Addr, b: Addr, link: Link) {
        self.links.insert(Self::canonical_pair(a, b), link);
    }

    pub fn get_link(&self, a: Addr, b: Addr) -> Option<&Link> {
        self.links.get(&Self::canonical_pair(a, b))
    }

    pub fn get_link_mut(&mut self, a: Addr, b: Addr) -> Option<&mut Link> {
        self.links.get_mut(&Self::canonical_pair(a, b))
    }

    /// Check if two nodes are connected (link exists and is active).
    pub fn is_connected(&self, a: Addr, b: Addr) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// Nodes reachable from `node` over active links, in address order.
    pub fn neighbors(&self, node: Addr) -> Vec<Addr> {
        let mut result: Vec<Addr> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| match node {
                n if n == a => Some(b),
                n if n == b => Some(a),
                _ => None,
            })
            .collect();
        // Map iteration order is unspecified; loss rolls must not depend on it.
        result.sort_unstable();
        result
    }

    /// Disable all links crossing between partition groups.
    pub fn partition(&mut self, groups: &[Vec<Addr>]) {
        for (&(a, b), link) in self.links.iter_mut() {
            let a_group = groups.iter().position(|g| g.contains(&a));
            let b_group = groups.iter().position(|g| g.contains(&b));
            if a_group != b_group {
                link.active = false;
            }
        }
    }

    /// Re-enable all links.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    pub fn set_global_loss_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.loss_rate = rate;
        }
    }

    pub fn set_global_delay(&mut self, delay: Duration) {
        for link in self.links.values_mut() {
            link.delay = delay;
        }
    }

    pub fn default_link(&self) -> &Link {
        &self.default_link
    }

    fn canonical_pair(a: Addr, b: Addr) -> (Addr, Addr) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_nodes(count: usize) -> Vec<Addr> {
        (1..=count).map(|i| Addr::new(0, i as u8)).collect()
    }

    #[test]
    fn test_fully_connected() {
        let nodes = make_nodes(3);
        let topo = Topology::fully_connected(&nodes);

        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[0], nodes[2]));
        assert!(topo.is_connected(nodes[1], nodes[2]));
    }

    #[test]
    fn test_chain() {
        let nodes = make_nodes(4);
        let topo = Topology::chain(&nodes);

        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[1], nodes[2]));
        assert!(topo.is_connected(nodes[2], nodes[3]));
        assert!(!topo.is_connected(nodes[0], nodes[2]));
        assert!(!topo.is_connected(nodes[0], nodes[3]));
    }

    #[test]
    fn test_star() {
        let nodes = make_nodes(4);
        let topo = Topology::star(&nodes);

        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[0], nodes[3]));
        assert!(!topo.is_connected(nodes[1], nodes[2]));
        assert!(Topology::star(&[]).neighbors(nodes[0]).is_empty());
    }

    #[test]
    fn test_grid() {
        // 0 1 2
        // 3 4 5
        let nodes = make_nodes(6);
        let topo = Topology::grid(&nodes, 3);

        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[0], nodes[3]));
        assert!(topo.is_connected(nodes[4], nodes[5]));
        // No wrap from the end of one row to the start of the next.
        assert!(!topo.is_connected(nodes[2], nodes[3]));
        assert!(!topo.is_connected(nodes[0], nodes[4]));
        assert_eq!(topo.neighbors(nodes[4]), [nodes[1], nodes[3], nodes[5]]);
    }

    #[test]
    fn test_partition_and_heal() {
        let nodes = make_nodes(4);
        let mut topo = Topology::fully_connected(&nodes);

        topo.partition(&[vec![nodes[0], nodes[1]], vec![nodes[2], nodes[3]]]);
        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[2], nodes[3]));
        assert!(!topo.is_connected(nodes[0], nodes[2]));
        assert!(!topo.is_connected(nodes[1], nodes[3]));

        topo.heal();
        assert!(topo.is_connected(nodes[0], nodes[2]));
    }

    #[test]
    fn test_neighbors_sorted_and_active_only() {
        let nodes = make_nodes(4);
        let mut topo = Topology::star(&nodes);
        assert_eq!(topo.neighbors(nodes[0]), [nodes[1], nodes[2], nodes[3]]);
        assert_eq!(topo.neighbors(nodes[1]), [nodes[0]]);

        if let Some(link) = topo.get_link_mut(nodes[2], nodes[0]) {
            link.active = false;
        }
        assert_eq!(topo.neighbors(nodes[0]), [nodes[1], nodes[3]]);
    }

    #[test]
    fn test_connect_uses_default_link() {
        let nodes = make_nodes(2);
        let mut topo = Topology::new().with_default_link(Link::new().with_loss_rate(0.25));
        topo.connect(nodes[0], nodes[1]);
        assert_eq!(topo.get_link(nodes[1], nodes[0]).map(|l| l.loss_rate), Some(0.25));
    }
}
