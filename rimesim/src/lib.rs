//! rimesim - Discrete event network simulator for rimecollect protocol testing.
//!
//! This crate provides a deterministic, discrete-event simulator for running
//! whole collect networks in one process without real-time delays.
//!
//! # Features
//!
//! - **Discrete event simulation**: No real-time delays, deterministic ordering
//! - **Link layer model**: Per-attempt loss, link-layer retries and `Sent` upcalls
//! - **Configurable topology**: Fully connected, chain, star, grid, or custom
//! - **Scenario builder**: Sink placement, keepalives, scheduled sends and link failures
//! - **Metrics collection**: Deliveries, timeouts, route snapshots
//!
//! # Example
//!
//! ```
//! use rimesim::{chain_scenario, node_addr, Duration, Timestamp};
//!
//! // Node 3 sends to the sink at the far end of a four-node chain.
//! let result = chain_scenario(4)
//!     .with_seed(42)
//!     .send_at(Timestamp::from_secs(20), 3, b"reading", 4)
//!     .run_for(Duration::from_secs(30));
//!
//! assert!(result.converged());
//! let delivery = &result.metrics.deliveries[0];
//! assert_eq!(delivery.originator, node_addr(3));
//! assert_eq!(delivery.hops, 3);
//! ```
//!
//! # Architecture
//!
//! The simulator uses a priority queue of events ordered by (time, sequence_number).
//! The main loop:
//! 1. Pop next event from queue
//! 2. Advance simulation time
//! 3. Process event (call the node's handler)
//! 4. Route the frames it emitted through the topology
//! 5. Record its application events and schedule its next timer wakeup
//!
//! Handlers are called directly (`handle_link_event`, `handle_timer`)
//! instead of through the async `run()` loop.

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

// Re-export main types
pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{Delivery, RouteSnapshot, SendTimeout, SimMetrics, SimulationResult};
pub use node::SimNode;
pub use rimecollect::{Addr, Duration, Timestamp};
pub use scenario::{chain_scenario, node_addr, simple_scenario, ScenarioBuilder};
pub use sim::Simulator;
pub use topology::{Link, Topology};
