#![forbid(unsafe_code)]
//! rimecollect - Tree-based data collection for low-power wireless mesh networks
//!
//! Every node forwards application data hop by hop toward a single sink over
//! a self-stabilizing routing tree. Each hop is individually acknowledged
//! and retransmitted; link quality is tracked per neighbor and folded into
//! the routing metric.
//!
//! This crate is `no_std` but **requires the `alloc` crate**. Tables and
//! queues are heap-allocated once at `open` with capacities fixed by
//! [`CollectConfig`](config::CollectConfig).
//!
//! # Key Properties
//!
//! - The sink advertises metric 0; every other node's metric is its parent's
//!   metric plus the ETX estimate of the link to that parent
//! - A parent is only replaced by a candidate that is significantly better
//! - At most one packet per connection is in flight; the ACK carries
//!   congestion, drop and stale-metric flags back to the sender
//! - Recently seen packets are suppressed, but always re-ACKed
//! - Keepalives and proactive probes keep link estimates fresh without
//!   application traffic
//!
//! # Example (link estimation)
//!
//! ```
//! use rimecollect::link_estimate::LinkEstimate;
//! use rimecollect::types::{INITIAL_LINK_ESTIMATE, LINK_ESTIMATE_UNIT};
//!
//! let mut le = LinkEstimate::new();
//! assert_eq!(le.estimate(), INITIAL_LINK_ESTIMATE);
//!
//! // One clean delivery, one failure that burned two attempts.
//! le.record_success(1);
//! le.record_failure(2);
//! assert_eq!(le.estimate(), LINK_ESTIMATE_UNIT * (1 + 4) / 2);
//! ```
//!
//! # Example (integration pattern)
//!
//! ```text
//! use rimecollect::{CollectConn, DefaultConfig, OutgoingData, Event};
//!
//! // Implement Transport, Random and Clock for your platform...
//!
//! // let mut conn = CollectConn::<_, _, _, DefaultConfig>::open(transport, random, clock, 130, true);
//! // conn.set_keepalive(Duration::from_secs(60));
//!
//! // Spawn the connection's run loop
//! // spawn(async move {
//! //     conn.run().await;
//! // });
//!
//! // Originate data toward the sink
//! // conn.outgoing().send(OutgoingData { payload, max_rexmits: 4 }).await;
//!
//! // At the sink
//! // if let Event::Received { originator, seqno, hops, payload } = conn.events().receive().await { ... }
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Addresses, metric constants, ACK flags, stats, events
//! - [`wire`] - Frame codec
//! - [`traits`] - Transport, Random, Clock traits
//! - [`conn`] - `CollectConn` and its public API
//! - [`routing`] - Parent selection and rtmetric
//! - [`reliable`] - Per-hop reliable transport
//! - [`forward`] - Receive, deliver and forward
//! - [`maintenance`] - Advertisements, keepalives, probing, aging
//! - [`neighbor`] / [`link_estimate`] - Neighbor table and ETX
//! - [`time`] - Timestamp, Duration and Timer
//! - [`config`] - Compile-time memory configuration

#![no_std]

// Prevent test/debug features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes mock transport and clock implementations."
);

#[cfg(all(feature = "debug", not(test), not(debug_assertions)))]
compile_error!(
    "The `debug` feature must not be enabled in release builds. \
     It adds protocol tracing overhead intended only for development and simulation."
);

extern crate alloc;

pub mod collections;
pub mod config;
#[macro_use]
pub mod debug;
pub mod conn;
pub mod forward;
pub mod link_estimate;
pub mod maintenance;
pub mod neighbor;
pub mod reliable;
pub mod routing;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use config::{CollectConfig, DefaultConfig, SmallConfig};
pub use conn::CollectConn;
pub use neighbor::{Neighbor, NeighborTable};
pub use time::{Duration, Timestamp};
pub use traits::{Clock, LinkEvent, OutgoingData, OutgoingFrame, Random, Transport, TxStatus};
pub use types::{
    AckFlags, Addr, CollectStats, Error, Event, Payload, Rtmetric, SendStatus,
};
pub use wire::{Decode, DecodeError, Encode, Envelope, Frame};

// Re-export constants
pub use types::{LINK_ESTIMATE_UNIT, MAX_REXMITS, RTMETRIC_MAX, RTMETRIC_SINK};
