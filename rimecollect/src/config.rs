//! Compile-time configuration for memory bounds and retransmission timing.
//!
//! The `CollectConfig` trait sizes every fixed-capacity table a connection
//! owns. Use `DefaultConfig` for typical sensor motes and `SmallConfig` for
//! the most constrained parts.
//!
//! # Memory Footprint
//!
//! | Config | Neighbors | Queue | Recent | Suitable MCUs |
//! |--------|----------:|------:|-------:|---------------|
//! | `DefaultConfig` | 8 | 12 | 16 | MSP430F1611, nRF52, STM32L1 |
//! | `SmallConfig` | 4 | 4 | 8 | ATmega128RFA1, MSP430F2xx |
//!
//! Rough formula:
//! - `MAX_NEIGHBORS * 16` bytes (address, metric, estimator history, age)
//! - `MAX_SENDING_QUEUE * (frame + 16)` bytes
//! - `NUM_RECENT_PACKETS * 3` bytes
//!
//! # Example
//!
//! ```ignore
//! use rimecollect::{CollectConn, CollectConfig, SmallConfig};
//!
//! let conn = CollectConn::<_, _, _, SmallConfig>::open(transport, random, clock, 130, true);
//!
//! struct MyConfig;
//! impl CollectConfig for MyConfig {
//!     const MAX_NEIGHBORS: usize = 16;
//!     // ... other constants
//! }
//! ```

use crate::time::Duration;

/// Configuration trait for compile-time tuning.
///
/// All bounds must be non-zero.
pub trait CollectConfig {
    /// Neighbor table slots.
    const MAX_NEIGHBORS: usize;

    /// Send queue depth (originated plus forwarded packets).
    const MAX_SENDING_QUEUE: usize;

    /// Size of the duplicate-suppression ring.
    const NUM_RECENT_PACKETS: usize;

    /// Initial TTL stamped on originated packets.
    const MAX_HOPLIM: u8;

    /// Neighbor lifetime in aging ticks.
    const NEIGHBOR_MAX_AGE: u16;

    /// Base retransmission interval.
    const REXMIT_TIME: Duration;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl CollectConfig for DefaultConfig {
    const MAX_NEIGHBORS: usize = 8;
    const MAX_SENDING_QUEUE: usize = 12;
    const NUM_RECENT_PACKETS: usize = 16;
    const MAX_HOPLIM: u8 = 15;
    const NEIGHBOR_MAX_AGE: u16 = 180;
    const REXMIT_TIME: Duration = Duration::from_secs(1);
}

/// Configuration for devices with a few KB of RAM.
///
/// Fewer neighbors and a shorter queue; slower retransmissions to match
/// duty-cycled radios on these parts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallConfig;

impl CollectConfig for SmallConfig {
    const MAX_NEIGHBORS: usize = 4;
    const MAX_SENDING_QUEUE: usize = 4;
    const NUM_RECENT_PACKETS: usize = 8;
    const MAX_HOPLIM: u8 = 10;
    const NEIGHBOR_MAX_AGE: u16 = 120;
    const REXMIT_TIME: Duration = Duration::from_secs(2);
}
