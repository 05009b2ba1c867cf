//! Debug events for protocol tracing.
//!
//! Compiled in for test builds and the `debug` feature. Events go into a
//! bounded channel on the connection; when nobody drains it, new events are
//! dropped.

use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::traits::ChannelMutex;
use crate::types::{AckFlags, Addr, Rtmetric};

/// Queue size for the debug channel.
pub const DEBUG_QUEUE_SIZE: usize = 64;

/// Debug event channel.
pub type DebugChannel = Channel<ChannelMutex, DebugEvent, DEBUG_QUEUE_SIZE>;

/// Push a `DebugEvent` onto the connection's debug channel.
///
/// Expands to nothing unless built for tests or with the `debug` feature.
macro_rules! emit_debug {
    ($self:expr, $event:expr) => {
        #[cfg(any(test, feature = "debug"))]
        {
            let _ = $self.debug_channel().try_send($event);
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// Own metric changed.
    RtmetricChanged {
        timestamp: Timestamp,
        old: Rtmetric,
        new: Rtmetric,
    },
    /// Preferred parent changed.
    ParentChanged {
        timestamp: Timestamp,
        old: Option<Addr>,
        new: Option<Addr>,
    },
    /// Advertisement broadcast.
    AdvSent { timestamp: Timestamp, rtmetric: Rtmetric },
    /// DATA frame handed to the link layer.
    DataSent {
        to: Addr,
        packet_id: u8,
        transmissions: u8,
        dummy: bool,
    },
    /// Matching ACK received.
    AckReceived {
        from: Addr,
        packet_id: u8,
        flags: AckFlags,
    },
    /// ACK that did not match the in-flight packet.
    BadAck { from: Addr, packet_id: u8 },
    /// ACK sent for a received DATA frame.
    AckSent {
        to: Addr,
        packet_id: u8,
        flags: AckFlags,
    },
    /// Packet delivered at the sink.
    Delivered {
        originator: Addr,
        seqno: u8,
        hops: u8,
    },
    /// Packet queued for forwarding.
    Forwarded {
        originator: Addr,
        seqno: u8,
        hops: u8,
        ttl: u8,
    },
    /// Duplicate suppressed.
    Duplicate { originator: Addr, seqno: u8 },
    /// Sender's metric was not above ours.
    LoopDetected {
        from: Addr,
        their_rtmetric: Rtmetric,
        our_rtmetric: Rtmetric,
    },
    /// Packet dropped.
    Dropped {
        originator: Addr,
        seqno: u8,
        reason: &'static str,
    },
    /// Head packet exhausted its budget.
    TimedOut {
        to: Addr,
        packet_id: u8,
        transmissions: u8,
    },
    /// Link layer never reported completion.
    DefensiveTimeout { to: Addr, packet_id: u8 },
    /// Keepalive dummy queued.
    KeepaliveQueued { timestamp: Timestamp },
    /// Probe dummy sent to an unsampled candidate.
    ProbeSent { timestamp: Timestamp, candidate: Addr },
    /// Frame failed to decode.
    FrameDecodeFailed { from: Addr, data_len: usize },
}
