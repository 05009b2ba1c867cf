//! Core types and constants for the collect protocol.

use alloc::vec::Vec;
use core::fmt;

use crate::time::Duration;

// Link estimation (fixed-point ETX)
pub const LINK_ESTIMATE_UNIT: u16 = 8;
pub const LINK_ESTIMATE_HISTORY: usize = 8;
pub const INITIAL_LINK_ESTIMATE: u16 = 4 * LINK_ESTIMATE_UNIT; // Pessimistic until sampled

// Routing metric
pub const RTMETRIC_SINK: Rtmetric = 0;
pub const RTMETRIC_MAX: Rtmetric = LINK_ESTIMATE_UNIT * 64 - 1;
pub const SIGNIFICANT_RTMETRIC_PARENT_CHANGE: Rtmetric =
    LINK_ESTIMATE_UNIT + LINK_ESTIMATE_UNIT / 2;

// Retransmission budgets
pub const MAX_MAC_REXMITS: u8 = 2;
pub const MAX_REXMITS: u8 = 31;
pub const KEEPALIVE_REXMITS: u8 = 8;
pub const PROACTIVE_PROBING_REXMITS: u8 = 15;
pub const MAX_REXMIT_TIME_SCALING: u8 = 3;
pub const DEFENSIVE_TIMEOUT_FACTOR: u64 = 16;

// Timing
pub const NEIGHBOR_TICK: Duration = Duration::from_secs(1);
pub const ANNOUNCE_MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const ANNOUNCE_MAX_INTERVAL: Duration = Duration::from_secs(32);
pub const PROACTIVE_PROBING_INTERVAL: Duration = Duration::from_secs(60);
pub const FORWARD_PACKET_LIFETIME_FACTOR: u64 = 2; // x REXMIT_TIME per allowed rexmit

// Frame kinds (0-2 valid; anything else is dropped)
pub const FRAME_ADV: u8 = 0;
pub const FRAME_DATA: u8 = 1;
pub const FRAME_ACK: u8 = 2;

// DATA header flags
pub const DATA_FLAG_DUMMY: u8 = 0x01;

/// Routing metric: distance to the sink in link-estimate units.
pub type Rtmetric = u16;

/// Application payload carried by DATA frames.
pub type Payload = Vec<u8>;

/// Two-byte link-layer address.
///
/// `00.00` is reserved as the null address and never identifies a node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Addr(pub [u8; 2]);

impl Addr {
    /// The null address.
    pub const NULL: Addr = Addr([0, 0]);

    pub const fn new(hi: u8, lo: u8) -> Self {
        Addr([hi, lo])
    }

    pub const fn from_u16(v: u16) -> Self {
        Addr(v.to_be_bytes())
    }

    pub const fn to_u16(self) -> u16 {
        u16::from_be_bytes(self.0)
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0[0], self.0[1])
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Flags carried in a per-hop ACK.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct AckFlags(u8);

impl AckFlags {
    /// Receiver queue is at least half full.
    pub const CONGESTED: AckFlags = AckFlags(0x80);
    /// Receiver did not accept the packet.
    pub const DROPPED: AckFlags = AckFlags(0x40);
    /// Packet cannot travel further (TTL exhausted or no route).
    pub const LIFETIME_EXCEEDED: AckFlags = AckFlags(0x20);
    /// Sender advertised a metric that would create a loop.
    pub const RTMETRIC_NEEDS_UPDATE: AckFlags = AckFlags(0x10);

    const KNOWN: u8 = 0xF0;

    pub const fn empty() -> Self {
        AckFlags(0)
    }

    /// Build from wire bits, discarding unknown bits.
    pub const fn from_bits(bits: u8) -> Self {
        AckFlags(bits & Self::KNOWN)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: AckFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: AckFlags) {
        self.0 |= other.0;
    }

    pub const fn union(self, other: AckFlags) -> Self {
        AckFlags(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for AckFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_set();
        if self.contains(Self::CONGESTED) {
            list.entry(&"CONGESTED");
        }
        if self.contains(Self::DROPPED) {
            list.entry(&"DROPPED");
        }
        if self.contains(Self::LIFETIME_EXCEEDED) {
            list.entry(&"LIFETIME_EXCEEDED");
        }
        if self.contains(Self::RTMETRIC_NEEDS_UPDATE) {
            list.entry(&"RTMETRIC_NEEDS_UPDATE");
        }
        list.finish()
    }
}

/// DATA frame: collect header plus the attribute sub-header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataFrame {
    /// Per-hop reliable sequence, matched by the ACK.
    pub packet_id: u8,
    /// Originator of the packet.
    pub esender: Addr,
    /// Originator's end-to-end sequence number.
    pub eseqno: u8,
    /// Remaining hop budget.
    pub ttl: u8,
    /// Retransmission budget for each hop.
    pub max_rexmits: u8,
    pub flags: u8,
    pub hops: u8,
    /// Metric of the node that transmitted this hop.
    pub rtmetric: Rtmetric,
    pub payload: Payload,
}

impl DataFrame {
    /// Keepalives and probes carry no application data.
    pub fn is_dummy(&self) -> bool {
        self.flags & DATA_FLAG_DUMMY != 0
    }
}

/// Per-hop acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckFrame {
    pub packet_id: u8,
    pub flags: AckFlags,
    /// Metric of the acknowledging node.
    pub rtmetric: Rtmetric,
}

/// Protocol counters.
///
/// All counters saturate rather than wrap.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// DATA transmissions handed to the link layer (including retransmissions).
    pub datasent: u32,
    /// DATA frames received from neighbors.
    pub datarecv: u32,
    /// Matching ACKs received.
    pub ackrecv: u32,
    /// ACKs that did not match the in-flight packet.
    pub badack: u32,
    /// ACKs sent.
    pub acksent: u32,
    /// Duplicate DATA frames suppressed.
    pub duprecv: u32,
    /// Packets dropped because the send queue was full.
    pub qdrop: u32,
    /// Packets dropped because their TTL was exhausted.
    pub ttldrop: u32,
    /// Packets dropped because this node had no route.
    pub rtmetricdrop: u32,
    /// Packets that exhausted their retransmission budget.
    pub timedout: u32,
    /// Retransmissions.
    pub rexmit: u32,
    /// ACKs reporting that the receiver dropped our packet.
    pub ackdrop: u32,
    /// ACKs reporting receiver congestion.
    pub ackcongestion: u32,
    /// Transitions from no parent to a parent.
    pub foundroute: u32,
    /// Transitions from a parent to no parent.
    pub routelost: u32,
    /// Parent switches.
    pub newparent: u32,
    /// Received packets whose sender metric indicated a loop.
    pub loopdetect: u32,
    /// Queued packets purged after their lifetime expired.
    pub qexpired: u32,
    /// Frames that failed to decode.
    pub badframe: u32,
    /// Proactive probes sent.
    pub probes: u32,
    /// Keepalive dummies queued.
    pub keepalives: u32,
    /// Frames the link layer queue refused (not counted as sent).
    pub txqfull: u32,
}

/// Increment a stats counter without wrapping.
macro_rules! bump {
    ($stats:expr, $field:ident) => {
        $stats.$field = $stats.$field.saturating_add(1)
    };
}
pub(crate) use bump;

/// Events emitted by the connection for application handling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Data delivered at the sink.
    Received {
        /// Node that originated the packet.
        originator: Addr,
        /// Originator's end-to-end sequence number.
        seqno: u8,
        /// Radio hops traversed.
        hops: u8,
        payload: Payload,
    },
    /// A packet this node originated exhausted its retransmission budget.
    SendTimedOut { seqno: u8 },
    /// Parent changed, was found, or was lost.
    ParentChanged {
        parent: Option<Addr>,
        rtmetric: Rtmetric,
    },
}

/// Outcome of a successful `send`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// Packet queued for transmission toward the sink.
    Queued,
    /// This node is the sink; the packet was delivered immediately.
    DeliveredLocally,
}

/// Error type for connection operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The send queue has no free slot.
    QueueFull,
    /// Payload does not fit in a frame.
    MessageTooLarge,
    /// The connection has been closed.
    Closed,
    /// A retransmission budget of zero was requested.
    InvalidMaxRexmits,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::QueueFull => write!(f, "send queue full"),
            Error::MessageTooLarge => write!(f, "message too large"),
            Error::Closed => write!(f, "connection closed"),
            Error::InvalidMaxRexmits => write!(f, "max_rexmits must be at least 1"),
        }
    }
}

impl core::error::Error for Error {}
