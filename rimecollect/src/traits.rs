//! Platform abstraction: link layer, time and randomness.
//!
//! These traits let the same connection run on:
//! - A real MAC/RDC driver (CSMA with link-layer ACKs, duty-cycled radios)
//! - The deterministic simulator
//! - Hand-driven mocks in unit tests

use alloc::vec::Vec;
use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::types::{Addr, Event, Payload};

/// Queue size for transport channels.
pub(crate) const TRANSPORT_QUEUE_SIZE: usize = 8;

/// Queue size for application-level channels.
pub(crate) const APP_QUEUE_SIZE: usize = 8;

/// Queue size for the event channel.
pub(crate) const EVENT_QUEUE_SIZE: usize = 16;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// Result of one unicast handed to the link layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// Link-layer ACK received.
    Ok,
    /// No link-layer ACK after all attempts.
    NoAck,
    /// Channel busy on every attempt.
    Collision,
    /// Driver error.
    Err,
}

/// Upcalls from the link layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// A frame arrived from a one-hop neighbor.
    Received { from: Addr, data: Vec<u8> },
    /// A unicast DATA frame finished at the link layer after
    /// `transmissions` attempts.
    Sent {
        to: Addr,
        transmissions: u8,
        status: TxStatus,
    },
}

/// A frame for the link layer. `dest == None` is a broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingFrame {
    pub dest: Option<Addr>,
    pub data: Vec<u8>,
}

/// Link events delivered to the connection.
pub type TransportInChannel = Channel<ChannelMutex, LinkEvent, TRANSPORT_QUEUE_SIZE>;

/// Frames handed to the link layer.
pub type TransportOutChannel = Channel<ChannelMutex, OutgoingFrame, TRANSPORT_QUEUE_SIZE>;

/// Application request to originate a packet toward the sink.
#[derive(Debug, Clone)]
pub struct OutgoingData {
    pub payload: Payload,
    /// Per-hop retransmission budget.
    pub max_rexmits: u8,
}

/// Application-level outgoing data channel.
pub type AppOutChannel = Channel<ChannelMutex, OutgoingData, APP_QUEUE_SIZE>;

/// Protocol event channel.
pub type EventChannel = Channel<ChannelMutex, Event, EVENT_QUEUE_SIZE>;

/// Link-layer transport.
///
/// Two outgoing channels separate traffic by completion semantics:
/// control frames (advertisements, ACKs) are fire-and-forget, while every
/// DATA frame on `data_outgoing` must eventually produce one
/// `LinkEvent::Sent`. The connection guards against a driver that never
/// reports back with a long defensive timeout.
pub trait Transport {
    /// Maximum frame size in bytes.
    fn mtu(&self) -> usize;

    /// This node's link address.
    fn local_addr(&self) -> Addr;

    /// Broadcast advertisements and unicast ACKs.
    fn control_outgoing(&self) -> &TransportOutChannel;

    /// Unicast DATA frames.
    fn data_outgoing(&self) -> &TransportOutChannel;

    /// Received frames and send completions.
    fn incoming(&self) -> &TransportInChannel;
}

/// Monotonic time source.
pub trait Clock {
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    fn now(&self) -> Timestamp;

    /// Sleep until the given time.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Random number source for timer jitter.
pub trait Random {
    /// Uniform value in `[min, max)`. Returns `min` when the range is empty.
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations for unit tests.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use core::cell::Cell;
    use core::future::{ready, Ready};

    use super::*;
    use crate::wire::{Decode, Envelope, Frame};

    pub struct MockTransport {
        mtu: usize,
        addr: Addr,
        control: TransportOutChannel,
        data: TransportOutChannel,
        incoming: TransportInChannel,
    }

    impl MockTransport {
        pub fn new(addr: Addr) -> Self {
            Self::with_mtu(addr, 127)
        }

        pub fn with_mtu(addr: Addr, mtu: usize) -> Self {
            Self {
                mtu,
                addr,
                control: Channel::new(),
                data: Channel::new(),
                incoming: Channel::new(),
            }
        }

        /// Queue a received frame for the `run()` loop.
        pub fn inject_rx(&self, from: Addr, data: Vec<u8>) {
            let _ = self.incoming.try_send(LinkEvent::Received { from, data });
        }

        /// Drain frames sent on the control channel.
        pub fn take_control(&self) -> Vec<OutgoingFrame> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.control.try_receive() {
                frames.push(frame);
            }
            frames
        }

        /// Drain frames sent on the data channel.
        pub fn take_data(&self) -> Vec<OutgoingFrame> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.data.try_receive() {
                frames.push(frame);
            }
            frames
        }

        /// Drain the control channel and decode the ACKs in it.
        pub fn take_acks(&self) -> Vec<(Addr, crate::types::AckFrame)> {
            self.take_control()
                .into_iter()
                .filter_map(|f| match Envelope::decode_from_slice(&f.data) {
                    Ok(Envelope {
                        frame: Frame::Ack(ack),
                        ..
                    }) => Some((f.dest?, ack)),
                    _ => None,
                })
                .collect()
        }
    }

    impl Transport for MockTransport {
        fn mtu(&self) -> usize {
            self.mtu
        }

        fn local_addr(&self) -> Addr {
            self.addr
        }

        fn control_outgoing(&self) -> &TransportOutChannel {
            &self.control
        }

        fn data_outgoing(&self) -> &TransportOutChannel {
            &self.data
        }

        fn incoming(&self) -> &TransportInChannel {
            &self.incoming
        }
    }

    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
            // Tests advance time by hand.
            ready(())
        }
    }

    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            // Simple LCG
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            if max <= min {
                return min;
            }
            min + (self.state % (max - min))
        }
    }
}
