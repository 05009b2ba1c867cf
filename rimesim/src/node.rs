//! SimNode wrapper for simulated collect nodes.

use std::cell::Cell;
use std::future::{ready, Ready};

use embassy_sync::channel::Channel;
use rimecollect::config::DefaultConfig;
use rimecollect::debug::DebugEvent;
use rimecollect::traits::{TransportInChannel, TransportOutChannel};
use rimecollect::{
    Addr, Clock, CollectConn, Duration, Error, Event, LinkEvent, OutgoingData, OutgoingFrame,
    Random, Rtmetric, SendStatus, Timestamp, Transport, TxStatus,
};

/// Channel number every simulated node opens.
pub const SIM_CHANNEL: u16 = 130;

/// Frame size of the simulated radio (IEEE 802.15.4).
pub const SIM_MTU: usize = 127;

/// Link layer for simulation.
///
/// Frames the connection hands down stay in the outgoing channels until
/// the simulator takes them and routes them through the topology.
pub struct SimTransport {
    mtu: usize,
    addr: Addr,
    control: TransportOutChannel,
    data: TransportOutChannel,
    incoming: TransportInChannel,
}

impl SimTransport {
    pub fn new(addr: Addr) -> Self {
        Self {
            mtu: SIM_MTU,
            addr,
            control: Channel::new(),
            data: Channel::new(),
            incoming: Channel::new(),
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Take pending advertisements and ACKs.
    pub fn take_control(&self) -> Vec<OutgoingFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.control.try_receive() {
            frames.push(frame);
        }
        frames
    }

    /// Take pending unicast DATA frames.
    pub fn take_data(&self) -> Vec<OutgoingFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.data.try_receive() {
            frames.push(frame);
        }
        frames
    }
}

impl Transport for SimTransport {
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

/// Mock clock for simulation.
///
/// Time is controlled externally by the simulator.
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::at(Timestamp::ZERO)
    }

    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Cell::new(time),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }

    pub fn advance(&self, duration: Duration) {
        self.current.set(self.current.get() + duration);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
        ready(())
    }
}

/// Mock random for simulation (deterministic LCG).
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn new() -> Self {
        Self { state: 12345 }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Default for SimRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        if max <= min {
            return min;
        }
        min + ((self.state >> 33) % (max - min))
    }
}

/// Type alias for simulated connections.
pub type SimConn = CollectConn<SimTransport, SimRandom, SimClock, DefaultConfig>;

/// Wrapper around a `CollectConn` for simulation.
///
/// Every entry point sets the node's clock to the simulated time before
/// calling into the connection, so code that reads `clock.now()` agrees with
/// the `now` passed to the handlers.
pub struct SimNode {
    inner: SimConn,
    /// When the node was created.
    pub created_at: Timestamp,
}

impl SimNode {
    /// Create a router node with a deterministic jitter seed.
    pub fn new(addr: Addr, seed: u64, created_at: Timestamp) -> Self {
        Self::with_role(addr, seed, created_at, true)
    }

    /// Create a node; non-routers originate traffic but never forward.
    pub fn with_role(addr: Addr, seed: u64, created_at: Timestamp, is_router: bool) -> Self {
        let transport = SimTransport::new(addr);
        let random = SimRandom::with_seed(seed);
        let clock = SimClock::at(created_at);
        let inner = CollectConn::open(transport, random, clock, SIM_CHANNEL, is_router);
        Self { inner, created_at }
    }

    pub fn addr(&self) -> Addr {
        self.inner.addr()
    }

    pub fn inner(&self) -> &SimConn {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut SimConn {
        &mut self.inner
    }

    pub fn depth(&self) -> Rtmetric {
        self.inner.depth()
    }

    pub fn parent(&self) -> Option<Addr> {
        self.inner.parent()
    }

    pub fn is_sink(&self) -> bool {
        self.inner.is_sink()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue_len()
    }

    /// Earliest time this node needs `handle_timer`.
    pub fn next_wakeup(&self) -> Option<Timestamp> {
        self.inner.next_wakeup()
    }

    /// Handle a frame received over the air.
    pub fn handle_frame(&mut self, from: Addr, data: Vec<u8>, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner
            .handle_link_event(LinkEvent::Received { from, data }, now);
    }

    /// Handle the link layer's completion of a unicast DATA frame.
    pub fn handle_sent(&mut self, to: Addr, transmissions: u8, status: TxStatus, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_link_event(
            LinkEvent::Sent {
                to,
                transmissions,
                status,
            },
            now,
        );
    }

    /// Handle timer events.
    pub fn handle_timer(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_timer(now);
    }

    /// Originate application data toward the sink.
    pub fn app_send(
        &mut self,
        payload: Vec<u8>,
        max_rexmits: u8,
        now: Timestamp,
    ) -> Result<SendStatus, Error> {
        self.inner.clock().set(now);
        self.inner.handle_app_send(
            OutgoingData {
                payload,
                max_rexmits,
            },
            now,
        )
    }

    pub fn set_sink(&mut self, is_sink: bool, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.set_sink(is_sink);
    }

    pub fn set_keepalive(&mut self, period: Duration, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.set_keepalive(period);
    }

    /// Take control frames first, then DATA frames.
    pub fn take_outgoing(&self) -> (Vec<OutgoingFrame>, Vec<OutgoingFrame>) {
        let transport = self.inner.transport();
        (transport.take_control(), transport.take_data())
    }

    /// Take all pending application events.
    pub fn take_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.inner.events().try_receive() {
            events.push(event);
        }
        events
    }

    /// Take all debug events from the connection's debug channel.
    pub fn take_debug_events(&self) -> Vec<DebugEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.inner.debug_channel().try_receive() {
            events.push(event);
        }
        events
    }
}
