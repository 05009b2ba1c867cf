//! Collect connection: the per-channel protocol state machine.
//!
//! `CollectConn` owns its neighbor table, send queue, duplicate ring and
//! timers. It is fully event-driven:
//! - Link-layer upcalls (`LinkEvent`) drive receive, forward and ACK handling
//! - Application sends enqueue packets toward the sink
//! - Timer deadlines drive retransmission, advertisements, keepalives,
//!   proactive probing and neighbor aging
//!
//! Each event is handled to completion before the next one is taken, either
//! by `run()` or by calling the `handle_*` methods directly.
//!
//! # Usage
//!
//! ```ignore
//! let mut conn = CollectConn::<_, _, _, DefaultConfig>::open(transport, random, clock, 130, true);
//!
//! // Spawn the connection's run loop
//! spawn(async move {
//!     conn.run().await;
//! });
//!
//! // Originate data toward the sink
//! conn.outgoing().send(OutgoingData { payload, max_rexmits: 4 }).await;
//!
//! // At the sink, consume deliveries
//! let event = conn.events().receive().await;
//! ```

use core::marker::PhantomData;

use embassy_sync::channel::Channel;

use crate::collections::{BoundedQueue, RecentRing};
use crate::config::{CollectConfig, DefaultConfig};
use crate::neighbor::NeighborTable;
use crate::time::{earliest, Duration, Timer, Timestamp};
use crate::traits::{
    AppOutChannel, Clock, EventChannel, LinkEvent, OutgoingData, OutgoingFrame, Random, Transport,
};
use crate::types::{
    bump, Addr, CollectStats, DataFrame, Error, Event, Payload, Rtmetric, SendStatus,
    ANNOUNCE_MIN_INTERVAL, FORWARD_PACKET_LIFETIME_FACTOR, MAX_REXMITS, NEIGHBOR_TICK,
    PROACTIVE_PROBING_INTERVAL, RTMETRIC_MAX, RTMETRIC_SINK,
};
use crate::wire::{peek_channel, Decode, Encode, Envelope, Frame, DATA_OVERHEAD};

#[cfg(any(test, feature = "debug"))]
use crate::debug::{DebugChannel, DebugEvent};

/// A packet waiting in (or at the head of) the send queue.
#[derive(Clone, Debug)]
pub struct QueuedPacket {
    /// Frame to transmit. `packet_id` and `rtmetric` are stamped per attempt.
    pub frame: DataFrame,
    /// Purged if still queued (and not in flight) after this time.
    pub expires_at: Timestamp,
    /// Next hop fixed at enqueue time (proactive probes).
    pub pinned: Option<Addr>,
    /// Application data this node originated.
    pub originated: bool,
}

/// The collect protocol instance for one channel.
///
/// Generic over:
/// - `T`: Transport implementation
/// - `R`: Random number generator
/// - `Clk`: Clock implementation
/// - `Cfg`: Memory and timing configuration
pub struct CollectConn<T, R, Clk, Cfg = DefaultConfig> {
    // Dependencies (injected)
    pub(crate) transport: T,
    pub(crate) random: R,
    pub(crate) clock: Clk,

    // Application-level channels
    pub(crate) app_outgoing: AppOutChannel,
    pub(crate) events: EventChannel,
    #[cfg(any(test, feature = "debug"))]
    pub(crate) debug: DebugChannel,

    // Identity and role
    pub(crate) channel: u16,
    pub(crate) addr: Addr,
    pub(crate) is_router: bool,
    pub(crate) is_sink: bool,
    pub(crate) closed: bool,

    // Routing
    pub(crate) rtmetric: Rtmetric,
    pub(crate) parent: Option<Addr>,
    pub(crate) neighbors: NeighborTable,

    // Reliable transport
    pub(crate) send_queue: BoundedQueue<QueuedPacket>,
    pub(crate) current_parent: Option<Addr>,
    pub(crate) eseqno: u8,
    pub(crate) seqno: u8,
    pub(crate) transmissions: u8,
    pub(crate) sending: bool,
    pub(crate) awaiting_sent: bool,

    // Duplicate suppression
    pub(crate) recent: RecentRing<(Addr, u8)>,

    // Timers
    pub(crate) rexmit_timer: Timer,
    pub(crate) announce_timer: Timer,
    pub(crate) announce_interval: Duration,
    pub(crate) keepalive_timer: Timer,
    pub(crate) keepalive_period: Duration,
    pub(crate) probe_timer: Timer,
    pub(crate) tick_timer: Timer,

    pub(crate) stats: CollectStats,

    _config: PhantomData<Cfg>,
}

impl<T, R, Clk, Cfg> CollectConn<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: CollectConfig,
{
    /// Open a connection on `channel`.
    ///
    /// The node starts without a route (`RTMETRIC_MAX`) and learns one from
    /// neighbor advertisements. Non-routers originate traffic but never
    /// forward for others.
    pub fn open(transport: T, random: R, clock: Clk, channel: u16, is_router: bool) -> Self {
        let now = clock.now();
        let addr = transport.local_addr();

        let mut conn = Self {
            transport,
            random,
            clock,

            app_outgoing: Channel::new(),
            events: Channel::new(),
            #[cfg(any(test, feature = "debug"))]
            debug: Channel::new(),

            channel,
            addr,
            is_router,
            is_sink: false,
            closed: false,

            rtmetric: RTMETRIC_MAX,
            parent: None,
            neighbors: NeighborTable::new(Cfg::MAX_NEIGHBORS),

            send_queue: BoundedQueue::with_max_capacity(Cfg::MAX_SENDING_QUEUE),
            current_parent: None,
            eseqno: 0,
            seqno: 0,
            transmissions: 0,
            sending: false,
            awaiting_sent: false,

            recent: RecentRing::with_capacity(Cfg::NUM_RECENT_PACKETS),

            rexmit_timer: Timer::stopped(),
            announce_timer: Timer::stopped(),
            announce_interval: ANNOUNCE_MIN_INTERVAL,
            keepalive_timer: Timer::stopped(),
            keepalive_period: Duration::ZERO,
            probe_timer: Timer::stopped(),
            tick_timer: Timer::stopped(),

            stats: CollectStats::default(),

            _config: PhantomData,
        };

        let first_adv = conn.random_below(ANNOUNCE_MIN_INTERVAL);
        conn.announce_timer.set(now, first_adv);
        conn.tick_timer.set(now, NEIGHBOR_TICK);
        conn.schedule_probe(now);

        log::debug!("collect {} opened on channel {}", addr, channel);
        conn
    }

    /// Stop all timers and discard queued packets.
    ///
    /// A closed connection ignores further link events and rejects sends.
    pub fn close(&mut self) {
        self.rexmit_timer.stop();
        self.announce_timer.stop();
        self.keepalive_timer.stop();
        self.probe_timer.stop();
        self.tick_timer.stop();
        self.send_queue.clear();
        self.sending = false;
        self.awaiting_sent = false;
        self.transmissions = 0;
        self.closed = true;
        log::debug!("collect {} closed", self.addr);
    }

    /// This node's link address.
    pub fn addr(&self) -> Addr {
        self.addr
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    /// Current routing metric: 0 at the sink, `RTMETRIC_MAX` without a route.
    pub fn depth(&self) -> Rtmetric {
        self.rtmetric
    }

    /// Preferred next hop toward the sink.
    pub fn parent(&self) -> Option<Addr> {
        self.parent
    }

    pub fn is_sink(&self) -> bool {
        self.is_sink
    }

    pub fn is_router(&self) -> bool {
        self.is_router
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True while a packet is outstanding.
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// Link-layer attempts spent on the in-flight packet.
    pub fn transmissions(&self) -> u8 {
        self.transmissions
    }

    pub fn queue_len(&self) -> usize {
        self.send_queue.len()
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn stats(&self) -> &CollectStats {
        &self.stats
    }

    pub fn keepalive(&self) -> Duration {
        self.keepalive_period
    }

    /// Channel for protocol events (deliveries, timeouts, parent changes).
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Channel for originating data from another task while `run()` is active.
    pub fn outgoing(&self) -> &AppOutChannel {
        &self.app_outgoing
    }

    #[cfg(any(test, feature = "debug"))]
    pub fn debug_channel(&self) -> &DebugChannel {
        &self.debug
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    /// Send `payload` toward the sink with a per-hop budget of `max_rexmits`.
    ///
    /// At the sink the payload is delivered immediately as an
    /// `Event::Received` with zero hops. Budgets above `MAX_REXMITS` are
    /// clamped.
    pub fn send(&mut self, payload: Payload, max_rexmits: u8) -> Result<SendStatus, Error> {
        let now = self.clock.now();
        self.handle_app_send(
            OutgoingData {
                payload,
                max_rexmits,
            },
            now,
        )
    }

    /// Make this node the sink, or revert to an ordinary router.
    ///
    /// Becoming the sink discards queued packets, cancels any retransmission
    /// and announces metric 0 right away. Leaving the sink role drops back to
    /// `RTMETRIC_MAX` until advertisements provide a parent. Ignored once
    /// closed.
    pub fn set_sink(&mut self, is_sink: bool) {
        if self.closed {
            return;
        }
        let now = self.clock.now();
        if is_sink {
            self.is_sink = true;
            self.is_router = true;
            self.send_queue.clear();
            self.rexmit_timer.stop();
            self.sending = false;
            self.awaiting_sent = false;
            self.transmissions = 0;
            self.current_parent = None;
            self.parent = None;
            self.set_rtmetric(RTMETRIC_SINK, now);
        } else {
            self.is_sink = false;
            self.set_rtmetric(RTMETRIC_MAX, now);
            self.update_rtmetric(now);
        }
        self.bump_advertisement(now);
    }

    /// Enable keepalives every `period` (jittered); zero disables them.
    /// Ignored once closed.
    pub fn set_keepalive(&mut self, period: Duration) {
        if self.closed {
            return;
        }
        let now = self.clock.now();
        self.keepalive_period = period;
        if period.is_zero() {
            self.keepalive_timer.stop();
        } else {
            let delay = self.jitter(period);
            self.keepalive_timer.set(now, delay);
        }
    }

    /// Run the connection's main loop.
    ///
    /// Handles link upcalls, application sends from `outgoing()` and timer
    /// deadlines, one at a time, forever. Call this from an async
    /// task/executor.
    pub async fn run(&mut self) -> ! {
        use embassy_futures::select::{select3, Either3};

        loop {
            let wake = self
                .next_wakeup()
                .unwrap_or_else(|| self.clock.now() + Duration::from_secs(60));

            let result = select3(
                self.transport.incoming().receive(),
                self.app_outgoing.receive(),
                self.clock.sleep_until(wake),
            )
            .await;

            let now = self.clock.now();
            match result {
                Either3::First(event) => self.handle_link_event(event, now),
                Either3::Second(data) => {
                    if let Err(e) = self.handle_app_send(data, now) {
                        log::warn!("collect {}: send rejected: {}", self.addr, e);
                    }
                }
                Either3::Third(()) => self.handle_timer(now),
            }
        }
    }

    /// Earliest armed timer deadline.
    pub fn next_wakeup(&self) -> Option<Timestamp> {
        earliest([
            self.rexmit_timer.deadline(),
            self.announce_timer.deadline(),
            self.keepalive_timer.deadline(),
            self.probe_timer.deadline(),
            self.tick_timer.deadline(),
        ])
    }

    /// Handle one link-layer upcall.
    pub fn handle_link_event(&mut self, event: LinkEvent, now: Timestamp) {
        if self.closed {
            return;
        }
        match event {
            LinkEvent::Received { from, data } => self.handle_transport_rx(from, &data, now),
            LinkEvent::Sent {
                to,
                transmissions,
                status,
            } => self.handle_sent(to, transmissions, status, now),
        }
    }

    /// Handle a frame received from `from`.
    pub fn handle_transport_rx(&mut self, from: Addr, data: &[u8], now: Timestamp) {
        if self.closed || from.is_null() || from == self.addr {
            return;
        }
        if peek_channel(data) != Some(self.channel) {
            return;
        }

        let envelope = match Envelope::decode_from_slice(data) {
            Ok(e) => e,
            Err(e) => {
                bump!(self.stats, badframe);
                log::warn!("collect {}: bad frame from {}: {}", self.addr, from, e);
                emit_debug!(
                    self,
                    DebugEvent::FrameDecodeFailed {
                        from,
                        data_len: data.len(),
                    }
                );
                return;
            }
        };

        match envelope.frame {
            Frame::Adv { rtmetric } => self.handle_adv(from, rtmetric, now),
            Frame::Data(frame) => self.handle_data(from, frame, now),
            Frame::Ack(ack) => self.handle_ack(from, ack, now),
        }
    }

    /// Originate application data.
    pub fn handle_app_send(
        &mut self,
        data: OutgoingData,
        now: Timestamp,
    ) -> Result<SendStatus, Error> {
        let OutgoingData {
            payload,
            max_rexmits,
        } = data;

        if self.closed {
            return Err(Error::Closed);
        }
        if max_rexmits == 0 {
            return Err(Error::InvalidMaxRexmits);
        }
        if payload.len() + DATA_OVERHEAD > self.transport.mtu() {
            return Err(Error::MessageTooLarge);
        }
        let max_rexmits = max_rexmits.min(MAX_REXMITS);
        let seqno = self.eseqno;

        if self.is_sink {
            self.eseqno = self.eseqno.wrapping_add(1);
            self.emit_event(Event::Received {
                originator: self.addr,
                seqno,
                hops: 0,
                payload,
            });
            return Ok(SendStatus::DeliveredLocally);
        }

        let packet = QueuedPacket {
            frame: DataFrame {
                packet_id: 0,
                esender: self.addr,
                eseqno: seqno,
                ttl: Cfg::MAX_HOPLIM,
                max_rexmits,
                flags: 0,
                hops: 1,
                rtmetric: self.rtmetric,
                payload,
            },
            expires_at: now + self.packet_lifetime(max_rexmits),
            pinned: None,
            originated: true,
        };

        if self.send_queue.push_back(packet).is_err() {
            bump!(self.stats, qdrop);
            log::warn!("collect {}: send queue full", self.addr);
            return Err(Error::QueueFull);
        }
        self.eseqno = self.eseqno.wrapping_add(1);
        log::trace!("collect {}: queued seqno {}", self.addr, seqno);

        self.send_queued_packet(now);
        Ok(SendStatus::Queued)
    }

    /// Fire every expired timer, in a fixed order.
    pub fn handle_timer(&mut self, now: Timestamp) {
        if self.closed {
            return;
        }
        if self.rexmit_timer.take_expired(now) {
            self.handle_rexmit_timer(now);
        }
        if self.announce_timer.take_expired(now) {
            self.handle_announce_timer(now);
        }
        if self.tick_timer.take_expired(now) {
            self.handle_neighbor_tick(now);
        }
        if self.keepalive_timer.take_expired(now) {
            self.handle_keepalive_timer(now);
        }
        if self.probe_timer.take_expired(now) {
            self.handle_probe_timer(now);
        }
        self.purge_expired(now);
    }

    // --- Helpers shared by the protocol modules ---

    /// Half-to-full of `interval`.
    pub(crate) fn jitter(&mut self, interval: Duration) -> Duration {
        let half = interval.half();
        let extra = self.random.gen_range(0, half.as_millis());
        half + Duration::from_millis(extra)
    }

    /// Uniform in `[0, interval)`.
    pub(crate) fn random_below(&mut self, interval: Duration) -> Duration {
        Duration::from_millis(self.random.gen_range(0, interval.as_millis()))
    }

    pub(crate) fn packet_lifetime(&self, max_rexmits: u8) -> Duration {
        Cfg::REXMIT_TIME * FORWARD_PACKET_LIFETIME_FACTOR * u64::from(max_rexmits)
    }

    pub(crate) fn schedule_probe(&mut self, now: Timestamp) {
        let delay = Duration::from_millis(
            self.random
                .gen_range(1, PROACTIVE_PROBING_INTERVAL.as_millis()),
        );
        self.probe_timer.set(now, delay);
    }

    /// Metric to advertise; non-routers never offer a route.
    pub(crate) fn advertised_rtmetric(&self) -> Rtmetric {
        if self.is_router {
            self.rtmetric
        } else {
            RTMETRIC_MAX
        }
    }

    pub(crate) fn emit_event(&self, event: Event) {
        if self.events.try_send(event).is_err() {
            log::warn!("collect {}: event channel full, dropping event", self.addr);
        }
    }

    /// Hand a control frame (ADV or ACK) to the link layer.
    ///
    /// Returns false if the control queue was full and the frame was dropped.
    pub(crate) fn send_control(&mut self, dest: Option<Addr>, frame: Frame) -> bool {
        let data = Envelope::new(self.channel, frame).encode_to_vec();
        if self
            .transport
            .control_outgoing()
            .try_send(OutgoingFrame { dest, data })
            .is_err()
        {
            bump!(self.stats, txqfull);
            log::warn!("collect {}: control queue full", self.addr);
            return false;
        }
        true
    }
}


#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::test_util::*;
    use super::*;
    use crate::traits::test_impls::{MockClock, MockRandom, MockTransport};
    use crate::types::{AckFlags, INITIAL_LINK_ESTIMATE};

    #[test]
    fn test_open_without_route() {
        let c = conn(1);
        assert_eq!(c.depth(), RTMETRIC_MAX);
        assert_eq!(c.parent(), None);
        assert!(!c.is_sending());
        assert!(c.next_wakeup().is_some());
    }

    #[test]
    fn test_sink_delivers_locally() {
        let mut c = conn(1);
        c.set_sink(true);
        assert_eq!(c.depth(), RTMETRIC_SINK);

        assert_eq!(c.send(b"hi".to_vec(), 4), Ok(SendStatus::DeliveredLocally));
        assert_eq!(
            take_events(&c),
            vec![Event::Received {
                originator: addr(1),
                seqno: 0,
                hops: 0,
                payload: b"hi".to_vec(),
            }]
        );
        assert!(take_data(&c).is_empty());
    }

    #[test]
    fn test_send_without_route_enqueues() {
        let mut c = conn(1);
        assert_eq!(c.send(b"a".to_vec(), 4), Ok(SendStatus::Queued));
        assert_eq!(c.queue_len(), 1);
        assert!(!c.is_sending());
        assert!(take_data(&c).is_empty());
        assert_eq!(c.depth(), RTMETRIC_MAX);
    }

    #[test]
    fn test_route_appearing_flushes_queue() {
        let mut c = conn(1);
        c.send(b"a".to_vec(), 4).unwrap();

        let now = at(&c, 100);
        adv(&mut c, addr(9), RTMETRIC_SINK, now);

        assert_eq!(c.depth(), INITIAL_LINK_ESTIMATE);
        let frames = take_data(&c);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, addr(9));
        assert_eq!(frames[0].1.hops, 1);
        assert_eq!(frames[0].1.ttl, DefaultConfig::MAX_HOPLIM);
    }

    #[test]
    fn test_send_validation() {
        let mut c = conn(1);
        assert_eq!(c.send(b"a".to_vec(), 0), Err(Error::InvalidMaxRexmits));
        assert_eq!(c.send(vec![0; 200], 4), Err(Error::MessageTooLarge));

        c.close();
        assert_eq!(c.send(b"a".to_vec(), 4), Err(Error::Closed));
        assert_eq!(c.next_wakeup(), None);
    }

    #[test]
    fn test_close_discards_in_flight_packet() {
        let mut c = conn_with_sink(1, addr(9));
        c.send(b"a".to_vec(), 4).unwrap();
        c.send(b"b".to_vec(), 4).unwrap();
        assert!(c.is_sending());
        assert_eq!(c.queue_len(), 2);
        take_data(&c);

        c.close();
        assert_eq!(c.queue_len(), 0);
        assert!(!c.is_sending());
        assert_eq!(c.next_wakeup(), None);

        // Late completions for the discarded packet change nothing.
        let now = at(&c, 10);
        sent(&mut c, addr(9), 1, now);
        ack(&mut c, addr(9), 0, AckFlags::empty(), RTMETRIC_SINK, now);
        assert_eq!(c.stats().ackrecv, 0);
        assert_eq!(c.transmissions(), 0);
        assert!(!c.is_sending());
        assert!(take_data(&c).is_empty());
        assert!(take_events(&c).is_empty());
        assert_eq!(c.next_wakeup(), None);
    }

    #[test]
    fn test_closed_connection_stays_idle() {
        let mut c = conn(1);
        c.close();
        c.set_keepalive(Duration::from_secs(10));
        c.set_sink(true);
        assert_eq!(c.next_wakeup(), None);
        assert!(!c.is_sink());

        let now = at(&c, 20_000);
        c.handle_timer(now);
        assert_eq!(c.next_wakeup(), None);
        assert!(take_advs(&c).is_empty());
    }

    #[test]
    fn test_max_rexmits_clamped() {
        let mut c = conn_with_sink(1, addr(9));
        c.send(b"a".to_vec(), 200).unwrap();
        let frames = take_data(&c);
        assert_eq!(frames[0].1.max_rexmits, MAX_REXMITS);
    }

    #[test]
    fn test_queue_full() {
        let mut c = conn(1);
        for _ in 0..DefaultConfig::MAX_SENDING_QUEUE {
            c.send(b"a".to_vec(), 4).unwrap();
        }
        assert_eq!(c.send(b"a".to_vec(), 4), Err(Error::QueueFull));
        assert_eq!(c.stats().qdrop, 1);
    }

    #[test]
    fn test_other_channel_ignored() {
        let mut c = conn(1);
        let data = Envelope::new(CHANNEL + 1, Frame::Adv { rtmetric: 0 }).encode_to_vec();
        c.handle_transport_rx(addr(2), &data, Timestamp::ZERO);
        assert!(c.neighbors().is_empty());
        assert_eq!(c.stats().badframe, 0);
    }

    #[test]
    fn test_bad_frame_counted() {
        let mut c = conn(1);
        c.handle_transport_rx(addr(2), &[0, CHANNEL as u8, 7], Timestamp::ZERO);
        assert_eq!(c.stats().badframe, 1);
    }

    #[test]
    fn test_non_router_advertises_max() {
        let mut c: TestConn = CollectConn::open(
            MockTransport::new(addr(1)),
            MockRandom::new(),
            MockClock::new(),
            CHANNEL,
            false,
        );
        let now = at(&c, 0);
        adv(&mut c, addr(9), RTMETRIC_SINK, now);
        assert!(c.depth() < RTMETRIC_MAX);
        take_events(&c);

        let now = at(&c, 5_000);
        c.handle_timer(now);
        let advs = take_advs(&c);
        assert!(!advs.is_empty());
        assert!(advs.iter().all(|&m| m == RTMETRIC_MAX));
    }

    #[test]
    fn test_set_sink_purges_queue() {
        let mut c = conn_with_sink(1, addr(9));
        c.send(b"a".to_vec(), 4).unwrap();
        c.send(b"b".to_vec(), 4).unwrap();
        assert!(c.is_sending());

        c.set_sink(true);
        assert_eq!(c.queue_len(), 0);
        assert!(!c.is_sending());
        assert_eq!(c.parent(), None);
        assert_eq!(c.depth(), RTMETRIC_SINK);

        c.set_sink(false);
        // The old parent is still in the table.
        assert_eq!(c.parent(), Some(addr(9)));
        assert!(c.depth() < RTMETRIC_MAX);
    }

    #[test]
    fn test_keepalive_toggle() {
        let mut c = conn(1);
        c.set_keepalive(Duration::from_secs(10));
        assert_eq!(c.keepalive(), Duration::from_secs(10));
        assert!(c.keepalive_timer.is_running());
        c.set_keepalive(Duration::ZERO);
        assert!(!c.keepalive_timer.is_running());
    }
}
