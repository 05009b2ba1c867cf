//! Periodic maintenance: advertisements, neighbor aging, keepalives,
//! proactive probing and send-queue lifetime.

use alloc::vec::Vec;

use crate::config::CollectConfig;
use crate::conn::{CollectConn, QueuedPacket};
use crate::time::Timestamp;
use crate::traits::{Clock, Random, Transport};
use crate::types::{
    bump, Addr, DataFrame, Rtmetric, ANNOUNCE_MAX_INTERVAL, ANNOUNCE_MIN_INTERVAL,
    DATA_FLAG_DUMMY, KEEPALIVE_REXMITS, LINK_ESTIMATE_UNIT, NEIGHBOR_TICK,
    PROACTIVE_PROBING_REXMITS, RTMETRIC_MAX,
};
use crate::wire::Frame;

#[cfg(any(test, feature = "debug"))]
use crate::debug::DebugEvent;

/// Payload-free frame used by keepalives and probes.
///
/// A TTL of one keeps it from ever being forwarded.
pub(crate) fn dummy_frame(
    esender: Addr,
    eseqno: u8,
    max_rexmits: u8,
    rtmetric: Rtmetric,
) -> DataFrame {
    DataFrame {
        packet_id: 0,
        esender,
        eseqno,
        ttl: 1,
        max_rexmits,
        flags: DATA_FLAG_DUMMY,
        hops: 1,
        rtmetric,
        payload: Vec::new(),
    }
}

impl<T, R, Clk, Cfg> CollectConn<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: CollectConfig,
{
    /// Advertise soon and restart the interval back-off.
    pub(crate) fn bump_advertisement(&mut self, now: Timestamp) {
        self.announce_interval = ANNOUNCE_MIN_INTERVAL;
        let delay = self.random_below(ANNOUNCE_MIN_INTERVAL);
        self.announce_timer.set(now, delay);
    }

    pub(crate) fn handle_announce_timer(&mut self, now: Timestamp) {
        let rtmetric = self.advertised_rtmetric();
        self.send_control(None, Frame::Adv { rtmetric });
        log::trace!("collect {}: adv {}", self.addr, rtmetric);
        emit_debug!(
            self,
            DebugEvent::AdvSent {
                timestamp: now,
                rtmetric,
            }
        );

        self.announce_interval = (self.announce_interval * 2).min(ANNOUNCE_MAX_INTERVAL);
        let delay = self.jitter(self.announce_interval);
        self.announce_timer.set(now, delay);
    }

    pub(crate) fn handle_neighbor_tick(&mut self, now: Timestamp) {
        if self.neighbors.tick(Cfg::NEIGHBOR_MAX_AGE) > 0 {
            self.update_rtmetric(now);
        }
        self.tick_timer.set(now, NEIGHBOR_TICK);
    }

    fn is_idle(&self) -> bool {
        !self.sending && self.send_queue.is_empty()
    }

    pub(crate) fn handle_keepalive_timer(&mut self, now: Timestamp) {
        if self.keepalive_period.is_zero() {
            return;
        }
        let wanted = self.is_idle() && !self.is_sink && self.parent.is_some();
        if wanted && self.enqueue_dummy(KEEPALIVE_REXMITS, None, now) {
            bump!(self.stats, keepalives);
            log::trace!("collect {}: keepalive", self.addr);
            emit_debug!(self, DebugEvent::KeepaliveQueued { timestamp: now });
            self.send_queued_packet(now);
        }
        let delay = self.jitter(self.keepalive_period);
        self.keepalive_timer.set(now, delay);
    }

    /// Send a dummy to an unsampled neighbor that looks like a better
    /// parent, so its link gets an estimate before we need it.
    pub(crate) fn handle_probe_timer(&mut self, now: Timestamp) {
        self.schedule_probe(now);
        if !self.is_idle() || self.is_sink {
            return;
        }

        let own = self.rtmetric;
        let parent = self.parent;
        let candidate = self
            .neighbors
            .iter()
            .find(|n| {
                Some(n.addr) != parent
                    && n.le.sample_count() == 0
                    && n.rtmetric < RTMETRIC_MAX
                    && n.rtmetric.saturating_add(LINK_ESTIMATE_UNIT) < own
            })
            .map(|n| n.addr);
        let Some(candidate) = candidate else {
            return;
        };

        if self.enqueue_dummy(PROACTIVE_PROBING_REXMITS, Some(candidate), now) {
            bump!(self.stats, probes);
            log::debug!("collect {}: probing {}", self.addr, candidate);
            emit_debug!(
                self,
                DebugEvent::ProbeSent {
                    timestamp: now,
                    candidate,
                }
            );
            self.send_queued_packet(now);
        }
    }

    fn enqueue_dummy(&mut self, max_rexmits: u8, pinned: Option<Addr>, now: Timestamp) -> bool {
        let frame = dummy_frame(
            self.addr,
            self.eseqno.wrapping_sub(1),
            max_rexmits,
            self.rtmetric,
        );
        let packet = QueuedPacket {
            frame,
            expires_at: now + self.packet_lifetime(max_rexmits),
            pinned,
            originated: false,
        };
        self.send_queue.push_back(packet).is_ok()
    }

    /// Drop queued packets past their lifetime. The in-flight head stays.
    pub(crate) fn purge_expired(&mut self, now: Timestamp) {
        let skip = usize::from(self.sending);
        let removed = self
            .send_queue
            .retain_after(skip, |p| p.expires_at > now);
        if removed > 0 {
            let removed = u32::try_from(removed).unwrap_or(u32::MAX);
            self.stats.qexpired = self.stats.qexpired.saturating_add(removed);
            log::debug!("collect {}: {} queued packets expired", self.addr, removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{CollectConfig, DefaultConfig};
    use crate::conn::test_util::*;
    use crate::debug::DebugEvent;
    use crate::time::Duration;
    use crate::types::{
        AckFlags, Event, KEEPALIVE_REXMITS, PROACTIVE_PROBING_REXMITS, RTMETRIC_MAX, RTMETRIC_SINK,
    };

    #[test]
    fn test_announce_interval_backs_off() {
        let mut c = conn(1);
        let mut intervals = alloc::vec::Vec::new();
        for _ in 0..8 {
            let deadline = c.announce_timer.deadline().unwrap();
            let now = at(&c, deadline.as_millis());
            c.handle_timer(now);
            intervals.push(c.announce_interval.as_secs());
        }
        assert_eq!(intervals, [2, 4, 8, 16, 32, 32, 32, 32]);
        assert_eq!(take_advs(&c).len(), 8);
    }

    #[test]
    fn test_adv_carries_metric() {
        let mut c = conn_with_sink(1, addr(9));
        let now = at(&c, 1_000);
        c.handle_timer(now);
        assert_eq!(take_advs(&c), [c.depth()]);

        c.set_sink(true);
        let now = at(&c, 2_000);
        c.handle_timer(now);
        assert_eq!(take_advs(&c), [RTMETRIC_SINK]);
    }

    #[test]
    fn test_stale_neighbor_ages_out() {
        let mut c = conn_with_sink(1, addr(9));
        let max_age = u64::from(DefaultConfig::NEIGHBOR_MAX_AGE);
        for s in 1..max_age {
            let now = at(&c, s * 1_000);
            c.handle_timer(now);
        }
        assert_eq!(c.parent(), Some(addr(9)));

        let now = at(&c, max_age * 1_000);
        c.handle_timer(now);
        assert!(c.neighbors().is_empty());
        assert_eq!(c.parent(), None);
        assert_eq!(c.depth(), RTMETRIC_MAX);
        assert_eq!(c.stats().routelost, 1);
        assert!(take_events(&c).contains(&Event::ParentChanged {
            parent: None,
            rtmetric: RTMETRIC_MAX,
        }));
    }

    #[test]
    fn test_adv_keeps_neighbor_alive() {
        let mut c = conn_with_sink(1, addr(9));
        let max_age = u64::from(DefaultConfig::NEIGHBOR_MAX_AGE);
        for s in 1..max_age * 2 {
            let now = at(&c, s * 1_000);
            if s % 60 == 0 {
                adv(&mut c, addr(9), RTMETRIC_SINK, now);
            }
            c.handle_timer(now);
        }
        assert_eq!(c.parent(), Some(addr(9)));
    }

    #[test]
    fn test_keepalive_sends_dummy_when_idle() {
        let mut c = conn_with_sink(1, addr(9));
        c.set_keepalive(Duration::from_secs(10));
        let now = at(&c, 10_000);
        c.handle_timer(now);

        let frames = take_data(&c);
        assert_eq!(frames.len(), 1);
        let (to, frame) = &frames[0];
        assert_eq!(*to, addr(9));
        assert!(frame.is_dummy());
        assert!(frame.payload.is_empty());
        assert_eq!(frame.ttl, 1);
        assert_eq!(frame.max_rexmits, KEEPALIVE_REXMITS);
        assert_eq!(c.stats().keepalives, 1);
        assert!(take_debug(&c)
            .iter()
            .any(|e| matches!(e, DebugEvent::KeepaliveQueued { .. })));

        // The sink's ACK completes it like any other packet.
        ack(&mut c, addr(9), frame.packet_id, AckFlags::empty(), 0, now);
        assert_eq!(c.queue_len(), 0);
        assert!(c.keepalive_timer.is_running());
    }

    #[test]
    fn test_keepalive_skipped_when_busy_or_routeless() {
        let mut c = conn(1);
        c.set_keepalive(Duration::from_secs(10));
        let now = at(&c, 10_000);
        c.handle_timer(now);
        assert_eq!(c.stats().keepalives, 0);
        assert!(c.keepalive_timer.is_running());

        let mut c = conn_with_sink(1, addr(9));
        c.send(b"a".to_vec(), 4).unwrap();
        c.set_keepalive(Duration::from_secs(10));
        let now = at(&c, 10_000);
        c.handle_timer(now);
        assert_eq!(c.stats().keepalives, 0);
    }

    #[test]
    fn test_probe_pins_unsampled_candidate() {
        let mut c = conn_with_sink(1, addr(2));
        let now = at(&c, 0);
        // Parent total 32; 3 advertises 8 but has never been sampled.
        adv(&mut c, addr(3), 8, now);
        assert_eq!(c.parent(), Some(addr(2)));

        c.handle_probe_timer(now);
        let frames = take_data(&c);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, addr(3));
        assert!(frames[0].1.is_dummy());
        assert_eq!(frames[0].1.max_rexmits, PROACTIVE_PROBING_REXMITS);
        assert_eq!(c.stats().probes, 1);
        assert_eq!(c.parent(), Some(addr(2)));
        assert!(c.probe_timer.is_running());

        // The candidate answers like any router would; the sample it leaves
        // behind makes it the parent.
        sent(&mut c, addr(3), 1, now);
        let flags = AckFlags::DROPPED.union(AckFlags::LIFETIME_EXCEEDED);
        ack(&mut c, addr(3), frames[0].1.packet_id, flags, 8, now);
        assert_eq!(c.queue_len(), 0);
        assert_eq!(c.parent(), Some(addr(3)));
        assert_eq!(c.depth(), 16);
    }

    #[test]
    fn test_probe_skips_sampled_and_worse_neighbors() {
        let mut c = conn_with_sink(1, addr(2));
        let now = at(&c, 0);
        adv(&mut c, addr(3), 30, now);
        c.handle_probe_timer(now);
        assert!(take_data(&c).is_empty());

        adv(&mut c, addr(4), 8, now);
        c.neighbors.record_tx_fail(&addr(4), 10);
        c.update_rtmetric(now);
        c.handle_probe_timer(now);
        assert!(take_data(&c).is_empty());
        assert_eq!(c.stats().probes, 0);
    }

    #[test]
    fn test_expired_packets_purged() {
        let mut c = conn(1);
        c.send(b"a".to_vec(), 1).unwrap();
        c.send(b"b".to_vec(), 4).unwrap();
        assert_eq!(c.queue_len(), 2);

        // Lifetimes are 2 s and 8 s with a 1 s base.
        let now = at(&c, 2_000);
        c.handle_timer(now);
        assert_eq!(c.queue_len(), 1);
        assert_eq!(c.stats().qexpired, 1);

        let now = at(&c, 8_000);
        c.handle_timer(now);
        assert_eq!(c.queue_len(), 0);
        assert_eq!(c.stats().qexpired, 2);
    }

    #[test]
    fn test_in_flight_head_not_purged() {
        let mut c = conn_with_sink(1, addr(9));
        c.send(b"a".to_vec(), 1).unwrap();
        c.send(b"b".to_vec(), 1).unwrap();
        take_data(&c);

        let now = at(&c, 2_000);
        c.purge_expired(now);
        assert_eq!(c.queue_len(), 1);
        assert!(c.is_sending());
    }
}
