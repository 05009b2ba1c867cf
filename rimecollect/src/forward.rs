//! Receive path: advertisements, sink delivery, forwarding and duplicate
//! suppression.
//!
//! Every DATA frame is answered with exactly one ACK whose flags tell the
//! sender what happened to it. A duplicate is ACKed again but never
//! reprocessed, so a lost ACK cannot cause a second delivery.

use crate::config::CollectConfig;
use crate::conn::{CollectConn, QueuedPacket};
use crate::time::Timestamp;
use crate::traits::{Clock, Random, Transport};
use crate::types::{
    bump, AckFlags, AckFrame, Addr, DataFrame, Event, Rtmetric, MAX_REXMITS, RTMETRIC_MAX,
};
use crate::wire::Frame;

#[cfg(any(test, feature = "debug"))]
use crate::debug::DebugEvent;

impl<T, R, Clk, Cfg> CollectConn<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: CollectConfig,
{
    /// Neighbor advertisement.
    pub(crate) fn handle_adv(&mut self, from: Addr, rtmetric: Rtmetric, now: Timestamp) {
        log::trace!("collect {}: adv from {} ({})", self.addr, from, rtmetric);
        let was_usable = self
            .neighbors
            .find(&from)
            .is_some_and(|n| n.rtmetric < RTMETRIC_MAX);

        self.neighbors.add_or_refresh(from, rtmetric, 0);
        self.update_rtmetric(now);

        // Pass a lost route on quickly.
        if rtmetric == RTMETRIC_MAX && was_usable {
            self.bump_advertisement(now);
        }
    }

    pub(crate) fn handle_data(&mut self, from: Addr, frame: DataFrame, now: Timestamp) {
        bump!(self.stats, datarecv);
        log::trace!(
            "collect {}: data {}:{} from {} (hops {}, ttl {})",
            self.addr,
            frame.esender,
            frame.eseqno,
            from,
            frame.hops,
            frame.ttl
        );

        if let Some(n) = self.neighbors.find_mut(&from) {
            n.rtmetric = frame.rtmetric;
            n.age = 0;
        }
        self.update_rtmetric(now);

        let key = (frame.esender, frame.eseqno);
        let dummy = frame.is_dummy();

        if !dummy && self.recent.contains(&key) {
            bump!(self.stats, duprecv);
            log::debug!(
                "collect {}: duplicate {}:{} from {}",
                self.addr,
                frame.esender,
                frame.eseqno,
                from
            );
            emit_debug!(
                self,
                DebugEvent::Duplicate {
                    originator: frame.esender,
                    seqno: frame.eseqno,
                }
            );
            self.send_ack(from, frame.packet_id, AckFlags::empty());
            return;
        }

        if self.is_sink {
            self.deliver(from, frame, key);
            return;
        }

        if !self.is_router {
            self.send_ack(
                from,
                frame.packet_id,
                AckFlags::DROPPED.union(AckFlags::CONGESTED),
            );
            self.note_drop(&frame, "not a router");
            return;
        }

        if frame.ttl > 1 && self.rtmetric != RTMETRIC_MAX {
            self.forward(from, frame, key, now);
            return;
        }

        self.send_ack(
            from,
            frame.packet_id,
            AckFlags::DROPPED.union(AckFlags::LIFETIME_EXCEEDED),
        );
        if !dummy {
            if frame.ttl <= 1 {
                bump!(self.stats, ttldrop);
                self.note_drop(&frame, "ttl exhausted");
            } else {
                bump!(self.stats, rtmetricdrop);
                self.note_drop(&frame, "no route");
            }
        }
    }

    fn deliver(&mut self, from: Addr, frame: DataFrame, key: (Addr, u8)) {
        let mut flags = AckFlags::empty();
        if self.send_queue.is_half_full() {
            flags.insert(AckFlags::CONGESTED);
        }
        self.send_ack(from, frame.packet_id, flags);

        if frame.is_dummy() {
            return;
        }
        self.recent.push(key);
        log::debug!(
            "collect {}: delivered {}:{} after {} hops",
            self.addr,
            frame.esender,
            frame.eseqno,
            frame.hops
        );
        emit_debug!(
            self,
            DebugEvent::Delivered {
                originator: frame.esender,
                seqno: frame.eseqno,
                hops: frame.hops,
            }
        );
        self.emit_event(Event::Received {
            originator: frame.esender,
            seqno: frame.eseqno,
            hops: frame.hops,
            payload: frame.payload,
        });
    }

    fn forward(&mut self, from: Addr, frame: DataFrame, key: (Addr, u8), now: Timestamp) {
        let mut flags = AckFlags::empty();
        if frame.rtmetric <= self.rtmetric {
            bump!(self.stats, loopdetect);
            flags.insert(AckFlags::RTMETRIC_NEEDS_UPDATE);
            log::debug!(
                "collect {}: loop suspected, {} has {} and we have {}",
                self.addr,
                from,
                frame.rtmetric,
                self.rtmetric
            );
            emit_debug!(
                self,
                DebugEvent::LoopDetected {
                    from,
                    their_rtmetric: frame.rtmetric,
                    our_rtmetric: self.rtmetric,
                }
            );
        }

        let packet_id = frame.packet_id;
        let max_rexmits = frame.max_rexmits.clamp(1, MAX_REXMITS);
        let next = DataFrame {
            packet_id: 0,
            ttl: frame.ttl - 1,
            hops: frame.hops.saturating_add(1),
            max_rexmits,
            ..frame
        };
        let (originator, seqno, hops, ttl) = (next.esender, next.eseqno, next.hops, next.ttl);
        let packet = QueuedPacket {
            frame: next,
            expires_at: now + self.packet_lifetime(max_rexmits),
            pinned: None,
            originated: false,
        };

        if let Err(packet) = self.send_queue.push_back(packet) {
            bump!(self.stats, qdrop);
            log::warn!("collect {}: send queue full, dropping forward", self.addr);
            self.send_ack(
                from,
                packet_id,
                AckFlags::DROPPED.union(AckFlags::CONGESTED),
            );
            self.note_drop(&packet.frame, "queue full");
            return;
        }

        self.recent.push(key);
        if self.send_queue.is_half_full() {
            flags.insert(AckFlags::CONGESTED);
        }
        self.send_ack(from, packet_id, flags);
        log::trace!(
            "collect {}: forwarding {}:{} (hops {}, ttl {})",
            self.addr,
            originator,
            seqno,
            hops,
            ttl
        );
        emit_debug!(
            self,
            DebugEvent::Forwarded {
                originator,
                seqno,
                hops,
                ttl,
            }
        );
        self.send_queued_packet(now);
    }

    /// Acknowledge a DATA frame from `to`.
    pub(crate) fn send_ack(&mut self, to: Addr, packet_id: u8, flags: AckFlags) {
        let ack = AckFrame {
            packet_id,
            flags,
            rtmetric: self.advertised_rtmetric(),
        };
        if !self.send_control(Some(to), Frame::Ack(ack)) {
            return;
        }
        bump!(self.stats, acksent);
        log::trace!(
            "collect {}: ack {} to {} {:?}",
            self.addr,
            packet_id,
            to,
            flags
        );
        emit_debug!(
            self,
            DebugEvent::AckSent {
                to,
                packet_id,
                flags,
            }
        );
    }

    fn note_drop(&self, frame: &DataFrame, reason: &'static str) {
        log::debug!(
            "collect {}: dropped {}:{} ({})",
            self.addr,
            frame.esender,
            frame.eseqno,
            reason
        );
        emit_debug!(
            self,
            DebugEvent::Dropped {
                originator: frame.esender,
                seqno: frame.eseqno,
                reason,
            }
        );
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use crate::config::{CollectConfig, DefaultConfig};
    use crate::conn::test_util::*;
    use crate::maintenance::dummy_frame;
    use crate::traits::test_impls::{MockClock, MockRandom, MockTransport};
    use crate::traits::{LinkEvent, OutgoingFrame};
    use crate::types::{AckFlags, Addr, Event, RTMETRIC_MAX, RTMETRIC_SINK};
    use crate::time::{Duration, Timestamp};
    use crate::wire::Frame;
    use crate::CollectConn;

    fn sink(n: u8) -> TestConn {
        let mut c = conn(n);
        c.set_sink(true);
        c
    }

    fn received(c: &TestConn) -> Vec<Event> {
        take_events(c)
            .into_iter()
            .filter(|e| matches!(e, Event::Received { .. }))
            .collect()
    }

    fn drain(c: &TestConn) -> Vec<OutgoingFrame> {
        let t = c.transport();
        let mut frames = t.take_control();
        frames.extend(t.take_data());
        frames
    }

    /// Hand `to` every frame in `frames` it would hear.
    fn deliver(frames: &[OutgoingFrame], from: Addr, to: &mut TestConn, now: Timestamp) {
        for f in frames {
            if f.dest.is_none() || f.dest == Some(to.addr()) {
                let event = LinkEvent::Received {
                    from,
                    data: f.data.clone(),
                };
                to.handle_link_event(event, now);
            }
        }
    }

    fn pump(from: &TestConn, to: &mut TestConn, now: Timestamp) {
        deliver(&drain(from), from.addr(), to, now);
    }

    #[test]
    fn test_sink_delivers_once_and_acks_twice() {
        let mut s = sink(1);
        let now = at(&s, 0);
        let frame = data(addr(5), 7, 10, 40);
        rx(&mut s, addr(2), Frame::Data(frame.clone()), now);
        rx(&mut s, addr(2), Frame::Data(frame), now);

        assert_eq!(
            received(&s),
            [Event::Received {
                originator: addr(5),
                seqno: 7,
                hops: 1,
                payload: b"x".to_vec(),
            }]
        );
        let acks = s.transport().take_acks();
        assert_eq!(acks.len(), 2);
        assert!(acks.iter().all(|(to, a)| *to == addr(2) && a.packet_id == 7));
        assert!(acks.iter().all(|(_, a)| a.rtmetric == RTMETRIC_SINK));
        assert_eq!(s.stats().duprecv, 1);
    }

    #[test]
    fn test_round_trip() {
        let mut a = conn(1);
        let mut b = sink(2);
        let now = at(&a, 0);
        at(&b, 0);
        adv(&mut a, b.addr(), RTMETRIC_SINK, now);

        a.send(b"X".to_vec(), 4).unwrap();
        pump(&a, &mut b, now);
        assert_eq!(
            received(&b),
            [Event::Received {
                originator: addr(1),
                seqno: 0,
                hops: 1,
                payload: b"X".to_vec(),
            }]
        );

        pump(&b, &mut a, now);
        assert_eq!(a.queue_len(), 0);
        assert!(!a.is_sending());
        assert_eq!(a.transmissions(), 0);
        assert_eq!(a.stats().ackrecv, 1);
    }

    #[test]
    fn test_two_hop_delivery_counts_hops() {
        let mut a = conn(1);
        let mut r = conn(2);
        let mut s = sink(3);
        let now = at(&a, 0);
        at(&r, 0);
        at(&s, 0);
        adv(&mut r, s.addr(), RTMETRIC_SINK, now);
        adv(&mut a, r.addr(), r.depth(), now);

        a.send(b"hi".to_vec(), 4).unwrap();
        pump(&a, &mut r, now);
        let out = drain(&r);
        deliver(&out, r.addr(), &mut s, now);
        deliver(&out, r.addr(), &mut a, now);

        let got = received(&s);
        assert_eq!(got.len(), 1);
        assert!(matches!(
            &got[0],
            Event::Received { hops: 2, originator, .. } if *originator == addr(1)
        ));
        assert_eq!(a.queue_len(), 0);
        // The relay still waits for the sink's ACK.
        assert!(r.is_sending());
        pump(&s, &mut r, now);
        assert_eq!(r.queue_len(), 0);
    }

    #[test]
    fn test_forward_rewrites_header() {
        let mut c = conn_with_sink(1, addr(9));
        let now = at(&c, 0);
        rx(&mut c, addr(3), Frame::Data(data(addr(5), 2, 10, 64)), now);

        let frames = take_data(&c);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, addr(9));
        assert_eq!(frames[0].1.hops, 2);
        assert_eq!(frames[0].1.ttl, 9);
        assert_eq!(frames[0].1.esender, addr(5));
        assert_eq!(frames[0].1.eseqno, 2);
        assert_eq!(frames[0].1.rtmetric, c.depth());

        let acks = c.transport().take_acks();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].1.flags, AckFlags::empty());
        assert_eq!(c.stats().loopdetect, 0);
    }

    #[test]
    fn test_forward_duplicate_not_requeued() {
        let mut c = conn_with_sink(1, addr(9));
        let now = at(&c, 0);
        let frame = data(addr(5), 2, 10, 64);
        rx(&mut c, addr(3), Frame::Data(frame.clone()), now);
        rx(&mut c, addr(3), Frame::Data(frame), now);

        assert_eq!(c.queue_len(), 1);
        assert_eq!(take_data(&c).len(), 1);
        assert_eq!(c.transport().take_acks().len(), 2);
        assert_eq!(c.stats().duprecv, 1);
    }

    #[test]
    fn test_loop_detection_flags_ack() {
        let mut c = conn_with_sink(1, addr(9));
        let now = at(&c, 0);
        let ours = c.depth();
        rx(&mut c, addr(3), Frame::Data(data(addr(5), 2, 10, ours)), now);

        assert_eq!(c.stats().loopdetect, 1);
        let acks = c.transport().take_acks();
        assert!(acks[0].1.flags.contains(AckFlags::RTMETRIC_NEEDS_UPDATE));
        assert!(!acks[0].1.flags.contains(AckFlags::DROPPED));
        // Still forwarded.
        assert_eq!(take_data(&c).len(), 1);
    }

    #[test]
    fn test_ttl_exhausted_dropped() {
        let mut c = conn_with_sink(1, addr(9));
        let now = at(&c, 0);
        rx(&mut c, addr(3), Frame::Data(data(addr(5), 2, 1, 64)), now);

        let acks = c.transport().take_acks();
        assert_eq!(
            acks[0].1.flags,
            AckFlags::DROPPED.union(AckFlags::LIFETIME_EXCEEDED)
        );
        assert_eq!(c.stats().ttldrop, 1);
        assert!(take_data(&c).is_empty());
        assert_eq!(c.queue_len(), 0);
    }

    #[test]
    fn test_no_route_dropped() {
        let mut c = conn(1);
        let now = at(&c, 0);
        rx(&mut c, addr(3), Frame::Data(data(addr(5), 2, 10, 64)), now);

        let acks = c.transport().take_acks();
        assert_eq!(
            acks[0].1.flags,
            AckFlags::DROPPED.union(AckFlags::LIFETIME_EXCEEDED)
        );
        assert_eq!(acks[0].1.rtmetric, RTMETRIC_MAX);
        assert_eq!(c.stats().rtmetricdrop, 1);
    }

    #[test]
    fn test_refused_acks_not_counted_as_sent() {
        use crate::traits::TRANSPORT_QUEUE_SIZE;

        let mut c = conn_with_sink(1, addr(9));
        let now = at(&c, 0);
        let extra = 2;
        for seq in 0..(TRANSPORT_QUEUE_SIZE + extra) as u8 {
            rx(&mut c, addr(3), Frame::Data(data(addr(5), seq, 10, 64)), now);
        }
        assert_eq!(c.transport().take_acks().len(), TRANSPORT_QUEUE_SIZE);
        assert_eq!(c.stats().acksent, TRANSPORT_QUEUE_SIZE as u32);
        assert_eq!(c.stats().txqfull, extra as u32);
    }

    #[test]
    fn test_queue_full_dropped_congested() {
        let mut c = conn_with_sink(1, addr(9));
        let now = at(&c, 0);
        let max = DefaultConfig::MAX_SENDING_QUEUE as u8;
        let mut acks = Vec::new();
        for seq in 0..max {
            rx(&mut c, addr(3), Frame::Data(data(addr(5), seq, 10, 64)), now);
            acks.extend(c.transport().take_acks());
        }
        assert_eq!(acks.len(), usize::from(max));
        assert!(!acks[0].1.flags.contains(AckFlags::CONGESTED));
        assert_eq!(acks.last().unwrap().1.flags, AckFlags::CONGESTED);

        rx(&mut c, addr(3), Frame::Data(data(addr(5), max, 10, 64)), now);
        let acks = c.transport().take_acks();
        assert_eq!(
            acks[0].1.flags,
            AckFlags::DROPPED.union(AckFlags::CONGESTED)
        );
        assert_eq!(c.stats().qdrop, 1);
        assert_eq!(c.queue_len(), usize::from(max));

        // A refused packet is not remembered as seen.
        rx(&mut c, addr(3), Frame::Data(data(addr(5), max, 10, 64)), now);
        assert_eq!(c.stats().qdrop, 2);
        assert_eq!(c.stats().duprecv, 0);
    }

    #[test]
    fn test_non_router_refuses_to_forward() {
        let mut c: TestConn = CollectConn::open(
            MockTransport::new(addr(1)),
            MockRandom::new(),
            MockClock::new(),
            CHANNEL,
            false,
        );
        let now = at(&c, 0);
        adv(&mut c, addr(9), RTMETRIC_SINK, now);
        rx(&mut c, addr(3), Frame::Data(data(addr(5), 2, 10, 64)), now);

        let acks = c.transport().take_acks();
        assert_eq!(
            acks[0].1.flags,
            AckFlags::DROPPED.union(AckFlags::CONGESTED)
        );
        assert_eq!(acks[0].1.rtmetric, RTMETRIC_MAX);
        assert!(take_data(&c).is_empty());
    }

    #[test]
    fn test_dummies_not_delivered() {
        let mut s = sink(1);
        let now = at(&s, 0);
        let dummy = dummy_frame(addr(5), 3, 8, 32);
        rx(&mut s, addr(5), Frame::Data(dummy.clone()), now);
        rx(&mut s, addr(5), Frame::Data(dummy), now);

        assert!(received(&s).is_empty());
        let acks = s.transport().take_acks();
        assert_eq!(acks.len(), 2);
        assert!(acks.iter().all(|(_, a)| a.flags.is_empty()));
        assert_eq!(s.stats().duprecv, 0);
    }

    #[test]
    fn test_dummy_at_router_acked_as_expired() {
        let mut c = conn_with_sink(1, addr(9));
        let now = at(&c, 0);
        rx(&mut c, addr(5), Frame::Data(dummy_frame(addr(5), 3, 8, 64)), now);

        let acks = c.transport().take_acks();
        assert_eq!(
            acks[0].1.flags,
            AckFlags::DROPPED.union(AckFlags::LIFETIME_EXCEEDED)
        );
        assert_eq!(c.stats().ttldrop, 0);
        assert!(take_data(&c).is_empty());
    }

    #[test]
    fn test_data_refreshes_known_sender_metric() {
        let mut c = conn_with_sink(1, addr(9));
        let now = at(&c, 0);
        adv(&mut c, addr(3), 100, now);
        rx(&mut c, addr(3), Frame::Data(data(addr(5), 2, 10, 50)), now);
        assert_eq!(c.neighbors().find(&addr(3)).unwrap().rtmetric, 50);

        // Unknown senders are not added.
        rx(&mut c, addr(4), Frame::Data(data(addr(5), 3, 10, 50)), now);
        assert!(c.neighbors().find(&addr(4)).is_none());
    }

    #[test]
    fn test_adv_of_lost_route_bumps_advertisement() {
        let mut c = conn_with_sink(1, addr(9));
        for ms in (1_000..20_000).step_by(1_000) {
            let now = at(&c, ms);
            c.handle_timer(now);
        }
        assert!(c.announce_interval > Duration::from_secs(1));

        let now = at(&c, 20_000);
        adv(&mut c, addr(9), RTMETRIC_MAX, now);
        assert_eq!(c.announce_interval, Duration::from_secs(1));
        assert_eq!(c.depth(), RTMETRIC_MAX);

        // Null and own addresses never enter the table.
        adv(&mut c, Addr::NULL, 0, now);
        adv(&mut c, addr(1), 0, now);
        assert_eq!(c.neighbors().len(), 1);
    }
}
