//! Reliable per-hop transport for the head of the send queue.
//!
//! Stop-and-wait: at most one DATA frame is outstanding. Each transmission
//! arms a long defensive timer until the link layer reports `Sent`, after
//! which a jittered retransmission timer (backing off with the attempts
//! spent) decides between resending and giving up. A matching ACK ends the
//! exchange early.

use crate::config::CollectConfig;
use crate::conn::{CollectConn, QueuedPacket};
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, OutgoingFrame, Random, Transport, TxStatus};
use crate::types::{
    bump, AckFlags, AckFrame, Addr, Event, DEFENSIVE_TIMEOUT_FACTOR, MAX_MAC_REXMITS,
    MAX_REXMIT_TIME_SCALING,
};
use crate::wire::{Encode, Envelope, Frame};

#[cfg(any(test, feature = "debug"))]
use crate::debug::DebugEvent;

impl<T, R, Clk, Cfg> CollectConn<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: CollectConfig,
{
    /// Start transmitting the queue head if idle and a next hop exists.
    pub(crate) fn send_queued_packet(&mut self, now: Timestamp) {
        if self.sending || self.closed {
            return;
        }
        self.purge_expired(now);

        let Some(head) = self.send_queue.front() else {
            return;
        };
        let Some(target) = head.pinned.or(self.parent) else {
            log::trace!(
                "collect {}: no route, holding {} packets",
                self.addr,
                self.send_queue.len()
            );
            return;
        };

        self.current_parent = Some(target);
        self.sending = true;
        self.transmissions = 0;
        self.transmit_head(now);
    }

    /// Hand the head to the link layer addressed to `current_parent`.
    fn transmit_head(&mut self, now: Timestamp) {
        let Some(to) = self.current_parent else {
            return;
        };
        let packet_id = self.seqno;
        let rtmetric = self.rtmetric;
        let Some(head) = self.send_queue.front_mut() else {
            return;
        };
        head.frame.packet_id = packet_id;
        head.frame.rtmetric = rtmetric;
        let dummy = head.frame.is_dummy();

        let data = Envelope::new(self.channel, Frame::Data(head.frame.clone())).encode_to_vec();
        let queued = self
            .transport
            .data_outgoing()
            .try_send(OutgoingFrame {
                dest: Some(to),
                data,
            })
            .is_ok();

        self.awaiting_sent = true;
        self.rexmit_timer
            .set(now, Cfg::REXMIT_TIME * DEFENSIVE_TIMEOUT_FACTOR);

        if !queued {
            // The defensive timer recovers the attempt.
            bump!(self.stats, txqfull);
            log::warn!("collect {}: data queue full", self.addr);
            return;
        }
        bump!(self.stats, datasent);
        log::trace!(
            "collect {}: data {} to {} (dummy {}, attempts so far {})",
            self.addr,
            packet_id,
            to,
            dummy,
            self.transmissions
        );
        emit_debug!(
            self,
            DebugEvent::DataSent {
                to,
                packet_id,
                transmissions: self.transmissions,
                dummy,
            }
        );
    }

    /// Link-layer completion for the in-flight frame.
    pub(crate) fn handle_sent(
        &mut self,
        to: Addr,
        transmissions: u8,
        status: TxStatus,
        now: Timestamp,
    ) {
        if !self.sending || !self.awaiting_sent || Some(to) != self.current_parent {
            return;
        }
        log::trace!(
            "collect {}: sent to {} after {} attempts ({:?})",
            self.addr,
            to,
            transmissions,
            status
        );
        self.register_transmissions(transmissions, now);
    }

    /// Account for `count` link-layer attempts and wait for the ACK.
    fn register_transmissions(&mut self, count: u8, now: Timestamp) {
        self.awaiting_sent = false;
        self.transmissions = self.transmissions.saturating_add(count);
        let delay = self.rexmit_delay();
        self.rexmit_timer.set(now, delay);
    }

    /// Jittered retransmission interval, doubling every
    /// `MAX_MAC_REXMITS + 1` attempts up to `MAX_REXMIT_TIME_SCALING`.
    fn rexmit_delay(&mut self) -> Duration {
        let shift = (self.transmissions / (MAX_MAC_REXMITS + 1)).min(MAX_REXMIT_TIME_SCALING);
        let base = Cfg::REXMIT_TIME.saturating_shl(u32::from(shift));
        self.jitter(base)
    }

    pub(crate) fn handle_rexmit_timer(&mut self, now: Timestamp) {
        if !self.sending {
            return;
        }
        let Some(head) = self.send_queue.front() else {
            self.sending = false;
            return;
        };
        let max_rexmits = head.frame.max_rexmits;
        let pinned = head.pinned;

        if self.awaiting_sent {
            // No completion from the link layer: charge a full MAC round.
            let to = self.current_parent.unwrap_or(Addr::NULL);
            log::debug!(
                "collect {}: no sent upcall for {} to {}",
                self.addr,
                self.seqno,
                to
            );
            emit_debug!(
                self,
                DebugEvent::DefensiveTimeout {
                    to,
                    packet_id: self.seqno,
                }
            );
            self.awaiting_sent = false;
            self.transmissions = self.transmissions.saturating_add(MAX_MAC_REXMITS + 1);
        }

        if self.transmissions >= max_rexmits {
            self.timedout(now);
            return;
        }

        if pinned.is_none() && self.parent != self.current_parent {
            match self.parent {
                Some(p) => {
                    log::debug!(
                        "collect {}: retransmitting via new parent {}",
                        self.addr,
                        p
                    );
                    self.current_parent = Some(p);
                    self.transmissions = 0;
                }
                None => {
                    // Resumed by send_queued_packet once a route returns.
                    self.sending = false;
                    self.current_parent = None;
                    return;
                }
            }
        }
        bump!(self.stats, rexmit);
        self.transmit_head(now);
    }

    /// Give up on the head after its budget is spent.
    fn timedout(&mut self, now: Timestamp) {
        let to = self.current_parent.unwrap_or(Addr::NULL);
        let Some(packet) = self.finish_head() else {
            return;
        };
        let max_rexmits = packet.frame.max_rexmits;

        bump!(self.stats, timedout);
        self.neighbors.record_tx_fail(&to, max_rexmits);
        log::debug!(
            "collect {}: timed out sending {}:{} to {} after {} attempts",
            self.addr,
            packet.frame.esender,
            packet.frame.eseqno,
            to,
            max_rexmits
        );
        emit_debug!(
            self,
            DebugEvent::TimedOut {
                to,
                packet_id: packet.frame.packet_id,
                transmissions: max_rexmits,
            }
        );
        if packet.originated {
            self.emit_event(Event::SendTimedOut {
                seqno: packet.frame.eseqno,
            });
        }

        self.update_rtmetric(now);
        self.send_queued_packet(now);
    }

    /// Pop the head and reset per-packet transport state.
    fn finish_head(&mut self) -> Option<QueuedPacket> {
        let packet = self.send_queue.pop_front();
        self.sending = false;
        self.awaiting_sent = false;
        self.current_parent = None;
        self.transmissions = 0;
        self.seqno = self.seqno.wrapping_add(1);
        self.rexmit_timer.stop();
        packet
    }

    pub(crate) fn handle_ack(&mut self, from: Addr, ack: AckFrame, now: Timestamp) {
        let matches =
            self.sending && Some(from) == self.current_parent && ack.packet_id == self.seqno;
        if !matches {
            bump!(self.stats, badack);
            log::trace!(
                "collect {}: stray ack {} from {}",
                self.addr,
                ack.packet_id,
                from
            );
            emit_debug!(
                self,
                DebugEvent::BadAck {
                    from,
                    packet_id: ack.packet_id,
                }
            );
            return;
        }

        bump!(self.stats, ackrecv);
        emit_debug!(
            self,
            DebugEvent::AckReceived {
                from,
                packet_id: ack.packet_id,
                flags: ack.flags,
            }
        );
        if let Some(n) = self.neighbors.find_mut(&from) {
            n.rtmetric = ack.rtmetric;
            n.age = 0;
        }

        let max_rexmits = self
            .send_queue
            .front()
            .map_or(MAX_MAC_REXMITS, |p| p.frame.max_rexmits);
        // The ACK can overtake the link layer's completion.
        let tx = if self.transmissions == 0 {
            MAX_MAC_REXMITS
        } else {
            self.transmissions
        };

        if ack.flags.contains(AckFlags::RTMETRIC_NEEDS_UPDATE) {
            log::debug!("collect {}: {} reports a stale metric", self.addr, from);
            self.bump_advertisement(now);
        }

        if ack.flags.contains(AckFlags::CONGESTED) {
            bump!(self.stats, ackcongestion);
            self.neighbors.record_tx_fail(&from, max_rexmits);
            self.update_rtmetric(now);
        }

        if ack.flags.contains(AckFlags::DROPPED) {
            bump!(self.stats, ackdrop);
            if !ack.flags.contains(AckFlags::LIFETIME_EXCEEDED) {
                // Not accepted; the retransmission timer tries again.
                log::debug!(
                    "collect {}: {} dropped {}, retrying",
                    self.addr,
                    from,
                    ack.packet_id
                );
                return;
            }
        }

        self.neighbors.record_tx(&from, tx);
        self.finish_head();
        self.update_rtmetric(now);

        if !self.keepalive_period.is_zero() {
            let delay = self.jitter(self.keepalive_period);
            self.keepalive_timer.set(now, delay);
        }
        self.send_queued_packet(now);
    }
}
