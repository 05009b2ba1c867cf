//! Parent selection and routing metric.
//!
//! A node's metric is its parent's advertised metric plus the link
//! estimate to that parent. The parent is the neighbor with the lowest
//! such sum; an existing parent is only replaced when the candidate is
//! better by more than `SIGNIFICANT_RTMETRIC_PARENT_CHANGE`.

use crate::config::CollectConfig;
use crate::conn::CollectConn;
use crate::time::Timestamp;
use crate::traits::{Clock, Random, Transport};
use crate::types::{
    bump, Addr, Event, Rtmetric, RTMETRIC_MAX, RTMETRIC_SINK, SIGNIFICANT_RTMETRIC_PARENT_CHANGE,
};

#[cfg(any(test, feature = "debug"))]
use crate::debug::DebugEvent;

impl<T, R, Clk, Cfg> CollectConn<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: CollectConfig,
{
    /// Re-evaluate the parent, returning the previous parent if it changed.
    fn update_parent(&mut self, now: Timestamp) -> Option<Option<Addr>> {
        let best = self.neighbors.best().map(|n| (n.addr, n.rtmetric_via()));
        let old = self.parent;

        let new = match (old, best) {
            (Some(current), None) => {
                bump!(self.stats, routelost);
                log::debug!("collect {}: lost route via {}", self.addr, current);
                None
            }
            (None, Some((candidate, metric))) => {
                bump!(self.stats, foundroute);
                log::debug!(
                    "collect {}: found route via {} ({})",
                    self.addr,
                    candidate,
                    metric
                );
                Some(candidate)
            }
            (Some(current), Some((candidate, metric))) if candidate != current => {
                let current_metric = self
                    .neighbors
                    .find(&current)
                    .filter(|n| n.rtmetric < RTMETRIC_MAX)
                    .map(|n| n.rtmetric_via());
                let switch = match current_metric {
                    // Current parent aged out or lost its route.
                    None => true,
                    Some(cm) => metric.saturating_add(SIGNIFICANT_RTMETRIC_PARENT_CHANGE) < cm,
                };
                if !switch {
                    return None;
                }
                bump!(self.stats, newparent);
                log::debug!(
                    "collect {}: new parent {} ({}) replaces {} ({:?})",
                    self.addr,
                    candidate,
                    metric,
                    current,
                    current_metric
                );
                Some(candidate)
            }
            _ => return None,
        };

        self.parent = new;
        emit_debug!(
            self,
            DebugEvent::ParentChanged {
                timestamp: now,
                old,
                new,
            }
        );
        self.bump_advertisement(now);
        Some(old)
    }

    /// Metric through the current parent, or `RTMETRIC_MAX` without one.
    pub(crate) fn rtmetric_compute(&self) -> Rtmetric {
        let Some(n) = self.parent.and_then(|p| self.neighbors.find(&p)) else {
            return RTMETRIC_MAX;
        };
        let metric = n.rtmetric_via();
        if metric == RTMETRIC_SINK {
            // Only the sink may advertise the sink metric.
            log::warn!("collect {}: computed sink metric via {}", self.addr, n.addr);
            return RTMETRIC_MAX;
        }
        metric
    }

    /// Re-select the parent and recompute the metric from it.
    ///
    /// Called after any change to neighbor information. A transition from
    /// no route to a usable route restarts the send queue.
    pub(crate) fn update_rtmetric(&mut self, now: Timestamp) {
        if self.is_sink {
            return;
        }
        let parent_changed = self.update_parent(now).is_some();
        let new = self.rtmetric_compute();
        if parent_changed {
            self.emit_event(Event::ParentChanged {
                parent: self.parent,
                rtmetric: new,
            });
        }
        self.set_rtmetric(new, now);
    }

    pub(crate) fn set_rtmetric(&mut self, new: Rtmetric, now: Timestamp) {
        let old = self.rtmetric;
        if old == new {
            return;
        }
        self.rtmetric = new;
        log::debug!("collect {}: rtmetric {} -> {}", self.addr, old, new);
        emit_debug!(
            self,
            DebugEvent::RtmetricChanged {
                timestamp: now,
                old,
                new,
            }
        );
        if old == RTMETRIC_MAX && new != RTMETRIC_MAX {
            self.send_queued_packet(now);
        }
    }
}
