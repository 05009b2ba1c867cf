//! Bounded table of one-hop neighbors and their advertised metrics.
//!
//! Slots are scanned in index order everywhere, which makes both eviction
//! and best-parent tie-breaks deterministic: the lowest slot wins.

use alloc::vec::Vec;

use crate::link_estimate::LinkEstimate;
use crate::types::{Addr, Rtmetric, RTMETRIC_MAX};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Neighbor {
    pub addr: Addr,
    /// Last metric this neighbor advertised.
    pub rtmetric: Rtmetric,
    pub le: LinkEstimate,
    /// Aging ticks since last activity.
    pub age: u16,
}

impl Neighbor {
    fn new(addr: Addr, rtmetric: Rtmetric, initial_cost: u8) -> Self {
        let mut le = LinkEstimate::new();
        le.record_success(initial_cost);
        Self {
            addr,
            rtmetric,
            le,
            age: 0,
        }
    }

    pub fn link_estimate(&self) -> u16 {
        self.le.estimate()
    }

    /// Our metric if we route through this neighbor, clamped to `RTMETRIC_MAX`.
    pub fn rtmetric_via(&self) -> Rtmetric {
        self.rtmetric
            .saturating_add(self.link_estimate())
            .min(RTMETRIC_MAX)
    }
}

pub struct NeighborTable {
    slots: Vec<Option<Neighbor>>,
}

impl NeighborTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    pub fn find(&self, addr: &Addr) -> Option<&Neighbor> {
        self.iter().find(|n| n.addr == *addr)
    }

    pub fn find_mut(&mut self, addr: &Addr) -> Option<&mut Neighbor> {
        self.slots.iter_mut().flatten().find(|n| n.addr == *addr)
    }

    /// Insert or refresh `addr`.
    ///
    /// A known neighbor gets its metric updated and its age reset; its link
    /// history is left untouched. A new neighbor takes a free slot, or the
    /// slot of the worst live entry when the table is full. `initial_cost`
    /// of zero leaves the new entry unsampled.
    pub fn add_or_refresh(&mut self, addr: Addr, rtmetric: Rtmetric, initial_cost: u8) {
        if addr.is_null() {
            return;
        }
        if let Some(n) = self.find_mut(&addr) {
            n.rtmetric = rtmetric;
            n.age = 0;
            return;
        }

        let slot = match self.slots.iter().position(Option::is_none) {
            Some(free) => free,
            None => match self.worst_slot() {
                Some(worst) => {
                    if let Some(old) = &self.slots[worst] {
                        log::debug!("neighbor table full, evicting {}", old.addr);
                    }
                    worst
                }
                None => return,
            },
        };
        self.slots[slot] = Some(Neighbor::new(addr, rtmetric, initial_cost));
    }

    /// Highest `(rtmetric, estimate)`; exact ties keep the lowest slot.
    fn worst_slot(&self) -> Option<usize> {
        let mut worst: Option<(usize, (Rtmetric, u16))> = None;
        for (i, n) in self.slots.iter().enumerate() {
            let Some(n) = n else { continue };
            let key = (n.rtmetric, n.link_estimate());
            match worst {
                Some((_, w)) if key <= w => {}
                _ => worst = Some((i, key)),
            }
        }
        worst.map(|(i, _)| i)
    }

    pub fn remove(&mut self, addr: &Addr) -> Option<Neighbor> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| matches!(s, Some(n) if n.addr == *addr))?;
        slot.take()
    }

    /// Live neighbor with the lowest `rtmetric + estimate`.
    ///
    /// Neighbors advertising `RTMETRIC_MAX` have no route and are never
    /// returned.
    pub fn best(&self) -> Option<&Neighbor> {
        let mut best: Option<&Neighbor> = None;
        for n in self.iter().filter(|n| n.rtmetric < RTMETRIC_MAX) {
            match best {
                Some(b) if n.rtmetric_via() >= b.rtmetric_via() => {}
                _ => best = Some(n),
            }
        }
        best
    }

    /// Age every entry by one tick and evict those reaching `max_age`.
    ///
    /// Returns the number of evicted entries.
    pub fn tick(&mut self, max_age: u16) -> usize {
        let mut evicted = 0;
        for slot in self.slots.iter_mut() {
            let Some(n) = slot else { continue };
            n.age = n.age.saturating_add(1);
            if n.age >= max_age {
                log::debug!("neighbor {} aged out", n.addr);
                *slot = None;
                evicted += 1;
            }
        }
        evicted
    }

    /// Record a delivery to `addr` that took `transmissions` attempts.
    pub fn record_tx(&mut self, addr: &Addr, transmissions: u8) {
        if let Some(n) = self.find_mut(addr) {
            n.le.record_success(transmissions);
            n.age = 0;
        }
    }

    /// Record a failed delivery to `addr` that burned `transmissions` attempts.
    pub fn record_tx_fail(&mut self, addr: &Addr, transmissions: u8) {
        if let Some(n) = self.find_mut(addr) {
            n.le.record_failure(transmissions);
            n.age = 0;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot index of `addr`, for tests asserting eviction order.
    #[cfg(test)]
    fn slot_of(&self, addr: &Addr) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(n) if n.addr == *addr))
    }
}
