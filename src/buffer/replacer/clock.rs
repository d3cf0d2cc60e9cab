//! CLOCK (second chance) replacement policy.
//!
//! The page cache reclaims clean pages before dirty ones, so victim
//! selection takes a filter: the sweep skips any evictable frame the filter
//! rejects without clearing its reference bit.

use crate::common::FrameId;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    tracked: bool,
    evictable: bool,
    referenced: bool,
}

/// A CLOCK eviction policy over an arena that may grow.
pub struct ClockReplacer {
    slots: Vec<Slot>,
    hand: usize,
    evictable: usize,
}

impl ClockReplacer {
    /// Create a new CLOCK replacer.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            hand: 0,
            evictable: 0,
        }
    }

    fn slot_mut(&mut self, frame_id: FrameId) -> &mut Slot {
        if frame_id.index() >= self.slots.len() {
            self.slots.resize(frame_id.index() + 1, Slot::default());
        }
        &mut self.slots[frame_id.index()]
    }

    /// Record that a frame was accessed; sets its reference bit.
    pub fn record_access(&mut self, frame_id: FrameId) {
        let slot = self.slot_mut(frame_id);
        slot.tracked = true;
        slot.referenced = true;
    }

    /// Mark a frame as evictable (pin count dropped to 0) or not.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let slot = self.slot_mut(frame_id);
        if !slot.tracked {
            return;
        }
        let was = slot.evictable;
        slot.evictable = evictable;
        match (was, evictable) {
            (false, true) => self.evictable += 1,
            (true, false) => self.evictable -= 1,
            _ => {}
        }
    }

    /// Stop tracking a frame (its page left the cache).
    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(slot) = self.slots.get_mut(frame_id.index()) {
            if slot.evictable {
                self.evictable -= 1;
            }
            *slot = Slot::default();
        }
    }

    /// Find an evictable frame accepted by `accept` without removing it.
    ///
    /// Sweeps at most two full turns of the clock: the first turn may only
    /// clear reference bits.
    pub fn find_victim<F>(&mut self, mut accept: F) -> Option<FrameId>
    where
        F: FnMut(FrameId) -> bool,
    {
        let len = self.slots.len();
        if len == 0 || self.evictable == 0 {
            return None;
        }

        for _ in 0..(2 * len) {
            let index = self.hand;
            self.hand = (self.hand + 1) % len;

            let slot = &mut self.slots[index];
            if !slot.tracked || !slot.evictable {
                continue;
            }
            let frame_id = FrameId::new(index);
            if !accept(frame_id) {
                continue;
            }
            if slot.referenced {
                slot.referenced = false;
                continue;
            }
            return Some(frame_id);
        }
        None
    }

    /// Select and remove a victim accepted by `accept`.
    pub fn evict<F>(&mut self, accept: F) -> Option<FrameId>
    where
        F: FnMut(FrameId) -> bool,
    {
        let victim = self.find_victim(accept)?;
        self.remove(victim);
        Some(victim)
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.evictable
    }
}

impl Default for ClockReplacer {
    fn default() -> Self {
        Self::new()
    }
}
