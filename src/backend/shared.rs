//! Workgroup shared-memory primitives
//!
//! All mutation goes through atomics with relaxed ordering. Visibility between
//! invocations is established by the barrier between phases, never by the
//! atomics themselves.

use crate::packing::DepthRange;
use std::sync::atomic::{AtomicU32, Ordering};

/// Fixed-capacity, lock-free append list.
///
/// An invocation claims a slot by incrementing the shared counter and then
/// writes its value into that slot. Claims past the capacity are dropped; the
/// counter keeps counting so the overflow can be reported afterwards.
#[derive(Debug)]
pub struct SharedAppendList {
    count: AtomicU32,
    slots: Box<[AtomicU32]>,
}

impl SharedAppendList {
    pub fn new(capacity: usize) -> Self {
        Self {
            count: AtomicU32::new(0),
            slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Reset the claim counter. Done by the leader before the first barrier.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    /// Claim the next slot and store `value` in it.
    ///
    /// Returns the claimed slot, or `None` when the list was already full.
    pub fn push(&self, value: u32) -> Option<usize> {
        let slot = self.count.fetch_add(1, Ordering::Relaxed) as usize;
        let cell = self.slots.get(slot)?;
        cell.store(value, Ordering::Relaxed);
        Some(slot)
    }

    /// Number of stored values, never above capacity.
    pub fn len(&self) -> usize {
        (self.count.load(Ordering::Relaxed) as usize).min(self.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claims that did not fit.
    pub fn overflow(&self) -> u32 {
        self.count
            .load(Ordering::Relaxed)
            .saturating_sub(self.slots.len() as u32)
    }

    /// Value in `slot`; only meaningful for `slot < len()` after a barrier.
    pub fn get(&self, slot: usize) -> u32 {
        self.slots[slot].load(Ordering::Relaxed)
    }

    /// Stored values in claim order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots[..self.len()]
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }
}

/// Shared 16-bit min/max depth accumulators.
#[derive(Debug, Default)]
pub struct SharedDepthRange {
    min: AtomicU32,
    max: AtomicU32,
}

impl SharedDepthRange {
    /// Set min to 0xFFFF and max to 0 so any sample tightens both.
    pub fn reset(&self) {
        self.min.store(DepthRange::EMPTY.min as u32, Ordering::Relaxed);
        self.max.store(DepthRange::EMPTY.max as u32, Ordering::Relaxed);
    }

    /// Publish an already reduced range.
    pub fn store(&self, range: DepthRange) {
        self.min.store(range.min as u32, Ordering::Relaxed);
        self.max.store(range.max as u32, Ordering::Relaxed);
    }

    /// Atomic min and max of one quantized sample.
    pub fn include(&self, depth: u16) {
        self.min.fetch_min(depth as u32, Ordering::Relaxed);
        self.max.fetch_max(depth as u32, Ordering::Relaxed);
    }

    pub fn load(&self) -> DepthRange {
        DepthRange::new(
            self.min.load(Ordering::Relaxed) as u16,
            self.max.load(Ordering::Relaxed) as u16,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_list_keeps_first_claims() {
        let list = SharedAppendList::new(256);
        for value in 0..300 {
            let slot = list.push(value);
            if value < 256 {
                assert_eq!(slot, Some(value as usize));
            } else {
                assert_eq!(slot, None);
            }
        }
        assert_eq!(list.len(), 256);
        assert_eq!(list.overflow(), 44);
        assert_eq!(list.to_vec(), (0..256).collect::<Vec<u32>>());
    }

    #[test]
    fn test_append_list_reset() {
        let list = SharedAppendList::new(4);
        list.push(7);
        list.push(9);
        assert_eq!(list.len(), 2);
        list.reset();
        assert!(list.is_empty());
        list.push(3);
        assert_eq!(list.to_vec(), vec![3]);
    }

    #[test]
    fn test_append_list_concurrent_claims_are_unique() {
        let list = SharedAppendList::new(64);
        std::thread::scope(|scope| {
            for t in 0..4u32 {
                let list = &list;
                scope.spawn(move || {
                    for i in 0..32u32 {
                        list.push(t * 100 + i);
                    }
                });
            }
        });
        assert_eq!(list.len(), 64);
        assert_eq!(list.overflow(), 64);
        let mut values = list.to_vec();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 64);
    }

    #[test]
    fn test_depth_range_reduction() {
        let range = SharedDepthRange::default();
        range.reset();
        assert!(range.load().is_empty());
        for depth in [900u16, 120, 45000, 3000] {
            range.include(depth);
        }
        assert_eq!(range.load(), DepthRange::new(120, 45000));
    }
}
