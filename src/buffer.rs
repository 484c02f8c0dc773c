// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pre-allocated point storage shared between the ingestion thread and its
//! consumers.
//!
//! # Architecture
//!
//! ```text
//!  ingestion thread                 shared (short lock)             consumer
//! ┌──────────────────┐  publish  ┌─────────────────────────┐ take_new ┌──────────┐
//! │ PointRing        │ ────────► │ DoubleBuffer            │ ───────► │ PointRing│
//! │  x,y,z: [f32]    │  range    │  PointRing + from/len   │  range   │          │
//! │  invalid: [bool] │           │  consumed flag + meta   │          │          │
//! └──────────────────┘           └─────────────────────────┘          └──────────┘
//! ```
//!
//! Only the changed slot range is copied on either side. The producer never
//! waits on the consumer: if the consumer has not taken the previous range
//! yet, the new range is appended to it rather than replacing it.
//!
//! [`SwapSlot`] is the whole-value variant used for per-revolution feature
//! frames, where the consumer only ever wants the latest complete result.

use crate::lidar::Vec3;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Fixed capacity ring of points in structure-of-arrays layout.
///
/// Slots are addressed modulo the capacity. Invalid slots keep their position
/// in the ring but carry no geometry.
#[derive(Debug, Clone)]
pub struct PointRing {
    x: Vec<f32>,
    y: Vec<f32>,
    z: Vec<f32>,
    invalid: Vec<bool>,
}

impl PointRing {
    /// Create a ring of `capacity` slots, all initially invalid.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: vec![0.0; capacity],
            y: vec![0.0; capacity],
            z: vec![0.0; capacity],
            invalid: vec![true; capacity],
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn set(&mut self, slot: usize, point: Vec3) {
        let i = slot % self.capacity();
        self.x[i] = point.x;
        self.y[i] = point.y;
        self.z[i] = point.z;
        self.invalid[i] = false;
    }

    #[inline]
    pub fn set_invalid(&mut self, slot: usize) {
        let i = slot % self.capacity();
        self.x[i] = 0.0;
        self.y[i] = 0.0;
        self.z[i] = 0.0;
        self.invalid[i] = true;
    }

    /// Point at `slot`, `None` if the slot is invalid.
    #[inline]
    pub fn get(&self, slot: usize) -> Option<Vec3> {
        let i = slot % self.capacity();
        if self.invalid[i] {
            None
        } else {
            Some(Vec3::new(self.x[i], self.y[i], self.z[i]))
        }
    }

    #[inline]
    pub fn is_invalid(&self, slot: usize) -> bool {
        self.invalid[slot % self.capacity()]
    }

    pub fn x(&self) -> &[f32] {
        &self.x
    }

    pub fn y(&self) -> &[f32] {
        &self.y
    }

    pub fn z(&self) -> &[f32] {
        &self.z
    }

    pub fn invalid(&self) -> &[bool] {
        &self.invalid
    }

    /// Copy `len` slots starting at `from` out of `src`, wrapping at the end
    /// of the ring. Both rings must have the same capacity.
    pub fn copy_range_from(&mut self, src: &PointRing, from: usize, len: usize) {
        debug_assert_eq!(self.capacity(), src.capacity());
        let cap = self.capacity();
        if cap == 0 {
            return;
        }
        let from = from % cap;
        let len = len.min(cap);
        let first = len.min(cap - from);

        self.copy_span(src, from, first);
        self.copy_span(src, 0, len - first);
    }

    fn copy_span(&mut self, src: &PointRing, from: usize, len: usize) {
        let r = from..from + len;
        self.x[r.clone()].copy_from_slice(&src.x[r.clone()]);
        self.y[r.clone()].copy_from_slice(&src.y[r.clone()]);
        self.z[r.clone()].copy_from_slice(&src.z[r.clone()]);
        self.invalid[r.clone()].copy_from_slice(&src.invalid[r]);
    }

    /// Number of valid slots in the ring.
    pub fn valid_count(&self) -> usize {
        self.invalid.iter().filter(|&&i| !i).count()
    }
}

impl Default for PointRing {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

/// Range of slots published since the consumer's previous call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NewPoints<M> {
    pub from: usize,
    pub len: usize,
    pub meta: M,
}

#[derive(Debug)]
struct Shared<M> {
    points: PointRing,
    from: usize,
    len: usize,
    consumed: bool,
    meta: M,
}

/// Lock-guarded ring with a consumed flag, written by one producer and
/// drained by one consumer at its own cadence.
///
/// `M` is small per-publish metadata (sensor status) handed over with the
/// points.
#[derive(Debug)]
pub struct DoubleBuffer<M> {
    shared: Mutex<Shared<M>>,
}

impl<M: Copy + Default> DoubleBuffer<M> {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Mutex::new(Shared {
                points: PointRing::with_capacity(capacity),
                from: 0,
                len: 0,
                consumed: true,
                meta: M::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared<M>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.lock().points.capacity()
    }

    /// Copy slots `[from, from + len)` of `src` into the shared ring.
    ///
    /// When the previous range was not consumed yet it is extended to end at
    /// the new range, so nothing published is lost to a slow consumer. Slots
    /// skipped between the two ranges are marked invalid. Once the pending
    /// range covers the whole ring it is reported as the full ring, oldest
    /// slot first.
    pub fn publish(&self, src: &PointRing, from: usize, len: usize, meta: M) {
        let mut shared = self.lock();
        let cap = shared.points.capacity();
        if cap == 0 || len == 0 {
            return;
        }
        let from = from % cap;
        let len = len.min(cap);

        shared.points.copy_range_from(src, from, len);

        if shared.consumed {
            shared.from = from;
            shared.len = len;
        } else {
            let end = (shared.from + shared.len) % cap;
            let gap = (from + cap - end) % cap;
            for k in 0..gap.min(cap - shared.len) {
                shared.points.set_invalid(end + k);
            }
            let total = shared.len + gap + len;
            if total >= cap {
                shared.from = (from + len) % cap;
                shared.len = cap;
            } else {
                shared.len = total;
            }
        }

        shared.consumed = false;
        shared.meta = meta;
    }

    /// Copy everything published since the previous call into `dst` and mark
    /// it consumed. Returns `None` when nothing new arrived.
    pub fn take_new(&self, dst: &mut PointRing) -> Option<NewPoints<M>> {
        let mut shared = self.lock();
        if shared.consumed {
            return None;
        }
        dst.copy_range_from(&shared.points, shared.from, shared.len);
        shared.consumed = true;
        Some(NewPoints {
            from: shared.from,
            len: shared.len,
            meta: shared.meta,
        })
    }

    /// Latest metadata, regardless of the consumed flag.
    pub fn meta(&self) -> M {
        self.lock().meta
    }
}

/// Single-value handoff where the consumer only wants the latest result.
///
/// Values are exchanged with `mem::swap`, so both sides keep reusing their
/// allocations once warmed up.
#[derive(Debug, Default)]
pub struct SwapSlot<T> {
    slot: Mutex<(T, bool)>,
}

impl<T: Default> SwapSlot<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new((T::default(), false)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, (T, bool)> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand `value` over, replacing any unread value. `value` receives the
    /// previous content of the slot for reuse.
    pub fn publish(&self, value: &mut T) {
        let mut slot = self.lock();
        std::mem::swap(&mut slot.0, value);
        slot.1 = true;
    }

    /// Swap the latest unread value into `dst`. Returns `false` and leaves
    /// `dst` untouched when nothing new was published.
    pub fn take(&self, dst: &mut T) -> bool {
        let mut slot = self.lock();
        if !slot.1 {
            return false;
        }
        std::mem::swap(&mut slot.0, dst);
        slot.1 = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with(cap: usize, slots: std::ops::Range<usize>) -> PointRing {
        let mut ring = PointRing::with_capacity(cap);
        for s in slots {
            ring.set(s, Vec3::new(s as f32, 0.0, 0.0));
        }
        ring
    }

    #[test]
    fn test_point_ring_basic() {
        let mut ring = PointRing::with_capacity(4);
        assert_eq!(ring.capacity(), 4);
        assert_eq!(ring.valid_count(), 0);

        ring.set(5, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(ring.get(1), Some(Vec3::new(1.0, 2.0, 3.0)));
        assert!(!ring.is_invalid(1));

        ring.set_invalid(1);
        assert_eq!(ring.get(1), None);
        assert_eq!(ring.x()[1], 0.0);
    }

    #[test]
    fn test_copy_range_wraps() {
        let src = ring_with(8, 0..8);
        let mut dst = PointRing::with_capacity(8);
        dst.copy_range_from(&src, 6, 4);

        assert_eq!(dst.x(), &[0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 6.0, 7.0]);
        assert_eq!(dst.valid_count(), 4);
    }

    #[test]
    fn test_publish_take() {
        let db: DoubleBuffer<u32> = DoubleBuffer::new(8);
        let src = ring_with(8, 0..8);
        let mut dst = PointRing::with_capacity(8);

        assert!(db.take_new(&mut dst).is_none());

        db.publish(&src, 2, 3, 7);
        let new = db.take_new(&mut dst).unwrap();
        assert_eq!(
            new,
            NewPoints {
                from: 2,
                len: 3,
                meta: 7
            }
        );
        assert_eq!(&dst.x()[2..5], &[2.0, 3.0, 4.0]);
        assert_eq!(dst.valid_count(), 3);

        // Consumed, nothing new
        assert!(db.take_new(&mut dst).is_none());
    }

    #[test]
    fn test_publish_extends_unconsumed() {
        let db: DoubleBuffer<()> = DoubleBuffer::new(8);
        let src = ring_with(8, 0..8);
        let mut dst = PointRing::with_capacity(8);

        db.publish(&src, 6, 2, ());
        db.publish(&src, 0, 3, ());
        let new = db.take_new(&mut dst).unwrap();
        assert_eq!((new.from, new.len), (6, 5));
        assert_eq!(dst.valid_count(), 5);
        assert_eq!(dst.get(7), Some(Vec3::new(7.0, 0.0, 0.0)));
        assert_eq!(dst.get(2), Some(Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_publish_gap_marked_invalid() {
        let db: DoubleBuffer<()> = DoubleBuffer::new(8);
        let src = ring_with(8, 0..8);
        let mut dst = ring_with(8, 0..8);

        db.publish(&src, 0, 2, ());
        db.publish(&src, 4, 2, ());
        let new = db.take_new(&mut dst).unwrap();
        assert_eq!((new.from, new.len), (0, 6));
        assert!(dst.is_invalid(2));
        assert!(dst.is_invalid(3));
        assert!(!dst.is_invalid(4));
    }

    #[test]
    fn test_publish_clamps_to_full_ring() {
        let db: DoubleBuffer<()> = DoubleBuffer::new(8);
        let src = ring_with(8, 0..8);
        let mut dst = PointRing::with_capacity(8);

        db.publish(&src, 0, 4, ());
        db.publish(&src, 4, 4, ());
        db.publish(&src, 0, 3, ());
        let new = db.take_new(&mut dst).unwrap();
        assert_eq!((new.from, new.len), (3, 8));
        assert_eq!(dst.valid_count(), 8);
    }

    #[test]
    fn test_swap_slot() {
        let slot: SwapSlot<Vec<u32>> = SwapSlot::new();
        let mut dst = Vec::new();
        assert!(!slot.take(&mut dst));

        let mut a = vec![1, 2, 3];
        slot.publish(&mut a);
        assert!(a.is_empty());

        let mut b = vec![4];
        slot.publish(&mut b);
        assert_eq!(b, vec![1, 2, 3]);

        assert!(slot.take(&mut dst));
        assert_eq!(dst, vec![4]);
        assert!(!slot.take(&mut dst));
    }
}
