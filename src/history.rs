// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Time-indexed robot pose history.
//!
//! [`PositionHistory`] keeps a bounded, time-ordered ring of [`PoseSample`]s
//! shared between the pose producer and every sensor ingestion thread. Laser
//! ingestion asks for a [`Snapshot`] covering the time span of a batch of
//! readings and then interpolates the pose at each reading's exact timestamp
//! without holding the lock.

use crate::lidar::Vec3;
use std::{
    collections::VecDeque,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::debug;

/// Robot pose at an instant, heading in degrees counter-clockwise about +Z.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PoseSample {
    pub timestamp_us: u64,
    pub position: Vec3,
    pub heading: f32,
}

impl PoseSample {
    pub fn new(timestamp_us: u64, position: Vec3, heading: f32) -> Self {
        Self {
            timestamp_us,
            position,
            heading,
        }
    }

    /// Express a robot-frame point in the world frame: yaw by the heading,
    /// then translate by the position.
    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let (sin, cos) = self.heading.to_radians().sin_cos();
        Vec3::new(
            cos * p.x - sin * p.y + self.position.x,
            sin * p.x + cos * p.y + self.position.y,
            p.z + self.position.z,
        )
    }
}

/// Reasons a [`PositionHistory::snapshot`] request cannot be served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotError {
    /// The end of the requested span is newer than the newest sample. Retry
    /// once more pose data has arrived.
    NotYet,
    /// The start of the requested span is older than anything retained. The
    /// data is permanently gone and the request should be dropped.
    NotInHistory,
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SnapshotError::NotYet => write!(f, "pose data not available yet"),
            SnapshotError::NotInHistory => write!(f, "pose data no longer in history"),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Fixed capacity ring of pose samples with strictly increasing timestamps.
///
/// Safe to share between threads; every operation takes a single short-held
/// lock. Once full, the oldest sample is evicted on each accepted `put`.
pub struct PositionHistory {
    capacity: usize,
    samples: Mutex<VecDeque<PoseSample>>,
}

impl PositionHistory {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "PositionHistory capacity must be non-zero");
        Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PoseSample>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new sample. Returns `false` (and stores nothing) when the
    /// sample is not newer than the newest retained one.
    pub fn put(&self, sample: PoseSample) -> bool {
        let mut samples = self.lock();
        if let Some(newest) = samples.back() {
            if sample.timestamp_us <= newest.timestamp_us {
                debug!(
                    "discarding out of order pose at {} (newest {})",
                    sample.timestamp_us, newest.timestamp_us
                );
                return false;
            }
        }
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
        true
    }

    /// Copy out the samples needed to interpolate any time in
    /// `[t_from, t_to]`: the last sample at or before `t_from` through the
    /// first sample at or after `t_to`.
    pub fn snapshot(&self, t_from: u64, t_to: u64) -> Result<Snapshot, SnapshotError> {
        let (t_from, t_to) = if t_from <= t_to {
            (t_from, t_to)
        } else {
            (t_to, t_from)
        };

        let samples = self.lock();
        let (oldest, newest) = match (samples.front(), samples.back()) {
            (Some(oldest), Some(newest)) => (oldest.timestamp_us, newest.timestamp_us),
            _ => return Err(SnapshotError::NotYet),
        };
        if oldest > t_from {
            return Err(SnapshotError::NotInHistory);
        }
        if newest < t_to {
            return Err(SnapshotError::NotYet);
        }

        let from = samples.partition_point(|s| s.timestamp_us <= t_from) - 1;
        let to = samples.partition_point(|s| s.timestamp_us < t_to);

        Ok(Snapshot {
            samples: samples.range(from..=to).copied().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn oldest(&self) -> Option<PoseSample> {
        self.lock().front().copied()
    }

    pub fn newest(&self) -> Option<PoseSample> {
        self.lock().back().copied()
    }

    /// Copy of all retained samples, oldest first.
    pub fn to_vec(&self) -> Vec<PoseSample> {
        self.lock().iter().copied().collect()
    }
}

/// Immutable, time-bounded slice of a [`PositionHistory`].
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    samples: Vec<PoseSample>,
}

impl Snapshot {
    pub fn start_us(&self) -> u64 {
        self.samples[0].timestamp_us
    }

    pub fn end_us(&self) -> u64 {
        self.samples[self.samples.len() - 1].timestamp_us
    }

    pub fn covers(&self, t: u64) -> bool {
        t >= self.start_us() && t <= self.end_us()
    }

    pub fn samples(&self) -> &[PoseSample] {
        &self.samples
    }

    /// Robot pose at `t`.
    ///
    /// Position is interpolated linearly and heading along the shorter arc,
    /// so 170° to -170° passes through 180° rather than 0°.
    ///
    /// # Panics
    ///
    /// Panics if `t` lies outside the snapshot's covered range.
    pub fn position_at(&self, t: u64) -> PoseSample {
        assert!(
            self.covers(t),
            "position_at({}) outside snapshot range [{}, {}]",
            t,
            self.start_us(),
            self.end_us()
        );

        let i = self.samples.partition_point(|s| s.timestamp_us < t);
        let next = self.samples[i];
        if next.timestamp_us == t {
            return next;
        }
        let prev = self.samples[i - 1];

        let frac = (t - prev.timestamp_us) as f64 / (next.timestamp_us - prev.timestamp_us) as f64;
        let frac = frac as f32;

        PoseSample {
            timestamp_us: t,
            position: prev.position.lerp(next.position, frac),
            heading: normalize_heading_deg(
                prev.heading + angle_diff_deg(prev.heading, next.heading) * frac,
            ),
        }
    }
}

/// Signed shortest rotation from `from` to `to` in degrees, within [-180, 180].
#[inline]
pub fn angle_diff_deg(from: f32, to: f32) -> f32 {
    let d = to - from;
    if d.abs() > 180.0 {
        d - 360.0 * d.signum()
    } else {
        d
    }
}

/// Wrap a heading into (-180, 180].
#[inline]
pub fn normalize_heading_deg(heading: f32) -> f32 {
    let h = heading.rem_euclid(360.0);
    if h > 180.0 {
        h - 360.0
    } else {
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    fn pose(t: u64, x: f32, heading: f32) -> PoseSample {
        PoseSample::new(t, Vec3::new(x, 0.0, 0.0), heading)
    }

    fn history_of(capacity: usize, stamps: &[u64]) -> PositionHistory {
        let history = PositionHistory::new(capacity);
        for &t in stamps {
            assert!(history.put(pose(t, t as f32, 0.0)));
        }
        history
    }

    #[test]
    fn test_put_rejects_non_monotonic() {
        let history = history_of(8, &[10, 20]);
        assert!(!history.put(pose(20, 0.0, 0.0)));
        assert!(!history.put(pose(5, 0.0, 0.0)));
        assert!(history.put(pose(21, 0.0, 0.0)));
        let stamps: Vec<u64> = history.to_vec().iter().map(|s| s.timestamp_us).collect();
        assert_eq!(stamps, vec![10, 20, 21]);
    }

    #[test]
    fn test_put_evicts_oldest() {
        let history = history_of(3, &[0, 10, 20, 30, 40]);
        assert_eq!(history.len(), 3);
        assert_eq!(history.oldest().unwrap().timestamp_us, 20);
        assert_eq!(history.newest().unwrap().timestamp_us, 40);
    }

    #[test]
    fn test_interpolation_midpoint() {
        let history = PositionHistory::new(4);
        history.put(PoseSample::new(0, Vec3::ZERO, 0.0));
        history.put(PoseSample::new(20, Vec3::new(2.0, 0.0, 0.0), 40.0));

        let snap = history.snapshot(0, 20).unwrap();
        let p = snap.position_at(10);
        assert_eq!(p.timestamp_us, 10);
        assert_abs_diff_eq!(p.position.x, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p.position.y, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p.heading, 20.0, epsilon = 1e-5);
    }

    #[test]
    fn test_exact_match_returns_sample() {
        let history = history_of(8, &[0, 10, 20, 30]);
        let snap = history.snapshot(5, 25).unwrap();
        assert_eq!(snap.position_at(20), pose(20, 20.0, 0.0));
        assert_eq!(snap.position_at(30), pose(30, 30.0, 0.0));
    }

    #[test]
    fn test_heading_wraps_through_180() {
        let history = PositionHistory::new(4);
        history.put(pose(0, 0.0, 170.0));
        history.put(pose(100, 0.0, -170.0));
        let snap = history.snapshot(0, 100).unwrap();

        assert_abs_diff_eq!(snap.position_at(50).heading, 180.0, epsilon = 1e-4);
        assert_abs_diff_eq!(snap.position_at(25).heading, 175.0, epsilon = 1e-4);
        assert_abs_diff_eq!(snap.position_at(75).heading, -175.0, epsilon = 1e-4);
    }

    #[test]
    fn test_snapshot_range_flags() {
        let history = history_of(4, &[0, 10, 20, 30]);

        let snap = history.snapshot(5, 25).unwrap();
        assert_eq!(snap.start_us(), 0);
        assert_eq!(snap.end_us(), 30);
        assert_eq!(snap.samples().len(), 4);

        assert_eq!(history.snapshot(5, 35), Err(SnapshotError::NotYet));

        // Overflow evicts t=0, the request now starts before the history
        history.put(pose(40, 40.0, 0.0));
        assert_eq!(history.snapshot(5, 15), Err(SnapshotError::NotInHistory));
        // Lost data wins over missing data
        assert_eq!(history.snapshot(5, 45), Err(SnapshotError::NotInHistory));
    }

    #[test]
    fn test_snapshot_is_minimal_bracket() {
        let history = history_of(16, &[0, 10, 20, 30, 40, 50]);
        let snap = history.snapshot(12, 28).unwrap();
        let stamps: Vec<u64> = snap.samples().iter().map(|s| s.timestamp_us).collect();
        assert_eq!(stamps, vec![10, 20, 30]);

        let snap = history.snapshot(20, 20).unwrap();
        let stamps: Vec<u64> = snap.samples().iter().map(|s| s.timestamp_us).collect();
        assert_eq!(stamps, vec![20]);
    }

    #[test]
    fn test_snapshot_empty_history() {
        let history = PositionHistory::new(4);
        assert_eq!(history.snapshot(0, 0), Err(SnapshotError::NotYet));
    }

    #[test]
    #[should_panic(expected = "outside snapshot range")]
    fn test_position_at_out_of_range() {
        let history = history_of(8, &[0, 10, 20]);
        let snap = history.snapshot(5, 15).unwrap();
        snap.position_at(25);
    }

    #[test]
    fn test_transform_point() {
        let p = PoseSample::new(0, Vec3::new(1.0, 2.0, 0.5), 90.0);
        let w = p.transform_point(Vec3::new(1.0, 0.0, 0.1));
        assert_abs_diff_eq!(w.x, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(w.y, 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(w.z, 0.6, epsilon = 1e-6);
    }

    #[test]
    fn test_angle_helpers() {
        assert_abs_diff_eq!(angle_diff_deg(170.0, -170.0), 20.0);
        assert_abs_diff_eq!(angle_diff_deg(-170.0, 170.0), -20.0);
        assert_abs_diff_eq!(angle_diff_deg(10.0, 50.0), 40.0);
        assert_abs_diff_eq!(normalize_heading_deg(-180.0), 180.0);
        assert_abs_diff_eq!(normalize_heading_deg(190.0), -170.0);
        assert_abs_diff_eq!(normalize_heading_deg(-190.0), 170.0);
    }

    #[test]
    fn test_concurrent_put_keeps_order() {
        let history = Arc::new(PositionHistory::new(64));
        let handles: Vec<_> = (0..4)
            .map(|k| {
                let history = history.clone();
                std::thread::spawn(move || {
                    for i in 0..200u64 {
                        history.put(pose(i * 4 + k, 0.0, 0.0));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stamps: Vec<u64> = history.to_vec().iter().map(|s| s.timestamp_us).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }
}
