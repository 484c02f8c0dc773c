// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-revolution scan points and the sort keys and metrics used to segment
//! them.

use crate::lidar::Vec3;
use std::{cmp::Ordering, f32::consts::PI};

/// A valid laser point of one revolution, annotated during segmentation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScanPoint {
    pub point: Vec3,
    /// Revolution slot the reading was stored in
    pub slot: usize,
    /// Local surface normal angle in [0, π)
    pub orientation: f32,
    /// Signed distance along the owning angular cluster's mean normal
    pub radial_offset: f32,
    pub angular_cluster: i32,
    pub radial_cluster: i32,
}

impl ScanPoint {
    pub fn new(point: Vec3, slot: usize) -> Self {
        Self {
            point,
            slot,
            ..Default::default()
        }
    }
}

/// Valid points of one sensor revolution in slot order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scan {
    /// Timestamp of the first reading of the revolution
    pub timestamp_us: u64,
    pub points: Vec<ScanPoint>,
}

impl Scan {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[inline]
pub fn by_orientation(a: &ScanPoint, b: &ScanPoint) -> Ordering {
    a.orientation.total_cmp(&b.orientation)
}

#[inline]
pub fn by_radial_offset(a: &ScanPoint, b: &ScanPoint) -> Ordering {
    a.radial_offset.total_cmp(&b.radial_offset)
}

/// Distance between two undirected line orientations in [0, π), at most π/2.
#[inline]
pub fn orientation_distance(a: &ScanPoint, b: &ScanPoint) -> f32 {
    let d = (a.orientation - b.orientation).abs();
    if d <= PI / 2.0 { d } else { PI - d }
}

#[inline]
pub fn offset_distance(a: &ScanPoint, b: &ScanPoint) -> f32 {
    (a.radial_offset - b.radial_offset).abs()
}

/// Circular mean of undirected orientations, in [0, π).
///
/// Angles are doubled before averaging so that 0 and π, which describe the
/// same line, reinforce rather than cancel.
pub fn mean_circular_angle_0_pi<'a, I>(points: I) -> f32
where
    I: IntoIterator<Item = &'a ScanPoint>,
{
    let (mut sines, mut cosines) = (0.0f32, 0.0f32);
    for p in points {
        let (s, c) = (2.0 * p.orientation).sin_cos();
        sines += s;
        cosines += c;
    }

    let mut angle = sines.atan2(cosines);
    if angle < 0.0 {
        angle += 2.0 * PI;
    }
    let half = angle / 2.0;
    if half >= PI { 0.0 } else { half }
}
