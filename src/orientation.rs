// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Local surface orientation from a total least squares line fit.
//!
//! Each point gets the normal angle of the orthogonal-regression line
//! through its circular neighbourhood `[i - k, i + k]`. Unlike ordinary
//! least squares the fit does not degenerate for near-vertical lines.

use crate::scan::ScanPoint;
use std::f32::consts::PI;

/// Pair of coordinate axes the laser sweeps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Plane {
    #[default]
    XY,
    XZ,
    YZ,
}

impl Plane {
    /// Axis indices (0 = x, 1 = y, 2 = z) of the plane's two coordinates.
    #[inline]
    pub fn axes(self) -> (usize, usize) {
        match self {
            Plane::XY => (0, 1),
            Plane::XZ => (0, 2),
            Plane::YZ => (1, 2),
        }
    }
}

#[inline]
fn wrap(i: isize, n: usize) -> usize {
    i.rem_euclid(n as isize) as usize
}

/// Normal angle in [0, π) of the total least squares line through points
/// `from..=to`. Indices are circular and may be negative or exceed the
/// slice length.
pub fn estimate_angle(points: &[ScanPoint], from: isize, to: isize, plane: Plane) -> f32 {
    let n = points.len();
    let (ax, ay) = plane.axes();
    let count = (to - from + 1) as f32;

    let (mut x_mean, mut y_mean) = (0.0f32, 0.0f32);
    for i in from..=to {
        let p = &points[wrap(i, n)].point;
        x_mean += p.axis(ax);
        y_mean += p.axis(ay);
    }
    x_mean /= count;
    y_mean /= count;

    let (mut sxy, mut syy_less_sxx) = (0.0f32, 0.0f32);
    for i in from..=to {
        let p = &points[wrap(i, n)].point;
        let dx = x_mean - p.axis(ax);
        let dy = y_mean - p.axis(ay);
        sxy += dx * dy;
        syy_less_sxx += dy * dy - dx * dx;
    }

    let angle = (-2.0 * sxy).atan2(syy_less_sxx) / 2.0;
    if angle < 0.0 { angle + PI } else { angle }
}

/// Assign every point the orientation of its `2k + 1` point neighbourhood.
/// Scans with fewer points than one window are left untouched and `false`
/// is returned.
pub fn estimate_local_orientation(points: &mut [ScanPoint], k: usize, plane: Plane) -> bool {
    let n = points.len();
    if k == 0 || n < 2 * k + 1 {
        return false;
    }

    let k = k as isize;
    for i in 0..n {
        let c = i as isize;
        let angle = estimate_angle(points, c - k, c + k, plane);
        points[i].orientation = angle;
    }
    true
}
