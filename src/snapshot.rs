// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Text dump of segmented revolutions for offline inspection.
//!
//! One line per revolution with `3 × slots` values separated by `;`. Each
//! slot contributes `a_mm;cluster_id;b_mm` where `a` and `b` are the two
//! coordinates of the sweep plane in millimetres and the id is `0` for
//! noise. Slots without a valid point repeat the placeholder three times.

use crate::{orientation::Plane, scan::ScanPoint};
use std::io::{self, Write};

/// Value written for empty slots
pub const DEFAULT_PLACEHOLDER: i32 = 0;

pub struct SnapshotWriter<W: Write> {
    out: W,
    plane: Plane,
    placeholder: i32,
    /// Per-slot values of the revolution being written
    slots: Vec<Option<[i32; 3]>>,
    line: String,
}

impl<W: Write> SnapshotWriter<W> {
    pub fn new(out: W, slots: usize) -> Self {
        Self {
            out,
            plane: Plane::XY,
            placeholder: DEFAULT_PLACEHOLDER,
            slots: vec![None; slots],
            line: String::new(),
        }
    }

    pub fn with_plane(mut self, plane: Plane) -> Self {
        self.plane = plane;
        self
    }

    pub fn with_placeholder(mut self, placeholder: i32) -> Self {
        self.placeholder = placeholder;
        self
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Write one revolution. `ids[i]` is the cluster id of `points[i]`,
    /// points are placed by their slot and out-of-range slots are ignored.
    pub fn write_scan(&mut self, points: &[ScanPoint], ids: &[i32]) -> io::Result<()> {
        use std::fmt::Write as _;

        let (a, b) = self.plane.axes();
        self.slots.fill(None);
        for (p, &id) in points.iter().zip(ids) {
            if let Some(slot) = self.slots.get_mut(p.slot) {
                *slot = Some([
                    (p.point.axis(a) * 1000.0).round() as i32,
                    id,
                    (p.point.axis(b) * 1000.0).round() as i32,
                ]);
            }
        }

        self.line.clear();
        for (i, slot) in self.slots.iter().enumerate() {
            let values = slot.unwrap_or([self.placeholder; 3]);
            if i > 0 {
                self.line.push(';');
            }
            // Writing into a String cannot fail
            let _ = write!(self.line, "{};{};{}", values[0], values[1], values[2]);
        }
        self.line.push('\n');

        self.out.write_all(self.line.as_bytes())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
