// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Two-level scan segmentation and the thread that runs it.
//!
//! The first level groups points of a revolution by local surface
//! orientation, so parallel walls end up in one angular cluster. The second
//! level splits each angular cluster by signed distance along its mean
//! normal, separating the parallel walls again. Radial cluster ids are
//! offset per angular cluster so they are unique across the scan.

use crate::{
    buffer::SwapSlot,
    cluster::{CircularDbscan, Cluster},
    lidar::Error,
    orientation::{Plane, estimate_local_orientation},
    scan::{
        Scan, ScanPoint, by_orientation, by_radial_offset, mean_circular_angle_0_pi,
        offset_distance, orientation_distance,
    },
    snapshot::SnapshotWriter,
};
use kanal::{Receiver, Sender};
use std::{
    io::{self, Write},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, info_span, instrument};

/// Which cluster id ends up in a [`FeatureFrame`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SegmentationLevel {
    /// Orientation clusters only
    Angle,
    /// Orientation clusters split by distance
    #[default]
    AngleDistance,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentationConfig {
    pub angular_eps_deg: f32,
    pub angular_min_points: usize,
    pub radial_eps_m: f32,
    pub radial_min_points: usize,
    /// Half width of the orientation fit window
    pub orientation_k: usize,
    pub plane: Plane,
    pub level: SegmentationLevel,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            angular_eps_deg: 2.0,
            angular_min_points: 10,
            radial_eps_m: 0.01,
            radial_min_points: 10,
            orientation_k: 2,
            plane: Plane::XY,
            level: SegmentationLevel::AngleDistance,
        }
    }
}

impl SegmentationConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.angular_eps_deg > 0.0 && self.angular_eps_deg < 90.0) {
            return Err(Error::Config(format!(
                "angular eps must be in (0, 90) degrees, got {}",
                self.angular_eps_deg
            )));
        }
        if !(self.radial_eps_m.is_finite() && self.radial_eps_m > 0.0) {
            return Err(Error::Config(format!(
                "radial eps must be positive, got {}",
                self.radial_eps_m
            )));
        }
        if self.angular_min_points == 0 || self.radial_min_points == 0 {
            return Err(Error::Config("min points must be at least 1".to_string()));
        }
        if self.orientation_k == 0 {
            return Err(Error::Config("orientation window must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Segmentation result of one revolution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureFrame {
    pub timestamp_us: u64,
    /// Points in segmentation order, annotated with both cluster levels
    pub points: Vec<ScanPoint>,
    /// Cluster id per point at the configured level, 0 for noise
    pub cluster_ids: Vec<i32>,
    pub angular_clusters: usize,
    pub radial_clusters: usize,
    pub elapsed: Duration,
}

pub struct FeatureExtractor {
    config: SegmentationConfig,
    dbscan: CircularDbscan,
    angular: Vec<Cluster>,
    radial: Vec<Cluster>,
    scratch: Vec<ScanPoint>,
}

impl FeatureExtractor {
    pub fn new(config: SegmentationConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            dbscan: CircularDbscan::with_capacity(360),
            angular: Vec::new(),
            radial: Vec::new(),
            scratch: Vec::new(),
        })
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Segment `scan` in place and fill `frame` with the result.
    ///
    /// Scans with fewer than three points only have their ids cleared and
    /// `false` is returned, `frame` is left untouched.
    #[instrument(skip_all, fields(ts = scan.timestamp_us))]
    pub fn process(&mut self, scan: &mut Scan, frame: &mut FeatureFrame) -> bool {
        let start = Instant::now();
        let Self {
            config,
            dbscan,
            angular,
            radial,
            scratch,
        } = self;
        let points = &mut scan.points;

        for p in points.iter_mut() {
            p.angular_cluster = 0;
            p.radial_cluster = 0;
        }
        if points.len() < 3 {
            return false;
        }

        info_span!("angular").in_scope(|| {
            estimate_local_orientation(points, config.orientation_k, config.plane);
            dbscan.cluster_into(
                points,
                config.angular_eps_deg.to_radians(),
                config.angular_min_points,
                by_orientation,
                orientation_distance,
                angular,
            );
            for (p, &id) in points.iter_mut().zip(dbscan.labels()) {
                p.angular_cluster = id;
            }
        });

        let radial_clusters = info_span!("radial").in_scope(|| {
            let (ax, ay) = config.plane.axes();
            let mut offset = 0;
            for c in angular.iter() {
                scratch.clear();
                scratch.extend(c.view(points).iter().copied());

                let (sin, cos) = mean_circular_angle_0_pi(scratch.iter()).sin_cos();
                for p in scratch.iter_mut() {
                    p.radial_offset = p.point.axis(ax) * cos + p.point.axis(ay) * sin;
                }

                dbscan.cluster_into(
                    scratch,
                    config.radial_eps_m,
                    config.radial_min_points,
                    by_radial_offset,
                    offset_distance,
                    radial,
                );
                for (p, &id) in scratch.iter_mut().zip(dbscan.labels()) {
                    p.radial_cluster = if id > 0 { id + offset } else { 0 };
                }
                if let Some(last) = radial.last() {
                    offset += last.id();
                }

                for (dst, src) in c.view_mut(points).iter_mut().zip(scratch.iter()) {
                    *dst = *src;
                }
            }
            offset as usize
        });

        frame.timestamp_us = scan.timestamp_us;
        frame.points.clear();
        frame.points.extend_from_slice(points);
        frame.cluster_ids.clear();
        frame
            .cluster_ids
            .extend(points.iter().map(|p| match config.level {
                SegmentationLevel::Angle => p.angular_cluster,
                SegmentationLevel::AngleDistance => p.radial_cluster,
            }));
        frame.angular_clusters = angular.len();
        frame.radial_clusters = radial_clusters;
        frame.elapsed = start.elapsed();
        true
    }
}

// If the receiver is empty, waits for the next message, otherwise returns the
// most recent message on this receiver. If the receiver is closed, returns None
fn drain_recv<T>(rx: &Receiver<T>) -> Option<T> {
    let mut msg = match rx.try_recv() {
        Err(_) => {
            return None;
        }
        Ok(Some(v)) => v,
        Ok(None) => return rx.recv().ok(),
    };
    while let Ok(Some(v)) = rx.try_recv() {
        msg = v;
    }
    Some(msg)
}

/// Run segmentation on its own thread until the scan channel closes.
///
/// Only the latest queued revolution is processed, older ones are skipped.
/// Results are handed over through `output`. Processed scans go back on
/// `recycle` for reuse by the producer. The dump writer, if any, is
/// returned when the thread ends.
pub fn spawn_feature_thread<W>(
    rx: Receiver<Scan>,
    recycle: Option<Sender<Scan>>,
    mut extractor: FeatureExtractor,
    output: Arc<SwapSlot<FeatureFrame>>,
    mut dump: Option<SnapshotWriter<W>>,
) -> io::Result<JoinHandle<Option<SnapshotWriter<W>>>>
where
    W: Write + Send + 'static,
{
    thread::Builder::new()
        .name("features".to_string())
        .spawn(move || {
            let mut frame = FeatureFrame::default();
            let mut frames = 0u64;

            while let Some(mut scan) = drain_recv(&rx) {
                let segmented = extractor.process(&mut scan, &mut frame);
                let len = scan.len();
                if let Some(tx) = &recycle {
                    // a full or closed channel just drops the scan
                    let _ = tx.try_send(scan);
                }
                if !segmented {
                    debug!("skipping revolution with {} points", len);
                    continue;
                }
                debug!(
                    "segmented {} points into {} angular / {} radial clusters in {:?}",
                    frame.points.len(),
                    frame.angular_clusters,
                    frame.radial_clusters,
                    frame.elapsed
                );

                if let Some(writer) = dump.as_mut() {
                    if let Err(e) = writer.write_scan(&frame.points, &frame.cluster_ids) {
                        error!("scan dump failed, disabling: {:?}", e);
                        dump = None;
                    }
                }

                output.publish(&mut frame);
                frames += 1;
            }

            if let Some(writer) = dump.as_mut() {
                if let Err(e) = writer.flush() {
                    error!("scan dump flush failed: {:?}", e);
                }
            }
            info!("feature thread finished after {} frames", frames);
            dump
        })
}
