// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! End to end tests: a robot driving through a square room, odometry and
//! laser datagrams through ingestion, publishing and segmentation.

use edgefirst_scanmap::{
    buffer::{DoubleBuffer, PointRing},
    features::{FeatureExtractor, FeatureFrame, SegmentationConfig},
    history::PositionHistory,
    laser::{self, BatchStatus, LaserConfig, LaserIngest, LaserStatus},
    lidar::Vec3,
    odometry::{self, DeadReckoning, OdometryPacket, WheelGeometry},
    packet::{LaserPacket, READINGS_PER_PACKET, RawReading},
    packet_source::ReplaySource,
    scan::Scan,
};
use std::{
    collections::HashSet,
    f32::consts::PI,
    sync::{Arc, atomic::AtomicBool},
};

/// Walls at x = ±ROOM and y = ±ROOM
const ROOM: f32 = 2.0;
const START_X: f32 = -0.5;
/// Robot speed along +X in meters per microsecond
const SPEED: f32 = 0.5e-6;
const ODOMETRY_PERIOD_US: u64 = 4_000;
const LASER_START_US: u64 = 10_000;
const SAMPLE_US: u16 = 100;
const PACKETS: usize = 12;

/// 1 mm of travel per encoder count
fn geometry() -> WheelGeometry {
    WheelGeometry {
        wheel_diameter_mm: 360.0 / PI,
        counts_per_rotation: 360,
        reverse_polarity: false,
    }
}

fn odometry_packet(k: u64) -> OdometryPacket {
    let t = k * ODOMETRY_PERIOD_US;
    let counts = (t as f32 * SPEED * 1000.0).round() as i32;
    OdometryPacket {
        timestamp_us: t,
        left: counts,
        right: counts,
        heading: 0,
    }
}

fn wall_distance(px: f32, py: f32, angle_deg: f32) -> f32 {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let mut d = f32::INFINITY;
    if cos > 1e-6 {
        d = d.min((ROOM - px) / cos);
    }
    if cos < -1e-6 {
        d = d.min((-ROOM - px) / cos);
    }
    if sin > 1e-6 {
        d = d.min((ROOM - py) / sin);
    }
    if sin < -1e-6 {
        d = d.min((-ROOM - py) / sin);
    }
    d
}

/// Laser packet `k`, one reading per degree starting at 0°.
fn laser_packet(k: usize) -> LaserPacket {
    let first = k * READINGS_PER_PACKET;
    let timestamp_us = LASER_START_US + first as u64 * SAMPLE_US as u64;
    let mut readings = [RawReading::default(); READINGS_PER_PACKET];
    for (i, r) in readings.iter_mut().enumerate() {
        let t = timestamp_us + i as u64 * SAMPLE_US as u64;
        let px = START_X + t as f32 * SPEED;
        *r = RawReading::from_degrees(((first + i) % 360) as f32, 0);
        r.distance_mm = (wall_distance(px, 0.0, r.angle_deg()) * 1000.0).round() as u16;
    }
    LaserPacket {
        timestamp_us,
        sample_us: SAMPLE_US,
        readings,
    }
}

fn assert_on_walls(ring: &PointRing) {
    let mut checked = 0;
    for slot in 0..ring.capacity() {
        if let Some(p) = ring.get(slot) {
            let off_wall = (ROOM - p.x.abs()).abs().min((ROOM - p.y.abs()).abs());
            assert!(off_wall < 5e-3, "slot {} at {:?} is {}m off the walls", slot, p, off_wall);
            checked += 1;
        }
    }
    assert!(checked > 300, "only {} valid points", checked);
}

fn assert_four_walls(scan: Scan) {
    let mut extractor = FeatureExtractor::new(SegmentationConfig::default()).unwrap();
    let mut scan = scan;
    let mut frame = FeatureFrame::default();
    assert!(extractor.process(&mut scan, &mut frame));
    assert!(frame.radial_clusters >= 4, "{} segments", frame.radial_clusters);

    // The reading straight at each wall
    let ids: HashSet<i32> = [0, 90, 180, 270]
        .iter()
        .map(|&slot| {
            let i = frame.points.iter().position(|p| p.slot == slot).unwrap();
            frame.cluster_ids[i]
        })
        .collect();
    assert_eq!(ids.len(), 4, "{:?}", ids);
    assert!(!ids.contains(&0));
}

struct Odometry {
    dead_reckoning: DeadReckoning,
    history: Arc<PositionHistory>,
    next: u64,
}

impl Odometry {
    /// Feed every odometry sample up to and including `t`.
    fn advance_to(&mut self, t: u64) {
        while self.next * ODOMETRY_PERIOD_US <= t {
            if let Some(pose) = self.dead_reckoning.update(&odometry_packet(self.next)) {
                self.history.put(pose);
            }
            self.next += 1;
        }
    }
}

#[test]
fn test_lagging_odometry_is_caught_up() {
    let history = Arc::new(PositionHistory::new(512));
    let output = Arc::new(DoubleBuffer::<LaserStatus>::new(360));
    let (tx, rx) = kanal::bounded(4);
    let mut ingest = LaserIngest::new(LaserConfig::default(), history.clone(), output.clone())
        .unwrap()
        .with_scan_sender(tx);
    let mut odometry = Odometry {
        dead_reckoning: DeadReckoning::with_origin(geometry(), Vec3::new(START_X, 0.0, 0.0)),
        history,
        next: 0,
    };

    for k in 0..PACKETS {
        let packet = laser_packet(k);
        let lagging = k == 3 || k == 7;
        if lagging {
            odometry.advance_to(packet.timestamp_us);
        } else {
            odometry.advance_to(packet.end_timestamp_us() + ODOMETRY_PERIOD_US);
        }

        let status = ingest.process_datagram(&packet.to_bytes()).unwrap();
        match k {
            3 | 7 => assert!(matches!(status, BatchStatus::Deferred { len: 96, .. }), "{:?}", status),
            4 | 8 => assert!(matches!(status, BatchStatus::Published { len: 192, .. }), "{:?}", status),
            _ => assert!(matches!(status, BatchStatus::Published { len: 96, .. }), "{:?}", status),
        }
    }
    assert!(ingest.pending().is_none());
    assert_eq!(ingest.status().dropped_batches, 0);

    let mut ring = PointRing::with_capacity(360);
    let new = output.take_new(&mut ring).unwrap();
    assert_eq!(new.len, 360);
    assert_on_walls(&ring);

    let mut scans = Vec::new();
    while let Ok(Some(scan)) = rx.try_recv() {
        scans.push(scan);
    }
    assert_eq!(scans.len(), 3);
    for scan in &scans {
        assert_eq!(scan.len(), 360);
    }
    assert_four_walls(scans.remove(1));
}

#[tokio::test]
async fn test_transport_loops() {
    let history = Arc::new(PositionHistory::new(512));
    let output = Arc::new(DoubleBuffer::new(360));
    let run = Arc::new(AtomicBool::new(true));

    let odometry_source: ReplaySource = (0..40).map(|k| odometry_packet(k).to_bytes()).collect();
    odometry::run(
        odometry_source,
        DeadReckoning::with_origin(geometry(), Vec3::new(START_X, 0.0, 0.0)),
        history.clone(),
        run.clone(),
    )
    .await
    .unwrap();
    assert_eq!(history.len(), 39);

    let (tx, rx) = kanal::bounded(4);
    let ingest = LaserIngest::new(LaserConfig::default(), history, output.clone())
        .unwrap()
        .with_scan_sender(tx);
    let laser_source: ReplaySource = (0..PACKETS).map(|k| laser_packet(k).to_bytes()).collect();
    let status = laser::run(laser_source, ingest, run).await.unwrap();

    assert_eq!(status.packets, PACKETS as u64);
    assert_eq!(status.revolutions, 3);
    assert_eq!(status.dropped_batches, 0);
    assert!(status.rpm > 1600.0 && status.rpm < 1700.0, "{}", status.rpm);

    let mut ring = PointRing::with_capacity(360);
    let new = output.take_new(&mut ring).unwrap();
    assert_eq!(new.meta, status);
    assert_on_walls(&ring);

    let scan = rx.try_recv().unwrap().unwrap();
    assert_four_walls(scan);
}
