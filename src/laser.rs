// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Laser ingestion and frame transform.
//!
//! Runs once per arriving [`LaserPacket`] on the transport task:
//!
//! 1. Readings become robot-frame points in a ring of per-revolution slots,
//!    each with its exact sample timestamp.
//! 2. The slot range is moved into the world frame using a
//!    [`PositionHistory`] snapshot. When pose data has not arrived yet the
//!    range is kept as the pending batch and retried with the next packet;
//!    contiguous packets are coalesced into the pending batch, which never
//!    grows beyond one revolution.
//! 3. Transformed ranges are published to a [`DoubleBuffer`] for consumers
//!    and collected into revolutions handed to the feature thread.
//!
//! Invalid readings and missing pose data are handled here by policy and
//! never surface as errors. Only a malformed datagram is an error.

use crate::{
    buffer::{DoubleBuffer, PointRing},
    history::{PositionHistory, SnapshotError},
    lidar::{Error, MountTransform, Vec3},
    packet::{LaserPacket, READINGS_PER_PACKET},
    packet_source::{PacketSource, pump},
    scan::{Scan, ScanPoint},
};
use kanal::{Receiver, Sender};
use std::sync::{
    Arc,
    atomic::AtomicBool,
};
use tracing::{debug, info, instrument, warn};

/// Smoothing factor of the packet interval moving average
const PACKET_INTERVAL_ALPHA: f32 = 0.02;

const MICROSECONDS_PER_MINUTE: f32 = 60.0 * 1_000_000.0;

/// Frame the published points are expressed in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReferenceFrame {
    /// Robot frame, pose history is not consulted
    Local,
    /// World frame through the robot pose at each reading's timestamp
    #[default]
    Global,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LaserConfig {
    /// Readings farther than this are treated as invalid
    pub max_range_m: f32,
    /// Laser to robot transform
    pub mount: MountTransform,
    /// Slots per revolution, one packet must fit
    pub revolution_slots: usize,
    pub frame: ReferenceFrame,
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            max_range_m: 10.0,
            mount: MountTransform::identity(),
            revolution_slots: 360,
            frame: ReferenceFrame::Global,
        }
    }
}

impl LaserConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.max_range_m.is_finite() && self.max_range_m > 0.0) {
            return Err(Error::Config(format!(
                "max range must be positive, got {}",
                self.max_range_m
            )));
        }
        if self.revolution_slots < READINGS_PER_PACKET {
            return Err(Error::Config(format!(
                "revolution slots ({}) must hold at least one packet ({})",
                self.revolution_slots, READINGS_PER_PACKET
            )));
        }
        Ok(())
    }
}

/// Sensor status published alongside the points.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LaserStatus {
    /// Exponentially smoothed time between packets
    pub packet_interval_ms: f32,
    /// Rotation speed measured over the last revolution
    pub rpm: f32,
    pub packets: u64,
    pub revolutions: u64,
    /// Batches dropped because their pose data left the history
    pub dropped_batches: u64,
    /// Revolutions not handed to the feature thread because it was busy
    pub skipped_revolutions: u64,
}

/// Slot range whose pose data has not arrived yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingBatch {
    pub from: usize,
    pub len: usize,
    pub t_from: u64,
    pub t_to: u64,
}

/// Outcome for the batch containing the latest packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchStatus {
    Published { from: usize, len: usize },
    Deferred { from: usize, len: usize },
    Dropped,
}

pub struct LaserIngest {
    config: LaserConfig,
    history: Arc<PositionHistory>,
    points: PointRing,
    timestamps: Vec<u64>,
    angles: Vec<f32>,
    pending: Option<PendingBatch>,
    output: Arc<DoubleBuffer<LaserStatus>>,
    scans: Option<Sender<Scan>>,
    recycled: Option<Receiver<Scan>>,
    revolution: Scan,
    revolution_slots_seen: usize,
    last_angle: Option<f32>,
    last_revolution_us: Option<u64>,
    last_packet_us: Option<u64>,
    status: LaserStatus,
}

impl LaserIngest {
    pub fn new(
        config: LaserConfig,
        history: Arc<PositionHistory>,
        output: Arc<DoubleBuffer<LaserStatus>>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let slots = config.revolution_slots;
        if output.capacity() != slots {
            return Err(Error::Config(format!(
                "output buffer holds {} slots, expected {}",
                output.capacity(),
                slots
            )));
        }

        Ok(Self {
            config,
            history,
            points: PointRing::with_capacity(slots),
            timestamps: vec![0; slots],
            angles: vec![0.0; slots],
            pending: None,
            output,
            scans: None,
            recycled: None,
            revolution: Scan {
                timestamp_us: 0,
                points: Vec::with_capacity(slots),
            },
            revolution_slots_seen: 0,
            last_angle: None,
            last_revolution_us: None,
            last_packet_us: None,
            status: LaserStatus::default(),
        })
    }

    /// Hand completed revolutions to `tx`, usually the feature thread.
    pub fn with_scan_sender(mut self, tx: Sender<Scan>) -> Self {
        self.scans = Some(tx);
        self
    }

    /// Reuse scans coming back on `rx` for the next revolutions instead of
    /// allocating new ones.
    pub fn with_scan_recycling(mut self, rx: Receiver<Scan>) -> Self {
        self.recycled = Some(rx);
        self
    }

    pub fn config(&self) -> &LaserConfig {
        &self.config
    }

    pub fn status(&self) -> LaserStatus {
        self.status
    }

    pub fn pending(&self) -> Option<PendingBatch> {
        self.pending
    }

    /// Slot ring as last written, mixed local and world points while a
    /// batch is pending.
    pub fn points(&self) -> &PointRing {
        &self.points
    }

    /// Parse and process one datagram.
    pub fn process_datagram(&mut self, data: &[u8]) -> Result<BatchStatus, Error> {
        let packet = LaserPacket::parse(data)?;
        Ok(self.process_packet(&packet))
    }

    #[instrument(skip_all, fields(ts = packet.timestamp_us))]
    pub fn process_packet(&mut self, packet: &LaserPacket) -> BatchStatus {
        self.update_timing(packet.timestamp_us);
        let cap = self.config.revolution_slots;
        let start = self.start_slot(packet);

        if self.config.frame == ReferenceFrame::Local {
            self.compute_local(packet, start);
            self.publish(start, READINGS_PER_PACKET);
            return BatchStatus::Published {
                from: start,
                len: READINGS_PER_PACKET,
            };
        }

        // A pending batch the new packet does not continue gets one last try
        // before its slots can be overwritten.
        if let Some(p) = self.pending {
            if !continues(&p, packet, start, cap) {
                self.pending = None;
                if let BatchStatus::Deferred { .. } = self.resolve(p) {
                    debug!(
                        "discarding pending batch {}+{}, next packet starts at slot {} {}us",
                        p.from, p.len, start, packet.timestamp_us
                    );
                    self.pending = None;
                }
            }
        }

        self.compute_local(packet, start);

        let (from, len) = match self.pending.take() {
            Some(p) => {
                let len = (p.len + READINGS_PER_PACKET).min(cap);
                ((start + READINGS_PER_PACKET + cap - len) % cap, len)
            }
            None => (start, READINGS_PER_PACKET),
        };
        let (t_from, t_to) = self.time_span(from, len);

        self.resolve(PendingBatch {
            from,
            len,
            t_from,
            t_to,
        })
    }

    /// Transform and publish `batch`, or keep it pending, or drop it.
    fn resolve(&mut self, batch: PendingBatch) -> BatchStatus {
        match self.to_global(&batch) {
            Ok(()) => {
                self.publish(batch.from, batch.len);
                BatchStatus::Published {
                    from: batch.from,
                    len: batch.len,
                }
            }
            Err(SnapshotError::NotYet) => {
                self.pending = Some(batch);
                BatchStatus::Deferred {
                    from: batch.from,
                    len: batch.len,
                }
            }
            Err(SnapshotError::NotInHistory) => {
                warn!(
                    "dropping {} readings at {}us, pose data no longer in history",
                    batch.len, batch.t_from
                );
                self.status.dropped_batches += 1;
                BatchStatus::Dropped
            }
        }
    }

    fn start_slot(&self, packet: &LaserPacket) -> usize {
        let cap = self.config.revolution_slots;
        let angle = packet.readings[0].angle_deg();
        (angle / 360.0 * cap as f32).round() as usize % cap
    }

    fn update_timing(&mut self, timestamp_us: u64) {
        self.status.packets += 1;
        if let Some(prev) = self.last_packet_us {
            if timestamp_us > prev {
                let dt_ms = (timestamp_us - prev) as f32 / 1000.0;
                let avg = self.status.packet_interval_ms;
                self.status.packet_interval_ms = if avg == 0.0 {
                    dt_ms
                } else {
                    avg + PACKET_INTERVAL_ALPHA * (dt_ms - avg)
                };
            }
        }
        self.last_packet_us = Some(timestamp_us);
    }

    /// Robot-frame points of `packet` into slots `start..start + 96`.
    fn compute_local(&mut self, packet: &LaserPacket, start: usize) {
        let cap = self.config.revolution_slots;
        let max_range_mm = self.config.max_range_m * 1000.0;

        for (i, reading) in packet.readings.iter().enumerate() {
            let slot = (start + i) % cap;
            let angle = reading.angle_deg();
            self.timestamps[slot] = packet.timestamp_at(i);
            self.angles[slot] = angle;

            if reading.invalid
                || reading.distance_mm == 0
                || reading.distance_mm as f32 > max_range_mm
            {
                self.points.set_invalid(slot);
                continue;
            }

            let d = reading.distance_mm as f32 / 1000.0;
            let (sin, cos) = angle.to_radians().sin_cos();
            let local = self.config.mount.apply(Vec3::new(d * cos, d * sin, 0.0));
            self.points.set(slot, local);
        }
    }

    fn time_span(&self, from: usize, len: usize) -> (u64, u64) {
        let cap = self.config.revolution_slots;
        (0..len)
            .map(|k| self.timestamps[(from + k) % cap])
            .fold((u64::MAX, 0), |(lo, hi), t| (lo.min(t), hi.max(t)))
    }

    fn to_global(&mut self, batch: &PendingBatch) -> Result<(), SnapshotError> {
        let snapshot = self.history.snapshot(batch.t_from, batch.t_to)?;
        let cap = self.config.revolution_slots;

        for k in 0..batch.len {
            let slot = (batch.from + k) % cap;
            if let Some(local) = self.points.get(slot) {
                let pose = snapshot.position_at(self.timestamps[slot]);
                self.points.set(slot, pose.transform_point(local));
            }
        }
        Ok(())
    }

    fn publish(&mut self, from: usize, len: usize) {
        self.assemble_revolution(from, len);
        self.output.publish(&self.points, from, len, self.status);
    }

    /// Collect published slots into the current revolution. A revolution
    /// ends when the reading angle wraps past 0 or a full ring of slots was
    /// seen.
    fn assemble_revolution(&mut self, from: usize, len: usize) {
        let cap = self.config.revolution_slots;
        for k in 0..len {
            let slot = (from + k) % cap;
            let angle = self.angles[slot];

            if let Some(last) = self.last_angle {
                if angle < last || self.revolution_slots_seen >= cap {
                    self.finish_revolution();
                }
            }
            self.last_angle = Some(angle);

            if self.revolution_slots_seen == 0 {
                self.revolution.timestamp_us = self.timestamps[slot];
            }
            self.revolution_slots_seen += 1;
            if let Some(point) = self.points.get(slot) {
                self.revolution.points.push(ScanPoint::new(point, slot));
            }
        }
    }

    fn finish_revolution(&mut self) {
        let start_us = self.revolution.timestamp_us;
        if let Some(prev) = self.last_revolution_us {
            if start_us > prev {
                self.status.rpm = MICROSECONDS_PER_MINUTE / (start_us - prev) as f32;
            }
        }
        self.last_revolution_us = Some(start_us);
        self.status.revolutions += 1;
        self.revolution_slots_seen = 0;

        let Some(tx) = &self.scans else {
            self.revolution.points.clear();
            return;
        };
        if tx.is_full() {
            self.status.skipped_revolutions += 1;
            debug!("feature extraction busy, skipping revolution at {}us", start_us);
            self.revolution.points.clear();
            return;
        }

        let next = self.next_scan();
        let scan = std::mem::replace(&mut self.revolution, next);
        match tx.try_send(scan) {
            Ok(true) => {}
            Ok(false) => {
                self.status.skipped_revolutions += 1;
                debug!("feature extraction busy, skipping revolution at {}us", start_us);
            }
            Err(e) => {
                debug!("revolution receiver gone: {:?}", e);
                self.scans = None;
            }
        }
    }

    /// An empty scan, recycled when one came back.
    fn next_scan(&self) -> Scan {
        let recycled = self
            .recycled
            .as_ref()
            .and_then(|rx| rx.try_recv().ok().flatten());
        match recycled {
            Some(mut scan) => {
                scan.timestamp_us = 0;
                scan.points.clear();
                scan
            }
            None => Scan {
                timestamp_us: 0,
                points: Vec::with_capacity(self.config.revolution_slots),
            },
        }
    }
}

/// Whether `packet`, starting at slot `start`, directly follows the pending
/// batch both in slots and in time. Up to one sample period of jitter is
/// accepted.
fn continues(pending: &PendingBatch, packet: &LaserPacket, start: usize, cap: usize) -> bool {
    let sample_us = (packet.sample_us as u64).max(1);
    (pending.from + pending.len) % cap == start
        && packet.timestamp_us > pending.t_to
        && packet.timestamp_us - pending.t_to <= 2 * sample_us
}

/// Receive laser datagrams until the source is exhausted or `run` is
/// cleared. A malformed datagram is connection-fatal and ends the loop.
#[instrument(skip_all)]
pub async fn run<S: PacketSource>(
    mut source: S,
    mut ingest: LaserIngest,
    run: Arc<AtomicBool>,
) -> Result<LaserStatus, Error> {
    pump(&mut source, &run, |data| {
        ingest.process_datagram(data)?;
        Ok(())
    })
    .await?;

    let status = ingest.status();
    info!(
        "laser stream finished after {} packets, {} revolutions",
        status.packets, status.revolutions
    );
    Ok(status)
}
