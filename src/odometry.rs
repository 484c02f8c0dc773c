// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Wheel odometry pose producer.
//!
//! The robot streams encoder counts and a gyro heading. [`DeadReckoning`]
//! integrates them into [`PoseSample`]s which [`run`] pushes into the shared
//! [`PositionHistory`].
//!
//! # Packet Structure (18 bytes, big-endian)
//!
//! - `timestamp_us: u64`
//! - `left: i32`, `right: i32` encoder counts
//! - `heading: i16` in centidegrees, counter-clockwise about +Z

use crate::{
    history::{PoseSample, PositionHistory, angle_diff_deg, normalize_heading_deg},
    lidar::{Error, Vec3},
    packet_source::{PacketSource, pump},
};
use std::sync::{
    Arc,
    atomic::AtomicBool,
};
use tracing::{debug, info, instrument};

/// Odometry datagram size in bytes
pub const ODOMETRY_PACKET_SIZE: usize = 18;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OdometryPacket {
    pub timestamp_us: u64,
    pub left: i32,
    pub right: i32,
    /// Heading in hundredths of a degree
    pub heading: i16,
}

impl OdometryPacket {
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() != ODOMETRY_PACKET_SIZE {
            return Err(Error::PacketSize {
                expected: ODOMETRY_PACKET_SIZE,
                actual: data.len(),
            });
        }

        Ok(Self {
            timestamp_us: u64::from_be_bytes([
                data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
            ]),
            left: i32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            right: i32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            heading: i16::from_be_bytes([data[16], data[17]]),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.timestamp_us.to_be_bytes());
        out.extend_from_slice(&self.left.to_be_bytes());
        out.extend_from_slice(&self.right.to_be_bytes());
        out.extend_from_slice(&self.heading.to_be_bytes());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ODOMETRY_PACKET_SIZE);
        self.write_to(&mut out);
        out
    }

    #[inline]
    pub fn heading_deg(&self) -> f32 {
        self.heading as f32 / 100.0
    }
}

/// Drive train geometry used to turn encoder counts into distance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WheelGeometry {
    pub wheel_diameter_mm: f32,
    pub counts_per_rotation: u32,
    /// Motors wired so that positive counts drive backwards
    pub reverse_polarity: bool,
}

impl Default for WheelGeometry {
    fn default() -> Self {
        Self {
            wheel_diameter_mm: 43.2,
            counts_per_rotation: 360,
            reverse_polarity: false,
        }
    }
}

impl WheelGeometry {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.wheel_diameter_mm.is_finite() && self.wheel_diameter_mm > 0.0) {
            return Err(Error::Config(format!(
                "wheel diameter must be positive, got {}",
                self.wheel_diameter_mm
            )));
        }
        if self.counts_per_rotation == 0 {
            return Err(Error::Config(
                "encoder counts per rotation must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Meters travelled per encoder count.
    #[inline]
    pub fn meters_per_count(&self) -> f32 {
        std::f32::consts::PI * self.wheel_diameter_mm / self.counts_per_rotation as f32 / 1000.0
    }
}

/// Integrates odometry packets into a pose estimate.
pub struct DeadReckoning {
    geometry: WheelGeometry,
    last: Option<OdometryPacket>,
    position: Vec3,
    heading: f32,
}

impl DeadReckoning {
    pub fn new(geometry: WheelGeometry) -> Self {
        Self::with_origin(geometry, Vec3::ZERO)
    }

    pub fn with_origin(geometry: WheelGeometry, origin: Vec3) -> Self {
        Self {
            geometry,
            last: None,
            position: origin,
            heading: 0.0,
        }
    }

    /// Current pose estimate, `None` until a reference packet was seen.
    pub fn pose(&self) -> Option<PoseSample> {
        self.last
            .map(|p| PoseSample::new(p.timestamp_us, self.position, self.heading))
    }

    /// Feed one packet. The first packet only records reference counts.
    /// Packets not newer than the previous one are ignored since UDP may
    /// reorder them.
    pub fn update(&mut self, packet: &OdometryPacket) -> Option<PoseSample> {
        let Some(last) = self.last else {
            self.last = Some(*packet);
            self.heading = normalize_heading_deg(packet.heading_deg());
            return None;
        };

        if packet.timestamp_us <= last.timestamp_us {
            debug!(
                "ignoring out of order odometry at {} (previous {})",
                packet.timestamp_us, last.timestamp_us
            );
            return None;
        }

        let counts = (packet.left.wrapping_sub(last.left) as f32
            + packet.right.wrapping_sub(last.right) as f32)
            / 2.0;
        let mut displacement = counts * self.geometry.meters_per_count();
        if self.geometry.reverse_polarity {
            displacement = -displacement;
        }

        let heading = packet.heading_deg();
        let mean = (self.heading + angle_diff_deg(self.heading, heading) / 2.0).to_radians();
        let (sin, cos) = mean.sin_cos();

        self.position = self.position + Vec3::new(cos, sin, 0.0) * displacement;
        self.heading = normalize_heading_deg(heading);
        self.last = Some(*packet);

        Some(PoseSample::new(
            packet.timestamp_us,
            self.position,
            self.heading,
        ))
    }
}

/// Receive odometry datagrams until the source is exhausted or `run` is
/// cleared, pushing every new pose into `history`.
///
/// A datagram of the wrong size is connection-fatal and ends the loop.
#[instrument(skip_all)]
pub async fn run<S: PacketSource>(
    mut source: S,
    mut dead_reckoning: DeadReckoning,
    history: Arc<PositionHistory>,
    run: Arc<AtomicBool>,
) -> Result<(), Error> {
    let handled = pump(&mut source, &run, |data| {
        let packet = OdometryPacket::parse(data)?;
        if let Some(pose) = dead_reckoning.update(&packet) {
            history.put(pose);
        }
        Ok(())
    })
    .await?;
    info!("odometry stream finished after {} datagrams", handled);
    Ok(())
}
