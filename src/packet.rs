// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Laser scanner datagram format.
//!
//! # Packet Structure (394 bytes, big-endian)
//!
//! - Header: 10 bytes
//!   - `timestamp_us: u64`, monotonic time of the first reading
//!   - `sample_us: u16`, time between consecutive readings
//! - Data: 96 records × 4 bytes
//!   - `angle_q14: u16`, angle in degrees scaled by 2^14 / 90
//!   - distance word `u16`: bits 0-13 distance in mm, bit 14 signal strength
//!     warning, bit 15 invalid data

use crate::lidar::Error;

/// Header size in bytes
pub const HEADER_SIZE: usize = 10;

/// Size of each reading record in bytes
pub const RECORD_SIZE: usize = 4;

/// Number of readings per packet
pub const READINGS_PER_PACKET: usize = 96;

/// Total datagram size in bytes
pub const PACKET_SIZE: usize = HEADER_SIZE + READINGS_PER_PACKET * RECORD_SIZE;

const DISTANCE_MASK: u16 = 0x3fff;
const STRENGTH_WARNING_BIT: u16 = 1 << 14;
const INVALID_BIT: u16 = 1 << 15;

/// Degrees per unit of `angle_q14`
const ANGLE_SCALE: f32 = 90.0 / (1 << 14) as f32;

/// A single raw range reading as sent by the scanner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawReading {
    pub angle_q14: u16,
    pub distance_mm: u16,
    pub strength_warning: bool,
    pub invalid: bool,
}

impl RawReading {
    #[inline]
    pub fn angle_deg(&self) -> f32 {
        self.angle_q14 as f32 * ANGLE_SCALE
    }

    /// Build a reading from an angle in degrees, wrapped into [0, 360).
    pub fn from_degrees(angle_deg: f32, distance_mm: u16) -> Self {
        let q = (angle_deg.rem_euclid(360.0) / ANGLE_SCALE).round() as u32;
        Self {
            angle_q14: (q % (1 << 16)) as u16,
            distance_mm: distance_mm & DISTANCE_MASK,
            strength_warning: false,
            invalid: false,
        }
    }

    fn parse(record: &[u8]) -> Self {
        let angle_q14 = u16::from_be_bytes([record[0], record[1]]);
        let word = u16::from_be_bytes([record[2], record[3]]);
        Self {
            angle_q14,
            distance_mm: word & DISTANCE_MASK,
            strength_warning: word & STRENGTH_WARNING_BIT != 0,
            invalid: word & INVALID_BIT != 0,
        }
    }

    fn distance_word(&self) -> u16 {
        let mut word = self.distance_mm & DISTANCE_MASK;
        if self.strength_warning {
            word |= STRENGTH_WARNING_BIT;
        }
        if self.invalid {
            word |= INVALID_BIT;
        }
        word
    }
}

/// One decoded laser datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaserPacket {
    pub timestamp_us: u64,
    pub sample_us: u16,
    pub readings: [RawReading; READINGS_PER_PACKET],
}

impl LaserPacket {
    /// Decode a datagram. Any length other than [`PACKET_SIZE`] means the
    /// stream is out of sync and is reported as [`Error::PacketSize`].
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() != PACKET_SIZE {
            return Err(Error::PacketSize {
                expected: PACKET_SIZE,
                actual: data.len(),
            });
        }

        let timestamp_us = u64::from_be_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ]);
        let sample_us = u16::from_be_bytes([data[8], data[9]]);

        let mut readings = [RawReading::default(); READINGS_PER_PACKET];
        for (reading, record) in readings
            .iter_mut()
            .zip(data[HEADER_SIZE..].chunks_exact(RECORD_SIZE))
        {
            *reading = RawReading::parse(record);
        }

        Ok(Self {
            timestamp_us,
            sample_us,
            readings,
        })
    }

    /// Encode the packet, appending exactly [`PACKET_SIZE`] bytes.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.reserve(PACKET_SIZE);
        out.extend_from_slice(&self.timestamp_us.to_be_bytes());
        out.extend_from_slice(&self.sample_us.to_be_bytes());
        for reading in &self.readings {
            out.extend_from_slice(&reading.angle_q14.to_be_bytes());
            out.extend_from_slice(&reading.distance_word().to_be_bytes());
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PACKET_SIZE);
        self.write_to(&mut out);
        out
    }

    /// Timestamp of reading `index`.
    #[inline]
    pub fn timestamp_at(&self, index: usize) -> u64 {
        self.timestamp_us + index as u64 * self.sample_us as u64
    }

    #[inline]
    pub fn end_timestamp_us(&self) -> u64 {
        self.timestamp_at(READINGS_PER_PACKET - 1)
    }
}
