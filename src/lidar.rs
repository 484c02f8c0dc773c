// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common types shared by the ingestion, history and segmentation stages.
//!
//! Coordinates follow the robot convention used throughout the crate: the
//! laser sweeps the XY plane, Z points up and headings rotate about +Z
//! (counter-clockwise, degrees).

use std::{
    fmt,
    ops::{Add, Mul, Sub},
};

/// A 3D point or displacement in meters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Component by axis index (0 = x, 1 = y, 2 = z).
    #[inline]
    pub fn axis(&self, index: usize) -> f32 {
        match index {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    /// Linear interpolation, `t = 0` returns `self`, `t = 1` returns `other`.
    #[inline]
    pub fn lerp(self, other: Vec3, t: f32) -> Vec3 {
        self + (other - self) * t
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    #[inline]
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    #[inline]
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    #[inline]
    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Fixed rigid transform from the laser frame to the robot (base) frame.
///
/// Built from the same translation vector + quaternion pair that is used to
/// publish the sensor's static transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MountTransform {
    rotation: [[f32; 3]; 3],
    translation: Vec3,
}

impl MountTransform {
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: Vec3::ZERO,
        }
    }

    /// Create the transform from a translation and a rotation quaternion
    /// given as `[x, y, z, w]`. The quaternion is normalized first.
    pub fn from_quaternion(translation: Vec3, quat: [f32; 4]) -> Result<Self, Error> {
        let [x, y, z, w] = quat;
        let n = (x * x + y * y + z * z + w * w).sqrt();
        if !n.is_finite() || n < 1e-6 {
            return Err(Error::Config(format!(
                "mount quaternion must be non-zero, got {:?}",
                quat
            )));
        }
        let (x, y, z, w) = (x / n, y / n, z / n, w / n);

        let rotation = [
            [
                1.0 - 2.0 * (y * y + z * z),
                2.0 * (x * y - z * w),
                2.0 * (x * z + y * w),
            ],
            [
                2.0 * (x * y + z * w),
                1.0 - 2.0 * (x * x + z * z),
                2.0 * (y * z - x * w),
            ],
            [
                2.0 * (x * z - y * w),
                2.0 * (y * z + x * w),
                1.0 - 2.0 * (x * x + y * y),
            ],
        ];

        Ok(Self {
            rotation,
            translation,
        })
    }

    /// Transform a laser-frame point into the robot frame.
    #[inline]
    pub fn apply(&self, p: Vec3) -> Vec3 {
        let r = &self.rotation;
        Vec3::new(
            r[0][0] * p.x + r[0][1] * p.y + r[0][2] * p.z,
            r[1][0] * p.x + r[1][1] * p.y + r[1][2] * p.z,
            r[2][0] * p.x + r[2][1] * p.y + r[2][2] * p.z,
        ) + self.translation
    }
}

impl Default for MountTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Common error type for ingestion and transport operations.
///
/// Application-level irregularities (invalid readings, missing pose data)
/// are never reported through this type; they are handled by policy inside
/// the pipeline.
#[derive(Debug)]
pub enum Error {
    /// I/O error (socket, file operations)
    Io(std::io::Error),
    /// Datagram length does not match the fixed record layout
    PacketSize { expected: usize, actual: usize },
    /// Configuration error
    Config(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::PacketSize { expected, actual } => write!(
                f,
                "packet size mismatch: expected {} bytes, got {}",
                expected, actual
            ),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_vec3_lerp() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(2.0, -4.0, 1.0);
        let m = a.lerp(b, 0.5);
        assert_eq!(m, Vec3::new(1.0, -2.0, 0.5));
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
    }

    #[test]
    fn test_mount_identity() {
        let t = MountTransform::from_quaternion(Vec3::ZERO, [0.0, 0.0, 0.0, 1.0]).unwrap();
        let p = Vec3::new(1.0, 2.0, 3.0);
        let q = t.apply(p);
        assert_abs_diff_eq!(q.x, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(q.y, 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(q.z, 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_mount_yaw_and_offset() {
        // 90 degrees about +Z, mounted 10cm forward and 20cm up
        let s = std::f32::consts::FRAC_1_SQRT_2;
        let t = MountTransform::from_quaternion(Vec3::new(0.1, 0.0, 0.2), [0.0, 0.0, s, s])
            .unwrap();
        let q = t.apply(Vec3::new(1.0, 0.0, 0.0));
        assert_abs_diff_eq!(q.x, 0.1, epsilon = 1e-6);
        assert_abs_diff_eq!(q.y, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(q.z, 0.2, epsilon = 1e-6);
    }

    #[test]
    fn test_mount_rejects_zero_quaternion() {
        let err = MountTransform::from_quaternion(Vec3::ZERO, [0.0; 4]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_packet_size_display() {
        let err = Error::PacketSize {
            expected: 394,
            actual: 12,
        };
        assert_eq!(
            err.to_string(),
            "packet size mismatch: expected 394 bytes, got 12"
        );
    }
}
