// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_scanmap::{
    features::{SegmentationConfig, SegmentationLevel},
    laser::{LaserConfig, ReferenceFrame},
    lidar::{Error, MountTransform, Vec3},
    odometry::WheelGeometry,
    orientation::Plane,
};
use std::{net::IpAddr, path::PathBuf};
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Local address to bind the laser and odometry sockets to
    #[arg(long, env, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// UDP port the laser scanner sends readings to
    #[arg(long, env, default_value = "5000")]
    pub laser_port: u16,

    /// UDP port the drive controller sends odometry to
    #[arg(long, env, default_value = "5001")]
    pub odometry_port: u16,

    /// Readings beyond this distance in meters are discarded
    #[arg(long, env, default_value = "10.0")]
    pub max_range: f32,

    /// Frame transformation vector from the robot base to the laser
    #[arg(
        long,
        env,
        default_value = "0 0 0",
        value_delimiter = ' ',
        num_args = 3
    )]
    pub tf_vec: Vec<f32>,

    /// Frame transformation quaternion from the robot base to the laser
    #[arg(
        long,
        env,
        default_value = "0 0 0 1",
        value_delimiter = ' ',
        num_args = 4
    )]
    pub tf_quat: Vec<f32>,

    /// Number of pose samples kept for interpolation
    #[arg(long, env, default_value = "512")]
    pub history_capacity: usize,

    /// Point slots per laser revolution
    #[arg(long, env, default_value = "360")]
    pub revolution_slots: usize,

    /// Frame the published points are expressed in
    #[arg(long, env, default_value = "global")]
    pub frame: ReferenceFrame,

    /// Enable the scan segmentation thread
    #[arg(long, env)]
    pub features: bool,

    /// Plane swept by the laser
    #[arg(long, env, default_value = "xy")]
    pub plane: Plane,

    /// Reported cluster level
    #[arg(long, env, default_value = "angle-distance")]
    pub segmentation_level: SegmentationLevel,

    /// Orientation clustering distance in degrees
    #[arg(long, env, default_value = "2.0")]
    pub angular_eps: f32,

    /// Orientation clustering minimum points
    #[arg(long, env, default_value = "10")]
    pub angular_minpts: usize,

    /// Distance clustering distance in meters
    #[arg(long, env, default_value = "0.01")]
    pub radial_eps: f32,

    /// Distance clustering minimum points
    #[arg(long, env, default_value = "10")]
    pub radial_minpts: usize,

    /// Half width of the orientation fit window in points
    #[arg(long, env, default_value = "2")]
    pub orientation_window: usize,

    /// Wheel diameter in millimeters
    #[arg(long, env, default_value = "43.2")]
    pub wheel_diameter: f32,

    /// Encoder counts per wheel rotation
    #[arg(long, env, default_value = "360")]
    pub counts_per_rotation: u32,

    /// Invert the sign of encoder counts
    #[arg(long, env)]
    pub reverse_polarity: bool,

    /// Append one line per segmented revolution to this file
    #[arg(long, env)]
    pub dump: Option<PathBuf>,

    /// Value written for empty slots in the dump
    #[arg(long, env, default_value = "0", allow_negative_numbers = true)]
    pub dump_placeholder: i32,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,
}

impl Args {
    pub fn laser_config(&self) -> Result<LaserConfig, Error> {
        let translation = match self.tf_vec.as_slice() {
            &[x, y, z] => Vec3::new(x, y, z),
            v => return Err(Error::Config(format!("tf_vec needs 3 values, got {}", v.len()))),
        };
        let quat: [f32; 4] = self.tf_quat.as_slice().try_into().map_err(|_| {
            Error::Config(format!("tf_quat needs 4 values, got {}", self.tf_quat.len()))
        })?;

        let config = LaserConfig {
            max_range_m: self.max_range,
            mount: MountTransform::from_quaternion(translation, quat)?,
            revolution_slots: self.revolution_slots,
            frame: self.frame,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn segmentation_config(&self) -> SegmentationConfig {
        SegmentationConfig {
            angular_eps_deg: self.angular_eps,
            angular_min_points: self.angular_minpts,
            radial_eps_m: self.radial_eps,
            radial_min_points: self.radial_minpts,
            orientation_k: self.orientation_window,
            plane: self.plane,
            level: self.segmentation_level,
        }
    }

    pub fn wheel_geometry(&self) -> Result<WheelGeometry, Error> {
        let geometry = WheelGeometry {
            wheel_diameter_mm: self.wheel_diameter,
            counts_per_rotation: self.counts_per_rotation,
            reverse_polarity: self.reverse_polarity,
        };
        geometry.validate()?;
        Ok(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["scanmap"]);
        assert_eq!(args.laser_port, 5000);
        assert_eq!(args.frame, ReferenceFrame::Global);
        assert_eq!(args.segmentation_config(), SegmentationConfig::default());
        assert_eq!(args.laser_config().unwrap(), LaserConfig::default());
        assert_eq!(args.wheel_geometry().unwrap(), WheelGeometry::default());
    }

    #[test]
    fn test_mount_and_enums() {
        let args = Args::parse_from([
            "scanmap",
            "--tf-vec",
            "0.1",
            "0",
            "0.2",
            "--frame",
            "local",
            "--plane",
            "xz",
            "--segmentation-level",
            "angle",
            "--dump-placeholder",
            "-1",
        ]);
        let config = args.laser_config().unwrap();
        assert_eq!(config.frame, ReferenceFrame::Local);
        assert_eq!(config.mount.apply(Vec3::ZERO), Vec3::new(0.1, 0.0, 0.2));
        assert_eq!(args.plane, Plane::XZ);
        assert_eq!(args.segmentation_level, SegmentationLevel::Angle);
        assert_eq!(args.dump_placeholder, -1);
    }

    #[test]
    fn test_invalid_slots_rejected() {
        let args = Args::parse_from(["scanmap", "--revolution-slots", "10"]);
        assert!(args.laser_config().is_err());
    }
}
