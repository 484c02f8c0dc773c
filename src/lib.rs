// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst Scan Map Library
//!
//! Fuses a rotating 2D laser scanner with the robot's pose stream and
//! segments each revolution into planar surfaces.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────────┐
//! │ odometry UDP │ ──► │ PositionHistory │ ◄─┐ snapshot(t_from, t_to)
//! └──────────────┘     └─────────────────┘   │
//! ┌──────────────┐     ┌─────────────────┐   │     ┌──────────────┐
//! │ laser UDP    │ ──► │ LaserIngest     │ ──┴───► │ DoubleBuffer │ ──► consumers
//! └──────────────┘     └─────────────────┘         └──────────────┘
//!                               │ revolution (kanal, latest wins)
//!                               ▼
//!                      ┌─────────────────┐         ┌──────────────┐
//!                      │ feature thread  │ ──────► │ SwapSlot     │ ──► consumers
//!                      │ angular+radial  │         └──────────────┘
//!                      │ CircularDbscan  │
//!                      └─────────────────┘
//! ```
//!
//! Laser readings whose pose is not known yet are held back and retried with
//! the next packet rather than blocking the transport, so pose and laser
//! streams may arrive with independent latency.
//!
//! # Modules
//!
//! - [`lidar`]: Common types and error handling
//! - [`history`]: Timestamped pose buffer with interpolating snapshots
//! - [`packet`] / [`odometry`]: Wire formats, dead reckoning
//! - [`packet_source`]: Datagram source abstraction for testing
//! - [`laser`]: Per-packet ingestion and frame transform
//! - [`buffer`]: Producer/consumer point handoff
//! - [`cluster`]: Density-based clustering on circular sorted data
//! - [`orientation`], [`scan`], [`features`]: Surface segmentation
//! - [`snapshot`]: Text dump of segmented revolutions

pub mod buffer;
pub mod cluster;
pub mod features;
pub mod history;
pub mod laser;
pub mod lidar;
pub mod odometry;
pub mod orientation;
pub mod packet;
pub mod packet_source;
pub mod scan;
pub mod snapshot;

// Re-exports for convenience
pub use cluster::{CircularDbscan, Cluster};
pub use history::{PoseSample, PositionHistory, SnapshotError};
pub use laser::{LaserConfig, LaserIngest};
pub use lidar::{Error, Vec3};
pub use packet_source::PacketSource;
