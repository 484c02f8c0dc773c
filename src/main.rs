// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser as _;
use edgefirst_scanmap::{
    buffer::{DoubleBuffer, PointRing, SwapSlot},
    features::{FeatureExtractor, FeatureFrame, spawn_feature_thread},
    history::PositionHistory,
    laser::{self, LaserIngest, LaserStatus},
    lidar::Error,
    odometry::{self, DeadReckoning},
    packet_source::UdpSource,
    snapshot::SnapshotWriter,
};
use std::{
    fmt::Debug,
    fs::OpenOptions,
    io::BufWriter,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::task::JoinError;
use tracing::{error, info};

/// Status reporting interval of the point and feature consumer
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_max_level(args.rust_log).init();

    let laser_config = args.laser_config()?;
    let geometry = args.wheel_geometry()?;
    if args.history_capacity == 0 {
        return Err(Error::Config("history capacity must be at least 1".to_string()).into());
    }

    let history = Arc::new(PositionHistory::new(args.history_capacity));
    let points = Arc::new(DoubleBuffer::new(laser_config.revolution_slots));
    let frames = Arc::new(SwapSlot::new());
    let run = Arc::new(AtomicBool::new(true));
    let mut ingest = LaserIngest::new(laser_config, history.clone(), points.clone())?;

    let features = if args.features {
        let (tx, rx) = kanal::bounded(1);
        let (recycle_tx, recycle_rx) = kanal::bounded(1);
        let extractor = FeatureExtractor::new(args.segmentation_config())?;
        let dump = match &args.dump {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                info!("dumping segmented revolutions to {}", path.display());
                Some(
                    SnapshotWriter::new(BufWriter::new(file), laser_config.revolution_slots)
                        .with_plane(args.plane)
                        .with_placeholder(args.dump_placeholder),
                )
            }
            None => None,
        };
        let handle = spawn_feature_thread(rx, Some(recycle_tx), extractor, frames.clone(), dump)?;
        ingest = ingest
            .with_scan_sender(tx.clone())
            .with_scan_recycling(recycle_rx);
        Some((tx, handle))
    } else {
        None
    };

    let laser_source = UdpSource::bind(SocketAddr::new(args.bind, args.laser_port)).await?;
    let odometry_source = UdpSource::bind(SocketAddr::new(args.bind, args.odometry_port)).await?;
    info!(
        "listening for laser on {} and odometry on {}, publishing {:?} frame",
        laser_source.local_addr()?,
        odometry_source.local_addr()?,
        laser_config.frame
    );

    let mut laser_task = tokio::spawn(laser::run(laser_source, ingest, run.clone()));
    let mut odometry_task = tokio::spawn(odometry::run(
        odometry_source,
        DeadReckoning::new(geometry),
        history,
        run.clone(),
    ));
    let monitor_task = tokio::spawn(monitor(points, frames));

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("signal handler failed: {:?}", e);
            }
            info!("shutting down");
        }
        res = &mut laser_task => report("laser", res),
        res = &mut odometry_task => report("odometry", res),
    }

    run.store(false, Ordering::Relaxed);
    laser_task.abort();
    odometry_task.abort();
    monitor_task.abort();

    if let Some((tx, handle)) = features {
        // Unblocks the feature thread's receive
        let _ = tx.close();
        if handle.join().is_err() {
            error!("feature thread panicked");
        }
    }

    Ok(())
}

fn report<T: Debug>(name: &str, res: Result<Result<T, Error>, JoinError>) {
    match res {
        Ok(Ok(v)) => info!("{} task finished: {:?}", name, v),
        Ok(Err(e)) => error!("{} task failed: {}", name, e),
        Err(e) => error!("{} task aborted: {:?}", name, e),
    }
}

/// Consume published points and feature frames at a fixed rate and log
/// their status.
async fn monitor(points: Arc<DoubleBuffer<LaserStatus>>, frames: Arc<SwapSlot<FeatureFrame>>) {
    let mut ring = PointRing::with_capacity(points.capacity());
    let mut frame = FeatureFrame::default();
    let mut interval = tokio::time::interval(MONITOR_INTERVAL);

    loop {
        interval.tick().await;

        if let Some(new) = points.take_new(&mut ring) {
            let status = new.meta;
            info!(
                "{} new slots, {} valid points, {:.1} rpm, {:.2} ms/packet, {} dropped batches, {} skipped revolutions",
                new.len,
                ring.valid_count(),
                status.rpm,
                status.packet_interval_ms,
                status.dropped_batches,
                status.skipped_revolutions
            );
        }

        if frames.take(&mut frame) {
            info!(
                "revolution at {}us: {} points, {} angular / {} radial clusters in {:?}",
                frame.timestamp_us,
                frame.points.len(),
                frame.angular_clusters,
                frame.radial_clusters,
                frame.elapsed
            );
        }
    }
}
