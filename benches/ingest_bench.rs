// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Benchmarks for laser packet ingestion.
//!
//! Measures:
//! - Datagram decode alone
//! - Decode + local frame points + publish
//! - Decode + pose snapshot + world transform + publish
//!
//! Run with: cargo bench --bench ingest_bench

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use edgefirst_scanmap::{
    buffer::DoubleBuffer,
    history::{PoseSample, PositionHistory},
    laser::{LaserConfig, LaserIngest, ReferenceFrame},
    lidar::Vec3,
    packet::{LaserPacket, READINGS_PER_PACKET, RawReading},
};
use std::sync::Arc;

const SAMPLE_US: u16 = 100;

/// Datagrams of `revolutions` full turns at one reading per degree.
fn generate_packets(revolutions: usize) -> Vec<Vec<u8>> {
    let total = revolutions * 360;
    (0..total.div_ceil(READINGS_PER_PACKET))
        .map(|p| {
            let first = p * READINGS_PER_PACKET;
            let mut readings = [RawReading::default(); READINGS_PER_PACKET];
            for (i, r) in readings.iter_mut().enumerate() {
                let angle = ((first + i) % 360) as f32;
                let distance = 1500 + ((first + i) % 97) as u16 * 10;
                *r = RawReading::from_degrees(angle, distance);
            }
            LaserPacket {
                timestamp_us: 1_000 + (first as u64) * SAMPLE_US as u64,
                sample_us: SAMPLE_US,
                readings,
            }
            .to_bytes()
        })
        .collect()
}

fn ingest(frame: ReferenceFrame, history: Arc<PositionHistory>) -> LaserIngest {
    let config = LaserConfig {
        frame,
        ..Default::default()
    };
    let output = Arc::new(DoubleBuffer::new(config.revolution_slots));
    LaserIngest::new(config, history, output).unwrap()
}

fn bench_ingest(c: &mut Criterion) {
    let packets = generate_packets(10);
    let mut group = c.benchmark_group("laser_ingest");
    group.throughput(Throughput::Elements(
        (packets.len() * READINGS_PER_PACKET) as u64,
    ));

    group.bench_function("decode", |b| {
        b.iter(|| {
            packets
                .iter()
                .map(|p| LaserPacket::parse(p).unwrap().timestamp_us)
                .sum::<u64>()
        });
    });

    group.bench_function("local", |b| {
        let mut ingest = ingest(ReferenceFrame::Local, Arc::new(PositionHistory::new(8)));
        b.iter(|| {
            for p in &packets {
                ingest.process_datagram(p).unwrap();
            }
        });
    });

    group.bench_function("global", |b| {
        // Robot driving along X at 0.5 m/s, one pose every 10 ms
        let history = Arc::new(PositionHistory::new(512));
        for k in 0..500u64 {
            let t = k * 10_000;
            let x = t as f32 * 0.5e-6;
            history.put(PoseSample::new(t, Vec3::new(x, 0.0, 0.0), k as f32 * 0.1));
        }
        let mut ingest = ingest(ReferenceFrame::Global, history);
        b.iter(|| {
            for p in &packets {
                ingest.process_datagram(p).unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_ingest);
criterion_main!(benches);
