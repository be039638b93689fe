//! Benchmarks for GPMF decoder performance.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use gpmf_core::klv::Header;
use gpmf_core::{resample_points, FourCC, TelemetryDecoder};
use std::path::Path;

const TEST_FILE: &str = "test_data/hero6.bin";

fn record(tag: &[u8; 4], type_code: u8, size: u8, repeat: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Header {
        tag: FourCC::new(*tag),
        type_code,
        element_size: size,
        repeat,
    }
    .to_bytes()
    .to_vec();
    out.extend_from_slice(payload);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

/// One second of GPS as a camera writes it: a DEVC holding an 18-sample
/// GPS5 stream.
fn gps_packet(second: u32) -> Vec<u8> {
    let mut stream = Vec::new();
    stream.extend(record(b"GPSF", b'L', 4, 1, &3u32.to_be_bytes()));
    let time = format!("19021715{:02}{:02}.000", second / 60 % 60, second % 60);
    stream.extend(record(b"GPSU", b'U', 16, 1, time.as_bytes()));

    let mut scale = Vec::new();
    for d in [10_000_000i32, 10_000_000, 1000, 1000, 100] {
        scale.extend_from_slice(&d.to_be_bytes());
    }
    stream.extend(record(b"SCAL", b'l', 4, 5, &scale));

    let mut samples = Vec::new();
    for i in 0..18i32 {
        let step = second as i32 * 18 + i;
        for v in [474_000_000 + step * 10, 85_000_000 + step * 7, 400_000, 1500, 1600] {
            samples.extend_from_slice(&v.to_be_bytes());
        }
    }
    stream.extend(record(b"GPS5", b'l', 20, 18, &samples));

    let strm = record(b"STRM", 0, 1, stream.len() as u16, &stream);
    record(b"DEVC", 0, 1, strm.len() as u16, &strm)
}

fn decode_file_benchmark(c: &mut Criterion) {
    let test_path = Path::new(TEST_FILE);
    if !test_path.exists() {
        eprintln!("Benchmark skipped: test file not found at {}", TEST_FILE);
        return;
    }

    let file_size = std::fs::metadata(test_path).unwrap().len();

    let mut group = c.benchmark_group("decode_file");
    group.throughput(Throughput::Bytes(file_size));

    group.bench_function("full_file", |b| {
        b.iter(|| {
            let mut decoder = TelemetryDecoder::default();
            let result = decoder.decode_file(black_box(test_path)).unwrap();
            black_box(result.track.points.len())
        })
    });

    group.finish();
}

fn decode_packet_benchmark(c: &mut Criterion) {
    // one hour of GPS, split into 4 KiB packets
    let data: Vec<u8> = (0..3600).flat_map(gps_packet).collect();
    let packets: Vec<&[u8]> = data.chunks(4096).collect();

    let mut group = c.benchmark_group("decode_packet");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("synthetic_1h_gps", |b| {
        b.iter(|| {
            let mut decoder = TelemetryDecoder::default();
            for packet in &packets {
                decoder.decode_packet(black_box(packet)).unwrap();
            }
            black_box(decoder.finish().track.points.len())
        })
    });

    group.finish();
}

fn resample_benchmark(c: &mut Criterion) {
    let mut decoder = TelemetryDecoder::default();
    for second in 0..600 {
        decoder.decode_packet(&gps_packet(second)).unwrap();
    }
    let points = decoder.finish().track.points;
    let target = points.len() * 30 / 18;

    let mut group = c.benchmark_group("resample");
    group.throughput(Throughput::Elements(target as u64));

    group.bench_function("gps_18_to_30_hz", |b| {
        b.iter(|| black_box(resample_points(black_box(&points), target).len()))
    });

    group.finish();
}

criterion_group!(
    benches,
    decode_file_benchmark,
    decode_packet_benchmark,
    resample_benchmark
);
criterion_main!(benches);
