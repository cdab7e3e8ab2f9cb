//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use termlink_core::core::{checksum, frame};
use termlink_core::{Clock, LogFormat, Metadata, SessionLogger};

fn checksum_benchmark(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();

    let mut group = c.benchmark_group("crc8");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("table", |b| {
        b.iter(|| black_box(checksum::crc8(black_box(&data))))
    });

    group.bench_function("bitwise", |b| {
        b.iter(|| black_box(checksum::crc8_bitwise(black_box(&data))))
    });

    group.finish();
}

fn frame_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");

    group.bench_function("encode", |b| {
        b.iter(|| black_box(frame::encode_event_frame(black_box("BUTTON_PRESS"))))
    });

    group.bench_function("decode", |b| {
        let encoded = frame::encode_event_frame("BUTTON_PRESS");
        b.iter(|| black_box(frame::decode_event_frame(black_box(&encoded))))
    });

    group.finish();
}

fn logger_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("logger");

    group.bench_function("log_event", |b| {
        let logger = SessionLogger::new(LogFormat::Csv, Arc::new(Clock::new()));
        b.iter(|| {
            black_box(logger.log_event("BUTTON_PRESS", Metadata::from([("direction", "rx")])))
        })
    });

    for format in LogFormat::all() {
        let logger = SessionLogger::new(*format, Arc::new(Clock::new()));
        for i in 0..1000 {
            logger.log_event("BUTTON_PRESS", Metadata::from([("seq", i.to_string())]));
        }
        group.bench_function(format!("render_1000_{}", format.extension()), |b| {
            b.iter(|| black_box(logger.formatted_log()))
        });
    }

    group.finish();
}

criterion_group!(benches, checksum_benchmark, frame_benchmark, logger_benchmark);
criterion_main!(benches);
