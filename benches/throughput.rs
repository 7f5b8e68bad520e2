//! Throughput benchmarks

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use serialview_core::core::codec::{decode_lossy, decode_unit};
use serialview_core::{Connection, ConnectionError, OutboundQueue, QueueConfig};
use std::hint::black_box;

struct NullConnection;

impl Connection for NullConnection {
    fn read(&mut self) -> Result<Vec<u8>, ConnectionError> {
        Ok(Vec::new())
    }

    fn send(&mut self, text: &str) -> Result<(), ConnectionError> {
        black_box(text);
        Ok(())
    }

    fn describe(&self) -> String {
        "null".to_string()
    }
}

fn decode_benchmark(c: &mut Criterion) {
    let line: Vec<u8> = b"temperature=21.5 humidity=40 status=OK \xc2\xb0C\n".repeat(16);
    let mut broken = line.clone();
    broken[10] = 0xff;

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(line.len() as u64));

    group.bench_function("valid_line", |b| {
        b.iter(|| black_box(decode_unit(black_box(&line))))
    });

    group.bench_function("lossy_line", |b| {
        b.iter(|| black_box(decode_lossy(black_box(&broken))))
    });

    group.finish();
}

fn queue_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(256));

    group.bench_function("push_drain_256", |b| {
        let queue = OutboundQueue::new(QueueConfig::default());
        let mut conn = NullConnection;
        b.iter(|| {
            for i in 0..256 {
                let _ = queue.push(format!("line {i}\n"));
            }
            black_box(queue.drain_into(&mut conn))
        })
    });

    group.finish();
}

criterion_group!(benches, decode_benchmark, queue_benchmark);
criterion_main!(benches);
