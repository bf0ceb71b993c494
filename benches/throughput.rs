//! Throughput benchmarks for the storage primitives and the wire codec.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use voltkv::protocol::{RespParser, RespValue};
use voltkv::storage::{LockTable, ShardedDict};

/// Dictionary writes at several value sizes.
fn bench_dict_put(c: &mut Criterion) {
    let dict: Arc<ShardedDict<Bytes>> = Arc::new(ShardedDict::new(1 << 16));

    let mut group = c.benchmark_group("dict_put");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{i}"));
            dict.put(key, Bytes::from_static(b"small_value"));
            i += 1;
        });
    });

    group.bench_function("put_1k", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024));
        b.iter(|| {
            let key = Bytes::from(format!("key:{i}"));
            dict.put(key, value.clone());
            i += 1;
        });
    });

    group.finish();
}

/// Dictionary reads, hits and misses.
fn bench_dict_get(c: &mut Criterion) {
    let dict: Arc<ShardedDict<Bytes>> = Arc::new(ShardedDict::new(1 << 16));
    for i in 0..100_000 {
        dict.put(Bytes::from(format!("key:{i}")), Bytes::from(format!("value:{i}")));
    }

    let mut group = c.benchmark_group("dict_get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(dict.get(key.as_bytes()));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{i}");
            black_box(dict.get(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

/// Concurrent mixed dictionary load across threads.
fn bench_dict_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("dict_concurrent");

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let dict: Arc<ShardedDict<Bytes>> = Arc::new(ShardedDict::new(1 << 10));
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let dict = Arc::clone(&dict);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = Bytes::from(format!("key:{t}:{i}"));
                            dict.put(key.clone(), Bytes::from_static(b"value"));
                            dict.get(&key);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            black_box(dict.len());
        });
    });

    group.finish();
}

/// Ordered multi-key lock acquisition, the per-command overhead of EXEC.
fn bench_locks(c: &mut Criterion) {
    let table = LockTable::new(1024);
    let keys: Vec<Bytes> = (0..8).map(|i| Bytes::from(format!("key:{i}"))).collect();

    let mut group = c.benchmark_group("locks");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_key_write", |b| {
        b.iter(|| {
            black_box(table.lock(b"hot"));
        });
    });

    group.bench_function("multi_key_8", |b| {
        b.iter(|| {
            let (write, read) = keys.split_at(4);
            black_box(table.lock_multi(write, read));
        });
    });

    group.finish();
}

/// RESP parse and serialize round trips.
fn bench_codec(c: &mut Criterion) {
    let request = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$5\r\nhello\r\n";
    let reply = RespValue::array(vec![
        RespValue::ok(),
        RespValue::integer(42),
        RespValue::bulk(Bytes::from("x".repeat(256))),
    ]);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(1));

    group.bench_function("parse_set", |b| {
        let mut parser = RespParser::new();
        b.iter(|| {
            black_box(parser.parse(request).unwrap());
        });
    });

    group.bench_function("serialize_array", |b| {
        b.iter(|| {
            black_box(reply.serialize());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_dict_put,
    bench_dict_get,
    bench_dict_concurrent,
    bench_locks,
    bench_codec,
);

criterion_main!(benches);
