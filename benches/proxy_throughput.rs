//! Proxy throughput benchmarks.
//!
//! Measures cache lookups, bundle body construction, bundle response
//! demultiplexing and a full begin/add/commit cycle.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use relay_core::proxy::wire::{classify_entry, decode_bundle_response, BundleItem, BundleRequest};
use relay_core::proxy::ResponseCache;
use relay_core::{Proxy, ProxyConfig, RecordingTransport, Request, RequestId};

fn bench_cache_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_lookup");

    let cache = ResponseCache::new(true, Duration::from_secs(60));
    for i in 0..1024 {
        cache.store(&format!("/api/items/{i}"), json!({"id": i, "name": "item"}));
    }

    group.throughput(Throughput::Elements(1));
    group.bench_function("hit", |b| b.iter(|| black_box(cache.lookup(black_box("/api/items/512")))));
    group.bench_function("miss", |b| b.iter(|| black_box(cache.lookup(black_box("/api/other")))));

    group.finish();
}

fn bench_bundle_body(c: &mut Criterion) {
    let mut group = c.benchmark_group("bundle_body");

    for members in [2usize, 16, 128] {
        let requests: Vec<Request> = (0..members)
            .map(|i| Request::post(format!("/api/items/{i}"), json!("{\"value\": 1}")))
            .collect();

        group.throughput(Throughput::Elements(members as u64));
        group.bench_function(BenchmarkId::new("encode", members), |b| {
            b.iter(|| {
                let mut bundle = BundleRequest::default();
                for (i, request) in requests.iter().enumerate() {
                    bundle.requests.insert(RequestId::from_raw(i as u64 + 1), BundleItem::from_request(request));
                }
                black_box(bundle.to_value().unwrap())
            })
        });
    }

    group.finish();
}

fn bench_bundle_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("bundle_response");

    for members in [2usize, 16, 128] {
        let mut responses = serde_json::Map::new();
        for i in 1..=members {
            let entry = if i % 8 == 0 { json!({"status": "failed", "code": 500}) } else { json!({"ok": i}) };
            responses.insert(format!("r{i}"), entry);
        }
        let text = serde_json::to_string(&json!({ "responses": responses })).unwrap();

        group.throughput(Throughput::Elements(members as u64));
        group.bench_function(BenchmarkId::new("decode_string_body", members), |b| {
            b.iter(|| {
                let decoded = decode_bundle_response(json!(text.clone())).unwrap().unwrap();
                for (_, entry) in decoded {
                    black_box(classify_entry(entry));
                }
            })
        });
    }

    group.finish();
}

fn bench_transaction_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("transaction_cycle");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for members in [1usize, 8] {
        group.throughput(Throughput::Elements(members as u64));
        group.bench_function(BenchmarkId::new("begin_add_commit", members), |b| {
            b.iter(|| {
                rt.block_on(async {
                    let config = ProxyConfig { bundle_endpoint: "/bundle".into(), ..ProxyConfig::default() };
                    let proxy = Proxy::new(config, Arc::new(RecordingTransport::echo("/bundle")));
                    let tid = proxy.begin_transaction();
                    let handles: Vec<_> = (0..members)
                        .map(|i| proxy.dispatch(Request::get(format!("/api/items/{i}")).in_transaction(tid)))
                        .collect();
                    proxy.commit_transaction(tid).unwrap();
                    for handle in handles {
                        black_box(handle.outcome().await.unwrap());
                    }
                })
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cache_lookup,
    bench_bundle_body,
    bench_bundle_response,
    bench_transaction_cycle,
);
criterion_main!(benches);
