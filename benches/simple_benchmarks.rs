//! Hot-path benchmarks: request head parsing, classification and freshness checks

use cacheproxy::classifier::Classifier;
use cacheproxy::freshness::{CacheControlPolicy, FreshnessPolicy};
use cacheproxy::request::Request;
use cacheproxy::Config;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const LOCAL_HEAD: &[u8] = b"GET /500 HTTP/1.1\r\nHost: localhost:8080\r\nUser-Agent: bench\r\nAccept: */*\r\n\r\n";
const REMOTE_HEAD: &[u8] =
    b"GET http://example.com/index.html HTTP/1.1\r\nHost: example.com\r\nProxy-Connection: keep-alive\r\n\r\n";
const CONNECT_HEAD: &[u8] = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";

/// Benchmark request head parsing
fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parsing");

    group.bench_function("parse_local_head", |b| {
        b.iter(|| {
            let request = Request::parse(black_box(LOCAL_HEAD));
            black_box(request).ok();
        });
    });

    group.bench_function("parse_absolute_head", |b| {
        b.iter(|| {
            let request = Request::parse(black_box(REMOTE_HEAD));
            black_box(request).ok();
        });
    });

    group.finish();
}

/// Benchmark routing decisions
fn bench_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification");
    let classifier = Classifier::new(&Config::default());

    for (name, head) in [("local", LOCAL_HEAD), ("remote", REMOTE_HEAD), ("connect", CONNECT_HEAD)] {
        let Ok(request) = Request::parse(head) else {
            panic!("benchmark head {} failed to parse", name);
        };
        group.bench_function(name, |b| {
            b.iter(|| {
                black_box(classifier.classify(black_box(&request))).ok();
            });
        });
    }

    group.bench_function("validate_request_line", |b| {
        b.iter(|| {
            black_box(classifier.validate_request_line(black_box("GET /31999 HTTP/1.1")));
        });
    });

    group.finish();
}

/// Benchmark the default freshness check on a cached payload
fn bench_freshness(c: &mut Criterion) {
    let mut group = c.benchmark_group("freshness");
    let policy = CacheControlPolicy;
    let payload = format!(
        "HTTP/1.1 200 OK\r\nDate: Tue, 15 Nov 1994 08:12:31 GMT\r\nCache-Control: public, max-age=3600\r\nContent-Length: 500\r\n\r\n{}",
        "x".repeat(500)
    );

    group.bench_function("cache_control", |b| {
        b.iter(|| {
            black_box(policy.is_fresh(black_box("http://127.0.0.1:8080/500"), black_box(payload.as_bytes())));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_parsing, bench_classification, bench_freshness);
criterion_main!(benches);
