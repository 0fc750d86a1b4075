//! Throughput benchmarks for the parse -> detect -> aggregate pipeline.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quota_monitor::aggregator::Aggregator;
use quota_monitor::detector::SessionDetector;
use quota_monitor::models::Plan;
use quota_monitor::parser::{LogParser, ParseStats};
use quota_monitor::pricing::{DefaultPricingProvider, PricingProvider};
use std::collections::HashSet;

fn generate_jsonl(num_lines: usize) -> String {
    let mut lines = Vec::with_capacity(num_lines);
    for i in 0..num_lines {
        let minute = i % 60;
        let hour = (i / 60) % 24;
        lines.push(format!(
            r#"{{"timestamp":"2024-01-0{}T{:02}:{:02}:00Z","model":"claude-sonnet-4","message":{{"id":"msg{i}","usage":{{"input_tokens":{},"output_tokens":{},"cache_creation_input_tokens":{},"cache_read_input_tokens":{}}}}},"request_id":"req{i}"}}"#,
            1 + (i / (60 * 24)) % 9,
            hour,
            minute,
            100 + (i % 500),
            50 + (i % 200),
            i % 20,
            i % 10,
        ));
    }
    lines.join("\n")
}

fn benchmark_parse_tail(c: &mut Criterion) {
    let pricing = DefaultPricingProvider::new();
    let mut group = c.benchmark_group("parse_tail");

    for size in [100usize, 1_000, 10_000] {
        let jsonl = generate_jsonl(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &jsonl, |b, jsonl| {
            b.iter(|| {
                let mut known_ids = HashSet::new();
                let mut stats = ParseStats::default();
                black_box(LogParser::parse_tail(jsonl, &mut known_ids, &pricing, &mut stats))
            });
        });
    }

    group.finish();
}

fn benchmark_detect_and_aggregate(c: &mut Criterion) {
    let pricing = DefaultPricingProvider::new();
    let mut group = c.benchmark_group("detect_and_aggregate");

    for size in [100usize, 1_000, 10_000] {
        let jsonl = generate_jsonl(size);
        let mut known_ids = HashSet::new();
        let mut stats = ParseStats::default();
        let events = LogParser::parse_tail(&jsonl, &mut known_ids, &pricing, &mut stats);

        group.bench_with_input(BenchmarkId::from_parameter(size), &events, |b, events| {
            b.iter(|| {
                let mut detector = SessionDetector::new();
                let aggregator = Aggregator::default();
                let limits = Plan::Max20.default_limits();
                let sessions = detector.detect("bench-project", black_box(events), &[], 2_000_000_000, 10);
                let metrics: Vec<_> = sessions
                    .iter()
                    .filter(|s| !s.is_gap)
                    .map(|s| aggregator.aggregate_session(s, 2_000_000_000, limits))
                    .collect();
                black_box(aggregator.aggregate_all(&metrics, 2_000_000_000, limits))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_parse_tail, benchmark_detect_and_aggregate);
criterion_main!(benches);
