//! cirrus performance benchmarks using Criterion.
//!
//! Run with: `cargo bench -p cirrus-bench`

use chrono::{Duration, Utc};
use cirrus_collect::fixture::{FixtureAccount, FixtureCloud};
use cirrus_collect::policy::HetznerPolicy;
use cirrus_collect::providers::hetzner::{HetznerCollector, HetznerServer, HetznerServerType};
use cirrus_collect::{RunOptions, collect_all, parallel_map, run_generation};
use cirrus_metrics::{
    Aggregation, AuditAccumulator, MetricKind, MetricPoint, MetricSeries, NoDataPolicy, Scale,
    ThresholdRule, TimeWindow, audit_series,
};
use cirrus_persist::MemoryGateway;
use cirrus_proto::{Credentials, Profile};
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use tokio::runtime::Runtime;

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Five-minute samples over 90 days, a slow sine between 10% and 70%.
fn raw_samples(window: TimeWindow) -> Vec<MetricPoint> {
    let step = Duration::minutes(5);
    let count = window.duration().num_minutes() / 5;
    (0..count)
        .map(|i| {
            let value = 40.0 + 30.0 * ((i as f64) / 288.0).sin();
            MetricPoint::new(window.start + step * i as i32, value)
        })
        .collect()
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn stopped_server(id: u64) -> HetznerServer {
    HetznerServer {
        id,
        name: format!("srv-{id}"),
        status: "off".to_string(),
        server_type: HetznerServerType {
            name: "cx22".to_string(),
            cores: 2,
        },
        datacenter: None,
    }
}

// ─── bench_series_alignment ──────────────────────────────────────────────────

/// Bucket 90 days of five-minute samples into daily means.
///
/// Every instance audit does this once per metric.
fn bench_series_alignment(c: &mut Criterion) {
    let window = TimeWindow::trailing_days(Utc::now(), 90);
    let raw = raw_samples(window);

    c.bench_function("series_alignment_90d", |b| {
        b.iter(|| {
            let series = MetricSeries::align(
                MetricKind::AvgCpu,
                black_box(raw.iter().copied()),
                window,
                86_400,
                Aggregation::Mean,
            );
            black_box(series)
        });
    });
}

// ─── bench_audit_and_accumulate ──────────────────────────────────────────────

/// Judge three aligned series and fold them into one accumulator.
fn bench_audit_and_accumulate(c: &mut Criterion) {
    let window = TimeWindow::trailing_days(Utc::now(), 90);
    let raw = raw_samples(window);
    let metrics = [MetricKind::AvgCpu, MetricKind::MaxCpu, MetricKind::MaxMemory];
    let series: Vec<MetricSeries> = metrics
        .iter()
        .map(|m| MetricSeries::align(*m, raw.iter().copied(), window, 86_400, Aggregation::Max))
        .collect();
    let rule = ThresholdRule::new(50.0, 3, NoDataPolicy::NotOptimizable);

    c.bench_function("audit_and_accumulate_3_metrics", |b| {
        b.iter(|| {
            let mut acc = AuditAccumulator::new(metrics);
            for s in &series {
                if let Ok(verdict) = audit_series(black_box(s), &rule, Scale::Percent) {
                    acc.record(verdict);
                }
            }
            black_box(acc.outcome())
        });
    });
}

// ─── bench_parallel_map ──────────────────────────────────────────────────────

/// Fan 1000 trivial tasks through the bounded helper.
///
/// Measures the spawn, permit and channel overhead of one fan-out layer.
fn bench_parallel_map(c: &mut Criterion) {
    let rt = runtime();

    c.bench_function("parallel_map_1000_items_limit_16", |b| {
        b.iter(|| {
            rt.block_on(async {
                let items: Vec<u64> = (0..1000).collect();
                let rx = parallel_map(items, 16, |n| async move { n * 2 });
                black_box(collect_all(rx).await)
            })
        });
    });
}

// ─── bench_generation_run ────────────────────────────────────────────────────

/// Full generation run over 100 fixture profiles into a fresh memory store.
fn bench_generation_run(c: &mut Criterion) {
    let rt = runtime();
    let profiles: Vec<Profile> = (0..100_u64)
        .map(|i| {
            Profile::new(
                format!("acct-{i}"),
                Credentials::Hetzner {
                    api_token: format!("token-{i}"),
                },
                "eu-central",
            )
        })
        .collect();
    let mut fixture = FixtureCloud::default();
    for (i, profile) in profiles.iter().enumerate() {
        let mut account = FixtureAccount::default();
        account.hetzner.servers.push(stopped_server(i as u64));
        fixture = fixture.with_account(profile.name.clone(), account);
    }
    let collector = HetznerCollector::new(Arc::new(fixture), HetznerPolicy::default());

    c.bench_function("generation_run_100_profiles", |b| {
        b.iter_batched(
            || {
                let gateway = MemoryGateway::new();
                for p in &profiles {
                    gateway.insert_profile(p.clone());
                }
                gateway
            },
            |gateway| {
                rt.block_on(async {
                    let summary = run_generation(&gateway, &collector, RunOptions::default()).await;
                    black_box(summary.map(|s| s.recommendations).unwrap_or(0))
                })
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_series_alignment,
    bench_audit_and_accumulate,
    bench_parallel_map,
    bench_generation_run,
);
criterion_main!(benches);
