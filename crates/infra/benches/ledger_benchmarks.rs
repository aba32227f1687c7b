use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::time::Duration;

use tokenledger_core::{Jti, TokenLifetimes, TokenType};
use tokenledger_infra::TokenLedger;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn ledger() -> TokenLedger {
    let lifetimes =
        TokenLifetimes::new(Duration::from_secs(900), Duration::from_secs(3600)).unwrap();
    TokenLedger::in_memory(lifetimes)
}

fn bench_probate_and_query(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("ledger_memory");
    group.sample_size(1000);

    group.bench_function("probate_fresh", |b| {
        let ledger = ledger();
        b.iter(|| {
            let jti = Jti::generate();
            rt.block_on(ledger.probate(black_box(&jti), TokenType::Access)).unwrap();
        });
    });

    group.bench_function("query_revoked", |b| {
        let ledger = ledger();
        let jti = Jti::generate();
        rt.block_on(ledger.revoke(&jti, TokenType::Access)).unwrap();
        b.iter(|| {
            let state = rt.block_on(ledger.query(black_box(&jti))).unwrap();
            black_box(state);
        });
    });

    group.bench_function("query_unknown", |b| {
        let ledger = ledger();
        let jti = Jti::generate();
        b.iter(|| black_box(rt.block_on(ledger.query(&jti)).unwrap()));
    });

    group.finish();
}

fn bench_query_with_population(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("ledger_memory_population");

    for population in [100usize, 10_000, 100_000] {
        let ledger = ledger();
        let jtis: Vec<Jti> = (0..population).map(|_| Jti::generate()).collect();
        for jti in &jtis {
            rt.block_on(ledger.probate(jti, TokenType::Refresh)).unwrap();
        }

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(population), &jtis, |b, jtis| {
            let mut i = 0usize;
            b.iter(|| {
                let jti = &jtis[i % jtis.len()];
                i += 1;
                black_box(rt.block_on(ledger.query(jti)).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_probate_and_query, bench_query_with_population);
criterion_main!(benches);
