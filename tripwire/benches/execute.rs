//! Execute-path benchmarks: the healthy fast path and the tripped
//! short-circuit path.

use criterion::{Criterion, criterion_group, criterion_main};
use std::time::Duration;
use tripwire::{BoxError, Breaker, Command, CommandOptions, CutBreaker, CutBreakerConfig};

fn bench_execute(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");

    let healthy = rt.block_on(async {
        Command::new(
            "bench-healthy",
            |n: u64| async move { Ok::<u64, BoxError>(n + 1) },
            CommandOptions::default(),
        )
        .expect("command")
    });
    c.bench_function("execute_success", |b| {
        b.to_async(&rt).iter(|| async {
            let _ = healthy.execute(1).await;
        });
    });

    let tripped = rt.block_on(async {
        let breaker = Breaker::Cut(
            CutBreaker::new(
                "bench-open",
                CutBreakerConfig {
                    min_request_threshold: 1,
                    sleep_window: Duration::from_secs(3600),
                    ..CutBreakerConfig::default()
                },
            )
            .expect("breaker"),
        );
        let command = Command::new(
            "bench-open",
            |n: u64| async move { Err::<u64, BoxError>(format!("down: {n}").into()) },
            CommandOptions::default().breaker(breaker),
        )
        .expect("command");
        // One failure, then the next allow trips the breaker.
        let _ = command.execute(1).await;
        let _ = command.execute(1).await;
        command
    });
    c.bench_function("execute_short_circuit", |b| {
        b.to_async(&rt).iter(|| async {
            let _ = tripped.execute(1).await;
        });
    });
}

criterion_group!(benches, bench_execute);
criterion_main!(benches);
