//! Drive a command through trip, short-circuit and recovery.
//!
//! Run with: `cargo run --example breaker_demo`

use std::sync::Arc;
use std::time::Duration;

use tripwire::{BoxError, Breaker, Command, CommandOptions, CutBreaker, CutBreakerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    // The target succeeds or fails on demand via its parameter.
    let run = |healthy: bool| async move {
        if healthy {
            Ok::<&'static str, BoxError>("ok")
        } else {
            Err("backend error".into())
        }
    };

    let breaker = Breaker::Cut(CutBreaker::new(
        "demo",
        CutBreakerConfig {
            sleep_window: Duration::from_secs(2),
            ..CutBreakerConfig::default()
        },
    )?);
    let command = Arc::new(Command::new(
        "demo",
        run,
        CommandOptions::default()
            .breaker(breaker)
            .fallback(|_healthy: bool, _cause| async move { Ok::<&'static str, BoxError>("fallback") })
            .timeout(Duration::from_secs(5)),
    )?);

    // Twenty concurrent calls, half failing: right at the threshold.
    let mut joins = Vec::new();
    for i in 0..20 {
        let command = Arc::clone(&command);
        joins.push(tokio::spawn(async move {
            let _ = command.execute(i % 2 == 0).await;
        }));
    }
    for join in joins {
        join.await?;
    }

    // One more failure trips the breaker.
    println!("step1: {:?}", command.execute(false).await);

    // Short-circuited: even healthy calls get the fallback.
    for _ in 0..5 {
        println!("step2: {:?}", command.execute(true).await);
    }

    // After the sleep window a failing probe re-opens the breaker...
    tokio::time::sleep(Duration::from_secs(2)).await;
    let _ = command.execute(false).await;
    println!("step3: {:?}", command.execute(true).await);

    // ...and a successful probe closes it again.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let _ = command.execute(true).await;
    for _ in 0..5 {
        println!("step4: {:?}", command.execute(true).await);
    }

    let summary = command.summary().await;
    println!(
        "summary: status={} total={} errors={:.1}%",
        summary.status, summary.total, summary.error_percentage
    );

    command.close();
    Ok(())
}
