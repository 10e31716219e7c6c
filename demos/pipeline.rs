//! # Example: pipeline
//!
//! Two chained stages with a dedicated pool, a retrying failure listener and the
//! built-in [`LogWriter`].
//!
//! ## Flow
//! ```text
//! main ──push──► Stage "parse" (DedicatedPool, 1..4 threads)
//!                   ├─ ok   ──fire──► Stage "store" (inline) ──► prints
//!                   └─ err  ──fire(Failure)──► retrier ──► parse.retry(ctx) (bounded)
//!                                          └──► LogWriter
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example pipeline --features logging
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use stagevisor::{
    BackoffPolicy, DedicatedPool, Event, JitterPolicy, ListenerFn, ListenerRef, LogWriter,
    PoolConfig, RetryPolicy, Stage, StageError, WorkerFn, WorkerRef,
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    let store: WorkerRef<String> = WorkerFn::arc("store", |_: &Stage<String>, ev: &Event<String>| {
        if let Some(n) = ev.payload() {
            println!("[store] {n}");
        }
        Ok::<_, StageError>(())
    });

    // "flaky" fails on its first two attempts.
    let flaky_attempts = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::clone(&flaky_attempts);
    let parse: WorkerRef<String> = WorkerFn::arc("parse", move |stage: &Stage<String>, ev: &Event<String>| {
        let raw = ev.payload().ok_or_else(|| StageError::fatal("no payload"))?;
        if raw == "flaky" && attempts.fetch_add(1, Ordering::SeqCst) < 2 {
            return Err(StageError::fail("flaky input, try again"));
        }
        let n: i64 = raw
            .parse()
            .map_err(|e| StageError::fatal(format!("{raw:?}: {e}")))?;
        stage.fire(Event::new((n * 10).to_string()))
    });

    let pool = DedicatedPool::<String>::new(&PoolConfig {
        min_threads: 1,
        max_threads: 4,
        join_timeout: Duration::from_secs(2),
        ..PoolConfig::default()
    });
    let store = Stage::new(store);
    let parse = Stage::builder(parse)
        .with_pool(pool)
        .with_retry(RetryPolicy {
            max_retries: 3,
            backoff: BackoffPolicy {
                first: Duration::from_millis(50),
                max: Duration::from_millis(500),
                factor: 2.0,
                jitter: JitterPolicy::Equal,
            },
        })
        .with_listeners(vec![
            store as ListenerRef<String>,
            Arc::new(LogWriter::new()) as ListenerRef<String>,
        ])
        .build();

    parse.register(ListenerFn::arc(
        "retrier",
        |src: &Stage<String>, ev: &Arc<Event<String>>| {
            if let Some(ctx) = ev.failure_context() {
                if let Err(e) = src.retry(ctx) {
                    println!("[retrier] giving up on {ctx}: {e}");
                }
            }
            Ok::<_, StageError>(())
        },
    ));

    for raw in ["1", "2", "x", "flaky", "4"] {
        parse.push(Event::new(raw.to_string()));
    }

    std::thread::sleep(Duration::from_secs(1));
    if let Some(report) = parse.shutdown() {
        println!("shutdown: {report:?}");
    }
}
