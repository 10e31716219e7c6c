//! End-to-end pipelines: pooled stages, failure listeners, retry and shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use stagevisor::{
    BackoffPolicy, DedicatedPool, Event, EventKind, JitterPolicy, ListenerFn, PoolConfig,
    RetryPolicy, SharedPool, Stage, StageError, WorkerFn, WorkerRef, shutdown,
};

fn pool_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        min_threads: min,
        max_threads: max,
        join_timeout: Duration::from_secs(5),
        ..PoolConfig::default()
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Counts non-empty payloads, fails on empty ones.
fn ingest_worker(counter: &Arc<AtomicUsize>) -> WorkerRef<String> {
    let counter = Arc::clone(counter);
    WorkerFn::arc("ingest", move |_: &Stage<String>, ev: &Event<String>| {
        match ev.payload() {
            Some(p) if p.is_empty() => Err(StageError::fail("empty payload")),
            Some(_) => {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Ok(()),
        }
    })
}

/// Stage recording `(retry_count, echoed payload, error)` of every failure it receives.
fn sink(seen: &Arc<Mutex<Vec<(u32, Option<String>, Option<StageError>)>>>) -> Arc<Stage<String>> {
    let seen = Arc::clone(seen);
    let worker: WorkerRef<String> = WorkerFn::arc("sink", move |_: &Stage<String>, ev: &Event<String>| {
        if let EventKind::Failure(ctx) = &ev.kind {
            seen.lock().push((
                ctx.retry_count(),
                ctx.event().payload().cloned(),
                ctx.error().cloned(),
            ));
        }
        Ok::<_, StageError>(())
    });
    Stage::new(worker)
}

#[test]
fn ingest_to_sink_under_concurrent_pushes() {
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let ingest = Stage::builder(ingest_worker(&counter))
        .with_name("Ingest")
        .with_pool(DedicatedPool::<String>::new(&pool_config(1, 4)))
        .build();
    ingest.register(sink(&seen));

    let producers: Vec<_> = (0..10)
        .map(|t| {
            let ingest = Arc::clone(&ingest);
            thread::spawn(move || {
                for i in 0..10 {
                    let payload = if i == 3 { String::new() } else { format!("{t}-{i}") };
                    ingest.push(Event::new(payload));
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(10), || {
        counter.load(Ordering::SeqCst) == 90 && seen.lock().len() == 10
    }));

    let report = ingest.shutdown().unwrap();
    assert!(report.is_clean());
    assert_eq!(counter.load(Ordering::SeqCst), 90);

    let seen = seen.lock();
    assert_eq!(seen.len(), 10);
    for (retry_count, payload, error) in seen.iter() {
        assert_eq!(*retry_count, 0);
        assert_eq!(payload.as_deref(), Some(""));
        assert_eq!(error, &Some(StageError::fail("empty payload")));
    }
}

#[test]
fn shared_pool_runs_stage_work() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .build()
        .unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let pool = SharedPool::<String>::new(rt.handle().clone(), &pool_config(1, 4));
    let ingest = Stage::builder(ingest_worker(&counter))
        .with_pool(pool)
        .build();
    ingest.register(sink(&seen));

    for payload in ["a", "", "b", "c"] {
        ingest.push(Event::new(payload.to_string()));
    }
    assert!(wait_until(Duration::from_secs(10), || {
        counter.load(Ordering::SeqCst) == 3 && seen.lock().len() == 1
    }));
    assert!(ingest.shutdown().unwrap().is_clean());
}

#[test]
fn failure_listener_retries_pooled_work_until_success() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let a = Arc::clone(&attempts);
    let flaky: WorkerRef<String> = WorkerFn::arc("flaky", move |_: &Stage<String>, _: &Event<String>| {
        if a.fetch_add(1, Ordering::SeqCst) < 2 {
            return Err(StageError::fail("not yet"));
        }
        Ok(())
    });

    let stage = Stage::builder(flaky)
        .with_retry(RetryPolicy::immediate(5))
        .with_pool(DedicatedPool::<String>::new(&pool_config(1, 2)))
        .build();
    let retried = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&retried);
    stage.register(ListenerFn::arc(
        "retrier",
        move |src: &Stage<String>, ev: &Arc<Event<String>>| {
            if let Some(ctx) = ev.failure_context() {
                r.lock().push(ctx.retry_count());
                src.retry(ctx)?;
            }
            Ok::<_, StageError>(())
        },
    ));

    stage.push(Event::new("job".to_string()));
    assert!(wait_until(Duration::from_secs(10), || {
        attempts.load(Ordering::SeqCst) == 3
    }));
    assert!(stage.shutdown().unwrap().is_clean());
    assert_eq!(*retried.lock(), [0, 1]);
}

#[test]
fn worker_forwards_through_chained_stages() {
    let out = Arc::new(Mutex::new(Vec::new()));
    let o = Arc::clone(&out);
    let collect: WorkerRef<String> = WorkerFn::arc("collect", move |_: &Stage<String>, ev: &Event<String>| {
        if let Some(p) = ev.payload() {
            o.lock().push(p.clone());
        }
        Ok::<_, StageError>(())
    });
    let upper: WorkerRef<String> = WorkerFn::arc("upper", |stage: &Stage<String>, ev: &Event<String>| {
        match ev.payload() {
            Some(p) => stage.fire(Event::new(p.to_uppercase())),
            None => Ok(()),
        }
    });

    let last = Stage::new(collect);
    let first = Stage::builder(upper)
        .with_pool(DedicatedPool::<String>::new(&pool_config(1, 1)))
        .build();
    first.register(last);

    first.push(Event::new("abc".to_string()));
    assert!(wait_until(Duration::from_secs(10), || out.lock().len() == 1));
    assert_eq!(*out.lock(), ["ABC"]);
    assert_eq!(first.observing_stages().len(), 1);
    assert!(first.shutdown().unwrap().is_clean());
}

#[test]
fn shutdown_abandons_stuck_worker_and_rejects_later_pushes() {
    let release = Arc::new(AtomicBool::new(false));
    let started = Arc::new(AtomicBool::new(false));
    let (r, s) = (Arc::clone(&release), Arc::clone(&started));
    let stuck: WorkerRef<String> = WorkerFn::arc("stuck", move |_: &Stage<String>, _: &Event<String>| {
        s.store(true, Ordering::SeqCst);
        // Ignores cancellation on purpose.
        while !r.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        Ok::<_, StageError>(())
    });

    let pool = DedicatedPool::<String>::new(&PoolConfig {
        join_timeout: Duration::from_millis(200),
        ..pool_config(1, 1)
    });
    let stage = Stage::builder(stuck).with_pool(pool).build();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::clone(&failures);
    stage.register(ListenerFn::arc(
        "failures",
        move |_: &Stage<String>, ev: &Arc<Event<String>>| {
            if let Some(ctx) = ev.failure_context() {
                f.lock().push(ctx.error().cloned());
            }
            Ok::<_, StageError>(())
        },
    ));

    stage.push(Event::new("block".to_string()));
    assert!(wait_until(Duration::from_secs(5), || started.load(Ordering::SeqCst)));

    let t0 = Instant::now();
    let report = stage.shutdown().unwrap();
    assert!(t0.elapsed() < Duration::from_secs(5));
    assert_eq!(report.abandoned.len(), 1);
    assert!(stage.shutdown().unwrap().already_shutting_down);

    stage.push(Event::new("late".to_string()));
    assert_eq!(
        *failures.lock(),
        [Some(StageError::Rejected {
            pool: format!("{}TP", stage.name())
        })]
    );

    release.store(true, Ordering::SeqCst);
}

#[test]
fn pause_is_interrupted_by_stage_shutdown() {
    let outcome = Arc::new(Mutex::new(None));
    let o = Arc::clone(&outcome);
    let sleeper: WorkerRef<String> = WorkerFn::arc("sleeper", move |_: &Stage<String>, _: &Event<String>| {
        assert!(shutdown::is_worker_thread());
        let res = shutdown::pause(Duration::from_secs(60));
        *o.lock() = Some((res.clone(), shutdown::is_cancelled()));
        res
    });
    let stage = Stage::builder(sleeper)
        .with_pool(DedicatedPool::<String>::new(&pool_config(1, 1)))
        .build();

    stage.push(Event::new("zzz".to_string()));
    thread::sleep(Duration::from_millis(100));

    let report = stage.shutdown().unwrap();
    assert!(report.is_clean());
    assert_eq!(*outcome.lock(), Some((Err(StageError::Interrupted), true)));
}

#[test]
fn uncapped_backoff_retry_waits_on_pool_thread_until_shutdown() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let a = Arc::clone(&attempts);
    let down: WorkerRef<String> = WorkerFn::arc("down", move |_: &Stage<String>, _: &Event<String>| {
        a.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(StageError::fail("down"))
    });

    let pool = DedicatedPool::<String>::new(&pool_config(1, 1));
    let stage = Stage::builder(down)
        .with_retry(RetryPolicy {
            max_retries: 1,
            backoff: BackoffPolicy {
                first: Duration::from_secs(u64::MAX / 2),
                max: Duration::MAX,
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
        })
        .with_pool(pool.clone())
        .build();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::clone(&failures);
    stage.register(ListenerFn::arc(
        "retrier",
        move |src: &Stage<String>, ev: &Arc<Event<String>>| {
            if let Some(ctx) = ev.failure_context() {
                f.lock().push((ctx.retry_count(), ctx.error().cloned()));
                if ctx.retry_count() == 0 {
                    src.retry(ctx)?;
                }
            }
            Ok::<_, StageError>(())
        },
    ));

    stage.push(Event::new("job".to_string()));
    assert!(wait_until(Duration::from_secs(5), || failures.lock().len() == 1));
    // Let the resubmission reach its backoff wait.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(pool.live_threads(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let report = stage.shutdown().unwrap();
    assert_eq!(report.interrupted, 1);
    assert!(report.is_clean());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(
        *failures.lock(),
        [
            (0, Some(StageError::fail("down"))),
            (1, Some(StageError::Interrupted)),
        ]
    );
    assert_eq!(pool.live_threads(), 0);
}
