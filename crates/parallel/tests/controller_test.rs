//! Integration tests for Controller
//!
//! Run with: cargo test -p parallel --test controller_test
//!
//! Set RUST_LOG=parallel=debug to see generation and worker lifecycle logs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use parallel::prelude::*;

/// Error returned by the always-failing operation
#[derive(Debug, Clone, PartialEq, Eq)]
struct Sentinel;

/// Shared vector a handler can push into
fn collector<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl FnMut(T) + Send + 'static) {
    let sink = Arc::new(Mutex::new(Vec::new()));
    let handle = Arc::clone(&sink);
    (sink, move |item| handle.lock().push(item))
}

fn identity_controller(concurrency: usize) -> Controller<u32, u32, Sentinel> {
    Controller::new(|n: u32| async move { Ok::<_, Sentinel>(n) }, concurrency).unwrap()
}

#[test_log::test(tokio::test)]
async fn test_identity_results_match_inputs() {
    let controller = identity_controller(10);
    let (results, on_result) = collector();
    controller.on_result(on_result);

    for n in 0..100 {
        controller.call(n).await;
    }
    controller.wait().await;

    let mut results = results.lock().clone();
    results.sort_unstable();
    assert_eq!(results, (0..100).collect::<Vec<_>>());
}

#[test_log::test(tokio::test)]
async fn test_always_failing_operation_reports_every_error() {
    let controller: Controller<u32, u32, Sentinel> =
        Controller::new(|_: u32| async move { Err::<u32, _>(Sentinel) }, 10).unwrap();

    let (results, on_result) = collector();
    let (errors, on_error) = collector();
    controller.on_result(on_result);
    controller.on_error(on_error);

    for n in 0..100 {
        controller.call(n).await;
    }
    controller.wait().await;

    assert!(results.lock().is_empty());
    let errors = errors.lock();
    assert_eq!(errors.len(), 100);
    assert!(errors.iter().all(|e| *e == Sentinel));
}

#[test_log::test(tokio::test)]
async fn test_wait_is_idempotent() {
    let controller = identity_controller(10);
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    controller.on_result(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for n in 0..100 {
        controller.call(n).await;
    }
    controller.wait().await;
    assert_eq!(delivered.load(Ordering::SeqCst), 100);

    tokio::time::timeout(Duration::from_secs(1), controller.wait())
        .await
        .expect("second wait should return promptly");
    assert_eq!(delivered.load(Ordering::SeqCst), 100);
    assert_eq!(controller.status(), ControllerStatus::Stopped);
}

#[test_log::test(tokio::test)]
async fn test_reset_restores_calls_and_keeps_handlers() {
    let controller = identity_controller(4);
    let (results, on_result) = collector();
    controller.on_result(on_result);

    for n in 0..20 {
        controller.call(n).await;
    }
    controller.wait().await;
    assert_eq!(results.lock().len(), 20);

    controller.reset().unwrap();
    assert_eq!(controller.generation(), 2);

    for n in 100..130 {
        controller.call(n).await;
    }
    controller.wait().await;

    let results = results.lock();
    assert_eq!(results.len(), 50);
    assert_eq!(results.iter().filter(|n| **n >= 100).count(), 30);
    assert_eq!(controller.stats().results, 30);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_peak_concurrency_never_exceeds_limit() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let op = {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        move |n: u32| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1 + u64::from(n % 3))).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, Sentinel>(n)
            }
        }
    };

    let controller = Controller::with_config(
        op,
        ControllerConfig::new(3)
            .with_input_buffer(16)
            .with_output_buffer(16),
    )
    .unwrap();

    for n in 0..60 {
        controller.call(n).await;
    }
    controller.wait().await;

    assert_eq!(controller.stats().results, 60);
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "observed {} concurrent calls with limit 3", peak);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_handlers_never_overlap() {
    let controller: Controller<u32, u32, u32> = Controller::new(
        |n: u32| async move {
            // Jitter completions so results and errors race each other
            tokio::time::sleep(Duration::from_micros(u64::from(n % 7) * 50)).await;
            if n % 2 == 0 {
                Ok(n)
            } else {
                Err(n)
            }
        },
        8,
    )
    .unwrap();

    let in_handler = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let handled = Arc::new(AtomicUsize::new(0));

    let guard = {
        let in_handler = Arc::clone(&in_handler);
        let overlaps = Arc::clone(&overlaps);
        let handled = Arc::clone(&handled);
        move || {
            if in_handler.swap(true, Ordering::SeqCst) {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_micros(20));
            handled.fetch_add(1, Ordering::SeqCst);
            in_handler.store(false, Ordering::SeqCst);
        }
    };

    let on_result = guard.clone();
    controller.on_result(move |_| on_result());
    let on_error = guard;
    controller.on_error(move |_| on_error());

    for n in 0..200 {
        controller.call(n).await;
    }
    controller.wait().await;

    assert_eq!(handled.load(Ordering::SeqCst), 200);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test_log::test(tokio::test)]
async fn test_handlers_mutate_captured_state_without_locks() {
    let controller = identity_controller(6);
    let mut sum = 0u64;
    let (totals, mut report) = collector();

    // FnMut state lives inside the handler itself
    controller.on_result(move |n| {
        sum += u64::from(n);
        report(sum);
    });

    for n in 1..=10 {
        controller.call(n).await;
    }
    controller.wait().await;

    assert_eq!(totals.lock().last().copied(), Some(55));
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Person {
    name: String,
    score: usize,
}

#[test_log::test(tokio::test)]
async fn test_named_inputs_scenario() {
    let controller: Controller<String, Person, String> = Controller::new(
        |name: String| async move {
            tokio::time::sleep(Duration::from_millis((name.len() % 4) as u64)).await;
            let score = name.bytes().map(usize::from).sum();
            Ok::<_, String>(Person { name, score })
        },
        5,
    )
    .unwrap();

    let (people, on_result) = collector();
    let (errors, on_error) = collector();
    controller.on_result(on_result);
    controller.on_error(on_error);

    let names = [
        "James", "Mary", "Robert", "Patricia", "John", "Jennifer", "Michael", "Linda", "William",
        "Raphael",
    ];
    for name in names {
        controller.call(name.to_string()).await;
    }
    controller.wait().await;

    assert!(errors.lock().is_empty());
    let people = people.lock();
    assert_eq!(people.len(), 10);

    let delivered: HashSet<&str> = people.iter().map(|p| p.name.as_str()).collect();
    let submitted: HashSet<&str> = names.into_iter().collect();
    assert_eq!(delivered, submitted);
}

#[test_log::test(tokio::test)]
async fn test_concurrent_callers_share_one_generation() {
    let controller = Arc::new(identity_controller(4));
    let (results, on_result) = collector();
    controller.on_result(on_result);

    let producers: Vec<_> = (0..4u32)
        .map(|p| {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                for n in 0..25 {
                    controller.call(p * 100 + n).await;
                }
            })
        })
        .collect();

    for producer in producers {
        producer.await.unwrap();
    }
    controller.wait().await;

    let results = results.lock();
    assert_eq!(results.len(), 100);
    assert_eq!(results.iter().collect::<HashSet<_>>().len(), 100);
}

#[test_log::test(tokio::test)]
async fn test_dropping_controller_releases_workers() {
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finished);

    let controller = Controller::new(
        move |n: u32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Sentinel>(n)
            }
        },
        2,
    )
    .unwrap();

    controller.call(1).await;
    drop(controller);

    // The call already handed off is still executed by a worker
    tokio::time::timeout(Duration::from_secs(5), async {
        while finished.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("in-flight call should still complete");
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_slow_handler_backpressures_callers() {
    let controller = identity_controller(1);
    let (results, mut on_result) = collector();
    controller.on_result(move |n| {
        std::thread::sleep(Duration::from_millis(20));
        on_result(n);
    });

    let started = std::time::Instant::now();
    for n in 0..20 {
        controller.call(n).await;
    }
    let submit_time = started.elapsed();
    controller.wait().await;

    // Only a handful of items fit in the buffers, the worker and the handler;
    // the rest of the calls wait for the handler to catch up
    assert!(
        submit_time >= Duration::from_millis(200),
        "20 calls were accepted in {:?} despite a 20ms handler",
        submit_time
    );
    assert_eq!(results.lock().len(), 20);
}

#[test_log::test(tokio::test)]
async fn test_error_handler_survives_reset() {
    let controller: Controller<u32, u32, Sentinel> =
        Controller::new(|_: u32| async move { Err::<u32, _>(Sentinel) }, 3).unwrap();
    let (errors, on_error) = collector();
    controller.on_error(on_error);

    for n in 0..5 {
        controller.call(n).await;
    }
    controller.wait().await;
    controller.reset().unwrap();

    for n in 0..7 {
        controller.call(n).await;
    }
    controller.wait().await;

    assert_eq!(errors.lock().len(), 12);
    assert_eq!(controller.stats().errors, 7);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_waiters_return_after_drain() {
    let (release_tx, release_rx) = tokio::sync::watch::channel(false);
    let controller: Controller<u32, u32, Sentinel> = Controller::new(
        move |n: u32| {
            let mut release = release_rx.clone();
            async move {
                let _ = release.wait_for(|go| *go).await;
                Ok::<_, Sentinel>(n)
            }
        },
        4,
    )
    .unwrap();
    let controller = Arc::new(controller);

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    controller.on_result(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for n in 0..4 {
        controller.call(n).await;
    }

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let controller = Arc::clone(&controller);
            let delivered = Arc::clone(&delivered);
            tokio::spawn(async move {
                controller.wait().await;
                delivered.load(Ordering::SeqCst)
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(waiters.iter().all(|w| !w.is_finished()));
    assert_eq!(controller.status(), ControllerStatus::Draining);

    release_tx.send_replace(true);
    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), 4);
    }
    assert_eq!(controller.status(), ControllerStatus::Stopped);
    assert_eq!(controller.stats().results, 4);
}
