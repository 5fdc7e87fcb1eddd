// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use iid_core::{CancelToken, DetectError, StreamDetector};
use iid_online::{IidChangePointDetector, IidConfig, IidSpikeDetector};
use std::thread;
use std::time::{Duration, Instant};

/// Bounded periodic noise that turns into a steady upward drift at `onset`.
fn drifting_series(n: usize, onset: usize) -> Vec<f64> {
    (0..n)
        .map(|idx| {
            let base = ((idx * 7919) % 13) as f64;
            if idx >= onset {
                base + 3.0 * (idx - onset + 1) as f64
            } else {
                base
            }
        })
        .collect()
}

#[test]
fn detector_types_are_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<IidSpikeDetector>();
    assert_send_sync::<IidChangePointDetector>();
    assert_send_sync::<CancelToken>();
}

#[test]
fn multi_instance_threaded_runs_keep_state_isolated() {
    const THREADS: usize = 4;
    const STEPS: usize = 600;

    let series = drifting_series(STEPS, 400);
    let config = IidConfig::new(24, 95.0);
    let expected = IidChangePointDetector::new(config.clone())
        .expect("valid config")
        .score_many(&series, None)
        .expect("reference run should succeed");

    let mut workers = Vec::with_capacity(THREADS);
    for _ in 0..THREADS {
        let series = series.clone();
        let config = config.clone();
        workers.push(thread::spawn(move || {
            let mut detector = IidChangePointDetector::new(config).expect("valid config");
            let results = detector
                .score_many(&series, None)
                .expect("threaded run should succeed");
            (detector.state().t, results)
        }));
    }

    for worker in workers {
        let (t, results) = worker.join().expect("thread should join cleanly");
        assert_eq!(t, STEPS);
        assert_eq!(results, expected);
    }
}

#[test]
fn spike_and_changepoint_run_in_parallel_over_shared_input() {
    let series = drifting_series(800, 500);
    let config = IidConfig::new(32, 95.0);

    let (spike_results, cp_results) = thread::scope(|scope| {
        let spike = scope.spawn(|| {
            IidSpikeDetector::new(config.clone())
                .expect("valid config")
                .score_many(&series, None)
                .expect("spike run should succeed")
        });
        let changepoint = scope.spawn(|| {
            IidChangePointDetector::new(config.clone())
                .expect("valid config")
                .score_many(&series, None)
                .expect("change-point run should succeed")
        });
        (
            spike.join().expect("spike thread should join"),
            changepoint.join().expect("change-point thread should join"),
        )
    });

    assert_eq!(spike_results.len(), series.len());
    assert_eq!(cp_results.len(), series.len());
    assert!(spike_results.iter().all(|r| r.martingale.is_none()));
    let cp_alerts = cp_results
        .iter()
        .filter(|r| r.alert)
        .map(|r| r.index)
        .collect::<Vec<_>>();
    assert!(!cp_alerts.is_empty());
    assert!(cp_alerts.iter().all(|&idx| idx >= 500), "{cp_alerts:?}");
}

#[test]
fn concurrent_cancellation_stops_in_flight_stream() {
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let worker = thread::spawn(move || {
        let mut detector = IidSpikeDetector::with_params(16, 95.0).expect("valid config");
        let mut scored = 0usize;
        loop {
            match detector.score_many(&[scored as f64], Some(&worker_cancel)) {
                Ok(results) => {
                    scored += results.len();
                    thread::sleep(Duration::from_millis(1));
                }
                Err(err) => return (scored, detector.state().t, err),
            }
        }
    });

    thread::sleep(Duration::from_millis(30));
    let cancelled_at = Instant::now();
    cancel.cancel();

    let (scored, t, err) = worker.join().expect("worker should join");
    let cancellation_latency_ms = cancelled_at.elapsed().as_millis();

    assert!(scored > 0);
    assert_eq!(t, scored);
    assert_eq!(err, DetectError::Cancelled);
    assert_eq!(err.to_string(), "cancelled");
    assert!(
        cancellation_latency_ms <= 2_000,
        "expected prompt cancellation, got {cancellation_latency_ms} ms"
    );
}
