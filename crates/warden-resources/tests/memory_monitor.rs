mod common;

use common::{fixed_probe, test_limits, MockProbe};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use warden_core::Reclaimable;
use warden_resources::MemoryMonitor;

struct CountingReclaimer(AtomicUsize);

impl Reclaimable for CountingReclaimer {
    fn name(&self) -> &str {
        "contador"
    }

    fn reclaim(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst);
        3
    }
}

#[tokio::test]
async fn below_threshold_fires_nothing() {
    let monitor = MemoryMonitor::new(&test_limits(), fixed_probe(100.0));
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    monitor.add_callback(move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert!(!monitor.check_once().await);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(monitor.last_usage_mb(), Some(100.0));
    assert!((monitor.usage_fraction() - 0.1).abs() < 1e-9);
    assert_eq!(monitor.warning_count(), 0);
}

#[tokio::test]
async fn above_threshold_fires_every_callback_then_reclaims() {
    let mut probe = MockProbe::new();
    probe.expect_resident_mb().times(1).return_const(950.0);
    let monitor = MemoryMonitor::new(&test_limits(), Arc::new(probe));

    let seen = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..2 {
        let seen = seen.clone();
        monitor.add_callback(move |usage| {
            let seen = seen.clone();
            async move {
                seen.lock().push(usage);
            }
        });
    }
    let reclaimer = Arc::new(CountingReclaimer(AtomicUsize::new(0)));
    monitor.add_reclaimable(reclaimer.clone());

    assert!(monitor.check_once().await);
    assert_eq!(*seen.lock(), vec![950.0, 950.0]);
    assert_eq!(reclaimer.0.load(Ordering::SeqCst), 1);
    assert_eq!(monitor.warning_count(), 1);
    assert!(monitor.last_sample().map(|s| s.warning).unwrap_or(false));
}

#[tokio::test(start_paused = true)]
async fn slow_callback_is_bounded_by_timeout() {
    let monitor = MemoryMonitor::new(&test_limits(), fixed_probe(900.0));
    let fast_done = Arc::new(AtomicUsize::new(0));

    monitor.add_callback(|_| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    });
    let counter = fast_done.clone();
    monitor.add_callback(move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let started = Instant::now();
    assert!(monitor.check_once().await);
    let elapsed = started.elapsed();

    assert_eq!(fast_done.load(Ordering::SeqCst), 1);
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn panicking_callback_does_not_affect_others() {
    let monitor = MemoryMonitor::new(&test_limits(), fixed_probe(900.0));
    let fired = Arc::new(AtomicUsize::new(0));

    monitor.add_callback(|_| async {
        if true {
            panic!("callback quebrado");
        }
    });
    let counter = fired.clone();
    monitor.add_callback(move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert!(monitor.check_once().await);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn removed_callback_is_not_called() {
    let monitor = MemoryMonitor::new(&test_limits(), fixed_probe(900.0));
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let id = monitor.add_callback(move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert!(monitor.remove_callback(id));
    assert!(!monitor.remove_callback(id));
    monitor.check_once().await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn polling_loop_samples_until_stopped() {
    let monitor = Arc::new(MemoryMonitor::new(&test_limits(), fixed_probe(200.0)));

    assert!(monitor.start());
    assert!(!monitor.start());
    assert!(monitor.is_running());

    tokio::time::sleep(Duration::from_millis(3500)).await;
    monitor.stop().await;

    assert!(!monitor.is_running());
    let history = monitor.history();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|sample| !sample.warning && sample.usage_mb == 200.0));
}
