//! Producer/consumer behavior of the signal store and the context's blocking
//! resolve: wake-on-arrival, deadlines, cancellation, and snapshot
//! consistency under concurrent writers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use pointing_kernel::signals::WaitError;
use pointing_kernel::{
    BoundingBox, ContextConfig, DetectedObject, FrameDimensions, PerceptionContext,
    PointingDirection, PointingRay, ResolutionMode, SignalStore,
};

fn detections() -> Vec<DetectedObject> {
    vec![
        DetectedObject::new("cup", BoundingBox::new(100.0, 100.0, 50.0, 50.0)),
        DetectedObject::new("bottle", BoundingBox::new(400.0, 100.0, 50.0, 50.0)),
    ]
}

#[test]
fn waiter_wakes_when_a_producer_delivers() {
    let store = Arc::new(SignalStore::new());

    let producer = {
        let store = store.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            store.set_detections(detections());
        })
    };

    let snapshot = store
        .wait_for_detections(Duration::from_secs(5))
        .expect("wait");
    assert_eq!(snapshot.detections().len(), 2);
    producer.join().unwrap();
}

#[test]
fn wait_deadline_is_respected() {
    let store = SignalStore::new();
    let started = Instant::now();
    let err = store
        .wait_for_ray_and_frame(Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, WaitError::Timeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(50));
    // Should not overshoot by an order of magnitude either.
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn partial_ray_does_not_satisfy_the_wait() {
    let store = Arc::new(SignalStore::new());
    store.set_slope(1.0);
    store.set_frame_dimensions(FrameDimensions::new(640, 480));

    let err = store
        .wait_for_ray_and_frame(Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, WaitError::Timeout { .. }));

    store.set_intercept(-20.0);
    let snapshot = store
        .wait_for_ray_and_frame(Duration::from_millis(50))
        .expect("wait");
    assert_eq!(snapshot.ray(), Some(PointingRay::new(1.0, -20.0)));
}

#[test]
fn cancel_wakes_a_blocked_waiter() {
    let store = Arc::new(SignalStore::new());

    let canceller = {
        let store = store.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            store.cancel();
        })
    };

    let err = store.wait_for_direction(Duration::from_secs(5)).unwrap_err();
    assert_eq!(err, WaitError::Cancelled);
    canceller.join().unwrap();
}

#[test]
fn cancel_between_check_and_park_still_wakes_promptly() {
    // The waiter evaluates its predicate under the store lock, then parks on
    // the condvar. A cancel issued in that window must not be lost: it has
    // to block on the lock until the waiter parks, so its wakeup lands.
    let store = Arc::new(SignalStore::new());
    let (tx, rx) = mpsc::channel();

    let canceller = {
        let store = store.clone();
        thread::spawn(move || {
            rx.recv().unwrap();
            store.cancel();
        })
    };

    let armed = AtomicBool::new(false);
    let started = Instant::now();
    let err = store
        .wait_until("pointing direction", Duration::from_secs(10), |s| {
            if !armed.swap(true, Ordering::SeqCst) {
                // Fire the canceller while this thread still holds the store
                // lock, and linger so the cancel attempt lands before the
                // park.
                tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(100));
            }
            s.direction.is_some()
        })
        .unwrap_err();

    assert_eq!(err, WaitError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
    canceller.join().unwrap();
}

#[test]
fn context_resolves_once_late_signals_arrive() {
    let store = Arc::new(SignalStore::new());
    let context = PerceptionContext::new(
        store.clone(),
        ContextConfig {
            mode: ResolutionMode::Geometric,
            class_filter: None,
            wait_timeout: Duration::from_secs(5),
        },
    );

    // Signals arrive in an arbitrary order, detections last.
    let producer = {
        let store = store.clone();
        thread::spawn(move || {
            store.set_frame_dimensions(FrameDimensions::new(640, 480));
            thread::sleep(Duration::from_millis(10));
            store.set_slope(0.0);
            store.set_intercept(125.0);
            thread::sleep(Duration::from_millis(10));
            store.set_detections(detections());
        })
    };

    let resolution = context.resolve().expect("resolve");
    assert_eq!(resolution.selected.unwrap().class_name, "cup");
    producer.join().unwrap();
}

#[test]
fn resolution_reads_the_latest_full_detection_cycle() {
    let store = Arc::new(SignalStore::new());
    let context = PerceptionContext::new(
        store.clone(),
        ContextConfig {
            mode: ResolutionMode::Simplified,
            class_filter: None,
            wait_timeout: Duration::from_secs(1),
        },
    );

    store.set_direction(PointingDirection::Right);
    store.set_detections(detections());
    // A new cycle replaces the old one entirely; the stale "cup" at x=100
    // must not linger.
    store.set_detections(vec![DetectedObject::new(
        "bowl",
        BoundingBox::new(250.0, 100.0, 50.0, 50.0),
    )]);

    let resolution = context.resolve().expect("resolve");
    assert_eq!(resolution.selected.unwrap().class_name, "bowl");
}

#[test]
fn concurrent_producers_never_tear_a_snapshot() {
    let store = Arc::new(SignalStore::new());
    let mut producers = Vec::new();

    for i in 0..4u32 {
        let store = store.clone();
        producers.push(thread::spawn(move || {
            for j in 0..50u32 {
                let v = f64::from(i * 100 + j);
                store.set_slope(v);
                store.set_intercept(v);
                store.set_frame_dimensions(FrameDimensions::new(640 + i, 480 + j));
            }
        }));
    }

    for _ in 0..200 {
        let snapshot = store.snapshot();
        // Each field is either unset or a value some producer actually
        // wrote; a torn read would surface as a mismatched pair here only
        // if set_ray were split, so check the combined setter too.
        if let Some(ray) = snapshot.ray() {
            assert!(ray.slope >= 0.0 && ray.slope < 400.0);
            assert!(ray.intercept >= 0.0 && ray.intercept < 400.0);
        }
    }

    for p in producers {
        p.join().unwrap();
    }
}
