//! Work queue concurrency: per-identity exclusivity, coalescing of
//! concurrent adds, and delayed retries.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reconcile_core::model::{ResourceIdentity, ResourceKind};
use reconcile_core::scheduler::{ItemState, WorkQueue};
use tokio_test::{assert_pending, assert_ready_eq, task};

fn id(n: usize) -> ResourceIdentity {
    ResourceIdentity::new(ResourceKind::ConfigMap, "default", format!("cm-{}", n))
}

#[tokio::test]
async fn concurrent_adds_while_running_yield_one_more_pass() {
    let queue = Arc::new(WorkQueue::new());
    queue.add(id(0));
    let held = queue.get().await.unwrap();

    let adders: Vec<_> = (0..2)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.add(id(0)) })
        })
        .collect();
    for adder in adders {
        adder.await.unwrap();
    }
    assert_eq!(queue.state_of(&held), ItemState::RunningDirty);
    assert!(queue.try_get().is_none());

    queue.done(&held);
    let again = queue.try_get().expect("one follow-up pass");
    queue.done(&again);
    assert!(queue.try_get().is_none());
    assert!(queue.is_idle());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_identity_is_processed_by_two_workers_at_once() {
    let queue = Arc::new(WorkQueue::new());
    let active: Arc<Mutex<HashSet<ResourceIdentity>>> = Arc::default();
    let passes: Arc<Mutex<HashMap<ResourceIdentity, usize>>> = Arc::default();
    let overlaps = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let active = Arc::clone(&active);
            let passes = Arc::clone(&passes);
            let overlaps = Arc::clone(&overlaps);
            tokio::spawn(async move {
                while let Some(identity) = queue.get().await {
                    if !active.lock().unwrap().insert(identity.clone()) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    *passes.lock().unwrap().entry(identity.clone()).or_default() += 1;
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    active.lock().unwrap().remove(&identity);
                    queue.done(&identity);
                }
            })
        })
        .collect();

    for round in 0..50 {
        for n in 0..5 {
            queue.add(id(n));
        }
        if round % 10 == 0 {
            tokio::task::yield_now().await;
        }
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !queue.is_idle() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(queue.is_idle());
    queue.shutdown();
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    let passes = passes.lock().unwrap();
    assert_eq!(passes.len(), 5);
    // Coalescing: far fewer passes than the 50 adds per identity.
    assert!(passes.values().all(|&n| (1..=50).contains(&n)));
}

#[tokio::test(start_paused = true)]
async fn delayed_retry_lands_after_done() {
    let queue = WorkQueue::new();
    queue.add(id(1));
    let held = queue.get().await.unwrap();
    queue.add_after(held.clone(), Duration::from_millis(200));
    queue.done(&held);
    assert_eq!(queue.state_of(&held), ItemState::Waiting);
    assert!(queue.try_get().is_none());

    tokio::time::advance(Duration::from_millis(250)).await;
    assert_eq!(queue.try_get(), Some(held));
}

#[tokio::test(start_paused = true)]
async fn immediate_add_beats_pending_delay() {
    let queue = WorkQueue::new();
    queue.add_after(id(2), Duration::from_secs(60));
    queue.add(id(2));
    assert_eq!(queue.try_get(), Some(id(2)));
    queue.done(&id(2));
    assert_eq!(queue.delayed_count(), 1);
}

#[test]
fn get_parks_until_an_add_wakes_it() {
    let queue = WorkQueue::new();
    let mut get = task::spawn(queue.get());
    assert_pending!(get.poll());

    queue.add(id(7));
    assert!(get.is_woken());
    assert_ready_eq!(get.poll(), Some(id(7)));
}

#[test]
fn shutdown_wakes_a_parked_get() {
    let queue = WorkQueue::new();
    let mut get = task::spawn(queue.get());
    assert_pending!(get.poll());

    queue.shutdown();
    assert!(get.is_woken());
    assert_ready_eq!(get.poll(), None);
}
