//! Tests for work queue coalescing, exclusivity and delayed adds.

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::model::ResourceKind;

fn id(name: &str) -> ResourceIdentity {
    ResourceIdentity::new(ResourceKind::Deployment, "default", name)
}

#[tokio::test]
async fn add_coalesces_while_queued() {
    let q = WorkQueue::new();
    q.add(id("a"));
    q.add(id("a"));
    q.add(id("b"));
    assert_eq!(q.len(), 2);
    assert_eq!(q.state_of(&id("a")), ItemState::Queued);
}

#[tokio::test]
async fn add_while_running_requeues_once_on_done() {
    let q = WorkQueue::new();
    q.add(id("a"));
    let got = q.get().await.unwrap();
    assert_eq!(q.state_of(&got), ItemState::Running);

    q.add(id("a"));
    q.add(id("a"));
    // Held by a worker: not handed out again.
    assert!(q.try_get().is_none());
    assert_eq!(q.state_of(&got), ItemState::RunningDirty);

    q.done(&got);
    assert_eq!(q.len(), 1);
    let again = q.try_get().unwrap();
    assert_eq!(again, got);
    q.done(&again);
    assert!(q.try_get().is_none());
    assert_eq!(q.state_of(&got), ItemState::Idle);
}

#[tokio::test]
async fn fifo_across_identities() {
    let q = WorkQueue::new();
    for n in ["a", "b", "c"] {
        q.add(id(n));
    }
    assert_eq!(q.try_get().unwrap(), id("a"));
    assert_eq!(q.try_get().unwrap(), id("b"));
    assert_eq!(q.try_get().unwrap(), id("c"));
}

#[tokio::test(start_paused = true)]
async fn add_after_fires_after_delay() {
    let q = Arc::new(WorkQueue::new());
    q.add_after(id("a"), Duration::from_millis(100));
    assert_eq!(q.state_of(&id("a")), ItemState::Waiting);
    assert!(q.try_get().is_none());

    let waiter = {
        let q = Arc::clone(&q);
        tokio::spawn(async move { q.get().await })
    };
    tokio::time::advance(Duration::from_millis(150)).await;
    let got = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got, Some(id("a")));
}

#[tokio::test(start_paused = true)]
async fn shorter_delay_wins() {
    let q = WorkQueue::new();
    q.add_after(id("a"), Duration::from_secs(10));
    q.add_after(id("a"), Duration::from_millis(10));
    tokio::time::advance(Duration::from_millis(20)).await;
    assert_eq!(q.try_get(), Some(id("a")));
    q.done(&id("a"));
    // The superseded 10s entry is skipped.
    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(q.try_get().is_none());
}

#[tokio::test]
async fn shutdown_releases_waiters() {
    let q = Arc::new(WorkQueue::new());
    let waiter = {
        let q = Arc::clone(&q);
        tokio::spawn(async move { q.get().await })
    };
    tokio::task::yield_now().await;
    q.shutdown();
    let got = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(got.is_none());
    q.add(id("late"));
    assert!(q.is_empty());
}

#[tokio::test]
async fn is_idle_tracks_all_states() {
    let q = WorkQueue::new();
    assert!(q.is_idle());
    q.add(id("a"));
    assert!(!q.is_idle());
    let got = q.try_get().unwrap();
    assert!(!q.is_idle());
    q.done(&got);
    assert!(q.is_idle());
}
