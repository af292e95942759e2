//! Integration tests for lease arbitration over inference capacity.

mod common;

use common::*;
use proptest::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use evochamber::domain::errors::{DomainError, DomainResult};
use evochamber::domain::models::ResourceClassConfig;
use evochamber::domain::ports::ModelResidency;
use evochamber::services::ResourceScheduler;

fn single(capacity: u32, model: Option<&str>) -> ResourceScheduler {
    ResourceScheduler::new(vec![ResourceClassConfig {
        name: "gpu".to_string(),
        capacity,
        model: model.map(str::to_string),
    }])
}

#[tokio::test]
async fn test_waiters_are_served_in_arrival_order() {
    let scheduler = Arc::new(single(2, None));
    let first = scheduler.lease("gpu", 1, false, "holder-1").await.unwrap();
    let second = scheduler.lease("gpu", 1, false, "holder-2").await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut waiters = Vec::new();
    for (name, units) in [("big", 2), ("small", 1)] {
        let task_scheduler = scheduler.clone();
        let tx = tx.clone();
        waiters.push(tokio::spawn(async move {
            let lease = task_scheduler.lease("gpu", units, false, name).await.unwrap();
            tx.send(name).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            task_scheduler.release(lease).await.unwrap();
        }));
        // Fix arrival order.
        while scheduler.utilization()[0].waiting < waiters.len() {
            tokio::task::yield_now().await;
        }
    }

    // One unit frees up: the small request fits but must not overtake the big one.
    scheduler.release(first).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());

    scheduler.release(second).await.unwrap();
    for waiter in waiters {
        waiter.await.unwrap();
    }
    assert_eq!(rx.recv().await, Some("big"));
    assert_eq!(rx.recv().await, Some("small"));
    assert_eq!(scheduler.in_use("gpu"), Some(0));
}

#[tokio::test]
async fn test_bounded_wait_times_out_and_withdraws() {
    let scheduler = single(1, None);
    let held = scheduler.lease("gpu", 1, true, "judge").await.unwrap();

    let err = scheduler
        .lease_within("gpu", 1, false, "classifier", Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ResourceUnavailableTimeout { units: 1, .. }));
    assert_eq!(scheduler.utilization()[0].waiting, 0);

    scheduler.release(held).await.unwrap();
    let lease = scheduler.lease("gpu", 1, false, "classifier").await.unwrap();
    assert_eq!(scheduler.in_use("gpu"), Some(1));
    scheduler.release(lease).await.unwrap();
}

#[tokio::test]
async fn test_model_is_warmed_when_busy_and_unloaded_when_idle() {
    let journal = Journal::default();
    let scheduler = single(2, Some("qwen2.5vl:32b")).with_residency(Arc::new(
        RecordingResidency {
            journal: journal.clone(),
        },
    ));

    let a = scheduler.lease("gpu", 1, false, "a").await.unwrap();
    let b = scheduler.lease("gpu", 1, false, "b").await.unwrap();
    for _ in 0..100 {
        if !journal.entries().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(journal.entries(), vec!["warm qwen2.5vl:32b"]);

    scheduler.release(a).await.unwrap();
    assert_eq!(journal.filtered(&["unload"]).len(), 0);
    scheduler.release(b).await.unwrap();
    assert_eq!(journal.filtered(&["unload"]), vec!["unload qwen2.5vl:32b"]);
}

/// Residency whose warm-up takes a while, journaling when it starts and ends.
struct SlowWarm {
    journal: Journal,
}

#[async_trait::async_trait]
impl ModelResidency for SlowWarm {
    async fn warm(&self, model: &str) -> DomainResult<()> {
        self.journal.push(format!("warm-start {model}"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.journal.push(format!("warm-end {model}"));
        Ok(())
    }

    async fn unload(&self, model: &str) -> DomainResult<()> {
        self.journal.push(format!("unload {model}"));
        Ok(())
    }
}

#[tokio::test]
async fn test_unload_waits_for_an_inflight_warm_up() {
    let journal = Journal::default();
    let scheduler = single(1, Some("coder")).with_residency(Arc::new(SlowWarm {
        journal: journal.clone(),
    }));

    let lease = scheduler.lease("gpu", 1, false, "a").await.unwrap();
    while journal.entries().is_empty() {
        tokio::task::yield_now().await;
    }
    scheduler.release(lease).await.unwrap();

    assert_eq!(
        journal.entries(),
        vec!["warm-start coder", "warm-end coder", "unload coder"]
    );
}

#[tokio::test]
async fn test_warm_up_after_release_leaves_model_unloaded() {
    let journal = Journal::default();
    let scheduler = single(1, Some("coder")).with_residency(Arc::new(SlowWarm {
        journal: journal.clone(),
    }));

    // Released before the detached warm-up gets to run.
    let lease = scheduler.lease("gpu", 1, false, "a").await.unwrap();
    scheduler.release(lease).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(journal.entries().is_empty(), "{:?}", journal.entries());
}

#[tokio::test]
async fn test_second_exclusive_waits_for_the_first() {
    let scheduler = Arc::new(single(1, None));
    let first = scheduler.lease("gpu", 1, true, "judge-a").await.unwrap();

    let waiting = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.lease("gpu", 1, true, "judge-b").await })
    };
    while scheduler.utilization()[0].waiting == 0 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiting.is_finished());
    let usage = &scheduler.utilization()[0];
    assert!(usage.exclusive_held);
    assert_eq!((usage.in_use, usage.waiting), (1, 1));

    scheduler.release(first).await.unwrap();
    let second = waiting.await.unwrap().unwrap();
    assert!(second.exclusive);
    assert_eq!(second.holder, "judge-b");
    assert_eq!(scheduler.utilization()[0].waiting, 0);
    scheduler.release(second).await.unwrap();
    assert_eq!(scheduler.in_use("gpu"), Some(0));
}

#[tokio::test]
async fn test_unknown_class_is_rejected() {
    let scheduler = single(1, None);
    let err = scheduler.lease("tpu", 1, false, "x").await.unwrap_err();
    assert!(matches!(err, DomainError::UnknownResourceClass(ref c) if c == "tpu"));
}

/// Run `requests` concurrently, tracking the peak units held through the
/// scheduler's own accounting and an independent counter.
async fn contend(capacity: u32, requests: Vec<(u32, bool)>) -> (u32, u32, bool) {
    let scheduler = Arc::new(single(capacity, None));
    let held = Arc::new(AtomicU32::new(0));
    let exclusive_overlap = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));

    let mut tasks = Vec::new();
    for (i, (units, exclusive)) in requests.into_iter().enumerate() {
        let scheduler = scheduler.clone();
        let held = held.clone();
        let peak = peak.clone();
        let exclusive_overlap = exclusive_overlap.clone();
        tasks.push(tokio::spawn(async move {
            let lease = scheduler
                .lease("gpu", units, exclusive, &format!("req-{i}"))
                .await
                .unwrap();
            let now = held.fetch_add(lease.units, Ordering::SeqCst) + lease.units;
            peak.fetch_max(now, Ordering::SeqCst);
            if exclusive && now != lease.units {
                exclusive_overlap.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
            held.fetch_sub(lease.units, Ordering::SeqCst);
            scheduler.release(lease).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let final_in_use = scheduler.in_use("gpu").unwrap_or(u32::MAX);
    (
        peak.load(Ordering::SeqCst),
        final_in_use,
        exclusive_overlap.load(Ordering::SeqCst) == 0,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: held units never exceed capacity, exclusive leases never
    /// share the class, and every unit comes back.
    #[test]
    fn prop_capacity_is_never_exceeded(
        capacity in 1u32..5,
        raw in prop::collection::vec((1u32..5, any::<bool>()), 1..16)
    ) {
        let requests: Vec<(u32, bool)> = raw
            .into_iter()
            .map(|(units, exclusive)| (units.min(capacity), exclusive))
            .collect();

        let rt = tokio::runtime::Runtime::new().unwrap();
        let (peak, final_in_use, exclusive_alone) = rt.block_on(contend(capacity, requests));

        prop_assert!(peak <= capacity, "peak {} over capacity {}", peak, capacity);
        prop_assert_eq!(final_in_use, 0);
        prop_assert!(exclusive_alone);
    }
}
