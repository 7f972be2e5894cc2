//! Per-device worker pool behavior.
#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use common::{Call, FakeConnector, device};
use nasshape_core::{DeviceOp, DispatchConfig, Dispatcher, Rate};

fn sync(class: &str) -> DeviceOp {
    DeviceOp::SyncClass {
        class_name: class.into(),
        subnets: vec!["10.0.0.0/8".parse().unwrap()],
    }
}

fn config(capacity: usize) -> DispatchConfig {
    DispatchConfig {
        queue_capacity: capacity,
        max_attempts: 2,
        retry_backoff: Duration::from_millis(1),
        retry_backoff_max: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_jobs_for_one_device_run_in_order() {
    let fakes = FakeConnector::new();
    let dispatcher = Dispatcher::new(config(8), Arc::new(fakes.clone()));
    let nas = device(1);

    assert!(dispatcher.enqueue(&nas, sync("A")));
    assert!(dispatcher.enqueue(
        &nas,
        DeviceOp::RemoveClass {
            class_name: "B".into()
        }
    ));
    assert!(dispatcher.enqueue(&nas, sync("C")));
    dispatcher.wait_idle().await;

    let classes: Vec<String> = fakes
        .journal
        .for_device(1)
        .into_iter()
        .filter_map(|c| match c {
            Call::SyncList { class, .. } | Call::RemoveClass { class } => Some(class),
            _ => None,
        })
        .collect();
    assert_eq!(classes, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_full_queue_drops_instead_of_blocking() {
    let fakes = FakeConnector::new();
    let dispatcher = Dispatcher::new(config(1), Arc::new(fakes.clone()));
    let nas = device(1);

    // The worker cannot run until this task yields, so the queue holds
    // exactly one job.
    assert!(dispatcher.enqueue(&nas, sync("A")));
    assert!(!dispatcher.enqueue(&nas, sync("B")));
    assert!(!dispatcher.enqueue(&nas, sync("C")));
    dispatcher.wait_idle().await;

    let stats = dispatcher.stats();
    assert_eq!((stats.completed, stats.dropped, stats.pending), (1, 2, 0));
    assert_eq!(stats.workers, 1);
}

#[tokio::test]
async fn test_devices_get_independent_workers() {
    let fakes = FakeConnector::new();
    let dispatcher = Dispatcher::new(config(1), Arc::new(fakes.clone()));

    for id in 1..=3 {
        assert!(dispatcher.enqueue(&device(id), sync("A")));
    }
    dispatcher.wait_idle().await;

    assert_eq!(dispatcher.stats().workers, 3);
    assert_eq!(
        fakes.journal.devices_with(|c| matches!(c, Call::SyncMark { .. })),
        vec![1, 2, 3]
    );
}

#[tokio::test]
async fn test_shutdown_rejects_new_jobs() {
    let fakes = FakeConnector::new();
    let dispatcher = Dispatcher::new(config(4), Arc::new(fakes.clone()));
    dispatcher.shutdown();

    assert!(!dispatcher.enqueue(&device(1), sync("A")));
    dispatcher.wait_idle().await;
    assert_eq!(dispatcher.stats().dropped, 1);
    assert!(fakes.journal.all().is_empty());
}

#[tokio::test]
async fn test_rate_push_prefers_coa() {
    let fakes = FakeConnector::new().with_coa(1);
    let dispatcher = Dispatcher::new(config(4), Arc::new(fakes.clone()));

    dispatcher.enqueue(
        &device(1),
        DeviceOp::PushRate {
            username: "alice".into(),
            session_id: Some("81a00002".into()),
            address: None,
            rate: Rate::new(20_480, 5_120),
        },
    );
    dispatcher.wait_idle().await;

    assert_eq!(
        fakes.journal.for_device(1),
        vec![Call::CoaRate {
            username: "alice".into(),
            session_id: Some("81a00002".into()),
            rate: "5120k/20480k".into(),
        }]
    );
}
