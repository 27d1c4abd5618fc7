//! Orderly shutdown: runs once, closes every station, releases the engine.
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ax25bbs::agwpe::Interrupt;
use ax25bbs::shutdown::{ShutdownCoordinator, ShutdownReason};
use common::server_with;

#[derive(Default)]
struct CountingInterrupt {
    hits: AtomicUsize,
}

impl Interrupt for CountingInterrupt {
    fn interrupt(&self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn shutdown_runs_once() {
    let (bbs, out) = server_with(15);
    let a = bbs.on_connect("K6TU");
    let b = bbs.on_connect("W1ABC");
    let engine = Arc::new(CountingInterrupt::default());

    let coordinator = ShutdownCoordinator::new(bbs.clone())
        .with_engine(engine.clone())
        .with_watchdog(Duration::from_secs(5));

    assert!(!coordinator.is_started());
    assert!(coordinator.shutdown(ShutdownReason::Signal).await);
    assert!(!coordinator.shutdown(ShutdownReason::DaemonDied).await);
    assert!(coordinator.is_started());

    assert_eq!(engine.hits.load(Ordering::SeqCst), 1);
    assert_eq!(out.close_count(), 1);
    assert!(!a.is_active());
    assert!(!b.is_active());
    let mut dropped = out.disconnects();
    dropped.sort();
    assert_eq!(dropped, vec!["K6TU".to_string(), "W1ABC".to_string()]);
    assert_eq!(bbs.session_count(), 0);
}

#[tokio::test]
async fn connections_after_shutdown_are_not_registered() {
    let (bbs, out) = server_with(15);
    let coordinator = ShutdownCoordinator::new(bbs.clone());
    coordinator.shutdown(ShutdownReason::RuntimeError).await;

    let late = bbs.on_connect("K6TU");
    assert!(!late.is_active());
    assert_eq!(bbs.session_count(), 0);
    assert_eq!(out.text_for("K6TU"), "");
}

#[tokio::test]
async fn concurrent_triggers_run_sequence_once() {
    let (bbs, out) = server_with(15);
    bbs.on_connect("K6TU");
    let coordinator = Arc::new(ShutdownCoordinator::new(bbs.clone()));

    let first = {
        let c = coordinator.clone();
        tokio::spawn(async move { c.shutdown(ShutdownReason::Signal).await })
    };
    let second = {
        let c = coordinator.clone();
        tokio::spawn(async move { c.shutdown(ShutdownReason::DaemonDied).await })
    };
    let ran: Vec<bool> = vec![first.await.unwrap(), second.await.unwrap()];

    assert_eq!(ran.iter().filter(|r| **r).count(), 1);
    assert_eq!(out.close_count(), 1);
    assert_eq!(out.disconnects(), vec!["K6TU".to_string()]);
}
