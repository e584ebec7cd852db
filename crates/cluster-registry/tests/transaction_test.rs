// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transaction coordinator tests.
//!
//! Run against an in-memory SQLite store; every test gets its own database.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use cluster_registry::Error;
use cluster_registry::context::TransactionState;
use cluster_registry::store::{IsolationLevel, SqliteStore, Store};

const LONG: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_execute_commits_on_success() {
    let store = common::sqlite_store().await;
    let coordinator = common::coordinator(store.clone(), LONG);
    let cluster = common::cluster("c1", "https://api.c1.example.com/");
    let id = cluster.id;

    let mut ctx = coordinator.context();
    let created = ctx
        .execute(move |ctx| async move {
            assert!(ctx.in_transaction());
            ctx.repository().create_cluster(&cluster).await
        })
        .await
        .unwrap();

    assert_eq!(created.id, id);
    assert!(!ctx.in_transaction());
    assert!(matches!(ctx.state(), TransactionState::Idle));
    assert!(store.repository().load_cluster(id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_execute_rolls_back_on_error() {
    let store = common::sqlite_store().await;
    let coordinator = common::coordinator(store.clone(), LONG);
    let cluster = common::cluster("c1", "https://api.c1.example.com/");
    let id = cluster.id;

    let mut ctx = coordinator.context();
    let err = ctx
        .execute(move |ctx| async move {
            ctx.repository().create_cluster(&cluster).await?;
            Err::<(), _>(Error::Other("validation failed after write".to_string()))
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "validation failed after write");
    assert!(!ctx.in_transaction());
    assert!(store.repository().load_cluster(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_nested_execute_joins_outer_transaction() {
    let store = common::sqlite_store().await;
    let coordinator = common::coordinator(store.clone(), LONG);
    let outer_cluster = common::cluster("c1", "https://api.c1.example.com/");
    let inner_cluster = common::cluster("c2", "https://api.c2.example.com/");
    let (outer_id, inner_id) = (outer_cluster.id, inner_cluster.id);

    coordinator
        .execute(move |mut ctx| async move {
            ctx.repository().create_cluster(&outer_cluster).await?;

            ctx.execute(move |ctx| async move {
                // The outer write is visible: same transaction.
                assert!(ctx.repository().load_cluster(outer_id).await?.is_some());
                ctx.repository().create_cluster(&inner_cluster).await
            })
            .await?;

            // Still inside the outer transaction after the nested call returns.
            assert!(ctx.in_transaction());
            Ok(())
        })
        .await
        .unwrap();

    let repository = store.repository();
    assert!(repository.load_cluster(outer_id).await.unwrap().is_some());
    assert!(repository.load_cluster(inner_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_nested_failure_rolls_back_whole_call_tree() {
    let store = common::sqlite_store().await;
    let coordinator = common::coordinator(store.clone(), LONG);
    let outer_cluster = common::cluster("c1", "https://api.c1.example.com/");
    let inner_cluster = common::cluster("c2", "https://api.c2.example.com/");
    let (outer_id, inner_id) = (outer_cluster.id, inner_cluster.id);

    let err = coordinator
        .execute(move |mut ctx| async move {
            ctx.repository().create_cluster(&outer_cluster).await?;
            ctx.execute(move |ctx| async move {
                ctx.repository().create_cluster(&inner_cluster).await?;
                Err::<(), _>(Error::not_found("cluster", "https://api.c3.example.com/"))
            })
            .await
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound { .. }));
    let repository = store.repository();
    assert!(repository.load_cluster(outer_id).await.unwrap().is_none());
    assert!(repository.load_cluster(inner_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_panic_becomes_error_and_rolls_back() {
    let store = common::sqlite_store().await;
    let coordinator = common::coordinator(store.clone(), LONG);
    let cluster = common::cluster("c1", "https://api.c1.example.com/");
    let id = cluster.id;

    let mut ctx = coordinator.context();
    let err = ctx
        .execute(move |ctx| async move {
            ctx.repository().create_cluster(&cluster).await?;
            if cluster.name == "c1" {
                panic!("unit of work exploded");
            }
            Ok(())
        })
        .await
        .unwrap_err();

    match err {
        Error::Panic { message } => assert_eq!(message, "unit of work exploded"),
        other => panic!("expected a panic error, got {other:?}"),
    }
    assert!(!ctx.in_transaction());
    assert!(store.repository().load_cluster(id).await.unwrap().is_none());

    // The same context keeps working.
    let count = ctx
        .execute(|ctx| async move {
            Ok(ctx.repository().list_clusters(None).await?.len())
        })
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_timeout_rolls_back_and_closes_transaction() {
    let store = common::sqlite_store().await;
    let coordinator = common::coordinator(store.clone(), Duration::from_millis(100));
    let first = common::cluster("c1", "https://api.c1.example.com/");
    let late = common::cluster("c2", "https://api.c2.example.com/");
    let (first_id, late_id) = (first.id, late.id);
    let (late_tx, late_rx) = oneshot::channel();

    let err = coordinator
        .execute(move |ctx| async move {
            ctx.repository().create_cluster(&first).await?;
            tokio::time::sleep(Duration::from_millis(400)).await;
            // Abandoned by now; this write must not reach the store.
            let result = ctx.repository().create_cluster(&late).await;
            let _ = late_tx.send(result);
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::TransactionTimeout { timeout } if timeout == Duration::from_millis(100)
    ));

    let late_result = late_rx.await.unwrap();
    assert!(matches!(late_result, Err(Error::TransactionClosed)));

    let repository = store.repository();
    assert!(repository.load_cluster(first_id).await.unwrap().is_none());
    assert!(repository.load_cluster(late_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_timeout_does_not_wait_for_blocked_statement() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("registry.db").display());
    let store: Arc<dyn Store> = Arc::new(SqliteStore::connect(&url, 4).await.unwrap());

    // Another writer holds the database write lock.
    let blocker = store.begin(IsolationLevel::Default).await.unwrap();
    blocker
        .repository()
        .create_cluster(&common::cluster("c0", "https://api.c0.example.com/"))
        .await
        .unwrap();

    let coordinator = common::coordinator(store.clone(), Duration::from_millis(200));
    let cluster = common::cluster("c1", "https://api.c1.example.com/");
    let id = cluster.id;

    let started = Instant::now();
    let err = coordinator
        .execute(move |ctx| async move {
            ctx.repository().create_cluster(&cluster).await
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TransactionTimeout { .. }));
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");

    blocker.rollback().await.unwrap();

    // The abandoned transaction is rolled back once its statement finishes,
    // releasing the write lock for the next caller.
    let retry = common::cluster("c1", "https://api.c1.example.com/");
    common::coordinator(store.clone(), LONG)
        .execute(move |ctx| async move {
            ctx.repository().create_cluster(&retry).await
        })
        .await
        .unwrap();

    let repository = store.repository();
    assert!(repository.load_cluster(id).await.unwrap().is_none());
    assert!(
        repository
            .load_cluster_by_url("https://api.c0.example.com/")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_timed_out_work_observes_cancellation() {
    let store = common::sqlite_store().await;
    let coordinator = common::coordinator(store, Duration::from_millis(50));
    let (observed_tx, observed_rx) = oneshot::channel();

    let err = coordinator
        .execute(move |ctx| async move {
            tokio::select! {
                _ = ctx.cancelled() => {
                    let _ = observed_tx.send(true);
                }
                _ = tokio::time::sleep(LONG) => {
                    let _ = observed_tx.send(false);
                }
            }
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TransactionTimeout { .. }));
    assert!(observed_rx.await.unwrap());
}

#[tokio::test]
async fn test_independent_contexts_commit_separately() {
    let store = common::sqlite_store().await;
    let coordinator = common::coordinator(store.clone(), LONG);

    let calls = (0..5).map(|i| {
        let coordinator = coordinator.clone();
        let url = format!("https://api.c{i}.example.com/");
        let cluster = common::cluster(&format!("c{i}"), &url);
        async move {
            coordinator
                .execute(move |ctx| async move {
                    ctx.repository().create_cluster(&cluster).await
                })
                .await
        }
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    let clusters = store.repository().list_clusters(None).await.unwrap();
    assert_eq!(clusters.len(), 5);
}
