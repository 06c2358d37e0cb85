mod common;

use common::TestApp;
use marketplace_api::{
    db::{defer_effect, run_in_transaction, run_read, transaction_active, DbHandle},
    entities::tag,
    errors::ServiceError,
    events::Event,
};
use sea_orm::EntityTrait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn run_read_works_outside_any_transaction() {
    let app = TestApp::new().await;

    let tags = run_read(&app.db, |conn: DbHandle| async move {
        tag::Entity::find().all(&conn).await
    })
    .await
    .expect("read failed");

    assert!(tags.is_empty());
    assert!(!transaction_active());
}

#[tokio::test]
async fn nested_write_joins_outer_transaction() {
    let mut app = TestApp::new().await;
    let tag_service = app.tags();

    let result: Result<(), ServiceError> = run_in_transaction(&app.db, |_conn: DbHandle| {
        let tag_service = tag_service.clone();
        async move {
            assert!(transaction_active());

            // Joins the ambient transaction instead of opening its own
            let tag_id = tag_service.create("inner".to_string()).await?;
            assert!(tag_id > 0);
            assert!(transaction_active());

            Err(ServiceError::InvalidInput("outer failure".into()))
        }
    })
    .await;

    assert!(matches!(result, Err(ServiceError::InvalidInput(_))));

    // The inner write "succeeded", but a single rollback of the outer
    // transaction undid it
    let tags = tag_service.list().await.expect("list failed");
    assert!(tags.is_empty());

    // ...and the TagCreated effect queued by the inner call never ran
    assert!(app.drain_events().is_empty());
}

#[tokio::test]
async fn nested_writes_commit_with_outer_transaction() {
    let mut app = TestApp::new().await;
    let tag_service = app.tags();
    let material_service = app.materials();

    let result: Result<(i32, i32), ServiceError> = run_in_transaction(&app.db, |_conn: DbHandle| {
        let tag_service = tag_service.clone();
        let material_service = material_service.clone();
        async move {
            let tag_id = tag_service.create("wool".to_string()).await?;
            let material_id = material_service.create("cotton".to_string()).await?;
            Ok((tag_id, material_id))
        }
    })
    .await;

    let (tag_id, material_id) = result.expect("transaction failed");
    assert_eq!(tag_service.retrieve(tag_id).await.unwrap().value, "wool");
    assert_eq!(
        material_service.retrieve(material_id).await.unwrap().value,
        "cotton"
    );

    // Both deferred events flushed after the single outer commit
    assert_eq!(
        app.drain_events(),
        vec![Event::TagCreated(tag_id), Event::MaterialCreated(material_id)]
    );
}

#[tokio::test]
async fn deferred_effect_runs_once_after_commit() {
    let app = TestApp::new().await;
    let counter = Arc::new(AtomicUsize::new(0));

    let observed_inside = {
        let counter = counter.clone();
        run_in_transaction(&app.db, |_conn: DbHandle| async move {
            {
                let counter = counter.clone();
                defer_effect(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await;
            }
            // Still queued: the transaction has not committed yet
            Ok::<_, ServiceError>(counter.load(Ordering::SeqCst))
        })
        .await
        .expect("transaction failed")
    };

    assert_eq!(observed_inside, 0);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn deferred_effects_never_run_on_rollback() {
    let app = TestApp::new().await;
    let counter = Arc::new(AtomicUsize::new(0));

    let result: Result<(), ServiceError> = {
        let counter = counter.clone();
        run_in_transaction(&app.db, |_conn: DbHandle| async move {
            defer_effect(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
            Err(ServiceError::InvalidInput("abort".into()))
        })
        .await
    };

    assert!(result.is_err());
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deferred_effects_run_in_enqueue_order() {
    let app = TestApp::new().await;
    let order = Arc::new(Mutex::new(Vec::new()));

    {
        let order = order.clone();
        run_in_transaction(&app.db, |_conn: DbHandle| async move {
            for i in 0..3 {
                let order = order.clone();
                defer_effect(async move {
                    order.lock().unwrap().push(i);
                })
                .await;
            }
            Ok::<_, ServiceError>(())
        })
        .await
        .expect("transaction failed");
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn concurrent_operations_do_not_share_context() {
    let app = TestApp::new().await;

    let in_tx = run_in_transaction(&app.db, |_conn: DbHandle| async move {
        Ok::<_, ServiceError>(transaction_active())
    })
    .await
    .expect("transaction failed");

    assert!(in_tx);
    // Once the operation is over, nothing leaks into this task
    assert!(!transaction_active());
}
