//! Ambient transaction propagation.
//!
//! A top-level write operation opens one transaction; every nested writer
//! reached from it joins that transaction through a task-local context
//! instead of threading a handle through each call. The context is scoped
//! to the logical call chain of the operation (it survives suspension
//! points of the same task and is invisible to concurrent operations).
//! Futures handed to `tokio::spawn` do not inherit the context.
//!
//! Side effects that must only happen on a successful commit are queued
//! with [`defer_effect`] and flushed, in enqueue order, after the
//! top-level commit. On rollback the queue is discarded.

use futures::future::BoxFuture;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, ExecResult,
    QueryResult, Statement, TransactionTrait,
};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

type Effect = BoxFuture<'static, ()>;

#[derive(Clone)]
struct TxContext {
    txn: Arc<DatabaseTransaction>,
    effects: Arc<Mutex<Vec<Effect>>>,
}

tokio::task_local! {
    static TX_CONTEXT: TxContext;
}

fn current_context() -> Option<TxContext> {
    TX_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// Returns whether the current call chain is inside an open transaction.
pub fn transaction_active() -> bool {
    TX_CONTEXT.try_with(|_| ()).is_ok()
}

/// Connection handle passed to transaction-boundary bodies.
///
/// Writers and readers stay polymorphic over "joined a transaction or not"
/// by taking this handle (or any `ConnectionTrait`) instead of a concrete
/// connection type.
#[derive(Clone)]
pub enum DbHandle {
    /// Plain pooled connection, used for reads outside any transaction.
    Pool(Arc<DatabaseConnection>),
    /// Shared handle to the transaction in effect for this operation.
    Txn(Arc<DatabaseTransaction>),
}

#[async_trait::async_trait]
impl ConnectionTrait for DbHandle {
    fn get_database_backend(&self) -> DbBackend {
        match self {
            Self::Pool(conn) => conn.get_database_backend(),
            Self::Txn(txn) => txn.get_database_backend(),
        }
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        match self {
            Self::Pool(conn) => conn.execute(stmt).await,
            Self::Txn(txn) => txn.execute(stmt).await,
        }
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        match self {
            Self::Pool(conn) => conn.execute_unprepared(sql).await,
            Self::Txn(txn) => txn.execute_unprepared(sql).await,
        }
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        match self {
            Self::Pool(conn) => conn.query_one(stmt).await,
            Self::Txn(txn) => txn.query_one(stmt).await,
        }
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        match self {
            Self::Pool(conn) => conn.query_all(stmt).await,
            Self::Txn(txn) => txn.query_all(stmt).await,
        }
    }

    fn support_returning(&self) -> bool {
        match self {
            Self::Pool(conn) => conn.support_returning(),
            Self::Txn(txn) => txn.support_returning(),
        }
    }
}

/// Runs `body` inside a transaction, joining the one already in effect for
/// this call chain when there is one.
///
/// When this call is the outermost one it owns the commit/rollback
/// boundary: on success the transaction commits and every effect queued
/// during the operation runs exactly once, in enqueue order, outside the
/// transaction; on failure the transaction rolls back, no effect runs, and
/// the error is returned unchanged. When joining, commit/rollback and
/// effect flushing stay with the outermost caller.
pub async fn run_in_transaction<F, Fut, T, E>(db: &Arc<DatabaseConnection>, body: F) -> Result<T, E>
where
    F: FnOnce(DbHandle) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<DbErr>,
{
    if let Some(ctx) = current_context() {
        return body(DbHandle::Txn(ctx.txn)).await;
    }

    let txn = Arc::new(db.begin().await.map_err(E::from)?);
    let ctx = TxContext {
        txn: txn.clone(),
        effects: Arc::new(Mutex::new(Vec::new())),
    };
    let effects = ctx.effects.clone();

    debug!("Opened top-level transaction");
    let result = TX_CONTEXT
        .scope(ctx, body(DbHandle::Txn(txn.clone())))
        .await;

    match result {
        Ok(value) => {
            let txn = Arc::into_inner(txn).ok_or_else(|| {
                E::from(DbErr::Custom(
                    "transaction handle escaped its operation scope".into(),
                ))
            })?;
            txn.commit().await.map_err(E::from)?;
            debug!("Transaction committed");

            let queued = {
                let mut guard = effects.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *guard)
            };
            for effect in queued {
                effect.await;
            }
            Ok(value)
        }
        Err(err) => {
            match Arc::into_inner(txn) {
                Some(txn) => {
                    if let Err(rollback_err) = txn.rollback().await {
                        warn!(error = %rollback_err, "Transaction rollback failed");
                    } else {
                        debug!("Transaction rolled back");
                    }
                }
                // Dropping a leaked handle still rolls the transaction back.
                None => warn!("transaction handle escaped its operation scope during rollback"),
            }
            Err(err)
        }
    }
}

/// Runs `body` against the transaction in effect for this call chain, or
/// against the plain pooled connection when there is none. Never opens a
/// transaction of its own.
pub async fn run_read<F, Fut, R>(db: &Arc<DatabaseConnection>, body: F) -> R
where
    F: FnOnce(DbHandle) -> Fut,
    Fut: Future<Output = R>,
{
    match current_context() {
        Some(ctx) => body(DbHandle::Txn(ctx.txn)).await,
        None => body(DbHandle::Pool(db.clone())).await,
    }
}

/// Queues `effect` to run after the current transaction commits.
///
/// Outside any transaction the effect runs immediately. Effects must not
/// assume the transaction is still open; they run against fresh
/// connections.
pub async fn defer_effect<F>(effect: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut pending: Option<Effect> = Some(Box::pin(effect));
    let queued = TX_CONTEXT
        .try_with(|ctx| {
            if let Some(effect) = pending.take() {
                ctx.effects
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(effect);
            }
        })
        .is_ok();

    if !queued {
        if let Some(effect) = pending {
            effect.await;
        }
    }
}
