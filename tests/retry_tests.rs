//! Retry over full transaction scopes: each attempt gets a fresh
//! transaction, and failed attempts leave nothing behind.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use atomique::{
    RetryPolicy, TransactionManager, TransactionOptions, on_error_kind, transaction_with_retry,
};
use common::RecordingSession;

#[derive(Debug, thiserror::Error)]
#[error("serialization conflict")]
struct ConflictError;

#[tokio::test(start_paused = true)]
async fn each_attempt_runs_in_a_fresh_transaction() {
    let session = Arc::new(RecordingSession::new());
    let manager = TransactionManager::new(session.clone());
    let attempts = Arc::new(AtomicUsize::new(0));

    let sess = session.clone();
    let counter = attempts.clone();
    transaction_with_retry(
        &manager,
        TransactionOptions::default(),
        RetryPolicy::default().with_retry_delay(Duration::from_millis(10)),
        on_error_kind::<ConflictError>(),
        move |tx| {
            let sess = sess.clone();
            let counter = counter.clone();
            async move {
                let tx = tx.expect("transaction");
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                sess.write(tx.id(), &format!("attempt_{attempt}"));
                if attempt == 0 {
                    Err(ConflictError.into())
                } else {
                    Ok(())
                }
            }
        },
    )
    .await
    .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    // Only the successful attempt's work is durable.
    assert_eq!(session.committed_rows(), vec!["attempt_1".to_string()]);
    assert_eq!(session.live_transactions(), 0);

    let journal = session.journal();
    let rollbacks = journal.iter().filter(|op| op.starts_with("rollback")).count();
    let commits = journal.iter().filter(|op| op.starts_with("commit")).count();
    assert_eq!(rollbacks, 1);
    assert_eq!(commits, 1);
}

#[tokio::test(start_paused = true)]
async fn budget_exhaustion_returns_the_final_error() {
    let session = Arc::new(RecordingSession::new());
    let manager = TransactionManager::new(session.clone());
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    let err = transaction_with_retry(
        &manager,
        TransactionOptions::default(),
        RetryPolicy::default()
            .with_max_retries(2)
            .with_retry_delay(Duration::from_millis(10)),
        on_error_kind::<ConflictError>(),
        move |_tx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ConflictError.into())
            }
        },
    )
    .await
    .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(err.downcast_ref::<ConflictError>().is_some());
    assert!(session.committed_rows().is_empty());
    assert_eq!(session.live_transactions(), 0);
}

#[tokio::test(start_paused = true)]
async fn unmatched_errors_fail_fast() {
    let session = Arc::new(RecordingSession::new());
    let manager = TransactionManager::new(session.clone());
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    let err = transaction_with_retry(
        &manager,
        TransactionOptions::default(),
        RetryPolicy::default(),
        on_error_kind::<ConflictError>(),
        move |_tx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("not a conflict"))
            }
        },
    )
    .await
    .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(err.to_string(), "not a conflict");
}

#[tokio::test]
async fn transactional_wrapper_retries_compose() {
    // transactional() and retry cover different layers; the wrapper alone
    // still opens one scope per call.
    let session = Arc::new(RecordingSession::new());
    let manager = Arc::new(TransactionManager::new(session.clone()));

    let sess = session.clone();
    let wrapped = manager.transactional(
        atomique::TransactionPropagation::Required,
        move || {
            let sess = sess.clone();
            async move {
                let tx = atomique::current_transaction().expect("inside scope");
                sess.write(tx.id(), "wrapped_row");
                Ok(())
            }
        },
    );

    wrapped().await.unwrap();
    wrapped().await.unwrap();
    assert_eq!(
        session.committed_rows(),
        vec!["wrapped_row".to_string(), "wrapped_row".to_string()]
    );
}
