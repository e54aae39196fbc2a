//! Declarative transaction coordination over a pluggable persistence session.
//!
//! `atomique` separates *deciding* how work attaches to a transaction from
//! *performing* the underlying database operations. The crate owns the
//! decisions: propagation modes, a per-task current-transaction slot, nested
//! savepoint scopes, priority-ordered lifecycle hooks, commit suppression,
//! and retry. The actual `BEGIN`/`COMMIT`/`SAVEPOINT` verbs are delegated to
//! a [`Session`] implementation supplied by the caller.
//!
//! The entry point is [`TransactionManager::transaction`], a closure-scoped
//! API: the body runs inside a managed scope, a clean return commits (when
//! auto-commit is on), and an error rolls back and re-raises unchanged.
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use atomique::{
//!     SavepointHandle, Session, TransactionHandle, TransactionManager, TransactionOptions,
//!     TransactionPropagation,
//! };
//!
//! # struct MemorySession { next_tx: AtomicU64 }
//! # #[async_trait::async_trait]
//! # impl Session for MemorySession {
//! #     async fn begin(&self) -> anyhow::Result<TransactionHandle> {
//! #         Ok(TransactionHandle(self.next_tx.fetch_add(1, Ordering::SeqCst)))
//! #     }
//! #     async fn commit(&self, _tx: TransactionHandle) -> anyhow::Result<()> { Ok(()) }
//! #     async fn rollback(&self, _tx: TransactionHandle) -> anyhow::Result<()> { Ok(()) }
//! #     async fn flush(&self, _tx: TransactionHandle) -> anyhow::Result<()> { Ok(()) }
//! #     async fn begin_nested(
//! #         &self,
//! #         _tx: TransactionHandle,
//! #         _name: &str,
//! #     ) -> anyhow::Result<SavepointHandle> { Ok(SavepointHandle(1)) }
//! #     async fn release(
//! #         &self,
//! #         _tx: TransactionHandle,
//! #         _savepoint: SavepointHandle,
//! #     ) -> anyhow::Result<()> { Ok(()) }
//! #     async fn rollback_to(
//! #         &self,
//! #         _tx: TransactionHandle,
//! #         _savepoint: SavepointHandle,
//! #     ) -> anyhow::Result<()> { Ok(()) }
//! # }
//! # tokio_test::block_on(async {
//! let session = Arc::new(MemorySession { next_tx: AtomicU64::new(1) });
//! let manager = TransactionManager::new(session);
//!
//! let value = manager
//!     .transaction(TransactionOptions::default(), |tx| async move {
//!         let tx = tx.expect("REQUIRED always yields a transaction");
//!         tx.set_data("actor", "docs");
//!
//!         // Inner REQUIRED scopes join the same transaction.
//!         let options =
//!             TransactionOptions::default().with_propagation(TransactionPropagation::Required);
//!         assert_eq!(tx.nesting_level(), 1);
//!
//!         Ok(options.propagation)
//!     })
//!     .await?;
//!
//! assert_eq!(value, TransactionPropagation::Required);
//! # Ok::<_, anyhow::Error>(())
//! # }).unwrap();
//! ```

pub mod error;
pub mod hooks;
pub mod manager;
pub mod propagation;
pub mod retry;
pub mod savepoint;
pub mod session;
pub mod transaction;

pub use error::{Result, TransactionError};
pub use hooks::{FnHook, HookContext, HookRegistry, HookType, TransactionHook};
pub use manager::{TransactionManager, TransactionOptions, current_transaction, in_transaction};
pub use propagation::{PropagationDecision, TransactionPropagation, resolve};
pub use retry::{RetryPolicy, on_error_kind, transaction_with_retry};
pub use savepoint::{SavepointContext, SavepointState};
pub use session::{IsolationLevel, SavepointHandle, Session, TransactionHandle};
pub use transaction::{AllowCommitGuard, Transaction, TransactionState};
