//! The transaction manager: propagation-aware scope opening, the task-local
//! current-transaction slot, and the function-wrapping convenience.

use std::pin::Pin;
use std::sync::Arc;

use crate::error::TransactionError;
use crate::hooks::{HookRegistry, TransactionHook};
use crate::propagation::{PropagationDecision, TransactionPropagation, resolve};
use crate::session::{IsolationLevel, Session};
use crate::transaction::Transaction;

tokio::task_local! {
	static CURRENT_TRANSACTION: Arc<Transaction>;
}

/// The transaction, if any, bound to the presently executing task.
///
/// Each logical execution context sees only its own slot; concurrent call
/// chains never observe each other's transaction.
pub fn current_transaction() -> Option<Arc<Transaction>> {
	CURRENT_TRANSACTION.try_with(|tx| tx.clone()).ok()
}

/// Whether the presently executing task runs inside a managed transaction.
pub fn in_transaction() -> bool {
	CURRENT_TRANSACTION.try_with(|_| ()).is_ok()
}

/// How a scope should be opened.
///
/// `auto_commit` and `suppress_commit` belong to the outermost opener; a
/// joining open leaves them untouched. `isolation` applies only when a new
/// session-level transaction is begun.
#[derive(Debug, Clone, Copy)]
pub struct TransactionOptions {
	pub propagation: TransactionPropagation,
	pub auto_commit: bool,
	pub suppress_commit: bool,
	pub isolation: Option<IsolationLevel>,
}

impl Default for TransactionOptions {
	fn default() -> Self {
		Self {
			propagation: TransactionPropagation::Required,
			auto_commit: true,
			suppress_commit: true,
			isolation: None,
		}
	}
}

impl TransactionOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_propagation(mut self, propagation: TransactionPropagation) -> Self {
		self.propagation = propagation;
		self
	}

	pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
		self.auto_commit = auto_commit;
		self
	}

	pub fn with_suppress_commit(mut self, suppress_commit: bool) -> Self {
		self.suppress_commit = suppress_commit;
		self
	}

	pub fn with_isolation(mut self, level: IsolationLevel) -> Self {
		self.isolation = Some(level);
		self
	}
}

/// Entry point for opening managed transaction scopes.
///
/// Owns the process-wide global hook registry and is the only component that
/// talks to the [`Session`] collaborator directly. Cheap to share behind an
/// `Arc`.
pub struct TransactionManager {
	session: Arc<dyn Session>,
	global_hooks: Arc<HookRegistry>,
}

impl TransactionManager {
	pub fn new(session: Arc<dyn Session>) -> Self {
		Self {
			session,
			global_hooks: Arc::new(HookRegistry::new()),
		}
	}

	/// The process-wide hook registry, exposing the same
	/// `before_commit`/`after_commit`/`after_rollback`/`on_error`
	/// registration entry points as a transaction's local registry.
	pub fn global_hooks(&self) -> &HookRegistry {
		&self.global_hooks
	}

	/// Register a hook in the process-wide registry.
	pub fn register_global_hook(&self, hook: Arc<dyn TransactionHook>) {
		self.global_hooks.register(hook);
	}

	/// Remove every process-wide hook.
	pub fn clear_global_hooks(&self) {
		self.global_hooks.clear();
	}

	/// Read-only accessor over the task-local slot.
	pub fn get_current_transaction(&self) -> Option<Arc<Transaction>> {
		current_transaction()
	}

	pub fn is_in_transaction(&self) -> bool {
		in_transaction()
	}

	/// Delegates to the current transaction if any, else `false`.
	pub fn should_suppress_commit(&self) -> bool {
		current_transaction().is_some_and(|tx| tx.should_suppress_commit())
	}

	/// Open a transaction scope with [`TransactionOptions::default`].
	pub async fn atomic<F, Fut, T>(&self, f: F) -> anyhow::Result<T>
	where
		F: FnOnce(Option<Arc<Transaction>>) -> Fut,
		Fut: Future<Output = anyhow::Result<T>>,
	{
		self.transaction(TransactionOptions::default(), f).await
	}

	/// Open a transaction scope and run `f` inside it.
	///
	/// The propagation mode decides how the scope attaches to the task's
	/// current transaction:
	///
	/// - joining opens reuse the *same* transaction identity with its
	///   nesting level bumped; commit/rollback stay with the outermost scope;
	/// - creating opens begin a fresh session transaction, install it as
	///   current for the duration of `f`, and restore the prior slot value on
	///   exit (the suspended transaction, under `REQUIRES_NEW`);
	/// - `NESTED` delegates to a savepoint under the current transaction;
	/// - `NEVER` runs `f` with `None` when no transaction is current.
	///
	/// Scope contract for a created transaction: body `Ok` with
	/// `auto_commit` commits; body `Ok` without `auto_commit` leaves the
	/// transaction active for the caller to finalize; body `Err` rolls back
	/// and re-raises the original error unchanged, unless the rollback
	/// pathway itself fails, in which case that failure is raised instead.
	/// If the scope's future is dropped mid-body (cancellation), a guard
	/// still attempts the rollback.
	pub async fn transaction<F, Fut, T>(&self, options: TransactionOptions, f: F) -> anyhow::Result<T>
	where
		F: FnOnce(Option<Arc<Transaction>>) -> Fut,
		Fut: Future<Output = anyhow::Result<T>>,
	{
		let current = current_transaction();
		let decision = resolve(current.is_some(), options.propagation)?;

		match decision {
			PropagationDecision::JoinExisting => {
				let tx = match current {
					Some(tx) => tx,
					// resolve() only joins when a transaction is current
					None => return Err(TransactionError::NotActive.into()),
				};
				tx.enter_nested();
				let result = f(Some(tx.clone())).await;
				tx.leave_nested();
				result
			}
			PropagationDecision::CreateSavepoint => {
				let tx = match current {
					Some(tx) => tx,
					None => return Err(TransactionError::NotActive.into()),
				};
				let body_tx = tx.clone();
				tx.savepoint(None, move || f(Some(body_tx))).await
			}
			PropagationDecision::RunWithout => f(None).await,
			PropagationDecision::CreateNew => {
				let handle = match options.isolation {
					Some(level) => self.session.begin_with_isolation(level).await,
					None => self.session.begin().await,
				}
				.map_err(TransactionError::Session)?;
				let tx = Arc::new(Transaction::new(
					handle,
					self.session.clone(),
					self.global_hooks.clone(),
					options.suppress_commit,
				));
				tracing::debug!(transaction = %tx.id(), propagation = %options.propagation, "transaction begun");

				let scope_tx = tx.clone();
				CURRENT_TRANSACTION
					.scope(tx, async move {
						let mut guard = RollbackGuard::new(scope_tx.clone());
						let outcome = match f(Some(scope_tx.clone())).await {
							Ok(value) => {
								// Skipped when the body already finalized
								// explicitly (allow_commit, manual commit).
								if options.auto_commit && scope_tx.is_active() {
									match scope_tx.commit().await {
										Ok(()) => Ok(value),
										Err(err) => {
											// A hook veto has already rolled
											// back; a session commit failure
											// has not.
											if scope_tx.is_active()
												&& let Err(rollback_err) = scope_tx.rollback().await
											{
												tracing::warn!(
													transaction = %scope_tx.id(),
													error = %rollback_err,
													"rollback after failed commit also failed"
												);
											}
											Err(err.into())
										}
									}
								} else {
									Ok(value)
								}
							}
							Err(err) => {
								if scope_tx.is_active() {
									match scope_tx.rollback_on(&err).await {
										Ok(()) => Err(err),
										Err(rollback_err) => Err(rollback_err.into()),
									}
								} else {
									Err(err)
								}
							}
						};
						guard.disarm();
						outcome
					})
					.await
			}
		}
	}

	/// Wrap a callable so every invocation runs inside its own transaction
	/// scope with the given propagation.
	///
	/// The explicit higher-order replacement for annotation-style wrapping:
	/// the returned closure opens a scope, invokes the original, and closes
	/// the scope per the normal contract.
	pub fn transactional<F, Fut, T>(
		self: &Arc<Self>,
		propagation: TransactionPropagation,
		f: F,
	) -> impl Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>
	where
		F: Fn() -> Fut + Clone + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
		T: Send + 'static,
	{
		let manager = self.clone();
		move || {
			let manager = manager.clone();
			let f = f.clone();
			Box::pin(async move {
				let options = TransactionOptions::default().with_propagation(propagation);
				manager.transaction(options, |_tx| f()).await
			})
		}
	}
}

/// Fires a best-effort rollback when a created scope's future is dropped
/// before the normal exit path ran (cancellation, panic unwind).
struct RollbackGuard {
	transaction: Option<Arc<Transaction>>,
}

impl RollbackGuard {
	fn new(transaction: Arc<Transaction>) -> Self {
		Self {
			transaction: Some(transaction),
		}
	}

	fn disarm(&mut self) {
		self.transaction = None;
	}
}

impl Drop for RollbackGuard {
	fn drop(&mut self) {
		let Some(tx) = self.transaction.take() else {
			return;
		};
		if !tx.is_active() {
			return;
		}
		tracing::warn!(transaction = %tx.id(), "transaction scope dropped before completion; rolling back");
		let Ok(handle) = tokio::runtime::Handle::try_current() else {
			tracing::warn!("no async runtime available to roll back cancelled scope");
			return;
		};
		if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread {
			let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
				tokio::task::block_in_place(|| handle.block_on(async { tx.rollback().await }))
			}));
			match result {
				Ok(Ok(())) => {}
				Ok(Err(err)) => {
					tracing::warn!(error = %err, "rollback of cancelled scope failed");
				}
				Err(_) => {
					tracing::warn!("rollback of cancelled scope panicked");
				}
			}
		} else {
			// A current-thread runtime cannot block inside drop; the rollback
			// completes on a spawned task instead.
			handle.spawn(async move {
				if let Err(err) = tx.rollback().await {
					tracing::warn!(error = %err, "rollback of cancelled scope failed");
				}
			});
		}
	}
}
