//! The transaction state machine, hook pipelines, and commit suppression.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::error::{Result, TransactionError};
use crate::hooks::{HookContext, HookRegistry, HookType, TransactionHook, execution_order};
use crate::savepoint::{SavepointContext, SavepointState, validate_savepoint_name};
use crate::session::{SavepointHandle, Session, TransactionHandle};

/// Transaction lifecycle. Terminal once it leaves `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
	Active,
	Committed,
	RolledBack,
}

struct OpenSavepoint {
	handle: SavepointHandle,
	name: String,
	state: Arc<Mutex<SavepointState>>,
}

/// A managed logical transaction over one session-level `begin`.
///
/// Instances are created by the
/// [`TransactionManager`](crate::manager::TransactionManager) and shared via
/// `Arc`: a `REQUIRED` open that joins an existing transaction receives the
/// *same* instance with its nesting level bumped, never a copy. Scratch
/// `data` and the savepoint stack are exclusively owned by one instance and
/// never shared across distinct transactions.
pub struct Transaction {
	handle: TransactionHandle,
	session: Arc<dyn Session>,
	state: Mutex<TransactionState>,
	nesting_level: AtomicU32,
	suppress_commit: Mutex<bool>,
	data: Mutex<HashMap<String, JsonValue>>,
	hooks: HookRegistry,
	global_hooks: Arc<HookRegistry>,
	savepoints: Mutex<Vec<OpenSavepoint>>,
	savepoint_seq: AtomicU64,
}

impl Transaction {
	pub(crate) fn new(
		handle: TransactionHandle,
		session: Arc<dyn Session>,
		global_hooks: Arc<HookRegistry>,
		suppress_commit: bool,
	) -> Self {
		Self {
			handle,
			session,
			state: Mutex::new(TransactionState::Active),
			nesting_level: AtomicU32::new(1),
			suppress_commit: Mutex::new(suppress_commit),
			data: Mutex::new(HashMap::new()),
			hooks: HookRegistry::new(),
			global_hooks,
			savepoints: Mutex::new(Vec::new()),
			savepoint_seq: AtomicU64::new(1),
		}
	}

	/// Opaque identity of the owned session-level `begin`.
	pub fn id(&self) -> TransactionHandle {
		self.handle
	}

	pub fn state(&self) -> TransactionState {
		*self.state.lock()
	}

	pub fn is_active(&self) -> bool {
		self.state() == TransactionState::Active
	}

	/// Starts at 1; +1 for each `REQUIRED` open that joins this transaction,
	/// -1 when that joined scope exits.
	pub fn nesting_level(&self) -> u32 {
		self.nesting_level.load(Ordering::SeqCst)
	}

	pub(crate) fn enter_nested(&self) {
		self.nesting_level.fetch_add(1, Ordering::SeqCst);
	}

	pub(crate) fn leave_nested(&self) {
		self.nesting_level.fetch_sub(1, Ordering::SeqCst);
	}

	fn ensure_active(&self) -> Result<()> {
		match self.state() {
			TransactionState::Active => Ok(()),
			state => Err(TransactionError::AlreadyCompleted { state }),
		}
	}

	// ---- commit suppression -------------------------------------------------

	/// Whether ad-hoc commit requests are currently degraded to flushes.
	pub fn should_suppress_commit(&self) -> bool {
		*self.suppress_commit.lock()
	}

	/// Temporarily lift commit suppression.
	///
	/// The prior flag value is restored when the guard drops, on every exit
	/// path.
	///
	/// ```ignore
	/// {
	///     let _allow = tx.allow_commit();
	///     repository.save_and_commit(&record).await?; // commits for real
	/// } // suppression restored here
	/// ```
	pub fn allow_commit(&self) -> AllowCommitGuard<'_> {
		let prior = {
			let mut flag = self.suppress_commit.lock();
			std::mem::replace(&mut *flag, false)
		};
		AllowCommitGuard {
			transaction: self,
			prior,
		}
	}

	/// Ad-hoc "commit now" entry point for persistence code that is unaware
	/// it runs inside a managed transaction.
	///
	/// While suppression is on, the request degrades to a session flush:
	/// pending writes are materialized but nothing becomes durable until the
	/// owning scope decides. Under [`allow_commit`](Self::allow_commit) the
	/// request performs a real commit.
	pub async fn request_commit(&self) -> Result<()> {
		self.ensure_active()?;
		if self.should_suppress_commit() {
			tracing::debug!(transaction = %self.handle, "ad-hoc commit suppressed, flushing instead");
			return self
				.session
				.flush(self.handle)
				.await
				.map_err(TransactionError::Session);
		}
		self.commit().await
	}

	// ---- scratch data -------------------------------------------------------

	/// Store a scratch value under `key`, visible only to this transaction.
	pub fn set_data(&self, key: impl Into<String>, value: impl Into<JsonValue>) {
		self.data.lock().insert(key.into(), value.into());
	}

	/// Read a scratch value.
	pub fn data(&self, key: &str) -> Option<JsonValue> {
		self.data.lock().get(key).cloned()
	}

	/// Remove and return a scratch value.
	pub fn take_data(&self, key: &str) -> Option<JsonValue> {
		self.data.lock().remove(key)
	}

	pub fn has_data(&self, key: &str) -> bool {
		self.data.lock().contains_key(key)
	}

	// ---- hook registration --------------------------------------------------

	/// Register a hook against this transaction's local registry.
	pub fn register_hook(&self, hook: Arc<dyn TransactionHook>) {
		self.hooks.register(hook);
	}

	/// Register a local before-commit closure.
	pub fn before_commit<F>(&self, name: impl Into<String>, priority: i32, f: F)
	where
		F: Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
	{
		self.hooks.before_commit(name, priority, f);
	}

	/// Register a local after-commit closure.
	pub fn after_commit<F>(&self, name: impl Into<String>, priority: i32, f: F)
	where
		F: Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
	{
		self.hooks.after_commit(name, priority, f);
	}

	/// Register a local after-rollback closure.
	pub fn after_rollback<F>(&self, name: impl Into<String>, priority: i32, f: F)
	where
		F: Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
	{
		self.hooks.after_rollback(name, priority, f);
	}

	/// Register a local on-error closure.
	pub fn on_error<F>(&self, name: impl Into<String>, priority: i32, f: F)
	where
		F: Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
	{
		self.hooks.on_error(name, priority, f);
	}

	fn context<'a>(&self, error: Option<&'a anyhow::Error>) -> HookContext<'a> {
		HookContext {
			transaction_id: self.handle,
			state: self.state(),
			error,
		}
	}

	/// Run the before-commit pipeline, stopping at the first failure.
	async fn run_before_commit(&self) -> std::result::Result<(), (String, anyhow::Error)> {
		let ctx = self.context(None);
		for hook in execution_order(&self.hooks, &self.global_hooks, HookType::BeforeCommit) {
			if let Err(err) = hook.execute(&ctx).await {
				return Err((hook.name().to_string(), err));
			}
		}
		Ok(())
	}

	/// Run a non-fatal pipeline; each failure is recorded and swallowed so it
	/// cannot mask the transaction's already-final outcome.
	async fn run_isolated(&self, hook_type: HookType, error: Option<&anyhow::Error>) {
		let ctx = self.context(error);
		for hook in execution_order(&self.hooks, &self.global_hooks, hook_type) {
			if let Err(err) = hook.execute(&ctx).await {
				tracing::warn!(
					transaction = %self.handle,
					hook = hook.name(),
					lifecycle = hook_type.as_str(),
					error = %err,
					"lifecycle hook failed; continuing"
				);
			}
		}
	}

	// ---- lifecycle ----------------------------------------------------------

	/// Commit this transaction.
	///
	/// Valid only while `Active`. Before-commit hooks run first (local then
	/// global, priority-ordered); if any fails the transaction is rolled back
	/// instead and a [`TransactionError::HookExecution`] wrapping the cause is
	/// returned, so nothing from this transaction becomes durable. A failure in
	/// an after-commit hook is isolated, because the underlying commit has
	/// already durably succeeded.
	pub async fn commit(&self) -> Result<()> {
		self.ensure_active()?;
		if let Err((hook, cause)) = self.run_before_commit().await {
			tracing::debug!(
				transaction = %self.handle,
				hook = %hook,
				"before-commit hook failed, rolling back"
			);
			self.finish_rollback(Some(&cause)).await?;
			return Err(TransactionError::HookExecution { hook, source: cause });
		}

		self.session
			.commit(self.handle)
			.await
			.map_err(TransactionError::Session)?;
		*self.state.lock() = TransactionState::Committed;
		tracing::debug!(transaction = %self.handle, "committed");
		self.run_isolated(HookType::AfterCommit, None).await;
		Ok(())
	}

	/// Roll this transaction back.
	///
	/// Valid only while `Active`. After-rollback hooks fire once the session
	/// rollback has completed.
	pub async fn rollback(&self) -> Result<()> {
		self.ensure_active()?;
		self.finish_rollback(None).await
	}

	/// Rollback triggered by a body error; on-error hooks receive the error.
	pub(crate) async fn rollback_on(&self, error: &anyhow::Error) -> Result<()> {
		self.ensure_active()?;
		self.finish_rollback(Some(error)).await
	}

	async fn finish_rollback(&self, error: Option<&anyhow::Error>) -> Result<()> {
		self.session
			.rollback(self.handle)
			.await
			.map_err(TransactionError::Session)?;
		*self.state.lock() = TransactionState::RolledBack;
		{
			let mut stack = self.savepoints.lock();
			for savepoint in stack.drain(..) {
				*savepoint.state.lock() = SavepointState::RolledBack;
			}
		}
		tracing::debug!(transaction = %self.handle, "rolled back");
		self.run_isolated(HookType::AfterRollback, None).await;
		if error.is_some() {
			self.run_isolated(HookType::OnError, error).await;
		}
		Ok(())
	}

	// ---- savepoints ---------------------------------------------------------

	/// Open a nested rollback scope.
	///
	/// `name` defaults to the owner's monotonic counter (`sp_1`, `sp_2`, …),
	/// deterministic regardless of how many other transactions exist
	/// concurrently. Requires the transaction to be `Active`.
	pub async fn open_savepoint(self: &Arc<Self>, name: Option<&str>) -> Result<SavepointContext> {
		if !self.is_active() {
			return Err(TransactionError::NotActive);
		}
		let name = match name {
			Some(explicit) => {
				validate_savepoint_name(explicit)?;
				explicit.to_string()
			}
			None => format!("sp_{}", self.savepoint_seq.fetch_add(1, Ordering::SeqCst)),
		};
		let handle = self
			.session
			.begin_nested(self.handle, &name)
			.await
			.map_err(TransactionError::Session)?;
		let state = Arc::new(Mutex::new(SavepointState::Active));
		self.savepoints.lock().push(OpenSavepoint {
			handle,
			name: name.clone(),
			state: state.clone(),
		});
		tracing::debug!(transaction = %self.handle, savepoint = %name, "savepoint opened");
		Ok(SavepointContext::new(
			name,
			handle,
			self.handle,
			self.session.clone(),
			Arc::downgrade(self),
			state,
		))
	}

	/// Run `f` inside a savepoint scope.
	///
	/// On success the savepoint is released into the parent; on failure only
	/// the work since the savepoint opened is undone and the original error
	/// is re-raised unchanged. This transaction stays `Active` either way.
	pub async fn savepoint<F, Fut, T>(self: &Arc<Self>, name: Option<&str>, f: F) -> anyhow::Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = anyhow::Result<T>>,
	{
		let savepoint = self.open_savepoint(name).await?;
		match f().await {
			Ok(value) => {
				savepoint.release().await?;
				Ok(value)
			}
			Err(err) => {
				savepoint.rollback().await?;
				Err(err)
			}
		}
	}

	/// Number of currently open savepoints.
	pub fn open_savepoints(&self) -> usize {
		self.savepoints.lock().len()
	}

	pub(crate) fn pop_savepoint(&self, handle: SavepointHandle) {
		let mut stack = self.savepoints.lock();
		if let Some(pos) = stack.iter().position(|sp| sp.handle == handle) {
			stack.remove(pos);
		}
	}

	/// Drop `handle` and every savepoint stacked after it, invalidating their
	/// contexts so stale ones cannot reach the session.
	pub(crate) fn truncate_savepoints(&self, handle: SavepointHandle) {
		let mut stack = self.savepoints.lock();
		if let Some(pos) = stack.iter().position(|sp| sp.handle == handle) {
			for savepoint in stack.drain(pos..) {
				*savepoint.state.lock() = SavepointState::RolledBack;
				tracing::debug!(
					transaction = %self.handle,
					savepoint = %savepoint.name,
					"savepoint invalidated"
				);
			}
		}
	}
}

/// Scoped override lifting commit suppression; restores the prior value on
/// drop.
pub struct AllowCommitGuard<'a> {
	transaction: &'a Transaction,
	prior: bool,
}

impl Drop for AllowCommitGuard<'_> {
	fn drop(&mut self) {
		*self.transaction.suppress_commit.lock() = self.prior;
	}
}
