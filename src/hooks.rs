//! Lifecycle hooks and the priority-ordered hook registries.
//!
//! Hooks attach to four lifecycle points: before commit, after commit, after
//! rollback, and on error. Every transaction carries its own local registry;
//! the [`TransactionManager`](crate::manager::TransactionManager) owns one
//! process-wide global registry. At dispatch time the local and global lists
//! for a point are merged and stable-sorted ascending by priority, so equal
//! priorities run in registration order with local hooks first.
//!
//! Before-commit failures are fatal to the commit attempt; failures at the
//! other three points are recorded and swallowed so they cannot contradict an
//! already-final outcome.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::session::TransactionHandle;
use crate::transaction::TransactionState;

/// Lifecycle point a hook is registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookType {
	BeforeCommit,
	AfterCommit,
	AfterRollback,
	OnError,
}

impl HookType {
	pub fn as_str(&self) -> &'static str {
		match self {
			HookType::BeforeCommit => "before_commit",
			HookType::AfterCommit => "after_commit",
			HookType::AfterRollback => "after_rollback",
			HookType::OnError => "on_error",
		}
	}
}

/// Context handed to every hook invocation.
///
/// `error` is populated only for `OnError` dispatch and borrows the failure
/// that triggered the rollback.
pub struct HookContext<'a> {
	/// Identity of the transaction being coordinated.
	pub transaction_id: TransactionHandle,
	/// Transaction state at dispatch time.
	pub state: TransactionState,
	/// The triggering failure, for `OnError` hooks.
	pub error: Option<&'a anyhow::Error>,
}

/// A registered lifecycle callback.
///
/// Lower `priority` runs first; ties are broken by registration order.
#[async_trait]
pub trait TransactionHook: Send + Sync {
	/// Lifecycle point this hook fires at.
	fn hook_type(&self) -> HookType;

	/// Execution priority; lower runs first.
	fn priority(&self) -> i32 {
		0
	}

	/// Name used in logs and in `HookExecution` errors.
	fn name(&self) -> &str;

	/// Run the hook. A failure here is fatal only for before-commit hooks.
	async fn execute(&self, ctx: &HookContext<'_>) -> anyhow::Result<()>;
}

type HookFn = dyn Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync;

/// Closure-backed hook, the explicit higher-order replacement for
/// decorator-style registration.
///
/// # Examples
///
/// ```
/// use atomique::{FnHook, HookType, TransactionHook};
///
/// let hook = FnHook::new(HookType::BeforeCommit, "audit", 10, |_ctx| Ok(()));
/// assert_eq!(hook.hook_type(), HookType::BeforeCommit);
/// assert_eq!(hook.priority(), 10);
/// assert_eq!(hook.name(), "audit");
/// ```
pub struct FnHook {
	hook_type: HookType,
	priority: i32,
	name: String,
	f: Box<HookFn>,
}

impl FnHook {
	pub fn new<F>(hook_type: HookType, name: impl Into<String>, priority: i32, f: F) -> Self
	where
		F: Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
	{
		Self {
			hook_type,
			priority,
			name: name.into(),
			f: Box::new(f),
		}
	}
}

#[async_trait]
impl TransactionHook for FnHook {
	fn hook_type(&self) -> HookType {
		self.hook_type
	}

	fn priority(&self) -> i32 {
		self.priority
	}

	fn name(&self) -> &str {
		&self.name
	}

	async fn execute(&self, ctx: &HookContext<'_>) -> anyhow::Result<()> {
		(self.f)(ctx)
	}
}

/// Ordered hook lists keyed by lifecycle point.
///
/// Registration is safe under concurrency; dispatch works on a snapshot taken
/// under the registry lock so a list being mutated is never iterated.
///
/// # Examples
///
/// ```
/// use atomique::{HookRegistry, HookType};
///
/// let registry = HookRegistry::new();
/// registry.before_commit("validate", 0, |_ctx| Ok(()));
/// registry.after_commit("notify", 5, |_ctx| Ok(()));
/// assert_eq!(registry.len(HookType::BeforeCommit), 1);
/// assert_eq!(registry.len(HookType::AfterCommit), 1);
///
/// registry.clear();
/// assert_eq!(registry.len(HookType::BeforeCommit), 0);
/// ```
pub struct HookRegistry {
	hooks: DashMap<HookType, Vec<Arc<dyn TransactionHook>>>,
}

impl HookRegistry {
	pub fn new() -> Self {
		Self {
			hooks: DashMap::new(),
		}
	}

	/// Register a hook against its own lifecycle point.
	pub fn register(&self, hook: Arc<dyn TransactionHook>) {
		self.hooks.entry(hook.hook_type()).or_default().push(hook);
	}

	/// Register a before-commit closure.
	pub fn before_commit<F>(&self, name: impl Into<String>, priority: i32, f: F)
	where
		F: Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
	{
		self.register(Arc::new(FnHook::new(HookType::BeforeCommit, name, priority, f)));
	}

	/// Register an after-commit closure.
	pub fn after_commit<F>(&self, name: impl Into<String>, priority: i32, f: F)
	where
		F: Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
	{
		self.register(Arc::new(FnHook::new(HookType::AfterCommit, name, priority, f)));
	}

	/// Register an after-rollback closure.
	pub fn after_rollback<F>(&self, name: impl Into<String>, priority: i32, f: F)
	where
		F: Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
	{
		self.register(Arc::new(FnHook::new(HookType::AfterRollback, name, priority, f)));
	}

	/// Register an on-error closure.
	pub fn on_error<F>(&self, name: impl Into<String>, priority: i32, f: F)
	where
		F: Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
	{
		self.register(Arc::new(FnHook::new(HookType::OnError, name, priority, f)));
	}

	/// Remove every registered hook.
	pub fn clear(&self) {
		self.hooks.clear();
	}

	/// Snapshot of the hooks for one lifecycle point, in registration order.
	pub fn snapshot(&self, hook_type: HookType) -> Vec<Arc<dyn TransactionHook>> {
		self.hooks
			.get(&hook_type)
			.map(|entry| entry.value().clone())
			.unwrap_or_default()
	}

	/// Number of hooks registered for one lifecycle point.
	pub fn len(&self, hook_type: HookType) -> usize {
		self.hooks
			.get(&hook_type)
			.map(|entry| entry.value().len())
			.unwrap_or(0)
	}

	/// Whether no hooks are registered at all.
	pub fn is_empty(&self) -> bool {
		self.hooks.iter().all(|entry| entry.value().is_empty())
	}
}

impl Default for HookRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Merge local and global hooks for one lifecycle point into the execution
/// order: stable sort ascending by priority, local before global on ties.
pub(crate) fn execution_order(
	local: &HookRegistry,
	global: &HookRegistry,
	hook_type: HookType,
) -> Vec<Arc<dyn TransactionHook>> {
	let mut hooks = local.snapshot(hook_type);
	hooks.extend(global.snapshot(hook_type));
	hooks.sort_by_key(|hook| hook.priority());
	hooks
}
