//! The persistence-session collaborator contract.
//!
//! The coordination core does not implement storage. It drives an external
//! session through this trait: plain begin/commit/rollback/flush plus the
//! nested-transaction (savepoint) primitives. Handles are opaque; the core
//! never interprets them beyond equality.

use async_trait::async_trait;

/// Opaque identity of one session-level `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(pub u64);

impl std::fmt::Display for TransactionHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "tx_{}", self.0)
	}
}

/// Opaque identity of one nested-transaction marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SavepointHandle(pub u64);

/// Transaction isolation levels, passed through to the session when a new
/// transaction is begun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
	ReadUncommitted,
	ReadCommitted,
	RepeatableRead,
	Serializable,
}

impl IsolationLevel {
	/// Canonical SQL spelling, for sessions that speak SQL.
	///
	/// # Examples
	///
	/// ```
	/// use atomique::IsolationLevel;
	///
	/// assert_eq!(IsolationLevel::Serializable.to_sql(), "SERIALIZABLE");
	/// assert_eq!(IsolationLevel::ReadCommitted.to_sql(), "READ COMMITTED");
	/// ```
	pub fn to_sql(&self) -> &'static str {
		match self {
			IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
			IsolationLevel::ReadCommitted => "READ COMMITTED",
			IsolationLevel::RepeatableRead => "REPEATABLE READ",
			IsolationLevel::Serializable => "SERIALIZABLE",
		}
	}
}

/// Contract the underlying persistence session must fulfil.
///
/// All calls are fully blocking with respect to the caller's task; the core
/// never parks mid-transaction waiting on another transaction. Implementations
/// are expected to tie each [`TransactionHandle`] to a dedicated connection or
/// equivalent so that commit/rollback affect exactly the work done under that
/// handle.
#[async_trait]
pub trait Session: Send + Sync {
	/// Begin a new session-level transaction.
	async fn begin(&self) -> anyhow::Result<TransactionHandle>;

	/// Begin a new transaction at a specific isolation level.
	///
	/// Sessions without isolation support may keep the default, which
	/// ignores the level.
	async fn begin_with_isolation(
		&self,
		_level: IsolationLevel,
	) -> anyhow::Result<TransactionHandle> {
		self.begin().await
	}

	/// Commit everything written under `tx`, making it durable.
	async fn commit(&self, tx: TransactionHandle) -> anyhow::Result<()>;

	/// Discard everything written under `tx`.
	async fn rollback(&self, tx: TransactionHandle) -> anyhow::Result<()>;

	/// Materialize pending writes without finalizing the transaction. Used to
	/// degrade suppressed ad-hoc commit requests into a no-op flush.
	async fn flush(&self, tx: TransactionHandle) -> anyhow::Result<()>;

	/// Record a nested-transaction marker (savepoint) under `tx`.
	async fn begin_nested(
		&self,
		tx: TransactionHandle,
		name: &str,
	) -> anyhow::Result<SavepointHandle>;

	/// Release a savepoint, folding its work into the parent transaction.
	async fn release(
		&self,
		tx: TransactionHandle,
		savepoint: SavepointHandle,
	) -> anyhow::Result<()>;

	/// Undo all work performed since `savepoint` was recorded, leaving the
	/// parent transaction open.
	async fn rollback_to(
		&self,
		tx: TransactionHandle,
		savepoint: SavepointHandle,
	) -> anyhow::Result<()>;
}
