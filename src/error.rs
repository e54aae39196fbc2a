//! Error taxonomy for the transaction coordination core.
//!
//! Application code running inside a managed scope always gets either its own
//! error back or one of the typed variants below, never an opaque failure.
//! Body errors travel through the closure API as [`anyhow::Error`], so the
//! typed variants stay reachable via `downcast_ref::<TransactionError>()`.

use crate::propagation::TransactionPropagation;
use crate::transaction::TransactionState;

/// Result alias for coordination-core operations.
pub type Result<T> = std::result::Result<T, TransactionError>;

/// Failures produced by the coordination core itself.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
	/// Operation requires an active transaction or savepoint, but none was
	/// activated (or the scope was never entered).
	#[error("Transaction is not active")]
	NotActive,

	/// Operation requires an active transaction, but it already reached a
	/// terminal state.
	#[error("Transaction already completed (state: {state:?})")]
	AlreadyCompleted {
		/// Terminal state the transaction settled in.
		state: TransactionState,
	},

	/// A propagation mode's precondition was violated. The message names the
	/// mode so callers can assert on it.
	#[error("{mode} propagation {reason}")]
	Propagation {
		/// Mode whose precondition failed.
		mode: TransactionPropagation,
		/// Which rule was violated.
		reason: &'static str,
	},

	/// A before-commit hook failed. The transaction has already been rolled
	/// back by the time this surfaces; nothing from it became durable.
	#[error("before-commit hook '{hook}' failed: {source}")]
	HookExecution {
		/// Name of the failing hook.
		hook: String,
		/// The hook's own failure.
		#[source]
		source: anyhow::Error,
	},

	/// Savepoint names are restricted to alphanumerics and underscores and
	/// must not start with a digit.
	#[error("Invalid savepoint name '{name}': only alphanumeric characters and underscores are allowed, and the name must not start with a digit")]
	InvalidSavepointName {
		/// The rejected name.
		name: String,
	},

	/// The underlying persistence session reported a failure.
	#[error("Session error: {0}")]
	Session(#[source] anyhow::Error),
}
