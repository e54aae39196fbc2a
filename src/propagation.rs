//! Propagation modes and the pure resolution function.
//!
//! Resolution is side-effect free: given "is there a current transaction?"
//! and a requested mode, it decides whether to join, create, open a
//! savepoint, run without a transaction, or reject.

use crate::error::{Result, TransactionError};

/// How a requested transactional operation attaches to an already-active
/// transaction in the calling context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionPropagation {
	/// Join the current transaction if present, otherwise create one.
	Required,
	/// Always create a fresh transaction, suspending any current one.
	RequiresNew,
	/// Join the current transaction; error if there is none.
	Mandatory,
	/// Error if a transaction is active; otherwise run without one.
	Never,
	/// Open a savepoint under the current transaction; error if there is none.
	Nested,
}

impl TransactionPropagation {
	/// Canonical uppercase name, as it appears in propagation errors.
	pub fn as_str(&self) -> &'static str {
		match self {
			TransactionPropagation::Required => "REQUIRED",
			TransactionPropagation::RequiresNew => "REQUIRES_NEW",
			TransactionPropagation::Mandatory => "MANDATORY",
			TransactionPropagation::Never => "NEVER",
			TransactionPropagation::Nested => "NESTED",
		}
	}
}

impl std::fmt::Display for TransactionPropagation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Outcome of resolving a propagation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationDecision {
	/// Reuse the current transaction identity, bumping its nesting level.
	JoinExisting,
	/// Begin a fresh session-level transaction.
	CreateNew,
	/// Open a savepoint under the current transaction.
	CreateSavepoint,
	/// Execute the body with no transaction at all.
	RunWithout,
}

/// Resolve a propagation request against the presence of a current
/// transaction.
///
/// Precondition violations come back as
/// [`TransactionError::Propagation`] whose message names the mode.
///
/// # Examples
///
/// ```
/// use atomique::{resolve, PropagationDecision, TransactionPropagation};
///
/// assert_eq!(
///     resolve(false, TransactionPropagation::Required).unwrap(),
///     PropagationDecision::CreateNew,
/// );
/// assert_eq!(
///     resolve(true, TransactionPropagation::Required).unwrap(),
///     PropagationDecision::JoinExisting,
/// );
/// assert_eq!(
///     resolve(true, TransactionPropagation::Nested).unwrap(),
///     PropagationDecision::CreateSavepoint,
/// );
///
/// let err = resolve(false, TransactionPropagation::Mandatory).unwrap_err();
/// assert!(err.to_string().contains("MANDATORY"));
/// ```
pub fn resolve(
	has_current: bool,
	propagation: TransactionPropagation,
) -> Result<PropagationDecision> {
	match (propagation, has_current) {
		(TransactionPropagation::Required, false) => Ok(PropagationDecision::CreateNew),
		(TransactionPropagation::Required, true) => Ok(PropagationDecision::JoinExisting),
		(TransactionPropagation::RequiresNew, _) => Ok(PropagationDecision::CreateNew),
		(TransactionPropagation::Mandatory, true) => Ok(PropagationDecision::JoinExisting),
		(TransactionPropagation::Mandatory, false) => Err(TransactionError::Propagation {
			mode: TransactionPropagation::Mandatory,
			reason: "requires an active transaction",
		}),
		(TransactionPropagation::Never, false) => Ok(PropagationDecision::RunWithout),
		(TransactionPropagation::Never, true) => Err(TransactionError::Propagation {
			mode: TransactionPropagation::Never,
			reason: "forbids an active transaction",
		}),
		(TransactionPropagation::Nested, true) => Ok(PropagationDecision::CreateSavepoint),
		(TransactionPropagation::Nested, false) => Err(TransactionError::Propagation {
			mode: TransactionPropagation::Nested,
			reason: "requires an active transaction",
		}),
	}
}
