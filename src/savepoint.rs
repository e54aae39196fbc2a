//! Nested rollback scopes bound to an owning transaction.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Result, TransactionError};
use crate::session::{SavepointHandle, Session, TransactionHandle};
use crate::transaction::Transaction;

/// Lifecycle of one savepoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavepointState {
	/// Marker recorded, scope open.
	Active,
	/// Folded into the parent transaction.
	Released,
	/// Work since the marker was undone; the parent stays active.
	RolledBack,
}

/// One nested rollback scope inside an active transaction.
///
/// Rolling a savepoint back undoes only the work performed since it was
/// opened. The owning transaction's own state is never touched by a savepoint
/// outcome: after a rollback the parent remains active and can still commit
/// the work that preceded the marker.
///
/// The back-reference to the owner is weak; a savepoint context never extends
/// its transaction's lifetime.
///
/// The state cell is shared with the owner's savepoint stack: when an outer
/// savepoint rolls back, or the transaction itself rolls back, every context
/// stacked inside is invalidated to `RolledBack` and rejects further
/// lifecycle calls.
pub struct SavepointContext {
	name: String,
	handle: SavepointHandle,
	tx_handle: TransactionHandle,
	session: Arc<dyn Session>,
	owner: Weak<Transaction>,
	state: Arc<Mutex<SavepointState>>,
}

impl SavepointContext {
	pub(crate) fn new(
		name: String,
		handle: SavepointHandle,
		tx_handle: TransactionHandle,
		session: Arc<dyn Session>,
		owner: Weak<Transaction>,
		state: Arc<Mutex<SavepointState>>,
	) -> Self {
		Self {
			name,
			handle,
			tx_handle,
			session,
			owner,
			state,
		}
	}

	/// Savepoint name, explicit or auto-generated (`sp_1`, `sp_2`, …).
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Session-level marker identity.
	pub fn handle(&self) -> SavepointHandle {
		self.handle
	}

	pub fn state(&self) -> SavepointState {
		*self.state.lock()
	}

	pub fn is_active(&self) -> bool {
		self.state() == SavepointState::Active
	}

	fn ensure_active(&self) -> Result<()> {
		if self.is_active() {
			Ok(())
		} else {
			Err(TransactionError::NotActive)
		}
	}

	/// Release the marker, committing the savepoint into its parent.
	///
	/// Changes made inside remain visible to the parent transaction but are
	/// not independently durable until the parent itself commits.
	pub async fn release(&self) -> Result<()> {
		self.ensure_active()?;
		self.session
			.release(self.tx_handle, self.handle)
			.await
			.map_err(TransactionError::Session)?;
		*self.state.lock() = SavepointState::Released;
		if let Some(owner) = self.owner.upgrade() {
			owner.pop_savepoint(self.handle);
		}
		tracing::debug!(transaction = %self.tx_handle, savepoint = %self.name, "savepoint released");
		Ok(())
	}

	/// Roll back to the marker, undoing work done since it opened.
	///
	/// Savepoints stacked on top of this one are invalidated along with it;
	/// savepoints and data established before it are untouched.
	pub async fn rollback(&self) -> Result<()> {
		self.ensure_active()?;
		self.session
			.rollback_to(self.tx_handle, self.handle)
			.await
			.map_err(TransactionError::Session)?;
		*self.state.lock() = SavepointState::RolledBack;
		if let Some(owner) = self.owner.upgrade() {
			owner.truncate_savepoints(self.handle);
		}
		tracing::debug!(transaction = %self.tx_handle, savepoint = %self.name, "savepoint rolled back");
		Ok(())
	}
}

impl fmt::Debug for SavepointContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SavepointContext")
			.field("name", &self.name)
			.field("handle", &self.handle)
			.field("transaction", &self.tx_handle)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

/// Only alphanumerics and underscores are allowed, and the name must not
/// start with a digit.
pub(crate) fn validate_savepoint_name(name: &str) -> Result<()> {
	let valid = !name.is_empty()
		&& name.chars().all(|c| c.is_alphanumeric() || c == '_')
		&& !name.chars().next().is_some_and(|c| c.is_numeric());
	if valid {
		Ok(())
	} else {
		Err(TransactionError::InvalidSavepointName {
			name: name.to_string(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;

	struct NoopSession;

	#[async_trait]
	impl Session for NoopSession {
		async fn begin(&self) -> anyhow::Result<TransactionHandle> {
			Ok(TransactionHandle(1))
		}

		async fn commit(&self, _tx: TransactionHandle) -> anyhow::Result<()> {
			Ok(())
		}

		async fn rollback(&self, _tx: TransactionHandle) -> anyhow::Result<()> {
			Ok(())
		}

		async fn flush(&self, _tx: TransactionHandle) -> anyhow::Result<()> {
			Ok(())
		}

		async fn begin_nested(
			&self,
			_tx: TransactionHandle,
			_name: &str,
		) -> anyhow::Result<SavepointHandle> {
			Ok(SavepointHandle(1))
		}

		async fn release(
			&self,
			_tx: TransactionHandle,
			_savepoint: SavepointHandle,
		) -> anyhow::Result<()> {
			Ok(())
		}

		async fn rollback_to(
			&self,
			_tx: TransactionHandle,
			_savepoint: SavepointHandle,
		) -> anyhow::Result<()> {
			Ok(())
		}
	}

	#[test]
	fn debug_output_shows_identity_and_state() {
		let savepoint = SavepointContext::new(
			"checkpoint".to_string(),
			SavepointHandle(7),
			TransactionHandle(1),
			Arc::new(NoopSession),
			Weak::new(),
			Arc::new(Mutex::new(SavepointState::Active)),
		);

		let rendered = format!("{savepoint:?}");
		assert!(rendered.contains("checkpoint"));
		assert!(rendered.contains("Active"));
	}

	#[test]
	fn savepoint_name_validation() {
		assert!(validate_savepoint_name("sp_1").is_ok());
		assert!(validate_savepoint_name("before_risky_op").is_ok());
		assert!(validate_savepoint_name("").is_err());
		assert!(validate_savepoint_name("1sp").is_err());
		assert!(validate_savepoint_name("sp;drop").is_err());
	}
}
