//! Automatic re-execution of failed transaction scopes.
//!
//! Every attempt is a complete scope: the body runs, and on failure the
//! scope's normal rollback pathway executes before the retry decision is
//! made. `max_retries` counts *additional* attempts after the first, so a
//! policy with `max_retries = 3` invokes the body at most four times.

use std::sync::Arc;
use std::time::Duration;

use crate::manager::{TransactionManager, TransactionOptions};
use crate::transaction::Transaction;

/// Retry budget and pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Additional attempts allowed after the initial one.
	pub max_retries: u32,
	/// Pause between consecutive attempts.
	pub retry_delay: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 3,
			retry_delay: Duration::from_millis(100),
		}
	}
}

impl RetryPolicy {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;
		self
	}

	pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
		self.retry_delay = retry_delay;
		self
	}
}

/// Predicate matching failures whose cause chain contains an `E`.
///
/// Pass the result as the `retry_on` argument of
/// [`transaction_with_retry`] to retry only a specific failure class,
/// leaving every other error to propagate after the first attempt.
pub fn on_error_kind<E>() -> impl Fn(&anyhow::Error) -> bool
where
	E: std::error::Error + Send + Sync + 'static,
{
	|err: &anyhow::Error| err.chain().any(|cause| cause.downcast_ref::<E>().is_some())
}

/// Run a transaction scope, retrying failed attempts that match `retry_on`.
///
/// Propagation is re-resolved on every attempt, so a retried `REQUIRED` open
/// begins a fresh transaction each time rather than reusing the rolled-back
/// one. An error that does not match `retry_on`, or the failure of the final
/// permitted attempt, is returned unchanged.
pub async fn transaction_with_retry<F, Fut, T, P>(
	manager: &TransactionManager,
	options: TransactionOptions,
	policy: RetryPolicy,
	retry_on: P,
	f: F,
) -> anyhow::Result<T>
where
	F: Fn(Option<Arc<Transaction>>) -> Fut,
	Fut: Future<Output = anyhow::Result<T>>,
	P: Fn(&anyhow::Error) -> bool,
{
	let mut attempt: u32 = 0;
	loop {
		match manager.transaction(options, |tx| f(tx)).await {
			Ok(value) => return Ok(value),
			Err(err) => {
				if attempt >= policy.max_retries || !retry_on(&err) {
					return Err(err);
				}
				attempt += 1;
				tracing::debug!(
					attempt,
					max_retries = policy.max_retries,
					error = %err,
					"transaction attempt failed; retrying"
				);
				tokio::time::sleep(policy.retry_delay).await;
			}
		}
	}
}
