use std::time::Duration;

use jrpc_code::ContextError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation-aware execution context.
///
/// A context is a cancellation token plus an optional deadline. Cancellation
/// is advisory: a handler observes it by awaiting [`Context::done`] or polling
/// [`Context::err`] at its own suspension points. Nothing interrupts a body
/// that ignores its context.
///
/// Cancelling a context cancels every context derived from it, never its
/// parent. Once a context reports an error it never stops reporting one.
#[derive(Debug, Clone)]
pub struct Context {
	token: CancellationToken,
	deadline: Option<Instant>,
}

impl Default for Context {
	fn default() -> Self {
		Self::background()
	}
}

impl Context {
	/// Returns a fresh root context with no deadline.
	#[must_use]
	pub fn background() -> Self {
		Self::new(CancellationToken::new())
	}

	/// Wraps an existing cancellation token.
	#[must_use]
	pub fn new(token: CancellationToken) -> Self {
		Self { token, deadline: None }
	}

	/// Returns the underlying cancellation token.
	pub fn token(&self) -> &CancellationToken {
		&self.token
	}

	/// Derives a context that is cancelled with `self` and can be cancelled alone.
	#[must_use]
	pub fn child(&self) -> Self {
		Self {
			token: self.token.child_token(),
			deadline: self.deadline,
		}
	}

	/// Derives a context that expires at `deadline`, or earlier if `self` does.
	#[must_use]
	pub fn with_deadline(&self, deadline: Instant) -> Self {
		let mut child = self.child();
		child.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
		child
	}

	/// Derives a context that expires after `timeout`.
	#[must_use]
	pub fn with_timeout(&self, timeout: Duration) -> Self {
		self.with_deadline(Instant::now() + timeout)
	}

	/// Returns the deadline, if any.
	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Cancels this context and everything derived from it.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	/// Returns why the context is done, or `None` while it is live.
	pub fn err(&self) -> Option<ContextError> {
		if self.token.is_cancelled() {
			Some(ContextError::Cancelled)
		} else if self.deadline.is_some_and(|d| d <= Instant::now()) {
			Some(ContextError::DeadlineExceeded)
		} else {
			None
		}
	}

	/// Returns true once the context is cancelled or past its deadline.
	pub fn is_done(&self) -> bool {
		self.err().is_some()
	}

	/// Waits until the context is done and returns why.
	pub async fn done(&self) -> ContextError {
		match self.deadline {
			Some(deadline) => tokio::select! {
				biased;
				() = self.token.cancelled() => ContextError::Cancelled,
				() = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
			},
			None => {
				self.token.cancelled().await;
				ContextError::Cancelled
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn background_is_live() {
		let ctx = Context::background();
		assert_eq!(ctx.err(), None);
		assert!(!ctx.is_done());
		assert_eq!(ctx.deadline(), None);
	}

	#[tokio::test]
	async fn cancel_propagates_down_not_up() {
		let parent = Context::background();
		let child = parent.child();
		let grandchild = child.child();

		child.cancel();
		assert_eq!(grandchild.err(), Some(ContextError::Cancelled));
		assert_eq!(grandchild.done().await, ContextError::Cancelled);
		assert_eq!(parent.err(), None);

		parent.cancel();
		assert!(parent.is_done());
	}

	#[tokio::test(start_paused = true)]
	async fn deadline_expires() {
		let ctx = Context::background().with_timeout(Duration::from_millis(50));
		assert_eq!(ctx.err(), None);
		assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
		assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
	}

	#[tokio::test(start_paused = true)]
	async fn derived_deadline_never_extends_parent() {
		let parent = Context::background().with_timeout(Duration::from_secs(1));
		let child = parent.with_timeout(Duration::from_secs(60));
		assert_eq!(child.deadline(), parent.deadline());
	}

	#[tokio::test(start_paused = true)]
	async fn cancel_wins_over_pending_deadline() {
		let ctx = Context::background().with_timeout(Duration::from_secs(60));
		ctx.cancel();
		assert_eq!(ctx.done().await, ContextError::Cancelled);
	}
}
