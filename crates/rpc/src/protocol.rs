//! Protocol constants and request ID generation.

use jrpc_handler::RequestId;

/// The version marker every envelope carries.
pub const VERSION: &str = "2.0";

/// Method of the built-in cancellation notification.
///
/// Its parameters are an array of request IDs; any other shape is ignored.
/// It never gets a response.
pub const CANCEL_METHOD: &str = "rpc.cancel";

/// Counter-based request ID generator.
///
/// IDs start at 1 and are never reused by one generator.
#[derive(Debug, Clone, Copy)]
pub struct CounterIdGen(pub i64);

impl Default for CounterIdGen {
	fn default() -> Self {
		Self::new()
	}
}

impl CounterIdGen {
	/// Creates a new counter starting at 1.
	#[must_use]
	pub const fn new() -> Self {
		Self(1)
	}

	/// Generates the next unique ID and increments the counter.
	#[allow(clippy::should_implement_trait, reason = "convention")]
	pub fn next(&mut self) -> RequestId {
		let id = self.0;
		self.0 += 1;
		RequestId::Number(id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn counter_is_sequential_from_one() {
		let mut ids = CounterIdGen::new();
		assert_eq!(ids.next(), RequestId::Number(1));
		assert_eq!(ids.next(), RequestId::Number(2));
		assert_eq!(ids.0, 3);
	}
}
