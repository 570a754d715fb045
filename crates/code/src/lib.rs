//! JSON-RPC error codes.
//!
//! A [`Code`] is a signed 32-bit error identifier. Values from and including
//! -32768 to -32000 are reserved for pre-defined errors; the remainder of the
//! space is free for application codes registered through [`Code::register`]
//! or a [`Registry`].
//!
//! Codes cross the protocol boundary through [`Code::from_error`], which
//! classifies an arbitrary error value without exposing its representation.

#![warn(missing_docs)]

use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

mod error;
mod registry;

pub use error::{CodeError, ContextError, ErrCode};
pub use registry::{RegisterError, Registry};

/// An error response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Code(i32);

impl Code {
	/// Invalid JSON was received.
	pub const PARSE_ERROR: Self = Self(-32700);
	/// The JSON sent is not a valid request object.
	pub const INVALID_REQUEST: Self = Self(-32600);
	/// The method does not exist or is unavailable.
	pub const METHOD_NOT_FOUND: Self = Self(-32601);
	/// Invalid method parameters.
	pub const INVALID_PARAMS: Self = Self(-32602);
	/// Internal JSON-RPC error.
	pub const INTERNAL_ERROR: Self = Self(-32603);

	/// Denotes the absence of an error.
	pub const NO_ERROR: Self = Self(-32099);
	/// Errors from the operating environment.
	pub const SYSTEM_ERROR: Self = Self(-32098);
	/// The request was cancelled.
	pub const CANCELLED: Self = Self(-32097);
	/// The request deadline expired.
	pub const DEADLINE_EXCEEDED: Self = Self(-32096);

	/// The band reserved for pre-defined errors.
	pub const RESERVED: RangeInclusive<i32> = -32768..=-32000;

	/// Wraps a raw code value.
	#[must_use]
	pub const fn new(value: i32) -> Self {
		Self(value)
	}

	/// Returns the raw code value.
	#[must_use]
	pub const fn value(self) -> i32 {
		self.0
	}

	/// Returns true if the code lies in the reserved band.
	#[must_use]
	pub fn is_reserved(self) -> bool {
		Self::RESERVED.contains(&self.0)
	}

	/// Registers `message` for `value` in the process-wide registry.
	///
	/// # Panics
	///
	/// Panics if `value` is already registered with a different message.
	/// Re-registering the same message is a no-op. Call this during
	/// initialization; use [`Registry::try_register`] to check instead.
	pub fn register(value: i32, message: impl Into<Cow<'static, str>>) -> Self {
		Registry::global().register(value, message)
	}

	/// Converts the code into an error value.
	///
	/// [`Code::NO_ERROR`] converts to `None`.
	#[must_use]
	pub fn err(self) -> Option<CodeError> {
		(self != Self::NO_ERROR).then_some(CodeError::new(self))
	}

	/// Classifies an error into a code.
	///
	/// * `None` → [`Code::NO_ERROR`].
	/// * A [`CodeError`] anywhere in the source chain → its code. Error types
	///   that carry a code expose it this way.
	/// * [`ContextError::Cancelled`] → [`Code::CANCELLED`].
	/// * [`ContextError::DeadlineExceeded`] or a tokio timeout → [`Code::DEADLINE_EXCEEDED`].
	/// * Anything else → [`Code::SYSTEM_ERROR`].
	#[must_use]
	pub fn from_error(err: Option<&(dyn Error + 'static)>) -> Self {
		let Some(err) = err else {
			return Self::NO_ERROR;
		};
		if let Some(code) = chain(err).find_map(|e| e.downcast_ref::<CodeError>().map(CodeError::code)) {
			return code;
		}
		for e in chain(err) {
			if let Some(ctx) = e.downcast_ref::<ContextError>() {
				return ctx.err_code();
			}
			if e.is::<tokio::time::error::Elapsed>() {
				return Self::DEADLINE_EXCEEDED;
			}
		}
		Self::SYSTEM_ERROR
	}

	/// Reports whether `err`, or an error it wraps, has this code.
	///
	/// Matching is by code value only, irrespective of how the error value was
	/// constructed.
	#[must_use]
	pub fn is(self, err: &(dyn Error + 'static)) -> bool {
		chain(err).any(|e| {
			e.downcast_ref::<CodeError>().is_some_and(|c| c.code() == self)
				|| e.downcast_ref::<ContextError>().is_some_and(|c| c.err_code() == self)
		})
	}
}

impl fmt::Display for Code {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&Registry::global().describe(*self))
	}
}

impl From<i32> for Code {
	fn from(value: i32) -> Self {
		Self(value)
	}
}

impl From<Code> for i32 {
	fn from(code: Code) -> Self {
		code.0
	}
}

impl ErrCode for Code {
	fn err_code(&self) -> Code {
		*self
	}
}

/// Walks `err` and its sources, looking through `io::Error` wrappers.
fn chain<'a>(err: &'a (dyn Error + 'static)) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
	std::iter::successors(Some(err), |&err| match err.downcast_ref::<std::io::Error>().and_then(std::io::Error::get_ref) {
		Some(inner) => Some(inner as &(dyn Error + 'static)),
		None => err.source(),
	})
}
