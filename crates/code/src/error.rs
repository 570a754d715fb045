use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Code;

/// A value that can report an error code.
pub trait ErrCode {
	/// Returns the code describing `self`.
	fn err_code(&self) -> Code;
}

/// A [`Code`] wrapped as an error value.
///
/// Displays the registered description for the code. Two `CodeError`s are
/// equal exactly when their codes are equal.
///
/// An error type that reports a code makes it visible to [`Code::from_error`]
/// and [`Code::is`] by returning a `CodeError` from its `source()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeError(Code);

impl CodeError {
	pub(crate) const fn new(code: Code) -> Self {
		Self(code)
	}

	/// Returns the originating code.
	#[must_use]
	pub const fn code(&self) -> Code {
		self.0
	}
}

impl fmt::Display for CodeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.0, f)
	}
}

impl std::error::Error for CodeError {}

impl ErrCode for CodeError {
	fn err_code(&self) -> Code {
		self.0
	}
}

impl From<Code> for CodeError {
	fn from(code: Code) -> Self {
		Self(code)
	}
}

impl From<CodeError> for Code {
	fn from(err: CodeError) -> Self {
		err.0
	}
}

/// Why an execution context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ContextError {
	/// The context was cancelled.
	#[error("context canceled")]
	Cancelled,
	/// The context deadline passed.
	#[error("context deadline exceeded")]
	DeadlineExceeded,
}

impl ErrCode for ContextError {
	fn err_code(&self) -> Code {
		match self {
			Self::Cancelled => Code::CANCELLED,
			Self::DeadlineExceeded => Code::DEADLINE_EXCEEDED,
		}
	}
}
