use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::Code;

const BUILTIN: [(Code, &str); 9] = [
	(Code::PARSE_ERROR, "parse error"),
	(Code::INVALID_REQUEST, "invalid request"),
	(Code::METHOD_NOT_FOUND, "method not found"),
	(Code::INVALID_PARAMS, "invalid parameters"),
	(Code::INTERNAL_ERROR, "internal error"),
	(Code::NO_ERROR, "no error (success)"),
	(Code::SYSTEM_ERROR, "system error"),
	(Code::CANCELLED, "request cancelled"),
	(Code::DEADLINE_EXCEEDED, "deadline exceeded"),
];

/// Conflicting registration of a code value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
	/// The value already has a different description.
	#[error("code {value} is already registered for {existing:?}")]
	Conflict {
		/// The contested code value.
		value: i32,
		/// The description already registered.
		existing: String,
		/// The rejected description.
		proposed: String,
	},
}

/// Descriptions for error codes.
///
/// A registry starts with the built-in codes, is extended by components while
/// the process initializes, and is read far more often than it is written.
/// Writers are mutually exclusive; readers run concurrently.
#[derive(Debug)]
pub struct Registry {
	entries: RwLock<HashMap<Code, Cow<'static, str>>>,
}

impl Default for Registry {
	fn default() -> Self {
		Self::new()
	}
}

impl Registry {
	/// Creates a registry holding the built-in codes.
	#[must_use]
	pub fn new() -> Self {
		let entries = BUILTIN.iter().map(|&(code, msg)| (code, Cow::Borrowed(msg))).collect();
		Self {
			entries: RwLock::new(entries),
		}
	}

	/// Returns the process-wide registry.
	pub fn global() -> &'static Self {
		static GLOBAL: OnceLock<Registry> = OnceLock::new();
		GLOBAL.get_or_init(Self::new)
	}

	/// Adds a description for `value`.
	///
	/// Registering the same description twice succeeds; registering a
	/// different description for a registered value fails and leaves the
	/// registry unchanged.
	pub fn try_register(&self, value: i32, message: impl Into<Cow<'static, str>>) -> Result<Code, RegisterError> {
		let code = Code::new(value);
		let message = message.into();
		let mut entries = self.entries.write();
		if let Some(existing) = entries.get(&code) {
			if *existing == message {
				return Ok(code);
			}
			return Err(RegisterError::Conflict {
				value,
				existing: existing.to_string(),
				proposed: message.into_owned(),
			});
		}
		entries.insert(code, message);
		Ok(code)
	}

	/// Adds a description for `value`, treating a conflict as fatal.
	///
	/// # Panics
	///
	/// Panics if `value` is already registered with a different description.
	pub fn register(&self, value: i32, message: impl Into<Cow<'static, str>>) -> Code {
		match self.try_register(value, message) {
			Ok(code) => code,
			Err(err) => panic!("{err}"),
		}
	}

	/// Returns the registered description of `code`, if any.
	pub fn lookup(&self, code: Code) -> Option<Cow<'static, str>> {
		self.entries.read().get(&code).cloned()
	}

	/// Returns the description of `code`, or a placeholder naming its value.
	pub fn describe(&self, code: Code) -> Cow<'static, str> {
		self.lookup(code)
			.unwrap_or_else(|| Cow::Owned(format!("error code {}", code.value())))
	}
}
