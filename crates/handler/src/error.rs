use std::error::Error;

use jrpc_code::{Code, CodeError, ContextError, ErrCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A structured error object, as carried in a JSON-RPC error response.
///
/// The code is the error's `source()`, so [`Code::from_error`] and
/// [`Code::is`] classify a `ResponseError` by its code, including through
/// errors that wrap it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("[{}] {}", .code.code().value(), .message)]
pub struct ResponseError {
	#[source]
	code: CodeError,
	message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	data: Option<JsonValue>,
}

impl ResponseError {
	/// Creates an error with `code` and `message`.
	pub fn new(code: Code, message: impl Into<String>) -> Self {
		Self {
			code: code.into(),
			message: message.into(),
			data: None,
		}
	}

	/// Returns the error code.
	pub fn code(&self) -> Code {
		self.code.code()
	}

	/// Returns the short description of the error.
	pub fn message(&self) -> &str {
		&self.message
	}

	/// Returns the additional error detail, if any.
	pub fn data(&self) -> Option<&JsonValue> {
		self.data.as_ref()
	}

	/// Attaches detail data.
	#[must_use]
	pub fn with_data(mut self, data: JsonValue) -> Self {
		self.data = Some(data);
		self
	}

	/// Converts an arbitrary error into an error object.
	///
	/// A `ResponseError` found in the source chain, including inside an
	/// `io::Error`, is used as-is. Otherwise the
	/// code is [`Code::from_error`] and the message is the error's text.
	pub fn from_error(err: &(dyn Error + 'static)) -> Self {
		let found = std::iter::successors(Some(err), |&e| match e.downcast_ref::<std::io::Error>().and_then(std::io::Error::get_ref) {
			Some(inner) => Some(inner as &(dyn Error + 'static)),
			None => e.source(),
		})
		.find_map(|e| e.downcast_ref::<Self>());
		match found {
			Some(resp) => resp.clone(),
			None => Self::new(Code::from_error(Some(err)), err.to_string()),
		}
	}
}

impl From<Code> for ResponseError {
	fn from(code: Code) -> Self {
		Self::new(code, code.to_string())
	}
}

impl From<ContextError> for ResponseError {
	fn from(err: ContextError) -> Self {
		Self::new(err.err_code(), err.to_string())
	}
}

impl ErrCode for ResponseError {
	fn err_code(&self) -> Code {
		self.code()
	}
}

/// Decodes handler parameters, treating absent parameters as `null`.
pub(crate) fn decode_params<T: DeserializeOwned>(params: Option<JsonValue>) -> Result<T, ResponseError> {
	serde_json::from_value(params.unwrap_or(JsonValue::Null))
		.map_err(|err| ResponseError::new(Code::INVALID_PARAMS, format!("invalid parameters: {err}")))
}

/// Invalid handler registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
	/// The method name is empty.
	#[error("empty method name")]
	EmptyName,
	/// The method name uses the prefix reserved for the protocol.
	#[error("method name {0:?} uses the reserved \"rpc.\" prefix")]
	Reserved(String),
	/// A handler is already bound to the name.
	#[error("method {0:?} is already registered")]
	Duplicate(String),
	/// The service name is empty or contains a `.`.
	#[error("invalid service name {0:?}")]
	InvalidService(String),
}

#[cfg(test)]
mod tests {
	use std::io;

	use super::*;

	#[test]
	fn display_includes_code_value() {
		let err = ResponseError::new(Code::new(-32000), "boom");
		assert_eq!(err.to_string(), "[-32000] boom");
	}

	#[test]
	fn serializes_without_empty_data() {
		let err = ResponseError::from(Code::METHOD_NOT_FOUND);
		assert_eq!(
			serde_json::to_value(&err).unwrap(),
			serde_json::json!({"code": -32601, "message": "method not found"})
		);
		let err = err.with_data(serde_json::json!({"method": "nope"}));
		assert_eq!(serde_json::to_value(&err).unwrap()["data"]["method"], "nope");
	}

	#[test]
	fn from_error_prefers_embedded_response_error() {
		let inner = ResponseError::new(Code::new(123), "custom");
		let wrapped = io::Error::other(inner.clone());
		assert_eq!(ResponseError::from_error(&inner), inner);
		assert_eq!(ResponseError::from_error(&wrapped), inner);
	}

	#[test]
	fn from_error_classifies_other_errors() {
		let err = ResponseError::from_error(&ContextError::Cancelled);
		assert_eq!(err.code(), Code::CANCELLED);
		assert_eq!(err.message(), "context canceled");

		let err = ResponseError::from_error(&io::Error::other("disk on fire"));
		assert_eq!(err.code(), Code::SYSTEM_ERROR);
		assert_eq!(err.message(), "disk on fire");
	}

	#[derive(Debug, thiserror::Error)]
	#[error("handler failed")]
	struct Failed(#[source] ResponseError);

	#[rstest::rstest]
	#[case::bare(Box::new(ResponseError::new(Code::new(42), "answer")), Code::new(42))]
	#[case::reserved(Box::new(ResponseError::from(Code::METHOD_NOT_FOUND)), Code::METHOD_NOT_FOUND)]
	#[case::wrapped(Box::new(Failed(ResponseError::new(Code::new(-7), "x"))), Code::new(-7))]
	#[case::in_io(Box::new(io::Error::other(ResponseError::new(Code::new(9), "y"))), Code::new(9))]
	fn codes_are_visible_through_the_source_chain(#[case] err: Box<dyn Error + Send + Sync>, #[case] want: Code) {
		assert_eq!(Code::from_error(Some(&*err)), want);
		assert!(want.is(&*err));
		assert!(!Code::SYSTEM_ERROR.is(&*err));
	}

	#[test]
	fn wire_form_is_unchanged_by_the_source() {
		let err: ResponseError = serde_json::from_value(serde_json::json!({"code": 3, "message": "m"})).unwrap();
		assert_eq!(err, ResponseError::new(Code::new(3), "m"));
		assert_eq!(err.data(), None);
		assert_eq!(err.source().map(ToString::to_string), Some(Code::new(3).to_string()));
	}
}
