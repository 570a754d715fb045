use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::ResponseError;
use crate::error::decode_params;

/// A JSON-RPC request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	/// A numeric identifier.
	Number(i64),
	/// A string identifier.
	String(String),
}

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Number(n) => write!(f, "{n}"),
			Self::String(s) => write!(f, "{s:?}"),
		}
	}
}

impl From<i64> for RequestId {
	fn from(n: i64) -> Self {
		Self::Number(n)
	}
}

impl From<String> for RequestId {
	fn from(s: String) -> Self {
		Self::String(s)
	}
}

impl From<&str> for RequestId {
	fn from(s: &str) -> Self {
		Self::String(s.to_owned())
	}
}

/// An inbound call as seen by a handler.
///
/// A request without an ID is a notification: it gets no response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
	id: Option<RequestId>,
	method: String,
	params: Option<JsonValue>,
}

impl Request {
	/// Creates a request description.
	pub fn new(id: Option<RequestId>, method: impl Into<String>, params: Option<JsonValue>) -> Self {
		Self {
			id,
			method: method.into(),
			params,
		}
	}

	/// Returns the request ID, or `None` for a notification.
	pub fn id(&self) -> Option<&RequestId> {
		self.id.as_ref()
	}

	/// Returns true if the request expects no response.
	pub fn is_notification(&self) -> bool {
		self.id.is_none()
	}

	/// Returns the method name.
	pub fn method(&self) -> &str {
		&self.method
	}

	/// Returns the raw parameters, if any were sent.
	pub fn params(&self) -> Option<&JsonValue> {
		self.params.as_ref()
	}

	/// Returns true if parameters were sent.
	pub fn has_params(&self) -> bool {
		self.params.is_some()
	}

	/// Consumes the request, returning the raw parameters.
	pub fn into_params(self) -> Option<JsonValue> {
		self.params
	}

	/// Decodes the parameters into `T`.
	///
	/// Absent parameters decode from `null`. Failures are reported as
	/// [`Code::INVALID_PARAMS`](jrpc_code::Code::INVALID_PARAMS).
	pub fn unmarshal_params<T: DeserializeOwned>(&self) -> Result<T, ResponseError> {
		decode_params(self.params.clone())
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::Code;

	#[test]
	fn ids_round_trip_untagged() {
		assert_eq!(serde_json::to_value(RequestId::from(7i64)).unwrap(), json!(7));
		assert_eq!(serde_json::to_value(RequestId::from("a")).unwrap(), json!("a"));
		assert_eq!(serde_json::from_value::<RequestId>(json!("x")).unwrap(), RequestId::from("x"));
		assert!(serde_json::from_value::<RequestId>(json!(1.5)).is_err());
	}

	#[test]
	fn notification_has_no_id() {
		let req = Request::new(None, "ping", None);
		assert!(req.is_notification());
		assert!(!req.has_params());
	}

	#[test]
	fn unmarshal_params_maps_failures_to_invalid_params() {
		let req = Request::new(Some(1i64.into()), "sum", Some(json!([1, 2, 3])));
		assert_eq!(req.unmarshal_params::<Vec<i32>>().unwrap(), vec![1, 2, 3]);

		let err = req.unmarshal_params::<String>().unwrap_err();
		assert_eq!(err.code(), Code::INVALID_PARAMS);
	}

	#[test]
	fn absent_params_decode_from_null() {
		let req = Request::new(Some(1i64.into()), "opt", None);
		assert_eq!(req.unmarshal_params::<Option<i32>>().unwrap(), None);
		req.unmarshal_params::<()>().unwrap();
		assert!(req.unmarshal_params::<Vec<i32>>().is_err());
	}
}
