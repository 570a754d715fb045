//! JSON-RPC 2.0 envelopes.
//!
//! Only single envelopes are understood; a batch array is rejected as an
//! invalid request.

use jrpc_code::Code;
use jrpc_handler::{JsonValue, Request, RequestId, ResponseError};
use serde::{Deserialize, Deserializer, Serialize};

use crate::protocol::VERSION;
use crate::{Error, Result};

/// A decoded inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
	/// A call or notification.
	Request(Request),
	/// A reply to one of our calls.
	Reply(Reply),
}

/// A reply as read off the wire.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reply {
	/// `None` when the peer could not tell which call failed.
	pub id: Option<RequestId>,
	pub result: Result<JsonValue, ResponseError>,
}

/// An inbound frame that could not be accepted, and the error to answer with.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Rejected {
	pub id: Option<RequestId>,
	pub error: ResponseError,
}

impl Rejected {
	fn new(id: Option<RequestId>, code: Code, message: impl Into<String>) -> Self {
		Self {
			id,
			error: ResponseError::new(code, message),
		}
	}

	fn invalid(id: Option<RequestId>, message: impl Into<String>) -> Self {
		Self::new(id, Code::INVALID_REQUEST, message)
	}
}

#[derive(Deserialize)]
struct Envelope {
	jsonrpc: Option<String>,
	#[serde(default, deserialize_with = "present")]
	id: Option<JsonValue>,
	method: Option<String>,
	#[serde(default, deserialize_with = "present")]
	params: Option<JsonValue>,
	#[serde(default, deserialize_with = "present")]
	result: Option<JsonValue>,
	error: Option<ResponseError>,
}

/// Distinguishes an explicit `null` from an absent field.
fn present<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<JsonValue>, D::Error> {
	JsonValue::deserialize(de).map(Some)
}

/// Decodes an ID that may be `null`.
fn decode_id(raw: JsonValue) -> std::result::Result<Option<RequestId>, Rejected> {
	if raw.is_null() {
		return Ok(None);
	}
	serde_json::from_value(raw).map(Some).map_err(|_| Rejected::invalid(None, "request id must be an integer or a string"))
}

/// Decodes one inbound frame.
pub(crate) fn parse(frame: &[u8]) -> std::result::Result<Inbound, Rejected> {
	let value: JsonValue = serde_json::from_slice(frame).map_err(|err| Rejected::new(None, Code::PARSE_ERROR, err.to_string()))?;
	if value.is_array() {
		return Err(Rejected::invalid(None, "batch requests are not supported"));
	}
	let env: Envelope = serde_json::from_value(value).map_err(|err| Rejected::invalid(None, err.to_string()))?;

	// Outer `None`: no `id` member. Inner `None`: `"id": null`.
	let id = env.id.map(decode_id).transpose()?;
	if env.jsonrpc.as_deref() != Some(VERSION) {
		return Err(Rejected::invalid(id.flatten(), "missing or invalid version marker"));
	}

	let Some(method) = env.method else {
		return match (id, env.result, env.error) {
			(Some(id), Some(result), None) => Ok(Inbound::Reply(Reply { id, result: Ok(result) })),
			(Some(id), None, Some(error)) => Ok(Inbound::Reply(Reply { id, result: Err(error) })),
			(id, ..) => Err(Rejected::invalid(id.flatten(), "message is neither a request nor a response")),
		};
	};

	let id = match id {
		Some(None) => return Err(Rejected::invalid(None, "request id must not be null")),
		id => id.flatten(),
	};
	if env.result.is_some() || env.error.is_some() {
		return Err(Rejected::invalid(id, "request carries response fields"));
	}
	if method.is_empty() {
		return Err(Rejected::invalid(id, "empty method name"));
	}
	let params = match env.params {
		None | Some(JsonValue::Null) => None,
		Some(params @ (JsonValue::Array(_) | JsonValue::Object(_))) => Some(params),
		Some(_) => return Err(Rejected::invalid(id, "parameters must be an array or an object")),
	};
	Ok(Inbound::Request(Request::new(id, method, params)))
}

#[derive(Serialize)]
struct OutRequest<'a> {
	jsonrpc: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	id: Option<&'a RequestId>,
	method: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	params: Option<&'a JsonValue>,
}

#[derive(Serialize)]
struct OutReply<'a> {
	jsonrpc: &'static str,
	id: Option<&'a RequestId>,
	#[serde(skip_serializing_if = "Option::is_none")]
	result: Option<&'a JsonValue>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<&'a ResponseError>,
}

/// Encodes a call, or a notification when `id` is `None`.
pub(crate) fn encode_request(id: Option<&RequestId>, method: &str, params: Option<&JsonValue>) -> Result<Vec<u8>> {
	serde_json::to_vec(&OutRequest {
		jsonrpc: VERSION,
		id,
		method,
		params,
	})
	.map_err(Error::Encode)
}

/// Encodes a reply. A `None` ID is written as `null`.
pub(crate) fn encode_reply(id: Option<&RequestId>, result: &Result<JsonValue, ResponseError>) -> Result<Vec<u8>> {
	let (result, error) = match result {
		Ok(value) => (Some(value), None),
		Err(err) => (None, Some(err)),
	};
	serde_json::to_vec(&OutReply {
		jsonrpc: VERSION,
		id,
		result,
		error,
	})
	.map_err(Error::Encode)
}

/// Encodes caller parameters. `null` (as produced by `()`) means no parameters.
pub(crate) fn encode_params(params: impl Serialize) -> Result<Option<JsonValue>> {
	match serde_json::to_value(params).map_err(Error::Encode)? {
		JsonValue::Null => Ok(None),
		params @ (JsonValue::Array(_) | JsonValue::Object(_)) => Ok(Some(params)),
		other => Err(Error::Protocol(format!("parameters must be an array or an object, got {other}"))),
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use serde_json::json;

	use super::*;

	#[test]
	fn parses_calls_and_notifications() {
		let got = parse(br#"{"jsonrpc":"2.0","id":3,"method":"add","params":[1,2]}"#).unwrap();
		assert_eq!(got, Inbound::Request(Request::new(Some(3i64.into()), "add", Some(json!([1, 2])))));

		let got = parse(br#"{"jsonrpc":"2.0","method":"tick","params":null}"#).unwrap();
		assert_eq!(got, Inbound::Request(Request::new(None, "tick", None)));
	}

	#[test]
	fn parses_replies() {
		let got = parse(br#"{"jsonrpc":"2.0","id":"a","result":null}"#).unwrap();
		assert_eq!(
			got,
			Inbound::Reply(Reply {
				id: Some("a".into()),
				result: Ok(JsonValue::Null)
			})
		);

		let got = parse(br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"bad"}}"#).unwrap();
		assert_eq!(
			got,
			Inbound::Reply(Reply {
				id: None,
				result: Err(ResponseError::new(Code::PARSE_ERROR, "bad"))
			})
		);
	}

	#[rstest]
	#[case::not_json(&br#"{"jsonrpc":"2.0","#[..], Code::PARSE_ERROR, None)]
	#[case::batch(&br#"[{"jsonrpc":"2.0","method":"x"}]"#[..], Code::INVALID_REQUEST, None)]
	#[case::not_object(&br#""hello""#[..], Code::INVALID_REQUEST, None)]
	#[case::bad_version(&br#"{"jsonrpc":"1.0","id":4,"method":"x"}"#[..], Code::INVALID_REQUEST, Some(4))]
	#[case::missing_version(&br#"{"id":5,"method":"x"}"#[..], Code::INVALID_REQUEST, Some(5))]
	#[case::null_id(&br#"{"jsonrpc":"2.0","id":null,"method":"x"}"#[..], Code::INVALID_REQUEST, None)]
	#[case::float_id(&br#"{"jsonrpc":"2.0","id":1.5,"method":"x"}"#[..], Code::INVALID_REQUEST, None)]
	#[case::scalar_params(&br#"{"jsonrpc":"2.0","id":6,"method":"x","params":7}"#[..], Code::INVALID_REQUEST, Some(6))]
	#[case::empty_method(&br#"{"jsonrpc":"2.0","id":7,"method":""}"#[..], Code::INVALID_REQUEST, Some(7))]
	#[case::neither(&br#"{"jsonrpc":"2.0","id":8}"#[..], Code::INVALID_REQUEST, Some(8))]
	fn rejects_malformed_envelopes(#[case] frame: &[u8], #[case] code: Code, #[case] id: Option<i64>) {
		let rejected = parse(frame).unwrap_err();
		assert_eq!(rejected.error.code(), code);
		assert_eq!(rejected.id, id.map(RequestId::from));
	}

	#[test]
	fn encodes_requests_without_absent_members() {
		let call = encode_request(Some(&1i64.into()), "add", Some(&json!([1, 2]))).unwrap();
		assert_eq!(call, br#"{"jsonrpc":"2.0","id":1,"method":"add","params":[1,2]}"#);

		let notif = encode_request(None, "tick", None).unwrap();
		assert_eq!(notif, br#"{"jsonrpc":"2.0","method":"tick"}"#);
	}

	#[test]
	fn encodes_replies() {
		let ok = encode_reply(Some(&"q".into()), &Ok(JsonValue::Null)).unwrap();
		assert_eq!(ok, br#"{"jsonrpc":"2.0","id":"q","result":null}"#);

		let err = encode_reply(None, &Err(ResponseError::from(Code::PARSE_ERROR))).unwrap();
		assert_eq!(err, br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"parse error"}}"#);
	}

	#[test]
	fn params_must_be_structured() {
		assert_eq!(encode_params(()).unwrap(), None);
		assert_eq!(encode_params((1, "a")).unwrap(), Some(json!([1, "a"])));
		assert!(matches!(encode_params(5), Err(Error::Protocol(_))));
	}
}
