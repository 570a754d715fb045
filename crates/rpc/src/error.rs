use std::io;

use jrpc_channel::RecvError;
use jrpc_code::ContextError;
use jrpc_handler::ResponseError;

/// Errors raised by clients and servers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// The client or server loop is no longer running.
	#[error("service stopped")]
	ServiceStopped,
	/// Writing to the channel failed.
	#[error("{0}")]
	Io(#[from] io::Error),
	/// Reading from the channel failed.
	#[error("{0}")]
	Recv(#[from] RecvError),
	/// An outbound value could not be encoded.
	#[error("encoding failed: {0}")]
	Encode(#[source] serde_json::Error),
	/// A result could not be decoded into the requested type.
	#[error("decoding failed: {0}")]
	Decode(#[source] serde_json::Error),
	/// The peer replied with an error object.
	#[error("{0}")]
	Response(#[from] ResponseError),
	/// The caller's context ended before the reply arrived.
	#[error("{0}")]
	Context(#[from] ContextError),
	/// The peer or the caller violated the protocol.
	#[error("protocol error: {0}")]
	Protocol(String),
}

/// Result alias for client and server operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
	use jrpc_code::Code;

	use super::*;

	#[test]
	fn context_errors_classify_through_the_source_chain() {
		let err = Error::from(ContextError::DeadlineExceeded);
		assert_eq!(Code::from_error(Some(&err)), Code::DEADLINE_EXCEEDED);
		assert_eq!(err.to_string(), "context deadline exceeded");
	}

	#[rstest::rstest]
	#[case::remote_reserved(Error::from(ResponseError::from(Code::METHOD_NOT_FOUND)), Code::METHOD_NOT_FOUND)]
	#[case::remote_application(Error::from(ResponseError::new(Code::new(42), "answer")), Code::new(42))]
	#[case::cancelled(Error::from(ContextError::Cancelled), Code::CANCELLED)]
	#[case::stopped(Error::ServiceStopped, Code::SYSTEM_ERROR)]
	#[case::io(Error::from(io::Error::from(io::ErrorKind::BrokenPipe)), Code::SYSTEM_ERROR)]
	fn errors_classify_by_the_code_they_carry(#[case] err: Error, #[case] want: Code) {
		assert_eq!(Code::from_error(Some(&err)), want);
		// `is` only matches a code the error actually carries.
		assert_eq!(want.is(&err), want != Code::SYSTEM_ERROR);
	}

	#[test]
	fn remote_codes_are_not_confused_with_others() {
		let err = Error::from(ResponseError::from(Code::METHOD_NOT_FOUND));
		assert!(!Code::INVALID_PARAMS.is(&err));
		assert!(!Code::SYSTEM_ERROR.is(&err));
	}

	#[test]
	fn response_errors_display_their_code() {
		let err = Error::from(ResponseError::new(Code::METHOD_NOT_FOUND, "no such method \"x\""));
		assert_eq!(err.to_string(), "[-32601] no such method \"x\"");
	}
}
