//! Message framing over async byte streams.
//!
//! A [`Channel`] turns an unbounded byte stream into a sequence of discrete
//! messages and back. It has no knowledge of RPC semantics: payloads are opaque
//! byte blobs. Two framings are provided:
//!
//! * [`Line`]: one message per `\n`-terminated line.
//! * [`Header`]: `Content-Length` framed messages, as spoken by LSP peers.

#![warn(missing_docs)]

use std::future::Future;
use std::io;

mod header;
mod line;

pub use header::{Header, HeaderReader, HeaderWriter, LSP_CONTENT_TYPE};
pub use line::{Line, LineReader, LineWriter};

/// The writing half of a framed stream.
pub trait FrameSender: Send {
	/// Sends one message.
	///
	/// Errors from the underlying writer are returned unmodified.
	fn send(&mut self, msg: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

	/// Releases the underlying writer.
	///
	/// Idempotency and concurrent-close behavior are those of the writer.
	fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// The reading half of a framed stream.
pub trait FrameReceiver: Send {
	/// Receives the next message with its framing removed.
	///
	/// Implementations keep partially read frames inside the receiver, so
	/// dropping a pending `recv` future loses no bytes.
	fn recv(&mut self) -> impl Future<Output = Result<Vec<u8>, RecvError>> + Send;
}

/// A framed, bidirectional message stream.
///
/// `recv` takes `&mut self`, so a channel has exactly one reader at a time.
/// Dispatch loops [`split`](Channel::split) the channel so that a pending
/// write never stalls reading, and route every write through one owner of
/// the writing half.
pub trait Channel: FrameSender + FrameReceiver {
	/// The reading half.
	type Reader: FrameReceiver;
	/// The writing half.
	type Writer: FrameSender;

	/// Separates the channel into halves that can be driven concurrently.
	fn split(self) -> (Self::Reader, Self::Writer);
}

/// Failure to receive a complete message.
///
/// Stream failures carry whatever bytes of the unfinished frame were
/// accumulated before the failure, which is empty when nothing was read.
#[derive(Debug, thiserror::Error)]
pub enum RecvError {
	/// The stream ended before a frame terminator was seen.
	#[error("end of stream")]
	Eof {
		/// Bytes of the unterminated trailing frame.
		partial: Vec<u8>,
	},
	/// The underlying reader failed.
	#[error("read failed: {source}")]
	Io {
		/// The reader's error.
		#[source]
		source: io::Error,
		/// Bytes of the frame in progress.
		partial: Vec<u8>,
	},
	/// The peer sent a frame that violates the framing rules.
	#[error("malformed frame: {0}")]
	Malformed(String),
}

impl RecvError {
	/// Returns the bytes accumulated before the failure.
	pub fn partial(&self) -> &[u8] {
		match self {
			Self::Eof { partial } | Self::Io { partial, .. } => partial,
			Self::Malformed(_) => &[],
		}
	}

	/// Consumes the error, returning the bytes accumulated before the failure.
	pub fn into_partial(self) -> Vec<u8> {
		match self {
			Self::Eof { partial } | Self::Io { partial, .. } => partial,
			Self::Malformed(_) => Vec::new(),
		}
	}

	/// Returns true if the stream reached its end.
	pub fn is_eof(&self) -> bool {
		matches!(self, Self::Eof { .. })
	}
}
