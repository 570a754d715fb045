use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Channel, FrameReceiver, FrameSender, RecvError};

const CONTENT_LENGTH: &str = "Content-Length";
const CONTENT_TYPE: &str = "Content-Type";

/// Content type LSP peers advertise.
pub const LSP_CONTENT_TYPE: &str = "application/vscode-jsonrpc; charset=utf-8";

/// Header framing: every message is preceded by a `Content-Length` header block.
///
/// ```text
/// Content-Length: 17\r\n
/// Content-Type: application/vscode-jsonrpc; charset=utf-8\r\n
/// \r\n
/// {"jsonrpc":"2.0"}
/// ```
///
/// Payloads are carried verbatim, newlines included. When a content type is
/// configured it is written on every frame, and inbound frames that declare a
/// different one are rejected. Unknown headers are ignored.
///
/// A rejected frame is consumed whole before the error is reported: the rest
/// of its header block is read, and so is its body when the length is known.
/// The next `recv` starts at the following frame.
#[derive(Debug)]
pub struct Header<R, W> {
	reader: HeaderReader<R>,
	writer: HeaderWriter<W>,
}

/// The reading half of a [`Header`] channel.
#[derive(Debug)]
pub struct HeaderReader<R> {
	reader: R,
	content_type: Option<String>,
	state: ReadState,
	/// First problem found in the frame being read.
	fault: Option<String>,
	/// Current header line or body bytes.
	scratch: Vec<u8>,
}

/// The writing half of a [`Header`] channel.
#[derive(Debug)]
pub struct HeaderWriter<W> {
	writer: W,
	content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
	Headers { length: Option<usize> },
	Body { remaining: usize },
	/// Discarding the body of a rejected frame.
	Skip { remaining: usize },
}

impl ReadState {
	const START: Self = Self::Headers { length: None };
}

impl<R: AsyncRead, W> Header<BufReader<R>, W> {
	/// Creates a header channel reading from `reader` through a default sized buffer.
	pub fn new(reader: R, writer: W) -> Self {
		Self::buffered(BufReader::new(reader), writer)
	}

	/// Creates a header channel that speaks the LSP content type.
	pub fn lsp(reader: R, writer: W) -> Self {
		Self::new(reader, writer).with_content_type(LSP_CONTENT_TYPE)
	}
}

impl<R, W> Header<R, W> {
	/// Creates a header channel over an already buffered reader.
	pub fn buffered(reader: R, writer: W) -> Self {
		Self {
			reader: HeaderReader {
				reader,
				content_type: None,
				state: ReadState::START,
				fault: None,
				scratch: Vec::new(),
			},
			writer: HeaderWriter { writer, content_type: None },
		}
	}

	/// Sets the content type written on, and required of, every frame.
	pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
		let content_type = content_type.into();
		self.reader.content_type = Some(content_type.clone());
		self.writer.content_type = Some(content_type);
		self
	}

	/// Consumes the channel, returning the reader and writer.
	///
	/// Bytes of an unfinished inbound frame are discarded.
	pub fn into_inner(self) -> (R, W) {
		(self.reader.reader, self.writer.writer)
	}
}

impl<R> HeaderReader<R> {
	/// Drops the frame in progress, returning its bytes.
	fn reset(&mut self) -> Vec<u8> {
		self.state = ReadState::START;
		self.fault = None;
		std::mem::take(&mut self.scratch)
	}

	/// Ends a rejected frame.
	fn reject(&mut self) -> RecvError {
		let reason = self.fault.take().unwrap_or_default();
		self.reset();
		RecvError::Malformed(reason)
	}

	/// Applies one header line to `length`.
	fn parse_header(&self, line: &[u8], length: &mut Option<usize>) -> Result<(), String> {
		let line = std::str::from_utf8(line).map_err(|_| "header is not valid UTF-8".to_owned())?;
		let (name, value) = line.split_once(':').ok_or_else(|| format!("invalid header line {line:?}"))?;
		let (name, value) = (name.trim(), value.trim());

		if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
			let n = value.parse().map_err(|_| format!("invalid {CONTENT_LENGTH} {value:?}"))?;
			*length = Some(n);
		} else if name.eq_ignore_ascii_case(CONTENT_TYPE)
			&& let Some(want) = &self.content_type
			&& value != want.as_str()
		{
			return Err(format!("unexpected {CONTENT_TYPE} {value:?}"));
		}
		Ok(())
	}
}

impl<W: AsyncWrite + Unpin + Send> FrameSender for HeaderWriter<W> {
	async fn send(&mut self, msg: &[u8]) -> io::Result<()> {
		let mut out = format!("{CONTENT_LENGTH}: {}\r\n", msg.len()).into_bytes();
		if let Some(content_type) = &self.content_type {
			out.extend_from_slice(format!("{CONTENT_TYPE}: {content_type}\r\n").as_bytes());
		}
		out.extend_from_slice(b"\r\n");
		out.extend_from_slice(msg);

		tracing::trace!(len = msg.len(), "channel.header.send");
		self.writer.write_all(&out).await?;
		self.writer.flush().await
	}

	async fn close(&mut self) -> io::Result<()> {
		self.writer.shutdown().await
	}
}

impl<R: AsyncBufRead + Unpin + Send> FrameReceiver for HeaderReader<R> {
	async fn recv(&mut self) -> Result<Vec<u8>, RecvError> {
		loop {
			let available = match self.reader.fill_buf().await {
				Ok(buf) => buf,
				Err(source) => {
					let partial = self.reset();
					return Err(RecvError::Io { source, partial });
				}
			};
			if available.is_empty() {
				let partial = self.reset();
				return Err(RecvError::Eof { partial });
			}

			match self.state {
				ReadState::Body { remaining } => {
					let n = remaining.min(available.len());
					self.scratch.extend_from_slice(&available[..n]);
					self.reader.consume(n);
					if n == remaining {
						tracing::trace!(len = self.scratch.len(), "channel.header.recv");
						return Ok(self.reset());
					}
					self.state = ReadState::Body { remaining: remaining - n };
				}
				ReadState::Skip { remaining } => {
					let n = remaining.min(available.len());
					self.reader.consume(n);
					if n == remaining {
						return Err(self.reject());
					}
					self.state = ReadState::Skip { remaining: remaining - n };
				}
				ReadState::Headers { mut length } => {
					let Some(pos) = memchr::memchr(b'\n', available) else {
						let len = available.len();
						self.scratch.extend_from_slice(available);
						self.reader.consume(len);
						continue;
					};
					self.scratch.extend_from_slice(&available[..pos]);
					self.reader.consume(pos + 1);

					let line = std::mem::take(&mut self.scratch);
					let line = line.strip_suffix(b"\r").unwrap_or(&line);
					if !line.is_empty() {
						if let Err(reason) = self.parse_header(line, &mut length) {
							tracing::debug!(%reason, "channel.header.bad_header");
							if self.fault.is_none() {
								self.fault = Some(reason);
							}
						}
						self.state = ReadState::Headers { length };
						continue;
					}

					match (length, self.fault.is_some()) {
						(Some(0), false) => return Ok(self.reset()),
						(Some(remaining), false) => self.state = ReadState::Body { remaining },
						(Some(remaining @ 1..), true) => self.state = ReadState::Skip { remaining },
						(_, true) => return Err(self.reject()),
						(None, false) => {
							self.reset();
							return Err(RecvError::Malformed(format!("missing {CONTENT_LENGTH} header")));
						}
					}
				}
			}
		}
	}
}

impl<R, W> FrameSender for Header<R, W>
where
	R: Send,
	W: AsyncWrite + Unpin + Send,
{
	async fn send(&mut self, msg: &[u8]) -> io::Result<()> {
		self.writer.send(msg).await
	}

	async fn close(&mut self) -> io::Result<()> {
		self.writer.close().await
	}
}

impl<R, W> FrameReceiver for Header<R, W>
where
	R: AsyncBufRead + Unpin + Send,
	W: Send,
{
	async fn recv(&mut self) -> Result<Vec<u8>, RecvError> {
		self.reader.recv().await
	}
}

impl<R, W> Channel for Header<R, W>
where
	R: AsyncBufRead + Unpin + Send,
	W: AsyncWrite + Unpin + Send,
{
	type Reader = HeaderReader<R>;
	type Writer = HeaderWriter<W>;

	fn split(self) -> (Self::Reader, Self::Writer) {
		(self.reader, self.writer)
	}
}

#[cfg(test)]
mod tests {
	use tokio::io::BufReader;

	use super::*;

	fn reader(input: &[u8], capacity: usize) -> Header<BufReader<&[u8]>, tokio::io::Sink> {
		Header::buffered(BufReader::with_capacity(capacity, input), tokio::io::sink())
	}

	#[tokio::test]
	async fn send_writes_header_block() {
		let mut ch = Header::buffered(&b""[..], Vec::new()).with_content_type("text/plain");
		ch.send(b"a\nb").await.unwrap();
		assert_eq!(ch.into_inner().1, b"Content-Length: 3\r\nContent-Type: text/plain\r\n\r\na\nb");
	}

	#[tokio::test]
	async fn recv_keeps_newlines_and_ignores_unknown_headers() {
		let input = b"X-Trace: 1\r\ncontent-length: 5\r\n\r\nab\ncdContent-Length: 0\r\n\r\n";
		let mut ch = reader(input, 3);
		assert_eq!(ch.recv().await.unwrap(), b"ab\ncd");
		assert_eq!(ch.recv().await.unwrap(), b"");
		assert!(ch.recv().await.unwrap_err().is_eof());
	}

	#[tokio::test]
	async fn recv_requires_content_length() {
		let mut ch = reader(b"Content-Type: x\r\n\r\n{}", 16);
		assert!(matches!(ch.recv().await, Err(RecvError::Malformed(_))));
	}

	#[tokio::test]
	async fn recv_rejects_invalid_length() {
		let mut ch = reader(b"Content-Length: ten\r\n\r\n", 16);
		assert!(matches!(ch.recv().await, Err(RecvError::Malformed(_))));
	}

	#[tokio::test]
	async fn recv_rejects_foreign_content_type() {
		let input = b"Content-Length: 2\r\nContent-Type: text/html\r\n\r\n{}";
		let mut ch = reader(input, 16).with_content_type(LSP_CONTENT_TYPE);
		assert!(matches!(ch.recv().await, Err(RecvError::Malformed(_))));
	}

	#[tokio::test]
	async fn recv_skips_the_rest_of_a_rejected_frame() {
		let input = b"Content-Length: 7\r\nbogus line\r\nX-Trace: 1\r\n\r\n{\"a\":1}Content-Length: 2\r\n\r\n{}";
		let mut ch = reader(input, 5);
		let err = ch.recv().await.unwrap_err();
		assert!(matches!(err, RecvError::Malformed(ref reason) if reason.contains("bogus line")), "{err:?}");
		assert_eq!(ch.recv().await.unwrap(), b"{}");
		assert!(ch.recv().await.unwrap_err().is_eof());
	}

	#[tokio::test]
	async fn recv_resumes_after_foreign_content_type() {
		let input = b"Content-Type: text/html\r\nContent-Length: 4\r\n\r\nnopeContent-Length: 2\r\n\r\n{}";
		let mut ch = reader(input, 16).with_content_type(LSP_CONTENT_TYPE);
		assert!(matches!(ch.recv().await, Err(RecvError::Malformed(_))));
		assert_eq!(ch.recv().await.unwrap(), b"{}");
	}

	#[tokio::test]
	async fn recv_returns_partial_body_with_eof() {
		let mut ch = reader(b"Content-Length: 10\r\n\r\nabc", 4);
		let err = ch.recv().await.unwrap_err();
		assert!(err.is_eof());
		assert_eq!(err.partial(), b"abc");
	}

	#[tokio::test]
	async fn roundtrip_over_duplex() {
		let (a, b) = tokio::io::duplex(16);
		let (ar, aw) = tokio::io::split(a);
		let (br, bw) = tokio::io::split(b);
		let mut left = Header::lsp(ar, aw);
		let mut right = Header::lsp(br, bw);

		let payload = br#"{"jsonrpc":"2.0","method":"x","params":["line one\nline two"]}"#;
		let send = async {
			left.send(payload).await.unwrap();
			left.send(b"{}").await.unwrap();
		};
		let recv = async {
			let first = right.recv().await.unwrap();
			let second = right.recv().await.unwrap();
			(first, second)
		};
		let ((), (first, second)) = tokio::join!(send, recv);
		assert_eq!(first, payload);
		assert_eq!(second, b"{}");
	}
}
