use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Channel, FrameReceiver, FrameSender, RecvError};

const TERMINATOR: u8 = b'\n';

/// Line framing: every message is terminated by a single `\n`.
///
/// Outbound messages have every embedded `\n` removed before the terminator is
/// appended. This is lossy stripping, not escaping, so payload encodings must
/// not depend on literal newlines (compact JSON never emits one).
///
/// Inbound lines are accumulated in a growable scratch buffer that outlives a
/// single `recv` call. Lines longer than the reader's internal buffer are
/// never truncated.
#[derive(Debug)]
pub struct Line<R, W> {
	reader: LineReader<R>,
	writer: LineWriter<W>,
}

/// The reading half of a [`Line`] channel.
#[derive(Debug)]
pub struct LineReader<R> {
	reader: R,
	/// Bytes of the current, not yet terminated line.
	scratch: Vec<u8>,
}

/// The writing half of a [`Line`] channel.
#[derive(Debug)]
pub struct LineWriter<W> {
	writer: W,
}

impl<R: AsyncRead, W> Line<BufReader<R>, W> {
	/// Creates a line channel reading from `reader` through a default sized buffer.
	pub fn new(reader: R, writer: W) -> Self {
		Self::buffered(BufReader::new(reader), writer)
	}
}

impl<R, W> Line<R, W> {
	/// Creates a line channel over an already buffered reader.
	pub fn buffered(reader: R, writer: W) -> Self {
		Self {
			reader: LineReader {
				reader,
				scratch: Vec::new(),
			},
			writer: LineWriter { writer },
		}
	}

	/// Consumes the channel, returning the reader and writer.
	///
	/// Bytes of an unfinished inbound line are discarded.
	pub fn into_inner(self) -> (R, W) {
		(self.reader.reader, self.writer.writer)
	}
}

/// Builds the outbound frame for `msg`: every terminator byte removed, one appended.
pub(crate) fn frame(msg: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(msg.len() + 1);
	let mut start = 0;
	for pos in memchr::memchr_iter(TERMINATOR, msg) {
		out.extend_from_slice(&msg[start..pos]);
		start = pos + 1;
	}
	out.extend_from_slice(&msg[start..]);
	out.push(TERMINATOR);
	out
}

impl<W: AsyncWrite + Unpin + Send> FrameSender for LineWriter<W> {
	async fn send(&mut self, msg: &[u8]) -> io::Result<()> {
		let out = frame(msg);
		tracing::trace!(len = out.len(), "channel.line.send");
		self.writer.write_all(&out).await?;
		self.writer.flush().await
	}

	async fn close(&mut self) -> io::Result<()> {
		self.writer.shutdown().await
	}
}

impl<R: AsyncBufRead + Unpin + Send> FrameReceiver for LineReader<R> {
	async fn recv(&mut self) -> Result<Vec<u8>, RecvError> {
		loop {
			let available = match self.reader.fill_buf().await {
				Ok(buf) => buf,
				Err(source) => {
					return Err(RecvError::Io {
						source,
						partial: std::mem::take(&mut self.scratch),
					});
				}
			};
			if available.is_empty() {
				return Err(RecvError::Eof {
					partial: std::mem::take(&mut self.scratch),
				});
			}

			match memchr::memchr(TERMINATOR, available) {
				Some(pos) => {
					self.scratch.extend_from_slice(&available[..pos]);
					self.reader.consume(pos + 1);
					tracing::trace!(len = self.scratch.len(), "channel.line.recv");
					return Ok(std::mem::take(&mut self.scratch));
				}
				None => {
					let len = available.len();
					self.scratch.extend_from_slice(available);
					self.reader.consume(len);
				}
			}
		}
	}
}

impl<R, W> FrameSender for Line<R, W>
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

impl<R, W> FrameReceiver for Line<R, W>
where
	R: AsyncBufRead + Unpin + Send,
	W: Send,
{
	async fn recv(&mut self) -> Result<Vec<u8>, RecvError> {
		self.reader.recv().await
	}
}

impl<R, W> Channel for Line<R, W>
where
	R: AsyncBufRead + Unpin + Send,
	W: AsyncWrite + Unpin + Send,
{
	type Reader = LineReader<R>;
	type Writer = LineWriter<W>;

	fn split(self) -> (Self::Reader, Self::Writer) {
		(self.reader, self.writer)
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;
	use tokio::io::BufReader;

	use super::*;

	fn reader(input: &[u8], capacity: usize) -> Line<BufReader<&[u8]>, tokio::io::Sink> {
		Line::buffered(BufReader::with_capacity(capacity, input), tokio::io::sink())
	}

	async fn sent(msg: &[u8]) -> Vec<u8> {
		let mut ch = Line::buffered(&b""[..], Vec::new());
		ch.send(msg).await.unwrap();
		ch.into_inner().1
	}

	fn block_on<F: std::future::Future>(fut: F) -> F::Output {
		tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(fut)
	}

	#[tokio::test]
	async fn send_strips_every_terminator() {
		assert_eq!(sent(b"a\nb\n\nc").await, b"abc\n");
		assert_eq!(sent(b"").await, b"\n");
		assert_eq!(sent(b"\n\n").await, b"\n");
	}

	#[tokio::test]
	async fn send_keeps_carriage_returns_and_multibyte_text() {
		assert_eq!(sent("é\r\nü".as_bytes()).await, "é\rü\n".as_bytes());
	}

	#[tokio::test]
	async fn recv_splits_lines() {
		let mut ch = reader(b"one\n\ntwo\n", 64);
		assert_eq!(ch.recv().await.unwrap(), b"one");
		assert_eq!(ch.recv().await.unwrap(), b"");
		assert_eq!(ch.recv().await.unwrap(), b"two");
		assert!(ch.recv().await.unwrap_err().is_eof());
	}

	#[tokio::test]
	async fn recv_accumulates_past_buffer_capacity() {
		let long = "x".repeat(1000);
		let input = format!("{long}\nshort\n");
		let mut ch = reader(input.as_bytes(), 4);
		assert_eq!(ch.recv().await.unwrap(), long.as_bytes());
		assert_eq!(ch.recv().await.unwrap(), b"short");
	}

	#[tokio::test]
	async fn recv_returns_partial_line_with_eof() {
		let mut ch = reader(b"done\npartial", 3);
		assert_eq!(ch.recv().await.unwrap(), b"done");

		let err = ch.recv().await.unwrap_err();
		assert!(err.is_eof());
		assert_eq!(err.partial(), b"partial");

		let err = ch.recv().await.unwrap_err();
		assert!(err.is_eof());
		assert!(err.partial().is_empty());
	}

	#[tokio::test]
	async fn recv_on_empty_stream_is_empty_eof() {
		let err = reader(b"", 8).recv().await.unwrap_err();
		assert!(matches!(err, RecvError::Eof { ref partial } if partial.is_empty()));
	}

	#[tokio::test]
	async fn close_shuts_down_writer() {
		let (client, mut server) = tokio::io::duplex(64);
		let (rd, wr) = tokio::io::split(client);
		let (_, mut writer) = Line::new(rd, wr).split();
		writer.send(b"bye").await.unwrap();
		writer.close().await.unwrap();

		let mut buf = Vec::new();
		tokio::io::AsyncReadExt::read_to_end(&mut server, &mut buf).await.unwrap();
		assert_eq!(buf, b"bye\n");
	}

	proptest! {
		#[test]
		fn roundtrip_removes_only_terminators(msg in prop::collection::vec(any::<u8>(), 0..256)) {
			let framed = block_on(sent(&msg));
			let got = block_on(async { reader(&framed, 7).recv().await.unwrap() });
			let want: Vec<u8> = msg.iter().copied().filter(|&b| b != b'\n').collect();
			prop_assert_eq!(got, want);
		}

		#[test]
		fn roundtrip_is_identity_without_terminators(msg in "[^\n]{0,128}") {
			let framed = block_on(sent(msg.as_bytes()));
			let got = block_on(async { reader(&framed, 5).recv().await.unwrap() });
			prop_assert_eq!(got, msg.as_bytes());
		}
	}
}
