//! Outbound calls and the caller side of the cancellation bridge.

use std::collections::HashMap;
use std::sync::Arc;

use jrpc_channel::{Channel, FrameReceiver, RecvError};
use jrpc_code::Code;
use jrpc_handler::{Context, JsonValue, RequestId, ResponseError};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::message::{self, Inbound, Reply};
use crate::outbox::{self, Outbox, Outgoing};
use crate::protocol::{CANCEL_METHOD, CounterIdGen};
use crate::{ClientOptions, Error, Result};

/// A successful reply to a call.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
	id: RequestId,
	result: JsonValue,
}

impl Response {
	/// Returns the ID the call was sent with.
	pub fn id(&self) -> &RequestId {
		&self.id
	}

	/// Returns the raw result value.
	pub fn result(&self) -> &JsonValue {
		&self.result
	}

	/// Consumes the response, returning the raw result value.
	pub fn into_result(self) -> JsonValue {
		self.result
	}

	/// Decodes the result into `T`.
	///
	/// # Errors
	///
	/// [`Error::Decode`] if the result does not match `T`.
	pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
		serde_json::from_value(self.result).map_err(Error::Decode)
	}
}

type ReplyTx = oneshot::Sender<Result<Response>>;

enum Event {
	Call { id: RequestId, frame: Vec<u8>, reply: ReplyTx },
	Notify { frame: Vec<u8>, done: oneshot::Sender<Result<()>> },
	Cancel { id: RequestId },
}

struct Shared {
	events: mpsc::UnboundedSender<Event>,
	ids: Mutex<CounterIdGen>,
	opts: ClientOptions,
	stop: CancellationToken,
	task: Mutex<Option<JoinHandle<Result<()>>>>,
}

/// Issues calls over a channel.
///
/// The channel is driven by a background task that routes replies to waiting
/// callers while a queued writer sends outbound frames, so a large request
/// never holds up reading replies. Cloning a client shares that task.
///
/// A call whose [`Context`] ends before its reply arrives is abandoned: the
/// caller gets [`Error::Context`], a late reply is discarded, and an
/// `rpc.cancel` notification tells the server to cancel the remote handler
/// and free its execution slot.
#[derive(Clone)]
pub struct Client {
	shared: Arc<Shared>,
}

impl std::fmt::Debug for Client {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Client").field("opts", &self.shared.opts).finish_non_exhaustive()
	}
}

/// Cancels an outstanding call when dropped while armed.
struct PendingCall<'a> {
	id: Option<RequestId>,
	events: &'a mpsc::UnboundedSender<Event>,
	armed: bool,
}

impl PendingCall<'_> {
	fn cancel(&mut self) {
		if let Some(id) = self.id.take() {
			let _ = self.events.send(Event::Cancel { id });
		}
	}

	fn disarm(&mut self) {
		self.id = None;
	}
}

impl Drop for PendingCall<'_> {
	fn drop(&mut self) {
		if self.armed {
			self.cancel();
		}
	}
}

impl Client {
	/// Starts a client over `channel`.
	///
	/// Must be called within a tokio runtime.
	pub fn new<C: Channel + 'static>(channel: C, opts: ClientOptions) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		let stop = CancellationToken::new();
		let task = tokio::spawn(run(channel, rx, stop.clone()));
		Self {
			shared: Arc::new(Shared {
				events: tx,
				ids: Mutex::new(CounterIdGen::new()),
				opts,
				stop,
				task: Mutex::new(Some(task)),
			}),
		}
	}

	/// Calls `method` and waits for its reply.
	///
	/// `params` must serialize to an array, an object, or `null` (use `()` for
	/// no parameters).
	///
	/// # Errors
	///
	/// - [`Error::Context`] if `ctx` ends first, including before sending.
	/// - [`Error::Response`] if the server replies with an error.
	/// - [`Error::ServiceStopped`] if the client loop has stopped.
	/// - [`Error::Encode`] or [`Error::Protocol`] for unusable parameters.
	pub async fn call(&self, ctx: &Context, method: &str, params: impl Serialize) -> Result<Response> {
		if let Some(err) = ctx.err() {
			return Err(err.into());
		}
		let params = message::encode_params(params)?;
		let id = self.shared.ids.lock().next();
		let frame = message::encode_request(Some(&id), method, params.as_ref())?;

		let (tx, rx) = oneshot::channel();
		self.shared
			.events
			.send(Event::Call {
				id: id.clone(),
				frame,
				reply: tx,
			})
			.map_err(|_| Error::ServiceStopped)?;

		let mut pending = PendingCall {
			id: Some(id),
			events: &self.shared.events,
			armed: self.shared.opts.cancel_on_drop,
		};
		tokio::select! {
			biased;

			reply = rx => {
				pending.disarm();
				reply.unwrap_or(Err(Error::ServiceStopped))
			}
			err = ctx.done() => {
				debug!(method, id = ?pending.id, %err, "rpc.client.abandon");
				pending.cancel();
				Err(err.into())
			}
		}
	}

	/// Calls `method` and decodes its result into `T`.
	///
	/// # Errors
	///
	/// As [`Client::call`], plus [`Error::Decode`] if the result does not
	/// match `T`.
	pub async fn call_result<T: DeserializeOwned>(&self, ctx: &Context, method: &str, params: impl Serialize) -> Result<T> {
		self.call(ctx, method, params).await?.decode()
	}

	/// Sends a notification, returning once it has been written.
	///
	/// # Errors
	///
	/// [`Error::ServiceStopped`] if the client loop has stopped or the write fails.
	pub async fn notify(&self, method: &str, params: impl Serialize) -> Result<()> {
		let params = message::encode_params(params)?;
		let frame = message::encode_request(None, method, params.as_ref())?;
		let (tx, rx) = oneshot::channel();
		self.shared
			.events
			.send(Event::Notify { frame, done: tx })
			.map_err(|_| Error::ServiceStopped)?;
		rx.await.unwrap_or(Err(Error::ServiceStopped))
	}

	/// Stops the client loop and closes the channel.
	///
	/// Outstanding calls fail with [`Error::ServiceStopped`]. Closing twice is
	/// a no-op.
	///
	/// # Errors
	///
	/// The error that ended the loop, if any.
	pub async fn close(&self) -> Result<()> {
		self.shared.stop.cancel();
		let task = self.shared.task.lock().take();
		match task {
			Some(task) => task.await.unwrap_or(Err(Error::ServiceStopped)),
			None => Ok(()),
		}
	}
}

async fn run<C: Channel>(channel: C, events: mpsc::UnboundedReceiver<Event>, stop: CancellationToken) -> Result<()> {
	let (mut reader, writer) = channel.split();
	let (out, queue) = mpsc::unbounded_channel();
	let (routed, written) = tokio::join!(route(&mut reader, events, stop, out), outbox::drain(writer, queue));
	routed.and(written)
}

/// The read loop. Dropping `outbox` on return lets the writer flush and close
/// the channel.
async fn route<R: FrameReceiver>(
	reader: &mut R,
	mut events: mpsc::UnboundedReceiver<Event>,
	stop: CancellationToken,
	outbox: Outbox,
) -> Result<()> {
	let mut pending: HashMap<RequestId, ReplyTx> = HashMap::new();
	let ret = loop {
		tokio::select! {
			biased;

			() = stop.cancelled() => break Ok(()),

			// The writer reports its own error.
			() = outbox.closed() => break Ok(()),

			event = events.recv() => {
				let Some(event) = event else { break Ok(()) };
				if let Err(err) = on_event(&outbox, &mut pending, event) {
					error!(error = %err, "rpc.client.event");
					break Err(err);
				}
			}

			frame = reader.recv() => match frame {
				Ok(frame) => {
					if let Some(reply) = on_frame(&mut pending, &frame) {
						let _ = outbox.send(Outgoing::new(reply));
					}
				}
				Err(RecvError::Eof { partial }) => {
					if !partial.is_empty() {
						warn!(len = partial.len(), "rpc.client.truncated_frame");
					}
					debug!("rpc.client.eof");
					break Ok(());
				}
				Err(RecvError::Malformed(reason)) => warn!(%reason, "rpc.client.malformed_frame"),
				Err(err) => {
					error!(error = %err, "rpc.client.recv");
					break Err(err.into());
				}
			},
		}
	};

	if !pending.is_empty() {
		debug!(pending = pending.len(), "rpc.client.abort_pending");
	}
	ret
}

/// Queues the frame for one caller event.
///
/// A frame the outbox refuses is dropped along with its reply channel, which
/// fails the caller with [`Error::ServiceStopped`]; the loop then stops on
/// its next turn.
fn on_event(outbox: &Outbox, pending: &mut HashMap<RequestId, ReplyTx>, event: Event) -> Result<()> {
	match event {
		Event::Call { id, frame, reply } => {
			trace!(%id, "rpc.client.call");
			pending.insert(id, reply);
			let _ = outbox.send(Outgoing::new(frame));
		}
		Event::Notify { frame, done } => {
			let _ = outbox.send(Outgoing::confirmed(frame, done));
		}
		Event::Cancel { id } => {
			// A call that already has its reply is left alone.
			if pending.remove(&id).is_none() {
				return Ok(());
			}
			debug!(%id, "rpc.client.cancel");
			let frame = message::encode_request(None, CANCEL_METHOD, Some(&json!([id])))?;
			let _ = outbox.send(Outgoing::new(frame));
		}
	}
	Ok(())
}

/// Routes one inbound frame, returning a frame to write back if any.
fn on_frame(pending: &mut HashMap<RequestId, ReplyTx>, frame: &[u8]) -> Option<Vec<u8>> {
	match message::parse(frame) {
		Ok(Inbound::Reply(Reply { id: Some(id), result })) => {
			match pending.remove(&id) {
				Some(tx) => {
					let _ = tx.send(result.map(|result| Response { id, result }).map_err(Error::Response));
				}
				None => debug!(%id, "rpc.client.late_reply"),
			}
			None
		}
		Ok(Inbound::Reply(Reply { id: None, result })) => {
			warn!(error = ?result.err(), "rpc.client.orphan_reply");
			None
		}
		Ok(Inbound::Request(req)) => {
			let id = req.id()?;
			warn!(%id, method = req.method(), "rpc.client.unexpected_call");
			let err = ResponseError::new(Code::METHOD_NOT_FOUND, format!("no such method {:?}", req.method()));
			message::encode_reply(Some(id), &Err(err)).ok()
		}
		Err(rejected) => {
			warn!(message = %rejected.error.message(), "rpc.client.bad_frame");
			None
		}
	}
}
