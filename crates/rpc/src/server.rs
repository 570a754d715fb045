//! The dispatcher: executes inbound calls under a bounded pool and bridges
//! cancellation notifications to in-flight handlers.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, ready};

use futures::FutureExt;
use futures::future::{BoxFuture, CatchUnwind};
use jrpc_channel::{Channel, FrameReceiver, RecvError};
use jrpc_code::Code;
use jrpc_handler::{Assigner, Context, Handler, JsonValue, RESERVED_PREFIX, Request, RequestId, ResponseError};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::message::{self, Inbound};
use crate::outbox::{self, Outbox, Outgoing};
use crate::protocol::CANCEL_METHOD;
use crate::{Result, ServerOptions};

/// A call occupying an execution slot.
struct Slot {
	serial: u64,
	token: CancellationToken,
	/// Released when the slot is removed, by completion or cancellation.
	_permit: OwnedSemaphorePermit,
}

/// A call waiting for a free slot.
struct Queued {
	serial: u64,
	req: Request,
	handler: Handler,
}

/// Live and queued calls of one connection.
#[derive(Default)]
struct Slots {
	next_serial: u64,
	live: HashMap<RequestId, Slot>,
	queue: VecDeque<Queued>,
}

impl Slots {
	fn contains(&self, id: &RequestId) -> bool {
		self.live.contains_key(id) || self.queue.iter().any(|q| q.req.id() == Some(id))
	}

	fn enqueue(&mut self, req: Request, handler: Handler) {
		self.next_serial += 1;
		self.queue.push_back(Queued {
			serial: self.next_serial,
			req,
			handler,
		});
	}

	/// Cancels a live or queued call. A live call's slot is freed at once.
	fn cancel(&mut self, id: &RequestId) -> bool {
		if let Some(slot) = self.live.remove(id) {
			slot.token.cancel();
			return true;
		}
		if let Some(pos) = self.queue.iter().position(|q| q.req.id() == Some(id)) {
			self.queue.remove(pos);
			return true;
		}
		false
	}

	/// Removes the slot for a finished call if it still belongs to that call.
	fn finish(&mut self, id: &RequestId, serial: u64) -> bool {
		match self.live.get(id) {
			Some(slot) if slot.serial == serial => {
				self.live.remove(id);
				true
			}
			_ => false,
		}
	}

	fn clear(&mut self) {
		for (_, slot) in self.live.drain() {
			slot.token.cancel();
		}
		self.queue.clear();
	}
}

/// Cloneable control surface of a running [`Server`].
#[derive(Clone)]
pub struct ServerHandle {
	slots: Arc<Mutex<Slots>>,
	stop: CancellationToken,
}

impl std::fmt::Debug for ServerHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServerHandle").field("stopped", &self.stop.is_cancelled()).finish_non_exhaustive()
	}
}

impl ServerHandle {
	/// Asks the server loop to stop.
	///
	/// In-flight handlers are cancelled and their responses suppressed.
	pub fn stop(&self) {
		self.stop.cancel();
	}

	/// Returns true once [`ServerHandle::stop`] has been called.
	pub fn is_stopped(&self) -> bool {
		self.stop.is_cancelled()
	}

	/// Cancels the call with `id` as if the peer had sent `rpc.cancel`.
	///
	/// Returns false if no such call is queued or executing.
	pub fn cancel_request(&self, id: impl Into<RequestId>) -> bool {
		let id = id.into();
		let found = self.slots.lock().cancel(&id);
		debug!(%id, found, "rpc.server.cancel");
		found
	}

	/// Returns the number of calls currently holding an execution slot.
	pub fn active(&self) -> usize {
		self.slots.lock().live.len()
	}
}

/// The outcome of one handler task.
struct Finished {
	id: Option<RequestId>,
	serial: u64,
	result: Result<JsonValue, ResponseError>,
}

pin_project! {
	/// Handler future with panic isolation and slot bookkeeping attached.
	struct Completion {
		#[pin]
		fut: CatchUnwind<AssertUnwindSafe<BoxFuture<'static, Result<JsonValue, ResponseError>>>>,
		id: Option<RequestId>,
		method: String,
		serial: u64,
		// Held by notifications only; calls keep theirs in the slot table.
		permit: Option<OwnedSemaphorePermit>,
	}
}

impl Future for Completion {
	type Output = Finished;

	fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
		let this = self.project();
		let result = match ready!(this.fut.poll(cx)) {
			Ok(result) => result,
			Err(panic) => {
				let reason = panic
					.downcast_ref::<&str>()
					.map(|s| (*s).to_owned())
					.or_else(|| panic.downcast_ref::<String>().cloned())
					.unwrap_or_else(|| "unknown panic".to_owned());
				error!(method = %this.method, %reason, "rpc.server.panic");
				Err(ResponseError::new(Code::INTERNAL_ERROR, format!("handler panicked: {reason}")))
			}
		};
		this.permit.take();
		Poll::Ready(Finished {
			id: this.id.take(),
			serial: *this.serial,
			result,
		})
	}
}

enum Step {
	Finished(Finished),
	Aborted(JoinError),
	Stop,
	WriterClosed,
	Admit(OwnedSemaphorePermit),
	Frame(std::result::Result<Vec<u8>, RecvError>),
}

/// Serves calls read from one channel.
///
/// Inbound calls are admitted in arrival order into a pool of
/// [`ServerOptions::concurrency`] execution slots. Responses are written in
/// completion order by a writer that runs alongside the read loop, so a slow
/// or blocked write never stops inbound frames from being read. An `rpc.cancel` notification cancels the named calls'
/// contexts and frees their slots immediately, without waiting for the
/// handlers to return; whatever those handlers eventually return is discarded.
pub struct Server {
	assigner: Arc<dyn Assigner>,
	opts: ServerOptions,
	permits: Arc<Semaphore>,
	slots: Arc<Mutex<Slots>>,
	stop: CancellationToken,
	/// Parent of every handler context.
	root: CancellationToken,
	tasks: JoinSet<Finished>,
}

impl std::fmt::Debug for Server {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Server").field("opts", &self.opts).finish_non_exhaustive()
	}
}

impl Server {
	/// Creates a server dispatching to `assigner`.
	pub fn new(assigner: impl Assigner, opts: ServerOptions) -> Self {
		Self {
			assigner: Arc::new(assigner),
			permits: Arc::new(Semaphore::new(opts.slots())),
			opts,
			slots: Arc::default(),
			stop: CancellationToken::new(),
			root: CancellationToken::new(),
			tasks: JoinSet::new(),
		}
	}

	/// Returns a handle for stopping the server and cancelling calls.
	pub fn handle(&self) -> ServerHandle {
		ServerHandle {
			slots: self.slots.clone(),
			stop: self.stop.clone(),
		}
	}

	/// Serves `channel` until the peer hangs up or the server is stopped.
	///
	/// The channel is closed on return.
	///
	/// # Errors
	///
	/// - [`Error::Recv`](crate::Error::Recv) when reading from the channel fails.
	/// - [`Error::Io`](crate::Error::Io) when writing a response fails.
	pub async fn run<C: Channel>(mut self, channel: C) -> Result<()> {
		debug!(concurrency = self.opts.slots(), "rpc.server.start");
		let (mut reader, writer) = channel.split();
		let (out, queue) = mpsc::unbounded_channel();
		let (served, written) = tokio::join!(self.serve(&mut reader, out), outbox::drain(writer, queue));
		served.and(written)
	}

	/// The read loop. Dropping `outbox` on return lets the writer flush and
	/// close the channel.
	async fn serve<R: FrameReceiver>(&mut self, reader: &mut R, outbox: Outbox) -> Result<()> {
		let ret = loop {
			let queued = !self.slots.lock().queue.is_empty();
			let step = tokio::select! {
				biased;

				done = self.tasks.join_next(), if !self.tasks.is_empty() => match done {
					Some(Ok(finished)) => Step::Finished(finished),
					Some(Err(err)) => Step::Aborted(err),
					None => continue,
				},

				() = self.stop.cancelled() => Step::Stop,

				() = outbox.closed() => Step::WriterClosed,

				permit = self.permits.clone().acquire_owned(), if queued => match permit {
					Ok(permit) => Step::Admit(permit),
					Err(_) => Step::Stop,
				},

				frame = reader.recv() => Step::Frame(frame),
			};

			let reply = match step {
				Step::Finished(finished) => self.complete(finished),
				Step::Aborted(err) => {
					error!(error = %err, "rpc.server.task_aborted");
					Ok(None)
				}
				Step::Stop => {
					debug!("rpc.server.stop");
					break Ok(());
				}
				// The writer reports its own error.
				Step::WriterClosed => break Ok(()),
				Step::Admit(permit) => {
					self.admit(permit);
					Ok(None)
				}
				Step::Frame(Ok(frame)) => self.on_frame(&frame),
				Step::Frame(Err(RecvError::Eof { partial })) => {
					if !partial.is_empty() {
						warn!(len = partial.len(), "rpc.server.truncated_frame");
					}
					debug!("rpc.server.eof");
					break Ok(());
				}
				Step::Frame(Err(RecvError::Malformed(reason))) => {
					warn!(%reason, "rpc.server.malformed_frame");
					Ok(None)
				}
				Step::Frame(Err(err)) => {
					error!(error = %err, "rpc.server.recv");
					break Err(err.into());
				}
			};

			match reply {
				// A refused frame means the writer stopped; the next turn sees it.
				Ok(Some(frame)) => {
					let _ = outbox.send(Outgoing::new(frame));
				}
				Ok(None) => {}
				Err(err) => break Err(err),
			}
		};

		self.root.cancel();
		self.slots.lock().clear();
		self.tasks.shutdown().await;
		ret
	}

	fn on_frame(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>> {
		trace!(len = frame.len(), "rpc.server.frame");
		match message::parse(frame) {
			Ok(Inbound::Request(req)) => self.on_request(req),
			Ok(Inbound::Reply(reply)) => {
				warn!(id = ?reply.id, "rpc.server.unexpected_reply");
				Ok(None)
			}
			Err(rejected) => {
				warn!(code = rejected.error.code().value(), message = %rejected.error.message(), "rpc.server.reject");
				message::encode_reply(rejected.id.as_ref(), &Err(rejected.error)).map(Some)
			}
		}
	}

	fn on_request(&mut self, req: Request) -> Result<Option<Vec<u8>>> {
		let method = req.method();
		if method.starts_with(RESERVED_PREFIX) {
			if let Some(id) = req.id() {
				let err = ResponseError::new(Code::METHOD_NOT_FOUND, format!("no such method {method:?}"));
				return message::encode_reply(Some(id), &Err(err)).map(Some);
			}
			if method == CANCEL_METHOD && !self.opts.disable_builtin {
				self.on_cancel(req.params());
			} else {
				debug!(method, "rpc.server.ignored_notification");
			}
			return Ok(None);
		}

		let Some(handler) = self.assigner.assign(method) else {
			return match req.id() {
				Some(id) => {
					let err = ResponseError::new(Code::METHOD_NOT_FOUND, format!("no such method {method:?}"));
					message::encode_reply(Some(id), &Err(err)).map(Some)
				}
				None => {
					debug!(method, "rpc.server.ignored_notification");
					Ok(None)
				}
			};
		};

		let mut slots = self.slots.lock();
		if let Some(id) = req.id()
			&& slots.contains(id)
		{
			drop(slots);
			warn!(%id, "rpc.server.duplicate_id");
			let err = ResponseError::new(Code::INVALID_REQUEST, format!("duplicate request id {id}"));
			return message::encode_reply(Some(id), &Err(err)).map(Some);
		}
		trace!(method, id = ?req.id(), "rpc.server.enqueue");
		slots.enqueue(req, handler);
		Ok(None)
	}

	/// Handles `rpc.cancel` synchronously: every named call is cancelled
	/// before the next frame is read.
	fn on_cancel(&self, params: Option<&JsonValue>) {
		let ids = match params {
			Some(JsonValue::Array(ids)) => ids,
			Some(other) => {
				warn!(params = %other, "rpc.server.bad_cancel_params");
				return;
			}
			None => return,
		};
		let mut slots = self.slots.lock();
		for raw in ids {
			match RequestId::deserialize(raw) {
				Ok(id) => {
					let found = slots.cancel(&id);
					debug!(%id, found, "rpc.server.cancel");
				}
				Err(err) => warn!(error = %err, "rpc.server.bad_cancel_id"),
			}
		}
	}

	fn admit(&mut self, permit: OwnedSemaphorePermit) {
		let mut slots = self.slots.lock();
		let Some(Queued { serial, req, handler }) = slots.queue.pop_front() else {
			return;
		};
		let token = self.root.child_token();
		let id = req.id().cloned();
		let permit = match &id {
			Some(id) => {
				slots.live.insert(
					id.clone(),
					Slot {
						serial,
						token: token.clone(),
						_permit: permit,
					},
				);
				None
			}
			None => Some(permit),
		};
		drop(slots);

		debug!(id = ?id, method = req.method(), serial, "rpc.server.admit");
		let method = req.method().to_owned();
		let fut = handler.invoke(Context::new(token), req);
		self.tasks.spawn(Completion {
			fut: AssertUnwindSafe(fut).catch_unwind(),
			id,
			method,
			serial,
			permit,
		});
	}

	fn complete(&mut self, finished: Finished) -> Result<Option<Vec<u8>>> {
		let Some(id) = finished.id else {
			if let Err(err) = &finished.result {
				debug!(error = %err, "rpc.server.notification_failed");
			}
			return Ok(None);
		};
		if !self.slots.lock().finish(&id, finished.serial) {
			debug!(%id, serial = finished.serial, "rpc.server.suppress");
			return Ok(None);
		}
		debug!(%id, ok = finished.result.is_ok(), "rpc.server.complete");
		message::encode_reply(Some(&id), &finished.result).map(Some)
	}
}
