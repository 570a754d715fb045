//! The single owner of a connection's writing half.
//!
//! Dispatch loops never write to the channel themselves. They queue frames
//! here and keep reading, so a peer that is itself blocked writing to us is
//! always drained.

use jrpc_channel::FrameSender;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, trace};

use crate::{Error, Result};

/// A frame waiting to be written.
#[derive(Debug)]
pub(crate) struct Outgoing {
	frame: Vec<u8>,
	/// Told the outcome once the frame is written.
	written: Option<oneshot::Sender<Result<()>>>,
}

impl Outgoing {
	pub(crate) fn new(frame: Vec<u8>) -> Self {
		Self { frame, written: None }
	}

	pub(crate) fn confirmed(frame: Vec<u8>, written: oneshot::Sender<Result<()>>) -> Self {
		Self {
			frame,
			written: Some(written),
		}
	}
}

pub(crate) type Outbox = mpsc::UnboundedSender<Outgoing>;

/// Writes queued frames in order until every [`Outbox`] is dropped, then
/// closes the writer.
///
/// Returns at the first failed write; the loops feeding the queue see it
/// through [`mpsc::UnboundedSender::closed`].
pub(crate) async fn drain<W: FrameSender>(mut writer: W, mut queue: mpsc::UnboundedReceiver<Outgoing>) -> Result<()> {
	while let Some(Outgoing { frame, written }) = queue.recv().await {
		match writer.send(&frame).await {
			Ok(()) => {
				trace!(len = frame.len(), "rpc.outbox.sent");
				if let Some(tx) = written {
					let _ = tx.send(Ok(()));
				}
			}
			Err(err) => {
				error!(error = %err, "rpc.outbox.send");
				if let Some(tx) = written {
					let _ = tx.send(Err(Error::ServiceStopped));
				}
				return Err(err.into());
			}
		}
	}
	writer.close().await.map_err(Into::into)
}
