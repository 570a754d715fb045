use jrpc_channel::Line;
use jrpc_handler::Assigner;
use tokio::task::JoinHandle;

use crate::{Client, Error, LocalOptions, Result, Server, ServerHandle};

const PIPE_CAPACITY: usize = 64 * 1024;

/// A client and a server connected in-process.
///
/// Both halves speak [`Line`] framing over a [`tokio::io::duplex`] stream, so
/// every call goes through the same encode, frame, dispatch and decode path as
/// a remote one.
#[derive(Debug)]
pub struct Local {
	client: Client,
	server: ServerHandle,
	task: JoinHandle<Result<()>>,
}

impl Local {
	/// Starts a server for `assigner` on a spawned task and connects a client.
	///
	/// Must be called within a tokio runtime.
	pub fn new(assigner: impl Assigner, opts: LocalOptions) -> Self {
		let (client_io, server_io) = tokio::io::duplex(PIPE_CAPACITY);
		let (server_read, server_write) = tokio::io::split(server_io);
		let (client_read, client_write) = tokio::io::split(client_io);

		let server = Server::new(assigner, opts.server);
		let handle = server.handle();
		let task = tokio::spawn(server.run(Line::new(server_read, server_write)));
		let client = Client::new(Line::new(client_read, client_write), opts.client);
		Self {
			client,
			server: handle,
			task,
		}
	}

	/// Returns the client half.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Returns the server's control handle.
	pub fn server(&self) -> &ServerHandle {
		&self.server
	}

	/// Closes the client and waits for the server to finish.
	///
	/// # Errors
	///
	/// The first error reported by either half.
	pub async fn close(self) -> Result<()> {
		let client = self.client.close().await;
		let server = self.task.await.unwrap_or(Err(Error::ServiceStopped));
		client.and(server)
	}
}
