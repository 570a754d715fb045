//! Server and client settings.
//!
//! Every option struct deserializes with missing fields taken from
//! [`Default`], so hosts can embed them in their own configuration files.

use std::num::NonZeroUsize;

use serde::Deserialize;

/// Settings for a [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
	/// Maximum number of handlers executing at once. Zero is treated as one.
	pub concurrency: usize,
	/// Disables the built-in `rpc.cancel` notification.
	pub disable_builtin: bool,
}

impl Default for ServerOptions {
	fn default() -> Self {
		Self {
			concurrency: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
			disable_builtin: false,
		}
	}
}

impl ServerOptions {
	/// Sets the execution pool size, clamped to at least one.
	#[must_use]
	pub fn concurrency(mut self, n: usize) -> Self {
		self.concurrency = n.max(1);
		self
	}

	/// Enables or disables the built-in cancellation notification.
	#[must_use]
	pub fn disable_builtin(mut self, disable: bool) -> Self {
		self.disable_builtin = disable;
		self
	}

	/// Returns the effective pool size.
	pub(crate) fn slots(&self) -> usize {
		self.concurrency.max(1)
	}
}

/// Settings for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
	/// Sends a cancellation notification when a call future is dropped before
	/// its reply arrives.
	pub cancel_on_drop: bool,
}

impl Default for ClientOptions {
	fn default() -> Self {
		Self { cancel_on_drop: true }
	}
}

impl ClientOptions {
	/// Enables or disables cancel-on-drop.
	#[must_use]
	pub fn cancel_on_drop(mut self, enabled: bool) -> Self {
		self.cancel_on_drop = enabled;
		self
	}
}

/// Settings for an in-process [`Local`](crate::Local) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LocalOptions {
	/// Server half settings.
	pub server: ServerOptions,
	/// Client half settings.
	pub client: ClientOptions,
}

impl LocalOptions {
	/// Replaces the server settings.
	#[must_use]
	pub fn server(mut self, server: ServerOptions) -> Self {
		self.server = server;
		self
	}

	/// Replaces the client settings.
	#[must_use]
	pub fn client(mut self, client: ClientOptions) -> Self {
		self.client = client;
		self
	}
}
