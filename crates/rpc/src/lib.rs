//! JSON-RPC 2.0 over framed channels.
//!
//! This crate ties the workspace together:
//! * [`Server`]: reads calls from a [`Channel`], executes them under a bounded
//!   pool of execution slots and writes their replies.
//! * [`Client`]: issues calls and notifications and forwards caller-side
//!   cancellation to the server as `rpc.cancel` notifications.
//! * [`Local`]: a client and server joined by an in-memory stream.
//!
//! ```no_run
//! use jrpc::{Context, Handler, Local, LocalOptions, Map};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let methods = Map::new().with("Add", Handler::with_params(|_: Context, (a, b): (i64, i64)| async move { a + b }))?;
//! let local = Local::new(methods, LocalOptions::default());
//! let sum: i64 = local.client().call_result(&Context::background(), "Add", (2, 3)).await?;
//! assert_eq!(sum, 5);
//! local.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod client;
mod error;
mod local;
mod message;
mod options;
mod outbox;
pub mod protocol;
mod server;

pub use client::{Client, Response};
pub use error::{Error, Result};
pub use jrpc_channel::{Channel, FrameReceiver, FrameSender, Header, Line, RecvError};
pub use jrpc_code::{Code, CodeError, ContextError, ErrCode};
pub use jrpc_handler::{Assigner, Context, Handler, Json, JsonValue, Map, Request, RequestId, ResponseError, ServiceMap};
pub use local::Local;
pub use options::{ClientOptions, LocalOptions, ServerOptions};
pub use server::{Server, ServerHandle};
