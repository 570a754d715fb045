//! Adapters from application functions to uniform JSON-RPC handlers.
//!
//! Application code comes in a few shapes: a function of just a [`Context`],
//! one that also takes decoded parameters, and one that takes the raw
//! [`Request`]. Each shape has an explicit adapter on [`Handler`] that checks
//! the shape once, when the handler is built, and stores a uniform
//! `(Context, Request) -> Result<Value, ResponseError>` closure. Dispatch
//! never inspects types per call.
//!
//! Handlers are bound to method names through an [`Assigner`], usually a
//! [`Map`] or a [`ServiceMap`].

#![warn(missing_docs)]

mod assigner;
mod context;
mod error;
mod handler;
mod request;

pub use assigner::{Assigner, Map, ServiceMap};
pub use context::Context;
pub use error::{RegisterError, ResponseError};
pub use handler::{Handler, HandlerSpec, Json, Outcome, ParamShape, ReturnShape};
pub use jrpc_code::{Code, ContextError};
pub use request::{Request, RequestId};
pub use serde_json::Value as JsonValue;

/// Type-erased error returned by handler bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Method names starting with this prefix are reserved for the protocol.
pub const RESERVED_PREFIX: &str = "rpc.";
