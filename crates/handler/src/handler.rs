//! Handler adaptation.

use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use jrpc_code::Code;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::decode_params;
use crate::{BoxError, Context, Request, ResponseError};

/// What a handler takes besides its [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamShape {
	/// Nothing; parameters are ignored.
	None,
	/// The raw [`Request`].
	Request,
	/// Parameters decoded into a container type.
	Decoded {
		/// Name of the container type.
		type_name: &'static str,
	},
}

/// What a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnShape {
	/// Success or failure only; the result is `null`.
	Error,
	/// A value; the body itself cannot fail.
	Value,
	/// A value or an error.
	ValueOrError,
}

/// The validated invocation shape of a [`Handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerSpec {
	/// The second argument.
	pub params: ParamShape,
	/// The result.
	pub returns: ReturnShape,
}

/// A value a handler body can return.
///
/// Implemented for `Result<T, E>` where `T: Serialize` and `E` converts to a
/// [`BoxError`] (with `T = ()` meaning "error only"), and for value-only
/// returns: primitives, `String`, [`JsonValue`], `Vec<T>`, `Option<T>` and
/// [`Json<T>`]. The unit type is deliberately not an outcome: a handler must
/// report something.
pub trait Outcome: Send + 'static {
	/// The shape this outcome reports in a [`HandlerSpec`].
	fn shape() -> ReturnShape;

	/// Encodes the outcome as a result value or error object.
	fn into_result(self) -> Result<JsonValue, ResponseError>;
}

/// Marks a serializable value as a value-only handler result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Json<T>(pub T);

fn encode<T: Serialize>(value: &T) -> Result<JsonValue, ResponseError> {
	serde_json::to_value(value).map_err(|err| ResponseError::new(Code::INTERNAL_ERROR, format!("encoding result: {err}")))
}

impl<T, E> Outcome for Result<T, E>
where
	T: Serialize + Send + 'static,
	E: Into<BoxError> + Send + 'static,
{
	fn shape() -> ReturnShape {
		if TypeId::of::<T>() == TypeId::of::<()>() {
			ReturnShape::Error
		} else {
			ReturnShape::ValueOrError
		}
	}

	fn into_result(self) -> Result<JsonValue, ResponseError> {
		match self {
			Ok(value) => encode(&value),
			Err(err) => {
				let err: BoxError = err.into();
				match err.downcast::<ResponseError>() {
					Ok(resp) => Err(*resp),
					Err(err) => Err(ResponseError::from_error(&*err)),
				}
			}
		}
	}
}

macro_rules! value_outcome {
	($($ty:ty),* $(,)?) => {
		$(
		impl Outcome for $ty {
			fn shape() -> ReturnShape {
				ReturnShape::Value
			}

			fn into_result(self) -> Result<JsonValue, ResponseError> {
				encode(&self)
			}
		}
		)*
	};
}

value_outcome!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, String, JsonValue);

macro_rules! generic_value_outcome {
	($($ty:ident),*) => {
		$(
		impl<T: Serialize + Send + 'static> Outcome for $ty<T> {
			fn shape() -> ReturnShape {
				ReturnShape::Value
			}

			fn into_result(self) -> Result<JsonValue, ResponseError> {
				encode(&self)
			}
		}
		)*
	};
}

generic_value_outcome!(Vec, Option);

impl<T: Serialize + Send + 'static> Outcome for Json<T> {
	fn shape() -> ReturnShape {
		ReturnShape::Value
	}

	fn into_result(self) -> Result<JsonValue, ResponseError> {
		encode(&self.0)
	}
}

type Invoke = dyn Fn(Context, Request) -> BoxFuture<'static, Result<JsonValue, ResponseError>> + Send + Sync;

/// An application function adapted to the uniform invocation contract.
///
/// Built through one of three adapters, one per supported shape:
///
/// | Adapter                    | Function shape                  |
/// |----------------------------|---------------------------------|
/// | [`Handler::new`]           | `Fn(Context) -> impl Future`    |
/// | [`Handler::with_params`]   | `Fn(Context, P) -> impl Future` |
/// | [`Handler::with_request`]  | `Fn(Context, Request) -> impl Future` |
///
/// where the future resolves to an [`Outcome`]. Shapes outside this set are
/// rejected when the handler is built, which for closures means at compile
/// time. A function without a context:
///
/// ```compile_fail
/// # use jrpc_handler::Handler;
/// Handler::new(|| async { Ok::<(), std::io::Error>(()) });
/// ```
///
/// A first parameter that is not the context:
///
/// ```compile_fail
/// # use jrpc_handler::Handler;
/// Handler::with_params(|name: String, other: String| async move { name + &other });
/// ```
///
/// More than two parameters:
///
/// ```compile_fail
/// # use jrpc_handler::{Context, Handler};
/// Handler::with_params(|_: Context, a: i32, b: i32| async move { a + b });
/// ```
///
/// No result:
///
/// ```compile_fail
/// # use jrpc_handler::{Context, Handler};
/// Handler::new(|_: Context| async {});
/// ```
///
/// An error before the value, or more than two results:
///
/// ```compile_fail
/// # use jrpc_handler::{Context, Handler};
/// Handler::new(|_: Context| async { (std::io::Error::other("x"), 1.0) });
/// ```
///
/// ```compile_fail
/// # use jrpc_handler::{Context, Handler};
/// Handler::new(|_: Context| async { (0, true, std::io::Error::other("x")) });
/// ```
#[derive(Clone)]
pub struct Handler {
	spec: HandlerSpec,
	invoke: Arc<Invoke>,
}

impl fmt::Debug for Handler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Handler").field("spec", &self.spec).finish_non_exhaustive()
	}
}

impl Handler {
	/// Adapts a function of the context alone.
	///
	/// ```
	/// use jrpc_handler::{Context, Handler, ReturnShape};
	///
	/// let ping = Handler::new(|_ctx: Context| async { Ok::<_, std::io::Error>("pong".to_string()) });
	/// assert_eq!(ping.spec().returns, ReturnShape::ValueOrError);
	/// ```
	pub fn new<F, Fut>(f: F) -> Self
	where
		F: Fn(Context) -> Fut + Send + Sync + 'static,
		Fut: Future + Send + 'static,
		Fut::Output: Outcome,
	{
		let spec = HandlerSpec {
			params: ParamShape::None,
			returns: <Fut::Output as Outcome>::shape(),
		};
		Self::from_parts(spec, move |ctx, _req| f(ctx).map(Outcome::into_result).boxed())
	}

	/// Adapts a function that takes parameters decoded into `P`.
	///
	/// `P` is any deserializable container: a struct for named parameters, a
	/// `Vec<U>` or tuple for positional ones, or a primitive. Absent parameters
	/// decode from `null`, so `Option<P>` accepts calls without parameters.
	/// Decode failures are reported as [`Code::INVALID_PARAMS`] and the body is
	/// not run.
	///
	/// ```
	/// use jrpc_handler::{Context, Handler, ParamShape, ReturnShape};
	///
	/// let sum = Handler::with_params(|_ctx: Context, xs: Vec<i64>| async move { xs.iter().sum::<i64>() });
	/// assert_eq!(sum.spec().returns, ReturnShape::Value);
	/// assert!(matches!(sum.spec().params, ParamShape::Decoded { .. }));
	/// ```
	pub fn with_params<F, P, Fut>(f: F) -> Self
	where
		F: Fn(Context, P) -> Fut + Send + Sync + 'static,
		P: DeserializeOwned + Send + 'static,
		Fut: Future + Send + 'static,
		Fut::Output: Outcome,
	{
		let spec = HandlerSpec {
			params: ParamShape::Decoded {
				type_name: std::any::type_name::<P>(),
			},
			returns: <Fut::Output as Outcome>::shape(),
		};
		Self::from_parts(spec, move |ctx, req| match decode_params::<P>(req.into_params()) {
			Ok(params) => f(ctx, params).map(Outcome::into_result).boxed(),
			Err(err) => future::ready(Err(err)).boxed(),
		})
	}

	/// Adapts a function that takes the raw request.
	pub fn with_request<F, Fut>(f: F) -> Self
	where
		F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
		Fut: Future + Send + 'static,
		Fut::Output: Outcome,
	{
		let spec = HandlerSpec {
			params: ParamShape::Request,
			returns: <Fut::Output as Outcome>::shape(),
		};
		Self::from_parts(spec, move |ctx, req| f(ctx, req).map(Outcome::into_result).boxed())
	}

	fn from_parts<F>(spec: HandlerSpec, invoke: F) -> Self
	where
		F: Fn(Context, Request) -> BoxFuture<'static, Result<JsonValue, ResponseError>> + Send + Sync + 'static,
	{
		Self {
			spec,
			invoke: Arc::new(invoke),
		}
	}

	/// Returns the validated shape.
	pub fn spec(&self) -> HandlerSpec {
		self.spec
	}

	/// Invokes the handler.
	///
	/// The returned future owns everything it needs; errors from the body and
	/// from parameter decoding are both returned as [`ResponseError`]s.
	pub fn invoke(&self, ctx: Context, req: Request) -> BoxFuture<'static, Result<JsonValue, ResponseError>> {
		(self.invoke)(ctx, req)
	}
}

#[cfg(test)]
mod tests;
