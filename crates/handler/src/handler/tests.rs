use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;
use serde_json::json;

use super::*;
use crate::ContextError;

fn call(id: i64, method: &str, params: Option<JsonValue>) -> Request {
	Request::new(Some(id.into()), method, params)
}

fn spec(params: ParamShape, returns: ReturnShape) -> HandlerSpec {
	HandlerSpec { params, returns }
}

#[test]
fn accepts_supported_shapes() {
	let cases = [
		(
			Handler::new(|_: Context| async { Ok::<(), io::Error>(()) }),
			spec(ParamShape::None, ReturnShape::Error),
		),
		(
			Handler::with_request(|_: Context, req: Request| async move { Ok::<_, BoxError>(req.method().len()) }),
			spec(ParamShape::Request, ReturnShape::ValueOrError),
		),
		(
			Handler::new(|_: Context| async { Ok::<i32, BoxError>(0) }),
			spec(ParamShape::None, ReturnShape::ValueOrError),
		),
		(
			Handler::with_request(|_: Context, _: Request| async { 0.0f64 }),
			spec(ParamShape::Request, ReturnShape::Value),
		),
		(
			Handler::with_request(|_: Context, _: Request| async { Ok::<(), BoxError>(()) }),
			spec(ParamShape::Request, ReturnShape::Error),
		),
		(Handler::new(|_: Context| async { true }), spec(ParamShape::None, ReturnShape::Value)),
	];
	for (handler, want) in cases {
		assert_eq!(handler.spec(), want);
	}

	let slice = Handler::with_params(|_: Context, _: Vec<i32>| async { Ok::<(), BoxError>(()) });
	assert_eq!(slice.spec().returns, ReturnShape::Error);
	assert_eq!(
		slice.spec().params,
		ParamShape::Decoded {
			type_name: std::any::type_name::<Vec<i32>>()
		}
	);

	let variadic = Handler::with_params(|_: Context, words: Vec<String>| async move { Ok::<_, BoxError>(words.is_empty()) });
	assert_eq!(variadic.spec().returns, ReturnShape::ValueOrError);

	let scalar = Handler::with_params(|_: Context, n: i64| async move { n > 0 });
	assert_eq!(scalar.spec().returns, ReturnShape::Value);
}

#[tokio::test]
async fn decodes_struct_params_by_name() {
	#[derive(Deserialize)]
	struct Greet {
		name: String,
		#[serde(default)]
		excited: bool,
	}

	let handler = Handler::with_params(|_: Context, p: Greet| async move {
		let bang = if p.excited { "!" } else { "." };
		format!("hello, {}{bang}", p.name)
	});
	let got = handler
		.invoke(Context::background(), call(1, "greet", Some(json!({"name": "ada", "excited": true}))))
		.await;
	assert_eq!(got, Ok(json!("hello, ada!")));
}

#[tokio::test]
async fn decodes_positional_params() {
	let handler = Handler::with_params(|_: Context, (a, b): (i64, i64)| async move { a * b });
	let got = handler.invoke(Context::background(), call(1, "mul", Some(json!([6, 7])))).await;
	assert_eq!(got, Ok(json!(42)));
}

#[tokio::test]
async fn decode_failure_is_invalid_params_and_skips_body() {
	let ran = Arc::new(AtomicBool::new(false));
	let flag = ran.clone();
	let handler = Handler::with_params(move |_: Context, xs: Vec<i32>| {
		flag.store(true, Ordering::SeqCst);
		async move { xs.len() as u64 }
	});

	let err = handler
		.invoke(Context::background(), call(1, "len", Some(json!({"not": "a list"}))))
		.await
		.unwrap_err();
	assert_eq!(err.code(), Code::INVALID_PARAMS);
	assert!(err.message().starts_with("invalid parameters"));
	assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn optional_params_accept_absent_params() {
	let handler = Handler::with_params(|_: Context, p: Option<Vec<i32>>| async move { p.map_or(0, |v| v.len() as u64) });
	assert_eq!(handler.invoke(Context::background(), call(1, "n", None)).await, Ok(json!(0)));
}

#[tokio::test]
async fn error_only_handlers_return_null() {
	let handler = Handler::new(|_: Context| async { Ok::<(), io::Error>(()) });
	assert_eq!(handler.invoke(Context::background(), call(1, "x", None)).await, Ok(JsonValue::Null));
}

#[tokio::test]
async fn application_errors_are_classified() {
	let plain = Handler::new(|_: Context| async { Err::<(), _>(io::Error::other("disk on fire")) });
	let err = plain.invoke(Context::background(), call(1, "x", None)).await.unwrap_err();
	assert_eq!(err.code(), Code::SYSTEM_ERROR);
	assert_eq!(err.message(), "disk on fire");

	let coded = Handler::new(|_: Context| async { Err::<(), _>(Code::new(-1).err().unwrap()) });
	let err = coded.invoke(Context::background(), call(1, "x", None)).await.unwrap_err();
	assert_eq!(err.code(), Code::new(-1));

	let custom = Handler::new(|_: Context| async {
		Err::<i32, _>(ResponseError::new(Code::new(77), "nope").with_data(json!({"why": "because"})))
	});
	let err = custom.invoke(Context::background(), call(1, "x", None)).await.unwrap_err();
	assert_eq!(err.code(), Code::new(77));
	assert_eq!(err.data(), Some(&json!({"why": "because"})));
}

#[tokio::test]
async fn handlers_observe_context_cancellation() {
	let handler = Handler::new(|ctx: Context| async move { Err::<(), _>(ctx.done().await) });
	let ctx = Context::background();
	let fut = handler.invoke(ctx.child(), call(1, "wait", None));
	ctx.cancel();
	let err = fut.await.unwrap_err();
	assert_eq!(err.code(), Code::CANCELLED);
	assert_eq!(err, ResponseError::from(ContextError::Cancelled));
}

#[tokio::test]
async fn request_handlers_see_raw_request() {
	let handler = Handler::with_request(|_: Context, req: Request| async move {
		Json(json!({
			"method": req.method(),
			"id": req.id().cloned(),
			"params": req.params().cloned(),
		}))
	});
	let got = handler.invoke(Context::background(), call(9, "echo", Some(json!([1])))).await.unwrap();
	assert_eq!(got, json!({"method": "echo", "id": 9, "params": [1]}));
}

#[test]
fn handlers_debug_without_closure() {
	let handler = Handler::new(|_: Context| async { 1u8 });
	assert!(format!("{handler:?}").starts_with("Handler { spec: HandlerSpec"));
}
