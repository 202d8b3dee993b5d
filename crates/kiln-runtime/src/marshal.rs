//! Request marshalling into script values, and response extraction back out.
//!
//! Both directions run inside the execution context. Extraction produces a
//! plain Rust [`ScriptResponse`] so the context can be torn down before the
//! collector decides what the transport sees.

use kiln_core::{HandlerContract, HeaderMap, Request};
use rquickjs::convert::Coerced;
use rquickjs::{Array, Ctx, FromJs, Function, IntoJs, Object, Value};

use crate::codec::{byte_buffer, bytes_from_js, encode_text};
use crate::surface::Surface;

/// Arguments for one call of the entry point.
pub enum HandlerArgs<'js> {
    /// Zero-arg: the request is not visible.
    None,
    /// Single-arg: a fresh copy of the body bytes.
    Body(Value<'js>),
    /// Two-arg: read-only request plus the one mutable response.
    RequestResponse {
        request: Object<'js>,
        response: Object<'js>,
    },
}

impl<'js> HandlerArgs<'js> {
    /// Build the arguments `contract` expects from `request`.
    ///
    /// Only copies out of `request`; the transport value is never touched.
    pub fn marshal(
        ctx: &Ctx<'js>,
        surface: &Surface<'js>,
        contract: HandlerContract,
        request: &Request,
    ) -> rquickjs::Result<Self> {
        Ok(match contract {
            HandlerContract::ZeroArg => HandlerArgs::None,
            HandlerContract::SingleArg => {
                let body = byte_buffer(ctx, request.body())?;
                HandlerArgs::Body(body.into_js(ctx)?)
            }
            HandlerContract::TwoArg => HandlerArgs::RequestResponse {
                request: request_value(ctx, surface, request)?,
                response: response_value(ctx)?,
            },
        })
    }

    /// Call `entry` with these arguments.
    pub fn call(&self, entry: &Function<'js>) -> rquickjs::Result<Value<'js>> {
        match self {
            HandlerArgs::None => entry.call(()),
            HandlerArgs::Body(body) => entry.call((body.clone(),)),
            HandlerArgs::RequestResponse { request, response } => {
                entry.call((request.clone(), response.clone()))
            }
        }
    }

    /// The response value handed to the script, if this contract has one.
    pub fn response(&self) -> Option<&Object<'js>> {
        match self {
            HandlerArgs::RequestResponse { response, .. } => Some(response),
            _ => None,
        }
    }
}

/// Frozen `{ method, uri, headers, body }`.
pub fn request_value<'js>(
    ctx: &Ctx<'js>,
    surface: &Surface<'js>,
    request: &Request,
) -> rquickjs::Result<Object<'js>> {
    let headers = Object::new(ctx.clone())?;
    for (name, values) in request.headers().iter() {
        let list = Array::new(ctx.clone())?;
        for (i, value) in values.iter().enumerate() {
            list.set(i, value.as_str())?;
        }
        headers.set(name, surface.freeze(list)?)?;
    }

    let value = Object::new(ctx.clone())?;
    value.set("method", request.method())?;
    value.set("uri", request.uri())?;
    value.set("headers", surface.freeze(headers)?)?;
    value.set("body", byte_buffer(ctx, request.body())?)?;
    surface.freeze(value)
}

/// Mutable `{ status: 200, headers: {}, body: null }`.
pub fn response_value<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
    let value = Object::new(ctx.clone())?;
    value.set("status", 200)?;
    value.set("headers", Object::new(ctx.clone())?)?;
    value.set("body", Value::new_null(ctx.clone()))?;
    Ok(value)
}

/// Final state of a two-arg response value, detached from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// `None` when the script left `body` null or undefined.
    pub body: Option<Vec<u8>>,
}

impl Default for ScriptResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

impl ScriptResponse {
    /// Read the response object the script mutated.
    ///
    /// `Err` carries a message for logs; the invocation is then failed.
    pub fn extract<'js>(ctx: &Ctx<'js>, response: &Object<'js>) -> Result<Self, String> {
        let status = read_status(&field(response, "status")?)?;
        let headers = read_headers(ctx, &field(response, "headers")?)?;
        let body_value = field(response, "body")?;
        let body = if is_unset(&body_value) {
            None
        } else {
            let bytes = body_bytes(ctx, &body_value)
                .ok_or("response.body must be a string, Uint8Array or ArrayBuffer")?;
            Some(bytes)
        };
        Ok(Self {
            status,
            headers,
            body,
        })
    }
}

/// Body bytes from a handler's settled return value.
///
/// Anything other than a string or byte buffer is ignored.
pub fn returned_body<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Option<Vec<u8>> {
    if is_unset(value) {
        return None;
    }
    body_bytes(ctx, value)
}

fn field<'js>(object: &Object<'js>, name: &str) -> Result<Value<'js>, String> {
    object
        .get(name)
        .map_err(|e| format!("reading response.{name}: {e}"))
}

fn is_unset(value: &Value<'_>) -> bool {
    value.is_null() || value.is_undefined()
}

fn body_bytes<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Option<Vec<u8>> {
    if let Some(text) = value.as_string() {
        return text.to_string().ok().map(|s| encode_text(&s));
    }
    bytes_from_js(ctx, value)
}

fn read_status(value: &Value<'_>) -> Result<u16, String> {
    let number = value
        .as_number()
        .ok_or_else(|| format!("response.status must be a number, got {:?}", value.type_of()))?;
    if number.fract() != 0.0 || !(100.0..=599.0).contains(&number) {
        return Err(format!("response.status {number} is not an integer in 100..=599"));
    }
    Ok(number as u16)
}

fn read_headers<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();
    if is_unset(value) {
        return Ok(headers);
    }
    let object = value
        .as_object()
        .ok_or("response.headers must be an object")?;
    for prop in object.props::<String, Value>() {
        let (name, value) = prop.map_err(|e| format!("reading response.headers: {e}"))?;
        if let Some(list) = value.as_array() {
            for item in list.iter::<Value>() {
                let item = item.map_err(|e| format!("reading response.headers.{name}: {e}"))?;
                headers.append(&name, coerce(ctx, item, &name)?);
            }
        } else if !is_unset(&value) {
            headers.append(&name, coerce(ctx, value, &name)?);
        }
    }
    Ok(headers)
}

fn coerce<'js>(ctx: &Ctx<'js>, value: Value<'js>, name: &str) -> Result<String, String> {
    Coerced::<String>::from_js(ctx, value)
        .map(|c| c.0)
        .map_err(|e| format!("response.headers.{name}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::OutputSink;
    use bytes::Bytes;

    fn in_context<R>(f: impl for<'js> FnOnce(Ctx<'js>, Surface<'js>) -> R) -> R {
        let rt = rquickjs::Runtime::new().unwrap();
        let context = rquickjs::Context::full(&rt).unwrap();
        let sink = OutputSink::default();
        context.with(|ctx| {
            let surface = Surface::install(&ctx, &sink).unwrap();
            f(ctx, surface)
        })
    }

    fn post_ping() -> Request {
        let headers: HeaderMap = [("Content-Type", "text/plain"), ("X-Tag", "a"), ("x-tag", "b")]
            .into_iter()
            .collect();
        Request::new("POST", "/echo?q=1", headers, Bytes::from_static(b"ping"))
    }

    // ── Request side ────────────────────────────────────────────────

    #[test]
    fn zero_arg_gets_nothing() {
        in_context(|ctx, surface| {
            let args =
                HandlerArgs::marshal(&ctx, &surface, HandlerContract::ZeroArg, &post_ping()).unwrap();
            assert!(matches!(args, HandlerArgs::None));
            assert!(args.response().is_none());
        });
    }

    #[test]
    fn single_arg_gets_body_bytes() {
        in_context(|ctx, surface| {
            let args =
                HandlerArgs::marshal(&ctx, &surface, HandlerContract::SingleArg, &post_ping())
                    .unwrap();
            let HandlerArgs::Body(body) = &args else {
                panic!("expected body argument");
            };
            assert_eq!(bytes_from_js(&ctx, body), Some(b"ping".to_vec()));
        });
    }

    #[test]
    fn two_arg_request_is_read_only() {
        in_context(|ctx, surface| {
            let request = request_value(&ctx, &surface, &post_ping()).unwrap();
            ctx.globals().set("req", request).unwrap();
            let report: String = ctx
                .eval(
                    r#"
                    req.method = "GET";
                    req.headers["x-new"] = ["1"];
                    [req.method, req.uri, req.headers["content-type"][0],
                     req.headers["x-tag"].join("|"), typeof req.headers["x-new"],
                     new TextDecoder().decode(req.body)].join(" ")
                    "#,
                )
                .unwrap();
            assert_eq!(report, "POST /echo?q=1 text/plain a|b undefined ping");
        });
    }

    #[test]
    fn body_copy_does_not_alias_transport_request() {
        let request = post_ping();
        in_context(|ctx, surface| {
            let value = request_value(&ctx, &surface, &request).unwrap();
            ctx.globals().set("req", value).unwrap();
            ctx.eval::<(), _>("req.body[0] = 0").unwrap();
        });
        assert_eq!(request.body().as_ref(), b"ping");
    }

    // ── Response side ───────────────────────────────────────────────

    #[test]
    fn untouched_response_has_defaults() {
        in_context(|ctx, _| {
            let response = response_value(&ctx).unwrap();
            let extracted = ScriptResponse::extract(&ctx, &response).unwrap();
            assert_eq!(extracted, ScriptResponse::default());
        });
    }

    #[test]
    fn mutations_are_read_back() {
        in_context(|ctx, _| {
            let response = response_value(&ctx).unwrap();
            ctx.globals().set("res", response.clone()).unwrap();
            ctx.eval::<(), _>(
                r#"
                res.status = 418;
                res.headers["Content-Type"] = "text/plain";
                res.headers["set-cookie"] = ["a=1", "b=2"];
                res.headers["x-count"] = 3;
                res.body = "short and stout";
                "#,
            )
            .unwrap();
            let extracted = ScriptResponse::extract(&ctx, &response).unwrap();
            assert_eq!(extracted.status, 418);
            assert_eq!(extracted.headers.get("content-type"), Some("text/plain"));
            assert_eq!(extracted.headers.get_all("set-cookie"), ["a=1", "b=2"]);
            assert_eq!(extracted.headers.get("x-count"), Some("3"));
            assert_eq!(extracted.body.as_deref(), Some(&b"short and stout"[..]));
        });
    }

    #[test]
    fn byte_bodies_are_accepted() {
        in_context(|ctx, _| {
            let response = response_value(&ctx).unwrap();
            ctx.globals().set("res", response.clone()).unwrap();
            ctx.eval::<(), _>("res.body = new Uint8Array([1, 2])").unwrap();
            let extracted = ScriptResponse::extract(&ctx, &response).unwrap();
            assert_eq!(extracted.body, Some(vec![1, 2]));

            ctx.eval::<(), _>("res.body = new Uint8Array([3]).buffer").unwrap();
            let extracted = ScriptResponse::extract(&ctx, &response).unwrap();
            assert_eq!(extracted.body, Some(vec![3]));
        });
    }

    #[test]
    fn invalid_status_is_rejected() {
        in_context(|ctx, _| {
            let response = response_value(&ctx).unwrap();
            ctx.globals().set("res", response.clone()).unwrap();
            for bad in ["99", "600", "200.5", "'200'"] {
                ctx.eval::<(), _>(format!("res.status = {bad}")).unwrap();
                assert!(ScriptResponse::extract(&ctx, &response).is_err(), "{bad}");
            }
        });
    }

    #[test]
    fn unsupported_body_is_rejected() {
        in_context(|ctx, _| {
            let response = response_value(&ctx).unwrap();
            ctx.globals().set("res", response.clone()).unwrap();
            ctx.eval::<(), _>("res.body = { not: 'bytes' }").unwrap();
            let err = ScriptResponse::extract(&ctx, &response).unwrap_err();
            assert!(err.contains("response.body"));
        });
    }

    #[test]
    fn return_values_only_count_when_bytes_or_text() {
        in_context(|ctx, _| {
            let text: Value = ctx.eval("'done'").unwrap();
            assert_eq!(returned_body(&ctx, &text), Some(b"done".to_vec()));
            let number: Value = ctx.eval("42").unwrap();
            assert_eq!(returned_body(&ctx, &number), None);
            let nothing: Value = ctx.eval("undefined").unwrap();
            assert_eq!(returned_body(&ctx, &nothing), None);
        });
    }
}
