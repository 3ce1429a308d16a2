//! Route registration from script code
//!
//! Handler functions stay inside the interpreter, in a hidden object keyed
//! by [`HandlerRef`]; the registry only ever sees the reference. A displaced
//! function is freed by the runtime once the registry reclaims it.

use super::handler_key;
use crate::conversion::{js_to_json, json_to_js};
use crate::host::HostRef;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Trace};
use serde_json::Value as JsonValue;
use tether_runtime::{HandlerRef, ANY_METHOD};
use tracing::debug;

#[derive(Trace, Finalize)]
struct RouteCapture {
    host: HostRef,
    handlers: JsObject,
    #[unsafe_ignore_trace]
    method: &'static str,
}

#[derive(Trace, Finalize)]
struct AppCapture {
    host: HostRef,
    handlers: JsObject,
}

pub(super) fn register(context: &mut Context, host: &HostRef, handlers: &JsObject) -> JsResult<()> {
    let methods = [
        (js_string!("get"), "get"),
        (js_string!("post"), "post"),
        (js_string!("put"), "put"),
        (js_string!("delete"), "delete"),
        (js_string!("patch"), "patch"),
        (js_string!("use"), ANY_METHOD),
        (js_string!("all"), ANY_METHOD),
    ];

    let mut app = ObjectInitializer::new(context);
    for (name, method) in methods {
        let capture = RouteCapture {
            host: host.clone(),
            handlers: handlers.clone(),
            method,
        };
        app.function(
            NativeFunction::from_copy_closure_with_captures(route, capture),
            name,
            2,
        );
    }
    app.function(
        NativeFunction::from_copy_closure_with_captures(
            file,
            AppCapture {
                host: host.clone(),
                handlers: handlers.clone(),
            },
        ),
        js_string!("file"),
        2,
    );
    app.function(
        NativeFunction::from_copy_closure_with_captures(routes, host.clone()),
        js_string!("routes"),
        0,
    );
    let app = app.build();

    context.register_global_property(js_string!("app"), app, Attribute::all())
}

/// `app.<method>(path, handler, options?)`
fn route(this: &JsValue, args: &[JsValue], capture: &RouteCapture, context: &mut Context) -> JsResult<JsValue> {
    let path = route_path(args.get_or_undefined(0))?;
    let handler = route_handler(args.get_or_undefined(1))?;

    let options = args.get_or_undefined(2);
    let options = if options.is_object() {
        js_to_json(options, context)?
    } else {
        JsonValue::Null
    };
    let content_type = options
        .get("contentType")
        .and_then(JsonValue::as_str)
        .map(str::to_string);

    let id = bind(&capture.host, &capture.handlers, handler, context)?;
    capture
        .host
        .registry
        .register(capture.method, &path, id, content_type, options);

    debug!("Registered {} {} as handler {}", capture.method, path, id);
    Ok(this.clone())
}

/// `app.file(path, handler, options?)`: exact-path handler
fn file(this: &JsValue, args: &[JsValue], capture: &AppCapture, context: &mut Context) -> JsResult<JsValue> {
    let path = route_path(args.get_or_undefined(0))?;
    let handler = route_handler(args.get_or_undefined(1))?;

    let options = args.get_or_undefined(2);
    let content_type = if options.is_object() {
        js_to_json(options, context)?
            .get("contentType")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    } else {
        None
    };

    let id = bind(&capture.host, &capture.handlers, handler, context)?;
    capture.host.registry.register_file(&path, id, content_type);

    debug!("Registered file handler {} as handler {}", path, id);
    Ok(this.clone())
}

/// `app.routes()`: registered routes followed by file handlers
fn routes(_this: &JsValue, _args: &[JsValue], host: &HostRef, context: &mut Context) -> JsResult<JsValue> {
    let entries: Vec<JsonValue> = host
        .registry
        .routes()
        .into_iter()
        .chain(host.registry.file_handlers())
        .map(|info| {
            serde_json::json!({
                "method": info.method,
                "path": info.pattern,
                "contentType": info.content_type,
            })
        })
        .collect();
    json_to_js(&JsonValue::Array(entries), context)
}

fn route_path(value: &JsValue) -> JsResult<String> {
    value
        .as_string()
        .map(JsString::to_std_string_escaped)
        .ok_or_else(|| {
            JsNativeError::typ()
                .with_message("Route path must be a string")
                .into()
        })
}

fn route_handler(value: &JsValue) -> JsResult<JsObject> {
    value.as_callable().cloned().ok_or_else(|| {
        JsNativeError::typ()
            .with_message("Route handler must be a function")
            .into()
    })
}

fn bind(host: &HostRef, handlers: &JsObject, handler: JsObject, context: &mut Context) -> JsResult<HandlerRef> {
    let id = host.next_handler();
    handlers.set(handler_key(id), handler, true, context)?;
    Ok(id)
}
