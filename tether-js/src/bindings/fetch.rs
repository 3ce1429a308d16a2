//! `fetch(url, { method, headers, body })`
//!
//! The request itself is synchronous on the dispatcher thread; the prelude
//! wraps it so scripts see a Promise that resolves to
//! `{ ok, status, statusText, headers, body, json(), text() }` or rejects
//! with an `Error` carrying the failure message.

use crate::conversion::{js_to_json, json_to_js};
use crate::host::HostRef;
use boa_engine::{
    js_string, Context, JsArgs, JsNativeError, JsResult, JsString, JsValue, NativeFunction,
    Source,
};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

const PRELUDE: &str = r#"
(function () {
    const call = globalThis.__tetherFetch;
    delete globalThis.__tetherFetch;

    globalThis.fetch = function fetch(url, options) {
        try {
            const response = call(url, options);
            response.json = function () {
                return Promise.resolve(typeof this.body === 'string' ? JSON.parse(this.body) : this.body);
            };
            response.text = function () {
                return Promise.resolve(typeof this.body === 'string' ? this.body : JSON.stringify(this.body));
            };
            return Promise.resolve(response);
        } catch (error) {
            return Promise.reject(error instanceof Error ? error : new Error(String(error)));
        }
    };
})();
"#;

pub(super) fn register(context: &mut Context, host: &HostRef) -> JsResult<()> {
    context.register_global_callable(
        js_string!("__tetherFetch"),
        2,
        NativeFunction::from_copy_closure_with_captures(fetch, host.clone()),
    )?;
    context.eval(Source::from_bytes(PRELUDE))?;
    Ok(())
}

fn fetch(_this: &JsValue, args: &[JsValue], host: &HostRef, context: &mut Context) -> JsResult<JsValue> {
    let url = args
        .get_or_undefined(0)
        .as_string()
        .map(JsString::to_std_string_escaped)
        .ok_or_else(|| JsNativeError::typ().with_message("fetch requires a URL string"))?;

    let options = js_to_json(args.get_or_undefined(1), context)?;
    let mut params = Map::new();
    for field in ["method", "headers"] {
        if let Some(value) = options.get(field).filter(|v| !v.is_null()) {
            params.insert(field.to_string(), value.clone());
        }
    }
    let body = options.get("body").filter(|v| !v.is_null()).cloned();

    debug!("Script fetch: {}", url);
    let response = host
        .block_on(
            host.http
                .call_http(&url, Some(&JsonValue::Object(params)), body.as_ref()),
        )
        .map_err(|e| JsNativeError::error().with_message(e.to_string()))?;

    json_to_js(&response, context)
}
