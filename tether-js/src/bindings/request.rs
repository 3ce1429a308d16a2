//! Read-only `req` object built from a [`BridgeRequest`] snapshot
//!
//! Fields mirror the snapshot's JSON form (`method`, `path`, `query`,
//! `headers`, `cookies`, `body`, `rawBody`, `ip`, `params`); header lookups through
//! `req.get` are case-insensitive.

use crate::conversion::json_to_js;
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::{
    js_string, Context, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Trace};
use std::rc::Rc;
use tether_runtime::BridgeRequest;

#[derive(Trace, Finalize)]
struct RequestCapture {
    #[unsafe_ignore_trace]
    request: Rc<BridgeRequest>,
}

/// Plain `req` object plus `req.get(name)` / `req.header(name)`
pub(crate) fn request_object(request: &BridgeRequest, context: &mut Context) -> JsResult<JsObject> {
    let json = serde_json::to_value(request)
        .map_err(|e| JsNativeError::error().with_message(e.to_string()))?;
    let object = json_to_js(&json, context)?
        .as_object()
        .cloned()
        .ok_or_else(|| JsNativeError::typ().with_message("Request did not convert to an object"))?;

    let request = Rc::new(request.clone());
    for name in [js_string!("get"), js_string!("header")] {
        let function = FunctionObjectBuilder::new(
            context.realm(),
            NativeFunction::from_copy_closure_with_captures(
                header,
                RequestCapture {
                    request: request.clone(),
                },
            ),
        )
        .name(name.clone())
        .length(1)
        .build();
        object.set(name, function, false, context)?;
    }

    Ok(object)
}

fn header(_this: &JsValue, args: &[JsValue], capture: &RequestCapture, _context: &mut Context) -> JsResult<JsValue> {
    let name = args
        .get_or_undefined(0)
        .as_string()
        .map(JsString::to_std_string_escaped)
        .ok_or_else(|| JsNativeError::typ().with_message("Header name must be a string"))?;

    Ok(capture
        .request
        .header(&name)
        .map_or_else(JsValue::undefined, |value| {
            JsValue::new(JsString::from(value.as_str()))
        }))
}
