use crate::conversion::{js_to_json, json_to_js};
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsArgs, JsResult, JsString, JsValue, NativeFunction};
use serde_json::Value as JsonValue;

pub(super) fn register(context: &mut Context) -> JsResult<()> {
    let json = ObjectInitializer::new(context)
        .function(NativeFunction::from_fn_ptr(parse), js_string!("parse"), 2)
        .function(NativeFunction::from_fn_ptr(stringify), js_string!("stringify"), 2)
        .build();

    context.register_global_property(js_string!("json"), json, Attribute::all())
}

/// `json.parse(text, fallback?)`; never throws
fn parse(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let fallback = || args.get(1).cloned().unwrap_or_else(JsValue::null);

    let Some(text) = args.get_or_undefined(0).as_string() else {
        return Ok(fallback());
    };
    match serde_json::from_str::<JsonValue>(&text.to_std_string_escaped()) {
        Ok(value) => json_to_js(&value, context),
        Err(_) => Ok(fallback()),
    }
}

/// `json.stringify(value, pretty?)`
fn stringify(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let value = args.get_or_undefined(0);
    if value.is_undefined() {
        return Ok(JsValue::undefined());
    }

    let json = js_to_json(value, context)?;
    let text = if args.get_or_undefined(1).to_boolean() {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    }
    .unwrap_or_default();

    Ok(JsValue::new(JsString::from(text.as_str())))
}
