use crate::conversion::{js_to_json, json_to_js};
use crate::host::HostRef;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsArgs, JsNativeError, JsResult, JsString, JsValue, NativeFunction,
};
use serde_json::{Map, Value as JsonValue};

type Binding = fn(&JsValue, &[JsValue], &HostRef, &mut Context) -> JsResult<JsValue>;

pub(super) fn register(context: &mut Context, host: &HostRef) -> JsResult<()> {
    let functions: [(JsString, Binding, usize); 6] = [
        (js_string!("get"), get, 1),
        (js_string!("set"), set, 2),
        (js_string!("delete"), delete, 1),
        (js_string!("keys"), keys, 0),
        (js_string!("all"), all, 0),
        (js_string!("clear"), clear, 0),
    ];

    let mut state = ObjectInitializer::new(context);
    for (name, function, length) in functions {
        state.function(
            NativeFunction::from_copy_closure_with_captures(function, host.clone()),
            name,
            length,
        );
    }
    let state = state.build();

    context.register_global_property(js_string!("state"), state, Attribute::all())
}

fn key(args: &[JsValue]) -> JsResult<String> {
    args.get_or_undefined(0)
        .as_string()
        .map(JsString::to_std_string_escaped)
        .ok_or_else(|| JsNativeError::typ().with_message("State key must be a string").into())
}

fn get(_this: &JsValue, args: &[JsValue], host: &HostRef, context: &mut Context) -> JsResult<JsValue> {
    match host.state_get(&key(args)?) {
        Some(value) => json_to_js(&value, context),
        None => Ok(JsValue::undefined()),
    }
}

fn set(_this: &JsValue, args: &[JsValue], host: &HostRef, context: &mut Context) -> JsResult<JsValue> {
    let key = key(args)?;
    let value = js_to_json(args.get_or_undefined(1), context)?;
    host.state_set(&key, value);
    Ok(JsValue::undefined())
}

fn delete(_this: &JsValue, args: &[JsValue], host: &HostRef, _context: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::new(host.state_delete(&key(args)?)))
}

fn keys(_this: &JsValue, _args: &[JsValue], host: &HostRef, context: &mut Context) -> JsResult<JsValue> {
    let keys = host
        .state_snapshot()
        .into_keys()
        .map(JsonValue::String)
        .collect();
    json_to_js(&JsonValue::Array(keys), context)
}

fn all(_this: &JsValue, _args: &[JsValue], host: &HostRef, context: &mut Context) -> JsResult<JsValue> {
    let all: Map<String, JsonValue> = host.state_snapshot().into_iter().collect();
    json_to_js(&JsonValue::Object(all), context)
}

fn clear(_this: &JsValue, _args: &[JsValue], host: &HostRef, _context: &mut Context) -> JsResult<JsValue> {
    host.state_clear();
    Ok(JsValue::undefined())
}
