//! JSON <-> JavaScript value conversion
//!
//! Follows `JSON.stringify` rules on the way out: `undefined`, functions and
//! symbols are dropped from objects and become `null` inside arrays,
//! non-finite numbers become `null`, and `toJSON` is honoured.

use boa_engine::object::builtins::JsArray;
use boa_engine::{js_string, Context, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue};
use serde_json::{Map, Number, Value as JsonValue};

const MAX_DEPTH: usize = 64;

/// 2^53, the largest integer range a JS number represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

pub fn json_to_js(json: &JsonValue, context: &mut Context) -> JsResult<JsValue> {
    match json {
        JsonValue::Null => Ok(JsValue::null()),
        JsonValue::Bool(b) => Ok(JsValue::new(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Ok(JsValue::new(i))
            } else {
                Ok(JsValue::new(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        JsonValue::String(s) => Ok(JsValue::new(JsString::from(s.as_str()))),
        JsonValue::Array(items) => {
            let array = JsArray::new(context);
            for item in items {
                let value = json_to_js(item, context)?;
                array.push(value, context)?;
            }
            Ok(array.into())
        }
        JsonValue::Object(map) => {
            let object = JsObject::with_object_proto(context.intrinsics());
            for (key, value) in map {
                let value = json_to_js(value, context)?;
                object.create_data_property_or_throw(JsString::from(key.as_str()), value, context)?;
            }
            Ok(object.into())
        }
    }
}

/// Convert a script value to JSON; values with no JSON form become `null`
pub fn js_to_json(value: &JsValue, context: &mut Context) -> JsResult<JsonValue> {
    Ok(convert(value, context, 0)?.unwrap_or(JsonValue::Null))
}

fn convert(value: &JsValue, context: &mut Context, depth: usize) -> JsResult<Option<JsonValue>> {
    if depth > MAX_DEPTH {
        return Err(JsNativeError::typ()
            .with_message("Value is nested too deeply or contains a cycle")
            .into());
    }

    if value.is_undefined() || value.is_symbol() {
        return Ok(None);
    }
    if value.is_null() {
        return Ok(Some(JsonValue::Null));
    }
    if let Some(b) = value.as_boolean() {
        return Ok(Some(JsonValue::Bool(b)));
    }
    if let Some(n) = value.as_number() {
        return Ok(Some(number_to_json(n)));
    }
    if let Some(s) = value.as_string() {
        return Ok(Some(JsonValue::String(s.to_std_string_escaped())));
    }
    if value.is_bigint() {
        let text = value.to_string(context)?;
        return Ok(Some(JsonValue::String(text.to_std_string_escaped())));
    }

    let Some(object) = value.as_object() else {
        return Ok(None);
    };
    if object.is_callable() {
        return Ok(None);
    }

    let to_json = object.get(js_string!("toJSON"), context)?;
    if let Some(to_json) = to_json.as_callable() {
        let replaced = to_json.call(value, &[], context)?;
        return convert(&replaced, context, depth + 1);
    }

    if object.is_array() {
        let array = JsArray::from_object(object.clone())?;
        let length = array.length(context)?;
        let mut items = Vec::with_capacity(length.min(1024) as usize);
        for index in 0..length {
            let item = array.get(index, context)?;
            items.push(convert(&item, context, depth + 1)?.unwrap_or(JsonValue::Null));
        }
        return Ok(Some(JsonValue::Array(items)));
    }

    let mut map = Map::new();
    for key in object_keys(object, context)? {
        let item = object.get(key.clone(), context)?;
        if let Some(item) = convert(&item, context, depth + 1)? {
            map.insert(key.to_std_string_escaped(), item);
        }
    }
    Ok(Some(JsonValue::Object(map)))
}

fn number_to_json(n: f64) -> JsonValue {
    if !n.is_finite() {
        return JsonValue::Null;
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return JsonValue::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map_or(JsonValue::Null, JsonValue::Number)
}

/// Own enumerable string keys, as `Object.keys` reports them
pub fn object_keys(object: &JsObject, context: &mut Context) -> JsResult<Vec<JsString>> {
    let keys_fn = context
        .intrinsics()
        .constructors()
        .object()
        .constructor()
        .get(js_string!("keys"), context)?;
    let keys_fn = keys_fn
        .as_callable()
        .ok_or_else(|| JsNativeError::typ().with_message("Object.keys is not callable"))?
        .clone();

    let keys = keys_fn.call(&JsValue::undefined(), &[object.clone().into()], context)?;
    let keys = keys
        .as_object()
        .cloned()
        .ok_or_else(|| JsNativeError::typ().with_message("Object.keys did not return an array"))?;
    let keys = JsArray::from_object(keys)?;

    let length = keys.length(context)?;
    let mut result = Vec::with_capacity(length as usize);
    for index in 0..length {
        if let Some(key) = keys.get(index, context)?.as_string() {
            result.push(key.clone());
        }
    }
    Ok(result)
}

/// Human-readable text for a thrown value: `Name: message` for error
/// objects, the string conversion otherwise
pub fn describe_value(value: &JsValue, context: &mut Context) -> String {
    if let Some(text) = error_text(value, context) {
        return text;
    }

    match value.as_string() {
        Some(s) => s.to_std_string_escaped(),
        None => value
            .to_string(context)
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_else(|_| value.display().to_string()),
    }
}

/// `Name: message` when `value` looks like an error object
pub fn error_text(value: &JsValue, context: &mut Context) -> Option<String> {
    let object = value.as_object()?;
    let message = object
        .get(js_string!("message"), context)
        .ok()?
        .as_string()
        .map(JsString::to_std_string_escaped)?;
    let name = object
        .get(js_string!("name"), context)
        .ok()
        .and_then(|n| n.as_string().map(JsString::to_std_string_escaped))
        .unwrap_or_else(|| "Error".to_string());
    Some(format!("{name}: {message}"))
}

/// Native errors are formatted directly; runtime-limit errors have no
/// script-visible value
pub fn describe_error(error: &JsError, context: &mut Context) -> String {
    if let Some(native) = error.as_native() {
        return native.to_string();
    }
    let value = error.to_opaque(context);
    describe_value(&value, context)
}
