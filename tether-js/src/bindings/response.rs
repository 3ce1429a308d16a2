//! Express-style `res` object over a [`ResponseHandle`]
//!
//! Non-terminal methods return `res` for chaining. Terminal methods after
//! the first one are silently ignored.

use crate::conversion::js_to_json;
use boa_engine::object::builtins::JsUint8Array;
use boa_engine::object::ObjectInitializer;
use boa_engine::{
    js_string, Context, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Trace};
use bytes::Bytes;
use serde_json::Value as JsonValue;
use tether_runtime::bridge::CookieOptions;
use tether_runtime::{Payload, ResponseHandle};

#[derive(Clone, Trace, Finalize)]
struct ResponseCapture {
    #[unsafe_ignore_trace]
    response: ResponseHandle,
}

type Method = fn(&JsValue, &[JsValue], &ResponseCapture, &mut Context) -> JsResult<JsValue>;

pub(crate) fn response_object(response: &ResponseHandle, context: &mut Context) -> JsResult<JsObject> {
    let capture = ResponseCapture {
        response: response.clone(),
    };
    let methods: [(JsString, Method, usize); 14] = [
        (js_string!("status"), status, 1),
        (js_string!("set"), set, 2),
        (js_string!("header"), set, 2),
        (js_string!("get"), get, 1),
        (js_string!("type"), content_type, 1),
        (js_string!("cookie"), cookie, 3),
        (js_string!("clearCookie"), clear_cookie, 2),
        (js_string!("send"), send, 1),
        (js_string!("json"), json, 1),
        (js_string!("redirect"), redirect, 2),
        (js_string!("end"), end, 1),
        (js_string!("sendStatus"), send_status, 1),
        (js_string!("headersSent"), headers_sent, 0),
        (js_string!("statusCode"), status_code, 0),
    ];

    let mut object = ObjectInitializer::new(context);
    for (name, method, length) in methods {
        object.function(
            NativeFunction::from_copy_closure_with_captures(method, capture.clone()),
            name,
            length,
        );
    }
    Ok(object.build())
}

fn string_arg(args: &[JsValue], index: usize, what: &str) -> JsResult<String> {
    args.get_or_undefined(index)
        .as_string()
        .map(JsString::to_std_string_escaped)
        .ok_or_else(|| JsNativeError::typ().with_message(format!("{what} must be a string")).into())
}

fn status_arg(value: &JsValue) -> JsResult<u16> {
    value
        .as_number()
        .filter(|n| n.fract() == 0.0 && (100.0..=999.0).contains(n))
        .map(|n| n as u16)
        .ok_or_else(|| {
            JsNativeError::range()
                .with_message("Status code must be an integer between 100 and 999")
                .into()
        })
}

/// Header values: strings as-is, arrays joined, anything else stringified
fn header_value(value: &JsValue, context: &mut Context) -> JsResult<String> {
    if let Some(s) = value.as_string() {
        return Ok(s.to_std_string_escaped());
    }
    Ok(match js_to_json(value, context)? {
        JsonValue::Array(items) => items
            .iter()
            .map(|item| match item {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        JsonValue::String(s) => s,
        other => other.to_string(),
    })
}

fn payload(value: &JsValue, context: &mut Context) -> JsResult<Payload> {
    if value.is_null_or_undefined() {
        return Ok(Payload::Empty);
    }
    if let Some(s) = value.as_string() {
        return Ok(Payload::Text(s.to_std_string_escaped()));
    }
    if let Some(object) = value.as_object() {
        if let Ok(array) = JsUint8Array::from_object(object.clone()) {
            let length = array.length(context)?;
            let mut bytes = Vec::with_capacity(length);
            for index in 0..length {
                let byte = object.get(index, context)?.to_number(context)?;
                bytes.push(byte as u8);
            }
            return Ok(Payload::Bytes(Bytes::from(bytes)));
        }
    }
    Ok(Payload::from_json(js_to_json(value, context)?))
}

fn status(this: &JsValue, args: &[JsValue], capture: &ResponseCapture, _context: &mut Context) -> JsResult<JsValue> {
    let code = status_arg(args.get_or_undefined(0))?;
    capture.response.with(|r| r.status(code));
    Ok(this.clone())
}

/// `res.set(name, value)` or `res.set({ name: value, ... })`
fn set(this: &JsValue, args: &[JsValue], capture: &ResponseCapture, context: &mut Context) -> JsResult<JsValue> {
    let first = args.get_or_undefined(0);
    if let Some(object) = first.as_object() {
        for key in crate::conversion::object_keys(object, context)? {
            let value = object.get(key.clone(), context)?;
            let value = header_value(&value, context)?;
            let name = key.to_std_string_escaped();
            capture.response.with(|r| r.set(&name, &value));
        }
        return Ok(this.clone());
    }

    let name = string_arg(args, 0, "Header name")?;
    let value = header_value(args.get_or_undefined(1), context)?;
    capture.response.with(|r| r.set(&name, &value));
    Ok(this.clone())
}

fn get(_this: &JsValue, args: &[JsValue], capture: &ResponseCapture, _context: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "Header name")?;
    Ok(capture
        .response
        .with(|r| r.get(&name).map(str::to_string))
        .map_or_else(JsValue::undefined, |v| JsValue::new(JsString::from(v.as_str()))))
}

fn content_type(this: &JsValue, args: &[JsValue], capture: &ResponseCapture, _context: &mut Context) -> JsResult<JsValue> {
    let kind = string_arg(args, 0, "Content type")?;
    capture.response.with(|r| r.content_type(&kind));
    Ok(this.clone())
}

fn cookie_options(value: &JsValue, context: &mut Context) -> JsResult<CookieOptions> {
    if !value.is_object() {
        return Ok(CookieOptions::default());
    }
    let mut options = js_to_json(value, context)?;
    // Express accepts `sameSite: true` as strict
    if let Some(same_site) = options.get_mut("sameSite") {
        match same_site {
            JsonValue::Bool(true) => *same_site = JsonValue::String("Strict".into()),
            JsonValue::Bool(false) => *same_site = JsonValue::Null,
            _ => {}
        }
    }
    serde_json::from_value(options)
        .map_err(|e| JsNativeError::typ().with_message(format!("Invalid cookie options: {e}")).into())
}

fn cookie(this: &JsValue, args: &[JsValue], capture: &ResponseCapture, context: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "Cookie name")?;
    let value = args.get_or_undefined(1);
    let value = match value.as_string() {
        Some(s) => s.to_std_string_escaped(),
        None => js_to_json(value, context)?.to_string(),
    };
    let options = cookie_options(args.get_or_undefined(2), context)?;
    capture.response.with(|r| r.cookie(&name, &value, &options));
    Ok(this.clone())
}

fn clear_cookie(this: &JsValue, args: &[JsValue], capture: &ResponseCapture, context: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "Cookie name")?;
    let options = cookie_options(args.get_or_undefined(1), context)?;
    capture.response.with(|r| r.clear_cookie(&name, &options));
    Ok(this.clone())
}

fn send(this: &JsValue, args: &[JsValue], capture: &ResponseCapture, context: &mut Context) -> JsResult<JsValue> {
    let payload = payload(args.get_or_undefined(0), context)?;
    capture.response.with(|r| r.send(payload));
    Ok(this.clone())
}

fn json(this: &JsValue, args: &[JsValue], capture: &ResponseCapture, context: &mut Context) -> JsResult<JsValue> {
    let value = js_to_json(args.get_or_undefined(0), context)?;
    capture.response.with(|r| r.json(&value));
    Ok(this.clone())
}

/// `res.redirect(url)` or `res.redirect(status, url)`
fn redirect(this: &JsValue, args: &[JsValue], capture: &ResponseCapture, _context: &mut Context) -> JsResult<JsValue> {
    let (code, location) = if args.get_or_undefined(0).is_number() {
        (Some(status_arg(args.get_or_undefined(0))?), string_arg(args, 1, "Redirect location")?)
    } else {
        (None, string_arg(args, 0, "Redirect location")?)
    };
    capture.response.with(|r| r.redirect(code, &location));
    Ok(this.clone())
}

fn end(this: &JsValue, args: &[JsValue], capture: &ResponseCapture, context: &mut Context) -> JsResult<JsValue> {
    let value = args.get_or_undefined(0);
    let payload = if value.is_undefined() {
        None
    } else {
        Some(payload(value, context)?)
    };
    capture.response.with(|r| r.end(payload));
    Ok(this.clone())
}

fn send_status(this: &JsValue, args: &[JsValue], capture: &ResponseCapture, _context: &mut Context) -> JsResult<JsValue> {
    let code = status_arg(args.get_or_undefined(0))?;
    capture.response.with(|r| r.send_status(code));
    Ok(this.clone())
}

fn headers_sent(_this: &JsValue, _args: &[JsValue], capture: &ResponseCapture, _context: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::new(capture.response.is_sent()))
}

/// Status of the committed reply, or the pending one
fn status_code(_this: &JsValue, _args: &[JsValue], capture: &ResponseCapture, _context: &mut Context) -> JsResult<JsValue> {
    let code = capture.response.with(|r| {
        r.committed()
            .map_or_else(|| r.pending_status(), |committed| committed.status)
    });
    Ok(JsValue::new(i32::from(code)))
}
