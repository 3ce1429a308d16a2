use crate::conversion::{error_text, js_to_json};
use crate::host::HostRef;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsResult, JsValue, NativeFunction};
use boa_gc::{Finalize, Trace};
use serde_json::Value as JsonValue;
use tether_logging::LogLevel;

#[derive(Trace, Finalize)]
struct ConsoleCapture {
    host: HostRef,
    #[unsafe_ignore_trace]
    level: LogLevel,
}

pub(super) fn register(context: &mut Context, host: &HostRef) -> JsResult<()> {
    let levels = [
        (js_string!("log"), LogLevel::Log),
        (js_string!("info"), LogLevel::Info),
        (js_string!("warn"), LogLevel::Warn),
        (js_string!("error"), LogLevel::Error),
        (js_string!("debug"), LogLevel::Debug),
    ];

    let mut console = ObjectInitializer::new(context);
    for (name, level) in levels {
        let capture = ConsoleCapture {
            host: host.clone(),
            level,
        };
        console.function(
            NativeFunction::from_copy_closure_with_captures(write, capture),
            name,
            0,
        );
    }
    let console = console.build();

    context.register_global_property(js_string!("console"), console, Attribute::all())
}

fn write(
    _this: &JsValue,
    args: &[JsValue],
    capture: &ConsoleCapture,
    context: &mut Context,
) -> JsResult<JsValue> {
    let mut parts = Vec::with_capacity(args.len());
    let mut values = Vec::with_capacity(args.len());
    let mut structured = false;

    for arg in args {
        if let Some(s) = arg.as_string() {
            parts.push(s.to_std_string_escaped());
            values.push(JsonValue::String(s.to_std_string_escaped()));
            continue;
        }

        structured = true;
        let text = if arg.is_undefined() {
            "undefined".to_string()
        } else if arg.is_callable() {
            "[Function]".to_string()
        } else {
            match error_text(arg, context) {
                Some(text) => text,
                None => js_to_json(arg, context)
                    .map(|json| json.to_string())
                    .unwrap_or_else(|_| arg.display().to_string()),
            }
        };
        values.push(js_to_json(arg, context).unwrap_or(JsonValue::Null));
        parts.push(text);
    }

    let data = structured.then_some(JsonValue::Array(values));
    capture.host.console(capture.level, parts.join(" "), data);
    Ok(JsValue::undefined())
}
