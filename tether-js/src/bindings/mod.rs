//! Globals exposed to script code
//!
//! - `console.log|info|warn|error|debug(...)`
//! - `db.query(sql, ...params)` / `db.exec(sql, ...params)`
//! - `app.get|post|put|delete|patch|use|all(path, handler, options?)`,
//!   `app.file(path, handler)`, `app.routes()`
//! - `state.get|set|delete|keys|all|clear`
//! - `json.parse(text, fallback?)` / `json.stringify(value, pretty?)`
//! - `fetch(url, options?)`, returning a Promise
//!
//! Handlers receive Express-style `(req, res)` values built by
//! [`request`] and [`response`].

mod app;
mod console;
mod db;
mod fetch;
mod json;
pub(crate) mod request;
pub(crate) mod response;
mod state;

use crate::host::{Host, HostRef};
use boa_engine::{Context, JsObject, JsResult, JsString};
use std::rc::Rc;
use tether_runtime::HandlerRef;

pub(crate) fn install(context: &mut Context, host: &Rc<Host>, handlers: &JsObject) -> JsResult<()> {
    let host = HostRef::new(host);
    console::register(context, &host)?;
    db::register(context, &host)?;
    app::register(context, &host, handlers)?;
    state::register(context, &host)?;
    json::register(context)?;
    fetch::register(context, &host)?;
    Ok(())
}

/// Property under which a handler's function is kept
pub(crate) fn handler_key(handler: HandlerRef) -> JsString {
    JsString::from(handler.0.to_string().as_str())
}
