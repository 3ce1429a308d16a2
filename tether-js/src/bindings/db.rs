use crate::conversion::{js_to_json, json_to_js};
use crate::host::HostRef;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsArgs, JsNativeError, JsResult, JsValue, NativeFunction};
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::time::Instant;
use tether_logging::DatabaseOperation;
use tracing::debug;

pub(super) fn register(context: &mut Context, host: &HostRef) -> JsResult<()> {
    let db = ObjectInitializer::new(context)
        .function(
            NativeFunction::from_copy_closure_with_captures(query, host.clone()),
            js_string!("query"),
            1,
        )
        .function(
            NativeFunction::from_copy_closure_with_captures(exec, host.clone()),
            js_string!("exec"),
            1,
        )
        .build();

    context.register_global_property(js_string!("db"), db, Attribute::all())
}

/// `db.query(sql, ...params)`: rows as plain objects
fn query(_this: &JsValue, args: &[JsValue], host: &HostRef, context: &mut Context) -> JsResult<JsValue> {
    let (sql, params) = statement(args, context)?;
    let database = database(host)?;

    let started = Instant::now();
    let outcome = host.block_on(database.query(&sql, &params));
    host.record_database_operation(DatabaseOperation {
        timestamp: Utc::now(),
        kind: "query".to_string(),
        sql: sql.clone(),
        params,
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        rows: outcome.as_ref().ok().map(|rows| rows.len() as u64),
        error: outcome.as_ref().err().map(ToString::to_string),
    });

    let rows = outcome.map_err(|e| JsNativeError::error().with_message(e.to_string()))?;
    debug!("Query returned {} rows: {}", rows.len(), sql);
    json_to_js(&JsonValue::Array(rows), context)
}

/// `db.exec(sql, ...params)`: `{ rowsAffected, lastInsertId }`
fn exec(_this: &JsValue, args: &[JsValue], host: &HostRef, context: &mut Context) -> JsResult<JsValue> {
    let (sql, params) = statement(args, context)?;
    let database = database(host)?;

    let started = Instant::now();
    let outcome = host.block_on(database.exec(&sql, &params));
    host.record_database_operation(DatabaseOperation {
        timestamp: Utc::now(),
        kind: "exec".to_string(),
        sql: sql.clone(),
        params,
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        rows: outcome.as_ref().ok().map(|result| result.rows_affected),
        error: outcome.as_ref().err().map(ToString::to_string),
    });

    let result = outcome.map_err(|e| JsNativeError::error().with_message(e.to_string()))?;
    let result = serde_json::to_value(result)
        .map_err(|e| JsNativeError::error().with_message(e.to_string()))?;
    json_to_js(&result, context)
}

fn statement(args: &[JsValue], context: &mut Context) -> JsResult<(String, Vec<JsonValue>)> {
    let sql = args
        .get_or_undefined(0)
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| JsNativeError::typ().with_message("SQL statement must be a string"))?;

    let params = args
        .iter()
        .skip(1)
        .map(|arg| js_to_json(arg, context))
        .collect::<JsResult<Vec<_>>>()?;

    Ok((sql, params))
}

fn database(host: &HostRef) -> JsResult<std::sync::Arc<tether_storage::Database>> {
    host.database
        .clone()
        .ok_or_else(|| JsNativeError::error().with_message("No database is configured").into())
}
