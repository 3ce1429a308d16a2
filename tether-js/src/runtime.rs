//! Boa-backed [`ScriptRuntime`]

use crate::bindings::{self, handler_key, request::request_object, response::response_object};
use crate::conversion::{describe_error, describe_value, js_to_json};
use crate::error::JsExecutionError;
use crate::host::Host;
use boa_engine::builtins::promise::PromiseState;
use boa_engine::object::builtins::JsPromise;
use boa_engine::{Context, JsObject, JsResult, JsValue, Source};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use tether_config::EngineConfig;
use tether_http::{HttpClient, HttpManager};
use tether_runtime::{
    BridgeRequest, Engine, EngineBuilder, EngineError, ExecutionError, HandlerInfo, JobScope,
    ResponseHandle, RuntimeContext, ScriptRuntime,
};
use tether_storage::{Database, MemoryStateStore, StateStore};
use tracing::{debug, info, warn};

/// External services the script bindings talk to
#[derive(Clone)]
pub struct JsServices {
    pub database: Option<Arc<Database>>,
    pub http: Arc<dyn HttpClient>,
    pub state: Arc<dyn StateStore>,
}

impl JsServices {
    pub fn new(http: Arc<dyn HttpClient>, state: Arc<dyn StateStore>) -> Self {
        Self {
            database: None,
            http,
            state,
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(Arc::new(database));
        self
    }
}

impl Default for JsServices {
    /// No database, a live HTTP client and in-memory state
    fn default() -> Self {
        Self::new(Arc::new(HttpManager::new()), Arc::new(MemoryStateStore::new()))
    }
}

/// One Boa context plus the host services bound into it
///
/// Handler functions registered through `app.*` are kept on a hidden
/// null-prototype object keyed by handler id; the registry only ever sees
/// the id.
pub struct JsRuntime {
    context: Context,
    host: Rc<Host>,
    handlers: JsObject,
}

impl JsRuntime {
    /// Build a context and install every binding
    ///
    /// Must run on the thread that will own the runtime, outside of any
    /// async context: persisted state is loaded by blocking on `handle`.
    pub fn new(runtime: RuntimeContext, services: JsServices) -> Result<Self, JsExecutionError> {
        let state = match runtime.handle.block_on(services.state.load_all()) {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to load persisted state, starting empty: {}", e);
                BTreeMap::new()
            }
        };
        debug!("Loaded {} persisted state keys", state.len());

        let mut context = Context::default();
        apply_limits(&mut context, &runtime.config);

        let host = Rc::new(Host::new(
            runtime.registry,
            services.database,
            services.http,
            services.state,
            state,
            runtime.handle,
        ));
        let handlers = JsObject::with_null_proto();

        bindings::install(&mut context, &host, &handlers).map_err(|e| {
            JsExecutionError::Binding(describe_error(&e, &mut context))
        })?;

        info!("JavaScript runtime initialised");
        Ok(Self {
            context,
            host,
            handlers,
        })
    }

    /// Factory for [`EngineBuilder::start`]
    pub fn factory(
        services: JsServices,
    ) -> impl FnOnce(RuntimeContext) -> Result<JsRuntime, ExecutionError> + Send + 'static {
        move |runtime| JsRuntime::new(runtime, services).map_err(ExecutionError::from)
    }

    /// Drain the job queue and unwrap a promise result
    ///
    /// A rejected promise becomes a script error; one still pending once
    /// the queue is empty can never settle.
    fn settle(&mut self, value: JsValue) -> Result<JsValue, JsExecutionError> {
        self.context.run_jobs();

        let Some(promise) = value
            .as_object()
            .and_then(|object| JsPromise::from_object(object.clone()).ok())
        else {
            return Ok(value);
        };

        match promise.state() {
            PromiseState::Fulfilled(result) => Ok(result),
            PromiseState::Rejected(reason) => Err(JsExecutionError::Script(describe_value(
                &reason,
                &mut self.context,
            ))),
            PromiseState::Pending => Err(JsExecutionError::Script(
                "Promise did not settle".to_string(),
            )),
        }
    }

    /// Free the callables of replaced routes no queued job still holds
    fn reclaim(&mut self) {
        for handler in self.host.registry.reclaim() {
            if let Err(e) = self
                .handlers
                .delete_property_or_throw(handler_key(handler), &mut self.context)
            {
                warn!("Failed to release handler {}: {}", handler, e);
            }
        }
    }

    fn run(&mut self, code: &str) -> Result<Option<JsonValue>, JsExecutionError> {
        let value = match self.context.eval(Source::from_bytes(code)) {
            Ok(value) => value,
            Err(e) => {
                self.context.run_jobs();
                return Err(JsExecutionError::Script(describe_error(&e, &mut self.context)));
            }
        };
        let value = self.settle(value)?;
        if value.is_undefined() {
            return Ok(None);
        }
        js_to_json(&value, &mut self.context)
            .map(Some)
            .map_err(|e| JsExecutionError::Conversion(describe_error(&e, &mut self.context)))
    }

    fn invoke(
        &mut self,
        info: &HandlerInfo,
        request: &BridgeRequest,
        response: &ResponseHandle,
    ) -> Result<(), ExecutionError> {
        let function = self
            .handlers
            .get(handler_key(info.handler), &mut self.context)
            .ok()
            .and_then(|value| value.as_callable().cloned())
            .ok_or(ExecutionError::HandlerNotFound(info.handler.0))?;

        let value = match call_with(&function, request, response, &mut self.context) {
            Ok(value) => value,
            Err(e) => {
                self.context.run_jobs();
                return Err(ExecutionError::Script(describe_error(&e, &mut self.context)));
            }
        };
        self.settle(value)?;
        Ok(())
    }
}

impl ScriptRuntime for JsRuntime {
    fn eval(&mut self, code: &str, scope: &JobScope) -> Result<Option<JsonValue>, ExecutionError> {
        let host = self.host.clone();
        let _guard = host.enter(scope);
        self.reclaim();
        Ok(self.run(code)?)
    }

    fn call_handler(
        &mut self,
        info: &HandlerInfo,
        request: &BridgeRequest,
        response: &ResponseHandle,
        scope: &JobScope,
    ) -> Result<(), ExecutionError> {
        let host = self.host.clone();
        let _guard = host.enter(scope);
        self.reclaim();
        self.invoke(info, request, response)
    }
}

fn call_with(
    function: &JsObject,
    request: &BridgeRequest,
    response: &ResponseHandle,
    context: &mut Context,
) -> JsResult<JsValue> {
    let req = request_object(request, context)?;
    let res = response_object(response, context)?;
    function.call(&JsValue::undefined(), &[req.into(), res.into()], context)
}

fn apply_limits(context: &mut Context, config: &EngineConfig) {
    let limits = context.runtime_limits_mut();
    if let Some(limit) = config.loop_iteration_limit {
        limits.set_loop_iteration_limit(limit);
    }
    if let Some(limit) = config.recursion_limit {
        limits.set_recursion_limit(limit);
    }
}

/// Start an engine whose dispatcher owns a [`JsRuntime`]
pub async fn start_engine(
    builder: EngineBuilder,
    services: JsServices,
) -> Result<Engine, EngineError> {
    builder.start(JsRuntime::factory(services)).await
}
