//! Host-side state shared by every native binding

use boa_gc::{Finalize, Trace};
use serde_json::Value as JsonValue;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;
use tether_http::HttpClient;
use tether_logging::{DatabaseOperation, LogLevel};
use tether_runtime::{HandlerRef, JobScope, Registry};
use tether_storage::{Database, StateStore};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Services reachable from script code
///
/// Lives on the dispatcher thread next to the interpreter. Async calls are
/// driven to completion with the runtime handle, which keeps every binding
/// synchronous from the script's point of view.
pub(crate) struct Host {
    pub registry: Arc<Registry>,
    pub database: Option<Arc<Database>>,
    pub http: Arc<dyn HttpClient>,
    state_store: Arc<dyn StateStore>,
    state: RefCell<BTreeMap<String, JsonValue>>,
    handle: Handle,
    scope: RefCell<Option<JobScope>>,
    next_handler: Cell<u64>,
}

impl Host {
    pub fn new(
        registry: Arc<Registry>,
        database: Option<Arc<Database>>,
        http: Arc<dyn HttpClient>,
        state_store: Arc<dyn StateStore>,
        state: BTreeMap<String, JsonValue>,
        handle: Handle,
    ) -> Self {
        Self {
            registry,
            database,
            http,
            state_store,
            state: RefCell::new(state),
            handle,
            scope: RefCell::new(None),
            next_handler: Cell::new(1),
        }
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Make `scope` current until the guard is dropped
    pub fn enter(&self, scope: &JobScope) -> ScopeGuard<'_> {
        *self.scope.borrow_mut() = Some(scope.clone());
        ScopeGuard { host: self }
    }

    pub fn console(&self, level: LogLevel, message: String, data: Option<JsonValue>) {
        match self.scope.borrow().as_ref() {
            Some(scope) => scope.console(level, message, data),
            // Outside of a job there is nowhere to capture to
            None => info!(target: "tether::script", "{}", message),
        }
    }

    pub fn record_database_operation(&self, operation: DatabaseOperation) {
        if let Some(scope) = self.scope.borrow().as_ref() {
            scope.record_database_operation(operation);
        }
    }

    pub fn next_handler(&self) -> HandlerRef {
        let id = self.next_handler.get();
        self.next_handler.set(id + 1);
        HandlerRef(id)
    }

    pub fn state_get(&self, key: &str) -> Option<JsonValue> {
        self.state.borrow().get(key).cloned()
    }

    pub fn state_snapshot(&self) -> BTreeMap<String, JsonValue> {
        self.state.borrow().clone()
    }

    pub fn state_set(&self, key: &str, value: JsonValue) {
        if let Err(e) = self.block_on(self.state_store.put(key, &value)) {
            warn!("Failed to persist state key '{}': {}", key, e);
        }
        self.state.borrow_mut().insert(key.to_string(), value);
    }

    pub fn state_delete(&self, key: &str) -> bool {
        let existed = self.state.borrow_mut().remove(key).is_some();
        if existed {
            if let Err(e) = self.block_on(self.state_store.remove(key)) {
                warn!("Failed to delete state key '{}': {}", key, e);
            }
        }
        existed
    }

    pub fn state_clear(&self) {
        self.state.borrow_mut().clear();
        if let Err(e) = self.block_on(self.state_store.clear()) {
            warn!("Failed to clear persisted state: {}", e);
        }
        debug!("Cleared script state");
    }
}

pub(crate) struct ScopeGuard<'a> {
    host: &'a Host,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.host.scope.borrow_mut().take();
    }
}

/// GC-safe capture of the host for native closures
#[derive(Clone, Trace, Finalize)]
pub(crate) struct HostRef {
    #[unsafe_ignore_trace]
    host: Rc<Host>,
}

impl HostRef {
    pub fn new(host: &Rc<Host>) -> Self {
        Self { host: host.clone() }
    }
}

impl Deref for HostRef {
    type Target = Host;

    fn deref(&self) -> &Host {
        &self.host
    }
}
