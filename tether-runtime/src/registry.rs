//! Route and file-handler registry
//!
//! Route lookup runs on the HTTP hot path without touching the interpreter;
//! registration happens from script code and is therefore already
//! serialized through the dispatcher. Both sides go through the registry's
//! own read/write locks.
//!
//! Resolution order for `(method, path)`:
//! 1. exact path, method-specific entry, then any-method (`use`) entry
//! 2. parameterised patterns (`/users/:id`) with the same segment count;
//!    the pattern with the most literal segments wins, method-specific
//!    entries beat any-method entries, and remaining ties go to the
//!    earliest registration
//!
//! A replaced entry is retired rather than dropped. Jobs already queued
//! with its [`HandlerInfo`] still run the handler they resolved, and the
//! runtime frees the callable once [`Registry::reclaim`] reports it.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Method key for handlers registered through `app.use`
pub const ANY_METHOD: &str = "*";

/// Opaque reference to a callable owned by the script runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerRef(pub u64);

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered callable plus the metadata needed to invoke it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerInfo {
    #[serde(skip)]
    pub handler: HandlerRef,
    /// Lower-case method, `*` for any method, `file` for file handlers
    pub method: String,
    /// Pattern as registered; parameters are extracted from it per request
    pub pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Options bag passed at registration, always carrying `path`
    pub options: JsonValue,
    /// Registration order, used to break ties between patterns
    pub sequence: u64,
    /// Shared by every copy of this entry; counts outstanding holders
    #[serde(skip)]
    lease: Arc<()>,
}

/// A resolved route: the handler and the parameters captured from the path
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub info: HandlerInfo,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct Registry {
    routes: RwLock<HashMap<String, HashMap<String, HandlerInfo>>>,
    files: RwLock<HashMap<String, HandlerInfo>>,
    retired: Mutex<Vec<HandlerInfo>>,
    sequence: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `(method, path)`, replacing any earlier entry
    ///
    /// Returns the replaced entry, which is also retired until no queued
    /// job holds it.
    pub fn register(
        &self,
        method: &str,
        path: &str,
        handler: HandlerRef,
        content_type: Option<String>,
        options: JsonValue,
    ) -> Option<HandlerInfo> {
        let method = normalize_method(method);
        let pattern = normalize_path(path);
        let info = self.make_info(handler, method.clone(), pattern.clone(), content_type, options);

        let replaced = {
            let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
            routes.entry(pattern).or_default().insert(method, info)
        };
        self.retire(replaced)
    }

    /// Register a file handler; matched by exact path only
    pub fn register_file(
        &self,
        path: &str,
        handler: HandlerRef,
        content_type: Option<String>,
    ) -> Option<HandlerInfo> {
        let pattern = normalize_path(path);
        let info = self.make_info(
            handler,
            "file".to_string(),
            pattern.clone(),
            content_type,
            JsonValue::Null,
        );

        let replaced = self
            .files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pattern, info);
        self.retire(replaced)
    }

    /// Retired handlers that no job refers to any more
    ///
    /// Each reference is reported once; the caller frees its callable.
    pub fn reclaim(&self) -> Vec<HandlerRef> {
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        let mut free = Vec::new();
        retired.retain(|info| {
            if Arc::strong_count(&info.lease) > 1 {
                true
            } else {
                free.push(info.handler);
                false
            }
        });
        free
    }

    fn retire(&self, replaced: Option<HandlerInfo>) -> Option<HandlerInfo> {
        if let Some(info) = &replaced {
            self.retired
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(info.clone());
        }
        replaced
    }

    /// Resolve `(method, path)` to a handler
    pub fn get_handler(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let method = normalize_method(method);
        let path = normalize_path(path);
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(by_method) = routes.get(&path) {
            if let Some(info) = by_method.get(&method).or_else(|| by_method.get(ANY_METHOD)) {
                return Some(RouteMatch {
                    info: info.clone(),
                    params: path_params(&info.pattern, &path).unwrap_or_default(),
                });
            }
        }

        let mut best: Option<(Rank, &HandlerInfo, BTreeMap<String, String>)> = None;

        for (pattern, by_method) in routes.iter() {
            if !pattern.contains("/:") {
                continue;
            }
            let Some(params) = path_params(pattern, &path) else {
                continue;
            };
            let literals = literal_segments(pattern);

            for (candidate_method, info) in by_method {
                let specific = if *candidate_method == method {
                    true
                } else if candidate_method == ANY_METHOD {
                    false
                } else {
                    continue;
                };

                let rank = Rank {
                    literals,
                    specific,
                    sequence: info.sequence,
                };
                if best.as_ref().map_or(true, |(current, _, _)| rank.beats(current)) {
                    best = Some((rank, info, params.clone()));
                }
            }
        }

        best.map(|(_, info, params)| RouteMatch {
            info: info.clone(),
            params,
        })
    }

    /// Exact-path lookup of a file handler
    pub fn get_file_handler(&self, path: &str) -> Option<HandlerInfo> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize_path(path))
            .cloned()
    }

    /// All route entries, in registration order
    pub fn routes(&self) -> Vec<HandlerInfo> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = routes
            .values()
            .flat_map(|by_method| by_method.values().cloned())
            .collect();
        all.sort_by_key(|info| info.sequence);
        all
    }

    /// All file handlers, in registration order
    pub fn file_handlers(&self) -> Vec<HandlerInfo> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = files.values().cloned().collect();
        all.sort_by_key(|info| info.sequence);
        all
    }

    pub fn len(&self) -> usize {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        routes.values().map(HashMap::len).sum::<usize>() + files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make_info(
        &self,
        handler: HandlerRef,
        method: String,
        pattern: String,
        content_type: Option<String>,
        options: JsonValue,
    ) -> HandlerInfo {
        let mut options = match options {
            JsonValue::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        options.insert("path".to_string(), JsonValue::String(pattern.clone()));

        HandlerInfo {
            handler,
            method,
            pattern,
            content_type,
            options: JsonValue::Object(options),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            lease: Arc::new(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Rank {
    literals: usize,
    specific: bool,
    sequence: u64,
}

impl Rank {
    fn beats(&self, other: &Rank) -> bool {
        (self.literals, self.specific, std::cmp::Reverse(self.sequence))
            > (other.literals, other.specific, std::cmp::Reverse(other.sequence))
    }
}

/// Match `path` against `pattern`, capturing `:name` segments
///
/// Segment counts must be equal and every literal segment must match
/// exactly; `:` segments match any single segment, including an empty one.
pub fn path_params(pattern: &str, path: &str) -> Option<BTreeMap<String, String>> {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();

    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = BTreeMap::new();
    for (expected, actual) in pattern_segments.iter().zip(&path_segments) {
        match expected.strip_prefix(':') {
            Some(name) => {
                params.insert(name.to_string(), (*actual).to_string());
            }
            None if expected == actual => {}
            None => return None,
        }
    }
    Some(params)
}

fn literal_segments(pattern: &str) -> usize {
    pattern
        .split('/')
        .filter(|segment| !segment.is_empty() && !segment.starts_with(':'))
        .count()
}

/// Lower-case method name; `use`/`all`/`*` collapse to [`ANY_METHOD`]
pub fn normalize_method(method: &str) -> String {
    let method = method.trim().to_ascii_lowercase();
    match method.as_str() {
        "*" | "use" | "all" => ANY_METHOD.to_string(),
        _ => method,
    }
}

/// Leading slash, no trailing slash (except for the root), no query string
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default().trim();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn register(registry: &Registry, method: &str, path: &str, id: u64) {
        registry.register(method, path, HandlerRef(id), None, JsonValue::Null);
    }

    fn resolve(registry: &Registry, method: &str, path: &str) -> Option<u64> {
        registry.get_handler(method, path).map(|m| m.info.handler.0)
    }

    #[test]
    fn test_exact_match_beats_earlier_pattern() {
        let registry = Registry::new();
        register(&registry, "GET", "/users/:id", 1);
        register(&registry, "GET", "/users/5", 2);

        assert_eq!(resolve(&registry, "get", "/users/5"), Some(2));
        assert_eq!(resolve(&registry, "get", "/users/6"), Some(1));
    }

    #[test]
    fn test_params_are_extracted() {
        let registry = Registry::new();
        register(&registry, "get", "/api/:version/users/:id", 7);

        let matched = registry.get_handler("GET", "/api/v2/users/42").unwrap();
        assert_eq!(matched.params.get("version").map(String::as_str), Some("v2"));
        assert_eq!(matched.params.get("id").map(String::as_str), Some("42"));
        assert_eq!(matched.info.pattern, "/api/:version/users/:id");
    }

    #[test]
    fn test_segment_count_mismatch_never_matches() {
        let registry = Registry::new();
        register(&registry, "get", "/users/:id", 1);

        assert_eq!(resolve(&registry, "get", "/users"), None);
        assert_eq!(resolve(&registry, "get", "/users/1/posts"), None);
        assert!(path_params("/a/:b", "/a/b/c").is_none());
    }

    #[test]
    fn test_registration_is_last_write_wins() {
        let registry = Registry::new();
        register(&registry, "GET", "/x", 1);
        let replaced = registry.register("get", "/x", HandlerRef(2), None, JsonValue::Null);

        assert_eq!(replaced.map(|info| info.handler), Some(HandlerRef(1)));
        assert_eq!(resolve(&registry, "GET", "/x"), Some(2));
        assert_eq!(registry.routes().len(), 1);
    }

    #[test]
    fn test_replaced_handler_is_reclaimed_once_unreferenced() {
        let registry = Registry::new();
        register(&registry, "get", "/x", 1);
        let queued = registry.get_handler("GET", "/x").unwrap().info;

        register(&registry, "get", "/x", 2);
        assert!(registry.reclaim().is_empty());
        assert_eq!(queued.handler, HandlerRef(1));

        drop(queued);
        assert_eq!(registry.reclaim(), vec![HandlerRef(1)]);
        assert!(registry.reclaim().is_empty());
        assert_eq!(resolve(&registry, "GET", "/x"), Some(2));
    }

    #[test]
    fn test_method_must_match() {
        let registry = Registry::new();
        register(&registry, "post", "/items", 1);
        register(&registry, "post", "/items/:id", 2);

        assert_eq!(resolve(&registry, "get", "/items"), None);
        assert_eq!(resolve(&registry, "get", "/items/3"), None);
        assert_eq!(resolve(&registry, "post", "/items/3"), Some(2));
    }

    #[test]
    fn test_use_matches_any_method_after_specific() {
        let registry = Registry::new();
        register(&registry, "use", "/hook", 1);
        register(&registry, "post", "/hook", 2);

        assert_eq!(resolve(&registry, "post", "/hook"), Some(2));
        assert_eq!(resolve(&registry, "delete", "/hook"), Some(1));
    }

    #[test]
    fn test_tie_break_prefers_more_literals_then_earliest() {
        let registry = Registry::new();
        register(&registry, "get", "/:a/:b", 1);
        register(&registry, "get", "/files/:name", 2);
        register(&registry, "get", "/:kind/latest", 3);

        // Two literal-1 patterns match; the earlier registration wins
        assert_eq!(resolve(&registry, "get", "/files/latest"), Some(2));
        // Only the fully generic pattern matches
        assert_eq!(resolve(&registry, "get", "/x/y"), Some(1));
        assert_eq!(resolve(&registry, "get", "/docs/latest"), Some(3));
    }

    #[test]
    fn test_specific_pattern_beats_use_pattern_with_same_literals() {
        let registry = Registry::new();
        register(&registry, "use", "/api/:rest", 1);
        register(&registry, "get", "/api/:id", 2);

        assert_eq!(resolve(&registry, "get", "/api/9"), Some(2));
        assert_eq!(resolve(&registry, "put", "/api/9"), Some(1));
    }

    #[test]
    fn test_file_handlers_are_exact_only() {
        let registry = Registry::new();
        registry.register_file("/robots.txt", HandlerRef(1), Some("text/plain".into()));
        registry.register_file("/static/:name", HandlerRef(2), None);

        let file = registry.get_file_handler("/robots.txt").unwrap();
        assert_eq!(file.handler, HandlerRef(1));
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert!(registry.get_file_handler("/static/app.js").is_none());
        assert!(registry.get_handler("get", "/robots.txt").is_none());
    }

    #[test]
    fn test_options_always_carry_path() {
        let registry = Registry::new();
        registry.register(
            "get",
            "/docs/",
            HandlerRef(1),
            Some("text/html".into()),
            json!({"contentType": "text/html"}),
        );

        let info = registry.get_handler("get", "/docs").unwrap().info;
        assert_eq!(info.options["path"], "/docs");
        assert_eq!(info.options["contentType"], "text/html");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("users/"), "/users");
        assert_eq!(normalize_path("/users?x=1"), "/users");
    }
}
