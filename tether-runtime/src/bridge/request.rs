//! Native request → script-visible request value

use super::cookie::parse_cookies;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tether_logging::RequestSnapshot;

/// Request as delivered by the HTTP layer, body already buffered
#[derive(Debug, Clone)]
pub struct NativeRequest {
    pub method: Method,
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    pub body: Bytes,
}

impl NativeRequest {
    /// Build from a method and a path with optional query string
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (uri, None),
        };

        Self {
            method,
            path: path.to_string(),
            query,
            headers: HeaderMap::new(),
            remote_addr: None,
            body: Bytes::new(),
        }
    }

    /// Add a header; invalid names or values are skipped
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

/// Read-only request snapshot handed to script handlers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    /// Lower-case method
    pub method: String,
    pub path: String,
    /// Single values collapse to a string, repeated keys stay an array
    pub query: Map<String, JsonValue>,
    /// Lower-cased names, collapsed like `query`
    pub headers: Map<String, JsonValue>,
    pub cookies: BTreeMap<String, String>,
    /// Parsed JSON for JSON requests, the raw text otherwise, null when empty
    pub body: JsonValue,
    pub raw_body: String,
    pub ip: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl BridgeRequest {
    pub fn from_native(request: &NativeRequest) -> Self {
        let query = collapse(
            request
                .query
                .as_deref()
                .map(|q| {
                    url::form_urlencoded::parse(q.as_bytes())
                        .map(|(k, v)| (k.into_owned(), v.into_owned()))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default(),
        );

        let headers = collapse(request.headers.iter().map(|(name, value)| {
            (
                name.as_str().to_ascii_lowercase(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        }));

        let cookies = parse_cookies(
            request
                .headers
                .get_all(COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok()),
        );

        let raw_body = String::from_utf8_lossy(&request.body).into_owned();
        let is_json = request
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"));

        let body = if raw_body.is_empty() {
            JsonValue::Null
        } else if is_json {
            serde_json::from_str(&raw_body).unwrap_or_else(|_| JsonValue::String(raw_body.clone()))
        } else {
            JsonValue::String(raw_body.clone())
        };

        Self {
            method: request.method.as_str().to_ascii_lowercase(),
            path: request.path.clone(),
            query,
            headers,
            cookies,
            body,
            raw_body,
            ip: client_ip(&request.headers, request.remote_addr),
            params: BTreeMap::new(),
        }
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    /// Case-insensitive header lookup; repeated headers are joined with `, `
    pub fn header(&self, name: &str) -> Option<String> {
        match self.headers.get(&name.to_ascii_lowercase())? {
            JsonValue::String(value) => Some(value.clone()),
            JsonValue::Array(values) => Some(
                values
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            _ => None,
        }
    }

    /// Copy for the execution logger
    pub fn snapshot(&self, source: &str, session_id: Option<String>) -> RequestSnapshot {
        RequestSnapshot {
            method: self.method.to_ascii_uppercase(),
            path: self.path.clone(),
            headers: self
                .headers
                .keys()
                .filter_map(|name| self.header(name).map(|value| (name.clone(), value)))
                .collect(),
            query: self
                .query
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            cookies: self.cookies.clone(),
            body: (!self.raw_body.is_empty()).then(|| self.raw_body.clone()),
            remote_ip: self.ip.clone(),
            source: source.to_string(),
            session_id,
            correlation_id: self.header("x-request-id").filter(|id| !id.is_empty()),
        }
    }
}

/// `X-Forwarded-For` (first hop), then `X-Real-IP`, then the peer address
pub fn client_ip(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map(str::to_string)
        .or_else(|| remote_addr.map(|addr| addr.ip().to_string()))
}

/// Group repeated keys; one value stays a string, several become an array
fn collapse(pairs: impl IntoIterator<Item = (String, String)>) -> Map<String, JsonValue> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in pairs {
        grouped.entry(key).or_default().push(value);
    }

    grouped
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                JsonValue::String(values.remove(0))
            } else {
                JsonValue::Array(values.into_iter().map(JsonValue::String).collect())
            };
            (key, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_is_lower_cased_and_query_collapsed() {
        let native = NativeRequest::new(Method::GET, "/search?q=rust&tag=a&tag=b&empty=");
        let request = BridgeRequest::from_native(&native);

        assert_eq!(request.method, "get");
        assert_eq!(request.path, "/search");
        assert_eq!(request.query["q"], "rust");
        assert_eq!(request.query["tag"], json!(["a", "b"]));
        assert_eq!(request.query["empty"], "");
    }

    #[test]
    fn test_headers_lower_cased_and_lookup_case_insensitive() {
        let native = NativeRequest::new(Method::GET, "/")
            .with_header("X-Custom", "one")
            .with_header("Accept", "text/html")
            .with_header("Accept", "application/json");
        let request = BridgeRequest::from_native(&native);

        assert_eq!(request.headers["x-custom"], "one");
        assert_eq!(request.headers["accept"], json!(["text/html", "application/json"]));
        assert_eq!(request.header("X-CUSTOM").as_deref(), Some("one"));
        assert_eq!(
            request.header("accept").as_deref(),
            Some("text/html, application/json")
        );
        assert!(request.header("missing").is_none());
    }

    #[test]
    fn test_json_body_is_parsed() {
        let native = NativeRequest::new(Method::POST, "/items")
            .with_header("Content-Type", "application/json; charset=utf-8")
            .with_body(r#"{"name":"widget","qty":3}"#);
        let request = BridgeRequest::from_native(&native);

        assert_eq!(request.body, json!({"name": "widget", "qty": 3}));
        assert_eq!(request.raw_body, r#"{"name":"widget","qty":3}"#);
    }

    #[test]
    fn test_non_json_and_malformed_bodies_stay_text() {
        let form = NativeRequest::new(Method::POST, "/")
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body("a=1");
        assert_eq!(BridgeRequest::from_native(&form).body, "a=1");

        let broken = NativeRequest::new(Method::POST, "/")
            .with_header("content-type", "application/json")
            .with_body("{not json");
        assert_eq!(BridgeRequest::from_native(&broken).body, "{not json");

        let empty = NativeRequest::new(Method::POST, "/");
        assert_eq!(BridgeRequest::from_native(&empty).body, JsonValue::Null);
    }

    #[test]
    fn test_cookies_are_flattened() {
        let native = NativeRequest::new(Method::GET, "/")
            .with_header("Cookie", "sid=abc; theme=dark");
        let request = BridgeRequest::from_native(&native);

        assert_eq!(request.cookies.get("sid").map(String::as_str), Some("abc"));
        assert_eq!(request.cookies.get("theme").map(String::as_str), Some("dark"));
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();

        let forwarded = NativeRequest::new(Method::GET, "/")
            .with_header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
            .with_header("X-Real-IP", "198.51.100.2")
            .with_remote_addr(peer);
        assert_eq!(
            BridgeRequest::from_native(&forwarded).ip.as_deref(),
            Some("203.0.113.7")
        );

        let real = NativeRequest::new(Method::GET, "/")
            .with_header("X-Real-IP", "198.51.100.2")
            .with_remote_addr(peer);
        assert_eq!(
            BridgeRequest::from_native(&real).ip.as_deref(),
            Some("198.51.100.2")
        );

        let direct = NativeRequest::new(Method::GET, "/").with_remote_addr(peer);
        assert_eq!(BridgeRequest::from_native(&direct).ip.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn test_snapshot_for_logger() {
        let native = NativeRequest::new(Method::PUT, "/users/1?x=1")
            .with_header("content-type", "text/plain")
            .with_body("hello");
        let snapshot = BridgeRequest::from_native(&native).snapshot("http", Some("s".into()));

        assert_eq!(snapshot.method, "PUT");
        assert_eq!(snapshot.path, "/users/1");
        assert_eq!(snapshot.body.as_deref(), Some("hello"));
        assert_eq!(snapshot.headers.get("content-type").map(String::as_str), Some("text/plain"));
        assert_eq!(snapshot.session_id.as_deref(), Some("s"));
    }
}
