//! HTTP client implementation

use crate::errors::HttpError;
use crate::types::HttpMethod;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Client,
};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;
use tether_config::HttpConfig;
use tracing::{debug, info};

/// Client used by the script `fetch` binding
///
/// `params` may carry `method` (default GET) and `headers` (an object of
/// string values). The result is always a fetch-like response object:
/// `{ ok, status, statusText, headers, body }`.
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    async fn call_http(
        &self,
        url: &str,
        params: Option<&JsonValue>,
        body: Option<&JsonValue>,
    ) -> Result<JsonValue, HttpError>;
}

/// reqwest-backed [`HttpClient`] with an offline mock mode
#[derive(Debug, Clone)]
pub struct HttpManager {
    offline: bool,
    mocks: HashMap<String, JsonValue>,
    config: HttpConfig,
    client: OnceLock<Client>,
}

impl Default for HttpManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpManager {
    pub fn new() -> Self {
        Self::with_config(HttpConfig::default())
    }

    pub fn with_config(config: HttpConfig) -> Self {
        debug!(
            "Creating HttpManager with timeout: {}s",
            config.timeout.as_secs()
        );
        Self {
            offline: false,
            mocks: HashMap::new(),
            config,
            client: OnceLock::new(),
        }
    }

    /// Answer only from registered mocks, never touching the network
    pub fn set_offline(&mut self) {
        self.offline = true;
        debug!("HttpManager set to offline mode");
    }

    pub fn set_online(&mut self) {
        self.offline = false;
        debug!("HttpManager set to online mode");
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Register a mock response body for `method url`
    pub fn add_mock(&mut self, method: HttpMethod, url: &str, response: JsonValue) {
        self.mocks.insert(mock_key(method, url), response);
        debug!("Added HTTP mock for {} {}", method, url);
    }

    pub fn clear_mocks(&mut self) {
        self.mocks.clear();
    }

    /// Exact `METHOD:URL` match first, then a substring match either way
    fn find_mock(&self, method: HttpMethod, url: &str) -> Option<&JsonValue> {
        if let Some(response) = self.mocks.get(&mock_key(method, url)) {
            return Some(response);
        }

        self.mocks.iter().find_map(|(key, response)| {
            let (mock_method, mock_url) = key.split_once(':')?;
            let hit = mock_method == method.as_str()
                && (url.contains(mock_url) || mock_url.contains(url));
            hit.then_some(response)
        })
    }

    fn client(&self) -> Result<&Client, HttpError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }

        let built = Client::builder()
            .timeout(self.config.timeout)
            .user_agent(&self.config.user_agent)
            .danger_accept_invalid_certs(!self.config.verify_ssl)
            .redirect(reqwest::redirect::Policy::limited(
                self.config.max_redirects as usize,
            ))
            .build()?;

        Ok(self.client.get_or_init(|| built))
    }
}

#[async_trait::async_trait]
impl HttpClient for HttpManager {
    async fn call_http(
        &self,
        url: &str,
        params: Option<&JsonValue>,
        body: Option<&JsonValue>,
    ) -> Result<JsonValue, HttpError> {
        let method = match params.and_then(|p| p.get("method")).and_then(|m| m.as_str()) {
            Some(method) => method.parse::<HttpMethod>()?,
            None => HttpMethod::Get,
        };

        if self.offline {
            return match self.find_mock(method, url) {
                Some(mock) => {
                    debug!("Serving mock response for {} {}", method, url);
                    Ok(json!({
                        "ok": true,
                        "status": 200,
                        "statusText": "OK",
                        "headers": {},
                        "body": mock
                    }))
                }
                None => Err(HttpError::MockNotFound {
                    method: method.to_string(),
                    url: url.to_string(),
                }),
            };
        }

        let parsed = reqwest::Url::parse(url).map_err(|e| HttpError::InvalidUrl(e.to_string()))?;

        info!("Making HTTP request: {} {}", method, parsed);

        let headers = build_headers(params)?;
        let has_content_type = headers.contains_key(CONTENT_TYPE);
        let mut request = self
            .client()?
            .request(reqwest::Method::from(method), parsed)
            .headers(headers);

        match body {
            None | Some(JsonValue::Null) => {}
            // Strings are sent verbatim so pre-serialised or form bodies survive
            Some(JsonValue::String(text)) => {
                request = request.body(text.clone());
                if !has_content_type {
                    request = request.header(CONTENT_TYPE, "text/plain; charset=utf-8");
                }
            }
            Some(value) => {
                request = request.json(value);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or("Unknown Status");

        info!("HTTP response received: {} {}", status.as_u16(), status_text);

        let response_headers: Map<String, JsonValue> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), JsonValue::String(v.to_string())))
            })
            .collect();

        // Read once, then decide: JSON when it parses, text otherwise
        let text = response.text().await?;
        let response_body = if text.trim().is_empty() {
            JsonValue::String(text)
        } else {
            serde_json::from_str::<JsonValue>(&text).unwrap_or(JsonValue::String(text))
        };

        Ok(json!({
            "ok": status.is_success(),
            "status": status.as_u16(),
            "statusText": status_text,
            "headers": response_headers,
            "body": response_body
        }))
    }
}

fn mock_key(method: HttpMethod, url: &str) -> String {
    format!("{}:{}", method.as_str(), url)
}

fn build_headers(params: Option<&JsonValue>) -> Result<HeaderMap, HttpError> {
    let mut header_map = HeaderMap::new();

    let Some(headers) = params
        .and_then(|p| p.get("headers"))
        .and_then(|h| h.as_object())
    else {
        return Ok(header_map);
    };

    for (key, value) in headers {
        let value = match value {
            JsonValue::String(s) => s.clone(),
            JsonValue::Null => continue,
            other => other.to_string(),
        };

        let name =
            HeaderName::from_str(key).map_err(|_| HttpError::InvalidHeader(key.to_string()))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|_| HttpError::InvalidHeader(format!("{key}: {value}")))?;
        header_map.insert(name, value);
    }

    Ok(header_map)
}
