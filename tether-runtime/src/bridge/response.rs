//! Script-visible response with deferred, single-shot writes
//!
//! Status, headers and cookies are buffered until the first terminal call
//! (`send`, `json`, `redirect`, `end`, `sendStatus`), which hands one
//! complete [`NativeResponse`] to the underlying [`ResponseWriter`]. Every
//! call after that is a no-op.

use super::cookie::{expired_cookie, serialize_cookie, CookieOptions};
use bytes::Bytes;
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Body of the generic error reply
pub const INTERNAL_ERROR_BODY: &str = "Internal Server Error";

/// A complete reply as handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct NativeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl NativeResponse {
    /// First header with `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Transport side of a response; receives exactly one write
pub trait ResponseWriter: Send {
    fn write(&mut self, response: NativeResponse);
}

impl<F> ResponseWriter for F
where
    F: FnMut(NativeResponse) + Send,
{
    fn write(&mut self, response: NativeResponse) {
        self(response)
    }
}

/// Writer that forwards the reply over a oneshot channel
pub struct ChannelWriter {
    sender: Option<oneshot::Sender<NativeResponse>>,
}

impl ChannelWriter {
    pub fn new() -> (Self, oneshot::Receiver<NativeResponse>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }
}

impl ResponseWriter for ChannelWriter {
    fn write(&mut self, response: NativeResponse) {
        if let Some(sender) = self.sender.take() {
            // The caller may have given up waiting; nothing to do then
            let _ = sender.send(response);
        }
    }
}

/// Argument of a terminal write
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Text(String),
    Bytes(Bytes),
    Json(JsonValue),
}

impl Payload {
    /// JSON strings are sent as text, null as no body, the rest as JSON
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Payload::Empty,
            JsonValue::String(text) => Payload::Text(text),
            other => Payload::Json(other),
        }
    }
}

/// What was actually written, kept for the execution logger
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Pick a content type for a string body with no explicit type
pub fn sniff_content_type(body: &str) -> &'static str {
    let trimmed = body.trim();
    let prefix: String = trimmed.chars().take(14).collect::<String>().to_ascii_lowercase();

    if prefix.starts_with("<!doctype html") || prefix.starts_with("<html") || prefix.starts_with("<!") {
        "text/html"
    } else if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        "application/json"
    } else {
        "text/plain"
    }
}

/// Expand `res.type()` shorthands into a MIME type
pub fn mime_for(kind: &str) -> String {
    if kind.contains('/') {
        return kind.to_string();
    }
    match kind.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "text" | "txt" => "text/plain",
        "xml" => "application/xml",
        "js" => "application/javascript",
        "css" => "text/css",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
    .to_string()
}

pub struct BridgeResponse {
    status: u16,
    headers: Vec<(String, String)>,
    cookies: Vec<String>,
    default_content_type: Option<String>,
    writer: Box<dyn ResponseWriter>,
    committed: Option<CommittedResponse>,
}

impl BridgeResponse {
    /// `default_content_type` is the handler's override, used when the
    /// script did not set a Content-Type itself
    pub fn new(writer: Box<dyn ResponseWriter>, default_content_type: Option<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            cookies: Vec::new(),
            default_content_type,
            writer,
            committed: None,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.committed.is_some()
    }

    pub fn committed(&self) -> Option<&CommittedResponse> {
        self.committed.as_ref()
    }

    pub fn pending_status(&self) -> u16 {
        self.status
    }

    pub fn status(&mut self, code: u16) -> bool {
        if self.is_sent() || !(100..=999).contains(&code) {
            return false;
        }
        self.status = code;
        true
    }

    /// Set a header, replacing earlier values of the same name
    pub fn set(&mut self, name: &str, value: &str) -> bool {
        if self.is_sent() {
            return false;
        }
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        true
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&mut self, kind: &str) -> bool {
        self.set("Content-Type", &mime_for(kind))
    }

    pub fn cookie(&mut self, name: &str, value: &str, options: &CookieOptions) -> bool {
        if self.is_sent() {
            return false;
        }
        self.cookies.push(serialize_cookie(name, value, options));
        true
    }

    pub fn clear_cookie(&mut self, name: &str, options: &CookieOptions) -> bool {
        if self.is_sent() {
            return false;
        }
        self.cookies.push(expired_cookie(name, options));
        true
    }

    /// Terminal write with content-type detection
    pub fn send(&mut self, payload: Payload) -> bool {
        if self.is_sent() {
            return false;
        }

        let (body, detected) = match payload {
            Payload::Empty => (Bytes::new(), None),
            Payload::Text(text) => {
                let detected = sniff_content_type(&text);
                (Bytes::from(text), Some(detected))
            }
            Payload::Bytes(bytes) => (bytes, Some("application/octet-stream")),
            Payload::Json(value) => (encode_json(&value), Some("application/json")),
        };

        if let Some(detected) = detected {
            if self.get("content-type").is_none() {
                let content_type = self
                    .default_content_type
                    .clone()
                    .unwrap_or_else(|| detected.to_string());
                self.set("Content-Type", &content_type);
            }
        }

        self.commit(body)
    }

    /// Terminal write that always uses `application/json`
    pub fn json(&mut self, value: &JsonValue) -> bool {
        if self.is_sent() {
            return false;
        }
        self.set("Content-Type", "application/json");
        self.commit(encode_json(value))
    }

    pub fn redirect(&mut self, status: Option<u16>, location: &str) -> bool {
        if self.is_sent() {
            return false;
        }
        self.status(status.unwrap_or(302));
        self.set("Location", location);
        self.commit(Bytes::new())
    }

    pub fn end(&mut self, payload: Option<Payload>) -> bool {
        self.send(payload.unwrap_or(Payload::Empty))
    }

    /// Set the status and send its reason phrase as the body
    pub fn send_status(&mut self, code: u16) -> bool {
        if !self.status(code) {
            return false;
        }
        let reason = http::StatusCode::from_u16(code)
            .ok()
            .and_then(|status| status.canonical_reason())
            .map(str::to_string)
            .unwrap_or_else(|| code.to_string());
        self.set("Content-Type", "text/plain");
        self.commit(Bytes::from(reason))
    }

    /// Implicit reply for handlers that never sent one
    pub fn finish_default(&mut self) -> bool {
        if self.is_sent() {
            return false;
        }
        self.commit(Bytes::new())
    }

    /// Generic 500, only if nothing was written yet
    pub fn fail(&mut self) -> bool {
        if self.is_sent() {
            return false;
        }
        self.status = 500;
        self.headers.clear();
        self.cookies.clear();
        self.set("Content-Type", "text/plain");
        self.commit(Bytes::from_static(INTERNAL_ERROR_BODY.as_bytes()))
    }

    fn commit(&mut self, body: Bytes) -> bool {
        let mut headers = std::mem::take(&mut self.headers);
        headers.extend(
            self.cookies
                .drain(..)
                .map(|cookie| ("Set-Cookie".to_string(), cookie)),
        );

        let committed = CommittedResponse {
            status: self.status,
            content_type: headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case("content-type"))
                .map(|(_, value)| value.clone()),
            body: String::from_utf8_lossy(&body).into_owned(),
        };

        self.writer.write(NativeResponse {
            status: self.status,
            headers,
            body,
        });
        self.committed = Some(committed);
        true
    }
}

fn encode_json(value: &JsonValue) -> Bytes {
    Bytes::from(serde_json::to_vec(value).unwrap_or_default())
}

/// Shared handle to the response of the job being executed
#[derive(Clone)]
pub struct ResponseHandle {
    inner: Arc<Mutex<BridgeResponse>>,
}

impl ResponseHandle {
    pub fn new(writer: Box<dyn ResponseWriter>, default_content_type: Option<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BridgeResponse::new(writer, default_content_type))),
        }
    }

    /// Run `f` with exclusive access to the response
    pub fn with<T>(&self, f: impl FnOnce(&mut BridgeResponse) -> T) -> T {
        f(&mut self.lock())
    }

    pub fn is_sent(&self) -> bool {
        self.lock().is_sent()
    }

    pub fn committed(&self) -> Option<CommittedResponse> {
        self.lock().committed().cloned()
    }

    fn lock(&self) -> MutexGuard<'_, BridgeResponse> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recording() -> (ResponseHandle, Arc<Mutex<Vec<NativeResponse>>>) {
        recording_with(None)
    }

    fn recording_with(
        default_content_type: Option<&str>,
    ) -> (ResponseHandle, Arc<Mutex<Vec<NativeResponse>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let sink = writes.clone();
        let handle = ResponseHandle::new(
            Box::new(move |response: NativeResponse| sink.lock().unwrap().push(response)),
            default_content_type.map(str::to_string),
        );
        (handle, writes)
    }

    #[test]
    fn test_first_write_wins() {
        let (res, writes) = recording();

        res.with(|r| {
            r.status(201);
            assert!(r.send(Payload::Text("first".into())));
            assert!(!r.json(&json!({"second": true})));
            assert!(!r.end(None));
            assert!(!r.redirect(None, "/elsewhere"));
            assert!(!r.status(500));
            assert!(!r.set("X-Late", "1"));
        });

        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].status, 201);
        assert_eq!(writes[0].text(), "first");
        assert!(writes[0].header("x-late").is_none());
        assert!(res.is_sent());
    }

    #[test]
    fn test_content_type_sniffing() {
        let cases = [
            ("<html><body>hi</body></html>", "text/html"),
            ("<!DOCTYPE html><html></html>", "text/html"),
            ("<!-- comment -->", "text/html"),
            (r#"{"a":1}"#, "application/json"),
            ("  [1, 2, 3] ", "application/json"),
            ("plain", "text/plain"),
            ("{unbalanced", "text/plain"),
        ];

        for (body, expected) in cases {
            let (res, writes) = recording();
            res.with(|r| r.send(Payload::Text(body.to_string())));
            assert_eq!(
                writes.lock().unwrap()[0].header("content-type"),
                Some(expected),
                "body: {body}"
            );
        }
    }

    #[test]
    fn test_explicit_content_type_wins() {
        let (res, writes) = recording();
        res.with(|r| {
            r.set("content-type", "text/csv");
            r.send(Payload::Text("<html>".into()))
        });
        assert_eq!(writes.lock().unwrap()[0].header("Content-Type"), Some("text/csv"));
    }

    #[test]
    fn test_handler_override_beats_sniffing_not_explicit() {
        let (res, writes) = recording_with(Some("text/markdown"));
        res.with(|r| r.send(Payload::Text("{}".into())));
        assert_eq!(
            writes.lock().unwrap()[0].header("content-type"),
            Some("text/markdown")
        );

        let (res, writes) = recording_with(Some("text/markdown"));
        res.with(|r| {
            r.content_type("html");
            r.send(Payload::Text("# title".into()))
        });
        assert_eq!(writes.lock().unwrap()[0].header("content-type"), Some("text/html"));
    }

    #[test]
    fn test_json_always_sets_json() {
        let (res, writes) = recording();
        res.with(|r| {
            r.set("Content-Type", "text/plain");
            r.json(&json!({"msg": "hi"}))
        });

        let writes = writes.lock().unwrap();
        assert_eq!(writes[0].header("content-type"), Some("application/json"));
        assert_eq!(writes[0].text(), r#"{"msg":"hi"}"#);
    }

    #[test]
    fn test_non_string_and_byte_payloads() {
        let (res, writes) = recording();
        res.with(|r| r.send(Payload::Json(json!([1, 2]))));
        assert_eq!(writes.lock().unwrap()[0].text(), "[1,2]");
        assert_eq!(
            writes.lock().unwrap()[0].header("content-type"),
            Some("application/json")
        );

        let (res, writes) = recording();
        res.with(|r| r.send(Payload::Bytes(Bytes::from_static(&[0, 159, 146]))));
        assert_eq!(
            writes.lock().unwrap()[0].header("content-type"),
            Some("application/octet-stream")
        );
    }

    #[test]
    fn test_redirect_defaults_to_302() {
        let (res, writes) = recording();
        res.with(|r| r.redirect(None, "/login"));
        let writes = writes.lock().unwrap();
        assert_eq!(writes[0].status, 302);
        assert_eq!(writes[0].header("location"), Some("/login"));

        let (res, writes) = recording();
        res.with(|r| r.redirect(Some(301), "/new"));
        assert_eq!(writes.lock().unwrap()[0].status, 301);
    }

    #[test]
    fn test_cookies_flush_with_first_write() {
        let (res, writes) = recording();
        res.with(|r| {
            r.cookie("sid", "abc", &CookieOptions::default());
            r.clear_cookie("old", &CookieOptions::default());
            r.end(None)
        });

        let writes = writes.lock().unwrap();
        let cookies: Vec<_> = writes[0].headers_named("set-cookie").collect();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0], "sid=abc; Path=/");
        assert!(cookies[1].starts_with("old=; Path=/; Max-Age=0"));
        assert!(writes[0].body.is_empty());
        assert!(writes[0].header("content-type").is_none());
    }

    #[test]
    fn test_send_status_uses_reason_phrase() {
        let (res, writes) = recording();
        res.with(|r| r.send_status(404));
        let writes = writes.lock().unwrap();
        assert_eq!(writes[0].status, 404);
        assert_eq!(writes[0].text(), "Not Found");
    }

    #[test]
    fn test_finish_default_and_fail_only_when_unsent() {
        let (res, writes) = recording();
        assert!(res.with(|r| r.finish_default()));
        assert!(!res.with(|r| r.fail()));
        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].status, 200);
        assert!(writes[0].body.is_empty());

        let (res, writes) = recording();
        res.with(|r| {
            r.set("X-Partial", "1");
            r.status(202);
            r.fail()
        });
        let writes = writes.lock().unwrap();
        assert_eq!(writes[0].status, 500);
        assert_eq!(writes[0].text(), INTERNAL_ERROR_BODY);
        assert!(writes[0].header("x-partial").is_none());
    }

    #[test]
    fn test_invalid_status_is_ignored() {
        let (res, writes) = recording();
        res.with(|r| {
            assert!(!r.status(42));
            r.end(None)
        });
        assert_eq!(writes.lock().unwrap()[0].status, 200);
    }

    #[test]
    fn test_mime_shorthands() {
        assert_eq!(mime_for("json"), "application/json");
        assert_eq!(mime_for(".html"), "text/html");
        assert_eq!(mime_for("image/png"), "image/png");
    }
}
