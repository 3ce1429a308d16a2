//! Units of work consumed by the dispatcher

use crate::bridge::{NativeRequest, ResponseWriter};
use crate::error::ExecutionError;
use crate::registry::HandlerInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use tether_logging::LogEntry;
use tokio::sync::oneshot;

/// Which surface submitted a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    /// Inbound request to a script-registered route
    Http,
    #[default]
    Api,
    Mcp,
    File,
    Startup,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobSource::Http => "http",
            JobSource::Api => "api",
            JobSource::Mcp => "mcp",
            JobSource::File => "file",
            JobSource::Startup => "startup",
        }
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(JobSource::Http),
            "api" => Ok(JobSource::Api),
            "mcp" => Ok(JobSource::Mcp),
            "file" => Ok(JobSource::File),
            "startup" => Ok(JobSource::Startup),
            other => Err(format!("Unknown job source: {other}")),
        }
    }
}

/// The native request of an HTTP-triggered job and where its reply goes
pub struct HttpExchange {
    pub request: NativeRequest,
    pub writer: Box<dyn ResponseWriter>,
}

/// What a job runs: a bound handler or raw code, never both
pub enum JobWork {
    Code(String),
    Handler {
        info: HandlerInfo,
        exchange: HttpExchange,
    },
}

/// Completion signal: `Err` when the script failed or the job faulted
pub type Done = Result<(), ExecutionError>;

/// Outcome of one job as reported to callers that asked for it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub console: Vec<LogEntry>,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl EvalResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Job {
    pub work: JobWork,
    pub done: Option<oneshot::Sender<Done>>,
    pub result: Option<oneshot::Sender<EvalResult>>,
    pub session_id: Option<String>,
    pub source: JobSource,
}

impl Job {
    pub fn code(code: impl Into<String>, source: JobSource) -> Self {
        Self {
            work: JobWork::Code(code.into()),
            done: None,
            result: None,
            session_id: None,
            source,
        }
    }

    pub fn handler(
        info: HandlerInfo,
        request: NativeRequest,
        writer: Box<dyn ResponseWriter>,
    ) -> Self {
        Self {
            work: JobWork::Handler {
                info,
                exchange: HttpExchange { request, writer },
            },
            done: None,
            result: None,
            session_id: None,
            source: JobSource::Http,
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Attach a completion signal
    pub fn with_done(mut self) -> (Self, oneshot::Receiver<Done>) {
        let (sender, receiver) = oneshot::channel();
        self.done = Some(sender);
        (self, receiver)
    }

    /// Attach a result channel
    pub fn with_result(mut self) -> (Self, oneshot::Receiver<EvalResult>) {
        let (sender, receiver) = oneshot::channel();
        self.result = Some(sender);
        (self, receiver)
    }

    pub fn is_http(&self) -> bool {
        matches!(self.work, JobWork::Handler { .. })
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let work = match &self.work {
            JobWork::Code(code) => format!("code ({} bytes)", code.len()),
            JobWork::Handler { info, exchange } => format!(
                "handler {} for {} {}",
                info.handler, exchange.request.method, exchange.request.path
            ),
        };
        f.debug_struct("Job")
            .field("work", &work)
            .field("source", &self.source)
            .field("session_id", &self.session_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_logging::LogLevel;

    #[test]
    fn test_eval_result_wire_format() {
        let result = EvalResult {
            value: Some(json!({ "n": 1 })),
            error: None,
            console: vec![LogEntry::new(LogLevel::Info, "hello")],
            duration_ms: 1.5,
            request_id: Some("req-1".to_string()),
        };

        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["requestId"], json!("req-1"));
        assert_eq!(wire["console"][0]["message"], json!("hello"));
        assert!(wire.get("error").is_none());

        let parsed: EvalResult = serde_json::from_value(wire).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_job_source_parses_case_insensitively() {
        assert_eq!("MCP".parse::<JobSource>(), Ok(JobSource::Mcp));
        assert!("cron".parse::<JobSource>().is_err());
    }
}
