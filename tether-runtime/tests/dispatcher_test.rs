use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_config::EngineConfig;
use tether_logging::LogLevel;
use tether_runtime::{
    BridgeRequest, Engine, EngineError, ExecutionError, HandlerInfo, HandlerRef, Job, JobScope,
    JobSource, NativeRequest, Payload, ResponseHandle, RuntimeContext, ScriptRuntime,
};
use tether_storage::{ExecutionRepository, MemoryExecutionRepository};

#[derive(Clone, Copy)]
enum Behavior {
    Json,
    EchoParams,
    Silent,
    Fail,
    FailAfterSend,
    Panic,
}

/// Interprets a tiny command language instead of real script code
struct MockRuntime {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    order: Arc<Mutex<Vec<String>>>,
    handlers: HashMap<u64, Behavior>,
}

impl ScriptRuntime for MockRuntime {
    fn eval(&mut self, code: &str, scope: &JobScope) -> Result<Option<JsonValue>, ExecutionError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.order.lock().unwrap().push(code.to_string());

        let outcome = if let Some(ms) = code.strip_prefix("sleep:") {
            std::thread::sleep(Duration::from_millis(ms.parse().unwrap()));
            Ok(None)
        } else if let Some(msg) = code.strip_prefix("fail:") {
            Err(ExecutionError::Script(msg.to_string()))
        } else if let Some(msg) = code.strip_prefix("log:") {
            scope.console(LogLevel::Log, msg, None);
            Ok(None)
        } else if code == "panic" {
            self.active.fetch_sub(1, Ordering::SeqCst);
            panic!("interpreter blew up");
        } else {
            Ok(Some(serde_json::from_str(code).unwrap_or(JsonValue::Null)))
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn call_handler(
        &mut self,
        info: &HandlerInfo,
        request: &BridgeRequest,
        response: &ResponseHandle,
        _scope: &JobScope,
    ) -> Result<(), ExecutionError> {
        match self.handlers.get(&info.handler.0).copied() {
            Some(Behavior::Json) => {
                response.with(|r| r.json(&json!({"msg": "hi"})));
                Ok(())
            }
            Some(Behavior::EchoParams) => {
                let params = serde_json::to_value(&request.params).unwrap();
                response.with(|r| r.json(&params));
                Ok(())
            }
            Some(Behavior::Silent) => Ok(()),
            Some(Behavior::Fail) => Err(ExecutionError::Script("boom".into())),
            Some(Behavior::FailAfterSend) => {
                response.with(|r| r.status(201) && r.send(Payload::Text("partial".into())));
                Err(ExecutionError::Script("late boom".into()))
            }
            Some(Behavior::Panic) => panic!("handler blew up"),
            None => Err(ExecutionError::HandlerNotFound(info.handler.0)),
        }
    }
}

struct Harness {
    engine: Engine,
    peak: Arc<AtomicUsize>,
    order: Arc<Mutex<Vec<String>>>,
}

async fn start(config: EngineConfig, handlers: &[(u64, Behavior)]) -> Harness {
    start_with(Engine::builder(config), handlers).await
}

async fn start_with(builder: tether_runtime::EngineBuilder, handlers: &[(u64, Behavior)]) -> Harness {
    let peak = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));
    let runtime = MockRuntime {
        active: Arc::new(AtomicUsize::new(0)),
        peak: peak.clone(),
        order: order.clone(),
        handlers: handlers.iter().copied().collect(),
    };

    let engine = builder
        .start(move |_ctx: RuntimeContext| Ok(runtime))
        .await
        .expect("engine should start");

    Harness {
        engine,
        peak,
        order,
    }
}

fn get(path: &str) -> NativeRequest {
    NativeRequest::new(http::Method::GET, path)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_jobs_never_overlap() {
    let harness = start(EngineConfig::default(), &[]).await;
    let engine = Arc::new(harness.engine);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.execute("sleep:5", JobSource::Api, None).await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap().is_success());
    }

    assert_eq!(harness.peak.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().processed, 16);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_jobs_run_in_submission_order() {
    let harness = start(EngineConfig::default(), &[]).await;

    let mut receivers = Vec::new();
    for i in 0..10 {
        let (job, done) = Job::code(i.to_string(), JobSource::Api).with_done();
        harness.engine.submit(job).await.unwrap();
        receivers.push(done);
    }
    for done in receivers {
        assert!(done.await.unwrap().is_ok());
    }

    let order = harness.order.lock().unwrap().clone();
    let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    assert_eq!(order, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_returns_value_and_console() {
    let harness = start(EngineConfig::default(), &[]).await;

    let result = harness
        .engine
        .execute(r#"{"a": 1}"#, JobSource::Api, None)
        .await
        .unwrap();
    assert_eq!(result.value, Some(json!({"a": 1})));
    assert!(result.request_id.is_some());

    let result = harness
        .engine
        .execute("log:hello", JobSource::Mcp, None)
        .await
        .unwrap();
    assert_eq!(result.console.len(), 1);
    assert_eq!(result.console[0].message, "hello");

    let record = harness
        .engine
        .request_logger()
        .get(result.request_id.as_deref().unwrap())
        .unwrap();
    assert_eq!(record.request.source, "mcp");
    assert_eq!(record.logs.len(), 1);
    assert!(record.is_finished());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_script_error_reported_through_done() {
    let harness = start(EngineConfig::default(), &[]).await;

    let (job, done) = Job::code("fail:nope", JobSource::Api).with_done();
    harness.engine.submit(job).await.unwrap();
    assert_eq!(
        done.await.unwrap(),
        Err(ExecutionError::Script("nope".into()))
    );

    let result = harness
        .engine
        .execute("fail:again", JobSource::Api, None)
        .await
        .unwrap();
    assert_eq!(result.error.as_deref(), Some("again"));
    assert_eq!(harness.engine.stats().failed, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_panic_is_contained() {
    let harness = start(EngineConfig::default(), &[]).await;

    let (job, done) = Job::code("panic", JobSource::Api).with_done();
    harness.engine.submit(job).await.unwrap();
    let outcome = done.await.unwrap();
    assert!(matches!(outcome, Err(ExecutionError::Panic(ref msg)) if msg.contains("blew up")));

    let result = harness
        .engine
        .execute("42", JobSource::Api, None)
        .await
        .unwrap();
    assert_eq!(result.value, Some(json!(42)));
    assert_eq!(harness.engine.stats().panics, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handle_http_routes_and_extracts_params() {
    let harness = start(
        EngineConfig::default(),
        &[(1, Behavior::Json), (2, Behavior::EchoParams)],
    )
    .await;
    let registry = harness.engine.registry();
    registry.register("get", "/hello", HandlerRef(1), None, json!({}));
    registry.register("get", "/api/:version/users/:id", HandlerRef(2), None, json!({}));

    let response = harness
        .engine
        .handle_http(get("/hello"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(response.text(), r#"{"msg":"hi"}"#);

    let response = harness
        .engine
        .handle_http(get("/api/v2/users/42?x=1"))
        .await
        .unwrap()
        .unwrap();
    let params: JsonValue = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(params, json!({"version": "v2", "id": "42"}));

    assert!(harness
        .engine
        .handle_http(get("/missing"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handler_without_reply_gets_default_200() {
    let harness = start(EngineConfig::default(), &[(1, Behavior::Silent)]).await;
    harness
        .engine
        .registry()
        .register("post", "/quiet", HandlerRef(1), None, json!({}));

    let request = NativeRequest::new(http::Method::POST, "/quiet");
    let response = harness.engine.handle_http(request).await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handler_error_before_send_becomes_500() {
    let harness = start(
        EngineConfig::default(),
        &[(1, Behavior::Fail), (2, Behavior::Panic)],
    )
    .await;
    let registry = harness.engine.registry();
    registry.register("get", "/fail", HandlerRef(1), None, json!({}));
    registry.register("get", "/panic", HandlerRef(2), None, json!({}));

    for path in ["/fail", "/panic"] {
        let response = harness.engine.handle_http(get(path)).await.unwrap().unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(response.text(), "Internal Server Error");
    }

    let logs = harness.engine.request_logger().list(&Default::default());
    assert!(logs.iter().all(|log| log.status == Some(500)));
    assert!(logs.iter().all(|log| log.error.is_some()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handler_error_after_send_keeps_first_reply() {
    let harness = start(EngineConfig::default(), &[(1, Behavior::FailAfterSend)]).await;
    harness
        .engine
        .registry()
        .register("get", "/late", HandlerRef(1), None, json!({}));

    let response = harness.engine.handle_http(get("/late")).await.unwrap().unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.text(), "partial");
    assert_eq!(response.header("content-type"), Some("text/plain"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_re_registration_replaces_handler() {
    let harness = start(
        EngineConfig::default(),
        &[(1, Behavior::Fail), (2, Behavior::Json)],
    )
    .await;
    let registry = harness.engine.registry();
    registry.register("get", "/x", HandlerRef(1), None, json!({}));
    let replaced = registry.register("get", "/x", HandlerRef(2), None, json!({}));
    assert_eq!(replaced.map(|info| info.handler), Some(HandlerRef(1)));

    let response = harness.engine.handle_http(get("/x")).await.unwrap().unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_file_handler_used_when_no_route_matches() {
    let harness = start(EngineConfig::default(), &[(7, Behavior::Json)]).await;
    harness
        .engine
        .registry()
        .register_file("/report.csv", HandlerRef(7), Some("text/csv".into()));

    let response = harness
        .engine
        .handle_http(get("/report.csv"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timeout_leaves_job_running() {
    let harness = start(EngineConfig::default(), &[]).await;

    let outcome = harness
        .engine
        .execute_with_timeout("sleep:300", JobSource::Startup, None, Duration::from_millis(20))
        .await;
    assert!(matches!(outcome, Err(EngineError::Timeout(_))));

    // The slow job still completes before this one starts
    let result = harness
        .engine
        .execute("1", JobSource::Api, None)
        .await
        .unwrap();
    assert_eq!(result.value, Some(json!(1)));
    assert_eq!(
        harness.order.lock().unwrap().clone(),
        vec!["sleep:300".to_string(), "1".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_try_submit_reports_full_queue() {
    let config = EngineConfig {
        queue_capacity: 1,
        ..Default::default()
    };
    let harness = start(config, &[]).await;

    let (blocker, started) = Job::code("sleep:200", JobSource::Api).with_done();
    harness.engine.submit(blocker).await.unwrap();
    // Give the dispatcher time to pull the blocker off the queue
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness
        .engine
        .try_submit(Job::code("1", JobSource::Api))
        .unwrap();
    let overflow = harness.engine.try_submit(Job::code("2", JobSource::Api));
    assert!(matches!(overflow, Err(EngineError::QueueFull)));

    assert!(started.await.unwrap().is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_code_executions_are_persisted() {
    let repository = Arc::new(MemoryExecutionRepository::new());
    let builder = Engine::builder(EngineConfig::default()).executions(repository.clone());
    let harness = start_with(builder, &[]).await;

    harness
        .engine
        .execute("log:saved", JobSource::Api, Some("s1".into()))
        .await
        .unwrap();
    harness
        .engine
        .execute("fail:bad", JobSource::Api, Some("s1".into()))
        .await
        .unwrap();

    let records = repository.find_by_session("s1").await.unwrap();
    assert_eq!(records.len(), 2);
    let saved = records.iter().find(|r| r.code == "log:saved").unwrap();
    assert_eq!(saved.console_log, vec!["[log] saved".to_string()]);
    assert!(saved.error.is_none());
    let failed = records.iter().find(|r| r.code == "fail:bad").unwrap();
    assert_eq!(failed.error.as_deref(), Some("bad"));
    assert_eq!(failed.source, "api");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_keeps_records_of_unawaited_jobs() {
    let repository = Arc::new(MemoryExecutionRepository::new());
    let builder = Engine::builder(EngineConfig::default()).executions(repository.clone());
    let harness = start_with(builder, &[]).await;

    let job = Job::code("log:queued", JobSource::File).with_session(Some("run".into()));
    harness.engine.submit(job).await.unwrap();
    harness.engine.shutdown().await;

    let records = repository.find_by_session("run").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, "file");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_startup_scripts_report() {
    let harness = start(EngineConfig::default(), &[]).await;
    let dir = tempfile::tempdir().unwrap();

    let good = dir.path().join("good.js");
    let bad = dir.path().join("bad.js");
    let slow = dir.path().join("slow.js");
    let missing = dir.path().join("missing.js");
    std::fs::write(&good, "1").unwrap();
    std::fs::write(&bad, "fail:broken").unwrap();
    std::fs::write(&slow, "sleep:300").unwrap();

    let report = harness
        .engine
        .load_startup_scripts(&[&good, &bad, &missing, &slow], Duration::from_millis(50))
        .await
        .unwrap();

    assert_eq!(report.loaded, vec![good]);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.failed[0], (bad, "broken".to_string()));
    assert_eq!(report.timed_out, vec![slow]);
    assert!(!report.is_clean());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_factory_failure_aborts_startup() {
    let outcome = Engine::start(EngineConfig::default(), |_ctx| {
        Err::<MockRuntime, _>(ExecutionError::Init("no interpreter".into()))
    })
    .await;
    assert!(matches!(outcome, Err(EngineError::Startup(ref msg)) if msg.contains("no interpreter")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_drains_queue() {
    let harness = start(EngineConfig::default(), &[]).await;

    let (job, done) = Job::code("sleep:50", JobSource::Api).with_done();
    harness.engine.submit(job).await.unwrap();
    harness.engine.shutdown().await;

    assert!(done.await.unwrap().is_ok());
}
