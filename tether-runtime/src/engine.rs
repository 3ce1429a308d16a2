//! Composition root: owns the job queue, the dispatcher thread, the registry
//! and the execution logger

use crate::bridge::{ChannelWriter, NativeRequest, NativeResponse};
use crate::dispatcher::{panic_message, Dispatcher, DispatcherSnapshot, DispatcherStats, Persistence};
use crate::error::{EngineError, ExecutionError};
use crate::job::{EvalResult, Job, JobSource};
use crate::registry::{HandlerInfo, Registry, RouteMatch};
use crate::script::{RuntimeContext, ScriptRuntime};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tether_config::EngineConfig;
use tether_logging::RequestLogger;
use tether_storage::ExecutionRepository;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Outcome of loading the configured startup scripts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupReport {
    pub loaded: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    /// Scripts still running when the timeout elapsed
    pub timed_out: Vec<PathBuf>,
}

impl StartupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    registry: Option<Arc<Registry>>,
    logger: Option<Arc<RequestLogger>>,
    executions: Option<Arc<dyn ExecutionRepository>>,
}

impl EngineBuilder {
    /// Persist every raw-code execution through `repository`
    pub fn executions(mut self, repository: Arc<dyn ExecutionRepository>) -> Self {
        self.executions = Some(repository);
        self
    }

    pub fn request_logger(mut self, logger: Arc<RequestLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Spawn the dispatcher thread and build the runtime on it
    ///
    /// Must be called from within a Tokio runtime; the dispatcher uses its
    /// handle for async I/O and persistence.
    pub async fn start<R, F>(self, factory: F) -> Result<Engine, EngineError>
    where
        R: ScriptRuntime + 'static,
        F: FnOnce(RuntimeContext) -> Result<R, ExecutionError> + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let registry = self.registry.unwrap_or_default();
        let logger = self
            .logger
            .unwrap_or_else(|| Arc::new(RequestLogger::new(self.config.request_log_capacity)));
        let stats = Arc::new(DispatcherStats::default());

        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

        let context = RuntimeContext {
            registry: registry.clone(),
            logger: logger.clone(),
            config: self.config.clone(),
            handle: handle.clone(),
        };
        let persistence = self.executions.clone().map(|repository| Persistence {
            repository,
            handle: handle.clone(),
        });
        let thread_logger = logger.clone();
        let thread_stats = stats.clone();

        let worker = std::thread::Builder::new()
            .name("tether-dispatcher".to_string())
            .spawn(move || {
                let built = catch_unwind(AssertUnwindSafe(|| factory(context)))
                    .unwrap_or_else(|payload| {
                        Err(ExecutionError::Init(panic_message(payload.as_ref())))
                    });

                match built {
                    Ok(runtime) => {
                        let _ = ready_tx.send(Ok(()));
                        Dispatcher::new(runtime, thread_logger, thread_stats, persistence)
                            .run(receiver);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                    }
                }
            })?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                let _ = worker.join();
                return Err(EngineError::Startup(message));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(EngineError::Startup(
                    "dispatcher thread exited during startup".to_string(),
                ));
            }
        }

        info!(
            "Engine started with queue capacity {}",
            self.config.queue_capacity.max(1)
        );

        Ok(Engine {
            sender,
            registry,
            logger,
            executions: self.executions,
            stats,
            config: self.config,
            worker: Some(worker),
        })
    }
}

/// Handle to a running engine
///
/// Route lookup and the execution logger are served directly from their own
/// locks; everything that touches the interpreter is submitted as a job.
pub struct Engine {
    sender: mpsc::Sender<Job>,
    registry: Arc<Registry>,
    logger: Arc<RequestLogger>,
    executions: Option<Arc<dyn ExecutionRepository>>,
    stats: Arc<DispatcherStats>,
    config: EngineConfig,
    worker: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            registry: None,
            logger: None,
            executions: None,
        }
    }

    pub async fn start<R, F>(config: EngineConfig, factory: F) -> Result<Self, EngineError>
    where
        R: ScriptRuntime + 'static,
        F: FnOnce(RuntimeContext) -> Result<R, ExecutionError> + Send + 'static,
    {
        Self::builder(config).start(factory).await
    }

    /// Enqueue a job, waiting only while the queue is full
    pub async fn submit(&self, job: Job) -> Result<(), EngineError> {
        self.sender
            .send(job)
            .await
            .map_err(|_| EngineError::QueueClosed)
    }

    /// Enqueue a job without waiting
    pub fn try_submit(&self, job: Job) -> Result<(), EngineError> {
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EngineError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => EngineError::QueueClosed,
        })
    }

    /// Run raw code and wait for its result
    pub async fn execute(
        &self,
        code: impl Into<String>,
        source: JobSource,
        session_id: Option<String>,
    ) -> Result<EvalResult, EngineError> {
        let (job, result) = Job::code(code, source).with_session(session_id).with_result();
        self.submit(job).await?;
        result.await.map_err(|_| EngineError::DispatcherGone)
    }

    /// Like [`Engine::execute`] but stops waiting after `timeout`
    ///
    /// A timed-out job is not cancelled; it still runs and its result is
    /// discarded.
    pub async fn execute_with_timeout(
        &self,
        code: impl Into<String>,
        source: JobSource,
        session_id: Option<String>,
        timeout: Duration,
    ) -> Result<EvalResult, EngineError> {
        match tokio::time::timeout(timeout, self.execute(code, source, session_id)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(timeout)),
        }
    }

    /// Dispatch an inbound request to a registered route or file handler
    ///
    /// Returns `Ok(None)` when nothing is registered for the request.
    pub async fn handle_http(
        &self,
        request: NativeRequest,
    ) -> Result<Option<NativeResponse>, EngineError> {
        let info = match self.get_handler(request.method.as_str(), &request.path) {
            Some(route) => route.info,
            None => match self.get_file_handler(&request.path) {
                Some(info) => info,
                None => return Ok(None),
            },
        };

        debug!(
            "Routing {} {} to handler {}",
            request.method, request.path, info.handler
        );

        let (writer, reply) = ChannelWriter::new();
        let (job, done) = Job::handler(info, request, Box::new(writer)).with_done();
        self.submit(job).await?;

        match reply.await {
            Ok(response) => Ok(Some(response)),
            // The writer was dropped without a reply; report why
            Err(_) => match done.await {
                Ok(Err(e)) => Err(e.into()),
                _ => Err(EngineError::DispatcherGone),
            },
        }
    }

    pub fn get_handler(&self, method: &str, path: &str) -> Option<RouteMatch> {
        self.registry.get_handler(method, path)
    }

    pub fn get_file_handler(&self, path: &str) -> Option<HandlerInfo> {
        self.registry.get_file_handler(path)
    }

    /// Evaluate each script in order, giving each at most `timeout`
    ///
    /// Unreadable or failing scripts are reported and skipped. A script that
    /// outlives the timeout keeps running in the background.
    pub async fn load_startup_scripts<P: AsRef<Path>>(
        &self,
        paths: &[P],
        timeout: Duration,
    ) -> Result<StartupReport, EngineError> {
        let mut report = StartupReport::default();

        for path in paths {
            let path = path.as_ref().to_path_buf();
            let code = match tokio::fs::read_to_string(&path).await {
                Ok(code) => code,
                Err(e) => {
                    warn!("Cannot read startup script {}: {}", path.display(), e);
                    report.failed.push((path, e.to_string()));
                    continue;
                }
            };

            match self
                .execute_with_timeout(code, JobSource::Startup, None, timeout)
                .await
            {
                Ok(result) if result.is_success() => {
                    info!("Loaded startup script {}", path.display());
                    report.loaded.push(path);
                }
                Ok(result) => {
                    let message = result.error.unwrap_or_default();
                    warn!("Startup script {} failed: {}", path.display(), message);
                    report.failed.push((path, message));
                }
                Err(EngineError::Timeout(elapsed)) => {
                    warn!(
                        "Startup script {} still running after {:?}; continuing without it",
                        path.display(),
                        elapsed
                    );
                    report.timed_out.push(path);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn request_logger(&self) -> &Arc<RequestLogger> {
        &self.logger
    }

    pub fn executions(&self) -> Option<&Arc<dyn ExecutionRepository>> {
        self.executions.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> DispatcherSnapshot {
        self.stats.snapshot()
    }

    /// Jobs waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Close the queue and wait for the dispatcher to drain it
    pub async fn shutdown(mut self) {
        let worker = self.worker.take();
        drop(self);

        if let Some(worker) = worker {
            let joined = tokio::task::spawn_blocking(move || worker.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Dispatcher thread did not stop cleanly");
            }
        }
        info!("Engine stopped");
    }
}
