//! Worker process pool.
//!
//! Model execution happens in child processes so that blocking inference
//! parallelizes and a crashing model cannot take the gateway down. The
//! protocol is newline-delimited JSON: one [`WorkerRequest`] per line on the
//! child's stdin, one [`WorkerResponse`] per line on its stdout. Stdout is
//! exclusively reserved for the protocol; worker diagnostics go to stderr.

use crate::error::{FigmentError, Result};
use crate::figment::registry::PluginRegistry;
use crate::models::figment::FigmentContext;
use crate::models::suggestion::SuggestionType;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Name of the worker binary, expected next to the server binary.
const WORKER_BIN: &str = "figmentator-worker";

/// A request sent to a worker's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Construct and start the model. Must be the first request.
    Startup {
        /// Opaque properties forwarded to the model's `startup`.
        #[serde(default)]
        properties: Option<serde_json::Value>,
    },
    /// Preprocess a story snapshot.
    Preprocess {
        /// The raw story snapshot.
        story: serde_json::Value,
        /// The blob from a previous snapshot of the same story, if any.
        #[serde(default)]
        prior: Option<serde_json::Value>,
    },
    /// Generate figments for a batch of contexts.
    Figmentate {
        /// The batch, in order.
        contexts: Vec<FigmentContext>,
    },
    /// Shut the model down and exit.
    Shutdown,
}

/// A response written to a worker's stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    /// Startup finished; `ok` is the model's own readiness verdict.
    Started {
        /// Whether the model reported a successful startup.
        ok: bool,
    },
    /// Preprocessing finished.
    Preprocessed {
        /// The opaque preprocessed blob.
        data: serde_json::Value,
    },
    /// Generation finished.
    Figmentated {
        /// The batch, statuses and entries updated, in input order.
        contexts: Vec<FigmentContext>,
    },
    /// The request failed inside the worker. The worker stays alive.
    Error {
        /// Human-readable failure description.
        message: String,
    },
    /// Acknowledgement of [`WorkerRequest::Shutdown`].
    ShuttingDown,
}

/// Resolve the worker binary path.
///
/// `FIG_WORKER_PATH` overrides; otherwise the worker is expected next to the
/// current executable.
fn worker_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os("FIG_WORKER_PATH") {
        return Ok(PathBuf::from(path));
    }
    let exe = std::env::current_exe()?;
    let dir = exe.parent().ok_or_else(|| {
        FigmentError::Pool("cannot locate the directory of the current executable".to_owned())
    })?;
    Ok(dir.join(WORKER_BIN))
}

/// One spawned worker process with its protocol streams.
struct WorkerHandle {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl WorkerHandle {
    async fn spawn(
        path: &PathBuf,
        suggestion_type: SuggestionType,
        plugin: &str,
    ) -> Result<Self> {
        let mut child = Command::new(path)
            .arg("--suggestion-type")
            .arg(suggestion_type.as_str())
            .arg("--plugin")
            .arg(plugin)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FigmentError::Pool(format!("failed to spawn worker at {}: {e}", path.display()))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FigmentError::Pool("failed to capture worker stdin".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FigmentError::Pool("failed to capture worker stdout".to_owned()))?;

        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
        })
    }

    /// Perform one request/response round-trip.
    async fn request(&mut self, request: &WorkerRequest) -> Result<WorkerResponse> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| FigmentError::Pool(format!("failed to encode worker request: {e}")))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| FigmentError::Pool(format!("failed to write to worker: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| FigmentError::Pool(format!("failed to flush worker stdin: {e}")))?;

        let mut response = String::new();
        let bytes = self
            .stdout
            .read_line(&mut response)
            .await
            .map_err(|e| FigmentError::Pool(format!("failed to read from worker: {e}")))?;
        if bytes == 0 {
            return Err(FigmentError::Pool("worker exited unexpectedly".to_owned()));
        }

        serde_json::from_str(&response)
            .map_err(|e| FigmentError::Pool(format!("invalid worker response: {e}")))
    }

    /// Best-effort shutdown: ask politely, then kill.
    async fn shutdown(mut self) {
        if let Ok(WorkerResponse::ShuttingDown) = self.request(&WorkerRequest::Shutdown).await {
            let _ = self.child.wait().await;
            return;
        }
        let _ = self.child.kill().await;
    }

    async fn kill(mut self) {
        let _ = self.child.kill().await;
    }
}

/// A fixed-size pool of worker processes for one model.
pub struct WorkerPool {
    workers: Mutex<Vec<WorkerHandle>>,
    slots: Semaphore,
}

impl WorkerPool {
    /// Spawn `num_workers` children and run the startup handshake on each.
    ///
    /// Every worker constructs its own model instance from the compiled-in
    /// registry; a failed spawn or a model refusing startup fails the whole
    /// pool.
    pub async fn spawn(
        suggestion_type: SuggestionType,
        plugin: &str,
        properties: Option<serde_json::Value>,
        num_workers: usize,
    ) -> Result<Self> {
        let path = worker_path()?;
        info!(
            "spawning {num_workers} worker(s) for {suggestion_type} from {}",
            path.display()
        );

        let mut handshakes = JoinSet::new();
        for _ in 0..num_workers {
            let path = path.clone();
            let plugin = plugin.to_owned();
            let properties = properties.clone();
            handshakes.spawn(async move {
                let mut worker = WorkerHandle::spawn(&path, suggestion_type, &plugin).await?;
                match worker.request(&WorkerRequest::Startup { properties }).await? {
                    WorkerResponse::Started { ok: true } => Ok(worker),
                    WorkerResponse::Started { ok: false } => Err(FigmentError::Model(
                        "model reported unsuccessful startup".to_owned(),
                    )),
                    WorkerResponse::Error { message } => Err(FigmentError::Model(message)),
                    other => Err(FigmentError::Pool(format!(
                        "unexpected startup response: {other:?}"
                    ))),
                }
            });
        }

        let mut workers = Vec::with_capacity(num_workers);
        let mut failure = None;
        while let Some(joined) = handshakes.join_next().await {
            match joined {
                Ok(Ok(worker)) => workers.push(worker),
                Ok(Err(e)) => failure = Some(e),
                Err(e) => failure = Some(FigmentError::Pool(format!("handshake task: {e}"))),
            }
        }
        if let Some(e) = failure {
            for worker in workers {
                worker.kill().await;
            }
            return Err(e);
        }

        Ok(Self {
            slots: Semaphore::new(workers.len()),
            workers: Mutex::new(workers),
        })
    }

    /// Submit one request to an idle worker.
    ///
    /// A worker that fails the round-trip is discarded instead of being
    /// returned to the pool; the caller is expected to rebuild the pool.
    pub async fn submit(&self, request: WorkerRequest) -> Result<WorkerResponse> {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| FigmentError::Pool("worker pool is shut down".to_owned()))?;

        let mut worker = self
            .take_worker()
            .ok_or_else(|| FigmentError::Pool("no idle worker available".to_owned()))?;

        match worker.request(&request).await {
            Ok(response) => {
                self.return_worker(worker);
                Ok(response)
            }
            Err(e) => {
                warn!("discarding crashed worker: {e}");
                worker.kill().await;
                Err(e)
            }
        }
    }

    /// Shut every worker down.
    pub async fn shutdown(&self) {
        self.slots.close();
        let workers = self
            .workers
            .lock()
            .map(|mut workers| std::mem::take(&mut *workers))
            .unwrap_or_default();
        debug!("shutting down {} worker(s)", workers.len());
        for worker in workers {
            worker.shutdown().await;
        }
    }

    fn take_worker(&self) -> Option<WorkerHandle> {
        self.workers.lock().ok().and_then(|mut workers| workers.pop())
    }

    fn return_worker(&self, worker: WorkerHandle) {
        if let Ok(mut workers) = self.workers.lock() {
            workers.push(worker);
        }
    }
}

/// Child-side request loop.
///
/// Constructs the model from `registry`, then serves requests from stdin
/// until EOF or [`WorkerRequest::Shutdown`]. Runs synchronously: the worker
/// process handles exactly one request at a time.
pub fn run_worker(
    registry: &PluginRegistry,
    suggestion_type: SuggestionType,
    plugin: &str,
) -> Result<()> {
    let mut model = registry.create(plugin, suggestion_type)?;
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(WorkerRequest::Startup { properties }) => {
                match model.startup(properties.as_ref()) {
                    Ok(ok) => WorkerResponse::Started { ok },
                    Err(e) => WorkerResponse::Error {
                        message: e.to_string(),
                    },
                }
            }
            Ok(WorkerRequest::Preprocess { story, prior }) => {
                match model.preprocess(story, prior) {
                    Ok(data) => WorkerResponse::Preprocessed { data },
                    Err(e) => WorkerResponse::Error {
                        message: e.to_string(),
                    },
                }
            }
            Ok(WorkerRequest::Figmentate { contexts }) => WorkerResponse::Figmentated {
                contexts: model.figmentate(contexts),
            },
            Ok(WorkerRequest::Shutdown) => {
                write_response(&mut stdout, &WorkerResponse::ShuttingDown)?;
                break;
            }
            Err(e) => WorkerResponse::Error {
                message: format!("invalid request: {e}"),
            },
        };

        write_response(&mut stdout, &response)?;
    }

    model.shutdown();
    Ok(())
}

fn write_response(stdout: &mut std::io::Stdout, response: &WorkerResponse) -> Result<()> {
    let mut line = serde_json::to_string(response)
        .map_err(|e| FigmentError::Pool(format!("failed to encode worker response: {e}")))?;
    line.push('\n');
    stdout.write_all(line.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
