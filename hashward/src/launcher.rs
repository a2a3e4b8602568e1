//! Launcher - spawns one isolated worker per request and runs the round trip.
//!
//! Flow:
//! 1. Spawn worker (OS process or isolated task)
//! 2. Send exactly one WorkerRequest, close the write half
//! 3. Wait for exactly one response (bounded by the worker timeout)
//! 4. Reap the worker on every path: in the background with a grace period
//!    after a response, killed immediately otherwise

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::{JsonCodec, MAX_FRAME_LENGTH};
use crate::bridge::protocol::{
    MalformedResponse, RequestKind, ResponseEnvelope, WorkerRequest, WorkerResponse,
};
use crate::primitive::HashPrimitive;
use crate::worker::serve_request;

/// How long a worker may linger after its response before it is killed.
const REAP_GRACE: Duration = Duration::from_secs(5);

/// Buffer size of the in-memory pipe used by [`TaskSpawner`].
const TASK_PIPE_CAPACITY: usize = 16 * 1024;

pub const WORKER_BIN_NAME: &str = "hashward-worker";

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] io::Error),
    #[error("spawn failed: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The worker could not be created, or its transport failed before a response.
    #[error("failed to launch worker: {0}")]
    Launch(String),
    /// The request does not fit in one frame; no worker was started.
    #[error("request of {size} bytes exceeds the {limit} byte frame limit")]
    RequestTooLarge { size: usize, limit: usize },
    #[error("worker did not respond within {0:?}")]
    Timeout(Duration),
    /// The worker caught a failure and reported it.
    #[error("worker failed: {0}")]
    Computation(String),
    #[error("malformed worker response: {0}")]
    Malformed(#[from] MalformedResponse),
}

/// Running worker, owned by the launcher until it is reaped.
pub enum WorkerHandle {
    Process(Child),
    Task(JoinHandle<io::Result<()>>),
}

impl fmt::Display for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process(child) => match child.id() {
                Some(pid) => write!(f, "pid {}", pid),
                None => f.write_str("exited process"),
            },
            Self::Task(_) => f.write_str("in-process task"),
        }
    }
}

impl WorkerHandle {
    /// Wait for the worker to finish on its own, killing it after `grace`.
    ///
    /// Returns a description of how it ended.
    async fn reap(self, grace: Duration) -> String {
        match self {
            Self::Process(mut child) => {
                let waited = tokio::time::timeout(grace, child.wait()).await;
                match waited {
                    Ok(Ok(status)) => status.to_string(),
                    Ok(Err(e)) => format!("wait failed: {}", e),
                    Err(_) => {
                        tracing::warn!(pid = ?child.id(), "Worker still running after response, killing");
                        if let Err(e) = child.kill().await {
                            tracing::warn!(error = %e, "Failed to kill worker");
                        }
                        "killed after grace period".to_string()
                    }
                }
            }
            Self::Task(mut task) => {
                let waited = tokio::time::timeout(grace, &mut task).await;
                match waited {
                    Ok(Ok(Ok(()))) => "completed".to_string(),
                    Ok(Ok(Err(e))) => format!("exited with error: {}", e),
                    Ok(Err(e)) => format!("task failed: {}", e),
                    Err(_) => {
                        tracing::warn!("Worker task still running after response, aborting");
                        task.abort();
                        "aborted after grace period".to_string()
                    }
                }
            }
        }
    }

    async fn kill(self) {
        match self {
            Self::Process(mut child) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill worker");
                }
            }
            Self::Task(task) => task.abort(),
        }
    }
}

/// Both ends of a freshly spawned worker's channel.
pub struct WorkerChannel {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub handle: WorkerHandle,
}

/// Extension point for different worker isolation strategies.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self) -> Result<WorkerChannel, SpawnError>;
}

/// One OS process per request, talking over its stdin/stdout.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// `hashward-worker` next to the running executable, or on `PATH`.
    pub fn default_program() -> PathBuf {
        let name = format!("{}{}", WORKER_BIN_NAME, std::env::consts::EXE_SUFFIX);
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
            .filter(|path| path.exists())
            .unwrap_or_else(|| PathBuf::from(name))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl Default for ProcessSpawner {
    fn default() -> Self {
        Self::new(Self::default_program())
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self) -> Result<WorkerChannel, SpawnError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SpawnError::Other("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpawnError::Other("stdout not captured".to_string()))?;

        Ok(WorkerChannel {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            handle: WorkerHandle::Process(child),
        })
    }
}

/// One tokio task per request, over an in-memory pipe.
///
/// The hashing itself runs on the blocking pool, so it never stalls the
/// runtime. Uses the same wire protocol as [`ProcessSpawner`] but shares the
/// parent's address space.
pub struct TaskSpawner<P> {
    primitive: Arc<P>,
}

impl<P: HashPrimitive> TaskSpawner<P> {
    pub fn new(primitive: P) -> Self {
        Self {
            primitive: Arc::new(primitive),
        }
    }

    pub fn primitive(&self) -> &P {
        &self.primitive
    }
}

impl<P: HashPrimitive> WorkerSpawner for TaskSpawner<P> {
    fn spawn(&self) -> Result<WorkerChannel, SpawnError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SpawnError::Other(format!("no tokio runtime: {}", e)))?;

        let (client, server) = tokio::io::duplex(TASK_PIPE_CAPACITY);
        let (server_reader, server_writer) = tokio::io::split(server);
        let task = runtime.spawn(serve_request(
            server_reader,
            server_writer,
            Arc::clone(&self.primitive),
        ));

        let (reader, writer) = tokio::io::split(client);
        Ok(WorkerChannel {
            reader: Box::new(reader),
            writer: Box::new(writer),
            handle: WorkerHandle::Task(task),
        })
    }
}

/// Dispatches requests to freshly spawned workers.
pub struct WorkerLauncher {
    spawner: Arc<dyn WorkerSpawner>,
    timeout: Option<Duration>,
    limit: Option<Arc<Semaphore>>,
}

impl WorkerLauncher {
    pub fn new(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            spawner,
            timeout: None,
            limit: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cap the number of workers alive at once.
    pub fn with_max_concurrent(mut self, max: Option<usize>) -> Self {
        self.limit = max.map(|n| Arc::new(Semaphore::new(n.max(1))));
        self
    }

    pub async fn hash(&self, rounds: u32, password: String) -> Result<String, WorkerError> {
        match self
            .dispatch(WorkerRequest::Hash { rounds, password })
            .await?
        {
            WorkerResponse::Digest(digest) => Ok(digest),
            WorkerResponse::Matched(_) => Err(MalformedResponse::WrongResultType {
                kind: RequestKind::Hash,
                got: "a boolean",
            }
            .into()),
            WorkerResponse::Failed(error) => Err(WorkerError::Computation(error)),
        }
    }

    pub async fn compare(&self, password: String, hash: String) -> Result<bool, WorkerError> {
        match self
            .dispatch(WorkerRequest::Compare { password, hash })
            .await?
        {
            WorkerResponse::Matched(matched) => Ok(matched),
            WorkerResponse::Digest(_) => Err(MalformedResponse::WrongResultType {
                kind: RequestKind::Compare,
                got: "a digest",
            }
            .into()),
            WorkerResponse::Failed(error) => Err(WorkerError::Computation(error)),
        }
    }

    /// Run one request through a freshly spawned worker.
    async fn dispatch(&self, request: WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        check_request_size(&request)?;

        let permit = match &self.limit {
            Some(limit) => Some(
                Arc::clone(limit)
                    .acquire_owned()
                    .await
                    .map_err(|_| WorkerError::Launch("worker limiter closed".to_string()))?,
            ),
            None => None,
        };

        let kind = request.kind();
        let started = Instant::now();

        let WorkerChannel {
            reader,
            writer,
            handle,
        } = self
            .spawner
            .spawn()
            .map_err(|e| WorkerError::Launch(e.to_string()))?;
        tracing::debug!(%kind, worker = %handle, "Worker launched");

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange(reader, writer, request))
                .await
                .unwrap_or(Err(WorkerError::Timeout(limit))),
            None => exchange(reader, writer, request).await,
        };

        match outcome {
            Ok(Some(envelope)) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::debug!(%kind, elapsed_ms, worker = %handle, "Worker responded");
                // The permit lives until the worker is gone, so the cap
                // still counts workers that linger after responding.
                tokio::spawn(async move {
                    let exit = handle.reap(REAP_GRACE).await;
                    tracing::debug!(%kind, %exit, "Worker reaped");
                    drop(permit);
                });
                Ok(WorkerResponse::try_from(envelope)?)
            }
            Ok(None) => {
                let exit = handle.reap(REAP_GRACE).await;
                tracing::error!(%kind, %exit, "Worker exited without responding");
                Err(WorkerError::Launch(format!(
                    "worker exited without responding ({})",
                    exit
                )))
            }
            Err(e) => {
                tracing::error!(%kind, error = %e, "Worker round trip failed");
                handle.kill().await;
                Err(e)
            }
        }
    }
}

fn check_request_size(request: &WorkerRequest) -> Result<(), WorkerError> {
    let size = serde_json::to_vec(request)
        .map_err(|e| WorkerError::Launch(format!("failed to encode request: {}", e)))?
        .len();
    if size > MAX_FRAME_LENGTH {
        return Err(WorkerError::RequestTooLarge {
            size,
            limit: MAX_FRAME_LENGTH,
        });
    }
    Ok(())
}

/// Write the one request, then read the one response.
///
/// `Ok(None)` means the worker closed its end without responding.
async fn exchange(
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    request: WorkerRequest,
) -> Result<Option<ResponseEnvelope>, WorkerError> {
    let mut writer = FramedWrite::new(writer, JsonCodec::<WorkerRequest>::new());
    writer
        .send(request)
        .await
        .map_err(|e| WorkerError::Launch(format!("failed to send request: {}", e)))?;
    if let Err(e) = writer.close().await {
        tracing::debug!(error = %e, "Failed to close worker input");
    }
    drop(writer);

    let mut reader = FramedRead::new(reader, JsonCodec::<ResponseEnvelope>::new());
    match reader.next().await {
        Some(Ok(envelope)) => Ok(Some(envelope)),
        Some(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
            Err(MalformedResponse::Undecodable(e.to_string()).into())
        }
        Some(Err(e)) => Err(WorkerError::Launch(format!("transport error: {}", e))),
        None => Ok(None),
    }
}
