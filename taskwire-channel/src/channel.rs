//! Remote task channel
//!
//! [`RemoteTaskChannel`] owns exactly one worker process, spawned lazily on
//! the first call. Concurrent calls are multiplexed over the worker's stdio
//! as newline-delimited JSON and matched back to their callers by correlation
//! id. Process-level failures fan out to every pending call and to the
//! registered lifecycle listeners; per-call failures stay scoped to their
//! call.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use taskwire_ipc::{TaskRequest, TaskResponse};

use crate::error::ChannelError;
use crate::listeners::ListenerSet;
use crate::pending::PendingTable;
use crate::sink::{DiagnosticSink, TracingSink};

/// Configuration for a [`RemoteTaskChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Program spawned as the worker process.
    pub worker_program: PathBuf,
    /// Arguments passed to the worker program.
    pub worker_args: Vec<String>,
    /// Optional per-call timeout. `None` leaves calls pending until answered
    /// or until a process-wide failure cancels them.
    pub call_timeout: Option<Duration>,
}

impl ChannelConfig {
    pub fn new(worker_program: impl Into<PathBuf>) -> Self {
        Self {
            worker_program: worker_program.into(),
            worker_args: Vec::new(),
            call_timeout: None,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        // Re-exec the host binary in worker mode, the usual deployment shape.
        let program = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("taskwire-worker"));
        Self {
            worker_program: program,
            worker_args: vec!["--worker".to_string()],
            call_timeout: None,
        }
    }
}

enum ChannelState {
    Idle,
    Running(WorkerHandle),
    Terminated,
}

struct WorkerHandle {
    pid: Option<u32>,
    request_tx: mpsc::UnboundedSender<TaskRequest>,
    kill_tx: oneshot::Sender<()>,
}

struct Inner {
    config: ChannelConfig,
    sink: Arc<dyn DiagnosticSink>,
    state: Mutex<ChannelState>,
    pending: PendingTable,
    listeners: ListenerSet,
    next_id: AtomicU64,
}

/// Out-of-process RPC channel to a single worker process.
///
/// The worker is shared by all concurrent callers of one channel instance.
/// Once the channel reaches the terminated state - worker exit, process
/// failure, or [`dispose`](Self::dispose) - it stays there; a new instance is
/// required to spawn a fresh worker.
pub struct RemoteTaskChannel {
    inner: Arc<Inner>,
}

impl RemoteTaskChannel {
    /// Create an idle channel; no process is spawned until the first call.
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Create an idle channel with a custom diagnostic sink.
    pub fn with_sink(config: ChannelConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sink,
                state: Mutex::new(ChannelState::Idle),
                pending: PendingTable::default(),
                listeners: ListenerSet::default(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Invoke an export of a module inside the worker process.
    ///
    /// `method` selects a named export; `None` invokes the module's default
    /// export. Arguments and result must be plain serializable values.
    /// Requests are transmitted in call order; responses may arrive in any
    /// order and are routed by correlation id.
    pub async fn invoke(
        &self,
        file: impl Into<String>,
        method: Option<&str>,
        args: Option<Vec<JsonValue>>,
    ) -> Result<JsonValue, ChannelError> {
        let request_tx = self.ensure_started()?;

        // Incremented before minting; ids are never reused while pending.
        let id = (self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string();

        // Arm the continuation before transmitting so a fast reply cannot
        // race the waiting caller.
        let response_rx = self.inner.pending.register(id.clone());

        let request = TaskRequest::new(id.clone(), file, method.map(str::to_owned), args);
        if request_tx.send(request).is_err() {
            self.inner.pending.discard(&id);
            return Err(ChannelError::ProcessFailed(
                "worker stdin channel closed".to_string(),
            ));
        }

        let received = match self.inner.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, response_rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.inner.pending.discard(&id);
                    return Err(ChannelError::Timeout);
                }
            },
            None => response_rx.await,
        };

        match received {
            Ok(outcome) => outcome,
            // Sender dropped without firing; only teardown does that.
            Err(_) => Err(ChannelError::Terminated),
        }
    }

    /// Register a persistent listener for process-error notifications.
    /// Registration is additive; listeners persist until `dispose`.
    pub fn on_error(&self, listener: impl Fn(&ChannelError) + Send + Sync + 'static) {
        self.inner.listeners.on_error(listener);
    }

    /// Register a persistent listener for process-exit notifications.
    pub fn on_exit(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.inner.listeners.on_exit(listener);
    }

    /// Tear the channel down: kill a still-connected worker, reject any
    /// pending calls, and remove all registered listeners. Idempotent; safe
    /// to call before the first invocation or after termination.
    pub fn dispose(&self) {
        let handle = {
            let mut state = self.inner.state.lock().expect("channel state lock poisoned");
            match std::mem::replace(&mut *state, ChannelState::Terminated) {
                ChannelState::Running(handle) => Some(handle),
                _ => None,
            }
        };

        if let Some(handle) = handle {
            // Signal the supervisor; it kills and reaps the child.
            let _ = handle.kill_tx.send(());
        }

        self.inner.pending.fail_all(ChannelError::Terminated);
        self.inner.listeners.clear();
    }

    /// Whether a worker process is currently connected.
    pub fn is_running(&self) -> bool {
        matches!(
            *self.inner.state.lock().expect("channel state lock poisoned"),
            ChannelState::Running(_)
        )
    }

    /// Process id of the connected worker, if any.
    pub fn worker_pid(&self) -> Option<u32> {
        match &*self.inner.state.lock().expect("channel state lock poisoned") {
            ChannelState::Running(handle) => handle.pid,
            _ => None,
        }
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Spawn the worker if this is the first call; refuse once terminated.
    fn ensure_started(&self) -> Result<mpsc::UnboundedSender<TaskRequest>, ChannelError> {
        let mut state = self.inner.state.lock().expect("channel state lock poisoned");
        match &*state {
            ChannelState::Running(handle) => Ok(handle.request_tx.clone()),
            ChannelState::Terminated => Err(ChannelError::Terminated),
            ChannelState::Idle => match spawn_worker(&self.inner) {
                Ok(handle) => {
                    let request_tx = handle.request_tx.clone();
                    debug!("spawned worker process (pid: {:?})", handle.pid);
                    *state = ChannelState::Running(handle);
                    Ok(request_tx)
                }
                Err(spawn_error) => {
                    // Spawn failure is fatal to the instance, surfaced through
                    // the error listeners rather than any pending entry.
                    *state = ChannelState::Terminated;
                    drop(state);
                    self.inner.listeners.fire_error(&spawn_error);
                    Err(spawn_error)
                }
            },
        }
    }
}

impl Drop for RemoteTaskChannel {
    fn drop(&mut self) {
        // The spawned tasks keep their own Arc<Inner> alive, so the worker
        // would otherwise outlive the last channel handle.
        self.dispose();
    }
}

fn spawn_worker(inner: &Arc<Inner>) -> Result<WorkerHandle, ChannelError> {
    let mut command = Command::new(&inner.config.worker_program);
    command
        .args(&inner.config.worker_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| ChannelError::SpawnFailed(e.to_string()))?;

    let pid = child.id();
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ChannelError::SpawnFailed("failed to capture worker stdin".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ChannelError::SpawnFailed("failed to capture worker stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ChannelError::SpawnFailed("failed to capture worker stderr".to_string()))?;

    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (kill_tx, kill_rx) = oneshot::channel();
    let (fail_tx, fail_rx) = mpsc::unbounded_channel();

    tokio::spawn(request_writer_task(stdin, request_rx, pid));
    let reader_task = tokio::spawn(response_reader_task(
        inner.clone(),
        stdout,
        pid.unwrap_or(0),
        fail_tx,
    ));
    tokio::spawn(stderr_reader_task(
        inner.sink.clone(),
        stderr,
        pid.unwrap_or(0),
    ));
    tokio::spawn(supervise(inner.clone(), child, kill_rx, fail_rx, reader_task));

    Ok(WorkerHandle {
        pid,
        request_tx,
        kill_tx,
    })
}

/// Serializes requests onto the worker's stdin, preserving call order.
async fn request_writer_task(
    mut stdin: ChildStdin,
    mut request_rx: mpsc::UnboundedReceiver<TaskRequest>,
    pid: Option<u32>,
) {
    while let Some(request) = request_rx.recv().await {
        let json = match serde_json::to_string(&request) {
            Ok(json) => json,
            Err(e) => {
                error!("failed to encode request {}: {}", request.id, e);
                continue;
            }
        };
        let line = format!("{}\n", json);

        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            // Broken pipe is the normal shutdown path
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                debug!("worker {:?} stdin closed", pid);
            } else {
                error!("failed to write to worker {:?} stdin: {}", pid, e);
            }
            break;
        }
        if let Err(e) = stdin.flush().await {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                error!("failed to flush worker {:?} stdin: {}", pid, e);
            }
            break;
        }
    }
}

/// Demultiplexes responses from the worker's stdout back to pending callers.
async fn response_reader_task(
    inner: Arc<Inner>,
    stdout: ChildStdout,
    pid: u32,
    fail_tx: mpsc::UnboundedSender<ChannelError>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<TaskResponse>(&line) {
                Ok(response) => {
                    let id = response.id.clone();
                    match response.outcome() {
                        Some(outcome) => {
                            let result = outcome.map_err(|payload| ChannelError::Remote {
                                message: payload.message,
                                stack: payload.stack,
                            });
                            if !inner.pending.complete(&id, result) {
                                warn!("response with no pending call (id: {})", id);
                                inner.sink.forward(pid, &line);
                            }
                        }
                        None => {
                            warn!("response {} carries both result and error", id);
                            inner.sink.forward(pid, &line);
                        }
                    }
                }
                Err(_) => {
                    // Anything unparseable on stdout is worker chatter
                    inner.sink.forward(pid, &line);
                }
            },
            Ok(None) => {
                debug!("worker {} stdout closed", pid);
                break;
            }
            Err(e) => {
                let _ = fail_tx.send(ChannelError::ProcessFailed(format!(
                    "failed to read worker stdout: {}",
                    e
                )));
                break;
            }
        }
    }
}

/// Forwards worker stderr to the diagnostic sink.
async fn stderr_reader_task(sink: Arc<dyn DiagnosticSink>, stderr: ChildStderr, pid: u32) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink.forward(pid, &line);
    }
}

enum Ending {
    Disposed,
    Failed(ChannelError),
    Exited(Option<i32>),
}

/// Owns the child process: waits for a kill signal, a transport failure
/// report, or the child's own exit, then settles the channel accordingly.
async fn supervise(
    inner: Arc<Inner>,
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    mut fail_rx: mpsc::UnboundedReceiver<ChannelError>,
    reader_task: tokio::task::JoinHandle<()>,
) {
    let pid = child.id().unwrap_or(0);
    let ending = tokio::select! {
        // Resolves on dispose, which also runs when the channel handle is
        // dropped; either way the child must go.
        _ = &mut kill_rx => Ending::Disposed,
        Some(transport_error) = fail_rx.recv() => Ending::Failed(transport_error),
        status = child.wait() => Ending::Exited(status.ok().and_then(|s| s.code())),
    };

    match ending {
        Ending::Disposed => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            let _ = reader_task.await;
            // dispose() already cleared listeners; sweep any call that raced
            // past the state change.
            inner.pending.fail_all(ChannelError::Terminated);
        }
        Ending::Failed(transport_error) => {
            warn!("worker transport failed: {}", transport_error);
            inner.sink.forward(pid, &transport_error.to_string());
            let _ = child.start_kill();
            let _ = child.wait().await;
            mark_terminated(&inner);
            inner.pending.fail_all(transport_error.clone());
            inner.listeners.fire_error(&transport_error);
            inner.listeners.fire_exit();
        }
        Ending::Exited(code) => {
            debug!("worker exited (code: {:?})", code);
            // Let the demux task drain responses the worker flushed before
            // dying; only calls still unanswered after that are rejected.
            let _ = reader_task.await;
            mark_terminated(&inner);
            inner.pending.fail_all(ChannelError::ProcessExited { code });
            inner.listeners.fire_exit();
        }
    }
}

fn mark_terminated(inner: &Inner) {
    let mut state = inner.state.lock().expect("channel state lock poisoned");
    *state = ChannelState::Terminated;
}
