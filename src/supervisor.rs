//! Process supervisor - owns one worker slot
//!
//! The slot starts its worker lazily, grants it to one caller at a time, and
//! recycles it after a fixed number of grants so slow leaks inside the worker
//! cannot accumulate across a long run.
//!
//! Slot lifecycle:
//! `Absent → Starting → Ready → (Busy → Ready)* → Terminating → Absent`
//!
//! The supervisor does NOT:
//! - Interpret response frames
//! - Enforce timeouts (the execution client does, then discards the worker)

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::HarnessError;
use crate::protocol::{self, ResponseFrame};

/// Default number of grants before a worker is recycled
pub const DEFAULT_RECYCLE_AFTER: u32 = 10;

/// Lines of worker stderr kept for crash reports
const STDERR_TAIL_LINES: usize = 20;

/// Upper bound on reaping a killed worker
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a crash report waits for the exit status
const CRASH_STATUS_WAIT: Duration = Duration::from_millis(200);

/// How long to keep reading after the worker exited mid-request
const EXIT_DRAIN_WAIT: Duration = Duration::from_millis(100);

/// How to start a worker process
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Worker executable
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }
}

/// Recycling and shutdown policy
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Grants per worker before a preventive recycle
    pub recycle_after: u32,
    /// Wait this long for a clean exit after `::exit::`; `None` kills at once
    pub shutdown_grace: Option<Duration>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            recycle_after: DEFAULT_RECYCLE_AFTER,
            shutdown_grace: None,
        }
    }
}

/// Identity of one spawned worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId {
    /// Spawn counter of the owning slot, starting at 1
    pub generation: u64,
    pub pid: u32,
}

/// Observable state of a worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Absent,
    Starting,
    Ready,
    Busy,
    Terminating,
}

/// One live worker process
pub struct WorkerHandle {
    id: WorkerId,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    invocations: u32,
    stderr_tail: Arc<StdMutex<VecDeque<String>>>,
}

impl WorkerHandle {
    fn spawn(command: &WorkerCommand, generation: u64) -> Result<Self, HarnessError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Own process group, so a kill also reaches anything the worker started
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(HarnessError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(HarnessError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(HarnessError::MissingPipe("stderr"))?;

        let id = WorkerId {
            generation,
            pid: child.id().unwrap_or(0),
        };
        let stderr_tail = Arc::new(StdMutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        drain_stderr(stderr, id, Arc::clone(&stderr_tail));

        info!(
            "Started worker: generation={}, pid={}, program={:?}",
            id.generation, id.pid, command.program
        );

        Ok(Self {
            id,
            child,
            stdin,
            stdout: BufReader::new(stdout),
            invocations: 0,
            stderr_tail,
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Grants since this worker started
    pub fn invocations(&self) -> u32 {
        self.invocations
    }

    /// Send one request frame and read the matching response frame.
    ///
    /// Ends early when the worker process exits, even if something it spawned
    /// still holds the stdout pipe open.
    pub async fn exchange(&mut self, frame: &str) -> io::Result<ResponseFrame> {
        protocol::send_frame(&mut self.stdin, frame).await?;
        tokio::select! {
            biased;
            response = protocol::read_response(&mut self.stdout) => response,
            status = self.child.wait() => {
                let status = status?;
                debug!(
                    "Worker exited mid-request: generation={}, {}",
                    self.id.generation,
                    describe_status(status)
                );
                // Pick up a frame written just before exit
                let drain = protocol::read_response(&mut self.stdout);
                match tokio::time::timeout(EXIT_DRAIN_WAIT, drain).await {
                    Ok(response) => response,
                    Err(_) => Ok(ResponseFrame::Truncated(String::new())),
                }
            }
        }
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    /// Exit status (if the process is gone) and the stderr tail.
    pub async fn crash_report(&mut self) -> String {
        let status = match tokio::time::timeout(CRASH_STATUS_WAIT, self.child.wait()).await {
            Ok(Ok(status)) => describe_status(status),
            Ok(Err(e)) => format!("exit status unavailable ({})", e),
            Err(_) => "worker still running".to_string(),
        };

        let tail = self
            .stderr_tail
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect::<Vec<_>>();

        if tail.is_empty() {
            status
        } else {
            format!("{}\nstderr:\n{}", status, tail.join("\n"))
        }
    }

    /// Stop the worker: ask politely when a grace period is given, then kill.
    async fn shutdown(mut self, grace: Option<Duration>) {
        if let Some(grace) = grace {
            let asked = protocol::send_frame(&mut self.stdin, &protocol::exit_frame()).await;
            if asked.is_ok() {
                if let Ok(Ok(status)) = tokio::time::timeout(grace, self.child.wait()).await {
                    debug!(
                        "Worker exited cleanly: generation={}, {}",
                        self.id.generation,
                        describe_status(status)
                    );
                    return;
                }
            }
        }
        self.kill().await;
    }

    /// Kill the worker's process group and reap it. Errors from an already
    /// exited group are expected and swallowed.
    async fn kill(&mut self) {
        // The group outlives its leader while any member is alive, and its id
        // is not reused until the last member is gone
        if self.id.pid != 0 {
            match killpg(Pid::from_raw(self.id.pid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => debug!("killpg({}) failed: {}", self.id.pid, e),
            }
        }
        if let Err(e) = self.child.start_kill() {
            debug!("start_kill for worker {} failed: {}", self.id.pid, e);
        }

        match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!(
                "Worker terminated: generation={}, {}",
                self.id.generation,
                describe_status(status)
            ),
            Ok(Err(e)) => debug!("Failed to reap worker {}: {}", self.id.pid, e),
            Err(_) => warn!(
                "Worker {} did not exit within {:?} of SIGKILL",
                self.id.pid, REAP_TIMEOUT
            ),
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(signal)) => format!("killed by signal {}", signal),
        _ => "exit status unknown".to_string(),
    }
}

fn drain_stderr(stderr: ChildStderr, id: WorkerId, tail: Arc<StdMutex<VecDeque<String>>>) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = String::from_utf8_lossy(&buf).trim_end().to_string();
            debug!(generation = id.generation, pid = id.pid, "worker stderr: {}", line);

            let mut lines = tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if lines.len() == STDERR_TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    });
}

struct Slot {
    worker: Option<WorkerHandle>,
    generation: u64,
}

/// Owner of a single worker slot
pub struct Supervisor {
    command: WorkerCommand,
    config: SupervisorConfig,
    slot: Mutex<Slot>,
    state: watch::Sender<SlotState>,
}

impl Supervisor {
    pub fn new(command: WorkerCommand, config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(SlotState::Absent);
        Self {
            command,
            config,
            slot: Mutex::new(Slot {
                worker: None,
                generation: 0,
            }),
            state,
        }
    }

    /// Current slot state
    pub fn state(&self) -> SlotState {
        *self.state.borrow()
    }

    /// Grant the live worker to one caller, starting or recycling it first if
    /// needed. The slot stays locked (`Busy`) until the lease is dropped.
    pub async fn acquire(&self) -> Result<WorkerLease<'_>, HarnessError> {
        let mut slot = self.slot.lock().await;

        let current = match slot.worker.take() {
            Some(mut worker) => {
                let stale = if worker.invocations >= self.config.recycle_after {
                    info!(
                        "Recycling worker after {} invocations: generation={}",
                        worker.invocations, worker.id.generation
                    );
                    true
                } else if worker.has_exited() {
                    warn!(
                        "Worker exited while idle, replacing: generation={}",
                        worker.id.generation
                    );
                    true
                } else {
                    false
                };

                if stale {
                    self.state.send_replace(SlotState::Terminating);
                    worker.shutdown(self.config.shutdown_grace).await;
                    self.state.send_replace(SlotState::Absent);
                    None
                } else {
                    Some(worker)
                }
            }
            None => None,
        };

        let mut worker = match current {
            Some(worker) => worker,
            None => {
                self.state.send_replace(SlotState::Starting);
                slot.generation += 1;
                match WorkerHandle::spawn(&self.command, slot.generation) {
                    Ok(worker) => worker,
                    Err(e) => {
                        self.state.send_replace(SlotState::Absent);
                        return Err(e);
                    }
                }
            }
        };

        worker.invocations += 1;
        let (id, invocations) = (worker.id, worker.invocations);
        slot.worker = Some(worker);

        self.state.send_replace(SlotState::Busy);
        Ok(WorkerLease {
            slot,
            state: &self.state,
            id,
            invocations,
        })
    }

    /// Stop the current worker, if any. Safe to call repeatedly.
    pub async fn terminate(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(worker) = slot.worker.take() {
            self.state.send_replace(SlotState::Terminating);
            info!("Terminating worker: generation={}", worker.id.generation);
            worker.shutdown(self.config.shutdown_grace).await;
        }
        self.state.send_replace(SlotState::Absent);
    }
}

/// Exclusive use of the slot's worker for one request/response exchange
pub struct WorkerLease<'a> {
    slot: MutexGuard<'a, Slot>,
    state: &'a watch::Sender<SlotState>,
    id: WorkerId,
    invocations: u32,
}

impl WorkerLease<'_> {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Grants of this worker, including this one
    pub fn invocations(&self) -> u32 {
        self.invocations
    }

    pub async fn exchange(&mut self, frame: &str) -> io::Result<ResponseFrame> {
        match self.slot.worker.as_mut() {
            Some(worker) => worker.exchange(frame).await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "worker already discarded",
            )),
        }
    }

    pub async fn crash_report(&mut self) -> String {
        match self.slot.worker.as_mut() {
            Some(worker) => worker.crash_report().await,
            None => "worker already discarded".to_string(),
        }
    }

    /// Kill the worker immediately; the next `acquire()` starts a new one.
    pub async fn discard(mut self) {
        if let Some(mut worker) = self.slot.worker.take() {
            self.state.send_replace(SlotState::Terminating);
            worker.kill().await;
        }
    }
}

impl Drop for WorkerLease<'_> {
    fn drop(&mut self) {
        let state = if self.slot.worker.is_some() {
            SlotState::Ready
        } else {
            SlotState::Absent
        };
        self.state.send_replace(state);
    }
}
