use anyhow::{anyhow, Context, Result};
use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::operation::{OpKind, Operation, VolumeSize};
use crate::runner::Backend;

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const TIMEOUT_ENV: &str = "VOLPLAN_TIMEOUT_SECS";

/// In-memory handle handed out by [`DryRunBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunHandle {
    pub name: String,
    pub id: u64,
}

/// Backend that performs no storage work.
///
/// Every call is appended to a log in wire form. When armed with
/// [`failing_at`](Self::failing_at), the n-th call (0-based) is logged and
/// then fails.
#[derive(Debug, Default)]
pub struct DryRunBackend {
    calls: Mutex<Vec<Operation>>,
    fail_at: Option<usize>,
    next_id: AtomicU64,
}

impl DryRunBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(mut self, call: usize) -> Self {
        self.fail_at = Some(call);
        self
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<Operation> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, kind: OpKind, params: Vec<String>) -> Result<()> {
        let op = Operation::new(kind, params);
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| anyhow!("dry-run call log lock poisoned"))?;
        let n = calls.len();
        debug!(call = n, "dry-run {op}");
        calls.push(op);
        if self.fail_at == Some(n) {
            return Err(anyhow!("dry-run failure injected at call {n} ({kind})"));
        }
        Ok(())
    }

    fn handle(&self, name: &str) -> DryRunHandle {
        DryRunHandle {
            name: name.to_string(),
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
        }
    }
}

fn sized(mut params: Vec<String>, size: Option<VolumeSize>) -> Vec<String> {
    if let Some(size) = size {
        params.push(size.to_string());
    }
    params
}

fn restore_kind(size: Option<VolumeSize>) -> OpKind {
    if size.is_some() {
        OpKind::CreateResizedRestore
    } else {
        OpKind::RestoreFromSnapshot
    }
}

fn clone_kind(size: Option<VolumeSize>) -> OpKind {
    if size.is_some() {
        OpKind::CreateResizedClone
    } else {
        OpKind::CloneVolume
    }
}

impl Backend for DryRunBackend {
    type Volume = DryRunHandle;
    type Snapshot = DryRunHandle;

    fn create_volume(&self, name: &str) -> Result<DryRunHandle> {
        self.record(OpKind::CreateVolume, vec![name.to_string()])?;
        Ok(self.handle(name))
    }

    fn attach_consumer(&self, consumer: &str, volume: &DryRunHandle) -> Result<()> {
        self.record(
            OpKind::AttachConsumer,
            vec![consumer.to_string(), volume.name.clone()],
        )
    }

    fn create_snapshot(&self, name: &str, volume: &DryRunHandle) -> Result<DryRunHandle> {
        self.record(
            OpKind::CreateSnapshot,
            vec![name.to_string(), volume.name.clone()],
        )?;
        Ok(self.handle(name))
    }

    fn restore_from_snapshot(
        &self,
        name: &str,
        snapshot: &DryRunHandle,
        size: Option<VolumeSize>,
    ) -> Result<DryRunHandle> {
        self.record(
            restore_kind(size),
            sized(vec![name.to_string(), snapshot.name.clone()], size),
        )?;
        Ok(self.handle(name))
    }

    fn clone_volume(
        &self,
        name: &str,
        source: &DryRunHandle,
        size: Option<VolumeSize>,
    ) -> Result<DryRunHandle> {
        self.record(
            clone_kind(size),
            sized(vec![name.to_string(), source.name.clone()], size),
        )?;
        Ok(self.handle(name))
    }

    fn delete_volume(&self, volume: DryRunHandle) -> Result<()> {
        self.record(OpKind::DeleteVolume, vec![volume.name])
    }

    fn delete_snapshot(&self, snapshot: DryRunHandle) -> Result<()> {
        self.record(OpKind::DeleteSnapshot, vec![snapshot.name])
    }

    fn resize_volume(&self, volume: &DryRunHandle, size: VolumeSize) -> Result<()> {
        self.record(
            OpKind::ResizeVolume,
            vec![volume.name.clone(), size.to_string()],
        )
    }
}

/// Handle returned by [`CommandBackend`]: the plan name plus whatever
/// identifier the program printed (the name itself if it printed nothing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHandle {
    pub name: String,
    pub id: String,
}

/// Backend that runs an external program once per operation.
///
/// The program is invoked as `<program> <args...> <op> <params...>`, where
/// referenced resources are passed by handle id. Exit status 0 is success and
/// trimmed stdout becomes the id of a created resource.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: PathBuf,
    args: Vec<String>,
    timeout_secs: u64,
}

impl CommandBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Arguments placed before the operation name.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run `<program> <args> <kind> <params>` and return its trimmed stdout.
    ///
    /// A call that outlives the timeout is killed and fails right away, even
    /// when a process it spawned keeps the output pipes open.
    fn invoke(&self, kind: OpKind, params: &[String]) -> Result<String> {
        let timeout_secs = timeout_secs(self.timeout_secs)?;
        debug!(program = %self.program.display(), "{kind} {}", params.join(" "));

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(kind.as_str())
            .args(params)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.program.display()))?;

        let stdout = child
            .stdout
            .take()
            .context("failed to open stdout for backend command")?;
        let stderr = child
            .stderr
            .take()
            .context("failed to open stderr for backend command")?;

        // Drain both pipes so a chatty program cannot block on a full buffer.
        let out_handle = thread::spawn(move || -> std::io::Result<Vec<u8>> {
            let mut r = stdout;
            let mut buf = Vec::new();
            r.read_to_end(&mut buf)?;
            Ok(buf)
        });
        let err_handle = thread::spawn(move || -> std::io::Result<Vec<u8>> {
            let mut r = stderr;
            let mut buf = Vec::new();
            r.read_to_end(&mut buf)?;
            Ok(buf)
        });

        let start = Instant::now();
        let timeout = Duration::from_secs(timeout_secs);

        let status = loop {
            if let Some(status) = child
                .try_wait()
                .context("failed waiting for backend command")?
            {
                break status;
            }

            if start.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                // A grandchild may still hold the pipes open, so the readers
                // are detached rather than joined. They exit at pipe EOF.
                drop(out_handle);
                drop(err_handle);
                debug!(program = %self.program.display(), "{kind} killed after timeout");
                return Err(anyhow!(
                    "{kind} timed out after {timeout_secs}s (set {TIMEOUT_ENV} to override)"
                ));
            }

            thread::sleep(Duration::from_millis(10));
        };

        let out_buf = out_handle
            .join()
            .map_err(|_| anyhow!("stdout reader thread panicked"))?
            .context("failed reading backend command stdout")?;
        let err_buf = err_handle
            .join()
            .map_err(|_| anyhow!("stderr reader thread panicked"))?
            .context("failed reading backend command stderr")?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&err_buf);
            return Err(anyhow!(
                "{kind} failed (exit={:?}): {}",
                status.code(),
                stderr.trim()
            ));
        }

        let stdout =
            String::from_utf8(out_buf).context("backend command output was not valid UTF-8")?;
        Ok(stdout.trim().to_string())
    }

    fn create(&self, kind: OpKind, name: &str, params: Vec<String>) -> Result<CommandHandle> {
        let out = self.invoke(kind, &params)?;
        let id = if out.is_empty() {
            name.to_string()
        } else {
            out
        };
        Ok(CommandHandle {
            name: name.to_string(),
            id,
        })
    }
}

impl Backend for CommandBackend {
    type Volume = CommandHandle;
    type Snapshot = CommandHandle;

    fn create_volume(&self, name: &str) -> Result<CommandHandle> {
        self.create(OpKind::CreateVolume, name, vec![name.to_string()])
    }

    fn attach_consumer(&self, consumer: &str, volume: &CommandHandle) -> Result<()> {
        self.invoke(
            OpKind::AttachConsumer,
            &[consumer.to_string(), volume.id.clone()],
        )
        .map(drop)
    }

    fn create_snapshot(&self, name: &str, volume: &CommandHandle) -> Result<CommandHandle> {
        self.create(
            OpKind::CreateSnapshot,
            name,
            vec![name.to_string(), volume.id.clone()],
        )
    }

    fn restore_from_snapshot(
        &self,
        name: &str,
        snapshot: &CommandHandle,
        size: Option<VolumeSize>,
    ) -> Result<CommandHandle> {
        self.create(
            restore_kind(size),
            name,
            sized(vec![name.to_string(), snapshot.id.clone()], size),
        )
    }

    fn clone_volume(
        &self,
        name: &str,
        source: &CommandHandle,
        size: Option<VolumeSize>,
    ) -> Result<CommandHandle> {
        self.create(
            clone_kind(size),
            name,
            sized(vec![name.to_string(), source.id.clone()], size),
        )
    }

    fn delete_volume(&self, volume: CommandHandle) -> Result<()> {
        self.invoke(OpKind::DeleteVolume, &[volume.id]).map(drop)
    }

    fn delete_snapshot(&self, snapshot: CommandHandle) -> Result<()> {
        self.invoke(OpKind::DeleteSnapshot, &[snapshot.id]).map(drop)
    }

    fn resize_volume(&self, volume: &CommandHandle, size: VolumeSize) -> Result<()> {
        self.invoke(
            OpKind::ResizeVolume,
            &[volume.id.clone(), size.to_string()],
        )
        .map(drop)
    }
}

/// Effective command timeout: `VOLPLAN_TIMEOUT_SECS` if set, else `configured`.
pub fn timeout_secs(configured: u64) -> Result<u64> {
    let secs = match env::var(TIMEOUT_ENV).ok() {
        None => configured,
        Some(v) => v.parse::<u64>().map_err(|_| {
            anyhow!("invalid {TIMEOUT_ENV}: '{v}' (must be a positive integer)")
        })?,
    };
    if secs == 0 {
        return Err(anyhow!("command timeout must be a positive number of seconds"));
    }
    Ok(secs)
}
