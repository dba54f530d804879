//! Process-backed executor
//!
//! Runs the harness as a child process inside a fresh workspace. The child
//! leads its own process group so the deadline can take down everything it
//! spawned, and anything that escaped the group is swept up by [`reaper`]
//! once the child is gone. Resource ceilings are applied with `setrlimit`
//! before exec.
//!
//! This is process-level isolation only. Stronger backends (containers,
//! namespaces, seccomp) plug in behind the same [`Executor`] trait.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::capture::{read_capped, CaptureBuffer};
use super::reaper;
use super::workspace::Workspace;
use super::{CommandSpec, ExecutionResult, Executor, RunLimits};
use crate::config::RunnerConfig;
use crate::core::GradeError;

/// PATH handed to the child
const RUNNER_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// How long to wait for output pipes to close once the child is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Executor that runs the harness as a local child process
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    command: CommandSpec,
    submission_file: String,
    harness_file: String,
    limits: RunLimits,
    workspace_root: Option<PathBuf>,
}

impl ProcessExecutor {
    pub fn new(
        command: CommandSpec,
        submission_file: impl Into<String>,
        harness_file: impl Into<String>,
    ) -> Self {
        Self {
            command,
            submission_file: submission_file.into(),
            harness_file: harness_file.into(),
            limits: RunLimits::default(),
            workspace_root: None,
        }
    }

    pub fn from_config(config: &RunnerConfig, workspace_root: Option<PathBuf>) -> Self {
        let mut executor = Self::new(
            config.run_command.clone(),
            &config.submission_file,
            &config.harness_file,
        )
        .with_limits(config.run_limits());
        executor.workspace_root = workspace_root;
        executor
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    fn build_command(&self, dir: &Path, time_limit: Duration) -> Command {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .current_dir(dir)
            .env_clear()
            .env("PATH", RUNNER_PATH)
            .env("HOME", dir)
            .env("LANG", "C.UTF-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONHASHSEED", "0")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        let ceilings = Ceilings {
            memory_bytes: mebibytes(self.limits.memory_mb),
            cpu_secs: cpu_budget_secs(time_limit),
            file_size_bytes: mebibytes(self.limits.file_size_mb),
        };

        // SAFETY: the hook only calls setrlimit and prctl, which are
        // async-signal-safe, and touches no state shared with the parent.
        unsafe {
            cmd.pre_exec(move || {
                ceilings.apply()?;
                reaper::adopt_in_child()
            });
        }

        cmd
    }

    async fn run_in(
        &self,
        workspace: &Workspace,
        submission_source: &str,
        harness_text: &str,
        stdin: &str,
        time_limit: Duration,
    ) -> Result<ExecutionResult, GradeError> {
        workspace
            .write(&self.submission_file, submission_source)
            .await?;
        workspace.write(&self.harness_file, harness_text).await?;

        let mut cmd = self.build_command(workspace.path(), time_limit);
        let start = Instant::now();
        let (mut child, tracked) = reaper::spawn_tracked(&mut cmd).map_err(|e| {
            GradeError::infrastructure(format!("failed to spawn {}", self.command.program), e)
        })?;

        // process_group(0) makes the child's pid its group id
        let group = child.id().map(|id| Pid::from_raw(id as i32));
        debug!(
            "Spawned {:?} in {:?} (pid {:?})",
            self.command.program,
            workspace.path(),
            group
        );

        if let Some(mut input) = child.stdin.take() {
            let payload = stdin.as_bytes().to_vec();
            // Dropping `input` afterwards closes the pipe
            tokio::spawn(async move {
                if let Err(e) = input.write_all(&payload).await {
                    debug!("Runner did not read its stdin: {}", e);
                }
            });
        }

        let cap = self.limits.output_bytes;
        let stdout_buf = CaptureBuffer::new();
        let stderr_buf = CaptureBuffer::new();
        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_capped(out, cap, stdout_buf.clone())));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_capped(err, cap, stderr_buf.clone())));

        let (status, timed_out) = match tokio::time::timeout(time_limit, child.wait()).await {
            Ok(Ok(status)) => (Some(status), false),
            Ok(Err(e)) => {
                kill_group(group);
                let _ = child.start_kill();
                return Err(GradeError::infrastructure("failed to wait for runner", e));
            }
            Err(_) => {
                info!(
                    "Runner exceeded {} ms, killing process group {:?}",
                    time_limit.as_millis(),
                    group
                );
                kill_group(group);
                let _ = child.start_kill();
                (child.wait().await.ok(), true)
            }
        };
        let elapsed = start.elapsed();

        drop(tracked);

        // Descendants may outlive the child and keep the pipes open
        kill_group(group);
        match tokio::task::spawn_blocking(reaper::sweep).await {
            Ok(0) => {}
            Ok(n) => info!("Killed {} process(es) left behind by the runner", n),
            Err(e) => warn!("Orphan sweep failed: {}", e),
        }

        let (stdout, stdout_truncated) = collect(stdout, &stdout_buf, "stdout").await;
        let (stderr, stderr_truncated) = collect(stderr, &stderr_buf, "stderr").await;

        let (exit_code, signal) = match status {
            Some(status) => match status.code() {
                Some(code) => (code, None),
                None => {
                    let signal = status.signal();
                    (signal.map(|s| 128 + s).unwrap_or(-1), signal)
                }
            },
            None => (-1, None),
        };

        if stdout_truncated || stderr_truncated {
            warn!(
                "Runner output truncated at {} bytes (stdout: {}, stderr: {})",
                cap, stdout_truncated, stderr_truncated
            );
        }

        let result = ExecutionResult {
            stdout,
            stderr,
            exit_code,
            signal,
            timed_out,
            stdout_truncated,
            stderr_truncated,
            elapsed,
        };
        debug!(
            "Runner finished in {} ms (exit {}, success {})",
            elapsed.as_millis(),
            result.exit_code,
            result.is_success()
        );
        Ok(result)
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(
        &self,
        submission_source: &str,
        harness_text: &str,
        stdin: &str,
        time_limit: Duration,
    ) -> Result<ExecutionResult, GradeError> {
        reaper::adopt_orphans();
        let workspace = Workspace::create(self.workspace_root.as_deref())?;

        // One exit path for success, failure and timeout
        let result = self
            .run_in(&workspace, submission_source, harness_text, stdin, time_limit)
            .await;
        workspace.close();

        result
    }
}

/// rlimits applied in the child before exec
#[derive(Debug, Clone, Copy)]
struct Ceilings {
    memory_bytes: u64,
    cpu_secs: u64,
    file_size_bytes: u64,
}

impl Ceilings {
    fn apply(&self) -> std::io::Result<()> {
        if self.memory_bytes > 0 {
            limit(Resource::RLIMIT_AS, self.memory_bytes)?;
        }
        limit(Resource::RLIMIT_CPU, self.cpu_secs)?;
        limit(Resource::RLIMIT_FSIZE, self.file_size_bytes)?;
        limit(Resource::RLIMIT_CORE, 0)?;
        Ok(())
    }
}

fn limit(resource: Resource, value: u64) -> std::io::Result<()> {
    setrlimit(resource, value, value).map_err(std::io::Error::from)
}

fn mebibytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

/// CPU seconds granted for a wall-clock budget: rounded up, plus one
fn cpu_budget_secs(time_limit: Duration) -> u64 {
    let secs = time_limit.as_secs() + u64::from(time_limit.subsec_nanos() > 0);
    secs + 1
}

fn kill_group(group: Option<Pid>) {
    let Some(pgid) = group else {
        return;
    };
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
    }
}

/// Wait for a capture task, keeping what it read if the pipe never closes
async fn collect(
    handle: Option<JoinHandle<()>>,
    buffer: &CaptureBuffer,
    stream: &str,
) -> (String, bool) {
    let Some(mut handle) = handle else {
        return (String::new(), false);
    };

    let cut_short = match tokio::time::timeout(DRAIN_GRACE, &mut handle).await {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            warn!("Capture task for {} failed: {}", stream, e);
            true
        }
        Err(_) => {
            warn!(
                "{} still open {:?} after the runner exited, keeping partial capture",
                stream, DRAIN_GRACE
            );
            handle.abort();
            true
        }
    };

    let (text, truncated) = buffer.take().into_lossy_string();
    (text, truncated || cut_short)
}
