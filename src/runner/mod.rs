//! Runner module - Execution abstraction layer
//!
//! This module provides the isolated executor used for grading:
//! - `Executor`: the contract any execution backend must satisfy
//! - `ProcessExecutor`: workspace + child process + wall-clock deadline
//!
//! The runner module does NOT:
//! - Generate harness code
//! - Parse trace lines or decide verdicts
//! - Know about problems or repositories

pub mod capture;
pub mod process;
pub mod reaper;
pub mod workspace;

use async_trait::async_trait;
use std::time::Duration;

use crate::core::GradeError;

/// Command specification for execution
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    /// Split a whitespace-separated command line (first word is the program)
    pub fn parse(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace();
        let program = words.next()?;
        Some(Self::new(program).with_args(words))
    }
}

/// Resource ceilings applied to the child process
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Address space limit in MB
    pub memory_mb: u64,
    /// Largest file the child may write, in MB
    pub file_size_mb: u64,
    /// Bytes kept per output stream
    pub output_bytes: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            file_size_mb: 16,
            output_bytes: 256 * 1024,
        }
    }
}

/// Raw outcome of running a harness (no verdict interpretation)
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `128 + signal` when killed by a signal, -1 when unknown
    pub exit_code: i32,
    /// Signal that terminated the child, if any
    pub signal: Option<i32>,
    /// The wall-clock deadline expired and the child was killed
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    /// Wall-clock time from spawn to exit
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    pub fn is_truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }
}

/// Isolated executor contract
///
/// Implementations must run `harness_text` against `submission_source` in a
/// workspace no other call can observe, feed `stdin` to the harness and close
/// it, enforce `time_limit` as a hard wall-clock bound, and leave no files or
/// processes behind on any path.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        submission_source: &str,
        harness_text: &str,
        stdin: &str,
        time_limit: Duration,
    ) -> Result<ExecutionResult, GradeError>;
}

// Re-exports
pub use process::ProcessExecutor;
