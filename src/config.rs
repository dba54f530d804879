//! Grader configuration
//!
//! Two layers:
//! - the runner profile (TOML, `files/runner.toml` compiled in, or the file
//!   named by `RUNNER_CONFIG`)
//! - environment variables for deployment settings and profile overrides
//!
//! The resulting [`GraderConfig`] is passed explicitly to the components
//! that need it.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::harness::identifier::check_identifier;
use crate::harness::{CasePolicy, HarnessOptions};
use crate::runner::{CommandSpec, RunLimits};

/// Largest accepted `memory_limit_mb` (1 TiB)
const MAX_MEMORY_LIMIT_MB: u64 = 1024 * 1024;

const DEFAULT_RUNNER_PROFILE: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/runner.toml"));

/// Raw TOML runner profile
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawRunnerConfig {
    submission_file: String,
    harness_file: String,
    run_command: String,
    time_limit_ms: u64,
    memory_limit_mb: u64,
    output_limit_kb: usize,
    max_literal_kb: usize,
    max_cases: usize,
    preview_limit: usize,
    case_policy: CasePolicy,
}

impl Default for RawRunnerConfig {
    fn default() -> Self {
        Self {
            submission_file: "user_code.py".to_string(),
            harness_file: "test_user_code.py".to_string(),
            run_command: "python3 -B test_user_code.py".to_string(),
            time_limit_ms: 10_000,
            memory_limit_mb: 512,
            output_limit_kb: 256,
            max_literal_kb: 64,
            max_cases: 500,
            preview_limit: 4096,
            case_policy: CasePolicy::CollectAll,
        }
    }
}

/// How submissions are executed
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub submission_file: String,
    pub harness_file: String,
    pub run_command: CommandSpec,
    /// Default wall-clock budget per grading run
    pub time_limit: Duration,
    pub memory_limit_mb: u64,
    pub output_limit_bytes: usize,
    pub max_literal_bytes: usize,
    pub max_cases: usize,
    pub preview_limit: usize,
    pub case_policy: CasePolicy,
}

impl RunnerConfig {
    /// Parse and validate a TOML runner profile
    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: RawRunnerConfig =
            toml::from_str(content).context("Invalid runner profile")?;

        let run_command = CommandSpec::parse(&raw.run_command)
            .ok_or_else(|| anyhow::anyhow!("Runner profile has an empty run_command"))?;

        for (kind, name) in [
            ("submission_file", &raw.submission_file),
            ("harness_file", &raw.harness_file),
        ] {
            if name.is_empty() || name.contains('/') || name.contains("..") {
                anyhow::bail!("Invalid {} in runner profile: {:?}", kind, name);
            }
        }
        if raw.submission_file == raw.harness_file {
            anyhow::bail!("submission_file and harness_file must differ");
        }
        if !run_command
            .args
            .iter()
            .any(|arg| arg == &raw.harness_file || arg.ends_with(&format!("/{}", raw.harness_file)))
        {
            anyhow::bail!(
                "run_command {:?} does not run harness_file {:?}",
                raw.run_command,
                raw.harness_file
            );
        }
        if raw.time_limit_ms == 0 {
            anyhow::bail!("time_limit_ms must be positive");
        }
        if raw.memory_limit_mb > MAX_MEMORY_LIMIT_MB {
            anyhow::bail!(
                "memory_limit_mb {} exceeds {}",
                raw.memory_limit_mb,
                MAX_MEMORY_LIMIT_MB
            );
        }

        let config = Self {
            submission_file: raw.submission_file,
            harness_file: raw.harness_file,
            run_command,
            time_limit: Duration::from_millis(raw.time_limit_ms),
            memory_limit_mb: raw.memory_limit_mb,
            output_limit_bytes: raw.output_limit_kb.saturating_mul(1024),
            max_literal_bytes: raw.max_literal_kb.saturating_mul(1024),
            max_cases: raw.max_cases,
            preview_limit: raw.preview_limit,
            case_policy: raw.case_policy,
        };

        check_identifier(&config.submission_module())
            .map_err(|reason| anyhow::anyhow!("submission_file is not importable: {}", reason))?;

        Ok(config)
    }

    /// Load from `path`
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read runner profile {:?}", path))?;
        Self::from_toml(&content)
    }

    /// Module name the harness imports the submission as
    pub fn submission_module(&self) -> String {
        Path::new(&self.submission_file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn harness_options(&self) -> HarnessOptions {
        HarnessOptions {
            module: self.submission_module(),
            policy: self.case_policy,
            max_literal_bytes: self.max_literal_bytes,
            max_cases: self.max_cases,
            preview_limit: self.preview_limit,
        }
    }

    pub fn run_limits(&self) -> RunLimits {
        RunLimits {
            memory_mb: self.memory_limit_mb,
            output_bytes: self.output_limit_bytes,
            ..RunLimits::default()
        }
    }
}

/// Where problem definitions come from
#[derive(Debug, Clone, PartialEq)]
pub enum ProblemSource {
    /// One `<id>.json` file per problem
    Directory { root: PathBuf },
    /// One Redis key holding `{"problems": [...]}`
    Redis { url: String, key: String },
}

/// Full service configuration
#[derive(Debug, Clone)]
pub struct GraderConfig {
    pub runner: RunnerConfig,
    pub bind_addr: String,
    /// Parent directory for grading workspaces (system temp dir when unset)
    pub workspace_root: Option<PathBuf>,
    pub problem_source: ProblemSource,
}

impl GraderConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup` (environment-style variable source)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut runner = match lookup("RUNNER_CONFIG") {
            Some(path) => RunnerConfig::from_file(Path::new(&path))?,
            None => RunnerConfig::from_toml(DEFAULT_RUNNER_PROFILE)?,
        };

        if let Some(ms) = lookup("GRADER_TIME_LIMIT_MS") {
            let ms: u64 = ms
                .parse()
                .with_context(|| format!("Invalid GRADER_TIME_LIMIT_MS: {}", ms))?;
            if ms == 0 {
                anyhow::bail!("GRADER_TIME_LIMIT_MS must be positive");
            }
            runner.time_limit = Duration::from_millis(ms);
        }
        if let Some(policy) = lookup("GRADER_CASE_POLICY") {
            runner.case_policy = policy.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        }

        let problem_source = match lookup("PROBLEM_SOURCE")
            .unwrap_or_else(|| "directory".into())
            .to_lowercase()
            .as_str()
        {
            "directory" | "dir" => ProblemSource::Directory {
                root: lookup("PROBLEMS_DIR")
                    .unwrap_or_else(|| "./test_cases".into())
                    .into(),
            },
            "redis" => ProblemSource::Redis {
                url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".into()),
                key: lookup("PROBLEMS_KEY").unwrap_or_else(|| "basic_problems".into()),
            },
            other => anyhow::bail!("Unknown PROBLEM_SOURCE: {}", other),
        };

        Ok(Self {
            runner,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:5000".into()),
            workspace_root: lookup("WORKSPACE_ROOT").map(PathBuf::from),
            problem_source,
        })
    }
}
