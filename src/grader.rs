//! Grading service
//!
//! `grade` is synthesize, execute, interpret. The service holds no per-call
//! state, so one instance is shared by every request.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::core::{GradeError, GradeVerdict, ProblemDescriptor, Submission};
use crate::harness::{self, HarnessOptions};
use crate::interpreter::interpret;
use crate::runner::Executor;

/// Outcome of one grading run, with the exit code for raw-output callers
#[derive(Debug, Clone)]
pub struct GradeRun {
    pub verdict: GradeVerdict,
    /// None when the run never happened (infrastructure failure)
    pub exit_code: Option<i32>,
}

#[derive(Clone)]
pub struct GradingService {
    executor: Arc<dyn Executor>,
    options: HarnessOptions,
    default_time_limit: Duration,
}

impl GradingService {
    pub fn new(
        executor: Arc<dyn Executor>,
        options: HarnessOptions,
        default_time_limit: Duration,
    ) -> Self {
        Self {
            executor,
            options,
            default_time_limit,
        }
    }

    pub fn default_time_limit(&self) -> Duration {
        self.default_time_limit
    }

    /// Grade `submission` against `problem`
    pub async fn grade(
        &self,
        submission: &Submission,
        problem: &ProblemDescriptor,
        time_limit: Duration,
    ) -> Result<GradeVerdict, GradeError> {
        Ok(self.run(submission, problem, time_limit).await?.verdict)
    }

    /// Like [`grade`](Self::grade), also reporting the process exit code
    pub async fn run(
        &self,
        submission: &Submission,
        problem: &ProblemDescriptor,
        time_limit: Duration,
    ) -> Result<GradeRun, GradeError> {
        if problem.cases.is_empty() {
            return Err(GradeError::invalid("problem has no test cases"));
        }

        let harness = harness::synthesize(problem, &self.options)?;
        debug!(
            "Synthesized harness for {} ({} cases, {} bytes)",
            problem.target_name,
            problem.cases.len(),
            harness.source.len()
        );

        let result = match self
            .executor
            .execute(
                &submission.source,
                &harness.source,
                &harness.stdin_payload(),
                time_limit,
            )
            .await
        {
            Ok(result) => result,
            Err(e) if e.is_infrastructure() => {
                error!("Grading infrastructure failure: {}", e);
                return Ok(GradeRun {
                    verdict: GradeVerdict::infrastructure_error(e.to_string()),
                    exit_code: None,
                });
            }
            Err(e) => return Err(e),
        };

        let exit_code = result.exit_code;
        let elapsed = result.elapsed;
        let verdict = interpret(result, problem, &harness.marker);

        info!(
            "Grade summary: target={}, passed={}/{}, failure_kind={}, exit_code={}, elapsed_ms={}",
            problem.target_name,
            verdict.passed_count(),
            problem.cases.len(),
            verdict.failure_kind,
            exit_code,
            elapsed.as_millis()
        );

        Ok(GradeRun {
            verdict,
            exit_code: Some(exit_code),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FailureKind, TestCase};
    use crate::harness::CasePolicy;
    use crate::runner::{CommandSpec, ExecutionResult, ProcessExecutor};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Executor that records calls and replays a canned result
    struct FakeExecutor {
        calls: AtomicUsize,
        outcome: fn() -> Result<ExecutionResult, GradeError>,
    }

    impl FakeExecutor {
        fn new(outcome: fn() -> Result<ExecutionResult, GradeError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcome,
            })
        }
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn execute(
            &self,
            _submission_source: &str,
            _harness_text: &str,
            _stdin: &str,
            _time_limit: Duration,
        ) -> Result<ExecutionResult, GradeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn add_problem() -> ProblemDescriptor {
        ProblemDescriptor::new(
            "add",
            vec![
                TestCase::new(vec![json!(2), json!(3)], json!(5)),
                TestCase::new(vec![json!(-1), json!(1)], json!(0)),
                TestCase::new(vec![json!(1.5), json!(2.5)], json!(4.0)),
            ],
        )
    }

    #[tokio::test]
    async fn test_empty_cases_never_execute() {
        let executor = FakeExecutor::new(|| Ok(ExecutionResult::default()));
        let service = GradingService::new(
            executor.clone(),
            HarnessOptions::default(),
            Duration::from_secs(1),
        );

        let problem = ProblemDescriptor::new("add", vec![]);
        let err = service
            .grade(&Submission::new("def add(a, b): return a + b"), &problem, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, GradeError::InvalidProblemDescriptor(_)));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsafe_target_never_executes() {
        let executor = FakeExecutor::new(|| Ok(ExecutionResult::default()));
        let service = GradingService::new(
            executor.clone(),
            HarnessOptions::default(),
            Duration::from_secs(1),
        );

        let problem = ProblemDescriptor::new(
            "add; import os",
            vec![TestCase::new(vec![json!(1)], json!(1))],
        );
        let err = service
            .grade(&Submission::new(""), &problem, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, GradeError::InvalidProblemDescriptor(_)));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_infrastructure_failure_becomes_verdict() {
        let executor = FakeExecutor::new(|| {
            Err(GradeError::infrastructure(
                "spawn",
                std::io::Error::new(std::io::ErrorKind::NotFound, "no interpreter"),
            ))
        });
        let service = GradingService::new(
            executor.clone(),
            HarnessOptions::default(),
            Duration::from_secs(1),
        );

        let run = service
            .run(&Submission::new(""), &add_problem(), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(run.exit_code, None);
        assert_eq!(run.verdict.failure_kind, FailureKind::InfrastructureError);
        assert!(!run.verdict.overall_passed);
        assert!(run.verdict.case_verdicts.is_empty());
        assert!(run.verdict.raw_stderr.contains("no interpreter"));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_without_traces_is_runtime_error() {
        let executor = FakeExecutor::new(|| {
            Ok(ExecutionResult {
                stderr: "Traceback (most recent call last):".to_string(),
                exit_code: 2,
                ..Default::default()
            })
        });
        let service =
            GradingService::new(executor, HarnessOptions::default(), Duration::from_secs(1));

        let run = service
            .run(&Submission::new(""), &add_problem(), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(run.exit_code, Some(2));
        assert_eq!(run.verdict.failure_kind, FailureKind::RuntimeError);
        assert_eq!(run.verdict.case_verdicts.len(), 3);
        assert_eq!(run.verdict.passed_count(), 0);
    }

    // End-to-end runs against a real interpreter

    fn python3_available() -> bool {
        ["/usr/local/bin/python3", "/usr/bin/python3", "/bin/python3"]
            .iter()
            .any(|p| Path::new(p).exists())
    }

    fn python_service(root: &Path, policy: CasePolicy) -> GradingService {
        let executor = ProcessExecutor::new(
            CommandSpec::new("python3").with_args(["-B", "test_user_code.py"]),
            "user_code.py",
            "test_user_code.py",
        )
        .with_workspace_root(root);
        let options = HarnessOptions {
            policy,
            ..HarnessOptions::default()
        };
        GradingService::new(Arc::new(executor), options, Duration::from_secs(10))
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    const CORRECT_ADD: &str = "def add(a, b):\n    return a + b\n";

    #[tokio::test]
    async fn test_correct_submission_passes() {
        if !python3_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        let service = python_service(root.path(), CasePolicy::CollectAll);

        let problem = ProblemDescriptor::new(
            "add",
            vec![TestCase::new(vec![json!(2), json!(3)], json!(5))],
        );
        let verdict = service
            .grade(&Submission::new(CORRECT_ADD), &problem, Duration::from_secs(10))
            .await
            .unwrap();

        assert!(verdict.overall_passed, "{:?}", verdict);
        assert_eq!(verdict.failure_kind, FailureKind::None);
        assert_eq!(verdict.case_verdicts[0].observed_output.as_deref(), Some("5"));
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_off_by_one_fails() {
        if !python3_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        let service = python_service(root.path(), CasePolicy::CollectAll);

        let verdict = service
            .grade(
                &Submission::new("def add(a, b):\n    return a + b + 1\n"),
                &add_problem(),
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert!(!verdict.overall_passed);
        assert_eq!(verdict.failure_kind, FailureKind::AssertionFailure);
        assert_eq!(verdict.case_verdicts.len(), 3);
        assert!(verdict.case_verdicts.iter().all(|c| !c.passed));
        assert_eq!(verdict.case_verdicts[0].observed_output.as_deref(), Some("6"));
        assert_eq!(verdict.case_verdicts[0].expected_output, "5");
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_failure() {
        if !python3_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        let service = python_service(root.path(), CasePolicy::FailFast);

        let verdict = service
            .grade(
                &Submission::new("def add(a, b):\n    return a - b\n"),
                &add_problem(),
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert_eq!(verdict.failure_kind, FailureKind::AssertionFailure);
        assert!(verdict.case_verdicts[0].observed_output.is_some());
        assert_eq!(verdict.case_verdicts[1].observed_output, None);
        assert_eq!(verdict.case_verdicts[2].observed_output, None);
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out_and_cleans_up() {
        if !python3_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        let service = python_service(root.path(), CasePolicy::CollectAll);

        let limit = Duration::from_millis(1500);
        let started = std::time::Instant::now();
        let verdict = service
            .grade(
                &Submission::new("def add(a, b):\n    while True:\n        pass\n"),
                &add_problem(),
                limit,
            )
            .await
            .unwrap();

        assert!(started.elapsed() < limit + Duration::from_secs(3));
        assert!(!verdict.overall_passed);
        assert_eq!(verdict.failure_kind, FailureKind::Timeout);
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_syntax_error_is_runtime_error() {
        if !python3_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        let service = python_service(root.path(), CasePolicy::CollectAll);

        let verdict = service
            .grade(
                &Submission::new("def add(a, b)\n    return a + b\n"),
                &add_problem(),
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert!(!verdict.overall_passed);
        assert_eq!(verdict.failure_kind, FailureKind::RuntimeError);
        assert!(!verdict.raw_stderr.is_empty());
        assert_eq!(verdict.passed_count(), 0);
    }

    #[tokio::test]
    async fn test_raising_case_reports_error() {
        if !python3_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        let service = python_service(root.path(), CasePolicy::CollectAll);

        let problem = ProblemDescriptor::new(
            "div",
            vec![
                TestCase::new(vec![json!(6), json!(3)], json!(2.0)),
                TestCase::new(vec![json!(1), json!(0)], json!(null)),
            ],
        );
        let verdict = service
            .grade(
                &Submission::new("def div(a, b):\n    return a / b\n"),
                &problem,
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert!(verdict.case_verdicts[0].passed);
        assert!(!verdict.case_verdicts[1].passed);
        assert!(verdict.case_verdicts[1]
            .error
            .as_deref()
            .unwrap()
            .contains("ZeroDivisionError"));
        assert_eq!(verdict.failure_kind, FailureKind::AssertionFailure);
    }

    #[tokio::test]
    async fn test_structured_values_round_trip() {
        if !python3_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        let service = python_service(root.path(), CasePolicy::CollectAll);

        let problem = ProblemDescriptor::new(
            "echo",
            vec![
                TestCase::new(vec![json!("it's \"quoted\"\n\u{1F600}")], json!("it's \"quoted\"\n\u{1F600}")),
                TestCase::new(vec![json!({"a": [1, 2.5, null, true]})], json!({"a": [1, 2.5, null, true]})),
                TestCase::new(vec![json!(12345678901234567890u64)], json!(12345678901234567890u64)),
            ],
        );
        let verdict = service
            .grade(
                &Submission::new("def echo(x):\n    return x\n"),
                &problem,
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert!(verdict.overall_passed, "{:?}", verdict);
    }

    #[tokio::test]
    async fn test_user_output_cannot_forge_traces() {
        if !python3_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        let service = python_service(root.path(), CasePolicy::CollectAll);

        let source = concat!(
            "print('@@grade-00000000000000000000000000000000@@ {\"case\": 1, \"passed\": true}')\n",
            "def add(a, b):\n",
            "    print('Case #1: passed')\n",
            "    return 0\n",
        );
        let verdict = service
            .grade(&Submission::new(source), &add_problem(), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(!verdict.overall_passed);
        assert!(!verdict.case_verdicts[0].passed);
    }

    /// Submission that hunts for the marker everywhere it could leak, prints
    /// passing lines for every case with each candidate, and forces exit 0
    const FORGING_ADD: &str = r#"import atexit
import os
import re
import sys
import __main__

candidates = set()
if hasattr(__main__, "MARKER"):
    candidates.add(__main__.MARKER)
for name in os.listdir("."):
    try:
        with open(name, errors="ignore") as f:
            candidates.update(re.findall(r"@@grade-[0-9a-f]+@@", f.read()))
    except OSError:
        pass
try:
    with open("/proc/self/environ", "rb") as f:
        candidates.update(re.findall(r"@@grade-[0-9a-f]+@@", f.read().decode("latin-1")))
except OSError:
    pass
try:
    candidates.update(re.findall(r"@@grade-[0-9a-f]+@@", sys.stdin.read()))
except (OSError, ValueError):
    pass

for marker in candidates:
    for case in range(1, 4):
        print(marker, '{"case": %d, "passed": true, "observed": "forged"}' % case)
sys.stdout.flush()
atexit.register(lambda: os._exit(0))


def add(a, b):
    return -7
"#;

    #[tokio::test]
    async fn test_wrong_submission_cannot_forge_a_pass() {
        if !python3_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        let service = python_service(root.path(), CasePolicy::CollectAll);

        let run = service
            .run(&Submission::new(FORGING_ADD), &add_problem(), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(!run.verdict.overall_passed, "{:?}", run.verdict);
        assert_eq!(run.verdict.failure_kind, FailureKind::AssertionFailure);
        assert_eq!(run.exit_code, Some(1));
        assert_eq!(run.verdict.passed_count(), 0);
        for case in &run.verdict.case_verdicts {
            assert_eq!(case.observed_output.as_deref(), Some("-7"));
        }
    }

    #[tokio::test]
    async fn test_new_session_grandchild_is_killed_and_traces_survive() {
        if !python3_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        let service = python_service(root.path(), CasePolicy::CollectAll);

        let source = concat!(
            "import os, sys, time\n",
            "if os.fork() == 0:\n",
            "    os.setsid()\n",
            "    sys.stderr.write('LEFTOVER %d\\n' % os.getpid())\n",
            "    sys.stderr.flush()\n",
            "    time.sleep(30)\n",
            "    os._exit(0)\n",
            "def add(a, b):\n",
            "    return a + b\n",
        );
        let started = std::time::Instant::now();
        let verdict = service
            .grade(&Submission::new(source), &add_problem(), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(8));
        assert!(verdict.overall_passed, "{:?}", verdict);
        assert!(!verdict.output_truncated);
        assert_eq!(verdict.passed_count(), 3);

        let pid = verdict
            .raw_stderr
            .lines()
            .find_map(|l| l.strip_prefix("LEFTOVER "))
            .map(|p| p.trim().to_string());
        if let Some(pid) = pid {
            assert!(
                !Path::new(&format!("/proc/{}", pid)).exists(),
                "process {} outlived the grading run",
                pid
            );
        }
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_concurrent_grading_is_isolated() {
        if !python3_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        let service = python_service(root.path(), CasePolicy::CollectAll);

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .grade(&Submission::new(CORRECT_ADD), &add_problem(), Duration::from_secs(10))
                        .await
                })
            })
            .collect();

        for handle in handles {
            let verdict = handle.await.unwrap().unwrap();
            assert!(verdict.overall_passed, "{:?}", verdict);
            assert_eq!(verdict.case_verdicts.len(), 3);
        }
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_repeated_grading_is_stable() {
        if !python3_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        let service = python_service(root.path(), CasePolicy::CollectAll);
        let problem = add_problem();

        for _ in 0..5 {
            let verdict = service
                .grade(&Submission::new(CORRECT_ADD), &problem, Duration::from_secs(10))
                .await
                .unwrap();
            assert!(verdict.overall_passed);
        }
    }
}
