use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a grade did not pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    None,
    Timeout,
    RuntimeError,
    AssertionFailure,
    InfrastructureError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::None => "none",
            FailureKind::Timeout => "timeout",
            FailureKind::RuntimeError => "runtime_error",
            FailureKind::AssertionFailure => "assertion_failure",
            FailureKind::InfrastructureError => "infrastructure_error",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a single test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseVerdict {
    /// 1-based position in the problem's case list
    pub case_index: usize,
    pub passed: bool,
    /// Arguments as a Python literal
    pub input: String,
    /// `repr()` of the returned value, absent when the case never produced one
    pub observed_output: Option<String>,
    pub expected_output: String,
    /// Exception raised by the call, or a note about an unreadable trace line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CaseVerdict {
    /// A case that produced no trace at all
    pub fn missing(case_index: usize, input: String, expected_output: String) -> Self {
        Self {
            case_index,
            passed: false,
            input,
            observed_output: None,
            expected_output,
            error: None,
        }
    }
}

/// Structured result of grading one submission against one problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeVerdict {
    pub overall_passed: bool,
    pub case_verdicts: Vec<CaseVerdict>,
    pub raw_stdout: String,
    pub raw_stderr: String,
    pub failure_kind: FailureKind,
    /// Captured stdout or stderr hit the output cap
    #[serde(default)]
    pub output_truncated: bool,
}

impl GradeVerdict {
    /// Verdict for a run the grader itself could not carry out
    pub fn infrastructure_error(message: impl Into<String>) -> Self {
        Self {
            overall_passed: false,
            case_verdicts: vec![],
            raw_stdout: String::new(),
            raw_stderr: message.into(),
            failure_kind: FailureKind::InfrastructureError,
            output_truncated: false,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.case_verdicts.iter().filter(|c| c.passed).count()
    }
}
