//! Result interpreter
//!
//! Maps a raw [`ExecutionResult`] back to a [`GradeVerdict`] by reading the
//! harness' trace lines. Never fails: anything unreadable degrades to a
//! failed case.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::{CaseVerdict, FailureKind, GradeVerdict, ProblemDescriptor};
use crate::harness::literal;
use crate::runner::ExecutionResult;

/// One trace record as printed by the harness
#[derive(Debug, Deserialize)]
struct TraceRecord {
    case: usize,
    #[serde(default)]
    observed: Option<String>,
    passed: bool,
    #[serde(default)]
    error: Option<String>,
}

/// A trace line after parsing
#[derive(Debug, PartialEq)]
enum Trace {
    Case {
        index: usize,
        observed: Option<String>,
        passed: bool,
        error: Option<String>,
    },
    /// Marker present but the payload could not be read
    Malformed { index: Option<usize>, reason: String },
}

fn parse_trace_line(line: &str, marker: &str) -> Option<Trace> {
    let pos = line.find(marker)?;
    let payload = line[pos + marker.len()..].trim();

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            return Some(Trace::Malformed {
                index: None,
                reason: e.to_string(),
            })
        }
    };
    let index = value
        .get("case")
        .and_then(Value::as_u64)
        .map(|i| i as usize);

    match serde_json::from_value::<TraceRecord>(value) {
        Ok(record) => Some(Trace::Case {
            index: record.case,
            observed: record.observed,
            passed: record.passed,
            error: record.error,
        }),
        Err(e) => Some(Trace::Malformed {
            index,
            reason: e.to_string(),
        }),
    }
}

/// Build the verdict for `result`, produced by a harness printing `marker`
pub fn interpret(result: ExecutionResult, problem: &ProblemDescriptor, marker: &str) -> GradeVerdict {
    let case_count = problem.cases.len();
    let mut slots: Vec<Option<CaseVerdict>> = vec![None; case_count];
    let mut traces_seen = 0usize;
    // Where a malformed line with no readable index is attributed
    let mut next_index = 1usize;

    for line in result.stdout.lines() {
        let Some(trace) = parse_trace_line(line, marker) else {
            continue;
        };
        traces_seen += 1;

        let (index, verdict) = match trace {
            Trace::Case {
                index,
                observed,
                passed,
                error,
            } => (
                index,
                CaseParts {
                    passed,
                    observed,
                    error,
                },
            ),
            Trace::Malformed { index, reason } => {
                warn!("Malformed trace line: {}", reason);
                (
                    index.unwrap_or(next_index),
                    CaseParts {
                        passed: false,
                        observed: None,
                        error: Some(format!("malformed trace line: {}", reason)),
                    },
                )
            }
        };

        if index == 0 || index > case_count {
            warn!("Trace line for unknown case {} ignored", index);
            continue;
        }
        let slot = &mut slots[index - 1];
        if slot.is_some() {
            // The harness reports a case after running it, so its line comes last
            warn!("Repeated trace line for case {}, keeping the latest", index);
        }
        *slot = Some(verdict.into_verdict(index, problem));
        next_index = index + 1;
    }

    let case_verdicts: Vec<CaseVerdict> = slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.unwrap_or_else(|| missing_case(i + 1, problem)))
        .collect();

    let all_passed = case_verdicts.iter().all(|c| c.passed);
    let (overall_passed, failure_kind) = if result.timed_out {
        (false, FailureKind::Timeout)
    } else if result.exit_code != 0 && traces_seen == 0 {
        (false, FailureKind::RuntimeError)
    } else if !all_passed {
        (false, FailureKind::AssertionFailure)
    } else if result.exit_code != 0 {
        (false, FailureKind::RuntimeError)
    } else {
        (true, FailureKind::None)
    };

    debug!(
        "Interpreted {} trace lines for {} cases: {}",
        traces_seen, case_count, failure_kind
    );

    let output_truncated = result.is_truncated();
    GradeVerdict {
        overall_passed,
        case_verdicts,
        raw_stdout: result.stdout,
        raw_stderr: result.stderr,
        failure_kind,
        output_truncated,
    }
}

struct CaseParts {
    passed: bool,
    observed: Option<String>,
    error: Option<String>,
}

impl CaseParts {
    fn into_verdict(self, index: usize, problem: &ProblemDescriptor) -> CaseVerdict {
        let (input, expected_output) = encoded_case(index, problem);
        CaseVerdict {
            case_index: index,
            passed: self.passed,
            input,
            observed_output: self.observed,
            expected_output,
            error: self.error,
        }
    }
}

fn missing_case(index: usize, problem: &ProblemDescriptor) -> CaseVerdict {
    let (input, expected_output) = encoded_case(index, problem);
    CaseVerdict::missing(index, input, expected_output)
}

/// Input and expected value as the engine encodes them, never as the run reports them
fn encoded_case(index: usize, problem: &ProblemDescriptor) -> (String, String) {
    let case = &problem.cases[index - 1];
    let input = literal::encode_args(&case.input).unwrap_or_else(|e| format!("<{}>", e));
    let expected = literal::encode(&case.expected).unwrap_or_else(|e| format!("<{}>", e));
    (input, expected)
}
