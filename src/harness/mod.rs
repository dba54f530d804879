//! Harness synthesis
//!
//! Turns a [`ProblemDescriptor`] into a self-contained Python program that:
//! - imports the target callable from the submission module
//! - calls it once per case with the case's positional arguments
//! - compares the result against the expected value with `==`
//! - prints one machine-readable trace line per case
//!
//! The harness does NOT decide the verdict. It only reports, and the
//! interpreter reads the trace lines back.
//!
//! Only validated identifiers and literal-encoded data are substituted into
//! the template.
//!
//! The per-run trace marker never appears in the source. It is handed over on
//! stdin and kept out of module globals, and traces go to a private duplicate
//! of stdout, so the submission can neither read the marker nor redirect the
//! trace stream. The harness leaves through `os._exit` so exit handlers
//! registered by the submission cannot rewrite its exit code.

pub mod identifier;
pub mod literal;

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

use crate::core::{GradeError, ProblemDescriptor};
use identifier::check_identifier;

/// What the harness does after a failing case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasePolicy {
    /// Run every case, then report
    #[default]
    CollectAll,
    /// Stop at the first failing case (legacy pytest `--maxfail=1` behaviour)
    FailFast,
}

impl fmt::Display for CasePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CasePolicy::CollectAll => write!(f, "collect_all"),
            CasePolicy::FailFast => write!(f, "fail_fast"),
        }
    }
}

impl FromStr for CasePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "collect_all" | "collect-all" => Ok(CasePolicy::CollectAll),
            "fail_fast" | "fail-fast" => Ok(CasePolicy::FailFast),
            other => Err(format!("unknown case policy: {}", other)),
        }
    }
}

/// Knobs for harness synthesis
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Module the submission is importable as (file stem of the submission file)
    pub module: String,
    pub policy: CasePolicy,
    /// Longest encoded literal accepted for a single case, in bytes
    pub max_literal_bytes: usize,
    pub max_cases: usize,
    /// Longest `repr()` the harness reports per value, in characters
    pub preview_limit: usize,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            module: "user_code".to_string(),
            policy: CasePolicy::CollectAll,
            max_literal_bytes: 64 * 1024,
            max_cases: 500,
            preview_limit: 4096,
        }
    }
}

/// A synthesized harness program
#[derive(Debug, Clone)]
pub struct Harness {
    /// Python source text
    pub source: String,
    /// Token prefixing every trace line this harness prints. Never part of
    /// `source`: the harness reads it from stdin before importing the submission.
    pub marker: String,
}

impl Harness {
    /// Bytes to feed the harness on stdin
    pub fn stdin_payload(&self) -> String {
        format!("{}\n", self.marker)
    }
}

const TEMPLATE: &str = r#"import json
import os
import sys
import traceback

FAIL_FAST = {{fail_fast}}
PREVIEW_LIMIT = {{preview_limit}}
CASES = [
{{#each cases}}    ({{this.args}}, {{this.expected}}),
{{/each}}]


def _clip(text):
    if len(text) > PREVIEW_LIMIT:
        return text[:PREVIEW_LIMIT] + "..."
    return text


def _preview(value):
    try:
        return _clip(repr(value))
    except BaseException as exc:
        return "<unrepresentable: %s>" % type(exc).__name__


def _read_marker():
    data = b""
    while not data.endswith(b"\n"):
        try:
            chunk = os.read(0, 256)
        except OSError:
            break
        if not chunk:
            break
        data += chunk
    return data.decode("ascii", "replace").strip()


def _open_trace(marker):
    trace = os.fdopen(os.dup(1), "w", encoding="utf-8")

    def emit(record):
        try:
            sys.stdout.flush()
        except BaseException:
            pass
        trace.write(marker + " " + json.dumps(record) + "\n")
        trace.flush()

    return emit


def _run_cases(emit):
    try:
        from {{module}} import {{target}} as target
    except BaseException:
        traceback.print_exc()
        return 2

    failures = 0
    for index, (args, expected) in enumerate(CASES, 1):
        record = {"case": index, "input": _preview(args), "expected": _preview(expected)}
        try:
            observed = target(*args)
            record["observed"] = _preview(observed)
            record["passed"] = bool(observed == expected)
        except BaseException as exc:
            record["passed"] = False
            summary = "".join(traceback.format_exception_only(type(exc), exc)).strip()
            record["error"] = _clip(summary)
        emit(record)
        if not record["passed"]:
            failures += 1
            if FAIL_FAST:
                break

    return 1 if failures else 0


def main():
    emit = _open_trace(_read_marker())
    try:
        code = _run_cases(emit)
    except BaseException:
        traceback.print_exc()
        code = 1
    for stream in (sys.stdout, sys.stderr):
        try:
            stream.flush()
        except BaseException:
            pass
    os._exit(code)


if __name__ == "__main__":
    main()
"#;

/// One case as substituted into the template
#[derive(Debug, Serialize)]
struct CaseLiteral {
    args: String,
    expected: String,
}

/// Build the harness for `problem`
pub fn synthesize(
    problem: &ProblemDescriptor,
    options: &HarnessOptions,
) -> Result<Harness, GradeError> {
    check_identifier(&problem.target_name)
        .map_err(|reason| GradeError::invalid(format!("unsafe target name: {}", reason)))?;
    check_identifier(&options.module)
        .map_err(|reason| GradeError::invalid(format!("unsafe module name: {}", reason)))?;

    if problem.cases.is_empty() {
        return Err(GradeError::invalid("problem has no test cases"));
    }
    if problem.cases.len() > options.max_cases {
        return Err(GradeError::invalid(format!(
            "problem has {} test cases, at most {} are allowed",
            problem.cases.len(),
            options.max_cases
        )));
    }

    let mut cases = Vec::with_capacity(problem.cases.len());
    for (idx, case) in problem.cases.iter().enumerate() {
        let args = literal::encode_args(&case.input)
            .map_err(|e| GradeError::invalid(format!("case {} input: {}", idx + 1, e)))?;
        let expected = literal::encode(&case.expected)
            .map_err(|e| GradeError::invalid(format!("case {} expected: {}", idx + 1, e)))?;

        if args.len() + expected.len() > options.max_literal_bytes {
            return Err(GradeError::invalid(format!(
                "case {} data exceeds {} bytes",
                idx + 1,
                options.max_literal_bytes
            )));
        }
        cases.push(CaseLiteral { args, expected });
    }

    let fail_fast = match options.policy {
        CasePolicy::CollectAll => "False",
        CasePolicy::FailFast => "True",
    };
    let data = json!({
        "fail_fast": fail_fast,
        "preview_limit": options.preview_limit,
        "cases": cases,
        "module": options.module,
        "target": problem.target_name,
    });

    let source = render(&data)?;
    let marker = format!("@@grade-{}@@", uuid::Uuid::new_v4().simple());

    Ok(Harness { source, marker })
}

/// Render the template; values are inserted verbatim and never re-parsed
fn render(data: &serde_json::Value) -> Result<String, GradeError> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
        .render_template(TEMPLATE, data)
        .map_err(|e| GradeError::invalid(format!("failed to render harness: {}", e)))
}
