use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What to call and which cases to check it against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDescriptor {
    /// Name of the callable the submission must define
    pub target_name: String,
    pub cases: Vec<TestCase>,
}

impl ProblemDescriptor {
    pub fn new(target_name: impl Into<String>, cases: Vec<TestCase>) -> Self {
        Self {
            target_name: target_name.into(),
            cases,
        }
    }
}

/// One call of the target: positional arguments and the expected return value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: Vec<Value>,
    pub expected: Value,
}

impl TestCase {
    pub fn new(input: Vec<Value>, expected: Value) -> Self {
        Self { input, expected }
    }
}

/// Learner code. Untrusted: only ever written into a grading workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub source: String,
}

impl Submission {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}
