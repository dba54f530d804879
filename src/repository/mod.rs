//! Problem repository - where problem definitions come from
//!
//! Backends:
//! - `DirectoryRepository`: one `<id>.json` file per problem
//! - `RedisRepository`: one key holding the whole problem set
//!
//! Repositories hand out [`ProblemRecord`]s. Turning a record into a
//! [`ProblemDescriptor`] is where malformed case data gets rejected.

pub mod directory;
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ProblemSource;
use crate::core::{GradeError, ProblemDescriptor, TestCase};

/// Why a problem could not be produced
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("problem not found: {0}")]
    NotFound(String),
    #[error("malformed problem data: {0}")]
    Malformed(String),
    #[error("problem store unavailable: {0}")]
    Unavailable(String),
}

/// Problem identifier; stores may use strings or numbers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawProblemId", into = "String")]
pub struct ProblemId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawProblemId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawProblemId> for ProblemId {
    fn from(raw: RawProblemId) -> Self {
        match raw {
            RawProblemId::Text(s) => ProblemId(s),
            RawProblemId::Number(n) => ProblemId(n.to_string()),
        }
    }
}

impl From<ProblemId> for String {
    fn from(id: ProblemId) -> Self {
        id.0
    }
}

impl ProblemId {
    pub fn new(id: impl Into<String>) -> Self {
        ProblemId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProblemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entry of the problem list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemSummary {
    pub id: Option<ProblemId>,
    pub title: Option<String>,
}

/// A stored problem, as authored
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProblemRecord {
    #[serde(default)]
    pub id: Option<ProblemId>,
    #[serde(default)]
    pub title: Option<String>,
    /// Bare callable name, or a `def name(...):` signature
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub example: Option<Value>,
    /// Nested `{title, example}` block used by per-file problems
    #[serde(default)]
    pub problem: Option<Value>,
    #[serde(default)]
    pub tests: Vec<Value>,
}

impl ProblemRecord {
    pub fn title(&self) -> Option<String> {
        self.title.clone().or_else(|| {
            self.problem
                .as_ref()
                .and_then(|p| p.get("title"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    }

    pub fn example(&self) -> Value {
        self.example
            .clone()
            .or_else(|| self.problem.as_ref().and_then(|p| p.get("example")).cloned())
            .unwrap_or_else(|| Value::String(String::new()))
    }

    pub fn summary(&self) -> ProblemSummary {
        ProblemSummary {
            id: self.id.clone(),
            title: self.title(),
        }
    }

    /// Name of the callable, from `function`
    pub fn target_name(&self) -> Result<String, GradeError> {
        let function = self
            .function
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| GradeError::invalid("problem has no function"))?;

        let name = match function.strip_prefix("def ") {
            Some(signature) => signature.trim_start().split('(').next().unwrap_or(""),
            None => function,
        };
        Ok(name.trim().to_string())
    }

    /// Derive the grading descriptor, validating every test case
    pub fn descriptor(&self) -> Result<ProblemDescriptor, GradeError> {
        let target_name = self.target_name()?;

        let cases = self
            .tests
            .iter()
            .enumerate()
            .map(|(idx, raw)| parse_case(idx + 1, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProblemDescriptor::new(target_name, cases))
    }
}

fn parse_case(number: usize, raw: &Value) -> Result<TestCase, GradeError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| GradeError::invalid(format!("case {} is not an object", number)))?;

    let input = match obj.get("input") {
        Some(Value::Array(args)) => args.clone(),
        Some(_) => {
            return Err(GradeError::invalid(format!(
                "case {} input is not a list of arguments",
                number
            )))
        }
        None => {
            return Err(GradeError::invalid(format!(
                "case {} is missing `input`",
                number
            )))
        }
    };
    let expected = obj
        .get("expected")
        .cloned()
        .ok_or_else(|| GradeError::invalid(format!("case {} is missing `expected`", number)))?;

    Ok(TestCase::new(input, expected))
}

/// Source of problem definitions
#[async_trait]
pub trait ProblemRepository: Send + Sync {
    async fn fetch_problem(&self, id: &str) -> Result<ProblemRecord, RepositoryError>;

    async fn list_problems(&self) -> Result<Vec<ProblemSummary>, RepositoryError>;
}

/// Build the repository selected by configuration
pub async fn from_source(source: &ProblemSource) -> anyhow::Result<Arc<dyn ProblemRepository>> {
    let repository: Arc<dyn ProblemRepository> = match source {
        ProblemSource::Directory { root } => Arc::new(DirectoryRepository::new(root)),
        ProblemSource::Redis { url, key } => {
            Arc::new(RedisRepository::connect(url, key).await?)
        }
    };
    Ok(repository)
}

// Re-exports
pub use directory::DirectoryRepository;
pub use redis::RedisRepository;
