//! Core data model shared by every grading stage

pub mod error;
pub mod problem;
pub mod verdict;

pub use error::GradeError;
pub use problem::{ProblemDescriptor, Submission, TestCase};
pub use verdict::{CaseVerdict, FailureKind, GradeVerdict};
