use thiserror::Error;

/// Errors surfaced by the grading pipeline.
///
/// Grading outcomes (timeouts, failing cases, crashing submissions) are not
/// errors: they are reported through [`crate::core::GradeVerdict`].
#[derive(Debug, Error)]
pub enum GradeError {
    /// Problem data is unusable. Caller's fault, retrying will not help.
    #[error("invalid problem descriptor: {0}")]
    InvalidProblemDescriptor(String),

    /// Workspace or process setup failed. Safe to retry.
    #[error("grading infrastructure failure: {context}: {source}")]
    Infrastructure {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl GradeError {
    pub fn invalid(message: impl Into<String>) -> Self {
        GradeError::InvalidProblemDescriptor(message.into())
    }

    pub fn infrastructure(context: impl Into<String>, source: std::io::Error) -> Self {
        GradeError::Infrastructure {
            context: context.into(),
            source,
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self, GradeError::Infrastructure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GradeError::invalid("empty target name");
        assert_eq!(
            err.to_string(),
            "invalid problem descriptor: empty target name"
        );
        assert!(!err.is_infrastructure());

        let err = GradeError::infrastructure(
            "failed to spawn runner",
            std::io::Error::new(std::io::ErrorKind::NotFound, "python3"),
        );
        assert!(err.is_infrastructure());
        assert_eq!(
            err.to_string(),
            "grading infrastructure failure: failed to spawn runner: python3"
        );
    }
}
