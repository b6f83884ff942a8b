//! Error types for pipeline construction and traversal.

use thiserror::Error;

/// Errors raised while building or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage argument is missing or unusable. Raised before any traversal.
    #[error("invalid argument for {stage}: {reason}")]
    InvalidArgument { stage: String, reason: String },

    /// A step function failed for one element. The traversal is aborted.
    #[error("element {index} failed: {source}")]
    ElementTransformFailure {
        /// 0-based position of the offending element in the source.
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The pipeline text parsed, but its stages do not form a runnable pipeline.
    #[error("{0}")]
    Structure(String),

    #[error("line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("{stage}: {source}")]
    InStage {
        stage: &'static str,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub(crate) fn invalid(stage: &str, reason: impl Into<String>) -> Self {
        PipelineError::InvalidArgument {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }

    /// Position of the failing element, looking through stage and line wrappers.
    pub fn element_index(&self) -> Option<usize> {
        match self {
            PipelineError::ElementTransformFailure { index, .. } => Some(*index),
            PipelineError::AtLine { source, .. } | PipelineError::InStage { source, .. } => {
                source.element_index()
            }
            _ => None,
        }
    }
}

pub type PipelineResult<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_failure_message() {
        let err = PipelineError::ElementTransformFailure {
            index: 3,
            source: anyhow::anyhow!("not a number"),
        };
        assert_eq!(err.to_string(), "element 3 failed: not a number");
        assert_eq!(err.element_index(), Some(3));
    }

    #[test]
    fn test_wrapped_index_is_visible() {
        let inner = PipelineError::ElementTransformFailure {
            index: 1,
            source: anyhow::anyhow!("bad"),
        };
        let err = PipelineError::InStage {
            stage: "SCALE",
            source: Box::new(inner),
        };
        assert_eq!(err.to_string(), "SCALE: element 1 failed: bad");
        assert_eq!(err.element_index(), Some(1));
    }

    #[test]
    fn test_invalid_argument_has_no_index() {
        let err = PipelineError::invalid("DIVIDE", "divisor must not be zero");
        assert_eq!(
            err.to_string(),
            "invalid argument for DIVIDE: divisor must not be zero"
        );
        assert_eq!(err.element_index(), None);
    }
}
