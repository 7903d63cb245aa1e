//! Typed error hierarchy for the compilation orchestrator.
//!
//! Four enums cover the distinct failure surfaces:
//! - `CompilerError`: structured records appended to the error log
//! - `PipelineFailure`: structural problems that are not tied to one unit
//! - `UsageError`: illegal API calls, surfaced synchronously to the caller
//! - `TaskError`: how a single worker-pool task can end unsuccessfully

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ParseDefine,
    Reference,
    TypeCheck,
    Translate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::ParseDefine => write!(f, "parse+define"),
            Stage::Reference => write!(f, "reference"),
            Stage::TypeCheck => write!(f, "type-check"),
            Stage::Translate => write!(f, "translate"),
        }
    }
}

/// A failure record kept by the error log.
///
/// Per-unit variants keep the collaborator's error as their `source`, so a
/// caller can `downcast_ref` back to whatever the parser or checker raised.
#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("Failed to parse compilation unit '{unit}': {source}")]
    Parse {
        unit: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Definition phase failed for compilation unit '{unit}': {source}")]
    Definition {
        unit: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Reference phase failed for compilation unit '{unit}': {source}")]
    Reference {
        unit: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Type checking failed for compilation unit '{unit}': {source}")]
    TypeCheck {
        unit: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Translator '{translator}' failed for compilation unit '{unit}': {source}")]
    Translation {
        unit: String,
        translator: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineFailure),
}

impl CompilerError {
    /// Id of the unit this record is about, if it is a per-unit failure.
    pub fn unit(&self) -> Option<&str> {
        match self {
            CompilerError::Parse { unit, .. }
            | CompilerError::Definition { unit, .. }
            | CompilerError::Reference { unit, .. }
            | CompilerError::TypeCheck { unit, .. }
            | CompilerError::Translation { unit, .. } => Some(unit),
            CompilerError::Pipeline(_) => None,
        }
    }

    /// Stage the record was produced in. Structural failures have none.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            CompilerError::Parse { .. } | CompilerError::Definition { .. } => {
                Some(Stage::ParseDefine)
            }
            CompilerError::Reference { .. } => Some(Stage::Reference),
            CompilerError::TypeCheck { .. } => Some(Stage::TypeCheck),
            CompilerError::Translation { .. } => Some(Stage::Translate),
            CompilerError::Pipeline(_) => None,
        }
    }

    /// The collaborator error that caused this record.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            CompilerError::Parse { source, .. }
            | CompilerError::Definition { source, .. }
            | CompilerError::Reference { source, .. }
            | CompilerError::TypeCheck { source, .. }
            | CompilerError::Translation { source, .. } => Some(source),
            CompilerError::Pipeline(_) => None,
        }
    }

    pub fn is_pipeline_failure(&self) -> bool {
        matches!(self, CompilerError::Pipeline(_))
    }
}

/// Structural failures of a compile run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineFailure {
    #[error("No compilation units specified")]
    NoCompilationUnits,

    #[error("No translators configured, nothing to translate")]
    NoTranslators,

    #[error("Translation aborted due to errors in earlier phases")]
    TranslationAborted,

    #[error("A {stage} task was lost before it could report its outcome: {message}")]
    TaskLost { stage: Stage, message: String },
}

/// Illegal API call for the current session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("Cannot add a compilation unit after compile() without reset()")]
    AddAfterCompile,

    #[error("compile() was already called; reset() the compiler first")]
    AlreadyCompiling,

    #[error("Cannot reset the compiler during compilation")]
    ResetDuringCompile,

    #[error("Cannot inspect errors or translations mid-compilation")]
    InspectDuringCompile,
}

/// Outcome of a worker-pool task that did not produce a value.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was cancelled")]
    Cancelled,

    #[error("worker pool is closed")]
    PoolClosed,
}

impl TaskError {
    /// Convert into the error stored as a record's source. A collaborator
    /// failure is passed through untouched.
    pub fn into_cause(self) -> anyhow::Error {
        match self {
            TaskError::Failed(err) => err,
            other => anyhow::Error::new(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn parse_record_carries_unit_and_cause() {
        let err = CompilerError::Parse {
            unit: "main".to_string(),
            source: anyhow::Error::new(Boom),
        };
        assert_eq!(err.unit(), Some("main"));
        assert_eq!(err.stage(), Some(Stage::ParseDefine));
        assert!(err.cause().unwrap().downcast_ref::<Boom>().is_some());
        assert!(err.to_string().contains("main"));
    }

    #[test]
    fn translation_record_names_translator() {
        let err = CompilerError::Translation {
            unit: "a".into(),
            translator: "php".into(),
            source: anyhow::anyhow!("bad node"),
        };
        let msg = err.to_string();
        assert!(msg.contains("php"));
        assert!(msg.contains("'a'"));
        assert_eq!(err.stage(), Some(Stage::Translate));
    }

    #[test]
    fn pipeline_failure_converts_into_record() {
        let err: CompilerError = PipelineFailure::NoCompilationUnits.into();
        assert!(err.is_pipeline_failure());
        assert!(err.unit().is_none());
        assert!(err.stage().is_none());
        assert_eq!(err.to_string(), "No compilation units specified");
    }

    #[test]
    fn task_error_passes_collaborator_failure_through() {
        let cause = TaskError::Failed(anyhow::Error::new(Boom)).into_cause();
        assert!(cause.downcast_ref::<Boom>().is_some());

        let cause = TaskError::Panicked("oops".into()).into_cause();
        assert!(cause.to_string().contains("oops"));
        assert!(matches!(
            cause.downcast_ref::<TaskError>(),
            Some(TaskError::Panicked(_))
        ));
    }

    #[test]
    fn usage_errors_are_distinct_and_std_errors() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        let err = UsageError::AddAfterCompile;
        assert_std_error(&err);
        assert_ne!(err, UsageError::ResetDuringCompile);
        assert!(err.to_string().contains("reset()"));
    }

    #[test]
    fn stage_display_is_human_readable() {
        assert_eq!(Stage::ParseDefine.to_string(), "parse+define");
        assert_eq!(Stage::TypeCheck.to_string(), "type-check");
    }
}
