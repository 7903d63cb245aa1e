//! Pipeline progress and the summary produced when a compile completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Position of a compile run in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Start,
    ParseDefine,
    Reference,
    TypeCheck,
    Translate,
    SkipTranslate,
    Completed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Whether the pipeline may move from `self` to `next`.
    ///
    /// An empty registry at the start of reference or type-check jumps
    /// straight to `Completed`.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Start, ParseDefine)
                | (ParseDefine, Reference)
                | (ParseDefine, Completed)
                | (Reference, TypeCheck)
                | (Reference, Completed)
                | (TypeCheck, Translate)
                | (TypeCheck, SkipTranslate)
                | (Translate, Completed)
                | (SkipTranslate, Completed)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Start => "start",
            PipelineState::ParseDefine => "parse+define",
            PipelineState::Reference => "reference",
            PipelineState::TypeCheck => "type-check",
            PipelineState::Translate => "translate",
            PipelineState::SkipTranslate => "skip-translate",
            PipelineState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Branch the pipeline took before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileOutcome {
    /// Translators ran over every registered unit.
    Translated,
    /// Errors were found or no translators were configured.
    TranslationSkipped,
    /// The registry was empty when a stage started.
    NoUnits,
}

/// Summary of one compile run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    pub outcome: CompileOutcome,
    /// Units registered after parse+define.
    pub units: usize,
    pub translations: usize,
    /// Number of records in the error log.
    pub errors: usize,
    pub found_error: bool,
}

impl CompileSummary {
    /// Build the summary of a run that finishes now.
    pub fn finished(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        outcome: CompileOutcome,
        units: usize,
        translations: usize,
        errors: usize,
        found_error: bool,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            run_id,
            started_at,
            finished_at,
            duration: (finished_at - started_at).to_std().unwrap_or_default(),
            outcome,
            units,
            translations,
            errors,
            found_error,
        }
    }

    /// True when every unit was translated without any error.
    pub fn is_success(&self) -> bool {
        self.outcome == CompileOutcome::Translated && !self.found_error
    }
}

/// Serde helpers for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
