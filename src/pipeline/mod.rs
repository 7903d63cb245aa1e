//! Four-stage compilation pipeline.
//!
//! ## Stages
//!
//! 1. **Parse+define** - one task per unit, spawned as soon as the unit is added
//! 2. **Reference** - one task per registered unit
//! 3. **Type check** - one task per registered unit
//! 4. **Translate** - one task per (translator kind, unit) pair, only when no
//!    error was found
//!
//! A barrier separates consecutive stages: no task of a stage starts before
//! every task of the previous stage has finished, successfully or not. This
//! is what lets the reference stage of one unit see definitions contributed
//! by every other unit.

mod registry;
mod runner;
mod state;

pub use registry::{
    CompilationUnit, SharedUnit, TranslationKey, TranslationTable, UnitRegistry, lock_unit,
};
pub use runner::{Collaborators, Pipeline};
pub use state::{CompileOutcome, CompileSummary, PipelineState};
