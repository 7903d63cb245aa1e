pub mod collaborators;
pub mod compiler;
pub mod config;
pub mod error_log;
pub mod errors;
pub mod lang;
pub mod listeners;
pub mod pipeline;
pub mod pool;
pub mod session;
pub mod source;

pub use compiler::{Compiler, CompilerBuilder};
pub use errors::{CompilerError, PipelineFailure, UsageError};
