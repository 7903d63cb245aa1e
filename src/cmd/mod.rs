//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `compile` | `Compile`        |
//! | `config`  | `Config`         |

pub mod compile;
pub mod config;

pub use compile::{CompileOptions, cmd_compile};
pub use config::cmd_config;
