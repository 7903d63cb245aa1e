//! Reference toolchain: a small typed script language translated to PHP.
//!
//! ```text
//! int $count = 2;
//! float $ratio = $count / 4.0;
//! string $name = 'unit' + 'forge';
//! ```
//!
//! Statements declare (`<type> $name [= expr];`), assign (`$name = expr;`)
//! or evaluate an expression. Types are `int`, `float`, `bool` and `string`.

mod analysis;
mod lexer;
mod parser;
mod stack;
mod translator;

pub use analysis::{SemanticAnalyzer, SemanticError};
pub use lexer::{Spanned, Token, tokenize};
pub use parser::{
    BinOp, Expr, ExprKind, MAX_EXPR_DEPTH, NodeCursor, Program, ScriptParser, ScriptType, Stmt,
    StmtKind, Symbol, VarRef, parse_program,
};
pub use translator::{PHP_KIND, PhpTranslator, PhpTranslatorFactory};

use crate::collaborators::{Language, TranslatorFactory};
use crate::compiler::Compiler;
use crate::config::CompilerConfig;
use anyhow::{Result, bail};
use std::sync::Arc;
use thiserror::Error;

/// Binds [`Program`] and [`NodeCursor`] as the tree and cursor types.
pub struct ScriptLanguage;

impl Language for ScriptLanguage {
    type Tree = Program;
    type Cursor = NodeCursor;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}, column {column}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Factory for a translator kind named in configuration.
pub fn translator_factory(kind: &str) -> Result<Arc<dyn TranslatorFactory<ScriptLanguage>>> {
    match kind {
        PHP_KIND => Ok(Arc::new(PhpTranslatorFactory)),
        other => bail!("Unknown translator kind '{}'", other),
    }
}

/// Build a compiler for the script language from configuration.
pub fn reference_compiler(config: &CompilerConfig) -> Result<Compiler<ScriptLanguage>> {
    let mut builder = Compiler::<ScriptLanguage>::builder()
        .parser(Arc::new(ScriptParser))
        .semantic(Arc::new(SemanticAnalyzer::new()))
        .config(config);
    for kind in &config.translators.enabled {
        builder = builder.translator(translator_factory(kind)?);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_translator_kind() {
        let err = translator_factory("cobol").err().unwrap();
        assert!(err.to_string().contains("cobol"));
    }

    #[test]
    fn test_reference_compiler_uses_config() {
        let mut config = CompilerConfig::default();
        config.pool.workers = 3;
        let compiler = reference_compiler(&config).unwrap();
        assert_eq!(compiler.workers(), 3);
        assert_eq!(compiler.translator_kinds(), vec!["php"]);

        config.translators.enabled = vec!["php".into(), "js".into()];
        assert!(reference_compiler(&config).is_err());
    }
}
