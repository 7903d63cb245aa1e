//! PHP translator: emits the program without its type annotations.

use crate::collaborators::{Translator, TranslatorFactory};
use crate::lang::ScriptLanguage;
use crate::lang::parser::{BinOp, Expr, ExprKind, NodeCursor, Program, ScriptType, StmtKind};
use crate::lang::stack::ensure_sufficient_stack;
use anyhow::{Result, bail};

pub const PHP_KIND: &str = "php";

const INDENT: &str = "    ";

#[derive(Debug, Default)]
pub struct PhpTranslator {
    output: String,
}

impl PhpTranslator {
    fn line(&mut self, text: &str) {
        self.output.push_str(INDENT);
        self.output.push_str(text);
        self.output.push('\n');
    }
}

fn float_literal(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

fn expr(e: &Expr) -> String {
    ensure_sufficient_stack(|| expr_inner(e))
}

fn expr_inner(e: &Expr) -> String {
    match &e.kind {
        ExprKind::Int(value) => value.to_string(),
        ExprKind::Float(value) => float_literal(*value),
        ExprKind::Str(value) => string_literal(value),
        ExprKind::Bool(value) => value.to_string(),
        ExprKind::Var(var) => format!("${}", var.name),
        ExprKind::Neg(inner) => format!("-{}", expr(inner)),
        ExprKind::Group(inner) => format!("({})", expr(inner)),
        ExprKind::Binary { op, lhs, rhs } => {
            // String addition was typed as concatenation.
            let symbol = if *op == BinOp::Add && e.ty == Some(ScriptType::Str) {
                "."
            } else {
                op.symbol()
            };
            format!("{} {} {}", expr(lhs), symbol, expr(rhs))
        }
    }
}

impl Translator<ScriptLanguage> for PhpTranslator {
    fn translate(&mut self, tree: &Program, cursor: &mut NodeCursor) -> Result<String> {
        self.output.clear();
        self.output.push_str("<?php\nnamespace{\n");
        while let Some(index) = cursor.next_index() {
            let Some(stmt) = tree.statements.get(index) else {
                bail!("cursor position {} is past the end of the tree", index);
            };
            let text = match &stmt.kind {
                StmtKind::Declare { target, init, .. } => match init {
                    Some(init) => format!("${} = {};", target.name, expr(init)),
                    None => format!("${};", target.name),
                },
                StmtKind::Assign { target, value } => {
                    format!("${} = {};", target.name, expr(value))
                }
                StmtKind::Expr(e) => format!("{};", expr(e)),
            };
            self.line(&text);
        }
        self.output.push_str("}\n?>");
        Ok(std::mem::take(&mut self.output))
    }
}

/// Builds a fresh [`PhpTranslator`] per unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhpTranslatorFactory;

impl TranslatorFactory<ScriptLanguage> for PhpTranslatorFactory {
    fn kind(&self) -> &str {
        PHP_KIND
    }

    fn build(&self) -> Result<Box<dyn Translator<ScriptLanguage>>> {
        Ok(Box::new(PhpTranslator::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Definer, Resolver, TokenCursor, TypeChecker};
    use crate::lang::analysis::SemanticAnalyzer;
    use crate::lang::parser::parse_program;

    fn translate(source: &str) -> String {
        let analyzer = SemanticAnalyzer::new();
        let mut tree = parse_program(source).unwrap();
        let mut cursor = NodeCursor::new(tree.statements.len());
        analyzer.enrich_with_definitions(&mut tree, &mut cursor).unwrap();
        analyzer.enrich_with_references(&mut tree, &mut cursor).unwrap();
        analyzer.do_type_checking(&mut tree, &mut cursor).unwrap();
        cursor.rewind();
        PhpTranslatorFactory
            .build()
            .unwrap()
            .translate(&tree, &mut cursor)
            .unwrap()
    }

    #[test]
    fn test_declaration_without_initialiser() {
        assert_eq!(translate("int $a;"), "<?php\nnamespace{\n    $a;\n}\n?>");
    }

    #[test]
    fn test_declaration_with_initialiser() {
        assert_eq!(translate("int $a = 1;"), "<?php\nnamespace{\n    $a = 1;\n}\n?>");
    }

    #[test]
    fn test_expressions() {
        let out =
            translate("float $f = (1 + 2) * -3.0;\nstring $s = 'it\\'s' + 'x';\n$f = $f / 2;");
        assert!(out.contains("    $f = (1 + 2) * -3.0;\n"));
        assert!(out.contains("    $s = 'it\\'s' . 'x';\n"));
        assert!(out.contains("    $f = $f / 2;\n"));
    }

    #[test]
    fn test_unrewound_cursor_translates_nothing() {
        let mut tree = parse_program("int $a;").unwrap();
        let mut cursor = NodeCursor::new(1);
        let analyzer = SemanticAnalyzer::new();
        analyzer.enrich_with_definitions(&mut tree, &mut cursor).unwrap();
        assert!(cursor.is_at_end());

        let out = PhpTranslator::default().translate(&tree, &mut cursor).unwrap();
        assert_eq!(out, "<?php\nnamespace{\n}\n?>");
    }

    #[test]
    fn test_factory_kind() {
        assert_eq!(PhpTranslatorFactory.kind(), "php");
    }
}
