//! Definition, reference resolution and type checking for the script language.
//!
//! All units of a session share one global symbol table. Definitions from
//! every unit are in place before any unit is resolved, so a unit may use a
//! variable another unit declares.

use crate::collaborators::{Definer, Resolver, TokenCursor, TypeChecker};
use crate::lang::ScriptLanguage;
use crate::lang::stack::ensure_sufficient_stack;
use crate::lang::parser::{
    BinOp, Expr, ExprKind, NodeCursor, Program, ScriptType, Stmt, StmtKind, Symbol, VarRef,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SemanticError {
    #[error("line {line}: variable ${name} is already declared")]
    Redeclared { name: String, line: usize },

    #[error("line {line}: unknown variable ${name}")]
    UnknownVariable { name: String, line: usize },

    #[error("{}", .0.join("; "))]
    Type(Vec<String>),
}

/// Semantic analyser used for all three middle phases.
#[derive(Debug, Default)]
pub struct SemanticAnalyzer {
    symbols: RwLock<HashMap<String, Symbol>>,
    next_id: AtomicUsize,
    found_error: AtomicBool,
}

impl SemanticAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Symbol declared under `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.symbols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn declare(&self, target: &mut VarRef, ty: ScriptType) -> Result<(), SemanticError> {
        let mut symbols = self.symbols.write().unwrap_or_else(PoisonError::into_inner);
        if symbols.contains_key(&target.name) {
            return Err(SemanticError::Redeclared {
                name: target.name.clone(),
                line: target.line,
            });
        }
        let symbol = Symbol {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            ty,
        };
        symbols.insert(target.name.clone(), symbol);
        target.symbol = Some(symbol);
        Ok(())
    }

    fn resolve(&self, var: &mut VarRef) -> Result<(), SemanticError> {
        if var.symbol.is_some() {
            return Ok(());
        }
        match self.lookup(&var.name) {
            Some(symbol) => {
                var.symbol = Some(symbol);
                Ok(())
            }
            None => Err(SemanticError::UnknownVariable {
                name: var.name.clone(),
                line: var.line,
            }),
        }
    }

    fn resolve_expr(&self, expr: &mut Expr) -> Result<(), SemanticError> {
        ensure_sufficient_stack(|| self.resolve_expr_inner(expr))
    }

    fn resolve_expr_inner(&self, expr: &mut Expr) -> Result<(), SemanticError> {
        match &mut expr.kind {
            ExprKind::Var(var) => self.resolve(var),
            ExprKind::Neg(inner) | ExprKind::Group(inner) => self.resolve_expr(inner),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.resolve_expr(lhs)?;
                self.resolve_expr(rhs)
            }
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Bool(_) => Ok(()),
        }
    }
}

/// Walk the statements the cursor yields, from the start.
fn each_statement(
    tree: &mut Program,
    cursor: &mut NodeCursor,
    mut visit: impl FnMut(&mut Stmt) -> Result<(), SemanticError>,
) -> anyhow::Result<()> {
    cursor.rewind();
    while let Some(index) = cursor.next_index() {
        let Some(stmt) = tree.statements.get_mut(index) else {
            anyhow::bail!("cursor position {} is past the end of the tree", index);
        };
        visit(stmt)?;
    }
    Ok(())
}

impl Definer<ScriptLanguage> for SemanticAnalyzer {
    fn enrich_with_definitions(
        &self,
        tree: &mut Program,
        cursor: &mut NodeCursor,
    ) -> anyhow::Result<()> {
        each_statement(tree, cursor, |stmt| match &mut stmt.kind {
            StmtKind::Declare { ty, target, .. } => self.declare(target, *ty),
            StmtKind::Assign { .. } | StmtKind::Expr(_) => Ok(()),
        })
    }
}

impl Resolver<ScriptLanguage> for SemanticAnalyzer {
    fn enrich_with_references(
        &self,
        tree: &mut Program,
        cursor: &mut NodeCursor,
    ) -> anyhow::Result<()> {
        each_statement(tree, cursor, |stmt| match &mut stmt.kind {
            StmtKind::Declare { init, .. } => match init {
                Some(init) => self.resolve_expr(init),
                None => Ok(()),
            },
            StmtKind::Assign { target, value } => {
                self.resolve(target)?;
                self.resolve_expr(value)
            }
            StmtKind::Expr(expr) => self.resolve_expr(expr),
        })
    }
}

/// Compute and record the type of `expr`. `None` means the type is unknown
/// because of an error reported elsewhere.
fn check_expr(expr: &mut Expr, errors: &mut Vec<String>) -> Option<ScriptType> {
    ensure_sufficient_stack(|| check_expr_inner(expr, errors))
}

fn check_expr_inner(expr: &mut Expr, errors: &mut Vec<String>) -> Option<ScriptType> {
    let line = expr.line;
    let ty = match &mut expr.kind {
        ExprKind::Int(_) => Some(ScriptType::Int),
        ExprKind::Float(_) => Some(ScriptType::Float),
        ExprKind::Str(_) => Some(ScriptType::Str),
        ExprKind::Bool(_) => Some(ScriptType::Bool),
        // Unresolved variables were already reported by the reference phase.
        ExprKind::Var(var) => var.symbol.map(|symbol| symbol.ty),
        ExprKind::Group(inner) => check_expr(inner, errors),
        ExprKind::Neg(inner) => match check_expr(inner, errors) {
            Some(ty) if ty.is_numeric() => Some(ty),
            Some(ty) => {
                errors.push(format!("line {line}: cannot negate a value of type {ty}"));
                None
            }
            None => None,
        },
        ExprKind::Binary { op, lhs, rhs } => {
            let lhs = check_expr(lhs, errors);
            let rhs = check_expr(rhs, errors);
            match (lhs, rhs) {
                (Some(ScriptType::Str), Some(ScriptType::Str)) if *op == BinOp::Add => {
                    Some(ScriptType::Str)
                }
                (Some(l), Some(r)) if l.is_numeric() && r.is_numeric() => {
                    if l == ScriptType::Float || r == ScriptType::Float {
                        Some(ScriptType::Float)
                    } else {
                        Some(ScriptType::Int)
                    }
                }
                (Some(l), Some(r)) => {
                    errors.push(format!(
                        "line {line}: operator {} cannot be applied to {l} and {r}",
                        op.symbol()
                    ));
                    None
                }
                _ => None,
            }
        }
    };
    expr.ty = ty;
    ty
}

fn check_assignment(
    target: &VarRef,
    declared: ScriptType,
    value: &mut Expr,
    errors: &mut Vec<String>,
) {
    if let Some(actual) = check_expr(value, errors)
        && !declared.accepts(actual)
    {
        errors.push(format!(
            "line {}: cannot assign {actual} to ${} of type {declared}",
            value.line, target.name
        ));
    }
}

impl TypeChecker<ScriptLanguage> for SemanticAnalyzer {
    fn do_type_checking(&self, tree: &mut Program, cursor: &mut NodeCursor) -> anyhow::Result<()> {
        let mut errors = Vec::new();
        each_statement(tree, cursor, |stmt| {
            match &mut stmt.kind {
                StmtKind::Declare { ty, target, init } => {
                    if let Some(init) = init {
                        check_assignment(target, *ty, init, &mut errors);
                    }
                }
                StmtKind::Assign { target, value } => match target.symbol {
                    Some(symbol) => check_assignment(target, symbol.ty, value, &mut errors),
                    None => {
                        check_expr(value, &mut errors);
                    }
                },
                StmtKind::Expr(expr) => {
                    check_expr(expr, &mut errors);
                }
            }
            Ok(())
        })?;

        if errors.is_empty() {
            return Ok(());
        }
        self.found_error.store(true, Ordering::SeqCst);
        Err(SemanticError::Type(errors).into())
    }

    fn has_found_error(&self) -> bool {
        self.found_error.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.symbols
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.next_id.store(0, Ordering::SeqCst);
        self.found_error.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_program;

    fn unit(source: &str) -> (Program, NodeCursor) {
        let program = parse_program(source).unwrap();
        let cursor = NodeCursor::new(program.statements.len());
        (program, cursor)
    }

    fn run_all(analyzer: &SemanticAnalyzer, source: &str) -> anyhow::Result<Program> {
        let (mut tree, mut cursor) = unit(source);
        analyzer.enrich_with_definitions(&mut tree, &mut cursor)?;
        analyzer.enrich_with_references(&mut tree, &mut cursor)?;
        analyzer.do_type_checking(&mut tree, &mut cursor)?;
        Ok(tree)
    }

    #[test]
    fn test_well_typed_program() {
        let analyzer = SemanticAnalyzer::new();
        let source = "int $a = 1;\nfloat $b = $a * 2;\nstring $s = 'x' + 'y';";
        let tree = run_all(&analyzer, source).unwrap();
        assert!(!analyzer.has_found_error());
        assert_eq!(analyzer.symbol_count(), 3);

        let StmtKind::Declare { init: Some(init), .. } = &tree.statements[1].kind else {
            panic!("expected initialised declaration");
        };
        assert_eq!(init.ty, Some(ScriptType::Int));
    }

    #[test]
    fn test_redeclaration_fails() {
        let analyzer = SemanticAnalyzer::new();
        let err = run_all(&analyzer, "int $a;\nbool $a;").unwrap_err();
        match err.downcast_ref::<SemanticError>() {
            Some(SemanticError::Redeclared { name, line }) => {
                assert_eq!(name, "a");
                assert_eq!(*line, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unknown_variable_fails() {
        let analyzer = SemanticAnalyzer::new();
        let err = run_all(&analyzer, "$missing + 1;").unwrap_err();
        assert!(err.to_string().contains("unknown variable $missing"));
    }

    #[test]
    fn test_definitions_visible_across_units() {
        let analyzer = SemanticAnalyzer::new();
        let (mut b_tree, mut b_cursor) = unit("int $shared = 2;");
        let (mut a_tree, mut a_cursor) = unit("int $x = $shared + 1;");

        analyzer.enrich_with_definitions(&mut a_tree, &mut a_cursor).unwrap();
        analyzer.enrich_with_definitions(&mut b_tree, &mut b_cursor).unwrap();
        analyzer.enrich_with_references(&mut a_tree, &mut a_cursor).unwrap();
        assert!(analyzer.lookup("shared").is_some());
    }

    #[test]
    fn test_type_errors_are_collected_and_sticky() {
        let analyzer = SemanticAnalyzer::new();
        let err = run_all(&analyzer, "int $a = 1.5;\nbool $b = 1 + true;\n-'s';").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("cannot assign float to $a of type int"));
        assert!(message.contains("operator + cannot be applied to int and bool"));
        assert!(message.contains("cannot negate"));
        assert!(analyzer.has_found_error());

        run_all(&analyzer, "int $ok = 1;").unwrap();
        assert!(analyzer.has_found_error());
    }

    #[test]
    fn test_reset_clears_symbols_and_flag() {
        let analyzer = SemanticAnalyzer::new();
        let _ = run_all(&analyzer, "int $a = 'x';");
        assert!(analyzer.has_found_error());

        analyzer.reset();
        assert!(!analyzer.has_found_error());
        assert_eq!(analyzer.symbol_count(), 0);
        run_all(&analyzer, "int $a = 1;").unwrap();
    }

    #[test]
    fn test_int_widens_to_float_only() {
        let analyzer = SemanticAnalyzer::new();
        run_all(&analyzer, "float $f = 1;\n$f = $f / 2;").unwrap();
        assert!(run_all(&analyzer, "int $i;\n$i = 2.5;").is_err());
    }
}
