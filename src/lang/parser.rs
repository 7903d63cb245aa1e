//! Syntax tree, statement cursor and recursive-descent parser.

use crate::collaborators::{Parsed, Parser, TokenCursor};
use crate::lang::lexer::{Spanned, Token, tokenize};
use crate::lang::stack::ensure_sufficient_stack;
use crate::lang::{ScriptLanguage, SyntaxError};
use std::fmt;
use std::str::FromStr;

/// Declared type of a variable or computed type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptType {
    Int,
    Float,
    Bool,
    Str,
}

impl ScriptType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }

    /// Whether a value of type `value` may be stored in a variable of type `self`.
    pub fn accepts(&self, value: ScriptType) -> bool {
        *self == value || (*self == ScriptType::Float && value == ScriptType::Int)
    }
}

impl FromStr for ScriptType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "bool" => Ok(Self::Bool),
            "string" => Ok(Self::Str),
            other => Err(format!("unknown type '{other}'")),
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Str => "string",
        };
        f.write_str(name)
    }
}

/// Symbol a variable reference was resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub id: usize,
    pub ty: ScriptType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub line: usize,
    /// Filled in by definition (declarations) or reference resolution.
    pub symbol: Option<Symbol>,
}

impl VarRef {
    fn new(name: String, line: usize) -> Self {
        Self {
            name,
            line,
            symbol: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Var(VarRef),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Group(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
    /// Set by the type checker.
    pub ty: Option<ScriptType>,
}

impl Expr {
    fn new(kind: ExprKind, line: usize) -> Self {
        Self {
            kind,
            line,
            ty: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Declare {
        ty: ScriptType,
        target: VarRef,
        init: Option<Expr>,
    },
    Assign {
        target: VarRef,
        value: Expr,
    },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

/// Syntax tree of one compilation unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

/// Forward-only cursor over the statements of a [`Program`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCursor {
    position: usize,
    len: usize,
}

impl NodeCursor {
    pub fn new(len: usize) -> Self {
        Self { position: 0, len }
    }

    /// Index of the next statement, advancing past it.
    pub fn next_index(&mut self) -> Option<usize> {
        if self.position >= self.len {
            return None;
        }
        self.position += 1;
        Some(self.position - 1)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_at_end(&self) -> bool {
        self.position >= self.len
    }
}

impl TokenCursor for NodeCursor {
    fn rewind(&mut self) {
        self.position = 0;
    }
}

/// Deepest expression nesting accepted. Parentheses, unary minus and each
/// operator of a binary chain count one level.
pub const MAX_EXPR_DEPTH: usize = 512;

struct TokenStream {
    tokens: Vec<Spanned>,
    position: usize,
    depth: usize,
}

impl TokenStream {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|s| &s.token)
    }

    fn peek_second(&self) -> Option<&Token> {
        self.tokens.get(self.position + 1).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn next(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        match self.tokens.get(self.position) {
            Some(s) => SyntaxError::new(
                s.line,
                s.column,
                format!("expected {expected}, found {}", s.token),
            ),
            None => SyntaxError::new(
                self.line(),
                0,
                format!("expected {expected}, found end of input"),
            ),
        }
    }

    /// Enter one more level of expression nesting.
    fn descend(&mut self) -> Result<(), SyntaxError> {
        self.depth += 1;
        if self.depth <= MAX_EXPR_DEPTH {
            return Ok(());
        }
        let (line, column) = self
            .tokens
            .get(self.position)
            .map(|s| (s.line, s.column))
            .unwrap_or_else(|| (self.line(), 0));
        Err(SyntaxError::new(
            line,
            column,
            format!("expression nested deeper than {MAX_EXPR_DEPTH} levels"),
        ))
    }

    /// Run `parse` on a stack with room to spare and restore the nesting
    /// depth afterwards.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, SyntaxError>,
    ) -> Result<T, SyntaxError> {
        let depth = self.depth;
        let result = ensure_sufficient_stack(|| parse(self));
        self.depth = depth;
        result
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<(), SyntaxError> {
        if self.peek() == Some(&token) {
            self.position += 1;
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn statement(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        let kind = match (self.peek(), self.peek_second()) {
            (Some(Token::TypeName(_)), _) => {
                let Some(Spanned {
                    token: Token::TypeName(name),
                    ..
                }) = self.next()
                else {
                    return Err(self.unexpected("a type"));
                };
                let ty = name
                    .parse::<ScriptType>()
                    .map_err(|message: String| SyntaxError::new(line, 0, message))?;
                let target = self.variable()?;
                let init = if self.peek() == Some(&Token::Assign) {
                    self.position += 1;
                    Some(self.expression()?)
                } else {
                    None
                };
                StmtKind::Declare { ty, target, init }
            }
            (Some(Token::Variable(_)), Some(Token::Assign)) => {
                let target = self.variable()?;
                self.position += 1;
                let value = self.expression()?;
                StmtKind::Assign { target, value }
            }
            _ => StmtKind::Expr(self.expression()?),
        };
        self.expect(Token::Semicolon, "';'")?;
        Ok(Stmt { kind, line })
    }

    fn variable(&mut self) -> Result<VarRef, SyntaxError> {
        if !matches!(self.peek(), Some(Token::Variable(_))) {
            return Err(self.unexpected("a variable"));
        }
        match self.next() {
            Some(Spanned {
                token: Token::Variable(name),
                line,
                ..
            }) => Ok(VarRef::new(name, line)),
            _ => Err(self.unexpected("a variable")),
        }
    }

    fn expression(&mut self) -> Result<Expr, SyntaxError> {
        self.nested(|s| {
            let mut lhs = s.term()?;
            loop {
                let op = match s.peek() {
                    Some(Token::Plus) => BinOp::Add,
                    Some(Token::Minus) => BinOp::Sub,
                    _ => return Ok(lhs),
                };
                s.position += 1;
                s.descend()?;
                let rhs = s.term()?;
                lhs = binary(op, lhs, rhs);
            }
        })
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        self.nested(|s| {
            let mut lhs = s.unary()?;
            loop {
                let op = match s.peek() {
                    Some(Token::Star) => BinOp::Mul,
                    Some(Token::Slash) => BinOp::Div,
                    _ => return Ok(lhs),
                };
                s.position += 1;
                s.descend()?;
                let rhs = s.unary()?;
                lhs = binary(op, lhs, rhs);
            }
        })
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        self.nested(|s| {
            if s.peek() == Some(&Token::Minus) {
                let line = s.line();
                s.position += 1;
                s.descend()?;
                let operand = s.unary()?;
                return Ok(Expr::new(ExprKind::Neg(Box::new(operand)), line));
            }
            s.primary()
        })
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let Some(Spanned { token, line, .. }) = self.next() else {
            return Err(self.unexpected("an expression"));
        };
        let kind = match token {
            Token::Int(value) => ExprKind::Int(value),
            Token::Float(value) => ExprKind::Float(value),
            Token::Str(value) => ExprKind::Str(value),
            Token::Bool(value) => ExprKind::Bool(value),
            Token::Variable(name) => ExprKind::Var(VarRef::new(name, line)),
            Token::LParen => {
                self.descend()?;
                let inner = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                ExprKind::Group(Box::new(inner))
            }
            _ => {
                self.position -= 1;
                return Err(self.unexpected("an expression"));
            }
        };
        Ok(Expr::new(kind, line))
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let line = lhs.line;
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        line,
    )
}

/// Parse a whole compilation unit.
pub fn parse_program(source: &str) -> Result<Program, SyntaxError> {
    let mut stream = TokenStream {
        tokens: tokenize(source)?,
        position: 0,
        depth: 0,
    };
    let mut statements = Vec::new();
    while stream.peek().is_some() {
        statements.push(stream.statement()?);
    }
    Ok(Program { statements })
}

/// Parser collaborator for [`ScriptLanguage`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptParser;

impl Parser<ScriptLanguage> for ScriptParser {
    fn parse(&self, source: &str) -> anyhow::Result<Parsed<ScriptLanguage>> {
        let program = parse_program(source)?;
        let cursor = NodeCursor::new(program.statements.len());
        Ok(Parsed::new(program, cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declarations() {
        let program = parse_program("int $a;\nfloat $b = 1.5;").unwrap();
        assert_eq!(program.statements.len(), 2);
        match &program.statements[1].kind {
            StmtKind::Declare { ty, target, init } => {
                assert_eq!(*ty, ScriptType::Float);
                assert_eq!(target.name, "b");
                assert!(matches!(init.as_ref().unwrap().kind, ExprKind::Float(_)));
            }
            other => panic!("expected declaration, got {other:?}"),
        }
        assert_eq!(program.statements[1].line, 2);
    }

    #[test]
    fn test_precedence() {
        let program = parse_program("1 + 2 * 3;").unwrap();
        let StmtKind::Expr(expr) = &program.statements[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Binary { op, rhs, .. } = &expr.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_assignment_vs_expression() {
        let program = parse_program("$a = $b - -1;\n$a;").unwrap();
        assert!(matches!(program.statements[0].kind, StmtKind::Assign { .. }));
        assert!(matches!(program.statements[1].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn test_group() {
        let program = parse_program("(1 + 2) * 3;").unwrap();
        let StmtKind::Expr(expr) = &program.statements[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Binary { lhs, .. } = &expr.kind else {
            panic!("expected binary expression");
        };
        assert!(matches!(lhs.kind, ExprKind::Group(_)));
    }

    #[test]
    fn test_syntax_errors() {
        let err = parse_program("int $a").unwrap_err();
        assert!(err.message.contains("';'"));
        assert!(err.message.contains("end of input"));

        let err = parse_program("int 5;").unwrap_err();
        assert!(err.message.contains("variable"));

        let err = parse_program("$a = ;").unwrap_err();
        assert!(err.message.contains("expression"));

        assert!(parse_program("(1 + 2;").is_err());
    }

    fn nested_parens(depth: usize) -> String {
        format!("int $a = {}1{};", "(".repeat(depth), ")".repeat(depth))
    }

    #[test]
    fn test_nesting_up_to_limit_parses() {
        let program = parse_program(&nested_parens(MAX_EXPR_DEPTH - 1)).unwrap();
        assert_eq!(program.statements.len(), 1);

        let chain = format!("{}1;", "1 + ".repeat(MAX_EXPR_DEPTH - 1));
        assert!(parse_program(&chain).is_ok());
    }

    #[test]
    fn test_excessive_nesting_is_a_syntax_error() {
        for source in [
            nested_parens(30_000),
            format!("{}1;", "-".repeat(200_000)),
            format!("{}1;", "1 * ".repeat(MAX_EXPR_DEPTH + 1)),
        ] {
            let err = parse_program(&source).unwrap_err();
            assert!(err.message.contains("nested deeper than"), "{}", err.message);
            assert_eq!(err.line, 1);
        }
    }

    #[test]
    fn test_empty_source() {
        assert!(parse_program("  # nothing\n").unwrap().statements.is_empty());
    }

    #[test]
    fn test_cursor_walk_and_rewind() {
        let mut cursor = NodeCursor::new(2);
        assert_eq!(cursor.next_index(), Some(0));
        assert_eq!(cursor.next_index(), Some(1));
        assert_eq!(cursor.next_index(), None);
        assert!(cursor.is_at_end());
        cursor.rewind();
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.next_index(), Some(0));
    }

    #[test]
    fn test_parser_collaborator() {
        let parsed = ScriptParser.parse("int $a;").unwrap();
        assert_eq!(parsed.tree.statements.len(), 1);
        assert_eq!(parsed.cursor, NodeCursor::new(1));

        let err = ScriptParser.parse("int $a").err().unwrap();
        assert!(err.downcast_ref::<SyntaxError>().is_some());
    }

    #[test]
    fn test_type_acceptance() {
        assert!(ScriptType::Float.accepts(ScriptType::Int));
        assert!(!ScriptType::Int.accepts(ScriptType::Float));
        assert!(ScriptType::Str.accepts(ScriptType::Str));
        assert_eq!("string".parse::<ScriptType>().unwrap(), ScriptType::Str);
    }
}
