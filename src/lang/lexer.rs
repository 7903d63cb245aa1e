//! Tokenizer for the script language.

use crate::lang::SyntaxError;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `int`, `float`, `bool` or `string`.
    TypeName(String),
    /// `$name`, stored without the sigil.
    Variable(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Assign,
    Semicolon,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::TypeName(name) => write!(f, "type '{name}'"),
            Token::Variable(name) => write!(f, "variable '${name}'"),
            Token::Int(value) => write!(f, "integer {value}"),
            Token::Float(value) => write!(f, "float {value}"),
            Token::Str(_) => write!(f, "string literal"),
            Token::Bool(value) => write!(f, "'{value}'"),
            Token::Plus => write!(f, "'+'"),
            Token::Minus => write!(f, "'-'"),
            Token::Star => write!(f, "'*'"),
            Token::Slash => write!(f, "'/'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Assign => write!(f, "'='"),
            Token::Semicolon => write!(f, "';'"),
        }
    }
}

/// A token and the line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line, self.column, message)
    }

    fn skip_trivia(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    fn number(&mut self) -> Result<Token, SyntaxError> {
        let text = self.take_while(|c| c.is_ascii_digit() || c == '.');
        if text.contains('.') {
            text.parse()
                .map(Token::Float)
                .map_err(|_| self.error(format!("invalid float literal '{text}'")))
        } else {
            text.parse()
                .map(Token::Int)
                .map_err(|_| self.error(format!("integer literal '{text}' out of range")))
        }
    }

    fn string(&mut self, quote: char) -> Result<Token, SyntaxError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(Token::Str(out)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated string literal")),
                },
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string literal")),
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Spanned>, SyntaxError> {
        self.skip_trivia();
        let (line, column) = (self.line, self.column);
        let Some(&c) = self.chars.peek() else {
            return Ok(None);
        };

        let token = match c {
            '0'..='9' => self.number()?,
            '"' | '\'' => self.string(c)?,
            '$' => {
                self.bump();
                let name = self.take_while(|c| c.is_alphanumeric() || c == '_');
                if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
                    return Err(self.error("expected a variable name after '$'"));
                }
                Token::Variable(name)
            }
            c if c.is_alphabetic() || c == '_' => {
                let word = self.take_while(|c| c.is_alphanumeric() || c == '_');
                match word.as_str() {
                    "int" | "float" | "bool" | "string" => Token::TypeName(word),
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    _ => {
                        let message = format!("unknown word '{word}'");
                        return Err(SyntaxError::new(line, column, message));
                    }
                }
            }
            _ => {
                self.bump();
                match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '=' => Token::Assign,
                    ';' => Token::Semicolon,
                    other => {
                        return Err(SyntaxError::new(
                            line,
                            column,
                            format!("unexpected character '{other}'"),
                        ));
                    }
                }
            }
        };

        Ok(Some(Spanned {
            token,
            line,
            column,
        }))
    }
}

/// Split `source` into tokens. `#` starts a comment running to end of line.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}
