//! Token vocabulary for loomio's indentation-sensitive config dialect
//! (C8): a deliberately small YAML subset — scalars, `key:`, `- item`,
//! inline `[a, b]` lists, and leading whitespace turned into explicit
//! [`TokenType::Indent`] tokens so the parser never re-scans raw text.

use std::fmt;

#[derive(Debug, PartialEq, Clone)]
pub enum TokenType {
    /// Bare scalar: `host`, `127.0.0.1`, `-flag`.
    Text(String),
    /// Quoted scalar: `"host"`, `'GET'`.
    StringLit(String),
    /// Unsigned integer scalar: `8080`.
    Number(u64),
    Colon,
    /// Leading `-` of a block-list item.
    Dash,
    LBracket,
    RBracket,
    Comma,
    Newline,
    /// Column width of a line's leading whitespace (tabs count as 4).
    Indent(usize),
}

impl TokenType {
    /// Short label used in parse-error messages in place of `{:?}`.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenType::Text(_) => "text",
            TokenType::StringLit(_) => "quoted string",
            TokenType::Number(_) => "number",
            TokenType::Colon => "':'",
            TokenType::Dash => "'-'",
            TokenType::LBracket => "'['",
            TokenType::RBracket => "']'",
            TokenType::Comma => "','",
            TokenType::Newline => "newline",
            TokenType::Indent(_) => "indent",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenType,
    pub loc: Loc,
}

#[derive(Debug, Clone, Copy)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Text(s) => write!(f, "{s}"),
            TokenType::StringLit(s) => write!(f, "\"{s}\""),
            TokenType::Number(n) => write!(f, "{n}"),
            TokenType::Colon => write!(f, ":"),
            TokenType::Dash => write!(f, "-"),
            TokenType::LBracket => write!(f, "["),
            TokenType::RBracket => write!(f, "]"),
            TokenType::Comma => write!(f, ","),
            TokenType::Newline => write!(f, "\\n"),
            TokenType::Indent(n) => {
                for _ in 0..*n {
                    write!(f, " ")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, col {}", self.line, self.col)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' at {}", self.kind, self.loc)
    }
}
