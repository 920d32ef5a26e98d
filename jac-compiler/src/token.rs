//! Tokens and the hand-written lexer.

use std::fmt;
use std::sync::Arc;

use jac_core::loc::SourceSpan;

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Literals and names
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),

    // Keywords
    KwImport,
    KwFrom,
    KwNode,
    KwEdge,
    KwWalker,
    KwObj,
    KwClass,
    KwHas,
    KwCan,
    KwWith,
    KwEntry,
    KwExit,
    KwImpl,
    KwDef,
    KwClient,
    KwPage,
    KwLet,
    KwIf,
    KwElif,
    KwElse,
    KwFor,
    KwIn,
    KwWhile,
    KwReturn,
    KwReport,
    KwVisit,
    KwDisengage,
    KwYield,
    KwSpawn,
    KwSelf,
    KwHere,
    KwRoot,
    KwVisitor,
    KwTrue,
    KwFalse,
    KwNull,
    KwAnd,
    KwOr,
    KwNot,

    // Punctuation
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    At,
    Backtick,
    Question,
    Assign,
    Arrow,     // ->
    Eq,        // ==
    Ne,        // !=
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    ConnectTo,     // ++>
    ConnectBoth,   // <++>
    EdgeTypedOpen, // +:
    EdgeTypedTo,   // :+>
    ArrowOut,      // -->
    ArrowIn,       // <--

    Eof,
}

impl TokenKind {
    pub fn keyword(name: &str) -> Option<TokenKind> {
        Some(match name {
            "import" => TokenKind::KwImport,
            "from" => TokenKind::KwFrom,
            "node" => TokenKind::KwNode,
            "edge" => TokenKind::KwEdge,
            "walker" => TokenKind::KwWalker,
            "obj" => TokenKind::KwObj,
            "class" => TokenKind::KwClass,
            "has" => TokenKind::KwHas,
            "can" => TokenKind::KwCan,
            "with" => TokenKind::KwWith,
            "entry" => TokenKind::KwEntry,
            "exit" => TokenKind::KwExit,
            "impl" => TokenKind::KwImpl,
            "def" => TokenKind::KwDef,
            "client" => TokenKind::KwClient,
            "page" => TokenKind::KwPage,
            "let" => TokenKind::KwLet,
            "if" => TokenKind::KwIf,
            "elif" => TokenKind::KwElif,
            "else" => TokenKind::KwElse,
            "for" => TokenKind::KwFor,
            "in" => TokenKind::KwIn,
            "while" => TokenKind::KwWhile,
            "return" => TokenKind::KwReturn,
            "report" => TokenKind::KwReport,
            "visit" => TokenKind::KwVisit,
            "disengage" => TokenKind::KwDisengage,
            "yield" => TokenKind::KwYield,
            "spawn" => TokenKind::KwSpawn,
            "self" => TokenKind::KwSelf,
            "here" => TokenKind::KwHere,
            "root" => TokenKind::KwRoot,
            "visitor" => TokenKind::KwVisitor,
            "true" => TokenKind::KwTrue,
            "false" => TokenKind::KwFalse,
            "null" => TokenKind::KwNull,
            "and" => TokenKind::KwAnd,
            "or" => TokenKind::KwOr,
            "not" => TokenKind::KwNot,
            _ => return None,
        })
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Int(n) => write!(f, "{n}"),
            TokenKind::Float(x) => write!(f, "{x}"),
            TokenKind::Str(s) => write!(f, "{s:?}"),
            TokenKind::Name(name) => f.write_str(name),
            TokenKind::Eof => f.write_str("<eof>"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: SourceSpan,
}

/// Lexer over a full source string. Produces a trailing `Eof` token.
pub struct Lexer<'a> {
    src: &'a [u8],
    path: Arc<str>,
    pos: usize,
    line: u32,
    col: u32,
    errors: Vec<(String, SourceSpan)>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, path: impl Into<Arc<str>>) -> Self {
        Self {
            src: source.as_bytes(),
            path: path.into(),
            pos: 0,
            line: 1,
            col: 1,
            errors: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> (Vec<Token>, Vec<(String, SourceSpan)>) {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let start = self.mark();
            let Some(byte) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    span: self.span_from(start),
                });
                break;
            };
            let kind = self.next_kind(byte);
            if let Some(kind) = kind {
                tokens.push(Token {
                    kind,
                    span: self.span_from(start),
                });
            }
        }
        (tokens, self.errors)
    }

    fn next_kind(&mut self, byte: u8) -> Option<TokenKind> {
        match byte {
            b'0'..=b'9' => Some(self.lex_number()),
            b'"' | b'\'' => self.lex_string(byte),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => Some(self.lex_name()),
            b'{' => self.one(TokenKind::LBrace),
            b'}' => self.one(TokenKind::RBrace),
            b'(' => self.one(TokenKind::LParen),
            b')' => self.one(TokenKind::RParen),
            b'[' => self.one(TokenKind::LBracket),
            b']' => self.one(TokenKind::RBracket),
            b',' => self.one(TokenKind::Comma),
            b';' => self.one(TokenKind::Semi),
            b'.' => self.one(TokenKind::Dot),
            b'@' => self.one(TokenKind::At),
            b'`' => self.one(TokenKind::Backtick),
            b'?' => self.one(TokenKind::Question),
            b'%' => self.one(TokenKind::Percent),
            b'*' => self.one(TokenKind::Star),
            b'/' => self.one(TokenKind::Slash),
            b':' => {
                if self.starts_with(b":+>") {
                    self.advance_n(3);
                    Some(TokenKind::EdgeTypedTo)
                } else {
                    self.one(TokenKind::Colon)
                }
            }
            b'=' => {
                if self.starts_with(b"==") {
                    self.advance_n(2);
                    Some(TokenKind::Eq)
                } else {
                    self.one(TokenKind::Assign)
                }
            }
            b'!' => {
                if self.starts_with(b"!=") {
                    self.advance_n(2);
                    Some(TokenKind::Ne)
                } else {
                    self.error_at("unexpected '!'");
                    self.advance();
                    None
                }
            }
            b'<' => {
                if self.starts_with(b"<++>") {
                    self.advance_n(4);
                    Some(TokenKind::ConnectBoth)
                } else if self.starts_with(b"<--") {
                    self.advance_n(3);
                    Some(TokenKind::ArrowIn)
                } else if self.starts_with(b"<=") {
                    self.advance_n(2);
                    Some(TokenKind::Le)
                } else {
                    self.one(TokenKind::Lt)
                }
            }
            b'>' => {
                if self.starts_with(b">=") {
                    self.advance_n(2);
                    Some(TokenKind::Ge)
                } else {
                    self.one(TokenKind::Gt)
                }
            }
            b'+' => {
                if self.starts_with(b"++>") {
                    self.advance_n(3);
                    Some(TokenKind::ConnectTo)
                } else if self.starts_with(b"+:") {
                    self.advance_n(2);
                    Some(TokenKind::EdgeTypedOpen)
                } else {
                    self.one(TokenKind::Plus)
                }
            }
            b'-' => {
                if self.starts_with(b"-->") {
                    self.advance_n(3);
                    Some(TokenKind::ArrowOut)
                } else if self.starts_with(b"->") {
                    self.advance_n(2);
                    Some(TokenKind::Arrow)
                } else {
                    self.one(TokenKind::Minus)
                }
            }
            other => {
                self.error_at(&format!("unexpected character '{}'", other as char));
                self.advance();
                None
            }
        }
    }

    fn lex_number(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b'0'..=b'9')) {
            is_float = true;
            self.advance();
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.advance();
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or_default();
        if is_float {
            TokenKind::Float(text.parse().unwrap_or(0.0))
        } else {
            TokenKind::Int(text.parse().unwrap_or(0))
        }
    }

    fn lex_string(&mut self, quote: u8) -> Option<TokenKind> {
        let open = self.mark();
        self.advance();
        let mut out = String::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    self.errors
                        .push(("unterminated string literal".to_string(), self.span_from(open)));
                    return Some(TokenKind::Str(out));
                }
                Some(b) if b == quote => {
                    self.advance();
                    return Some(TokenKind::Str(out));
                }
                Some(b'\\') => {
                    self.advance();
                    match self.peek() {
                        Some(b'n') => out.push('\n'),
                        Some(b't') => out.push('\t'),
                        Some(b'r') => out.push('\r'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'"') => out.push('"'),
                        Some(b'\'') => out.push('\''),
                        Some(other) => out.push(other as char),
                        None => continue,
                    }
                    self.advance();
                }
                Some(_) => {
                    // Consume one full UTF-8 scalar so multibyte text survives.
                    let rest = std::str::from_utf8(&self.src[self.pos..]).unwrap_or_default();
                    if let Some(ch) = rest.chars().next() {
                        out.push(ch);
                        for _ in 0..ch.len_utf8() {
                            self.advance();
                        }
                    } else {
                        self.advance();
                    }
                }
            }
        }
    }

    fn lex_name(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')) {
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or_default();
        TokenKind::keyword(text).unwrap_or_else(|| TokenKind::Name(text.to_string()))
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.advance();
                }
                Some(b'#') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.advance();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn one(&mut self, kind: TokenKind) -> Option<TokenKind> {
        self.advance();
        Some(kind)
    }

    fn starts_with(&self, text: &[u8]) -> bool {
        self.src[self.pos..].starts_with(text)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn advance(&mut self) {
        if let Some(b) = self.peek() {
            self.pos += 1;
            if b == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn advance_n(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn mark(&self) -> (u32, u32) {
        (self.line, self.col)
    }

    fn span_from(&self, start: (u32, u32)) -> SourceSpan {
        SourceSpan::new(self.path.clone(), start.0, start.1, self.line, self.col)
    }

    fn error_at(&mut self, message: &str) {
        let mark = self.mark();
        let span = self.span_from(mark);
        self.errors.push((message.to_string(), span));
    }
}
