//! Lexer for the permission-oriented scripting language's surface syntax.
//!
//! Tokenizes the concrete syntax this crate defines to exercise the
//! checker/manifest/context pipeline. Surface syntax is this crate's own
//! concern — spec.md's Non-goals explicitly disclaim the exact grammar.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Eof,
    Newline,

    Identifier(String),
    GlobalIdentifier(String),   // $$name
    PatternIdentifier(String),  // %name
    HostAliasIdentifier(String), // @name

    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    BooleanLiteral(bool),
    NilLiteral,

    PathLiteral(String),
    PathPatternLiteral(String),
    URLLiteral(String),
    URLPatternLiteral(String),
    HostLiteral(String),
    HostPatternLiteral(String),
    SchemeLiteral(String),

    /// A raw quantity/rate token scanned as text, e.g. `1h30mn`, `10x/s`.
    QuantityOrRate(String),

    // Keywords
    KwFn, KwReturn, KwIf, KwElse, KwSwitch, KwMatch, KwFor, KwWalk, KwIn,
    KwBreak, KwContinue, KwPrune, KwYield, KwAssert, KwImport, KwExtend,
    KwStruct, KwTestsuite, KwTestcase, KwPreinit, KwManifest, KwGo, KwDo,
    KwSelf, KwSendval, KwMapping, KwCompute, KwConst, KwOtherprops, KwNo,
    KwCase, KwDefault,

    // Punctuation
    LParen, RParen, LBrace, RBrace, LBracket, RBracket,
    Comma, Colon, Semicolon, Dot, DotDot, DotDotDot,
    Arrow,     // =>
    FatDot,    // .{  (used for meta-block/extraction sugar, tokenized as Dot+LBrace by parser)
    Assign,
    Plus, Minus, Star, Slash,
    EqEq, NotEq, Lt, Lte, Gt, Gte,
    AndAnd, OrOr, Bang,
    Question,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)
    }
}

pub struct Lexer<'a> {
    src: &'a str,
    chars: Vec<char>,
    pos: usize,
}

fn keyword(ident: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match ident {
        "fn" => KwFn,
        "return" => KwReturn,
        "if" => KwIf,
        "else" => KwElse,
        "switch" => KwSwitch,
        "match" => KwMatch,
        "for" => KwFor,
        "walk" => KwWalk,
        "in" => KwIn,
        "break" => KwBreak,
        "continue" => KwContinue,
        "prune" => KwPrune,
        "yield" => KwYield,
        "assert" => KwAssert,
        "import" => KwImport,
        "extend" => KwExtend,
        "struct" => KwStruct,
        "testsuite" => KwTestsuite,
        "testcase" => KwTestcase,
        "preinit" => KwPreinit,
        "manifest" => KwManifest,
        "go" => KwGo,
        "do" => KwDo,
        "self" => KwSelf,
        "sendval" => KwSendval,
        "Mapping" => KwMapping,
        "compute" => KwCompute,
        "const" => KwConst,
        "otherprops" => KwOtherprops,
        "no" => KwNo,
        "case" => KwCase,
        "default" => KwDefault,
        "true" => BooleanLiteral(true),
        "false" => BooleanLiteral(false),
        "nil" => NilLiteral,
        _ => return None,
    })
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, chars: src.chars().collect(), pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            while matches!(self.peek(), Some(' ') | Some('\t') | Some('\r')) {
                self.pos += 1;
            }
            if self.peek() == Some('#') {
                while !matches!(self.peek(), None | Some('\n')) {
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    /// Tokenize the entire input.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut out = Vec::new();
        loop {
            self.skip_ws_and_comments();
            let start = self.pos;
            let Some(c) = self.peek() else {
                out.push(Token { kind: TokenKind::Eof, start, end: start });
                break;
            };
            if c == '\n' {
                self.pos += 1;
                out.push(Token { kind: TokenKind::Newline, start, end: self.pos });
                continue;
            }
            let kind = self.scan_token(c);
            out.push(Token { kind, start, end: self.pos });
        }
        out
    }

    fn scan_token(&mut self, c: char) -> TokenKind {
        use TokenKind::*;
        match c {
            '"' => self.scan_string(),
            '0'..='9' => self.scan_number_or_quantity(),
            '$' if self.peek_at(1) == Some('$') => {
                self.pos += 2;
                GlobalIdentifier(self.scan_ident_text())
            }
            '%' => {
                self.pos += 1;
                PatternIdentifier(self.scan_ident_text())
            }
            '@' => {
                self.pos += 1;
                HostAliasIdentifier(self.scan_ident_text())
            }
            '/' if self.looks_like_path_start() => self.scan_path_literal(),
            '.' if self.looks_like_relative_path_start() => self.scan_path_literal(),
            _ if self.looks_like_scheme_start() => self.scan_scheme_like_literal(),
            'a'..='z' | 'A'..='Z' | '_' => {
                let text = self.scan_ident_text();
                keyword(&text).unwrap_or(Identifier(text))
            }
            '(' => { self.pos += 1; LParen }
            ')' => { self.pos += 1; RParen }
            '{' => { self.pos += 1; LBrace }
            '}' => { self.pos += 1; RBrace }
            '[' => { self.pos += 1; LBracket }
            ']' => { self.pos += 1; RBracket }
            ',' => { self.pos += 1; Comma }
            ':' => { self.pos += 1; Colon }
            ';' => { self.pos += 1; Semicolon }
            '.' => {
                if self.peek_at(1) == Some('.') && self.peek_at(2) == Some('.') {
                    self.pos += 3;
                    DotDotDot
                } else if self.peek_at(1) == Some('.') {
                    self.pos += 2;
                    DotDot
                } else {
                    self.pos += 1;
                    Dot
                }
            }
            '=' => {
                if self.peek_at(1) == Some('=') {
                    self.pos += 2;
                    EqEq
                } else if self.peek_at(1) == Some('>') {
                    self.pos += 2;
                    Arrow
                } else {
                    self.pos += 1;
                    Assign
                }
            }
            '+' => { self.pos += 1; Plus }
            '-' => { self.pos += 1; Minus }
            '*' => { self.pos += 1; Star }
            '!' => {
                if self.peek_at(1) == Some('=') {
                    self.pos += 2;
                    NotEq
                } else {
                    self.pos += 1;
                    Bang
                }
            }
            '<' => {
                if self.peek_at(1) == Some('=') {
                    self.pos += 2;
                    Lte
                } else {
                    self.pos += 1;
                    Lt
                }
            }
            '>' => {
                if self.peek_at(1) == Some('=') {
                    self.pos += 2;
                    Gte
                } else {
                    self.pos += 1;
                    Gt
                }
            }
            '&' if self.peek_at(1) == Some('&') => { self.pos += 2; AndAnd }
            '|' if self.peek_at(1) == Some('|') => { self.pos += 2; OrOr }
            '?' => { self.pos += 1; Question }
            _ => { self.pos += 1; Identifier(c.to_string()) }
        }
    }

    fn scan_ident_text(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn scan_string(&mut self) -> TokenKind {
        self.pos += 1; // opening quote
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c == '"' {
                self.pos += 1;
                break;
            }
            if c == '\\' {
                self.pos += 1;
                if let Some(escaped) = self.bump() {
                    s.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                }
                continue;
            }
            s.push(c);
            self.pos += 1;
        }
        TokenKind::StringLiteral(s)
    }

    fn looks_like_path_start(&self) -> bool {
        self.peek() == Some('/')
    }

    /// `./dep.ix` and `../dep.ix` are relative inclusion/import paths
    /// (spec.md §4.4, §8 scenario 5); `..` alone, `...` (pattern
    /// extension) and a bare `.member` access must still lex as the
    /// ordinary dot tokens.
    fn looks_like_relative_path_start(&self) -> bool {
        match (self.peek_at(1), self.peek_at(2)) {
            (Some('/'), _) => true,
            (Some('.'), Some('/')) => true,
            _ => false,
        }
    }

    fn scan_path_literal(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if !c.is_whitespace() && c != ',' && c != ')' && c != '}') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if text.contains('*') {
            TokenKind::PathPatternLiteral(text)
        } else {
            TokenKind::PathLiteral(text)
        }
    }

    fn looks_like_scheme_start(&self) -> bool {
        // `https://`, `https://**`, `ws://`, etc.
        let save = self.pos;
        let mut p = save;
        while matches!(self.chars.get(p), Some(c) if c.is_alphanumeric()) {
            p += 1;
        }
        p > save && self.chars.get(p) == Some(&':') && self.chars.get(p + 1) == Some(&'/') && self.chars.get(p + 2) == Some(&'/')
    }

    fn scan_scheme_like_literal(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if !c.is_whitespace() && c != ',' && c != ')' && c != '}') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let authority_and_path = text.splitn(2, "://").nth(1).unwrap_or("");
        let has_path = authority_and_path.contains('/');
        let has_glob = text.contains('*');
        if !has_path && !text.ends_with("://") {
            if has_glob {
                TokenKind::HostPatternLiteral(text)
            } else {
                TokenKind::HostLiteral(text)
            }
        } else if has_glob {
            TokenKind::URLPatternLiteral(text)
        } else {
            TokenKind::URLLiteral(text)
        }
    }

    fn scan_digit_run(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn scan_unit_run(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_alphabetic() || c == '%') {
            self.pos += 1;
        }
    }

    /// A plain number, or a quantity/rate literal: one or more
    /// contiguous (digits, unit) groups (`1h30mn`, `1s1h`, `2x`) with an
    /// optional `/<unit>` rate divisor (`10x/s`). Multi-part grouping
    /// happens here, at the lexer, so the checker sees the whole
    /// sequence as a single literal to validate (spec.md §4.4).
    fn scan_number_or_quantity(&mut self) -> TokenKind {
        let start = self.pos;
        self.scan_digit_run();
        let mut is_float = false;
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            self.scan_digit_run();
        }
        let has_unit_suffix = matches!(self.peek(), Some(c) if c.is_ascii_alphabetic() || c == '%');
        if !has_unit_suffix {
            let text: String = self.chars[start..self.pos].iter().collect();
            return if is_float {
                TokenKind::FloatLiteral(text.parse().unwrap_or(0.0))
            } else {
                TokenKind::IntLiteral(text.parse().unwrap_or(0))
            };
        }
        self.scan_unit_run();
        loop {
            if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                let save = self.pos;
                self.scan_digit_run();
                if matches!(self.peek(), Some(c) if c.is_ascii_alphabetic() || c == '%') {
                    self.scan_unit_run();
                    continue;
                }
                self.pos = save;
                break;
            }
            break;
        }
        if self.peek() == Some('/') && matches!(self.peek_at(1), Some(c) if c.is_ascii_alphabetic()) {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        TokenKind::QuantityOrRate(text)
    }
}

/// Convenience entry point returning a token stream for `src`.
pub fn lex(src: &str) -> Vec<Token> {
    Lexer::new(src).tokenize()
}
