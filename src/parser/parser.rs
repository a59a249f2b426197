//! Token-stream to AST conversion.

use std::fmt;

use crate::ast::*;
use super::lexer::{lex, Token, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parse a complete module source text into a `Chunk` plus any errors
/// recovered from (spec.md §4.6: "parse errors ... are surfaced but do
/// not stop loading").
pub fn parse(src: &str) -> (Chunk, Vec<ParseError>) {
    let tokens = lex(src);
    let mut parser = Parser::new(tokens);
    let chunk = parser.parse_chunk();
    (chunk, parser.errors)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_id: NodeId,
    pub errors: Vec<ParseError>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0, next_id: 0, errors: Vec::new() }
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn cur_span_start(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].start
    }

    fn prev_span_end(&self) -> usize {
        if self.pos == 0 { 0 } else { self.tokens[self.pos - 1].end }
    }

    fn bump(&mut self) -> TokenKind {
        let k = self.tokens[self.pos.min(self.tokens.len() - 1)].kind.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        k
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), TokenKind::Newline | TokenKind::Semicolon) {
            self.bump();
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(ParseError { message: message.into(), position: self.cur_span_start() });
    }

    fn expect(&mut self, kind: &TokenKind) {
        if std::mem::discriminant(self.peek()) == std::mem::discriminant(kind) {
            self.bump();
        } else {
            self.error(format!("expected {kind:?}, found {:?}", self.peek()));
        }
    }

    fn at(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    /// True if the tokens starting at the cursor form a (possibly
    /// kebab-cased, e.g. `host-resolution:`) object key: one or more
    /// `Identifier`s joined by `Minus` with no surrounding whitespace in
    /// the source, followed by `Colon`. Manifest section names use
    /// hyphens (`expected-schema-update`, `char-name`, …); the lexer
    /// tokenizes `-` as `Minus` generically, so the parser resolves the
    /// ambiguity with subtraction expressions at this single call site.
    fn looks_like_object_key(&self) -> bool {
        let mut offset = 1;
        loop {
            if matches!(self.peek_at(offset), TokenKind::Minus) && matches!(self.peek_at(offset + 1), TokenKind::Identifier(_)) {
                offset += 2;
                continue;
            }
            break;
        }
        matches!(self.peek_at(offset), TokenKind::Colon)
    }

    /// Consumes the key tokens validated by [`Self::looks_like_object_key`]
    /// and joins them with `-`. Does not consume the trailing `Colon`.
    fn eat_object_key(&mut self) -> String {
        let mut key = self.eat_ident();
        while matches!(self.peek(), TokenKind::Minus) && matches!(self.peek_at(1), TokenKind::Identifier(_)) {
            self.bump();
            key.push('-');
            key.push_str(&self.eat_ident());
        }
        key
    }

    fn eat_ident(&mut self) -> String {
        match self.bump() {
            TokenKind::Identifier(s) => s,
            other => {
                self.error(format!("expected identifier, found {other:?}"));
                String::new()
            }
        }
    }

    pub fn parse_chunk(&mut self) -> Chunk {
        let id = self.fresh_id();
        let start = self.cur_span_start();
        let mut statements = Vec::new();
        self.skip_newlines();
        while !matches!(self.peek(), TokenKind::Eof) {
            statements.push(self.parse_statement());
            self.skip_newlines();
        }
        Chunk { id, span: Span::new(start, self.prev_span_end()), statements }
    }

    fn parse_block(&mut self) -> Block {
        let id = self.fresh_id();
        let start = self.cur_span_start();
        self.expect(&TokenKind::LBrace);
        self.skip_newlines();
        let mut statements = Vec::new();
        while !self.at(&TokenKind::RBrace) && !matches!(self.peek(), TokenKind::Eof) {
            statements.push(self.parse_statement());
            self.skip_newlines();
        }
        self.expect(&TokenKind::RBrace);
        Block { id, span: Span::new(start, self.prev_span_end()), statements }
    }

    fn node<T>(&mut self, start: usize, kind: T) -> Node<T> {
        let id = self.fresh_id();
        Node::new(id, Span::new(start, self.prev_span_end()), kind)
    }

    fn parse_statement(&mut self) -> Stmt {
        let start = self.cur_span_start();
        let kind = match self.peek().clone() {
            TokenKind::KwFn => {
                self.bump();
                StmtKind::FunctionDeclaration(self.parse_function_rest(start, false))
            }
            TokenKind::KwReturn => {
                self.bump();
                let value = if self.can_start_expr() { Some(Box::new(self.parse_expr())) } else { None };
                StmtKind::Return(value)
            }
            TokenKind::KwYield => {
                self.bump();
                let value = if self.can_start_expr() { Some(Box::new(self.parse_expr())) } else { None };
                StmtKind::Yield(value)
            }
            TokenKind::KwBreak => { self.bump(); StmtKind::Break(None) }
            TokenKind::KwContinue => { self.bump(); StmtKind::Continue(None) }
            TokenKind::KwPrune => { self.bump(); StmtKind::Prune }
            TokenKind::KwAssert => {
                self.bump();
                StmtKind::Assert(Box::new(self.parse_expr()))
            }
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwSwitch => self.parse_switch(),
            TokenKind::KwMatch => self.parse_match(),
            TokenKind::KwFor => self.parse_for(),
            TokenKind::KwWalk => self.parse_walk(),
            TokenKind::KwImport => self.parse_import(),
            TokenKind::KwExtend => self.parse_extend(),
            TokenKind::KwStruct => self.parse_struct(),
            TokenKind::KwTestsuite => self.parse_testsuite(),
            TokenKind::KwTestcase => self.parse_testcase(),
            TokenKind::KwPreinit => {
                self.bump();
                StmtKind::PreinitStatement(self.parse_block())
            }
            TokenKind::KwManifest => {
                self.bump();
                StmtKind::ManifestStatement(Box::new(self.parse_object_literal(start)))
            }
            TokenKind::PatternIdentifier(name) => {
                self.bump();
                if matches!(self.peek(), TokenKind::Dot) && matches!(self.peek_at(1), TokenKind::LBrace) {
                    self.bump();
                    self.bump();
                    let members = self.parse_pattern_namespace_members();
                    StmtKind::PatternNamespaceDefinition { name, members }
                } else {
                    self.expect(&TokenKind::Assign);
                    let right = Box::new(self.parse_expr());
                    StmtKind::PatternDefinition { name, right }
                }
            }
            TokenKind::HostAliasIdentifier(name) => {
                self.bump();
                self.expect(&TokenKind::Assign);
                let value = Box::new(self.parse_expr());
                StmtKind::HostAliasDefinition { name, value }
            }
            TokenKind::GlobalIdentifier(name) => {
                self.bump();
                let is_const = if self.at(&TokenKind::KwConst) { self.bump(); true } else { false };
                self.expect(&TokenKind::Assign);
                let value = Box::new(self.parse_expr());
                StmtKind::GlobalVarAssignment { name, value, is_const }
            }
            TokenKind::Identifier(name)
                if matches!(self.peek_at(1), TokenKind::Assign) =>
            {
                self.bump();
                self.bump();
                let value = Box::new(self.parse_expr());
                StmtKind::LocalVarDeclaration { name, value }
            }
            _ => StmtKind::Expr(Box::new(self.parse_expr())),
        };
        self.node(start, kind)
    }

    fn can_start_expr(&self) -> bool {
        !matches!(self.peek(), TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof)
    }

    fn parse_pattern_namespace_members(&mut self) -> Vec<(String, Box<Expr>)> {
        self.skip_newlines();
        let mut members = Vec::new();
        while !self.at(&TokenKind::RBrace) && !matches!(self.peek(), TokenKind::Eof) {
            let name = self.eat_ident();
            self.expect(&TokenKind::Colon);
            let value = Box::new(self.parse_expr());
            members.push((name, value));
            if self.at(&TokenKind::Comma) {
                self.bump();
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RBrace);
        members
    }

    fn parse_if(&mut self) -> StmtKind {
        self.bump();
        let test = Box::new(self.parse_expr());
        let consequent = self.parse_block();
        let alternate = if self.at(&TokenKind::KwElse) {
            self.bump();
            if self.at(&TokenKind::KwIf) {
                Some(ElseBranch::ElseIf(Box::new(self.parse_statement())))
            } else {
                Some(ElseBranch::Else(self.parse_block()))
            }
        } else {
            None
        };
        StmtKind::If { test, consequent, alternate }
    }

    fn parse_switch(&mut self) -> StmtKind {
        self.bump();
        let discriminant = Box::new(self.parse_expr());
        self.expect(&TokenKind::LBrace);
        self.skip_newlines();
        let mut cases = Vec::new();
        let mut default = None;
        while !self.at(&TokenKind::RBrace) && !matches!(self.peek(), TokenKind::Eof) {
            if self.at(&TokenKind::KwDefault) {
                self.bump();
                self.expect(&TokenKind::Colon);
                default = Some(self.parse_block());
            } else {
                self.expect(&TokenKind::KwCase);
                let mut values = vec![self.parse_expr()];
                while self.at(&TokenKind::Comma) {
                    self.bump();
                    values.push(self.parse_expr());
                }
                self.expect(&TokenKind::Colon);
                cases.push(SwitchCase { values, body: self.parse_block() });
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RBrace);
        StmtKind::Switch { discriminant, cases, default }
    }

    fn parse_match(&mut self) -> StmtKind {
        self.bump();
        let discriminant = Box::new(self.parse_expr());
        self.expect(&TokenKind::LBrace);
        self.skip_newlines();
        let mut cases = Vec::new();
        let mut default = None;
        while !self.at(&TokenKind::RBrace) && !matches!(self.peek(), TokenKind::Eof) {
            if self.at(&TokenKind::KwDefault) {
                self.bump();
                self.expect(&TokenKind::Colon);
                default = Some(self.parse_block());
            } else {
                let pattern = Box::new(self.parse_expr());
                let group_var = if self.at(&TokenKind::KwAssert) {
                    None
                } else if let TokenKind::Identifier(_) = self.peek() {
                    Some(self.eat_ident())
                } else {
                    None
                };
                self.expect(&TokenKind::Colon);
                cases.push(MatchCase { pattern, group_var, body: self.parse_block() });
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RBrace);
        StmtKind::Match { discriminant, cases, default }
    }

    fn parse_for(&mut self) -> StmtKind {
        self.bump();
        let first = self.eat_ident();
        let key_var = if self.at(&TokenKind::Comma) {
            self.bump();
            Some(first.clone())
        } else {
            None
        };
        let value_var = if key_var.is_some() { self.eat_ident() } else { first };
        self.expect(&TokenKind::KwIn);
        let iterable = Box::new(self.parse_expr());
        let body = self.parse_block();
        StmtKind::For { head: ForHead::Range { key_var, value_var, iterable }, body }
    }

    fn parse_walk(&mut self) -> StmtKind {
        self.bump();
        let walked = Box::new(self.parse_expr());
        let entry_var = self.eat_ident();
        let key_var = if self.at(&TokenKind::Comma) {
            self.bump();
            Some(self.eat_ident())
        } else {
            None
        };
        let body = self.parse_block();
        StmtKind::Walk { walked, entry_var, key_var, body }
    }

    fn parse_import(&mut self) -> StmtKind {
        self.bump();
        // `import ./dep.ix` (inclusion) vs `import name ./dep.ix {...}` (module import)
        if let TokenKind::PathLiteral(path) = self.peek().clone() {
            self.bump();
            return StmtKind::InclusionImportStatement { path };
        }
        let name = self.eat_ident();
        let source = match self.bump() {
            TokenKind::PathLiteral(p) | TokenKind::URLLiteral(p) => p,
            other => {
                self.error(format!("expected module source, found {other:?}"));
                String::new()
            }
        };
        let arguments = if self.at(&TokenKind::LBrace) {
            let start = self.cur_span_start();
            Some(Box::new(self.parse_object_literal(start)))
        } else {
            None
        };
        StmtKind::ImportStatement { name, source, arguments }
    }

    fn parse_extend(&mut self) -> StmtKind {
        self.bump();
        let pattern = Box::new(self.parse_expr());
        let start = self.cur_span_start();
        let object = Box::new(self.parse_object_literal(start));
        StmtKind::ExtendStatement { pattern, object }
    }

    fn parse_struct(&mut self) -> StmtKind {
        self.bump();
        let name = self.eat_ident();
        self.expect(&TokenKind::LBrace);
        self.skip_newlines();
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while !self.at(&TokenKind::RBrace) && !matches!(self.peek(), TokenKind::Eof) {
            if self.at(&TokenKind::KwFn) {
                let fn_start = self.cur_span_start();
                self.bump();
                methods.push(self.parse_function_rest(fn_start, true));
            } else {
                let field_name = self.eat_ident();
                let type_annotation = if self.at(&TokenKind::Colon) {
                    self.bump();
                    Some(self.parse_type_annotation())
                } else {
                    None
                };
                fields.push(StructField { name: field_name, type_annotation });
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RBrace);
        StmtKind::StructDefinition { name, fields, methods }
    }

    fn parse_type_annotation(&mut self) -> TypeAnnotation {
        let pointer = if self.at(&TokenKind::Star) { self.bump(); true } else { false };
        let name = self.eat_ident();
        TypeAnnotation { pointer, name }
    }

    fn parse_testsuite(&mut self) -> StmtKind {
        self.bump();
        let name = if let TokenKind::StringLiteral(_) = self.peek() {
            Some(Box::new(self.parse_primary()))
        } else {
            None
        };
        let meta = if self.at(&TokenKind::LParen) {
            self.bump();
            let start = self.cur_span_start();
            let m = Some(Box::new(self.parse_object_literal(start)));
            self.expect(&TokenKind::RParen);
            m
        } else {
            None
        };
        StmtKind::TestSuiteStatement { name, meta, body: self.parse_block() }
    }

    fn parse_testcase(&mut self) -> StmtKind {
        self.bump();
        let name = if let TokenKind::StringLiteral(_) = self.peek() {
            Some(Box::new(self.parse_primary()))
        } else {
            None
        };
        let meta = if self.at(&TokenKind::LParen) {
            self.bump();
            let start = self.cur_span_start();
            let m = Some(Box::new(self.parse_object_literal(start)));
            self.expect(&TokenKind::RParen);
            m
        } else {
            None
        };
        StmtKind::TestCaseStatement { name, meta, body: self.parse_block() }
    }

    fn parse_function_rest(&mut self, start: usize, is_method: bool) -> FunctionExpr {
        let name = if let TokenKind::Identifier(_) = self.peek() { Some(self.eat_ident()) } else { None };
        let captured_vars = if self.at(&TokenKind::LBracket) {
            self.bump();
            let mut names = Vec::new();
            while !self.at(&TokenKind::RBracket) {
                names.push(self.eat_ident());
                if self.at(&TokenKind::Comma) {
                    self.bump();
                }
            }
            self.expect(&TokenKind::RBracket);
            names
        } else {
            Vec::new()
        };
        self.expect(&TokenKind::LParen);
        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            let pname = self.eat_ident();
            let pattern = if self.at(&TokenKind::Colon) {
                self.bump();
                Some(Box::new(self.parse_expr()))
            } else {
                None
            };
            params.push(Param { name: pname, pattern });
            if self.at(&TokenKind::Comma) {
                self.bump();
            }
        }
        self.expect(&TokenKind::RParen);
        let return_type = if self.at(&TokenKind::Colon) {
            self.bump();
            Some(self.parse_type_annotation())
        } else {
            None
        };
        let body = self.parse_block();
        let id = self.fresh_id();
        FunctionExpr {
            id,
            span: Span::new(start, self.prev_span_end()),
            name,
            params,
            captured_vars,
            body,
            is_method,
            return_type,
        }
    }

    // -------------------------------------------------------------
    // Expressions
    // -------------------------------------------------------------

    fn parse_expr(&mut self) -> Expr {
        self.parse_binary(0)
    }

    fn binding_power(op: &TokenKind) -> Option<(u8, BinaryOp)> {
        use TokenKind::*;
        Some(match op {
            OrOr => (1, BinaryOp::Or),
            AndAnd => (2, BinaryOp::And),
            EqEq => (3, BinaryOp::Eq),
            NotEq => (3, BinaryOp::Neq),
            Lt => (4, BinaryOp::Lt),
            Lte => (4, BinaryOp::Lte),
            Gt => (4, BinaryOp::Gt),
            Gte => (4, BinaryOp::Gte),
            DotDot => (5, BinaryOp::Range),
            DotDotDot => (5, BinaryOp::ExclusiveRange),
            Plus => (6, BinaryOp::Add),
            Minus => (6, BinaryOp::Sub),
            Star => (7, BinaryOp::Mul),
            Slash => (7, BinaryOp::Div),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_bp: u8) -> Expr {
        let start = self.cur_span_start();
        let mut lhs = self.parse_unary();
        loop {
            let Some((bp, op)) = Self::binding_power(self.peek()) else { break };
            if bp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.parse_binary(bp + 1);
            lhs = self.node(start, ExprKind::BinaryExpression { op, left: Box::new(lhs), right: Box::new(rhs) });
        }
        lhs
    }

    fn parse_unary(&mut self) -> Expr {
        let start = self.cur_span_start();
        match self.peek() {
            TokenKind::Bang => {
                self.bump();
                let operand = Box::new(self.parse_unary());
                self.node(start, ExprKind::UnaryExpression { op: UnaryOp::Not, operand })
            }
            TokenKind::Minus => {
                self.bump();
                let operand = Box::new(self.parse_unary());
                self.node(start, ExprKind::UnaryExpression { op: UnaryOp::Neg, operand })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Expr {
        let start = self.cur_span_start();
        let mut expr = self.parse_primary();
        loop {
            match self.peek().clone() {
                TokenKind::Dot => {
                    self.bump();
                    let optional = false;
                    let property = self.eat_ident();
                    expr = self.node(start, ExprKind::MemberExpression { object: Box::new(expr), property, optional });
                }
                TokenKind::LParen => {
                    self.bump();
                    let mut args = Vec::new();
                    while !self.at(&TokenKind::RParen) {
                        args.push(self.parse_expr());
                        if self.at(&TokenKind::Comma) {
                            self.bump();
                        }
                    }
                    self.expect(&TokenKind::RParen);
                    expr = self.node(start, ExprKind::CallExpression { callee: Box::new(expr), arguments: args });
                }
                TokenKind::LBracket => {
                    self.bump();
                    let index = self.parse_expr();
                    if self.at(&TokenKind::Colon) {
                        self.bump();
                        let end = if self.at(&TokenKind::RBracket) { None } else { Some(Box::new(self.parse_expr())) };
                        self.expect(&TokenKind::RBracket);
                        expr = self.node(start, ExprKind::SliceExpression { object: Box::new(expr), start: Some(Box::new(index)), end });
                    } else {
                        self.expect(&TokenKind::RBracket);
                        expr = self.node(start, ExprKind::IndexExpression { object: Box::new(expr), index: Box::new(index) });
                    }
                }
                _ => break,
            }
        }
        expr
    }

    fn parse_primary(&mut self) -> Expr {
        let start = self.cur_span_start();
        let kind = match self.bump() {
            TokenKind::IntLiteral(v) => ExprKind::IntLiteral(v),
            TokenKind::FloatLiteral(v) => ExprKind::FloatLiteral(v),
            TokenKind::StringLiteral(v) => ExprKind::StringLiteral(v),
            TokenKind::BooleanLiteral(v) => ExprKind::BooleanLiteral(v),
            TokenKind::NilLiteral => ExprKind::NilLiteral,
            TokenKind::PathLiteral(v) => ExprKind::PathLiteral(v),
            TokenKind::PathPatternLiteral(v) => ExprKind::PathPatternLiteral(v),
            TokenKind::URLLiteral(v) => ExprKind::URLLiteral(v),
            TokenKind::URLPatternLiteral(v) => ExprKind::URLPatternLiteral(v),
            TokenKind::HostLiteral(v) => ExprKind::HostLiteral(v),
            TokenKind::HostPatternLiteral(v) => ExprKind::HostPatternLiteral(v),
            TokenKind::SchemeLiteral(v) => ExprKind::SchemeLiteral(v),
            TokenKind::QuantityOrRate(text) => self.parse_quantity_or_rate(&text),
            TokenKind::KwSelf => ExprKind::SelfExpr,
            TokenKind::KwSendval => ExprKind::SendValExpr,
            TokenKind::KwCompute => {
                let inner = Box::new(self.parse_expr());
                ExprKind::ComputeExpression(inner)
            }
            TokenKind::PatternIdentifier(name) => {
                if self.at(&TokenKind::Dot) {
                    self.bump();
                    let member = self.eat_ident();
                    ExprKind::PatternNamespaceMemberExpr { namespace: name, member }
                } else {
                    ExprKind::PatternIdentifierLiteral(name)
                }
            }
            TokenKind::GlobalIdentifier(name) => ExprKind::GlobalIdentifier(name),
            TokenKind::Dot if self.at(&TokenKind::LBrace) => {
                return self.parse_object_pattern_literal(start);
            }
            TokenKind::DotDotDot => {
                let spread = Box::new(self.parse_primary());
                self.expect(&TokenKind::Dot);
                self.expect(&TokenKind::LBrace);
                let mut keys = Vec::new();
                while !self.at(&TokenKind::RBrace) {
                    keys.push(self.eat_ident());
                    if self.at(&TokenKind::Comma) {
                        self.bump();
                    }
                }
                self.expect(&TokenKind::RBrace);
                ExprKind::ExtractionExpression { spread, keys }
            }
            TokenKind::KwMapping => {
                self.expect(&TokenKind::LBrace);
                self.skip_newlines();
                let mut entries = Vec::new();
                while !self.at(&TokenKind::RBrace) && !matches!(self.peek(), TokenKind::Eof) {
                    entries.push(self.parse_mapping_entry());
                    if self.at(&TokenKind::Comma) {
                        self.bump();
                    }
                    self.skip_newlines();
                }
                self.expect(&TokenKind::RBrace);
                ExprKind::MappingExpression(entries)
            }
            TokenKind::KwFn => {
                let f = self.parse_function_rest(start, false);
                ExprKind::FunctionExpression(f)
            }
            TokenKind::KwGo => {
                let meta = if self.at(&TokenKind::LBrace) {
                    let mstart = self.cur_span_start();
                    Some(Box::new(self.parse_object_literal(mstart)))
                } else {
                    None
                };
                self.expect(&TokenKind::KwDo);
                let module = self.parse_block();
                ExprKind::SpawnExpression { meta, module }
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while !self.at(&TokenKind::RBracket) {
                    items.push(self.parse_expr());
                    if self.at(&TokenKind::Comma) {
                        self.bump();
                    }
                }
                self.expect(&TokenKind::RBracket);
                ExprKind::ListLiteral(items)
            }
            TokenKind::LBrace => {
                self.pos -= 1; // unread, reuse object-literal parser
                return self.parse_object_literal(start);
            }
            TokenKind::LParen => {
                let inner = self.parse_expr();
                self.expect(&TokenKind::RParen);
                return inner;
            }
            TokenKind::Identifier(name) => ExprKind::Identifier(name),
            other => {
                self.error(format!("unexpected token {other:?}"));
                ExprKind::NilLiteral
            }
        };
        self.node(start, kind)
    }

    fn parse_mapping_entry(&mut self) -> MappingEntry {
        // Dynamic: `%pattern keyVar[, groupVar] => value`
        if let TokenKind::PatternIdentifier(_) = self.peek() {
            let key_pattern = Box::new(self.parse_primary());
            if let TokenKind::Identifier(_) = self.peek() {
                let key_var = self.eat_ident();
                let group_var = if self.at(&TokenKind::Comma) {
                    self.bump();
                    Some(self.eat_ident())
                } else {
                    None
                };
                self.expect(&TokenKind::Arrow);
                let value = Box::new(self.parse_expr());
                return MappingEntry::Dynamic { key_pattern, key_var, group_var, value };
            }
            self.expect(&TokenKind::Colon);
            let value = Box::new(self.parse_expr());
            return MappingEntry::Static { key: key_pattern, value };
        }
        let key = Box::new(self.parse_expr());
        self.expect(&TokenKind::Colon);
        let value = Box::new(self.parse_expr());
        MappingEntry::Static { key, value }
    }

    fn parse_object_literal(&mut self, start: usize) -> Expr {
        self.expect(&TokenKind::LBrace);
        self.skip_newlines();
        let mut obj = ObjectLiteral::default();
        let mut implicit_index = 0u32;
        while !self.at(&TokenKind::RBrace) && !matches!(self.peek(), TokenKind::Eof) {
            if self.at(&TokenKind::DotDotDot) {
                self.bump();
                obj.spread_elements.push(self.parse_expr());
            } else if let TokenKind::StringLiteral(meta_name) = self.peek().clone() {
                if matches!(self.peek_at(1), TokenKind::Colon) && (meta_name == "_url_" || meta_name == "_visibility_") {
                    self.bump();
                    self.bump();
                    let pstart = self.cur_span_start();
                    let value = Box::new(self.parse_expr());
                    obj.meta_properties.push(MetaProperty { name: meta_name, value, span: Span::new(pstart, self.prev_span_end()) });
                } else {
                    let pstart = self.cur_span_start();
                    let value = Box::new(self.parse_expr());
                    obj.properties.push(ObjectProperty {
                        key: PropertyKey::Implicit(implicit_index),
                        key_name: implicit_index.to_string(),
                        value,
                        span: Span::new(pstart, self.prev_span_end()),
                    });
                    implicit_index += 1;
                }
            } else if matches!(self.peek(), TokenKind::Identifier(_)) && self.looks_like_object_key() {
                let pstart = self.cur_span_start();
                let key_name = self.eat_object_key();
                self.bump(); // colon
                let value = Box::new(self.parse_expr());
                obj.properties.push(ObjectProperty {
                    key: PropertyKey::Explicit,
                    key_name,
                    value,
                    span: Span::new(pstart, self.prev_span_end()),
                });
            } else {
                let pstart = self.cur_span_start();
                let value = Box::new(self.parse_expr());
                obj.properties.push(ObjectProperty {
                    key: PropertyKey::Implicit(implicit_index),
                    key_name: implicit_index.to_string(),
                    value,
                    span: Span::new(pstart, self.prev_span_end()),
                });
                implicit_index += 1;
            }
            if self.at(&TokenKind::Comma) {
                self.bump();
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RBrace);
        self.node(start, ExprKind::ObjectLiteral(obj))
    }

    /// Parses a `.{...}` object pattern literal: a key-list
    /// (`.{a, b}`, each entry's value is an identifier reference to a
    /// same-named binding — used by the spawn `globals:` key-list form,
    /// spec.md §4.4 "Spawn (lthread) expressions") or an exact/partial
    /// object pattern (`.{name: %str, otherprops(no)}`).
    /// Called with the leading `.` already consumed by the caller.
    fn parse_object_pattern_literal(&mut self, start: usize) -> Expr {
        self.expect(&TokenKind::LBrace);
        self.skip_newlines();
        let mut pat = ObjectPatternLiteral::default();
        while !self.at(&TokenKind::RBrace) && !matches!(self.peek(), TokenKind::Eof) {
            if matches!(self.peek(), TokenKind::Identifier(ref n) if n == "otherprops") && matches!(self.peek_at(1), TokenKind::LParen) {
                self.bump();
                self.bump();
                let arg = self.eat_ident();
                self.expect(&TokenKind::RParen);
                pat.exact = true;
                pat.other_props = Some(if arg == "no" {
                    OtherPropsConstraint::No
                } else {
                    self.error(format!("exact object patterns only allow otherprops(no), found otherprops({arg})"));
                    OtherPropsConstraint::No
                });
            } else if matches!(self.peek(), TokenKind::Identifier(_)) && matches!(self.peek_at(1), TokenKind::Colon) {
                let pstart = self.cur_span_start();
                let key_name = self.eat_ident();
                self.bump(); // colon
                let value = Box::new(self.parse_expr());
                pat.properties.push(ObjectProperty {
                    key: PropertyKey::Explicit,
                    key_name,
                    value,
                    span: Span::new(pstart, self.prev_span_end()),
                });
            } else {
                // bare key-list entry, e.g. `.{g}` — the value is a
                // reference to the same-named binding.
                let pstart = self.cur_span_start();
                let key_name = self.eat_ident();
                let value = Box::new(self.node(pstart, ExprKind::Identifier(key_name.clone())));
                pat.properties.push(ObjectProperty {
                    key: PropertyKey::Explicit,
                    key_name,
                    value,
                    span: Span::new(pstart, self.prev_span_end()),
                });
            }
            if self.at(&TokenKind::Comma) {
                self.bump();
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RBrace);
        self.node(start, ExprKind::ObjectPatternLiteral(pat))
    }

    /// Parse `1h30mn`, `2x`, `50%`, `10x/s` style tokens into a
    /// quantity or rate literal (spec.md §4.4).
    fn parse_quantity_or_rate(&mut self, text: &str) -> ExprKind {
        let (qty_text, divisor_unit) = match text.split_once('/') {
            Some((q, d)) => (q, Some(d.to_string())),
            None => (text, None),
        };
        let parts = scan_quantity_parts(qty_text);
        let quantity_span_start = self.cur_span_start();
        let quantity = self.node(quantity_span_start, ExprKind::QuantityLiteral(parts));
        match divisor_unit {
            Some(divisor_unit) => ExprKind::RateLiteral { quantity: Box::new(quantity), divisor_unit },
            None => quantity.kind,
        }
    }
}

fn scan_quantity_parts(text: &str) -> Vec<QuantityPart> {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    let mut parts = Vec::new();
    while i < chars.len() {
        let start = i;
        while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
            i += 1;
        }
        if i == start {
            break;
        }
        let value: f64 = chars[start..i].iter().collect::<String>().parse().unwrap_or(0.0);
        let unit_start = i;
        while i < chars.len() && chars[i].is_alphabetic() {
            i += 1;
        }
        if i < chars.len() && chars[i] == '%' {
            i += 1;
        }
        let unit_text: String = chars[unit_start..i].iter().collect();
        let unit = match unit_text.as_str() {
            "h" => QuantityUnit::Hour,
            "mn" => QuantityUnit::Minute,
            "s" => QuantityUnit::Second,
            "ms" => QuantityUnit::Millisecond,
            "us" => QuantityUnit::Microsecond,
            "ns" => QuantityUnit::Nanosecond,
            "x" => QuantityUnit::Count,
            "ln" => QuantityUnit::LineCount,
            "rn" => QuantityUnit::RuneCount,
            "B" => QuantityUnit::Byte,
            "%" => QuantityUnit::Percent,
            _ => QuantityUnit::Count,
        };
        parts.push(QuantityPart { value, unit });
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_assignment() {
        let (chunk, errors) = parse("$$a = 1");
        assert!(errors.is_empty());
        assert_eq!(chunk.statements.len(), 1);
        assert!(matches!(chunk.statements[0].kind, StmtKind::GlobalVarAssignment { .. }));
    }

    #[test]
    fn parses_function_declaration() {
        let (chunk, errors) = parse("fn f(){ return 1 }");
        assert!(errors.is_empty());
        assert!(matches!(chunk.statements[0].kind, StmtKind::FunctionDeclaration(_)));
    }

    #[test]
    fn parses_quantity_literal() {
        let (chunk, errors) = parse("x = 1h30mn");
        assert!(errors.is_empty());
        if let StmtKind::LocalVarDeclaration { value, .. } = &chunk.statements[0].kind {
            assert!(matches!(value.kind, ExprKind::QuantityLiteral(_)));
        } else {
            panic!("expected local var declaration");
        }
    }

    #[test]
    fn parses_rate_literal() {
        let (chunk, errors) = parse("x = 1x/s");
        assert!(errors.is_empty());
        if let StmtKind::LocalVarDeclaration { value, .. } = &chunk.statements[0].kind {
            assert!(matches!(value.kind, ExprKind::RateLiteral { .. }));
        } else {
            panic!("expected local var declaration");
        }
    }

    #[test]
    fn parses_inclusion_import() {
        let (chunk, errors) = parse("import /dep.ix");
        assert!(errors.is_empty());
        assert!(matches!(chunk.statements[0].kind, StmtKind::InclusionImportStatement { .. }));
    }

    #[test]
    fn parses_relative_inclusion_import() {
        let (chunk, errors) = parse("import ./dep.ix");
        assert!(errors.is_empty());
        assert!(matches!(&chunk.statements[0].kind, StmtKind::InclusionImportStatement { path } if path == "./dep.ix"));
    }

    #[test]
    fn parses_relative_module_import() {
        let (chunk, errors) = parse("import res ./dep.ix {}");
        assert!(errors.is_empty());
        if let StmtKind::ImportStatement { name, source, .. } = &chunk.statements[0].kind {
            assert_eq!(name, "res");
            assert_eq!(source, "./dep.ix");
        } else {
            panic!("expected ImportStatement");
        }
    }

    #[test]
    fn exclusive_range_dots_are_not_mistaken_for_a_path() {
        let (chunk, errors) = parse("x = a...b\n");
        assert!(errors.is_empty());
        if let StmtKind::LocalVarDeclaration { value, .. } = &chunk.statements[0].kind {
            assert!(matches!(value.kind, ExprKind::BinaryExpression { op: BinaryOp::ExclusiveRange, .. }));
        } else {
            panic!("expected local var declaration");
        }
    }

    #[test]
    fn parses_nested_fn_decl_as_separate_statement() {
        let (chunk, errors) = parse("fn f(){ fn g(){} }");
        assert!(errors.is_empty());
        if let StmtKind::FunctionDeclaration(f) = &chunk.statements[0].kind {
            assert_eq!(f.body.statements.len(), 1);
            assert!(matches!(f.body.statements[0].kind, StmtKind::FunctionDeclaration(_)));
        } else {
            panic!("expected function declaration");
        }
    }
}
