//! Parsed Chunk Source (C1).
//!
//! Immutable {AST root, source name, rune buffer, cached line index}.
//! Lazily builds a rune buffer and line-start index once, then answers
//! positional queries against it in a single pass (spec.md §4.1).

use crate::ast::*;
use crate::parser::{parse, ParseError};

/// {name, startLine, startCol, endLine, endCol, span} — spec.md §4.1.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePosition {
    pub name: String,
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
    pub span: Span,
}

/// Any node reachable from the chunk root, erased to what the checker
/// and diagnostics layer need: its span and a human label.
#[derive(Debug, Clone, Copy)]
pub enum AnyNodeRef<'a> {
    Stmt(&'a Stmt),
    Expr(&'a Expr),
}

impl<'a> AnyNodeRef<'a> {
    pub fn span(&self) -> Span {
        match self {
            AnyNodeRef::Stmt(s) => s.span,
            AnyNodeRef::Expr(e) => e.span,
        }
    }
}

/// Immutable source object: AST plus the original text, created once by
/// the parser and read-only thereafter (spec.md §3 "Lifecycle").
pub struct ParsedChunkSource {
    pub name: String,
    pub text: String,
    pub chunk: Chunk,
    pub parse_errors: Vec<ParseError>,
    runes: Vec<char>,
    /// Byte offset of the start of each line (line 1 starts at index 0).
    line_starts: Vec<usize>,
}

impl ParsedChunkSource {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        let name = name.into();
        let text = text.into();
        let (chunk, parse_errors) = parse(&text);
        let runes: Vec<char> = text.chars().collect();
        let line_starts = compute_line_starts(&text);
        Self { name, text, chunk, parse_errors, runes, line_starts }
    }

    pub fn rune_len(&self) -> usize {
        self.runes.len()
    }

    /// 1-based (line, column) for a byte offset, single pass over the
    /// cached line index (spec.md §4.1).
    pub fn span_line_column(&self, offset: usize) -> (usize, usize) {
        self.offset_line_column(offset)
    }

    pub fn end_span_line_column(&self, span: Span) -> (usize, usize) {
        self.offset_line_column(span.end)
    }

    fn offset_line_column(&self, offset: usize) -> (usize, usize) {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts.get(line_idx).copied().unwrap_or(0);
        let line = line_idx + 1;
        let col = offset.saturating_sub(line_start) + 1;
        (line, col)
    }

    pub fn source_position(&self, span: Span) -> SourcePosition {
        let (start_line, start_col) = self.span_line_column(span.start);
        let (end_line, end_col) = self.end_span_line_column(span);
        SourcePosition {
            name: self.name.clone(),
            start_line,
            start_col,
            end_line,
            end_col,
            span,
        }
    }

    /// `nodeAndChainAtSpan(span) -> (deepest-node, ancestor-chain)`
    /// (spec.md §4.1). Walks the whole AST from the chunk root, pruning
    /// any sub-tree whose span does not contain `query`; the returned
    /// node is the deepest whose span contains it. Supports zero-width
    /// queries (`query.start == query.end`); a node whose end equals
    /// the query start is not matched (see [`Span::contains_point`]).
    /// The chain is ordered outermost-first, ending just before the
    /// returned node.
    pub fn node_and_chain_at_span(&self, query: Span) -> Option<(AnyNodeRef<'_>, Vec<AnyNodeRef<'_>>)> {
        block_best(&self.chunk.statements, query)
    }

    /// Convenience form of [`Self::node_and_chain_at_span`] for a single
    /// query point (a zero-width span at `offset`).
    pub fn node_and_chain_at_offset(&self, offset: usize) -> Option<(AnyNodeRef<'_>, Vec<AnyNodeRef<'_>>)> {
        self.node_and_chain_at_span(Span::new(offset, offset))
    }

    /// Find the deepest *statement* whose span contains `offset`
    /// (spec.md §4.1). Built on [`Self::node_and_chain_at_offset`]:
    /// walks the returned chain outward from the deepest node until it
    /// finds a [`AnyNodeRef::Stmt`].
    pub fn statement_at_offset(&self, offset: usize) -> Option<&Stmt> {
        let (deepest, chain) = self.node_and_chain_at_offset(offset)?;
        std::iter::once(deepest).chain(chain.into_iter().rev()).find_map(|node| match node {
            AnyNodeRef::Stmt(s) => Some(s),
            AnyNodeRef::Expr(_) => None,
        })
    }

    /// Locate the first non-space rune on `line` and return the
    /// enclosing top-level statement, requiring its start column to
    /// match the rune's column (spec.md §4.1 "firstStatementOnLine").
    pub fn first_statement_on_line(&self, line: usize) -> Option<&Stmt> {
        let line_start = *self.line_starts.get(line.checked_sub(1)?)?;
        let line_end = self.line_starts.get(line).copied().unwrap_or(self.text.len());
        let mut offset = None;
        for (i, ch) in self.runes[line_start.min(self.runes.len())..line_end.min(self.runes.len())]
            .iter()
            .enumerate()
        {
            if !ch.is_whitespace() {
                offset = Some(line_start + i);
                break;
            }
        }
        let offset = offset?;
        let (_, col) = self.span_line_column(offset);
        self.chunk.statements.iter().find(|stmt| {
            let (start_line, start_col) = self.span_line_column(stmt.span.start);
            start_line == line && start_col == col
        })
    }
}

fn compute_line_starts(text: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// Generic helper usable by the checker: span→location for any `Node<T>`.
pub fn node_position<T>(source: &ParsedChunkSource, node: &Node<T>) -> SourcePosition {
    source.source_position(node.span)
}

// ---------------------------------------------------------------------
// `nodeAndChainAtSpan` traversal
// ---------------------------------------------------------------------
//
// `Block` has no span-bearing node type of its own in `AnyNodeRef` (only
// statements and expressions are reportable nodes, per spec.md §4.1), so
// it is transparent to the chain: descending into a block never pushes
// an entry for the block itself, only for the statement found inside it.

type ChainResult<'a> = Option<(AnyNodeRef<'a>, Vec<AnyNodeRef<'a>>)>;

/// True if `node_span` contains `query`, honoring the zero-width-query
/// and end-exclusion rules spec.md §4.1 assigns to point queries, and
/// requiring full containment for a non-empty query span.
fn span_contains_query(node_span: Span, query: Span) -> bool {
    if query.start == query.end {
        node_span.contains_point(query.start)
    } else {
        node_span.start <= query.start && query.end <= node_span.end
    }
}

fn block_best<'a>(statements: &'a [Stmt], query: Span) -> ChainResult<'a> {
    statements.iter().find_map(|stmt| stmt_chain(stmt, query))
}

fn stmt_chain<'a>(stmt: &'a Stmt, query: Span) -> ChainResult<'a> {
    if !span_contains_query(stmt.span, query) {
        return None;
    }
    if let Some((deepest, mut chain)) = stmt_children_best(stmt, query) {
        chain.insert(0, AnyNodeRef::Stmt(stmt));
        return Some((deepest, chain));
    }
    Some((AnyNodeRef::Stmt(stmt), Vec::new()))
}

fn expr_chain<'a>(expr: &'a Expr, query: Span) -> ChainResult<'a> {
    if !span_contains_query(expr.span, query) {
        return None;
    }
    if let Some((deepest, mut chain)) = expr_children_best(expr, query) {
        chain.insert(0, AnyNodeRef::Expr(expr));
        return Some((deepest, chain));
    }
    Some((AnyNodeRef::Expr(expr), Vec::new()))
}

fn opt_expr_chain<'a>(expr: &'a Option<Box<Expr>>, query: Span) -> ChainResult<'a> {
    expr.as_deref().and_then(|e| expr_chain(e, query))
}

fn function_expr_best<'a>(f: &'a FunctionExpr, query: Span) -> ChainResult<'a> {
    f.params
        .iter()
        .find_map(|p| p.pattern.as_deref().and_then(|pat| expr_chain(pat, query)))
        .or_else(|| block_best(&f.body.statements, query))
}

/// Descend into the sub-statements/expressions/blocks a statement owns,
/// trying each in source order and returning the first that contains
/// `query`.
fn stmt_children_best<'a>(stmt: &'a Stmt, query: Span) -> ChainResult<'a> {
    match &stmt.kind {
        StmtKind::Expr(e) => expr_chain(e, query),
        StmtKind::GlobalVarAssignment { value, .. } => expr_chain(value, query),
        StmtKind::LocalVarDeclaration { value, .. } => expr_chain(value, query),
        StmtKind::FunctionDeclaration(f) => function_expr_best(f, query),
        StmtKind::If { test, consequent, alternate } => expr_chain(test, query)
            .or_else(|| block_best(&consequent.statements, query))
            .or_else(|| match alternate {
                Some(ElseBranch::ElseIf(stmt)) => stmt_chain(stmt, query),
                Some(ElseBranch::Else(block)) => block_best(&block.statements, query),
                None => None,
            }),
        StmtKind::Switch { discriminant, cases, default } => expr_chain(discriminant, query)
            .or_else(|| {
                cases.iter().find_map(|case| {
                    case.values
                        .iter()
                        .find_map(|v| expr_chain(v, query))
                        .or_else(|| block_best(&case.body.statements, query))
                })
            })
            .or_else(|| default.as_ref().and_then(|b| block_best(&b.statements, query))),
        StmtKind::Match { discriminant, cases, default } => expr_chain(discriminant, query)
            .or_else(|| {
                cases.iter().find_map(|case| {
                    expr_chain(&case.pattern, query).or_else(|| block_best(&case.body.statements, query))
                })
            })
            .or_else(|| default.as_ref().and_then(|b| block_best(&b.statements, query))),
        StmtKind::For { head, body } => for_head_best(head, query).or_else(|| block_best(&body.statements, query)),
        StmtKind::Walk { walked, body, .. } => expr_chain(walked, query).or_else(|| block_best(&body.statements, query)),
        StmtKind::Break(_) | StmtKind::Continue(_) | StmtKind::Prune => None,
        StmtKind::Return(e) | StmtKind::Yield(e) => opt_expr_chain(e, query),
        StmtKind::Assert(e) => expr_chain(e, query),
        StmtKind::InclusionImportStatement { .. } => None,
        StmtKind::ImportStatement { arguments, .. } => opt_expr_chain(arguments, query),
        StmtKind::ExtendStatement { pattern, object } => expr_chain(pattern, query).or_else(|| expr_chain(object, query)),
        StmtKind::StructDefinition { methods, .. } => methods.iter().find_map(|f| function_expr_best(f, query)),
        StmtKind::TestSuiteStatement { name, meta, body } | StmtKind::TestCaseStatement { name, meta, body } => {
            opt_expr_chain(name, query).or_else(|| opt_expr_chain(meta, query)).or_else(|| block_best(&body.statements, query))
        }
        StmtKind::PreinitStatement(block) => block_best(&block.statements, query),
        StmtKind::ManifestStatement(e) => expr_chain(e, query),
        StmtKind::PatternDefinition { right, .. } => expr_chain(right, query),
        StmtKind::PatternNamespaceDefinition { members, .. } => {
            members.iter().find_map(|(_, expr)| expr_chain(expr, query))
        }
        StmtKind::HostAliasDefinition { value, .. } => expr_chain(value, query),
    }
}

fn for_head_best<'a>(head: &'a ForHead, query: Span) -> ChainResult<'a> {
    match head {
        ForHead::Range { iterable, .. } => expr_chain(iterable, query),
        ForHead::CStyle { init, cond, step } => init
            .as_deref()
            .and_then(|s| stmt_chain(s, query))
            .or_else(|| cond.as_deref().and_then(|c| expr_chain(c, query)))
            .or_else(|| step.as_deref().and_then(|s| stmt_chain(s, query))),
    }
}

/// Descend into the sub-expressions/blocks an expression owns.
fn expr_children_best<'a>(expr: &'a Expr, query: Span) -> ChainResult<'a> {
    match &expr.kind {
        ExprKind::Identifier(_)
        | ExprKind::GlobalIdentifier(_)
        | ExprKind::SelfExpr
        | ExprKind::SendValExpr
        | ExprKind::BooleanLiteral(_)
        | ExprKind::IntLiteral(_)
        | ExprKind::FloatLiteral(_)
        | ExprKind::StringLiteral(_)
        | ExprKind::NilLiteral
        | ExprKind::QuantityLiteral(_)
        | ExprKind::PathLiteral(_)
        | ExprKind::PathPatternLiteral(_)
        | ExprKind::URLLiteral(_)
        | ExprKind::URLPatternLiteral(_)
        | ExprKind::HostLiteral(_)
        | ExprKind::HostPatternLiteral(_)
        | ExprKind::SchemeLiteral(_)
        | ExprKind::PatternIdentifierLiteral(_)
        | ExprKind::PatternNamespaceMemberExpr { .. } => None,
        ExprKind::RateLiteral { quantity, .. } => expr_chain(quantity, query),
        ExprKind::ObjectLiteral(obj) | ExprKind::RecordLiteral(obj) => object_literal_best(obj, query),
        ExprKind::ListLiteral(items) | ExprKind::ListPatternLiteral(items) => {
            items.iter().find_map(|e| expr_chain(e, query))
        }
        ExprKind::ObjectPatternLiteral(pat) => pat.properties.iter().find_map(|p| expr_chain(&p.value, query)),
        ExprKind::MappingExpression(entries) => entries.iter().find_map(|entry| match entry {
            MappingEntry::Static { key, value } => expr_chain(key, query).or_else(|| expr_chain(value, query)),
            MappingEntry::Dynamic { key_pattern, value, .. } => {
                expr_chain(key_pattern, query).or_else(|| expr_chain(value, query))
            }
        }),
        ExprKind::FunctionExpression(f) => function_expr_best(f, query),
        ExprKind::CallExpression { callee, arguments } => {
            expr_chain(callee, query).or_else(|| arguments.iter().find_map(|a| expr_chain(a, query)))
        }
        ExprKind::MemberExpression { object, .. } => expr_chain(object, query),
        ExprKind::IndexExpression { object, index } => expr_chain(object, query).or_else(|| expr_chain(index, query)),
        ExprKind::SliceExpression { object, start, end } => expr_chain(object, query)
            .or_else(|| opt_expr_chain(start, query))
            .or_else(|| opt_expr_chain(end, query)),
        ExprKind::SpawnExpression { meta, module } => opt_expr_chain(meta, query).or_else(|| block_best(&module.statements, query)),
        ExprKind::LifetimeJobExpression { subject, meta, module } => opt_expr_chain(subject, query)
            .or_else(|| opt_expr_chain(meta, query))
            .or_else(|| block_best(&module.statements, query)),
        ExprKind::ExtractionExpression { spread, .. } => expr_chain(spread, query),
        ExprKind::BinaryExpression { left, right, .. } => expr_chain(left, query).or_else(|| expr_chain(right, query)),
        ExprKind::UnaryExpression { operand, .. } => expr_chain(operand, query),
        ExprKind::ComputeExpression(inner) => expr_chain(inner, query),
    }
}

fn object_literal_best<'a>(obj: &'a ObjectLiteral, query: Span) -> ChainResult<'a> {
    obj.properties
        .iter()
        .find_map(|p| expr_chain(&p.value, query))
        .or_else(|| obj.spread_elements.iter().find_map(|e| expr_chain(e, query)))
        .or_else(|| obj.meta_properties.iter().find_map(|m| expr_chain(&m.value, query)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_column_first_line() {
        let src = ParsedChunkSource::new("m.ix", "a = 1\nb = 2\n");
        assert_eq!(src.span_line_column(0), (1, 1));
        assert_eq!(src.span_line_column(6), (2, 1));
    }

    #[test]
    fn statement_at_offset_finds_containing_statement() {
        let src = ParsedChunkSource::new("m.ix", "a = 1\nb = 2\n");
        let stmt = src.statement_at_offset(0).expect("statement found");
        assert!(stmt.span.contains_point(0));
    }

    #[test]
    fn first_statement_on_line_requires_matching_column() {
        let src = ParsedChunkSource::new("m.ix", "a = 1\nb = 2\n");
        let stmt = src.first_statement_on_line(2);
        assert!(stmt.is_some());
    }

    #[test]
    fn node_and_chain_finds_deepest_expression_and_ancestors() {
        let src = ParsedChunkSource::new("m.ix", "a = 1 + 2\n");
        // Offset of the `1` literal, inside the binary expression, inside
        // the local var declaration statement.
        let offset = src.text.find('1').unwrap();
        let (deepest, chain) = src.node_and_chain_at_offset(offset).expect("node found");
        match deepest {
            AnyNodeRef::Expr(e) => assert!(matches!(e.kind, ExprKind::IntLiteral(1))),
            AnyNodeRef::Stmt(_) => panic!("expected the int literal, not a statement"),
        }
        assert!(matches!(chain.first(), Some(AnyNodeRef::Stmt(_))));
    }

    #[test]
    fn node_and_chain_end_exclusive_query_does_not_match_enclosing_node() {
        let src = ParsedChunkSource::new("m.ix", "a = 1\nb = 2\n");
        let first_end = src.chunk.statements[0].span.end;
        // A query exactly at a node's end must not re-match that node
        // (spec.md §4.1: "a node whose end equals the query start is not
        // matched").
        assert!(!src.chunk.statements[0].span.contains_point(first_end));
        assert!(src.node_and_chain_at_offset(first_end).map_or(true, |(deepest, _)| deepest.span() != src.chunk.statements[0].span));
    }

    #[test]
    fn zero_width_query_at_chunk_end_finds_nothing_past_last_statement() {
        let src = ParsedChunkSource::new("m.ix", "a = 1\n");
        let past_end = src.rune_len() + 10;
        assert!(src.node_and_chain_at_offset(past_end).is_none());
    }
}
