//! Static Checker (C4).
//!
//! A two-pass walk over a parsed chunk: the first pass hoists every
//! top-level declaration (functions, globals, structs, patterns,
//! pattern-namespaces, host aliases) into the closest module's scope
//! tables; the second pass resolves every reference against those
//! tables and validates the sub-languages (spec.md §4.4).

mod scope;

pub use scope::ClosestModule;

use std::collections::HashSet;

use thiserror::Error;

use crate::ast::*;
use crate::source::{ParsedChunkSource, SourcePosition};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StaticCheckErrorKind {
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("undefined global '${0}'")]
    UndefinedGlobal(String),
    #[error("'{0}' is already declared as a function; cannot reassign as a global variable")]
    GlobalVarAssignmentNameIsFuncName(String),
    #[error("function declaration '{0}' conflicts with an existing global variable")]
    FunctionDeclNameIsGlobVar(String),
    #[error("cannot reassign constant global '${0}'")]
    ConstGlobalReassigned(String),
    #[error("duplicate key '{0}' in object literal")]
    DuplicateObjectKey(String),
    #[error("duplicate pattern definition '{0}'")]
    DuplicatePatternName(String),
    #[error("duplicate host alias '{0}'")]
    DuplicateHostAlias(String),
    #[error("duplicate struct definition '{0}'")]
    DuplicateStructName(String),
    #[error("duplicate field or method name '{0}' in struct '{1}'")]
    DuplicateStructMember(String, String),
    #[error("'break' outside of a loop")]
    BreakOutsideLoop,
    #[error("'continue' outside of a loop")]
    ContinueOutsideLoop,
    #[error("'prune' outside of a walk")]
    PruneOutsideWalk,
    #[error("'{0}' statement only legal at the top level")]
    NotTopLevel(&'static str),
    #[error("invalid quantity literal: units must be monotonically descending durations, or a single solitary unit")]
    InvalidQuantityLiteral,
    #[error("compute(...) is only legal as the value of a dynamic mapping entry")]
    ComputeOutsideMapping,
    #[error("'self' referenced outside of a method body")]
    SelfOutsideMethod,
    #[error("assert expression uses a disallowed construct")]
    InvalidAssertExpression,
    #[error("negative quantity literals are not supported")]
    NegQuantityNotSupported,
    #[error("invalid rate literal: divisor must be 's', dividend unit must be a count or byte unit")]
    InvalidRateLiteral,
    #[error("parameter '{0}' cannot shadow a global of the closest module")]
    ParamShadowsGlobal(String),
    #[error("cannot pass global '${0}' that is not declared to lthread")]
    SpawnGlobalNotDeclared(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticCheckError {
    pub kind: StaticCheckErrorKind,
    /// The deepest position — where the violation actually occurred.
    pub position: SourcePosition,
    /// Frames above `position`, innermost first: the chain of
    /// import/inclusion statements that pulled the erroring chunk in
    /// (spec.md §4.4 "Inclusion vs import", §7 "StaticCheckError ...
    /// whose bottom is the deepest chunk and whose top frames are the
    /// chain of import/inclusion statements leading there").
    pub extra_frames: Vec<SourcePosition>,
}

impl StaticCheckError {
    /// Full location stack, deepest frame first.
    pub fn location_stack(&self) -> Vec<SourcePosition> {
        let mut stack = vec![self.position.clone()];
        stack.extend(self.extra_frames.iter().cloned());
        stack
    }
}

impl std::fmt::Display for StaticCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}: {}", self.position.name, self.position.start_line, self.position.start_col, self.kind)
    }
}

impl std::error::Error for StaticCheckError {}

/// Accumulated result of checking one chunk (spec.md §4.4
/// "StaticCheckData").
#[derive(Debug, Default)]
pub struct StaticCheckData {
    pub errors: Vec<StaticCheckError>,
    /// Per function-node id, the set of global names its body reads or
    /// writes (spec.md §4.4 "captured-globals closure").
    pub captured_globals: std::collections::HashMap<NodeId, HashSet<String>>,
    /// Per mapping-expression node id, the globals referenced by its
    /// dynamic entries' key patterns.
    pub mapping_referenced_globals: std::collections::HashMap<NodeId, HashSet<String>>,
}

struct LoopFlags {
    in_loop: bool,
    in_walk: bool,
}

struct Checker<'a> {
    source: &'a ParsedChunkSource,
    data: StaticCheckData,
    modules: Vec<ClosestModule>,
    locals: Vec<HashSet<String>>,
    loop_flags: Vec<LoopFlags>,
    in_method: Vec<bool>,
    in_mapping_dynamic_value: Vec<bool>,
    current_function_globals: Vec<HashSet<String>>,
    /// The load graph this chunk was pulled from, so top-level
    /// `InclusionImportStatement`/`ImportStatement` nodes can recurse
    /// into the chunks C6 already resolved (spec.md §4.4 "Inclusion vs
    /// import"). `None` when checking a bare chunk with no known module
    /// graph (e.g. a standalone unit test).
    module_graph: Option<&'a crate::loader::Module>,
}

/// Entry point: check a parsed chunk in isolation, with no known
/// module graph — `InclusionImportStatement`/`ImportStatement` are only
/// checked for top-level placement, not recursed into (spec.md §4.4).
pub fn check_chunk(source: &ParsedChunkSource) -> StaticCheckData {
    check_chunk_with(source, None, ClosestModule::default()).0
}

/// Entry point: check a module and its full inclusion/import graph
/// (spec.md §4.4 "Inclusion vs import"). Included chunks are merged
/// into the parent's scope; imported modules are checked independently
/// and their errors are appended with the importing statement's
/// position as the outermost frame.
pub fn check_module(module: &crate::loader::Module) -> StaticCheckData {
    check_chunk_with(&module.chunk, Some(module), ClosestModule::default()).0
}

/// Runs a full two-pass check over `source` and returns both the
/// collected diagnostics and the resulting top-level `ClosestModule`
/// (declarations hoisted/merged along the way), so a caller composing
/// an inclusion or import can fold the child's scope into its own
/// without a second hoisting pass.
fn check_chunk_with(
    source: &ParsedChunkSource,
    module_graph: Option<&crate::loader::Module>,
    base: ClosestModule,
) -> (StaticCheckData, ClosestModule) {
    let mut checker = Checker {
        source,
        data: StaticCheckData::default(),
        modules: vec![base],
        locals: vec![HashSet::new()],
        loop_flags: vec![LoopFlags { in_loop: false, in_walk: false }],
        in_method: vec![false],
        in_mapping_dynamic_value: vec![false],
        current_function_globals: Vec::new(),
        module_graph,
    };
    checker.hoist_top_level(&source.chunk.statements);
    for stmt in &source.chunk.statements {
        checker.check_stmt(stmt, true);
    }
    let top_module = checker.modules.pop().unwrap();
    (checker.data, top_module)
}

impl<'a> Checker<'a> {
    fn module(&mut self) -> &mut ClosestModule {
        self.modules.last_mut().unwrap()
    }

    fn error(&mut self, kind: StaticCheckErrorKind, span: Span) {
        let position = self.source.source_position(span);
        self.data.errors.push(StaticCheckError { kind, position, extra_frames: Vec::new() });
    }

    fn declare_local(&mut self, name: &str) {
        self.locals.last_mut().unwrap().insert(name.to_string());
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals.iter().rev().any(|scope| scope.contains(name))
    }

    /// Pass 1: hoist top-level declarations into the closest module
    /// (spec.md §4.4 "Function declarations register a constant global",
    /// "Struct definitions", pattern/host-alias definitions).
    fn hoist_top_level(&mut self, statements: &[Stmt]) {
        for stmt in statements {
            match &stmt.kind {
                StmtKind::FunctionDeclaration(f) => {
                    if let Some(name) = &f.name {
                        if self.module().globals.contains_key(name) {
                            self.error(StaticCheckErrorKind::FunctionDeclNameIsGlobVar(name.clone()), stmt.span);
                        }
                        self.module().functions.insert(name.clone(), f.id);
                        self.module().globals.insert(name.clone(), true);
                    }
                }
                StmtKind::GlobalVarAssignment { name, is_const, .. } => {
                    self.module().globals.insert(name.clone(), *is_const);
                }
                StmtKind::StructDefinition { name, fields, methods } => {
                    if self.module().structs.contains(name) {
                        self.error(StaticCheckErrorKind::DuplicateStructName(name.clone()), stmt.span);
                    }
                    self.module().structs.insert(name.clone());
                    self.check_struct_member_uniqueness(name, fields, methods, stmt.span);
                }
                StmtKind::PatternDefinition { name, .. } => {
                    if !self.module().patterns.insert(name.clone()) {
                        self.error(StaticCheckErrorKind::DuplicatePatternName(name.clone()), stmt.span);
                    }
                }
                StmtKind::PatternNamespaceDefinition { name, .. } => {
                    if !self.module().pattern_namespaces.insert(name.clone()) {
                        self.error(StaticCheckErrorKind::DuplicatePatternName(name.clone()), stmt.span);
                    }
                }
                StmtKind::HostAliasDefinition { name, .. } => {
                    if !self.module().host_aliases.insert(name.clone()) {
                        self.error(StaticCheckErrorKind::DuplicateHostAlias(name.clone()), stmt.span);
                    }
                }
                _ => {}
            }
        }
    }

    fn check_struct_member_uniqueness(&mut self, struct_name: &str, fields: &[StructField], methods: &[FunctionExpr], span: Span) {
        let mut seen = HashSet::new();
        for f in fields {
            if !seen.insert(f.name.clone()) {
                self.error(StaticCheckErrorKind::DuplicateStructMember(f.name.clone(), struct_name.to_string()), span);
            }
        }
        for m in methods {
            if let Some(name) = &m.name {
                if !seen.insert(name.clone()) {
                    self.error(StaticCheckErrorKind::DuplicateStructMember(name.clone(), struct_name.to_string()), span);
                }
            }
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt, top_level: bool) {
        match &stmt.kind {
            StmtKind::Expr(e) => self.check_expr(e),
            StmtKind::GlobalVarAssignment { name, value, is_const } => {
                if self.module().functions.contains_key(name) {
                    self.error(StaticCheckErrorKind::GlobalVarAssignmentNameIsFuncName(name.clone()), stmt.span);
                }
                if !*is_const {
                    if let Some(true) = self.module().globals.get(name) {
                        self.error(StaticCheckErrorKind::ConstGlobalReassigned(name.clone()), stmt.span);
                    }
                }
                self.note_global_use(name);
                self.check_expr(value);
            }
            StmtKind::LocalVarDeclaration { name, value } => {
                self.check_expr(value);
                self.declare_local(name);
            }
            StmtKind::FunctionDeclaration(f) => {
                if !top_level {
                    self.error(StaticCheckErrorKind::NotTopLevel("fn"), stmt.span);
                } else {
                    self.check_function(f);
                }
            }
            StmtKind::If { test, consequent, alternate } => {
                self.check_expr(test);
                self.check_block(consequent);
                match alternate {
                    Some(ElseBranch::ElseIf(s)) => self.check_stmt(s, false),
                    Some(ElseBranch::Else(b)) => self.check_block(b),
                    None => {}
                }
            }
            StmtKind::Switch { discriminant, cases, default } => {
                self.check_expr(discriminant);
                for case in cases {
                    for v in &case.values {
                        self.check_expr(v);
                    }
                    self.check_block(&case.body);
                }
                if let Some(d) = default {
                    self.check_block(d);
                }
            }
            StmtKind::Match { discriminant, cases, default } => {
                self.check_expr(discriminant);
                for case in cases {
                    self.check_expr(&case.pattern);
                    self.locals.push(HashSet::new());
                    if let Some(gv) = &case.group_var {
                        self.declare_local(gv);
                    }
                    self.check_block(&case.body);
                    self.locals.pop();
                }
                if let Some(d) = default {
                    self.check_block(d);
                }
            }
            StmtKind::For { head, body } => {
                self.locals.push(HashSet::new());
                match head {
                    ForHead::Range { key_var, value_var, iterable } => {
                        self.check_expr(iterable);
                        if let Some(k) = key_var {
                            self.declare_local(k);
                        }
                        self.declare_local(value_var);
                    }
                    ForHead::CStyle { init, cond, step } => {
                        if let Some(i) = init {
                            self.check_stmt(i, false);
                        }
                        if let Some(c) = cond {
                            self.check_expr(c);
                        }
                        if let Some(s) = step {
                            self.check_stmt(s, false);
                        }
                    }
                }
                self.loop_flags.push(LoopFlags { in_loop: true, in_walk: false });
                self.check_block(body);
                self.loop_flags.pop();
                self.locals.pop();
            }
            StmtKind::Walk { walked, entry_var, key_var, body } => {
                self.check_expr(walked);
                self.locals.push(HashSet::new());
                self.declare_local(entry_var);
                if let Some(k) = key_var {
                    self.declare_local(k);
                }
                self.loop_flags.push(LoopFlags { in_loop: true, in_walk: true });
                self.check_block(body);
                self.loop_flags.pop();
                self.locals.pop();
            }
            StmtKind::Break(_) => {
                if !self.loop_flags.last().map(|f| f.in_loop).unwrap_or(false) {
                    self.error(StaticCheckErrorKind::BreakOutsideLoop, stmt.span);
                }
            }
            StmtKind::Continue(_) => {
                if !self.loop_flags.last().map(|f| f.in_loop).unwrap_or(false) {
                    self.error(StaticCheckErrorKind::ContinueOutsideLoop, stmt.span);
                }
            }
            StmtKind::Prune => {
                if !self.loop_flags.last().map(|f| f.in_walk).unwrap_or(false) {
                    self.error(StaticCheckErrorKind::PruneOutsideWalk, stmt.span);
                }
            }
            StmtKind::Return(e) | StmtKind::Yield(e) => {
                if let Some(e) = e {
                    self.check_expr(e);
                }
            }
            StmtKind::Assert(e) => {
                self.check_assert_expr(e);
            }
            StmtKind::InclusionImportStatement { path } => {
                if !top_level {
                    self.error(StaticCheckErrorKind::NotTopLevel("import"), stmt.span);
                } else {
                    self.check_inclusion(path, stmt.span);
                }
            }
            StmtKind::ImportStatement { name, source, arguments } => {
                if !top_level {
                    self.error(StaticCheckErrorKind::NotTopLevel("import"), stmt.span);
                } else {
                    if let Some(args) = arguments {
                        self.check_expr(args);
                    }
                    self.check_import(name, source, stmt.span);
                }
            }
            StmtKind::ExtendStatement { pattern, object } => {
                if !top_level {
                    self.error(StaticCheckErrorKind::NotTopLevel("extend"), stmt.span);
                }
                self.check_expr(pattern);
                self.check_expr(object);
            }
            StmtKind::StructDefinition { methods, .. } => {
                for m in methods {
                    self.check_function(m);
                }
            }
            StmtKind::TestSuiteStatement { name, meta, body } | StmtKind::TestCaseStatement { name, meta, body } => {
                if let Some(n) = name {
                    self.check_expr(n);
                }
                if let Some(m) = meta {
                    self.check_expr(m);
                }
                self.enter_embedded_module(|c| c.check_block_hoisted(body));
            }
            StmtKind::PreinitStatement(_) => {
                // Walked separately by the manifest preinit evaluator (C5),
                // which applies its own restricted whitelist.
            }
            StmtKind::ManifestStatement(e) => self.check_expr(e),
            StmtKind::PatternDefinition { right, .. } => self.check_expr(right),
            StmtKind::PatternNamespaceDefinition { members, .. } => {
                for (_, expr) in members {
                    self.check_expr(expr);
                }
            }
            StmtKind::HostAliasDefinition { value, .. } => self.check_expr(value),
        }
    }

    fn check_block(&mut self, block: &Block) {
        self.locals.push(HashSet::new());
        for stmt in &block.statements {
            self.check_stmt(stmt, false);
        }
        self.locals.pop();
    }

    fn check_block_hoisted(&mut self, block: &Block) {
        self.hoist_top_level(&block.statements);
        self.locals.push(HashSet::new());
        for stmt in &block.statements {
            self.check_stmt(stmt, true);
        }
        self.locals.pop();
    }

    fn enter_embedded_module(&mut self, f: impl FnOnce(&mut Self)) {
        let inherited = self.module().clone();
        self.modules.push(inherited);
        self.locals.push(HashSet::new());
        self.loop_flags.push(LoopFlags { in_loop: false, in_walk: false });
        f(self);
        self.loop_flags.pop();
        self.locals.pop();
        self.modules.pop();
    }

    /// Builds a fresh child checker pre-seeded with this module's
    /// scope, runs it over the included chunk, then merges its
    /// top-level globals/locals/patterns/pattern-namespaces back,
    /// reporting shadowing on clash (spec.md §4.4 "Inclusion vs
    /// import"). Only one inclusion level is followed: a chunk reached
    /// through an inclusion may itself declare `import ./x.ix` but its
    /// own nested inclusions are not resolved here, since the loader
    /// (C6) does not track a sub-graph for included chunks (see
    /// DESIGN.md).
    fn check_inclusion(&mut self, path: &str, stmt_span: Span) {
        let Some(module) = self.module_graph else { return };
        let Some(included) = module.inclusions.get(path) else {
            // Unresolved inclusion: already recorded as a load error by
            // C6; nothing further to check here.
            return;
        };
        let base = self.module().clone();
        let (mut child_data, child_module) = check_chunk_with(&included.source, None, base);

        let outer_frame = self.source.source_position(stmt_span);
        for mut err in std::mem::take(&mut child_data.errors) {
            err.extra_frames.push(outer_frame.clone());
            self.data.errors.push(err);
        }
        self.data.captured_globals.extend(child_data.captured_globals);
        self.data.mapping_referenced_globals.extend(child_data.mapping_referenced_globals);

        // Fold the child's (possibly enlarged) top-level scope back in.
        // Clashes with names already present before the inclusion were
        // already reported as duplicates while checking the child,
        // since it started from a clone of this same scope.
        let parent_module = self.module();
        parent_module.functions.extend(child_module.functions);
        parent_module.globals.extend(child_module.globals);
        parent_module.structs.extend(child_module.structs);
        parent_module.patterns.extend(child_module.patterns);
        parent_module.pattern_namespaces.extend(child_module.pattern_namespaces);
        parent_module.host_aliases.extend(child_module.host_aliases);
    }

    /// Checks an imported module independently: a fresh checker seeded
    /// with the host's base patterns (not its globals/functions) plus
    /// the conventional `mod-args` binding, recursing through the
    /// imported module's own inclusion/import graph. The bound
    /// identifier becomes a constant global in the importing module
    /// (spec.md §4.4 "Module import").
    fn check_import(&mut self, name: &str, source: &str, stmt_span: Span) {
        self.module().globals.insert(name.to_string(), true);
        let Some(module) = self.module_graph else { return };
        let Some(imported) = module.imports.get(source) else {
            // Unresolved import: already recorded as a load error by C6.
            return;
        };
        let mut base = ClosestModule::default();
        base.patterns = self.module().patterns.clone();
        base.pattern_namespaces = self.module().pattern_namespaces.clone();
        base.globals.insert("mod-args".to_string(), true);

        let (mut child_data, _) = check_chunk_with(&imported.chunk, Some(imported.as_ref()), base);
        let outer_frame = self.source.source_position(stmt_span);
        for mut err in std::mem::take(&mut child_data.errors) {
            err.extra_frames.push(outer_frame.clone());
            self.data.errors.push(err);
        }
    }

    /// Records that the function currently being checked references the
    /// global `name`. When `name` is itself a function that was declared
    /// (and thus already checked, per the "fn-decl must be top-level"
    /// ordering invariant — see DESIGN.md), its own `capturedGlobals` are
    /// unioned in too, giving the transitive closure of the capture
    /// relation without a separate fixed-point pass (spec.md §3 invariant
    /// 6, §9 "Closure capture is a fixed-point").
    fn note_global_use(&mut self, name: &str) {
        if let Some(set) = self.current_function_globals.last_mut() {
            set.insert(name.to_string());
        }
        if let Some(&func_id) = self.modules.last().and_then(|m| m.functions.get(name)) {
            if let Some(transitive) = self.data.captured_globals.get(&func_id).cloned() {
                if let Some(set) = self.current_function_globals.last_mut() {
                    set.extend(transitive);
                }
            }
        }
    }

    fn check_function(&mut self, f: &FunctionExpr) {
        self.locals.push(HashSet::new());
        self.in_method.push(f.is_method);
        self.current_function_globals.push(HashSet::new());
        for p in &f.params {
            if self.module().globals.contains_key(&p.name) {
                self.error(StaticCheckErrorKind::ParamShadowsGlobal(p.name.clone()), f.span);
            }
            self.declare_local(&p.name);
            if let Some(pattern) = &p.pattern {
                self.check_expr(pattern);
            }
        }
        for c in &f.captured_vars {
            self.declare_local(c);
        }
        self.loop_flags.push(LoopFlags { in_loop: false, in_walk: false });
        for stmt in &f.body.statements {
            self.check_stmt(stmt, false);
        }
        self.loop_flags.pop();
        let captured = self.current_function_globals.pop().unwrap();
        self.data.captured_globals.insert(f.id, captured);
        self.in_method.pop();
        self.locals.pop();
    }

    fn check_assert_expr(&mut self, e: &Expr) {
        if !is_assert_sublanguage(e) {
            self.error(StaticCheckErrorKind::InvalidAssertExpression, e.span);
        }
        self.check_expr(e);
    }

    fn check_expr(&mut self, e: &Expr) {
        match &e.kind {
            ExprKind::Identifier(name) => {
                if !self.is_local(name) && !self.module().functions.contains_key(name) && !self.module().globals.contains_key(name) {
                    self.error(StaticCheckErrorKind::UndefinedVariable(name.clone()), e.span);
                } else if self.module().functions.contains_key(name) {
                    // A function declaration registers a constant global
                    // of its own name (spec.md §4.4 "Function
                    // declarations"); referencing it is referencing that
                    // global, so it (and its own transitive captures)
                    // fold into the enclosing function's captured set.
                    self.note_global_use(name);
                }
            }
            ExprKind::GlobalIdentifier(name) => {
                if !self.module().globals.contains_key(name) {
                    self.error(StaticCheckErrorKind::UndefinedGlobal(name.clone()), e.span);
                }
                self.note_global_use(name);
            }
            ExprKind::SelfExpr => {
                if !self.in_method.last().copied().unwrap_or(false) {
                    self.error(StaticCheckErrorKind::SelfOutsideMethod, e.span);
                }
            }
            ExprKind::SendValExpr
            | ExprKind::BooleanLiteral(_)
            | ExprKind::IntLiteral(_)
            | ExprKind::FloatLiteral(_)
            | ExprKind::StringLiteral(_)
            | ExprKind::NilLiteral
            | ExprKind::PathLiteral(_)
            | ExprKind::PathPatternLiteral(_)
            | ExprKind::URLLiteral(_)
            | ExprKind::URLPatternLiteral(_)
            | ExprKind::HostLiteral(_)
            | ExprKind::HostPatternLiteral(_)
            | ExprKind::SchemeLiteral(_) => {}
            ExprKind::QuantityLiteral(parts) => {
                if !quantity_sequence_is_valid(parts) {
                    self.error(StaticCheckErrorKind::InvalidQuantityLiteral, e.span);
                }
            }
            ExprKind::RateLiteral { quantity, divisor_unit } => {
                self.check_expr(quantity);
                if !is_valid_rate(quantity, divisor_unit) {
                    self.error(StaticCheckErrorKind::InvalidRateLiteral, e.span);
                }
            }
            ExprKind::PatternIdentifierLiteral(name) => {
                if !self.module().patterns.contains(name) {
                    self.error(StaticCheckErrorKind::UndefinedVariable(format!("%{name}")), e.span);
                }
            }
            ExprKind::PatternNamespaceMemberExpr { namespace, .. } => {
                if !self.module().pattern_namespaces.contains(namespace) {
                    self.error(StaticCheckErrorKind::UndefinedVariable(format!("%{namespace}")), e.span);
                }
            }
            ExprKind::ObjectLiteral(obj) | ExprKind::RecordLiteral(obj) => self.check_object_literal(obj, e.span),
            ExprKind::ListLiteral(items) => {
                for item in items {
                    self.check_expr(item);
                }
            }
            ExprKind::ObjectPatternLiteral(obj) => self.check_object_pattern_literal(obj, e.span),
            ExprKind::ListPatternLiteral(items) => {
                for item in items {
                    self.check_expr(item);
                }
            }
            ExprKind::MappingExpression(entries) => self.check_mapping(entries, e.id),
            ExprKind::FunctionExpression(f) => self.check_function(f),
            ExprKind::CallExpression { callee, arguments } => {
                self.check_expr(callee);
                for a in arguments {
                    self.check_expr(a);
                }
            }
            ExprKind::MemberExpression { object, .. } => self.check_expr(object),
            ExprKind::IndexExpression { object, index } => {
                self.check_expr(object);
                self.check_expr(index);
            }
            ExprKind::SliceExpression { object, start, end } => {
                self.check_expr(object);
                if let Some(s) = start {
                    self.check_expr(s);
                }
                if let Some(e) = end {
                    self.check_expr(e);
                }
            }
            ExprKind::SpawnExpression { meta, module } => {
                if let Some(m) = meta {
                    self.check_expr(m);
                    self.check_spawn_meta_globals(m);
                }
                self.enter_embedded_module(|c| c.check_block_hoisted(module));
            }
            ExprKind::LifetimeJobExpression { subject, meta, module } => {
                if let Some(s) = subject {
                    self.check_expr(s);
                }
                if let Some(m) = meta {
                    self.check_expr(m);
                }
                // Inherits the parent's globals/patterns/namespaces
                // (spec.md §4.4 "Lifetime-job expressions").
                self.enter_embedded_module(|c| c.check_block_hoisted(module));
            }
            ExprKind::ExtractionExpression { spread, .. } => self.check_expr(spread),
            ExprKind::BinaryExpression { left, right, .. } => {
                self.check_expr(left);
                self.check_expr(right);
            }
            ExprKind::UnaryExpression { op, operand } => {
                if *op == UnaryOp::Neg && is_quantity_expr(operand) {
                    self.error(StaticCheckErrorKind::NegQuantityNotSupported, e.span);
                }
                self.check_expr(operand);
            }
            ExprKind::ComputeExpression(inner) => {
                if !self.in_mapping_dynamic_value.last().copied().unwrap_or(false) {
                    self.error(StaticCheckErrorKind::ComputeOutsideMapping, e.span);
                }
                self.check_expr(inner);
            }
        }
    }

    fn check_object_literal(&mut self, obj: &ObjectLiteral, span: Span) {
        let mut seen = HashSet::new();
        for prop in &obj.properties {
            if matches!(prop.key, PropertyKey::Explicit) && !seen.insert(prop.key_name.clone()) {
                self.error(StaticCheckErrorKind::DuplicateObjectKey(prop.key_name.clone()), prop.span);
            }
            self.check_expr(&prop.value);
        }
        for spread in &obj.spread_elements {
            self.check_expr(spread);
        }
        for meta in &obj.meta_properties {
            self.check_expr(&meta.value);
        }
        let _ = span;
    }

    /// The `go { globals: ... } do {...}` meta's `globals` sub-section
    /// (spec.md §4.4 "Spawn (lthread) expressions", §8 scenario 6): a
    /// key-list form (`.{g}`) names must already exist in the parent's
    /// global scope at check time. An object-literal form instead
    /// *defines* constants in the embedded module and needs no
    /// existence check here.
    fn check_spawn_meta_globals(&mut self, meta: &Expr) {
        let ExprKind::ObjectLiteral(obj) = &meta.kind else { return };
        for prop in &obj.properties {
            if prop.key_name != "globals" {
                continue;
            }
            if let ExprKind::ObjectPatternLiteral(pat) = &prop.value.kind {
                for p in &pat.properties {
                    if !self.module().globals.contains_key(&p.key_name) {
                        self.error(StaticCheckErrorKind::SpawnGlobalNotDeclared(p.key_name.clone()), p.span);
                    }
                }
            }
        }
    }

    fn check_object_pattern_literal(&mut self, obj: &ObjectPatternLiteral, span: Span) {
        let mut seen = HashSet::new();
        for prop in &obj.properties {
            if !seen.insert(prop.key_name.clone()) {
                self.error(StaticCheckErrorKind::DuplicateObjectKey(prop.key_name.clone()), prop.span);
            }
            self.check_expr(&prop.value);
        }
        let _ = span;
    }

    fn check_mapping(&mut self, entries: &[MappingEntry], id: NodeId) {
        let mut referenced_globals = HashSet::new();
        for entry in entries {
            match entry {
                MappingEntry::Static { key, value } => {
                    self.check_expr(key);
                    self.check_expr(value);
                }
                MappingEntry::Dynamic { key_pattern, key_var, group_var, value } => {
                    self.check_expr(key_pattern);
                    if let ExprKind::GlobalIdentifier(name) = &key_pattern.kind {
                        referenced_globals.insert(name.clone());
                    }
                    self.locals.push(HashSet::new());
                    self.declare_local(key_var);
                    if let Some(gv) = group_var {
                        self.declare_local(gv);
                    }
                    self.in_mapping_dynamic_value.push(true);
                    self.check_expr(value);
                    self.in_mapping_dynamic_value.pop();
                    self.locals.pop();
                }
            }
        }
        self.data.mapping_referenced_globals.insert(id, referenced_globals);
    }
}

/// The assert sub-language restricts expressions to comparisons,
/// boolean connectives, and call/member access — no assignment, no
/// mapping/spawn/lifetime-job constructs (spec.md §4.4 "Sub-language:
/// assertions").
fn is_assert_sublanguage(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::MappingExpression(_)
        | ExprKind::SpawnExpression { .. }
        | ExprKind::LifetimeJobExpression { .. }
        | ExprKind::FunctionExpression(_)
        | ExprKind::ComputeExpression(_) => false,
        ExprKind::BinaryExpression { left, right, .. } => is_assert_sublanguage(left) && is_assert_sublanguage(right),
        ExprKind::UnaryExpression { operand, .. } => is_assert_sublanguage(operand),
        ExprKind::CallExpression { callee, arguments } => {
            is_assert_sublanguage(callee) && arguments.iter().all(is_assert_sublanguage)
        }
        ExprKind::MemberExpression { object, .. } => is_assert_sublanguage(object),
        ExprKind::IndexExpression { object, index } => is_assert_sublanguage(object) && is_assert_sublanguage(index),
        _ => true,
    }
}

fn is_quantity_expr(e: &Expr) -> bool {
    matches!(e.kind, ExprKind::QuantityLiteral(_) | ExprKind::RateLiteral { .. })
}

/// A rate's divisor must be `s`; its dividend must be a single count or
/// byte unit, optionally multiplier-prefixed (the multiplier is folded
/// into `value` by the lexer) — spec.md §4.4 "Quantity & rate literals".
fn is_valid_rate(quantity: &Expr, divisor_unit: &str) -> bool {
    if divisor_unit != "s" {
        return false;
    }
    matches!(&quantity.kind, ExprKind::QuantityLiteral(parts)
        if parts.len() == 1 && matches!(parts[0].unit, QuantityUnit::Count | QuantityUnit::Byte))
}

/// Units must either be a single solitary unit (`x`, `ln`, `rn`, `B`,
/// `%`) or a strictly descending sequence of durations, e.g. `1h30mn`
/// is valid, `1s1h` is not (spec.md §4.4 "Quantity & rate literals").
fn quantity_sequence_is_valid(parts: &[QuantityPart]) -> bool {
    if parts.is_empty() {
        return false;
    }
    if parts.len() == 1 {
        return true;
    }
    let mut last_rank = None;
    for part in parts {
        let Some(rank) = part.unit.duration_rank() else { return false };
        if let Some(last) = last_rank {
            if rank <= last {
                return false;
            }
        }
        last_rank = Some(rank);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(src: &str) -> StaticCheckData {
        let source = ParsedChunkSource::new("t.ix", src);
        check_chunk(&source)
    }

    #[test]
    fn undefined_variable_is_reported() {
        let data = check("x = y\n");
        assert!(data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::UndefinedVariable(ref n) if n == "y")));
    }

    #[test]
    fn function_declaration_registers_callable_global() {
        let data = check("fn greet() { return 1 }\nx = greet()\n");
        assert!(data.errors.is_empty());
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let data = check("break\n");
        assert!(data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::BreakOutsideLoop)));
    }

    #[test]
    fn break_inside_for_is_accepted() {
        let data = check("for k, v in list { break }\n");
        assert!(!data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::BreakOutsideLoop)));
    }

    #[test]
    fn prune_outside_walk_is_rejected() {
        let data = check("for k, v in list { prune }\n");
        assert!(data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::PruneOutsideWalk)));
    }

    #[test]
    fn duplicate_struct_name_is_rejected() {
        let data = check("struct Foo { a } struct Foo { b }\n");
        assert!(data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::DuplicateStructName(_))));
    }

    #[test]
    fn invalid_duration_sequence_is_rejected() {
        let data = check("x = 1s1h\n");
        assert!(data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::InvalidQuantityLiteral)));
    }

    #[test]
    fn valid_descending_duration_sequence_is_accepted() {
        let data = check("x = 1h30mn\n");
        assert!(!data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::InvalidQuantityLiteral)));
    }

    #[test]
    fn negative_quantity_literal_is_rejected() {
        let data = check("x = -1h\n");
        assert!(data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::NegQuantityNotSupported)));
    }

    /// spec.md §8 scenario 5: an error inside an imported module is
    /// appended to the parent with a two-frame location stack, the
    /// deepest frame pointing into the dependency.
    #[test]
    fn import_error_carries_a_two_frame_location_stack() {
        use crate::loader::{MapResolver, ModuleLoader};

        let resolver = MapResolver::new()
            .with("main.ix", "manifest {}\nimport res ./dep.ix {}\nreturn res\n")
            .with("./dep.ix", "manifest {}\na = b\n");
        let mut loader = ModuleLoader::new(&resolver);
        let module = loader.load("main.ix").unwrap();
        let data = check_module(&module);

        let err = data
            .errors
            .iter()
            .find(|e| matches!(e.kind, StaticCheckErrorKind::UndefinedVariable(ref n) if n == "b"))
            .expect("expected an undefined-variable error from the imported chunk");
        let stack = err.location_stack();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack[0].name, "./dep.ix");
        assert_eq!(stack[0].start_line, 2);
        assert_eq!(stack[1].name, "main.ix");
        assert_eq!(stack[1].start_line, 2);
    }

    /// spec.md §8 "Inclusion merge is idempotent when the included
    /// chunk declares nothing new": re-checking after inclusion
    /// produces the same globals, no spurious shadow errors.
    #[test]
    fn inclusion_merges_globals_without_spurious_errors() {
        use crate::loader::{MapResolver, ModuleLoader};

        let resolver =
            MapResolver::new().with("main.ix", "manifest {}\nimport /inc.ix\nfn useIt(){ return helper() }\n").with(
                "/inc.ix",
                "fn helper(){ return 1 }\n",
            );
        let mut loader = ModuleLoader::new(&resolver);
        let module = loader.load("main.ix").unwrap();
        let data = check_module(&module);
        assert!(data.errors.is_empty(), "unexpected errors: {:?}", data.errors);
    }

    /// spec.md §3 invariant 6: if F references G and G's static data
    /// names `x`, then F's static data names `x` too — the transitive
    /// closure of the capture relation.
    #[test]
    fn captured_globals_closure_is_transitive() {
        let source = ParsedChunkSource::new(
            "t.ix",
            "$$x = 1\nfn g(){ return $$x }\nfn f(){ return g() }\n",
        );
        let data = check_chunk(&source);
        assert!(data.errors.is_empty(), "unexpected errors: {:?}", data.errors);

        let find_fn_id = |name: &str| {
            source
                .chunk
                .statements
                .iter()
                .find_map(|s| match &s.kind {
                    StmtKind::FunctionDeclaration(f) if f.name.as_deref() == Some(name) => Some(f.id),
                    _ => None,
                })
                .unwrap()
        };
        let g_id = find_fn_id("g");
        let f_id = find_fn_id("f");
        assert!(data.captured_globals[&g_id].contains("x"));
        assert!(data.captured_globals[&f_id].contains("x"), "f should transitively capture x via g()");
    }

    /// spec.md §8 scenario 1: a function declaration nested inside
    /// another function body is rejected, not silently accepted.
    #[test]
    fn nested_function_declaration_is_rejected() {
        let data = check("fn f(){ fn g(){} }\n");
        assert!(data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::NotTopLevel("fn"))));
    }

    /// spec.md §8 scenario 2: a parameter may not shadow a global of the
    /// closest module.
    #[test]
    fn parameter_cannot_shadow_global() {
        let data = check("$$a = 1\nfn f(a){ return a }\n");
        assert!(data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::ParamShadowsGlobal(ref n) if n == "a")));
    }

    /// spec.md §8 scenario 4: `1x/s` is a valid rate literal; `1h/s` is not
    /// (a duration unit is not a legal rate dividend).
    #[test]
    fn rate_literal_dividend_must_be_count_or_byte() {
        let data = check("x = 1x/s\n");
        assert!(!data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::InvalidRateLiteral)));

        let data = check("x = 1h/s\n");
        assert!(data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::InvalidRateLiteral)));
    }

    /// spec.md §8 scenario 6: a spawn's `globals:` key-list may only
    /// name globals that already exist in the parent's scope.
    #[test]
    fn spawn_globals_key_list_rejects_undeclared_global() {
        let data = check("go { globals: .{g} } do { return g }\n");
        assert!(data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::SpawnGlobalNotDeclared(ref n) if n == "g")));
    }

    #[test]
    fn spawn_globals_key_list_accepts_declared_global() {
        let data = check("$$g = 1\ngo { globals: .{g} } do { return g }\n");
        assert!(
            !data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::SpawnGlobalNotDeclared(_))),
            "unexpected errors: {:?}",
            data.errors
        );
    }

    #[test]
    fn inclusion_reports_shadowing_on_clash() {
        use crate::loader::{MapResolver, ModuleLoader};

        let resolver = MapResolver::new()
            .with("main.ix", "manifest {}\n%p = /tmp/...\nimport /inc.ix\n")
            .with("/inc.ix", "%p = /var/...\n");
        let mut loader = ModuleLoader::new(&resolver);
        let module = loader.load("main.ix").unwrap();
        let data = check_module(&module);
        assert!(data.errors.iter().any(|e| matches!(e.kind, StaticCheckErrorKind::DuplicatePatternName(ref n) if n == "p")));
    }
}
