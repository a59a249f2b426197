//! AST node types.
//!
//! Every node owns a [`NodeId`] (its index into the arena the parser
//! allocates nodes from) instead of relying on pointer identity, so the
//! checker's per-scope tables (`localVars[scope][name]`, `propertyInfo`,
//! …) can be keyed on a plain integer. See DESIGN.md, "Back-references in
//! the AST".

use std::fmt;

/// Position information for error reporting (1-based line/column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

/// Byte-offset span in source code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// True if `point` falls strictly inside `[start, end)`, or at `start`
    /// for a zero-width span. A node whose end equals the query start does
    /// NOT match (see spec.md §4.1).
    pub fn contains_point(&self, point: usize) -> bool {
        if self.start == self.end {
            return point == self.start;
        }
        self.start <= point && point < self.end
    }
}

/// Monotonically increasing id assigned by the parser's arena allocator.
pub type NodeId = u32;

/// A node wraps a payload with its arena id and source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Node<T> {
    pub id: NodeId,
    pub span: Span,
    pub kind: T,
}

impl<T> Node<T> {
    pub fn new(id: NodeId, span: Span, kind: T) -> Self {
        Self { id, span, kind }
    }
}

pub type Expr = Node<ExprKind>;
pub type Stmt = Node<StmtKind>;

/// Root of a parsed module: an ordered list of top-level statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: NodeId,
    pub span: Span,
    pub statements: Vec<Stmt>,
}

/// A `{ ... }` block; also used for embedded-module bodies (spawn,
/// lifetime-job, test-suite, test-case).
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: NodeId,
    pub span: Span,
    pub statements: Vec<Stmt>,
}

/// Kind of a module (top-level chunk or an embedded one). Drives which
/// manifest sections are legal (spec.md §3 "Manifest").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    TopLevel,
    LifetimeJob,
    UserLthread,
    TestSuite,
    TestCase,
    IncludableChunk,
}

impl ModuleKind {
    /// Embedded kinds forbid `parameters`, `env`, `databases`,
    /// `preinit-files`, `invocation` manifest sections (spec.md §3).
    pub fn is_embedded(self) -> bool {
        !matches!(self, ModuleKind::TopLevel)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleKind::TopLevel => "top-level",
            ModuleKind::LifetimeJob => "lifetime-job",
            ModuleKind::UserLthread => "user-lthread",
            ModuleKind::TestSuite => "test-suite",
            ModuleKind::TestCase => "test-case",
            ModuleKind::IncludableChunk => "includable-chunk",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Box<Expr>),

    /// `$$name = value` — declares/assigns a global of the closest module.
    GlobalVarAssignment { name: String, value: Box<Expr>, is_const: bool },

    /// `name = value` — declares/assigns a local of the enclosing scope.
    LocalVarDeclaration { name: String, value: Box<Expr> },

    /// Top-level `fn name(...) { ... }`. Registers a constant global named
    /// after the function (spec.md §4.4 "Function declarations").
    FunctionDeclaration(FunctionExpr),

    If { test: Box<Expr>, consequent: Block, alternate: Option<ElseBranch> },

    Switch { discriminant: Box<Expr>, cases: Vec<SwitchCase>, default: Option<Block> },

    Match { discriminant: Box<Expr>, cases: Vec<MatchCase>, default: Option<Block> },

    For { head: ForHead, body: Block },

    /// Traversal over a tree-shaped value; `prune`/`break`/`continue` are
    /// legal inside its body (spec.md §4.4 "Break/continue/prune/yield").
    Walk { walked: Box<Expr>, entry_var: String, key_var: Option<String>, body: Block },

    Break(Option<u32>),
    Continue(Option<u32>),
    Prune,
    Return(Option<Box<Expr>>),
    Yield(Option<Box<Expr>>),

    /// `assert <expr>` — the expr sub-language is restricted, see
    /// spec.md §4.4 "Sub-language: assertions".
    Assert(Box<Expr>),

    /// `import ./dep.ix` — a textual merge of another chunk (top-level
    /// statement only).
    InclusionImportStatement { path: String },

    /// `import name ./dep.ix {args...}` — a separately checked module
    /// bound under `name` (top-level statement only, never inside an
    /// included chunk).
    ImportStatement { name: String, source: String, arguments: Option<Box<Expr>> },

    /// `extend <pattern> { ... }` — top-level only.
    ExtendStatement { pattern: Box<Expr>, object: Box<Expr> },

    /// Top-level struct definition: fields and methods share one
    /// namespace (spec.md §4.4 "Struct definitions").
    StructDefinition { name: String, fields: Vec<StructField>, methods: Vec<FunctionExpr> },

    TestSuiteStatement { name: Option<Box<Expr>>, meta: Option<Box<Expr>>, body: Block },
    TestCaseStatement { name: Option<Box<Expr>>, meta: Option<Box<Expr>>, body: Block },

    /// `preinit { ... }` — restricted preamble, see spec.md §4.5.
    PreinitStatement(Block),

    /// `manifest { ... }` — the literal object validated section by
    /// section in C5.
    ManifestStatement(Box<Expr>),

    /// `%name = <pattern-expr>`.
    PatternDefinition { name: String, right: Box<Expr> },

    /// `%name. { member: <pattern-expr>, ... }`.
    PatternNamespaceDefinition { name: String, members: Vec<(String, Box<Expr>)> },

    /// `@name = <url/host-expr>`.
    HostAliasDefinition { name: String, value: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElseBranch {
    ElseIf(Box<Stmt>),
    Else(Block),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub values: Vec<Expr>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    pub pattern: Box<Expr>,
    /// Local bound to the matched groups, if the pattern captures any.
    pub group_var: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForHead {
    /// `for k, v in <iterable>` (k optional).
    Range { key_var: Option<String>, value_var: String, iterable: Box<Expr> },
    /// C-style `for (init; cond; step)`.
    CStyle { init: Option<Box<Stmt>>, cond: Option<Box<Expr>>, step: Option<Box<Stmt>> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub type_annotation: Option<TypeAnnotation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeAnnotation {
    /// `*T` — pointer types are only legal on fields, params, and return
    /// positions (spec.md §4.4 "Struct definitions").
    pub pointer: bool,
    pub name: String,
}

// ---------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Identifier(String),
    GlobalIdentifier(String),
    SelfExpr,
    SendValExpr,

    BooleanLiteral(bool),
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    NilLiteral,

    /// `1h30mn`, `2x`, `50%` — sequence of (value, unit) pairs (spec.md
    /// §4.4 "Quantity & rate literals").
    QuantityLiteral(Vec<QuantityPart>),
    /// `<quantity>/<unit>`, e.g. `10x/s`, `1kB/s`.
    RateLiteral { quantity: Box<Expr>, divisor_unit: String },

    PathLiteral(String),
    PathPatternLiteral(String),
    URLLiteral(String),
    URLPatternLiteral(String),
    HostLiteral(String),
    HostPatternLiteral(String),
    SchemeLiteral(String),

    /// `%name`.
    PatternIdentifierLiteral(String),
    /// `%ns.member`.
    PatternNamespaceMemberExpr { namespace: String, member: String },

    ObjectLiteral(ObjectLiteral),
    RecordLiteral(ObjectLiteral),
    ListLiteral(Vec<Expr>),
    ObjectPatternLiteral(ObjectPatternLiteral),
    ListPatternLiteral(Vec<Expr>),

    /// `Mapping { ... }`.
    MappingExpression(Vec<MappingEntry>),

    FunctionExpression(FunctionExpr),

    CallExpression { callee: Box<Expr>, arguments: Vec<Expr> },
    MemberExpression { object: Box<Expr>, property: String, optional: bool },
    IndexExpression { object: Box<Expr>, index: Box<Expr> },
    SliceExpression { object: Box<Expr>, start: Option<Box<Expr>>, end: Option<Box<Expr>> },

    /// `go { meta... } do { ... }`.
    SpawnExpression { meta: Option<Box<Expr>>, module: Block },

    /// A lifetime job's embedded module; inherits the parent's globals,
    /// patterns, and pattern-namespaces (spec.md §4.4 "Lifetime-job
    /// expressions").
    LifetimeJobExpression { subject: Option<Box<Expr>>, meta: Option<Box<Expr>>, module: Block },

    /// `...(%p).{a, b}` extraction spread.
    ExtractionExpression { spread: Box<Expr>, keys: Vec<String> },

    BinaryExpression { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    UnaryExpression { op: UnaryOp, operand: Box<Expr> },

    /// Only valid on the right side of a dynamic `Mapping` entry.
    ComputeExpression(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantityPart {
    pub value: f64,
    pub unit: QuantityUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityUnit {
    Hour,
    Minute,
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
    Count,       // x
    LineCount,   // ln
    RuneCount,   // rn
    Byte,        // B
    Percent,     // %
}

impl QuantityUnit {
    /// Relative order for validating monotonically descending duration
    /// sequences (spec.md §4.4: `1s1h` is invalid, `1h1s` is fine).
    pub fn duration_rank(self) -> Option<u8> {
        match self {
            QuantityUnit::Hour => Some(0),
            QuantityUnit::Minute => Some(1),
            QuantityUnit::Second => Some(2),
            QuantityUnit::Millisecond => Some(3),
            QuantityUnit::Microsecond => Some(4),
            QuantityUnit::Nanosecond => Some(5),
            _ => None,
        }
    }

    pub fn is_duration(self) -> bool {
        self.duration_rank().is_some()
    }

    /// Size-like units (`x`, `ln`, `rn`, `B`) and `%` must appear alone
    /// and first.
    pub fn is_solitary(self) -> bool {
        !self.is_duration()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add, Sub, Mul, Div,
    Eq, Neq, Lt, Lte, Gt, Gte,
    And, Or,
    Range, ExclusiveRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKey {
    /// `{1, 2}` — implicit keys are the literal indices `"0"`, `"1"`, …
    Implicit(u32),
    Explicit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectProperty {
    pub key: PropertyKey,
    /// The textual key; for `Implicit` this is the stringified index.
    pub key_name: String,
    pub value: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetaProperty {
    /// `"_url_"` or `"_visibility_"`.
    pub name: String,
    pub value: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectLiteral {
    pub properties: Vec<ObjectProperty>,
    pub spread_elements: Vec<Expr>,
    pub meta_properties: Vec<MetaProperty>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtherPropsConstraint {
    /// No `otherprops(...)` clause: extra properties are tolerated.
    Unconstrained,
    /// `otherprops(no)` — exact pattern, no extra properties allowed.
    No,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectPatternLiteral {
    pub properties: Vec<ObjectProperty>,
    pub exact: bool,
    pub other_props: Option<OtherPropsConstraint>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MappingEntry {
    /// Static entry key must be a simple literal or a pattern
    /// identifier/namespace member (spec.md §4.4 "Mapping expressions").
    Static { key: Box<Expr>, value: Box<Expr> },
    /// Dynamic entry: `pattern key_var [, group_var] => value`.
    Dynamic { key_pattern: Box<Expr>, key_var: String, group_var: Option<String>, value: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub pattern: Option<Box<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpr {
    pub id: NodeId,
    pub span: Span,
    pub name: Option<String>,
    pub params: Vec<Param>,
    /// The `[a, b]` capture list; every name must already be a local.
    pub captured_vars: Vec<String>,
    pub body: Block,
    pub is_method: bool,
    pub return_type: Option<TypeAnnotation>,
}
