//! permscript - module lifecycle runtime for a permission-oriented
//! scripting language.
//!
//! Parses a chunk of source, statically checks it, evaluates its
//! manifest's preinit block, and produces a capability-scoped
//! execution context ready to run the chunk's body.

pub mod args;
pub mod ast;
pub mod checker;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod fs;
pub mod loader;
pub mod manifest;
pub mod parser;
pub mod permission;
pub mod pipeline;
pub mod source;
pub mod symbolic;

pub use args::{bind_cli_args, ArgValue, ManifestArgError, ModuleArguments};
pub use checker::{check_chunk, check_module, ClosestModule, StaticCheckData, StaticCheckError, StaticCheckErrorKind};
pub use config::RuntimeConfig;
pub use context::{ChildContextOptions, ContextError, ExecutionContext, Transaction, TransactionOutcome};
pub use error::{PermScriptError, SourcePositionStack};
pub use fs::{FileSystem, FsError, InMemoryFs};
pub use loader::{IncludedChunk, LoadError, MapResolver, Module, ModuleLoader, SourceResolver};
pub use manifest::{
    evaluate_preinit, DatabaseSpec, EnvVarSpec, InvocationSpec, Manifest, ParameterSpec, PreinitError, PreinitState,
    ResolutionData,
};
pub use parser::{lex, parse, ParseError, Parser, Token, TokenKind};
pub use permission::{
    DepletionPolicy, HostPattern, Limit, LimitError, MinorCapability, PathPattern, Permission, PermissionKind,
    PermissionSet, PermissionTarget, UrlPattern,
};
pub use pipeline::{prepare, prepare_with_symbolic_checker, PreparationOutput};
pub use source::{AnyNodeRef, ParsedChunkSource, SourcePosition};
pub use symbolic::{NoopSymbolicChecker, SymbolicCheckData, SymbolicChecker};
