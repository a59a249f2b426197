//! Crate-wide error taxonomy (spec.md §7 "Errors").
//!
//! The preparation pipeline (C7) and the execution context (C3) each
//! produce their own typed errors; this module unifies them into the
//! single error type the CLI and embedding callers see, plus the
//! location-stack type inclusion/import errors carry.

use thiserror::Error;

use crate::args::ManifestArgError;
use crate::checker::StaticCheckError;
use crate::context::ContextError;
use crate::loader::LoadError;
use crate::manifest::PreinitError;
use crate::parser::ParseError;
use crate::source::SourcePosition;

/// One frame per inclusion/import hop: the deepest frame is where the
/// error actually occurred, each frame above it names the statement
/// that pulled in the chunk below (spec.md §4.4 "Inclusion vs import",
/// §8 end-to-end scenario "a single error with a two-frame location
/// stack").
pub type SourcePositionStack = Vec<SourcePosition>;

/// The nine error kinds spec.md §7 names, each carrying whatever
/// structured data its collaborator produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PermScriptError {
    #[error("{source}: {error}")]
    Parse { source: String, error: ParseError },

    #[error("{error}")]
    StaticCheck { error: StaticCheckError, stack: SourcePositionStack },

    #[error("preinit: {0}")]
    Preinit(PreinitError),

    #[error("{0}")]
    ManifestArg(ManifestArgError),

    /// The symbolic (type) checker is an external collaborator
    /// (spec.md §2); this variant only carries whatever message it
    /// chose to report.
    #[error("type error: {0}")]
    Symbolic(String),

    #[error(transparent)]
    NotAllowed(#[from] ContextError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}
