//! Rendering of location-carrying errors to human text (spec.md §7
//! "User-visible behavior": "errors render with file:line:col and a
//! readable message").

use crate::error::{PermScriptError, SourcePositionStack};
use crate::source::SourcePosition;

fn render_position(p: &SourcePosition) -> String {
    format!("{}:{}:{}", p.name, p.start_line, p.start_col)
}

/// One-line rendering suitable for stderr.
pub fn render(error: &PermScriptError) -> String {
    match error {
        PermScriptError::Parse { source, error } => format!("{source}: {error}"),
        PermScriptError::StaticCheck { error, stack } => match stack.first() {
            Some(pos) => format!("{}: {}", render_position(pos), error.kind),
            None => error.kind.to_string(),
        },
        PermScriptError::Preinit(e) => format!("preinit: {e}"),
        PermScriptError::ManifestArg(e) => e.to_string(),
        PermScriptError::Symbolic(msg) => format!("type error: {msg}"),
        PermScriptError::NotAllowed(e) => e.to_string(),
        PermScriptError::Load(e) => e.to_string(),
        PermScriptError::NotImplemented(what) => format!("not implemented: {what}"),
    }
}

/// Multi-frame rendering for errors that carry an inclusion/import
/// location stack, deepest frame first (spec.md §8 "a single error
/// with a two-frame location stack").
pub fn render_stack(stack: &SourcePositionStack) -> String {
    stack.iter().map(|p| format!("  at {}", render_position(p))).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{StaticCheckError, StaticCheckErrorKind};
    use crate::source::ParsedChunkSource;

    #[test]
    fn renders_static_check_error_with_position() {
        let source = ParsedChunkSource::new("m.ix", "x = 1\n");
        let position = source.source_position(crate::ast::Span::new(0, 1));
        let err = PermScriptError::StaticCheck {
            error: StaticCheckError { kind: StaticCheckErrorKind::BreakOutsideLoop, position: position.clone(), extra_frames: Vec::new() },
            stack: vec![position],
        };
        assert!(render(&err).starts_with("m.ix:1:1"));
    }

    #[test]
    fn render_stack_lists_every_frame() {
        let source = ParsedChunkSource::new("m.ix", "x = 1\n");
        let position = source.source_position(crate::ast::Span::new(0, 1));
        let stack = vec![position.clone(), position];
        assert_eq!(render_stack(&stack).lines().count(), 2);
    }
}
