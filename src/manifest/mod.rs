//! Preinit Evaluator (C5).
//!
//! Executes a module's `preinit { ... }` block under a restricted
//! whitelist AST walk, then validates its `manifest { ... }` object
//! section by section (spec.md §4.5).

mod sections;

pub use sections::{DatabaseSpec, InvocationSpec, ParameterSpec, ResolutionData};

use std::collections::HashSet;

use indexmap::IndexMap;
use thiserror::Error;

use crate::ast::*;
use crate::permission::{Limit, Permission};
use crate::source::ParsedChunkSource;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreinitError {
    #[error("preinit block contains a disallowed construct: {0}")]
    DisallowedPreinitConstruct(&'static str),
    #[error("section '{0}' is not legal for a {1} module")]
    SectionNotAllowedForKind(String, String),
    #[error("manifest section '{0}' is missing required key '{1}'")]
    MissingRequiredKey(&'static str, &'static str),
    #[error("manifest section '{0}' has an invalid shape: {1}")]
    InvalidSectionShape(&'static str, String),
    #[error("database resource scheme '{0}' is not registered in the DB-resolution-data registry")]
    UnregisteredDbScheme(String),
    #[error("manifest section '{0}' requires named keys; found an implicit-index entry")]
    ImplicitKeyNotAllowed(&'static str),
    #[error("unrecognized typed-capability name '{0}' in permissions section")]
    UnknownCapabilityName(String),
}

/// Patterns/host-aliases hydrated by preinit, to be copied into the
/// execution context once it is constructed (spec.md §4.5, §4.7 step 4).
#[derive(Debug, Default, Clone)]
pub struct PreinitState {
    pub patterns: IndexMap<String, String>,
    pub pattern_namespaces: IndexMap<String, IndexMap<String, String>>,
    pub host_aliases: IndexMap<String, String>,
}

/// The validated `manifest { ... }` object (spec.md §3 "Manifest").
/// Immutable once produced.
#[derive(Debug, Default, Clone)]
pub struct Manifest {
    pub kind: ModuleKind,
    pub permissions: Vec<Permission>,
    pub limits: Vec<Limit>,
    pub env: IndexMap<String, EnvVarSpec>,
    pub parameters: Vec<ParameterSpec>,
    pub databases: Vec<DatabaseSpec>,
    pub host_resolution: IndexMap<String, String>,
    pub preinit_files: Vec<String>,
    pub invocation: Option<InvocationSpec>,
}

impl Default for ModuleKind {
    fn default() -> Self {
        ModuleKind::TopLevel
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvVarSpec {
    pub required: bool,
    pub default: Option<String>,
}

/// Sections forbidden on every embedded module kind (spec.md §3
/// "Manifest").
const EMBEDDED_FORBIDDEN_SECTIONS: &[&str] = &["parameters", "env", "databases", "preinit-files", "invocation"];

/// Run preinit and validate the manifest object for one chunk
/// (spec.md §4.5). Returns the manifest (absent if a fatal structural
/// error occurred), the hydrated preinit state, whitelist-violation
/// errors collected along the way, and a single possibly-absent fatal
/// evaluation error.
pub fn evaluate_preinit(
    source: &ParsedChunkSource,
    kind: ModuleKind,
    db_scheme_registry: &HashSet<String>,
) -> (Option<Manifest>, PreinitState, Vec<PreinitError>, Option<PreinitError>) {
    let mut errors = Vec::new();
    let mut state = PreinitState::default();

    for stmt in &source.chunk.statements {
        if let StmtKind::PreinitStatement(block) = &stmt.kind {
            walk_preinit_block(block, &mut state, &mut errors);
        }
    }

    let manifest_obj = source.chunk.statements.iter().find_map(|stmt| match &stmt.kind {
        StmtKind::ManifestStatement(obj) => Some(obj.as_ref()),
        _ => None,
    });

    let Some(manifest_obj) = manifest_obj else {
        return (Some(Manifest { kind, ..Manifest::default() }), state, errors, None);
    };

    let ExprKind::ObjectLiteral(obj) = &manifest_obj.kind else {
        return (None, state, errors, Some(PreinitError::InvalidSectionShape("manifest", "expected an object literal".into())));
    };

    if kind.is_embedded() {
        for prop in &obj.properties {
            if EMBEDDED_FORBIDDEN_SECTIONS.contains(&prop.key_name.as_str()) {
                return (
                    None,
                    state,
                    errors,
                    Some(PreinitError::SectionNotAllowedForKind(prop.key_name.clone(), kind.to_string())),
                );
            }
        }
    }

    match sections::build_manifest(obj, kind, db_scheme_registry) {
        Ok(manifest) => (Some(manifest), state, errors, None),
        Err(fatal) => (None, state, errors, Some(fatal)),
    }
}

/// Only pattern/pattern-namespace/host-alias definitions, pattern-only
/// inclusion imports, and simple value/URL/identifier expressions are
/// legal inside `preinit { ... }` (spec.md §4.5).
fn walk_preinit_block(block: &Block, state: &mut PreinitState, errors: &mut Vec<PreinitError>) {
    for stmt in &block.statements {
        match &stmt.kind {
            StmtKind::PatternDefinition { name, right } => {
                if let Some(rendered) = render_preinit_value(right) {
                    state.patterns.insert(name.clone(), rendered);
                } else {
                    errors.push(PreinitError::DisallowedPreinitConstruct("pattern definition value"));
                }
            }
            StmtKind::PatternNamespaceDefinition { name, members } => {
                let mut ns = IndexMap::new();
                for (member_name, expr) in members {
                    match render_preinit_value(expr) {
                        Some(rendered) => {
                            ns.insert(member_name.clone(), rendered);
                        }
                        None => errors.push(PreinitError::DisallowedPreinitConstruct("pattern-namespace member value")),
                    }
                }
                state.pattern_namespaces.insert(name.clone(), ns);
            }
            StmtKind::HostAliasDefinition { name, value } => {
                if let Some(rendered) = render_preinit_value(value) {
                    state.host_aliases.insert(name.clone(), rendered);
                } else {
                    errors.push(PreinitError::DisallowedPreinitConstruct("host-alias value"));
                }
            }
            StmtKind::InclusionImportStatement { .. } => {
                // A pattern-only includable chunk is re-checked against
                // this same whitelist (plus IncludableChunkDescription)
                // when the loader (C6) resolves and parses it; here we
                // only accept the statement shape itself.
            }
            StmtKind::Expr(e) => {
                if render_preinit_value(e).is_none() {
                    errors.push(PreinitError::DisallowedPreinitConstruct("expression statement"));
                }
            }
            _ => errors.push(PreinitError::DisallowedPreinitConstruct("statement kind")),
        }
    }
}

/// Renders a preinit-legal expression to its canonical string form, or
/// `None` if the expression uses a construct outside the whitelist
/// (calls, control flow, mappings, spawn/lifetime-job, …).
pub(crate) fn render_preinit_value(e: &Expr) -> Option<String> {
    match &e.kind {
        ExprKind::Identifier(s) | ExprKind::GlobalIdentifier(s) => Some(s.clone()),
        ExprKind::StringLiteral(s) => Some(s.clone()),
        ExprKind::PathLiteral(s)
        | ExprKind::PathPatternLiteral(s)
        | ExprKind::URLLiteral(s)
        | ExprKind::URLPatternLiteral(s)
        | ExprKind::HostLiteral(s)
        | ExprKind::HostPatternLiteral(s)
        | ExprKind::SchemeLiteral(s) => Some(s.clone()),
        ExprKind::BooleanLiteral(b) => Some(b.to_string()),
        ExprKind::IntLiteral(i) => Some(i.to_string()),
        ExprKind::FloatLiteral(f) => Some(f.to_string()),
        ExprKind::NilLiteral => Some("nil".to_string()),
        ExprKind::PatternIdentifierLiteral(name) => Some(format!("%{name}")),
        ExprKind::PatternNamespaceMemberExpr { namespace, member } => Some(format!("%{namespace}.{member}")),
        ExprKind::MemberExpression { object, property, .. } => {
            render_preinit_value(object).map(|base| format!("{base}.{property}"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_source(text: &str) -> ParsedChunkSource {
        ParsedChunkSource::new("m.ix", text)
    }

    #[test]
    fn preinit_registers_pattern_definitions() {
        let source = chunk_source("preinit {\n%p = /home/...\n}\n");
        let (_, state, errors, fatal) = evaluate_preinit(&source, ModuleKind::TopLevel, &HashSet::new());
        assert!(errors.is_empty());
        assert!(fatal.is_none());
        assert_eq!(state.patterns.get("p"), Some(&"/home/...".to_string()));
    }

    #[test]
    fn preinit_rejects_call_expression() {
        let source = chunk_source("preinit {\nfoo()\n}\n");
        let (_, _, errors, _) = evaluate_preinit(&source, ModuleKind::TopLevel, &HashSet::new());
        assert!(!errors.is_empty());
    }

    #[test]
    fn embedded_kind_forbids_parameters_section() {
        let source = chunk_source("manifest {\nparameters: {}\n}\n");
        let (manifest, _, _, fatal) = evaluate_preinit(&source, ModuleKind::LifetimeJob, &HashSet::new());
        assert!(manifest.is_none());
        assert!(matches!(fatal, Some(PreinitError::SectionNotAllowedForKind(_, _))));
    }

    #[test]
    fn missing_manifest_object_yields_empty_manifest() {
        let source = chunk_source("x = 1\n");
        let (manifest, _, errors, fatal) = evaluate_preinit(&source, ModuleKind::TopLevel, &HashSet::new());
        assert!(manifest.is_some());
        assert!(errors.is_empty());
        assert!(fatal.is_none());
    }
}
