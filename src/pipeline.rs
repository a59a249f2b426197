//! Preparation Pipeline (C7).
//!
//! Orchestrates C6 (module loader) -> C5 (preinit evaluator) -> C3
//! (execution context) -> C4 (static checker), plus the
//! CLI-argument-to-module-argument conversion, and applies the error
//! priority order of spec.md §4.7 step 8: parsing errors, then preinit
//! errors, then symbolic errors, then static-check errors, then
//! argument errors.

use std::collections::HashSet;

use tracing::debug_span;

use crate::args::{bind_cli_args, ModuleArguments};
use crate::checker::{check_module, StaticCheckData};
use crate::config::RuntimeConfig;
use crate::context::{ChildContextOptions, ExecutionContext};
use crate::error::PermScriptError;
use crate::loader::{Module, ModuleLoader, SourceResolver};
use crate::manifest::{evaluate_preinit, Manifest};
use crate::symbolic::{NoopSymbolicChecker, SymbolicChecker, SymbolicCheckData};

use std::sync::Arc;

/// Everything the pipeline managed to construct before either
/// succeeding or hitting the first (highest-priority) error, matching
/// spec.md §4.7's "returns whichever of state and module have been
/// constructed so far".
pub struct PreparationOutput {
    pub module: Option<Arc<Module>>,
    pub manifest: Option<Manifest>,
    pub context: Option<ExecutionContext>,
    pub module_arguments: Option<ModuleArguments>,
    pub static_check: Option<StaticCheckData>,
    pub symbolic: Option<SymbolicCheckData>,
    pub error: Option<PermScriptError>,
}

impl PreparationOutput {
    fn failed(error: PermScriptError) -> Self {
        Self { module: None, manifest: None, context: None, module_arguments: None, static_check: None, symbolic: None, error: Some(error) }
    }
}

/// Drives the full pipeline for one top-level module (spec.md §4.7).
/// `parent` is `None` for a process's top-level invocation and `Some`
/// when preparing a spawned/imported child module that must derive its
/// context from an already-running one.
pub fn prepare(
    source_name: &str,
    resolver: &dyn SourceResolver,
    cli_args: &[String],
    config: &RuntimeConfig,
    parent: Option<&ExecutionContext>,
) -> PreparationOutput {
    prepare_with_symbolic_checker(source_name, resolver, cli_args, config, parent, &NoopSymbolicChecker)
}

pub fn prepare_with_symbolic_checker(
    source_name: &str,
    resolver: &dyn SourceResolver,
    cli_args: &[String],
    config: &RuntimeConfig,
    parent: Option<&ExecutionContext>,
    symbolic_checker: &dyn SymbolicChecker,
) -> PreparationOutput {
    let mut loader = ModuleLoader::new(resolver);
    let module = match loader.load(source_name) {
        Ok(m) => m,
        Err(e) => return PreparationOutput::failed(PermScriptError::Load(e)),
    };

    // Priority 1: parse errors, across the main chunk and every
    // inclusion (spec.md §4.7 step 8).
    if let Some((frame_name, parse_error)) = module.all_parse_errors().into_iter().next() {
        let mut out = PreparationOutput::failed(PermScriptError::Parse { source: frame_name.to_string(), error: parse_error.clone() });
        out.module = Some(module.clone());
        return out;
    }

    // Priority 2: preinit errors.
    let (manifest, preinit_state, _preinit_violations, preinit_error) = {
        let _span = debug_span!("preinit", module = source_name).entered();
        evaluate_preinit(&module.chunk, module.kind, &config.db_scheme_registry)
    };
    if let Some(err) = preinit_error {
        let mut out = PreparationOutput::failed(PermScriptError::Preinit(err));
        out.module = Some(module.clone());
        return out;
    }
    let manifest = manifest.expect("a None preinit_error always carries a manifest");

    let context = match parent {
        Some(parent_ctx) => {
            let opts = ChildContextOptions { permissions: manifest.permissions.clone(), ..Default::default() };
            match parent_ctx.new_child(opts) {
                Ok(c) => c,
                Err(e) => {
                    let mut out = PreparationOutput::failed(PermScriptError::NotAllowed(e));
                    out.module = Some(module.clone());
                    out.manifest = Some(manifest);
                    return out;
                }
            }
        }
        None => ExecutionContext::new(manifest.permissions.clone(), vec![], manifest.limits.clone()),
    };

    for (name, value) in &preinit_state.patterns {
        context.add_named_pattern(name.clone(), value.clone());
    }
    for (name, members) in &preinit_state.pattern_namespaces {
        context.add_pattern_namespace(name.clone(), members.clone());
    }
    for (name, value) in &preinit_state.host_aliases {
        context.add_host_alias(name.clone(), value.clone());
    }
    for (pattern, resolution) in &manifest.host_resolution {
        context.add_host_resolution(pattern.clone(), resolution.clone());
    }

    let arg_result = bind_cli_args(&manifest.parameters, cli_args);

    // Priority 3: symbolic errors, priority 4: static-check errors.
    let static_check = {
        let _span = debug_span!("static_check", module = source_name).entered();
        check_module(&module)
    };
    let globals = top_level_globals(&module.chunk);
    let symbolic = symbolic_checker.check(&module.chunk.chunk, &globals);

    if let Some(first) = symbolic.errors.first() {
        return PreparationOutput {
            module: Some(module),
            manifest: Some(manifest),
            context: Some(context),
            module_arguments: None,
            static_check: Some(static_check),
            symbolic: Some(symbolic.clone()),
            error: Some(PermScriptError::Symbolic(first.clone())),
        };
    }

    if let Some(first) = static_check.errors.first() {
        let stack = first.location_stack();
        let error = PermScriptError::StaticCheck { error: first.clone(), stack };
        return PreparationOutput {
            module: Some(module),
            manifest: Some(manifest),
            context: Some(context),
            module_arguments: None,
            static_check: Some(static_check),
            symbolic: Some(symbolic),
            error: Some(error),
        };
    }

    // Priority 5: argument errors.
    match arg_result {
        Ok(module_arguments) => PreparationOutput {
            module: Some(module),
            manifest: Some(manifest),
            context: Some(context),
            module_arguments: Some(module_arguments),
            static_check: Some(static_check),
            symbolic: Some(symbolic),
            error: None,
        },
        Err(e) => PreparationOutput {
            module: Some(module),
            manifest: Some(manifest),
            context: Some(context),
            module_arguments: None,
            static_check: Some(static_check),
            symbolic: Some(symbolic),
            error: Some(PermScriptError::ManifestArg(e)),
        },
    }
}

/// Top-level `$name = ...` assignments and function declarations,
/// handed to the symbolic checker as the globals snapshot it reasons
/// about (spec.md §2 "the captured-globals snapshot").
fn top_level_globals(source: &crate::source::ParsedChunkSource) -> HashSet<String> {
    use crate::ast::StmtKind;
    let mut globals = HashSet::new();
    for stmt in &source.chunk.statements {
        match &stmt.kind {
            StmtKind::GlobalVarAssignment { name, .. } => {
                globals.insert(name.clone());
            }
            StmtKind::FunctionDeclaration(f) => {
                if let Some(name) = &f.name {
                    globals.insert(name.clone());
                }
            }
            _ => {}
        }
    }
    globals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MapResolver;

    #[test]
    fn successful_preparation_yields_no_error() {
        let resolver = MapResolver::new().with("main.ix", "manifest {}\nx = 1\n");
        let config = RuntimeConfig::default();
        let out = prepare("main.ix", &resolver, &[], &config, None);
        assert!(out.error.is_none());
        assert!(out.context.is_some());
        assert!(out.module_arguments.is_some());
    }

    #[test]
    fn parse_error_takes_priority_over_everything_else() {
        let resolver = MapResolver::new().with("main.ix", "manifest {\n");
        let config = RuntimeConfig::default();
        let out = prepare("main.ix", &resolver, &[], &config, None);
        assert!(matches!(out.error, Some(PermScriptError::Parse { .. })));
    }

    #[test]
    fn missing_required_parameter_is_reported_as_argument_error() {
        let resolver = MapResolver::new().with(
            "main.ix",
            "manifest {\nparameters: { src: { pattern: \"str\" } }\n}\n",
        );
        let config = RuntimeConfig::default();
        let out = prepare("main.ix", &resolver, &[], &config, None);
        assert!(matches!(out.error, Some(PermScriptError::ManifestArg(_))));
    }
}
