//! Process-wide configuration knobs for the preparation pipeline
//! (spec.md §4.5 "env" — allow-missing-env-vars, §4.5 "databases" —
//! the DB-resolution-data scheme registry).

use std::collections::HashSet;

/// Bundles the CLI-derived settings the pipeline and its collaborators
/// need, mirroring the shape of a `*Options` struct rather than
/// threading each knob through every call individually.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Treat an unset required env var as empty instead of a fatal
    /// preinit error — useful for `check` without a full environment.
    pub allow_missing_env_vars: bool,
    /// Schemes a `databases` section's `resource` may name (spec.md
    /// §4.5 "databases" "the scheme must be registered").
    pub db_scheme_registry: HashSet<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { allow_missing_env_vars: false, db_scheme_registry: HashSet::new() }
    }
}

impl RuntimeConfig {
    pub fn with_db_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.db_scheme_registry.insert(scheme.into());
        self
    }
}
