//! Manifest section validators (spec.md §4.5).
//!
//! Each section of the `manifest { ... }` object literal is validated
//! against the node kinds it allows, then lowered into a field of
//! [`super::Manifest`]. Section-to-module-kind compatibility is checked
//! by the caller (`evaluate_preinit`) before `build_manifest` runs.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::ast::*;
use crate::permission::{DepletionPolicy, Limit, MinorCapability, PathPattern, Permission, PermissionKind, PermissionTarget};

use super::{render_preinit_value, EnvVarSpec, Manifest, PreinitError};

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSpec {
    /// Implicit-key descriptor, contiguous at the top of the section
    /// (spec.md §4.5 "parameters").
    Positional { name: String, pattern: String, description: Option<String>, rest: bool },
    /// Explicit-key descriptor.
    NonPositional { key: String, pattern: String, default: Option<String>, char_name: Option<String>, description: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionData {
    Nil,
    Host(String),
    Path(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSpec {
    pub name: String,
    pub resource: String,
    pub resolution_data: ResolutionData,
    pub expected_schema_update: bool,
    /// Pattern identifier or object-pattern rendering; absent is legal
    /// even alongside `expected_schema_update: true` (spec.md §9 "Open
    /// question").
    pub assert_schema: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationSpec {
    pub entries: IndexMap<String, String>,
}

const KNOWN_SECTIONS: &[&str] =
    &["kind", "permissions", "limits", "env", "parameters", "databases", "host-resolution", "preinit-files", "invocation"];

pub fn build_manifest(obj: &ObjectLiteral, kind: ModuleKind, db_scheme_registry: &HashSet<String>) -> Result<Manifest, PreinitError> {
    let mut manifest = Manifest { kind, ..Manifest::default() };
    for prop in &obj.properties {
        if !KNOWN_SECTIONS.contains(&prop.key_name.as_str()) {
            return Err(PreinitError::InvalidSectionShape("manifest", format!("unknown section '{}'", prop.key_name)));
        }
        match prop.key_name.as_str() {
            "kind" => validate_kind_value(&prop.value)?,
            "permissions" => manifest.permissions = build_permissions(&prop.value)?,
            "limits" => manifest.limits = build_limits(&prop.value)?,
            "env" => manifest.env = build_env(&prop.value)?,
            "parameters" => manifest.parameters = build_parameters(&prop.value)?,
            "databases" => manifest.databases = build_databases(&prop.value, db_scheme_registry)?,
            "host-resolution" => manifest.host_resolution = build_host_resolution(&prop.value)?,
            "preinit-files" => manifest.preinit_files = build_preinit_files(&prop.value)?,
            "invocation" => manifest.invocation = Some(build_invocation(&prop.value)?),
            _ => unreachable!("filtered by KNOWN_SECTIONS above"),
        }
    }
    Ok(manifest)
}

fn as_object<'a>(e: &'a Expr, section: &'static str) -> Result<&'a ObjectLiteral, PreinitError> {
    match &e.kind {
        ExprKind::ObjectLiteral(o) | ExprKind::RecordLiteral(o) => Ok(o),
        _ => Err(PreinitError::InvalidSectionShape(section, "expected an object literal".into())),
    }
}

fn find_prop<'a>(obj: &'a ObjectLiteral, key: &str) -> Option<&'a Expr> {
    obj.properties.iter().find(|p| p.key_name == key).map(|p| p.value.as_ref())
}

fn find_rendered_prop(obj: &ObjectLiteral, key: &str) -> Option<String> {
    find_prop(obj, key).and_then(render_preinit_value)
}

fn find_string_prop(obj: &ObjectLiteral, key: &str) -> Option<String> {
    find_prop(obj, key).and_then(|e| match &e.kind {
        ExprKind::StringLiteral(s) | ExprKind::Identifier(s) => Some(s.clone()),
        _ => None,
    })
}

fn find_bool_prop(obj: &ObjectLiteral, key: &str) -> Option<bool> {
    find_prop(obj, key).and_then(|e| match &e.kind {
        ExprKind::BooleanLiteral(b) => Some(*b),
        _ => None,
    })
}

fn validate_kind_value(e: &Expr) -> Result<(), PreinitError> {
    if render_preinit_value(e).is_none() {
        return Err(PreinitError::InvalidSectionShape("kind", "expected a simple value".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------
// permissions
// ---------------------------------------------------------------------

fn build_permissions(e: &Expr) -> Result<Vec<Permission>, PreinitError> {
    let obj = as_object(e, "permissions")?;
    let mut result = Vec::new();
    for prop in &obj.properties {
        if matches!(prop.key, PropertyKey::Implicit(_)) {
            return Err(PreinitError::ImplicitKeyNotAllowed("permissions"));
        }
        let kind = parse_permission_kind(&prop.key_name)?;
        match &prop.value.kind {
            ExprKind::ListLiteral(items) => {
                for item in items {
                    result.push(build_permission_item(kind, item)?);
                }
            }
            _ => result.push(build_permission_item(kind, &prop.value)?),
        }
    }
    Ok(result)
}

fn parse_permission_kind(name: &str) -> Result<PermissionKind, PreinitError> {
    match name {
        "read" => Ok(PermissionKind::Read),
        "write" => Ok(PermissionKind::Write),
        "delete" => Ok(PermissionKind::Delete),
        "use" => Ok(PermissionKind::Use),
        "create" => Ok(PermissionKind::Create),
        "provide" => Ok(PermissionKind::Provide),
        "update" => Ok(PermissionKind::Update),
        other => Err(PreinitError::InvalidSectionShape("permissions", format!("unknown permission kind '{other}'"))),
    }
}

/// A pattern identifier's concrete value is only known once preinit
/// hydration runs (§4.5); the permission it grants is rendered with the
/// pattern's own name as its target text and resolved against the
/// context's pattern registry at grant time. See DESIGN.md, "permission
/// items referencing a pattern identifier".
fn build_permission_item(kind: PermissionKind, item: &Expr) -> Result<Permission, PreinitError> {
    match &item.kind {
        ExprKind::PathLiteral(p) => Ok(Permission::new(kind, PermissionTarget::Path(p.clone()))),
        ExprKind::PathPatternLiteral(p) => PathPattern::parse(p)
            .map(|pp| Permission::new(kind, PermissionTarget::PathPattern(pp)))
            .ok_or_else(|| PreinitError::InvalidSectionShape("permissions", format!("invalid path pattern '{p}'"))),
        ExprKind::URLLiteral(u) => Ok(Permission::new(kind, PermissionTarget::Url(u.clone()))),
        ExprKind::URLPatternLiteral(u) => crate::permission::UrlPattern::parse(u)
            .map(|up| Permission::new(kind, PermissionTarget::UrlPattern(up)))
            .ok_or_else(|| PreinitError::InvalidSectionShape("permissions", format!("invalid URL pattern '{u}'"))),
        ExprKind::HostLiteral(h) => Ok(Permission::new(kind, PermissionTarget::Host(h.clone()))),
        ExprKind::HostPatternLiteral(h) => crate::permission::HostPattern::parse(h)
            .map(|hp| Permission::new(kind, PermissionTarget::HostPattern(hp)))
            .ok_or_else(|| PreinitError::InvalidSectionShape("permissions", format!("invalid host pattern '{h}'"))),
        ExprKind::SchemeLiteral(s) => Ok(Permission::new(kind, PermissionTarget::Scheme(s.clone()))),
        ExprKind::GlobalIdentifier(g) => Ok(Permission::new(kind, PermissionTarget::GlobalVar(g.clone()))),
        ExprKind::PatternIdentifierLiteral(name) => Ok(Permission::new(kind, PermissionTarget::Path(format!("%{name}")))),
        ExprKind::ObjectLiteral(obj) | ExprKind::RecordLiteral(obj) => obj
            .properties
            .first()
            .and_then(|p| MinorCapability::from_name(&p.key_name))
            .map(|cap| Permission::new(kind, PermissionTarget::Capability(cap)))
            .ok_or_else(|| PreinitError::UnknownCapabilityName("<empty capability object>".into())),
        _ => Err(PreinitError::InvalidSectionShape("permissions", "expected a path/URL/host/scheme/global or typed capability".into())),
    }
}

// ---------------------------------------------------------------------
// limits
// ---------------------------------------------------------------------

fn build_limits(e: &Expr) -> Result<Vec<Limit>, PreinitError> {
    let obj = as_object(e, "limits")?;
    let mut limits = Vec::new();
    for prop in &obj.properties {
        if matches!(prop.key, PropertyKey::Implicit(_)) {
            return Err(PreinitError::ImplicitKeyNotAllowed("limits"));
        }
        let (policy, value) = limit_value(&prop.value)?;
        limits.push(Limit::new(prop.key_name.clone(), policy, value));
    }
    Ok(limits)
}

/// A rate literal (`<qty>/s`) is a byte-rate limit when its dividend is
/// in bytes, a simple-rate limit otherwise; a bare quantity is a
/// non-replenishing total; a bare integer is a never-consumed hard cap
/// (spec.md §3 "Limit"). This mapping is an implementer's choice where
/// the spec leaves the manifest encoding unspecified.
fn limit_value(e: &Expr) -> Result<(DepletionPolicy, u64), PreinitError> {
    match &e.kind {
        ExprKind::RateLiteral { quantity, .. } => {
            let (_, value) = limit_value(quantity)?;
            let is_bytes = matches!(&quantity.kind, ExprKind::QuantityLiteral(parts) if parts.iter().any(|p| p.unit == QuantityUnit::Byte));
            let policy = if is_bytes { DepletionPolicy::ByteRate } else { DepletionPolicy::SimpleRate };
            Ok((policy, value))
        }
        ExprKind::QuantityLiteral(parts) => Ok((DepletionPolicy::Total, quantity_to_base_units(parts))),
        ExprKind::IntLiteral(i) if *i >= 0 => Ok((DepletionPolicy::NotDecrementing, *i as u64)),
        _ => Err(PreinitError::InvalidSectionShape("limits", "expected a quantity or rate literal".into())),
    }
}

fn quantity_to_base_units(parts: &[QuantityPart]) -> u64 {
    parts.iter().map(|p| (p.value * unit_scale(p.unit)) as u64).sum()
}

fn unit_scale(unit: QuantityUnit) -> f64 {
    match unit {
        QuantityUnit::Hour => 3_600_000_000_000.0,
        QuantityUnit::Minute => 60_000_000_000.0,
        QuantityUnit::Second => 1_000_000_000.0,
        QuantityUnit::Millisecond => 1_000_000.0,
        QuantityUnit::Microsecond => 1_000.0,
        QuantityUnit::Nanosecond => 1.0,
        QuantityUnit::Count | QuantityUnit::LineCount | QuantityUnit::RuneCount | QuantityUnit::Byte | QuantityUnit::Percent => 1.0,
    }
}

// ---------------------------------------------------------------------
// env
// ---------------------------------------------------------------------

fn build_env(e: &Expr) -> Result<IndexMap<String, EnvVarSpec>, PreinitError> {
    let obj = as_object(e, "env")?;
    let mut env = IndexMap::new();
    for prop in &obj.properties {
        if matches!(prop.key, PropertyKey::Implicit(_)) {
            return Err(PreinitError::ImplicitKeyNotAllowed("env"));
        }
        let spec = match &prop.value.kind {
            ExprKind::NilLiteral => EnvVarSpec { required: true, default: None },
            ExprKind::ObjectLiteral(desc) | ExprKind::RecordLiteral(desc) => EnvVarSpec {
                required: find_bool_prop(desc, "required").unwrap_or(find_rendered_prop(desc, "default").is_none()),
                default: find_rendered_prop(desc, "default"),
            },
            _ => EnvVarSpec {
                required: false,
                default: Some(render_preinit_value(&prop.value).ok_or_else(|| {
                    PreinitError::InvalidSectionShape("env", format!("invalid value for '{}'", prop.key_name))
                })?),
            },
        };
        env.insert(prop.key_name.clone(), spec);
    }
    Ok(env)
}

// ---------------------------------------------------------------------
// parameters
// ---------------------------------------------------------------------

fn build_parameters(e: &Expr) -> Result<Vec<ParameterSpec>, PreinitError> {
    let obj = as_object(e, "parameters")?;
    let mut params = Vec::new();
    let mut seen_non_positional = false;
    for prop in &obj.properties {
        let desc = as_object(&prop.value, "parameters")?;
        match prop.key {
            PropertyKey::Implicit(_) => {
                if seen_non_positional {
                    return Err(PreinitError::InvalidSectionShape(
                        "parameters",
                        "positional parameters must be contiguous at the top".into(),
                    ));
                }
                let name = find_string_prop(desc, "name").ok_or(PreinitError::MissingRequiredKey("parameters", "name"))?;
                let pattern =
                    find_rendered_prop(desc, "pattern").ok_or(PreinitError::MissingRequiredKey("parameters", "pattern"))?;
                params.push(ParameterSpec::Positional {
                    name,
                    pattern,
                    description: find_string_prop(desc, "description"),
                    rest: find_bool_prop(desc, "rest").unwrap_or(false),
                });
            }
            PropertyKey::Explicit => {
                seen_non_positional = true;
                let pattern =
                    find_rendered_prop(desc, "pattern").ok_or(PreinitError::MissingRequiredKey("parameters", "pattern"))?;
                params.push(ParameterSpec::NonPositional {
                    key: prop.key_name.clone(),
                    pattern,
                    default: find_rendered_prop(desc, "default"),
                    char_name: find_string_prop(desc, "char-name"),
                    description: find_string_prop(desc, "description"),
                });
            }
        }
    }
    Ok(params)
}

// ---------------------------------------------------------------------
// databases
// ---------------------------------------------------------------------

fn build_databases(e: &Expr, registry: &HashSet<String>) -> Result<Vec<DatabaseSpec>, PreinitError> {
    let obj = as_object(e, "databases")?;
    let mut dbs = Vec::new();
    for prop in &obj.properties {
        if matches!(prop.key, PropertyKey::Implicit(_)) {
            return Err(PreinitError::ImplicitKeyNotAllowed("databases"));
        }
        let desc = as_object(&prop.value, "databases")?;
        let resource =
            find_rendered_prop(desc, "resource").ok_or(PreinitError::MissingRequiredKey("databases", "resource"))?;
        let scheme = resource.split("://").next().unwrap_or("").to_string();
        if !registry.contains(&scheme) {
            return Err(PreinitError::UnregisteredDbScheme(scheme));
        }
        let resolution_data = match find_prop(desc, "resolution-data") {
            None => ResolutionData::Nil,
            Some(v) => resolution_data_from_expr(v)?,
        };
        dbs.push(DatabaseSpec {
            name: prop.key_name.clone(),
            resource,
            resolution_data,
            // §9 "Open question": no error is raised when this is true
            // and `assert_schema` is absent — specified behavior.
            expected_schema_update: find_bool_prop(desc, "expected-schema-update").unwrap_or(false),
            assert_schema: find_rendered_prop(desc, "assert-schema"),
        });
    }
    Ok(dbs)
}

fn resolution_data_from_expr(e: &Expr) -> Result<ResolutionData, PreinitError> {
    match &e.kind {
        ExprKind::NilLiteral => Ok(ResolutionData::Nil),
        ExprKind::HostLiteral(h) => Ok(ResolutionData::Host(h.clone())),
        ExprKind::PathLiteral(p) => Ok(ResolutionData::Path(p.clone())),
        _ => Err(PreinitError::InvalidSectionShape("databases", "resolution-data must be nil, a host, or a path".into())),
    }
}

// ---------------------------------------------------------------------
// host-resolution / preinit-files / invocation
// ---------------------------------------------------------------------

fn build_host_resolution(e: &Expr) -> Result<IndexMap<String, String>, PreinitError> {
    let obj = as_object(e, "host-resolution")?;
    let mut map = IndexMap::new();
    for prop in &obj.properties {
        if matches!(prop.key, PropertyKey::Implicit(_)) {
            return Err(PreinitError::ImplicitKeyNotAllowed("host-resolution"));
        }
        let value = render_preinit_value(&prop.value)
            .ok_or_else(|| PreinitError::InvalidSectionShape("host-resolution", format!("invalid value for '{}'", prop.key_name)))?;
        map.insert(prop.key_name.clone(), value);
    }
    Ok(map)
}

fn build_preinit_files(e: &Expr) -> Result<Vec<String>, PreinitError> {
    let items: Vec<&Expr> = match &e.kind {
        ExprKind::ListLiteral(items) => items.iter().collect(),
        ExprKind::ObjectLiteral(obj) | ExprKind::RecordLiteral(obj) => obj.properties.iter().map(|p| p.value.as_ref()).collect(),
        _ => return Err(PreinitError::InvalidSectionShape("preinit-files", "expected a list or object of path literals".into())),
    };
    items
        .into_iter()
        .map(|item| render_preinit_value(item).ok_or_else(|| PreinitError::InvalidSectionShape("preinit-files", "expected a path literal".into())))
        .collect()
}

fn build_invocation(e: &Expr) -> Result<InvocationSpec, PreinitError> {
    let obj = as_object(e, "invocation")?;
    let mut entries = IndexMap::new();
    for prop in &obj.properties {
        if matches!(prop.key, PropertyKey::Implicit(_)) {
            return Err(PreinitError::ImplicitKeyNotAllowed("invocation"));
        }
        let value = render_preinit_value(&prop.value)
            .ok_or_else(|| PreinitError::InvalidSectionShape("invocation", format!("invalid value for '{}'", prop.key_name)))?;
        entries.insert(prop.key_name.clone(), value);
    }
    Ok(InvocationSpec { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ParsedChunkSource;

    fn manifest_obj(src: &str) -> (ParsedChunkSource, Span) {
        let source = ParsedChunkSource::new("m.ix", src);
        let span = source
            .chunk
            .statements
            .iter()
            .find_map(|s| match &s.kind {
                StmtKind::ManifestStatement(e) => Some(e.span),
                _ => None,
            })
            .unwrap();
        (source, span)
    }

    fn find_manifest_expr(source: &ParsedChunkSource) -> &Expr {
        source
            .chunk
            .statements
            .iter()
            .find_map(|s| match &s.kind {
                StmtKind::ManifestStatement(e) => Some(e.as_ref()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn permissions_section_builds_path_permission() {
        let (source, _) = manifest_obj("manifest {\npermissions: { read: /tmp/... }\n}\n");
        let e = find_manifest_expr(&source);
        let obj = as_object(e, "manifest").unwrap();
        let manifest = build_manifest(obj, ModuleKind::TopLevel, &HashSet::new()).unwrap();
        assert_eq!(manifest.permissions.len(), 1);
        assert_eq!(manifest.permissions[0].kind, PermissionKind::Read);
    }

    #[test]
    fn limits_section_recognizes_rate_literal_as_byte_rate() {
        let (source, _) = manifest_obj("manifest {\nlimits: { bandwidth: 10B/s }\n}\n");
        let e = find_manifest_expr(&source);
        let obj = as_object(e, "manifest").unwrap();
        let manifest = build_manifest(obj, ModuleKind::TopLevel, &HashSet::new()).unwrap();
        assert_eq!(manifest.limits[0].policy, DepletionPolicy::ByteRate);
    }

    #[test]
    fn databases_section_rejects_unregistered_scheme() {
        let (source, _) = manifest_obj("manifest {\ndatabases: { main: { resource: db://host } }\n}\n");
        let e = find_manifest_expr(&source);
        let obj = as_object(e, "manifest").unwrap();
        let result = build_manifest(obj, ModuleKind::TopLevel, &HashSet::new());
        assert!(matches!(result, Err(PreinitError::UnregisteredDbScheme(_))));
    }

    #[test]
    fn unknown_section_is_rejected() {
        let (source, _) = manifest_obj("manifest {\nbogus: 1\n}\n");
        let e = find_manifest_expr(&source);
        let obj = as_object(e, "manifest").unwrap();
        let result = build_manifest(obj, ModuleKind::TopLevel, &HashSet::new());
        assert!(result.is_err());
    }
}
