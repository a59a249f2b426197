//! Permission Algebra (C2).
//!
//! Permissions are (kind, target) pairs. `covers` is the policy decision
//! primitive; `intersect` and `drop` support forbidden-permission
//! refinement and post-init privilege reduction (spec.md §4.2).

mod limit;
mod pattern;

pub use limit::{DepletionPolicy, Limit, LimitError};
pub use pattern::{HostPattern, PathPattern, UrlPattern};

use std::fmt;

/// The seven major permission kinds (spec.md §3 "Permission").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionKind {
    Read,
    Write,
    Delete,
    Use,
    Create,
    Provide,
    Update,
}

impl PermissionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionKind::Read => "read",
            PermissionKind::Write => "write",
            PermissionKind::Delete => "delete",
            PermissionKind::Use => "use",
            PermissionKind::Create => "create",
            PermissionKind::Provide => "provide",
            PermissionKind::Update => "update",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Minor sub-kinds, only meaningful for the non-resource capability
/// targets (threads, globals, system-graph, commands, values, custom).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MinorCapability {
    Dns,
    Tcp,
    Globals,
    Env,
    Threads,
    SystemGraph,
    Commands,
    Values,
    Custom(String),
}

impl MinorCapability {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "dns" => MinorCapability::Dns,
            "tcp" => MinorCapability::Tcp,
            "globals" => MinorCapability::Globals,
            "env" => MinorCapability::Env,
            "threads" => MinorCapability::Threads,
            "system-graph" => MinorCapability::SystemGraph,
            "commands" => MinorCapability::Commands,
            "values" => MinorCapability::Values,
            other => MinorCapability::Custom(other.to_string()),
        })
    }
}

/// The target of a permission: the only legal entity references are
/// paths, URLs, hosts, schemes, global-variable names, or a typed
/// capability marker (spec.md §3 "Permission").
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionTarget {
    Path(String),
    PathPattern(PathPattern),
    Url(String),
    UrlPattern(UrlPattern),
    Host(String),
    HostPattern(HostPattern),
    Scheme(String),
    GlobalVar(String),
    Capability(MinorCapability),
}

impl fmt::Display for PermissionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionTarget::Path(p) => write!(f, "{p}"),
            PermissionTarget::PathPattern(p) => write!(f, "{}", p.raw()),
            PermissionTarget::Url(u) => write!(f, "{u}"),
            PermissionTarget::UrlPattern(u) => write!(f, "{}", u.raw()),
            PermissionTarget::Host(h) => write!(f, "{h}"),
            PermissionTarget::HostPattern(h) => write!(f, "{}", h.raw()),
            PermissionTarget::Scheme(s) => write!(f, "{s}"),
            PermissionTarget::GlobalVar(g) => write!(f, "global {g}"),
            PermissionTarget::Capability(MinorCapability::Custom(c)) => write!(f, "{c}"),
            PermissionTarget::Capability(c) => write!(f, "{c:?}"),
        }
    }
}

/// A single (kind, target) capability (spec.md §3 "Permission").
#[derive(Debug, Clone, PartialEq)]
pub struct Permission {
    pub kind: PermissionKind,
    pub target: PermissionTarget,
}

impl Permission {
    pub fn new(kind: PermissionKind, target: PermissionTarget) -> Self {
        Self { kind, target }
    }

    /// `A.covers(B)` holds when A's kind equals B's, and A's target
    /// pattern matches B's target (spec.md §3 "Inclusion"). Inclusion is
    /// a partial order.
    pub fn covers(&self, other: &Permission) -> bool {
        if self.kind != other.kind {
            return false;
        }
        target_covers(&self.target, &other.target)
    }

    /// Produce the intersection of two permissions of the same kind, if
    /// their targets overlap. Used to refine a child context against a
    /// parent and to resolve forbidden-permission residues (spec.md
    /// §4.2 "Policy decision").
    pub fn intersect(&self, other: &Permission) -> Option<Permission> {
        if self.kind != other.kind {
            return None;
        }
        if self.covers(other) {
            return Some(other.clone());
        }
        if other.covers(self) {
            return Some(self.clone());
        }
        None
    }

    /// Canonical textual rendering, used by `covers`/round-trip tests and
    /// diagnostics (spec.md §4.2, §8 "Round-trip laws").
    pub fn render(&self) -> String {
        format!("{} {}", self.kind, self.target)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

fn target_covers(a: &PermissionTarget, b: &PermissionTarget) -> bool {
    use PermissionTarget::*;
    match (a, b) {
        (Path(p), Path(q)) => p == q,
        (PathPattern(p), Path(q)) => p.matches(q),
        (PathPattern(p), PathPattern(q)) => p.covers(q),
        (Url(p), Url(q)) => p == q,
        (UrlPattern(p), Url(q)) => p.matches(q),
        (UrlPattern(p), UrlPattern(q)) => p.covers(q),
        (Host(p), Host(q)) => p == q,
        (HostPattern(p), Host(q)) => p.matches(q),
        (HostPattern(p), HostPattern(q)) => p.covers(q),
        (Scheme(p), Scheme(q)) => p == q,
        (GlobalVar(p), GlobalVar(q)) => p == q,
        (Capability(p), Capability(q)) => p == q,
        _ => false,
    }
}

/// A set of permissions with inclusion-aware `drop` (spec.md §4.2
/// "drop(pattern)" — "produce a new permission set that no longer
/// covers the pattern; used for post-init privilege reduction").
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    permissions: Vec<Permission>,
}

impl PermissionSet {
    pub fn new(permissions: Vec<Permission>) -> Self {
        Self { permissions }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn add(&mut self, permission: Permission) {
        self.permissions.push(permission);
    }

    /// Yes iff *some* held permission covers the request.
    pub fn covers(&self, request: &Permission) -> bool {
        self.permissions.iter().any(|p| p.covers(request))
    }

    /// Drop every held permission that the given patterns would
    /// otherwise cover. This is a privilege reduction, never an
    /// addition — `drop` cannot restore a permission (spec.md §4.3
    /// "dropPermissions ... cannot restore").
    pub fn drop_matching(&self, to_drop: &[Permission]) -> PermissionSet {
        let remaining = self
            .permissions
            .iter()
            .filter(|held| !to_drop.iter().any(|d| d.covers(held)))
            .cloned()
            .collect();
        PermissionSet::new(remaining)
    }

    /// True iff every permission in `child` is covered by some
    /// permission in `self` (spec.md §3 invariant 5, §8 property test).
    pub fn covers_all(&self, child: &PermissionSet) -> bool {
        child.permissions.iter().all(|p| self.covers(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_covers_narrower_path() {
        let wide = Permission::new(PermissionKind::Read, PermissionTarget::PathPattern(PathPattern::parse("/home/...").unwrap()));
        let narrow = Permission::new(PermissionKind::Read, PermissionTarget::Path("/home/user/file".into()));
        assert!(wide.covers(&narrow));
        assert!(!narrow.covers(&wide));
    }

    #[test]
    fn different_kinds_never_cover() {
        let read = Permission::new(PermissionKind::Read, PermissionTarget::Path("/a".into()));
        let write = Permission::new(PermissionKind::Write, PermissionTarget::Path("/a".into()));
        assert!(!read.covers(&write));
    }

    #[test]
    fn drop_removes_matching_permission_only() {
        let mut set = PermissionSet::default();
        set.add(Permission::new(PermissionKind::Read, PermissionTarget::Path("/a".into())));
        set.add(Permission::new(PermissionKind::Read, PermissionTarget::Path("/b".into())));
        let dropped = set.drop_matching(&[Permission::new(PermissionKind::Read, PermissionTarget::Path("/a".into()))]);
        assert!(!dropped.covers(&Permission::new(PermissionKind::Read, PermissionTarget::Path("/a".into()))));
        assert!(dropped.covers(&Permission::new(PermissionKind::Read, PermissionTarget::Path("/b".into()))));
    }

    #[test]
    fn render_round_trips_through_display() {
        let p = Permission::new(PermissionKind::Read, PermissionTarget::Path("/a".into()));
        assert_eq!(p.render(), format!("{}", p));
    }

    #[test]
    fn covers_all_holds_for_parent_child_relation() {
        let mut parent = PermissionSet::default();
        parent.add(Permission::new(PermissionKind::Read, PermissionTarget::PathPattern(PathPattern::parse("/home/...").unwrap())));
        let mut child = PermissionSet::default();
        child.add(Permission::new(PermissionKind::Read, PermissionTarget::Path("/home/user/a".into())));
        assert!(parent.covers_all(&child));
    }
}
