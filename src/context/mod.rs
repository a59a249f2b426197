//! Execution Context (C3).
//!
//! Owns granted permissions, limits, the filesystem handle, host-alias
//! and pattern registries, the active transaction, and cancellation.
//! Produces bounded child contexts (spec.md §4.3).

mod transaction;

pub use transaction::{Transaction, TransactionOutcome};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::fs::{FileSystem, InMemoryFs};
use crate::permission::{Limit, Permission, PermissionSet};

/// Canonical textual rendering of a pattern/host-alias right-hand side.
/// The concrete pattern-value domain (the evaluator's job) is out of
/// scope here; the context only needs to track *that* a name is bound
/// and *to what rendering*, for lookups and inclusion-merge diffing.
pub type PatternValue = String;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("not allowed: missing permission {0}")]
    NotAllowed(Permission),
    #[error("context cancelled")]
    Cancelled,
    #[error("a transaction is already active on this context")]
    TransactionActive,
    #[error("no active transaction on this context")]
    NoActiveTransaction,
    #[error("resource '{0}' is already held by this context")]
    ResourceBusy(String),
    #[error("limit '{0}' exhausted")]
    LimitExhausted(String),
    #[error("child context requested permission {0} not covered by parent")]
    PermissionNotCovered(Permission),
}

/// Options for deriving a child context from a parent (spec.md §4.3
/// "Produces bounded child contexts").
#[derive(Default)]
pub struct ChildContextOptions {
    pub permissions: Vec<Permission>,
    pub forbidden_permissions: Vec<Permission>,
    pub limit_overrides: HashMap<String, u64>,
    /// Share the parent's filesystem handle (the default) or swap in a
    /// different one.
    pub fs: Option<Arc<dyn FileSystem>>,
}

struct Inner {
    permissions: Mutex<PermissionSet>,
    forbidden_permissions: PermissionSet,
    limits: Mutex<HashMap<String, Limit>>,
    host_resolutions: Mutex<HashMap<String, String>>,
    fs: Arc<dyn FileSystem>,
    named_patterns: Mutex<IndexMap<String, PatternValue>>,
    pattern_namespaces: Mutex<IndexMap<String, IndexMap<String, PatternValue>>>,
    host_aliases: Mutex<IndexMap<String, String>>,
    held_resources: Mutex<HashSet<String>>,
    transaction: Mutex<Option<Transaction>>,
    cancelled: Mutex<bool>,
    notify: tokio::sync::Notify,
    teardown_callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    children: Mutex<Vec<ExecutionContext>>,
    parent: Option<Weak<Inner>>,
}

/// A capability-scoped execution context. Cheap to clone (an `Arc`
/// handle); clones refer to the same underlying context, matching the
/// spec's "Context is constructed ... and lives until Cancel()" single
/// owned-resource model.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<Inner>,
}

impl ExecutionContext {
    pub fn new(
        permissions: Vec<Permission>,
        forbidden_permissions: Vec<Permission>,
        limits: Vec<Limit>,
    ) -> Self {
        Self::with_fs(permissions, forbidden_permissions, limits, Arc::new(InMemoryFs::new()))
    }

    pub fn with_fs(
        permissions: Vec<Permission>,
        forbidden_permissions: Vec<Permission>,
        limits: Vec<Limit>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        let limits = limits.into_iter().map(|l| (l.name.clone(), l)).collect();
        Self {
            inner: Arc::new(Inner {
                permissions: Mutex::new(PermissionSet::new(permissions)),
                forbidden_permissions: PermissionSet::new(forbidden_permissions),
                limits: Mutex::new(limits),
                host_resolutions: Mutex::new(HashMap::new()),
                fs,
                named_patterns: Mutex::new(IndexMap::new()),
                pattern_namespaces: Mutex::new(IndexMap::new()),
                host_aliases: Mutex::new(IndexMap::new()),
                held_resources: Mutex::new(HashSet::new()),
                transaction: Mutex::new(None),
                cancelled: Mutex::new(false),
                notify: tokio::sync::Notify::new(),
                teardown_callbacks: Mutex::new(Vec::new()),
                children: Mutex::new(Vec::new()),
                parent: None,
            }),
        }
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.inner.fs
    }

    // -----------------------------------------------------------------
    // Permissions
    // -----------------------------------------------------------------

    /// "Do you hold (kind, target)?" — yes iff some held permission
    /// covers the request and no forbidden permission covers it
    /// (spec.md §4.2 "Policy decision").
    pub fn check_has_permission(&self, p: &Permission) -> Result<(), ContextError> {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        if self.inner.forbidden_permissions.covers(p) {
            return Err(ContextError::NotAllowed(p.clone()));
        }
        let granted = self.inner.permissions.lock().unwrap();
        if granted.covers(p) {
            Ok(())
        } else {
            Err(ContextError::NotAllowed(p.clone()))
        }
    }

    /// Atomic; cannot restore a dropped permission (spec.md §4.3
    /// "dropPermissions").
    pub fn drop_permissions(&self, to_drop: &[Permission]) {
        let mut granted = self.inner.permissions.lock().unwrap();
        *granted = granted.drop_matching(to_drop);
    }

    pub fn granted_permissions(&self) -> PermissionSet {
        self.inner.permissions.lock().unwrap().clone()
    }

    // -----------------------------------------------------------------
    // Limits
    // -----------------------------------------------------------------

    pub fn consume_limit(&self, name: &str, amount: u64) -> Result<(), ContextError> {
        let mut limits = self.inner.limits.lock().unwrap();
        let limit = limits.get_mut(name).ok_or_else(|| ContextError::LimitExhausted(name.to_string()))?;
        limit.consume(amount).map_err(|_| ContextError::LimitExhausted(name.to_string()))
    }

    // -----------------------------------------------------------------
    // Resource ledger (spec.md §4.3 "acquireResource/releaseResource")
    // -----------------------------------------------------------------

    pub fn acquire_resource(&self, name: &str) -> Result<(), ContextError> {
        let mut held = self.inner.held_resources.lock().unwrap();
        if !held.insert(name.to_string()) {
            return Err(ContextError::ResourceBusy(name.to_string()));
        }
        Ok(())
    }

    pub fn release_resource(&self, name: &str) {
        self.inner.held_resources.lock().unwrap().remove(name);
    }

    // -----------------------------------------------------------------
    // Pattern / namespace / host-alias registries
    // -----------------------------------------------------------------

    pub fn add_named_pattern(&self, name: impl Into<String>, value: PatternValue) {
        self.inner.named_patterns.lock().unwrap().insert(name.into(), value);
    }

    pub fn get_named_pattern(&self, name: &str) -> Option<PatternValue> {
        self.inner.named_patterns.lock().unwrap().get(name).cloned()
    }

    pub fn get_named_patterns(&self) -> IndexMap<String, PatternValue> {
        self.inner.named_patterns.lock().unwrap().clone()
    }

    pub fn add_pattern_namespace(&self, name: impl Into<String>, members: IndexMap<String, PatternValue>) {
        self.inner.pattern_namespaces.lock().unwrap().insert(name.into(), members);
    }

    pub fn get_pattern_namespace(&self, name: &str) -> Option<IndexMap<String, PatternValue>> {
        self.inner.pattern_namespaces.lock().unwrap().get(name).cloned()
    }

    pub fn add_host_alias(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.host_aliases.lock().unwrap().insert(name.into(), value.into());
    }

    pub fn get_host_aliases(&self) -> IndexMap<String, String> {
        self.inner.host_aliases.lock().unwrap().clone()
    }

    pub fn add_host_resolution(&self, host_pattern: impl Into<String>, resolution: impl Into<String>) {
        self.inner.host_resolutions.lock().unwrap().insert(host_pattern.into(), resolution.into());
    }

    // -----------------------------------------------------------------
    // Transactions — at most one active per context (spec.md §4.3,
    // §5 "Shared-resource policy")
    // -----------------------------------------------------------------

    pub fn get_tx(&self) -> Option<Transaction> {
        self.inner.transaction.lock().unwrap().clone()
    }

    pub fn start_new_transaction(&self) -> Result<Transaction, ContextError> {
        let mut tx_slot = self.inner.transaction.lock().unwrap();
        if tx_slot.is_some() {
            return Err(ContextError::TransactionActive);
        }
        let tx = Transaction::new();
        *tx_slot = Some(tx.clone());
        Ok(tx)
    }

    /// Ends the active transaction, firing its end callbacks exactly
    /// once (spec.md §4.3 "transaction end callbacks fire exactly once
    /// with (success|rollback)").
    pub fn end_transaction(&self, outcome: TransactionOutcome) -> Result<(), ContextError> {
        let mut tx_slot = self.inner.transaction.lock().unwrap();
        match tx_slot.take() {
            Some(tx) => {
                tx.complete(outcome);
                Ok(())
            }
            None => Err(ContextError::NoActiveTransaction),
        }
    }

    // -----------------------------------------------------------------
    // Child contexts
    // -----------------------------------------------------------------

    /// Every permission on the child must be covered by the parent
    /// (spec.md §3 invariant 5); every limit may only be tightened
    /// (spec.md §3 "Limit").
    pub fn new_child(&self, opts: ChildContextOptions) -> Result<ExecutionContext, ContextError> {
        let parent_granted = self.inner.permissions.lock().unwrap();
        for p in &opts.permissions {
            if !parent_granted.covers(p) {
                return Err(ContextError::PermissionNotCovered(p.clone()));
            }
        }
        drop(parent_granted);

        let parent_limits = self.inner.limits.lock().unwrap();
        let mut child_limits = Vec::new();
        for (name, parent_limit) in parent_limits.iter() {
            let requested = opts.limit_overrides.get(name).copied();
            let derived = parent_limit
                .derive_child(requested)
                .map_err(|_| ContextError::LimitExhausted(name.clone()))?;
            child_limits.push(derived);
        }
        drop(parent_limits);

        let fs = opts.fs.unwrap_or_else(|| self.inner.fs.clone());
        let child = Self {
            inner: Arc::new(Inner {
                permissions: Mutex::new(PermissionSet::new(opts.permissions)),
                forbidden_permissions: PermissionSet::new(opts.forbidden_permissions),
                limits: Mutex::new(child_limits.into_iter().map(|l| (l.name.clone(), l)).collect()),
                host_resolutions: Mutex::new(self.inner.host_resolutions.lock().unwrap().clone()),
                fs,
                named_patterns: Mutex::new(self.inner.named_patterns.lock().unwrap().clone()),
                pattern_namespaces: Mutex::new(self.inner.pattern_namespaces.lock().unwrap().clone()),
                host_aliases: Mutex::new(self.inner.host_aliases.lock().unwrap().clone()),
                held_resources: Mutex::new(HashSet::new()),
                transaction: Mutex::new(None),
                cancelled: Mutex::new(false),
                notify: tokio::sync::Notify::new(),
                teardown_callbacks: Mutex::new(Vec::new()),
                children: Mutex::new(Vec::new()),
                parent: Some(Arc::downgrade(&self.inner)),
            }),
        };
        self.inner.children.lock().unwrap().push(child.clone());
        Ok(child)
    }

    pub fn parent(&self) -> Option<ExecutionContext> {
        self.inner.parent.as_ref().and_then(|w| w.upgrade()).map(|inner| ExecutionContext { inner })
    }

    // -----------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock().unwrap()
    }

    /// Resolves once this context is cancelled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Register a deferred teardown callback, run LIFO on cancellation
    /// (spec.md §4.3 "cancel() ... tear-down runs deferred
    /// onGracefulTearDown callbacks in LIFO order").
    pub fn on_graceful_tear_down(&self, cb: impl FnOnce() + Send + 'static) {
        self.inner.teardown_callbacks.lock().unwrap().push(Box::new(cb));
    }

    /// Cancels every child context in LIFO order, then this context's
    /// own teardown callbacks, then fires `done` (spec.md §5
    /// "Cancellation and timeouts").
    pub fn cancel_gracefully(&self) {
        let children: Vec<ExecutionContext> = {
            let mut c = self.inner.children.lock().unwrap();
            c.drain(..).collect()
        };
        for child in children.into_iter().rev() {
            child.cancel_gracefully();
        }

        let callbacks: Vec<Box<dyn FnOnce() + Send>> = {
            let mut cbs = self.inner.teardown_callbacks.lock().unwrap();
            cbs.drain(..).collect()
        };
        for cb in callbacks.into_iter().rev() {
            cb();
        }

        *self.inner.cancelled.lock().unwrap() = true;
        self.inner.notify.notify_waiters();
        debug!("context cancelled gracefully");
    }

    /// Hard cancel: same cascade, but does not wait for in-flight work
    /// to observe `done()` before marking cancelled (callers checking
    /// `done()` cooperatively still see the same end state).
    pub fn cancel(&self) {
        self.cancel_gracefully();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{DepletionPolicy, PermissionKind, PermissionTarget};

    fn read_perm(path: &str) -> Permission {
        Permission::new(PermissionKind::Read, PermissionTarget::Path(path.to_string()))
    }

    #[test]
    fn check_has_permission_denies_uncovered_request() {
        let ctx = ExecutionContext::new(vec![read_perm("/a")], vec![], vec![]);
        assert!(ctx.check_has_permission(&read_perm("/a")).is_ok());
        assert!(ctx.check_has_permission(&read_perm("/b")).is_err());
    }

    #[test]
    fn forbidden_permission_overrides_granted() {
        let ctx = ExecutionContext::new(vec![read_perm("/a")], vec![read_perm("/a")], vec![]);
        assert!(matches!(ctx.check_has_permission(&read_perm("/a")), Err(ContextError::NotAllowed(_))));
    }

    #[test]
    fn drop_permissions_cannot_be_restored() {
        let ctx = ExecutionContext::new(vec![read_perm("/a")], vec![], vec![]);
        ctx.drop_permissions(&[read_perm("/a")]);
        assert!(ctx.check_has_permission(&read_perm("/a")).is_err());
    }

    #[test]
    fn child_context_rejects_uncovered_permission() {
        let ctx = ExecutionContext::new(vec![read_perm("/a")], vec![], vec![]);
        let result = ctx.new_child(ChildContextOptions { permissions: vec![read_perm("/b")], ..Default::default() });
        assert!(result.is_err());
    }

    #[test]
    fn child_context_inherits_covered_permission() {
        let ctx = ExecutionContext::new(vec![read_perm("/a")], vec![], vec![]);
        let child = ctx.new_child(ChildContextOptions { permissions: vec![read_perm("/a")], ..Default::default() }).unwrap();
        assert!(child.check_has_permission(&read_perm("/a")).is_ok());
    }

    #[test]
    fn child_cannot_widen_inherited_limit() {
        let ctx = ExecutionContext::new(vec![], vec![], vec![Limit::new("cpu-ms", DepletionPolicy::Total, 100)]);
        let mut overrides = HashMap::new();
        overrides.insert("cpu-ms".to_string(), 500);
        let result = ctx.new_child(ChildContextOptions { limit_overrides: overrides, ..Default::default() });
        assert!(result.is_err());
    }

    #[test]
    fn second_transaction_fails_while_one_is_active() {
        let ctx = ExecutionContext::new(vec![], vec![], vec![]);
        let _tx = ctx.start_new_transaction().unwrap();
        assert!(matches!(ctx.start_new_transaction(), Err(ContextError::TransactionActive)));
    }

    #[test]
    fn transaction_end_callback_fires_once() {
        let ctx = ExecutionContext::new(vec![], vec![], vec![]);
        let tx = ctx.start_new_transaction().unwrap();
        let fired = Arc::new(Mutex::new(0));
        let fired2 = fired.clone();
        tx.on_end(move |_outcome| {
            *fired2.lock().unwrap() += 1;
        });
        ctx.end_transaction(TransactionOutcome::Success).unwrap();
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[test]
    fn teardown_callbacks_run_lifo_on_cancel() {
        let ctx = ExecutionContext::new(vec![], vec![], vec![]);
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        ctx.on_graceful_tear_down(move || o1.lock().unwrap().push(1));
        ctx.on_graceful_tear_down(move || o2.lock().unwrap().push(2));
        ctx.cancel_gracefully();
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn cancelled_context_reports_cancelled_not_not_allowed() {
        let ctx = ExecutionContext::new(vec![read_perm("/a")], vec![], vec![]);
        ctx.cancel();
        assert!(matches!(ctx.check_has_permission(&read_perm("/a")), Err(ContextError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_cascades_to_children_in_lifo_order() {
        let ctx = ExecutionContext::new(vec![], vec![], vec![]);
        let child_a = ctx.new_child(ChildContextOptions::default()).unwrap();
        let child_b = ctx.new_child(ChildContextOptions::default()).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let oa = order.clone();
        let ob = order.clone();
        child_a.on_graceful_tear_down(move || oa.lock().unwrap().push("a"));
        child_b.on_graceful_tear_down(move || ob.lock().unwrap().push("b"));
        ctx.cancel_gracefully();
        assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
        assert!(child_a.is_cancelled());
        assert!(child_b.is_cancelled());
    }
}
