//! A context's single active transaction (spec.md §4.3, §5
//! "Shared-resource policy").

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Success,
    Rollback,
}

type EndCallback = Box<dyn FnOnce(TransactionOutcome) + Send>;

struct Shared {
    callbacks: Mutex<Vec<EndCallback>>,
    ended: Mutex<bool>,
}

/// A handle to the context's single active transaction. Cloning shares
/// the same underlying end-callback list; only [`ExecutionContext::end_transaction`]
/// (the owner) may complete it.
#[derive(Clone)]
pub struct Transaction {
    shared: Arc<Shared>,
}

impl Transaction {
    pub(super) fn new() -> Self {
        Self { shared: Arc::new(Shared { callbacks: Mutex::new(Vec::new()), ended: Mutex::new(false) }) }
    }

    /// Register a callback to run when the transaction ends. Fires
    /// exactly once (spec.md §4.3 "transaction end callbacks fire
    /// exactly once with (success|rollback)").
    pub fn on_end(&self, cb: impl FnOnce(TransactionOutcome) + Send + 'static) {
        self.shared.callbacks.lock().unwrap().push(Box::new(cb));
    }

    pub(super) fn complete(&self, outcome: TransactionOutcome) {
        let mut ended = self.shared.ended.lock().unwrap();
        if *ended {
            return;
        }
        *ended = true;
        drop(ended);

        let callbacks: Vec<EndCallback> = self.shared.callbacks.lock().unwrap().drain(..).collect();
        for cb in callbacks {
            cb(outcome);
        }
    }
}
