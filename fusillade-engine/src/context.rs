// fusillade-engine: Per-attempt context

use crate::endpoint::Endpoint;
use crate::vars::VariableScope;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Context carried through one logical call
///
/// The endpoint binding is made once per logical call by the selection
/// decorator; retry attempts inside the same call observe the same
/// binding. The variable scope is shared with the owning worker.
pub struct AttemptContext {
    cancel: CancellationToken,
    deadline: Instant,
    endpoint: Mutex<Option<Arc<Endpoint>>>,
    scope: Mutex<Option<Arc<VariableScope>>>,
}

impl AttemptContext {
    /// Create a context whose deadline is `timeout` from now
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + timeout,
            endpoint: Mutex::new(None),
            scope: Mutex::new(None),
        }
    }

    /// Create a context with a pre-installed worker scope
    pub fn with_scope(
        cancel: CancellationToken,
        timeout: Duration,
        scope: Arc<VariableScope>,
    ) -> Self {
        let ctx = Self::new(cancel, timeout);
        *ctx.scope.lock() = Some(scope);
        ctx
    }

    /// Cancellation token propagated into the I/O layer
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the attempt deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Bind an endpoint if none is bound yet; returns the effective binding
    pub fn bind_endpoint(&self, endpoint: Arc<Endpoint>) -> Arc<Endpoint> {
        let mut bound = self.endpoint.lock();
        bound.get_or_insert(endpoint).clone()
    }

    /// The endpoint bound earlier in the chain, if any
    pub fn bound_endpoint(&self) -> Option<Arc<Endpoint>> {
        self.endpoint.lock().clone()
    }

    /// Install a variable scope if none is present; returns the effective scope
    pub fn ensure_scope(&self) -> Arc<VariableScope> {
        let mut scope = self.scope.lock();
        scope
            .get_or_insert_with(|| Arc::new(VariableScope::new()))
            .clone()
    }

    /// The scope installed on this context, if any
    pub fn scope(&self) -> Option<Arc<VariableScope>> {
        self.scope.lock().clone()
    }
}
