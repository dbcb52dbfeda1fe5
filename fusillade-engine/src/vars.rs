// fusillade-engine: Per-worker variable scope

use parking_lot::RwLock;
use std::collections::HashMap;

/// Per-worker key/value store
///
/// Holds values extracted from responses for reuse in later attempts of
/// the same worker. Never shared across workers.
#[derive(Debug, Default)]
pub struct VariableScope {
    values: RwLock<HashMap<String, String>>,
}

impl VariableScope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a variable
    pub fn get(&self, name: &str) -> Option<String> {
        self.values.read().get(name).cloned()
    }

    /// Store a variable, replacing any previous value
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(name.into(), value.into());
    }

    /// Number of stored variables
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Copy of the current contents, for diagnostics
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values.read().clone()
    }
}
