// fusillade-engine: Failure-logging decorator

use crate::context::AttemptContext;
use crate::error::EngineResult;
use crate::requester::{AttemptReport, Requester};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

/// Records every failed attempt to the error sink, then passes it on
pub struct FailureLog {
    inner: Arc<dyn Requester>,
}

impl FailureLog {
    pub fn new(inner: Arc<dyn Requester>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Requester for FailureLog {
    async fn attempt(&self, ctx: &AttemptContext) -> EngineResult<AttemptReport> {
        match self.inner.attempt(ctx).await {
            Ok(report) => Ok(report),
            Err(err) => {
                let endpoint = ctx
                    .bound_endpoint()
                    .map(|e| e.name.clone())
                    .unwrap_or_default();
                error!(endpoint = %endpoint, error = %err, "attempt failed");
                Err(err)
            }
        }
    }
}
