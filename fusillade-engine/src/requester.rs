// fusillade-engine: Requester contract

use crate::context::AttemptContext;
use crate::error::EngineResult;
use async_trait::async_trait;
use std::collections::HashMap;

/// Outcome metadata of a successful attempt
///
/// Latency is measured by the scheduler around the whole logical call;
/// the report carries everything else the metrics collector needs.
#[derive(Debug, Clone, Default)]
pub struct AttemptReport {
    /// Roll-up key: HTTP status, gRPC code name, or "ok"
    pub status_bucket: String,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Protocol-specific counters (messages sent, events received, ...)
    pub counters: HashMap<String, u64>,
}

impl AttemptReport {
    /// Report with just a status bucket
    pub fn with_status(bucket: impl Into<String>) -> Self {
        Self {
            status_bucket: bucket.into(),
            ..Self::default()
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

/// One logical operation against the target
///
/// Implemented by the protocol adapters and wrapped by the decorators
/// (endpoint selection, retry, logging). Composition order is fixed:
/// selection is outermost so one endpoint choice covers all retries.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn attempt(&self, ctx: &AttemptContext) -> EngineResult<AttemptReport>;
}
