// fusillade-engine: Weighted endpoint selection decorator

use crate::context::AttemptContext;
use crate::endpoint::Endpoint;
use crate::error::{EngineError, EngineResult};
use crate::requester::{AttemptReport, Requester};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Outermost decorator: picks one weighted endpoint per logical call
///
/// The choice is bound to the context, so every retry attempt of the
/// same call hits the same endpoint. When invoked with an endpoint
/// already bound (inside a retry) the binding is reused. The first call
/// in a chain also installs a variable scope if the context has none.
pub struct EndpointSelect {
    endpoints: Vec<Arc<Endpoint>>,
    total_weight: u64,
    rng: Mutex<StdRng>,
    inner: Arc<dyn Requester>,
}

impl EndpointSelect {
    pub fn new(endpoints: Vec<Arc<Endpoint>>, inner: Arc<dyn Requester>) -> EngineResult<Self> {
        if endpoints.is_empty() {
            return Err(EngineError::ConfigInvalid(
                "endpoint table is empty".to_string(),
            ));
        }
        let total_weight: u64 = endpoints.iter().map(|e| e.weight as u64).sum();
        if total_weight == 0 {
            return Err(EngineError::ConfigInvalid(
                "endpoint weights sum to zero".to_string(),
            ));
        }
        Ok(Self {
            endpoints,
            total_weight,
            rng: Mutex::new(StdRng::from_entropy()),
            inner,
        })
    }

    /// Draw n in [0, total) and take the first endpoint whose cumulative
    /// weight exceeds n; on a boundary the lower index wins
    fn pick(&self) -> Arc<Endpoint> {
        let n = self.rng.lock().gen_range(0..self.total_weight);
        let mut cumulative = 0u64;
        for endpoint in &self.endpoints {
            cumulative += endpoint.weight as u64;
            if n < cumulative {
                return endpoint.clone();
            }
        }
        // n < total_weight guarantees the loop returned
        self.endpoints[self.endpoints.len() - 1].clone()
    }
}

#[async_trait]
impl Requester for EndpointSelect {
    async fn attempt(&self, ctx: &AttemptContext) -> EngineResult<AttemptReport> {
        if ctx.bound_endpoint().is_none() {
            ctx.ensure_scope();
            ctx.bind_endpoint(self.pick());
        }
        self.inner.attempt(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct NameEcho;

    #[async_trait]
    impl Requester for NameEcho {
        async fn attempt(&self, ctx: &AttemptContext) -> EngineResult<AttemptReport> {
            let name = ctx.bound_endpoint().unwrap().name.clone();
            Ok(AttemptReport::with_status(name))
        }
    }

    fn endpoint(name: &str, weight: u32) -> Arc<Endpoint> {
        Arc::new(Endpoint {
            name: name.to_string(),
            weight,
            url: format!("http://localhost/{}", name),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: crate::endpoint::BodySource::Empty,
            extractors: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_weighted_distribution() {
        let select = EndpointSelect::new(
            vec![endpoint("light", 1), endpoint("heavy", 3)],
            Arc::new(NameEcho),
        )
        .unwrap();

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..4000 {
            let ctx = AttemptContext::new(CancellationToken::new(), Duration::from_secs(1));
            let report = select.attempt(&ctx).await.unwrap();
            *counts.entry(report.status_bucket).or_default() += 1;
        }

        let light = counts["light"];
        let heavy = counts["heavy"];
        assert!(light > 750 && light < 1250, "light={}", light);
        assert!(heavy > 2750 && heavy < 3250, "heavy={}", heavy);
    }

    #[tokio::test]
    async fn test_existing_binding_reused() {
        let select =
            EndpointSelect::new(vec![endpoint("a", 1), endpoint("b", 1)], Arc::new(NameEcho))
                .unwrap();
        let ctx = AttemptContext::new(CancellationToken::new(), Duration::from_secs(1));
        ctx.bind_endpoint(endpoint("pinned", 1));
        let report = select.attempt(&ctx).await.unwrap();
        assert_eq!(report.status_bucket, "pinned");
    }

    #[test]
    fn test_empty_table_rejected() {
        assert!(EndpointSelect::new(Vec::new(), Arc::new(NameEcho)).is_err());
    }
}
