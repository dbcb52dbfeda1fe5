// fusillade-engine: Run assembly
//
// Wires a validated configuration into the requester chain, scheduler,
// metrics collector and threshold evaluator, in the fixed decorator
// order: endpoint selection -> retry -> logging -> protocol adapter.

use crate::auth::{self, AuthProvider};
use crate::endpoint::Endpoint;
use crate::error::EngineResult;
use crate::feeder::{self, Feeder};
use crate::grpc::GrpcRequester;
use crate::http::HttpRequester;
use crate::limiter::RateLimiter;
use crate::logging::FailureLog;
use crate::metrics::{self, MetricsCollector, StatsSnapshot};
use crate::pattern::PatternSchedule;
use crate::requester::Requester;
use crate::retry::{Retry, RetryPolicy};
use crate::scheduler::Scheduler;
use crate::select::EndpointSelect;
use crate::sse::SseRequester;
use crate::threshold::{self, Threshold, Verdict};
use crate::ws::WsRequester;
use fusillade_config::{Config, Protocol};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything a run produces
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub stats: StatsSnapshot,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<StatsSnapshot>,
    pub verdicts: Vec<Verdict>,
    pub thresholds_passed: bool,
    pub error_count: u64,
    pub elapsed_s: f64,
}

/// A fully assembled run, ready to execute
pub struct Engine {
    scheduler: Scheduler,
    thresholds: Vec<Threshold>,
    feeder: Option<Arc<dyn Feeder>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(config: &Config) -> EngineResult<Self> {
        // Threshold parse failures are fatal before any worker launches
        let thresholds = threshold::parse_all(&config.thresholds)?;

        let endpoints = Endpoint::table_from_config(config)?;
        let feeder = config
            .feeder
            .as_ref()
            .map(feeder::from_config)
            .transpose()?;
        let auth: Option<Arc<dyn AuthProvider>> = config
            .auth
            .as_ref()
            .map(auth::from_config)
            .transpose()?;

        let terminal: Arc<dyn Requester> = match config.protocol {
            Protocol::Http => Arc::new(HttpRequester::new(config, feeder.clone(), auth.clone())?),
            Protocol::Websocket => Arc::new(WsRequester::new(config, feeder.clone(), auth.clone())),
            Protocol::Sse => Arc::new(SseRequester::new(config, feeder.clone(), auth.clone())?),
            Protocol::Grpc => Arc::new(GrpcRequester::new(config, feeder.clone(), auth.clone())?),
        };

        let policy = RetryPolicy {
            max_attempts: config.retries + 1,
            base: Duration::from_millis(config.retry_backoff.base_ms),
            max_delay: Duration::from_millis(config.retry_backoff.max_delay_ms),
        };
        let chain: Arc<dyn Requester> = Arc::new(EndpointSelect::new(
            endpoints,
            Arc::new(Retry::new(policy, Arc::new(FailureLog::new(terminal)))),
        )?);

        let schedule = PatternSchedule::from_config(&config.load_patterns);
        // When load patterns are configured they own the rate; the
        // validator rejects setting both
        let rate = if schedule.is_some() {
            None
        } else {
            config.rate
        };
        let limiter = Arc::new(RateLimiter::new(rate, config.arrival));
        let metrics = Arc::new(MetricsCollector::new(metrics::shard_count(
            config.metrics_shards,
        )?));
        let scheduler = Scheduler::new(config, chain, metrics, limiter, schedule);

        Ok(Self {
            scheduler,
            thresholds,
            feeder,
        })
    }

    /// Execute the run and evaluate thresholds over the final snapshot
    pub async fn run(&self, cancel: CancellationToken) -> EngineResult<RunReport> {
        let outcome = self.scheduler.run(cancel).await?;

        if let Some(feeder) = &self.feeder {
            feeder.close().await;
        }

        let (verdicts, thresholds_passed) =
            threshold::evaluate_all(&self.thresholds, &outcome.stats);

        Ok(RunReport {
            stats: outcome.stats,
            history: outcome.history,
            verdicts,
            thresholds_passed,
            error_count: outcome.error_count,
            elapsed_s: outcome.elapsed.as_secs_f64(),
        })
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }
}

impl RunReport {
    /// Exit-code policy: 0 all pass and error-free, 1 threshold failure,
    /// 2 transport errors only
    pub fn exit_code(&self) -> i32 {
        if !self.thresholds_passed {
            1
        } else if self.error_count > 0 {
            2
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_bad_threshold_is_fatal_before_run() {
        let config = Config {
            target: Some("http://localhost".to_string()),
            thresholds: vec!["http_req_duration:bogus < 1".to_string()],
            ..Config::default()
        };
        let err = Engine::new(&config).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid(_)));
    }

    #[test]
    fn test_exit_codes() {
        let mut report = RunReport {
            stats: StatsSnapshot::default(),
            history: Vec::new(),
            verdicts: Vec::new(),
            thresholds_passed: true,
            error_count: 0,
            elapsed_s: 1.0,
        };
        assert_eq!(report.exit_code(), 0);
        report.error_count = 3;
        assert_eq!(report.exit_code(), 2);
        report.thresholds_passed = false;
        assert_eq!(report.exit_code(), 1);
    }
}
