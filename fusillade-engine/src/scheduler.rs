// fusillade-engine: Scheduler and worker fleet
//
// A fixed pool of workers loops: acquire an arrival slot, run the
// requester chain with a fresh per-attempt context, record the outcome.
// The run ends on whichever fires first: total reached, duration
// elapsed, all load phases consumed, or external cancellation. In-flight
// attempts get a grace period before cancellation is forced.

use crate::context::AttemptContext;
use crate::error::{EngineError, EngineResult};
use crate::limiter::RateLimiter;
use crate::metrics::{MetricsCollector, Outcome, StatsSnapshot};
use crate::pattern::PatternSchedule;
use crate::requester::Requester;
use crate::vars::VariableScope;
use fusillade_config::Config;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often the pattern sequencer recomputes the limiter rate
const RATE_RECOMPUTE_INTERVAL: Duration = Duration::from_millis(100);

/// Final result of a run
#[derive(Debug)]
pub struct RunOutcome {
    pub stats: StatsSnapshot,
    pub history: Vec<StatsSnapshot>,
    pub error_count: u64,
    pub elapsed: Duration,
}

/// Drives the worker fleet against the requester chain
pub struct Scheduler {
    chain: Arc<dyn Requester>,
    metrics: Arc<MetricsCollector>,
    limiter: Arc<RateLimiter>,
    schedule: Option<PatternSchedule>,
    protocol: &'static str,
    concurrency: usize,
    total: Option<u64>,
    duration: Option<Duration>,
    timeout: Duration,
    grace: Duration,
    snapshot_interval: Duration,
}

struct WorkerShared {
    chain: Arc<dyn Requester>,
    metrics: Arc<MetricsCollector>,
    limiter: Arc<RateLimiter>,
    protocol: &'static str,
    timeout: Duration,
    total: Option<u64>,
    dispatched: AtomicU64,
    errors: AtomicU64,
    stop: CancellationToken,
    hard_cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        chain: Arc<dyn Requester>,
        metrics: Arc<MetricsCollector>,
        limiter: Arc<RateLimiter>,
        schedule: Option<PatternSchedule>,
    ) -> Self {
        Self {
            chain,
            metrics,
            limiter,
            schedule,
            protocol: config.protocol.as_str(),
            concurrency: config.concurrency.max(1),
            total: config.total,
            duration: config.duration_s.map(Duration::from_secs),
            timeout: Duration::from_millis(config.timeout_ms),
            grace: Duration::from_millis(config.grace_period_ms),
            snapshot_interval: Duration::from_millis(config.snapshot_interval_ms.max(100)),
        }
    }

    /// Run to completion and return the merged statistics
    pub async fn run(&self, external_cancel: CancellationToken) -> EngineResult<RunOutcome> {
        let started = Instant::now();
        let stop = CancellationToken::new();
        let hard_cancel = CancellationToken::new();

        let shared = Arc::new(WorkerShared {
            chain: self.chain.clone(),
            metrics: self.metrics.clone(),
            limiter: self.limiter.clone(),
            protocol: self.protocol,
            timeout: self.timeout,
            total: self.total,
            dispatched: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            stop: stop.clone(),
            hard_cancel: hard_cancel.clone(),
        });

        let mut aux = JoinSet::new();

        // External cancellation stops dispatch immediately
        {
            let stop = stop.clone();
            aux.spawn(async move {
                external_cancel.cancelled().await;
                debug!("external cancellation received");
                stop.cancel();
            });
        }

        // Duration stop condition
        if let Some(duration) = self.duration {
            let stop = stop.clone();
            aux.spawn(async move {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = tokio::time::sleep(duration) => {
                        debug!("run duration elapsed");
                        stop.cancel();
                    }
                }
            });
        }

        // Pattern sequencer: recompute the limiter rate at a fine
        // granularity; stop once every phase is consumed
        if let Some(schedule) = self.schedule.clone() {
            let stop = stop.clone();
            let limiter = self.limiter.clone();
            aux.spawn(async move {
                let mut ticker = tokio::time::interval(RATE_RECOMPUTE_INTERVAL);
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            match schedule.rate_at(started.elapsed()) {
                                Some(rate) => limiter.set_rate(rate),
                                None => {
                                    debug!("load pattern phases consumed");
                                    stop.cancel();
                                    break;
                                }
                            }
                        }
                    }
                }
            });
        }

        // Periodic snapshots
        {
            let stop = stop.clone();
            let metrics = self.metrics.clone();
            let interval = self.snapshot_interval;
            aux.spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            let snapshot = metrics.snapshot(started.elapsed());
                            info!(
                                total = snapshot.total,
                                failures = snapshot.failures,
                                rps = snapshot.rps as u64,
                                p95_ms = snapshot.latency.p95_ms,
                                "progress"
                            );
                            metrics.push_snapshot(snapshot);
                        }
                    }
                }
            });
        }

        let mut workers = JoinSet::new();
        for worker_id in 0..self.concurrency {
            let shared = shared.clone();
            workers.spawn(worker_loop(worker_id, shared));
        }
        info!(
            workers = self.concurrency,
            protocol = self.protocol,
            "run started"
        );

        // Wait for a stop condition or for every worker to finish on its
        // own (total reached, feeder exhausted everywhere)
        tokio::select! {
            _ = stop.cancelled() => {}
            _ = async {
                while workers.join_next().await.is_some() {}
            } => {
                stop.cancel();
            }
        }

        // Drain in-flight attempts, then force cancellation
        let drained = tokio::time::timeout(self.grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                grace_ms = self.grace.as_millis() as u64,
                "grace period elapsed, cancelling in-flight attempts"
            );
            hard_cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(1), async {
                while workers.join_next().await.is_some() {}
            })
            .await;
            workers.abort_all();
        }
        aux.abort_all();

        let elapsed = started.elapsed();
        let stats = self.metrics.snapshot(elapsed);
        self.metrics.push_snapshot(stats.clone());
        let error_count = shared.errors.load(Ordering::SeqCst);
        info!(
            total = stats.total,
            failures = stats.failures,
            elapsed_s = elapsed.as_secs_f64(),
            "run finished"
        );

        Ok(RunOutcome {
            stats,
            history: self.metrics.history(),
            error_count,
            elapsed,
        })
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<WorkerShared>) {
    // One scope for the worker's lifetime; chained attempts observe
    // their own writes in program order
    let scope = Arc::new(VariableScope::new());

    loop {
        if shared.stop.is_cancelled() {
            break;
        }

        if shared.limiter.acquire(&shared.stop).await.is_err() {
            break;
        }
        if shared.stop.is_cancelled() {
            break;
        }

        // Reserve a sequence slot last: from here the attempt always
        // executes, so exactly `total` logical calls run
        if let Some(total) = shared.total {
            let sequence = shared.dispatched.fetch_add(1, Ordering::SeqCst);
            if sequence >= total {
                shared.stop.cancel();
                break;
            }
        }

        let ctx = AttemptContext::with_scope(
            shared.hard_cancel.child_token(),
            shared.timeout,
            scope.clone(),
        );
        let start = Instant::now();
        let result = shared.chain.attempt(&ctx).await;
        let duration = start.elapsed();

        let endpoint = ctx
            .bound_endpoint()
            .map(|e| e.name.clone())
            .unwrap_or_else(|| "default".to_string());

        match result {
            Ok(report) => {
                shared.metrics.record(
                    worker_id,
                    &Outcome {
                        endpoint,
                        protocol: shared.protocol,
                        duration,
                        success: true,
                        status_bucket: report.status_bucket,
                        bytes_in: report.bytes_in,
                        bytes_out: report.bytes_out,
                        counters: report.counters,
                    },
                );
            }
            Err(EngineError::FeederExhausted) => {
                // The feeder drives the data set; a worker without input
                // stops rather than polluting the stats
                debug!(worker_id, "feeder exhausted, stopping worker");
                break;
            }
            Err(EngineError::Cancelled) => break,
            Err(err) => {
                shared.errors.fetch_add(1, Ordering::SeqCst);
                shared.metrics.record(
                    worker_id,
                    &Outcome {
                        endpoint,
                        protocol: shared.protocol,
                        duration,
                        success: false,
                        status_bucket: err.status_bucket(),
                        bytes_in: 0,
                        bytes_out: 0,
                        counters: err.failure_counters(),
                    },
                );
            }
        }
    }
}
