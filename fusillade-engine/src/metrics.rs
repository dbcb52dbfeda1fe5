// fusillade-engine: Sharded metrics collection
//
// Recording is O(1) against one shard: atomic counters plus a
// mutex-guarded histogram. Shards only merge when a snapshot is taken.
// Workers map to shards by id, so shard contention stays low even at
// high concurrency.

use crate::error::{EngineError, EngineResult};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default shard count; power of two keeps the modulo cheap
pub const DEFAULT_SHARDS: usize = 32;

/// Histogram bounds: 1 us resolution up to one hour
const HIST_MAX_MICROS: u64 = 3_600_000_000;
const HIST_SIGFIGS: u8 = 3;

/// Snapshots kept in the history ring
const HISTORY_CAP: usize = 4096;

/// One recorded attempt outcome
#[derive(Debug, Clone)]
pub struct Outcome {
    pub endpoint: String,
    pub protocol: &'static str,
    pub duration: Duration,
    pub success: bool,
    pub status_bucket: String,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub counters: HashMap<String, u64>,
}

struct EndpointShard {
    total: u64,
    successes: u64,
    failures: u64,
    hist: Histogram<u64>,
}

impl EndpointShard {
    fn new() -> Self {
        Self {
            total: 0,
            successes: 0,
            failures: 0,
            hist: new_histogram(),
        }
    }
}

struct Shard {
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    hist: Mutex<Histogram<u64>>,
    endpoints: Mutex<HashMap<String, EndpointShard>>,
    /// protocol -> status bucket -> count
    status: Mutex<HashMap<String, HashMap<String, u64>>>,
    /// protocol -> counter name -> sum
    custom: Mutex<HashMap<String, HashMap<String, u64>>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            hist: Mutex::new(new_histogram()),
            endpoints: Mutex::new(HashMap::new()),
            status: Mutex::new(HashMap::new()),
            custom: Mutex::new(HashMap::new()),
        }
    }
}

fn new_histogram() -> Histogram<u64> {
    // The bounds are compile-time sane; construction cannot fail
    Histogram::new_with_bounds(1, HIST_MAX_MICROS, HIST_SIGFIGS)
        .unwrap_or_else(|_| Histogram::new(HIST_SIGFIGS).expect("histogram construction"))
}

/// Latency summary in milliseconds
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyStats {
    pub min_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyStats {
    fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.is_empty() {
            return Self::default();
        }
        let to_ms = |us: u64| us as f64 / 1000.0;
        Self {
            min_ms: to_ms(hist.min()),
            mean_ms: hist.mean() / 1000.0,
            max_ms: to_ms(hist.max()),
            p50_ms: to_ms(hist.value_at_quantile(0.50)),
            p90_ms: to_ms(hist.value_at_quantile(0.90)),
            p95_ms: to_ms(hist.value_at_quantile(0.95)),
            p99_ms: to_ms(hist.value_at_quantile(0.99)),
        }
    }
}

/// Per-endpoint roll-up inside a snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointStats {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub latency: LatencyStats,
}

/// Point-in-time merge of all shards
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub duration_s: f64,
    pub rps: f64,
    pub latency: LatencyStats,
    pub endpoints: BTreeMap<String, EndpointStats>,
    pub status: BTreeMap<String, BTreeMap<String, u64>>,
    pub custom: BTreeMap<String, BTreeMap<String, u64>>,
}

impl StatsSnapshot {
    /// Failure rate in [0, 1]
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.failures as f64 / self.total as f64
    }
}

/// Sharded collector shared by all workers
pub struct MetricsCollector {
    shards: Vec<Shard>,
    history: Mutex<VecDeque<StatsSnapshot>>,
}

impl MetricsCollector {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Shard::new()).collect(),
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Record one outcome into the worker's shard
    pub fn record(&self, worker_id: usize, outcome: &Outcome) {
        let shard = &self.shards[worker_id % self.shards.len()];
        let micros = (outcome.duration.as_micros() as u64).max(1);

        shard.total.fetch_add(1, Ordering::Relaxed);
        if outcome.success {
            shard.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            shard.failures.fetch_add(1, Ordering::Relaxed);
        }
        shard.bytes_in.fetch_add(outcome.bytes_in, Ordering::Relaxed);
        shard
            .bytes_out
            .fetch_add(outcome.bytes_out, Ordering::Relaxed);

        shard.hist.lock().saturating_record(micros);

        {
            let mut endpoints = shard.endpoints.lock();
            let entry = endpoints
                .entry(outcome.endpoint.clone())
                .or_insert_with(EndpointShard::new);
            entry.total += 1;
            if outcome.success {
                entry.successes += 1;
            } else {
                entry.failures += 1;
            }
            entry.hist.saturating_record(micros);
        }

        {
            let mut status = shard.status.lock();
            *status
                .entry(outcome.protocol.to_string())
                .or_default()
                .entry(outcome.status_bucket.clone())
                .or_insert(0) += 1;
        }

        if !outcome.counters.is_empty() {
            let mut custom = shard.custom.lock();
            let per_protocol = custom.entry(outcome.protocol.to_string()).or_default();
            for (name, value) in &outcome.counters {
                *per_protocol.entry(name.clone()).or_insert(0) += value;
            }
        }
    }

    /// Merge every shard into a consistent snapshot
    pub fn snapshot(&self, elapsed: Duration) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot {
            duration_s: elapsed.as_secs_f64(),
            ..StatsSnapshot::default()
        };
        let mut hist = new_histogram();
        let mut endpoint_hists: BTreeMap<String, Histogram<u64>> = BTreeMap::new();

        for shard in &self.shards {
            snapshot.total += shard.total.load(Ordering::Relaxed);
            snapshot.successes += shard.successes.load(Ordering::Relaxed);
            snapshot.failures += shard.failures.load(Ordering::Relaxed);
            snapshot.bytes_in += shard.bytes_in.load(Ordering::Relaxed);
            snapshot.bytes_out += shard.bytes_out.load(Ordering::Relaxed);

            let _ = hist.add(&*shard.hist.lock());

            for (name, endpoint) in shard.endpoints.lock().iter() {
                let stats = snapshot.endpoints.entry(name.clone()).or_default();
                stats.total += endpoint.total;
                stats.successes += endpoint.successes;
                stats.failures += endpoint.failures;
                let merged = endpoint_hists
                    .entry(name.clone())
                    .or_insert_with(new_histogram);
                let _ = merged.add(&endpoint.hist);
            }

            for (protocol, buckets) in shard.status.lock().iter() {
                let merged = snapshot.status.entry(protocol.clone()).or_default();
                for (bucket, count) in buckets {
                    *merged.entry(bucket.clone()).or_insert(0) += count;
                }
            }

            for (protocol, counters) in shard.custom.lock().iter() {
                let merged = snapshot.custom.entry(protocol.clone()).or_default();
                for (name, value) in counters {
                    *merged.entry(name.clone()).or_insert(0) += value;
                }
            }
        }

        snapshot.latency = LatencyStats::from_histogram(&hist);
        for (name, endpoint_hist) in &endpoint_hists {
            if let Some(stats) = snapshot.endpoints.get_mut(name) {
                stats.latency = LatencyStats::from_histogram(endpoint_hist);
            }
        }

        if snapshot.duration_s > 0.0 {
            snapshot.rps = snapshot.total as f64 / snapshot.duration_s;
        }
        snapshot
    }

    /// Append a snapshot to the bounded history ring
    pub fn push_snapshot(&self, snapshot: StatsSnapshot) {
        let mut history = self.history.lock();
        if history.len() >= HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(snapshot);
    }

    /// Full snapshot history, oldest first
    pub fn history(&self) -> Vec<StatsSnapshot> {
        self.history.lock().iter().cloned().collect()
    }
}

/// Validate a shard count from configuration
pub fn shard_count(requested: Option<usize>) -> EngineResult<usize> {
    match requested {
        None => Ok(DEFAULT_SHARDS),
        Some(n) if n >= 16 => Ok(n),
        Some(n) => Err(EngineError::ConfigInvalid(format!(
            "shard count {} below minimum of 16",
            n
        ))),
    }
}
