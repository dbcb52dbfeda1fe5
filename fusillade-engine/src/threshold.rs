// fusillade-engine: Threshold assertions
//
// Grammar: "metric:selector OP value", e.g. "http_req_duration:p95 < 250".
// Parsing happens before the run and failures are fatal; evaluation runs
// against the final snapshot.

use crate::error::{EngineError, EngineResult};
use crate::metrics::StatsSnapshot;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    HttpReqDuration,
    HttpReqFailed,
    HttpRequests,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    P50,
    P90,
    P95,
    P99,
    Avg,
    Min,
    Max,
    Rate,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Op {
    fn apply(&self, actual: f64, bound: f64) -> bool {
        match self {
            Op::Lt => actual < bound,
            Op::Le => actual <= bound,
            Op::Gt => actual > bound,
            Op::Ge => actual >= bound,
            Op::Eq => actual == bound,
        }
    }

}

/// One parsed assertion
#[derive(Debug, Clone)]
pub struct Threshold {
    pub metric: Metric,
    pub selector: Selector,
    pub op: Op,
    pub value: f64,
    pub raw: String,
}

/// Result of evaluating one assertion
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub threshold: String,
    pub actual: f64,
    pub passed: bool,
}

impl Threshold {
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let bad = |detail: &str| {
            EngineError::ConfigInvalid(format!("threshold {:?}: {}", raw, detail))
        };

        // Two-character operators first so "<=" is not read as "<"
        let (op, op_index, op_len) = ["<=", ">=", "==", "<", ">", "="]
            .iter()
            .find_map(|symbol| raw.find(symbol).map(|i| (*symbol, i, symbol.len())))
            .ok_or_else(|| bad("missing operator"))?;

        let op = match op {
            "<" => Op::Lt,
            "<=" => Op::Le,
            ">" => Op::Gt,
            ">=" => Op::Ge,
            "==" | "=" => Op::Eq,
            _ => return Err(bad("missing operator")),
        };

        let left = raw[..op_index].trim();
        let right = raw[op_index + op_len..].trim();

        let (metric_name, selector_name) = left
            .split_once(':')
            .ok_or_else(|| bad("expected metric:selector"))?;

        let metric = match metric_name.trim() {
            "http_req_duration" => Metric::HttpReqDuration,
            "http_req_failed" => Metric::HttpReqFailed,
            "http_requests" => Metric::HttpRequests,
            other => return Err(bad(&format!("unknown metric {:?}", other))),
        };

        let selector = match selector_name.trim() {
            "p50" => Selector::P50,
            "p90" => Selector::P90,
            "p95" => Selector::P95,
            "p99" => Selector::P99,
            "avg" => Selector::Avg,
            "min" => Selector::Min,
            "max" => Selector::Max,
            "rate" => Selector::Rate,
            "count" => Selector::Count,
            other => return Err(bad(&format!("unknown selector {:?}", other))),
        };

        let duration_selector = matches!(
            selector,
            Selector::P50
                | Selector::P90
                | Selector::P95
                | Selector::P99
                | Selector::Avg
                | Selector::Min
                | Selector::Max
        );
        let valid = match metric {
            Metric::HttpReqDuration => duration_selector,
            Metric::HttpReqFailed | Metric::HttpRequests => {
                matches!(selector, Selector::Rate | Selector::Count)
            }
        };
        if !valid {
            return Err(bad(&format!(
                "selector {:?} not valid for metric {:?}",
                selector_name.trim(),
                metric_name.trim()
            )));
        }

        let value: f64 = right
            .parse()
            .map_err(|_| bad(&format!("bad numeric bound {:?}", right)))?;

        Ok(Self {
            metric,
            selector,
            op,
            value,
            raw: raw.to_string(),
        })
    }

    /// The observed value this assertion compares against
    pub fn actual(&self, snapshot: &StatsSnapshot) -> f64 {
        match (self.metric, self.selector) {
            (Metric::HttpReqDuration, Selector::P50) => snapshot.latency.p50_ms,
            (Metric::HttpReqDuration, Selector::P90) => snapshot.latency.p90_ms,
            (Metric::HttpReqDuration, Selector::P95) => snapshot.latency.p95_ms,
            (Metric::HttpReqDuration, Selector::P99) => snapshot.latency.p99_ms,
            (Metric::HttpReqDuration, Selector::Avg) => snapshot.latency.mean_ms,
            (Metric::HttpReqDuration, Selector::Min) => snapshot.latency.min_ms,
            (Metric::HttpReqDuration, Selector::Max) => snapshot.latency.max_ms,
            (Metric::HttpReqFailed, Selector::Rate) => snapshot.failure_rate(),
            (Metric::HttpReqFailed, _) => snapshot.failures as f64,
            (Metric::HttpRequests, Selector::Rate) => snapshot.rps,
            (Metric::HttpRequests, _) => snapshot.total as f64,
            (Metric::HttpReqDuration, Selector::Rate | Selector::Count) => {
                unreachable!("parse() rejects rate/count selectors for http_req_duration")
            }
        }
    }

    pub fn evaluate(&self, snapshot: &StatsSnapshot) -> Verdict {
        let actual = self.actual(snapshot);
        Verdict {
            threshold: self.raw.clone(),
            actual,
            passed: self.op.apply(actual, self.value),
        }
    }

}

/// Parse every configured assertion; any failure is fatal pre-run
pub fn parse_all(exprs: &[String]) -> EngineResult<Vec<Threshold>> {
    exprs.iter().map(|s| Threshold::parse(s)).collect()
}

/// Evaluate all assertions; the run passes only if every one passes
pub fn evaluate_all(thresholds: &[Threshold], snapshot: &StatsSnapshot) -> (Vec<Verdict>, bool) {
    let verdicts: Vec<Verdict> = thresholds.iter().map(|t| t.evaluate(snapshot)).collect();
    let passed = verdicts.iter().all(|v| v.passed);
    (verdicts, passed)
}
