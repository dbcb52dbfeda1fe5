// fusillade-engine: Load generation execution engine
//
// The scheduler drives a fixed worker fleet through a decorator-composed
// requester pipeline (endpoint selection -> retry -> logging -> protocol
// adapter) and aggregates outcomes into sharded latency histograms.

pub mod auth;
pub mod context;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod extract;
pub mod feeder;
pub mod grpc;
pub mod http;
pub mod limiter;
pub mod logging;
pub mod metrics;
pub mod pattern;
pub mod placeholder;
pub mod requester;
pub mod retry;
pub mod scheduler;
pub mod select;
pub mod sse;
pub mod threshold;
pub mod tls;
pub mod vars;
pub mod ws;

pub use context::AttemptContext;
pub use endpoint::{BodySource, Endpoint};
pub use engine::{Engine, RunReport};
pub use error::{EngineError, EngineResult};
pub use metrics::{MetricsCollector, Outcome, StatsSnapshot};
pub use requester::{AttemptReport, Requester};
pub use scheduler::{RunOutcome, Scheduler};
pub use threshold::{Threshold, Verdict};
pub use vars::VariableScope;
