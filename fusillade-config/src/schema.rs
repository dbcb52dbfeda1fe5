// Configuration schema and types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration error types
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Wire protocol driven by a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Websocket,
    Sse,
    Grpc,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Http
    }
}

impl Protocol {
    /// Stable name used in metrics roll-ups
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Websocket => "websocket",
            Protocol::Sse => "sse",
            Protocol::Grpc => "grpc",
        }
    }
}

/// Inter-arrival model for the rate limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrivalModel {
    Uniform,
    Poisson,
}

impl Default for ArrivalModel {
    fn default() -> Self {
        ArrivalModel::Uniform
    }
}

/// Top-level run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub protocol: Protocol,

    /// Target URL; optional when `endpoints` is given
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Inline request body
    #[serde(default)]
    pub body: Option<String>,

    /// Request body read from a file; re-read on every attempt
    #[serde(default)]
    pub body_file: Option<PathBuf>,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Stop after this many logical calls
    #[serde(default)]
    pub total: Option<u64>,

    /// Stop after this many seconds
    #[serde(default)]
    pub duration_s: Option<u64>,

    /// Target request rate (requests/second); ignored rules apply, see validate
    #[serde(default)]
    pub rate: Option<f64>,

    #[serde(default)]
    pub arrival: ArrivalModel,

    #[serde(default)]
    pub load_patterns: Vec<LoadPattern>,

    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra attempts after the first on retryable failures
    #[serde(default)]
    pub retries: u32,

    #[serde(default)]
    pub retry_backoff: RetryBackoffConfig,

    /// Pass/fail assertions, e.g. "http_req_duration:p95 < 250"
    #[serde(default)]
    pub thresholds: Vec<String>,

    #[serde(default)]
    pub auth: Option<AuthConfig>,

    #[serde(default)]
    pub feeder: Option<FeederConfig>,

    #[serde(default)]
    pub websocket: Option<WebsocketConfig>,

    #[serde(default)]
    pub sse: Option<SseConfig>,

    #[serde(default)]
    pub grpc: Option<GrpcConfig>,

    /// Accept invalid TLS certificates (encryption stays on)
    #[serde(default)]
    pub insecure: bool,

    /// Metrics shard count; minimum 16, default 32
    #[serde(default)]
    pub metrics_shards: Option<usize>,

    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,

    /// How long the scheduler waits for in-flight attempts after stop
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_snapshot_interval_ms() -> u64 {
    1_000
}

fn default_grace_period_ms() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            target: None,
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            body_file: None,
            concurrency: default_concurrency(),
            total: None,
            duration_s: None,
            rate: None,
            arrival: ArrivalModel::default(),
            load_patterns: Vec::new(),
            endpoints: Vec::new(),
            timeout_ms: default_timeout_ms(),
            retries: 0,
            retry_backoff: RetryBackoffConfig::default(),
            thresholds: Vec::new(),
            auth: None,
            feeder: None,
            websocket: None,
            sse: None,
            grpc: None,
            insecure: false,
            metrics_shards: None,
            snapshot_interval_ms: default_snapshot_interval_ms(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

/// One weighted request template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,

    #[serde(default = "default_weight")]
    pub weight: u32,

    pub url: String,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub body_file: Option<PathBuf>,

    #[serde(default)]
    pub extractors: Vec<ExtractorConfig>,
}

fn default_weight() -> u32 {
    1
}

/// Response extractor writing into the worker variable scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Variable name the extracted value is stored under
    pub name: String,

    pub kind: ExtractorKind,

    /// JSONPath or regex, depending on `kind`
    pub expr: String,

    /// Also run on responses with status >= 400
    #[serde(default)]
    pub on_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    Jsonpath,
    Regex,
}

/// Retry backoff tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryBackoffConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub max_delay_ms: u64,
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

impl Default for RetryBackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            max_delay_ms: default_backoff_max_ms(),
        }
    }
}

/// One segment of the load pattern sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LoadPattern {
    Constant { rps: f64, duration_s: u64 },
    Ramp { from_rps: f64, to_rps: f64, duration_s: u64 },
    Step { steps: Vec<LoadStep> },
    Spike { rps: f64, duration_s: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadStep {
    pub rps: f64,
    pub duration_s: u64,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Pre-supplied bearer token, no I/O
    Static {
        token: String,
    },
    /// OAuth2 client-credentials grant
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default)]
        scopes: Vec<String>,
        #[serde(default = "default_refresh_before_s")]
        refresh_before_expiry_s: u64,
    },
    /// OAuth2 resource-owner-password grant
    Password {
        token_url: String,
        client_id: String,
        client_secret: String,
        username: String,
        password: String,
        #[serde(default)]
        scopes: Vec<String>,
        #[serde(default = "default_refresh_before_s")]
        refresh_before_expiry_s: u64,
    },
}

fn default_refresh_before_s() -> u64 {
    30
}

/// Input data source for placeholder substitution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FeederConfig {
    /// First row is the header; rewinds on EOF
    Csv { path: PathBuf },
    /// Array of flat objects; exhausts after the last record
    Json { path: PathBuf },
}

/// WebSocket-specific options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsocketConfig {
    /// Text frames sent after the handshake, placeholder-substituted
    #[serde(default)]
    pub messages: Vec<String>,

    /// Pause between messages when more than one is configured
    #[serde(default)]
    pub message_interval_ms: Option<u64>,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// When set, frames are read until this deadline elapses
    #[serde(default)]
    pub receive_timeout_ms: Option<u64>,
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            message_interval_ms: None,
            handshake_timeout_ms: default_handshake_timeout_ms(),
            receive_timeout_ms: None,
        }
    }
}

/// Server-Sent Events options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    /// Stop after this many events (default 100)
    #[serde(default)]
    pub max_events: Option<u64>,

    /// Per-read timeout; elapsing ends the receive loop
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            max_events: None,
            read_timeout_ms: None,
        }
    }
}

/// gRPC-specific options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcConfig {
    /// proto3 source; imports resolve relative to its directory
    pub proto_file: PathBuf,

    /// Service name, plain or fully qualified
    pub service: String,

    pub method: String,

    /// JSON message payload, placeholder-substituted before decoding
    #[serde(default = "default_grpc_message")]
    pub message: String,

    /// Metadata; keys are lowercased, values placeholder-substituted
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub tls: bool,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_grpc_message() -> String {
    "{}".to_string()
}

fn default_pool_size() -> usize {
    10
}
