// fusillade-engine: Resolved request templates

use crate::error::{EngineError, EngineResult};
use crate::extract::Extractor;
use fusillade_config::{Config, EndpointConfig};
use std::path::PathBuf;
use std::sync::Arc;

/// Where an attempt's body bytes come from
///
/// A file body is re-read on every attempt so retries always replay the
/// request from the start.
#[derive(Debug, Clone)]
pub enum BodySource {
    Empty,
    Inline(String),
    File(PathBuf),
}

/// One request template, constructed at startup and shared read-only
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    pub weight: u32,
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: BodySource,
    pub extractors: Vec<Extractor>,
}

impl Endpoint {
    /// Build the endpoint table from a validated configuration
    ///
    /// With no explicit endpoints the top-level target becomes a single
    /// endpoint named "default". Endpoint headers override run-level
    /// headers on key collision.
    pub fn table_from_config(config: &Config) -> EngineResult<Vec<Arc<Endpoint>>> {
        if config.endpoints.is_empty() {
            let url = config.target.clone().ok_or_else(|| {
                EngineError::ConfigInvalid("no target and no endpoints".to_string())
            })?;
            return Ok(vec![Arc::new(Endpoint {
                name: "default".to_string(),
                weight: 1,
                url,
                method: config.method.clone(),
                headers: config.headers.clone().into_iter().collect(),
                body: body_source(config.body.clone(), config.body_file.clone()),
                extractors: Vec::new(),
            })]);
        }

        let mut table = Vec::with_capacity(config.endpoints.len());
        for ep in &config.endpoints {
            table.push(Arc::new(Self::from_endpoint_config(config, ep)?));
        }
        Ok(table)
    }

    fn from_endpoint_config(config: &Config, ep: &EndpointConfig) -> EngineResult<Endpoint> {
        if ep.url.is_empty() {
            return Err(EngineError::ConfigInvalid(format!(
                "endpoint {}: empty url",
                ep.name
            )));
        }

        let mut headers: Vec<(String, String)> = config
            .headers
            .iter()
            .filter(|(k, _)| !ep.headers.contains_key(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.extend(ep.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        let extractors = ep
            .extractors
            .iter()
            .map(Extractor::compile)
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(Endpoint {
            name: ep.name.clone(),
            weight: ep.weight.max(1),
            url: ep.url.clone(),
            method: ep
                .method
                .clone()
                .unwrap_or_else(|| config.method.clone()),
            headers,
            body: body_source(ep.body.clone(), ep.body_file.clone()),
            extractors,
        })
    }
}

fn body_source(inline: Option<String>, file: Option<PathBuf>) -> BodySource {
    match (inline, file) {
        (Some(body), _) => BodySource::Inline(body),
        (None, Some(path)) => BodySource::File(path),
        (None, None) => BodySource::Empty,
    }
}
