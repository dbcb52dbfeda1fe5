// fusillade-engine: HTTP protocol adapter

use crate::auth::AuthProvider;
use crate::context::AttemptContext;
use crate::endpoint::BodySource;
use crate::error::{truncate_snippet, EngineError, EngineResult};
use crate::extract::{run_extractors, BODY_CAP};
use crate::feeder::Feeder;
use crate::placeholder::render;
use crate::requester::{AttemptReport, Requester};
use async_trait::async_trait;
use fusillade_config::Config;
use std::sync::Arc;
use std::time::Duration;

/// Terminal requester performing one HTTP request per attempt
pub struct HttpRequester {
    client: reqwest::Client,
    feeder: Option<Arc<dyn Feeder>>,
    auth: Option<Arc<dyn AuthProvider>>,
}

impl HttpRequester {
    pub fn new(
        config: &Config,
        feeder: Option<Arc<dyn Feeder>>,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> EngineResult<Self> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_millis(config.timeout_ms));
        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| EngineError::BuildFailed(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            feeder,
            auth,
        })
    }

    /// Read the response body up to the extraction cap
    ///
    /// Read errors yield whatever was received so far; the attempt is
    /// still classified by status.
    async fn read_body(response: reqwest::Response) -> Vec<u8> {
        let mut body: Vec<u8> = Vec::new();
        let mut response = response;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let room = BODY_CAP - body.len();
                    if chunk.len() >= room {
                        body.extend_from_slice(&chunk[..room]);
                        break;
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }
        body
    }
}

fn map_send_error(err: reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::DeadlineExceeded
    } else {
        EngineError::TransportIo(err.to_string())
    }
}

#[async_trait]
impl Requester for HttpRequester {
    async fn attempt(&self, ctx: &AttemptContext) -> EngineResult<AttemptReport> {
        let endpoint = ctx
            .bound_endpoint()
            .ok_or_else(|| EngineError::BuildFailed("no endpoint bound".to_string()))?;
        let scope = ctx.ensure_scope();
        let record = match &self.feeder {
            Some(feeder) => Some(feeder.next().await?),
            None => None,
        };

        let url = render(&endpoint.url, Some(&scope), record.as_ref());
        let method = reqwest::Method::from_bytes(endpoint.method.to_uppercase().as_bytes())
            .map_err(|_| EngineError::BuildFailed(format!("bad method {}", endpoint.method)))?;

        let mut request = self
            .client
            .request(method, &url)
            .timeout(ctx.remaining());

        for (name, value) in &endpoint.headers {
            request = request.header(name, render(value, Some(&scope), record.as_ref()));
        }

        let mut bytes_out = 0u64;
        match &endpoint.body {
            BodySource::Empty => {}
            BodySource::Inline(template) => {
                let body = render(template, Some(&scope), record.as_ref());
                bytes_out = body.len() as u64;
                request = request.body(body);
            }
            BodySource::File(path) => {
                // Re-read per attempt so retries replay the body
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    EngineError::BuildFailed(format!("body file {}: {}", path.display(), e))
                })?;
                let body = render(&raw, Some(&scope), record.as_ref());
                bytes_out = body.len() as u64;
                request = request.body(body);
            }
        }

        if let Some(auth) = &self.auth {
            let token = auth.token().await?;
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = tokio::select! {
            _ = ctx.cancel_token().cancelled() => return Err(EngineError::Cancelled),
            result = request.send() => result.map_err(map_send_error)?,
        };

        let status = response.status().as_u16();
        let body = Self::read_body(response).await;
        let bytes_in = body.len() as u64;

        let error_status = status >= 400;
        run_extractors(&endpoint.extractors, &body, error_status, &scope);

        if error_status {
            let snippet = truncate_snippet(&String::from_utf8_lossy(&body));
            return Err(EngineError::TransportStatus { status, snippet });
        }

        Ok(AttemptReport {
            status_bucket: status.to_string(),
            bytes_in,
            bytes_out,
            counters: Default::default(),
        })
    }
}
