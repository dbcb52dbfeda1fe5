// fusillade-engine: WebSocket protocol adapter

use crate::auth::AuthProvider;
use crate::context::AttemptContext;
use crate::error::{EngineError, EngineResult};
use crate::feeder::Feeder;
use crate::placeholder::render;
use crate::requester::{AttemptReport, Requester};
use crate::tls::insecure_native_tls;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use fusillade_config::{Config, WebsocketConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::Connector;
use tracing::debug;

/// Terminal requester performing one WebSocket session per attempt
pub struct WsRequester {
    ws: WebsocketConfig,
    insecure: bool,
    feeder: Option<Arc<dyn Feeder>>,
    auth: Option<Arc<dyn AuthProvider>>,
}

impl WsRequester {
    pub fn new(
        config: &Config,
        feeder: Option<Arc<dyn Feeder>>,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> Self {
        Self {
            ws: config.websocket.clone().unwrap_or_default(),
            insecure: config.insecure,
            feeder,
            auth,
        }
    }
}

fn handshake_error(err: WsError) -> EngineError {
    match err {
        WsError::Http(response) => EngineError::HandshakeFailed(format!(
            "server rejected upgrade with status {}",
            response.status().as_u16()
        )),
        other => EngineError::HandshakeFailed(other.to_string()),
    }
}

/// Describe a mid-session failure, carrying the close code when available
fn session_error(err: WsError) -> EngineError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            EngineError::TransportIo("connection closed".to_string())
        }
        WsError::Protocol(e) => EngineError::TransportIo(format!("protocol: {}", e)),
        other => EngineError::TransportIo(other.to_string()),
    }
}

#[async_trait]
impl Requester for WsRequester {
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
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| EngineError::BuildFailed(format!("bad websocket url {}: {}", url, e)))?;

        for (name, value) in &endpoint.headers {
            let rendered = render(value, Some(&scope), record.as_ref());
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| EngineError::BuildFailed(format!("bad header name {}", name)))?;
            let value = HeaderValue::from_str(&rendered)
                .map_err(|_| EngineError::BuildFailed(format!("bad header value for {}", name)))?;
            request.headers_mut().insert(name, value);
        }

        if let Some(auth) = &self.auth {
            let token = auth.token().await?;
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| EngineError::BuildFailed("bad bearer token".to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let connector = if self.insecure {
            Some(Connector::NativeTls(insecure_native_tls()?))
        } else {
            None
        };

        let started = Instant::now();
        let handshake = tokio_tungstenite::connect_async_tls_with_config(
            request, None, false, connector,
        );
        let handshake_timeout = Duration::from_millis(self.ws.handshake_timeout_ms);

        let (mut stream, _response) = tokio::select! {
            _ = ctx.cancel_token().cancelled() => return Err(EngineError::Cancelled),
            result = tokio::time::timeout(handshake_timeout, handshake) => match result {
                Err(_) => {
                    return Err(EngineError::HandshakeFailed(format!(
                        "no upgrade within {} ms",
                        self.ws.handshake_timeout_ms
                    )))
                }
                Ok(Err(e)) => return Err(handshake_error(e)),
                Ok(Ok(pair)) => pair,
            },
        };

        let mut messages_sent = 0u64;
        let mut bytes_sent = 0u64;
        let interval = self.ws.message_interval_ms.map(Duration::from_millis);

        for (index, template) in self.ws.messages.iter().enumerate() {
            if index > 0 && self.ws.messages.len() > 1 {
                if let Some(pause) = interval {
                    tokio::select! {
                        _ = ctx.cancel_token().cancelled() => return Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
            }

            let text = render(template, Some(&scope), record.as_ref());
            bytes_sent += text.len() as u64;
            stream
                .send(Message::Text(text))
                .await
                .map_err(session_error)?;
            messages_sent += 1;
        }

        let mut messages_received = 0u64;
        let mut bytes_received = 0u64;

        if let Some(receive_ms) = self.ws.receive_timeout_ms {
            let deadline = Instant::now() + Duration::from_millis(receive_ms);
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                tokio::select! {
                    _ = ctx.cancel_token().cancelled() => break,
                    next = tokio::time::timeout(remaining, stream.next()) => match next {
                        // Read timeout is end-of-receive, not an error
                        Err(_) => break,
                        Ok(None) => break,
                        Ok(Some(Err(e))) => {
                            debug!(error = %e, "websocket receive ended");
                            break;
                        }
                        Ok(Some(Ok(message))) => match message {
                            Message::Text(text) => {
                                messages_received += 1;
                                bytes_received += text.len() as u64;
                            }
                            Message::Binary(data) => {
                                messages_received += 1;
                                bytes_received += data.len() as u64;
                            }
                            Message::Close(_) => break,
                            _ => {}
                        },
                    },
                }
            }
        }

        let _ = stream.close(None).await;

        let mut report = AttemptReport::with_status("ok");
        report.bytes_out = bytes_sent;
        report.bytes_in = bytes_received;
        report
            .counters
            .insert("connection_duration_ms".to_string(), started.elapsed().as_millis() as u64);
        report.counters.insert("messages_sent".to_string(), messages_sent);
        report
            .counters
            .insert("messages_received".to_string(), messages_received);
        report.counters.insert("bytes_sent".to_string(), bytes_sent);
        report
            .counters
            .insert("bytes_received".to_string(), bytes_received);
        Ok(report)
    }
}
