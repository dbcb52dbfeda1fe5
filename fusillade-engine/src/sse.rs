// fusillade-engine: Server-Sent Events protocol adapter
//
// Issues a GET with Accept: text/event-stream and parses the WHATWG SSE
// grammar: "field: value" lines, ":" comments, blank-line terminators.
// Multiple data: lines concatenate with newlines.

use crate::auth::AuthProvider;
use crate::context::AttemptContext;
use crate::error::{truncate_snippet, EngineError, EngineResult};
use crate::feeder::Feeder;
use crate::placeholder::render;
use crate::requester::{AttemptReport, Requester};
use async_trait::async_trait;
use futures_util::StreamExt;
use fusillade_config::{Config, SseConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Events delivered per attempt when max_events is unset
pub const DEFAULT_MAX_EVENTS: u64 = 100;

/// Terminal requester consuming one SSE stream per attempt
pub struct SseRequester {
    client: reqwest::Client,
    sse: SseConfig,
    feeder: Option<Arc<dyn Feeder>>,
    auth: Option<Arc<dyn AuthProvider>>,
}

impl SseRequester {
    pub fn new(
        config: &Config,
        feeder: Option<Arc<dyn Feeder>>,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> EngineResult<Self> {
        // No client-level timeout: it would cut the event stream short.
        // The connect phase and read loop are bounded individually.
        let mut builder = reqwest::Client::builder();
        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| EngineError::BuildFailed(format!("sse client: {}", e)))?;

        Ok(Self {
            client,
            sse: config.sse.clone().unwrap_or_default(),
            feeder,
            auth,
        })
    }
}

/// One parsed SSE event
#[derive(Debug, Default, Clone, PartialEq)]
struct SseEvent {
    id: Option<String>,
    event: Option<String>,
    data: String,
}

/// Incremental SSE frame parser
#[derive(Debug, Default)]
struct EventParser {
    buffer: Vec<u8>,
    id: Option<String>,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl EventParser {
    /// Feed a chunk, returning every event completed by it
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "data" => self.data_lines.push(value.to_string()),
                "event" => self.event = Some(value.to_string()),
                "id" => self.id = Some(value.to_string()),
                _ => {}
            }
        }
        events
    }

    /// Blank-line terminator: emit when the data buffer is non-empty
    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        let data_lines = std::mem::take(&mut self.data_lines);
        if data_lines.is_empty() {
            return None;
        }
        Some(SseEvent {
            id,
            event,
            data: data_lines.join("\n"),
        })
    }
}

#[async_trait]
impl Requester for SseRequester {
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
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "text/event-stream")
            .timeout(ctx.remaining());

        for (name, value) in &endpoint.headers {
            request = request.header(name, render(value, Some(&scope), record.as_ref()));
        }
        if let Some(auth) = &self.auth {
            let token = auth.token().await?;
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let started = Instant::now();
        let response = tokio::select! {
            _ = ctx.cancel_token().cancelled() => return Err(EngineError::Cancelled),
            result = request.send() => result.map_err(|e| {
                if e.is_timeout() {
                    EngineError::DeadlineExceeded
                } else {
                    EngineError::TransportIo(e.to_string())
                }
            })?,
        };

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::TransportStatus {
                status,
                snippet: truncate_snippet(&body),
            });
        }

        let max_events = self.sse.max_events.unwrap_or(DEFAULT_MAX_EVENTS);
        let read_timeout = self.sse.read_timeout_ms.map(Duration::from_millis);

        let mut stream = response.bytes_stream();
        let mut parser = EventParser::default();
        let mut events_received = 0u64;
        let mut bytes_received = 0u64;

        'receive: while events_received < max_events {
            // The attempt deadline bounds the whole receive loop
            let wait = match read_timeout {
                Some(per_read) => per_read.min(ctx.remaining()),
                None => ctx.remaining(),
            };
            if wait.is_zero() {
                break;
            }

            let chunk = tokio::select! {
                _ = ctx.cancel_token().cancelled() => break 'receive,
                next = tokio::time::timeout(wait, stream.next()) => match next {
                    // Per-read timeout ends the receive, it is not an error
                    Err(_) => break 'receive,
                    Ok(None) => break 'receive,
                    Ok(Some(Err(_))) => break 'receive,
                    Ok(Some(Ok(chunk))) => chunk,
                },
            };

            bytes_received += chunk.len() as u64;
            for _event in parser.push(&chunk) {
                events_received += 1;
                if events_received >= max_events {
                    break 'receive;
                }
            }
        }

        let mut report = AttemptReport::with_status("200");
        report.bytes_in = bytes_received;
        report.counters.insert(
            "connection_duration_ms".to_string(),
            started.elapsed().as_millis() as u64,
        );
        report
            .counters
            .insert("events_received".to_string(), events_received);
        report
            .counters
            .insert("bytes_received".to_string(), bytes_received);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut parser = EventParser::default();
        let events = parser.push(b"data: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
        assert!(events[0].event.is_none());
    }

    #[test]
    fn test_multiline_data_concatenated() {
        let mut parser = EventParser::default();
        let events = parser.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn test_event_and_id_fields() {
        let mut parser = EventParser::default();
        let events = parser.push(b"id: 7\nevent: update\ndata: x\n\n");
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[0].event.as_deref(), Some("update"));
    }

    #[test]
    fn test_comment_ignored() {
        let mut parser = EventParser::default();
        let events = parser.push(b": keep-alive\n\ndata: real\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "real");
    }

    #[test]
    fn test_chunk_split_mid_line() {
        let mut parser = EventParser::default();
        assert!(parser.push(b"data: par").is_empty());
        let events = parser.push(b"tial\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "partial");
    }

    #[test]
    fn test_crlf_lines() {
        let mut parser = EventParser::default();
        let events = parser.push(b"data: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn test_blank_line_without_data_dispatches_nothing() {
        let mut parser = EventParser::default();
        assert!(parser.push(b"event: ping\n\n").is_empty());
    }
}
