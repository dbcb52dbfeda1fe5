// fusillade-engine: gRPC protocol adapter
//
// The proto file is compiled at startup (protox) and calls are made with
// dynamic messages (prost-reflect), so no generated client code is
// required. Channels are cached per resolved target; the first inserter
// wins and racing duplicates are discarded.

use crate::auth::AuthProvider;
use crate::context::AttemptContext;
use crate::error::{EngineError, EngineResult};
use crate::extract::run_extractors;
use crate::feeder::Feeder;
use crate::placeholder::render;
use crate::requester::{AttemptReport, Requester};
use crate::tls::insecure_rustls_config;
use async_trait::async_trait;
use dashmap::DashMap;
use fusillade_config::{Config, GrpcConfig};
use http::uri::PathAndQuery;
use hyper_util::rt::TokioIo;
use prost::Message as _;
use prost_reflect::{DescriptorPool, DynamicMessage, MethodDescriptor};
use rustls::pki_types::ServerName;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::metadata::{Ascii, MetadataKey, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint as TonicEndpoint};
use tonic::Status;
use tracing::debug;

/// Terminal requester performing one unary gRPC call per attempt
pub struct GrpcRequester {
    grpc: GrpcConfig,
    method: MethodDescriptor,
    path: PathAndQuery,
    insecure: bool,
    channels: DashMap<String, Channel>,
    feeder: Option<Arc<dyn Feeder>>,
    auth: Option<Arc<dyn AuthProvider>>,
}

impl GrpcRequester {
    pub fn new(
        config: &Config,
        feeder: Option<Arc<dyn Feeder>>,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> EngineResult<Self> {
        let grpc = config
            .grpc
            .clone()
            .ok_or_else(|| EngineError::ConfigInvalid("missing grpc section".to_string()))?;

        let method = resolve_method(&grpc)?;
        let path = PathAndQuery::try_from(format!(
            "/{}/{}",
            method.parent_service().full_name(),
            method.name()
        ))
        .map_err(|e| EngineError::BuildFailed(format!("method path: {}", e)))?;

        Ok(Self {
            grpc,
            method,
            path,
            insecure: config.insecure,
            channels: DashMap::new(),
            feeder,
            auth,
        })
    }

    /// Channel for a target; pooled unless the pool is full
    ///
    /// Returns the channel and whether it was created by this call.
    fn channel_for(&self, target: &str) -> EngineResult<(Channel, bool)> {
        if let Some(existing) = self.channels.get(target) {
            return Ok((existing.clone(), false));
        }

        let created = self.build_channel(target)?;
        if self.channels.len() >= self.grpc.pool_size {
            // Pool full: the channel is used for this attempt and dropped
            return Ok((created, true));
        }

        // Atomic insert; a racing loser drops its own channel
        let pooled = self
            .channels
            .entry(target.to_string())
            .or_insert(created)
            .clone();
        Ok((pooled, true))
    }

    fn drop_channel(&self, target: &str) {
        self.channels.remove(target);
    }

    fn build_channel(&self, target: &str) -> EngineResult<Channel> {
        if self.grpc.tls && self.insecure {
            return self.build_insecure_tls_channel(target);
        }

        let mut endpoint = TonicEndpoint::from_shared(target.to_string())
            .map_err(|e| EngineError::BuildFailed(format!("bad target {}: {}", target, e)))?;
        if self.grpc.tls {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| EngineError::BuildFailed(format!("tls config: {}", e)))?;
        }
        Ok(endpoint.connect_lazy())
    }

    /// TLS without certificate verification: dial and encrypt ourselves,
    /// hand tonic a plain-scheme endpoint so it does not negotiate again
    fn build_insecure_tls_channel(&self, target: &str) -> EngineResult<Channel> {
        let parsed = url::Url::parse(target)
            .map_err(|e| EngineError::BuildFailed(format!("bad target {}: {}", target, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| EngineError::BuildFailed(format!("target {} has no host", target)))?
            .to_string();
        let port = parsed.port().unwrap_or(443);

        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| EngineError::BuildFailed(format!("server name {}: {}", host, e)))?;
        let tls = tokio_rustls::TlsConnector::from(Arc::new(insecure_rustls_config()?));

        let connector = tower::service_fn(move |_uri: http::Uri| {
            let host = host.clone();
            let server_name = server_name.clone();
            let tls = tls.clone();
            async move {
                let tcp = TcpStream::connect((host.as_str(), port)).await?;
                let stream = tls
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                Ok::<_, std::io::Error>(TokioIo::new(stream))
            }
        });

        let endpoint = TonicEndpoint::from_shared(format!(
            "http://{}:{}",
            parsed.host_str().unwrap_or_default(),
            port
        ))
        .map_err(|e| EngineError::BuildFailed(format!("bad target {}: {}", target, e)))?;
        Ok(endpoint.connect_with_connector_lazy(connector))
    }

    fn build_request(
        &self,
        message: &DynamicMessage,
        metadata: &[(MetadataKey<Ascii>, MetadataValue<Ascii>)],
    ) -> tonic::Request<DynamicMessage> {
        let mut request = tonic::Request::new(message.clone());
        for (key, value) in metadata {
            request.metadata_mut().insert(key.clone(), value.clone());
        }
        request
    }

    async fn call_once(
        &self,
        channel: Channel,
        request: tonic::Request<DynamicMessage>,
    ) -> EngineResult<tonic::Response<DynamicMessage>> {
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| EngineError::TransportIo(format!("channel not ready: {}", e)))?;

        let codec = DynamicCodec::new(self.method.output());
        grpc.unary(request, self.path.clone(), codec)
            .await
            .map_err(status_error)
    }
}

fn resolve_method(grpc: &GrpcConfig) -> EngineResult<MethodDescriptor> {
    let include = grpc
        .proto_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let descriptors = protox::compile([&grpc.proto_file], [include])
        .map_err(|e| EngineError::BuildFailed(format!("proto compile: {}", e)))?;
    let pool = DescriptorPool::from_file_descriptor_set(descriptors)
        .map_err(|e| EngineError::BuildFailed(format!("descriptor pool: {}", e)))?;

    let service = pool
        .services()
        .find(|s| s.full_name() == grpc.service || s.name() == grpc.service)
        .ok_or_else(|| {
            EngineError::BuildFailed(format!("service {} not found in proto", grpc.service))
        })?;

    let method = service
        .methods()
        .find(|m| m.name() == grpc.method)
        .ok_or_else(|| {
            EngineError::BuildFailed(format!(
                "method {} not found on service {}",
                grpc.method,
                service.full_name()
            ))
        })?;

    if method.is_client_streaming() || method.is_server_streaming() {
        return Err(EngineError::BuildFailed(format!(
            "method {} is streaming; only unary calls are supported",
            method.name()
        )));
    }
    Ok(method)
}

fn status_error(status: Status) -> EngineError {
    EngineError::GrpcStatus {
        code: format!("{:?}", status.code()),
        code_value: status.code() as i32,
        message: status.message().to_string(),
    }
}

#[async_trait]
impl Requester for GrpcRequester {
    async fn attempt(&self, ctx: &AttemptContext) -> EngineResult<AttemptReport> {
        let endpoint = ctx
            .bound_endpoint()
            .ok_or_else(|| EngineError::BuildFailed("no endpoint bound".to_string()))?;
        let scope = ctx.ensure_scope();
        let record = match &self.feeder {
            Some(feeder) => Some(feeder.next().await?),
            None => None,
        };

        let target = render(&endpoint.url, Some(&scope), record.as_ref());
        if target.is_empty() {
            return Err(EngineError::BuildFailed("empty grpc target".to_string()));
        }

        let payload = render(&self.grpc.message, Some(&scope), record.as_ref());
        let mut deserializer = serde_json::Deserializer::from_str(&payload);
        let message = DynamicMessage::deserialize(self.method.input(), &mut deserializer)
            .map_err(|e| {
                EngineError::BuildFailed(format!(
                    "message does not decode into {}: {}",
                    self.method.input().full_name(),
                    e
                ))
            })?;
        let bytes_out = message.encoded_len() as u64;

        let mut metadata: Vec<(MetadataKey<Ascii>, MetadataValue<Ascii>)> = Vec::new();
        for (name, value) in &self.grpc.metadata {
            let key = MetadataKey::from_bytes(name.to_lowercase().as_bytes())
                .map_err(|_| EngineError::BuildFailed(format!("bad metadata key {}", name)))?;
            let rendered = render(value, Some(&scope), record.as_ref());
            let value = rendered
                .parse::<MetadataValue<Ascii>>()
                .map_err(|_| EngineError::BuildFailed(format!("bad metadata value for {}", name)))?;
            metadata.push((key, value));
        }
        if let Some(auth) = &self.auth {
            let token = auth.token().await?;
            let key = MetadataKey::from_bytes(b"authorization")
                .map_err(|_| EngineError::BuildFailed("bad metadata key".to_string()))?;
            let value = format!("Bearer {}", token)
                .parse::<MetadataValue<Ascii>>()
                .map_err(|_| EngineError::BuildFailed("bad bearer token".to_string()))?;
            metadata.push((key, value));
        }

        let (channel, fresh) = self.channel_for(&target)?;

        let call = async {
            let first = self
                .call_once(channel, self.build_request(&message, &metadata))
                .await;
            match first {
                // One re-dial on a pooled channel that fails immediately
                Err(EngineError::TransportIo(reason)) if !fresh => {
                    debug!(grpc_target = %target, reason = %reason, "re-dialing stale channel");
                    self.drop_channel(&target);
                    let (retry_channel, _) = self.channel_for(&target)?;
                    self.call_once(retry_channel, self.build_request(&message, &metadata))
                        .await
                }
                other => other,
            }
        };

        let response = tokio::select! {
            _ = ctx.cancel_token().cancelled() => return Err(EngineError::Cancelled),
            result = tokio::time::timeout(ctx.remaining(), call) => match result {
                Err(_) => return Err(EngineError::DeadlineExceeded),
                Ok(response) => response?,
            },
        };

        let reply = response.into_inner();
        let bytes_in = reply.encoded_len() as u64;

        // Extractors see the reply as JSON
        if !endpoint.extractors.is_empty() {
            if let Ok(json) = serde_json::to_vec(&reply) {
                run_extractors(&endpoint.extractors, &json, false, &scope);
            }
        }

        let mut report = AttemptReport::with_status(format!("{:?}", tonic::Code::Ok));
        report.bytes_in = bytes_in;
        report.bytes_out = bytes_out;
        report.counters.insert("messages_sent".to_string(), 1);
        report.counters.insert("messages_received".to_string(), 1);
        report.counters.insert("bytes_sent".to_string(), bytes_out);
        report.counters.insert("bytes_received".to_string(), bytes_in);
        report.counters.insert("status_code".to_string(), 0);
        Ok(report)
    }
}

/// Codec moving dynamic messages through tonic's unary call path
#[derive(Clone)]
pub struct DynamicCodec {
    output: prost_reflect::MessageDescriptor,
}

impl DynamicCodec {
    pub fn new(output: prost_reflect::MessageDescriptor) -> Self {
        Self { output }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder {
            output: self.output.clone(),
        }
    }
}

pub struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: DynamicMessage, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        item.encode(dst)
            .map_err(|e| Status::internal(e.to_string()))
    }
}

pub struct DynamicDecoder {
    output: prost_reflect::MessageDescriptor,
}

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<DynamicMessage>, Status> {
        let message = DynamicMessage::decode(self.output.clone(), src)
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Some(message))
    }
}
