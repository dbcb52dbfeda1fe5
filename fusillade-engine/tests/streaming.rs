// Integration tests for the WebSocket and SSE adapters
//
// Local axum servers stand in for the target.

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use fusillade_config::{Config, Protocol, SseConfig, WebsocketConfig};
use fusillade_engine::sse::SseRequester;
use fusillade_engine::ws::WsRequester;
use fusillade_engine::{AttemptContext, Endpoint, EngineError, Requester};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn bound_ctx(config: &Config) -> AttemptContext {
    let table = Endpoint::table_from_config(config).unwrap();
    let ctx = AttemptContext::new(CancellationToken::new(), Duration::from_secs(10));
    ctx.bind_endpoint(table[0].clone());
    ctx
}

async fn echo_socket(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        if socket.send(message).await.is_err() {
            break;
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(echo_socket)
}

#[tokio::test]
async fn test_websocket_send_and_receive_counters() {
    let addr = serve(Router::new().route("/ws", get(ws_handler))).await;

    let config = Config {
        protocol: Protocol::Websocket,
        target: Some(format!("ws://{}/ws", addr)),
        websocket: Some(WebsocketConfig {
            messages: vec!["ping {{n|1}}".to_string(), "ping 2".to_string()],
            message_interval_ms: Some(10),
            handshake_timeout_ms: 2_000,
            receive_timeout_ms: Some(300),
        }),
        ..Config::default()
    };

    let requester = WsRequester::new(&config, None, None);
    let report = requester.attempt(&bound_ctx(&config)).await.unwrap();

    assert_eq!(report.counter("messages_sent"), 2);
    assert_eq!(report.counter("messages_received"), 2);
    assert!(report.counter("bytes_sent") > 0);
    assert!(report.counter("bytes_received") > 0);
    assert!(report.counters.contains_key("connection_duration_ms"));
}

#[tokio::test]
async fn test_websocket_handshake_rejection() {
    // Route without an upgrade handler
    let addr = serve(Router::new().route("/plain", get(|| async { "hello" }))).await;

    let config = Config {
        protocol: Protocol::Websocket,
        target: Some(format!("ws://{}/plain", addr)),
        websocket: Some(WebsocketConfig::default()),
        ..Config::default()
    };

    let requester = WsRequester::new(&config, None, None);
    let err = requester.attempt(&bound_ctx(&config)).await.unwrap_err();
    assert!(matches!(err, EngineError::HandshakeFailed(_)));
}

async fn sse_five_events() -> Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>>
{
    let stream = futures::stream::iter(
        (0..5).map(|i| Ok(Event::default().event("tick").id(i.to_string()).data(format!("evt-{}", i)))),
    );
    Sse::new(stream)
}

async fn sse_slow_tail() -> Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>>
{
    let stream = futures::stream::unfold(0u32, |count| async move {
        if count < 2 {
            Some((Ok(Event::default().data(format!("fast-{}", count))), count + 1))
        } else {
            // Stall long enough for the per-read timeout to fire
            tokio::time::sleep(Duration::from_secs(30)).await;
            Some((Ok(Event::default().data("late")), count + 1))
        }
    });
    Sse::new(stream)
}

#[tokio::test]
async fn test_sse_stops_at_max_events() {
    let addr = serve(Router::new().route("/events", get(sse_five_events))).await;

    let config = Config {
        protocol: Protocol::Sse,
        target: Some(format!("http://{}/events", addr)),
        sse: Some(SseConfig {
            max_events: Some(3),
            read_timeout_ms: Some(2_000),
        }),
        ..Config::default()
    };

    let requester = SseRequester::new(&config, None, None).unwrap();
    let report = requester.attempt(&bound_ctx(&config)).await.unwrap();
    assert_eq!(report.counter("events_received"), 3);
    assert!(report.counter("bytes_received") > 0);
}

#[tokio::test]
async fn test_sse_read_timeout_is_end_of_receive() {
    let addr = serve(Router::new().route("/events", get(sse_slow_tail))).await;

    let config = Config {
        protocol: Protocol::Sse,
        target: Some(format!("http://{}/events", addr)),
        sse: Some(SseConfig {
            max_events: Some(100),
            read_timeout_ms: Some(300),
        }),
        ..Config::default()
    };

    let requester = SseRequester::new(&config, None, None).unwrap();
    let report = requester.attempt(&bound_ctx(&config)).await.unwrap();
    assert_eq!(report.counter("events_received"), 2);
    assert_eq!(report.status_bucket, "200");
}

#[tokio::test]
async fn test_sse_non_200_is_typed_error() {
    let addr = serve(Router::new()).await;

    let config = Config {
        protocol: Protocol::Sse,
        target: Some(format!("http://{}/missing", addr)),
        sse: Some(SseConfig::default()),
        ..Config::default()
    };

    let requester = SseRequester::new(&config, None, None).unwrap();
    let err = requester.attempt(&bound_ctx(&config)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::TransportStatus { status: 404, .. }
    ));
}
