//! HTTP transport.
//!
//! `POST /rpc` takes one JSON-RPC envelope or a batch and answers in kind.
//! Framing errors (an unparseable body) map to HTTP 400; protocol-level
//! errors stay HTTP 200 with an `error` envelope. A batch of pure
//! notifications answers 202 with an empty body.
//!
//! `GET /events` opens a server-sent-events channel carrying
//! server-initiated `notification` events and periodic `ping` events.
//! Reconnecting clients may send `Last-Event-ID`; when the id is still in
//! the replay buffer the gap is replayed, otherwise the stream closes
//! cleanly rather than feeding stale data.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::context::{OutboundEvent, ServerContext};
use crate::protocol::ProtocolEngine;

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Bind address; loopback by default.
    pub bind_addr: SocketAddr,
    pub rpc_path: String,
    pub events_path: String,
    /// Interval between `ping` events on the SSE channel.
    pub ping_interval: Duration,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            rpc_path: "/rpc".to_string(),
            events_path: "/events".to_string(),
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Build the router for the HTTP transport.
pub fn build_router(ctx: Arc<ServerContext>, config: &HttpServerConfig) -> Router {
    Router::new()
        .route(&config.rpc_path, post(rpc_post))
        .route(&config.events_path, get(events_get))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind and serve until the process is stopped.
pub async fn serve_http(
    ctx: Arc<ServerContext>,
    config: HttpServerConfig,
    listener: tokio::net::TcpListener,
) -> std::io::Result<()> {
    // Periodic pings keep intermediaries from idling the SSE sockets out.
    let ping_ctx = ctx.clone();
    let ping_interval = config.ping_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            ping_ctx.events.publish("ping", "{}");
        }
    });

    info!(addr = %config.bind_addr, "listening on http");
    let router = build_router(ctx.clone(), &config);
    axum::serve(listener, router).await?;

    ctx.shutdown().await;
    Ok(())
}

async fn rpc_post(State(ctx): State<Arc<ServerContext>>, body: Bytes) -> Response {
    // An unparseable body is a transport framing error, not a protocol
    // error envelope.
    let incoming: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("malformed JSON body: {}", e))
                .into_response()
        }
    };

    let is_batch = incoming.is_array();
    let engine = ProtocolEngine::new(ctx);
    let responses = engine.process_value(incoming).await;

    if responses.is_empty() {
        // Pure notifications: nothing to answer.
        return StatusCode::ACCEPTED.into_response();
    }
    if is_batch {
        (StatusCode::OK, Json(responses)).into_response()
    } else {
        (StatusCode::OK, Json(responses.into_iter().next())).into_response()
    }
}

async fn events_get(State(ctx): State<Arc<ServerContext>>, headers: HeaderMap) -> Response {
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    // Subscribe before snapshotting the replay buffer so no event falls
    // between the two.
    let rx = ctx.events.subscribe();

    let (backlog, cutoff) = match last_event_id {
        Some(last_id) => match ctx.events.replay_after(last_id) {
            Some(backlog) => {
                let cutoff = backlog.last().map(|e| e.id).unwrap_or(last_id);
                (backlog, cutoff)
            }
            None => {
                // The id was evicted: close cleanly instead of replaying a
                // gap the client cannot detect.
                debug!(last_id, "last-event-id outside replay buffer, closing");
                let empty = stream::empty::<std::result::Result<Event, Infallible>>();
                return Sse::new(empty).into_response();
            }
        },
        None => (Vec::new(), ctx.events.latest_id()),
    };

    let replay = stream::iter(backlog).map(to_sse_event);
    let live = live_events(rx, cutoff).map(to_sse_event);

    Sse::new(replay.chain(live))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn to_sse_event(event: OutboundEvent) -> std::result::Result<Event, Infallible> {
    Ok(Event::default()
        .id(event.id.to_string())
        .event(event.name)
        .data(event.data))
}

/// Live tail of the event bus, skipping ids at or below `cutoff` (already
/// replayed) and ending cleanly when the bus lags or closes.
fn live_events(
    rx: broadcast::Receiver<OutboundEvent>,
    cutoff: u64,
) -> impl Stream<Item = OutboundEvent> {
    stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.id <= cutoff => continue,
                Ok(event) => return Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event subscriber lagged, closing stream");
                    return None;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}
