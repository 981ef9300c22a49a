//! HTTP/WebSocket surface for the push layer.
//!
//! `GET /push` establishes a channel (WebSocket upgrade for the
//! bidirectional transport, a suspended streaming response for the
//! rest); `POST /push` carries a side-channel data frame. Each channel
//! gets one pump task so delivery is strictly one message at a time.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures::{future, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use uplink_core::{frame, PushMode, SessionId, TransportKind, UiId};

use crate::channel::{Channel, ChannelQueues, WireEvent};
use crate::handler::{ChannelEvent, PushHandler, PushRequest, RequestKind};
use crate::session::SessionRegistry;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub default_push_mode: PushMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9092,
            max_send_queue: 256,
            default_push_mode: PushMode::Automatic,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<PushHandler>,
    pub registry: Arc<SessionRegistry>,
    pub max_send_queue: usize,
    pub default_push_mode: PushMode,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/push", get(push_get).post(push_post))
        .route("/session", post(session_create))
        .route("/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps it alive.
pub async fn start(
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    handler: Arc<PushHandler>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState {
        handler,
        registry,
        max_send_queue: config.max_send_queue,
        default_push_mode: config.default_push_mode,
    };
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "uplink push server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

#[derive(Deserialize)]
struct PushQuery {
    session: String,
    ui: u32,
    transport: Option<String>,
}

/// Channel establishment.
async fn push_get(
    State(state): State<AppState>,
    Query(query): Query<PushQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let kind = match query
        .transport
        .as_deref()
        .unwrap_or("long-polling")
        .parse::<TransportKind>()
    {
        Ok(kind) => kind,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let session_id = SessionId::from_raw(query.session);
    let ui_id = UiId(query.ui);

    if kind.is_bidirectional() {
        match ws {
            Ok(upgrade) => upgrade
                .on_upgrade(move |socket| handle_ws(socket, state, session_id, ui_id))
                .into_response(),
            Err(_) => (
                StatusCode::BAD_REQUEST,
                "websocket transport requires an upgrade request",
            )
                .into_response(),
        }
    } else {
        establish_http(state, session_id, ui_id, kind).await
    }
}

/// Side-channel data frame. The request itself produces no body.
async fn push_post(
    State(state): State<AppState>,
    Query(query): Query<PushQuery>,
    body: String,
) -> StatusCode {
    state
        .handler
        .on_request(PushRequest {
            session_id: SessionId::from_raw(query.session),
            ui_id: UiId(query.ui),
            kind: RequestKind::Message { body },
        })
        .await;
    StatusCode::OK
}

/// Establish a push channel over a plain streamed HTTP response.
async fn establish_http(
    state: AppState,
    session_id: SessionId,
    ui_id: UiId,
    kind: TransportKind,
) -> Response {
    let (channel, queues) = Channel::open(kind, state.max_send_queue);
    let ChannelQueues { wire, deliver } = queues;

    spawn_delivery_pump(Arc::clone(&state.handler), channel.clone(), deliver);
    spawn_cancel_watch(Arc::clone(&state.handler), channel.clone());

    state
        .handler
        .on_request(PushRequest {
            session_id,
            ui_id,
            kind: RequestKind::Establish {
                channel: channel.clone(),
            },
        })
        .await;

    if !channel.is_suspended() {
        // Resolution failed; nothing was registered. Cancel so the
        // servicing tasks wind down with the request.
        channel.cancel();
        return StatusCode::NO_CONTENT.into_response();
    }

    let stream = ReceiverStream::new(wire)
        .take_while(|event| future::ready(!matches!(event, WireEvent::Close)))
        .filter_map(|event| {
            future::ready(match event {
                WireEvent::Data(bytes) => Some(Ok::<Bytes, Infallible>(bytes)),
                // HTTP bodies flush per chunk; nothing extra to do.
                _ => None,
            })
        });

    (
        [(header::CONTENT_TYPE, frame::CONTENT_TYPE)],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Service a bidirectional WebSocket channel: wire events out, inbound
/// text frames straight into the request path.
async fn handle_ws(socket: WebSocket, state: AppState, session_id: SessionId, ui_id: UiId) {
    let (channel, queues) = Channel::open(TransportKind::Websocket, state.max_send_queue);
    let ChannelQueues { mut wire, deliver } = queues;

    spawn_delivery_pump(Arc::clone(&state.handler), channel.clone(), deliver);

    state
        .handler
        .on_request(PushRequest {
            session_id: session_id.clone(),
            ui_id,
            kind: RequestKind::Establish {
                channel: channel.clone(),
            },
        })
        .await;

    if !channel.is_suspended() {
        channel.cancel();
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = wire.recv().await {
            match event {
                WireEvent::Data(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                WireEvent::Flush => {}
                WireEvent::Close => break,
            }
        }
    });

    let reader_handler = Arc::clone(&state.handler);
    let reader_session = session_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_rx.next().await {
            match message {
                WsMessage::Text(text) => {
                    reader_handler
                        .on_request(PushRequest {
                            session_id: reader_session.clone(),
                            ui_id,
                            kind: RequestKind::Message {
                                body: text.to_string(),
                            },
                        })
                        .await;
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    state
        .handler
        .on_channel_event(&channel, ChannelEvent::Cancelled);
}

/// One pump per channel: delivery is strictly one message at a time.
fn spawn_delivery_pump(
    handler: Arc<PushHandler>,
    channel: Channel,
    mut deliver: mpsc::Receiver<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe = deliver.recv() => {
                    match maybe {
                        Some(message) => {
                            handler.on_channel_event(&channel, ChannelEvent::Message(message));
                            if !channel.is_open() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = channel.cancelled() => break,
            }
        }
    })
}

/// Fire the cancellation notification when the physical connection goes
/// away while still suspended.
fn spawn_cancel_watch(handler: Arc<PushHandler>, channel: Channel) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        channel.wire_closed().await;
        if channel.is_suspended() {
            handler.on_channel_event(&channel, ChannelEvent::Cancelled);
        }
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSession {
    session: SessionId,
    ui: UiId,
    security_token: String,
    push_mode: PushMode,
}

/// Create a session with one UI and hand back what a client needs to
/// drive the push endpoints.
async fn session_create(State(state): State<AppState>) -> Json<CreatedSession> {
    let session = state.registry.create_session(state.default_push_mode);
    let (ui, security_token) = {
        let mut uis = session.lock().await;
        let ui = uis.create_ui(session.default_push_mode());
        (ui.id(), ui.security_token().to_owned())
    };
    Json(CreatedSession {
        session: session.id().clone(),
        ui,
        security_token,
        push_mode: state.default_push_mode,
    })
}

/// Health check HTTP endpoint.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.registry.count(),
    }))
}
