//! Syncpad server - collaborative text editing over differential sync
//!
//! A real-time collaboration backend using:
//! - Character-level diff/patch with fuzzy application for edit reconciliation
//! - Per-document server shadows guarded by per-document locks
//! - Sled embedded database for document and version persistence
//! - Axum with WebSocket for bidirectional JSON event transport

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::Method,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Serialize;
use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

mod api;
mod auth;
mod config;
mod patch;
mod storage;
mod sync;

use auth::{AuthUser, TokenVerifier};
use config::{Environment, ServerConfig};
use storage::{DocumentStore, StorageConfig};
use sync::protocol::{ClientEvent, HandshakeFrame, ServerEvent};
use sync::{SyncEngine, SyncEngineConfig};

/// How long a fresh socket may take to present its token.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long writer tasks keep draining their queues after shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Shared application state
pub struct AppState {
    /// Differential synchronization engine
    pub engine: Arc<SyncEngine>,
    /// Bearer-token gate
    pub verifier: TokenVerifier,
    /// Server start time
    started_at: Instant,
}

// ============================================================================
// HEALTH
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_documents: usize,
    active_sessions: usize,
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.engine.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        active_documents: stats.active_rooms,
        active_sessions: stats.active_sessions,
    })
}

// ============================================================================
// WEBSOCKET HANDLER
// ============================================================================

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one WebSocket connection: authenticate the handshake, then run one
/// reader and one writer task until either side ends.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let user = match await_handshake(&mut ws_rx, &state).await {
        Ok(user) => user,
        Err(message) => {
            warn!("Handshake rejected: {}", message);
            let event = ServerEvent::Error { message };
            if let Ok(text) = serde_json::to_string(&event) {
                let _ = ws_tx.send(Message::Text(text)).await;
            }
            let _ = ws_tx.close().await;
            return;
        }
    };

    let (session, outbound) = state.engine.register_session(&user);
    let session_id = session.id.clone();
    info!("Connection authenticated: {} ({})", user.username, session_id);

    let shutdown = state.engine.shutdown_receiver();
    let write_task = tokio::spawn(write_loop(ws_tx, outbound, shutdown));

    let engine = state.engine.clone();
    let read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => engine.handle_event(&session.id, event).await,
                    Err(e) => {
                        debug!("Malformed frame from {}: {}", session.id, e);
                        let _ = session.send(ServerEvent::Error {
                            message: format!("Malformed event: {}", e),
                        });
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
            // A broadcast may have classified this session as slow and
            // removed it; stop reading for it then.
            if !engine.has_session(&session.id) {
                break;
            }
        }
    });

    tokio::select! {
        _ = write_task => {}
        _ = read_task => {}
    }

    state.engine.disconnect_session(&session_id);
    info!("Connection closed: {}", session_id);
}

/// Writer task: drain the session's outbound queue into the socket. On
/// shutdown, keep draining under a short deadline, then close.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: tokio::sync::mpsc::Receiver<ServerEvent>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            maybe = outbound.recv() => match maybe {
                Some(event) => {
                    if send_event(&mut ws_tx, &event).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = shutdown.recv() => {
                let deadline = tokio::time::sleep(SHUTDOWN_DRAIN);
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        maybe = outbound.recv() => match maybe {
                            Some(event) => {
                                if send_event(&mut ws_tx, &event).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                        _ = &mut deadline => break,
                    }
                }
                break;
            }
        }
    }
    let _ = ws_tx.close().await;
}

async fn send_event(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => ws_tx.send(Message::Text(text)).await,
        Err(e) => {
            warn!("Failed to encode event: {}", e);
            Ok(())
        }
    }
}

/// Wait for the first frame and validate the token it carries under
/// `auth.token`. Anything else rejects the connection.
async fn await_handshake(
    ws_rx: &mut SplitStream<WebSocket>,
    state: &AppState,
) -> Result<AuthUser, String> {
    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, ws_rx.next())
        .await
        .map_err(|_| "Authentication error".to_string())?;

    match frame {
        Some(Ok(Message::Text(text))) => {
            let handshake: HandshakeFrame =
                serde_json::from_str(&text).map_err(|_| "Authentication error".to_string())?;
            state
                .verifier
                .verify(&handshake.auth.token)
                .map_err(|e| e.to_string())
        }
        _ => Err("Authentication error".to_string()),
    }
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() {
    // Load environment variables before anything reads them.
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env().expect("Invalid configuration");

    let default_filter = match config.environment {
        Environment::Development => "syncpad=debug,tower_http=info",
        Environment::Production => "syncpad=info,tower_http=info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let verifier = TokenVerifier::new(&config.token_secret).expect("Invalid token secret");

    info!("Initializing storage at: {}", config.storage_path);
    let storage =
        DocumentStore::open(StorageConfig::new(&config.storage_path)).expect("Failed to open storage");

    let engine = Arc::new(SyncEngine::new(storage, SyncEngineConfig::default()));
    let _sweeper = engine.clone().start_background_tasks();

    let state = Arc::new(AppState {
        engine: engine.clone(),
        verifier,
        started_at: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let app = Router::new()
        // Health check
        .route("/health", get(health_check))
        // Document directory
        .route(
            "/api/documents",
            get(api::list_documents).post(api::create_document),
        )
        .route(
            "/api/documents/:id",
            get(api::get_document)
                .put(api::update_document)
                .delete(api::delete_document),
        )
        .route(
            "/api/documents/:id/collaborators",
            post(api::add_collaborator),
        )
        .route(
            "/api/documents/:id/collaborators/:user_id",
            delete(api::remove_collaborator),
        )
        .route("/api/documents/:id/versions", get(api::get_versions))
        .route(
            "/api/documents/:id/revert/:version_index",
            post(api::revert_document),
        )
        // WebSocket endpoint
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("Syncpad server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Listening on: http://{}", addr);
    info!("   WebSocket: ws://{}/ws", addr);
    info!("   Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine))
        .await
        .expect("Server error");
}

/// Resolve on Ctrl-C: stop accepting sessions and tell the engine so writer
/// tasks drain and background work stops.
async fn shutdown_signal(engine: Arc<SyncEngine>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
    engine.shutdown();
}
