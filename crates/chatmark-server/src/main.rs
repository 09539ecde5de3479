use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router as AxumRouter,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use chatmark_api::Router;
use chatmark_engine::notify::LogNotifier;
use chatmark_engine::remote::{HttpRemoteStore, MemoryRemoteStore, RemoteStore};
use chatmark_engine::{ReplicationEngine, Scheduler, SessionGuard};
use chatmark_gateway::connection;
use chatmark_gateway::dispatcher::Dispatcher;

#[derive(Clone)]
struct ServerState {
    router: Arc<Router>,
    dispatcher: Dispatcher,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatmark=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("CHATMARK_DB_PATH").unwrap_or_else(|_| "chatmark.db".into());
    let host = std::env::var("CHATMARK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CHATMARK_PORT")
        .unwrap_or_else(|_| "3400".into())
        .parse()?;

    // Init database
    let db = Arc::new(chatmark_db::Database::open(&PathBuf::from(&db_path))?);

    // Remote replica: HTTP when configured, in-process otherwise
    let remote: Arc<dyn RemoteStore> = match std::env::var("CHATMARK_REMOTE_URL") {
        Ok(url) => {
            info!("Replicating against {}", url);
            Arc::new(HttpRemoteStore::new(url))
        }
        Err(_) => {
            info!("No CHATMARK_REMOTE_URL set, sync stays in-process");
            Arc::new(MemoryRemoteStore::new())
        }
    };

    // Shared state
    let dispatcher = Dispatcher::new();
    let scheduler = Scheduler::new(db.clone(), Arc::new(LogNotifier), dispatcher.clone());
    let replication = ReplicationEngine::new(db.clone(), remote, dispatcher.clone());
    let sessions = Arc::new(SessionGuard::new());

    // Timers do not survive a restart; rebuild them from storage
    scheduler.restore().await?;

    let router = Arc::new(Router::new(
        db,
        scheduler,
        replication,
        sessions,
        dispatcher.clone(),
    ));

    let state = ServerState { router, dispatcher };

    // Routes
    let app = AxumRouter::new()
        .route("/rpc", post(rpc))
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("ChatMark server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn rpc(State(state): State<ServerState>, Json(request): Json<Value>) -> impl IntoResponse {
    Json(state.router.dispatch_value(request).await)
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher))
}
