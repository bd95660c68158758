use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use courier_api::middleware::require_auth;
use courier_api::{AppState, AppStateInner, contacts, messages, profile};
use courier_gateway::{ChatService, Dispatcher, PresenceRegistry, connection};

#[derive(Clone)]
struct ServerState {
    chat: ChatService,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("COURIER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("COURIER_DB_PATH").unwrap_or_else(|_| "courier.db".into());
    let host = std::env::var("COURIER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("COURIER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(courier_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let presence = PresenceRegistry::new();
    let chat = ChatService::new(db.clone(), dispatcher, presence);

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        chat: chat.clone(),
        jwt_secret: jwt_secret.clone(),
    });

    // Routes
    let api_routes = Router::new()
        .route("/api/me", get(profile::me))
        .route("/api/contacts", get(contacts::list))
        .route("/api/messages/{peer_id}", get(messages::page))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(ServerState { chat, jwt_secret });

    let app = Router::new()
        .merge(api_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Courier server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.chat, state.jwt_secret))
}
