use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use application::HubStats;
use domain::SessionId;

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(websocket_upgrade))
        .route("/ws", get(websocket_upgrade))
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new().route("/stats", get(stats))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats().await)
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let session = SessionId::parse(query.session.unwrap_or_default()).map_err(|err| {
        tracing::warn!(error = %err, "rejected websocket upgrade");
        ApiError::from(err)
    })?;

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        WebSocketConnection::new(socket, hub, session).run().await;
    }))
}
