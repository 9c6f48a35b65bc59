//! HTTP front of the agent: JSON-RPC on `POST /apex`, liveness on
//! `GET /health`.

use {
    crate::Agent,
    axum::{
        Router,
        extract::State,
        response::Json,
        routing::{get, post},
    },
    model::rpc,
    std::net::SocketAddr,
    tokio::sync::oneshot,
};

pub fn router(agent: Agent) -> Router {
    Router::new()
        .route("/apex", post(handle_rpc))
        .route("/health", get(health))
        .with_state(agent)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

pub async fn serve(
    agent: Agent,
    addr: SocketAddr,
    shutdown: oneshot::Receiver<()>,
) -> Result<(), std::io::Error> {
    let app = router(agent);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(?addr, "serving agent API");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown.await.ok();
        })
        .await
}

async fn handle_rpc(
    State(agent): State<Agent>,
    Json(request): Json<rpc::Request>,
) -> Json<rpc::Response> {
    Json(agent.handle(request).await)
}

async fn health(State(agent): State<Agent>) -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "agent": agent.name()}))
}
