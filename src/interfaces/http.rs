//! HTTP/WebSocket surface (§6): REST control endpoints plus the BBW
//! broadcast route, axum-based like the teacher's dashboard shell but
//! serving JSON/WS instead of rendering `egui`.

use crate::application::group_scheduler::GroupScheduler;
use crate::application::pipeline_orchestrator::{PipelineOrchestrator, StartProcessResult};
use crate::domain::errors::{GroupError, PipelineError};
use crate::domain::master_data::MasterDataProcess;
use crate::infrastructure::broadcast_hub::BroadcastHub;
use crate::infrastructure::observability::Metrics;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<Metrics>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub scheduler: Arc<GroupScheduler>,
    pub broadcast_hub: Arc<BroadcastHub>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/master-data/start", post(start_master_data))
        .route("/master-data/history", get(master_data_history))
        .route("/master-data/:id", get(master_data_by_id))
        .route("/groups/:id/execute", post(execute_group))
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

#[derive(Debug, Deserialize)]
struct StartMasterDataRequest {
    #[serde(default)]
    number_of_past_days: u32,
}

async fn start_master_data(
    State(state): State<AppState>,
    Json(req): Json<StartMasterDataRequest>,
) -> Result<Json<StartProcessResult>, ApiError> {
    let result = state.orchestrator.start_process(req.number_of_past_days).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    20
}

async fn master_data_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MasterDataProcess>>, ApiError> {
    let processes = state.orchestrator.recent(query.limit).await?;
    Ok(Json(processes))
}

async fn master_data_by_id(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<MasterDataProcess>, ApiError> {
    let process = state.orchestrator.find_by_id(id).await?.ok_or(PipelineError::NotFound(id))?;
    Ok(Json(process))
}

async fn execute_group(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    state.scheduler.execute_group(id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.broadcast_hub))
}

/// Registers with the hub, relays broadcast frames to the client, and
/// forwards a keepalive ping on the same interval the hub uses (§4.12).
async fn handle_socket(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let (mut sender, mut receiver) = futures_util::StreamExt::split(socket);
    let (client_id, mut rx) = hub.register().await;

    let mut keepalive = tokio::time::interval(crate::infrastructure::broadcast_hub::KEEPALIVE_INTERVAL);

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(msg) => {
                        if futures_util::SinkExt::send(&mut sender, msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = keepalive.tick() => {
                if futures_util::SinkExt::send(&mut sender, Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            incoming = futures_util::StreamExt::next(&mut receiver) => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(client_id, error = %e, "websocket client read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    hub.unregister(client_id).await;
    info!(client_id, "websocket client disconnected");
}

/// Maps domain errors onto HTTP status codes for the REST surface.
struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if let Some(PipelineError::NotFound(_)) = self.0.downcast_ref::<PipelineError>() {
            return (StatusCode::NOT_FOUND, self.0.to_string()).into_response();
        }
        if let Some(GroupError::NotFound(_)) = self.0.downcast_ref::<GroupError>() {
            return (StatusCode::NOT_FOUND, self.0.to_string()).into_response();
        }
        if let Some(GroupError::Conflict { .. }) = self.0.downcast_ref::<GroupError>() {
            return (StatusCode::CONFLICT, self.0.to_string()).into_response();
        }
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
