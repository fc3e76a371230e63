//! Status HTTP server
//!
//! Read-mostly JSON view of the queue for dashboards and scripts.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::jobs::{CompressionJob, JobStatus};
use crate::queue::{JobQueue, QueueStats};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

#[derive(Debug, Default, Deserialize)]
pub struct JobsFilter {
    pub status: Option<JobStatus>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// GET /stats
async fn get_stats(State(queue): State<Arc<JobQueue>>) -> Json<QueueStats> {
    Json(queue.stats())
}

/// GET /jobs, optionally filtered with `?status=`
async fn list_jobs(
    State(queue): State<Arc<JobQueue>>,
    Query(filter): Query<JobsFilter>,
) -> Json<Vec<CompressionJob>> {
    let jobs = match filter.status {
        Some(status) => queue.list_by_status(status),
        None => queue.list_all(),
    };
    Json(jobs)
}

/// GET /jobs/:id
async fn get_job(
    State(queue): State<Arc<JobQueue>>,
    Path(job_id): Path<String>,
) -> Result<Json<CompressionJob>, StatusCode> {
    queue
        .get_status(&job_id)
        .map(Json)
        .map_err(|_| StatusCode::NOT_FOUND)
}

/// POST /jobs/:id/cancel
async fn cancel_job(
    State(queue): State<Arc<JobQueue>>,
    Path(job_id): Path<String>,
) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: queue.cancel(&job_id),
    })
}

pub fn create_status_router(queue: Arc<JobQueue>) -> Router {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/cancel", post(cancel_job))
        .with_state(queue)
}

/// Serve the status API on `addr` until `shutdown` is cancelled.
pub async fn run_status_server(
    queue: Arc<JobQueue>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let app = create_status_router(queue);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "status server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
