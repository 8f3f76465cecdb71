//! HTTP read path for raw blocks and the metrics endpoint

use crate::worker::WorkerNode;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use dfs_common::metrics::WorkerMetricsSnapshot;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

pub fn build_router(worker: Arc<WorkerNode>) -> Router {
    Router::new()
        .route("/blocks/*block_id", get(handle_download))
        .route("/metrics", get(handle_metrics))
        .with_state(worker)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, worker: Arc<WorkerNode>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP server listening on {}", addr);
    }
    axum::serve(listener, build_router(worker))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle_download(
    State(worker): State<Arc<WorkerNode>>,
    Path(block_id): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    let full_path = resolve_block_path(&worker, &block_id)?;

    let file = match tokio::fs::File::open(&full_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err((StatusCode::NOT_FOUND, "Block not found".into()));
        }
        Err(e) => return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };
    let length = file
        .metadata()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .len();

    info!("Serving block via HTTP: {}", block_id);
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

fn resolve_block_path(worker: &WorkerNode, block_id: &str) -> Result<PathBuf, (StatusCode, String)> {
    if block_id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Block ID required".into()));
    }
    if block_id.contains("..") || block_id.starts_with('/') || block_id.starts_with('\\') {
        warn!("Path traversal attempt detected: {}", block_id);
        return Err((StatusCode::FORBIDDEN, "Invalid block ID".into()));
    }

    let storage_dir = absolute(worker.storage_dir().to_path_buf());
    let full_path = storage_dir.join(format!("{}.bin", block_id));
    if !full_path.starts_with(&storage_dir) {
        warn!("Resolved path outside storage dir: {}", full_path.display());
        return Err((StatusCode::FORBIDDEN, "Access denied".into()));
    }
    Ok(full_path)
}

fn absolute(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

async fn handle_metrics(State(worker): State<Arc<WorkerNode>>) -> Json<WorkerMetricsSnapshot> {
    Json(worker.metrics().snapshot())
}
