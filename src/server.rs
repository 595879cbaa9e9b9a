//! HTTP layer: routes, upload handling and error responses

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::metrics::ServiceMetrics;
use crate::pipeline::{PredictionPipeline, RequestOptions};
use crate::types::{ErrorBody, FeatureSchema, PredictCsvResponse, ServiceStatus};
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Header carrying the per-request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Process-wide state shared by all handlers. Immutable after startup
/// except for the metrics counters.
pub struct AppContext {
    pub pipeline: PredictionPipeline,
    pub metrics: Arc<ServiceMetrics>,
    pub return_features_by_default: bool,
    pub max_upload_bytes: usize,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    pub fn new(
        pipeline: PredictionPipeline,
        metrics: Arc<ServiceMetrics>,
        config: &AppConfig,
    ) -> Self {
        Self {
            pipeline,
            metrics,
            return_features_by_default: config.normalization.return_features,
            max_upload_bytes: config.server.max_upload_bytes,
            started_at: Utc::now(),
        }
    }
}

/// Error returned by HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("No file uploaded (expected a multipart field named 'file')")]
    NoFile,

    #[error("invalid upload: {detail}")]
    Upload { status: StatusCode, detail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Pipeline(_) | ApiError::NoFile => StatusCode::BAD_REQUEST,
            ApiError::Upload { status, .. } => *status,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Pipeline(e) => e.kind(),
            ApiError::NoFile | ApiError::Upload { .. } => "bad_request",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::Upload {
            status: e.status(),
            detail: e.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            kind: self.kind().to_string(),
            detail: match &self {
                ApiError::Pipeline(e) => e.to_string(),
                other => other.to_string(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Build the application router
pub fn create_router(ctx: Arc<AppContext>) -> Router {
    let max_upload_bytes = ctx.max_upload_bytes;

    Router::new()
        .route("/", get(root))
        .route("/schema/features", get(schema_features))
        .route("/predict_csv", post(predict_csv))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind and serve until Ctrl-C or SIGTERM
pub async fn serve(ctx: Arc<AppContext>, host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Listening");

    axum::serve(listener, create_router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

async fn root(State(ctx): State<Arc<AppContext>>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        status: "ok".to_string(),
        message: "Upload a CSV to /predict_csv".to_string(),
        n_features_expected: ctx.pipeline.contract().len(),
        model: ctx.pipeline.model_name().to_string(),
        started_at: ctx.started_at,
    })
}

async fn schema_features(State(ctx): State<Arc<AppContext>>) -> Json<FeatureSchema> {
    Json(FeatureSchema {
        features: ctx.pipeline.contract().columns().to_vec(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct PredictQuery {
    /// Include `model_input_matrix` in the response
    pub return_features: Option<bool>,
}

/// An uploaded file with its declared metadata
struct Upload {
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

async fn predict_csv(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<PredictQuery>,
    multipart: Multipart,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let result = handle_predict(&ctx, query, multipart, &request_id).await;

    if let Err(e) = &result {
        ctx.metrics.record_failure(e.kind());
        match e {
            ApiError::Internal(_) => error!(request_id = %request_id, error = %e, "Prediction request failed"),
            _ => warn!(request_id = %request_id, kind = e.kind(), error = %e, "Prediction request rejected"),
        }
    }

    ([(REQUEST_ID_HEADER, request_id)], result).into_response()
}

async fn handle_predict(
    ctx: &Arc<AppContext>,
    query: PredictQuery,
    mut multipart: Multipart,
    request_id: &str,
) -> Result<Json<PredictCsvResponse>, ApiError> {
    let upload = read_upload(&mut multipart).await?;

    if !looks_tabular(upload.file_name.as_deref(), upload.content_type.as_deref()) {
        warn!(
            request_id = %request_id,
            file_name = ?upload.file_name,
            content_type = ?upload.content_type,
            "Upload does not look like a CSV, parsing anyway"
        );
    }

    let options = RequestOptions {
        return_features: query
            .return_features
            .unwrap_or(ctx.return_features_by_default),
    };
    info!(
        request_id = %request_id,
        file_name = ?upload.file_name,
        bytes = upload.bytes.len(),
        "Received CSV upload"
    );

    // Runs to completion even if the client goes away
    let start = Instant::now();
    let task_ctx = Arc::clone(ctx);
    let response = tokio::task::spawn_blocking(move || {
        task_ctx.pipeline.run(&upload.bytes, options)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    let elapsed = start.elapsed();
    ctx.metrics.record_request(elapsed, &response.predictions);
    info!(
        request_id = %request_id,
        rows = response.row_count,
        dropped = response.dropped_columns.len(),
        processing_time_us = elapsed.as_micros(),
        "Upload scored"
    );

    Ok(Json(response))
}

/// Take the field named `file`, or else the first field carrying a file name
async fn read_upload(multipart: &mut Multipart) -> Result<Upload, ApiError> {
    let mut fallback = None;

    while let Some(field) = multipart.next_field().await? {
        let is_file_field = field.name() == Some("file");
        let has_file_name = field.file_name().is_some();
        if !is_file_field && (!has_file_name || fallback.is_some()) {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?.to_vec();
        let upload = Upload {
            file_name,
            content_type,
            bytes,
        };

        if is_file_field {
            return Ok(upload);
        }
        fallback = Some(upload);
    }

    fallback.ok_or(ApiError::NoFile)
}

/// Best-effort hint from the declared name and type. Without any hint the
/// upload is given the benefit of the doubt.
pub fn looks_tabular(file_name: Option<&str>, content_type: Option<&str>) -> bool {
    let name_hint = file_name.and_then(|name| {
        let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())?;
        Some(matches!(ext.as_str(), "csv" | "tsv" | "txt" | "dat"))
    });
    let type_hint = content_type.and_then(|ct| {
        let ct = ct.to_ascii_lowercase();
        if ct == "application/octet-stream" {
            return None;
        }
        Some(ct.starts_with("text/") || ct.contains("csv") || ct == "application/vnd.ms-excel")
    });

    match (name_hint, type_hint) {
        (None, None) => true,
        (a, b) => a.unwrap_or(false) || b.unwrap_or(false),
    }
}
