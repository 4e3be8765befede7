//! HTTP front end for the OCR pipeline.
//!
//! `POST /api/ocr` takes a multipart upload with a `file` field and answers
//! `{"text": ...}`. Every failure, including a bad upload, becomes the same
//! `500` response. The detail goes to the logs, not to the caller.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Instrument as _;
use uuid::Uuid;

use crate::{ocr::OcrPipeline, prelude::*};

/// Name of the multipart field carrying the image.
pub const FILE_FIELD: &str = "file";

/// The only error message callers ever see for a failed analysis.
pub const ANALYSIS_FAILED: &str = "Failed to analyze image";

/// Default upload limit. The Read API accepts images up to 50 MB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared state for our handlers.
#[derive(Clone)]
pub struct AppState {
    /// The pipeline every request runs through.
    pub pipeline: Arc<OcrPipeline>,

    /// Cancelled when the server shuts down. Each request gets a child token.
    pub shutdown: CancellationToken,
}

/// Successful OCR response.
#[derive(Debug, Deserialize, Serialize)]
pub struct OcrResponse {
    /// The extracted text, one line per recognized line.
    pub text: String,
}

/// Error response.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    /// What went wrong.
    pub error: String,
}

/// Build a JSON error response.
fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// Build our router.
pub fn create_app(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/ocr", post(ocr_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `app` on `addr` until `shutdown` is cancelled.
///
/// In-flight requests see the same cancellation through their child tokens,
/// so they fail fast instead of holding up shutdown for a full poll cycle.
pub async fn serve(app: Router, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Could not listen on {addr}"))?;
    let local_addr = listener.local_addr().context("Could not get local address")?;
    info!(addr = %local_addr, "Server is running");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Server failed")?;
    info!("Server stopped");
    Ok(())
}

/// `GET /health`
async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `POST /api/ocr`
async fn ocr_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("ocr_request", %request_id);
    async move {
        let image = match multipart {
            Ok(multipart) => read_file_field(multipart).await,
            Err(rejection) => Err(anyhow!("{}", rejection.body_text())),
        };
        let image = match image {
            Ok(image) => image,
            Err(err) => {
                warn!("Bad upload: {err:#}");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, ANALYSIS_FAILED);
            }
        };

        let cancel = state.shutdown.child_token();
        match state.pipeline.recognize(image, &cancel).await {
            Ok(text) => {
                info!(chars = text.len(), "OCR succeeded");
                (StatusCode::OK, Json(OcrResponse { text })).into_response()
            }
            Err(err) => {
                let kind = err.kind();
                let err = anyhow::Error::from(err);
                error!(kind, "OCR failed: {err:#}");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, ANALYSIS_FAILED)
            }
        }
    }
    .instrument(span)
    .await
}

/// Pull the image out of a multipart upload.
async fn read_file_field(mut multipart: Multipart) -> Result<Bytes> {
    while let Some(field) = multipart
        .next_field()
        .await
        .context("Malformed multipart body")?
    {
        if field.name() == Some(FILE_FIELD) {
            let image = field.bytes().await.context("Could not read uploaded file")?;
            debug!(bytes = image.len(), "Received upload");
            return Ok(image);
        }
    }
    Err(anyhow!("Missing multipart field {FILE_FIELD:?}"))
}
