//! Conversion route
//!
//! POST /convert?timeout=<ms>
//!
//! Multipart form with a `format` field and at least one file part (only the
//! first is converted). Responds with the converted document, `400` for
//! client and content errors, or `503 FAIL` when the converter failed, in
//! which case the service quarantines itself.

use axum::{
    body::Body,
    extract::{Multipart, Query, State},
    http::{header, StatusCode},
    response::Response,
    routing::post,
    Router,
};
use futures::FutureExt;
use serde::Deserialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::Instrument;

use crate::error::{AppError, Result};
use crate::formats::ExportFormat;
use crate::invoker::{ConversionOutcome, OUTPUT_BASENAME};
use crate::request::ConversionRequest;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConvertParams {
    /// Milliseconds; defaults to the configured timeout
    pub timeout: Option<u64>,
}

/// Converted document, read into memory before the output path is released
#[derive(Debug)]
pub struct ConvertedDocument {
    pub data: Vec<u8>,
    pub mime_type: &'static str,
    pub format: ExportFormat,
}

impl ConvertedDocument {
    /// Download name: `output.<format>`
    pub fn file_name(&self) -> String {
        format!("{}.{}", OUTPUT_BASENAME, self.format.extension())
    }
}

/// Create the conversion router
pub fn router() -> Router<AppState> {
    Router::new().route("/convert", post(convert))
}

/// POST /convert
async fn convert(
    State(state): State<AppState>,
    Query(params): Query<ConvertParams>,
    multipart: Multipart,
) -> Result<Response> {
    let timeout = state.config().converter.timeout(params.timeout);
    let request = ConversionRequest::from_multipart(multipart, timeout).await?;

    // Run detached: a client hanging up must not cancel a conversion halfway.
    // Quarantine happens inside the task for the same reason.
    let span = tracing::info_span!("convert", id = %request.id, format = %request.format);
    let task_state = state.clone();
    let task = async move {
        let result = AssertUnwindSafe(run_conversion(&task_state, request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(AppError::Internal(format!(
                    "conversion panicked: {}",
                    panic_message(&*panic)
                )))
            });
        quarantine_on_error(&task_state, result).await
    }
    .instrument(span);

    let document = match tokio::spawn(task).await {
        Ok(result) => result?,
        Err(e) => {
            let error = AppError::Internal(format!("conversion task failed: {}", e));
            return quarantine_on_error(&state, Err(error)).await;
        }
    };

    quarantine_on_error(&state, document_response(document)).await
}

/// Take the service out of rotation before an untrusted error is reported
async fn quarantine_on_error<T>(state: &AppState, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        if e.quarantines() {
            state.lifecycle().quarantine(&e.to_string()).await;
        }
    }
    result
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Stage the upload, convert it and collect the output.
///
/// Both scratch files are released on every path out of here, including
/// `?` and unwinding, via their `Drop`.
async fn run_conversion(state: &AppState, request: ConversionRequest) -> Result<ConvertedDocument> {
    let mut input = state.scratch().allocate(&request.file_name.scratch_suffix())?;
    tracing::info!(
        input = %input.path().display(),
        mime_type = %request.mime_type,
        size = request.data.len(),
        "Convert to {}",
        request.format
    );
    tokio::fs::write(input.path(), &request.data).await?;

    let permit = state.lifecycle().acquire().await.ok_or(AppError::Unavailable)?;

    // A fatal run can leave a stale file behind at the shared output path
    let mut output = state
        .scratch()
        .claim(state.invoker().output_path(request.format));
    output.clear();

    let outcome = state
        .invoker()
        .convert(&permit, input.path(), request.format, request.timeout)
        .await;
    permit.observe(&outcome);

    let result = match outcome {
        ConversionOutcome::Success { output: path, mime_type } => {
            let data = tokio::fs::read(&path).await?;
            tracing::info!(
                size = data.len(),
                mime_type,
                "Send file {}.{}",
                OUTPUT_BASENAME,
                request.format
            );
            Ok(ConvertedDocument {
                data,
                mime_type,
                format: request.format,
            })
        }
        ConversionOutcome::RecoverableFailure(reason) => Err(AppError::ContentRejected(reason)),
        ConversionOutcome::FatalFailure(reason) if reason.is_content_related() => {
            Err(AppError::ContentRejected(reason.to_string()))
        }
        ConversionOutcome::FatalFailure(reason) => Err(AppError::Engine(reason.to_string())),
    };

    output.release();
    drop(permit);
    input.release();

    result
}

fn document_response(document: ConvertedDocument) -> Result<Response> {
    let file_name = document.file_name();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, document.mime_type)
        .header(header::CONTENT_LENGTH, document.data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        )
        .body(Body::from(document.data))
        .map_err(|e| AppError::Internal(e.to_string()))
}
