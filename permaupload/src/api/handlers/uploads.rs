//! HTTP handler for forwarding uploads to the storage provider.

use axum::{
    Json,
    extract::{FromRequest, Multipart, Request, State, multipart::MultipartError, rejection::JsonRejection},
    http::{StatusCode, header::CONTENT_TYPE},
};
use bytes::BytesMut;
use tracing::{debug, info, instrument};

use crate::{
    AppState,
    api::models::uploads::{UploadErrorResponse, UploadResponse},
    errors::{Error, Result},
    payload::{DEFAULT_FILE_NAME, FILE_FIELD, FileUpload, UploadRequest},
};

fn too_large() -> Error {
    Error::PayloadTooLarge {
        message: "Upload exceeds maximum allowed size".to_string(),
    }
}

fn multipart_error(err: MultipartError) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large()
    } else {
        Error::invalid_request(format!("Failed to parse multipart data: {}", err.body_text()))
    }
}

fn json_error(err: JsonRejection) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large()
    } else {
        Error::invalid_request(err.body_text())
    }
}

/// Read the `file` field fully into memory, skipping any other fields.
async fn read_file_field(mut multipart: Multipart) -> Result<FileUpload> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            debug!(field = ?field.name(), "Ignoring multipart field");
            continue;
        }

        let file_name = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILE_NAME)
            .to_string();
        let content_type = field.content_type().map(str::to_string);

        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            buffer.extend_from_slice(&chunk);
        }

        return Ok(FileUpload {
            file_name,
            content_type,
            bytes: buffer.freeze(),
        });
    }

    Err(Error::invalid_request("No file provided"))
}

impl<S> FromRequest<S> for UploadRequest
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| Error::invalid_request(e.body_text()))?;
            Ok(UploadRequest::File(read_file_field(multipart).await?))
        } else if content_type.starts_with("application/json") {
            let Json(value) = Json::<serde_json::Value>::from_request(req, state).await.map_err(json_error)?;
            Ok(UploadRequest::InlineJson(value))
        } else {
            Err(Error::invalid_request(format!(
                "Unsupported content type '{content_type}', expected application/json or multipart/form-data"
            )))
        }
    }
}

fn record_outcome(variant: &'static str, outcome: &'static str) {
    metrics::counter!("permaupload_uploads_total", "variant" => variant, "outcome" => outcome).increment(1);
}

/// Forward a payload to the storage provider.
///
/// The byte length is computed once and used for both the cost query and the upload, and the
/// cost in the response is always the one quoted before the upload.
#[utoipa::path(
    post,
    path = "/upload",
    tag = "uploads",
    summary = "Upload content",
    description = "Upload an inline JSON document (`application/json`) or a file (`multipart/form-data`, field `file`) to permanent storage.

The price is quoted for the exact byte length of the payload before it is uploaded. File uploads are tagged with their content type and file name, and the response echoes the file metadata.",
    request_body(
        content_type = "multipart/form-data",
        description = "Either any JSON body, or a multipart form with a `file` field"
    ),
    responses(
        (status = 200, description = "Content uploaded", body = UploadResponse),
        (status = 400, description = "Malformed body, missing file field or unsupported content type", body = UploadErrorResponse),
        (status = 413, description = "Payload too large", body = UploadErrorResponse),
        (status = 500, description = "The storage provider rejected the cost query or the upload", body = UploadErrorResponse)
    )
)]
#[instrument(skip_all, fields(variant = request.variant(), size = tracing::field::Empty, cost = tracing::field::Empty))]
pub async fn upload(State(state): State<AppState>, request: UploadRequest) -> Result<Json<UploadResponse>> {
    let variant = request.variant();
    let result = forward(&state, request).await;
    record_outcome(variant, if result.is_ok() { "success" } else { "failure" });
    result.map(Json)
}

async fn forward(state: &AppState, request: UploadRequest) -> Result<UploadResponse> {
    let prepared = request
        .prepare()
        .map_err(|e| Error::invalid_request(format!("Failed to serialize payload: {e}")))?;
    let size = prepared.size;
    tracing::Span::current().record("size", size);

    let quotes = state.provider.estimate_cost(&[size]).await?;
    let cost = match quotes.as_slice() {
        [quote] => quote.winc,
        other => {
            return Err(Error::UploadFailed {
                message: format!("Expected one cost quote, got {}", other.len()),
            });
        }
    };
    tracing::Span::current().record("cost", tracing::field::display(cost));
    debug!(size, cost = %cost, "Quoted upload cost");

    let receipt = state.provider.upload(prepared.stream, size, prepared.tags).await?;
    metrics::counter!("permaupload_upload_bytes").increment(size);
    info!(id = %receipt.id, size, cost = %cost, "Upload complete");

    Ok(UploadResponse::new(receipt, cost, prepared.file))
}
