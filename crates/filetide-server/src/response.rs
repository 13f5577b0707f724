//! Final carrier to HTTP response translation.
//!
//! JSON carriers are read fully and returned as JSON bodies; everything else
//! streams as an attachment whose body is fed chunk by chunk from the
//! pipeline. The response stream owns the run handle, so a client disconnect
//! cancels every producer task behind it.

use axum::body::Body;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use filetide_core::{Error, PipelineRun};

pub async fn pipeline_response(mut run: PipelineRun) -> Response {
    if run.metadata().is_json() {
        return match run.read_to_end().await {
            Ok(body) => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                (StatusCode::OK, headers, body).into_response()
            },
            Err(error) => error_response(&error),
        };
    }

    let metadata = run.metadata().clone();
    let mut headers = HeaderMap::new();

    let content_type = metadata
        .media_type
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(CONTENT_TYPE, content_type);

    let file_name = metadata.file_name.as_deref().unwrap_or("output");
    let disposition = format!("attachment; filename=\"{}\"", sanitize_file_name(file_name));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(CONTENT_DISPOSITION, value);
    }

    // Carrier-supplied headers override the defaults.
    for (name, value) in &metadata.headers {
        let Ok(name) = HeaderName::try_from(name.as_str()) else {
            tracing::warn!(header = name.as_str(), "dropping invalid response header");
            continue;
        };
        let Ok(value) = HeaderValue::from_str(value) else {
            tracing::warn!(header = %name, "dropping invalid response header value");
            continue;
        };
        headers.insert(name, value);
    }

    let stream = futures_util::stream::unfold(run, |mut run| async move {
        match run.next_chunk().await {
            Ok(Some(chunk)) => Some((Ok::<Bytes, Error>(chunk), run)),
            Ok(None) => None,
            // Headers are already on the wire; surfacing the error through
            // the body stream aborts the connection mid-stream.
            Err(error) => Some((Err(error), run)),
        }
    });

    (StatusCode::OK, headers, Body::from_stream(stream)).into_response()
}

pub fn error_response(error: &Error) -> Response {
    let status = match error {
        Error::InvalidArguments { .. } | Error::UnknownStep { .. } | Error::PipelineShape { .. } => {
            StatusCode::BAD_REQUEST
        },
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::ResourceLimit { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Error::Format { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Network { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = serde_json::json!({
        "error": status.canonical_reason().unwrap_or("Error"),
        "message": error.to_string(),
    });
    (status, axum::Json(body)).into_response()
}

pub fn token_not_found_response() -> Response {
    let body = serde_json::json!({
        "error": "Not Found",
        "message": "Token not found or expired",
    });
    (StatusCode::NOT_FOUND, axum::Json(body)).into_response()
}

fn sanitize_file_name(name: &str) -> String {
    name.replace(['"', '\r', '\n'], "_")
}
