//! GET: serve one calendar resource
//!
//! RFC 4791 adds nothing to GET, so plain HTTP semantics apply,
//! including `If-None-Match` revalidation against the ETag.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::{DavState, conditional_header, unquote_etag};
use crate::AppState;
use crate::error::ApiError;

pub async fn handle(
    app: &AppState,
    state: &DavState,
    headers: &axum::http::HeaderMap,
) -> Result<Response, ApiError> {
    if state.resource_name.is_empty() {
        // GET on a collection is undefined by RFC 4918, 9.4.
        tracing::info!("GET for non-resource (collection?)");
        return Err(ApiError::NotFound(state.collection_name.clone()));
    }
    let Some(cfg) = &state.collection else {
        tracing::info!("GET from non-calendar collection");
        return Err(ApiError::Forbidden);
    };

    let Some(res) = app.store.resource_load(cfg.id, &state.resource_name).await? else {
        tracing::info!("GET for unknown resource: {}", state.resource_name);
        return Err(ApiError::NotFound(state.resource_name.clone()));
    };

    let etag_header = format!("\"{}\"", res.etag);

    // An unquoted `*` asks whether the resource exists at all; it
    // does, so resend rather than 304 (RFC 7232, 3.1).
    let revalidation = conditional_header(headers, header::IF_NONE_MATCH)
        .filter(|raw| raw.trim() != "*")
        .map(unquote_etag);

    if revalidation == Some(res.etag.as_str()) {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(header::ETAG, etag_header)],
        )
            .into_response());
    }

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/calendar".to_string()),
            (header::ETAG, etag_header),
        ],
        res.ical.to_bytes(),
    )
        .into_response())
}
