//! PUT: create or replace a calendar resource (RFC 4791, 5.3.2)
//!
//! The body is validated through the iCalendar parser and stored in
//! the printer's normalized form, so later GETs are byte-stable. An
//! `If-Match` gates replacement; without one, only creation is
//! allowed, keeping lost-update races loud.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use kalends_core::Mutation;
use kalends_ical::Calendar;

use super::{DavState, conditional_header, unquote_etag};
use crate::AppState;
use crate::error::ApiError;

pub async fn handle(
    app: &AppState,
    state: &DavState,
    headers: &axum::http::HeaderMap,
    body: &[u8],
) -> Result<Response, ApiError> {
    if state.resource_name.is_empty() {
        return Err(ApiError::MethodNotAllowed);
    }
    let Some(cfg) = &state.collection else {
        tracing::info!("PUT into non-calendar collection");
        return Err(ApiError::Forbidden);
    };

    let cal = Calendar::parse(body, None)
        .map_err(|e| ApiError::BadRequest(format!("bad iCalendar body: {e}")))?;
    if cal.events().next().is_none() {
        return Err(ApiError::BadRequest("calendar without events".to_string()));
    }

    if state.rprncpl.quota_available < body.len() as u64 {
        tracing::warn!("quota exhausted for {}", state.rprncpl.name);
        return Err(ApiError::InsufficientStorage);
    }

    let data = String::from_utf8(cal.to_bytes())
        .map_err(|e| ApiError::Internal(format!("printer produced bad UTF-8: {e}")))?;

    match conditional_header(headers, header::IF_MATCH) {
        Some(raw) => {
            // Replacement path: the ETag must still be current.
            let expect = if raw.trim() == "*" {
                let Some(current) = app.store.resource_load(cfg.id, &state.resource_name).await?
                else {
                    return Err(ApiError::PreconditionFailed);
                };
                current.etag
            } else {
                unquote_etag(raw).to_string()
            };

            match app
                .store
                .resource_update(cfg.id, &state.resource_name, &data, &expect)
                .await?
            {
                Mutation::Done(etag) => Ok((
                    StatusCode::NO_CONTENT,
                    [(header::ETAG, format!("\"{etag}\""))],
                )
                    .into_response()),
                Mutation::Constraint => Err(ApiError::PreconditionFailed),
            }
        }
        None => match app
            .store
            .resource_create(cfg.id, &state.resource_name, &data)
            .await?
        {
            Mutation::Done(etag) => Ok((
                StatusCode::CREATED,
                [(header::ETAG, format!("\"{etag}\""))],
            )
                .into_response()),
            // Unconditional overwrite of an existing resource is a
            // lost update waiting to happen.
            Mutation::Constraint => Err(ApiError::PreconditionFailed),
        },
    }
}
