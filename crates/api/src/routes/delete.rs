//! DELETE: remove a resource or a whole collection

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use kalends_core::Mutation;

use super::{DavState, conditional_header, unquote_etag};
use crate::AppState;
use crate::error::ApiError;

pub async fn handle(
    app: &AppState,
    state: &DavState,
    headers: &axum::http::HeaderMap,
) -> Result<Response, ApiError> {
    if !state.resource_name.is_empty() {
        let Some(cfg) = &state.collection else {
            return Err(ApiError::Forbidden);
        };

        match conditional_header(headers, header::IF_MATCH) {
            Some(raw) => {
                let Some(current) = app.store.resource_load(cfg.id, &state.resource_name).await?
                else {
                    return Err(ApiError::NotFound(state.resource_name.clone()));
                };
                let expect = if raw.trim() == "*" {
                    current.etag.clone()
                } else {
                    unquote_etag(raw).to_string()
                };
                match app
                    .store
                    .resource_delete(cfg.id, &state.resource_name, &expect)
                    .await?
                {
                    Mutation::Done(()) => Ok(StatusCode::NO_CONTENT.into_response()),
                    Mutation::Constraint => Err(ApiError::PreconditionFailed),
                }
            }
            None => {
                // Clients should send If-Match; honour the request
                // anyway, loudly.
                tracing::warn!("unsafe delete of resource: {}", state.resource_name);
                if app
                    .store
                    .resource_load(cfg.id, &state.resource_name)
                    .await?
                    .is_none()
                {
                    return Err(ApiError::NotFound(state.resource_name.clone()));
                }
                app.store
                    .resource_remove(cfg.id, &state.resource_name)
                    .await?;
                Ok(StatusCode::NO_CONTENT.into_response())
            }
        }
    } else if let Some(cfg) = &state.collection {
        // Collection delete is unconditional and recursive.
        tracing::warn!("unsafe delete of collection: {}", cfg.url);
        app.store.collection_remove(cfg.id).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(ApiError::Forbidden)
    }
}
