//! The request state machine
//!
//! Runs the strict per-request sequence: path parsing, principal
//! loading, Digest verification, the nonce step, proxy authorization,
//! collection resolution, and finally method dispatch. Each step only
//! runs when the previous one succeeded.

use std::future::Future;
use std::pin::Pin;

use axum::body::Body;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use kalends_core::NonceCheck;
use kalends_core::digest::expected_response;
use kalends_core::models::ProxyBits;

use super::{DavState, delete, get, parse_path, propfind, proppatch, put, virtual_proxy_collection};
use crate::error::ApiError;
use crate::middleware::digest::{DigestCreds, challenge};
use crate::{AppState, MAX_BODY_SIZE};

pub fn dispatch_root(
    State(app): State<AppState>,
    creds: Option<Extension<DigestCreds>>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Pin<Box<dyn Future<Output = Response> + Send>> {
    Box::pin(async move { run(app, creds, method, headers, String::new(), body).await })
}

pub fn dispatch(
    State(app): State<AppState>,
    creds: Option<Extension<DigestCreds>>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Pin<Box<dyn Future<Output = Response> + Send>> {
    Box::pin(async move { run(app, creds, method, headers, path, body).await })
}

fn run(
    app: AppState,
    creds: Option<Extension<DigestCreds>>,
    method: Method,
    headers: HeaderMap,
    path: String,
    body: Body,
) -> Pin<Box<dyn Future<Output = Response> + Send>> {
    Box::pin(async move {
        let Some(Extension(creds)) = creds else {
            // The gate always installs credentials; anything else is a
            // wiring fault.
            return ApiError::Internal("missing digest credentials".to_string()).into_response();
        };
        match handle(app, creds, method, headers, path, body).await {
            Ok(response) => response,
            Err(err) => err.into_response(),
        }
    })
}

fn handle(
    app: AppState,
    creds: DigestCreds,
    method: Method,
    headers: HeaderMap,
    path: String,
    body: Body,
) -> Pin<Box<dyn Future<Output = Result<Response, ApiError>> + Send>> {
    Box::pin(handle_inner(app, creds, method, headers, path, body))
}

async fn handle_inner(
    app: AppState,
    creds: DigestCreds,
    method: Method,
    headers: HeaderMap,
    path: String,
    body: Body,
) -> Result<Response, ApiError> {
    let app = &app;
    let creds = &creds;
    let method = &method;
    let headers = &headers;
    let path = path.as_str();
    // Path safety comes before any storage access.
    let Some(dav_path) = parse_path(path) else {
        tracing::info!("bad request path: {path}");
        return Err(ApiError::NotFound(format!("bad path: {path}")));
    };

    // Load the acting principal; an unknown login gets a fresh
    // challenge rather than a hint that the name is wrong.
    let Some(prncpl) = app.store.principal_load(&creds.username).await? else {
        return Err(challenge(app, false).await);
    };

    // Verify the Digest response against the stored HA1.
    let expected = expected_response(&prncpl.hash, &creds.nonce, method.as_str(), &creds.uri);
    if expected != creds.response {
        tracing::info!("failed authorisation sequence: {}", prncpl.name);
        return Err(challenge(app, false).await);
    }

    // Nonce bookkeeping: a stale nonce re-challenges, a replayed count
    // is refused outright. The update re-validates inside its own
    // transaction.
    match app.store.nonce_validate(&creds.nonce, creds.nc).await? {
        NonceCheck::Replay => {
            tracing::warn!("nonce replay attack: {}", prncpl.name);
            return Err(ApiError::Forbidden);
        }
        NonceCheck::NotFound => return Err(challenge(app, true).await),
        NonceCheck::Ok => {}
    }
    match app.store.nonce_update(&creds.nonce, creds.nc).await? {
        NonceCheck::Replay => {
            tracing::warn!("nonce replay attack: {}", prncpl.name);
            return Err(ApiError::Forbidden);
        }
        NonceCheck::NotFound => return Err(challenge(app, true).await),
        NonceCheck::Ok => {}
    }

    // A bare probe gets sent to the principal root.
    if dav_path.principal.is_empty() {
        let location = format!("/{}/", prncpl.name);
        return Ok((
            StatusCode::TEMPORARY_REDIRECT,
            [(header::LOCATION, location)],
            "Redirecting...",
        )
            .into_response());
    }

    let write = matches!(method.as_str(), "PUT" | "PROPPATCH" | "DELETE");

    // Requests against someone else's tree need a proxy edge from that
    // principal to the actor; writes need the WRITE bit.
    let (rprncpl, proxy) = if dav_path.principal != prncpl.name {
        let Some(requested) = app.store.principal_load(&dav_path.principal).await? else {
            return Err(challenge(app, false).await);
        };
        let Some(bits) = requested.delegated_bits(prncpl.id) else {
            tracing::warn!(
                "disallowed reverse proxy on principal: {}",
                requested.email
            );
            return Err(ApiError::Forbidden);
        };
        if write && bits != ProxyBits::Write {
            tracing::warn!(
                "disallowed reverse proxy write on principal: {}",
                requested.email
            );
            return Err(ApiError::Forbidden);
        }
        (requested, Some(bits))
    } else {
        (prncpl.clone(), None)
    };

    // Resolve the collection segment; the proxy pseudo-collections
    // exist for every principal without storage behind them.
    let mut collection = None;
    if !dav_path.collection.is_empty() {
        collection = rprncpl.collection_by_url(&dav_path.collection).cloned();
        if collection.is_none() && virtual_proxy_collection(&dav_path.collection).is_none() {
            tracing::info!("request for unknown collection: {}", dav_path.collection);
            return Err(ApiError::NotFound(dav_path.collection));
        }
    }

    let state = DavState {
        prncpl,
        rprncpl,
        proxy,
        collection,
        collection_name: dav_path.collection,
        resource_name: dav_path.resource,
    };

    let bytes = axum::body::to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;

    match method.as_str() {
        "GET" => get::handle(app, &state, headers).await,
        "PUT" => put::handle(app, &state, headers, &bytes).await,
        "DELETE" => delete::handle(app, &state, headers).await,
        "PROPFIND" => propfind::propfind(app, &state, headers, &bytes).await,
        "REPORT" => propfind::report(app, &state, headers, &bytes).await,
        "PROPPATCH" => proppatch::handle(app, &state, headers, &bytes).await,
        // RFC 4918, 9.5: POST on a collection is server-defined, and
        // this server defines nothing there; POST on a resource is
        // plainly not allowed.
        "POST" => {
            if state.resource_name.is_empty() {
                Err(ApiError::NotFound("POST to collection".to_string()))
            } else {
                Err(ApiError::MethodNotAllowed)
            }
        }
        _ => Err(ApiError::MethodNotAllowed),
    }
}
