//! WebDAV compliance header
//!
//! Clients sniff the `DAV:` header to decide which calendar features
//! to use; it goes on every successful response.

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

use crate::DAV_CLASSES;

pub async fn dav_capabilities(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    if res.status().is_success() || res.status().is_redirection() {
        res.headers_mut().insert(
            HeaderName::from_static("dav"),
            HeaderValue::from_static(DAV_CLASSES),
        );
    }
    res
}
