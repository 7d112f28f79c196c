//! Method handlers and the request state machine

use axum::http::{HeaderMap, header};
use kalends_core::models::{Collection, Principal, ProxyBits};
use kalends_core::validation::safe_path_segment;

pub mod dav;
mod delete;
mod get;
mod propfind;
mod proppatch;
mod put;

/// Everything a method handler needs to know about the request once
/// authentication and routing are done.
pub struct DavState {
    /// The authenticated principal.
    pub prncpl: Principal,
    /// The principal whose tree is addressed; equals `prncpl` unless a
    /// proxy edge authorized the request.
    pub rprncpl: Principal,
    /// Access granted by the proxy edge; `None` for the owner.
    pub proxy: Option<ProxyBits>,
    /// The resolved calendar collection, absent for principal-level
    /// requests and the virtual proxy collections.
    pub collection: Option<Collection>,
    pub collection_name: String,
    pub resource_name: String,
}

impl DavState {
    pub fn is_owner(&self) -> bool {
        self.prncpl.id == self.rprncpl.id
    }
}

/// The three path segments of `/principal/collection/resource`, with
/// empty strings for trailing segments that were not given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavPath {
    pub principal: String,
    pub collection: String,
    pub resource: String,
}

/// Split and vet a request path. Unsafe segments (empty interior
/// segments, dot traversal, bytes outside the URL-safe set) are
/// rejected outright.
pub fn parse_path(path: &str) -> Option<DavPath> {
    let path = path.strip_prefix('/').unwrap_or(path);
    if path.is_empty() {
        return Some(DavPath {
            principal: String::new(),
            collection: String::new(),
            resource: String::new(),
        });
    }

    let mut parts = path.splitn(3, '/');
    let principal = parts.next().unwrap_or("");
    let collection = parts.next().unwrap_or("");
    let resource = parts.next().unwrap_or("");

    if !safe_path_segment(principal) {
        return None;
    }
    if collection.is_empty() && !resource.is_empty() {
        return None;
    }
    if !collection.is_empty() && !safe_path_segment(collection) {
        return None;
    }
    if !resource.is_empty() && !safe_path_segment(resource) {
        return None;
    }

    Some(DavPath {
        principal: principal.to_string(),
        collection: collection.to_string(),
        resource: resource.to_string(),
    })
}

/// Strip the surrounding quotes from a client ETag.
pub(crate) fn unquote_etag(v: &str) -> &str {
    let v = v.trim();
    v.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(v)
}

/// The `If-Match`/`If-None-Match` value, if the header parses.
pub(crate) fn conditional_header(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// The XML media type of the request body, echoed back on multistatus
/// responses.
pub(crate) fn xml_mime(headers: &HeaderMap) -> Option<&'static str> {
    let ct = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    if ct.starts_with("application/xml") {
        Some("application/xml")
    } else if ct.starts_with("text/xml") {
        Some("text/xml")
    } else {
        None
    }
}

/// The two pseudo-collections from the calendar-proxy draft.
pub(crate) fn virtual_proxy_collection(name: &str) -> Option<ProxyBits> {
    match name {
        "calendar-proxy-read" => Some(ProxyBits::Read),
        "calendar-proxy-write" => Some(ProxyBits::Write),
        _ => None,
    }
}
