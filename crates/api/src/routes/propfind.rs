//! PROPFIND and REPORT: multistatus property retrieval
//!
//! PROPFIND (RFC 4918, 9.1) serves principals, collections, resources,
//! and the two proxy pseudo-collections. REPORT (RFC 4791, 7.1)
//! reuses the same machinery: calendar-query behaves like a depth-1
//! PROPFIND over the collection (filters may return the superset), and
//! calendar-multiget resolves each requested href.

use std::io;

use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use kalends_core::models::{Collection, ProxyBits, Resource};

use super::{DavState, parse_path, xml_mime};
use crate::AppState;
use crate::error::ApiError;
use crate::props::{Prop, PropSpec};
use crate::xml::request::{DavRequest, PropRequest, ReqKind, parse_request};
use crate::xml::writer::{self as xml, XmlWriter};

enum Scope<'a> {
    Principal,
    Collection(&'a Collection),
    Resource(&'a Collection, &'a Resource),
}

fn serves(spec: &PropSpec, scope: &Scope<'_>) -> bool {
    match scope {
        Scope::Principal => spec.principal.is_some(),
        Scope::Collection(_) => spec.collection.is_some(),
        Scope::Resource(..) => spec.resource.is_some(),
    }
}

fn write_value(
    w: &mut XmlWriter,
    state: &DavState,
    spec: &PropSpec,
    scope: &Scope<'_>,
) -> io::Result<()> {
    match scope {
        Scope::Principal => {
            if let Some(f) = spec.principal {
                f(w, state)?;
            }
        }
        Scope::Collection(c) => {
            if let Some(f) = spec.collection {
                f(w, state, c)?;
            }
        }
        Scope::Resource(c, r) => {
            if let Some(f) = spec.resource {
                f(w, state, c, r)?;
            }
        }
    }
    Ok(())
}

fn prop_served(prop: &PropRequest, scope: &Scope<'_>) -> bool {
    prop.tag.is_some_and(|tag| serves(tag.spec(), scope))
}

/// Emit the 200 propstat of served properties and, when needed, the
/// 404 propstat naming the rest.
fn write_propstats(
    w: &mut XmlWriter,
    state: &DavState,
    dav: &DavRequest,
    scope: &Scope<'_>,
) -> io::Result<()> {
    xml::start(w, "D:propstat")?;
    xml::start(w, "D:prop")?;
    let mut missing = false;
    for prop in &dav.props {
        if !prop_served(prop, scope) {
            missing = true;
            continue;
        }
        let tag = prop.tag.unwrap_or(Prop::ResourceType);
        xml::foreign_start(w, &prop.name, &prop.ns)?;
        write_value(w, state, tag.spec(), scope)?;
        xml::foreign_end(w, &prop.name)?;
    }
    xml::end(w, "D:prop")?;
    xml::status(w, StatusCode::OK)?;
    xml::end(w, "D:propstat")?;

    if missing {
        xml::start(w, "D:propstat")?;
        xml::start(w, "D:prop")?;
        for prop in &dav.props {
            if !prop_served(prop, scope) {
                xml::foreign_empty(w, &prop.name, &prop.ns)?;
            }
        }
        xml::end(w, "D:prop")?;
        xml::status(w, StatusCode::NOT_FOUND)?;
        xml::end(w, "D:propstat")?;
    }
    Ok(())
}

fn respond_principal(w: &mut XmlWriter, state: &DavState, dav: &DavRequest) -> io::Result<()> {
    xml::start(w, "D:response")?;
    xml::href(w, &format!("/{}/", state.rprncpl.name))?;
    write_propstats(w, state, dav, &Scope::Principal)?;
    xml::end(w, "D:response")
}

fn respond_collection(
    w: &mut XmlWriter,
    state: &DavState,
    dav: &DavRequest,
    coln: &Collection,
) -> io::Result<()> {
    xml::start(w, "D:response")?;
    xml::href(w, &format!("/{}/{}/", state.rprncpl.name, coln.url))?;
    write_propstats(w, state, dav, &Scope::Collection(coln))?;
    xml::end(w, "D:response")
}

fn respond_resource(
    w: &mut XmlWriter,
    state: &DavState,
    dav: &DavRequest,
    coln: &Collection,
    res: &Resource,
) -> io::Result<()> {
    xml::start(w, "D:response")?;
    xml::href(
        w,
        &format!("/{}/{}/{}", state.rprncpl.name, coln.url, res.url),
    )?;
    write_propstats(w, state, dav, &Scope::Resource(coln, res))?;
    xml::end(w, "D:response")
}

/// The virtual calendar-proxy-read / calendar-proxy-write collections.
/// Only resourcetype and group-member-set are meaningful there.
fn respond_proxy(
    w: &mut XmlWriter,
    state: &DavState,
    dav: &DavRequest,
    bits: ProxyBits,
) -> io::Result<()> {
    let (segment, type_tag) = match bits {
        ProxyBits::Read => ("calendar-proxy-read", "B:calendar-proxy-read"),
        ProxyBits::Write => ("calendar-proxy-write", "B:calendar-proxy-write"),
    };

    xml::start(w, "D:response")?;
    xml::href(w, &format!("/{}/{segment}/", state.rprncpl.name))?;

    xml::start(w, "D:propstat")?;
    xml::start(w, "D:prop")?;
    let mut missing = false;
    for prop in &dav.props {
        match prop.tag {
            Some(Prop::ResourceType) => {
                xml::foreign_start(w, &prop.name, &prop.ns)?;
                xml::empty(w, "D:principal")?;
                xml::empty(w, type_tag)?;
                xml::foreign_end(w, &prop.name)?;
            }
            Some(Prop::GroupMemberSet) => {
                // RFC 3744, 4.3; the members are the delegates holding
                // this access level.
                xml::foreign_start(w, &prop.name, &prop.ns)?;
                for grant in &state.rprncpl.delegates {
                    if grant.bits == bits {
                        xml::href(w, &format!("/{}/", grant.name))?;
                    }
                }
                xml::foreign_end(w, &prop.name)?;
            }
            _ => missing = true,
        }
    }
    xml::end(w, "D:prop")?;
    xml::status(w, StatusCode::OK)?;
    xml::end(w, "D:propstat")?;

    if missing {
        xml::start(w, "D:propstat")?;
        xml::start(w, "D:prop")?;
        for prop in &dav.props {
            if !matches!(prop.tag, Some(Prop::ResourceType) | Some(Prop::GroupMemberSet)) {
                xml::foreign_empty(w, &prop.name, &prop.ns)?;
            }
        }
        xml::end(w, "D:prop")?;
        xml::status(w, StatusCode::NOT_FOUND)?;
        xml::end(w, "D:propstat")?;
    }

    xml::end(w, "D:response")
}

/// Error entry for an href that did not resolve to a resource.
fn respond_error(w: &mut XmlWriter, href: &str, code: StatusCode) -> io::Result<()> {
    xml::start(w, "D:response")?;
    let encoded = urlencoding::encode(href).replace("%2F", "/");
    xml::href(w, &encoded)?;
    xml::status(w, code)?;
    xml::end(w, "D:response")
}

fn multistatus_response(mime: &'static str, writer: XmlWriter) -> Result<Response, ApiError> {
    let bytes = xml::finish(writer)?;
    Ok((
        StatusCode::MULTI_STATUS,
        [(header::CONTENT_TYPE, format!("{mime}; charset=utf-8"))],
        bytes,
    )
        .into_response())
}

/// Parse and type-check an XML request body.
fn req_to_dav(
    headers: &HeaderMap,
    body: &[u8],
    wanted: &[ReqKind],
) -> Result<(DavRequest, &'static str), ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty request body".to_string()));
    }
    let Some(mime) = xml_mime(headers) else {
        return Err(ApiError::UnsupportedMediaType(
            "expected an XML body".to_string(),
        ));
    };
    let dav = parse_request(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if !wanted.contains(&dav.kind) {
        return Err(ApiError::UnsupportedMediaType(format!(
            "unexpected request type: {:?}",
            dav.kind
        )));
    }
    Ok((dav, mime))
}

fn depth(headers: &HeaderMap) -> usize {
    match headers.get("Depth").and_then(|v| v.to_str().ok()) {
        Some("0") => 0,
        _ => 1,
    }
}

pub async fn propfind(
    app: &AppState,
    state: &DavState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ApiError> {
    let (dav, mime) = req_to_dav(headers, body, &[ReqKind::Propfind])?;
    let depth = depth(headers);

    // A resource target must exist before the 207 starts; after that,
    // errors can only live inside the body.
    let mut resource = None;
    match (&state.collection, state.resource_name.is_empty()) {
        (Some(cfg), false) => {
            let Some(res) = app.store.resource_load(cfg.id, &state.resource_name).await? else {
                tracing::info!("PROPFIND for unknown resource: {}", state.resource_name);
                return Err(ApiError::NotFound(state.resource_name.clone()));
            };
            resource = Some(res);
        }
        (None, false) => {
            tracing::info!("PROPFIND for resource outside calendar collection");
            return Err(ApiError::Forbidden);
        }
        _ => {}
    }

    let mut w = xml::multistatus()?;

    if let Some(bits) = super::virtual_proxy_collection(&state.collection_name)
        .filter(|_| state.collection.is_none())
    {
        respond_proxy(&mut w, state, &dav, bits)?;
    } else if let Some(cfg) = &state.collection {
        match &resource {
            Some(res) => respond_resource(&mut w, state, &dav, cfg, res)?,
            None => {
                respond_collection(&mut w, state, &dav, cfg)?;
                if depth > 0 {
                    for res in app.store.collection_resources(cfg.id).await? {
                        respond_resource(&mut w, state, &dav, cfg, &res)?;
                    }
                }
            }
        }
    } else {
        respond_principal(&mut w, state, &dav)?;
        if depth > 0 {
            respond_proxy(&mut w, state, &dav, ProxyBits::Read)?;
            respond_proxy(&mut w, state, &dav, ProxyBits::Write)?;
            for coln in &state.rprncpl.collections {
                respond_collection(&mut w, state, &dav, coln)?;
            }
        }
    }

    multistatus_response(mime, w)
}

pub async fn report(
    app: &AppState,
    state: &DavState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ApiError> {
    let Some(cfg) = &state.collection else {
        tracing::info!("REPORT of non-calendar collection");
        return Err(ApiError::Forbidden);
    };
    let (dav, mime) = req_to_dav(
        headers,
        body,
        &[ReqKind::CalendarQuery, ReqKind::CalendarMultiget],
    )?;

    if !state.resource_name.is_empty() {
        let Some(res) = app.store.resource_load(cfg.id, &state.resource_name).await? else {
            tracing::info!("REPORT for unknown resource: {}", state.resource_name);
            return Err(ApiError::NotFound(state.resource_name.clone()));
        };
        let mut w = xml::multistatus()?;
        respond_resource(&mut w, state, &dav, cfg, &res)?;
        return multistatus_response(mime, w);
    }

    let mut w = xml::multistatus()?;
    match dav.kind {
        ReqKind::CalendarMultiget => {
            for href in &dav.hrefs {
                write_multiget_entry(app, state, &dav, &mut w, href).await?;
            }
        }
        _ => {
            // calendar-query: serve the collection and everything in
            // it; clients filter the superset themselves.
            respond_collection(&mut w, state, &dav, cfg)?;
            for res in app.store.collection_resources(cfg.id).await? {
                respond_resource(&mut w, state, &dav, cfg, &res)?;
            }
        }
    }
    multistatus_response(mime, w)
}

/// Resolve one multiget href under the requested principal's
/// collections and emit its response entry.
async fn write_multiget_entry(
    app: &AppState,
    state: &DavState,
    dav: &DavRequest,
    w: &mut XmlWriter,
    href: &str,
) -> Result<(), ApiError> {
    let resolved = parse_path(href).filter(|p| p.principal == state.rprncpl.name);
    let Some(path) = resolved else {
        tracing::info!("multiget href outside principal: {href}");
        respond_error(w, href, StatusCode::FORBIDDEN)?;
        return Ok(());
    };
    let Some(coln) = state.rprncpl.collection_by_url(&path.collection) else {
        tracing::info!("multiget href in unknown collection: {href}");
        respond_error(w, href, StatusCode::FORBIDDEN)?;
        return Ok(());
    };
    match app.store.resource_load(coln.id, &path.resource).await {
        Ok(Some(res)) => respond_resource(w, state, dav, coln, &res)?,
        Ok(None) => {
            tracing::info!("multiget href not found: {href}");
            respond_error(w, href, StatusCode::NOT_FOUND)?;
        }
        Err(e) => {
            tracing::error!("cannot load multiget resource: {e}");
            respond_error(w, href, StatusCode::HTTP_VERSION_NOT_SUPPORTED)?;
        }
    }
    Ok(())
}
