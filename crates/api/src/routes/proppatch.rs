//! PROPPATCH: update collection metadata (RFC 4918, 9.2)
//!
//! The writable surface is deliberately small: displayname, the Apple
//! calendar colour, and the CalDAV description. Unknown properties go
//! into a 404 propstat, invalid values into a 409 propstat, and the
//! collection (with its CTag) only changes when at least one value
//! survived.

use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::DavState;
use crate::AppState;
use crate::error::ApiError;
use crate::props::Prop;
use crate::routes::xml_mime;
use crate::xml::request::{ReqKind, Validity, parse_request};
use crate::xml::writer::{self as xml};

fn accepted(tag: Prop) -> bool {
    matches!(
        tag,
        Prop::Displayname | Prop::CalendarColor | Prop::CalendarDescription
    )
}

pub async fn handle(
    app: &AppState,
    state: &DavState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ApiError> {
    let Some(cfg) = &state.collection else {
        tracing::info!("PROPPATCH of non-calendar collection");
        return Err(ApiError::Forbidden);
    };

    if body.is_empty() {
        return Err(ApiError::BadRequest("empty request body".to_string()));
    }
    let Some(mime) = xml_mime(headers) else {
        return Err(ApiError::UnsupportedMediaType(
            "expected an XML body".to_string(),
        ));
    };
    let dav = parse_request(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if dav.kind != ReqKind::PropertyUpdate {
        tracing::info!("unknown PROPPATCH request type");
        return Err(ApiError::UnsupportedMediaType(
            "expected propertyupdate".to_string(),
        ));
    }

    let mut updated = cfg.clone();
    let mut applied = Vec::new();
    let mut unknown = Vec::new();
    let mut invalid = Vec::new();

    for prop in &dav.props {
        let tag = prop.tag.filter(|t| accepted(*t));
        let Some(tag) = tag else {
            unknown.push(prop);
            if prop.validity == Validity::Invalid {
                invalid.push(prop);
            }
            continue;
        };
        if prop.validity == Validity::Invalid {
            invalid.push(prop);
            continue;
        }
        let Some(value) = prop.value.clone() else {
            unknown.push(prop);
            continue;
        };
        match tag {
            Prop::Displayname => updated.displayname = value,
            Prop::CalendarColor => updated.colour = value,
            Prop::CalendarDescription => updated.description = value,
            _ => {}
        }
        applied.push(prop);
    }

    let mut w = xml::multistatus()?;
    xml::start(&mut w, "D:response")?;
    xml::href(&mut w, &format!("/{}/{}/", state.rprncpl.name, cfg.url))?;

    xml::start(&mut w, "D:propstat")?;
    xml::start(&mut w, "D:prop")?;
    for prop in &applied {
        xml::foreign_empty(&mut w, &prop.name, &prop.ns)?;
    }
    xml::end(&mut w, "D:prop")?;
    xml::status(&mut w, StatusCode::OK)?;
    xml::end(&mut w, "D:propstat")?;

    if !unknown.is_empty() {
        xml::start(&mut w, "D:propstat")?;
        xml::start(&mut w, "D:prop")?;
        for prop in &unknown {
            xml::foreign_empty(&mut w, &prop.name, &prop.ns)?;
        }
        xml::end(&mut w, "D:prop")?;
        xml::status(&mut w, StatusCode::NOT_FOUND)?;
        xml::end(&mut w, "D:propstat")?;
    }

    // RFC 4918, 9.2.1 assigns 409 to values the server refuses.
    if !invalid.is_empty() {
        xml::start(&mut w, "D:propstat")?;
        xml::start(&mut w, "D:prop")?;
        for prop in &invalid {
            xml::foreign_empty(&mut w, &prop.name, &prop.ns)?;
        }
        xml::end(&mut w, "D:prop")?;
        xml::status(&mut w, StatusCode::CONFLICT)?;
        xml::end(&mut w, "D:propstat")?;
    }

    xml::end(&mut w, "D:response")?;
    let bytes = xml::finish(w)?;

    if !applied.is_empty() {
        app.store.collection_update(&updated).await?;
    }

    Ok((
        StatusCode::MULTI_STATUS,
        [(header::CONTENT_TYPE, format!("{mime}; charset=utf-8"))],
        bytes,
    )
        .into_response())
}
