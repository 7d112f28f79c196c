//! Method gate and HTTP Digest credential parsing
//!
//! The first two steps of the request state machine live here: unknown
//! methods are 405'd, OPTIONS is answered before any authentication
//! (some agents will not resend it with credentials), and everything
//! else must carry a parseable `Authorization: Digest` header before
//! it reaches the dispatcher. Verification against stored state
//! happens later; this layer only parses.

use axum::extract::{Request, State};
use axum::http::{HeaderName, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::{AppState, DAV_CLASSES};

const ALLOW_METHODS: &str = "OPTIONS, GET, PUT, DELETE, PROPFIND, REPORT, PROPPATCH, POST";

/// Credentials parsed from `Authorization: Digest` (RFC 2617, 3.2.2).
#[derive(Debug, Clone)]
pub struct DigestCreds {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub response: String,
    pub uri: String,
    /// Hex nonce count; zero when the client sent none.
    pub nc: i64,
}

/// Scan one quoted-or-token value, advancing the cursor past any
/// trailing separator.
fn scan_value(cp: &mut &str) -> String {
    if let Some(rest) = cp.strip_prefix('"') {
        let b = rest.as_bytes();
        let mut i = 0;
        while i < b.len() {
            if b[i] == b'"' && (i == 0 || b[i - 1] != b'\\') {
                break;
            }
            i += 1;
        }
        let out = rest[..i].to_string();
        *cp = rest.get(i + 1..).unwrap_or("");
        out
    } else {
        let end = cp.find([',', ' ', '\t']).unwrap_or(cp.len());
        let out = cp[..end].to_string();
        *cp = &cp[end..];
        out
    }
}

/// Parse the header value. Unknown tokens are skipped; the result is
/// only usable when the five mandatory values are all present.
pub fn parse_digest(value: &str) -> Option<DigestCreds> {
    let mut cp = value.trim_start().strip_prefix("Digest")?;

    let mut username = None;
    let mut realm = None;
    let mut nonce = None;
    let mut response = None;
    let mut uri = None;
    let mut nc = 0i64;

    loop {
        cp = cp.trim_start_matches([' ', '\t', ',']);
        if cp.is_empty() {
            break;
        }
        let Some(eq) = cp.find('=') else {
            break;
        };
        let key = cp[..eq].trim();
        cp = &cp[eq + 1..];
        let val = scan_value(&mut cp);
        match key {
            "username" => username = Some(val),
            "realm" => realm = Some(val),
            "nonce" => nonce = Some(val),
            "response" => response = Some(val),
            "uri" => uri = Some(val),
            "nc" => nc = i64::from_str_radix(&val, 16).unwrap_or(0),
            _ => {}
        }
    }

    Some(DigestCreds {
        username: username?,
        realm: realm?,
        nonce: nonce?,
        response: response?,
        uri: uri?,
        nc,
    })
}

/// Build a 401 with a freshly minted nonce.
pub(crate) async fn challenge(app: &AppState, stale: bool) -> ApiError {
    match app.store.nonce_new().await {
        Ok(nonce) => ApiError::Unauthorized {
            realm: app.realm.clone(),
            nonce,
            stale,
        },
        Err(e) => ApiError::Internal(e.to_string()),
    }
}

pub async fn digest_gate(State(app): State<AppState>, mut req: Request, next: Next) -> Response {
    let known = matches!(
        req.method().as_str(),
        "OPTIONS" | "GET" | "PUT" | "DELETE" | "PROPFIND" | "REPORT" | "PROPPATCH" | "POST"
    );
    if !known {
        tracing::info!("unsupported HTTP method: {}", req.method());
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, ALLOW_METHODS)],
        )
            .into_response();
    }

    if req.method().as_str() == "OPTIONS" {
        return (
            StatusCode::OK,
            [
                (HeaderName::from_static("dav"), DAV_CLASSES),
                (header::ALLOW, ALLOW_METHODS),
            ],
        )
            .into_response();
    }

    let creds = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_digest);
    match creds {
        Some(creds) => {
            req.extensions_mut().insert(creds);
            next.run(req).await
        }
        None => {
            tracing::info!("bad HTTP authorisation");
            challenge(&app, false).await.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Digest username=\"alice\", realm=\"kalends\", \
        nonce=\"00AA00AA00AA00AA\", uri=\"/alice/cal/\", \
        response=\"deadbeefdeadbeefdeadbeefdeadbeef\", \
        algorithm=MD5-sess, qop=auth, nc=00000001, cnonce=\"xyz\"";

    #[test]
    fn parses_quoted_and_token_values() {
        let creds = parse_digest(HEADER).expect("creds");
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.realm, "kalends");
        assert_eq!(creds.nonce, "00AA00AA00AA00AA");
        assert_eq!(creds.uri, "/alice/cal/");
        assert_eq!(creds.response, "deadbeefdeadbeefdeadbeefdeadbeef");
        assert_eq!(creds.nc, 1);
    }

    #[test]
    fn unknown_tokens_are_skipped() {
        let creds = parse_digest(
            "Digest opaque=\"xx\", username=\"u\", realm=\"r\", nonce=\"n\", \
             response=\"x\", uri=\"/\"",
        )
        .expect("creds");
        assert_eq!(creds.username, "u");
    }

    #[test]
    fn missing_mandatory_value_fails() {
        assert!(parse_digest("Digest username=\"u\", realm=\"r\"").is_none());
        assert!(parse_digest("Basic dXNlcjpwYXNz").is_none());
        assert!(parse_digest("").is_none());
    }

    #[test]
    fn nc_parses_as_hex() {
        let creds = parse_digest(
            "Digest username=\"u\", realm=\"r\", nonce=\"n\", response=\"x\", \
             uri=\"/\", nc=0000000a",
        )
        .expect("creds");
        assert_eq!(creds.nc, 10);
    }

    #[test]
    fn missing_nc_defaults_to_zero() {
        let creds = parse_digest(
            "Digest username=\"u\", realm=\"r\", nonce=\"n\", response=\"x\", uri=\"/\"",
        )
        .expect("creds");
        assert_eq!(creds.nc, 0);
    }

    #[test]
    fn escaped_quotes_stay_inside_the_value() {
        let creds = parse_digest(
            "Digest username=\"a\\\"b\", realm=\"r\", nonce=\"n\", response=\"x\", uri=\"/\"",
        )
        .expect("creds");
        assert_eq!(creds.username, "a\\\"b");
    }
}
