//! End-to-end protocol flows against the in-process router: Digest
//! handshakes, PUT/GET round-trips, conditional requests, multistatus
//! bodies, and proxy authorization.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use kalends_api::{AppState, create_router};
use kalends_core::Store;
use kalends_core::digest::{credential_hash, expected_response};
use kalends_core::models::ProxyBits;
use tower::ServiceExt;

const REALM: &str = "kalends";

const ICS: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:u1\r\nDTSTART:20240102T101500Z\r\nSUMMARY:x\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

const CT_CAL: (&str, &str) = ("content-type", "text/calendar; charset=utf-8");
const CT_XML: (&str, &str) = ("content-type", "application/xml; charset=utf-8");

const PROPFIND_ETAG_NAME: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:"><D:prop><D:getetag/><D:displayname/></D:prop></D:propfind>"#;

struct Harness {
    app: Router,
    store: Store,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let store = Store::open(dir.path(), true).await.expect("store");
    store
        .principal_create(
            "alice",
            &credential_hash("alice", REALM, "secret"),
            "alice@example.com",
            "cal",
        )
        .await
        .expect("alice");
    store
        .principal_create(
            "bob",
            &credential_hash("bob", REALM, "hunter2"),
            "bob@example.com",
            "cal",
        )
        .await
        .expect("bob");

    let app = create_router(AppState {
        store: store.clone(),
        realm: REALM.to_string(),
    });
    Harness {
        app,
        store,
        _dir: dir,
    }
}

struct Session<'a> {
    harness: &'a Harness,
    user: &'static str,
    password: &'static str,
    nonce: String,
    nc: i64,
}

impl Harness {
    /// Draw a challenge nonce the way a real client would: by being
    /// refused once.
    async fn session(&self, user: &'static str, password: &'static str) -> Session<'_> {
        let res = self
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PROPFIND")
                    .uri("/")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let www = res
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .expect("challenge")
            .to_str()
            .expect("ascii");
        assert!(www.contains("algorithm=\"MD5-sess\""));
        let nonce = www
            .split("nonce=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .expect("nonce value")
            .to_string();
        Session {
            harness: self,
            user,
            password,
            nonce,
            nc: 0,
        }
    }
}

impl Session<'_> {
    fn authorization(&self, method: &str, uri: &str, nc: i64) -> String {
        let ha1 = credential_hash(self.user, REALM, self.password);
        let response = expected_response(&ha1, &self.nonce, method, uri);
        format!(
            "Digest username=\"{}\", realm=\"{REALM}\", nonce=\"{}\", uri=\"{uri}\", \
             response=\"{response}\", nc={nc:08x}",
            self.user, self.nonce
        )
    }

    async fn send_with_nc(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: &str,
        nc: i64,
    ) -> Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, self.authorization(method, uri, nc));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let req = builder
            .body(Body::from(body.to_string()))
            .expect("request");
        self.harness
            .app
            .clone()
            .oneshot(req)
            .await
            .expect("response")
    }

    async fn send(
        &mut self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: &str,
    ) -> Response {
        self.nc += 1;
        self.send_with_nc(method, uri, headers, body, self.nc).await
    }
}

async fn body_string(res: Response) -> String {
    let bytes = axum::body::to_bytes(res.into_body(), 1 << 20)
        .await
        .expect("body");
    String::from_utf8_lossy(&bytes).into_owned()
}

fn etag_header(res: &Response) -> String {
    res.headers()
        .get(header::ETAG)
        .expect("etag header")
        .to_str()
        .expect("ascii")
        .to_string()
}

#[tokio::test]
async fn s1_fresh_put_get_roundtrip() {
    let h = harness().await;
    let mut alice = h.session("alice", "secret").await;

    let res = alice
        .send("PUT", "/alice/cal/a.ics", &[CT_CAL], ICS)
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let etag = etag_header(&res);
    assert!(etag.starts_with('"') && etag.ends_with('"'));

    let res = alice.send("GET", "/alice/cal/a.ics", &[], "").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(etag_header(&res), etag);
    assert_eq!(
        res.headers()
            .get(header::CONTENT_TYPE)
            .expect("content type")
            .to_str()
            .expect("ascii"),
        "text/calendar"
    );
    assert_eq!(
        res.headers()
            .get("dav")
            .expect("dav header")
            .to_str()
            .expect("ascii"),
        "1, access-control, calendar-access, calendar-proxy"
    );
    let body = body_string(res).await;
    assert_eq!(body, ICS);

    // A matching If-None-Match short-circuits to 304.
    let res = alice
        .send(
            "GET",
            "/alice/cal/a.ics",
            &[("if-none-match", etag.as_str())],
            "",
        )
        .await;
    assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn s2_conditional_put_mismatch() {
    let h = harness().await;
    let mut alice = h.session("alice", "secret").await;

    let res = alice
        .send("PUT", "/alice/cal/a.ics", &[CT_CAL], ICS)
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let etag = etag_header(&res);

    let res = alice
        .send(
            "PUT",
            "/alice/cal/a.ics",
            &[CT_CAL, ("if-match", "\"wrong\"")],
            &ICS.replace("SUMMARY:x", "SUMMARY:y"),
        )
        .await;
    assert_eq!(res.status(), StatusCode::PRECONDITION_FAILED);

    // Resource and ETag are untouched.
    let res = alice.send("GET", "/alice/cal/a.ics", &[], "").await;
    assert_eq!(etag_header(&res), etag);
    assert_eq!(body_string(res).await, ICS);

    // And a PUT with the right tag goes through with a fresh ETag.
    let res = alice
        .send(
            "PUT",
            "/alice/cal/a.ics",
            &[CT_CAL, ("if-match", etag.as_str())],
            &ICS.replace("SUMMARY:x", "SUMMARY:y"),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_ne!(etag_header(&res), etag);
}

#[tokio::test]
async fn s3_nonce_replay_is_refused() {
    let h = harness().await;
    let alice = h.session("alice", "secret").await;

    let res = alice
        .send_with_nc("PROPFIND", "/alice/", &[CT_XML], PROPFIND_ETAG_NAME, 1)
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);

    // Identical Authorization header again: same nonce, same nc.
    let res = alice
        .send_with_nc("PROPFIND", "/alice/", &[CT_XML], PROPFIND_ETAG_NAME, 1)
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn s4_propfind_depth_one_on_collection() {
    let h = harness().await;
    let mut alice = h.session("alice", "secret").await;

    let res = alice
        .send("PUT", "/alice/cal/a.ics", &[CT_CAL], ICS)
        .await;
    let etag = etag_header(&res);
    let bare_etag = etag.trim_matches('"').to_string();

    let res = alice
        .send(
            "PROPFIND",
            "/alice/cal/",
            &[CT_XML, ("depth", "1")],
            PROPFIND_ETAG_NAME,
        )
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let body = body_string(res).await;

    // One response per resource with its etag served...
    assert!(body.contains("/alice/cal/a.ics"));
    assert!(body.contains(&bare_etag));
    // ...and the collection response serves displayname but 404s
    // getetag, which has no collection-scope serializer.
    assert!(body.contains(">Calendar<"));
    assert!(body.contains("HTTP/1.1 404 Not Found"));
    assert!(body.contains("<X:getetag xmlns:X=\"DAV:\"/>"));
}

#[tokio::test]
async fn s5_proppatch_invalid_colour() {
    let h = harness().await;
    let mut alice = h.session("alice", "secret").await;

    let ctag_of = |store: &Store| {
        let store = store.clone();
        async move {
            store
                .principal_load("alice")
                .await
                .expect("load")
                .expect("present")
                .collections[0]
                .ctag
        }
    };
    let before = ctag_of(&h.store).await;

    let body = r#"<?xml version="1.0"?>
<D:propertyupdate xmlns:D="DAV:" xmlns:A="http://apple.com/ns/ical/">
  <D:set><D:prop><A:calendar-color>not-a-colour</A:calendar-color></D:prop></D:set>
</D:propertyupdate>"#;
    let res = alice
        .send("PROPPATCH", "/alice/cal/", &[CT_XML], body)
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let xml = body_string(res).await;
    assert!(xml.contains("HTTP/1.1 409 Conflict"));
    assert!(xml.contains("calendar-color"));

    // Nothing was committed, so the CTag did not move.
    assert_eq!(ctag_of(&h.store).await, before);

    // A valid update does move it.
    let body = r#"<?xml version="1.0"?>
<D:propertyupdate xmlns:D="DAV:" xmlns:A="http://apple.com/ns/ical/">
  <D:set><D:prop><A:calendar-color>#11AA22</A:calendar-color></D:prop></D:set>
</D:propertyupdate>"#;
    let res = alice
        .send("PROPPATCH", "/alice/cal/", &[CT_XML], body)
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    assert!(ctag_of(&h.store).await > before);
}

#[tokio::test]
async fn s6_proxy_read_of_peer_calendar() {
    let h = harness().await;

    let alice_id = h
        .store
        .principal_load("alice")
        .await
        .expect("load")
        .expect("present")
        .id;
    let bob_id = h
        .store
        .principal_load("bob")
        .await
        .expect("load")
        .expect("present")
        .id;
    h.store
        .proxy_upsert(alice_id, bob_id, ProxyBits::Read)
        .await
        .expect("grant");

    let mut bob = h.session("bob", "hunter2").await;

    let res = bob
        .send(
            "PROPFIND",
            "/alice/cal/",
            &[CT_XML, ("depth", "1")],
            PROPFIND_ETAG_NAME,
        )
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);

    let res = bob
        .send("PUT", "/alice/cal/x.ics", &[CT_CAL], ICS)
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn options_is_answered_before_authentication() {
    let h = harness().await;
    let res = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers()
            .get("dav")
            .expect("dav")
            .to_str()
            .expect("ascii"),
        "1, access-control, calendar-access, calendar-proxy"
    );
    let allow = res
        .headers()
        .get(header::ALLOW)
        .expect("allow")
        .to_str()
        .expect("ascii");
    for method in ["PROPFIND", "REPORT", "PUT", "DELETE", "PROPPATCH"] {
        assert!(allow.contains(method));
    }
}

#[tokio::test]
async fn unknown_methods_are_rejected() {
    let h = harness().await;
    let res = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/alice/cal/")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unsafe_paths_never_reach_storage() {
    let h = harness().await;
    let mut alice = h.session("alice", "secret").await;
    let res = alice.send("GET", "/alice/../bob/cal", &[], "").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bare_principal_probe_redirects() {
    let h = harness().await;
    let mut alice = h.session("alice", "secret").await;
    let res = alice.send("GET", "/", &[], "").await;
    assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        res.headers()
            .get(header::LOCATION)
            .expect("location")
            .to_str()
            .expect("ascii"),
        "/alice/"
    );
}

#[tokio::test]
async fn report_multiget_mixes_hits_and_misses() {
    let h = harness().await;
    let mut alice = h.session("alice", "secret").await;
    alice
        .send("PUT", "/alice/cal/a.ics", &[CT_CAL], ICS)
        .await;

    let body = r#"<?xml version="1.0"?>
<C:calendar-multiget xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:prop><D:getetag/><C:calendar-data/></D:prop>
  <D:href>/alice/cal/a.ics</D:href>
  <D:href>/alice/cal/missing.ics</D:href>
</C:calendar-multiget>"#;
    let res = alice
        .send("REPORT", "/alice/cal/", &[CT_XML], body)
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let xml = body_string(res).await;
    assert!(xml.contains("BEGIN:VCALENDAR"));
    assert!(xml.contains("HTTP/1.1 200 OK"));
    assert!(xml.contains("missing.ics"));
    assert!(xml.contains("HTTP/1.1 404 Not Found"));
}

#[tokio::test]
async fn wrong_password_is_challenged_again() {
    let h = harness().await;
    let mut mallory = h.session("alice", "wrong-password").await;
    let res = mallory.send("GET", "/alice/cal/a.ics", &[], "").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(res.headers().get(header::WWW_AUTHENTICATE).is_some());
}

#[tokio::test]
async fn propfind_on_principal_lists_proxy_collections() {
    let h = harness().await;
    let mut alice = h.session("alice", "secret").await;

    let body = r#"<?xml version="1.0"?>
<D:propfind xmlns:D="DAV:"><D:prop><D:resourcetype/><D:displayname/></D:prop></D:propfind>"#;
    let res = alice
        .send("PROPFIND", "/alice/", &[CT_XML, ("depth", "1")], body)
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let xml = body_string(res).await;
    assert!(xml.contains("/alice/calendar-proxy-read/"));
    assert!(xml.contains("/alice/calendar-proxy-write/"));
    assert!(xml.contains("/alice/cal/"));
    assert!(xml.contains("<C:calendar/>"));
    assert!(xml.contains("<D:principal/>"));
}

#[tokio::test]
async fn delete_with_if_match_guards_the_victim() {
    let h = harness().await;
    let mut alice = h.session("alice", "secret").await;

    let res = alice
        .send("PUT", "/alice/cal/a.ics", &[CT_CAL], ICS)
        .await;
    let etag = etag_header(&res);

    let res = alice
        .send(
            "DELETE",
            "/alice/cal/a.ics",
            &[("if-match", "\"stale\"")],
            "",
        )
        .await;
    assert_eq!(res.status(), StatusCode::PRECONDITION_FAILED);

    let res = alice
        .send(
            "DELETE",
            "/alice/cal/a.ics",
            &[("if-match", etag.as_str())],
            "",
        )
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = alice.send("GET", "/alice/cal/a.ics", &[], "").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
