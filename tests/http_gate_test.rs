mod helpers;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderName, Request, StatusCode};
use axum::Router;
use base64ct::{Base64, Encoding};
use tower::ServiceExt;
use warden::authz::web::SubjectSource;
use warden::web::router;

use helpers::{fixture_enforcer, inline_enforcer, MODEL};

fn basic_gate() -> Router {
    router(Arc::new(fixture_enforcer()), SubjectSource::BasicAuth)
}

async fn status_for(app: &Router, user: &str, path: &str, method: &str) -> StatusCode {
    let credentials = Base64::encode_string(format!("{user}:password").as_bytes());
    let request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::AUTHORIZATION, format!("Basic {credentials}"))
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap().status()
}

async fn assert_statuses(app: &Router, user: &str, cases: &[(&str, &str, StatusCode)]) {
    for (path, method, want) in cases {
        assert_eq!(
            status_for(app, user, path, method).await,
            *want,
            "{user} {method} {path}"
        );
    }
}

#[tokio::test]
async fn test_basic() {
    let app = basic_gate();
    assert_statuses(
        &app,
        "alice",
        &[
            ("/dataset1/resource1", "GET", StatusCode::OK),
            ("/dataset1/resource1", "POST", StatusCode::OK),
            ("/dataset1/resource2", "GET", StatusCode::OK),
            ("/dataset1/resource2", "POST", StatusCode::FORBIDDEN),
        ],
    )
    .await;
}

#[tokio::test]
async fn test_path_wildcard() {
    let app = basic_gate();
    assert_statuses(
        &app,
        "bob",
        &[
            ("/dataset2/resource1", "GET", StatusCode::OK),
            ("/dataset2/resource1", "POST", StatusCode::OK),
            ("/dataset2/resource1", "DELETE", StatusCode::OK),
            ("/dataset2/resource2", "GET", StatusCode::OK),
            ("/dataset2/resource2", "POST", StatusCode::FORBIDDEN),
            ("/dataset2/resource2", "DELETE", StatusCode::FORBIDDEN),
            ("/dataset2/folder1/item1", "GET", StatusCode::FORBIDDEN),
            ("/dataset2/folder1/item1", "POST", StatusCode::OK),
            ("/dataset2/folder1/item1", "DELETE", StatusCode::FORBIDDEN),
            ("/dataset2/folder1/item2", "GET", StatusCode::FORBIDDEN),
            ("/dataset2/folder1/item2", "POST", StatusCode::OK),
            ("/dataset2/folder1/item2", "DELETE", StatusCode::FORBIDDEN),
        ],
    )
    .await;
}

#[tokio::test]
async fn test_rbac() {
    let app = basic_gate();
    assert_statuses(
        &app,
        "cathy",
        &[
            ("/dataset1/item", "GET", StatusCode::OK),
            ("/dataset1/item", "POST", StatusCode::OK),
            ("/dataset1/item", "DELETE", StatusCode::OK),
            ("/dataset2/item", "GET", StatusCode::FORBIDDEN),
            ("/dataset2/item", "POST", StatusCode::FORBIDDEN),
            ("/dataset2/item", "DELETE", StatusCode::FORBIDDEN),
        ],
    )
    .await;
}

#[tokio::test]
async fn test_allowed_response_is_empty() {
    let app = basic_gate();
    let credentials = Base64::encode_string(b"alice:pw");
    let response = app
        .oneshot(
            Request::builder()
                .uri("/dataset1/resource1")
                .header(header::AUTHORIZATION, format!("Basic {credentials}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_missing_credentials_are_forbidden() {
    let app = basic_gate();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/dataset1/resource1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_healthz_is_not_gated() {
    let app = basic_gate();
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_subject_from_header() {
    let header_name = HeaderName::from_static("x-forwarded-user");
    let app = router(
        Arc::new(fixture_enforcer()),
        SubjectSource::Header(header_name.clone()),
    );

    let request = |user: &str| {
        Request::builder()
            .method("DELETE")
            .uri("/dataset1/item")
            .header(&header_name, user)
            .body(Body::empty())
            .unwrap()
    };

    let allowed = app.clone().oneshot(request("cathy")).await.unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);

    let denied = app.oneshot(request("alice")).await.unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_enforcement_error_is_forbidden() {
    // the gate supplies three request values, this model wants four
    let model = MODEL.replace("r = sub, obj, act", "r = sub, obj, act, ip");
    let app = router(
        Arc::new(inline_enforcer(&model, "p, alice, /dataset1/*, GET\n")),
        SubjectSource::BasicAuth,
    );
    assert_eq!(
        status_for(&app, "alice", "/dataset1/resource1", "GET").await,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn test_percent_encoded_path_is_decoded() {
    let app = basic_gate();
    assert_statuses(
        &app,
        "alice",
        &[
            ("/dataset1/resource%31", "POST", StatusCode::OK),
            ("/dataset1/resource%32", "POST", StatusCode::FORBIDDEN),
            ("/%64ataset1/resource2", "GET", StatusCode::OK),
        ],
    )
    .await;
}

#[tokio::test]
async fn test_encoded_path_cannot_dodge_deny_rule() {
    let model = r#"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act, eft
[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))
[matchers]
m = r.sub == p.sub && keyMatch(r.obj, p.obj) && r.act == p.act
"#;
    let policy = "\
p, bob, /data/*, GET, allow
p, bob, /data/private/*, GET, deny
";
    let app = router(
        Arc::new(inline_enforcer(model, policy)),
        SubjectSource::BasicAuth,
    );
    assert_statuses(
        &app,
        "bob",
        &[
            ("/data/public/x", "GET", StatusCode::OK),
            ("/data/private/x", "GET", StatusCode::FORBIDDEN),
            ("/data/%70rivate/x", "GET", StatusCode::FORBIDDEN),
            ("/data/%70%72%69%76%61%74%65/x", "GET", StatusCode::FORBIDDEN),
        ],
    )
    .await;
}

#[tokio::test]
async fn test_undecodable_path_is_forbidden() {
    let app = basic_gate();
    // alice may GET anything under /dataset1/, but not a path that is not UTF-8
    assert_statuses(
        &app,
        "alice",
        &[
            ("/dataset1/%E2%9C%93", "GET", StatusCode::OK),
            ("/dataset1/%FF", "GET", StatusCode::FORBIDDEN),
            ("/dataset1/%C3%28", "GET", StatusCode::FORBIDDEN),
        ],
    )
    .await;
}
