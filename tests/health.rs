mod common;

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::Value;
use tower::util::ServiceExt; // for `oneshot`

use common::{get, json_body, spawn_app, test_config, test_pool};
use precinct_auth::create_app;

#[tokio::test]
async fn health_endpoint_reports_db_ok() -> Result<()> {
    let (pool, _dir) = test_pool().await?;

    // create app router from the environment
    std::env::set_var("SESSION_SECRET", "health-check-secret-of-sufficient-length");
    let app = create_app(pool.clone()).await?;

    let req = Request::builder()
        .method("GET")
        .uri("/api/health")
        .body(Body::empty())?;

    let resp: Response = app.oneshot(req).await?;
    let status = resp.status();
    assert_eq!(status, StatusCode::OK, "health endpoint did not return 200");

    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let v: Value = serde_json::from_slice(&body_bytes)?;
    let db_ok = v.get("db_ok").and_then(|b| b.as_bool()).unwrap_or(false);
    assert!(db_ok, "expected db_ok: true, got: {}", v);
    assert_eq!(v["auth_configured"], true);

    Ok(())
}

#[tokio::test]
async fn health_reports_missing_session_secret() -> Result<()> {
    let mut config = test_config();
    config.session_secret = None;
    let app = spawn_app(config, None).await?;

    let resp = app.router.clone().oneshot(get("/api/health")).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await?;
    assert_eq!(v["db_ok"], true);
    assert_eq!(v["auth_configured"], false);

    let status = json_body(app.router.clone().oneshot(get("/auth/status")).await?).await?;
    assert_eq!(status["configured"], false);
    assert_eq!(status["providers"], serde_json::json!([]));
    Ok(())
}
