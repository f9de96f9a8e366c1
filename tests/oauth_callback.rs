mod common;

use anyhow::Result;
use axum::http::StatusCode;
use tower::util::ServiceExt; // for `oneshot`

use common::*;
use precinct_auth::config::AuthConfig;

/// Runs the login leg and returns (state, Cookie header carrying the handshake cookies).
async fn start_login(app: &TestApp, return_to: &str) -> Result<(String, String)> {
    let resp = app
        .router
        .clone()
        .oneshot(get(&format!("/auth/discord/login?returnTo={return_to}")))
        .await?;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert!(location(&resp).starts_with("https://provider.test/authorize?state="));

    let cookies = set_cookies(&resp);
    let state = cookie_value(&cookies, "discord_oauth_state").expect("state cookie");
    assert!(cookie_value(&cookies, "discord_oauth_pkce").is_some());
    assert!(cookies.iter().all(|c| c.contains("HttpOnly") && c.contains("SameSite=Lax")));
    Ok((state, cookie_header(&cookies)))
}

fn has_session_cookie(cookies: &[String]) -> bool {
    cookies.iter().any(|c| c.starts_with("precinct_session=") && !c.starts_with("precinct_session=;"))
}

#[tokio::test]
async fn successful_callback_sets_session_and_redirects_to_return_path() -> Result<()> {
    let app = spawn_app(test_config(), Some(FakeProvider::member_with(&[ADMIN_ROLE_ID]))).await?;
    let (state, cookies) = start_login(&app, "/admin/events").await?;

    let resp = app
        .router
        .clone()
        .oneshot(get_with_cookies(&format!("/auth/discord/callback?code=abc&state={state}"), &cookies))
        .await?;

    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/admin/events");
    let set = set_cookies(&resp);
    assert!(has_session_cookie(&set), "{set:?}");
    assert!(set.iter().any(|c| c.starts_with("discord_oauth_state=;") && c.contains("Max-Age=0")));

    // The new session is usable from the same client.
    let session = cookie_header(&set);
    let me = app.router.clone().oneshot(get_with_cookies("/auth/me", &session)).await?;
    assert_eq!(me.status(), StatusCode::OK);
    let body = json_body(me).await?;
    assert_eq!(body["userId"], "discord-user-1");
    assert_eq!(body["role"], "admin");
    assert_eq!(body["provider"], "discord");
    Ok(())
}

#[tokio::test]
async fn empty_stored_state_is_missing_params_without_session() -> Result<()> {
    let app = spawn_app(test_config(), Some(FakeProvider::member_with(&[ADMIN_ROLE_ID]))).await?;

    let resp = app
        .router
        .clone()
        .oneshot(get_with_cookies(
            "/auth/discord/callback?code=abc&state=deadbeef.k0",
            "discord_oauth_state=; discord_oauth_pkce=verifier",
        ))
        .await?;

    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login?error=missing_params");
    assert!(!has_session_cookie(&set_cookies(&resp)));
    Ok(())
}

#[tokio::test]
async fn provider_reported_error_is_oauth_error() -> Result<()> {
    let app = spawn_app(test_config(), Some(FakeProvider::member_with(&[ADMIN_ROLE_ID]))).await?;
    let (state, cookies) = start_login(&app, "/admin").await?;

    let resp = app
        .router
        .clone()
        .oneshot(get_with_cookies(
            &format!("/auth/discord/callback?error=access_denied&state={state}"),
            &cookies,
        ))
        .await?;

    assert_eq!(location(&resp), "/login?error=oauth_error");
    Ok(())
}

#[tokio::test]
async fn mismatched_state_is_rejected() -> Result<()> {
    let app = spawn_app(test_config(), Some(FakeProvider::member_with(&[ADMIN_ROLE_ID]))).await?;
    let (state, cookies) = start_login(&app, "/admin").await?;
    let forged: String = state.chars().rev().collect();

    let resp = app
        .router
        .clone()
        .oneshot(get_with_cookies(&format!("/auth/discord/callback?code=abc&state={forged}"), &cookies))
        .await?;

    assert_eq!(location(&resp), "/login?error=invalid_state");
    assert!(!has_session_cookie(&set_cookies(&resp)));
    Ok(())
}

#[tokio::test]
async fn non_member_and_no_role_are_distinct_failures() -> Result<()> {
    let outsider = spawn_app(test_config(), Some(FakeProvider::not_member())).await?;
    let (state, cookies) = start_login(&outsider, "/admin").await?;
    let resp = outsider
        .router
        .clone()
        .oneshot(get_with_cookies(&format!("/auth/discord/callback?code=abc&state={state}"), &cookies))
        .await?;
    assert_eq!(location(&resp), "/login?error=not_member");

    let roleless = spawn_app(test_config(), Some(FakeProvider::member_with(&["some-other-role"]))).await?;
    let (state, cookies) = start_login(&roleless, "/admin").await?;
    let resp = roleless
        .router
        .clone()
        .oneshot(get_with_cookies(&format!("/auth/discord/callback?code=abc&state={state}"), &cookies))
        .await?;
    assert_eq!(location(&resp), "/login?error=no_role");
    Ok(())
}

#[tokio::test]
async fn failed_code_exchange_is_callback_failed() -> Result<()> {
    let app = spawn_app(test_config(), Some(FakeProvider::member_with(&[ADMIN_ROLE_ID]))).await?;
    let (state, cookies) = start_login(&app, "/admin").await?;

    let resp = app
        .router
        .clone()
        .oneshot(get_with_cookies(&format!("/auth/discord/callback?code=rejected&state={state}"), &cookies))
        .await?;

    assert_eq!(location(&resp), "/login?error=callback_failed");
    Ok(())
}

#[tokio::test]
async fn unsafe_return_path_falls_back_to_default() -> Result<()> {
    let app = spawn_app(test_config(), Some(FakeProvider::member_with(&[ADMIN_ROLE_ID]))).await?;
    let (state, cookies) = start_login(&app, "//evil.example").await?;

    let resp = app
        .router
        .clone()
        .oneshot(get_with_cookies(&format!("/auth/discord/callback?code=abc&state={state}"), &cookies))
        .await?;

    assert_eq!(location(&resp), "/admin");
    Ok(())
}

#[tokio::test]
async fn missing_secret_reports_server_not_configured() -> Result<()> {
    let mut config = test_config();
    config.session_secret = None;
    let app = spawn_app(config, Some(FakeProvider::member_with(&[ADMIN_ROLE_ID]))).await?;

    let resp = app.router.clone().oneshot(get("/auth/discord/login")).await?;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login?error=server_not_configured");
    assert!(set_cookies(&resp).is_empty());
    Ok(())
}

#[tokio::test]
async fn unregistered_provider_reports_server_not_configured() -> Result<()> {
    let app = spawn_app(AuthConfig::default().with_session_secret(SECRET), None).await?;

    let resp = app.router.clone().oneshot(get("/auth/google/login")).await?;
    assert_eq!(location(&resp), "/login?error=server_not_configured");
    Ok(())
}
