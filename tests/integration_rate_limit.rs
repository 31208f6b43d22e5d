#![allow(clippy::unwrap_used, clippy::panic, missing_debug_implementations, unreachable_pub)]
mod common;

use common::TestApp;
use reqwest::StatusCode;
use uuid::Uuid;

async fn fetch_bundle(app: &TestApp, requester_token: &str, target: Uuid, ip: &str) -> StatusCode {
    app.client
        .get(format!("{}/bundles/{}", app.server_url, target))
        .header("Authorization", format!("Bearer {requester_token}"))
        .header("X-Forwarded-For", ip)
        .send()
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_requester_axis_trips_regardless_of_target() {
    let mut config = common::get_test_config();
    config.rate_limit.requester_per_min = 2;
    config.rate_limit.target_per_min = 10_000;
    config.rate_limit.ip_per_min = 10_000;
    let app = TestApp::spawn_with_config(config).await;

    let requester = app.new_user();
    let target_a = app.new_user();
    app.provision_p256_user(&target_a, 1).await;
    let target_b = app.new_user();
    app.provision_p256_user(&target_b, 1).await;

    for _ in 0..2 {
        let status = fetch_bundle(&app, &requester.token, target_a.user_id, "20.0.0.1").await;
        assert_eq!(status, StatusCode::OK);
    }

    let status = fetch_bundle(&app, &requester.token, target_b.user_id, "20.0.0.1").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "requester axis trips even against a fresh target");
}

#[tokio::test]
async fn test_target_axis_trips_across_distinct_requesters() {
    let mut config = common::get_test_config();
    config.rate_limit.requester_per_min = 10_000;
    config.rate_limit.target_per_min = 2;
    config.rate_limit.ip_per_min = 10_000;
    let app = TestApp::spawn_with_config(config).await;

    let target = app.new_user();
    app.provision_p256_user(&target, 10).await;

    for i in 0..2 {
        let requester = app.new_user();
        let status = fetch_bundle(&app, &requester.token, target.user_id, &format!("30.0.0.{i}")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let requester = app.new_user();
    let status = fetch_bundle(&app, &requester.token, target.user_id, "30.0.0.99").await;
    assert_eq!(
        status,
        StatusCode::TOO_MANY_REQUESTS,
        "a drain attack against one target trips even with a fresh requester and IP each time"
    );
}

#[tokio::test]
async fn test_ip_axis_trips_across_distinct_requesters_and_targets() {
    let mut config = common::get_test_config();
    config.rate_limit.requester_per_min = 10_000;
    config.rate_limit.target_per_min = 10_000;
    config.rate_limit.ip_per_min = 2;
    let app = TestApp::spawn_with_config(config).await;

    let shared_ip = "40.0.0.1";

    for _ in 0..2 {
        let requester = app.new_user();
        let target = app.new_user();
        app.provision_p256_user(&target, 1).await;
        let status = fetch_bundle(&app, &requester.token, target.user_id, shared_ip).await;
        assert_eq!(status, StatusCode::OK);
    }

    let requester = app.new_user();
    let target = app.new_user();
    app.provision_p256_user(&target, 1).await;
    let status = fetch_bundle(&app, &requester.token, target.user_id, shared_ip).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_distinct_ips_do_not_interfere() {
    let mut config = common::get_test_config();
    config.rate_limit.requester_per_min = 10_000;
    config.rate_limit.target_per_min = 10_000;
    config.rate_limit.ip_per_min = 1;
    let app = TestApp::spawn_with_config(config).await;

    let target = app.new_user();
    app.provision_p256_user(&target, 2).await;

    let requester_a = app.new_user();
    let status = fetch_bundle(&app, &requester_a.token, target.user_id, "50.0.0.1").await;
    assert_eq!(status, StatusCode::OK);

    let requester_b = app.new_user();
    let status = fetch_bundle(&app, &requester_b.token, target.user_id, "50.0.0.2").await;
    assert_eq!(status, StatusCode::OK, "a different IP must not inherit another IP's counter");
}

#[tokio::test]
async fn test_rate_limited_response_reports_the_expected_error_kind() {
    let mut config = common::get_test_config();
    config.rate_limit.requester_per_min = 1;
    let app = TestApp::spawn_with_config(config).await;

    let requester = app.new_user();
    let target = app.new_user();
    app.provision_p256_user(&target, 1).await;

    fetch_bundle(&app, &requester.token, target.user_id, "60.0.0.1").await;
    let status = app
        .client
        .get(format!("{}/bundles/{}", app.server_url, target.user_id))
        .header("Authorization", format!("Bearer {}", requester.token))
        .header("X-Forwarded-For", "60.0.0.1")
        .send()
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = status.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "RATE_LIMITED");
}
