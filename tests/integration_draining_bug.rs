#![allow(clippy::unwrap_used, clippy::panic, missing_debug_implementations, unreachable_pub)]
mod common;

use common::TestApp;
use futures::future::join_all;
use reqwest::StatusCode;

/// A concurrent drain against one target, each request from a distinct requester and IP
/// so only the target axis is under pressure. The Redis `INCR`+`EXPIRE` script must
/// serialize these increments correctly: exactly `target_per_min` requests may succeed,
/// not more and not fewer, regardless of how many race to the counter at once.
#[tokio::test]
async fn test_concurrent_drain_trips_target_axis_exactly_at_the_configured_limit() {
    let mut config = common::get_test_config();
    config.rate_limit.requester_per_min = 10_000;
    config.rate_limit.target_per_min = 10;
    config.rate_limit.ip_per_min = 10_000;
    let app = TestApp::spawn_with_config(config).await;

    let target = app.new_user();
    app.provision_p256_user(&target, 30).await;

    let mut tasks = Vec::new();
    for i in 0..30 {
        let client = app.client.clone();
        let server_url = app.server_url.clone();
        let requester = app.new_user();
        let target_id = target.user_id;
        tasks.push(tokio::spawn(async move {
            client
                .get(format!("{server_url}/bundles/{target_id}"))
                .header("Authorization", format!("Bearer {}", requester.token))
                .header("X-Forwarded-For", format!("70.0.{}.{}", i / 256, i % 256))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }

    let statuses: Vec<StatusCode> = join_all(tasks).await.into_iter().map(Result::unwrap).collect();
    let ok_count = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let limited_count = statuses.iter().filter(|s| **s == StatusCode::TOO_MANY_REQUESTS).count();

    assert_eq!(ok_count, 10, "exactly target_per_min requests should succeed under a concurrent drain");
    assert_eq!(limited_count, 20);
}

/// Claims racing against the same target's one-time prekey pool must never double-issue
/// the same prekey to two concurrent requesters: `FOR UPDATE SKIP LOCKED` guarantees each
/// claim sees a distinct row.
#[tokio::test]
async fn test_concurrent_bundle_claims_never_double_issue_a_one_time_prekey() {
    let mut config = common::get_test_config();
    config.rate_limit.requester_per_min = 10_000;
    config.rate_limit.target_per_min = 10_000;
    config.rate_limit.ip_per_min = 10_000;
    let app = TestApp::spawn_with_config(config).await;

    let target = app.new_user();
    app.provision_p256_user(&target, 10).await;

    let mut tasks = Vec::new();
    for i in 0..10 {
        let client = app.client.clone();
        let server_url = app.server_url.clone();
        let requester = app.new_user();
        let target_id = target.user_id;
        tasks.push(tokio::spawn(async move {
            client
                .get(format!("{server_url}/bundles/{target_id}"))
                .header("Authorization", format!("Bearer {}", requester.token))
                .header("X-Forwarded-For", format!("80.0.{i}.1"))
                .send()
                .await
                .unwrap()
                .json::<serde_json::Value>()
                .await
                .unwrap()
        }));
    }

    let bundles: Vec<serde_json::Value> = join_all(tasks).await.into_iter().map(Result::unwrap).collect();
    let mut claimed_key_ids: Vec<i64> = bundles
        .iter()
        .filter_map(|b| b["oneTimePreKey"]["keyId"].as_i64())
        .collect();
    claimed_key_ids.sort_unstable();
    let before_dedup = claimed_key_ids.len();
    claimed_key_ids.dedup();
    assert_eq!(claimed_key_ids.len(), before_dedup, "no one-time prekey should be claimed twice");
    assert_eq!(before_dedup, 10, "all ten concurrent requesters should have received a distinct prekey");
}
