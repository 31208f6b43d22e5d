#![allow(clippy::unwrap_used, clippy::panic, missing_debug_implementations, unreachable_pub)]
mod common;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use common::TestApp;
use std::time::Duration;

const SEAL_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_root_is_not_found_before_any_epoch_seals() {
    let app = TestApp::spawn().await;
    let resp = app.client.get(format!("{}/transparency/root", app.server_url)).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_key_upload_eventually_produces_a_signed_epoch() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    app.provision_p256_user(&user, 1).await;

    let head = app.wait_for_epoch(1, SEAL_TIMEOUT).await.expect("an epoch should seal after a key upload");
    assert_eq!(head["epochNumber"], 1);
    assert_eq!(head["treeSize"], 1);
    assert!(head["rootHash"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(head["signature"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(head["previousRootHash"].is_null());
}

#[tokio::test]
async fn test_successive_uploads_advance_the_epoch_and_chain_previous_root() {
    let app = TestApp::spawn().await;

    let first_user = app.new_user();
    app.provision_p256_user(&first_user, 0).await;
    let first_head = app.wait_for_epoch(1, SEAL_TIMEOUT).await.expect("first epoch should seal");

    let second_user = app.new_user();
    app.provision_p256_user(&second_user, 0).await;
    let second_head = app.wait_for_epoch(2, SEAL_TIMEOUT).await.expect("second epoch should seal");

    assert_eq!(second_head["previousRootHash"], first_head["rootHash"]);
    assert_eq!(second_head["treeSize"], 2);
}

#[tokio::test]
async fn test_inclusion_proof_requires_authentication() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    app.provision_p256_user(&user, 0).await;
    app.wait_for_epoch(1, SEAL_TIMEOUT).await.expect("epoch should seal");

    let resp = app
        .client
        .get(format!("{}/transparency/inclusion?user_id={}", app.server_url, user.user_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_inclusion_proof_has_the_expected_sibling_path_length() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    app.provision_p256_user(&user, 0).await;
    app.wait_for_epoch(1, SEAL_TIMEOUT).await.expect("epoch should seal");

    let requester = app.new_user();
    let resp = app
        .client
        .get(format!("{}/transparency/inclusion?user_id={}", app.server_url, user.user_id))
        .header("Authorization", format!("Bearer {}", requester.token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let proof: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(proof["siblingPath"].as_array().unwrap().len(), 256);
    assert_eq!(proof["leafData"]["userId"], user.user_id.to_string());
}

#[tokio::test]
async fn test_inclusion_proof_for_user_with_no_committed_leaf_is_not_found() {
    let app = TestApp::spawn().await;
    let never_uploaded = app.new_user();
    let requester = app.new_user();

    // seal at least one epoch so "no leaf" and "no epoch" are distinguishable
    let seeder = app.new_user();
    app.provision_p256_user(&seeder, 0).await;
    app.wait_for_epoch(1, SEAL_TIMEOUT).await.expect("epoch should seal");

    let resp = app
        .client
        .get(format!("{}/transparency/inclusion?user_id={}", app.server_url, never_uploaded.user_id))
        .header("Authorization", format!("Bearer {}", requester.token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_consistency_proof_lists_users_changed_between_epochs() {
    let app = TestApp::spawn().await;

    let first_user = app.new_user();
    app.provision_p256_user(&first_user, 0).await;
    app.wait_for_epoch(1, SEAL_TIMEOUT).await.expect("first epoch should seal");

    let second_user = app.new_user();
    app.provision_p256_user(&second_user, 0).await;
    app.wait_for_epoch(2, SEAL_TIMEOUT).await.expect("second epoch should seal");

    let resp = app
        .client
        .get(format!("{}/transparency/consistency?from=1&to=2", app.server_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let proof: serde_json::Value = resp.json().await.unwrap();
    let changed = proof["changedLeaves"].as_array().unwrap();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0]["toLeaf"]["userId"], second_user.user_id.to_string());
    assert!(changed[0]["fromProof"].is_null());
}

#[tokio::test]
async fn test_consistency_proof_rejects_non_increasing_epoch_range() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    app.provision_p256_user(&user, 0).await;
    app.wait_for_epoch(1, SEAL_TIMEOUT).await.expect("epoch should seal");

    let resp = app
        .client
        .get(format!("{}/transparency/consistency?from=2&to=1", app.server_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "KEY_PRECONDITION");
}

#[tokio::test]
async fn test_audit_log_lists_sealed_epochs_in_order() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    app.provision_p256_user(&user, 0).await;
    app.wait_for_epoch(1, SEAL_TIMEOUT).await.expect("epoch should seal");

    let resp = app.client.get(format!("{}/transparency/audit-log", app.server_url)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let epochs: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert!(!epochs.is_empty());
    assert_eq!(epochs[0]["epochNumber"], 1);
}

#[tokio::test]
async fn test_signing_keys_lists_the_active_signer() {
    let app = TestApp::spawn().await;
    let resp = app.client.get(format!("{}/transparency/signing-keys", app.server_url)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let keys: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["algorithm"], "ed25519");
}

#[tokio::test]
async fn test_client_state_round_trips() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    app.provision_p256_user(&user, 0).await;
    let head = app.wait_for_epoch(1, SEAL_TIMEOUT).await.expect("epoch should seal");
    let root_hash = head["rootHash"].as_str().unwrap().to_string();

    let resp = app
        .client
        .post(format!("{}/transparency/client-state", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&serde_json::json!({ "deviceId": "device-1", "epoch": 1, "rootHash": root_hash }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = app
        .client
        .get(format!("{}/transparency/client-state?device_id=device-1", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let state: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(state["lastVerifiedEpoch"], 1);
    assert_eq!(state["lastVerifiedRootHash"], root_hash);
}

#[tokio::test]
async fn test_client_state_rejects_malformed_root_hash() {
    let app = TestApp::spawn().await;
    let user = app.new_user();

    let resp = app
        .client
        .post(format!("{}/transparency/client-state", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&serde_json::json!({ "deviceId": "device-1", "epoch": 1, "rootHash": STANDARD.encode("too short") }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
