#![allow(clippy::unwrap_used, clippy::panic, missing_debug_implementations, unreachable_pub)]
mod common;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use common::{Dilithium3TestKey, P256TestKey, TestApp};
use serde_json::json;

#[tokio::test]
async fn test_upload_and_fetch_identity_key() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    let identity = P256TestKey::generate();

    let resp = app
        .client
        .post(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "publicKey": identity.public_key_b64() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["version"], 1);
    assert_eq!(body["publicKey"], identity.public_key_b64());

    let resp = app
        .client
        .get(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let fetched: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(fetched["userId"], user.user_id.to_string());
}

#[tokio::test]
async fn test_get_identity_key_before_upload_is_not_found() {
    let app = TestApp::spawn().await;
    let user = app.new_user();

    let resp = app
        .client
        .get(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_signed_prekey_requires_prior_identity_key() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    let spk = P256TestKey::generate();

    let resp = app
        .client
        .post(format!("{}/keys/prekey", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({
            "keyId": 1,
            "publicKey": spk.public_key_b64(),
            "signature": STANDARD.encode(vec![0u8; 64]),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "KEY_PRECONDITION");
}

#[tokio::test]
async fn test_signed_prekey_with_bad_signature_is_rejected() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    let identity = P256TestKey::generate();

    app.client
        .post(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "publicKey": identity.public_key_b64() }))
        .send()
        .await
        .unwrap();

    let spk = P256TestKey::generate();
    let wrong_signer = P256TestKey::generate();
    let bogus_signature = wrong_signer.sign(&spk.public_key_bytes);

    let resp = app
        .client
        .post(format!("{}/keys/prekey", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({
            "keyId": 1,
            "publicKey": spk.public_key_b64(),
            "signature": STANDARD.encode(bogus_signature),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "KEY_SIGNATURE");
}

#[tokio::test]
async fn test_key_status_reports_e2ee_readiness() {
    let app = TestApp::spawn().await;
    let user = app.new_user();

    let resp = app
        .client
        .get(format!("{}/keys/status", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .send()
        .await
        .unwrap();
    let status: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(status["e2eeReady"], false);
    assert_eq!(status["hasIdentityKey"], false);

    app.provision_p256_user(&user, 5).await;

    let resp = app
        .client
        .get(format!("{}/keys/status", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .send()
        .await
        .unwrap();
    let status: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(status["e2eeReady"], true);
    assert_eq!(status["oneTimePrekeyCount"], 5);
}

#[tokio::test]
async fn test_bundle_fetch_claims_one_time_prekey() {
    let app = TestApp::spawn().await;
    let target = app.new_user();
    app.provision_p256_user(&target, 2).await;

    let requester = app.new_user();
    let resp = app
        .client
        .get(format!("{}/bundles/{}", app.server_url, target.user_id))
        .header("Authorization", format!("Bearer {}", requester.token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let bundle: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(bundle["userId"], target.user_id.to_string());
    assert!(bundle["oneTimePreKey"].is_object());

    let resp = app
        .client
        .get(format!("{}/keys/prekeys/count", app.server_url))
        .header("Authorization", format!("Bearer {}", target.token))
        .send()
        .await
        .unwrap();
    let count: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(count["count"], 1, "exactly one prekey should have been claimed");
}

#[tokio::test]
async fn test_bundle_fetch_without_identity_key_is_not_found() {
    let app = TestApp::spawn().await;
    let requester = app.new_user();
    let target = app.new_user();

    let resp = app
        .client
        .get(format!("{}/bundles/{}", app.server_url, target.user_id))
        .header("Authorization", format!("Bearer {}", requester.token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_identity_key_rotation_raises_version() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    let first = P256TestKey::generate();
    let second = P256TestKey::generate();

    app.client
        .post(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "publicKey": first.public_key_b64() }))
        .send()
        .await
        .unwrap();

    let resp = app
        .client
        .post(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "publicKey": second.public_key_b64() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["version"], 2);
    assert_eq!(body["publicKey"], second.public_key_b64());
}

#[tokio::test]
async fn test_dilithium3_bundle_reports_post_quantum_version() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    let identity = Dilithium3TestKey::generate();

    app.client
        .post(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "publicKey": identity.public_key_b64() }))
        .send()
        .await
        .unwrap();

    let spk = Dilithium3TestKey::generate();
    let spk_sig = identity.sign(&spk.public_key_bytes());
    app.client
        .post(format!("{}/keys/prekey", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "keyId": 1, "publicKey": spk.public_key_b64(), "signature": STANDARD.encode(spk_sig) }))
        .send()
        .await
        .unwrap();

    let requester = app.new_user();
    let resp = app
        .client
        .get(format!("{}/bundles/{}", app.server_url, user.user_id))
        .header("Authorization", format!("Bearer {}", requester.token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let bundle: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(bundle["bundleVersion"], 2);
}

#[tokio::test]
async fn test_sealed_sender_key_upload_and_bundle_inclusion() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    app.provision_p256_user(&user, 1).await;

    let sealed = P256TestKey::generate();
    let resp = app
        .client
        .post(format!("{}/keys/sealed-sender", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "publicKey": sealed.public_key_b64() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let requester = app.new_user();
    let resp = app
        .client
        .get(format!("{}/bundles/{}", app.server_url, user.user_id))
        .header("Authorization", format!("Bearer {}", requester.token))
        .send()
        .await
        .unwrap();
    let bundle: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(bundle["sealedSenderKey"]["publicKey"], sealed.public_key_b64());
}

#[tokio::test]
async fn test_endpoints_require_a_bearer_token() {
    let app = TestApp::spawn().await;

    let resp = app.client.get(format!("{}/keys/status", app.server_url)).send().await.unwrap();
    assert_eq!(resp.status(), 401);
}
