#![allow(clippy::unwrap_used, clippy::panic, missing_debug_implementations, unreachable_pub)]
mod common;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use common::{Dilithium3TestKey, P256TestKey, TestApp};
use serde_json::json;

#[tokio::test]
async fn test_malformed_identity_key_length_is_rejected() {
    let app = TestApp::spawn().await;
    let user = app.new_user();

    let resp = app
        .client
        .post(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "publicKey": STANDARD.encode(vec![0u8; 12]) }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "KEY_FORMAT");
}

#[tokio::test]
async fn test_non_base64_identity_key_is_rejected() {
    let app = TestApp::spawn().await;
    let user = app.new_user();

    let resp = app
        .client
        .post(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "publicKey": "not valid base64!!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_dilithium3_identity_key_is_accepted_by_length() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    let identity = Dilithium3TestKey::generate();

    let resp = app
        .client
        .post(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "publicKey": identity.public_key_b64() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_kyber1024_key_length_is_accepted_as_identity_key_format() {
    // The directory recognizes a Kyber1024-length key as well-formed on upload; it is
    // only signature verification that refuses a Kyber key (KEM-only, never signs).
    let app = TestApp::spawn().await;
    let user = app.new_user();

    let resp = app
        .client
        .post(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "publicKey": STANDARD.encode(vec![7u8; 1568]) }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_signed_prekey_signature_suite_must_match_identity_suite() {
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
    let dilithium_sig = Dilithium3TestKey::generate().sign(&spk.public_key_bytes);

    let resp = app
        .client
        .post(format!("{}/keys/prekey", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({
            "keyId": 1,
            "publicKey": spk.public_key_b64(),
            "signature": STANDARD.encode(dilithium_sig),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_malformed_signature_length_is_rejected() {
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
    let resp = app
        .client
        .post(format!("{}/keys/prekey", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({
            "keyId": 1,
            "publicKey": spk.public_key_b64(),
            "signature": STANDARD.encode(vec![0u8; 10]),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "KEY_FORMAT");
}

#[tokio::test]
async fn test_dilithium3_signed_prekey_round_trips_against_dilithium3_identity() {
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
    let sig = identity.sign(&spk.public_key_bytes());

    let resp = app
        .client
        .post(format!("{}/keys/prekey", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({
            "keyId": 1,
            "publicKey": spk.public_key_b64(),
            "signature": STANDARD.encode(sig),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
