#![allow(clippy::unwrap_used, clippy::panic, missing_debug_implementations, unreachable_pub)]
mod common;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use common::{P256TestKey, TestApp};
use serde_json::json;

/// A device re-registering takes over the identity: the new identity key becomes the
/// one served in bundles immediately, even though the old key's signed prekey row is
/// left in place until the new device uploads its own.
#[tokio::test]
async fn test_identity_takeover_is_visible_to_bundle_fetchers_immediately() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    app.provision_p256_user(&user, 1).await;

    let new_device_identity = P256TestKey::generate();
    app.client
        .post(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "publicKey": new_device_identity.public_key_b64() }))
        .send()
        .await
        .unwrap();

    let new_spk = P256TestKey::generate();
    let sig = new_device_identity.sign(&new_spk.public_key_bytes);
    app.client
        .post(format!("{}/keys/prekey", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "keyId": 2, "publicKey": new_spk.public_key_b64(), "signature": STANDARD.encode(sig) }))
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
    assert_eq!(bundle["identityKey"]["publicKey"], new_device_identity.public_key_b64());
    assert_eq!(bundle["signedPreKey"]["publicKey"], new_spk.public_key_b64());
}

/// A takeover that never uploads a signed prekey for the new identity still assembles a
/// bundle: the assembler pairs the active identity key with the user's most recently
/// uploaded signed prekey unconditionally, so a stale signed prekey from the prior
/// identity is served alongside the new one rather than failing the fetch.
#[tokio::test]
async fn test_takeover_without_a_fresh_signed_prekey_serves_the_stale_one() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    app.provision_p256_user(&user, 1).await;

    let new_device_identity = P256TestKey::generate();
    app.client
        .post(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "publicKey": new_device_identity.public_key_b64() }))
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
    assert_eq!(bundle["identityKey"]["publicKey"], new_device_identity.public_key_b64());
    assert_eq!(bundle["signedPreKey"]["keyId"], 1, "the only signed prekey ever uploaded is still served");
}

/// Takeover does not touch the one-time prekey pool: prekeys uploaded under the old
/// identity remain claimable bundle material under the new one, since the pool is keyed
/// by user, not by identity-key version.
#[tokio::test]
async fn test_takeover_preserves_the_one_time_prekey_pool() {
    let app = TestApp::spawn().await;
    let user = app.new_user();
    app.provision_p256_user(&user, 3).await;

    let new_device_identity = P256TestKey::generate();
    app.client
        .post(format!("{}/keys/identity", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .json(&json!({ "publicKey": new_device_identity.public_key_b64() }))
        .send()
        .await
        .unwrap();

    let resp = app
        .client
        .get(format!("{}/keys/prekeys/count", app.server_url))
        .header("Authorization", format!("Bearer {}", user.token))
        .send()
        .await
        .unwrap();
    let count: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(count["count"], 3);
}
