mod common;

use std::collections::HashMap;

use axum::http::StatusCode;
use common::{generate_test_key, sign_date_header, TestApp, FINGERPRINT};
use serde::Deserialize;
use uuid::Uuid;

fn key_id(account: &str) -> String {
    format!("/{account}/keys/{FINGERPRINT}")
}

#[derive(Deserialize)]
struct MintTokenResponse {
    token: String,
}

#[tokio::test]
async fn minted_token_authenticates_a_later_get() {
    let app = TestApp::new();
    let key = generate_test_key();
    let mut keys = HashMap::new();
    keys.insert(FINGERPRINT.to_string(), key.public_pem.clone());
    let account = app.insert_account("poseidon", Uuid::new_v4(), false, keys);
    // The minted token carries the account by uuid, not login; the fake
    // identity client (like mahi) is keyed on the lookup string it was
    // asked for, so register the same account under its uuid as well.
    app.identity.insert_account(manta_webapi::model::Account {
        login: account.uuid.to_string(),
        ..account.clone()
    });

    let date = common::rfc2822_now();
    let auth = sign_date_header(&key.private, &key_id("poseidon"), &date);
    let put_response = app
        .request(
            "PUT",
            "/poseidon/stor/token-target.txt",
            &[("date", &date), ("authorization", &auth)],
            b"protected".to_vec(),
        )
        .await;
    assert_eq!(put_response.status(), StatusCode::NO_CONTENT);

    let date = common::rfc2822_now();
    let auth = sign_date_header(&key.private, &key_id("poseidon"), &date);
    let mint_response = app
        .request(
            "POST",
            "/poseidon/tokens",
            &[("date", &date), ("authorization", &auth), ("content-type", "application/json")],
            b"{}".to_vec(),
        )
        .await;
    assert_eq!(mint_response.status(), StatusCode::CREATED);
    let body = common::body_bytes(mint_response).await;
    let minted: MintTokenResponse = serde_json::from_slice(&body).unwrap();
    assert!(!minted.token.is_empty());

    let token_header = format!("Token {}", minted.token);
    let get_response = app
        .get("/poseidon/stor/token-target.txt", &[("authorization", &token_header)])
        .await;
    assert_eq!(get_response.status(), StatusCode::OK);
    let get_body = common::body_bytes(get_response).await;
    assert_eq!(&get_body[..], b"protected");
}
