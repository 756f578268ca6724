mod common;

use std::collections::HashMap;

use axum::http::StatusCode;
use common::{generate_test_key, sign_date_header, TestApp, FINGERPRINT};
use uuid::Uuid;

fn key_id(account: &str) -> String {
    format!("/{account}/keys/{FINGERPRINT}")
}

fn signed_headers<'a>(date: &'a str, auth: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![("date", date), ("authorization", auth)]
}

#[tokio::test]
async fn put_then_get_roundtrips_object_bytes() {
    let app = TestApp::new();
    let key = generate_test_key();
    let mut keys = HashMap::new();
    keys.insert(FINGERPRINT.to_string(), key.public_pem.clone());
    app.insert_account("poseidon", Uuid::new_v4(), false, keys);

    let date = common::rfc2822_now();
    let auth = sign_date_header(&key.private, &key_id("poseidon"), &date);
    let put_response = app
        .request("PUT", "/poseidon/stor/hello.txt", &signed_headers(&date, &auth), b"hello world".to_vec())
        .await;
    assert_eq!(put_response.status(), StatusCode::NO_CONTENT);
    assert!(put_response.headers().contains_key("etag"));

    let date = common::rfc2822_now();
    let auth = sign_date_header(&key.private, &key_id("poseidon"), &date);
    let get_response = app.get("/poseidon/stor/hello.txt", &signed_headers(&date, &auth)).await;
    assert_eq!(get_response.status(), StatusCode::OK);
    let body = common::body_bytes(get_response).await;
    assert_eq!(&body[..], b"hello world");
}

#[tokio::test]
async fn delete_then_get_returns_not_found() {
    let app = TestApp::new();
    let key = generate_test_key();
    let mut keys = HashMap::new();
    keys.insert(FINGERPRINT.to_string(), key.public_pem.clone());
    app.insert_account("poseidon", Uuid::new_v4(), false, keys);

    let date = common::rfc2822_now();
    let auth = sign_date_header(&key.private, &key_id("poseidon"), &date);
    let put_response = app
        .request("PUT", "/poseidon/stor/gone.txt", &signed_headers(&date, &auth), b"bye".to_vec())
        .await;
    assert_eq!(put_response.status(), StatusCode::NO_CONTENT);

    let date = common::rfc2822_now();
    let auth = sign_date_header(&key.private, &key_id("poseidon"), &date);
    let delete_response = app
        .request("DELETE", "/poseidon/stor/gone.txt", &signed_headers(&date, &auth), Vec::new())
        .await;
    assert_eq!(delete_response.status(), StatusCode::NO_CONTENT);

    let date = common::rfc2822_now();
    let auth = sign_date_header(&key.private, &key_id("poseidon"), &date);
    let get_response = app.get("/poseidon/stor/gone.txt", &signed_headers(&date, &auth)).await;
    assert_eq!(get_response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cross_account_access_is_forbidden() {
    let app = TestApp::new();
    let owner_key = generate_test_key();
    let mut owner_keys = HashMap::new();
    owner_keys.insert(FINGERPRINT.to_string(), owner_key.public_pem.clone());
    app.insert_account("poseidon", Uuid::new_v4(), false, owner_keys);

    let intruder_key = generate_test_key();
    let mut intruder_keys = HashMap::new();
    intruder_keys.insert(FINGERPRINT.to_string(), intruder_key.public_pem.clone());
    app.insert_account("mcduck", Uuid::new_v4(), false, intruder_keys);

    let date = common::rfc2822_now();
    let auth = sign_date_header(&owner_key.private, &key_id("poseidon"), &date);
    let put_response = app
        .request("PUT", "/poseidon/stor/secret.txt", &signed_headers(&date, &auth), b"shh".to_vec())
        .await;
    assert_eq!(put_response.status(), StatusCode::NO_CONTENT);

    // mcduck authenticates as himself but targets poseidon's namespace.
    let date = common::rfc2822_now();
    let auth = sign_date_header(&intruder_key.private, &key_id("mcduck"), &date);
    let get_response = app.get("/poseidon/stor/secret.txt", &signed_headers(&date, &auth)).await;
    assert_eq!(get_response.status(), StatusCode::FORBIDDEN);
}
