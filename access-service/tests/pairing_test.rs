mod common;

use axum::http::{Method, StatusCode};
use common::{empty_request, json_request, TestApp};
use serde_json::json;

#[tokio::test]
async fn test_pairing_is_bound_once() {
    let app = TestApp::spawn().await;
    let token = app.service_token().await;
    app.create_group(&token, "alice@example.fr").await;

    let pair = |email: &'static str, sub: &'static str| {
        json_request(
            Method::POST,
            "/api/v1/pairings",
            Some(token.as_str()),
            json!({ "email": email, "sub": sub }),
        )
    };

    let (status, body) = app.send(pair("alice@example.fr", "S1")).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "paired");

    let (status, _) = app.send(pair("alice@example.fr", "S2")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.send(pair("ALICE@example.fr", "S1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "already_paired");
    assert_eq!(body["email"], "alice@example.fr");

    let (status, _) = app.send(pair("nobody@example.fr", "S3")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let users = app.store.users().await;
    let alice = users.iter().find(|u| u.email == "alice@example.fr").unwrap();
    assert_eq!(alice.sub.as_deref(), Some("S1"));
    assert!(alice.verified);
}

#[tokio::test]
async fn test_subject_cannot_move_to_another_account() {
    let app = TestApp::spawn().await;
    let token = app.service_token().await;
    let group_id = app.create_group(&token, "alice@example.fr").await;
    let (status, _) = app
        .send(json_request(
            Method::POST,
            &format!("/api/v1/groups/{}/members", group_id),
            Some(token.as_str()),
            json!({ "email": "bob@example.fr" }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    app.pair("alice@example.fr", "S1").await;

    let (status, _) = app
        .send(json_request(
            Method::POST,
            "/api/v1/pairings",
            Some(token.as_str()),
            json!({ "email": "bob@example.fr", "sub": "S1" }),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_get_pairing() {
    let app = TestApp::spawn().await;
    let token = app.service_token().await;
    app.create_group(&token, "alice@example.fr").await;
    app.pair("alice@example.fr", "S1").await;

    let (status, body) = app
        .send(empty_request(Method::GET, "/api/v1/pairings/S1", Some(token.as_str())))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "alice@example.fr");
    assert_eq!(body["sub"], "S1");

    let (status, _) = app
        .send(empty_request(Method::GET, "/api/v1/pairings/S9", Some(token.as_str())))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pairing_requires_service_account() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .send(json_request(
            Method::POST,
            "/api/v1/pairings",
            Some(common::ALICE_TOKEN),
            json!({ "email": "alice@example.fr", "sub": "S1" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
