mod common;

use axum::http::{Method, StatusCode};
use common::{
    empty_request, json_request, TestApp, ALICE_SUB, ALICE_TOKEN, BOB_SUB, BOB_TOKEN,
    INACTIVE_TOKEN, NO_CLIENT_TOKEN, UNMAPPED_CLIENT_TOKEN,
};
use serde_json::json;
use uuid::Uuid;

/// Group administered by a paired alice, with bob as a paired member.
async fn setup() -> (TestApp, Uuid) {
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
    app.pair("alice@example.fr", ALICE_SUB).await;
    app.pair("bob@example.fr", BOB_SUB).await;
    (app, group_id)
}

#[tokio::test]
async fn test_rejected_tokens_are_unauthorized() {
    let (app, group_id) = setup().await;
    let uri = format!("/resource/v1/groups/{}", group_id);

    for token in [INACTIVE_TOKEN, NO_CLIENT_TOKEN, UNMAPPED_CLIENT_TOKEN, "unknown"] {
        let (status, _) = app
            .send(empty_request(Method::GET, &uri, Some(token)))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "token {}", token);
    }

    let (status, _) = app.send(empty_request(Method::GET, &uri, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_member_reads_but_cannot_manage() {
    let (app, group_id) = setup().await;

    let (status, body) = app
        .send(empty_request(
            Method::GET,
            &format!("/resource/v1/groups/{}", group_id),
            Some(BOB_TOKEN),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["members"].as_array().unwrap().len(), 2);

    let (status, _) = app
        .send(json_request(
            Method::POST,
            &format!("/resource/v1/groups/{}/members", group_id),
            Some(BOB_TOKEN),
            json!({ "email": "carol@example.fr" }),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_manages_members() {
    let (app, group_id) = setup().await;

    let (status, body) = app
        .send(json_request(
            Method::POST,
            &format!("/resource/v1/groups/{}/members", group_id),
            Some(ALICE_TOKEN),
            json!({ "email": "carol@example.fr", "role": "admin" }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["role_id"], 1);

    let bob = app.user_id("bob@example.fr").await;
    let (status, _) = app
        .send(empty_request(
            Method::DELETE,
            &format!("/resource/v1/groups/{}/members/{}", group_id, bob),
            Some(ALICE_TOKEN),
        ))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_end_user_lists_own_groups() {
    let (app, group_id) = setup().await;

    let (status, body) = app
        .send(empty_request(Method::GET, "/resource/v1/groups", Some(BOB_TOKEN)))
        .await;
    assert_eq!(status, StatusCode::OK);
    let groups = body.as_array().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["id"], group_id.to_string());
}

#[tokio::test]
async fn test_end_user_cannot_create_groups() {
    let (app, _) = setup().await;

    let (status, _) = app
        .send(json_request(
            Method::POST,
            "/resource/v1/groups",
            Some(ALICE_TOKEN),
            json!({
                "name": "Autre",
                "organization_siret": common::SIRET,
                "admin_email": "alice@example.fr",
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
