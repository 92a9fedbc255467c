use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
    response::Response,
};
use halgate::{config::Config, routes, state::AppState, verifier::StaticVerifier};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

const SALT: &str = "integration-test-salt-0123456789";
const PEER: [u8; 4] = [203, 0, 113, 7];
const UA: &str = "halgate-tests/1.0";

fn app() -> Router {
    let state = AppState::in_memory(
        Config::for_tests(SALT),
        Arc::new(StaticVerifier::new([
            ("good-token", "ada@example.com"),
            ("eve-token", "eve@example.com"),
        ])),
    );
    routes::app(state).unwrap()
}

fn session_key(seed: char) -> String {
    std::iter::repeat(seed).take(40).collect()
}

fn request_from(peer: [u8; 4], method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(SocketAddr::from((peer, 40000))))
        .header(header::USER_AGENT, UA)
}

fn request(method: &str, uri: &str) -> axum::http::request::Builder {
    request_from(PEER, method, uri)
}

fn with_token(builder: axum::http::request::Builder, token: &str) -> axum::http::request::Builder {
    builder.header(header::AUTHORIZATION, format!("Bearer {}", token))
}

fn json_body(builder: axum::http::request::Builder, body: Value) -> Request<Body> {
    builder
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

struct SignedIn {
    token: String,
    user_id: String,
    session_id: String,
}

async fn sign_in(app: &Router, key: char) -> SignedIn {
    let body = json!({
        "accessToken": "good-token",
        "email": "ada@example.com",
        "firstName": "Ada",
        "lastName": "Lovelace",
        "sessionKey": session_key(key),
    });
    let response = app
        .clone()
        .oneshot(json_body(request("POST", "/auth/authorize"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = read_json(response).await;
    SignedIn {
        token: body["sessionToken"].as_str().unwrap().to_string(),
        user_id: body["user"]["userId"].as_str().unwrap().to_string(),
        session_id: body["session"]["sessionId"].as_str().unwrap().to_string(),
    }
}

#[tokio::test]
async fn test_authorize_then_reauthorize() {
    let app = app();
    let signed_in = sign_in(&app, 'a').await;

    let response = app
        .clone()
        .oneshot(with_token(request("POST", "/auth/reauthorize"), &signed_in.token).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["active"], true);
    assert!(body["_templates"]["revoke"].is_object());
}

#[tokio::test]
async fn test_reauthorize_from_other_context_is_rejected() {
    let app = app();
    let signed_in = sign_in(&app, 'a').await;

    let moved = with_token(request_from([198, 51, 100, 1], "POST", "/auth/reauthorize"), &signed_in.token)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(moved).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let other_agent = with_token(request("POST", "/auth/reauthorize"), &signed_in.token)
        .header(header::USER_AGENT, "curl/8.0")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(other_agent).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_forged_forwarded_for_does_not_move_a_session() {
    let app = app();
    let signed_in = sign_in(&app, 'a').await;

    let forged = with_token(request_from([198, 51, 100, 99], "POST", "/auth/reauthorize"), &signed_in.token)
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(forged).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The owner's own requests still carry the header harmlessly.
    let own = with_token(request("POST", "/auth/reauthorize"), &signed_in.token)
        .header("x-forwarded-for", "198.51.100.99")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(own).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_access_token_cannot_claim_another_email() {
    let app = app();
    let victim = sign_in(&app, 'a').await;

    let body = json!({
        "accessToken": "eve-token",
        "email": "ada@example.com",
        "firstName": "Eve",
        "lastName": "Mallory",
        "sessionKey": session_key('e'),
    });
    let response = app
        .clone()
        .oneshot(json_body(request("POST", "/auth/authorize"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json!({
        "accessToken": "eve-token",
        "email": "EVE@example.com",
        "firstName": "Eve",
        "lastName": "Mallory",
        "sessionKey": session_key('e'),
    });
    let response = app
        .clone()
        .oneshot(json_body(request("POST", "/auth/authorize"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let eve = read_json(response).await;
    assert_ne!(eve["user"]["userId"].as_str().unwrap(), victim.user_id);
}

#[tokio::test]
async fn test_rejected_access_token_and_short_key() {
    let app = app();

    let body = json!({
        "accessToken": "forged",
        "email": "ada@example.com",
        "firstName": "Ada",
        "lastName": "Lovelace",
        "sessionKey": session_key('a'),
    });
    let response = app
        .clone()
        .oneshot(json_body(request("POST", "/auth/authorize"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json!({
        "accessToken": "good-token",
        "email": "ada@example.com",
        "firstName": "Ada",
        "lastName": "Lovelace",
        "sessionKey": "too-short",
    });
    let response = app
        .clone()
        .oneshot(json_body(request("POST", "/auth/authorize"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["violations"][0]["field"], "sessionKey");
}

#[tokio::test]
async fn test_revoke_is_idempotent() {
    let app = app();
    let signed_in = sign_in(&app, 'a').await;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(with_token(request("POST", "/auth/revoke"), &signed_in.token).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert!(body["_templates"]["authorize"].is_object());
    }

    let response = app
        .clone()
        .oneshot(with_token(request("POST", "/auth/reauthorize"), &signed_in.token).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_entry_point_reflects_capabilities() {
    let app = app();

    let response = app
        .clone()
        .oneshot(request("GET", "/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let anonymous = read_json(response).await;
    assert_eq!(anonymous["authenticated"], false);
    assert!(anonymous["_templates"]["authorize"].is_object());
    assert!(anonymous["_templates"]["revoke"].is_null());
    assert!(anonymous["_links"]["sessions"].is_null());

    let signed_in = sign_in(&app, 'a').await;
    let response = app
        .clone()
        .oneshot(with_token(request("GET", "/"), &signed_in.token).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["authenticated"], true);
    assert!(body["_templates"]["authorize"].is_null());
    assert!(body["_templates"]["verify"].is_object());
    assert_eq!(
        body["_links"]["sessions"]["href"],
        format!("/users/{}/sessions", signed_in.user_id)
    );
}

#[tokio::test]
async fn test_conditional_get_cycle() {
    let app = app();

    let first = app
        .clone()
        .oneshot(request("GET", "/?a=1&b=2").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-cache"], "MISS");
    let etag = first.headers()[header::ETAG].to_str().unwrap().to_string();
    assert!(first.headers().contains_key(header::LAST_MODIFIED));

    let reordered = app
        .clone()
        .oneshot(request("GET", "/?b=2&a=1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(reordered.headers()["x-cache"], "HIT");
    assert_eq!(reordered.headers()[header::ETAG].to_str().unwrap(), etag);

    let revalidated = app
        .clone()
        .oneshot(
            request("GET", "/?a=1&b=2")
                .header(header::IF_NONE_MATCH, &etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(revalidated.status(), StatusCode::NOT_MODIFIED);
    let body = revalidated.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());

    let other_accept = app
        .clone()
        .oneshot(
            request("GET", "/?a=1&b=2")
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(other_accept.headers()["x-cache"], "MISS");
}

#[tokio::test]
async fn test_cached_listing_is_refreshed_after_revoke() {
    let app = app();
    let current = sign_in(&app, 'a').await;
    let other = sign_in(&app, 'b').await;
    let href = format!("/users/{}/sessions", current.user_id);

    let listing = app
        .clone()
        .oneshot(with_token(request("GET", &href), &current.token).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(listing.headers()["x-cache"], "MISS");
    let body = read_json(listing).await;
    assert_eq!(body["_embedded"]["sessions"].as_array().unwrap().len(), 2);

    let delete = app
        .clone()
        .oneshot(
            with_token(request("DELETE", &format!("{}/{}", href, other.session_id)), &current.token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(delete.status(), StatusCode::OK);

    let listing = app
        .clone()
        .oneshot(with_token(request("GET", &href), &current.token).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(listing.headers()["x-cache"], "MISS");
    let body = read_json(listing).await;
    assert_eq!(body["_embedded"]["sessions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_bulk_revoke_reports_split() {
    let app = app();
    let current = sign_in(&app, 'a').await;
    let second = sign_in(&app, 'b').await;
    let third = sign_in(&app, 'c').await;
    let missing = uuid::Uuid::new_v4().to_string();

    let body = json!({
        "_method": "DELETE",
        "sessionIds": [second.session_id, third.session_id, missing],
    });
    let response = app
        .clone()
        .oneshot(json_body(
            with_token(request("POST", &format!("/users/{}/sessions", current.user_id)), &current.token),
            body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["succeeded"].as_array().unwrap().len(), 2);
    assert_eq!(body["failed"], json!([missing]));
}

#[tokio::test]
async fn test_bulk_revoke_from_form_submission() {
    let app = app();
    let current = sign_in(&app, 'a').await;
    let second = sign_in(&app, 'b').await;

    let form = format!("_method=delete&sessionIds%5B%5D={}", second.session_id);
    let response = app
        .clone()
        .oneshot(
            with_token(request("POST", &format!("/users/{}/sessions", current.user_id)), &current.token)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["succeeded"], json!([second.session_id]));
}

#[tokio::test]
async fn test_api_key_lifecycle() {
    let app = app();
    let signed_in = sign_in(&app, 'a').await;
    let href = format!("/users/{}/api-keys", signed_in.user_id);

    let response = app
        .clone()
        .oneshot(json_body(with_token(request("POST", &href), &signed_in.token), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["violations"][0]["field"], "label");

    let response = app
        .clone()
        .oneshot(json_body(
            with_token(request("POST", &href), &signed_in.token),
            json!({ "label": "deploy bot" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = read_json(response).await;
    let key_id = created["apiKeyId"].as_str().unwrap().to_string();
    assert!(!created["apiKey"].as_str().unwrap().is_empty());

    let listing = app
        .clone()
        .oneshot(with_token(request("GET", &href), &signed_in.token).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = read_json(listing).await;
    let keys = body["_embedded"]["apiKeys"].as_array().unwrap();
    assert_eq!(keys[0]["label"], "deploy bot");
    assert_eq!(keys.len(), 1);
    assert!(keys[0]["apiKey"].is_null());
    assert!(body["_templates"]["create"].is_object());

    let response = app
        .clone()
        .oneshot(json_body(
            with_token(request("POST", &format!("{}/{}", href, key_id)), &signed_in.token),
            json!({ "_method": "DELETE" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            with_token(request("DELETE", &format!("{}/{}", href, key_id)), &signed_in.token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_other_users_resources_are_forbidden() {
    let app = app();
    let signed_in = sign_in(&app, 'a').await;
    let stranger = uuid::Uuid::new_v4();

    for path in ["sessions", "api-keys"] {
        let response = app
            .clone()
            .oneshot(
                with_token(request("GET", &format!("/users/{}/{}", stranger, path)), &signed_in.token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}

#[tokio::test]
async fn test_protected_routes_require_a_session() {
    let app = app();

    let response = app
        .clone()
        .oneshot(request("GET", &format!("/users/{}/sessions", uuid::Uuid::new_v4())).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(request("GET", "/nowhere").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_form_label_may_contain_commas() {
    let app = app();
    let signed_in = sign_in(&app, 'a').await;

    let response = app
        .clone()
        .oneshot(
            with_token(request("POST", &format!("/users/{}/api-keys", signed_in.user_id)), &signed_in.token)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("label=Deploy%2C+staging"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["label"], "Deploy, staging");
}

#[tokio::test]
async fn test_malformed_body_does_not_echo_parser_output() {
    let app = app();

    let response = app
        .clone()
        .oneshot(
            request("POST", "/auth/authorize")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"accessToken\": [1, 2"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["details"], "Malformed request body");
}
