//! Common test utilities for m365-api integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, Response},
    Router,
};
use m365_api::{api_router, ApiState};
use m365_connector::{
    M365Config, M365Connector, ProvisionResult, ProvisioningTimings, RetryPolicy, TokenProvider,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockBuilder, MockServer, Request as MockRequest, Respond, ResponseTemplate};

pub const EXCHANGE_PATH: &str = "/adminapi/beta/tenant-1/InvokeCommand";

struct StaticToken;

#[async_trait]
impl TokenProvider for StaticToken {
    async fn get_token(&self, _scope: &str) -> ProvisionResult<String> {
        Ok("test-token".to_string())
    }
}

/// Router wired to connector services that talk to the mock server.
pub fn test_app(server: &MockServer) -> Router {
    let config = M365Config::builder()
        .tenant_id("tenant-1")
        .login_endpoint(server.uri())
        .graph_base_url(server.uri())
        .exchange_base_url(server.uri())
        .mail_domain("corp.com")
        .retry(RetryPolicy::without_delay(2))
        .timings(ProvisioningTimings {
            site_poll_attempts: 2,
            ..ProvisioningTimings::immediate()
        })
        .build()
        .unwrap();
    let connector = M365Connector::with_token_provider(config, Arc::new(StaticToken)).unwrap();
    api_router(ApiState::from_connector(&connector))
}

/// Sends one request through the router.
pub async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn cmdlet(name: &str) -> MockBuilder {
    Mock::given(method("POST"))
        .and(path(EXCHANGE_PATH))
        .and(body_partial_json(json!({ "CmdletInput": { "CmdletName": name } })))
}

pub fn value_response(items: Vec<Value>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "value": items }))
}

/// Answers `$batch` user lookups from a fixed directory, by UPN or by id.
pub struct Directory(pub Vec<(&'static str, &'static str)>);

impl Directory {
    fn answer(&self, url: &str) -> Option<Value> {
        let (resource, query) = url.split_once('?').unwrap_or((url, ""));
        let key = resource.trim_start_matches("/users/").replace("%40", "@");
        if query.contains("userPrincipalName") {
            self.0
                .iter()
                .find(|(_, id)| *id == key)
                .map(|(upn, _)| json!({ "userPrincipalName": upn }))
        } else {
            self.0
                .iter()
                .find(|(upn, _)| *upn == key)
                .map(|(_, id)| json!({ "id": id }))
        }
    }
}

impl Respond for Directory {
    fn respond(&self, request: &MockRequest) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let responses: Vec<Value> = body["requests"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|r| match self.answer(r["url"].as_str().unwrap_or_default()) {
                Some(body) => json!({ "id": r["id"], "status": 200, "body": body }),
                None => json!({ "id": r["id"], "status": 404, "body": {} }),
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "responses": responses }))
    }
}

pub async fn mount_directory(server: &MockServer, users: &[(&'static str, &'static str)]) {
    Mock::given(method("POST"))
        .and(path("/v1.0/$batch"))
        .respond_with(Directory(users.to_vec()))
        .mount(server)
        .await;
}
