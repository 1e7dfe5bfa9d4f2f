//! Common test utilities for m365-connector integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use m365_connector::{
    M365Config, M365ConfigBuilder, M365Connector, ProvisionResult, ProvisioningTimings,
    RetryPolicy, TokenProvider,
};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockBuilder, MockServer, Request, Respond, ResponseTemplate};

pub const TENANT_ID: &str = "tenant-1";
pub const EXCHANGE_PATH: &str = "/adminapi/beta/tenant-1/InvokeCommand";
pub const MAIL_DOMAIN: &str = "corp.com";

/// Token provider that always returns the same bearer token.
#[derive(Debug, Default)]
pub struct StaticToken;

#[async_trait]
impl TokenProvider for StaticToken {
    async fn get_token(&self, _scope: &str) -> ProvisionResult<String> {
        Ok("test-token".to_string())
    }
}

/// Configuration pointing every endpoint at the mock server, with no waits.
pub fn test_config_builder(server: &MockServer) -> M365ConfigBuilder {
    M365Config::builder()
        .tenant_id(TENANT_ID)
        .login_endpoint(server.uri())
        .graph_base_url(server.uri())
        .exchange_base_url(server.uri())
        .mail_domain(MAIL_DOMAIN)
        .retry(RetryPolicy::without_delay(3))
        .timings(ProvisioningTimings::immediate())
}

pub fn test_config(server: &MockServer) -> M365Config {
    test_config_builder(server).build().unwrap()
}

pub fn connector(config: M365Config) -> M365Connector {
    M365Connector::with_token_provider(config, Arc::new(StaticToken)).unwrap()
}

/// Mock for one named Exchange command.
pub fn cmdlet(name: &str) -> MockBuilder {
    Mock::given(method("POST"))
        .and(path(EXCHANGE_PATH))
        .and(body_partial_json(json!({ "CmdletInput": { "CmdletName": name } })))
}

/// Mock for one named Exchange command with matching parameters.
pub fn cmdlet_with(name: &str, parameters: Value) -> MockBuilder {
    Mock::given(method("POST"))
        .and(path(EXCHANGE_PATH))
        .and(body_partial_json(json!({
            "CmdletInput": { "CmdletName": name, "Parameters": parameters }
        })))
}

/// Wraps items in a command / `OData` collection response.
pub fn value_response(items: Vec<Value>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "value": items }))
}

/// Test data factory for `Get-DistributionGroup` results.
pub fn distribution_group(name: &str, managed_by: &[&str]) -> Value {
    json!({
        "Name": name,
        "DisplayName": format!("{name} display"),
        "Alias": name,
        "PrimarySmtpAddress": format!("{name}@{MAIL_DOMAIN}"),
        "ManagedBy": managed_by,
        "RequireSenderAuthenticationEnabled": true
    })
}

/// Test data factory for `Get-DistributionGroupMember` results.
pub fn dl_member(id: &str, address: &str) -> Value {
    json!({
        "ExternalDirectoryObjectId": id,
        "PrimarySmtpAddress": address,
        "RecipientType": "UserMailbox"
    })
}

/// Test data factory for Graph directory object references.
pub fn object_ref(id: &str) -> Value {
    json!({ "@odata.type": "#microsoft.graph.user", "id": id })
}

/// Test data factory for a Unified group create response.
pub fn created_group(id: &str, alias: &str) -> Value {
    json!({
        "id": id,
        "displayName": "Project X",
        "mailNickname": alias,
        "groupTypes": ["Unified"],
        "mailEnabled": true,
        "securityEnabled": false
    })
}

/// Test data factory for a team site.
pub fn site(id: &str, url: &str) -> Value {
    json!({ "id": id, "webUrl": url })
}

/// `OData` error body.
pub fn odata_error(code: &str, message: &str) -> Value {
    json!({ "error": { "code": code, "message": message } })
}

/// Answers Graph `$batch` user lookups from a fixed directory.
///
/// Handles both `/users/{upn}?$select=id` and
/// `/users/{id}?$select=userPrincipalName` sub-requests.
pub struct DirectoryResponder {
    users: Vec<(String, String)>,
}

impl DirectoryResponder {
    pub fn new(users: &[(&str, &str)]) -> Self {
        Self {
            users: users
                .iter()
                .map(|(upn, id)| ((*upn).to_string(), (*id).to_string()))
                .collect(),
        }
    }

    fn answer(&self, request: &Value) -> Value {
        let id = request["id"].as_str().unwrap_or_default();
        let url = request["url"].as_str().unwrap_or_default();
        let (resource, query) = url.split_once('?').unwrap_or((url, ""));
        let key = urlencoding::decode(resource.trim_start_matches("/users/"))
            .map(|k| k.into_owned())
            .unwrap_or_default();

        let body = if query.contains("userPrincipalName") {
            self.users
                .iter()
                .find(|(_, oid)| *oid == key)
                .map(|(upn, _)| json!({ "userPrincipalName": upn }))
        } else {
            self.users
                .iter()
                .find(|(upn, _)| upn.eq_ignore_ascii_case(&key))
                .map(|(_, oid)| json!({ "id": oid }))
        };

        match body {
            Some(body) => json!({ "id": id, "status": 200, "body": body }),
            None => json!({
                "id": id,
                "status": 404,
                "body": odata_error("Request_ResourceNotFound", &format!("Resource '{key}' does not exist"))
            }),
        }
    }
}

impl Respond for DirectoryResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let responses: Vec<Value> = body["requests"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|r| self.answer(r))
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "responses": responses }))
    }
}

/// Mounts the `$batch` directory on the server.
pub async fn mount_directory(server: &MockServer, users: &[(&str, &str)]) {
    Mock::given(method("POST"))
        .and(path("/v1.0/$batch"))
        .respond_with(DirectoryResponder::new(users))
        .mount(server)
        .await;
}

/// Parsed JSON bodies of every received request matching the predicate.
pub async fn received_bodies<F>(server: &MockServer, predicate: F) -> Vec<Value>
where
    F: Fn(&Request) -> bool,
{
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| predicate(r))
        .map(|r| serde_json::from_slice(&r.body).unwrap_or(Value::Null))
        .collect()
}

/// Parameters of every received invocation of an Exchange command.
pub async fn received_cmdlet_params(server: &MockServer, name: &str) -> Vec<Value> {
    received_bodies(server, |r| r.url.path() == EXCHANGE_PATH)
        .await
        .into_iter()
        .filter(|b| b["CmdletInput"]["CmdletName"] == name)
        .map(|b| b["CmdletInput"]["Parameters"].clone())
        .collect()
}
