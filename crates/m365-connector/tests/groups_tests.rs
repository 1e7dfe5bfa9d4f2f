//! Unified group and team site tests against a mocked Graph API.

mod common;

use common::{
    connector, created_group, mount_directory, object_ref, odata_error, received_bodies, site,
    test_config, test_config_builder, value_response,
};
use m365_connector::{MembershipOperation, NewSite, OwnerAttachMode, ProvisionError};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIRECTORY: &[(&str, &str)] = &[
    ("alice@corp.com", "id-alice"),
    ("bob@corp.com", "id-bob"),
    ("carol@corp.com", "id-carol"),
];

const SITE_URL: &str = "https://corp.sharepoint.com/sites/projectx";

fn project_x_site() -> NewSite {
    NewSite {
        name: "Project X".to_string(),
        owner: "alice@corp.com".to_string(),
        privacy: None,
        description: Some("Project X workspace".to_string()),
        members: vec!["bob@corp.com".to_string()],
        visitors: vec!["carol@corp.com".to_string()],
    }
}

async fn mount_group_create(server: &MockServer, group_id: &str) {
    Mock::given(method("POST"))
        .and(path("/v1.0/groups"))
        .respond_with(ResponseTemplate::new(201).set_body_json(created_group(group_id, "projectx")))
        .mount(server)
        .await;
}

async fn mount_ref_writes(server: &MockServer, group_id: &str, collection: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/v1.0/groups/{group_id}/{collection}/$ref")))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
}

async fn mount_site(server: &MockServer, group_id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v1.0/groups/{group_id}/sites/root")))
        .respond_with(ResponseTemplate::new(200).set_body_json(site("site-1", SITE_URL)))
        .mount(server)
        .await;
}

async fn mount_site_permissions(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/v1.0/sites/site-1/permissions"))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_create_site_end_to_end() {
    let server = MockServer::start().await;
    mount_directory(&server, DIRECTORY).await;
    mount_group_create(&server, "g-1").await;
    mount_ref_writes(&server, "g-1", "members").await;
    mount_site(&server, "g-1").await;
    mount_site_permissions(&server, ResponseTemplate::new(201).set_body_json(json!({"id": "perm-1"})))
        .await;

    let created = connector(test_config(&server))
        .groups()
        .create_site(project_x_site())
        .await
        .unwrap();

    assert_eq!(created.group_id, "g-1");
    assert_eq!(created.site.site_id, "site-1");
    assert_eq!(created.site.site_url, SITE_URL);
    assert!(created.failed_members.is_empty());
    assert!(created.failed_visitors.is_empty());

    let groups = received_bodies(&server, |r| {
        r.method.as_str() == "POST" && r.url.path() == "/v1.0/groups"
    })
    .await;
    assert_eq!(groups.len(), 1);
    let body = &groups[0];
    let nickname = body["mailNickname"].as_str().unwrap();
    assert!(nickname.starts_with("projectx"));
    assert_eq!(nickname.len(), "projectx".len() + 4);
    assert_eq!(body["displayName"], "Project X");
    assert_eq!(body["visibility"], "Private");
    assert_eq!(body["groupTypes"], json!(["Unified"]));
    assert_eq!(body["description"], "Project X workspace");
    assert_eq!(
        body["owners@odata.bind"],
        json!([format!("{}/v1.0/users/id-alice", server.uri())])
    );

    // The owner is kept as a member.
    let mut members: Vec<String> = received_bodies(&server, |r| {
        r.url.path() == "/v1.0/groups/g-1/members/$ref"
    })
    .await
    .iter()
    .map(|b| b["@odata.id"].as_str().unwrap().to_string())
    .collect();
    members.sort();
    assert_eq!(
        members,
        vec![
            format!("{}/v1.0/directoryObjects/id-alice", server.uri()),
            format!("{}/v1.0/directoryObjects/id-bob", server.uri()),
        ]
    );

    let grants = received_bodies(&server, |r| r.url.path() == "/v1.0/sites/site-1/permissions").await;
    assert_eq!(
        grants,
        vec![json!({
            "roles": ["read"],
            "grantee": {"@odata.type": "microsoft.graph.user", "id": "id-carol"}
        })]
    );
}

#[tokio::test]
async fn test_create_site_waits_for_provisioning() {
    let server = MockServer::start().await;
    mount_directory(&server, DIRECTORY).await;
    mount_group_create(&server, "g-1").await;
    mount_ref_writes(&server, "g-1", "members").await;
    Mock::given(method("GET"))
        .and(path("/v1.0/groups/g-1/sites/root"))
        .respond_with(ResponseTemplate::new(404).set_body_json(odata_error(
            "itemNotFound",
            "Requested site could not be found",
        )))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    mount_site(&server, "g-1").await;
    mount_site_permissions(&server, ResponseTemplate::new(201).set_body_json(json!({}))).await;

    let created = connector(test_config(&server))
        .groups()
        .create_site(project_x_site())
        .await
        .unwrap();
    assert_eq!(created.site.site_url, SITE_URL);
}

#[tokio::test]
async fn test_site_timeout_keeps_group_and_reports_its_id() {
    let server = MockServer::start().await;
    mount_directory(&server, DIRECTORY).await;
    mount_group_create(&server, "g-1").await;
    mount_ref_writes(&server, "g-1", "members").await;
    Mock::given(method("GET"))
        .and(path("/v1.0/groups/g-1/sites/root"))
        .respond_with(ResponseTemplate::new(404))
        .expect(12)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let result = connector(test_config(&server))
        .groups()
        .create_site(project_x_site())
        .await;

    match result {
        Err(ProvisionError::Timeout { resource_id, .. }) => {
            assert_eq!(resource_id.as_deref(), Some("g-1"));
        }
        other => panic!("Expected Timeout, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_sequential_owner_failure_rolls_back_group() {
    let server = MockServer::start().await;
    mount_directory(&server, DIRECTORY).await;
    mount_group_create(&server, "g-1").await;
    Mock::given(method("POST"))
        .and(path("/v1.0/groups/g-1/owners/$ref"))
        .respond_with(ResponseTemplate::new(403).set_body_json(odata_error(
            "Authorization_RequestDenied",
            "Insufficient privileges to complete the operation.",
        )))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/directory/deletedItems/g-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1.0/groups/g-1/members/$ref"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let config = test_config_builder(&server)
        .owner_attach_mode(OwnerAttachMode::Sequential)
        .build()
        .unwrap();
    let result = connector(config).groups().create_site(project_x_site()).await;

    match result {
        Err(ProvisionError::RemoteApi { status, code, .. }) => {
            assert_eq!(status, 403);
            assert_eq!(code, "Authorization_RequestDenied");
        }
        other => panic!("Expected the attach error, got: {other:?}"),
    }

    let groups = received_bodies(&server, |r| {
        r.method.as_str() == "POST" && r.url.path() == "/v1.0/groups"
    })
    .await;
    assert!(groups[0].get("owners@odata.bind").is_none());
}

#[tokio::test]
async fn test_site_lookup_error_rolls_back_group() {
    let server = MockServer::start().await;
    mount_directory(&server, DIRECTORY).await;
    mount_group_create(&server, "g-1").await;
    mount_ref_writes(&server, "g-1", "members").await;
    Mock::given(method("GET"))
        .and(path("/v1.0/groups/g-1/sites/root"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(odata_error("accessDenied", "Access denied")),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/directory/deletedItems/g-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    mount_site_permissions(&server, ResponseTemplate::new(201).set_body_json(json!({"id": "perm-1"})))
        .await;

    let result = connector(test_config(&server))
        .groups()
        .create_site(project_x_site())
        .await;

    match result {
        Err(ProvisionError::RemoteApi { status, code, .. }) => {
            assert_eq!(status, 403);
            assert_eq!(code, "accessDenied");
        }
        other => panic!("Expected the site lookup error, got: {other:?}"),
    }

    let grants = received_bodies(&server, |r| r.url.path() == "/v1.0/sites/site-1/permissions").await;
    assert!(grants.is_empty());
}

#[tokio::test]
async fn test_colliding_nickname_gives_conflict_after_five_attempts() {
    let server = MockServer::start().await;
    mount_directory(&server, DIRECTORY).await;
    Mock::given(method("POST"))
        .and(path("/v1.0/groups"))
        .respond_with(ResponseTemplate::new(400).set_body_json(odata_error(
            "Request_BadRequest",
            "Another object with the same value for property mailNickname already exists.",
        )))
        .expect(5)
        .mount(&server)
        .await;

    let result = connector(test_config(&server))
        .groups()
        .create_site(project_x_site())
        .await;
    assert!(matches!(result, Err(ProvisionError::Conflict(_))));
}

#[tokio::test]
async fn test_unknown_visitor_aborts_before_group_create() {
    let server = MockServer::start().await;
    mount_directory(&server, DIRECTORY).await;
    Mock::given(method("POST"))
        .and(path("/v1.0/groups"))
        .respond_with(ResponseTemplate::new(201).set_body_json(created_group("g-1", "x")))
        .expect(0)
        .mount(&server)
        .await;

    let result = connector(test_config(&server))
        .groups()
        .create_site(NewSite {
            visitors: vec!["ghost@corp.com".to_string(), "carol@corp.com".to_string()],
            ..project_x_site()
        })
        .await;

    match result {
        Err(ProvisionError::Validation { not_found, .. }) => {
            assert_eq!(not_found, vec!["ghost@corp.com"]);
        }
        other => panic!("Expected Validation, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_visitor_grant_is_reported() {
    let server = MockServer::start().await;
    mount_directory(&server, DIRECTORY).await;
    mount_group_create(&server, "g-1").await;
    mount_ref_writes(&server, "g-1", "members").await;
    mount_site(&server, "g-1").await;
    mount_site_permissions(
        &server,
        ResponseTemplate::new(403).set_body_json(odata_error("accessDenied", "Access denied")),
    )
    .await;

    let created = connector(test_config(&server))
        .groups()
        .create_site(project_x_site())
        .await
        .unwrap();

    assert_eq!(created.failed_visitors.len(), 1);
    assert_eq!(created.failed_visitors[0].principal, "carol@corp.com");
}

#[tokio::test]
async fn test_delete_twice_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g-1"))
        .respond_with(ResponseTemplate::new(204))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g-1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/directory/deletedItems/g-1"))
        .respond_with(ResponseTemplate::new(204))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/directory/deletedItems/g-1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let groups = connector(test_config(&server)).groups();
    assert!(groups.delete_group("g-1").await.unwrap().purged);
    assert!(!groups.delete_group("g-1").await.unwrap().purged);
}

#[tokio::test]
async fn test_purge_retries_until_deleted_item_is_visible() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/directory/deletedItems/g-1"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/directory/deletedItems/g-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = connector(test_config(&server))
        .groups()
        .delete_group("g-1")
        .await
        .unwrap();
    assert!(outcome.purged);
}

#[tokio::test]
async fn test_soft_delete_failure_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g-1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(odata_error(
            "Authorization_RequestDenied",
            "Insufficient privileges",
        )))
        .mount(&server)
        .await;

    let result = connector(test_config(&server))
        .groups()
        .delete_group("g-1")
        .await;
    assert!(matches!(result, Err(ProvisionError::RemoteApi { status: 403, .. })));
}

#[tokio::test]
async fn test_add_owners_also_adds_members() {
    let server = MockServer::start().await;
    mount_directory(&server, DIRECTORY).await;
    Mock::given(method("POST"))
        .and(path("/v1.0/groups/g-1/owners/$ref"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1.0/groups/g-1/members/$ref"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let report = connector(test_config(&server))
        .groups()
        .add_owners("g-1", &["carol@corp.com".to_string()])
        .await
        .unwrap();
    assert_eq!(report.added, vec!["carol@corp.com"]);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_add_existing_member_is_success() {
    let server = MockServer::start().await;
    mount_directory(&server, DIRECTORY).await;
    Mock::given(method("POST"))
        .and(path("/v1.0/groups/g-1/members/$ref"))
        .respond_with(ResponseTemplate::new(400).set_body_json(odata_error(
            "Request_BadRequest",
            "One or more added object references already exist for the following modified properties: 'members'.",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let report = connector(test_config(&server))
        .groups()
        .add_members("g-1", &["bob@corp.com".to_string()])
        .await
        .unwrap();
    assert_eq!(report.added, vec!["bob@corp.com"]);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_remove_members_refuses_owners() {
    let server = MockServer::start().await;
    mount_directory(&server, DIRECTORY).await;
    Mock::given(method("GET"))
        .and(path("/v1.0/groups/g-1/owners"))
        .respond_with(value_response(vec![object_ref("id-alice")]))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g-1/members/id-bob/$ref"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g-1/members/id-alice/$ref"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let report = connector(test_config(&server))
        .groups()
        .remove_members(
            "g-1",
            &["alice@corp.com".to_string(), "bob@corp.com".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(report.removed, vec!["bob@corp.com"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].principal, "alice@corp.com");
    assert_eq!(report.failed[0].operation, MembershipOperation::Remove);
}

#[tokio::test]
async fn test_remove_owners_leaves_member_role() {
    let server = MockServer::start().await;
    mount_directory(&server, DIRECTORY).await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g-1/owners/id-alice/$ref"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let report = connector(test_config(&server))
        .groups()
        .remove_owners("g-1", &["alice@corp.com".to_string()])
        .await
        .unwrap();
    assert_eq!(report.removed, vec!["alice@corp.com"]);
    assert_eq!(
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path().contains("/members/"))
            .count(),
        0
    );
}

#[tokio::test]
async fn test_site_status_pending_then_ready() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/groups/g-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "g-1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/groups/g-1/sites/root"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_site(&server, "g-1").await;

    let groups = connector(test_config(&server)).groups();
    assert!(groups.site_status("g-1").await.unwrap().is_none());
    let ready = groups.site_status("g-1").await.unwrap().unwrap();
    assert_eq!(ready.site_url, SITE_URL);
}

#[tokio::test]
async fn test_site_status_of_missing_group_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/groups/nope"))
        .respond_with(ResponseTemplate::new(404).set_body_json(odata_error(
            "Request_ResourceNotFound",
            "Resource 'nope' does not exist",
        )))
        .mount(&server)
        .await;

    let result = connector(test_config(&server))
        .groups()
        .site_status("nope")
        .await;
    assert!(matches!(result, Err(ProvisionError::NotFound(_))));
}
