//! HTTP handlers for team sites and their group roles.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use validator::Validate;

use crate::error::ApiResult;
use crate::models::{
    failures, CreateSiteRequest, CreateSiteResponse, DeleteSiteResponse, GroupChangeRequest,
    GroupChangeResponse, SiteStatusResponse,
};
use crate::router::ApiState;

/// Create a Unified group with its team site.
///
/// When the site does not appear in time the response is 504 and
/// `details.groupId` names the group, which stays in place.
#[utoipa::path(
    post,
    path = "/api/sharepoint/site",
    tag = "Sites",
    request_body = CreateSiteRequest,
    responses(
        (status = 201, description = "Site created", body = CreateSiteResponse),
        (status = 400, description = "Unknown principals", body = ErrorResponse),
        (status = 409, description = "No free alias", body = ErrorResponse),
        (status = 422, description = "Invalid request body", body = ErrorResponse),
        (status = 504, description = "Site provisioning timed out", body = ErrorResponse)
    )
)]
pub async fn create_site(
    State(state): State<ApiState>,
    Json(request): Json<CreateSiteRequest>,
) -> ApiResult<(StatusCode, Json<CreateSiteResponse>)> {
    request.validate()?;

    let created = state.groups.create_site(request.into()).await?;
    info!(
        group_id = %created.group_id,
        site_url = %created.site.site_url,
        "Team site provisioned"
    );

    Ok((StatusCode::CREATED, Json(created.into())))
}

/// Site provisioning status of a group.
#[utoipa::path(
    get,
    path = "/api/sharepoint/site/{group_id}",
    tag = "Sites",
    params(("group_id" = String, Path, description = "Unified group id")),
    responses(
        (status = 200, description = "Site is ready", body = SiteStatusResponse),
        (status = 202, description = "Site is still provisioning", body = SiteStatusResponse),
        (status = 404, description = "Group not found", body = ErrorResponse)
    )
)]
pub async fn get_site_status(
    State(state): State<ApiState>,
    Path(group_id): Path<String>,
) -> ApiResult<(StatusCode, Json<SiteStatusResponse>)> {
    let site = state.groups.site_status(&group_id).await?;
    let response = SiteStatusResponse::new(group_id, site);
    let status = if response.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(response)))
}

/// Delete a group and purge it.
#[utoipa::path(
    delete,
    path = "/api/sharepoint/site/{group_id}",
    tag = "Sites",
    params(("group_id" = String, Path, description = "Unified group id")),
    responses(
        (status = 200, description = "Group deleted", body = DeleteSiteResponse)
    )
)]
pub async fn delete_site(
    State(state): State<ApiState>,
    Path(group_id): Path<String>,
) -> ApiResult<Json<DeleteSiteResponse>> {
    let outcome = state.groups.delete_group(&group_id).await?;
    Ok(Json(DeleteSiteResponse {
        message: format!("Group '{group_id}' deleted successfully."),
        purged: outcome.purged,
    }))
}

/// Add owners to a group.
#[utoipa::path(
    post,
    path = "/api/sharepoint/owners",
    tag = "Sites",
    request_body = GroupChangeRequest,
    responses(
        (status = 200, description = "Owners added", body = GroupChangeResponse),
        (status = 400, description = "Unknown principals", body = ErrorResponse)
    )
)]
pub async fn add_owners(
    State(state): State<ApiState>,
    Json(request): Json<GroupChangeRequest>,
) -> ApiResult<Json<GroupChangeResponse>> {
    request.validate()?;
    let report = state
        .groups
        .add_owners(&request.group_id, &request.user_upns)
        .await?;
    Ok(Json(GroupChangeResponse {
        added_owners: Some(report.added),
        failed: failures(report.failed),
        ..GroupChangeResponse::default()
    }))
}

/// Remove owners from a group.
#[utoipa::path(
    delete,
    path = "/api/sharepoint/owners",
    tag = "Sites",
    request_body = GroupChangeRequest,
    responses(
        (status = 200, description = "Owners removed", body = GroupChangeResponse),
        (status = 400, description = "Unknown principals", body = ErrorResponse)
    )
)]
pub async fn remove_owners(
    State(state): State<ApiState>,
    Json(request): Json<GroupChangeRequest>,
) -> ApiResult<Json<GroupChangeResponse>> {
    request.validate()?;
    let report = state
        .groups
        .remove_owners(&request.group_id, &request.user_upns)
        .await?;
    Ok(Json(GroupChangeResponse {
        removed_owners: Some(report.removed),
        failed: failures(report.failed),
        ..GroupChangeResponse::default()
    }))
}

/// Add members to a group.
#[utoipa::path(
    post,
    path = "/api/sharepoint/members",
    tag = "Sites",
    request_body = GroupChangeRequest,
    responses(
        (status = 200, description = "Members added", body = GroupChangeResponse),
        (status = 400, description = "Unknown principals", body = ErrorResponse)
    )
)]
pub async fn add_members(
    State(state): State<ApiState>,
    Json(request): Json<GroupChangeRequest>,
) -> ApiResult<Json<GroupChangeResponse>> {
    request.validate()?;
    let report = state
        .groups
        .add_members(&request.group_id, &request.user_upns)
        .await?;
    Ok(Json(GroupChangeResponse {
        added_members: Some(report.added),
        failed: failures(report.failed),
        ..GroupChangeResponse::default()
    }))
}

/// Remove members from a group. Owners are refused while they must stay members.
#[utoipa::path(
    delete,
    path = "/api/sharepoint/members",
    tag = "Sites",
    request_body = GroupChangeRequest,
    responses(
        (status = 200, description = "Members removed", body = GroupChangeResponse),
        (status = 400, description = "Unknown principals", body = ErrorResponse)
    )
)]
pub async fn remove_members(
    State(state): State<ApiState>,
    Json(request): Json<GroupChangeRequest>,
) -> ApiResult<Json<GroupChangeResponse>> {
    request.validate()?;
    let report = state
        .groups
        .remove_members(&request.group_id, &request.user_upns)
        .await?;
    Ok(Json(GroupChangeResponse {
        removed_members: Some(report.removed),
        failed: failures(report.failed),
        ..GroupChangeResponse::default()
    }))
}
