//! HTTP handlers for distribution lists.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use validator::Validate;

use crate::error::ApiResult;
use crate::models::{
    CreateDistributionListRequest, CreateDistributionListResponse, DistributionListResponse,
    MessageResponse, UpdateDistributionListRequest, UpdateDistributionListResponse,
};
use crate::router::ApiState;
use crate::validation::validate_dl_id;

/// Create a distribution list.
#[utoipa::path(
    post,
    path = "/api/dl",
    tag = "Distribution Lists",
    request_body = CreateDistributionListRequest,
    responses(
        (status = 201, description = "Distribution list created", body = CreateDistributionListResponse),
        (status = 400, description = "Unknown principals", body = ErrorResponse),
        (status = 409, description = "No free alias", body = ErrorResponse),
        (status = 422, description = "Invalid request body", body = ErrorResponse),
        (status = 503, description = "Exchange unavailable", body = ErrorResponse)
    )
)]
pub async fn create_distribution_list(
    State(state): State<ApiState>,
    Json(request): Json<CreateDistributionListRequest>,
) -> ApiResult<(StatusCode, Json<CreateDistributionListResponse>)> {
    request.validate()?;

    let created = state.distribution_lists.create(request.into()).await?;
    info!(dl_id = %created.dl_id, "Distribution list provisioned");

    Ok((StatusCode::CREATED, Json(created.into())))
}

/// Get a distribution list with its owners and members.
#[utoipa::path(
    get,
    path = "/api/dl/{id}",
    tag = "Distribution Lists",
    params(("id" = String, Path, description = "Distribution list identifier")),
    responses(
        (status = 200, description = "Distribution list details", body = DistributionListResponse),
        (status = 400, description = "Malformed identifier", body = ErrorResponse),
        (status = 404, description = "Distribution list not found", body = ErrorResponse)
    )
)]
pub async fn get_distribution_list(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DistributionListResponse>> {
    validate_dl_id(&id)?;
    let details = state.distribution_lists.get(&id).await?;
    Ok(Json(details.into()))
}

/// Update properties and reconcile owners and members.
#[utoipa::path(
    patch,
    path = "/api/dl/{id}",
    tag = "Distribution Lists",
    params(("id" = String, Path, description = "Distribution list identifier")),
    request_body = UpdateDistributionListRequest,
    responses(
        (status = 200, description = "Distribution list updated", body = UpdateDistributionListResponse),
        (status = 400, description = "Unknown principals", body = ErrorResponse),
        (status = 404, description = "Distribution list not found", body = ErrorResponse),
        (status = 422, description = "Invalid request body", body = ErrorResponse)
    )
)]
pub async fn update_distribution_list(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateDistributionListRequest>,
) -> ApiResult<Json<UpdateDistributionListResponse>> {
    validate_dl_id(&id)?;
    request.validate()?;

    let report = state.distribution_lists.update(&id, request.into()).await?;

    Ok(Json(UpdateDistributionListResponse {
        message: format!("Distribution List '{id}' updated successfully."),
        owners: report.owners.map(Into::into),
        members: report.members.map(Into::into),
    }))
}

/// Delete a distribution list. Deleting a missing list succeeds.
#[utoipa::path(
    delete,
    path = "/api/dl/{id}",
    tag = "Distribution Lists",
    params(("id" = String, Path, description = "Distribution list identifier")),
    responses(
        (status = 200, description = "Distribution list deleted", body = MessageResponse),
        (status = 400, description = "Malformed identifier", body = ErrorResponse)
    )
)]
pub async fn delete_distribution_list(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    validate_dl_id(&id)?;
    state.distribution_lists.delete(&id).await?;

    Ok(Json(MessageResponse {
        message: format!("Distribution List '{id}' deleted successfully."),
    }))
}
