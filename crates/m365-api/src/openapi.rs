//! `OpenAPI` document for the provisioning API.

use utoipa::OpenApi;

use crate::error::ErrorResponse;
use crate::handlers::{distribution_lists, health, sites};
use crate::models::{
    CreateDistributionListRequest, CreateDistributionListResponse, CreateSiteRequest,
    CreateSiteResponse, DeleteSiteResponse, DistributionListResponse, FailedPrincipal,
    GroupChangeRequest, GroupChangeResponse, HealthResponse, MembershipChanges, MessageResponse,
    SiteStatusResponse, UpdateDistributionListRequest, UpdateDistributionListResponse,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "M365 Provisioner API",
        version = "0.1.0",
        description = "Distribution list and team site provisioning for Microsoft 365"
    ),
    paths(
        health::health,
        distribution_lists::create_distribution_list,
        distribution_lists::get_distribution_list,
        distribution_lists::update_distribution_list,
        distribution_lists::delete_distribution_list,
        sites::create_site,
        sites::get_site_status,
        sites::delete_site,
        sites::add_owners,
        sites::remove_owners,
        sites::add_members,
        sites::remove_members,
    ),
    components(schemas(
        ErrorResponse,
        HealthResponse,
        MessageResponse,
        FailedPrincipal,
        MembershipChanges,
        CreateDistributionListRequest,
        CreateDistributionListResponse,
        DistributionListResponse,
        UpdateDistributionListRequest,
        UpdateDistributionListResponse,
        CreateSiteRequest,
        CreateSiteResponse,
        SiteStatusResponse,
        DeleteSiteResponse,
        GroupChangeRequest,
        GroupChangeResponse,
    )),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Distribution Lists", description = "Exchange Online distribution lists"),
        (name = "Sites", description = "Unified groups with their team sites")
    )
)]
pub struct ApiDoc;
