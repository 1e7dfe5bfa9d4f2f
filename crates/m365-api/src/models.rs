//! Request and response models for the provisioning API.
//!
//! JSON field names are camelCase, except `user_upns` on group changes.

use m365_connector::{
    DistributionListCreated, DistributionListDetails, DistributionListUpdate, MembershipFailure,
    MembershipOperation, MembershipReport, NewDistributionList, NewSite, SiteCreated,
    SiteResource,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::validation::{validate_privacy, validate_upn, validate_upns};

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

/// Simple acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// One principal whose role change did not go through.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FailedPrincipal {
    pub principal: String,
    /// `add` or `remove`.
    pub operation: String,
    pub error: String,
}

impl From<MembershipFailure> for FailedPrincipal {
    fn from(failure: MembershipFailure) -> Self {
        Self {
            principal: failure.principal,
            operation: match failure.operation {
                MembershipOperation::Add => "add".to_string(),
                MembershipOperation::Remove => "remove".to_string(),
            },
            error: failure.error,
        }
    }
}

pub(crate) fn failures(failed: Vec<MembershipFailure>) -> Vec<FailedPrincipal> {
    failed.into_iter().map(Into::into).collect()
}

/// Outcome of reconciling one role.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MembershipChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<FailedPrincipal>,
}

impl From<MembershipReport> for MembershipChanges {
    fn from(report: MembershipReport) -> Self {
        Self {
            added: report.added,
            removed: report.removed,
            failed: failures(report.failed),
        }
    }
}

// ---------------------------------------------------------------------------
// Distribution lists
// ---------------------------------------------------------------------------

/// Request for `POST /api/dl`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateDistributionListRequest {
    #[validate(length(min = 1, max = 256, message = "Name must be 1-256 characters"))]
    pub name: String,

    #[validate(
        length(min = 1, message = "At least one owner is required"),
        custom(function = "validate_upns")
    )]
    pub owner_emails: Vec<String>,

    #[serde(default)]
    #[validate(custom(function = "validate_upns"))]
    pub member_emails: Vec<String>,

    #[serde(default)]
    pub allow_external_senders: bool,
}

impl From<CreateDistributionListRequest> for NewDistributionList {
    fn from(request: CreateDistributionListRequest) -> Self {
        Self {
            name: request.name,
            owners: request.owner_emails,
            members: request.member_emails,
            allow_external_senders: request.allow_external_senders,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateDistributionListResponse {
    pub dl_id: String,
    pub primary_email: String,
    pub failed_members: Vec<FailedPrincipal>,
}

impl From<DistributionListCreated> for CreateDistributionListResponse {
    fn from(created: DistributionListCreated) -> Self {
        Self {
            dl_id: created.dl_id,
            primary_email: created.primary_email,
            failed_members: failures(created.failed_members),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DistributionListResponse {
    pub dl_id: String,
    pub name: String,
    pub display_name: String,
    pub primary_email: String,
    /// Owner user principal names.
    pub owners: Vec<String>,
    /// Member addresses.
    pub members: Vec<String>,
    pub allow_external_senders: bool,
}

impl From<DistributionListDetails> for DistributionListResponse {
    fn from(details: DistributionListDetails) -> Self {
        Self {
            dl_id: details.dl_id,
            name: details.name,
            display_name: details.display_name,
            primary_email: details.primary_email,
            owners: details.owners,
            members: details.members,
            allow_external_senders: details.allow_external_senders,
        }
    }
}

/// Request for `PATCH /api/dl/{id}`. Omitted fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDistributionListRequest {
    #[validate(length(min = 1, max = 256, message = "Name must be 1-256 characters"))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 256, message = "Display name must be 1-256 characters"))]
    pub display_name: Option<String>,

    /// Full owner list. An empty list is rejected.
    #[validate(
        length(min = 1, message = "Owner list cannot be empty"),
        custom(function = "validate_upns")
    )]
    pub owner_emails: Option<Vec<String>>,

    /// Full member list. An empty list removes every member except owners.
    #[validate(custom(function = "validate_upns"))]
    pub member_emails: Option<Vec<String>>,

    pub allow_external_senders: Option<bool>,
}

impl From<UpdateDistributionListRequest> for DistributionListUpdate {
    fn from(request: UpdateDistributionListRequest) -> Self {
        Self {
            name: request.name,
            display_name: request.display_name,
            owners: request.owner_emails,
            members: request.member_emails,
            allow_external_senders: request.allow_external_senders,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateDistributionListResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owners: Option<MembershipChanges>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<MembershipChanges>,
}

// ---------------------------------------------------------------------------
// Sites
// ---------------------------------------------------------------------------

/// Request for `POST /api/sharepoint/site`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSiteRequest {
    #[validate(length(min = 1, max = 256, message = "Name must be 1-256 characters"))]
    pub name: String,

    #[validate(custom(function = "validate_upn"))]
    pub owner_email: String,

    /// `Private` (default) or `Public`.
    #[validate(custom(function = "validate_privacy"))]
    pub privacy: Option<String>,

    #[validate(length(max = 1024, message = "Description must be at most 1024 characters"))]
    pub description: Option<String>,

    #[serde(default)]
    #[validate(custom(function = "validate_upns"))]
    pub member_emails: Vec<String>,

    #[serde(default)]
    #[validate(custom(function = "validate_upns"))]
    pub visitor_emails: Vec<String>,
}

impl From<CreateSiteRequest> for NewSite {
    fn from(request: CreateSiteRequest) -> Self {
        Self {
            name: request.name,
            owner: request.owner_email,
            privacy: request.privacy,
            description: request.description,
            members: request.member_emails,
            visitors: request.visitor_emails,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSiteResponse {
    pub group_id: String,
    pub site_id: String,
    pub site_url: String,
    pub failed_members: Vec<FailedPrincipal>,
    pub failed_visitors: Vec<FailedPrincipal>,
}

impl From<SiteCreated> for CreateSiteResponse {
    fn from(created: SiteCreated) -> Self {
        Self {
            group_id: created.group_id,
            site_id: created.site.site_id,
            site_url: created.site.site_url,
            failed_members: failures(created.failed_members),
            failed_visitors: failures(created.failed_visitors),
        }
    }
}

/// Site of a group: `ready` with its location, or `pending`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatusResponse {
    pub group_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
}

impl SiteStatusResponse {
    #[must_use]
    pub fn new(group_id: String, site: Option<SiteResource>) -> Self {
        match site {
            Some(site) => Self {
                group_id,
                status: "ready".to_string(),
                site_id: Some(site.site_id),
                site_url: Some(site.site_url),
            },
            None => Self {
                group_id,
                status: "pending".to_string(),
                site_id: None,
                site_url: None,
            },
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.site_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeleteSiteResponse {
    pub message: String,
    /// False when the group stays in the deleted-items container.
    pub purged: bool,
}

/// Request for the owner and member endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct GroupChangeRequest {
    #[serde(rename = "groupId")]
    #[validate(length(min = 1, message = "groupId is required"))]
    pub group_id: String,

    #[validate(
        length(min = 1, message = "At least one user is required"),
        custom(function = "validate_upns")
    )]
    pub user_upns: Vec<String>,
}

/// Response of the owner and member endpoints. Exactly one list is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupChangeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_owners: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_owners: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_members: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_members: Option<Vec<String>>,
    pub failed: Vec<FailedPrincipal>,
}
