//! Router configuration for the provisioning API.

use axum::{
    routing::{get, post},
    Json, Router,
};
use m365_connector::{DistributionListService, M365Connector, UnifiedGroupService};
use std::sync::Arc;
use utoipa::OpenApi;

use crate::handlers;
use crate::openapi::ApiDoc;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub distribution_lists: Arc<DistributionListService>,
    pub groups: Arc<UnifiedGroupService>,
}

impl ApiState {
    pub fn new(
        distribution_lists: Arc<DistributionListService>,
        groups: Arc<UnifiedGroupService>,
    ) -> Self {
        Self {
            distribution_lists,
            groups,
        }
    }

    /// State backed by the services of one connector.
    pub fn from_connector(connector: &M365Connector) -> Self {
        Self::new(connector.distribution_lists(), connector.groups())
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Create the provisioning API router.
///
/// # Example
///
/// ```ignore
/// use m365_api::{api_router, ApiState};
///
/// let app = api_router(ApiState::from_connector(&connector));
/// ```
pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/openapi.json", get(openapi_json))
        // Distribution lists
        .route("/api/dl", post(handlers::create_distribution_list))
        .route(
            "/api/dl/:id",
            get(handlers::get_distribution_list)
                .patch(handlers::update_distribution_list)
                .delete(handlers::delete_distribution_list),
        )
        // Team sites
        .route("/api/sharepoint/site", post(handlers::create_site))
        .route(
            "/api/sharepoint/site/:group_id",
            get(handlers::get_site_status).delete(handlers::delete_site),
        )
        .route(
            "/api/sharepoint/owners",
            post(handlers::add_owners).delete(handlers::remove_owners),
        )
        .route(
            "/api/sharepoint/members",
            post(handlers::add_members).delete(handlers::remove_members),
        )
        .with_state(state)
}
