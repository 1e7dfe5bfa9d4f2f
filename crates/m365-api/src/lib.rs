//! # Provisioning API
//!
//! REST endpoints over the Microsoft 365 connector.
//!
//! ## Endpoints
//!
//! ### Distribution lists
//! - `POST /api/dl` - Create a distribution list
//! - `GET /api/dl/{id}` - Get distribution list details
//! - `PATCH /api/dl/{id}` - Update properties, owners and members
//! - `DELETE /api/dl/{id}` - Delete a distribution list
//!
//! ### Team sites
//! - `POST /api/sharepoint/site` - Create a Unified group with its team site
//! - `GET /api/sharepoint/site/{group_id}` - Site provisioning status
//! - `DELETE /api/sharepoint/site/{group_id}` - Delete and purge the group
//! - `POST|DELETE /api/sharepoint/owners` - Add or remove group owners
//! - `POST|DELETE /api/sharepoint/members` - Add or remove group members
//!
//! ### Service
//! - `GET /health` - Liveness
//! - `GET /api/openapi.json` - `OpenAPI` document

pub mod error;
pub mod handlers;
pub mod models;
pub mod openapi;
pub mod router;
pub mod validation;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use models::*;
pub use openapi::ApiDoc;
pub use router::{api_router, ApiState};
