//! # Microsoft 365 Provisioning Connector
//!
//! Provisions and synchronizes Exchange Online distribution lists and
//! Microsoft 365 Unified groups with their team sites.
//!
//! ## Features
//!
//! - OAuth2 client credentials with a per-scope token cache
//! - Exchange `InvokeCommand` and Microsoft Graph clients sharing one retry policy
//! - Batched directory lookups (`$batch`, 20 requests per round trip)
//! - Minimal-delta membership reconciliation on a bounded worker pool
//! - Alias renegotiation, settle delays, site polling and create rollback
//! - Two-phase group delete (soft delete, then purge)
//!
//! ## Example
//!
//! ```ignore
//! use m365_connector::{M365Config, M365Credentials, M365Connector, NewDistributionList};
//!
//! let config = M365Config::builder().tenant_id("your-tenant-id").build()?;
//! let connector = M365Connector::new(config, credentials)?;
//! let created = connector
//!     .distribution_lists()
//!     .create(NewDistributionList {
//!         name: "Project X".into(),
//!         owners: vec!["alice@corp.com".into()],
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

pub mod alias;
pub mod auth;
pub mod config;
pub mod directory;
pub mod distribution_list;
pub mod error;
pub mod exchange;
pub mod graph_client;
pub mod groups;
pub mod membership;
pub mod models;
pub mod retry;

use std::sync::Arc;

pub use auth::{TokenCache, TokenProvider};
pub use config::{
    M365Config, M365ConfigBuilder, M365Credentials, OwnerAttachMode, ProvisioningTimings,
};
pub use directory::DirectoryResolver;
pub use distribution_list::DistributionListService;
pub use error::{ProvisionError, ProvisionResult};
pub use exchange::{CommandResult, ExchangeClient};
pub use graph_client::GraphClient;
pub use groups::UnifiedGroupService;
pub use membership::{
    DistributionListRoles, GraphGroupRoles, MembershipDelta, MembershipFailure,
    MembershipOperation, MembershipReconciler, MembershipReport, RoleMembershipStore,
};
pub use models::{
    DeleteOutcome, DistributionListCreated, DistributionListDetails, DistributionListUpdate,
    NewDistributionList, NewSite, Principal, ProvisioningState, ResolvedPrincipals, Role,
    SiteCreated, SiteResource, UpdateReport,
};
pub use retry::RetryPolicy;

/// Wires the token cache, clients and services for one tenant.
#[derive(Debug, Clone)]
pub struct M365Connector {
    distribution_lists: Arc<DistributionListService>,
    groups: Arc<UnifiedGroupService>,
    directory: Arc<DirectoryResolver>,
}

impl M365Connector {
    /// Creates a connector authenticating with client credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or an HTTP client cannot be created.
    pub fn new(config: M365Config, credentials: M365Credentials) -> ProvisionResult<Self> {
        config.validate()?;
        let tokens: Arc<dyn TokenProvider> = Arc::new(TokenCache::new(
            credentials,
            &config.login_endpoint,
            &config.tenant_id,
        ));
        Self::with_token_provider(config, tokens)
    }

    /// Creates a connector with an externally supplied token provider.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be created.
    pub fn with_token_provider(
        config: M365Config,
        tokens: Arc<dyn TokenProvider>,
    ) -> ProvisionResult<Self> {
        let graph = Arc::new(GraphClient::new(&config, tokens.clone())?);
        let exchange = Arc::new(ExchangeClient::new(&config, tokens)?);
        let directory = Arc::new(DirectoryResolver::new(
            graph.clone(),
            config.retry.clone(),
        ));

        Ok(Self {
            distribution_lists: Arc::new(DistributionListService::new(
                exchange,
                directory.clone(),
                config.clone(),
            )),
            groups: Arc::new(UnifiedGroupService::new(graph, directory.clone(), config)),
            directory,
        })
    }

    #[must_use]
    pub fn distribution_lists(&self) -> Arc<DistributionListService> {
        self.distribution_lists.clone()
    }

    #[must_use]
    pub fn groups(&self) -> Arc<UnifiedGroupService> {
        self.groups.clone()
    }

    #[must_use]
    pub fn directory(&self) -> Arc<DirectoryResolver> {
        self.directory.clone()
    }
}
