//! Connector configuration.

use secrecy::SecretString;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::{ProvisionError, ProvisionResult};

/// Default Microsoft identity platform login endpoint.
pub const DEFAULT_LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";
/// Default Microsoft Graph base URL (without API version).
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com";
/// Default Exchange Online base URL.
pub const DEFAULT_EXCHANGE_BASE_URL: &str = "https://outlook.office365.com";

/// Application credentials for the client credentials flow.
#[derive(Debug, Clone)]
pub struct M365Credentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

/// How the primary owner is attached to a newly created Unified group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnerAttachMode {
    /// `owners@odata.bind` in the create request (single atomic write).
    #[default]
    BindOnCreate,
    /// Separate `owners/$ref` call after creation; failure rolls back.
    Sequential,
}

/// Settle, poll and concurrency knobs for the provisioning workflows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningTimings {
    /// Wait after an Exchange create before membership calls.
    pub settle_delay: Duration,
    /// Interval between site provisioning probes.
    pub site_poll_interval: Duration,
    /// Maximum number of site provisioning probes.
    pub site_poll_attempts: u32,
    /// Delay between permanent-delete attempts.
    pub purge_retry_delay: Duration,
    /// Maximum number of permanent-delete attempts.
    pub purge_attempts: u32,
    /// Maximum number of alias candidates tried on create.
    pub alias_attempts: u32,
    /// Worker pool size for per-principal membership calls.
    pub member_concurrency: usize,
    /// Attempts per principal when adding a member.
    pub member_add_attempts: u32,
}

impl Default for ProvisioningTimings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(5),
            site_poll_interval: Duration::from_secs(5),
            site_poll_attempts: 12,
            purge_retry_delay: Duration::from_secs(1),
            purge_attempts: 5,
            alias_attempts: 5,
            member_concurrency: 10,
            member_add_attempts: 3,
        }
    }
}

impl ProvisioningTimings {
    /// Timings with all waits set to zero, for tests.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            site_poll_interval: Duration::ZERO,
            purge_retry_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct M365Config {
    pub tenant_id: String,
    pub login_endpoint: String,
    pub graph_base_url: String,
    pub graph_api_version: String,
    pub exchange_base_url: String,
    /// Domain used for distribution list primary SMTP addresses.
    pub mail_domain: String,
    /// Owners are always kept in the member role.
    pub owners_as_members: bool,
    pub owner_attach_mode: OwnerAttachMode,
    pub retry: RetryPolicy,
    pub timings: ProvisioningTimings,
}

impl M365Config {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> M365ConfigBuilder {
        M365ConfigBuilder::default()
    }

    /// Graph URL including the API version, e.g. `https://graph.microsoft.com/v1.0`.
    #[must_use]
    pub fn graph_url(&self) -> String {
        format!(
            "{}/{}",
            self.graph_base_url.trim_end_matches('/'),
            self.graph_api_version
        )
    }

    /// Exchange admin API `InvokeCommand` endpoint for this tenant.
    #[must_use]
    pub fn exchange_command_url(&self) -> String {
        format!(
            "{}/adminapi/beta/{}/InvokeCommand",
            self.exchange_base_url.trim_end_matches('/'),
            self.tenant_id
        )
    }

    /// OAuth scope for Graph calls.
    #[must_use]
    pub fn graph_scope(&self) -> String {
        format!("{}/.default", self.graph_base_url.trim_end_matches('/'))
    }

    /// OAuth scope for Exchange admin calls.
    #[must_use]
    pub fn exchange_scope(&self) -> String {
        format!("{}/.default", self.exchange_base_url.trim_end_matches('/'))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Config` describing the first invalid field.
    pub fn validate(&self) -> ProvisionResult<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(ProvisionError::Config("tenant_id is required".into()));
        }
        if self.mail_domain.trim().is_empty() || self.mail_domain.contains('@') {
            return Err(ProvisionError::Config(format!(
                "mail_domain '{}' is not a valid domain",
                self.mail_domain
            )));
        }
        for (name, value) in [
            ("login_endpoint", &self.login_endpoint),
            ("graph_base_url", &self.graph_base_url),
            ("exchange_base_url", &self.exchange_base_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| ProvisionError::Config(format!("{name} is not a valid URL: {e}")))?;
        }
        if self.retry.max_attempts == 0 {
            return Err(ProvisionError::Config("retry.max_attempts must be > 0".into()));
        }
        if self.timings.alias_attempts == 0 {
            return Err(ProvisionError::Config("alias_attempts must be > 0".into()));
        }
        if self.timings.member_concurrency == 0 {
            return Err(ProvisionError::Config(
                "member_concurrency must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`M365Config`].
#[derive(Debug, Default)]
pub struct M365ConfigBuilder {
    tenant_id: Option<String>,
    login_endpoint: Option<String>,
    graph_base_url: Option<String>,
    exchange_base_url: Option<String>,
    mail_domain: Option<String>,
    owners_as_members: Option<bool>,
    owner_attach_mode: Option<OwnerAttachMode>,
    retry: Option<RetryPolicy>,
    timings: Option<ProvisioningTimings>,
}

impl M365ConfigBuilder {
    #[must_use]
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn login_endpoint(mut self, url: impl Into<String>) -> Self {
        self.login_endpoint = Some(url.into());
        self
    }

    #[must_use]
    pub fn graph_base_url(mut self, url: impl Into<String>) -> Self {
        self.graph_base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn exchange_base_url(mut self, url: impl Into<String>) -> Self {
        self.exchange_base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn mail_domain(mut self, domain: impl Into<String>) -> Self {
        self.mail_domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn owners_as_members(mut self, enabled: bool) -> Self {
        self.owners_as_members = Some(enabled);
        self
    }

    #[must_use]
    pub fn owner_attach_mode(mut self, mode: OwnerAttachMode) -> Self {
        self.owner_attach_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn timings(mut self, timings: ProvisioningTimings) -> Self {
        self.timings = Some(timings);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Config` if a required field is missing or invalid.
    pub fn build(self) -> ProvisionResult<M365Config> {
        let config = M365Config {
            tenant_id: self
                .tenant_id
                .ok_or_else(|| ProvisionError::Config("tenant_id is required".into()))?,
            login_endpoint: self
                .login_endpoint
                .unwrap_or_else(|| DEFAULT_LOGIN_ENDPOINT.to_string()),
            graph_base_url: self
                .graph_base_url
                .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string()),
            graph_api_version: "v1.0".to_string(),
            exchange_base_url: self
                .exchange_base_url
                .unwrap_or_else(|| DEFAULT_EXCHANGE_BASE_URL.to_string()),
            mail_domain: self.mail_domain.unwrap_or_else(|| "example.com".to_string()),
            owners_as_members: self.owners_as_members.unwrap_or(true),
            owner_attach_mode: self.owner_attach_mode.unwrap_or_default(),
            retry: self.retry.unwrap_or_default(),
            timings: self.timings.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}
