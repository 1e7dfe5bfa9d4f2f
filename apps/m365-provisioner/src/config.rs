//! Application configuration loaded from environment variables.
//!
//! Required variables must be present and valid, or the service exits at
//! startup with a clear error message.

use m365_connector::{
    M365Config, M365Credentials, OwnerAttachMode, ProvisionResult, ProvisioningTimings,
};
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors that prevent startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Service configuration.
#[derive(Debug)]
pub struct Config {
    /// Entra ID tenant the app registration lives in.
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,

    /// Domain used for distribution list addresses (`CUSTOM_DOMAIN`).
    pub mail_domain: String,
    pub owners_as_members: bool,
    pub owner_attach_mode: OwnerAttachMode,

    pub graph_base_url: Option<String>,
    pub exchange_base_url: Option<String>,
    pub login_endpoint: Option<String>,

    pub settle_delay: Option<Duration>,
    pub site_poll_interval: Option<Duration>,
    pub site_poll_attempts: Option<u32>,
    pub member_concurrency: Option<usize>,

    pub rust_log: String,
    /// Allowed CORS origins; `*` alone allows any origin.
    pub cors_origins: Vec<String>,
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_source(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required =
            |key: &str| get(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()));

        let tenant_id = required("TENANT_ID")?;
        let client_id = required("CLIENT_ID")?;
        let client_secret = SecretString::from(required("CLIENT_SECRET")?);

        let mail_domain = get("CUSTOM_DOMAIN").unwrap_or_else(|| "example.com".to_string());
        if mail_domain.contains('@') {
            return Err(ConfigError::InvalidValue {
                var: "CUSTOM_DOMAIN".to_string(),
                message: "expected a bare domain such as contoso.com".to_string(),
            });
        }

        let owners_as_members = match get("OWNERS_AS_MEMBERS") {
            Some(value) => parse_bool("OWNERS_AS_MEMBERS", &value)?,
            None => true,
        };

        let owner_attach_mode = match get("OWNER_ATTACH_MODE").as_deref() {
            None | Some("bind") => OwnerAttachMode::BindOnCreate,
            Some("sequential") => OwnerAttachMode::Sequential,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    var: "OWNER_ATTACH_MODE".to_string(),
                    message: format!("'{other}' is not one of: bind, sequential"),
                })
            }
        };

        let cors_origins = get("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let port = match get("PORT") {
            Some(port) => port.trim().parse::<u16>()?,
            None => 7000,
        };

        Ok(Self {
            tenant_id,
            client_id,
            client_secret,
            mail_domain,
            owners_as_members,
            owner_attach_mode,
            graph_base_url: get("GRAPH_BASE_URL"),
            exchange_base_url: get("EXCHANGE_BASE_URL"),
            login_endpoint: get("LOGIN_ENDPOINT"),
            settle_delay: parse_optional::<u64>(&get, "SETTLE_DELAY_SECS")?
                .map(Duration::from_secs),
            site_poll_interval: parse_optional::<u64>(&get, "SITE_POLL_INTERVAL_SECS")?
                .map(Duration::from_secs),
            site_poll_attempts: parse_optional(&get, "SITE_POLL_ATTEMPTS")?,
            member_concurrency: parse_optional(&get, "MEMBER_CONCURRENCY")?,
            rust_log: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            cors_origins,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
        })
    }

    /// Get the server bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connector configuration with defaults for every unset knob.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Config` if the resulting configuration is invalid.
    pub fn connector_config(&self) -> ProvisionResult<M365Config> {
        let mut timings = ProvisioningTimings::default();
        if let Some(delay) = self.settle_delay {
            timings.settle_delay = delay;
        }
        if let Some(interval) = self.site_poll_interval {
            timings.site_poll_interval = interval;
        }
        if let Some(attempts) = self.site_poll_attempts {
            timings.site_poll_attempts = attempts;
        }
        if let Some(concurrency) = self.member_concurrency {
            timings.member_concurrency = concurrency;
        }

        let mut builder = M365Config::builder()
            .tenant_id(&self.tenant_id)
            .mail_domain(&self.mail_domain)
            .owners_as_members(self.owners_as_members)
            .owner_attach_mode(self.owner_attach_mode)
            .timings(timings);
        if let Some(url) = &self.graph_base_url {
            builder = builder.graph_base_url(url);
        }
        if let Some(url) = &self.exchange_base_url {
            builder = builder.exchange_base_url(url);
        }
        if let Some(url) = &self.login_endpoint {
            builder = builder.login_endpoint(url);
        }
        builder.build()
    }

    /// Client credentials for the token provider.
    #[must_use]
    pub fn credentials(&self) -> M365Credentials {
        M365Credentials {
            client_id: self.client_id.clone(),
            client_secret: SecretString::from(self.client_secret.expose_secret().to_owned()),
        }
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            message: format!("'{other}' is not a boolean"),
        }),
    }
}

fn parse_optional<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(var)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                var: var.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
}
