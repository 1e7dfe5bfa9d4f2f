//! Exchange Online admin API client.
//!
//! Exchange cmdlets are invoked over REST through the tenant's
//! `InvokeCommand` endpoint. Every call is retried on 429/503 according to
//! the configured [`RetryPolicy`]; any other failure is classified once and
//! returned.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::classify_response;
use crate::{M365Config, ProvisionError, ProvisionResult, RetryPolicy, TokenProvider};

const ANCHOR_MAILBOX_HEADER: &str = "X-AnchorMailbox";

/// Result of a command: the objects it returned, possibly none.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CommandResult {
    #[serde(default)]
    pub value: Vec<Value>,
}

impl CommandResult {
    /// First returned object, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Value> {
        self.value.first()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CmdletInput<'a> {
    cmdlet_name: &'a str,
    parameters: &'a Value,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct InvokeCommandBody<'a> {
    cmdlet_input: CmdletInput<'a>,
}

/// Client for the Exchange Online `InvokeCommand` endpoint.
pub struct ExchangeClient {
    http_client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    command_url: String,
    scope: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("command_url", &self.command_url)
            .field("scope", &self.scope)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ExchangeClient {
    /// Creates a new Exchange client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &M365Config, tokens: Arc<dyn TokenProvider>) -> ProvisionResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ProvisionError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            tokens,
            command_url: config.exchange_command_url(),
            scope: config.exchange_scope(),
            retry: config.retry.clone(),
        })
    }

    /// Invokes a named command with its parameters.
    ///
    /// `anchor_mailbox` routes the request to the mailbox server owning that
    /// address, which avoids cross-server lag right after a create.
    #[instrument(skip(self, parameters))]
    pub async fn invoke(
        &self,
        command: &str,
        parameters: Value,
        anchor_mailbox: Option<&str>,
    ) -> ProvisionResult<CommandResult> {
        let body = InvokeCommandBody {
            cmdlet_input: CmdletInput {
                cmdlet_name: command,
                parameters: &parameters,
            },
        };
        let payload = serde_json::to_value(&body)?;
        let payload = &payload;

        let text = self
            .retry
            .execute(command, move || self.send_once(payload, anchor_mailbox))
            .await?;

        let result = parse_command_result(&text)?;
        debug!(command, returned = result.value.len(), "Command completed");
        Ok(result)
    }

    async fn send_once(
        &self,
        payload: &Value,
        anchor_mailbox: Option<&str>,
    ) -> ProvisionResult<String> {
        let token = self.tokens.get_token(&self.scope).await?;

        let mut request = self
            .http_client
            .post(&self.command_url)
            .bearer_auth(&token)
            .json(payload);
        if let Some(anchor) = anchor_mailbox {
            request = request.header(ANCHOR_MAILBOX_HEADER, anchor);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            return Ok(text);
        }

        Err(classify_response(status, &text))
    }
}

/// Parses a command response. Empty bodies and bare objects are accepted.
fn parse_command_result(text: &str) -> ProvisionResult<CommandResult> {
    if text.trim().is_empty() {
        return Ok(CommandResult::default());
    }

    let json: Value = serde_json::from_str(text)?;
    let value = match json {
        Value::Object(mut map) => match map.remove("value") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) => Vec::new(),
            Some(other) => vec![other],
            // Only annotations such as `@odata.context` left.
            None if map.keys().all(|k| k.starts_with('@')) => Vec::new(),
            None => vec![Value::Object(map)],
        },
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    Ok(CommandResult { value })
}
