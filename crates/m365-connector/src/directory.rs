//! Directory lookups: UPN to object id and back, batched through Graph `$batch`.

use reqwest::StatusCode;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::classify_response;
use crate::graph_client::{BatchRequest, BatchResponse, MAX_BATCH_SIZE};
use crate::{GraphClient, ProvisionError, ProvisionResult, ResolvedPrincipals, RetryPolicy};

/// Outcome of resolving one chunk of keys.
#[derive(Debug, Default)]
struct Lookup {
    found: HashMap<String, String>,
    not_found: Vec<String>,
}

/// Resolves users between UPNs and directory object ids.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    graph: Arc<GraphClient>,
    retry: RetryPolicy,
}

impl DirectoryResolver {
    /// `retry` governs throttled sub-requests inside a batch. The batch
    /// request itself is retried by the Graph client.
    #[must_use]
    pub fn new(graph: Arc<GraphClient>, retry: RetryPolicy) -> Self {
        Self { graph, retry }
    }

    /// Maps UPNs to directory ids. Unresolvable UPNs are omitted.
    ///
    /// # Errors
    ///
    /// Returns the classified error of a failed batch or sub-request.
    #[instrument(skip(self, upns), fields(count = upns.len()))]
    pub async fn resolve_ids(&self, upns: &[String]) -> ProvisionResult<HashMap<String, String>> {
        let lookup = self.lookup_upns(upns).await?;
        Ok(expand_to_inputs(upns, &lookup.found))
    }

    /// Fails with [`ProvisionError::Validation`] naming every UPN that does not exist.
    ///
    /// Duplicates (case-insensitive) are checked once. Each chunk of up to
    /// 20 unique UPNs costs one round trip.
    ///
    /// # Errors
    ///
    /// Returns `Validation` with `not_found` in input order, or the classified
    /// remote error of a failed lookup.
    #[instrument(skip(self, upns), fields(count = upns.len()))]
    pub async fn validate_exist(&self, upns: &[String]) -> ProvisionResult<()> {
        self.resolve_and_validate(upns).await.map(|_| ())
    }

    /// Validates that every UPN exists and returns the resolved principals.
    ///
    /// # Errors
    ///
    /// Same as [`Self::validate_exist`].
    #[instrument(skip(self, upns), fields(count = upns.len()))]
    pub async fn resolve_and_validate(
        &self,
        upns: &[String],
    ) -> ProvisionResult<ResolvedPrincipals> {
        let lookup = self.lookup_upns(upns).await?;
        if !lookup.not_found.is_empty() {
            info!(not_found = ?lookup.not_found, "Unknown principals rejected");
            return Err(ProvisionError::principals_not_found(lookup.not_found));
        }

        let mut resolved = ResolvedPrincipals::default();
        for (upn, id) in expand_to_inputs(upns, &lookup.found) {
            resolved.insert(&upn, &id);
        }
        Ok(resolved)
    }

    /// Maps directory ids to UPNs. Unknown ids are omitted.
    ///
    /// # Errors
    ///
    /// Returns the classified error of a failed batch or sub-request.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn resolve_upns(&self, ids: &[String]) -> ProvisionResult<HashMap<String, String>> {
        let unique = dedupe(ids);
        let mut found = HashMap::new();

        for chunk in unique.chunks(MAX_BATCH_SIZE) {
            let lookup = self
                .lookup_chunk(chunk, "userPrincipalName", |id| {
                    format!(
                        "/users/{}?$select=userPrincipalName",
                        urlencoding::encode(id)
                    )
                })
                .await?;
            found.extend(lookup.found);
        }

        Ok(ids
            .iter()
            .filter_map(|id| {
                found
                    .get(&id.to_lowercase())
                    .map(|upn| (id.clone(), upn.clone()))
            })
            .collect())
    }

    async fn lookup_upns(&self, upns: &[String]) -> ProvisionResult<Lookup> {
        let unique = dedupe(upns);
        let mut lookup = Lookup::default();

        for chunk in unique.chunks(MAX_BATCH_SIZE) {
            let part = self
                .lookup_chunk(chunk, "id", |upn| {
                    format!("/users/{}?$select=id", urlencoding::encode(upn))
                })
                .await?;
            lookup.found.extend(part.found);
            lookup.not_found.extend(part.not_found);
        }

        debug!(
            resolved = lookup.found.len(),
            missing = lookup.not_found.len(),
            "Directory lookup finished"
        );
        Ok(lookup)
    }

    /// Looks up one chunk. Keys of `found` are lowercased; `not_found` keeps input casing and order.
    ///
    /// Sub-requests throttled with 429/503 are re-sent in a smaller batch
    /// under the retry policy until they answer or the ceiling is reached.
    async fn lookup_chunk<F>(
        &self,
        keys: &[String],
        field: &str,
        url_for: F,
    ) -> ProvisionResult<Lookup>
    where
        F: Fn(&str) -> String,
    {
        let mut lookup = Lookup::default();
        let mut pending = keys.to_vec();
        let mut attempt: u32 = 0;

        loop {
            let mut throttled = self
                .batch_pass(&pending, field, &url_for, &mut lookup)
                .await?;
            if throttled.is_empty() {
                break;
            }

            let (_, error) = &throttled[0];
            if !self.retry.should_retry(attempt, error) {
                let (_, error) = throttled.swap_remove(0);
                warn!(
                    attempts = attempt + 1,
                    throttled = throttled.len() + 1,
                    "Directory lookup still throttled at retry ceiling"
                );
                return Err(with_attempts(error, attempt + 1));
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                attempt = attempt + 1,
                max_attempts = self.retry.max_attempts,
                throttled = throttled.len(),
                error = %error,
                "Batch sub-requests throttled, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            pending = throttled.into_iter().map(|(key, _)| key).collect();
        }

        lookup
            .not_found
            .sort_by_key(|key| keys.iter().position(|k| k == key));
        Ok(lookup)
    }

    /// Sends one batch, recording answers into `lookup`. Returns the keys
    /// whose sub-request was throttled, with the classified error.
    async fn batch_pass<F>(
        &self,
        keys: &[String],
        field: &str,
        url_for: &F,
        lookup: &mut Lookup,
    ) -> ProvisionResult<Vec<(String, ProvisionError)>>
    where
        F: Fn(&str) -> String,
    {
        let requests: Vec<BatchRequest> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| BatchRequest::get(i.to_string(), url_for(key)))
            .collect();

        let responses = self.graph.batch(&requests).await?;
        let by_id: HashMap<&str, &BatchResponse> =
            responses.iter().map(|r| (r.id.as_str(), r)).collect();

        let mut throttled = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            let Some(response) = by_id.get(i.to_string().as_str()) else {
                return Err(ProvisionError::RemoteApi {
                    status: 502,
                    code: "MissingBatchResponse".to_string(),
                    message: format!("Batch response did not include an entry for '{key}'"),
                    details: None,
                });
            };

            match response.status {
                200..=299 => {
                    let value = response
                        .body
                        .as_ref()
                        .and_then(|body| body.get(field))
                        .and_then(serde_json::Value::as_str);
                    match value {
                        Some(value) => {
                            lookup.found.insert(key.to_lowercase(), value.to_string());
                        }
                        None => lookup.not_found.push(key.clone()),
                    }
                }
                404 => lookup.not_found.push(key.clone()),
                status => {
                    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                    let body = response
                        .body
                        .as_ref()
                        .map(serde_json::Value::to_string)
                        .unwrap_or_default();
                    let error = classify_response(status, &body);
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    throttled.push((key.clone(), error));
                }
            }
        }

        Ok(throttled)
    }
}

/// Rewrites the attempt count of a transient error that exhausted its retries.
fn with_attempts(error: ProvisionError, attempts: u32) -> ProvisionError {
    match error {
        ProvisionError::TransientRemote {
            status, message, ..
        } => ProvisionError::TransientRemote {
            status,
            attempts,
            message,
        },
        other => other,
    }
}

/// Case-insensitive dedupe keeping the first spelling, in input order.
fn dedupe(keys: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.iter()
        .filter(|key| seen.insert(key.to_lowercase()))
        .cloned()
        .collect()
}

/// Re-keys a lowercased lookup by every spelling the caller supplied.
fn expand_to_inputs(inputs: &[String], found: &HashMap<String, String>) -> HashMap<String, String> {
    inputs
        .iter()
        .filter_map(|input| {
            found
                .get(&input.to_lowercase())
                .map(|id| (input.clone(), id.clone()))
        })
        .collect()
}
