//! Minimal-delta membership reconciliation.
//!
//! A reconcile reads the current membership of one role once, computes the
//! delta to the desired set and applies only that delta. Writes run on a
//! bounded pool; a failed write is recorded and the others continue.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    ExchangeClient, GraphClient, M365Config, ProvisionError, ProvisionResult, RetryPolicy, Role,
};

/// Difference between a desired and a current membership, keyed by directory id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDelta {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl MembershipDelta {
    /// `to_add = desired - current`, `to_remove = current - desired`.
    #[must_use]
    pub fn compute(desired: &BTreeSet<String>, current: &BTreeSet<String>) -> Self {
        Self {
            to_add: desired.difference(current).cloned().collect(),
            to_remove: current.difference(desired).cloned().collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Membership after a fully successful application to `current`.
    #[must_use]
    pub fn apply_to(&self, current: &BTreeSet<String>) -> BTreeSet<String> {
        current
            .difference(&self.to_remove)
            .chain(self.to_add.iter())
            .cloned()
            .collect()
    }
}

/// Kind of write that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipOperation {
    Add,
    Remove,
}

impl fmt::Display for MembershipOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// One principal whose membership write failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipFailure {
    pub principal: String,
    pub operation: MembershipOperation,
    pub error: String,
}

/// Outcome of applying membership writes. Lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<MembershipFailure>,
}

impl MembershipReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Folds another report into this one.
    pub fn merge(&mut self, other: MembershipReport) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.failed.extend(other.failed);
        self.added.sort();
        self.added.dedup();
        self.removed.sort();
        self.removed.dedup();
    }
}

/// Read and write access to one role of a group-like resource.
#[async_trait]
pub trait RoleMembershipStore: Send + Sync {
    /// Directory ids currently holding `role` on the resource.
    async fn current(&self, resource_id: &str, role: Role) -> ProvisionResult<BTreeSet<String>>;

    /// Grants `role` to a principal.
    async fn link(&self, resource_id: &str, role: Role, principal_id: &str) -> ProvisionResult<()>;

    /// Revokes `role` from a principal.
    async fn unlink(&self, resource_id: &str, role: Role, principal_id: &str)
        -> ProvisionResult<()>;
}

impl fmt::Debug for dyn RoleMembershipStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoleMembershipStore")
    }
}

/// Applies membership deltas through a [`RoleMembershipStore`].
#[derive(Debug, Clone)]
pub struct MembershipReconciler {
    concurrency: usize,
    write_retry: RetryPolicy,
}

impl MembershipReconciler {
    /// Creates a reconciler running at most `concurrency` writes at once.
    #[must_use]
    pub fn new(concurrency: usize, write_retry: RetryPolicy) -> Self {
        Self {
            concurrency: concurrency.max(1),
            write_retry,
        }
    }

    /// Builds a reconciler from connector configuration.
    #[must_use]
    pub fn from_config(config: &M365Config) -> Self {
        Self::new(
            config.timings.member_concurrency,
            RetryPolicy {
                max_attempts: config.timings.member_add_attempts,
                ..config.retry.clone()
            },
        )
    }

    /// Makes the membership of `role` equal `desired`, writing only the delta.
    ///
    /// # Errors
    ///
    /// Returns the error of the initial read. Write failures are reported in
    /// [`MembershipReport::failed`] instead.
    #[instrument(skip(self, store, desired), fields(desired_count = desired.len()))]
    pub async fn reconcile(
        &self,
        store: &Arc<dyn RoleMembershipStore>,
        resource_id: &str,
        role: Role,
        desired: &BTreeSet<String>,
    ) -> ProvisionResult<MembershipReport> {
        let current = store.current(resource_id, role).await?;
        let delta = MembershipDelta::compute(desired, &current);

        if delta.is_empty() {
            debug!("Membership already in sync");
            return Ok(MembershipReport::default());
        }

        info!(
            to_add = delta.to_add.len(),
            to_remove = delta.to_remove.len(),
            "Applying membership delta"
        );

        let writes = delta
            .to_add
            .into_iter()
            .map(|id| (id, MembershipOperation::Add))
            .chain(
                delta
                    .to_remove
                    .into_iter()
                    .map(|id| (id, MembershipOperation::Remove)),
            )
            .collect();

        Ok(self.apply(store, resource_id, role, writes).await)
    }

    /// Grants `role` to every principal in `ids` without reading current state.
    #[instrument(skip(self, store, ids), fields(count = ids.len()))]
    pub async fn apply_additions(
        &self,
        store: &Arc<dyn RoleMembershipStore>,
        resource_id: &str,
        role: Role,
        ids: &BTreeSet<String>,
    ) -> MembershipReport {
        let writes = ids
            .iter()
            .map(|id| (id.clone(), MembershipOperation::Add))
            .collect();
        self.apply(store, resource_id, role, writes).await
    }

    /// Revokes `role` from every principal in `ids` without reading current state.
    #[instrument(skip(self, store, ids), fields(count = ids.len()))]
    pub async fn apply_removals(
        &self,
        store: &Arc<dyn RoleMembershipStore>,
        resource_id: &str,
        role: Role,
        ids: &BTreeSet<String>,
    ) -> MembershipReport {
        let writes = ids
            .iter()
            .map(|id| (id.clone(), MembershipOperation::Remove))
            .collect();
        self.apply(store, resource_id, role, writes).await
    }

    async fn apply(
        &self,
        store: &Arc<dyn RoleMembershipStore>,
        resource_id: &str,
        role: Role,
        writes: Vec<(String, MembershipOperation)>,
    ) -> MembershipReport {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();

        for (principal, operation) in writes {
            let store = Arc::clone(store);
            let semaphore = Arc::clone(&semaphore);
            let retry = self.write_retry.clone();
            let resource_id = resource_id.to_string();

            join_set.spawn(async move {
                let target = principal.clone();
                // The write runs in its own task so a panic still reports its principal.
                let write = tokio::spawn(async move {
                    match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            write_one(&*store, &retry, &resource_id, role, &target, operation)
                                .await
                        }
                        Err(e) => Err(ProvisionError::Config(format!("Worker pool closed: {e}"))),
                    }
                });
                let result = write.await.unwrap_or_else(|e| {
                    error!(principal = %principal, error = %e, "Membership task panicked");
                    Err(ProvisionError::Config(format!("Membership task panicked: {e}")))
                });
                (principal, operation, result)
            });
        }

        let mut report = MembershipReport::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((principal, MembershipOperation::Add, Ok(()))) => report.added.push(principal),
                Ok((principal, MembershipOperation::Remove, Ok(()))) => {
                    report.removed.push(principal);
                }
                Ok((principal, operation, Err(e))) => {
                    warn!(
                        resource_id,
                        %role,
                        principal = %principal,
                        %operation,
                        error = %e,
                        "Membership write failed"
                    );
                    report.failed.push(MembershipFailure {
                        principal,
                        operation,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    error!(error = %e, "Membership worker aborted");
                }
            }
        }

        report.added.sort();
        report.removed.sort();
        report
            .failed
            .sort_by(|a, b| a.principal.cmp(&b.principal));
        report
    }
}

/// One idempotent write. Adding a present principal and removing an absent one succeed.
async fn write_one(
    store: &dyn RoleMembershipStore,
    retry: &RetryPolicy,
    resource_id: &str,
    role: Role,
    principal: &str,
    operation: MembershipOperation,
) -> ProvisionResult<()> {
    let name = format!("{operation} {role}");
    let result = retry
        .execute(&name, move || async move {
            match operation {
                MembershipOperation::Add => store.link(resource_id, role, principal).await,
                MembershipOperation::Remove => store.unlink(resource_id, role, principal).await,
            }
        })
        .await;

    match result {
        Err(e) if operation == MembershipOperation::Add && e.is_conflict() => {
            debug!(principal, %role, "Principal already present");
            Ok(())
        }
        Err(e) if operation == MembershipOperation::Remove && e.is_not_found() => {
            debug!(principal, %role, "Principal already absent");
            Ok(())
        }
        other => other,
    }
}

/// Object reference returned by Graph navigation collections.
#[derive(Debug, serde::Deserialize)]
struct DirectoryObjectRef {
    id: String,
}

/// Owner and member roles of a Unified group, through Graph `$ref` collections.
#[derive(Debug, Clone)]
pub struct GraphGroupRoles {
    graph: Arc<GraphClient>,
}

impl GraphGroupRoles {
    #[must_use]
    pub fn new(graph: Arc<GraphClient>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl RoleMembershipStore for GraphGroupRoles {
    async fn current(&self, group_id: &str, role: Role) -> ProvisionResult<BTreeSet<String>> {
        let refs: Vec<DirectoryObjectRef> = self
            .graph
            .get_all(&format!(
                "/groups/{group_id}/{}?$select=id",
                role.collection()
            ))
            .await?;
        Ok(refs.into_iter().map(|r| r.id).collect())
    }

    async fn link(&self, group_id: &str, role: Role, principal_id: &str) -> ProvisionResult<()> {
        let body = json!({ "@odata.id": self.graph.directory_object_url(principal_id) });
        self.graph
            .post_no_content(
                &format!("/groups/{group_id}/{}/$ref", role.collection()),
                &body,
            )
            .await
    }

    async fn unlink(&self, group_id: &str, role: Role, principal_id: &str) -> ProvisionResult<()> {
        self.graph
            .delete(&format!(
                "/groups/{group_id}/{}/{principal_id}/$ref",
                role.collection()
            ))
            .await
    }
}

/// Owner and member roles of an Exchange distribution list.
///
/// Members are addressed by `ExternalDirectoryObjectId`. Owners live in the
/// list's `ManagedBy` property and are edited with add/remove hashtables.
#[derive(Debug, Clone)]
pub struct DistributionListRoles {
    exchange: Arc<ExchangeClient>,
}

impl DistributionListRoles {
    #[must_use]
    pub fn new(exchange: Arc<ExchangeClient>) -> Self {
        Self { exchange }
    }
}

/// `ManagedBy` of a `Get-DistributionGroup` result.
pub(crate) fn managed_by(group: &serde_json::Value) -> BTreeSet<String> {
    match group.get("ManagedBy") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(serde_json::Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(serde_json::Value::String(single)) => BTreeSet::from([single.clone()]),
        _ => BTreeSet::new(),
    }
}

#[async_trait]
impl RoleMembershipStore for DistributionListRoles {
    async fn current(&self, dl_id: &str, role: Role) -> ProvisionResult<BTreeSet<String>> {
        match role {
            Role::Member => {
                let result = self
                    .exchange
                    .invoke(
                        "Get-DistributionGroupMember",
                        json!({ "Identity": dl_id, "ResultSize": "Unlimited" }),
                        None,
                    )
                    .await?;
                Ok(result
                    .value
                    .iter()
                    .filter_map(|m| m.get("ExternalDirectoryObjectId"))
                    .filter_map(serde_json::Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect())
            }
            Role::Owner => {
                let result = self
                    .exchange
                    .invoke("Get-DistributionGroup", json!({ "Identity": dl_id }), None)
                    .await?;
                let group = result.first().ok_or_else(|| {
                    ProvisionError::NotFound(format!("Distribution list '{dl_id}'"))
                })?;
                Ok(managed_by(group))
            }
        }
    }

    async fn link(&self, dl_id: &str, role: Role, principal_id: &str) -> ProvisionResult<()> {
        let (command, params) = match role {
            Role::Member => (
                "Add-DistributionGroupMember",
                json!({
                    "Identity": dl_id,
                    "Member": principal_id,
                    "BypassSecurityGroupManagerCheck": true,
                }),
            ),
            Role::Owner => (
                "Set-DistributionGroup",
                json!({
                    "Identity": dl_id,
                    "ManagedBy": { "Add": principal_id },
                    "BypassSecurityGroupManagerCheck": true,
                }),
            ),
        };
        self.exchange.invoke(command, params, None).await.map(|_| ())
    }

    async fn unlink(&self, dl_id: &str, role: Role, principal_id: &str) -> ProvisionResult<()> {
        let (command, params) = match role {
            Role::Member => (
                "Remove-DistributionGroupMember",
                json!({
                    "Identity": dl_id,
                    "Member": principal_id,
                    "Confirm": false,
                    "BypassSecurityGroupManagerCheck": true,
                }),
            ),
            Role::Owner => (
                "Set-DistributionGroup",
                json!({
                    "Identity": dl_id,
                    "ManagedBy": { "Remove": principal_id },
                    "BypassSecurityGroupManagerCheck": true,
                }),
            ),
        };
        self.exchange.invoke(command, params, None).await.map(|_| ())
    }
}
