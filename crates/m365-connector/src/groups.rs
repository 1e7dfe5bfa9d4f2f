//! Unified group and team site lifecycle on Microsoft Graph.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::alias::alias_candidate;
use crate::membership::{
    GraphGroupRoles, MembershipFailure, MembershipOperation, MembershipReport,
    RoleMembershipStore,
};
use crate::{
    DeleteOutcome, DirectoryResolver, GraphClient, M365Config, MembershipReconciler, NewSite,
    OwnerAttachMode, ProvisionError, ProvisionResult, ProvisioningState, ResolvedPrincipals, Role,
    SiteCreated, SiteResource,
};

const DEFAULT_VISIBILITY: &str = "Private";

#[derive(Debug, Deserialize)]
struct CreatedGroup {
    id: String,
}

/// Creates Unified groups with their team sites and manages their roles.
#[derive(Debug, Clone)]
pub struct UnifiedGroupService {
    graph: Arc<GraphClient>,
    directory: Arc<DirectoryResolver>,
    roles: Arc<dyn RoleMembershipStore>,
    reconciler: MembershipReconciler,
    config: M365Config,
}

impl UnifiedGroupService {
    #[must_use]
    pub fn new(
        graph: Arc<GraphClient>,
        directory: Arc<DirectoryResolver>,
        config: M365Config,
    ) -> Self {
        let roles: Arc<dyn RoleMembershipStore> = Arc::new(GraphGroupRoles::new(graph.clone()));
        Self {
            graph,
            directory,
            roles,
            reconciler: MembershipReconciler::from_config(&config),
            config,
        }
    }

    /// Creates a Unified group, waits for its team site and grants visitors read access.
    ///
    /// All principals are validated in one lookup before anything is
    /// written. Member and visitor failures are reported, not rolled back.
    ///
    /// # Errors
    ///
    /// - `Validation` for a missing owner or unknown principals
    /// - `Conflict` when no free alias was found
    /// - `Timeout` carrying the group id when the site did not appear in time
    /// - the original error when a sequential owner attach or the site probe failed
    ///   (the group is rolled back)
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_site(&self, request: NewSite) -> ProvisionResult<SiteCreated> {
        if request.owner.trim().is_empty() {
            return Err(ProvisionError::Validation {
                message: "An owner is required".to_string(),
                not_found: Vec::new(),
            });
        }

        let everyone: Vec<String> = std::iter::once(&request.owner)
            .chain(request.members.iter())
            .chain(request.visitors.iter())
            .cloned()
            .collect();
        let resolved = self.directory.resolve_and_validate(&everyone).await?;
        let owner_id = resolved
            .id_of(&request.owner)
            .map(str::to_string)
            .ok_or_else(|| ProvisionError::principals_not_found(vec![request.owner.clone()]))?;

        let mut state = ProvisioningState::AliasNegotiation;
        info!(%state, "Negotiating alias");
        let group_id = self.create_group(&request, &owner_id).await?;

        state = ProvisioningState::Created;
        info!(%state, group_id = %group_id, "Unified group created");

        if self.config.owner_attach_mode == OwnerAttachMode::Sequential {
            if let Err(e) = self.attach_owner(&group_id, &owner_id).await {
                self.rollback(&group_id, &e).await;
                return Err(e);
            }
        }
        state = ProvisioningState::OwnerAttached;
        debug!(%state, mode = ?self.config.owner_attach_mode, "Owner attached");

        let mut member_ids = resolved.ids_of(&request.members);
        if self.config.owners_as_members {
            member_ids.insert(owner_id.clone());
        }
        let members = self
            .reconciler
            .apply_additions(&self.roles, &group_id, Role::Member, &member_ids)
            .await;
        let members = resolved.report_to_upns(members);

        state = ProvisioningState::MembersPopulated;
        info!(
            %state,
            added = members.added.len(),
            failed = members.failed.len(),
            "Members populated"
        );

        state = ProvisioningState::SitePending;
        info!(%state, "Waiting for team site");
        let site = match self.wait_for_site(&group_id).await {
            Ok(site) => site,
            Err(e @ ProvisionError::Timeout { .. }) => return Err(e),
            Err(e) => {
                self.rollback(&group_id, &e).await;
                return Err(e);
            }
        };
        state = ProvisioningState::SiteReady;
        info!(%state, site_url = %site.site_url, "Team site ready");

        let visitor_ids = resolved.ids_of(&request.visitors);
        let failed_visitors = self.grant_visitors(&site.site_id, &visitor_ids, &resolved).await;

        state = ProvisioningState::Done;
        debug!(%state, group_id = %group_id, "Create finished");

        Ok(SiteCreated {
            group_id,
            site,
            failed_members: members.failed,
            failed_visitors,
        })
    }

    /// Posts the group, regenerating the alias while it collides.
    async fn create_group(&self, request: &NewSite, owner_id: &str) -> ProvisionResult<String> {
        let attempts = self.config.timings.alias_attempts;

        for attempt in 1..=attempts {
            let alias = alias_candidate(&request.name, "")?;
            let mut body = json!({
                "displayName": request.name,
                "mailNickname": alias,
                "mailEnabled": true,
                "securityEnabled": false,
                "visibility": request.privacy.as_deref().unwrap_or(DEFAULT_VISIBILITY),
                "groupTypes": ["Unified"],
            });
            if let Some(description) = request
                .description
                .as_deref()
                .filter(|d| !d.trim().is_empty())
            {
                body["description"] = json!(description);
            }
            if self.config.owner_attach_mode == OwnerAttachMode::BindOnCreate {
                body["owners@odata.bind"] =
                    json!([format!("{}/users/{owner_id}", self.graph.base_url())]);
            }

            match self.graph.post::<CreatedGroup, _>("/groups", &body).await {
                Ok(group) => return Ok(group.id),
                Err(ProvisionError::Conflict(message)) => {
                    warn!(alias = %alias, attempt, message = %message, "Alias already in use");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProvisionError::Conflict(format!(
            "Could not find a free alias for '{}' after {attempts} attempts",
            request.name
        )))
    }

    async fn attach_owner(&self, group_id: &str, owner_id: &str) -> ProvisionResult<()> {
        match self.roles.link(group_id, Role::Owner, owner_id).await {
            Err(e) if e.is_conflict() => Ok(()),
            other => other,
        }
    }

    /// Deletes a half-created group. Failures are logged for manual cleanup.
    async fn rollback(&self, group_id: &str, cause: &ProvisionError) {
        warn!(group_id, cause = %cause, "Rolling back group create");
        match self.delete_group(group_id).await {
            Ok(_) => {
                let state = ProvisioningState::RolledBack;
                info!(%state, group_id, "Group rolled back");
            }
            Err(e) => {
                error!(
                    group_id,
                    manual_intervention = true,
                    cause = %cause,
                    error = %e,
                    "Rollback failed, group must be removed manually"
                );
            }
        }
    }

    /// One probe of the group's root site. `None` while it is provisioning.
    async fn probe_site(&self, group_id: &str) -> ProvisionResult<Option<SiteResource>> {
        match self
            .graph
            .get::<SiteResource>(&format!("/groups/{group_id}/sites/root?$select=id,webUrl"))
            .await
        {
            Ok(site) => Ok(Some(site)),
            Err(ProvisionError::NotFound(_)) => Ok(None),
            Err(e) if e.is_retryable() => {
                warn!(group_id, error = %e, "Site probe throttled");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn wait_for_site(&self, group_id: &str) -> ProvisionResult<SiteResource> {
        let attempts = self.config.timings.site_poll_attempts;

        for attempt in 1..=attempts {
            if let Some(site) = self.probe_site(group_id).await? {
                debug!(group_id, attempt, "Site found");
                return Ok(site);
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.timings.site_poll_interval).await;
            }
        }

        warn!(group_id, attempts, "Site provisioning timed out");
        Err(ProvisionError::Timeout {
            message: format!(
                "Site for group '{group_id}' was not provisioned after {attempts} checks"
            ),
            resource_id: Some(group_id.to_string()),
        })
    }

    /// Current site of a group, or `None` while it is still provisioning.
    ///
    /// # Errors
    ///
    /// `NotFound` when the group itself does not exist.
    #[instrument(skip(self))]
    pub async fn site_status(&self, group_id: &str) -> ProvisionResult<Option<SiteResource>> {
        let _: Value = self
            .graph
            .get(&format!("/groups/{group_id}?$select=id"))
            .await?;
        self.probe_site(group_id).await
    }

    async fn grant_visitors(
        &self,
        site_id: &str,
        visitor_ids: &BTreeSet<String>,
        resolved: &ResolvedPrincipals,
    ) -> Vec<MembershipFailure> {
        let mut failed = Vec::new();

        for visitor_id in visitor_ids {
            let permission = json!({
                "roles": ["read"],
                "grantee": {
                    "@odata.type": "microsoft.graph.user",
                    "id": visitor_id,
                },
            });
            let path = format!("/sites/{site_id}/permissions");
            if let Err(e) = self.graph.post::<Value, _>(&path, &permission).await {
                let principal = resolved
                    .upn_of(visitor_id)
                    .map_or_else(|| visitor_id.clone(), str::to_string);
                warn!(site_id, principal = %principal, error = %e, "Visitor grant failed");
                failed.push(MembershipFailure {
                    principal,
                    operation: MembershipOperation::Add,
                    error: e.to_string(),
                });
            }
        }

        failed
    }

    /// Adds owners. With `owners_as_members`, they are added as members too.
    ///
    /// # Errors
    ///
    /// `Validation` when a principal does not exist.
    #[instrument(skip(self, upns), fields(count = upns.len()))]
    pub async fn add_owners(
        &self,
        group_id: &str,
        upns: &[String],
    ) -> ProvisionResult<MembershipReport> {
        let resolved = self.directory.resolve_and_validate(upns).await?;
        let ids = resolved.ids_of(upns);

        let mut report = self
            .reconciler
            .apply_additions(&self.roles, group_id, Role::Owner, &ids)
            .await;
        if self.config.owners_as_members {
            let members = self
                .reconciler
                .apply_additions(&self.roles, group_id, Role::Member, &ids)
                .await;
            report.failed.extend(members.failed);
        }

        Ok(resolved.report_to_upns(report))
    }

    /// Removes owners. Their member role is left as is.
    ///
    /// # Errors
    ///
    /// `Validation` when a principal does not exist.
    #[instrument(skip(self, upns), fields(count = upns.len()))]
    pub async fn remove_owners(
        &self,
        group_id: &str,
        upns: &[String],
    ) -> ProvisionResult<MembershipReport> {
        let resolved = self.directory.resolve_and_validate(upns).await?;
        let ids = resolved.ids_of(upns);
        let report = self
            .reconciler
            .apply_removals(&self.roles, group_id, Role::Owner, &ids)
            .await;
        Ok(resolved.report_to_upns(report))
    }

    /// Adds members.
    ///
    /// # Errors
    ///
    /// `Validation` when a principal does not exist.
    #[instrument(skip(self, upns), fields(count = upns.len()))]
    pub async fn add_members(
        &self,
        group_id: &str,
        upns: &[String],
    ) -> ProvisionResult<MembershipReport> {
        let resolved = self.directory.resolve_and_validate(upns).await?;
        let ids = resolved.ids_of(upns);
        let report = self
            .reconciler
            .apply_additions(&self.roles, group_id, Role::Member, &ids)
            .await;
        Ok(resolved.report_to_upns(report))
    }

    /// Removes members. With `owners_as_members`, current owners are refused
    /// and reported as failures.
    ///
    /// # Errors
    ///
    /// `Validation` when a principal does not exist, or the error of reading
    /// the current owners.
    #[instrument(skip(self, upns), fields(count = upns.len()))]
    pub async fn remove_members(
        &self,
        group_id: &str,
        upns: &[String],
    ) -> ProvisionResult<MembershipReport> {
        let resolved = self.directory.resolve_and_validate(upns).await?;
        let mut ids = resolved.ids_of(upns);

        let mut refused = Vec::new();
        if self.config.owners_as_members && !ids.is_empty() {
            let owners = self.roles.current(group_id, Role::Owner).await?;
            let protected: Vec<String> = owners.intersection(&ids).cloned().collect();
            for owner in protected {
                ids.remove(&owner);
                refused.push(MembershipFailure {
                    principal: owner,
                    operation: MembershipOperation::Remove,
                    error: "Principal is an owner and owners are kept as members".to_string(),
                });
            }
        }

        let mut report = self
            .reconciler
            .apply_removals(&self.roles, group_id, Role::Member, &ids)
            .await;
        report.failed.extend(refused);
        Ok(resolved.report_to_upns(report))
    }

    /// Deletes a group and then purges it from the deleted-items container.
    ///
    /// A group that is already gone counts as deleted. The purge is retried
    /// while the soft-deleted object is not yet visible; giving up on the
    /// purge still counts as success with `purged == false`.
    ///
    /// # Errors
    ///
    /// Any classified remote error of the soft delete other than `NotFound`.
    #[instrument(skip(self))]
    pub async fn delete_group(&self, group_id: &str) -> ProvisionResult<DeleteOutcome> {
        match self.graph.delete(&format!("/groups/{group_id}")).await {
            Ok(()) => info!(group_id, "Group deleted"),
            Err(ProvisionError::NotFound(_)) => info!(group_id, "Group already absent"),
            Err(e) => return Err(e),
        }

        let attempts = self.config.timings.purge_attempts;
        let path = format!("/directory/deletedItems/{group_id}");
        for attempt in 1..=attempts {
            match self.graph.delete(&path).await {
                Ok(()) => {
                    info!(group_id, attempt, "Group purged");
                    return Ok(DeleteOutcome { purged: true });
                }
                Err(ProvisionError::NotFound(_)) => {
                    debug!(group_id, attempt, "Deleted item not visible yet");
                    if attempt < attempts {
                        tokio::time::sleep(self.config.timings.purge_retry_delay).await;
                    }
                }
                Err(e) => {
                    warn!(group_id, error = %e, "Purge failed, group stays soft-deleted");
                    return Ok(DeleteOutcome { purged: false });
                }
            }
        }

        warn!(group_id, attempts, "Deleted item never appeared, purge skipped");
        Ok(DeleteOutcome { purged: false })
    }
}
