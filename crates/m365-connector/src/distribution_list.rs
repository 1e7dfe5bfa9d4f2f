//! Distribution list lifecycle on Exchange Online.

use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::alias::{alias_candidate, base_alias};
use crate::membership::{managed_by, DistributionListRoles, RoleMembershipStore};
use crate::{
    DirectoryResolver, DistributionListCreated, DistributionListDetails, DistributionListUpdate,
    ExchangeClient, M365Config, MembershipReconciler, NewDistributionList, ProvisionError,
    ProvisionResult, ProvisioningState, Role, UpdateReport,
};

fn str_field(object: &Value, field: &str) -> String {
    object
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Creates, reads, updates and deletes Exchange distribution lists.
#[derive(Debug, Clone)]
pub struct DistributionListService {
    exchange: Arc<ExchangeClient>,
    directory: Arc<DirectoryResolver>,
    roles: Arc<dyn RoleMembershipStore>,
    reconciler: MembershipReconciler,
    config: M365Config,
}

impl DistributionListService {
    #[must_use]
    pub fn new(
        exchange: Arc<ExchangeClient>,
        directory: Arc<DirectoryResolver>,
        config: M365Config,
    ) -> Self {
        let roles: Arc<dyn RoleMembershipStore> =
            Arc::new(DistributionListRoles::new(exchange.clone()));
        Self {
            exchange,
            directory,
            roles,
            reconciler: MembershipReconciler::from_config(&config),
            config,
        }
    }

    fn primary_address(&self, alias: &str) -> String {
        format!("{alias}@{}", self.config.mail_domain)
    }

    /// Creates a distribution list and populates its members.
    ///
    /// Owners are bound through `ManagedBy` in the create call itself.
    /// Member additions run after the settle delay; individual failures are
    /// reported in the result and do not undo the create.
    ///
    /// # Errors
    ///
    /// - `Validation` when no owner is given or a principal does not exist
    /// - `Conflict` when no free alias was found
    /// - any classified remote error of the create call
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(
        &self,
        request: NewDistributionList,
    ) -> ProvisionResult<DistributionListCreated> {
        let Some(first_owner) = request.owners.first() else {
            return Err(ProvisionError::Validation {
                message: "At least one owner is required".to_string(),
                not_found: Vec::new(),
            });
        };

        let everyone: Vec<String> = request
            .owners
            .iter()
            .chain(request.members.iter())
            .cloned()
            .collect();
        let resolved = self.directory.resolve_and_validate(&everyone).await?;
        let owner_ids = resolved.ids_of(&request.owners);

        let mut state = ProvisioningState::AliasNegotiation;
        info!(%state, "Negotiating alias");

        let attempts = self.config.timings.alias_attempts;
        let mut created = None;
        for attempt in 1..=attempts {
            let alias = alias_candidate(&request.name, "-")?;
            let params = json!({
                "Name": alias,
                "DisplayName": request.name,
                "Alias": alias,
                "ManagedBy": owner_ids.iter().collect::<Vec<_>>(),
                "RequireSenderAuthenticationEnabled": !request.allow_external_senders,
                "PrimarySmtpAddress": self.primary_address(&alias),
            });

            match self
                .exchange
                .invoke("New-DistributionGroup", params, Some(first_owner.as_str()))
                .await
            {
                Ok(_) => {
                    created = Some(alias);
                    break;
                }
                Err(ProvisionError::Conflict(message)) => {
                    warn!(alias = %alias, attempt, message = %message, "Alias already in use");
                }
                Err(e) => return Err(e),
            }
        }

        let Some(alias) = created else {
            return Err(ProvisionError::Conflict(format!(
                "Could not find a free alias for '{}' after {attempts} attempts",
                request.name
            )));
        };

        state = ProvisioningState::Created;
        info!(%state, alias = %alias, "Distribution list created");
        state = ProvisioningState::OwnerAttached;
        debug!(%state, owners = owner_ids.len(), "Owners bound on create");

        tokio::time::sleep(self.config.timings.settle_delay).await;

        let member_ids = self.desired_members(resolved.ids_of(&request.members), &owner_ids);

        let report = self
            .reconciler
            .apply_additions(&self.roles, &alias, Role::Member, &member_ids)
            .await;
        let report = resolved.report_to_upns(report);

        state = ProvisioningState::MembersPopulated;
        info!(
            %state,
            added = report.added.len(),
            failed = report.failed.len(),
            "Members populated"
        );
        state = ProvisioningState::Done;
        debug!(%state, alias = %alias, "Create finished");

        Ok(DistributionListCreated {
            primary_email: self.primary_address(&alias),
            dl_id: alias,
            failed_members: report.failed,
        })
    }

    async fn fetch(&self, dl_id: &str) -> ProvisionResult<Value> {
        let result = self
            .exchange
            .invoke("Get-DistributionGroup", json!({ "Identity": dl_id }), None)
            .await?;
        result
            .value
            .into_iter()
            .next()
            .ok_or_else(|| ProvisionError::NotFound(format!("Distribution list '{dl_id}'")))
    }

    /// Reads a distribution list with its owners (UPNs) and members (addresses).
    ///
    /// # Errors
    ///
    /// `NotFound` when the list does not exist, or any classified remote error.
    #[instrument(skip(self))]
    pub async fn get(&self, dl_id: &str) -> ProvisionResult<DistributionListDetails> {
        let group = self.fetch(dl_id).await?;

        let members = self
            .exchange
            .invoke(
                "Get-DistributionGroupMember",
                json!({ "Identity": dl_id, "ResultSize": "Unlimited" }),
                None,
            )
            .await?
            .value
            .iter()
            .filter_map(|m| m.get("PrimarySmtpAddress").and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        let owner_ids: Vec<String> = managed_by(&group).into_iter().collect();
        let upns = self.directory.resolve_upns(&owner_ids).await?;
        let owners = owner_ids
            .iter()
            .filter_map(|id| upns.get(id).cloned())
            .collect();

        let require_auth = group
            .get("RequireSenderAuthenticationEnabled")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        Ok(DistributionListDetails {
            dl_id: str_field(&group, "Name"),
            name: str_field(&group, "Name"),
            display_name: str_field(&group, "DisplayName"),
            primary_email: str_field(&group, "PrimarySmtpAddress"),
            owners,
            members,
            allow_external_senders: !require_auth,
        })
    }

    /// Applies a partial update.
    ///
    /// Owners and members are reconciled against the supplied lists with
    /// minimal writes. With `owners_as_members`, owners are always kept in the
    /// member role. Lists that are not supplied are left untouched.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the list does not exist
    /// - `Validation` when a supplied principal does not exist
    /// - any classified remote error of the read or property update
    #[instrument(skip(self, update))]
    pub async fn update(
        &self,
        dl_id: &str,
        update: DistributionListUpdate,
    ) -> ProvisionResult<UpdateReport> {
        let group = self.fetch(dl_id).await?;
        let mut identity = str_field(&group, "Name");
        if identity.is_empty() {
            identity = dl_id.to_string();
        }

        let supplied: Vec<String> = update
            .owners
            .iter()
            .flatten()
            .chain(update.members.iter().flatten())
            .cloned()
            .collect();
        let mut resolved = self.directory.resolve_and_validate(&supplied).await?;

        let mut report = UpdateReport::default();

        if update.changes_properties() {
            let mut params = Map::new();
            params.insert("Identity".into(), json!(identity));
            if let Some(name) = &update.name {
                let alias = base_alias(name, "-", 0)?;
                params.insert("Name".into(), json!(alias));
                params.insert("Alias".into(), json!(alias));
                params.insert(
                    "PrimarySmtpAddress".into(),
                    json!(self.primary_address(&alias)),
                );
                identity = alias;
            }
            if let Some(display_name) = &update.display_name {
                params.insert("DisplayName".into(), json!(display_name));
            }
            if let Some(allow) = update.allow_external_senders {
                params.insert("RequireSenderAuthenticationEnabled".into(), json!(!allow));
            }

            self.exchange
                .invoke("Set-DistributionGroup", Value::Object(params), None)
                .await?;
            report.properties_updated = true;
            info!(identity = %identity, "Distribution list properties updated");
        }

        let new_owner_ids = update.owners.as_ref().map(|owners| resolved.ids_of(owners));

        let mut owners_report = None;
        if let Some(owner_ids) = &new_owner_ids {
            owners_report = Some(
                self.reconciler
                    .reconcile(&self.roles, &identity, Role::Owner, owner_ids)
                    .await?,
            );
        }

        let members_report = match (&update.members, &new_owner_ids) {
            (Some(members), owner_ids) => {
                let owners = owner_ids.clone().unwrap_or_else(|| managed_by(&group));
                let desired = self.desired_members(resolved.ids_of(members), &owners);
                Some(
                    self.reconciler
                        .reconcile(&self.roles, &identity, Role::Member, &desired)
                        .await?,
                )
            }
            (None, Some(owner_ids)) if self.config.owners_as_members => Some(
                self.reconciler
                    .apply_additions(&self.roles, &identity, Role::Member, owner_ids)
                    .await,
            ),
            (None, _) => None,
        };

        // Removed principals come from the remote read, not the request.
        let unknown: Vec<String> = owners_report
            .iter()
            .chain(members_report.iter())
            .flat_map(|r| resolved.unknown_ids(r))
            .collect();
        if !unknown.is_empty() {
            match self.directory.resolve_upns(&unknown).await {
                Ok(upns) => {
                    for (id, upn) in &upns {
                        resolved.insert(upn, id);
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        count = unknown.len(),
                        "Reporting unresolved principals by id"
                    );
                }
            }
        }

        report.owners = owners_report.map(|r| resolved.report_to_upns(r));
        report.members = members_report.map(|r| resolved.report_to_upns(r));

        Ok(report)
    }

    /// Deletes a distribution list. Deleting a missing list succeeds.
    ///
    /// # Errors
    ///
    /// Any classified remote error other than `NotFound`.
    #[instrument(skip(self))]
    pub async fn delete(&self, dl_id: &str) -> ProvisionResult<()> {
        match self
            .exchange
            .invoke(
                "Remove-DistributionGroup",
                json!({ "Identity": dl_id, "Confirm": false }),
                None,
            )
            .await
        {
            Ok(_) => {
                info!(dl_id, "Distribution list deleted");
                Ok(())
            }
            Err(ProvisionError::NotFound(_)) => {
                info!(dl_id, "Distribution list already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Owners folded into members, when the policy applies.
    fn desired_members(
        &self,
        mut members: BTreeSet<String>,
        owners: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        if self.config.owners_as_members {
            members.extend(owners.iter().cloned());
        }
        members
    }
}
