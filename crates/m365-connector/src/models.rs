//! Request, result and resource types shared by the provisioning services.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::membership::{MembershipFailure, MembershipReport};

/// Membership role on a group or distribution list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Member,
}

impl Role {
    /// Graph navigation property holding this role.
    #[must_use]
    pub fn collection(self) -> &'static str {
        match self {
            Self::Owner => "owners",
            Self::Member => "members",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::Member => write!(f, "member"),
        }
    }
}

/// A user identified by UPN, with its directory object id once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub upn: String,
    pub directory_id: Option<String>,
}

/// UPN to directory id mapping built once per request.
///
/// Lookups are case-insensitive on the UPN, matching directory semantics.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPrincipals {
    by_upn: HashMap<String, Principal>,
    /// Directory id to the UPN as supplied.
    by_id: HashMap<String, String>,
}

impl ResolvedPrincipals {
    /// Records a resolved principal.
    pub fn insert(&mut self, upn: &str, directory_id: &str) {
        let principal = self
            .by_upn
            .entry(upn.to_lowercase())
            .or_insert_with(|| Principal {
                upn: upn.to_string(),
                directory_id: Some(directory_id.to_string()),
            });
        if let Some(id) = &principal.directory_id {
            self.by_id
                .entry(id.clone())
                .or_insert_with(|| principal.upn.clone());
        }
    }

    /// Directory id of a UPN, if resolved.
    #[must_use]
    pub fn id_of(&self, upn: &str) -> Option<&str> {
        self.by_upn
            .get(&upn.to_lowercase())
            .and_then(|p| p.directory_id.as_deref())
    }

    /// Directory ids of every resolved UPN among `upns`.
    #[must_use]
    pub fn ids_of<'a, I>(&self, upns: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        upns.into_iter()
            .filter_map(|upn| self.id_of(upn))
            .map(str::to_string)
            .collect()
    }

    /// UPN a directory id was resolved from, as it was supplied.
    #[must_use]
    pub fn upn_of(&self, directory_id: &str) -> Option<&str> {
        self.by_id.get(directory_id).map(String::as_str)
    }

    /// Ids in a report that no resolved UPN maps to, in report order.
    #[must_use]
    pub fn unknown_ids(&self, report: &MembershipReport) -> Vec<String> {
        let mut seen = BTreeSet::new();
        report
            .added
            .iter()
            .chain(&report.removed)
            .chain(report.failed.iter().map(|f| &f.principal))
            .filter(|id| !self.by_id.contains_key(id.as_str()))
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }

    /// Rewrites the principals of a report from directory ids to UPNs.
    #[must_use]
    pub fn report_to_upns(&self, report: MembershipReport) -> MembershipReport {
        let upn = |id: String| self.upn_of(&id).map_or(id, str::to_string);
        MembershipReport {
            added: report.added.into_iter().map(upn).collect(),
            removed: report.removed.into_iter().map(upn).collect(),
            failed: report
                .failed
                .into_iter()
                .map(|f| MembershipFailure {
                    principal: upn(f.principal),
                    ..f
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_upn.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_upn.is_empty()
    }
}

/// Workflow position of a create operation, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    AliasNegotiation,
    Created,
    OwnerAttached,
    MembersPopulated,
    SitePending,
    SiteReady,
    Done,
    RolledBack,
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AliasNegotiation => "alias_negotiation",
            Self::Created => "created",
            Self::OwnerAttached => "owner_attached",
            Self::MembersPopulated => "members_populated",
            Self::SitePending => "site_pending",
            Self::SiteReady => "site_ready",
            Self::Done => "done",
            Self::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Input for creating a distribution list.
#[derive(Debug, Clone, Default)]
pub struct NewDistributionList {
    pub name: String,
    pub owners: Vec<String>,
    pub members: Vec<String>,
    pub allow_external_senders: bool,
}

/// Outcome of a distribution list create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionListCreated {
    pub dl_id: String,
    pub primary_email: String,
    pub failed_members: Vec<MembershipFailure>,
}

/// Distribution list as currently stored in Exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionListDetails {
    pub dl_id: String,
    pub name: String,
    pub display_name: String,
    pub primary_email: String,
    pub owners: Vec<String>,
    pub members: Vec<String>,
    pub allow_external_senders: bool,
}

/// Partial update of a distribution list. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct DistributionListUpdate {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub owners: Option<Vec<String>>,
    pub members: Option<Vec<String>>,
    pub allow_external_senders: Option<bool>,
}

impl DistributionListUpdate {
    /// True when a property other than membership is being changed.
    #[must_use]
    pub fn changes_properties(&self) -> bool {
        self.name.is_some() || self.display_name.is_some() || self.allow_external_senders.is_some()
    }
}

/// Outcome of a distribution list update. Reports carry UPNs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub properties_updated: bool,
    pub owners: Option<MembershipReport>,
    pub members: Option<MembershipReport>,
}

/// Input for creating a Unified group with its team site.
#[derive(Debug, Clone, Default)]
pub struct NewSite {
    pub name: String,
    pub owner: String,
    /// Group visibility, `Private` when not given.
    pub privacy: Option<String>,
    pub description: Option<String>,
    pub members: Vec<String>,
    pub visitors: Vec<String>,
}

/// A provisioned team site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteResource {
    #[serde(rename = "id")]
    pub site_id: String,
    #[serde(rename = "webUrl")]
    pub site_url: String,
}

/// Outcome of a site create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteCreated {
    pub group_id: String,
    pub site: SiteResource,
    pub failed_members: Vec<MembershipFailure>,
    pub failed_visitors: Vec<MembershipFailure>,
}

/// Outcome of a two-phase group delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    /// The object was also removed from the deleted-items container.
    pub purged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MembershipOperation;

    #[test]
    fn test_resolved_principals_case_insensitive() {
        let mut resolved = ResolvedPrincipals::default();
        resolved.insert("Alice@Corp.com", "id-a");
        assert_eq!(resolved.id_of("alice@corp.com"), Some("id-a"));
        assert_eq!(resolved.upn_of("id-a"), Some("Alice@Corp.com"));
        assert_eq!(resolved.id_of("bob@corp.com"), None);
    }

    #[test]
    fn test_ids_of_skips_unresolved() {
        let mut resolved = ResolvedPrincipals::default();
        resolved.insert("a@x.com", "1");
        let upns = vec!["a@x.com".to_string(), "b@x.com".to_string()];
        assert_eq!(resolved.ids_of(&upns), BTreeSet::from(["1".to_string()]));
    }

    #[test]
    fn test_report_to_upns() {
        let mut resolved = ResolvedPrincipals::default();
        resolved.insert("a@x.com", "1");
        let report = MembershipReport {
            added: vec!["1".into()],
            removed: vec!["9".into()],
            failed: vec![MembershipFailure {
                principal: "1".into(),
                operation: MembershipOperation::Add,
                error: "boom".into(),
            }],
        };
        let mapped = resolved.report_to_upns(report);
        assert_eq!(mapped.added, vec!["a@x.com"]);
        assert_eq!(mapped.removed, vec!["9"]);
        assert_eq!(mapped.failed[0].principal, "a@x.com");
    }

    #[test]
    fn test_upn_of_keeps_first_spelling() {
        let mut resolved = ResolvedPrincipals::default();
        resolved.insert("A@x.com", "1");
        resolved.insert("a@X.com", "1");
        resolved.insert("b@x.com", "2");
        assert_eq!(resolved.upn_of("1"), Some("A@x.com"));
        assert_eq!(resolved.upn_of("2"), Some("b@x.com"));
        assert_eq!(resolved.upn_of("3"), None);
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn test_unknown_ids_deduped_in_report_order() {
        let mut resolved = ResolvedPrincipals::default();
        resolved.insert("a@x.com", "1");
        let report = MembershipReport {
            added: vec!["1".into(), "7".into()],
            removed: vec!["9".into(), "7".into()],
            failed: vec![MembershipFailure {
                principal: "8".into(),
                operation: MembershipOperation::Remove,
                error: "boom".into(),
            }],
        };
        assert_eq!(resolved.unknown_ids(&report), vec!["7", "9", "8"]);
    }

    #[test]
    fn test_role_collection() {
        assert_eq!(Role::Owner.collection(), "owners");
        assert_eq!(Role::Member.collection(), "members");
    }

    #[test]
    fn test_site_resource_from_graph() {
        let site: SiteResource = serde_json::from_str(
            r#"{"id":"corp.sharepoint.com,1,2","webUrl":"https://corp.sharepoint.com/sites/projectx"}"#,
        )
        .unwrap();
        assert_eq!(site.site_url, "https://corp.sharepoint.com/sites/projectx");
    }
}
