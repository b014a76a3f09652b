//! Idempotent group membership reconciliation.
//!
//! Groups are processed one at a time. Each group's current membership is
//! checked before mutating it, so repeating a call after a partial failure
//! only performs the changes that are still missing.

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::dn;
use crate::error::{DirectoryError, DirectoryResult};
use crate::filter::Filter;
use crate::session::DirectorySession;
use crate::traits::GroupMembershipOps;

/// Object class groups are resolved by.
pub const GROUP_CLASS: &str = "group";

/// Which way a reconciliation goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    Add,
    Remove,
}

/// Per-group result of a successful reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipOutcome {
    /// Groups that were actually modified.
    pub changed: Vec<String>,
    /// Groups already in the requested state.
    pub unchanged: Vec<String>,
}

/// Adds and removes a target entry's group memberships.
pub struct GroupReconciler<'s, B: GroupMembershipOps> {
    session: &'s DirectorySession<B>,
}

impl<'s, B: GroupMembershipOps> GroupReconciler<'s, B> {
    pub fn new(session: &'s DirectorySession<B>) -> Self {
        Self { session }
    }

    /// Make `target_dn` a member of every group in `groups`.
    #[instrument(skip(self, groups), fields(groups = groups.len()))]
    pub async fn add_to_groups(
        &self,
        target_dn: &str,
        groups: &[String],
    ) -> DirectoryResult<MembershipOutcome> {
        self.reconcile(target_dn, groups, MembershipChange::Add).await
    }

    /// Remove `target_dn` from every group in `groups`.
    #[instrument(skip(self, groups), fields(groups = groups.len()))]
    pub async fn remove_from_groups(
        &self,
        target_dn: &str,
        groups: &[String],
    ) -> DirectoryResult<MembershipOutcome> {
        self.reconcile(target_dn, groups, MembershipChange::Remove).await
    }

    async fn reconcile(
        &self,
        target_dn: &str,
        groups: &[String],
        change: MembershipChange,
    ) -> DirectoryResult<MembershipOutcome> {
        let member = self.session.require_path(target_dn).await?.dn;

        let mut outcome = MembershipOutcome::default();
        for group in groups {
            let changed = self
                .reconcile_one(&member, group, change)
                .await
                .map_err(|e| DirectoryError::GroupMembership {
                    target: target_dn.to_string(),
                    group: group.clone(),
                    source: Box::new(e),
                })?;
            if changed {
                outcome.changed.push(group.clone());
            } else {
                outcome.unchanged.push(group.clone());
            }
        }
        Ok(outcome)
    }

    async fn reconcile_one(
        &self,
        member: &str,
        group: &str,
        change: MembershipChange,
    ) -> DirectoryResult<bool> {
        let group_dn = self.resolve_group(group).await?;
        let backend = self.session.backend();
        let is_member = backend.is_member(&group_dn, member).await?;

        match (change, is_member) {
            (MembershipChange::Add, false) => {
                backend.add_member(&group_dn, member).await?;
                info!(group = %group_dn, member = %member, "Added group member");
                Ok(true)
            }
            (MembershipChange::Remove, true) => {
                backend.remove_member(&group_dn, member).await?;
                info!(group = %group_dn, member = %member, "Removed group member");
                Ok(true)
            }
            _ => {
                debug!(group = %group_dn, member = %member, ?change, "Membership already in place");
                Ok(false)
            }
        }
    }

    /// A group is named by a bare common name (`Admins`), by RDNs relative
    /// to the session root (`CN=Admins,OU=Groups`), or by a DN that already
    /// lies beneath the root.
    async fn resolve_group(&self, group: &str) -> DirectoryResult<String> {
        let root = self.session.root();
        let group_dn = if !group.contains('=') {
            dn::join(&dn::cn_rdn(group), root)
        } else if !root.is_empty() && dn::is_within(group, root) {
            group.to_string()
        } else {
            dn::join(group, root)
        };

        let filter = Filter::eq("objectClass", GROUP_CLASS).to_ldap_string();
        let entry = self
            .session
            .read_matching(&group_dn, &filter)
            .await?
            .ok_or_else(|| DirectoryError::NotFound {
                filter: Filter::and(vec![
                    Filter::eq("objectClass", GROUP_CLASS),
                    Filter::eq("distinguishedName", group_dn.clone()),
                ])
                .to_ldap_string(),
                root: root.to_string(),
            })?;
        Ok(entry.dn)
    }
}
