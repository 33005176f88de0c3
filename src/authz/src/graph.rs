//! Group graph unit of work
//!
//! [`GroupGraph`] records edge and membership mutations in memory and writes
//! them to the store in one transaction on [`GroupGraph::flush`]. References
//! are resolved when a mutation is recorded, so an invalid call never leaves
//! anything pending.

use crate::error::{GroupError, Result};
use crate::store::GroupStore;
use crate::types::{ChangeSet, EPersonId, GroupEdge, GroupId, MembershipRow};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// What a flush changed in the committed relations
///
/// Re-adding a committed row or removing an absent one is not a change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Child-group edges were added or removed
    pub groups_changed: bool,

    /// Direct eperson memberships were added or removed
    pub members_changed: bool,
}

/// Pending mutations of the group graph over a [`GroupStore`]
pub struct GroupGraph {
    store: Arc<dyn GroupStore>,
    pending: ChangeSet,
}

impl GroupGraph {
    pub fn new(store: Arc<dyn GroupStore>) -> Self {
        Self {
            store,
            pending: ChangeSet::new(),
        }
    }

    /// Add `child` as a direct subgroup of `parent`
    ///
    /// Idempotent. Fails with `InvalidArgument` if either group is unknown
    /// or `parent == child`.
    pub async fn add_child_group(&mut self, parent: GroupId, child: GroupId) -> Result<()> {
        if parent == child {
            return Err(GroupError::InvalidArgument(format!(
                "Group cannot contain itself: {}",
                parent
            )));
        }
        self.ensure_group(parent).await?;
        self.ensure_group(child).await?;

        self.pending.add_edge(GroupEdge { parent, child });
        Ok(())
    }

    /// Remove `child` from the direct subgroups of `parent`; no-op if absent
    pub async fn remove_child_group(&mut self, parent: GroupId, child: GroupId) -> Result<()> {
        self.ensure_group(parent).await?;
        self.ensure_group(child).await?;

        self.pending.remove_edge(GroupEdge { parent, child });
        Ok(())
    }

    /// Make `eperson` a direct member of `group`
    pub async fn add_member(&mut self, group: GroupId, eperson: EPersonId) -> Result<()> {
        self.ensure_group(group).await?;
        self.ensure_eperson(eperson).await?;

        self.pending.add_member(MembershipRow { group, eperson });
        Ok(())
    }

    /// Remove the direct membership of `eperson` in `group`; no-op if absent
    pub async fn remove_member(&mut self, group: GroupId, eperson: EPersonId) -> Result<()> {
        self.ensure_group(group).await?;
        self.ensure_eperson(eperson).await?;

        self.pending.remove_member(MembershipRow { group, eperson });
        Ok(())
    }

    /// Complete committed edge set
    pub async fn all_edges(&self) -> Result<BTreeSet<GroupEdge>> {
        Ok(self.store.edges().await?.into_iter().collect())
    }

    /// Complete committed membership set
    pub async fn all_membership_rows(&self) -> Result<BTreeSet<MembershipRow>> {
        Ok(self.store.memberships().await?.into_iter().collect())
    }

    /// Write every pending change in one transaction
    ///
    /// On failure nothing is written and the pending changes are kept, so
    /// the caller can retry or [`discard`](Self::discard) them.
    pub async fn flush(&mut self) -> Result<FlushOutcome> {
        if self.pending.is_empty() {
            return Ok(FlushOutcome::default());
        }

        let outcome = self.net_outcome().await?;

        if let Err(e) = self.store.apply_changes(&self.pending).await {
            warn!("Group flush rejected, {} pending changes kept: {}", self.pending.len(), e);
            return Err(e);
        }

        debug!(
            "Flushed group changes (groups_changed={}, members_changed={})",
            outcome.groups_changed, outcome.members_changed
        );
        self.pending.clear();
        Ok(outcome)
    }

    /// Drop every pending change
    pub fn discard(&mut self) {
        self.pending.clear();
    }

    /// Drop pending changes that reference a deleted group
    pub fn forget_group(&mut self, group: GroupId) {
        self.pending.forget_group(group);
    }

    /// Whether there are unflushed changes
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Unflushed changes
    pub fn pending(&self) -> &ChangeSet {
        &self.pending
    }

    /// Backing store
    pub fn store(&self) -> &Arc<dyn GroupStore> {
        &self.store
    }

    /// Compare pending changes with the committed rows they touch
    async fn net_outcome(&self) -> Result<FlushOutcome> {
        let mut children: BTreeMap<GroupId, BTreeSet<GroupId>> = BTreeMap::new();
        for edge in self.pending.edges_added.iter().chain(&self.pending.edges_removed) {
            if !children.contains_key(&edge.parent) {
                let committed = self.store.direct_children(edge.parent).await?;
                children.insert(edge.parent, committed.into_iter().collect());
            }
        }
        let committed = |edge: &GroupEdge| {
            children
                .get(&edge.parent)
                .is_some_and(|c| c.contains(&edge.child))
        };
        let groups_changed = self.pending.edges_added.iter().any(|e| !committed(e))
            || self.pending.edges_removed.iter().any(|e| committed(e));

        let mut members_changed = false;
        for row in &self.pending.members_added {
            if !self.store.is_direct_member(row.group, row.eperson).await? {
                members_changed = true;
                break;
            }
        }
        if !members_changed {
            for row in &self.pending.members_removed {
                if self.store.is_direct_member(row.group, row.eperson).await? {
                    members_changed = true;
                    break;
                }
            }
        }

        Ok(FlushOutcome {
            groups_changed,
            members_changed,
        })
    }

    async fn ensure_group(&self, id: GroupId) -> Result<()> {
        match self.store.get_group(id).await? {
            Some(_) => Ok(()),
            None => Err(GroupError::InvalidArgument(format!("Unresolved group: {}", id))),
        }
    }

    async fn ensure_eperson(&self, id: EPersonId) -> Result<()> {
        match self.store.get_eperson(id).await? {
            Some(_) => Ok(()),
            None => Err(GroupError::InvalidArgument(format!("Unresolved eperson: {}", id))),
        }
    }
}
