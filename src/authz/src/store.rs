//! Group persistence: the store trait and the in-memory implementation
//!
//! A store holds three relations plus the entity rows they reference:
//!
//! - `group2group` ([`GroupEdge`]) - direct parent -> child group edges
//! - `epersongroup2eperson` ([`MembershipRow`]) - direct eperson memberships
//! - `group2groupcache` ([`ClosureEntry`]) - materialized transitive closure
//!
//! Every write method is all-or-nothing: either the whole change becomes
//! visible or none of it does.

use crate::error::{GroupError, Result};
use crate::types::{
    ChangeSet, ClosureEntry, EPerson, EPersonId, Group, GroupEdge, GroupId, MembershipRow,
    NewEPerson,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresGroupStore;

/// Closure computation applied by [`GroupStore::rebuild_closure`]
pub type ClosureFn = fn(&[GroupEdge]) -> Vec<ClosureEntry>;

/// What a closure rebuild read and wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClosureRebuild {
    /// Committed edges the closure was computed from
    pub edge_count: usize,

    /// Closure entries written
    pub entry_count: usize,
}

/// Name of the seeded anonymous group
pub const ANONYMOUS_GROUP_NAME: &str = "Anonymous";

/// Name of the seeded administrator group
pub const ADMINISTRATOR_GROUP_NAME: &str = "Administrator";

/// Persistence collaborator for groups, epersons and their relations
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Create a group with a unique name
    async fn create_group(&self, name: &str) -> Result<Group>;

    /// Get a group by ID
    async fn get_group(&self, id: GroupId) -> Result<Option<Group>>;

    /// Find a group by its exact name
    async fn find_group_by_name(&self, name: &str) -> Result<Option<Group>>;

    /// List all groups ordered by ID
    async fn list_groups(&self) -> Result<Vec<Group>>;

    /// Delete a group together with every edge, membership and closure row
    /// referencing it
    async fn delete_group(&self, id: GroupId) -> Result<()>;

    /// Register an eperson; email and netid must be unique
    async fn create_eperson(&self, person: NewEPerson) -> Result<EPerson>;

    /// Get an eperson by ID
    async fn get_eperson(&self, id: EPersonId) -> Result<Option<EPerson>>;

    /// Find an eperson by email (case-insensitive)
    async fn find_eperson_by_email(&self, email: &str) -> Result<Option<EPerson>>;

    /// Find an eperson by netid
    async fn find_eperson_by_netid(&self, netid: &str) -> Result<Option<EPerson>>;

    /// All committed group edges
    async fn edges(&self) -> Result<Vec<GroupEdge>>;

    /// All committed direct memberships
    async fn memberships(&self) -> Result<Vec<MembershipRow>>;

    /// All closure entries as of the last rebuild
    async fn closure(&self) -> Result<Vec<ClosureEntry>>;

    /// Apply a change set to the edge and membership relations in one unit
    async fn apply_changes(&self, changes: &ChangeSet) -> Result<()>;

    /// Recompute the closure relation from the committed edges and replace it
    ///
    /// The edge read, `compute` and the replacement happen under one lock, so
    /// concurrent rebuilds cannot overwrite a newer closure with an older one.
    async fn rebuild_closure(&self, compute: ClosureFn) -> Result<ClosureRebuild>;

    /// Direct child groups of a group
    async fn direct_children(&self, group: GroupId) -> Result<Vec<GroupId>>;

    /// Whether `eperson` is a direct member of `group`
    async fn is_direct_member(&self, group: GroupId, eperson: EPersonId) -> Result<bool>;

    /// Groups the eperson is directly a member of
    async fn direct_groups_of(&self, eperson: EPersonId) -> Result<Vec<GroupId>>;

    /// Direct members of any of the given groups (deduplicated)
    async fn direct_members_of(&self, groups: &[GroupId]) -> Result<Vec<EPersonId>>;

    /// Closure descendants of a group
    async fn closure_descendants(&self, group: GroupId) -> Result<Vec<GroupId>>;

    /// Closure ancestors of any of the given groups (deduplicated)
    async fn closure_ancestors(&self, groups: &[GroupId]) -> Result<Vec<GroupId>>;
}

/// Snapshot of every relation held by [`InMemoryGroupStore`]
#[derive(Debug, Clone)]
struct StoreState {
    next_group_id: i32,
    next_eperson_id: i32,
    groups: BTreeMap<GroupId, Group>,
    epersons: BTreeMap<EPersonId, EPerson>,
    edges: BTreeSet<GroupEdge>,
    memberships: BTreeSet<MembershipRow>,
    closure: BTreeSet<ClosureEntry>,
}

impl StoreState {
    fn seeded() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(
            GroupId::ANONYMOUS,
            Group::new(GroupId::ANONYMOUS, ANONYMOUS_GROUP_NAME),
        );
        groups.insert(
            GroupId::ADMINISTRATOR,
            Group::new(GroupId::ADMINISTRATOR, ADMINISTRATOR_GROUP_NAME),
        );

        Self {
            next_group_id: 2,
            next_eperson_id: 1,
            groups,
            epersons: BTreeMap::new(),
            edges: BTreeSet::new(),
            memberships: BTreeSet::new(),
            closure: BTreeSet::new(),
        }
    }

    fn check_group(&self, id: GroupId) -> Result<()> {
        if self.groups.contains_key(&id) {
            Ok(())
        } else {
            Err(GroupError::InvalidArgument(format!("Unresolved group: {}", id)))
        }
    }

    fn check_eperson(&self, id: EPersonId) -> Result<()> {
        if self.epersons.contains_key(&id) {
            Ok(())
        } else {
            Err(GroupError::InvalidArgument(format!("Unresolved eperson: {}", id)))
        }
    }
}

/// In-memory group store
///
/// All relations sit behind one lock, so every write is atomic with respect
/// to readers. Writes validate everything before touching state.
pub struct InMemoryGroupStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryGroupStore {
    /// Create a store seeded with the anonymous and administrator groups
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::seeded())),
        }
    }
}

#[cfg(test)]
impl InMemoryGroupStore {
    /// Overwrite the closure relation without looking at the edges
    pub(crate) async fn seed_closure(&self, entries: &[ClosureEntry]) {
        self.state.write().await.closure = entries.iter().copied().collect();
    }
}

impl Default for InMemoryGroupStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GroupStore for InMemoryGroupStore {
    async fn create_group(&self, name: &str) -> Result<Group> {
        let mut state = self.state.write().await;

        if state.groups.values().any(|g| g.name == name) {
            return Err(GroupError::InvalidArgument(format!(
                "Group name already in use: {}",
                name
            )));
        }

        let id = GroupId(state.next_group_id);
        state.next_group_id += 1;

        let group = Group::new(id, name);
        state.groups.insert(id, group.clone());
        Ok(group)
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        let state = self.state.read().await;
        Ok(state.groups.get(&id).cloned())
    }

    async fn find_group_by_name(&self, name: &str) -> Result<Option<Group>> {
        let state = self.state.read().await;
        Ok(state.groups.values().find(|g| g.name == name).cloned())
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        let state = self.state.read().await;
        Ok(state.groups.values().cloned().collect())
    }

    async fn delete_group(&self, id: GroupId) -> Result<()> {
        let mut state = self.state.write().await;

        if state.groups.remove(&id).is_none() {
            return Err(GroupError::GroupNotFound(id));
        }

        state.edges.retain(|e| e.parent != id && e.child != id);
        state.memberships.retain(|m| m.group != id);
        state.closure.retain(|c| c.parent != id && c.child != id);
        Ok(())
    }

    async fn create_eperson(&self, person: NewEPerson) -> Result<EPerson> {
        let mut state = self.state.write().await;
        let email = person.normalized_email();

        if email.is_empty() {
            return Err(GroupError::InvalidArgument("EPerson email cannot be empty".to_string()));
        }
        if state.epersons.values().any(|p| p.email == email) {
            return Err(GroupError::InvalidArgument(format!("Email already in use: {}", email)));
        }
        if let Some(netid) = &person.netid {
            if state.epersons.values().any(|p| p.netid.as_ref() == Some(netid)) {
                return Err(GroupError::InvalidArgument(format!("Netid already in use: {}", netid)));
            }
        }

        let id = EPersonId(state.next_eperson_id);
        state.next_eperson_id += 1;

        let eperson = EPerson {
            id,
            email,
            netid: person.netid,
            can_login: person.can_login,
        };
        state.epersons.insert(id, eperson.clone());
        Ok(eperson)
    }

    async fn get_eperson(&self, id: EPersonId) -> Result<Option<EPerson>> {
        let state = self.state.read().await;
        Ok(state.epersons.get(&id).cloned())
    }

    async fn find_eperson_by_email(&self, email: &str) -> Result<Option<EPerson>> {
        let email = email.trim().to_lowercase();
        let state = self.state.read().await;
        Ok(state.epersons.values().find(|p| p.email == email).cloned())
    }

    async fn find_eperson_by_netid(&self, netid: &str) -> Result<Option<EPerson>> {
        let state = self.state.read().await;
        Ok(state
            .epersons
            .values()
            .find(|p| p.netid.as_deref() == Some(netid))
            .cloned())
    }

    async fn edges(&self) -> Result<Vec<GroupEdge>> {
        let state = self.state.read().await;
        Ok(state.edges.iter().copied().collect())
    }

    async fn memberships(&self) -> Result<Vec<MembershipRow>> {
        let state = self.state.read().await;
        Ok(state.memberships.iter().copied().collect())
    }

    async fn closure(&self) -> Result<Vec<ClosureEntry>> {
        let state = self.state.read().await;
        Ok(state.closure.iter().copied().collect())
    }

    async fn apply_changes(&self, changes: &ChangeSet) -> Result<()> {
        let mut state = self.state.write().await;

        // Referential checks first so a rejected change set leaves no trace
        for edge in &changes.edges_added {
            state.check_group(edge.parent)?;
            state.check_group(edge.child)?;
            if edge.parent == edge.child {
                return Err(GroupError::InvalidArgument(format!(
                    "Group cannot contain itself: {}",
                    edge.parent
                )));
            }
        }
        for row in &changes.members_added {
            state.check_group(row.group)?;
            state.check_eperson(row.eperson)?;
        }

        for edge in &changes.edges_removed {
            state.edges.remove(edge);
        }
        state.edges.extend(changes.edges_added.iter().copied());

        for row in &changes.members_removed {
            state.memberships.remove(row);
        }
        state.memberships.extend(changes.members_added.iter().copied());

        Ok(())
    }

    async fn rebuild_closure(&self, compute: ClosureFn) -> Result<ClosureRebuild> {
        let mut state = self.state.write().await;

        let edges: Vec<GroupEdge> = state.edges.iter().copied().collect();
        let closure: BTreeSet<ClosureEntry> = compute(&edges).into_iter().collect();

        let rebuild = ClosureRebuild {
            edge_count: edges.len(),
            entry_count: closure.len(),
        };
        state.closure = closure;
        Ok(rebuild)
    }

    async fn direct_children(&self, group: GroupId) -> Result<Vec<GroupId>> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .iter()
            .filter(|e| e.parent == group)
            .map(|e| e.child)
            .collect())
    }

    async fn is_direct_member(&self, group: GroupId, eperson: EPersonId) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.memberships.contains(&MembershipRow { group, eperson }))
    }

    async fn direct_groups_of(&self, eperson: EPersonId) -> Result<Vec<GroupId>> {
        let state = self.state.read().await;
        Ok(state
            .memberships
            .iter()
            .filter(|m| m.eperson == eperson)
            .map(|m| m.group)
            .collect())
    }

    async fn direct_members_of(&self, groups: &[GroupId]) -> Result<Vec<EPersonId>> {
        let wanted: BTreeSet<GroupId> = groups.iter().copied().collect();
        let state = self.state.read().await;

        let members: BTreeSet<EPersonId> = state
            .memberships
            .iter()
            .filter(|m| wanted.contains(&m.group))
            .map(|m| m.eperson)
            .collect();
        Ok(members.into_iter().collect())
    }

    async fn closure_descendants(&self, group: GroupId) -> Result<Vec<GroupId>> {
        let state = self.state.read().await;
        Ok(state
            .closure
            .iter()
            .filter(|c| c.parent == group)
            .map(|c| c.child)
            .collect())
    }

    async fn closure_ancestors(&self, groups: &[GroupId]) -> Result<Vec<GroupId>> {
        let wanted: BTreeSet<GroupId> = groups.iter().copied().collect();
        let state = self.state.read().await;

        let ancestors: BTreeSet<GroupId> = state
            .closure
            .iter()
            .filter(|c| wanted.contains(&c.child))
            .map(|c| c.parent)
            .collect();
        Ok(ancestors.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_is_seeded_with_system_groups() {
        let store = InMemoryGroupStore::new();

        let groups = store.list_groups().await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(
            store.find_group_by_name("Anonymous").await.unwrap().map(|g| g.id),
            Some(GroupId::ANONYMOUS)
        );

        let created = store.create_group("Reviewers").await.unwrap();
        assert_eq!(created.id, GroupId(2));
    }

    #[tokio::test]
    async fn test_group_names_are_unique() {
        let store = InMemoryGroupStore::new();
        store.create_group("Reviewers").await.unwrap();

        let result = store.create_group("Reviewers").await;
        assert!(matches!(result, Err(GroupError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_eperson_uniqueness() {
        let store = InMemoryGroupStore::new();
        let alice = store
            .create_eperson(NewEPerson::new("Alice@example.org").with_netid("alice"))
            .await
            .unwrap();
        assert_eq!(alice.email, "alice@example.org");

        let same_email = store.create_eperson(NewEPerson::new("ALICE@example.org")).await;
        assert!(matches!(same_email, Err(GroupError::InvalidArgument(_))));

        let same_netid = store
            .create_eperson(NewEPerson::new("other@example.org").with_netid("alice"))
            .await;
        assert!(same_netid.is_err());

        let found = store.find_eperson_by_email(" alice@EXAMPLE.org").await.unwrap();
        assert_eq!(found.map(|p| p.id), Some(alice.id));
        let by_netid = store.find_eperson_by_netid("alice").await.unwrap();
        assert_eq!(by_netid.map(|p| p.id), Some(alice.id));
    }

    #[tokio::test]
    async fn test_apply_changes_rejects_whole_set_on_bad_reference() {
        let store = InMemoryGroupStore::new();
        let a = store.create_group("A").await.unwrap();
        let b = store.create_group("B").await.unwrap();

        let mut changes = ChangeSet::new();
        changes.add_edge(GroupEdge::new(a.id, b.id));
        changes.add_edge(GroupEdge::new(a.id, GroupId(99)));

        let result = store.apply_changes(&changes).await;
        assert!(matches!(result, Err(GroupError::InvalidArgument(_))));
        assert!(store.edges().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_group_removes_references() {
        let store = InMemoryGroupStore::new();
        let a = store.create_group("A").await.unwrap();
        let b = store.create_group("B").await.unwrap();
        let c = store.create_group("C").await.unwrap();
        let alice = store.create_eperson(NewEPerson::new("alice@example.org")).await.unwrap();

        let mut changes = ChangeSet::new();
        changes.add_edge(GroupEdge::new(a.id, b.id));
        changes.add_edge(GroupEdge::new(b.id, c.id));
        changes.add_member(MembershipRow::new(b.id, alice.id));
        store.apply_changes(&changes).await.unwrap();
        store
            .seed_closure(&[ClosureEntry::new(a.id, b.id), ClosureEntry::new(b.id, c.id)])
            .await;

        store.delete_group(b.id).await.unwrap();

        assert!(store.get_group(b.id).await.unwrap().is_none());
        assert!(store.edges().await.unwrap().is_empty());
        assert!(store.memberships().await.unwrap().is_empty());
        assert!(store.closure().await.unwrap().is_empty());

        let missing = store.delete_group(b.id).await;
        assert!(matches!(missing, Err(GroupError::GroupNotFound(_))));
    }

    #[tokio::test]
    async fn test_closure_queries() {
        let store = InMemoryGroupStore::new();
        store
            .seed_closure(&[
                ClosureEntry::new(1, 2),
                ClosureEntry::new(1, 3),
                ClosureEntry::new(2, 3),
            ])
            .await;

        let mut descendants = store.closure_descendants(GroupId(1)).await.unwrap();
        descendants.sort();
        assert_eq!(descendants, vec![GroupId(2), GroupId(3)]);

        let ancestors = store.closure_ancestors(&[GroupId(3)]).await.unwrap();
        assert_eq!(ancestors, vec![GroupId(1), GroupId(2)]);
    }
}
