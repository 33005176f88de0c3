//! Membership queries for access-control checks
//!
//! Transitive membership is answered from direct membership rows joined
//! against the closure table, so results are only as fresh as the last
//! closure rebuild.

use crate::error::Result;
use crate::store::GroupStore;
use crate::types::{EPersonId, Group, GroupId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Answers "is E a member of G" style questions
///
/// An `eperson` of `None` stands for an unauthenticated principal, which is
/// only ever a member of the anonymous group.
#[derive(Clone)]
pub struct MembershipResolver {
    store: Arc<dyn GroupStore>,
}

impl MembershipResolver {
    pub fn new(store: Arc<dyn GroupStore>) -> Self {
        Self { store }
    }

    /// Direct membership; the anonymous group contains everyone
    pub async fn is_direct_member(&self, group: GroupId, eperson: Option<EPersonId>) -> Result<bool> {
        if group.is_anonymous() {
            return Ok(true);
        }
        match eperson {
            Some(eperson) => self.store.is_direct_member(group, eperson).await,
            None => Ok(false),
        }
    }

    /// Direct membership in `group` or in any closure descendant of `group`
    pub async fn is_member(&self, group: GroupId, eperson: Option<EPersonId>) -> Result<bool> {
        if self.is_direct_member(group, eperson).await? {
            return Ok(true);
        }
        let Some(eperson) = eperson else {
            return Ok(false);
        };

        let direct: BTreeSet<GroupId> = self.store.direct_groups_of(eperson).await?.into_iter().collect();
        if direct.is_empty() {
            return Ok(false);
        }

        let descendants = self.store.closure_descendants(group).await?;
        let member = descendants.iter().any(|d| direct.contains(d));

        debug!("Membership check: {} in {} -> {}", eperson, group, member);
        Ok(member)
    }

    /// Every group the eperson effectively belongs to: direct groups plus
    /// all of their closure ancestors
    ///
    /// The anonymous group is implicit and not listed unless the eperson was
    /// added to it explicitly.
    pub async fn all_member_group_ids(&self, eperson: EPersonId) -> Result<BTreeSet<GroupId>> {
        let direct = self.store.direct_groups_of(eperson).await?;
        if direct.is_empty() {
            return Ok(BTreeSet::new());
        }

        let ancestors = self.store.closure_ancestors(&direct).await?;

        let mut groups: BTreeSet<GroupId> = direct.into_iter().collect();
        groups.extend(ancestors);
        Ok(groups)
    }

    /// Like [`all_member_group_ids`](Self::all_member_group_ids), resolved
    /// to group records
    pub async fn all_member_groups(&self, eperson: EPersonId) -> Result<Vec<Group>> {
        let ids = self.all_member_group_ids(eperson).await?;

        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(group) = self.store.get_group(id).await? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    /// Direct members of `group` and of every closure descendant
    pub async fn all_member_eperson_ids(&self, group: GroupId) -> Result<BTreeSet<EPersonId>> {
        let mut groups = self.store.closure_descendants(group).await?;
        groups.push(group);

        let members = self.store.direct_members_of(&groups).await?;
        Ok(members.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGroupStore;
    use crate::types::{ChangeSet, ClosureEntry, MembershipRow, NewEPerson};

    /// Diamond 1 -> {2, 3} -> 4 with its closure already materialized
    async fn diamond_store() -> Arc<InMemoryGroupStore> {
        let store = Arc::new(InMemoryGroupStore::new());
        // Ids 2..=4 are handed out in order; 1 is the seeded administrator group
        for name in ["two", "three", "four"] {
            store.create_group(name).await.unwrap();
        }
        store
            .seed_closure(&[
                ClosureEntry::new(1, 2),
                ClosureEntry::new(1, 3),
                ClosureEntry::new(1, 4),
                ClosureEntry::new(2, 4),
                ClosureEntry::new(3, 4),
            ])
            .await;
        store
    }

    async fn add_person(store: &InMemoryGroupStore, email: &str, groups: &[i32]) -> EPersonId {
        let person = store
            .create_eperson(NewEPerson::new(email))
            .await
            .unwrap();
        let mut changes = ChangeSet::new();
        for &g in groups {
            changes.add_member(MembershipRow::new(g, person.id));
        }
        store.apply_changes(&changes).await.unwrap();
        person.id
    }

    #[tokio::test]
    async fn test_anonymous_contains_everyone() {
        let store = Arc::new(InMemoryGroupStore::new());
        let resolver = MembershipResolver::new(store);

        assert!(resolver.is_direct_member(GroupId::ANONYMOUS, None).await.unwrap());
        assert!(resolver
            .is_direct_member(GroupId::ANONYMOUS, Some(EPersonId(12345)))
            .await
            .unwrap());
        assert!(resolver.is_member(GroupId::ANONYMOUS, None).await.unwrap());
        assert!(!resolver.is_member(GroupId::ADMINISTRATOR, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_transitive_membership_in_diamond() {
        let store = diamond_store().await;
        let person = add_person(&store, "leaf@example.org", &[4]).await;
        let resolver = MembershipResolver::new(store);

        for group in [1, 2, 3, 4] {
            assert!(
                resolver.is_member(GroupId(group), Some(person)).await.unwrap(),
                "expected membership in group {}",
                group
            );
        }
        assert!(!resolver.is_direct_member(GroupId(1), Some(person)).await.unwrap());

        let groups = resolver.all_member_group_ids(person).await.unwrap();
        assert_eq!(groups, BTreeSet::from([GroupId(1), GroupId(2), GroupId(3), GroupId(4)]));
    }

    #[tokio::test]
    async fn test_member_group_ids_are_deduplicated() {
        let store = diamond_store().await;
        let person = add_person(&store, "both@example.org", &[2, 3]).await;
        let resolver = MembershipResolver::new(store);

        let groups = resolver.all_member_group_ids(person).await.unwrap();
        assert_eq!(groups, BTreeSet::from([GroupId(1), GroupId(2), GroupId(3)]));

        let records = resolver.all_member_groups(person).await.unwrap();
        let names: Vec<&str> = records.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Administrator", "two", "three"]);
    }

    #[tokio::test]
    async fn test_all_member_eperson_ids() {
        let store = diamond_store().await;
        let leaf = add_person(&store, "leaf@example.org", &[4]).await;
        let middle = add_person(&store, "middle@example.org", &[2, 4]).await;
        let resolver = MembershipResolver::new(store.clone());

        assert_eq!(
            resolver.all_member_eperson_ids(GroupId(1)).await.unwrap(),
            BTreeSet::from([leaf, middle])
        );
        assert_eq!(
            resolver.all_member_eperson_ids(GroupId(3)).await.unwrap(),
            BTreeSet::from([leaf, middle])
        );
        assert_eq!(
            resolver.all_member_eperson_ids(GroupId(2)).await.unwrap(),
            BTreeSet::from([leaf, middle])
        );

        let unrelated = add_person(&store, "unrelated@example.org", &[]).await;
        assert!(!resolver.is_member(GroupId(1), Some(unrelated)).await.unwrap());
        assert!(resolver.all_member_group_ids(unrelated).await.unwrap().is_empty());
    }
}
