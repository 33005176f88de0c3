//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use groupcache_authz::{
    ChangeSet, ClosureEntry, ClosureFn, ClosureRebuild, EPerson, EPersonId, Group, GroupEdge,
    GroupError, GroupId, GroupStore, InMemoryGroupStore, MembershipRow, NewEPerson, Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Install a tracing subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory store whose writes can be made to fail or wait on demand
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryGroupStore,
    fail_rebuild_closure: AtomicBool,
    fail_apply_changes: AtomicBool,
    hold_rebuilds: AtomicBool,
    rebuild_entered: Notify,
    rebuild_released: Notify,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_closure_writes(&self, fail: bool) {
        self.fail_rebuild_closure.store(fail, Ordering::SeqCst);
    }

    /// Park every closure rebuild before it touches the store
    pub fn hold_rebuilds(&self, hold: bool) {
        self.hold_rebuilds.store(hold, Ordering::SeqCst);
    }

    /// Wait until a rebuild is parked
    pub async fn wait_for_held_rebuild(&self) {
        self.rebuild_entered.notified().await;
    }

    /// Let one parked rebuild continue
    pub fn release_rebuild(&self) {
        self.rebuild_released.notify_one();
    }

    pub fn fail_change_writes(&self, fail: bool) {
        self.fail_apply_changes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl GroupStore for FlakyStore {
    async fn create_group(&self, name: &str) -> Result<Group> {
        self.inner.create_group(name).await
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        self.inner.get_group(id).await
    }

    async fn find_group_by_name(&self, name: &str) -> Result<Option<Group>> {
        self.inner.find_group_by_name(name).await
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        self.inner.list_groups().await
    }

    async fn delete_group(&self, id: GroupId) -> Result<()> {
        self.inner.delete_group(id).await
    }

    async fn create_eperson(&self, person: NewEPerson) -> Result<EPerson> {
        self.inner.create_eperson(person).await
    }

    async fn get_eperson(&self, id: EPersonId) -> Result<Option<EPerson>> {
        self.inner.get_eperson(id).await
    }

    async fn find_eperson_by_email(&self, email: &str) -> Result<Option<EPerson>> {
        self.inner.find_eperson_by_email(email).await
    }

    async fn find_eperson_by_netid(&self, netid: &str) -> Result<Option<EPerson>> {
        self.inner.find_eperson_by_netid(netid).await
    }

    async fn edges(&self) -> Result<Vec<GroupEdge>> {
        self.inner.edges().await
    }

    async fn memberships(&self) -> Result<Vec<MembershipRow>> {
        self.inner.memberships().await
    }

    async fn closure(&self) -> Result<Vec<ClosureEntry>> {
        self.inner.closure().await
    }

    async fn apply_changes(&self, changes: &ChangeSet) -> Result<()> {
        if self.fail_apply_changes.load(Ordering::SeqCst) {
            return Err(GroupError::StorageFailure("injected apply_changes failure".to_string()));
        }
        self.inner.apply_changes(changes).await
    }

    async fn rebuild_closure(&self, compute: ClosureFn) -> Result<ClosureRebuild> {
        if self.hold_rebuilds.load(Ordering::SeqCst) {
            self.rebuild_entered.notify_one();
            self.rebuild_released.notified().await;
        }
        if self.fail_rebuild_closure.load(Ordering::SeqCst) {
            return Err(GroupError::StorageFailure("injected statement timeout".to_string()));
        }
        self.inner.rebuild_closure(compute).await
    }

    async fn direct_children(&self, group: GroupId) -> Result<Vec<GroupId>> {
        self.inner.direct_children(group).await
    }

    async fn is_direct_member(&self, group: GroupId, eperson: EPersonId) -> Result<bool> {
        self.inner.is_direct_member(group, eperson).await
    }

    async fn direct_groups_of(&self, eperson: EPersonId) -> Result<Vec<GroupId>> {
        self.inner.direct_groups_of(eperson).await
    }

    async fn direct_members_of(&self, groups: &[GroupId]) -> Result<Vec<EPersonId>> {
        self.inner.direct_members_of(groups).await
    }

    async fn closure_descendants(&self, group: GroupId) -> Result<Vec<GroupId>> {
        self.inner.closure_descendants(group).await
    }

    async fn closure_ancestors(&self, groups: &[GroupId]) -> Result<Vec<GroupId>> {
        self.inner.closure_ancestors(groups).await
    }
}

/// Create groups named `names` in order, returning their ids
pub async fn create_groups(store: &dyn GroupStore, names: &[&str]) -> Vec<GroupId> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        ids.push(store.create_group(name).await.unwrap().id);
    }
    ids
}
