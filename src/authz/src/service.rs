//! Group service: the entry point used by access-control checks
//!
//! Orchestrates the group graph unit of work, closure rebuilds and
//! membership queries over one shared store.
//!
//! ```text
//! add/remove ──► GroupGraph (pending) ──update()──► GroupStore
//!                                          │
//!                          groups changed? └──► ClosureCache::rebuild
//!
//! is_member / all_member_* ──► MembershipResolver ──► GroupStore
//! ```

use crate::closure::{ClosureCache, ClosureStats};
use crate::config::{GroupsConfig, RebuildMode};
use crate::error::{GroupError, Result};
use crate::graph::{FlushOutcome, GroupGraph};
use crate::resolver::MembershipResolver;
use crate::store::{GroupStore, InMemoryGroupStore};
use crate::types::{EPerson, EPersonId, Group, GroupId, NewEPerson};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[cfg(feature = "postgres")]
use crate::store::PostgresGroupStore;

/// Group membership service
///
/// # Staleness
///
/// Membership queries read the closure as of the last successful rebuild.
/// With [`RebuildMode::OnUpdate`] every [`update`](Self::update) that changes
/// child groups rebuilds before returning. With [`RebuildMode::Manual`] the
/// caller must call [`rebuild_closure`](Self::rebuild_closure).
pub struct GroupService {
    store: Arc<dyn GroupStore>,

    /// Unit of work for edge and membership mutations
    graph: Mutex<GroupGraph>,

    closure: ClosureCache,

    resolver: MembershipResolver,

    /// Bumped after every commit that changes child-group edges
    edge_generation: AtomicU64,

    /// Edge generation the current closure is known to cover
    closure_generation: AtomicU64,

    config: GroupsConfig,
}

impl GroupService {
    /// Create a service over an existing store
    pub fn new(store: Arc<dyn GroupStore>, config: GroupsConfig) -> Self {
        info!("GroupService initialized with rebuild_mode={:?}", config.rebuild_mode);

        Self {
            graph: Mutex::new(GroupGraph::new(store.clone())),
            closure: ClosureCache::new(store.clone()),
            resolver: MembershipResolver::new(store.clone()),
            store,
            edge_generation: AtomicU64::new(0),
            closure_generation: AtomicU64::new(0),
            config,
        }
    }

    /// Build a service over the store selected by `config`
    ///
    /// A database URL selects PostgreSQL (migrations are run); otherwise an
    /// in-memory store is used.
    pub async fn from_config(config: GroupsConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn GroupStore> = match &config.database_url {
            #[cfg(feature = "postgres")]
            Some(_) => {
                let store = PostgresGroupStore::connect(&config).await?;
                store.run_migrations().await?;
                Arc::new(store)
            }
            #[cfg(not(feature = "postgres"))]
            Some(_) => {
                return Err(GroupError::Config(
                    "GROUPS_DATABASE_URL set but built without the postgres feature".to_string(),
                ))
            }
            None => Arc::new(InMemoryGroupStore::new()),
        };

        Ok(Self::new(store, config))
    }

    /// Active configuration
    pub fn config(&self) -> &GroupsConfig {
        &self.config
    }

    /// Membership resolver sharing this service's store
    pub fn resolver(&self) -> &MembershipResolver {
        &self.resolver
    }

    // Groups

    /// Create a group; the trimmed name must be non-empty and unused
    pub async fn create_group(&self, name: &str) -> Result<Group> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GroupError::InvalidArgument("Group name cannot be empty".to_string()));
        }

        let group = self.store.create_group(name).await?;
        debug!("Created group {} ({})", group.id, group.name);
        Ok(group)
    }

    /// Look up a group by ID
    pub async fn find_group(&self, id: GroupId) -> Result<Option<Group>> {
        self.store.get_group(id).await
    }

    /// Look up a group by exact name
    pub async fn find_group_by_name(&self, name: &str) -> Result<Option<Group>> {
        self.store.find_group_by_name(name).await
    }

    /// All groups, including the seeded system groups, ordered by ID
    pub async fn list_groups(&self) -> Result<Vec<Group>> {
        self.store.list_groups().await
    }

    /// Delete a group and every edge and membership referencing it
    ///
    /// The anonymous and administrator groups cannot be deleted.
    pub async fn delete_group(&self, id: GroupId) -> Result<()> {
        if id.is_system() {
            return Err(GroupError::InvalidArgument(format!(
                "System group cannot be deleted: {}",
                id
            )));
        }

        let mut graph = self.graph.lock().await;
        let had_edges = self
            .store
            .edges()
            .await?
            .iter()
            .any(|e| e.parent == id || e.child == id);

        self.store.delete_group(id).await?;
        graph.forget_group(id);

        info!("Deleted group {}", id);

        // Closure pairs that passed through the group survive the row cleanup
        if had_edges {
            self.edge_generation.fetch_add(1, Ordering::SeqCst);
        }
        self.rebuild_if_configured().await?;
        Ok(())
    }

    /// Direct child groups
    pub async fn direct_child_groups(&self, id: GroupId) -> Result<Vec<GroupId>> {
        self.require_group(id).await?;
        self.store.direct_children(id).await
    }

    /// Direct eperson members
    pub async fn direct_members(&self, id: GroupId) -> Result<Vec<EPersonId>> {
        self.require_group(id).await?;
        self.store.direct_members_of(&[id]).await
    }

    /// Whether the group has neither members nor child groups
    pub async fn is_empty(&self, id: GroupId) -> Result<bool> {
        Ok(self.direct_members(id).await?.is_empty()
            && self.store.direct_children(id).await?.is_empty())
    }

    /// Groups the eperson is directly a member of
    pub async fn direct_groups_of(&self, eperson: EPersonId) -> Result<Vec<GroupId>> {
        if self.store.get_eperson(eperson).await?.is_none() {
            return Err(GroupError::EPersonNotFound(eperson));
        }
        self.store.direct_groups_of(eperson).await
    }

    // EPersons

    /// Register an eperson
    ///
    /// Email is compared case-insensitively; email and netid must be unused.
    pub async fn create_eperson(&self, person: NewEPerson) -> Result<EPerson> {
        self.store.create_eperson(person).await
    }

    /// Look up an eperson by ID
    pub async fn find_eperson(&self, id: EPersonId) -> Result<Option<EPerson>> {
        self.store.get_eperson(id).await
    }

    /// Look up an eperson by email, ignoring case
    pub async fn find_eperson_by_email(&self, email: &str) -> Result<Option<EPerson>> {
        self.store.find_eperson_by_email(email).await
    }

    /// Look up an eperson by netid
    pub async fn find_eperson_by_netid(&self, netid: &str) -> Result<Option<EPerson>> {
        self.store.find_eperson_by_netid(netid).await
    }

    // Mutations

    /// Stage `child` as a direct subgroup of `parent` until [`update`](Self::update)
    pub async fn add_child_group(&self, parent: GroupId, child: GroupId) -> Result<()> {
        self.graph.lock().await.add_child_group(parent, child).await
    }

    /// Stage removal of a direct subgroup edge; absent edges are a no-op
    pub async fn remove_child_group(&self, parent: GroupId, child: GroupId) -> Result<()> {
        self.graph.lock().await.remove_child_group(parent, child).await
    }

    /// Stage a direct membership until [`update`](Self::update)
    pub async fn add_member(&self, group: GroupId, eperson: EPersonId) -> Result<()> {
        self.graph.lock().await.add_member(group, eperson).await
    }

    /// Stage removal of a direct membership; absent rows are a no-op
    pub async fn remove_member(&self, group: GroupId, eperson: EPersonId) -> Result<()> {
        self.graph.lock().await.remove_member(group, eperson).await
    }

    /// Whether mutations are waiting for [`update`](Self::update)
    pub async fn has_pending_changes(&self) -> bool {
        self.graph.lock().await.is_dirty()
    }

    /// Drop mutations not yet written
    pub async fn discard_pending(&self) {
        self.graph.lock().await.discard();
    }

    /// Persist pending mutations, rebuilding the closure when child groups
    /// changed and the rebuild mode is [`RebuildMode::OnUpdate`]
    ///
    /// If the flush succeeds but the rebuild fails, the edges stay committed,
    /// the previous closure stays in place and the error is returned; the
    /// next `update` or [`rebuild_closure`](Self::rebuild_closure) retries.
    pub async fn update(&self) -> Result<FlushOutcome> {
        let mut graph = self.graph.lock().await;
        let outcome = graph.flush().await?;

        if outcome.groups_changed {
            self.edge_generation.fetch_add(1, Ordering::SeqCst);
        }
        self.rebuild_if_configured().await?;

        Ok(outcome)
    }

    /// Rebuild the closure now, regardless of rebuild mode
    ///
    /// Returns the number of closure entries written. Edge commits that land
    /// while the rebuild runs keep the closure marked stale.
    pub async fn rebuild_closure(&self) -> Result<usize> {
        // Generations are bumped after their commit, so everything counted
        // here is visible to the rebuild's edge read
        let covered = self.edge_generation.load(Ordering::SeqCst);
        let written = self.closure.rebuild().await?;
        self.closure_generation.fetch_max(covered, Ordering::SeqCst);
        Ok(written)
    }

    /// Whether committed edges may not be reflected in the closure
    pub fn is_closure_stale(&self) -> bool {
        self.closure_generation.load(Ordering::SeqCst) < self.edge_generation.load(Ordering::SeqCst)
    }

    /// Rebuild counters and timings
    pub async fn closure_stats(&self) -> ClosureStats {
        self.closure.stats().await
    }

    // Queries

    /// Direct membership; everyone, including `None`, is in the anonymous group
    pub async fn is_direct_member(&self, group: GroupId, eperson: Option<EPersonId>) -> Result<bool> {
        self.resolver.is_direct_member(group, eperson).await
    }

    /// Direct or transitive membership as of the last closure rebuild
    pub async fn is_member(&self, group: GroupId, eperson: Option<EPersonId>) -> Result<bool> {
        self.resolver.is_member(group, eperson).await
    }

    /// Every group the eperson belongs to directly or through nesting
    pub async fn all_member_group_ids(&self, eperson: EPersonId) -> Result<BTreeSet<GroupId>> {
        self.resolver.all_member_group_ids(eperson).await
    }

    /// Group records for [`all_member_group_ids`](Self::all_member_group_ids)
    pub async fn all_member_groups(&self, eperson: EPersonId) -> Result<Vec<Group>> {
        self.resolver.all_member_groups(eperson).await
    }

    /// Every eperson in `group` directly or through a nested group
    pub async fn all_member_eperson_ids(&self, group: GroupId) -> Result<BTreeSet<EPersonId>> {
        self.resolver.all_member_eperson_ids(group).await
    }

    async fn rebuild_if_configured(&self) -> Result<()> {
        if !self.is_closure_stale() {
            return Ok(());
        }
        match self.config.rebuild_mode {
            RebuildMode::OnUpdate => {
                self.rebuild_closure().await?;
            }
            RebuildMode::Manual => {
                warn!("Group closure is stale; rebuild_mode=manual, waiting for rebuild_closure()");
            }
        }
        Ok(())
    }

    async fn require_group(&self, id: GroupId) -> Result<Group> {
        self.store
            .get_group(id)
            .await?
            .ok_or(GroupError::GroupNotFound(id))
    }
}
