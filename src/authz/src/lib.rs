//! # Group Membership Closure Engine
//!
//! Answers "is e-person E a member of group G?" for nested, possibly cyclic
//! group hierarchies.
//!
//! ## Features
//!
//! - **Materialized closure** of the group-in-group graph, rebuilt atomically
//! - **Cycle tolerant** iterative traversal with a per-root visited set
//! - **Unit of work** for edge and membership mutations
//! - **Async-first design** using Tokio runtime
//! - **PostgreSQL storage** via sqlx, or an in-memory store for tests
//!
//! ## Example
//!
//! ```rust
//! use groupcache_authz::{GroupService, GroupsConfig, NewEPerson};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let groups = GroupService::from_config(GroupsConfig::default()).await?;
//!
//!     let staff = groups.create_group("Staff").await?;
//!     let editors = groups.create_group("Editors").await?;
//!     let alice = groups.create_eperson(NewEPerson::new("alice@example.org")).await?;
//!
//!     groups.add_child_group(staff.id, editors.id).await?;
//!     groups.add_member(editors.id, alice.id).await?;
//!     groups.update().await?;
//!
//!     if groups.is_member(staff.id, Some(alice.id)).await? {
//!         println!("Alice is staff");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod store;
pub mod graph;
pub mod closure;  // Transitive closure computation and cache
pub mod resolver;
pub mod service;

// Re-export commonly used types
pub use types::{
    ChangeSet, ClosureEntry, EPerson, EPersonId, Group, GroupEdge, GroupId,
    MembershipRow, NewEPerson,
};
pub use error::{GroupError, Result};
pub use config::{GroupsConfig, RebuildMode};
pub use store::{ClosureFn, ClosureRebuild, GroupStore, InMemoryGroupStore};
#[cfg(feature = "postgres")]
pub use store::PostgresGroupStore;
pub use graph::{FlushOutcome, GroupGraph};
pub use closure::{compute_closure, ClosureCache, ClosureStats};
pub use resolver::MembershipResolver;
pub use service::GroupService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
