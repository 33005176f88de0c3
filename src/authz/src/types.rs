//! Core group and eperson types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Group identifier, stable for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i32);

impl GroupId {
    /// The group every principal belongs to, authenticated or not
    pub const ANONYMOUS: GroupId = GroupId(0);

    /// The repository administrators group
    pub const ADMINISTRATOR: GroupId = GroupId(1);

    /// Whether this is the anonymous group
    pub fn is_anonymous(self) -> bool {
        self == Self::ANONYMOUS
    }

    /// Whether the group is one of the seeded system groups
    pub fn is_system(self) -> bool {
        self == Self::ANONYMOUS || self == Self::ADMINISTRATOR
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group:{}", self.0)
    }
}

impl From<i32> for GroupId {
    fn from(id: i32) -> Self {
        GroupId(id)
    }
}

/// EPerson identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EPersonId(pub i32);

impl fmt::Display for EPersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eperson:{}", self.0)
    }
}

impl From<i32> for EPersonId {
    fn from(id: i32) -> Self {
        EPersonId(id)
    }
}

/// A named collection of epersons and subgroups
///
/// Direct children and members live in the base relations held by the
/// store; see [`GroupEdge`] and [`MembershipRow`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group identifier
    pub id: GroupId,

    /// Unique display name
    pub name: String,
}

impl Group {
    pub fn new(id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// An individual user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EPerson {
    /// EPerson identifier
    pub id: EPersonId,

    /// Email address (unique, compared case-insensitively)
    pub email: String,

    /// Network identifier from an external authentication source (unique)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netid: Option<String>,

    /// Whether the account may authenticate
    pub can_login: bool,
}

/// Registration data for a new eperson
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEPerson {
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netid: Option<String>,

    #[serde(default = "default_can_login")]
    pub can_login: bool,
}

fn default_can_login() -> bool {
    true
}

impl NewEPerson {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            netid: None,
            can_login: true,
        }
    }

    pub fn with_netid(mut self, netid: impl Into<String>) -> Self {
        self.netid = Some(netid.into());
        self
    }

    pub fn with_can_login(mut self, can_login: bool) -> Self {
        self.can_login = can_login;
        self
    }

    /// Email as stored and compared
    pub fn normalized_email(&self) -> String {
        self.email.trim().to_lowercase()
    }
}

/// Direct parent -> child edge in `group2group`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupEdge {
    pub parent: GroupId,
    pub child: GroupId,
}

impl GroupEdge {
    pub fn new(parent: impl Into<GroupId>, child: impl Into<GroupId>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }
}

/// Derived fact in `group2groupcache`: `child` is a direct or indirect
/// descendant of `parent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClosureEntry {
    pub parent: GroupId,
    pub child: GroupId,
}

impl ClosureEntry {
    pub fn new(parent: impl Into<GroupId>, child: impl Into<GroupId>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }
}

/// Direct membership fact in `epersongroup2eperson`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MembershipRow {
    pub group: GroupId,
    pub eperson: EPersonId,
}

impl MembershipRow {
    pub fn new(group: impl Into<GroupId>, eperson: impl Into<EPersonId>) -> Self {
        Self {
            group: group.into(),
            eperson: eperson.into(),
        }
    }
}

/// Pending, unflushed mutations of the two base relations
///
/// Adding an entry that is pending removal cancels the removal and vice
/// versa, so the set always describes the net effect of the unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub edges_added: BTreeSet<GroupEdge>,
    pub edges_removed: BTreeSet<GroupEdge>,
    pub members_added: BTreeSet<MembershipRow>,
    pub members_removed: BTreeSet<MembershipRow>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, edge: GroupEdge) {
        self.edges_removed.remove(&edge);
        self.edges_added.insert(edge);
    }

    pub fn remove_edge(&mut self, edge: GroupEdge) {
        self.edges_added.remove(&edge);
        self.edges_removed.insert(edge);
    }

    pub fn add_member(&mut self, row: MembershipRow) {
        self.members_removed.remove(&row);
        self.members_added.insert(row);
    }

    pub fn remove_member(&mut self, row: MembershipRow) {
        self.members_added.remove(&row);
        self.members_removed.insert(row);
    }

    /// Whether any edge addition or removal is pending
    pub fn groups_changed(&self) -> bool {
        !self.edges_added.is_empty() || !self.edges_removed.is_empty()
    }

    /// Whether any membership addition or removal is pending
    pub fn members_changed(&self) -> bool {
        !self.members_added.is_empty() || !self.members_removed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.groups_changed() && !self.members_changed()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Drop every pending change that references `group`
    pub fn forget_group(&mut self, group: GroupId) {
        self.edges_added.retain(|e| e.parent != group && e.child != group);
        self.edges_removed.retain(|e| e.parent != group && e.child != group);
        self.members_added.retain(|m| m.group != group);
        self.members_removed.retain(|m| m.group != group);
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.edges_added.len()
            + self.edges_removed.len()
            + self.members_added.len()
            + self.members_removed.len()
    }
}
