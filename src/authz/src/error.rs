//! Error types for the group membership engine

use crate::types::{EPersonId, GroupId};
use thiserror::Error;

/// Group engine errors
#[derive(Debug, Error)]
pub enum GroupError {
    /// Null, unresolved or otherwise invalid group/eperson reference
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Group does not exist
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    /// EPerson does not exist
    #[error("EPerson not found: {0}")]
    EPersonNotFound(EPersonId),

    /// Persistence failure (including transaction timeouts)
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GroupError {
    /// Whether the error came from the backing store
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, GroupError::StorageFailure(_))
    }
}

/// Result type for group operations
pub type Result<T> = std::result::Result<T, GroupError>;
