//! Repository Error Types
//!
//! One shared error taxonomy for every manager operation:
//! - Input errors (bad tuples, bad names, empty batches)
//! - Security errors (permission denied, lock contention)
//! - State errors (misconfiguration, missing administrative cubes)
//! - Merge conflicts, carrying the per-cube conflict map
//! - Persistence and resource failures surfaced by the ports

use crate::appid::AppIdError;
use crate::ports::delta::Delta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Description of a single cube that could not be three-way merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictInfo {
    /// Human-readable explanation of why the merge failed
    pub message: String,

    /// SHA-1 of the branch-side cube, when known
    pub sha1: Option<String>,

    /// SHA-1 of the head revision the branch diverged from
    pub head_sha1: Option<String>,

    /// Differences between the two sides, when computable
    pub diff: Vec<Delta>,
}

/// Repository error types
#[derive(Error, Debug)]
pub enum RepoError {
    #[error(transparent)]
    InvalidAppId(#[from] AppIdError),

    /// Malformed or out-of-contract caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A queried cube does not exist where the operation requires one
    #[error("Cube '{name}' does not exist in {app_id}")]
    CubeNotFound { app_id: String, name: String },

    /// The acting user is not allowed to perform the action
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The application lock is held by another user
    #[error("Application is locked by user '{owner}'")]
    LockBlocked { owner: String },

    /// The operation requires the caller to own the application lock
    #[error("Operation requires the application lock; current owner: {owner:?}")]
    NotLockOwner { owner: Option<String> },

    /// The repository or an administrative cube is misconfigured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// One or more cubes could not be three-way merged
    #[error("Unable to merge {} cube(s)", conflicts.len())]
    MergeConflict {
        /// Cube name → conflict description
        conflicts: BTreeMap<String, ConflictInfo>,
    },

    /// A resource or loader could not be resolved
    #[error("Resource error: {0}")]
    Resource(String),

    /// Failure surfaced by the durable store
    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Repository result alias
pub type RepoResult<T> = Result<T, RepoError>;

impl RepoError {
    /// Convenience constructor for input errors.
    pub fn input(msg: impl Into<String>) -> Self {
        RepoError::InvalidInput(msg.into())
    }

    /// True for errors raised before any persister call, which therefore
    /// leave no side effects behind.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RepoError::InvalidAppId(_)
                | RepoError::InvalidInput(_)
                | RepoError::PermissionDenied(_)
                | RepoError::LockBlocked { .. }
                | RepoError::NotLockOwner { .. }
        )
    }
}
