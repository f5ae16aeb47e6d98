//! Persister Port
//!
//! Contract with the durable store of cube revisions. The store is
//! SQL-like: revisions are keyed by the application-identity tuple and
//! cube name, with signed revision numbers where negative means
//! tombstoned. All calls block synchronously; the manager performs cache
//! maintenance only after a call returns success.

use crate::appid::{ApplicationId, ReleaseStatus};
use crate::error::RepoResult;
use crate::ports::cube::Cube;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Classification assigned to a branch cube by the diff against head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// New in the branch, absent from head
    Created,

    /// Content differs from the head revision the branch is based on
    Updated,

    /// Tombstoned in the branch while live in head
    Deleted,

    /// Restored in the branch while tombstoned in head
    Restored,

    /// Head moved past the branch's base revision
    Conflict,
}

/// Per-revision descriptor returned by searches and revision queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeInfo {
    /// Opaque persister identifier for this exact revision
    pub id: i64,

    /// Cube name
    pub name: String,

    /// Workspace holding the revision
    pub app_id: ApplicationId,

    /// Signed revision number; negative values are tombstones
    pub revision: i64,

    /// Content fingerprint of this revision
    pub sha1: String,

    /// Fingerprint of the head revision this branch cube was forked from
    /// or last synced with; `None` means a never-merged new cube
    pub head_sha1: Option<String>,

    /// Whether the branch copy differs from its base
    pub changed: bool,

    /// Commit notes, when requested by the search options
    pub notes: Option<String>,

    /// Attached test data, when requested by the search options
    pub test_data: Option<String>,

    /// When the revision was written
    pub created_at: DateTime<Utc>,

    /// Who wrote the revision
    pub created_by: String,

    /// Classification assigned by the branch diff; not persisted
    pub change_type: Option<ChangeType>,
}

impl CubeInfo {
    /// True when this revision is a deletion marker.
    pub fn is_tombstone(&self) -> bool {
        self.revision < 0
    }
}

/// Search switches. All default to off.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    pub include_cube_data: bool,
    pub include_test_data: bool,
    pub include_notes: bool,
    pub deleted_records_only: bool,
    pub active_records_only: bool,
    pub changed_records_only: bool,
    pub exact_match_name: bool,
}

impl SearchOptions {
    /// Only live (non-tombstoned) records.
    pub fn active() -> Self {
        Self {
            active_records_only: true,
            ..Self::default()
        }
    }

    /// Only records whose branch copy differs from its base.
    pub fn changed() -> Self {
        Self {
            changed_records_only: true,
            ..Self::default()
        }
    }

    /// Exact-name lookup over live records.
    pub fn exact() -> Self {
        Self {
            active_records_only: true,
            exact_match_name: true,
            ..Self::default()
        }
    }
}

/// The durable-store contract.
///
/// `user` parameters name the acting user for audit attribution on
/// mutating calls. Mutations are linearised per application id by the
/// implementation.
pub trait Persister: Send + Sync {
    // -- loading ----------------------------------------------------------

    /// Load the current revision of a cube, `None` when absent or
    /// tombstoned.
    fn load_cube(&self, app_id: &ApplicationId, name: &str) -> RepoResult<Option<Arc<dyn Cube>>>;

    /// Load an exact revision by persister id.
    fn load_cube_by_id(&self, id: i64) -> RepoResult<Arc<dyn Cube>>;

    /// Load the revision of a cube with the given fingerprint. This is the
    /// three-way merge base fetch.
    fn load_cube_by_sha1(
        &self,
        app_id: &ApplicationId,
        name: &str,
        sha1: &str,
    ) -> RepoResult<Arc<dyn Cube>>;

    /// Search records by name and content pattern.
    fn search(
        &self,
        app_id: &ApplicationId,
        name_pattern: Option<&str>,
        content_pattern: Option<&str>,
        options: &SearchOptions,
    ) -> RepoResult<Vec<CubeInfo>>;

    /// Full revision history of one cube, newest first.
    fn get_revisions(&self, app_id: &ApplicationId, name: &str) -> RepoResult<Vec<CubeInfo>>;

    // -- single-cube mutation ---------------------------------------------

    /// Create or update a cube in a workspace.
    fn update_cube(&self, app_id: &ApplicationId, cube: &dyn Cube, user: &str) -> RepoResult<()>;

    /// Copy a cube, possibly across workspaces and names.
    fn duplicate_cube(
        &self,
        old_id: &ApplicationId,
        new_id: &ApplicationId,
        old_name: &str,
        new_name: &str,
        user: &str,
    ) -> RepoResult<()>;

    /// Rename a cube within a workspace.
    fn rename_cube(
        &self,
        app_id: &ApplicationId,
        old_name: &str,
        new_name: &str,
        user: &str,
    ) -> RepoResult<()>;

    /// Tombstone cubes; `allow_hard` permits physical deletion.
    fn delete_cubes(
        &self,
        app_id: &ApplicationId,
        names: &[String],
        allow_hard: bool,
        user: &str,
    ) -> RepoResult<()>;

    /// Revive tombstoned cubes by inserting new positive revisions.
    fn restore_cubes(&self, app_id: &ApplicationId, names: &[String], user: &str)
        -> RepoResult<()>;

    /// Discard branch changes, returning cubes to their base revisions.
    fn rollback_cubes(
        &self,
        app_id: &ApplicationId,
        names: &[String],
        user: &str,
    ) -> RepoResult<()>;

    // -- branch synchronisation -------------------------------------------

    /// Commit branch revisions (by id) to head in bulk.
    fn commit_cubes(
        &self,
        app_id: &ApplicationId,
        ids: &[i64],
        user: &str,
    ) -> RepoResult<Vec<CubeInfo>>;

    /// Write an already-merged cube as the new head revision.
    fn commit_merged_cube_to_head(
        &self,
        app_id: &ApplicationId,
        cube: &dyn Cube,
        user: &str,
    ) -> RepoResult<CubeInfo>;

    /// Write an already-merged cube into the branch, based on the given
    /// head fingerprint.
    fn commit_merged_cube_to_branch(
        &self,
        app_id: &ApplicationId,
        cube: &dyn Cube,
        base_sha1: Option<&str>,
        user: &str,
    ) -> RepoResult<CubeInfo>;

    /// Fast-forward head revisions (by id) into the branch in bulk.
    fn pull_to_branch(
        &self,
        app_id: &ApplicationId,
        ids: &[i64],
        user: &str,
    ) -> RepoResult<Vec<CubeInfo>>;

    /// Re-point one branch revision's head fingerprint without creating a
    /// new revision.
    fn update_branch_cube_head_sha1(&self, id: i64, head_sha1: &str) -> RepoResult<()>;

    /// Record a conflicted cube as resolved in favour of the branch copy.
    fn merge_accept_mine(
        &self,
        app_id: &ApplicationId,
        name: &str,
        user: &str,
    ) -> RepoResult<CubeInfo>;

    /// Record a conflicted cube as resolved in favour of the head copy
    /// with the given fingerprint.
    fn merge_accept_theirs(
        &self,
        app_id: &ApplicationId,
        name: &str,
        head_sha1: &str,
        user: &str,
    ) -> RepoResult<CubeInfo>;

    // -- branch and version administration --------------------------------

    /// Copy every revision of one branch to a new branch.
    fn copy_branch(&self, source: &ApplicationId, target: &ApplicationId) -> RepoResult<usize>;

    /// Move every revision of a branch to a new version number.
    fn move_branch(&self, app_id: &ApplicationId, new_version: &str) -> RepoResult<usize>;

    /// Freeze the version: flip HEAD to RELEASE status.
    fn release_cubes(
        &self,
        app_id: &ApplicationId,
        new_snapshot_version: &str,
    ) -> RepoResult<usize>;

    /// Delete a branch and its revisions.
    fn delete_branch(&self, app_id: &ApplicationId) -> RepoResult<()>;

    // -- listing ----------------------------------------------------------

    /// All application names under a tenant.
    fn get_app_names(&self, tenant: &str) -> RepoResult<Vec<String>>;

    /// Versions of an application, grouped by status.
    fn get_versions(
        &self,
        tenant: &str,
        app: &str,
    ) -> RepoResult<HashMap<ReleaseStatus, Vec<String>>>;

    /// All branch names under an application version.
    fn get_branches(&self, app_id: &ApplicationId) -> RepoResult<HashSet<String>>;

    // -- notes and test data ----------------------------------------------

    fn update_notes(&self, app_id: &ApplicationId, name: &str, notes: &str) -> RepoResult<()>;

    fn get_notes(&self, app_id: &ApplicationId, name: &str) -> RepoResult<String>;

    fn update_test_data(
        &self,
        app_id: &ApplicationId,
        name: &str,
        test_data: &str,
    ) -> RepoResult<()>;

    fn get_test_data(&self, app_id: &ApplicationId, name: &str) -> RepoResult<String>;
}
