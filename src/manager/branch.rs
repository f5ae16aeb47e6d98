//! Branch Engine
//!
//! The version-control heart of the repository: classifies branch
//! changes against head, commits branches, pulls head movement back into
//! branches, and attempts three-way merges when both sides moved.
//!
//! The common ancestor of a merge is always the revision whose SHA-1
//! equals the branch cube's recorded `head_sha1`, the head state the
//! branch forked from or last synced with.

use super::{assert_not_release, validate_batch, Action, CubeManager};
use crate::appid::ApplicationId;
use crate::context;
use crate::error::{ConflictInfo, RepoError, RepoResult};
use crate::ports::cube::Cube;
use crate::ports::persister::{ChangeType, CubeInfo, SearchOptions};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Outcome of an update-from-head (or from another branch).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BranchUpdateReport {
    /// Head revisions pulled into the branch
    pub updates: Vec<CubeInfo>,

    /// Cubes where both sides moved and the deltas merged automatically
    pub merges: Vec<CubeInfo>,

    /// Cubes whose content already matched head; only their fork base was
    /// re-pointed, without a new revision
    pub fast_forwards: Vec<CubeInfo>,

    /// Cubes that could not be merged automatically
    pub conflicts: BTreeMap<String, ConflictInfo>,
}

impl BranchUpdateReport {
    /// True when every cube synchronised without conflict.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Number of cubes touched in any way.
    pub fn total_changes(&self) -> usize {
        self.updates.len() + self.merges.len() + self.fast_forwards.len() + self.conflicts.len()
    }
}

/// Classify one changed branch cube against its head counterpart.
/// `None` means there is nothing to do for this cube.
fn classify(branch: &CubeInfo, head: Option<&CubeInfo>) -> Option<ChangeType> {
    let head = match head {
        // Never in head: a new cube, unless the branch only ever created
        // and deleted it.
        None => {
            return if branch.revision >= 0 {
                Some(ChangeType::Created)
            } else {
                None
            };
        }
        Some(head) => head,
    };

    match branch.head_sha1.as_deref() {
        // The branch never forked this cube from head, yet head has one:
        // someone created the same name on both sides.
        None => Some(ChangeType::Conflict),
        Some(base) if base == head.sha1 => {
            if branch.sha1 == head.sha1 {
                if branch.is_tombstone() != head.is_tombstone() {
                    if branch.is_tombstone() {
                        Some(ChangeType::Deleted)
                    } else {
                        Some(ChangeType::Restored)
                    }
                } else {
                    None
                }
            } else {
                Some(ChangeType::Updated)
            }
        }
        // Head moved past the branch's base.
        Some(_) => Some(ChangeType::Conflict),
    }
}

/// Work items produced by the update-from-head classification pass.
struct UpdatePlan {
    pulls: Vec<CubeInfo>,
    repoints: Vec<(CubeInfo, String)>,
    merges: Vec<(CubeInfo, CubeInfo)>,
}

impl CubeManager {
    // ========================================================================
    // Diff
    // ========================================================================

    /// Changes the branch carries relative to HEAD, each classified as
    /// created, updated, deleted, restored or conflicting.
    pub fn get_branch_changes(&self, app_id: &ApplicationId) -> RepoResult<Vec<CubeInfo>> {
        if app_id.is_head() {
            return Err(RepoError::input("Cannot get branch changes for HEAD"));
        }
        let head = app_id.as_head();

        let changed = self.search(app_id, None, None, &SearchOptions::changed())?;
        let head_records = self
            .persister()
            .search(&head, None, None, &SearchOptions::default())?;
        let heads: HashMap<String, CubeInfo> = head_records
            .into_iter()
            .map(|info| (info.name.to_lowercase(), info))
            .collect();

        let mut changes = Vec::new();
        for mut info in changed {
            if let Some(change_type) = classify(&info, heads.get(&info.name.to_lowercase())) {
                info.change_type = Some(change_type);
                changes.push(info);
            }
        }
        Ok(changes)
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Commit branch changes to HEAD. With `names`, only the named subset
    /// is considered; otherwise every changed cube commits.
    ///
    /// Conflicting cubes go through the three-way merge. Cubes that still
    /// conflict afterwards are collected and raised as a merge error,
    /// after the clean subset has already committed. Callers resolve and
    /// retry only the failed cubes.
    pub fn commit_branch(
        &self,
        app_id: &ApplicationId,
        names: Option<&[String]>,
    ) -> RepoResult<Vec<CubeInfo>> {
        assert_not_release(app_id)?;
        let mut changes = self.get_branch_changes(app_id)?;
        if let Some(names) = names {
            changes.retain(|info| {
                names
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(&info.name))
            });
        }
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        for info in &changes {
            self.assert_permissions(app_id, &info.name, Action::Commit)?;
        }
        self.assert_not_lock_blocked(app_id)?;

        let head = app_id.as_head();
        let user = context::acting_user();
        let mut committed = Vec::new();
        let mut conflicts = BTreeMap::new();
        let mut bulk_ids = Vec::new();

        for info in &changes {
            match info.change_type {
                Some(ChangeType::Conflict) => {
                    match self.merge_for_commit(app_id, &head, info)? {
                        Ok(merged) => {
                            let mut result = self
                                .persister()
                                .commit_merged_cube_to_head(app_id, &*merged, &user)?;
                            result.change_type = Some(ChangeType::Updated);
                            committed.push(result);
                        }
                        Err(conflict) => {
                            conflicts.insert(info.name.clone(), conflict);
                        }
                    }
                }
                Some(_) => bulk_ids.push(info.id),
                None => {}
            }
        }

        if !bulk_ids.is_empty() {
            let type_by_name: HashMap<String, ChangeType> = changes
                .iter()
                .filter_map(|info| {
                    info.change_type
                        .map(|t| (info.name.to_lowercase(), t))
                })
                .collect();
            let mut bulk = self.persister().commit_cubes(app_id, &bulk_ids, &user)?;
            for info in &mut bulk {
                info.change_type = type_by_name.get(&info.name.to_lowercase()).copied();
            }
            committed.extend(bulk);
        }

        self.cache().clear(app_id);
        self.cache().clear(&head);
        self.broadcast(app_id);
        self.broadcast(&head);

        if !conflicts.is_empty() {
            log::warn!(
                "Commit of {} finished with {} unresolved conflict(s)",
                app_id,
                conflicts.len()
            );
            return Err(RepoError::MergeConflict { conflicts });
        }
        log::info!("Committed {} cube(s) from {} to HEAD", committed.len(), app_id);
        Ok(committed)
    }

    fn merge_for_commit(
        &self,
        app_id: &ApplicationId,
        head: &ApplicationId,
        info: &CubeInfo,
    ) -> RepoResult<Result<Arc<dyn Cube>, ConflictInfo>> {
        let branch_cube = self.load_cube_internal(app_id, &info.name)?;
        let head_cube = self.load_cube_internal(head, &info.name)?;
        Ok(match (branch_cube, head_cube) {
            (Some(branch_cube), Some(head_cube)) => self.attempt_merge(
                &branch_cube,
                &head_cube,
                info.head_sha1.as_deref(),
                head,
                false,
            ),
            (None, _) => Err(ConflictInfo {
                message: "Cube was deleted in the branch while head changed".to_string(),
                sha1: None,
                head_sha1: info.head_sha1.clone(),
                diff: Vec::new(),
            }),
            (_, None) => Err(ConflictInfo {
                message: "Cube was deleted in head while the branch changed".to_string(),
                sha1: Some(info.sha1.clone()),
                head_sha1: info.head_sha1.clone(),
                diff: Vec::new(),
            }),
        })
    }

    // ========================================================================
    // Update from head / another branch
    // ========================================================================

    /// Pull HEAD movement into the branch: fast-forward pulls for
    /// unchanged cubes, silent fork-base re-points where content already
    /// matches, three-way merges where both sides moved.
    pub fn update_branch(&self, app_id: &ApplicationId) -> RepoResult<BranchUpdateReport> {
        self.update_branch_against(app_id, &app_id.as_head(), None)
    }

    /// The update-branch algorithm scoped to one cube against an
    /// arbitrary source branch.
    pub fn update_branch_cube(
        &self,
        app_id: &ApplicationId,
        name: &str,
        other_branch: &str,
    ) -> RepoResult<BranchUpdateReport> {
        self.update_branch_against(app_id, &app_id.as_branch(other_branch), Some(name))
    }

    fn update_branch_against(
        &self,
        app_id: &ApplicationId,
        other: &ApplicationId,
        only: Option<&str>,
    ) -> RepoResult<BranchUpdateReport> {
        if app_id.is_head() {
            return Err(RepoError::input("Cannot update HEAD from a branch"));
        }
        if app_id == other {
            return Err(RepoError::input("Cannot update a branch from itself"));
        }
        assert_not_release(app_id)?;

        let plan = self.plan_update(app_id, other, only)?;

        for info in plan
            .pulls
            .iter()
            .chain(plan.merges.iter().map(|(branch, _)| branch))
            .chain(plan.repoints.iter().map(|(branch, _)| branch))
        {
            self.assert_permissions(app_id, &info.name, Action::Update)?;
        }
        self.assert_not_lock_blocked(app_id)?;

        let user = context::acting_user();
        let mut report = BranchUpdateReport::default();

        for (branch_info, head_sha1) in &plan.repoints {
            self.persister()
                .update_branch_cube_head_sha1(branch_info.id, head_sha1)?;
            let mut updated = branch_info.clone();
            updated.head_sha1 = Some(head_sha1.clone());
            report.fast_forwards.push(updated);
        }

        for (branch_info, other_info) in &plan.merges {
            match self.merge_for_update(app_id, other, branch_info, other_info)? {
                Ok(merged) => {
                    let info = self.persister().commit_merged_cube_to_branch(
                        app_id,
                        &*merged,
                        Some(other_info.sha1.as_str()),
                        &user,
                    )?;
                    report.merges.push(info);
                }
                Err(conflict) => {
                    report.conflicts.insert(branch_info.name.clone(), conflict);
                }
            }
        }

        if !plan.pulls.is_empty() {
            let ids: Vec<i64> = plan.pulls.iter().map(|info| info.id).collect();
            report.updates = self.persister().pull_to_branch(app_id, &ids, &user)?;
        }

        self.cache().clear(app_id);
        self.broadcast(app_id);

        if !report.is_clean() {
            log::warn!(
                "Update of {} left {} conflict(s) unresolved",
                app_id,
                report.conflicts.len()
            );
        }
        Ok(report)
    }

    /// Classification pass: decide what to pull, re-point or merge before
    /// touching anything, so permission failures abort without side
    /// effects.
    fn plan_update(
        &self,
        app_id: &ApplicationId,
        other: &ApplicationId,
        only: Option<&str>,
    ) -> RepoResult<UpdatePlan> {
        let options = match only {
            Some(_) => SearchOptions {
                exact_match_name: true,
                ..SearchOptions::default()
            },
            None => SearchOptions::default(),
        };
        let branch_records = self.persister().search(app_id, only, None, &options)?;
        let other_records = self.persister().search(other, only, None, &options)?;

        let branch_by_name: HashMap<String, CubeInfo> = branch_records
            .into_iter()
            .map(|info| (info.name.to_lowercase(), info))
            .collect();

        let mut plan = UpdatePlan {
            pulls: Vec::new(),
            repoints: Vec::new(),
            merges: Vec::new(),
        };

        for other_info in other_records {
            let branch_info = match branch_by_name.get(&other_info.name.to_lowercase()) {
                // New on the other side: pull it in.
                None => {
                    plan.pulls.push(other_info);
                    continue;
                }
                Some(branch_info) => branch_info,
            };

            if branch_info.sha1 == other_info.sha1 {
                if branch_info.is_tombstone() != other_info.is_tombstone() {
                    if !branch_info.changed {
                        plan.pulls.push(other_info);
                    }
                    // A changed branch with a deliberate delete or restore
                    // keeps it; the difference surfaces at commit time.
                } else if branch_info.head_sha1.as_deref() != Some(other_info.sha1.as_str()) {
                    plan.repoints
                        .push((branch_info.clone(), other_info.sha1.clone()));
                }
            } else if !branch_info.changed {
                plan.pulls.push(other_info);
            } else if branch_info.head_sha1.as_deref() == Some(other_info.sha1.as_str()) {
                // Branch is strictly ahead; nothing to pull.
            } else {
                plan.merges.push((branch_info.clone(), other_info));
            }
        }
        Ok(plan)
    }

    fn merge_for_update(
        &self,
        app_id: &ApplicationId,
        other: &ApplicationId,
        branch_info: &CubeInfo,
        other_info: &CubeInfo,
    ) -> RepoResult<Result<Arc<dyn Cube>, ConflictInfo>> {
        let branch_cube = self.load_cube_internal(app_id, &branch_info.name)?;
        let other_cube = self.load_cube_internal(other, &other_info.name)?;
        Ok(match (branch_cube, other_cube) {
            (Some(branch_cube), Some(other_cube)) => self.attempt_merge(
                &branch_cube,
                &other_cube,
                branch_info.head_sha1.as_deref(),
                &app_id.as_head(),
                true,
            ),
            (None, _) => Err(ConflictInfo {
                message: format!(
                    "Cube was deleted in the branch while '{}' changed it",
                    other.branch()
                ),
                sha1: None,
                head_sha1: branch_info.head_sha1.clone(),
                diff: Vec::new(),
            }),
            (_, None) => Err(ConflictInfo {
                message: format!("Cube was deleted in '{}'", other.branch()),
                sha1: Some(branch_info.sha1.clone()),
                head_sha1: branch_info.head_sha1.clone(),
                diff: Vec::new(),
            }),
        })
    }

    // ========================================================================
    // Three-way merge
    // ========================================================================

    /// Try to merge two divergent copies of a cube over their common
    /// ancestor. With `reverse` the merged result is built on the other
    /// side's copy (update direction) instead of the branch copy (commit
    /// direction).
    fn attempt_merge(
        &self,
        branch_cube: &Arc<dyn Cube>,
        other_cube: &Arc<dyn Cube>,
        base_sha1: Option<&str>,
        base_app_id: &ApplicationId,
        reverse: bool,
    ) -> Result<Arc<dyn Cube>, ConflictInfo> {
        let name = branch_cube.name();

        let base: Arc<dyn Cube> = match base_sha1 {
            Some(sha1) => match self.persister().load_cube_by_sha1(base_app_id, &name, sha1) {
                Ok(cube) => cube,
                Err(e) => {
                    return Err(ConflictInfo {
                        message: format!("Unable to load merge base: {}", e),
                        sha1: Some(branch_cube.sha1()),
                        head_sha1: Some(sha1.to_string()),
                        diff: Vec::new(),
                    });
                }
            },
            // Never-committed cube: merge over an empty cube with the same
            // axes so first-time merges can still succeed.
            None => {
                let empty = branch_cube.duplicate(&name);
                empty.clear_cells();
                empty
            }
        };

        let branch_delta = self.deltas().delta(&*base, &**branch_cube);
        let other_delta = self.deltas().delta(&*base, &**other_cube);

        if self
            .deltas()
            .are_compatible(&branch_delta, &other_delta, reverse)
        {
            let (target, delta) = if reverse {
                (other_cube.duplicate(&name), branch_delta)
            } else {
                (branch_cube.duplicate(&name), other_delta)
            };
            return match self.deltas().merge(&*target, &delta) {
                Ok(()) => Ok(target),
                Err(e) => Err(ConflictInfo {
                    message: format!("Delta merge failed: {}", e),
                    sha1: Some(branch_cube.sha1()),
                    head_sha1: Some(other_cube.sha1()),
                    diff: Vec::new(),
                }),
            };
        }

        let diff = self.deltas().describe(&**branch_cube, &**other_cube);
        if diff.is_empty() {
            // Incompatible deltas over content that ends up identical:
            // nothing to merge after all.
            return Ok(branch_cube.clone());
        }
        Err(ConflictInfo {
            message: "Cube changed on both sides and the changes overlap".to_string(),
            sha1: Some(branch_cube.sha1()),
            head_sha1: Some(other_cube.sha1()),
            diff,
        })
    }

    // ========================================================================
    // Rollback, restore, conflict resolution
    // ========================================================================

    /// Discard branch changes, returning the named cubes to their fork
    /// base. The whole branch cache is dropped: rollback can touch any
    /// subset, and mass invalidation is both simpler and correct.
    pub fn rollback_cubes(&self, app_id: &ApplicationId, names: &[String]) -> RepoResult<()> {
        validate_batch(names)?;
        assert_not_release(app_id)?;
        for name in names {
            self.assert_permissions(app_id, name, Action::Update)?;
        }
        self.assert_not_lock_blocked(app_id)?;

        let user = context::acting_user();
        self.persister().rollback_cubes(app_id, names, &user)?;

        self.cache().clear(app_id);
        self.broadcast(app_id);
        Ok(())
    }

    /// Revive tombstoned cubes. Each restored cube is re-hydrated through
    /// the normal load path so advices reapply.
    pub fn restore_cubes(&self, app_id: &ApplicationId, names: &[String]) -> RepoResult<()> {
        validate_batch(names)?;
        if app_id.is_head() {
            return Err(RepoError::input("Cannot restore cubes directly on HEAD"));
        }
        assert_not_release(app_id)?;
        for name in names {
            self.assert_permissions(app_id, name, Action::Update)?;
        }
        self.assert_not_lock_blocked(app_id)?;

        let user = context::acting_user();
        self.persister().restore_cubes(app_id, names, &user)?;

        for name in names {
            self.cache().remove(app_id, name);
            self.load_cube_internal(app_id, name)?;
        }
        self.broadcast(app_id);
        Ok(())
    }

    /// Resolve a conflicted cube in favour of the branch copy.
    pub fn merge_accept_mine(&self, app_id: &ApplicationId, name: &str) -> RepoResult<CubeInfo> {
        assert_not_release(app_id)?;
        self.assert_permissions(app_id, name, Action::Update)?;
        self.assert_not_lock_blocked(app_id)?;

        let user = context::acting_user();
        let info = self.persister().merge_accept_mine(app_id, name, &user)?;
        self.invalidate(app_id, name);
        self.broadcast(app_id);
        Ok(info)
    }

    /// Resolve a conflicted cube in favour of the head copy. Without an
    /// explicit `head_sha1` the current head revision wins.
    pub fn merge_accept_theirs(
        &self,
        app_id: &ApplicationId,
        name: &str,
        head_sha1: Option<&str>,
    ) -> RepoResult<CubeInfo> {
        assert_not_release(app_id)?;
        self.assert_permissions(app_id, name, Action::Update)?;
        self.assert_not_lock_blocked(app_id)?;

        let sha1 = match head_sha1 {
            Some(sha1) => sha1.to_string(),
            None => {
                let head = app_id.as_head();
                let options = SearchOptions {
                    exact_match_name: true,
                    ..SearchOptions::default()
                };
                self.persister()
                    .search(&head, Some(name), None, &options)?
                    .into_iter()
                    .next()
                    .map(|info| info.sha1)
                    .ok_or_else(|| {
                        RepoError::input(format!("Cube '{}' does not exist in HEAD", name))
                    })?
            }
        };

        let user = context::acting_user();
        let info = self
            .persister()
            .merge_accept_theirs(app_id, name, &sha1, &user)?;
        self.invalidate(app_id, name);
        self.broadcast(app_id);
        Ok(info)
    }
}
