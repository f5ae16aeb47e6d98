//! Lifecycle Controller
//!
//! Version promotion and workspace administration:
//! - `release_cubes`: the full release workflow: freeze a version,
//!   migrate its branches, seed the next snapshot HEAD
//! - `move_branch` / `release_version`: the individual steps, for hosts
//!   that orchestrate releases themselves
//! - `copy_branch` / `delete_branch`: branch administration
//! - Bootstrap: lazy creation of the administrative cubes when a
//!   tenant/app pair or branch is seen for the first time

use super::lock::AXIS_SYSTEM;
use super::permissions::{
    Action, AXIS_ACTION, AXIS_RESOURCE, AXIS_ROLE, AXIS_USER, ROLE_ADMIN, ROLE_READONLY, ROLE_USER,
};
use super::{
    assert_not_release, CubeManager, SYS_BRANCH_PERMISSIONS, SYS_LOCK, SYS_PERMISSIONS,
    SYS_USERGROUPS,
};
use crate::appid::{ApplicationId, ReleaseStatus, HEAD, SYS_VERSION};
use crate::context;
use crate::error::{RepoError, RepoResult};
use crate::ports::cube::{coordinate, Axis, CellValue, Cube};
use crate::ports::persister::SearchOptions;
use std::sync::Arc;

const ALL_ACTIONS: [&str; 4] = ["update", "read", "release", "commit"];

impl CubeManager {
    // ========================================================================
    // Version promotion
    // ========================================================================

    /// Move every revision of a branch to a new version number. Requires
    /// the application lock and release permission.
    pub fn move_branch(&self, app_id: &ApplicationId, new_version: &str) -> RepoResult<usize> {
        if app_id.is_head() {
            return Err(RepoError::input("Cannot move the HEAD branch"));
        }
        reject_sys_version(app_id.version())?;
        reject_sys_version(new_version)?;
        // Validates the version format.
        ApplicationId::new(
            app_id.tenant(),
            app_id.app(),
            new_version,
            ReleaseStatus::Snapshot,
            app_id.branch(),
        )?;
        self.assert_locked_by_me(app_id)?;
        self.assert_permissions(app_id, "*", Action::Release)?;

        let count = self.persister().move_branch(app_id, new_version)?;
        self.cache().clear_branches(app_id);
        self.broadcast(app_id);
        log::info!(
            "Moved branch {} ({} revision(s)) to version {}",
            app_id,
            count,
            new_version
        );
        Ok(count)
    }

    /// Freeze a version: flip its HEAD to RELEASE and start the next
    /// snapshot. The thin variant without branch migration or quiescing;
    /// [`Self::release_cubes`] is the full workflow.
    pub fn release_version(
        &self,
        app_id: &ApplicationId,
        new_snapshot_version: &str,
    ) -> RepoResult<usize> {
        reject_sys_version(app_id.version())?;
        reject_sys_version(new_snapshot_version)?;
        self.assert_locked_by_me(app_id)?;
        self.assert_permissions(app_id, "*", Action::Release)?;

        let versions = self
            .persister()
            .get_versions(app_id.tenant(), app_id.app())?;
        if versions
            .get(&ReleaseStatus::Release)
            .map(|list| list.iter().any(|v| v == app_id.version()))
            .unwrap_or(false)
        {
            return Err(RepoError::input(format!(
                "Version {} of {}/{} is already released",
                app_id.version(),
                app_id.tenant(),
                app_id.app()
            )));
        }

        let count = self
            .persister()
            .release_cubes(app_id, new_snapshot_version)?;
        self.cache().clear_branches(app_id);
        self.broadcast(app_id);
        Ok(count)
    }

    /// The full release workflow: verify the target version is unused,
    /// take the application lock, wait for in-flight readers to drain,
    /// migrate every branch to the next snapshot version, freeze the
    /// released version, and seed the next snapshot HEAD from it.
    pub fn release_cubes(
        &self,
        app_id: &ApplicationId,
        new_snapshot_version: &str,
    ) -> RepoResult<usize> {
        reject_sys_version(app_id.version())?;
        reject_sys_version(new_snapshot_version)?;
        assert_not_release(app_id)?;
        // Validates the version format.
        ApplicationId::new(
            app_id.tenant(),
            app_id.app(),
            new_snapshot_version,
            ReleaseStatus::Snapshot,
            HEAD,
        )?;
        self.assert_permissions(app_id, "*", Action::Release)?;

        let versions = self
            .persister()
            .get_versions(app_id.tenant(), app_id.app())?;
        if versions
            .values()
            .flatten()
            .any(|v| v == new_snapshot_version)
        {
            return Err(RepoError::input(format!(
                "Version {} of {}/{} already exists",
                new_snapshot_version,
                app_id.tenant(),
                app_id.app()
            )));
        }

        if !self.lock_app(app_id)? {
            let owner = self.get_app_lock_owner(app_id)?.unwrap_or_default();
            return Err(RepoError::LockBlocked { owner });
        }
        let result = self.release_cubes_locked(app_id, new_snapshot_version);
        if let Err(e) = self.unlock_app(app_id) {
            log::warn!("Unable to release lock after releasing {}: {}", app_id, e);
        }
        result
    }

    fn release_cubes_locked(
        &self,
        app_id: &ApplicationId,
        new_snapshot_version: &str,
    ) -> RepoResult<usize> {
        if !self.config().skip_release_quiesce {
            log::info!(
                "Release of {}: waiting {:?} for in-flight readers to drain",
                app_id,
                self.config().release_quiesce
            );
            std::thread::sleep(self.config().release_quiesce);
        }

        for branch in self.persister().get_branches(app_id)? {
            if branch.eq_ignore_ascii_case(HEAD) {
                continue;
            }
            let branch_id = app_id.as_branch(&branch);
            let moved = self
                .persister()
                .move_branch(&branch_id, new_snapshot_version)?;
            log::info!(
                "Release of {}: moved branch '{}' ({} revision(s)) to {}",
                app_id,
                branch,
                moved,
                new_snapshot_version
            );
        }

        let count = self
            .persister()
            .release_cubes(app_id, new_snapshot_version)?;

        let released_head = app_id.as_release().as_head();
        let new_head = app_id
            .as_version(new_snapshot_version)
            .as_snapshot()
            .as_head();
        self.persister().copy_branch(&released_head, &new_head)?;

        self.cache().clear_branches(app_id);
        self.broadcast(app_id);
        log::info!(
            "Released {}/{} {} ({} cube(s)); next snapshot is {}",
            app_id.tenant(),
            app_id.app(),
            app_id.version(),
            count,
            new_snapshot_version
        );
        Ok(count)
    }

    // ========================================================================
    // Branch administration
    // ========================================================================

    /// Copy every cube of one branch into a new, empty branch.
    pub fn copy_branch(
        &self,
        source: &ApplicationId,
        target: &ApplicationId,
    ) -> RepoResult<usize> {
        if source == target {
            return Err(RepoError::input("Cannot copy a branch onto itself"));
        }
        assert_not_release(target)?;
        if !self
            .persister()
            .search(target, None, None, &SearchOptions::default())?
            .is_empty()
        {
            return Err(RepoError::input(format!(
                "Branch '{}' already exists in {}/{} {}",
                target.branch(),
                target.tenant(),
                target.app(),
                target.version()
            )));
        }
        self.assert_not_lock_blocked(target)?;

        let count = self.persister().copy_branch(source, target)?;
        if !target.is_head() {
            self.provision_branch_permissions(target)?;
        }
        self.cache().clear(target);
        self.broadcast(target);
        log::info!("Copied {} cube(s) from {} to {}", count, source, target);
        Ok(count)
    }

    /// Delete a branch and its revisions, including its per-branch
    /// permission workspace.
    pub fn delete_branch(&self, app_id: &ApplicationId) -> RepoResult<()> {
        if app_id.is_head() {
            return Err(RepoError::input("Cannot delete the HEAD branch"));
        }
        self.assert_permissions(app_id, "*", Action::Update)?;
        self.assert_not_lock_blocked(app_id)?;

        self.persister().delete_branch(app_id)?;
        let branch_boot = app_id.boot_branch(app_id.branch());
        self.persister().delete_branch(&branch_boot)?;

        self.cache().clear(app_id);
        self.cache().clear(&branch_boot);
        self.broadcast(app_id);
        log::info!("Deleted branch {}", app_id);
        Ok(())
    }

    // ========================================================================
    // Bootstrap
    // ========================================================================

    /// Provision administrative cubes when a workspace has no records at
    /// all. A no-op whenever any record exists.
    pub fn detect_new_app_id(&self, app_id: &ApplicationId) -> RepoResult<()> {
        if !self
            .persister()
            .search(app_id, None, None, &SearchOptions::default())?
            .is_empty()
        {
            return Ok(());
        }
        self.provision_app_admin_cubes(app_id)?;
        if !app_id.is_head() {
            self.provision_branch_permissions(app_id)?;
        }
        Ok(())
    }

    fn provision_app_admin_cubes(&self, app_id: &ApplicationId) -> RepoResult<()> {
        let boot = app_id.boot();
        let user = context::acting_user();
        let mut created = false;

        if self.load_cube_internal(&boot, SYS_USERGROUPS)?.is_none() {
            let cube = self.build_usergroups_cube(&boot, &user);
            self.persister().update_cube(&boot, &*cube, &user)?;
            self.cache().remove(&boot, SYS_USERGROUPS);
            created = true;
        }
        if self.load_cube_internal(&boot, SYS_PERMISSIONS)?.is_none() {
            let cube = self.build_permissions_cube(&boot);
            self.persister().update_cube(&boot, &*cube, &user)?;
            self.cache().remove(&boot, SYS_PERMISSIONS);
            created = true;
        }
        if self.load_cube_internal(&boot, SYS_LOCK)?.is_none() {
            let cube = self.build_lock_cube(&boot);
            self.persister().update_cube(&boot, &*cube, &user)?;
            self.cache().remove(&boot, SYS_LOCK);
            created = true;
        }

        if created {
            self.role_cache().clear();
            self.broadcast(&boot);
            log::info!(
                "Provisioned administrative cubes for {}/{} (created by '{}')",
                app_id.tenant(),
                app_id.app(),
                user
            );
        }
        Ok(())
    }

    /// Default membership: the creator is admin and user, everyone else
    /// is user.
    fn build_usergroups_cube(&self, boot: &ApplicationId, creator: &str) -> Arc<dyn Cube> {
        let axes = vec![
            Axis::with_default(AXIS_USER, vec![creator.to_string()]),
            Axis::new(
                AXIS_ROLE,
                vec![
                    ROLE_ADMIN.to_string(),
                    ROLE_USER.to_string(),
                    ROLE_READONLY.to_string(),
                ],
            ),
        ];
        let cube = self.cube_factory().create(boot, SYS_USERGROUPS, axes);
        cube.set_cell(
            CellValue::Bool(true),
            &coordinate([(AXIS_USER, creator), (AXIS_ROLE, ROLE_ADMIN)]),
        );
        cube.set_cell(
            CellValue::Bool(true),
            &coordinate([(AXIS_USER, creator), (AXIS_ROLE, ROLE_USER)]),
        );
        // The empty string binds no column, so this lands on the default
        // column: every unknown user gets the user role.
        cube.set_cell(
            CellValue::Bool(true),
            &coordinate([(AXIS_USER, ""), (AXIS_ROLE, ROLE_USER)]),
        );
        cube
    }

    /// Default matrix: admins do everything; users read, update and
    /// commit; readonly reads. The administrative cubes themselves get
    /// explicit columns so only admins can change them.
    fn build_permissions_cube(&self, boot: &ApplicationId) -> Arc<dyn Cube> {
        let guarded = [SYS_PERMISSIONS, SYS_USERGROUPS, SYS_BRANCH_PERMISSIONS, SYS_LOCK];
        let axes = vec![
            Axis::with_default(
                AXIS_RESOURCE,
                guarded.iter().map(|s| s.to_string()).collect(),
            ),
            Axis::new(
                AXIS_ROLE,
                vec![
                    ROLE_ADMIN.to_string(),
                    ROLE_USER.to_string(),
                    ROLE_READONLY.to_string(),
                ],
            ),
            Axis::new(AXIS_ACTION, ALL_ACTIONS.iter().map(|s| s.to_string()).collect()),
        ];
        let cube = self.cube_factory().create(boot, SYS_PERMISSIONS, axes);

        let grant = |resource: &str, role: &str, action: &str| {
            cube.set_cell(
                CellValue::Bool(true),
                &coordinate([
                    (AXIS_RESOURCE, resource),
                    (AXIS_ROLE, role),
                    (AXIS_ACTION, action),
                ]),
            );
        };

        // Default resource column (empty string binds no explicit column).
        for action in ALL_ACTIONS {
            grant("", ROLE_ADMIN, action);
        }
        for action in ["read", "update", "commit"] {
            grant("", ROLE_USER, action);
        }
        grant("", ROLE_READONLY, "read");

        for resource in guarded {
            for action in ALL_ACTIONS {
                grant(resource, ROLE_ADMIN, action);
            }
            grant(resource, ROLE_USER, "read");
            grant(resource, ROLE_READONLY, "read");
        }
        // Any user may take the application lock.
        grant(SYS_LOCK, ROLE_USER, "update");

        cube
    }

    /// Single default-column cell holding the lock owner. Never cached,
    /// so lock state is read from the persister on every check.
    fn build_lock_cube(&self, boot: &ApplicationId) -> Arc<dyn Cube> {
        let axes = vec![Axis::with_default(AXIS_SYSTEM, Vec::new())];
        let cube = self.cube_factory().create(boot, SYS_LOCK, axes);
        cube.set_meta_property("cache", CellValue::Bool(false));
        cube
    }

    /// Create the per-branch permission cube granting the creator full
    /// access, then seed the branch's boot workspace from HEAD.
    pub(crate) fn provision_branch_permissions(
        &self,
        app_id: &ApplicationId,
    ) -> RepoResult<()> {
        let branch_boot = app_id.boot_branch(app_id.branch());
        if self
            .load_cube_internal(&branch_boot, SYS_BRANCH_PERMISSIONS)?
            .is_some()
        {
            return Ok(());
        }

        let user = context::acting_user();
        let axes = vec![
            Axis::with_default(AXIS_RESOURCE, Vec::new()),
            Axis::with_default(AXIS_USER, vec![user.clone()]),
        ];
        let cube = self
            .cube_factory()
            .create(&branch_boot, SYS_BRANCH_PERMISSIONS, axes);
        cube.set_cell(
            CellValue::Bool(true),
            &coordinate([(AXIS_RESOURCE, ""), (AXIS_USER, user.as_str())]),
        );
        self.persister().update_cube(&branch_boot, &*cube, &user)?;
        self.cache().remove(&branch_boot, SYS_BRANCH_PERMISSIONS);
        self.role_cache().clear();

        // Seed the branch's boot workspace with the HEAD administrative
        // cubes. This is part of bootstrap, so it pulls directly rather
        // than going through the permission funnel.
        let boot_head = app_id.boot();
        let head_records =
            self.persister()
                .search(&boot_head, None, None, &SearchOptions::default())?;
        let ids: Vec<i64> = head_records.iter().map(|info| info.id).collect();
        if !ids.is_empty() {
            self.persister().pull_to_branch(&branch_boot, &ids, &user)?;
        }
        self.cache().clear(&branch_boot);
        log::info!(
            "Provisioned branch permissions for '{}' of {}/{} (creator '{}')",
            app_id.branch(),
            app_id.tenant(),
            app_id.app(),
            user
        );
        Ok(())
    }
}

fn reject_sys_version(version: &str) -> RepoResult<()> {
    if version == SYS_VERSION {
        Err(RepoError::input(format!(
            "Version {} is reserved for system configuration",
            SYS_VERSION
        )))
    } else {
        Ok(())
    }
}
