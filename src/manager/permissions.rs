//! Permission Evaluator
//!
//! Role-based, resource-pattern access control backed by administrative
//! cubes rather than a dedicated store:
//! - `sys.usergroups` maps users to roles
//! - `sys.permissions` is the `{resource, role, action}` matrix
//! - `sys.branch.permissions` gates mutating actions per branch for
//!   non-admin users
//!
//! Resources are cube names or `cube/axis` pairs; columns of the
//! `resource` axes are glob patterns matched against the request. When no
//! pattern column matches, the axis default column decides.

use super::{CubeManager, SYS_BRANCH_PERMISSIONS, SYS_LOCK, SYS_PERMISSIONS, SYS_USERGROUPS};
use crate::appid::ApplicationId;
use crate::context;
use crate::error::{RepoError, RepoResult};
use crate::patterns;
use crate::ports::cube::{coordinate, CellValue, Cube};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

pub(crate) const AXIS_RESOURCE: &str = "resource";
pub(crate) const AXIS_ROLE: &str = "role";
pub(crate) const AXIS_ACTION: &str = "action";
pub(crate) const AXIS_USER: &str = "user";

pub(crate) const ROLE_ADMIN: &str = "admin";
pub(crate) const ROLE_USER: &str = "user";
pub(crate) const ROLE_READONLY: &str = "readonly";

/// What an operation wants to do with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Update,
    Commit,
    Release,
}

impl Action {
    /// Column value on the `action` axis of `sys.permissions`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Update => "update",
            Action::Commit => "commit",
            Action::Release => "release",
        }
    }

    /// Actions that change branch content and are therefore subject to
    /// the per-branch permission gate.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Action::Update | Action::Commit)
    }
}

/// Memoised outcome of role resolution for one (app, user) pair.
/// `roles: None` records bootstrap mode, where the administrative cubes
/// are absent and everything is allowed.
#[derive(Clone)]
pub(crate) struct RoleSnapshot {
    pub roles: Option<Arc<Vec<String>>>,
    pub at: Instant,
}

impl CubeManager {
    /// Raise unless the acting user may perform `action` on `resource`.
    pub fn assert_permissions(
        &self,
        app_id: &ApplicationId,
        resource: &str,
        action: Action,
    ) -> RepoResult<()> {
        if self.allowed(app_id, resource, action)? {
            Ok(())
        } else {
            Err(RepoError::PermissionDenied(format!(
                "User '{}' lacks {} permission on '{}' in {}",
                context::acting_user(),
                action.as_str(),
                resource,
                app_id
            )))
        }
    }

    /// Full permission evaluation: roles are resolved from the
    /// administrative cubes on every call.
    pub fn allowed(
        &self,
        app_id: &ApplicationId,
        resource: &str,
        action: Action,
    ) -> RepoResult<bool> {
        if is_lock_read(resource, action) {
            return Ok(true);
        }
        let boot = app_id.boot();
        match self.resolve_roles(&boot)? {
            None => Ok(true),
            Some(roles) => self.evaluate(app_id, &boot, &roles, resource, action),
        }
    }

    /// Permission evaluation with memoised role resolution, for callers
    /// checking many resources in a row (list filtering).
    pub fn fast_check(
        &self,
        app_id: &ApplicationId,
        resource: &str,
        action: Action,
    ) -> RepoResult<bool> {
        if is_lock_read(resource, action) {
            return Ok(true);
        }
        let boot = app_id.boot();
        match self.roles_snapshot(&boot)? {
            None => Ok(true),
            Some(roles) => self.evaluate(app_id, &boot, &roles, resource, action),
        }
    }

    /// True when the acting user holds the admin role, or the app is still
    /// in bootstrap mode.
    pub fn is_admin(&self, app_id: &ApplicationId) -> RepoResult<bool> {
        match self.resolve_roles(&app_id.boot())? {
            None => Ok(true),
            Some(roles) => Ok(roles.iter().any(|r| r.eq_ignore_ascii_case(ROLE_ADMIN))),
        }
    }

    fn roles_snapshot(&self, boot: &ApplicationId) -> RepoResult<Option<Arc<Vec<String>>>> {
        let key = (boot.cache_key(), context::acting_user());
        if let Some(snapshot) = self.role_cache().get(&key) {
            if snapshot.at.elapsed() < self.config().permission_cache_ttl {
                return Ok(snapshot.roles.clone());
            }
        }
        let roles = self.resolve_roles(boot)?.map(Arc::new);
        self.role_cache().insert(
            key,
            RoleSnapshot {
                roles: roles.clone(),
                at: Instant::now(),
            },
        );
        Ok(roles)
    }

    /// Role set of the acting user, or `None` when either administrative
    /// cube is missing (bootstrap mode: allow everything).
    fn resolve_roles(&self, boot: &ApplicationId) -> RepoResult<Option<Vec<String>>> {
        let usergroups = match self.load_cube_internal(boot, SYS_USERGROUPS)? {
            Some(cube) => cube,
            None => return Ok(None),
        };
        if self.load_cube_internal(boot, SYS_PERMISSIONS)?.is_none() {
            return Ok(None);
        }

        let role_axis = usergroups.axis(AXIS_ROLE).ok_or_else(|| {
            RepoError::Configuration(format!("{} lacks a '{}' axis", SYS_USERGROUPS, AXIS_ROLE))
        })?;

        let user = context::acting_user();
        let roles = role_axis
            .columns
            .iter()
            .filter(|role| {
                cell_true(usergroups.cell(&coordinate([
                    (AXIS_ROLE, role.as_str()),
                    (AXIS_USER, user.as_str()),
                ])))
            })
            .cloned()
            .collect();
        Ok(Some(roles))
    }

    fn evaluate(
        &self,
        app_id: &ApplicationId,
        boot: &ApplicationId,
        roles: &[String],
        resource: &str,
        action: Action,
    ) -> RepoResult<bool> {
        let is_admin = roles.iter().any(|r| r.eq_ignore_ascii_case(ROLE_ADMIN));
        if !is_admin && action.is_mutating() && !self.branch_gate(app_id, resource)? {
            return Ok(false);
        }

        let permissions = match self.load_cube_internal(boot, SYS_PERMISSIONS)? {
            Some(cube) => cube,
            None => return Ok(true),
        };
        let resource_axis = permissions.axis(AXIS_RESOURCE).ok_or_else(|| {
            RepoError::Configuration(format!("{} lacks a '{}' axis", SYS_PERMISSIONS, AXIS_RESOURCE))
        })?;

        let matching: Vec<&String> = resource_axis
            .columns
            .iter()
            .filter(|column| resource_column_matches(column, resource))
            .collect();

        for role in roles {
            if matching.is_empty() {
                // Nothing matched: the requested value binds the axis
                // default column.
                if cell_true(permissions.cell(&coordinate([
                    (AXIS_RESOURCE, resource),
                    (AXIS_ROLE, role.as_str()),
                    (AXIS_ACTION, action.as_str()),
                ]))) {
                    return Ok(true);
                }
            } else {
                for column in &matching {
                    if cell_true(permissions.cell(&coordinate([
                        (AXIS_RESOURCE, column.as_str()),
                        (AXIS_ROLE, role.as_str()),
                        (AXIS_ACTION, action.as_str()),
                    ]))) {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Per-branch gate for mutating actions by non-admin users. A missing
    /// branch-permission cube leaves the branch open.
    fn branch_gate(&self, app_id: &ApplicationId, resource: &str) -> RepoResult<bool> {
        let branch_boot = app_id.boot_branch(app_id.branch());
        let cube = match self.load_cube_internal(&branch_boot, SYS_BRANCH_PERMISSIONS)? {
            Some(cube) => cube,
            None => return Ok(true),
        };
        let resource_axis = cube.axis(AXIS_RESOURCE).ok_or_else(|| {
            RepoError::Configuration(format!(
                "{} lacks a '{}' axis",
                SYS_BRANCH_PERMISSIONS, AXIS_RESOURCE
            ))
        })?;

        let user = context::acting_user();
        let matching: Vec<&String> = resource_axis
            .columns
            .iter()
            .filter(|column| resource_column_matches(column, resource))
            .collect();

        if matching.is_empty() {
            return Ok(cell_true(cube.cell(&coordinate([
                (AXIS_RESOURCE, resource),
                (AXIS_USER, user.as_str()),
            ]))));
        }
        Ok(matching.iter().any(|column| {
            cell_true(cube.cell(&coordinate([
                (AXIS_RESOURCE, column.as_str()),
                (AXIS_USER, user.as_str()),
            ])))
        }))
    }
}

/// Lock status must be observable to everyone, or nobody could tell who
/// holds the application locked.
fn is_lock_read(resource: &str, action: Action) -> bool {
    if action != Action::Read {
        return false;
    }
    let cube_part = resource.split('/').next().unwrap_or(resource);
    cube_part.eq_ignore_ascii_case(SYS_LOCK)
}

/// Match one `resource` axis column against a requested resource. Both
/// sides are `cube` or `cube/axis`; column parts are glob patterns.
fn resource_column_matches(column: &str, requested: &str) -> bool {
    match (column.split_once('/'), requested.split_once('/')) {
        (Some((col_cube, col_axis)), Some((req_cube, req_axis))) => {
            patterns::matches(col_cube, req_cube) && patterns::matches(col_axis, req_axis)
        }
        (None, None) => patterns::matches(column, requested),
        _ => false,
    }
}

fn cell_true(cell: Option<CellValue>) -> bool {
    match cell {
        Some(CellValue::Bool(b)) => b,
        Some(CellValue::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
