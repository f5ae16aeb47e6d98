//! Application Lock Coordinator
//!
//! A coarse advisory lock over one tenant/app pair, stored in the single
//! cell of the `sys.lock` cube at the boot workspace. The cube is marked
//! non-cacheable, so every read goes to the persister and the lock is
//! visible to every process of the cluster. This is not an in-memory
//! mutex: it serialises administrative operations (release, move), and
//! ordinary mutations only check that nobody else holds it.

use super::{CubeManager, SYS_LOCK};
use crate::appid::ApplicationId;
use crate::context;
use crate::error::{RepoError, RepoResult};
use crate::ports::cube::{coordinate, CellValue, Coordinate, Cube};

pub(crate) const AXIS_SYSTEM: &str = "system";

fn lock_coordinate() -> Coordinate {
    // Any value binds the default column of the single `system` axis.
    coordinate([(AXIS_SYSTEM, "lock")])
}

impl CubeManager {
    /// Who holds the application lock, if anyone.
    pub fn get_app_lock_owner(&self, app_id: &ApplicationId) -> RepoResult<Option<String>> {
        let boot = app_id.boot();
        let cube = match self.load_cube_internal(&boot, SYS_LOCK)? {
            Some(cube) => cube,
            None => return Ok(None),
        };
        match cube.cell(&lock_coordinate()) {
            Some(CellValue::String(owner)) if !owner.is_empty() => Ok(Some(owner)),
            _ => Ok(None),
        }
    }

    /// Acquire the application lock for the acting user. Returns `true`
    /// when the lock is held by the caller afterwards, `false` when
    /// someone else owns it.
    pub fn lock_app(&self, app_id: &ApplicationId) -> RepoResult<bool> {
        let user = context::acting_user();
        self.detect_new_app_id(app_id)?;
        self.assert_permissions(app_id, SYS_LOCK, super::Action::Update)?;

        match self.get_app_lock_owner(app_id)? {
            Some(owner) if owner == user => Ok(true),
            Some(owner) => {
                log::info!(
                    "Lock on {}/{} denied to '{}': held by '{}'",
                    app_id.tenant(),
                    app_id.app(),
                    user,
                    owner
                );
                Ok(false)
            }
            None => {
                let boot = app_id.boot();
                let cube = self.load_cube_internal(&boot, SYS_LOCK)?.ok_or_else(|| {
                    RepoError::Configuration(format!("Missing {} cube for {}", SYS_LOCK, boot))
                })?;
                cube.set_cell(CellValue::String(user.clone()), &lock_coordinate());
                self.persister().update_cube(&boot, &*cube, &user)?;
                log::info!(
                    "Lock on {}/{} acquired by '{}'",
                    app_id.tenant(),
                    app_id.app(),
                    user
                );
                Ok(true)
            }
        }
    }

    /// Release the application lock. Only the owner may unlock.
    pub fn unlock_app(&self, app_id: &ApplicationId) -> RepoResult<()> {
        let user = context::acting_user();
        let owner = self.get_app_lock_owner(app_id)?;
        match owner {
            Some(ref o) if *o == user => {
                let boot = app_id.boot();
                let cube = self.load_cube_internal(&boot, SYS_LOCK)?.ok_or_else(|| {
                    RepoError::Configuration(format!("Missing {} cube for {}", SYS_LOCK, boot))
                })?;
                cube.remove_cell(&lock_coordinate());
                self.persister().update_cube(&boot, &*cube, &user)?;
                log::info!(
                    "Lock on {}/{} released by '{}'",
                    app_id.tenant(),
                    app_id.app(),
                    user
                );
                Ok(())
            }
            other => Err(RepoError::NotLockOwner { owner: other }),
        }
    }

    /// Succeed iff the app is unlocked or locked by the acting user.
    /// Consulted by every mutating operation.
    pub fn assert_not_lock_blocked(&self, app_id: &ApplicationId) -> RepoResult<()> {
        match self.get_app_lock_owner(app_id)? {
            None => Ok(()),
            Some(owner) if owner == context::acting_user() => Ok(()),
            Some(owner) => Err(RepoError::LockBlocked { owner }),
        }
    }

    /// Succeed iff the acting user holds the lock. Required before move
    /// and release operations.
    pub fn assert_locked_by_me(&self, app_id: &ApplicationId) -> RepoResult<()> {
        let owner = self.get_app_lock_owner(app_id)?;
        match owner {
            Some(ref o) if *o == context::acting_user() => Ok(()),
            other => Err(RepoError::NotLockOwner { owner: other }),
        }
    }
}
