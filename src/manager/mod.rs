//! Repository Manager Module
//!
//! The process-wide façade over the repository:
//! - Serves cubes by name through the coherent cache
//! - Runs every mutation through the same funnel: validation →
//!   permission check → lock check → persister call → cache
//!   invalidation → broadcast
//! - Hosts the permission evaluator, lock coordinator, branch engine
//!   and lifecycle controller as submodules of one façade
//!
//! ## Submodules
//!
//! - `permissions`: role resolution and resource-pattern evaluation
//! - `lock`: the durable application-wide advisory lock
//! - `branch`: diff, commit, update and three-way merge orchestration
//! - `lifecycle`: release, version move, branch copy and bootstrap

pub mod branch;
pub mod lifecycle;
pub mod lock;
pub mod permissions;

pub use branch::BranchUpdateReport;
pub use permissions::Action;

use crate::appid::ApplicationId;
use crate::cache::{AdviceRegistry, CacheEntry, CacheRegistry};
use crate::context;
use crate::error::{RepoError, RepoResult};
use crate::ports::broadcast::{Broadcaster, LogBroadcaster};
use crate::ports::cube::{Advice, CellValue, Coordinate, Cube, CubeFactory, LoaderFactory, ResourceLoader};
use crate::ports::delta::DeltaProcessor;
use crate::ports::persister::{CubeInfo, Persister, SearchOptions};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Administrative cube names
// ============================================================================

/// Resolves runtime application ids from coordinate maps.
pub const SYS_BOOTSTRAP: &str = "sys.bootstrap";

/// Yields a resource loader per input coordinate.
pub const SYS_CLASSPATH: &str = "sys.classpath";

/// `{resource, role, action}` permission matrix.
pub const SYS_PERMISSIONS: &str = "sys.permissions";

/// `{user, role}` membership matrix.
pub const SYS_USERGROUPS: &str = "sys.usergroups";

/// `{resource, user}` per-branch permission matrix.
pub const SYS_BRANCH_PERMISSIONS: &str = "sys.branch.permissions";

/// Single-cell application lock cube.
pub const SYS_LOCK: &str = "sys.lock";

/// Reserved for host prototyping support; never touched by the manager.
pub const SYS_PROTOTYPE: &str = "sys.prototype";

// ============================================================================
// Configuration
// ============================================================================

/// Tuning knobs for the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long a release waits after taking the lock for in-flight
    /// readers to drain.
    pub release_quiesce: Duration,

    /// Skip the quiesce wait entirely. Set by test harnesses.
    pub skip_release_quiesce: bool,

    /// How long memoised role lookups stay valid on the fast permission
    /// path.
    pub permission_cache_ttl: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            release_quiesce: Duration::from_secs(10),
            skip_release_quiesce: false,
            permission_cache_ttl: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// The repository manager façade. One instance per process; all public
/// operations are thread-safe.
pub struct CubeManager {
    persister: Arc<dyn Persister>,
    deltas: Arc<dyn DeltaProcessor>,
    cubes: Arc<dyn CubeFactory>,
    loader_factory: Option<Arc<dyn LoaderFactory>>,
    broadcaster: Arc<dyn Broadcaster>,
    cache: CacheRegistry,
    advices: AdviceRegistry,
    role_cache: DashMap<(String, String), permissions::RoleSnapshot>,
    config: ManagerConfig,
}

impl CubeManager {
    /// Create a manager over the given ports with default configuration
    /// and a log-only broadcaster.
    pub fn new(
        persister: Arc<dyn Persister>,
        deltas: Arc<dyn DeltaProcessor>,
        cubes: Arc<dyn CubeFactory>,
    ) -> Self {
        Self {
            persister,
            deltas,
            cubes,
            loader_factory: None,
            broadcaster: Arc::new(LogBroadcaster),
            cache: CacheRegistry::new(),
            advices: AdviceRegistry::new(),
            role_cache: DashMap::new(),
            config: ManagerConfig::default(),
        }
    }

    /// Replace the broadcaster.
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    /// Install a loader factory for `sys.classpath` resolution.
    pub fn with_loader_factory(mut self, factory: Arc<dyn LoaderFactory>) -> Self {
        self.loader_factory = Some(factory);
        self
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub(crate) fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub(crate) fn persister(&self) -> &dyn Persister {
        &*self.persister
    }

    pub(crate) fn deltas(&self) -> &dyn DeltaProcessor {
        &*self.deltas
    }

    pub(crate) fn cube_factory(&self) -> &dyn CubeFactory {
        &*self.cubes
    }

    pub(crate) fn cache(&self) -> &CacheRegistry {
        &self.cache
    }

    pub(crate) fn role_cache(&self) -> &DashMap<(String, String), permissions::RoleSnapshot> {
        &self.role_cache
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// Fetch a cube by name. `Ok(None)` means the cube does not exist; the
    /// miss is cached so repeated lookups never re-query the persister.
    pub fn get_cube(
        &self,
        app_id: &ApplicationId,
        name: &str,
    ) -> RepoResult<Option<Arc<dyn Cube>>> {
        self.assert_permissions(app_id, name, Action::Read)?;
        self.load_cube_internal(app_id, name)
    }

    /// Cache-aware load without a permission check. The permission
    /// evaluator itself loads administrative cubes through this path.
    pub(crate) fn load_cube_internal(
        &self,
        app_id: &ApplicationId,
        name: &str,
    ) -> RepoResult<Option<Arc<dyn Cube>>> {
        match self.cache.get(app_id, name) {
            Some(CacheEntry::Cube(cube)) => return Ok(Some(cube)),
            Some(CacheEntry::NotFound) => return Ok(None),
            None => {}
        }

        match self.persister.load_cube(app_id, name)? {
            Some(cube) => Ok(Some(self.hydrate(app_id, cube))),
            None => {
                self.cache.put_not_found(app_id, name);
                Ok(None)
            }
        }
    }

    /// Attach advices and hand the cube to the cache, adopting the winner
    /// of any concurrent hydration race.
    pub(crate) fn hydrate(&self, app_id: &ApplicationId, cube: Arc<dyn Cube>) -> Arc<dyn Cube> {
        cube.set_app_id(app_id.clone());
        self.advices.apply(app_id, &*cube);
        self.cache.put(app_id, cube)
    }

    /// True when a live cube is resident in the cache.
    pub fn is_cube_cached(&self, app_id: &ApplicationId, name: &str) -> bool {
        self.cache.is_cached(app_id, name)
    }

    /// Search cube records, filtered down to those the acting user may
    /// read.
    pub fn search(
        &self,
        app_id: &ApplicationId,
        name_pattern: Option<&str>,
        content_pattern: Option<&str>,
        options: &SearchOptions,
    ) -> RepoResult<Vec<CubeInfo>> {
        let records = self
            .persister
            .search(app_id, name_pattern, content_pattern, options)?;
        let mut visible = Vec::with_capacity(records.len());
        for info in records {
            if self.fast_check(app_id, &info.name, Action::Read)? {
                visible.push(info);
            }
        }
        Ok(visible)
    }

    /// Revision history of one cube, newest first.
    pub fn get_revisions(
        &self,
        app_id: &ApplicationId,
        name: &str,
    ) -> RepoResult<Vec<CubeInfo>> {
        self.assert_permissions(app_id, name, Action::Read)?;
        self.persister.get_revisions(app_id, name)
    }

    /// All application names under a tenant.
    pub fn get_app_names(&self, tenant: &str) -> RepoResult<Vec<String>> {
        self.persister.get_app_names(tenant)
    }

    /// Versions of an application, grouped by status.
    pub fn get_versions(
        &self,
        tenant: &str,
        app: &str,
    ) -> RepoResult<HashMap<crate::appid::ReleaseStatus, Vec<String>>> {
        self.persister.get_versions(tenant, app)
    }

    /// Branch names under an application version.
    pub fn get_branches(&self, app_id: &ApplicationId) -> RepoResult<HashSet<String>> {
        self.persister.get_branches(app_id)
    }

    /// Number of branches under an application version.
    pub fn get_branch_count(&self, app_id: &ApplicationId) -> RepoResult<usize> {
        Ok(self.persister.get_branches(app_id)?.len())
    }

    /// Commit notes of a cube. Missing cubes are an error here, unlike
    /// [`Self::get_cube`].
    pub fn get_notes(&self, app_id: &ApplicationId, name: &str) -> RepoResult<String> {
        self.assert_permissions(app_id, name, Action::Read)?;
        self.persister.get_notes(app_id, name)
    }

    /// Test data attached to a cube. Missing cubes are an error.
    pub fn get_test_data(&self, app_id: &ApplicationId, name: &str) -> RepoResult<String> {
        self.assert_permissions(app_id, name, Action::Read)?;
        self.persister.get_test_data(app_id, name)
    }

    /// Names of every cube reachable from `name` through reference axes.
    /// Walks iteratively and tolerates reference cycles.
    pub fn get_referenced_cube_names(
        &self,
        app_id: &ApplicationId,
        name: &str,
    ) -> RepoResult<HashSet<String>> {
        let mut references = HashSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack = vec![name.to_string()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.to_lowercase()) {
                continue;
            }
            let cube = self.get_cube(app_id, &current)?.ok_or_else(|| {
                RepoError::Configuration(format!(
                    "Cube '{}' references non-existing cube '{}'",
                    name, current
                ))
            })?;
            for referenced in cube.referenced_cube_names() {
                if !visited.contains(&referenced.to_lowercase()) {
                    stack.push(referenced.clone());
                }
                references.insert(referenced);
            }
        }
        Ok(references)
    }

    // ========================================================================
    // Advice
    // ========================================================================

    /// Bind an advice to a wildcard. The advice is applied immediately to
    /// every matching cube already resident and lazily to cubes hydrated
    /// later.
    pub fn register_advice(
        &self,
        app_id: &ApplicationId,
        wildcard: &str,
        advice: Arc<dyn Advice>,
    ) {
        self.advices.register(app_id, wildcard, advice);
        for cube in self.cache.cached_cubes(app_id) {
            self.advices.apply(app_id, &*cube);
        }
    }

    // ========================================================================
    // Cache control
    // ========================================================================

    /// Evict everything cached for one workspace, releasing any resource
    /// loaders it held.
    pub fn clear_cache(&self, app_id: &ApplicationId) {
        self.cache.clear(app_id);
        self.role_cache.clear();
    }

    /// Drop every cache slice in the process. Test support.
    pub fn clear_all_caches(&self) {
        self.cache.clear_all();
        self.role_cache.clear();
    }

    // ========================================================================
    // Bootstrap and classpath resolution
    // ========================================================================

    /// Resolve the runtime application id for a tenant/app pair from its
    /// `sys.bootstrap` cube.
    pub fn resolve_app_id(
        &self,
        tenant: &str,
        app: &str,
        coord: &Coordinate,
    ) -> RepoResult<ApplicationId> {
        let boot = ApplicationId::new(
            tenant,
            app,
            crate::appid::SYS_VERSION,
            crate::appid::ReleaseStatus::Snapshot,
            crate::appid::HEAD,
        )?;
        let cube = self
            .load_cube_internal(&boot, SYS_BOOTSTRAP)?
            .ok_or_else(|| {
                RepoError::Configuration(format!("Missing {} cube for {}/{}", SYS_BOOTSTRAP, tenant, app))
            })?;

        let cell = cube.cell(coord).ok_or_else(|| {
            RepoError::Configuration(format!("{} has no cell for coordinate {:?}", SYS_BOOTSTRAP, coord))
        })?;

        let version = cell
            .get("version")
            .and_then(CellValue::as_str)
            .ok_or_else(|| {
                RepoError::Configuration(format!("{} cell lacks a version", SYS_BOOTSTRAP))
            })?;
        let status = match cell.get("status").and_then(CellValue::as_str) {
            Some(status) => crate::appid::ReleaseStatus::parse(status)?,
            None => crate::appid::ReleaseStatus::Snapshot,
        };
        let branch = cell
            .get("branch")
            .and_then(CellValue::as_str)
            .unwrap_or(crate::appid::HEAD);

        Ok(ApplicationId::new(tenant, app, version, status, branch)?)
    }

    /// Resolve (and cache) the resource loader for a classpath coordinate.
    /// The `env` coordinate is injected from `CUBEVAULT_ENV` when absent.
    pub fn resolve_loader(
        &self,
        app_id: &ApplicationId,
        coord: &Coordinate,
    ) -> RepoResult<Arc<dyn ResourceLoader>> {
        let factory = self.loader_factory.as_ref().ok_or_else(|| {
            RepoError::Configuration("No loader factory configured".to_string())
        })?;

        let mut coord = coord.clone();
        if !coord.contains_key("env") {
            if let Some(env) = context::env_level() {
                coord.insert("env".to_string(), env);
            }
        }

        let key = loader_cache_key(app_id, &coord);
        if let Some(loader) = self.cache.loader(&key) {
            return Ok(loader);
        }

        let cube = self
            .load_cube_internal(app_id, SYS_CLASSPATH)?
            .ok_or_else(|| {
                RepoError::Resource(format!("No {} cube in {}", SYS_CLASSPATH, app_id))
            })?;
        let loader = factory.loader_for(&*cube, &coord)?;
        Ok(self.cache.put_loader(key, loader))
    }

    // ========================================================================
    // Single-cube mutations
    // ========================================================================

    /// Create or update a cube in a workspace.
    pub fn update_cube(&self, app_id: &ApplicationId, cube: Arc<dyn Cube>) -> RepoResult<()> {
        let name = cube.name();
        validate_cube_name(&name)?;
        assert_not_release(app_id)?;
        self.detect_new_app_id(app_id)?;
        self.assert_permissions(app_id, &name, Action::Update)?;
        self.assert_not_lock_blocked(app_id)?;

        cube.set_app_id(app_id.clone());
        let user = context::acting_user();
        self.persister.update_cube(app_id, &*cube, &user)?;

        self.invalidate(app_id, &name);
        self.broadcaster.broadcast(app_id);
        Ok(())
    }

    /// Copy a cube, possibly across workspaces and names.
    pub fn duplicate_cube(
        &self,
        new_app_id: &ApplicationId,
        old_app_id: &ApplicationId,
        old_name: &str,
        new_name: &str,
    ) -> RepoResult<()> {
        validate_cube_name(new_name)?;
        assert_not_release(new_app_id)?;
        if new_app_id == old_app_id && new_name.eq_ignore_ascii_case(old_name) {
            return Err(RepoError::input(
                "Duplicate must change the cube name or the workspace",
            ));
        }
        self.detect_new_app_id(new_app_id)?;
        self.assert_permissions(old_app_id, old_name, Action::Read)?;
        self.assert_permissions(new_app_id, new_name, Action::Update)?;
        self.assert_not_lock_blocked(new_app_id)?;

        let user = context::acting_user();
        self.persister
            .duplicate_cube(old_app_id, new_app_id, old_name, new_name, &user)?;

        self.invalidate(new_app_id, new_name);
        self.broadcaster.broadcast(new_app_id);
        Ok(())
    }

    /// Rename a cube within a workspace.
    pub fn rename_cube(
        &self,
        app_id: &ApplicationId,
        old_name: &str,
        new_name: &str,
    ) -> RepoResult<()> {
        validate_cube_name(new_name)?;
        assert_not_release(app_id)?;
        if old_name.eq_ignore_ascii_case(new_name) {
            return Err(RepoError::input("Rename must change the cube name"));
        }
        self.assert_permissions(app_id, old_name, Action::Update)?;
        self.assert_permissions(app_id, new_name, Action::Update)?;
        self.assert_not_lock_blocked(app_id)?;

        let user = context::acting_user();
        self.persister
            .rename_cube(app_id, old_name, new_name, &user)?;

        // A rename in or out of sys.classpath re-wires loader resolution
        // for the whole workspace.
        if is_classpath(old_name) || is_classpath(new_name) {
            self.cache.clear(app_id);
        } else {
            self.cache.remove(app_id, old_name);
            self.cache.remove(app_id, new_name);
        }
        self.invalidate_roles_if_admin_cube(old_name);
        self.broadcaster.broadcast(app_id);
        Ok(())
    }

    /// Tombstone cubes in a workspace.
    pub fn delete_cubes(&self, app_id: &ApplicationId, names: &[String]) -> RepoResult<()> {
        validate_batch(names)?;
        assert_not_release(app_id)?;
        for name in names {
            self.assert_permissions(app_id, name, Action::Update)?;
        }
        self.assert_not_lock_blocked(app_id)?;

        let user = context::acting_user();
        self.persister.delete_cubes(app_id, names, false, &user)?;

        for name in names {
            self.invalidate(app_id, name);
        }
        self.broadcaster.broadcast(app_id);
        Ok(())
    }

    /// Attach commit notes to a cube.
    pub fn update_notes(
        &self,
        app_id: &ApplicationId,
        name: &str,
        notes: &str,
    ) -> RepoResult<()> {
        assert_not_release(app_id)?;
        self.assert_permissions(app_id, name, Action::Update)?;
        self.assert_not_lock_blocked(app_id)?;
        self.persister.update_notes(app_id, name, notes)
    }

    /// Attach test data to a cube.
    pub fn update_test_data(
        &self,
        app_id: &ApplicationId,
        name: &str,
        test_data: &str,
    ) -> RepoResult<()> {
        assert_not_release(app_id)?;
        self.assert_permissions(app_id, name, Action::Update)?;
        self.assert_not_lock_blocked(app_id)?;
        self.persister.update_test_data(app_id, name, test_data)
    }

    // ========================================================================
    // Shared plumbing
    // ========================================================================

    /// Apply the single-cube invalidation rule: a classpath write evicts
    /// the whole workspace, anything else evicts exactly that cube.
    pub(crate) fn invalidate(&self, app_id: &ApplicationId, name: &str) {
        if is_classpath(name) {
            self.cache.clear(app_id);
        } else {
            self.cache.remove(app_id, name);
        }
        self.invalidate_roles_if_admin_cube(name);
    }

    fn invalidate_roles_if_admin_cube(&self, name: &str) {
        if name.eq_ignore_ascii_case(SYS_USERGROUPS)
            || name.eq_ignore_ascii_case(SYS_PERMISSIONS)
            || name.eq_ignore_ascii_case(SYS_BRANCH_PERMISSIONS)
        {
            self.role_cache.clear();
        }
    }

    pub(crate) fn broadcast(&self, app_id: &ApplicationId) {
        self.broadcaster.broadcast(app_id);
    }
}

/// True for the classpath administrative cube name.
pub(crate) fn is_classpath(name: &str) -> bool {
    name.eq_ignore_ascii_case(SYS_CLASSPATH)
}

/// Reject RELEASE workspaces on every mutation path.
pub(crate) fn assert_not_release(app_id: &ApplicationId) -> RepoResult<()> {
    if app_id.is_release() {
        Err(RepoError::input(format!(
            "Cannot mutate a RELEASE workspace: {}",
            app_id
        )))
    } else {
        Ok(())
    }
}

/// Cube names: non-empty, printable, no path separators.
pub(crate) fn validate_cube_name(name: &str) -> RepoResult<()> {
    let valid = !name.trim().is_empty()
        && name == name.trim()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '));
    if valid {
        Ok(())
    } else {
        Err(RepoError::input(format!("Invalid cube name: '{}'", name)))
    }
}

pub(crate) fn validate_batch(names: &[String]) -> RepoResult<()> {
    if names.is_empty() {
        return Err(RepoError::input("Empty cube name batch"));
    }
    for name in names {
        validate_cube_name(name)?;
    }
    Ok(())
}

fn loader_cache_key(app_id: &ApplicationId, coord: &Coordinate) -> String {
    let mut key = crate::cache::loader_prefix(app_id);
    for (axis, value) in coord {
        key.push_str(axis);
        key.push('=');
        key.push_str(value);
        key.push(';');
    }
    key
}
