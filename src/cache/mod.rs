//! Cube Cache Module
//!
//! Coherent in-memory cache over the persister:
//! - Two-level concurrent map: workspace id → lowercase cube name → entry
//! - Negative caching through a distinct `NotFound` sentinel, so repeated
//!   misses never re-query the persister
//! - Honors the `cache` meta-property of individual cubes
//! - Hierarchical eviction: one cube, one workspace, every branch of a
//!   version, or everything
//! - Owns the resource-loader handles resolved from `sys.classpath` and
//!   releases them on workspace eviction

pub mod advice;

pub use advice::AdviceRegistry;

use crate::appid::ApplicationId;
use crate::ports::cube::{Cube, ResourceLoader};
use dashmap::DashMap;
use std::sync::Arc;

/// A cache slot: a hydrated cube or the knowledge that none exists.
#[derive(Clone)]
pub enum CacheEntry {
    /// A live cube
    Cube(Arc<dyn Cube>),

    /// The persister was asked and had nothing. Distinct from an absent
    /// key, which means the persister was never asked.
    NotFound,
}

impl CacheEntry {
    /// The cube, when present.
    pub fn cube(&self) -> Option<Arc<dyn Cube>> {
        match self {
            CacheEntry::Cube(cube) => Some(cube.clone()),
            CacheEntry::NotFound => None,
        }
    }

    /// True for the negative-cache sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheEntry::NotFound)
    }
}

type Slice = Arc<DashMap<String, CacheEntry>>;

/// The process-wide cube cache.
pub struct CacheRegistry {
    cubes: DashMap<ApplicationId, Slice>,
    loaders: DashMap<String, Arc<dyn ResourceLoader>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            cubes: DashMap::new(),
            loaders: DashMap::new(),
        }
    }

    fn slice(&self, app_id: &ApplicationId) -> Slice {
        if let Some(slice) = self.cubes.get(app_id) {
            return slice.clone();
        }
        self.cubes
            .entry(app_id.clone())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone()
    }

    /// Look up a cube. `None` means the persister has never been asked.
    pub fn get(&self, app_id: &ApplicationId, name: &str) -> Option<CacheEntry> {
        let slice = self.cubes.get(app_id)?;
        slice.get(&name.to_lowercase()).map(|e| e.clone())
    }

    /// Store a freshly hydrated cube, unless its `cache` meta-property
    /// opts out.
    ///
    /// Two threads hydrating the same cube race here; the loser adopts the
    /// winner's instance, which is the one returned.
    pub fn put(&self, app_id: &ApplicationId, cube: Arc<dyn Cube>) -> Arc<dyn Cube> {
        if !cube.cacheable() {
            return cube;
        }
        let slice = self.slice(app_id);
        let key = cube.name().to_lowercase();
        let entry = slice
            .entry(key)
            .and_modify(|existing| {
                // A stale NotFound sentinel loses to the cube we just loaded.
                if existing.is_not_found() {
                    *existing = CacheEntry::Cube(cube.clone());
                }
            })
            .or_insert_with(|| CacheEntry::Cube(cube.clone()));
        match &*entry {
            CacheEntry::Cube(winner) => winner.clone(),
            CacheEntry::NotFound => cube,
        }
    }

    /// Record that a cube does not exist.
    pub fn put_not_found(&self, app_id: &ApplicationId, name: &str) {
        let slice = self.slice(app_id);
        slice
            .entry(name.to_lowercase())
            .or_insert(CacheEntry::NotFound);
    }

    /// Evict one entry, case-insensitively.
    pub fn remove(&self, app_id: &ApplicationId, name: &str) -> bool {
        match self.cubes.get(app_id) {
            Some(slice) => slice.remove(&name.to_lowercase()).is_some(),
            None => false,
        }
    }

    /// Evict everything cached for one workspace, including resource
    /// loaders resolved from its `sys.classpath`.
    pub fn clear(&self, app_id: &ApplicationId) {
        self.cubes.remove(app_id);
        self.drop_loaders(&loader_prefix(app_id));
        log::debug!("Cache cleared for {}", app_id);
    }

    /// Evict every branch of the version addressed by `app_id`. Used when
    /// a version is released or moved, which invalidates all branches
    /// under it.
    pub fn clear_branches(&self, app_id: &ApplicationId) {
        let target = app_id.branch_agnostic_cache_key();
        let evicted: Vec<ApplicationId> = self
            .cubes
            .iter()
            .filter(|entry| entry.key().branch_agnostic_cache_key() == target)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &evicted {
            self.cubes.remove(id);
            self.drop_loaders(&loader_prefix(id));
        }
        log::info!(
            "Cache cleared for {} branch workspace(s) of {}",
            evicted.len(),
            target
        );
    }

    /// Drop every slice. Test support.
    pub fn clear_all(&self) {
        self.cubes.clear();
        self.loaders.clear();
    }

    /// True when a live cube (not the sentinel) is resident.
    pub fn is_cached(&self, app_id: &ApplicationId, name: &str) -> bool {
        matches!(self.get(app_id, name), Some(CacheEntry::Cube(_)))
    }

    /// Names of live cubes resident for a workspace.
    pub fn cached_cubes(&self, app_id: &ApplicationId) -> Vec<Arc<dyn Cube>> {
        match self.cubes.get(app_id) {
            Some(slice) => slice.iter().filter_map(|e| e.value().cube()).collect(),
            None => Vec::new(),
        }
    }

    // -- resource loaders --------------------------------------------------

    /// Cached loader for a classpath coordinate, if resolved before.
    pub fn loader(&self, key: &str) -> Option<Arc<dyn ResourceLoader>> {
        self.loaders.get(key).map(|l| l.clone())
    }

    /// Cache a resolved loader; the winner of a resolution race is kept
    /// and returned.
    pub fn put_loader(
        &self,
        key: String,
        loader: Arc<dyn ResourceLoader>,
    ) -> Arc<dyn ResourceLoader> {
        self.loaders
            .entry(key)
            .or_insert(loader)
            .clone()
    }

    /// True when any loader is resident for the workspace.
    pub fn has_loaders(&self, app_id: &ApplicationId) -> bool {
        let prefix = loader_prefix(app_id);
        self.loaders.iter().any(|e| e.key().starts_with(&prefix))
    }

    fn drop_loaders(&self, prefix: &str) {
        let keys: Vec<String> = self
            .loaders
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        for key in keys {
            self.loaders.remove(&key);
        }
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Key prefix under which a workspace's loaders are cached.
pub(crate) fn loader_prefix(app_id: &ApplicationId) -> String {
    format!("{}|", app_id.cache_key())
}
