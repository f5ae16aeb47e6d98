//! Advice Registry
//!
//! Wildcard-bound interceptors applied lazily when cubes hydrate. An
//! advice registered under `rate.*` attaches to every cube whose
//! `name.method()` matches the glob, where the methods are the columns of
//! the cube's `method` axis when it has one, else the literal `run`.

use crate::appid::ApplicationId;
use crate::patterns;
use crate::ports::cube::{Advice, Cube};
use dashmap::DashMap;
use std::sync::Arc;

const METHOD_AXIS: &str = "method";
const DEFAULT_METHOD: &str = "run";

type Bindings = Arc<DashMap<String, Arc<dyn Advice>>>;

/// Per-workspace advice bindings.
pub struct AdviceRegistry {
    bindings: DashMap<ApplicationId, Bindings>,
}

impl AdviceRegistry {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
        }
    }

    /// Bind an advice to a wildcard within one workspace. Re-registering
    /// the same name and wildcard replaces the binding.
    pub fn register(&self, app_id: &ApplicationId, wildcard: &str, advice: Arc<dyn Advice>) {
        let key = format!("{}/{}", advice.name(), wildcard);
        let slice = self
            .bindings
            .entry(app_id.clone())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone();
        slice.insert(key, advice);
    }

    /// Attach every matching advice to a freshly hydrated cube.
    pub fn apply(&self, app_id: &ApplicationId, cube: &dyn Cube) {
        let slice = match self.bindings.get(app_id) {
            Some(slice) => slice.clone(),
            None => return,
        };
        if slice.is_empty() {
            return;
        }

        let methods = advised_methods(cube);
        let cube_name = cube.name();
        for entry in slice.iter() {
            let wildcard = match entry.key().split_once('/') {
                Some((_, wildcard)) => wildcard.to_string(),
                None => entry.key().clone(),
            };
            for method in &methods {
                let target = format!("{}.{}()", cube_name, method);
                if patterns::matches(&wildcard, &target) {
                    cube.add_advice(entry.value().clone(), method);
                }
            }
        }
    }

    /// Number of bindings for a workspace.
    pub fn count(&self, app_id: &ApplicationId) -> usize {
        self.bindings.get(app_id).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for AdviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn advised_methods(cube: &dyn Cube) -> Vec<String> {
    match cube.axis(METHOD_AXIS) {
        Some(axis) if !axis.columns.is_empty() => axis.columns,
        _ => vec![DEFAULT_METHOD.to_string()],
    }
}
