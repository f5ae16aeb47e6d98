//! Cube Port
//!
//! The cube is a named multi-dimensional decision table. Its cell model,
//! fingerprinting and reference semantics live with the host; the manager
//! only needs the narrow surface below to serve, cache, merge and
//! administer cubes.

use crate::appid::ApplicationId;
use crate::error::RepoResult;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Value stored in a cube cell. Administrative cubes use booleans and
/// strings; application cubes may store any JSON value.
pub type CellValue = serde_json::Value;

/// A cell address: axis name → column value. Ordered so coordinates have a
/// canonical form usable as map keys.
pub type Coordinate = BTreeMap<String, String>;

/// Build a coordinate from `(axis, column)` pairs.
pub fn coordinate<const N: usize>(pairs: [(&str, &str); N]) -> Coordinate {
    pairs
        .iter()
        .map(|(axis, column)| (axis.to_string(), column.to_string()))
        .collect()
}

/// Descriptor of one cube dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    /// Axis name, unique within the cube
    pub name: String,

    /// Discrete column values, in axis order
    pub columns: Vec<String>,

    /// Whether the axis carries a default column that absorbs unmatched
    /// coordinate values
    pub has_default: bool,
}

impl Axis {
    /// Create an axis without a default column.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            has_default: false,
        }
    }

    /// Create an axis with a default column.
    pub fn with_default(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            has_default: true,
        }
    }

    /// Case-insensitive column lookup.
    pub fn find_column(&self, value: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(value))
            .map(String::as_str)
    }
}

/// A named interceptor attached to cubes on hydration. The manager binds
/// advices by wildcard and attaches them; invocation semantics belong to
/// the host.
pub trait Advice: Send + Sync {
    /// Advice name, used for logging and de-duplication.
    fn name(&self) -> &str;
}

/// The cube contract.
///
/// Methods take `&self`: cubes are shared across threads as
/// `Arc<dyn Cube>` out of the cache, so implementations synchronize
/// internally.
pub trait Cube: Send + Sync {
    /// Cube name. Names are case-insensitive for lookup purposes.
    fn name(&self) -> String;

    /// The workspace this instance is homed to.
    fn app_id(&self) -> ApplicationId;

    /// Re-home the cube, e.g. after loading a head revision into a branch.
    fn set_app_id(&self, app_id: ApplicationId);

    /// Content fingerprint (hex SHA-1).
    fn sha1(&self) -> String;

    /// Drop any memoised fingerprint so the next [`Cube::sha1`] recomputes.
    fn clear_sha1(&self);

    /// Read a meta-property.
    fn meta_property(&self, key: &str) -> Option<CellValue>;

    /// Write a meta-property.
    fn set_meta_property(&self, key: &str, value: CellValue);

    /// All axes of the cube.
    fn axes(&self) -> Vec<Axis>;

    /// Look up one axis by name, case-insensitively.
    fn axis(&self, name: &str) -> Option<Axis>;

    /// Read the cell at a coordinate. Implementations resolve unmatched
    /// coordinate values to the axis default column when one exists.
    fn cell(&self, coord: &Coordinate) -> Option<CellValue>;

    /// Write the cell at a coordinate.
    fn set_cell(&self, value: CellValue, coord: &Coordinate);

    /// Remove the cell at a coordinate.
    fn remove_cell(&self, coord: &Coordinate);

    /// Remove every cell.
    fn clear_cells(&self);

    /// Names of cubes this cube references directly. The manager computes
    /// the transitive closure itself.
    fn referenced_cube_names(&self) -> HashSet<String>;

    /// Attach an advice for one method.
    fn add_advice(&self, advice: Arc<dyn Advice>, method: &str);

    /// Deep copy under a new name, with fingerprint cleared.
    fn duplicate(&self, new_name: &str) -> Arc<dyn Cube>;

    /// Downcast support for host collaborators. The persister and delta
    /// processor ship alongside the cube implementation and may recover
    /// their concrete type here.
    fn as_any(&self) -> &dyn Any;

    /// Whether the cache may retain this cube: the `cache` meta-property is
    /// absent or true.
    fn cacheable(&self) -> bool {
        match self.meta_property("cache") {
            Some(CellValue::Bool(b)) => b,
            Some(CellValue::String(s)) => !s.eq_ignore_ascii_case("false"),
            _ => true,
        }
    }
}

/// Constructs cubes. The bootstrap path synthesises the administrative
/// cubes through this port so the manager never depends on a concrete
/// cube representation.
pub trait CubeFactory: Send + Sync {
    /// Create an empty cube with the given axes, homed to `app_id`.
    fn create(&self, app_id: &ApplicationId, name: &str, axes: Vec<Axis>) -> Arc<dyn Cube>;

    /// Parse a cube from simple JSON and home it to `app_id`.
    fn from_simple_json(&self, app_id: &ApplicationId, json: &str) -> RepoResult<Arc<dyn Cube>>;
}

/// Opaque handle to a resource loader resolved from a `sys.classpath`
/// cube. The manager only caches and releases these.
pub trait ResourceLoader: Send + Sync {
    /// Downcast support for hosts.
    fn as_any(&self) -> &dyn Any;
}

/// Produces a [`ResourceLoader`] from a `sys.classpath` cube and an input
/// coordinate.
pub trait LoaderFactory: Send + Sync {
    fn loader_for(
        &self,
        classpath_cube: &dyn Cube,
        coord: &Coordinate,
    ) -> RepoResult<Arc<dyn ResourceLoader>>;
}
