//! # CUBEVAULT - Versioned Decision-Cube Repository
//!
//! A coordination and version-control layer over a multi-tenant
//! repository of named multi-dimensional decision tables ("cubes"),
//! built in Rust.
//!
//! ## Architecture
//!
//! - `appid`: the immutable workspace addressing 5-tuple
//! - `error`: the shared error taxonomy
//! - `context`: system parameters and the ambient acting user
//! - `patterns`: process-wide wildcard pattern cache
//! - `ports`: contracts to the persister, cube, delta and broadcast
//!   collaborators supplied by the host
//! - `cache`: the coherent cube cache and the advice registry
//! - `manager`: the façade holding the branch engine, permission
//!   evaluator, lock coordinator and lifecycle controller

#![warn(missing_docs)]
#![warn(clippy::all)]

// Workspace identity
pub mod appid;

// Shared error taxonomy
pub mod error;

// System parameters and acting user
pub mod context;

// Wildcard matching
pub mod patterns;

// External interface ports
pub mod ports;

// Cube cache and advice registry
pub mod cache;

// The repository manager façade
pub mod manager;

// Re-export commonly used types
pub use appid::{ApplicationId, ReleaseStatus, HEAD, SYS_VERSION};
pub use cache::{AdviceRegistry, CacheEntry, CacheRegistry};
pub use error::{ConflictInfo, RepoError, RepoResult};
pub use manager::{
    Action, BranchUpdateReport, CubeManager, ManagerConfig, SYS_BOOTSTRAP, SYS_BRANCH_PERMISSIONS,
    SYS_CLASSPATH, SYS_LOCK, SYS_PERMISSIONS, SYS_PROTOTYPE, SYS_USERGROUPS,
};
pub use ports::{
    Advice, Axis, Broadcaster, CellValue, ChangeEvent, ChangeType, Coordinate, Cube, CubeFactory,
    CubeInfo, Delta, DeltaKind, DeltaProcessor, DeltaRegion, DeltaSet, LoaderFactory, Persister,
    ResourceLoader, SearchOptions,
};

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
