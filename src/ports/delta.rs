//! Delta Processor Port
//!
//! Delta computation between cube revisions belongs to the host's cube
//! implementation. The branch engine drives it through this contract to
//! decide whether two divergent edits can merge automatically and to
//! produce human-readable conflict descriptions.

use crate::error::RepoResult;
use crate::ports::cube::{CellValue, Coordinate, Cube};
use serde::{Deserialize, Serialize};

/// Part of the cube a delta touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaRegion {
    Axis,
    Column,
    Cell,
    Meta,
}

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Add,
    Update,
    Remove,
}

/// One atomic difference between two cube revisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    /// What part of the cube changed
    pub region: DeltaRegion,

    /// How it changed
    pub kind: DeltaKind,

    /// Cell coordinate for cell-region deltas
    pub coordinate: Option<Coordinate>,

    /// New value, absent for removals
    pub value: Option<CellValue>,

    /// Human-readable description used in conflict reports
    pub description: String,
}

/// An ordered set of deltas transforming one revision into another.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltaSet {
    pub deltas: Vec<Delta>,
}

impl DeltaSet {
    pub fn new(deltas: Vec<Delta>) -> Self {
        Self { deltas }
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }
}

/// Delta computation and merging contract.
pub trait DeltaProcessor: Send + Sync {
    /// Deltas transforming `base` into `target`.
    fn delta(&self, base: &dyn Cube, target: &dyn Cube) -> DeltaSet;

    /// Whether two delta sets against a common base touch disjoint
    /// elements and can therefore both apply. `reverse` flips which side
    /// is treated as the receiving cube, matching the direction of an
    /// update-from-head merge.
    fn are_compatible(&self, ours: &DeltaSet, theirs: &DeltaSet, reverse: bool) -> bool;

    /// Apply a delta set to a cube in place.
    fn merge(&self, target: &dyn Cube, delta: &DeltaSet) -> RepoResult<()>;

    /// Human-readable differences between two cubes; empty means the cubes
    /// are effectively identical.
    fn describe(&self, left: &dyn Cube, right: &dyn Cube) -> Vec<Delta>;
}
