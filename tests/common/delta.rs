//! Cell-level delta processor for grid cubes. Two delta sets are
//! compatible when they touch disjoint cells; axis changes never merge
//! automatically.

use cubevault::{
    Axis, Coordinate, Cube, Delta, DeltaKind, DeltaProcessor, DeltaRegion, DeltaSet, RepoError,
    RepoResult,
};
use std::collections::HashSet;

pub struct CellDeltaProcessor;

/// Every addressable coordinate of a discrete cube: the cartesian product
/// of each axis's columns plus its default column when present.
fn coordinates(axes: &[Axis]) -> Vec<Coordinate> {
    let mut coords = vec![Coordinate::new()];
    for axis in axes {
        let mut values: Vec<String> = axis.columns.clone();
        if axis.has_default {
            values.push(String::new());
        }
        let mut next = Vec::with_capacity(coords.len() * values.len());
        for coord in &coords {
            for value in &values {
                let mut c = coord.clone();
                c.insert(axis.name.clone(), value.clone());
                next.push(c);
            }
        }
        coords = next;
    }
    coords
}

fn axes_differ(left: &[Axis], right: &[Axis]) -> bool {
    left != right
}

fn cell_deltas(base: &dyn Cube, target: &dyn Cube) -> Vec<Delta> {
    let mut deltas = Vec::new();
    for coord in coordinates(&target.axes()) {
        let before = base.cell(&coord);
        let after = target.cell(&coord);
        let (kind, value) = match (&before, &after) {
            (None, Some(v)) => (DeltaKind::Add, Some(v.clone())),
            (Some(_), None) => (DeltaKind::Remove, None),
            (Some(b), Some(a)) if b != a => (DeltaKind::Update, Some(a.clone())),
            _ => continue,
        };
        deltas.push(Delta {
            region: DeltaRegion::Cell,
            kind,
            description: format!(
                "cell {:?}: {:?} -> {:?}",
                coord,
                before.as_ref().map(|v| v.to_string()),
                after.as_ref().map(|v| v.to_string())
            ),
            coordinate: Some(coord),
            value,
        });
    }
    deltas
}

impl DeltaProcessor for CellDeltaProcessor {
    fn delta(&self, base: &dyn Cube, target: &dyn Cube) -> DeltaSet {
        if axes_differ(&base.axes(), &target.axes()) {
            return DeltaSet::new(vec![Delta {
                region: DeltaRegion::Axis,
                kind: DeltaKind::Update,
                coordinate: None,
                value: None,
                description: format!("axes of '{}' changed shape", target.name()),
            }]);
        }
        DeltaSet::new(cell_deltas(base, target))
    }

    fn are_compatible(&self, ours: &DeltaSet, theirs: &DeltaSet, _reverse: bool) -> bool {
        let only_cells = |set: &DeltaSet| {
            set.deltas
                .iter()
                .all(|d| d.region == DeltaRegion::Cell && d.coordinate.is_some())
        };
        if !only_cells(ours) || !only_cells(theirs) {
            return false;
        }
        let touched: HashSet<&Coordinate> = ours
            .deltas
            .iter()
            .filter_map(|d| d.coordinate.as_ref())
            .collect();
        theirs
            .deltas
            .iter()
            .filter_map(|d| d.coordinate.as_ref())
            .all(|coord| !touched.contains(coord))
    }

    fn merge(&self, target: &dyn Cube, delta: &DeltaSet) -> RepoResult<()> {
        for d in &delta.deltas {
            let coord = d.coordinate.as_ref().ok_or_else(|| {
                RepoError::InvalidInput("Cell delta without a coordinate".to_string())
            })?;
            match d.kind {
                DeltaKind::Add | DeltaKind::Update => {
                    let value = d.value.clone().ok_or_else(|| {
                        RepoError::InvalidInput("Cell delta without a value".to_string())
                    })?;
                    target.set_cell(value, coord);
                }
                DeltaKind::Remove => target.remove_cell(coord),
            }
        }
        Ok(())
    }

    fn describe(&self, left: &dyn Cube, right: &dyn Cube) -> Vec<Delta> {
        self.delta(left, right).deltas
    }
}
