//! # Stage Operations
//!
//! Cross-stage algorithms over a [`StageStore`]:
//!
//! - [`propagate`]: copy every object of one stage into another, optionally
//!   overwriting objects whose id already exists in the destination.
//! - [`promote_to_root`]: replace the root stage's payload with a copy of
//!   another stage, making it the visualized/exported model.
//!
//! Objects are independent records keyed by id, so neither the order of
//! collections nor the order within a collection affects the outcome.
//! Copies are structural clones; later edits to either stage never show up
//! in the other.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ModelResult;
use crate::model::ObjectId;
use crate::stage::{Collection, Stage, StageId, StageStore, ROOT_STAGE};

/// Copied/skipped counts for one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCounts {
    pub copied: usize,
    pub skipped: usize,
}

/// Outcome of a [`propagate`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub from: StageId,
    pub to: StageId,
    pub overwrite: bool,
    pub collections: BTreeMap<Collection, CollectionCounts>,
}

impl PropagationReport {
    pub fn copied(&self) -> usize {
        self.collections.values().map(|c| c.copied).sum()
    }

    pub fn skipped(&self) -> usize {
        self.collections.values().map(|c| c.skipped).sum()
    }
}

/// Copy entries from `source` into `target`.
///
/// An entry is copied when `overwrite` is set or its id is absent from the
/// target.
fn merge<T: Clone>(
    source: &BTreeMap<ObjectId, T>,
    target: &mut BTreeMap<ObjectId, T>,
    overwrite: bool,
) -> CollectionCounts {
    let mut counts = CollectionCounts::default();
    for (id, object) in source {
        if overwrite || !target.contains_key(id) {
            target.insert(*id, object.clone());
            counts.copied += 1;
        } else {
            counts.skipped += 1;
        }
    }
    counts
}

/// Propagate objects from stage `from` into stage `to`.
///
/// Both stages must exist. Objects of `to` whose id is absent from `from`
/// are always kept; objects present in both are replaced only when
/// `overwrite` is true. `from` is never modified.
///
/// # Example
///
/// ```rust
/// use modsee_core::model::Node;
/// use modsee_core::operations::propagate;
/// use modsee_core::stage::StageStore;
///
/// let mut store = StageStore::new();
/// store.create_stage(1, None).unwrap();
/// store.root_mut().nodes.insert(1, Node::new(1, 0.0, 0.0, 0.0));
///
/// let report = propagate(&mut store, 0, 1, false).unwrap();
/// assert_eq!(report.copied(), 1);
/// assert_eq!(store.get_stage(1).unwrap().nodes.len(), 1);
/// ```
pub fn propagate(
    store: &mut StageStore,
    from: StageId,
    to: StageId,
    overwrite: bool,
) -> ModelResult<PropagationReport> {
    let source = store.get_stage(from)?.clone();
    let target = store.get_stage_mut(to)?;

    let mut report = PropagationReport {
        from,
        to,
        overwrite,
        collections: BTreeMap::new(),
    };
    if from == to {
        return Ok(report);
    }

    let counts = [
        (Collection::Nodes, merge(&source.nodes, &mut target.nodes, overwrite)),
        (Collection::Elements, merge(&source.elements, &mut target.elements, overwrite)),
        (Collection::Materials, merge(&source.materials, &mut target.materials, overwrite)),
        (
            Collection::BoundaryConditions,
            merge(&source.boundary_conditions, &mut target.boundary_conditions, overwrite),
        ),
        (Collection::Loads, merge(&source.loads, &mut target.loads, overwrite)),
        (Collection::Sections, merge(&source.sections, &mut target.sections, overwrite)),
        (Collection::Constraints, merge(&source.constraints, &mut target.constraints, overwrite)),
        (Collection::Recorders, merge(&source.recorders, &mut target.recorders, overwrite)),
        (
            Collection::Transformations,
            merge(&source.transformations, &mut target.transformations, overwrite),
        ),
        (Collection::Timeseries, merge(&source.timeseries, &mut target.timeseries, overwrite)),
        (Collection::Patterns, merge(&source.patterns, &mut target.patterns, overwrite)),
    ];
    report.collections.extend(counts);

    tracing::debug!(
        from,
        to,
        overwrite,
        copied = report.copied(),
        skipped = report.skipped(),
        "propagated stage"
    );
    Ok(report)
}

/// Replace the root stage's payload with a copy of stage `stage_id`.
///
/// The root keeps id 0 and is renamed `"Visualization of Stage {k}"`. Any
/// edits made directly to the root stage are discarded.
///
/// When `stage_id` does not exist the highest existing stage id is promoted
/// instead. Returns the id that was actually promoted.
pub fn promote_to_root(store: &mut StageStore, stage_id: StageId) -> ModelResult<StageId> {
    let promoted = if store.contains(stage_id) {
        stage_id
    } else {
        let fallback = store.max_stage_id();
        tracing::warn!(
            requested = stage_id,
            fallback,
            "stage not found, promoting highest stage instead"
        );
        fallback
    };

    let source: Stage = store.get_stage(promoted)?.clone();

    let root = store.root_mut();
    if promoted != ROOT_STAGE {
        root.replace_contents(&source);
    }
    root.id = ROOT_STAGE;
    root.name = format!("Visualization of Stage {}", promoted);

    tracing::info!(stage = promoted, objects = root.object_count(), "promoted stage to root");
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ModelError;
    use crate::model::{BoundaryCondition, Element, ElementType, Load, LoadType, Node};

    fn store_with_stage_one() -> StageStore {
        let mut store = StageStore::new();
        store.create_stage(1, Some("Loaded")).unwrap();
        let root = store.root_mut();
        root.nodes.insert(1, Node::new(1, 0.0, 0.0, 0.0));
        root.nodes.insert(2, Node::new(2, 5.0, 0.0, 0.0));
        root.elements.insert(
            1,
            Element::new(1, ElementType::Truss, vec![1, 2], None, None).unwrap(),
        );
        store
    }

    #[test]
    fn test_propagate_requires_both_stages() {
        let mut store = StageStore::new();
        assert_eq!(
            propagate(&mut store, 0, 5, false),
            Err(ModelError::StageNotFound { stage_id: 5 })
        );
        assert_eq!(
            propagate(&mut store, 5, 0, false),
            Err(ModelError::StageNotFound { stage_id: 5 })
        );
    }

    #[test]
    fn test_propagate_keeps_target_only_objects() {
        let mut store = store_with_stage_one();
        let stage_one = store.get_stage_mut(1).unwrap();
        stage_one.loads.insert(
            1,
            Load::new(1, LoadType::Point, 2, vec![2], vec![-10.0]).unwrap(),
        );
        stage_one.boundary_conditions.insert(
            1,
            BoundaryCondition::new(1, 1, vec![1, 1, 1], vec![0.0; 3]).unwrap(),
        );

        let report = propagate(&mut store, 0, 1, false).unwrap();
        assert_eq!(report.copied(), 3);
        assert_eq!(report.collections[&Collection::Loads], CollectionCounts::default());

        let stage_one = store.get_stage(1).unwrap();
        assert_eq!(stage_one.loads.len(), 1);
        assert_eq!(stage_one.boundary_conditions.len(), 1);
        assert_eq!(stage_one.nodes.len(), 2);
        assert_eq!(stage_one.elements.len(), 1);
    }

    #[test]
    fn test_propagate_without_overwrite_skips_existing() {
        let mut store = store_with_stage_one();
        store
            .get_stage_mut(1)
            .unwrap()
            .nodes
            .insert(1, Node::new(1, 9.0, 9.0, 9.0));

        let report = propagate(&mut store, 0, 1, false).unwrap();
        assert_eq!(report.collections[&Collection::Nodes], CollectionCounts { copied: 1, skipped: 1 });
        assert_eq!(store.get_stage(1).unwrap().nodes[&1].coordinates, [9.0, 9.0, 9.0]);

        propagate(&mut store, 0, 1, true).unwrap();
        assert_eq!(store.get_stage(1).unwrap().nodes[&1].coordinates, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_propagate_onto_itself_is_noop() {
        let mut store = store_with_stage_one();
        let before = store.root().clone();
        let report = propagate(&mut store, 0, 0, true).unwrap();
        assert_eq!(report.copied(), 0);
        assert_eq!(store.root(), &before);
    }

    #[test]
    fn test_copies_are_independent() {
        let mut store = store_with_stage_one();
        propagate(&mut store, 0, 1, false).unwrap();
        store.root_mut().nodes.get_mut(&1).unwrap().coordinates[0] = 42.0;
        assert_eq!(store.get_stage(1).unwrap().nodes[&1].coordinates[0], 0.0);
    }

    #[test]
    fn test_promote_replaces_root_payload() {
        let mut store = StageStore::new();
        store.create_stage(2, None).unwrap();
        {
            let stage = store.get_stage_mut(2).unwrap();
            for id in 1..=3 {
                stage.nodes.insert(id, Node::new(id, id as f64, 0.0, 0.0));
            }
        }
        store.root_mut().nodes.insert(99, Node::new(99, 0.0, 0.0, 0.0));

        assert_eq!(promote_to_root(&mut store, 2).unwrap(), 2);
        let root = store.root();
        assert_eq!(root.id, ROOT_STAGE);
        assert_eq!(root.name, "Visualization of Stage 2");
        assert_eq!(root.nodes, store.get_stage(2).unwrap().nodes);
        assert!(!root.nodes.contains_key(&99));
    }

    #[test]
    fn test_promote_falls_back_to_highest_stage() {
        let mut store = StageStore::new();
        store.create_stage(1, None).unwrap();
        store.create_stage(4, None).unwrap();
        assert_eq!(promote_to_root(&mut store, 9).unwrap(), 4);
        assert_eq!(store.root().name, "Visualization of Stage 4");
    }

    #[test]
    fn test_promote_root_onto_itself_only_renames() {
        let mut store = store_with_stage_one();
        assert_eq!(promote_to_root(&mut store, 0).unwrap(), 0);
        assert_eq!(store.root().nodes.len(), 2);
        assert_eq!(store.root().name, "Visualization of Stage 0");
    }
}
