//! # Property-Based Tests
//!
//! Stage isolation and the propagate/promote invariants, checked with
//! proptest over random node layouts, plus bit-exact coordinate storage on
//! every backend.

use std::collections::BTreeSet;

use modsee_core::model::{LoadType, Node};
use modsee_core::{Project, Stage, StorageFormat, ROOT_STAGE};
use proptest::array::uniform3;
use proptest::collection::{btree_set, vec};
use proptest::prelude::*;

fn project_with_nodes(root_ids: &BTreeSet<u32>, target_ids: &BTreeSet<u32>) -> Project {
    let mut project = Project::new("Props");
    project.create_stage(1, Some("Target")).unwrap();
    for id in root_ids {
        project.add_node(*id, f64::from(*id), 0.0, 0.0, ROOT_STAGE).unwrap();
    }
    for id in target_ids {
        project.add_node(*id, 0.0, f64::from(*id), 0.0, 1).unwrap();
    }
    project
}

fn node(stage: &Stage, id: u32) -> &Node {
    &stage.nodes[&id]
}

/// Any finite coordinate, signed zeros and subnormals included.
fn coordinate() -> impl Strategy<Value = f64> {
    prop::num::f64::NORMAL | prop::num::f64::SUBNORMAL | prop::num::f64::ZERO
}

/// Nodes 1..=n at `points` in the root stage, copied into stage 1.
fn mesh(points: &[[f64; 3]]) -> Project {
    let mut project = Project::new("Mesh");
    for (id, [x, y, z]) in (1..).zip(points) {
        project.add_node(id, *x, *y, *z, ROOT_STAGE).unwrap();
    }
    project.create_stage(1, Some("Copy")).unwrap();
    project.propagate_stage(ROOT_STAGE, 1, false).unwrap();
    project
}

fn coordinate_bits(project: &Project) -> Vec<(u32, u32, [u64; 3])> {
    project
        .stages
        .iter()
        .flat_map(|stage| {
            stage
                .nodes
                .values()
                .map(move |n| (stage.id, n.id, n.coordinates.map(f64::to_bits)))
        })
        .collect()
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Mutating one stage never changes another.
    #[test]
    fn stage_isolation(ids in btree_set(0u32..500, 1..30), extra in 500u32..1000) {
        let mut project = project_with_nodes(&ids, &BTreeSet::new());
        project.propagate_stage(ROOT_STAGE, 1, false).unwrap();
        let root_before = project.root_stage().clone();

        project.add_node(extra, 1.0, 2.0, 3.0, 1).unwrap();
        project.add_load(1, LoadType::Point, extra, vec![1], vec![1.0], 1).unwrap();
        for id in &ids {
            project.set_node_mass(*id, [1.0; 6], 1).unwrap();
        }

        prop_assert_eq!(project.root_stage(), &root_before);
    }

    /// Propagating twice without overwrite is the same as once.
    #[test]
    fn propagate_is_idempotent(
        root_ids in btree_set(0u32..200, 0..30),
        target_ids in btree_set(0u32..200, 0..30),
    ) {
        let mut project = project_with_nodes(&root_ids, &target_ids);
        project.propagate_stage(ROOT_STAGE, 1, false).unwrap();
        let once = project.stage(1).unwrap().clone();

        let second = project.propagate_stage(ROOT_STAGE, 1, false).unwrap();
        prop_assert_eq!(second.copied(), 0);
        prop_assert_eq!(project.stage(1).unwrap(), &once);

        let expected: BTreeSet<u32> = root_ids.union(&target_ids).copied().collect();
        let actual: BTreeSet<u32> = once.nodes.keys().copied().collect();
        prop_assert_eq!(actual, expected);
    }

    /// Overwrite replaces exactly the overlapping ids and keeps the rest.
    #[test]
    fn overwrite_touches_only_overlap(
        root_ids in btree_set(0u32..100, 0..25),
        target_ids in btree_set(0u32..100, 0..25),
    ) {
        let mut project = project_with_nodes(&root_ids, &target_ids);
        let report = project.propagate_stage(ROOT_STAGE, 1, true).unwrap();
        prop_assert_eq!(report.copied(), root_ids.len());

        let root = project.stage(ROOT_STAGE).unwrap();
        let target = project.stage(1).unwrap();
        for id in &target_ids {
            if root_ids.contains(id) {
                prop_assert_eq!(node(target, *id), node(root, *id));
            } else {
                prop_assert_eq!(node(target, *id).coordinates, [0.0, f64::from(*id), 0.0]);
            }
        }
        prop_assert_eq!(target.nodes.len(), root_ids.union(&target_ids).count());
    }

    /// Promotion copies contents into stage 0 but never its identity.
    #[test]
    fn promote_keeps_root_identity(ids in btree_set(0u32..300, 0..20), stage_id in 1u32..50) {
        let mut project = Project::new("Promote");
        project.create_stage(stage_id, None).unwrap();
        for id in &ids {
            project.add_node(*id, 0.0, 0.0, f64::from(*id), stage_id).unwrap();
        }

        project.promote_stage_to_root(stage_id).unwrap();
        let root = project.root_stage();
        prop_assert_eq!(root.id, ROOT_STAGE);
        prop_assert_eq!(&root.nodes, &project.stage(stage_id).unwrap().nodes);
        prop_assert!(project.stages.contains(ROOT_STAGE));
        prop_assert_eq!(project.stages.len(), 2);
    }

    /// A JSON round trip reproduces every stage, coordinates bit for bit.
    #[test]
    fn json_roundtrip(points in vec(uniform3(coordinate()), 0..40)) {
        let project = mesh(&points);
        let json = serde_json::to_string(&project).unwrap();
        let back: Project = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(coordinate_bits(&back), coordinate_bits(&project));
        prop_assert_eq!(back.stages, project.stages);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Saving and loading through a file keeps every coordinate's bits.
    #[test]
    fn file_backends_keep_coordinate_bits(points in vec(uniform3(coordinate()), 1..60)) {
        let dir = tempfile::tempdir().unwrap();
        let project = mesh(&points);
        for file in ["mesh.json", "mesh.redb", "mesh.msee"] {
            let path = dir.path().join(file);
            let adapter = StorageFormat::from_path(&path).adapter(&path).unwrap();
            project.save(adapter.as_ref()).unwrap();
            let loaded = Project::load(adapter.as_ref()).unwrap();
            prop_assert_eq!(coordinate_bits(&loaded), coordinate_bits(&project), "backend {}", adapter.name());
        }
    }
}
