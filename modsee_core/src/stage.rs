//! # Stages
//!
//! A [`Stage`] is an independent snapshot of the whole model graph: eleven
//! collections keyed by [`ObjectId`]. A [`StageStore`] owns every stage of a
//! project and guarantees that the root stage (id 0) always exists.
//!
//! Collections are `BTreeMap`s of plain records, so `Stage::clone` is a full
//! value copy. Cross-stage copying relies on this (see [`crate::operations`]).
//!
//! ## Example
//!
//! ```rust
//! use modsee_core::stage::{StageStore, ROOT_STAGE};
//!
//! let mut store = StageStore::new();
//! assert!(store.contains(ROOT_STAGE));
//!
//! store.create_stage(1, Some("Loaded")).unwrap();
//! assert_eq!(store.get_stage(1).unwrap().name, "Loaded");
//! assert!(store.create_stage(1, None).is_err());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ModelError, ModelResult};
use crate::model::{
    BoundaryCondition, Constraint, ConstraintType, Element, Load, LoadType, Material, Node,
    ObjectId, Pattern, PropertyMap, Recorder, Section, TimeSeries, Transformation,
};

/// Identifier of a stage within a project.
pub type StageId = u32;

/// The root stage: always present, the one that is visualized and exported.
pub const ROOT_STAGE: StageId = 0;

/// The eleven collections of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Nodes,
    Elements,
    Materials,
    BoundaryConditions,
    Loads,
    Sections,
    Constraints,
    Recorders,
    Transformations,
    Timeseries,
    Patterns,
}

impl Collection {
    pub const ALL: [Collection; 11] = [
        Collection::Nodes,
        Collection::Elements,
        Collection::Materials,
        Collection::BoundaryConditions,
        Collection::Loads,
        Collection::Sections,
        Collection::Constraints,
        Collection::Recorders,
        Collection::Transformations,
        Collection::Timeseries,
        Collection::Patterns,
    ];

    /// Key used in the JSON project format
    pub fn key(&self) -> &'static str {
        match self {
            Collection::Nodes => "nodes",
            Collection::Elements => "elements",
            Collection::Materials => "materials",
            Collection::BoundaryConditions => "boundary_conditions",
            Collection::Loads => "loads",
            Collection::Sections => "sections",
            Collection::Constraints => "constraints",
            Collection::Recorders => "recorders",
            Collection::Transformations => "transformations",
            Collection::Timeseries => "timeseries",
            Collection::Patterns => "patterns",
        }
    }

    pub fn from_key(key: &str) -> Option<Collection> {
        Collection::ALL.iter().copied().find(|c| c.key() == key)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// What a stage is for, and so how it is analyzed when stages run in
/// sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageType {
    #[default]
    Static,
    Dynamic,
    Construction,
    Eigen,
    LoadPattern,
    Custom,
}

impl StageType {
    pub const ALL: [StageType; 6] = [
        StageType::Static,
        StageType::Dynamic,
        StageType::Construction,
        StageType::Eigen,
        StageType::LoadPattern,
        StageType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageType::Static => "STATIC",
            StageType::Dynamic => "DYNAMIC",
            StageType::Construction => "CONSTRUCTION",
            StageType::Eigen => "EIGEN",
            StageType::LoadPattern => "LOAD_PATTERN",
            StageType::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StageType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace(['-', ' '], "_").to_ascii_uppercase();
        StageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| ModelError::invalid_input("stage_type", s, "unknown stage type"))
    }
}

/// A named, independently addressable snapshot of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub name: String,
    #[serde(default)]
    pub stage_type: StageType,
    /// Position among siblings in the analysis sequence
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub parent_stage_id: Option<StageId>,
    #[serde(default)]
    pub description: String,
    /// Solver overrides for this stage (`num_steps`, `dt`, `num_modes`)
    #[serde(default)]
    pub analysis_parameters: PropertyMap,
    #[serde(default)]
    pub nodes: BTreeMap<ObjectId, Node>,
    #[serde(default)]
    pub elements: BTreeMap<ObjectId, Element>,
    #[serde(default)]
    pub materials: BTreeMap<ObjectId, Material>,
    #[serde(default)]
    pub boundary_conditions: BTreeMap<ObjectId, BoundaryCondition>,
    #[serde(default)]
    pub loads: BTreeMap<ObjectId, Load>,
    #[serde(default)]
    pub sections: BTreeMap<ObjectId, Section>,
    #[serde(default)]
    pub constraints: BTreeMap<ObjectId, Constraint>,
    #[serde(default)]
    pub recorders: BTreeMap<ObjectId, Recorder>,
    #[serde(default)]
    pub transformations: BTreeMap<ObjectId, Transformation>,
    #[serde(default)]
    pub timeseries: BTreeMap<ObjectId, TimeSeries>,
    #[serde(default)]
    pub patterns: BTreeMap<ObjectId, Pattern>,
}

impl Stage {
    /// Create an empty stage. `name` defaults to `"Stage {id}"`.
    pub fn new(id: StageId, name: Option<&str>) -> Self {
        Stage {
            id,
            name: name.map(str::to_string).unwrap_or_else(|| default_stage_name(id)),
            stage_type: StageType::default(),
            order: 0,
            parent_stage_id: None,
            description: String::new(),
            analysis_parameters: PropertyMap::new(),
            nodes: BTreeMap::new(),
            elements: BTreeMap::new(),
            materials: BTreeMap::new(),
            boundary_conditions: BTreeMap::new(),
            loads: BTreeMap::new(),
            sections: BTreeMap::new(),
            constraints: BTreeMap::new(),
            recorders: BTreeMap::new(),
            transformations: BTreeMap::new(),
            timeseries: BTreeMap::new(),
            patterns: BTreeMap::new(),
        }
    }

    /// The stage without its objects: id, name and sequencing metadata.
    pub fn header(&self) -> Stage {
        Stage {
            name: self.name.clone(),
            stage_type: self.stage_type,
            order: self.order,
            parent_stage_id: self.parent_stage_id,
            description: self.description.clone(),
            analysis_parameters: self.analysis_parameters.clone(),
            ..Stage::new(self.id, None)
        }
    }

    /// A numeric analysis parameter, if set.
    pub fn analysis_parameter(&self, key: &str) -> Option<f64> {
        self.analysis_parameters.get(key).and_then(Value::as_f64)
    }

    pub fn set_analysis_parameter(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.analysis_parameters.insert(key.into(), value.into());
    }

    /// Number of objects in one collection
    pub fn count(&self, collection: Collection) -> usize {
        match collection {
            Collection::Nodes => self.nodes.len(),
            Collection::Elements => self.elements.len(),
            Collection::Materials => self.materials.len(),
            Collection::BoundaryConditions => self.boundary_conditions.len(),
            Collection::Loads => self.loads.len(),
            Collection::Sections => self.sections.len(),
            Collection::Constraints => self.constraints.len(),
            Collection::Recorders => self.recorders.len(),
            Collection::Transformations => self.transformations.len(),
            Collection::Timeseries => self.timeseries.len(),
            Collection::Patterns => self.patterns.len(),
        }
    }

    /// Ids present in one collection
    pub fn ids(&self, collection: Collection) -> BTreeSet<ObjectId> {
        fn keys<T>(map: &BTreeMap<ObjectId, T>) -> BTreeSet<ObjectId> {
            map.keys().copied().collect()
        }
        match collection {
            Collection::Nodes => keys(&self.nodes),
            Collection::Elements => keys(&self.elements),
            Collection::Materials => keys(&self.materials),
            Collection::BoundaryConditions => keys(&self.boundary_conditions),
            Collection::Loads => keys(&self.loads),
            Collection::Sections => keys(&self.sections),
            Collection::Constraints => keys(&self.constraints),
            Collection::Recorders => keys(&self.recorders),
            Collection::Transformations => keys(&self.transformations),
            Collection::Timeseries => keys(&self.timeseries),
            Collection::Patterns => keys(&self.patterns),
        }
    }

    /// Total number of objects across all collections
    pub fn object_count(&self) -> usize {
        Collection::ALL.iter().map(|c| self.count(*c)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.object_count() == 0
    }

    /// Replace every collection with copies of `other`'s, keeping id and name.
    pub fn replace_contents(&mut self, other: &Stage) {
        self.nodes = other.nodes.clone();
        self.elements = other.elements.clone();
        self.materials = other.materials.clone();
        self.boundary_conditions = other.boundary_conditions.clone();
        self.loads = other.loads.clone();
        self.sections = other.sections.clone();
        self.constraints = other.constraints.clone();
        self.recorders = other.recorders.clone();
        self.transformations = other.transformations.clone();
        self.timeseries = other.timeseries.clone();
        self.patterns = other.patterns.clone();
    }

    /// Every record of one collection as `(id, JSON)` pairs, in id order.
    pub fn records_json(&self, collection: Collection) -> serde_json::Result<Vec<(ObjectId, Value)>> {
        fn encode<T: Serialize>(map: &BTreeMap<ObjectId, T>) -> serde_json::Result<Vec<(ObjectId, Value)>> {
            map.iter()
                .map(|(id, record)| Ok((*id, serde_json::to_value(record)?)))
                .collect()
        }
        match collection {
            Collection::Nodes => encode(&self.nodes),
            Collection::Elements => encode(&self.elements),
            Collection::Materials => encode(&self.materials),
            Collection::BoundaryConditions => encode(&self.boundary_conditions),
            Collection::Loads => encode(&self.loads),
            Collection::Sections => encode(&self.sections),
            Collection::Constraints => encode(&self.constraints),
            Collection::Recorders => encode(&self.recorders),
            Collection::Transformations => encode(&self.transformations),
            Collection::Timeseries => encode(&self.timeseries),
            Collection::Patterns => encode(&self.patterns),
        }
    }

    /// Decode one JSON record and insert it under `id`.
    ///
    /// The record is left out when it does not match the collection's shape.
    pub fn insert_json(&mut self, collection: Collection, id: ObjectId, value: Value) -> serde_json::Result<()> {
        fn decode<T: DeserializeOwned>(
            map: &mut BTreeMap<ObjectId, T>,
            id: ObjectId,
            value: Value,
        ) -> serde_json::Result<()> {
            map.insert(id, serde_json::from_value(value)?);
            Ok(())
        }
        match collection {
            Collection::Nodes => decode(&mut self.nodes, id, value),
            Collection::Elements => decode(&mut self.elements, id, value),
            Collection::Materials => decode(&mut self.materials, id, value),
            Collection::BoundaryConditions => decode(&mut self.boundary_conditions, id, value),
            Collection::Loads => decode(&mut self.loads, id, value),
            Collection::Sections => decode(&mut self.sections, id, value),
            Collection::Constraints => decode(&mut self.constraints, id, value),
            Collection::Recorders => decode(&mut self.recorders, id, value),
            Collection::Transformations => decode(&mut self.transformations, id, value),
            Collection::Timeseries => decode(&mut self.timeseries, id, value),
            Collection::Patterns => decode(&mut self.patterns, id, value),
        }
    }

    /// Report dangling references inside this stage.
    ///
    /// Insertion never enforces referential integrity; this is the check a
    /// caller runs before rendering or exporting.
    pub fn validate_references(&self) -> Vec<ReferenceIssue> {
        let mut issues = Vec::new();

        for element in self.elements.values() {
            let expected = element.element_type.node_count();
            if element.nodes.len() != expected {
                issues.push(ReferenceIssue::ArityMismatch {
                    element: element.id,
                    expected,
                    actual: element.nodes.len(),
                });
            }
            for node in &element.nodes {
                if !self.nodes.contains_key(node) {
                    issues.push(ReferenceIssue::MissingNode {
                        element: element.id,
                        node: *node,
                    });
                }
            }
            if let Some(material) = element.material {
                if !self.materials.contains_key(&material) {
                    issues.push(ReferenceIssue::MissingMaterial {
                        element: element.id,
                        material,
                    });
                }
            }
            if let Some(section) = element.section {
                if !self.sections.contains_key(&section) {
                    issues.push(ReferenceIssue::MissingSection {
                        element: element.id,
                        section,
                    });
                }
            }
        }

        for load in self.loads.values() {
            let present = match load.load_type {
                LoadType::Point => self.nodes.contains_key(&load.target),
                LoadType::Element => self.elements.contains_key(&load.target),
            };
            if !present {
                issues.push(ReferenceIssue::LoadTargetMissing {
                    load: load.id,
                    target: load.target,
                });
            }
        }

        for bc in self.boundary_conditions.values() {
            if !self.nodes.contains_key(&bc.node) {
                issues.push(ReferenceIssue::BoundaryNodeMissing {
                    boundary_condition: bc.id,
                    node: bc.node,
                });
            }
        }

        for pattern in self.patterns.values() {
            if let Some(series) = pattern.timeseries {
                if !self.timeseries.contains_key(&series) {
                    issues.push(ReferenceIssue::PatternSeriesMissing {
                        pattern: pattern.id,
                        timeseries: series,
                    });
                }
            }
        }

        issues
    }

    /// Fan `fix` constraints out into one boundary condition per node.
    ///
    /// Generated records get fresh ids above the current maximum and carry
    /// the constraint id in `origin`. Nodes already expanded for a
    /// constraint are skipped, so repeated calls add nothing.
    ///
    /// Returns the number of boundary conditions created. Fails without
    /// changing the stage when the id range above the current maximum is
    /// exhausted.
    pub fn expand_fixed_constraints(&mut self) -> ModelResult<usize> {
        let mut created = 0;
        let fixed: Vec<&Constraint> = self
            .constraints
            .values()
            .filter(|c| c.kind == ConstraintType::Fix)
            .collect();

        let mut additions = Vec::new();
        let mut next_id = match self.boundary_conditions.keys().next_back() {
            Some(max) => max.checked_add(1),
            None => Some(1),
        };

        for constraint in fixed {
            let Some(node_ids) = constraint.ids("node_ids") else {
                tracing::warn!(constraint = constraint.id, "fix constraint without a valid node_ids list");
                continue;
            };
            let flags: Vec<u8> = constraint
                .numbers("dofs")
                .unwrap_or_default()
                .into_iter()
                .map(|flag| if flag > 0.5 { 1 } else { 0 })
                .collect();

            let expanded: BTreeSet<ObjectId> = self
                .boundary_conditions
                .values()
                .filter(|bc| bc.origin == Some(constraint.id))
                .map(|bc| bc.node)
                .collect();

            for node in node_ids {
                if expanded.contains(&node) {
                    continue;
                }
                let Some(id) = next_id else {
                    return Err(ModelError::invalid_input(
                        "boundary_conditions",
                        format!("fix constraint {}", constraint.id),
                        "no boundary condition id left above the current maximum",
                    ));
                };
                additions.push(BoundaryCondition {
                    id,
                    node,
                    dofs: flags.clone(),
                    values: vec![0.0; flags.len()],
                    origin: Some(constraint.id),
                });
                next_id = id.checked_add(1);
                created += 1;
            }
        }

        for bc in additions {
            self.boundary_conditions.insert(bc.id, bc);
        }
        Ok(created)
    }
}

fn default_stage_name(id: StageId) -> String {
    format!("Stage {}", id)
}

/// A dangling or inconsistent reference found by [`Stage::validate_references`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceIssue {
    MissingNode { element: ObjectId, node: ObjectId },
    MissingMaterial { element: ObjectId, material: ObjectId },
    MissingSection { element: ObjectId, section: ObjectId },
    ArityMismatch { element: ObjectId, expected: usize, actual: usize },
    LoadTargetMissing { load: ObjectId, target: ObjectId },
    BoundaryNodeMissing { boundary_condition: ObjectId, node: ObjectId },
    PatternSeriesMissing { pattern: ObjectId, timeseries: ObjectId },
}

impl fmt::Display for ReferenceIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceIssue::MissingNode { element, node } => {
                write!(f, "element {} references missing node {}", element, node)
            }
            ReferenceIssue::MissingMaterial { element, material } => {
                write!(f, "element {} references missing material {}", element, material)
            }
            ReferenceIssue::MissingSection { element, section } => {
                write!(f, "element {} references missing section {}", element, section)
            }
            ReferenceIssue::ArityMismatch { element, expected, actual } => {
                write!(f, "element {} has {} nodes, expected {}", element, actual, expected)
            }
            ReferenceIssue::LoadTargetMissing { load, target } => {
                write!(f, "load {} targets missing object {}", load, target)
            }
            ReferenceIssue::BoundaryNodeMissing { boundary_condition, node } => {
                write!(f, "boundary condition {} is on missing node {}", boundary_condition, node)
            }
            ReferenceIssue::PatternSeriesMissing { pattern, timeseries } => {
                write!(f, "pattern {} uses missing time series {}", pattern, timeseries)
            }
        }
    }
}

/// All stages of a project, keyed by stage id.
///
/// Serializes as a JSON object keyed by decimal stage ids. On load the map
/// key is authoritative for each stage's `id`, and a missing root stage is
/// recreated empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<StageId, Stage>", into = "BTreeMap<StageId, Stage>")]
pub struct StageStore {
    stages: BTreeMap<StageId, Stage>,
}

impl StageStore {
    /// Create a store holding only an empty root stage.
    pub fn new() -> Self {
        let mut stages = BTreeMap::new();
        stages.insert(ROOT_STAGE, Stage::new(ROOT_STAGE, None));
        StageStore { stages }
    }

    /// Insert a new empty stage.
    ///
    /// Fails with [`ModelError::DuplicateStage`] when `id` is taken; use
    /// [`StageStore::replace_stage`] to overwrite deliberately.
    pub fn create_stage(&mut self, id: StageId, name: Option<&str>) -> ModelResult<StageId> {
        if self.stages.contains_key(&id) {
            return Err(ModelError::DuplicateStage { stage_id: id });
        }
        self.stages.insert(id, Stage::new(id, name));
        tracing::debug!(stage = id, "created stage");
        Ok(id)
    }

    /// Insert an empty stage, discarding any existing stage with that id.
    pub fn replace_stage(&mut self, id: StageId, name: Option<&str>) -> StageId {
        if self.stages.insert(id, Stage::new(id, name)).is_some() {
            tracing::warn!(stage = id, "replaced existing stage with an empty one");
        }
        id
    }

    /// Remove a stage. The root stage cannot be removed.
    ///
    /// Children of the removed stage move up to its parent.
    pub fn remove_stage(&mut self, id: StageId) -> ModelResult<Stage> {
        if id == ROOT_STAGE {
            return Err(ModelError::RootStageRemoval);
        }
        let removed = self.stages.remove(&id).ok_or(ModelError::StageNotFound { stage_id: id })?;
        for stage in self.stages.values_mut() {
            if stage.parent_stage_id == Some(id) {
                stage.parent_stage_id = removed.parent_stage_id;
            }
        }
        Ok(removed)
    }

    /// Attach stage `id` under `parent`, or make it a top-level stage.
    ///
    /// The parent must exist and must not be `id` or one of its
    /// descendants.
    pub fn set_parent(&mut self, id: StageId, parent: Option<StageId>) -> ModelResult<()> {
        self.get_stage(id)?;
        if let Some(parent) = parent {
            self.get_stage(parent)?;
            let mut cursor = Some(parent);
            let mut steps = 0;
            while let Some(current) = cursor {
                if current == id {
                    return Err(ModelError::invalid_input(
                        "parent_stage_id",
                        parent.to_string(),
                        format!("stage {} would become its own ancestor", id),
                    ));
                }
                steps += 1;
                if steps > self.stages.len() {
                    break;
                }
                cursor = self.stages.get(&current).and_then(|s| s.parent_stage_id);
            }
        }
        self.get_stage_mut(id)?.parent_stage_id = parent;
        tracing::debug!(stage = id, ?parent, "set stage parent");
        Ok(())
    }

    /// True when `stage`'s parent is missing, itself or absent.
    fn is_top_level(&self, stage: &Stage) -> bool {
        match stage.parent_stage_id {
            None => true,
            Some(parent) => parent == stage.id || !self.stages.contains_key(&parent),
        }
    }

    /// Stages without a (present) parent, by `order` then id.
    pub fn root_stages(&self) -> Vec<&Stage> {
        let mut roots: Vec<&Stage> = self.stages.values().filter(|s| self.is_top_level(s)).collect();
        roots.sort_by_key(|s| (s.order, s.id));
        roots
    }

    /// Direct children of `parent`, by `order` then id.
    pub fn child_stages(&self, parent: StageId) -> Vec<&Stage> {
        let mut children: Vec<&Stage> = self
            .stages
            .values()
            .filter(|s| s.id != parent && s.parent_stage_id == Some(parent))
            .collect();
        children.sort_by_key(|s| (s.order, s.id));
        children
    }

    /// Every stage once, in execution order: each parent before its
    /// children, siblings by `order` then id. Stages caught in a parent
    /// cycle come last.
    pub fn stage_sequence(&self) -> Vec<&Stage> {
        fn visit<'s>(
            store: &'s StageStore,
            stage: &'s Stage,
            seen: &mut BTreeSet<StageId>,
            out: &mut Vec<&'s Stage>,
        ) {
            if !seen.insert(stage.id) {
                return;
            }
            out.push(stage);
            for child in store.child_stages(stage.id) {
                visit(store, child, seen, out);
            }
        }

        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(self.stages.len());
        for root in self.root_stages() {
            visit(self, root, &mut seen, &mut out);
        }
        let mut stranded: Vec<&Stage> = self.stages.values().filter(|s| !seen.contains(&s.id)).collect();
        stranded.sort_by_key(|s| (s.order, s.id));
        for stage in stranded {
            visit(self, stage, &mut seen, &mut out);
        }
        out
    }

    pub fn get_stage(&self, id: StageId) -> ModelResult<&Stage> {
        self.stages.get(&id).ok_or(ModelError::StageNotFound { stage_id: id })
    }

    pub fn get_stage_mut(&mut self, id: StageId) -> ModelResult<&mut Stage> {
        self.stages.get_mut(&id).ok_or(ModelError::StageNotFound { stage_id: id })
    }

    /// The root stage. Always present.
    pub fn root(&self) -> &Stage {
        match self.stages.get(&ROOT_STAGE) {
            Some(stage) => stage,
            None => unreachable!("root stage is created with the store and never removed"),
        }
    }

    pub fn root_mut(&mut self) -> &mut Stage {
        self.stages
            .entry(ROOT_STAGE)
            .or_insert_with(|| Stage::new(ROOT_STAGE, None))
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.stages.contains_key(&id)
    }

    /// Stage ids in ascending numeric order
    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.keys().copied().collect()
    }

    /// Highest stage id present
    pub fn max_stage_id(&self) -> StageId {
        self.stages.keys().next_back().copied().unwrap_or(ROOT_STAGE)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Never true: the root stage always exists
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stages in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &Stage> {
        self.stages.values()
    }
}

impl Default for StageStore {
    fn default() -> Self {
        StageStore::new()
    }
}

impl From<BTreeMap<StageId, Stage>> for StageStore {
    fn from(mut stages: BTreeMap<StageId, Stage>) -> Self {
        for (id, stage) in stages.iter_mut() {
            if stage.id != *id {
                tracing::warn!(key = id, field = stage.id, "stage id differs from its key, using key");
                stage.id = *id;
            }
        }
        stages
            .entry(ROOT_STAGE)
            .or_insert_with(|| Stage::new(ROOT_STAGE, None));
        StageStore { stages }
    }
}

impl From<StageStore> for BTreeMap<StageId, Stage> {
    fn from(store: StageStore) -> Self {
        store.stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ElementType;
    use serde_json::json;

    fn fix_constraint(id: ObjectId, nodes: &[ObjectId]) -> Constraint {
        let mut props = PropertyMap::new();
        props.insert("node_ids".to_string(), json!(nodes));
        props.insert("dofs".to_string(), json!([1, 1, 1, 0, 0, 0]));
        Constraint::build(id, ConstraintType::Fix, props).unwrap()
    }

    #[test]
    fn test_new_store_has_root_stage() {
        let store = StageStore::new();
        assert_eq!(store.stage_ids(), vec![ROOT_STAGE]);
        let root = store.root();
        assert_eq!(root.name, "Stage 0");
        assert!(root.is_empty());
    }

    #[test]
    fn test_create_stage_rejects_duplicates() {
        let mut store = StageStore::new();
        assert_eq!(store.create_stage(3, None).unwrap(), 3);
        assert_eq!(store.get_stage(3).unwrap().name, "Stage 3");
        assert_eq!(
            store.create_stage(3, Some("Again")),
            Err(ModelError::DuplicateStage { stage_id: 3 })
        );
        assert_eq!(
            store.create_stage(ROOT_STAGE, None),
            Err(ModelError::DuplicateStage { stage_id: 0 })
        );
    }

    #[test]
    fn test_replace_stage_overwrites() {
        let mut store = StageStore::new();
        store.create_stage(1, Some("First")).unwrap();
        store
            .get_stage_mut(1)
            .unwrap()
            .nodes
            .insert(1, Node::new(1, 0.0, 0.0, 0.0));
        store.replace_stage(1, Some("Second"));
        let stage = store.get_stage(1).unwrap();
        assert_eq!(stage.name, "Second");
        assert!(stage.nodes.is_empty());
    }

    #[test]
    fn test_root_stage_cannot_be_removed() {
        let mut store = StageStore::new();
        store.create_stage(2, None).unwrap();
        assert_eq!(store.remove_stage(ROOT_STAGE), Err(ModelError::RootStageRemoval));
        assert!(store.remove_stage(2).is_ok());
        assert_eq!(store.remove_stage(2), Err(ModelError::StageNotFound { stage_id: 2 }));
    }

    #[test]
    fn test_stage_ids_sorted_numerically() {
        let mut store = StageStore::new();
        for id in [10, 2, 7] {
            store.create_stage(id, None).unwrap();
        }
        assert_eq!(store.stage_ids(), vec![0, 2, 7, 10]);
        assert_eq!(store.max_stage_id(), 10);
    }

    #[test]
    fn test_serialization_normalizes_keys() {
        let json = json!({
            "2": {"id": 99, "name": "Two"},
        });
        let store: StageStore = serde_json::from_value(json).unwrap();
        assert_eq!(store.get_stage(2).unwrap().id, 2);
        assert!(store.contains(ROOT_STAGE));

        let bad = json!({"two": {"id": 2, "name": "Two"}});
        assert!(serde_json::from_value::<StageStore>(bad).is_err());
    }

    #[test]
    fn test_all_collections_serialized() {
        let store = StageStore::new();
        let value = serde_json::to_value(&store).unwrap();
        let root = &value["0"];
        for collection in Collection::ALL {
            assert!(root.get(collection.key()).is_some(), "missing {}", collection);
        }
    }

    #[test]
    fn test_json_records_roundtrip_through_collection() {
        let mut stage = Stage::new(1, None);
        stage.nodes.insert(4, Node::new(4, 1.0, 2.0, 3.0));
        let records = stage.records_json(Collection::Nodes).unwrap();
        assert_eq!(records.len(), 1);

        let mut copy = Stage::new(2, None);
        for (id, value) in records {
            copy.insert_json(Collection::Nodes, id, value).unwrap();
        }
        assert_eq!(copy.nodes, stage.nodes);
        assert!(copy
            .insert_json(Collection::Elements, 1, json!({"id": 1, "type": "bogus"}))
            .is_err());
        assert!(copy.elements.is_empty());
    }

    #[test]
    fn test_validate_references() {
        let mut stage = Stage::new(1, None);
        stage.nodes.insert(1, Node::new(1, 0.0, 0.0, 0.0));
        stage.elements.insert(
            1,
            Element::new(1, ElementType::Truss, vec![1, 2], Some(4), None).unwrap(),
        );
        let issues = stage.validate_references();
        assert!(issues.contains(&ReferenceIssue::MissingNode { element: 1, node: 2 }));
        assert!(issues.contains(&ReferenceIssue::MissingMaterial { element: 1, material: 4 }));
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_expand_fixed_constraints_is_idempotent() {
        let mut stage = Stage::new(0, None);
        stage.boundary_conditions.insert(
            4,
            BoundaryCondition::new(4, 9, vec![1, 1, 1], vec![0.0; 3]).unwrap(),
        );
        stage.constraints.insert(1, fix_constraint(1, &[1, 2, 3]));

        assert_eq!(stage.expand_fixed_constraints().unwrap(), 3);
        assert_eq!(stage.boundary_conditions.len(), 4);
        let expanded: Vec<String> = stage
            .boundary_conditions
            .values()
            .filter(|bc| bc.origin == Some(1))
            .map(|bc| bc.composite_label())
            .collect();
        assert_eq!(expanded, vec!["1:1", "1:2", "1:3"]);
        assert!(stage.boundary_conditions.contains_key(&5));
        assert_eq!(stage.boundary_conditions[&5].dofs, vec![1, 1, 1, 0, 0, 0]);

        assert_eq!(stage.expand_fixed_constraints().unwrap(), 0);
        assert_eq!(stage.boundary_conditions.len(), 4);
    }

    #[test]
    fn test_expand_fixed_constraints_at_id_ceiling() {
        let mut stage = Stage::new(0, None);
        stage.boundary_conditions.insert(
            ObjectId::MAX - 1,
            BoundaryCondition::new(ObjectId::MAX - 1, 9, vec![1], vec![0.0]).unwrap(),
        );
        stage.constraints.insert(1, fix_constraint(1, &[1]));
        assert_eq!(stage.expand_fixed_constraints().unwrap(), 1);
        assert_eq!(stage.boundary_conditions[&ObjectId::MAX].origin, Some(1));

        stage.constraints.insert(2, fix_constraint(2, &[2, 3]));
        let before = stage.boundary_conditions.clone();
        let err = stage.expand_fixed_constraints().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
        assert_eq!(stage.boundary_conditions, before);
    }

    fn staged_store() -> StageStore {
        // 0 (root) <- 2 <- {3, 1}, 4 on its own
        let mut store = StageStore::new();
        for id in 1..=4 {
            store.create_stage(id, None).unwrap();
        }
        store.set_parent(2, Some(ROOT_STAGE)).unwrap();
        store.set_parent(3, Some(2)).unwrap();
        store.set_parent(1, Some(2)).unwrap();
        store.get_stage_mut(3).unwrap().order = 0;
        store.get_stage_mut(1).unwrap().order = 5;
        store.get_stage_mut(4).unwrap().order = 1;
        store
    }

    fn ids(stages: Vec<&Stage>) -> Vec<StageId> {
        stages.into_iter().map(|s| s.id).collect()
    }

    #[test]
    fn test_stage_type_names() {
        assert_eq!(StageType::default(), StageType::Static);
        assert_eq!("load pattern".parse::<StageType>().unwrap(), StageType::LoadPattern);
        assert_eq!("eigen".parse::<StageType>().unwrap(), StageType::Eigen);
        assert_eq!(serde_json::to_value(StageType::LoadPattern).unwrap(), json!("LOAD_PATTERN"));
        assert_eq!(
            "modal".parse::<StageType>().unwrap_err().error_code(),
            "INVALID_INPUT"
        );
    }

    #[test]
    fn test_stage_metadata_defaults_when_absent() {
        let stage: Stage = serde_json::from_value(json!({"id": 2, "name": "Gravity"})).unwrap();
        assert_eq!(stage.stage_type, StageType::Static);
        assert_eq!(stage.order, 0);
        assert_eq!(stage.parent_stage_id, None);
        assert!(stage.description.is_empty());
        assert!(stage.analysis_parameters.is_empty());
    }

    #[test]
    fn test_header_drops_objects_keeps_metadata() {
        let mut stage = Stage::new(2, Some("Wind"));
        stage.stage_type = StageType::Dynamic;
        stage.parent_stage_id = Some(1);
        stage.set_analysis_parameter("dt", 0.005);
        stage.nodes.insert(1, Node::new(1, 0.0, 0.0, 0.0));

        let header = stage.header();
        assert!(header.is_empty());
        assert_eq!(header.name, "Wind");
        assert_eq!(header.stage_type, StageType::Dynamic);
        assert_eq!(header.parent_stage_id, Some(1));
        assert_eq!(header.analysis_parameter("dt"), Some(0.005));
    }

    #[test]
    fn test_stage_sequence_is_parent_first() {
        let store = staged_store();
        assert_eq!(ids(store.root_stages()), vec![ROOT_STAGE, 4]);
        assert_eq!(ids(store.child_stages(2)), vec![3, 1]);
        assert_eq!(ids(store.stage_sequence()), vec![0, 2, 3, 1, 4]);
    }

    #[test]
    fn test_set_parent_rejects_cycles() {
        let mut store = staged_store();
        let err = store.set_parent(2, Some(3)).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
        assert!(store.set_parent(2, Some(2)).is_err());
        assert_eq!(
            store.set_parent(2, Some(9)),
            Err(ModelError::StageNotFound { stage_id: 9 })
        );
        assert_eq!(store.get_stage(2).unwrap().parent_stage_id, Some(ROOT_STAGE));
    }

    #[test]
    fn test_stage_sequence_covers_loaded_cycles() {
        let mut stages = BTreeMap::new();
        for (id, parent) in [(0, None), (1, Some(2)), (2, Some(1)), (3, Some(7))] {
            let mut stage = Stage::new(id, None);
            stage.parent_stage_id = parent;
            stages.insert(id, stage);
        }
        let store = StageStore::from(stages);
        // 3's parent is missing, so it is top level; 1 and 2 only reach each other
        assert_eq!(ids(store.root_stages()), vec![0, 3]);
        assert_eq!(ids(store.stage_sequence()), vec![0, 3, 1, 2]);
    }

    #[test]
    fn test_removing_stage_reparents_children() {
        let mut store = staged_store();
        store.remove_stage(2).unwrap();
        assert_eq!(store.get_stage(3).unwrap().parent_stage_id, Some(ROOT_STAGE));
        assert_eq!(ids(store.child_stages(ROOT_STAGE)), vec![3, 1]);
    }
}
