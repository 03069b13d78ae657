//! # Project Data Structures
//!
//! The `Project` struct is the root container for a staged model. It owns a
//! [`StageStore`] and exposes:
//!
//! - read-through accessors onto the root stage (`nodes()`, `elements()`, ...)
//! - `add_*` mutators that target any existing stage
//! - stage creation, propagation and promotion
//! - persistence through an explicitly chosen [`PersistenceAdapter`]
//! - analysis results storage through an explicitly chosen [`ResultsBackend`]
//!
//! ## Structure
//!
//! ```text
//! Project
//! ├── project_id, name, description, created_at, modified_at
//! ├── stages: StageStore (stage 0 always present)
//! ├── model_builder_params: ModelBuilderParams (ndm, ndf, model_type)
//! ├── analysis_settings: AnalysisSettings (type, solver, tolerance, iterations)
//! └── analysis_results (in memory only, never serialized)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use modsee_core::model::{properties, ElementType, MaterialType};
//! use modsee_core::project::Project;
//! use modsee_core::stage::ROOT_STAGE;
//!
//! let mut project = Project::new("Portal Frame");
//! project.add_node(1, 0.0, 0.0, 0.0, ROOT_STAGE).unwrap();
//! project.add_node(2, 5.0, 0.0, 0.0, ROOT_STAGE).unwrap();
//! project
//!     .add_material(1, MaterialType::Elastic, properties([("E", 2.0e11)]), ROOT_STAGE)
//!     .unwrap();
//! project
//!     .add_element(1, ElementType::Truss, vec![1, 2], Some(1), None, ROOT_STAGE)
//!     .unwrap();
//!
//! assert_eq!(project.nodes().len(), 2);
//! assert_eq!(project.elements()[&1].nodes, vec![1, 2]);
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ModelError, ModelResult};
use crate::model::{
    properties, BoundaryCondition, Constraint, ConstraintType, Element, ElementType, Load, LoadType,
    Material, MaterialType, Node, ObjectId, Pattern, PatternType, PropertyMap, Recorder, Section,
    SectionType, TimeSeries, TimeSeriesType, Transformation, TransformationType,
};
use crate::operations::{self, PropagationReport};
use crate::persistence::{AttributeStoreAdapter, PersistenceAdapter};
use crate::results::{AnalysisResults, AnalysisSummary, ResultsBackend};
use crate::stage::{Collection, Stage, StageId, StageStore, ROOT_STAGE};

/// Root project container.
///
/// This is the struct that gets serialized by the JSON backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: Uuid,

    pub name: String,

    #[serde(default)]
    pub description: String,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,

    /// Every stage of the model, stage 0 included
    pub stages: StageStore,

    #[serde(default)]
    pub model_builder_params: ModelBuilderParams,

    #[serde(default)]
    pub analysis_settings: AnalysisSettings,

    /// Results kept in memory when the backend is `InMemory`
    #[serde(skip)]
    analysis_results: BTreeMap<String, AnalysisResults>,

    #[serde(skip)]
    results_backend: ResultsBackend,
}

impl Project {
    /// Create a new project holding an empty root stage.
    ///
    /// An empty name becomes "Untitled Project".
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        let name = name.into();
        Project {
            project_id: Uuid::new_v4(),
            name: if name.trim().is_empty() {
                "Untitled Project".to_string()
            } else {
                name
            },
            description: String::new(),
            created_at: now,
            modified_at: now,
            stages: StageStore::new(),
            model_builder_params: ModelBuilderParams::default(),
            analysis_settings: AnalysisSettings::default(),
            analysis_results: BTreeMap::new(),
            results_backend: ResultsBackend::InMemory,
        }
    }

    /// Update the modified timestamp.
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    // ------------------------------------------------------------------
    // Root-stage views
    // ------------------------------------------------------------------

    pub fn root_stage(&self) -> &Stage {
        self.stages.root()
    }

    pub fn nodes(&self) -> &BTreeMap<ObjectId, Node> {
        &self.stages.root().nodes
    }

    pub fn elements(&self) -> &BTreeMap<ObjectId, Element> {
        &self.stages.root().elements
    }

    pub fn materials(&self) -> &BTreeMap<ObjectId, Material> {
        &self.stages.root().materials
    }

    pub fn boundary_conditions(&self) -> &BTreeMap<ObjectId, BoundaryCondition> {
        &self.stages.root().boundary_conditions
    }

    pub fn loads(&self) -> &BTreeMap<ObjectId, Load> {
        &self.stages.root().loads
    }

    pub fn sections(&self) -> &BTreeMap<ObjectId, Section> {
        &self.stages.root().sections
    }

    pub fn constraints(&self) -> &BTreeMap<ObjectId, Constraint> {
        &self.stages.root().constraints
    }

    pub fn recorders(&self) -> &BTreeMap<ObjectId, Recorder> {
        &self.stages.root().recorders
    }

    pub fn transformations(&self) -> &BTreeMap<ObjectId, Transformation> {
        &self.stages.root().transformations
    }

    pub fn timeseries(&self) -> &BTreeMap<ObjectId, TimeSeries> {
        &self.stages.root().timeseries
    }

    pub fn patterns(&self) -> &BTreeMap<ObjectId, Pattern> {
        &self.stages.root().patterns
    }

    // ------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------

    /// Create an empty stage; fails if the id is taken.
    pub fn create_stage(&mut self, stage_id: StageId, name: Option<&str>) -> ModelResult<StageId> {
        let id = self.stages.create_stage(stage_id, name)?;
        self.touch();
        Ok(id)
    }

    /// Remove a non-root stage.
    pub fn remove_stage(&mut self, stage_id: StageId) -> ModelResult<Stage> {
        let stage = self.stages.remove_stage(stage_id)?;
        self.touch();
        Ok(stage)
    }

    pub fn stage(&self, stage_id: StageId) -> ModelResult<&Stage> {
        self.stages.get_stage(stage_id)
    }

    /// Mutable access to a stage, e.g. to set its type or parameters.
    /// Counts as a modification.
    pub fn stage_mut(&mut self, stage_id: StageId) -> ModelResult<&mut Stage> {
        self.stages.get_stage(stage_id)?;
        self.touch();
        self.stages.get_stage_mut(stage_id)
    }

    /// Place a stage in the analysis sequence. See [`StageStore::set_parent`].
    pub fn set_stage_parent(&mut self, stage_id: StageId, parent: Option<StageId>) -> ModelResult<()> {
        self.stages.set_parent(stage_id, parent)?;
        self.touch();
        Ok(())
    }

    /// Copy objects from one stage to another. See [`operations::propagate`].
    pub fn propagate_stage(
        &mut self,
        from: StageId,
        to: StageId,
        overwrite: bool,
    ) -> ModelResult<PropagationReport> {
        let report = operations::propagate(&mut self.stages, from, to, overwrite)?;
        self.touch();
        Ok(report)
    }

    /// Make a stage the visualized root. See [`operations::promote_to_root`].
    pub fn promote_stage_to_root(&mut self, stage_id: StageId) -> ModelResult<StageId> {
        let promoted = operations::promote_to_root(&mut self.stages, stage_id)?;
        self.touch();
        Ok(promoted)
    }

    // ------------------------------------------------------------------
    // Mutators
    // ------------------------------------------------------------------

    /// Insert a record into one collection of a stage.
    ///
    /// Ids are last-write-wins: an existing record with the same id is
    /// replaced.
    fn insert<T, F>(
        &mut self,
        stage_id: StageId,
        collection: Collection,
        id: ObjectId,
        record: T,
        select: F,
    ) -> ModelResult<ObjectId>
    where
        F: FnOnce(&mut Stage) -> &mut BTreeMap<ObjectId, T>,
    {
        let stage = self.stages.get_stage_mut(stage_id)?;
        if select(stage).insert(id, record).is_some() {
            tracing::debug!(stage = stage_id, %collection, id, "replaced existing object");
        } else {
            tracing::debug!(stage = stage_id, %collection, id, "added object");
        }
        self.touch();
        Ok(id)
    }

    pub fn add_node(&mut self, id: ObjectId, x: f64, y: f64, z: f64, stage_id: StageId) -> ModelResult<ObjectId> {
        self.insert(stage_id, Collection::Nodes, id, Node::new(id, x, y, z), |s| &mut s.nodes)
    }

    /// Set the lumped mass of an existing node.
    pub fn set_node_mass(&mut self, id: ObjectId, mass: [f64; 6], stage_id: StageId) -> ModelResult<()> {
        let stage = self.stages.get_stage_mut(stage_id)?;
        let node = stage
            .nodes
            .get_mut(&id)
            .ok_or_else(|| ModelError::invalid_input("node", id.to_string(), format!("not in stage {}", stage_id)))?;
        node.mass = mass;
        self.touch();
        Ok(())
    }

    pub fn add_element(
        &mut self,
        id: ObjectId,
        element_type: ElementType,
        nodes: Vec<ObjectId>,
        material: Option<ObjectId>,
        section: Option<ObjectId>,
        stage_id: StageId,
    ) -> ModelResult<ObjectId> {
        self.stages.get_stage(stage_id)?;
        let element = Element::new(id, element_type, nodes, material, section)?;
        self.insert(stage_id, Collection::Elements, id, element, |s| &mut s.elements)
    }

    pub fn add_material(
        &mut self,
        id: ObjectId,
        material_type: MaterialType,
        properties: PropertyMap,
        stage_id: StageId,
    ) -> ModelResult<ObjectId> {
        self.stages.get_stage(stage_id)?;
        let material = Material::build(id, material_type, properties)?;
        self.insert(stage_id, Collection::Materials, id, material, |s| &mut s.materials)
    }

    pub fn add_section(
        &mut self,
        id: ObjectId,
        section_type: SectionType,
        properties: PropertyMap,
        stage_id: StageId,
    ) -> ModelResult<ObjectId> {
        self.stages.get_stage(stage_id)?;
        let section = Section::build(id, section_type, properties)?;
        self.insert(stage_id, Collection::Sections, id, section, |s| &mut s.sections)
    }

    pub fn add_constraint(
        &mut self,
        id: ObjectId,
        constraint_type: ConstraintType,
        properties: PropertyMap,
        stage_id: StageId,
    ) -> ModelResult<ObjectId> {
        self.stages.get_stage(stage_id)?;
        let constraint = Constraint::build(id, constraint_type, properties)?;
        self.insert(stage_id, Collection::Constraints, id, constraint, |s| &mut s.constraints)
    }

    /// Add a single-node boundary condition (`dofs` are 0/1 fixity flags).
    pub fn add_boundary_condition(
        &mut self,
        id: ObjectId,
        node: ObjectId,
        dofs: Vec<u8>,
        values: Vec<f64>,
        stage_id: StageId,
    ) -> ModelResult<ObjectId> {
        self.stages.get_stage(stage_id)?;
        let bc = BoundaryCondition::new(id, node, dofs, values)?;
        self.insert(stage_id, Collection::BoundaryConditions, id, bc, |s| {
            &mut s.boundary_conditions
        })
    }

    /// Add a load on a node (`LoadType::Point`) or element (`LoadType::Element`).
    pub fn add_load(
        &mut self,
        id: ObjectId,
        load_type: LoadType,
        target: ObjectId,
        dofs: Vec<u8>,
        values: Vec<f64>,
        stage_id: StageId,
    ) -> ModelResult<ObjectId> {
        self.stages.get_stage(stage_id)?;
        let load = Load::new(id, load_type, target, dofs, values)?;
        self.insert(stage_id, Collection::Loads, id, load, |s| &mut s.loads)
    }

    pub fn add_recorder(&mut self, recorder: Recorder, stage_id: StageId) -> ModelResult<ObjectId> {
        if recorder.file_name.trim().is_empty() {
            return Err(ModelError::missing_field("file_name"));
        }
        if recorder.time_interval < 0.0 {
            return Err(ModelError::invalid_input(
                "time_interval",
                recorder.time_interval.to_string(),
                "must not be negative",
            ));
        }
        let id = recorder.id;
        self.insert(stage_id, Collection::Recorders, id, recorder, |s| &mut s.recorders)
    }

    pub fn add_transformation(
        &mut self,
        id: ObjectId,
        transformation_type: TransformationType,
        properties: PropertyMap,
        stage_id: StageId,
    ) -> ModelResult<ObjectId> {
        self.stages.get_stage(stage_id)?;
        let transformation = Transformation::build(id, transformation_type, properties)?;
        self.insert(stage_id, Collection::Transformations, id, transformation, |s| {
            &mut s.transformations
        })
    }

    pub fn add_timeseries(
        &mut self,
        id: ObjectId,
        series_type: TimeSeriesType,
        properties: PropertyMap,
        stage_id: StageId,
    ) -> ModelResult<ObjectId> {
        self.stages.get_stage(stage_id)?;
        let series = TimeSeries::build(id, series_type, properties)?;
        self.insert(stage_id, Collection::Timeseries, id, series, |s| &mut s.timeseries)
    }

    pub fn add_pattern(
        &mut self,
        id: ObjectId,
        pattern_type: PatternType,
        timeseries: Option<ObjectId>,
        properties: PropertyMap,
        stage_id: StageId,
    ) -> ModelResult<ObjectId> {
        self.stages.get_stage(stage_id)?;
        let pattern = Pattern::build(id, pattern_type, timeseries, properties)?;
        self.insert(stage_id, Collection::Patterns, id, pattern, |s| &mut s.patterns)
    }

    /// Update the model builder parameters.
    pub fn update_model_builder_params(
        &mut self,
        ndm: u8,
        ndf: u8,
        model_type: BuilderType,
    ) -> ModelResult<()> {
        if ndm != 2 && ndm != 3 {
            return Err(ModelError::invalid_input("ndm", ndm.to_string(), "must be 2 or 3"));
        }
        if ndf == 0 {
            return Err(ModelError::invalid_input("ndf", ndf.to_string(), "must be at least 1"));
        }
        self.model_builder_params = ModelBuilderParams { ndm, ndf, model_type };
        self.touch();
        Ok(())
    }

    /// Fill an empty root stage with a cube of eight nodes and twelve
    /// truss edges sharing one steel material.
    ///
    /// Does nothing when the root stage already has nodes or elements.
    pub fn create_sample_data(&mut self) -> ModelResult<()> {
        if !self.nodes().is_empty() || !self.elements().is_empty() {
            return Ok(());
        }

        let corners = [
            (1, 0.0, 0.0, 0.0),
            (2, 10.0, 0.0, 0.0),
            (3, 10.0, 10.0, 0.0),
            (4, 0.0, 10.0, 0.0),
            (5, 0.0, 0.0, 10.0),
            (6, 10.0, 0.0, 10.0),
            (7, 10.0, 10.0, 10.0),
            (8, 0.0, 10.0, 10.0),
        ];
        for (id, x, y, z) in corners {
            self.add_node(id, x, y, z, ROOT_STAGE)?;
        }

        self.add_material(
            1,
            MaterialType::Steel,
            properties([("E", 200_000.0), ("nu", 0.3), ("rho", 7850.0)]),
            ROOT_STAGE,
        )?;

        let edges = [
            [1, 2], [2, 3], [3, 4], [4, 1],
            [5, 6], [6, 7], [7, 8], [8, 5],
            [1, 5], [2, 6], [3, 7], [4, 8],
        ];
        for (index, pair) in edges.iter().enumerate() {
            let id = index as ObjectId + 1;
            self.add_element(id, ElementType::Truss, pair.to_vec(), Some(1), None, ROOT_STAGE)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Save through the given backend, returning where the project went.
    pub fn save(&self, adapter: &dyn PersistenceAdapter) -> ModelResult<PathBuf> {
        let location = adapter.save_project(self)?;
        tracing::info!(backend = adapter.name(), path = %location.display(), "saved project");
        Ok(location)
    }

    /// Load a project through the given backend.
    pub fn load(adapter: &dyn PersistenceAdapter) -> ModelResult<Project> {
        let project = adapter.load_project()?;
        tracing::info!(
            backend = adapter.name(),
            project = %project.project_id,
            stages = project.stages.len(),
            "loaded project"
        );
        Ok(project)
    }

    // ------------------------------------------------------------------
    // Analysis results
    // ------------------------------------------------------------------

    /// Choose where analysis results are kept.
    pub fn set_results_backend(&mut self, backend: ResultsBackend) {
        self.results_backend = backend;
    }

    pub fn results_backend(&self) -> &ResultsBackend {
        &self.results_backend
    }

    /// Store results under `analysis_id`, replacing any previous run with
    /// that id.
    pub fn add_analysis_results(
        &mut self,
        analysis_id: impl Into<String>,
        results: AnalysisResults,
    ) -> ModelResult<String> {
        let analysis_id = analysis_id.into();
        match &self.results_backend {
            ResultsBackend::InMemory => {
                self.analysis_results.insert(analysis_id.clone(), results);
            }
            ResultsBackend::AttributeStore(path) => {
                let store = AttributeStoreAdapter::open(path)?;
                store.save_analysis_results(&self.project_id, &analysis_id, &results)?;
            }
        }
        tracing::debug!(analysis = %analysis_id, "stored analysis results");
        self.touch();
        Ok(analysis_id)
    }

    /// Results of one analysis, `None` when there is no such run.
    pub fn get_analysis_results(&self, analysis_id: &str) -> ModelResult<Option<AnalysisResults>> {
        match &self.results_backend {
            ResultsBackend::InMemory => Ok(self.analysis_results.get(analysis_id).cloned()),
            ResultsBackend::AttributeStore(path) => {
                AttributeStoreAdapter::open(path)?.get_analysis_results(&self.project_id, analysis_id)
            }
        }
    }

    /// Id, name and timestamp of every stored analysis.
    pub fn list_analyses(&self) -> ModelResult<Vec<AnalysisSummary>> {
        match &self.results_backend {
            ResultsBackend::InMemory => Ok(self
                .analysis_results
                .iter()
                .map(|(id, results)| AnalysisSummary::from_results(id.clone(), results))
                .collect()),
            ResultsBackend::AttributeStore(path) => AttributeStoreAdapter::open(path)?.list_analyses(&self.project_id),
        }
    }
}

impl Default for Project {
    fn default() -> Self {
        Project::new("")
    }
}

/// Model builder kind passed to the OpenSees `model` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderType {
    #[default]
    Basic,
}

impl BuilderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuilderType::Basic => "basic",
        }
    }
}

/// Spatial dimension and DOFs per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelBuilderParams {
    pub ndm: u8,
    pub ndf: u8,
    #[serde(default)]
    pub model_type: BuilderType,
}

impl Default for ModelBuilderParams {
    fn default() -> Self {
        ModelBuilderParams {
            ndm: 3,
            ndf: 6,
            model_type: BuilderType::Basic,
        }
    }
}

/// Analysis kind run by the external solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    #[default]
    Static,
    Transient,
    Eigen,
}

/// Nonlinear solution algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverAlgorithm {
    #[default]
    Newton,
    ModifiedNewton,
    KrylovNewton,
    Linear,
}

/// Solver configuration handed to the external engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    #[serde(rename = "type")]
    pub analysis_type: AnalysisType,
    pub solver: SolverAlgorithm,
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        AnalysisSettings {
            analysis_type: AnalysisType::Static,
            solver: SolverAlgorithm::Newton,
            tolerance: 1e-6,
            max_iterations: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecorderTarget;
    use crate::model::RecorderType;
    use crate::stage::StageType;

    #[test]
    fn test_project_creation() {
        let project = Project::new("Cantilever");
        assert_eq!(project.name, "Cantilever");
        assert_eq!(project.stages.stage_ids(), vec![ROOT_STAGE]);
        assert_eq!(project.created_at, project.modified_at);
        assert_eq!(Project::new("  ").name, "Untitled Project");
    }

    #[test]
    fn test_add_to_missing_stage_fails() {
        let mut project = Project::new("P");
        assert_eq!(
            project.add_node(1, 0.0, 0.0, 0.0, 3),
            Err(ModelError::StageNotFound { stage_id: 3 })
        );
        assert_eq!(
            project.add_material(1, MaterialType::Elastic, properties([("E", 1.0)]), 3),
            Err(ModelError::StageNotFound { stage_id: 3 })
        );
    }

    #[test]
    fn test_stage_sequencing_through_project() {
        let mut project = Project::new("P");
        project.create_stage(1, Some("Gravity")).unwrap();
        project.create_stage(2, Some("Modes")).unwrap();
        project.set_stage_parent(2, Some(1)).unwrap();
        project.stage_mut(2).unwrap().stage_type = StageType::Eigen;

        assert!(project.set_stage_parent(1, Some(2)).is_err());
        assert_eq!(project.stage(2).unwrap().stage_type, StageType::Eigen);
        let order: Vec<StageId> = project.stages.stage_sequence().iter().map(|s| s.id).collect();
        assert_eq!(order, vec![ROOT_STAGE, 1, 2]);
    }

    #[test]
    fn test_add_touches_modified() {
        let mut project = Project::new("P");
        let before = project.modified_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        project.add_node(1, 0.0, 0.0, 0.0, ROOT_STAGE).unwrap();
        assert!(project.modified_at > before);
    }

    #[test]
    fn test_last_write_wins_on_id_collision() {
        let mut project = Project::new("P");
        project.add_node(1, 0.0, 0.0, 0.0, ROOT_STAGE).unwrap();
        project.add_node(1, 3.0, 0.0, 0.0, ROOT_STAGE).unwrap();
        assert_eq!(project.nodes().len(), 1);
        assert_eq!(project.nodes()[&1].coordinates, [3.0, 0.0, 0.0]);
    }

    #[test]
    fn test_add_targets_given_stage() {
        let mut project = Project::new("P");
        project.create_stage(1, Some("Loaded")).unwrap();
        project.add_load(1, LoadType::Point, 7, vec![2], vec![-1.0], 1).unwrap();
        assert!(project.loads().is_empty());
        assert_eq!(project.stage(1).unwrap().loads.len(), 1);
    }

    #[test]
    fn test_recorder_validation() {
        let mut project = Project::new("P");
        let bad = Recorder::new(1, RecorderType::Node, RecorderTarget::all(), " ");
        assert_eq!(project.add_recorder(bad, ROOT_STAGE), Err(ModelError::missing_field("file_name")));
        let good = Recorder::new(1, RecorderType::Node, RecorderTarget::all(), "disp.out")
            .with_dofs(vec![1, 2, 3])
            .with_time_interval(0.1);
        assert_eq!(project.add_recorder(good, ROOT_STAGE).unwrap(), 1);
    }

    #[test]
    fn test_set_node_mass() {
        let mut project = Project::new("P");
        project.add_node(1, 0.0, 0.0, 0.0, ROOT_STAGE).unwrap();
        project.set_node_mass(1, [1.0, 1.0, 1.0, 0.0, 0.0, 0.0], ROOT_STAGE).unwrap();
        assert!(project.nodes()[&1].has_mass());
        assert!(project.set_node_mass(2, [0.0; 6], ROOT_STAGE).is_err());
    }

    #[test]
    fn test_model_builder_validation() {
        let mut project = Project::new("P");
        assert!(project.update_model_builder_params(4, 6, BuilderType::Basic).is_err());
        assert!(project.update_model_builder_params(2, 0, BuilderType::Basic).is_err());
        project.update_model_builder_params(2, 3, BuilderType::Basic).unwrap();
        assert_eq!(project.model_builder_params.ndf, 3);
    }

    #[test]
    fn test_sample_data() {
        let mut project = Project::new("Cube");
        project.create_sample_data().unwrap();
        assert_eq!(project.nodes().len(), 8);
        assert_eq!(project.elements().len(), 12);
        assert!(project.elements().values().all(|e| e.material == Some(1)));
        assert!(project.root_stage().validate_references().is_empty());

        project.create_sample_data().unwrap();
        assert_eq!(project.nodes().len(), 8);
    }

    #[test]
    fn test_in_memory_results() {
        let mut project = Project::new("P");
        let results = AnalysisResults::new("Stage 2 Analysis").for_stage(2);
        project.add_analysis_results("analysis_2", results.clone()).unwrap();
        assert_eq!(project.get_analysis_results("analysis_2").unwrap(), Some(results));
        assert_eq!(project.get_analysis_results("missing").unwrap(), None);
        let listing = project.list_analyses().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].id, "analysis_2");
    }

    #[test]
    fn test_results_not_serialized() {
        let mut project = Project::new("P");
        project.add_analysis_results("a", AnalysisResults::new("run")).unwrap();
        let json = serde_json::to_value(&project).unwrap();
        assert!(json.get("analysis_results").is_none());
        assert_eq!(json["analysis_settings"]["type"], "static");
        assert_eq!(json["analysis_settings"]["solver"], "newton");
        assert_eq!(json["model_builder_params"]["model_type"], "basic");
    }
}
